//! Configuration applier: reconciles the running engine with a
//! declarative desired config. Diffs sources, sinks and routes
//! independently, then composes each route's effective speaker matrix and
//! EQ from its source and sink settings.

pub mod diff;
pub mod eq_compose;
pub mod multi_device;

use crate::error::ApplierError;
use crate::matrix::{Matrix, SpeakerMatrix};
use crate::sip::eq::EqGains;
use diff::{diff_maps, Diff};
use multi_device::ChannelMapping;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct DesiredSource {
    pub channels: usize,
    pub gain: f32,
    pub eq: EqGains,
    pub eq_normalization: bool,
    pub volume_normalization: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DesiredSink {
    pub channels: usize,
    pub eq: EqGains,
    pub eq_normalization: bool,
    /// Fans this sink's mixed output across several RTP receivers by
    /// channel pair instead of sending the full mix to one device.
    pub multi_device_mode: bool,
    pub rtp_receivers: Vec<ChannelMapping>,
    /// Sinks sharing the same group name synchronise their mix ticks via
    /// a soft barrier instead of each running on its own local clock.
    pub sync_group: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DesiredRoute {
    pub source_id: String,
    pub sink_id: String,
    pub matrix: SpeakerMatrixSpec,
    pub delay_ms: f32,
    /// How far behind live the route reads its source's timeshift ring,
    /// clamped to the ring's window by the store itself on first read.
    pub timeshift_offset: Duration,
}

/// Serializable mirror of [`SpeakerMatrix`] (the real type isn't `Eq`-by-value
/// friendly for config diffing, since it may carry float gains).
#[derive(Debug, Clone, PartialEq)]
pub enum SpeakerMatrixSpec {
    Auto,
    Explicit(Vec<f32>),
}

#[derive(Debug, Clone, Default)]
pub struct DesiredConfig {
    pub sources: HashMap<String, DesiredSource>,
    pub sinks: HashMap<String, DesiredSink>,
    pub routes: HashMap<String, DesiredRoute>,
}

#[derive(Debug)]
pub struct ApplyPlan {
    pub sources: Diff<String, DesiredSource>,
    pub sinks: Diff<String, DesiredSink>,
    pub routes: Diff<String, DesiredRoute>,
}

/// Computes create/update/release operations for every part of the config,
/// diffed independently so unrelated parts of the graph don't get rebuilt
/// together.
pub fn compute_plan(current: &DesiredConfig, desired: &DesiredConfig) -> ApplyPlan {
    ApplyPlan {
        sources: diff_maps(&current.sources, &desired.sources),
        sinks: diff_maps(&current.sinks, &desired.sinks),
        routes: diff_maps(&current.routes, &desired.routes),
    }
}

/// A route's fully composed, ready-to-apply DSP parameters.
pub struct ResolvedRoute {
    pub matrix: Matrix,
    pub eq: EqGains,
    pub eq_normalization: bool,
    pub volume_normalization: bool,
}

/// Validates a route against the known sources/sinks and resolves its
/// effective matrix and EQ, the work the applier does once a route is
/// confirmed creatable or updatable.
pub fn resolve_route(config: &DesiredConfig, route: &DesiredRoute) -> Result<ResolvedRoute, ApplierError> {
    let source = config
        .sources
        .get(&route.source_id)
        .ok_or_else(|| ApplierError::UnknownSource(route.sink_id.clone(), route.source_id.clone()))?;
    let sink = config
        .sinks
        .get(&route.sink_id)
        .ok_or_else(|| ApplierError::UnknownSink(route.sink_id.clone(), route.sink_id.clone()))?;

    let route_matrix = match &route.matrix {
        SpeakerMatrixSpec::Auto => SpeakerMatrix::Auto,
        SpeakerMatrixSpec::Explicit(gains) => {
            let expected = source.channels;
            if gains.len() != expected * sink.channels {
                return Err(ApplierError::MatrixDimensionMismatch {
                    expected,
                    got: gains.len() / expected.max(1),
                });
            }
            SpeakerMatrix::Explicit(Matrix {
                in_channels: source.channels,
                out_channels: sink.channels,
                gains: gains.clone(),
            })
        }
    };

    let resolved = route_matrix.resolve(source.channels, sink.channels);
    let eq = eq_compose::compose_route_eq(&source.eq, &sink.eq);
    Ok(ResolvedRoute {
        matrix: resolved,
        eq,
        eq_normalization: source.eq_normalization && sink.eq_normalization,
        volume_normalization: source.volume_normalization,
    })
}

/// Confirms no two sources or sinks share an id, a precondition the
/// applier checks before diffing.
pub fn validate_ids(config: &DesiredConfig) -> Result<(), ApplierError> {
    let mut seen = std::collections::HashSet::new();
    for id in config.sources.keys() {
        if !seen.insert(id.clone()) {
            return Err(ApplierError::DuplicateSource(id.clone()));
        }
    }
    let mut seen_sinks = std::collections::HashSet::new();
    for id in config.sinks.keys() {
        if !seen_sinks.insert(id.clone()) {
            return Err(ApplierError::DuplicateSink(id.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> DesiredConfig {
        let mut sources = HashMap::new();
        sources.insert(
            "kitchen".to_string(),
            DesiredSource {
                channels: 2,
                gain: 1.0,
                eq: EqGains::default(),
                eq_normalization: true,
                volume_normalization: false,
            },
        );
        let mut sinks = HashMap::new();
        sinks.insert(
            "living_room".to_string(),
            DesiredSink {
                channels: 2,
                eq: EqGains::default(),
                eq_normalization: true,
                multi_device_mode: false,
                rtp_receivers: vec![],
                sync_group: None,
            },
        );
        let mut routes = HashMap::new();
        routes.insert(
            "kitchen_to_living_room".to_string(),
            DesiredRoute {
                source_id: "kitchen".to_string(),
                sink_id: "living_room".to_string(),
                matrix: SpeakerMatrixSpec::Auto,
                delay_ms: 0.0,
                timeshift_offset: Duration::ZERO,
            },
        );
        DesiredConfig {
            sources,
            sinks,
            routes,
        }
    }

    #[test]
    fn no_op_reapply_produces_empty_plan() {
        let config = sample_config();
        let plan = compute_plan(&config, &config);
        assert!(plan.sources.created.is_empty() && plan.sources.updated.is_empty() && plan.sources.released.is_empty());
        assert!(plan.routes.created.is_empty() && plan.routes.updated.is_empty());
    }

    #[test]
    fn resolves_auto_matrix_for_matching_channels() {
        let config = sample_config();
        let route = config.routes.get("kitchen_to_living_room").unwrap();
        let resolved = resolve_route(&config, route).expect("resolves");
        assert_eq!(resolved.matrix.in_channels, 2);
        assert_eq!(resolved.matrix.out_channels, 2);
    }

    #[test]
    fn unknown_source_is_rejected() {
        let mut config = sample_config();
        config.routes.get_mut("kitchen_to_living_room").unwrap().source_id = "ghost".to_string();
        let route = config.routes.get("kitchen_to_living_room").unwrap();
        assert!(resolve_route(&config, route).is_err());
    }

    #[test]
    fn mismatched_explicit_matrix_dimensions_rejected() {
        let mut config = sample_config();
        config.routes.get_mut("kitchen_to_living_room").unwrap().matrix =
            SpeakerMatrixSpec::Explicit(vec![1.0, 0.0, 0.0]);
        let route = config.routes.get("kitchen_to_living_room").unwrap();
        assert!(resolve_route(&config, route).is_err());
    }
}
