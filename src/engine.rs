//! Top-level engine wiring: owns the shared timeshift store, the
//! per-route SIP processors and per-sink mixers, and drives chunks from
//! receivers through to encoders, applying config changes to the running
//! set of routes and sinks.

use crate::applier::{compute_plan, resolve_route, ApplyPlan, DesiredConfig};
use crate::clock::PlayoutClock;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::frame::PcmChunk;
use crate::sam::sync::SyncGroup;
use crate::sam::SinkMixer;
use crate::sip::{SipSettings, SourceProcessor};
use crate::stats::StatsRegistry;
use crate::tag::SourceTag;
use crate::timeshift::TimeshiftStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument};

pub struct Engine {
    pub config: Arc<EngineConfig>,
    pub timeshift: Arc<TimeshiftStore>,
    pub stats: Arc<StatsRegistry>,
    pub clock: PlayoutClock,
    desired: RwLock<DesiredConfig>,
    processors: RwLock<HashMap<String, SourceProcessor>>,
    mixers: RwLock<HashMap<String, SinkMixer>>,
    /// Per-route timeshift read cursor, seeded from the route's
    /// `timeshift_offset` on creation and advanced by [`Self::pump_route`].
    cursors: RwLock<HashMap<String, std::time::Duration>>,
    /// One [`SyncGroup`] per distinct `DesiredSink::sync_group` name.
    sync_groups: RwLock<HashMap<String, SyncGroup>>,
    /// Sink id -> sync group name, for sinks that opted into one.
    sink_groups: RwLock<HashMap<String, String>>,
    /// Route id -> sink id, so a resolved bias can reach every route
    /// feeding a given sink's SIPs.
    route_sinks: RwLock<HashMap<String, String>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let config = Arc::new(config);
        Engine {
            timeshift: Arc::new(TimeshiftStore::new(&config.timeshift)),
            stats: Arc::new(StatsRegistry::new()),
            clock: PlayoutClock::new(),
            config,
            desired: RwLock::new(DesiredConfig::default()),
            processors: RwLock::new(HashMap::new()),
            mixers: RwLock::new(HashMap::new()),
            cursors: RwLock::new(HashMap::new()),
            sync_groups: RwLock::new(HashMap::new()),
            sink_groups: RwLock::new(HashMap::new()),
            route_sinks: RwLock::new(HashMap::new()),
        }
    }

    /// Applies a new desired config: diffs it against the currently applied
    /// one and creates/updates/releases routes and sinks accordingly.
    #[instrument(skip(self, desired))]
    pub async fn apply(&self, desired: DesiredConfig) -> Result<ApplyPlan, EngineError> {
        crate::applier::validate_ids(&desired)?;
        let current = self.desired.read().await;
        let plan = compute_plan(&current, &desired);
        drop(current);

        for (id, sink) in plan.sinks.created.iter().chain(plan.sinks.updated.iter()) {
            let format = crate::formats::AudioFormat {
                sample_rate: 48_000,
                frame_format: crate::formats::FrameFormat {
                    channels: sink.channels,
                    sample_format: crate::formats::SampleFormat::S16,
                },
            };
            let mut mixers = self.mixers.write().await;
            mixers.insert(
                id.clone(),
                SinkMixer::with_capacities(
                    SourceTag::new(id.clone())?,
                    format,
                    self.config.sip.underrun_hold_timeout,
                    self.config.sam.max_queued_chunks,
                    self.config.sip.max_ready_chunks_per_source,
                ),
            );

            let mut sink_groups = self.sink_groups.write().await;
            match &sink.sync_group {
                Some(group) => {
                    sink_groups.insert(id.clone(), group.clone());
                    self.sync_groups.write().await.entry(group.clone()).or_insert_with(|| {
                        SyncGroup::new(
                            self.config.sam.barrier_timeout_ms,
                            self.config.sam.max_rate_adjustment,
                            self.config.sam.sync_smoothing_factor,
                        )
                    });
                }
                None => {
                    sink_groups.remove(id);
                }
            }
        }
        for id in &plan.sinks.released {
            self.mixers.write().await.remove(id);
            self.sink_groups.write().await.remove(id);
        }

        for (id, route) in plan.routes.created.iter().chain(plan.routes.updated.iter()) {
            let resolved = resolve_route(&desired, route)?;
            let source_format = crate::formats::AudioFormat {
                sample_rate: 48_000,
                frame_format: crate::formats::FrameFormat {
                    channels: resolved.matrix.in_channels,
                    sample_format: crate::formats::SampleFormat::S16,
                },
            };
            let sink_format = crate::formats::AudioFormat {
                sample_rate: 48_000,
                frame_format: crate::formats::FrameFormat {
                    channels: resolved.matrix.out_channels,
                    sample_format: crate::formats::SampleFormat::S16,
                },
            };
            let processor = SourceProcessor::new(
                SourceTag::new(route.source_id.clone())?,
                source_format,
                sink_format,
                resolved.matrix,
                SipSettings {
                    delay_ms: route.delay_ms,
                    eq: resolved.eq,
                    eq_normalization: resolved.eq_normalization,
                    volume_normalization: resolved.volume_normalization,
                    ..SipSettings::default()
                },
                self.config.sip.chunk_samples,
            );
            self.processors.write().await.insert(id.clone(), processor);
            self.cursors.write().await.insert(
                id.clone(),
                self.clock.now().saturating_sub(route.timeshift_offset),
            );
            self.route_sinks.write().await.insert(id.clone(), route.sink_id.clone());

            let mut mixers = self.mixers.write().await;
            if let Some(mixer) = mixers.get_mut(&route.sink_id) {
                mixer.add_lane(SourceTag::new(route.source_id.clone())?);
            }
        }
        for id in &plan.routes.released {
            self.processors.write().await.remove(id);
            self.cursors.write().await.remove(id);
            self.route_sinks.write().await.remove(id);
        }

        *self.desired.write().await = desired;
        info!(
            sources_created = plan.sources.created.len(),
            routes_created = plan.routes.created.len(),
            sinks_created = plan.sinks.created.len(),
            "config applied"
        );
        Ok(plan)
    }

    /// Runs one tick of the pipeline for `route_id`: reads new timeshifted
    /// chunks for the route's source starting from its stored read cursor
    /// (seeded from `timeshift_offset` on creation, advanced here), runs
    /// them through its SIP processor, and feeds the resulting chunks into
    /// the sink's mixer lane.
    #[instrument(skip(self))]
    pub async fn pump_route(&self, route_id: &str, sink_id: &str, source_tag: &SourceTag) -> Result<(), EngineError> {
        let now = self.clock.now();
        let since = self
            .cursors
            .read()
            .await
            .get(route_id)
            .copied()
            .unwrap_or(std::time::Duration::ZERO);
        let outcome = self.timeshift.read_since(source_tag, since, now)?;
        self.cursors.write().await.insert(route_id.to_string(), outcome.next_since);

        let buffer_fill = outcome.chunks.iter().map(|c| c.duration()).sum();
        self.stats.record_route_buffer(
            route_id,
            buffer_fill,
            self.config.timeshift.target_buffer_level,
            self.timeshift.cumulative_adjustment(source_tag),
        );
        if outcome.lagging {
            self.stats.record_discard(route_id);
        }
        let mut processors = self.processors.write().await;
        let Some(processor) = processors.get_mut(route_id) else {
            return Ok(());
        };
        let mut mixers = self.mixers.write().await;
        let Some(mixer) = mixers.get_mut(sink_id) else {
            return Ok(());
        };
        for raw in outcome.chunks {
            let out_chunks = processor.process(raw)?;
            for out in out_chunks {
                let _ = mixer.feed(source_tag, out);
            }
        }
        Ok(())
    }

    pub async fn mix_sink(&self, sink_id: &str, now: std::time::Duration) -> Option<PcmChunk> {
        let mut mixers = self.mixers.write().await;
        let mixer = mixers.get_mut(sink_id)?;
        let stalled = mixer.stalled_lanes(now).len();
        let chunk = mixer.mix_tick(now, self.clock.now());
        self.stats.record_mix(sink_id, mixer.active_lane_count(), stalled);
        for _ in 0..stalled {
            self.stats.record_underrun(sink_id);
        }
        let dwell = now.saturating_sub(chunk.playout_at);
        self.stats.record_send(sink_id, now, dwell);
        drop(mixers);

        self.apply_sync_bias(sink_id, now).await;
        Some(chunk)
    }

    /// If `sink_id` belongs to a sync group, reports this tick's
    /// completion and applies the group's freshly resolved rate-skew bias
    /// to every route feeding the sink's SIPs.
    async fn apply_sync_bias(&self, sink_id: &str, now: std::time::Duration) {
        let group_name = match self.sink_groups.read().await.get(sink_id).cloned() {
            Some(name) => name,
            None => return,
        };
        let bias = {
            let mut groups = self.sync_groups.write().await;
            let Some(group) = groups.get_mut(&group_name) else { return };
            group.report_tick(sink_id, now);
            let biases = group.resolve_barrier();
            biases.get(sink_id).copied().unwrap_or(0.0)
        };

        let route_sinks = self.route_sinks.read().await;
        let mut processors = self.processors.write().await;
        for (route_id, route_sink_id) in route_sinks.iter() {
            if route_sink_id == sink_id {
                if let Some(processor) = processors.get_mut(route_id) {
                    processor.set_rate_bias(bias);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applier::{DesiredRoute, DesiredSink, DesiredSource, SpeakerMatrixSpec};

    fn basic_config() -> EngineConfig {
        EngineConfig::default()
    }

    #[tokio::test]
    async fn apply_empty_config_is_a_no_op() {
        let engine = Engine::new(basic_config());
        let plan = engine.apply(DesiredConfig::default()).await.expect("apply");
        assert!(plan.sources.created.is_empty());
    }

    #[tokio::test]
    async fn apply_creates_sink_and_route() {
        let engine = Engine::new(basic_config());
        let mut desired = DesiredConfig::default();
        desired.sources.insert(
            "kitchen".into(),
            DesiredSource {
                channels: 2,
                gain: 1.0,
                eq: crate::sip::eq::EqGains::default(),
                eq_normalization: true,
                volume_normalization: false,
            },
        );
        desired.sinks.insert(
            "living_room".into(),
            DesiredSink {
                channels: 2,
                eq: crate::sip::eq::EqGains::default(),
                eq_normalization: true,
                multi_device_mode: false,
                rtp_receivers: vec![],
                sync_group: None,
            },
        );
        desired.routes.insert(
            "r1".into(),
            DesiredRoute {
                source_id: "kitchen".into(),
                sink_id: "living_room".into(),
                matrix: SpeakerMatrixSpec::Auto,
                delay_ms: 0.0,
                timeshift_offset: std::time::Duration::ZERO,
            },
        );
        let plan = engine.apply(desired).await.expect("apply");
        assert_eq!(plan.sinks.created.len(), 1);
        assert_eq!(plan.routes.created.len(), 1);
    }
}
