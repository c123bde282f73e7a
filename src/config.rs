//! Engine configuration: defaults, YAML-backed overrides and a `clap` CLI
//! overlay, applied in that precedence order via a partial/merge struct.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Default Scream receiver port, `SCREAM_RECEIVER_PORT` in the original.
pub const DEFAULT_SCREAM_PORT: u16 = 16401;
/// Default per-process Scream receiver port, `SCREAM_PER_PROCESS_RECEIVER_PORT`.
pub const DEFAULT_SCREAM_PER_PROCESS_PORT: u16 = 16402;
/// Default RTP receiver port, `RTP_RECEIVER_PORT`.
pub const DEFAULT_RTP_PORT: u16 = 40000;
/// Default sink transmit port, `SINK_PORT`.
pub const DEFAULT_SINK_PORT: u16 = 4010;
/// Default timeshift window, `TIMESHIFT_DURATION` seconds.
pub const DEFAULT_TIMESHIFT_SECS: u64 = 300;
/// `PACKET_DATA_SIZE` samples per Scream packet.
pub const DEFAULT_CHUNK_SAMPLES: usize = 1152;
/// `PACKET_HEADER_SIZE` bytes.
pub const SCREAM_HEADER_SIZE: usize = 5;
/// `MP3_HEADER_LENGTH` bytes.
pub const MP3_HEADER_LENGTH: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketConfig {
    pub bind_addr: IpAddr,
    #[serde(with = "serde_millis")]
    pub recv_timeout: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        SocketConfig {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            recv_timeout: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverPorts {
    pub scream: u16,
    pub scream_per_process: u16,
    pub rtp: u16,
}

impl Default for ReceiverPorts {
    fn default() -> Self {
        ReceiverPorts {
            scream: DEFAULT_SCREAM_PORT,
            scream_per_process: DEFAULT_SCREAM_PER_PROCESS_PORT,
            rtp: DEFAULT_RTP_PORT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeshiftConfig {
    #[serde(with = "serde_millis")]
    pub window: Duration,
    #[serde(with = "serde_millis")]
    pub max_catchup_lag: Duration,
    /// Cursor target lag after a catch-up skip, `TARGET_BUFFER_LEVEL`-equivalent.
    #[serde(with = "serde_millis")]
    pub target_buffer_level: Duration,
    /// Arrival gap beyond which a tag's anchor and cursors reset entirely.
    #[serde(with = "serde_millis")]
    pub session_reset_threshold: Duration,
    /// Arrival gap beyond which the anchor re-arms but cursors keep position.
    #[serde(with = "serde_millis")]
    pub continuity_slack: Duration,
    /// Scheduled-vs-actual arrival error beyond which the anchor is nudged.
    #[serde(with = "serde_millis")]
    pub arrival_error_threshold: Duration,
    /// Fraction of an out-of-threshold arrival error applied to the anchor per entry.
    pub anchor_nudge_factor: f32,
}

impl Default for TimeshiftConfig {
    fn default() -> Self {
        TimeshiftConfig {
            window: Duration::from_secs(DEFAULT_TIMESHIFT_SECS),
            max_catchup_lag: Duration::from_millis(200),
            target_buffer_level: Duration::from_millis(40),
            session_reset_threshold: Duration::from_secs(2),
            continuity_slack: Duration::from_millis(200),
            arrival_error_threshold: Duration::from_millis(20),
            anchor_nudge_factor: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SipConfig {
    pub chunk_samples: usize,
    pub max_ready_chunks_per_source: usize,
    #[serde(with = "serde_millis")]
    pub underrun_hold_timeout: Duration,
}

impl Default for SipConfig {
    fn default() -> Self {
        SipConfig {
            chunk_samples: DEFAULT_CHUNK_SAMPLES,
            max_ready_chunks_per_source: 64,
            underrun_hold_timeout: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderConfig {
    pub max_queued_chunks: usize,
    pub mp3_ring_capacity: usize,
    #[serde(with = "serde_millis")]
    pub webrtc_ice_timeout: Duration,
    /// A listener with no heartbeat for this long is transitioned to `Closed`.
    #[serde(with = "serde_millis")]
    pub webrtc_heartbeat_timeout: Duration,
    /// Floor of the system-audio dynamic-latency controller's target range.
    #[serde(with = "serde_millis")]
    pub latency_min_ms: Duration,
    /// Ceiling of the system-audio dynamic-latency controller's target range.
    #[serde(with = "serde_millis")]
    pub latency_max_ms: Duration,
    /// How fast the controller's integral error term moves the target,
    /// in target-ms per fill-error-ms per second.
    pub latency_integral_gain: f32,
    /// Caps how fast the target may change outside an XRUN boost.
    pub latency_rate_limit_ms_per_sec: f32,
    /// Minimum time between target adjustments, outside an XRUN boost.
    #[serde(with = "serde_millis")]
    pub latency_reconfig_cooldown_ms: Duration,
    /// Immediate target increase applied on an XRUN, bypassing the
    /// cooldown and rate limit.
    #[serde(with = "serde_millis")]
    pub latency_xrun_boost_ms: Duration,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        EncoderConfig {
            max_queued_chunks: 256,
            mp3_ring_capacity: 64,
            webrtc_ice_timeout: Duration::from_secs(10),
            webrtc_heartbeat_timeout: Duration::from_secs(15),
            latency_min_ms: Duration::from_millis(20),
            latency_max_ms: Duration::from_millis(200),
            latency_integral_gain: 0.05,
            latency_rate_limit_ms_per_sec: 20.0,
            latency_reconfig_cooldown_ms: Duration::from_millis(500),
            latency_xrun_boost_ms: Duration::from_millis(40),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpConfig {
    pub session_reset_threshold: u32,
    pub continuity_slack: u32,
}

impl Default for RtpConfig {
    fn default() -> Self {
        RtpConfig {
            session_reset_threshold: 64,
            continuity_slack: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamConfig {
    /// Bound on each lane's transfer queue (SIP → SAM); overflow drops oldest.
    pub max_queued_chunks: usize,
    /// Soft barrier a sync group's members wait for before mixing.
    #[serde(with = "serde_millis")]
    pub barrier_timeout_ms: Duration,
    /// Bound on the resample-ratio bias a sync group may signal to a member's SIP.
    pub max_rate_adjustment: f32,
    /// Exponential smoothing applied to a sync group's rate-skew bias.
    pub sync_smoothing_factor: f32,
}

impl Default for SamConfig {
    fn default() -> Self {
        SamConfig {
            max_queued_chunks: 256,
            barrier_timeout_ms: Duration::from_millis(20),
            max_rate_adjustment: 0.02,
            sync_smoothing_factor: 0.1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default)]
    pub socket: SocketConfig,
    #[serde(default)]
    pub ports: ReceiverPorts,
    #[serde(default)]
    pub timeshift: TimeshiftConfig,
    #[serde(default)]
    pub sip: SipConfig,
    #[serde(default)]
    pub sam: SamConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub rtp: RtpConfig,
}

/// All-optional mirror of [`EngineConfig`] for merging a partial YAML
/// fragment onto the built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialEngineConfig {
    pub bind_addr: Option<IpAddr>,
    pub scream_port: Option<u16>,
    pub scream_per_process_port: Option<u16>,
    pub rtp_port: Option<u16>,
    #[serde(default, with = "serde_millis::option")]
    pub timeshift_window: Option<Duration>,
    pub chunk_samples: Option<usize>,
    pub max_queued_chunks: Option<usize>,
    pub mp3_ring_capacity: Option<usize>,
}

impl PartialEngineConfig {
    pub fn merge_onto(self, mut base: EngineConfig) -> Result<EngineConfig, ConfigError> {
        if let Some(addr) = self.bind_addr {
            base.socket.bind_addr = addr;
        }
        if let Some(p) = self.scream_port {
            check_port(p)?;
            base.ports.scream = p;
        }
        if let Some(p) = self.scream_per_process_port {
            check_port(p)?;
            base.ports.scream_per_process = p;
        }
        if let Some(p) = self.rtp_port {
            check_port(p)?;
            base.ports.rtp = p;
        }
        if let Some(w) = self.timeshift_window {
            base.timeshift.window = w;
        }
        if let Some(c) = self.chunk_samples {
            base.sip.chunk_samples = c;
        }
        if let Some(c) = self.max_queued_chunks {
            base.encoder.max_queued_chunks = c;
        }
        if let Some(c) = self.mp3_ring_capacity {
            base.encoder.mp3_ring_capacity = c;
        }
        Ok(base)
    }
}

fn check_port(port: u16) -> Result<(), ConfigError> {
    if port == 0 {
        Err(ConfigError::InvalidPort(port))
    } else {
        Ok(())
    }
}

/// CLI overlay. Precedence: built-in default < YAML file < explicit CLI flag.
#[derive(Debug, Parser)]
#[command(name = "audio-broker", about = "Soft-real-time multi-protocol PCM audio broker")]
pub struct Cli {
    #[arg(long, env = "AUDIO_BROKER_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "AUDIO_BROKER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "AUDIO_BROKER_SCREAM_PORT")]
    pub scream_port: Option<u16>,

    #[arg(long, env = "AUDIO_BROKER_SCREAM_PER_PROCESS_PORT")]
    pub scream_per_process_port: Option<u16>,

    #[arg(long, env = "AUDIO_BROKER_RTP_PORT")]
    pub rtp_port: Option<u16>,

    #[arg(long, env = "AUDIO_BROKER_BIND")]
    pub bind_addr: Option<IpAddr>,
}

impl Cli {
    fn as_partial(&self) -> PartialEngineConfig {
        PartialEngineConfig {
            bind_addr: self.bind_addr,
            scream_port: self.scream_port,
            scream_per_process_port: self.scream_per_process_port,
            rtp_port: self.rtp_port,
            timeshift_window: None,
            chunk_samples: None,
            max_queued_chunks: None,
            mp3_ring_capacity: None,
        }
    }
}

/// Loads the config from defaults, an optional YAML file, then the CLI
/// overlay, in that precedence order.
pub fn load(cli: &Cli) -> Result<EngineConfig, ConfigError> {
    let mut config = EngineConfig::default();

    if let Some(path) = &cli.config {
        let partial = load_partial_from_file(path)?;
        config = partial.merge_onto(config)?;
    }

    cli.as_partial().merge_onto(config)
}

fn load_partial_from_file(path: &Path) -> Result<PartialEngineConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_yaml::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_merge_overrides_defaults() {
        let base = EngineConfig::default();
        let partial = PartialEngineConfig {
            scream_port: Some(9999),
            ..Default::default()
        };
        let merged = partial.merge_onto(base).expect("merge");
        assert_eq!(merged.ports.scream, 9999);
        assert_eq!(merged.ports.rtp, DEFAULT_RTP_PORT);
    }

    #[test]
    fn zero_port_rejected() {
        let partial = PartialEngineConfig {
            scream_port: Some(0),
            ..Default::default()
        };
        assert!(partial.merge_onto(EngineConfig::default()).is_err());
    }
}
