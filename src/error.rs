//! Error taxonomy for the engine: one error type per subsystem, aggregated
//! into a top-level [`EngineError`], with `miette::Diagnostic` on the
//! outward-facing variants.

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid port {0}: ports must be nonzero")]
    InvalidPort(u16),
    #[error("unknown sample rate {0}")]
    UnknownSampleRate(u32),
    #[error("source tag {0:?} exceeds {max} bytes", max = crate::formats::TAG_MAX_LEN)]
    TagTooLong(String),
}

#[derive(Debug, Error, Diagnostic)]
pub enum ReceiverError {
    #[error("failed to bind receiver socket on {addr}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed scream header: {0}")]
    MalformedScreamHeader(String),
    #[error("malformed rtp packet: {0}")]
    MalformedRtp(String),
    #[error("packet from wrong sender: expected {expected}, got {got}")]
    WrongSender { expected: String, got: String },
    #[error("per-process tag exceeds {max} bytes", max = crate::formats::TAG_MAX_LEN)]
    TagTooLong,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, Diagnostic)]
pub enum TimeshiftError {
    #[error("source tag {0:?} not found in timeshift store")]
    UnknownSource(String),
    #[error("requested offset {offset_ms}ms exceeds the timeshift window of {window_ms}ms")]
    OffsetOutOfWindow { offset_ms: f64, window_ms: f64 },
}

#[derive(Debug, Error, Diagnostic)]
pub enum SipError {
    #[error("resampler failed: {0}")]
    Resample(String),
    #[error("unsupported channel remix from {from} to {to} channels")]
    UnsupportedRemix { from: usize, to: usize },
    #[error(transparent)]
    Timeshift(#[from] TimeshiftError),
}

#[derive(Debug, Error, Diagnostic)]
pub enum SamError {
    #[error("lane for source {0:?} is not registered with this sink")]
    UnknownLane(String),
    #[error("mix buffer overflow: wanted {wanted} frames, capacity {capacity}")]
    MixOverflow { wanted: usize, capacity: usize },
}

#[derive(Debug, Error, Diagnostic)]
pub enum EncoderError {
    #[error("failed to bind encoder socket on {addr}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("mp3 encoder init failed: {0}")]
    Mp3Init(String),
    #[error("mp3 encode failed: {0}")]
    Mp3Encode(String),
    #[error("webrtc peer connection failed: {0}")]
    WebRtc(String),
    #[error("system audio device error: {0}")]
    SystemAudio(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, Diagnostic)]
pub enum ApplierError {
    #[error("route {0:?} references unknown source {1:?}")]
    UnknownSource(String, String),
    #[error("route {0:?} references unknown sink {1:?}")]
    UnknownSink(String, String),
    #[error("matrix dimension mismatch: expected {expected}x{expected}, got {got}x{got}")]
    MatrixDimensionMismatch { expected: usize, got: usize },
    #[error("duplicate sink id {0:?} in config")]
    DuplicateSink(String),
    #[error("duplicate source id {0:?} in config")]
    DuplicateSource(String),
}

#[derive(Debug, Error, Diagnostic)]
pub enum DiscoveryError {
    #[error("sap socket error: {0}")]
    Socket(#[from] std::io::Error),
    #[error("malformed sdp in sap announcement: {0}")]
    MalformedSdp(String),
}

/// Top-level aggregate error returned from the public API surface.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Receiver(#[from] ReceiverError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Timeshift(#[from] TimeshiftError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Sip(#[from] SipError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Sam(#[from] SamError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Encoder(#[from] EncoderError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Applier(#[from] ApplierError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
