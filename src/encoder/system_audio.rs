//! System-audio encoder: writes mixed chunks directly to a local output
//! device via `cpal`, the cross-platform crate for plain device I/O.

use crate::encoder::{report_encoder_started, report_encoder_stopped, EncoderApiMessage};
use crate::error::EncoderError;
use crate::frame::PcmChunk;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat as CpalSampleFormat, StreamConfig};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::{debug, instrument};

/// The controller's tuning knobs, mirroring `EncoderConfig`'s
/// `latency_*` fields.
#[derive(Debug, Clone, Copy)]
pub struct LatencySettings {
    pub min: Duration,
    pub max: Duration,
    pub integral_gain: f32,
    pub rate_limit_ms_per_sec: f32,
    pub cooldown: Duration,
    pub xrun_boost: Duration,
}

/// Tunes the device buffer target between `latency_min`/`latency_max` from
/// measured ring fill level, using an integral gain and a rate limit so
/// the target doesn't jump around; a cooldown holds off further
/// adjustment after each change. An XRUN bypasses both the cooldown and
/// the rate limit and snaps the target toward `latency_max` immediately.
pub struct LatencyController {
    latency_min: Duration,
    latency_max: Duration,
    integral_gain: f32,
    rate_limit_ms_per_sec: f32,
    cooldown: Duration,
    xrun_boost: Duration,
    target: Duration,
    integral_ms: f32,
    last_change: Instant,
}

impl LatencyController {
    pub fn new(settings: LatencySettings) -> Self {
        LatencyController {
            latency_min: settings.min,
            latency_max: settings.max,
            integral_gain: settings.integral_gain,
            rate_limit_ms_per_sec: settings.rate_limit_ms_per_sec,
            cooldown: settings.cooldown,
            xrun_boost: settings.xrun_boost,
            target: settings.min,
            integral_ms: 0.0,
            last_change: Instant::now(),
        }
    }

    pub fn target(&self) -> Duration {
        self.target
    }

    /// Folds in one fill-level sample taken `dt` after the previous one.
    /// A no-op while still inside the post-adjustment cooldown.
    pub fn observe_fill(&mut self, fill: Duration, dt: Duration, now: Instant) {
        if now.duration_since(self.last_change) < self.cooldown {
            return;
        }
        let error_ms = self.target.as_secs_f32() * 1000.0 - fill.as_secs_f32() * 1000.0;
        self.integral_ms += error_ms * self.integral_gain * dt.as_secs_f32();
        let max_step_ms = self.rate_limit_ms_per_sec * dt.as_secs_f32();
        let step_ms = self.integral_ms.clamp(-max_step_ms, max_step_ms);
        self.integral_ms -= step_ms;
        self.apply_delta_ms(step_ms, now);
    }

    /// Snaps the target toward `latency_max` immediately, ignoring the
    /// cooldown and rate limit, and resets the integral term.
    pub fn on_xrun(&mut self, now: Instant) {
        let boosted_ms = (self.target + self.xrun_boost).as_secs_f32() * 1000.0;
        self.target = Duration::from_secs_f32(
            boosted_ms.min(self.latency_max.as_secs_f32() * 1000.0) / 1000.0,
        );
        self.integral_ms = 0.0;
        self.last_change = now;
    }

    fn apply_delta_ms(&mut self, delta_ms: f32, now: Instant) {
        if delta_ms.abs() < f32::EPSILON {
            return;
        }
        let new_target_ms = (self.target.as_secs_f32() * 1000.0 + delta_ms).clamp(
            self.latency_min.as_secs_f32() * 1000.0,
            self.latency_max.as_secs_f32() * 1000.0,
        );
        self.target = Duration::from_secs_f32(new_target_ms / 1000.0);
        self.last_change = now;
    }
}

/// One enumerable local output device, surfaced through `list_system_devices`.
#[derive(Debug, Clone)]
pub struct SystemDevice {
    pub name: String,
    pub default_sample_rate: u32,
    pub max_channels: u16,
}

pub fn list_system_devices() -> Vec<SystemDevice> {
    let host = cpal::default_host();
    let mut devices = Vec::new();
    let Ok(output_devices) = host.output_devices() else {
        return devices;
    };
    for device in output_devices {
        let Ok(name) = device.name() else { continue };
        let Ok(config) = device.default_output_config() else {
            continue;
        };
        devices.push(SystemDevice {
            name,
            default_sample_rate: config.sample_rate().0,
            max_channels: config.channels(),
        });
    }
    devices
}

#[instrument(skip(subsys, chunk_rx, api_rx))]
pub async fn run(
    subsys: SubsystemHandle,
    sink_id: String,
    device_name: Option<String>,
    latency: LatencySettings,
    mut chunk_rx: mpsc::Receiver<PcmChunk>,
    mut api_rx: mpsc::Receiver<EncoderApiMessage>,
) -> Result<(), EncoderError> {
    let host = cpal::default_host();
    let device = match &device_name {
        Some(name) => host
            .output_devices()
            .map_err(|e| EncoderError::SystemAudio(e.to_string()))?
            .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
            .ok_or_else(|| EncoderError::SystemAudio(format!("device {name:?} not found")))?,
        None => host
            .default_output_device()
            .ok_or_else(|| EncoderError::SystemAudio("no default output device".into()))?,
    };

    let config = device
        .default_output_config()
        .map_err(|e| EncoderError::SystemAudio(e.to_string()))?;
    let sample_format = config.sample_format();
    let stream_config: StreamConfig = config.into();

    let ring: Arc<Mutex<VecDeque<f32>>> = Arc::new(Mutex::new(VecDeque::new()));
    let stream_ring = ring.clone();
    let xruns = Arc::new(AtomicU64::new(0));
    let stream_xruns = xruns.clone();

    let err_fn = |err| tracing::error!(?err, "cpal stream error");
    let stream = match sample_format {
        CpalSampleFormat::F32 => device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _| {
                    if fill_from_ring(&stream_ring, data) {
                        stream_xruns.fetch_add(1, Ordering::Relaxed);
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| EncoderError::SystemAudio(e.to_string()))?,
        other => {
            return Err(EncoderError::SystemAudio(format!(
                "unsupported cpal sample format {other:?}"
            )))
        }
    };
    stream
        .play()
        .map_err(|e| EncoderError::SystemAudio(e.to_string()))?;

    let mut controller = LatencyController::new(latency);
    let frame_rate = stream_config.sample_rate.0 as f32 * stream_config.channels as f32;
    let mut last_tick = Instant::now();
    let mut last_xruns = 0u64;
    let mut latency_poll = tokio::time::interval(Duration::from_millis(100));

    report_encoder_started("system_audio", &sink_id);
    loop {
        tokio::select! {
            _ = subsys.on_shutdown_requested() => break,
            msg = api_rx.recv() => {
                match msg {
                    Some(EncoderApiMessage::Stop) | None => break,
                    Some(EncoderApiMessage::Heartbeat) => {}
                }
            }
            chunk = chunk_rx.recv() => {
                let Some(chunk) = chunk else { break };
                let mut guard = ring.lock().expect("system audio ring poisoned");
                guard.extend(chunk.samples);
            }
            _ = latency_poll.tick() => {
                let now = Instant::now();
                let seen_xruns = xruns.load(Ordering::Relaxed);
                if seen_xruns > last_xruns {
                    last_xruns = seen_xruns;
                    controller.on_xrun(now);
                    debug!(target_ms = controller.target().as_millis(), "latency controller: xrun boost");
                } else {
                    let fill_frames = ring.lock().expect("system audio ring poisoned").len();
                    let fill = Duration::from_secs_f32(fill_frames as f32 / frame_rate);
                    let dt = now.duration_since(last_tick);
                    controller.observe_fill(fill, dt, now);
                }
                last_tick = now;
            }
        }
    }
    report_encoder_stopped("system_audio", &sink_id);
    Ok(())
}

/// Drains `data.len()` samples from `ring`, zero-filling and returning
/// `true` for an XRUN if the ring ran dry before `data` was full.
fn fill_from_ring(ring: &Arc<Mutex<VecDeque<f32>>>, data: &mut [f32]) -> bool {
    let mut guard = ring.lock().expect("system audio ring poisoned");
    let mut underran = false;
    for sample in data.iter_mut() {
        match guard.pop_front() {
            Some(s) => *sample = s,
            None => {
                *sample = 0.0;
                underran = true;
            }
        }
    }
    underran
}
