use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::agc::{AutomaticGainControl, NoiseGate};
use crate::device::DeviceManager;
use crate::ring_buffer::{PcmFrame, PcmProducer};
use crate::watchdog::WatchdogTimer;
use voxjockey_foundation::AudioError;
use voxjockey_telemetry::PipelineMetrics;

/// Capture-side configuration, a narrow slice of the full pipeline `Config`
/// (§3) that the audio thread needs at spawn time.
#[derive(Debug, Clone)]
pub struct AudioCaptureConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    pub gate_threshold: f32,
    pub agc_target: f32,
    pub agc_max_gain: f32,
}

impl Default for AudioCaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            block_size: 1920,
            gate_threshold: 0.04,
            agc_target: 0.95,
            agc_max_gain: 8.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

pub struct AudioCaptureThread {
    pub handle: JoinHandle<()>,
    pub running: Arc<AtomicBool>,
}

impl AudioCaptureThread {
    pub fn spawn(
        config: AudioCaptureConfig,
        producer: PcmProducer,
        device_name: Option<String>,
        metrics: PipelineMetrics,
    ) -> Result<(Self, DeviceConfig), AudioError> {
        let running = Arc::new(AtomicBool::new(true));
        let running_for_thread = running.clone();
        let device_config: Arc<parking_lot::RwLock<Option<DeviceConfig>>> =
            Arc::new(parking_lot::RwLock::new(None));
        let device_config_clone = device_config.clone();

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let mut capture = match AudioCapture::new(config, producer, running_for_thread.clone(), metrics)
                {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::error!("failed to construct audio capture: {}", e);
                        return;
                    }
                };

                let mut attempts: Vec<Option<String>> = Vec::new();
                if let Some(d) = device_name.clone() {
                    attempts.push(Some(d));
                }
                for name in capture.device_manager.candidate_device_names() {
                    attempts.push(Some(name));
                }
                attempts.push(None);

                let mut dev_cfg = None;
                for attempt in attempts {
                    match capture.start(attempt.as_deref()) {
                        Ok(cfg) => {
                            tracing::info!("audio stream started on device: {:?}", attempt);
                            dev_cfg = Some(cfg);
                            break;
                        }
                        Err(e) => {
                            tracing::warn!("failed to start on {:?}: {}", attempt, e);
                        }
                    }
                }

                let Some(dev_cfg) = dev_cfg else {
                    tracing::error!("all device candidates failed; capture not started");
                    return;
                };
                *device_config_clone.write() = Some(dev_cfg);

                while running_for_thread.load(Ordering::Relaxed) {
                    if capture.watchdog.is_triggered() {
                        tracing::warn!("capture watchdog fired, restarting stream");
                        capture.stop();

                        let mut attempts: Vec<Option<String>> = Vec::new();
                        for name in capture.device_manager.candidate_device_names() {
                            attempts.push(Some(name));
                        }
                        attempts.push(None);

                        let mut restarted = false;
                        for attempt in attempts {
                            if let Ok(cfg) = capture.start(attempt.as_deref()) {
                                tracing::info!("capture restarted on device: {:?}", attempt);
                                *device_config_clone.write() = Some(cfg);
                                restarted = true;
                                break;
                            }
                        }
                        if !restarted {
                            tracing::error!("failed to restart capture on any candidate device");
                        }
                    }
                    thread::sleep(Duration::from_millis(100));
                }

                capture.stop();
                tracing::info!("audio capture thread shutting down");
            })
            .map_err(|e| AudioError::Fatal(format!("failed to spawn audio thread: {}", e)))?;

        let start = Instant::now();
        let mut cfg = None;
        while start.elapsed() < Duration::from_secs(3) {
            if let Some(c) = device_config.read().clone() {
                cfg = Some(c);
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        let cfg = cfg.ok_or_else(|| {
            AudioError::Fatal("timed out waiting for device configuration".to_string())
        })?;

        Ok((Self { handle, running }, cfg))
    }

    pub fn stop(self) {
        self.running.store(false, Ordering::Relaxed);
        let _ = self.handle.join();
    }

    /// Whether the capture thread has exited, whether cleanly or by panic.
    /// Used by the Supervisor's liveness watch (§4.E).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

struct AudioCapture {
    device_manager: DeviceManager,
    stream: Option<Stream>,
    config: AudioCaptureConfig,
    producer: Arc<Mutex<ChunkAccumulator>>,
    watchdog: WatchdogTimer,
    running: Arc<AtomicBool>,
    metrics: PipelineMetrics,
}

/// Accumulates variable-size callback buffers into fixed `block_size`
/// frames, applying AGC and the noise gate to each completed block before
/// handing it to the ring buffer.
struct ChunkAccumulator {
    buffer: VecDeque<f32>,
    block_size: usize,
    sample_rate: u32,
    agc: AutomaticGainControl,
    gate: NoiseGate,
    producer: PcmProducer,
    metrics: PipelineMetrics,
}

impl ChunkAccumulator {
    fn push(&mut self, mono: &[f32]) {
        self.buffer.extend(mono.iter().copied());

        while self.buffer.len() >= self.block_size {
            let mut block: Vec<f32> = self.buffer.drain(..self.block_size).collect();
            let gain = self.agc.apply(&mut block);
            self.metrics.set_agc_gain(gain);

            if self.gate.is_closed(&block) {
                self.metrics.set_gate_closed(true);
                continue;
            }
            self.metrics.set_gate_closed(false);

            let dropped = self.producer.push(PcmFrame {
                samples: block,
                timestamp: Instant::now(),
                sample_rate: self.sample_rate,
            });
            self.metrics.record_frame_captured();
            if dropped {
                self.metrics.record_frames_dropped(1);
            }
        }
    }
}

impl AudioCapture {
    fn new(
        config: AudioCaptureConfig,
        producer: PcmProducer,
        running: Arc<AtomicBool>,
        metrics: PipelineMetrics,
    ) -> Result<Self, AudioError> {
        let accumulator = ChunkAccumulator {
            buffer: VecDeque::with_capacity(config.block_size * 2),
            block_size: config.block_size,
            sample_rate: config.sample_rate,
            agc: AutomaticGainControl::new(config.agc_target, config.agc_max_gain),
            gate: NoiseGate::new(config.gate_threshold),
            producer,
            metrics: metrics.clone(),
        };

        Ok(Self {
            device_manager: DeviceManager::new()?,
            stream: None,
            config,
            producer: Arc::new(Mutex::new(accumulator)),
            watchdog: WatchdogTimer::new(Duration::from_secs(5)),
            running,
            metrics,
        })
    }

    fn start(&mut self, device_name: Option<&str>) -> Result<DeviceConfig, AudioError> {
        self.running.store(true, Ordering::SeqCst);

        let device = self.device_manager.open_device(device_name)?;
        if let Ok(n) = device.name() {
            tracing::info!("selected input device: {} (host: {:?})", n, self.device_manager.host_id());
        }
        let (stream_config, sample_format) = self.negotiate_config(&device)?;
        let device_config = DeviceConfig {
            sample_rate: stream_config.sample_rate.0,
            channels: stream_config.channels,
        };

        let stream = self.build_stream(device, stream_config, sample_format)?;
        stream.play().map_err(AudioError::PlayStream)?;
        self.stream = Some(stream);

        let mut watchdog = self.watchdog.clone();
        watchdog.start(Arc::clone(&self.running));
        self.watchdog = watchdog;

        Ok(device_config)
    }

    fn build_stream(
        &mut self,
        device: cpal::Device,
        config: StreamConfig,
        sample_format: SampleFormat,
    ) -> Result<Stream, AudioError> {
        let channels = config.channels as usize;
        let accumulator = Arc::clone(&self.producer);
        let watchdog = self.watchdog.clone();
        let running = Arc::clone(&self.running);

        let err_fn = move |err: cpal::StreamError| {
            tracing::error!("audio stream error: {}", err);
        };

        let handle_f32 = move |data: &[f32]| {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            watchdog.feed();
            let mono = to_mono(data, channels);
            accumulator.lock().push(&mono);
        };

        thread_local! {
            static CONVERT_BUFFER: std::cell::RefCell<Vec<f32>> = const { std::cell::RefCell::new(Vec::new()) };
        }

        let stream = match sample_format {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &_| handle_f32(data),
                err_fn,
                None,
            )?,
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &_| {
                    CONVERT_BUFFER.with(|buf| {
                        let mut converted = buf.borrow_mut();
                        converted.clear();
                        converted.extend(data.iter().map(|&s| s as f32 / 32768.0));
                        handle_f32(&converted);
                    });
                },
                err_fn,
                None,
            )?,
            SampleFormat::U16 => device.build_input_stream(
                &config,
                move |data: &[u16], _: &_| {
                    CONVERT_BUFFER.with(|buf| {
                        let mut converted = buf.borrow_mut();
                        converted.clear();
                        converted.extend(data.iter().map(|&s| (s as i32 - 32768) as f32 / 32768.0));
                        handle_f32(&converted);
                    });
                },
                err_fn,
                None,
            )?,
            other => {
                return Err(AudioError::FormatNotSupported {
                    format: format!("{:?}", other),
                });
            }
        };

        Ok(stream)
    }

    fn negotiate_config(&self, device: &cpal::Device) -> Result<(StreamConfig, SampleFormat), AudioError> {
        if let Ok(default_config) = device.default_input_config() {
            return Ok((
                StreamConfig {
                    channels: default_config.channels(),
                    sample_rate: cpal::SampleRate(self.config.sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                },
                default_config.sample_format(),
            ));
        }

        let configs = self.device_manager.get_supported_configs(device);
        configs
            .into_iter()
            .next()
            .map(|c| (c, SampleFormat::F32))
            .ok_or(AudioError::FormatNotSupported {
                format: "no supported input configs".to_string(),
            })
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(stream) = self.stream.take() {
            drop(stream);
        }
        self.watchdog.stop();
    }
}

fn to_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_mono_averages_channels() {
        let stereo = [1.0f32, -1.0, 0.5, 0.5];
        let mono = to_mono(&stereo, 2);
        assert_eq!(mono, vec![0.0, 0.5]);
    }

    #[test]
    fn to_mono_passthrough_for_single_channel() {
        let mono_in = [0.1f32, 0.2, 0.3];
        assert_eq!(to_mono(&mono_in, 1), mono_in.to_vec());
    }
}
