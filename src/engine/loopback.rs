//! Microphone capture with live monitoring via `cpal`.
//!
//! [`LoopbackEngine`] opens the default input device and, when monitoring is
//! enabled, the default output device.  Every captured frame is downmixed to
//! mono and copied to every output channel through a [`SampleFifo`].  The
//! peak level of the last input block is published for a VU meter.
//!
//! Each stream asks its device for a configuration offering the configured
//! channel count at the configured rate.  When none exists the device's
//! default configuration is used instead and a warning is logged.
//!
//! Streams are created inside [`CaptureEngine::start_capture`], so they live
//! and die on the session's worker thread (`cpal::Stream` is not `Send` on
//! every platform).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};

use crate::config::EngineConfig;

use super::{Capture, CaptureEngine, EngineError, SampleFifo, StopSignal};

/// First stream error reported by a device callback.
type FaultSlot = Arc<Mutex<Option<String>>>;

type MonitorFifo = Arc<Mutex<SampleFifo<f32>>>;

/// Sample formats the stream callbacks are built for, most preferred first.
const SAMPLE_FORMATS: [SampleFormat; 3] = [SampleFormat::F32, SampleFormat::I16, SampleFormat::U16];

/// Keeps the device streams playing until dropped.
struct Streams {
    _input: cpal::Stream,
    _output: Option<cpal::Stream>,
}

// ---------------------------------------------------------------------------
// Stream configuration
// ---------------------------------------------------------------------------

fn format_rank(format: SampleFormat) -> Option<usize> {
    SAMPLE_FORMATS.iter().position(|&f| f == format)
}

/// The best range offering exactly `channels` at `rate`, narrowed to `rate`.
fn pick_config(
    ranges: impl IntoIterator<Item = cpal::SupportedStreamConfigRange>,
    channels: u16,
    rate: cpal::SampleRate,
) -> Option<cpal::SupportedStreamConfig> {
    ranges
        .into_iter()
        .filter(|r| {
            r.channels() == channels && r.min_sample_rate() <= rate && rate <= r.max_sample_rate()
        })
        .filter_map(|r| format_rank(r.sample_format()).map(|rank| (rank, r)))
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, r)| r.with_sample_rate(rate))
}

// ---------------------------------------------------------------------------
// LoopbackEngine
// ---------------------------------------------------------------------------

/// Capture engine built on the default cpal host.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use capture_session::config::AppConfig;
/// use capture_session::engine::LoopbackEngine;
/// use capture_session::session::SessionController;
///
/// let config = AppConfig::default();
/// let engine = Arc::new(LoopbackEngine::new(config.engine.clone()).unwrap());
/// let controller = SessionController::new(engine, config.session);
/// controller.begin().unwrap();
/// // ...
/// controller.end().unwrap();
/// ```
pub struct LoopbackEngine {
    config: EngineConfig,
    signal: StopSignal,
    /// `f32` bits of the peak absolute sample in the last input block.
    level: Arc<AtomicU32>,
}

impl LoopbackEngine {
    /// Create an engine for `config`.  No device is touched until a session
    /// starts.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] when `config` fails validation.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            signal: StopSignal::new(),
            level: Arc::new(AtomicU32::new(0)),
        })
    }

    /// Peak input level of the most recent block, in `[0.0, 1.0]`.
    ///
    /// Reads `0.0` while no session is running.
    pub fn level(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::Relaxed))
    }

    /// Resolve the configuration for one stream, falling back to the
    /// device default.
    fn negotiate<I, D>(
        &self,
        direction: &str,
        ranges: Result<I, cpal::SupportedStreamConfigsError>,
        channels: u16,
        default: D,
    ) -> Result<cpal::SupportedStreamConfig, EngineError>
    where
        I: Iterator<Item = cpal::SupportedStreamConfigRange>,
        D: FnOnce() -> Result<cpal::SupportedStreamConfig, cpal::DefaultStreamConfigError>,
    {
        let rate = cpal::SampleRate(self.config.sample_rate);
        let picked = match ranges {
            Ok(ranges) => pick_config(ranges, channels, rate),
            Err(e) => {
                log::warn!("loopback: cannot list {direction} configurations: {e}");
                None
            }
        };
        if let Some(config) = picked {
            return Ok(config);
        }

        let fallback = default()?;
        log::warn!(
            "loopback: {direction} device has no {channels} ch / {} Hz mode, using its default {} ch / {} Hz {:?}",
            rate.0,
            fallback.channels(),
            fallback.sample_rate().0,
            fallback.sample_format()
        );
        if format_rank(fallback.sample_format()).is_none() {
            return Err(EngineError::UnsupportedSampleFormat(fallback.sample_format()));
        }
        Ok(fallback)
    }

    fn stream_config(&self, supported: &cpal::SupportedStreamConfig) -> cpal::StreamConfig {
        let mut config = supported.config();
        if let Some(frames) = self.config.buffer_frames {
            config.buffer_size = cpal::BufferSize::Fixed(frames);
        }
        config
    }

    fn open_streams(&self, fault: &FaultSlot) -> Result<Streams, EngineError> {
        let host = cpal::default_host();
        let input_device = host
            .default_input_device()
            .ok_or(EngineError::NoInputDevice)?;

        let input_supported = self.negotiate(
            "input",
            input_device.supported_input_configs(),
            self.config.input_channels,
            || input_device.default_input_config(),
        )?;
        let input_config = self.stream_config(&input_supported);

        let monitoring = self.config.monitor && self.config.output_channels > 0;
        let fifo: Option<MonitorFifo> = monitoring.then(|| {
            Arc::new(Mutex::new(SampleFifo::new(self.config.monitor_latency_frames)))
        });

        let level = Arc::clone(&self.level);
        let input_fault = Arc::clone(fault);
        let input_fifo = fifo.clone();
        let input = match input_supported.sample_format() {
            SampleFormat::F32 => {
                build_input::<f32>(&input_device, &input_config, level, input_fifo, input_fault)
            }
            SampleFormat::I16 => {
                build_input::<i16>(&input_device, &input_config, level, input_fifo, input_fault)
            }
            SampleFormat::U16 => {
                build_input::<u16>(&input_device, &input_config, level, input_fifo, input_fault)
            }
            other => Err(EngineError::UnsupportedSampleFormat(other)),
        }?;

        let output = match fifo {
            Some(fifo) => {
                let output_device = host
                    .default_output_device()
                    .ok_or(EngineError::NoOutputDevice)?;
                let output_supported = self.negotiate(
                    "output",
                    output_device.supported_output_configs(),
                    self.config.output_channels,
                    || output_device.default_output_config(),
                )?;
                if output_supported.sample_rate() != input_supported.sample_rate() {
                    log::warn!(
                        "loopback: input runs at {} Hz but output at {} Hz, monitor pitch will drift",
                        input_supported.sample_rate().0,
                        output_supported.sample_rate().0
                    );
                }
                let output_config = self.stream_config(&output_supported);
                let output_fault = Arc::clone(fault);

                let stream = match output_supported.sample_format() {
                    SampleFormat::F32 => {
                        build_output::<f32>(&output_device, &output_config, fifo, output_fault)
                    }
                    SampleFormat::I16 => {
                        build_output::<i16>(&output_device, &output_config, fifo, output_fault)
                    }
                    SampleFormat::U16 => {
                        build_output::<u16>(&output_device, &output_config, fifo, output_fault)
                    }
                    other => Err(EngineError::UnsupportedSampleFormat(other)),
                }?;
                Some(stream)
            }
            None => None,
        };

        input.play()?;
        if let Some(stream) = &output {
            stream.play()?;
        }

        log::info!(
            "loopback: capturing {} ch at {} Hz, monitor {}",
            input_config.channels,
            input_config.sample_rate.0,
            if output.is_some() { "on" } else { "off" }
        );
        Ok(Streams {
            _input: input,
            _output: output,
        })
    }

    /// Keep `streams` alive until the capture is stopped or faults, then
    /// close them and zero the meter.
    fn hold<S>(&self, streams: S, capture: &Capture<'_>, fault: &FaultSlot) -> Result<(), EngineError> {
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let result = wait_for_stop(capture, fault, poll);

        // Closed first so no callback can publish a level after the reset.
        drop(streams);
        self.level.store(0, Ordering::Relaxed);
        log::debug!("loopback: streams closed");
        result
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    level: Arc<AtomicU32>,
    fifo: Option<MonitorFifo>,
    fault: FaultSlot,
) -> Result<cpal::Stream, EngineError>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels);
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let peak = data
                .iter()
                .fold(0.0_f32, |m, &s| m.max(f32::from_sample(s).abs()));
            level.store(peak.min(1.0).to_bits(), Ordering::Relaxed);

            let Some(fifo) = &fifo else {
                return;
            };
            // Never block the audio thread; skip the block if the output
            // callback holds the FIFO.
            if let Ok(mut fifo) = fifo.try_lock() {
                for frame in data.chunks(channels) {
                    let sum: f32 = frame.iter().map(|&s| f32::from_sample(s)).sum();
                    fifo.push(sum / frame.len() as f32);
                }
            }
        },
        move |err: cpal::StreamError| {
            log::error!("input stream error: {err}");
            record_fault(&fault, err);
        },
        None,
    )?;
    Ok(stream)
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    fifo: MonitorFifo,
    fault: FaultSlot,
) -> Result<cpal::Stream, EngineError>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let channels = usize::from(config.channels);
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let Ok(mut fifo) = fifo.try_lock() else {
                data.fill(T::EQUILIBRIUM);
                return;
            };
            if fifo.is_empty() {
                data.fill(T::EQUILIBRIUM);
                return;
            }
            for frame in data.chunks_mut(channels) {
                frame.fill(T::from_sample(fifo.pop().unwrap_or(0.0)));
            }
        },
        move |err: cpal::StreamError| {
            log::error!("output stream error: {err}");
            record_fault(&fault, err);
        },
        None,
    )?;
    Ok(stream)
}

/// Block until `capture` is stopped or a device callback records a fault.
fn wait_for_stop(capture: &Capture<'_>, fault: &FaultSlot, poll: Duration) -> Result<(), EngineError> {
    loop {
        if capture.wait_timeout(poll) {
            return Ok(());
        }
        if let Some(message) = take_fault(fault) {
            return Err(EngineError::Stream(message));
        }
    }
}

fn take_fault(fault: &FaultSlot) -> Option<String> {
    fault.lock().unwrap_or_else(PoisonError::into_inner).take()
}

fn record_fault(slot: &FaultSlot, err: cpal::StreamError) {
    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
    slot.get_or_insert_with(|| err.to_string());
}

impl CaptureEngine for LoopbackEngine {
    fn start_capture(&self) -> Result<(), EngineError> {
        let capture = self.signal.enter();
        let fault: FaultSlot = Arc::new(Mutex::new(None));

        let streams = self.open_streams(&fault).map_err(|e| {
            // An input stream may have played briefly before a later step failed.
            self.level.store(0, Ordering::Relaxed);
            e
        })?;
        self.hold(streams, &capture, &fault)
    }

    fn stop_capture(&self) {
        self.signal.request_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use std::sync::atomic::AtomicBool;
    use std::time::Instant;

    fn range(
        channels: u16,
        min: u32,
        max: u32,
        format: SampleFormat,
    ) -> cpal::SupportedStreamConfigRange {
        cpal::SupportedStreamConfigRange::new(
            channels,
            cpal::SampleRate(min),
            cpal::SampleRate(max),
            cpal::SupportedBufferSize::Unknown,
            format,
        )
    }

    /// Stands in for the device streams and records when it is closed.
    struct FakeStreams(Arc<AtomicBool>);

    impl Drop for FakeStreams {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn fault_slot(message: Option<&str>) -> FaultSlot {
        Arc::new(Mutex::new(message.map(str::to_owned)))
    }

    #[test]
    fn new_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.sample_rate = 12_345;
        let result = LoopbackEngine::new(config);
        assert!(matches!(
            result,
            Err(EngineError::Config(ConfigError::UnsupportedSampleRate(12_345)))
        ));
    }

    #[test]
    fn level_is_zero_before_capture() {
        let engine = LoopbackEngine::new(EngineConfig::default()).unwrap();
        assert_eq!(engine.level(), 0.0);
    }

    #[test]
    fn pick_config_prefers_float_at_requested_rate() {
        let ranges = vec![
            range(1, 8_000, 48_000, SampleFormat::I16),
            range(2, 8_000, 48_000, SampleFormat::F32),
            range(1, 44_100, 96_000, SampleFormat::F32),
        ];
        let picked = pick_config(ranges, 1, cpal::SampleRate(44_100)).unwrap();
        assert_eq!(picked.channels(), 1);
        assert_eq!(picked.sample_rate(), cpal::SampleRate(44_100));
        assert_eq!(picked.sample_format(), SampleFormat::F32);
    }

    #[test]
    fn pick_config_accepts_integer_devices() {
        let ranges = vec![range(1, 48_000, 48_000, SampleFormat::I16)];
        let picked = pick_config(ranges, 1, cpal::SampleRate(48_000)).unwrap();
        assert_eq!(picked.sample_format(), SampleFormat::I16);
    }

    #[test]
    fn pick_config_none_when_rate_or_channels_missing() {
        let ranges = vec![
            range(2, 48_000, 48_000, SampleFormat::F32),
            range(1, 48_000, 48_000, SampleFormat::F32),
            range(1, 8_000, 96_000, SampleFormat::U8),
        ];
        assert!(pick_config(ranges, 1, cpal::SampleRate(44_100)).is_none());
    }

    #[test]
    fn negotiate_falls_back_to_device_default() {
        let engine = LoopbackEngine::new(EngineConfig::default()).unwrap();
        let ranges = vec![range(2, 48_000, 48_000, SampleFormat::F32)];
        let default = cpal::SupportedStreamConfig::new(
            2,
            cpal::SampleRate(48_000),
            cpal::SupportedBufferSize::Unknown,
            SampleFormat::F32,
        );

        let picked = engine
            .negotiate("input", Ok(ranges.into_iter()), 1, || Ok(default.clone()))
            .unwrap();
        assert_eq!(picked.channels(), 2);
        assert_eq!(picked.sample_rate(), cpal::SampleRate(48_000));
    }

    #[test]
    fn negotiate_rejects_default_with_unhandled_format() {
        let engine = LoopbackEngine::new(EngineConfig::default()).unwrap();
        let default = cpal::SupportedStreamConfig::new(
            1,
            cpal::SampleRate(44_100),
            cpal::SupportedBufferSize::Unknown,
            SampleFormat::U8,
        );

        let result =
            engine.negotiate("input", Ok(std::iter::empty::<cpal::SupportedStreamConfigRange>()), 1, || {
                Ok(default.clone())
            });
        assert!(matches!(
            result,
            Err(EngineError::UnsupportedSampleFormat(SampleFormat::U8))
        ));
    }

    #[test]
    fn stream_config_uses_fixed_buffer_when_set() {
        let mut config = EngineConfig::default();
        config.buffer_frames = Some(1_024);
        let engine = LoopbackEngine::new(config).unwrap();
        let supported = cpal::SupportedStreamConfig::new(
            2,
            cpal::SampleRate(44_100),
            cpal::SupportedBufferSize::Unknown,
            SampleFormat::F32,
        );

        let sc = engine.stream_config(&supported);
        assert_eq!(sc.channels, 2);
        assert_eq!(sc.sample_rate, cpal::SampleRate(44_100));
        assert_eq!(sc.buffer_size, cpal::BufferSize::Fixed(1_024));
    }

    #[test]
    fn stream_fault_ends_capture_with_error() {
        let engine = LoopbackEngine::new(EngineConfig::default()).unwrap();
        engine.level.store(0.5_f32.to_bits(), Ordering::Relaxed);
        let closed = Arc::new(AtomicBool::new(false));
        let fault = fault_slot(Some("device unplugged"));

        let capture = engine.signal.enter();
        let result = engine.hold(FakeStreams(Arc::clone(&closed)), &capture, &fault);

        match result {
            Err(EngineError::Stream(message)) => assert_eq!(message, "device unplugged"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(engine.level(), 0.0);
    }

    #[test]
    fn stop_ends_capture_and_resets_level() {
        let mut config = EngineConfig::default();
        config.poll_interval_ms = 5;
        let engine = Arc::new(LoopbackEngine::new(config).unwrap());
        engine.level.store(0.25_f32.to_bits(), Ordering::Relaxed);
        let closed = Arc::new(AtomicBool::new(false));

        let start = Instant::now();
        let capture = engine.signal.enter();
        let stopper = {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                engine.stop_capture();
            })
        };
        let result = engine.hold(FakeStreams(Arc::clone(&closed)), &capture, &fault_slot(None));
        drop(capture);
        stopper.join().unwrap();

        assert!(result.is_ok());
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(engine.level(), 0.0);
    }
}
