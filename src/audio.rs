//! Audio device handling and the cpal capture backend
//!
//! cpal streams are not `Send`, so each open device lives on a dedicated
//! capture thread. The callback downmixes to mono i16 and hands chunks to the
//! sampler over a bounded channel.

use crate::constants::audio::{
    CAPTURE_QUEUE_DEPTH, CHANNELS, FALLBACK_MIN_BUFFER_FRAMES, MAX_BUFFER_FRAMES,
    MIN_BUFFER_FRAMES, READ_TIMEOUT_MS, SAMPLE_RATE,
};
use crate::error::{MeterError, MeterResult};
use crate::sampler::InputBackend;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, SupportedBufferSize};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded, unbounded};
use std::collections::VecDeque;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Find an input device by name, or the host default
pub fn find_input_device(device_name: Option<&str>) -> MeterResult<cpal::Device> {
    let host = cpal::default_host();
    match device_name {
        Some(name) => host
            .input_devices()?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| MeterError::DeviceUnavailable(format!("input device '{}' not found", name))),
        None => host.default_input_device().ok_or_else(|| {
            MeterError::DeviceUnavailable("no default input device available".to_string())
        }),
    }
}

/// Names of all input devices on the default host
pub fn list_input_devices() -> MeterResult<Vec<String>> {
    let host = cpal::default_host();
    Ok(host.input_devices()?.filter_map(|d| d.name().ok()).collect())
}

/// Display name for the device a session would open
pub fn describe_device(device_name: Option<&str>) -> String {
    find_input_device(device_name)
        .and_then(|d| Ok(d.name()?))
        .unwrap_or_else(|_| "unknown input device".to_string())
}

/// Stream parameters chosen for a device
#[derive(Debug, Clone, PartialEq)]
struct CapturePlan {
    format: SampleFormat,
    channels: u16,
    min_frames: usize,
}

/// Pick a 44.1 kHz configuration, preferring mono i16 and downmixing otherwise.
fn plan_capture(device: &cpal::Device) -> MeterResult<CapturePlan> {
    let rate = cpal::SampleRate(SAMPLE_RATE);
    let range = device
        .supported_input_configs()?
        .filter(|r| r.min_sample_rate() <= rate && r.max_sample_rate() >= rate)
        .filter(|r| matches!(r.sample_format(), SampleFormat::I16 | SampleFormat::F32 | SampleFormat::U16))
        .min_by_key(|r| (r.channels() != CHANNELS, r.sample_format() != SampleFormat::I16))
        .ok_or_else(|| {
            MeterError::DeviceUnavailable(format!("device does not support {} Hz capture", SAMPLE_RATE))
        })?;

    let min_frames = match range.buffer_size() {
        SupportedBufferSize::Range { min: 0, .. } => 0,
        SupportedBufferSize::Range { min, .. } => {
            (*min as usize).clamp(MIN_BUFFER_FRAMES, MAX_BUFFER_FRAMES)
        }
        SupportedBufferSize::Unknown => FALLBACK_MIN_BUFFER_FRAMES,
    };

    Ok(CapturePlan {
        format: range.sample_format(),
        channels: range.channels().max(1),
        min_frames,
    })
}

/// Average interleaved frames down to mono i16
fn downmix<T>(data: &[T], channels: usize, out: &mut Vec<i16>)
where
    T: Sample,
    i16: FromSample<T>,
{
    if channels <= 1 {
        out.extend(data.iter().map(|&s| i16::from_sample(s)));
        return;
    }
    out.extend(data.chunks(channels).map(|frame| {
        let sum: i32 = frame.iter().map(|&s| i32::from(i16::from_sample(s))).sum();
        (sum / frame.len() as i32) as i16
    }));
}

enum Captured {
    Samples(Vec<i16>),
    Failed(String),
}

enum Control {
    Start(Sender<MeterResult<()>>),
}

struct CaptureWorker {
    control: Sender<Control>,
    samples: Receiver<Captured>,
    thread: JoinHandle<()>,
}

/// cpal-backed microphone input
pub struct CpalInput {
    device_name: Option<String>,
    worker: Option<CaptureWorker>,
    pending: VecDeque<i16>,
}

impl CpalInput {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            worker: None,
            pending: VecDeque::new(),
        }
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sink: Sender<Captured>,
) -> MeterResult<cpal::Stream>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let channels = usize::from(config.channels);
    let errors = sink.clone();
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mut chunk = Vec::with_capacity(data.len() / channels.max(1));
            downmix(data, channels, &mut chunk);
            if let Err(TrySendError::Full(_)) = sink.try_send(Captured::Samples(chunk)) {
                debug!("capture queue full, dropping chunk");
            }
        },
        move |err| {
            let _ = errors.try_send(Captured::Failed(err.to_string()));
        },
        None,
    )?;
    Ok(stream)
}

/// Body of the capture thread. Owns the stream until the control channel closes.
fn run_capture(
    device_name: Option<String>,
    ready: Sender<MeterResult<usize>>,
    control: Receiver<Control>,
    sink: Sender<Captured>,
) {
    let opened = find_input_device(device_name.as_deref()).and_then(|device| {
        let plan = plan_capture(&device)?;
        let config = cpal::StreamConfig {
            channels: plan.channels,
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };
        info!(
            device = %device.name().unwrap_or_default(),
            format = ?plan.format,
            channels = plan.channels,
            "opening input stream"
        );
        let stream = match plan.format {
            SampleFormat::I16 => build_stream::<i16>(&device, &config, sink),
            SampleFormat::F32 => build_stream::<f32>(&device, &config, sink),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, sink),
            other => Err(MeterError::DeviceUnavailable(format!(
                "unsupported sample format: {:?}",
                other
            ))),
        }?;
        Ok((stream, plan.min_frames))
    });

    let stream = match opened {
        Ok((stream, min_frames)) => {
            let _ = ready.send(Ok(min_frames));
            stream
        }
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    for command in control.iter() {
        match command {
            Control::Start(reply) => {
                let _ = reply.send(stream.play().map_err(MeterError::from));
            }
        }
    }

    if let Err(err) = stream.pause() {
        debug!(error = %err, "failed to pause input stream");
    }
    drop(stream);
}

impl InputBackend for CpalInput {
    fn open(&mut self) -> MeterResult<usize> {
        if self.worker.is_some() {
            self.close();
        }

        let (ready_tx, ready_rx) = bounded(1);
        let (control_tx, control_rx) = unbounded();
        let (sink, samples) = bounded(CAPTURE_QUEUE_DEPTH);
        let device_name = self.device_name.clone();
        let thread = thread::Builder::new()
            .name("dbmeter-capture".to_string())
            .spawn(move || run_capture(device_name, ready_tx, control_rx, sink))?;

        match ready_rx.recv() {
            Ok(Ok(min_frames)) => {
                self.worker = Some(CaptureWorker {
                    control: control_tx,
                    samples,
                    thread,
                });
                Ok(min_frames)
            }
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread.join();
                Err(MeterError::DeviceUnavailable(
                    "capture thread exited during setup".to_string(),
                ))
            }
        }
    }

    fn start(&mut self) -> MeterResult<()> {
        let worker = self
            .worker
            .as_ref()
            .ok_or_else(|| MeterError::DeviceUnavailable("input stream is not open".to_string()))?;
        let (reply_tx, reply_rx) = bounded(1);
        worker
            .control
            .send(Control::Start(reply_tx))
            .map_err(|_| MeterError::DeviceUnavailable("capture thread has exited".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| MeterError::DeviceUnavailable("capture thread has exited".to_string()))?
    }

    fn read(&mut self, buffer: &mut [i16]) -> MeterResult<usize> {
        let Some(worker) = self.worker.as_ref() else {
            return Err(MeterError::ReadFailed("input stream is not open".to_string()));
        };

        // At least one new chunk, then keep collecting until the window is
        // full or the timeout runs out.
        let deadline = Instant::now() + Duration::from_millis(READ_TIMEOUT_MS);
        let mut fresh = false;
        loop {
            while let Ok(captured) = worker.samples.try_recv() {
                accept(&mut self.pending, captured)?;
                fresh = true;
            }
            if fresh && self.pending.len() >= buffer.len() {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match worker.samples.recv_timeout(remaining) {
                Ok(captured) => {
                    accept(&mut self.pending, captured)?;
                    fresh = true;
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(MeterError::ReadFailed("input stream ended".to_string()));
                }
            }
        }
        if !fresh {
            return Ok(0);
        }

        // Sliding window: hold on to the newest `buffer.len()` samples so a
        // window longer than one period still fills across reads.
        let excess = self.pending.len().saturating_sub(buffer.len());
        self.pending.drain(..excess);

        let count = self.pending.len();
        for (slot, &sample) in buffer.iter_mut().zip(self.pending.iter()) {
            *slot = sample;
        }
        Ok(count)
    }

    fn close(&mut self) {
        self.pending.clear();
        if let Some(worker) = self.worker.take() {
            let CaptureWorker {
                control,
                samples,
                thread,
            } = worker;
            drop(control);
            drop(samples);
            if thread.join().is_err() {
                warn!("capture thread panicked");
            }
        }
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.close();
    }
}

fn accept(pending: &mut VecDeque<i16>, captured: Captured) -> MeterResult<()> {
    match captured {
        Captured::Samples(samples) => {
            pending.extend(samples);
            Ok(())
        }
        Captured::Failed(reason) => Err(MeterError::ReadFailed(reason)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_passes_through() {
        let mut out = Vec::new();
        downmix(&[1i16, -2, 3], 1, &mut out);
        assert_eq!(out, vec![1, -2, 3]);
    }

    #[test]
    fn stereo_is_averaged() {
        let mut out = Vec::new();
        downmix(&[100i16, 300, -50, 50, i16::MAX, i16::MAX], 2, &mut out);
        assert_eq!(out, vec![200, 0, i16::MAX]);
    }

    #[test]
    fn float_samples_are_scaled() {
        let mut out = Vec::new();
        downmix(&[0.0f32, 1.0, -1.0], 1, &mut out);
        assert_eq!(out[0], 0);
        assert_eq!(out[1], i16::MAX);
        assert!(out[2] <= -i16::MAX);
    }

    #[test]
    fn unsigned_midpoint_is_silence() {
        let mut out = Vec::new();
        downmix(&[32_768u16], 1, &mut out);
        assert_eq!(out, vec![0]);
    }

    #[test]
    fn read_keeps_newest_window() {
        let (sink, samples) = bounded(8);
        let (control, _control_rx) = unbounded();
        let thread = thread::spawn(|| {});
        let mut input = CpalInput::new(None);
        input.worker = Some(CaptureWorker {
            control,
            samples,
            thread,
        });

        sink.send(Captured::Samples(vec![1, 2, 3])).unwrap();
        sink.send(Captured::Samples(vec![4, 5, 6])).unwrap();

        let mut buffer = [0i16; 4];
        assert_eq!(input.read(&mut buffer).unwrap(), 4);
        assert_eq!(buffer, [3, 4, 5, 6]);
    }

    #[test]
    fn window_fills_across_reads() {
        let (sink, samples) = bounded(8);
        let (control, _control_rx) = unbounded();
        let mut input = CpalInput::new(None);
        input.worker = Some(CaptureWorker {
            control,
            samples,
            thread: thread::spawn(|| {}),
        });
        let mut buffer = [0i16; 6];

        sink.send(Captured::Samples(vec![1, 2, 3, 4])).unwrap();
        assert_eq!(input.read(&mut buffer).unwrap(), 4);
        assert_eq!(&buffer[..4], &[1, 2, 3, 4]);

        sink.send(Captured::Samples(vec![5, 6, 7, 8])).unwrap();
        assert_eq!(input.read(&mut buffer).unwrap(), 6);
        assert_eq!(buffer, [3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn no_new_audio_reads_zero() {
        let (sink, samples) = bounded(8);
        let (control, _control_rx) = unbounded();
        let mut input = CpalInput::new(None);
        input.worker = Some(CaptureWorker {
            control,
            samples,
            thread: thread::spawn(|| {}),
        });
        let mut buffer = [0i16; 2];

        sink.send(Captured::Samples(vec![9, 9])).unwrap();
        assert_eq!(input.read(&mut buffer).unwrap(), 2);
        assert_eq!(input.read(&mut buffer).unwrap(), 0);
    }

    #[test]
    fn read_times_out_with_zero_samples() {
        let (_sink, samples) = bounded::<Captured>(1);
        let (control, _control_rx) = unbounded();
        let mut input = CpalInput::new(None);
        input.worker = Some(CaptureWorker {
            control,
            samples,
            thread: thread::spawn(|| {}),
        });

        let mut buffer = [7i16; 4];
        assert_eq!(input.read(&mut buffer).unwrap(), 0);
    }

    #[test]
    fn stream_error_becomes_read_failure() {
        let (sink, samples) = bounded(2);
        let (control, _control_rx) = unbounded();
        let mut input = CpalInput::new(None);
        input.worker = Some(CaptureWorker {
            control,
            samples,
            thread: thread::spawn(|| {}),
        });

        sink.send(Captured::Failed("device unplugged".to_string())).unwrap();
        let mut buffer = [0i16; 4];
        assert!(matches!(
            input.read(&mut buffer),
            Err(MeterError::ReadFailed(_))
        ));
    }

    #[test]
    fn read_without_open_fails() {
        let mut input = CpalInput::new(None);
        let mut buffer = [0i16; 4];
        assert!(matches!(
            input.read(&mut buffer),
            Err(MeterError::ReadFailed(_))
        ));
    }
}
