//! Microphone sampler lifecycle
//!
//! A [`Sampler`] owns one input backend and walks it through
//! `Idle -> Open -> Recording -> Idle`. Only one sampler per [`DeviceLock`]
//! may hold the device at a time; production code shares
//! [`DeviceLock::process`] so the hold is process-wide.

use crate::constants::audio::BUFFER_SCALE;
use crate::error::{MeterError, MeterResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Platform audio input the sampler drives.
pub trait InputBackend: Send {
    /// Acquire the device at 44.1 kHz mono i16. Returns the device minimum
    /// buffer size in frames; 0 means the device reported an invalid size.
    fn open(&mut self) -> MeterResult<usize>;

    /// Begin delivering audio.
    fn start(&mut self) -> MeterResult<()>;

    /// Block until audio is available, fill `buffer` with the newest samples
    /// and return how many are valid. Returns `Ok(0)` when nothing new arrived
    /// in time; a count below `buffer.len()` means the window is not full yet.
    fn read(&mut self, buffer: &mut [i16]) -> MeterResult<usize>;

    /// Stop and release the device. Must tolerate repeated calls.
    fn close(&mut self);
}

/// Answers whether microphone access has been granted.
pub trait PermissionGate: Send + Sync {
    fn microphone_granted(&self) -> bool;
}

/// Desktop hosts prompt for microphone access when the stream opens, so
/// there is nothing to check up front.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostPermissions;

impl PermissionGate for HostPermissions {
    fn microphone_granted(&self) -> bool {
        true
    }
}

/// Exclusive hold on the input device.
#[derive(Debug, Clone, Default)]
pub struct DeviceLock {
    held: Arc<AtomicBool>,
}

impl DeviceLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock shared by every sampler in this process
    pub fn process() -> Self {
        static PROCESS: OnceLock<DeviceLock> = OnceLock::new();
        PROCESS.get_or_init(DeviceLock::new).clone()
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    fn try_claim(&self) -> Option<DeviceClaim> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DeviceClaim {
                held: Arc::clone(&self.held),
            })
    }
}

/// Released on drop.
#[derive(Debug)]
struct DeviceClaim {
    held: Arc<AtomicBool>,
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}

/// Sampler lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Idle,
    Open,
    Recording,
}

/// Produces fixed-size PCM buffers from an input backend
pub struct Sampler {
    backend: Box<dyn InputBackend>,
    permissions: Arc<dyn PermissionGate>,
    lock: DeviceLock,
    claim: Option<DeviceClaim>,
    state: SamplerState,
    buffer_len: usize,
}

impl Sampler {
    pub fn new(
        backend: Box<dyn InputBackend>,
        permissions: Arc<dyn PermissionGate>,
        lock: DeviceLock,
    ) -> Self {
        Self {
            backend,
            permissions,
            lock,
            claim: None,
            state: SamplerState::Idle,
            buffer_len: 0,
        }
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn state(&self) -> SamplerState {
        self.state
    }

    /// Samples per acquisition window; 0 until opened.
    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    /// Acquire the device. Calling it while already open is a no-op.
    pub fn open(&mut self) -> MeterResult<()> {
        if self.state != SamplerState::Idle {
            return Ok(());
        }
        if !self.permissions.microphone_granted() {
            return Err(MeterError::PermissionDenied);
        }

        let claim = self.lock.try_claim().ok_or_else(|| {
            MeterError::DeviceUnavailable("input device is held by another session".to_string())
        })?;

        let min_frames = self.backend.open()?;
        if min_frames == 0 {
            self.backend.close();
            return Err(MeterError::DeviceUnavailable(
                "device reported an invalid buffer size".to_string(),
            ));
        }

        self.buffer_len = min_frames * BUFFER_SCALE;
        self.claim = Some(claim);
        self.state = SamplerState::Open;
        info!(buffer_len = self.buffer_len, "sampler opened");
        Ok(())
    }

    /// Fill `buffer` with the most recent audio and return the sample count.
    ///
    /// The first read after `open` starts the stream. Any failure closes the
    /// sampler before the error is returned.
    pub fn read(&mut self, buffer: &mut [i16]) -> MeterResult<usize> {
        match self.state {
            SamplerState::Idle => {
                return Err(MeterError::ReadFailed("sampler is not open".to_string()));
            }
            SamplerState::Open => {
                if let Err(err) = self.backend.start() {
                    warn!(error = %err, "failed to start capture");
                    self.close();
                    return Err(err);
                }
                self.state = SamplerState::Recording;
                debug!("sampler recording");
            }
            SamplerState::Recording => {}
        }

        match self.backend.read(buffer) {
            Ok(count) => Ok(count.min(buffer.len())),
            Err(err) => {
                warn!(error = %err, "read failed, closing sampler");
                self.close();
                Err(err)
            }
        }
    }

    /// Stop and release the device. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.state == SamplerState::Idle {
            return;
        }
        self.backend.close();
        self.claim = None;
        self.state = SamplerState::Idle;
        info!("sampler closed");
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.close();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Denied, Counters, ScriptedInput, Step};
    use super::*;

    fn sampler_with(input: ScriptedInput, lock: &DeviceLock) -> Sampler {
        Sampler::new(Box::new(input), Arc::new(HostPermissions), lock.clone())
    }

    #[test]
    fn open_twice_allocates_one_handle() {
        let lock = DeviceLock::new();
        let input = ScriptedInput::new(vec![]);
        let counters = Arc::clone(&input.counters);
        let mut sampler = sampler_with(input, &lock);

        sampler.open().unwrap();
        sampler.open().unwrap();

        assert_eq!(sampler.state(), SamplerState::Open);
        assert_eq!(Counters::get(&counters.opens), 1);
        assert_eq!(Counters::get(&counters.open_devices), 1);
        assert!(lock.is_held());
    }

    #[test]
    fn buffer_is_scaled_from_device_minimum() {
        let lock = DeviceLock::new();
        let mut input = ScriptedInput::new(vec![]);
        input.min_frames = 512;
        let mut sampler = sampler_with(input, &lock);
        assert_eq!(sampler.buffer_len(), 0);
        sampler.open().unwrap();
        assert_eq!(sampler.buffer_len(), 512 * BUFFER_SCALE);
    }

    #[test]
    fn permission_denied_skips_device() {
        let lock = DeviceLock::new();
        let input = ScriptedInput::new(vec![]);
        let counters = Arc::clone(&input.counters);
        let mut sampler = Sampler::new(Box::new(input), Arc::new(Denied), lock.clone());

        assert!(matches!(sampler.open(), Err(MeterError::PermissionDenied)));
        assert_eq!(Counters::get(&counters.opens), 0);
        assert_eq!(sampler.state(), SamplerState::Idle);
        assert!(!lock.is_held());
    }

    #[test]
    fn invalid_buffer_size_is_unavailable() {
        let lock = DeviceLock::new();
        let mut input = ScriptedInput::new(vec![]);
        input.min_frames = 0;
        let mut sampler = sampler_with(input, &lock);

        assert!(matches!(
            sampler.open(),
            Err(MeterError::DeviceUnavailable(_))
        ));
        assert_eq!(sampler.state(), SamplerState::Idle);
        assert!(!lock.is_held());
    }

    #[test]
    fn second_sampler_cannot_take_held_device() {
        let lock = DeviceLock::new();
        let mut first = sampler_with(ScriptedInput::new(vec![]), &lock);
        let mut second = sampler_with(ScriptedInput::new(vec![]), &lock);

        first.open().unwrap();
        assert!(matches!(
            second.open(),
            Err(MeterError::DeviceUnavailable(_))
        ));

        first.close();
        second.open().unwrap();
        assert_eq!(second.state(), SamplerState::Open);
    }

    #[test]
    fn first_read_starts_recording() {
        let lock = DeviceLock::new();
        let input = ScriptedInput::new(vec![Step::Samples(vec![1, 2, 3])]);
        let counters = Arc::clone(&input.counters);
        let mut sampler = sampler_with(input, &lock);
        sampler.open().unwrap();

        let mut buffer = vec![0; sampler.buffer_len()];
        assert_eq!(sampler.read(&mut buffer).unwrap(), 3);
        assert_eq!(&buffer[..3], &[1, 2, 3]);
        assert_eq!(sampler.state(), SamplerState::Recording);

        sampler.read(&mut buffer).unwrap();
        assert_eq!(Counters::get(&counters.starts), 1);
    }

    #[test]
    fn read_while_idle_fails() {
        let lock = DeviceLock::new();
        let mut sampler = sampler_with(ScriptedInput::new(vec![]), &lock);
        let mut buffer = [0i16; 8];
        assert!(matches!(
            sampler.read(&mut buffer),
            Err(MeterError::ReadFailed(_))
        ));
    }

    #[test]
    fn empty_read_is_not_an_error() {
        let lock = DeviceLock::new();
        let mut sampler = sampler_with(ScriptedInput::new(vec![Step::Empty]), &lock);
        sampler.open().unwrap();
        let mut buffer = vec![0; sampler.buffer_len()];
        assert_eq!(sampler.read(&mut buffer).unwrap(), 0);
        assert_eq!(sampler.state(), SamplerState::Recording);
    }

    #[test]
    fn failed_read_releases_device() {
        let lock = DeviceLock::new();
        let input = ScriptedInput::new(vec![Step::Fail("overrun")]);
        let counters = Arc::clone(&input.counters);
        let mut sampler = sampler_with(input, &lock);
        sampler.open().unwrap();

        let mut buffer = vec![0; sampler.buffer_len()];
        assert!(matches!(
            sampler.read(&mut buffer),
            Err(MeterError::ReadFailed(_))
        ));
        assert_eq!(sampler.state(), SamplerState::Idle);
        assert_eq!(Counters::get(&counters.open_devices), 0);
        assert!(!lock.is_held());
    }

    #[test]
    fn close_is_idempotent() {
        let lock = DeviceLock::new();
        let input = ScriptedInput::new(vec![]);
        let counters = Arc::clone(&input.counters);
        let mut sampler = sampler_with(input, &lock);

        sampler.close();
        assert_eq!(Counters::get(&counters.closes), 0);

        sampler.open().unwrap();
        sampler.close();
        sampler.close();
        assert_eq!(Counters::get(&counters.closes), 1);
        assert!(!lock.is_held());
    }

    #[test]
    fn drop_releases_device() {
        let lock = DeviceLock::new();
        let input = ScriptedInput::new(vec![]);
        let counters = Arc::clone(&input.counters);
        {
            let mut sampler = sampler_with(input, &lock);
            sampler.open().unwrap();
            assert!(lock.is_held());
        }
        assert!(!lock.is_held());
        assert_eq!(Counters::get(&counters.open_devices), 0);
    }
}
