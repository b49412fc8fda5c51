//! Live capture from an audio input device via cpal.
//!
//! The cpal callback downmixes to mono and appends to a bounded backlog.
//! `read_frame` hands out fixed-size frames from that backlog. When the reader
//! falls behind, the oldest samples are dropped and the reader resyncs to the
//! freshest audio instead of failing.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

use super::error::CaptureError;
use super::source::{Frame, FrameSource};

#[cfg(target_os = "linux")]
use std::fs::OpenOptions;
#[cfg(target_os = "linux")]
use std::os::unix::io::AsRawFd;

/// Frames of audio the backlog holds before it starts dropping samples.
const BACKLOG_FRAMES: usize = 8;

/// How long `read_frame` waits for new audio before declaring the device dead.
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Devices currently held by an open session, keyed by device name.
static CLAIMED_DEVICES: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

fn claimed_devices() -> MutexGuard<'static, HashSet<String>> {
    CLAIMED_DEVICES
        .get_or_init(|| Mutex::new(HashSet::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Exclusive hold on a named capture device, released on drop.
#[derive(Debug)]
pub struct DeviceClaim {
    name: String,
}

impl DeviceClaim {
    /// Claims `name` for the calling session.
    ///
    /// # Errors
    /// - `DeviceUnavailable` if another session already holds the device
    pub fn acquire(name: &str) -> Result<Self, CaptureError> {
        let mut claimed = claimed_devices();
        if !claimed.insert(name.to_string()) {
            return Err(CaptureError::DeviceUnavailable(format!(
                "'{name}' is already in use by another capture session"
            )));
        }
        tracing::debug!("Claimed capture device: {}", name);
        Ok(Self {
            name: name.to_string(),
        })
    }

    #[cfg(test)]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        claimed_devices().remove(&self.name);
        tracing::debug!("Released capture device: {}", self.name);
    }
}

/// Samples delivered by the callback and not yet handed out as frames.
#[derive(Default)]
struct Backlog {
    samples: VecDeque<f32>,
    dropped: usize,
    error: Option<String>,
}

type SharedBacklog = Arc<(Mutex<Backlog>, Condvar)>;

fn lock_backlog(backlog: &Mutex<Backlog>) -> MutexGuard<'_, Backlog> {
    backlog.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Frame source backed by a cpal input stream.
///
/// The stream lives on the thread that called `open`; cpal streams are not
/// `Send` on every platform.
pub struct CpalFrameSource {
    device_name: String,
    requested_sample_rate: u32,
    sample_rate: u32,
    frame_size: usize,
    backlog: SharedBacklog,
    stream: Option<cpal::Stream>,
    claim: Option<DeviceClaim>,
}

impl CpalFrameSource {
    /// Creates an unopened source.
    ///
    /// # Arguments
    /// * `device_name` - "default", a numeric index from `list-devices`, or a device name
    /// * `sample_rate` - Requested rate in Hz; the device rate wins if it cannot be honoured
    /// * `frame_size` - Samples per frame
    pub fn new(device_name: String, sample_rate: u32, frame_size: usize) -> Self {
        Self {
            device_name,
            requested_sample_rate: sample_rate,
            sample_rate,
            frame_size,
            backlog: Arc::new((Mutex::new(Backlog::default()), Condvar::new())),
            stream: None,
            claim: None,
        }
    }

    fn capacity(&self) -> usize {
        self.frame_size * BACKLOG_FRAMES
    }

    /// Picks a stream config at the requested rate, falling back to the device default.
    fn choose_config(&self, device: &cpal::Device) -> Result<cpal::SupportedStreamConfig, CaptureError> {
        let target = self.requested_sample_rate;
        let matching = device
            .supported_input_configs()
            .map_err(|e| CaptureError::DeviceUnavailable(format!("Failed to query device configs: {e}")))?
            .filter(|range| range.min_sample_rate().0 <= target && target <= range.max_sample_rate().0)
            .min_by_key(|range| range.channels());

        if let Some(range) = matching {
            return Ok(range.with_sample_rate(cpal::SampleRate(target)));
        }

        let fallback = device
            .default_input_config()
            .map_err(|e| CaptureError::DeviceUnavailable(format!("No usable input config: {e}")))?;
        tracing::warn!(
            "Requested sample rate {}Hz but device uses {}Hz. Capturing at device rate.",
            target,
            fallback.sample_rate().0
        );
        Ok(fallback)
    }

    fn build_stream<T>(
        &self,
        device: &cpal::Device,
        config: &cpal::StreamConfig,
    ) -> Result<cpal::Stream, cpal::BuildStreamError>
    where
        T: cpal::SizedSample + Send + 'static,
        f32: cpal::FromSample<T>,
    {
        let channels = config.channels as usize;
        let capacity = self.capacity();
        let data_backlog = Arc::clone(&self.backlog);
        let error_backlog = Arc::clone(&self.backlog);

        device.build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                push_mono(&data_backlog, data, channels, capacity);
            },
            move |err| {
                tracing::error!("Audio stream error: {}", err);
                let (lock, ready) = &*error_backlog;
                lock_backlog(lock).error = Some(err.to_string());
                ready.notify_all();
            },
            None,
        )
    }
}

/// Downmixes one callback buffer to mono and appends it, dropping the oldest
/// samples once the backlog is full.
fn push_mono<T>(backlog: &SharedBacklog, data: &[T], channels: usize, capacity: usize)
where
    T: cpal::Sample,
    f32: cpal::FromSample<T>,
{
    let (lock, ready) = &**backlog;
    let mut state = lock_backlog(lock);
    let channels = channels.max(1);

    for chunk in data.chunks_exact(channels) {
        let sum: f32 = chunk
            .iter()
            .map(|&s| <f32 as cpal::Sample>::from_sample(s))
            .sum();
        state.samples.push_back(sum / channels as f32);
    }

    let overflow = state.samples.len().saturating_sub(capacity);
    if overflow > 0 {
        state.samples.drain(..overflow);
        state.dropped += overflow;
    }
    drop(state);
    ready.notify_one();
}

/// Takes one frame from the backlog if enough audio is buffered.
///
/// A pending stream error wins. After an overflow the backlog is cut down to
/// its newest frame so the reader resumes with the freshest audio.
fn take_frame(state: &mut Backlog, frame_size: usize) -> Result<Option<Frame>, CaptureError> {
    if let Some(error) = state.error.take() {
        return Err(CaptureError::DeviceFailed(error));
    }

    if state.dropped > 0 {
        let stale = state.samples.len().saturating_sub(frame_size);
        state.samples.drain(..stale);
        let overflow = CaptureError::DeviceOverflow {
            dropped: state.dropped + stale,
        };
        tracing::debug!("{}, resynced", overflow);
        state.dropped = 0;
    }

    if state.samples.len() < frame_size {
        return Ok(None);
    }
    let samples: Vec<f32> = state.samples.drain(..frame_size).collect();
    Ok(Some(Frame::new(samples)))
}

impl FrameSource for CpalFrameSource {
    fn open(&mut self) -> Result<(), CaptureError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let device = suppress_alsa_warnings(|| {
            let host = cpal::default_host();
            if self.device_name == "default" {
                host.default_input_device()
                    .ok_or_else(|| CaptureError::DeviceUnavailable("No audio input device available".to_string()))
            } else {
                find_device_by_name(&host, &self.device_name)
            }
        })?;

        let device_name = device
            .name()
            .unwrap_or_else(|_| self.device_name.clone());
        let claim = DeviceClaim::acquire(&device_name)?;
        tracing::info!("Capture device: {}", device_name);

        let supported = self.choose_config(&device)?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        tracing::debug!(
            "Device configuration: {}Hz, {} channels, {:?}",
            config.sample_rate.0,
            config.channels,
            sample_format
        );

        {
            let (lock, _) = &*self.backlog;
            *lock_backlog(lock) = Backlog::default();
        }

        let stream = match sample_format {
            cpal::SampleFormat::F32 => self.build_stream::<f32>(&device, &config),
            cpal::SampleFormat::I16 => self.build_stream::<i16>(&device, &config),
            cpal::SampleFormat::U16 => self.build_stream::<u16>(&device, &config),
            cpal::SampleFormat::I32 => self.build_stream::<i32>(&device, &config),
            other => {
                return Err(CaptureError::DeviceUnavailable(format!(
                    "Unsupported sample format: {other:?}"
                )))
            }
        }
        .map_err(|e| CaptureError::DeviceUnavailable(format!("Failed to build input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| CaptureError::DeviceUnavailable(format!("Failed to start input stream: {e}")))?;

        self.sample_rate = config.sample_rate.0;
        self.stream = Some(stream);
        self.claim = Some(claim);
        tracing::debug!("Audio stream started");
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.stream.is_none() {
            return Err(CaptureError::DeviceFailed("capture device is not open".to_string()));
        }

        let frame_size = self.frame_size;
        let (lock, ready) = &*self.backlog;
        let mut state = lock_backlog(lock);
        let mut waited_since = Instant::now();

        loop {
            if let Some(frame) = take_frame(&mut state, frame_size)? {
                return Ok(frame);
            }

            let before = state.samples.len();
            let remaining = STALL_TIMEOUT.saturating_sub(waited_since.elapsed());
            if remaining.is_zero() {
                return Err(CaptureError::DeviceFailed(format!(
                    "no audio received for {}s",
                    STALL_TIMEOUT.as_secs()
                )));
            }
            let (guard, _) = ready
                .wait_timeout(state, remaining)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state = guard;
            if state.samples.len() != before || state.dropped > 0 {
                waited_since = Instant::now();
            }
        }
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("Audio stream stopped");
        }
        self.claim = None;
        let (lock, _) = &*self.backlog;
        *lock_backlog(lock) = Backlog::default();
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }
}

impl Drop for CpalFrameSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Description of an input device for `list-devices`.
#[derive(Debug, Clone)]
pub struct InputDeviceInfo {
    pub index: usize,
    pub name: String,
    pub is_default: bool,
    /// Default sample rate and channel count, if the device could be queried.
    pub default_config: Option<(u32, u16)>,
}

/// Enumerates input devices in the order `find_device_by_name` indexes them.
///
/// # Errors
/// - If the audio host cannot enumerate devices
pub fn list_input_devices() -> anyhow::Result<Vec<InputDeviceInfo>> {
    suppress_alsa_warnings(|| {
        let host = cpal::default_host();
        let default_name = host.default_input_device().and_then(|d| d.name().ok());
        let devices = host
            .input_devices()
            .map_err(|e| anyhow::anyhow!("Failed to enumerate audio devices: {e}"))?;

        let infos = devices
            .enumerate()
            .map(|(index, device)| {
                let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
                let default_config = device
                    .default_input_config()
                    .ok()
                    .map(|config| (config.sample_rate().0, config.channels()));
                InputDeviceInfo {
                    index,
                    is_default: default_name.as_ref() == Some(&name),
                    name,
                    default_config,
                }
            })
            .collect();
        Ok(infos)
    })
}

/// Finds an audio input device by name or numeric index.
fn find_device_by_name(host: &cpal::Host, device_spec: &str) -> Result<cpal::Device, CaptureError> {
    let devices: Vec<cpal::Device> = host
        .input_devices()
        .map_err(|e| CaptureError::DeviceUnavailable(format!("Failed to enumerate devices: {e}")))?
        .collect();

    if let Ok(index) = device_spec.parse::<usize>() {
        let count = devices.len();
        return devices.into_iter().nth(index).ok_or_else(|| {
            CaptureError::DeviceUnavailable(format!(
                "Device index {} is out of range (0-{})",
                index,
                count.saturating_sub(1)
            ))
        });
    }

    devices
        .into_iter()
        .find(|device| device.name().map(|name| name == device_spec).unwrap_or(false))
        .ok_or_else(|| {
            CaptureError::DeviceUnavailable(format!(
                "Audio input device '{device_spec}' not found. Use 'spectrec list-devices' to see available devices."
            ))
        })
}

/// Temporarily redirects stderr to /dev/null to suppress ALSA library warnings on Linux.
///
/// If the redirect cannot be set up, `f` runs with stderr untouched.
#[cfg(target_os = "linux")]
fn suppress_alsa_warnings<F, T>(f: F) -> T
where
    F: FnOnce() -> T,
{
    let Ok(dev_null) = OpenOptions::new().write(true).open("/dev/null") else {
        return f();
    };

    let old_stderr = unsafe { libc::dup(libc::STDERR_FILENO) };
    if old_stderr == -1 {
        return f();
    }

    if unsafe { libc::dup2(dev_null.as_raw_fd(), libc::STDERR_FILENO) } == -1 {
        unsafe { libc::close(old_stderr) };
        return f();
    }

    let result = f();

    unsafe {
        libc::dup2(old_stderr, libc::STDERR_FILENO);
        libc::close(old_stderr);
    }

    result
}

#[cfg(not(target_os = "linux"))]
fn suppress_alsa_warnings<F, T>(f: F) -> T
where
    F: FnOnce() -> T,
{
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backlog() -> SharedBacklog {
        Arc::new((Mutex::new(Backlog::default()), Condvar::new()))
    }

    #[test]
    fn test_device_claim_is_exclusive() {
        let first = DeviceClaim::acquire("test-device-exclusive").unwrap();
        let second = DeviceClaim::acquire("test-device-exclusive");
        assert!(matches!(second, Err(CaptureError::DeviceUnavailable(_))));

        drop(first);
        let again = DeviceClaim::acquire("test-device-exclusive").unwrap();
        assert_eq!(again.name(), "test-device-exclusive");
    }

    #[test]
    fn test_push_mono_averages_channels() {
        let shared = backlog();
        push_mono(&shared, &[0.5f32, -0.5, 1.0, 0.0], 2, 16);

        let state = lock_backlog(&shared.0);
        assert_eq!(state.samples.iter().copied().collect::<Vec<_>>(), vec![0.0, 0.5]);
        assert_eq!(state.dropped, 0);
    }

    #[test]
    fn test_push_mono_drops_oldest_when_full() {
        let shared = backlog();
        let data: Vec<f32> = (0..10).map(|i| i as f32).collect();
        push_mono(&shared, &data, 1, 4);

        let state = lock_backlog(&shared.0);
        assert_eq!(state.samples.iter().copied().collect::<Vec<_>>(), vec![6.0, 7.0, 8.0, 9.0]);
        assert_eq!(state.dropped, 6);
    }

    #[test]
    fn test_push_mono_converts_integer_samples() {
        let shared = backlog();
        push_mono(&shared, &[i16::MAX, 0i16], 1, 16);

        let state = lock_backlog(&shared.0);
        assert!((state.samples[0] - 1.0).abs() < 1e-3);
        assert_eq!(state.samples[1], 0.0);
    }

    #[test]
    fn test_take_frame_resyncs_after_overflow() {
        let shared = backlog();
        let data: Vec<f32> = (0..20).map(|i| i as f32).collect();
        push_mono(&shared, &data, 1, 12);

        let mut state = lock_backlog(&shared.0);
        let frame = take_frame(&mut state, 4).unwrap().unwrap();
        assert_eq!(frame.samples(), &[16.0, 17.0, 18.0, 19.0]);
        assert_eq!(state.dropped, 0);
        assert!(take_frame(&mut state, 4).unwrap().is_none());
    }

    #[test]
    fn test_take_frame_reports_stream_error() {
        let shared = backlog();
        push_mono(&shared, &[0.1f32; 8], 1, 16);

        let mut state = lock_backlog(&shared.0);
        state.error = Some("device unplugged".to_string());
        assert!(matches!(
            take_frame(&mut state, 4),
            Err(CaptureError::DeviceFailed(_))
        ));
        assert_eq!(take_frame(&mut state, 4).unwrap().unwrap().len(), 4);
    }

    #[test]
    fn test_read_frame_requires_open_device() {
        let mut source = CpalFrameSource::new("default".to_string(), 44100, 1024);
        assert!(matches!(source.read_frame(), Err(CaptureError::DeviceFailed(_))));
        source.close();
        assert!(!source.is_open());
    }
}
