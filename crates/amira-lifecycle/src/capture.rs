//! Audio capture: device capability, exclusive lease, and the in-memory PCM buffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use amira_core::config::AudioConfig;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::ResourceError;

/// Raw PCM format of a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    pub fn bytes_per_second(&self) -> u64 {
        self.sample_rate as u64 * self.channels as u64 * (self.bits_per_sample as u64 / 8)
    }

    /// Whole seconds of audio in `len` bytes.
    pub fn duration_seconds(&self, len: usize) -> u32 {
        match self.bytes_per_second() {
            0 => 0,
            bps => (len as u64 / bps).min(u32::MAX as u64) as u32,
        }
    }
}

impl From<&AudioConfig> for AudioFormat {
    fn from(cfg: &AudioConfig) -> Self {
        Self {
            sample_rate: cfg.sample_rate,
            channels: cfg.channels,
            bits_per_sample: cfg.bits_per_sample,
        }
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::from(&AudioConfig::default())
    }
}

/// A microphone (or stand-in) that can be held by one recording at a time.
pub trait AudioDevice: Send + Sync {
    fn format(&self) -> AudioFormat;

    /// Acquire exclusive use of the device. Fails with permission or hardware errors.
    fn acquire(&self) -> Result<CaptureLease, ResourceError>;
}

/// Exclusive hold on an audio device; released when dropped.
pub struct CaptureLease {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CaptureLease {
    pub fn new(release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for CaptureLease {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            tracing::debug!("audio device released");
        }
    }
}

impl std::fmt::Debug for CaptureLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureLease")
            .field("held", &self.release.is_some())
            .finish()
    }
}

/// Plaintext PCM for the active recording. Wiped when dropped or cleared.
#[derive(Default)]
pub struct RecordingBuffer {
    data: Zeroizing<Vec<u8>>,
}

impl RecordingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, pcm: &[u8]) {
        self.data.extend_from_slice(pcm);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// A zeroizing copy, handed to the encryption worker.
    pub fn snapshot(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.data.to_vec())
    }

    pub fn clear(&mut self) {
        // replacing drops (and zeroizes) the old allocation
        self.data = Zeroizing::new(Vec::new());
    }
}

impl std::fmt::Debug for RecordingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingBuffer")
            .field("len", &self.data.len())
            .finish()
    }
}

/// In-process audio device for tests and file-based capture in the CLI.
#[derive(Debug, Clone)]
pub struct SyntheticDevice {
    format: AudioFormat,
    in_use: Arc<AtomicBool>,
    failure: Option<ResourceError>,
}

impl SyntheticDevice {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            in_use: Arc::new(AtomicBool::new(false)),
            failure: None,
        }
    }

    /// A device whose every `acquire` fails with `failure`.
    pub fn failing(format: AudioFormat, failure: ResourceError) -> Self {
        Self {
            failure: Some(failure),
            ..Self::new(format)
        }
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::SeqCst)
    }
}

impl AudioDevice for SyntheticDevice {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn acquire(&self) -> Result<CaptureLease, ResourceError> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        if self.in_use.swap(true, Ordering::SeqCst) {
            return Err(ResourceError::Busy);
        }
        let in_use = self.in_use.clone();
        Ok(CaptureLease::new(move || in_use.store(false, Ordering::SeqCst)))
    }
}

/// 16-bit little-endian sine tone, used to synthesise test audio.
pub fn sine_pcm(format: AudioFormat, seconds: u32, frequency_hz: f32) -> Vec<u8> {
    let frames = format.sample_rate as usize * seconds as usize;
    let mut out = Vec::with_capacity(frames * format.channels as usize * 2);
    for i in 0..frames {
        let t = i as f32 / format.sample_rate as f32;
        let sample = ((t * frequency_hz * std::f32::consts::TAU).sin() * i16::MAX as f32 * 0.5) as i16;
        for _ in 0..format.channels {
            out.extend_from_slice(&sample.to_le_bytes());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_from_bytes() {
        let format = AudioFormat::default();
        assert_eq!(format.bytes_per_second(), 88_200);
        assert_eq!(format.duration_seconds(88_200 * 5), 5);
        assert_eq!(format.duration_seconds(88_199), 0);
    }

    #[test]
    fn test_sine_pcm_length() {
        let format = AudioFormat::default();
        let pcm = sine_pcm(format, 5, 440.0);
        assert_eq!(pcm.len() as u64, format.bytes_per_second() * 5);
        assert_eq!(format.duration_seconds(pcm.len()), 5);
    }

    #[test]
    fn test_lease_is_exclusive_and_released_on_drop() {
        let device = SyntheticDevice::new(AudioFormat::default());
        let lease = device.acquire().unwrap();
        assert!(device.is_in_use());
        assert_eq!(device.acquire().unwrap_err(), ResourceError::Busy);

        drop(lease);
        assert!(!device.is_in_use());
        assert!(device.acquire().is_ok());
    }

    #[test]
    fn test_failing_device() {
        let device = SyntheticDevice::failing(AudioFormat::default(), ResourceError::PermissionDenied);
        assert_eq!(device.acquire().unwrap_err(), ResourceError::PermissionDenied);
        assert!(!device.is_in_use());
    }

    #[test]
    fn test_buffer_append_and_clear() {
        let mut buf = RecordingBuffer::new();
        buf.append(b"abc");
        buf.append(b"def");
        assert_eq!(buf.as_slice(), b"abcdef");
        assert_eq!(buf.snapshot().as_slice(), b"abcdef");

        buf.clear();
        assert!(buf.is_empty());
    }
}
