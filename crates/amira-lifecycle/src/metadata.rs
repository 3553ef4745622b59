//! Sensitive per-recording metadata, sealed inside the blob.

use amira_core::types::{EmotionalCheckin, EmotionalShift};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::capture::AudioFormat;
use crate::error::LifecycleResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub duration_seconds: u32,
    pub format: AudioFormat,
    #[serde(default)]
    pub pre_checkin: Option<EmotionalCheckin>,
    #[serde(default)]
    pub post_checkin: Option<EmotionalCheckin>,
}

impl RecordingMetadata {
    pub fn shift(&self) -> Option<EmotionalShift> {
        match (&self.pre_checkin, &self.post_checkin) {
            (Some(pre), Some(post)) => Some(EmotionalShift::between(pre, post)),
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> LifecycleResult<Zeroizing<Vec<u8>>> {
        let bytes = serde_json::to_vec(self).map_err(anyhow::Error::from)?;
        Ok(Zeroizing::new(bytes))
    }

    pub fn from_bytes(bytes: &[u8]) -> LifecycleResult<Self> {
        Ok(serde_json::from_slice(bytes).map_err(anyhow::Error::from)?)
    }
}
