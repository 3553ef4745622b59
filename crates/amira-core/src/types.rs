use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AmiraError;

/// Non-secret metadata for one voice journal entry.
///
/// Points at the encrypted blob but never carries emotional content; the
/// check-ins travel sealed inside the blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub id: String,
    pub user_id: String,
    /// User-chosen title (optional, not considered sensitive)
    #[serde(default)]
    pub title: Option<String>,
    pub duration_seconds: u32,
    /// Unix timestamp (seconds) when the recording was finalized
    pub created_at: u64,
    #[serde(default)]
    pub is_favorite: bool,
    /// Flips true only after the server acknowledges durable storage
    #[serde(default)]
    pub is_uploaded: bool,
    /// Tombstone set on user-initiated deletion
    #[serde(default)]
    pub is_deleted: bool,
    /// Local blob file name (or remote key once uploaded)
    pub storage_reference: String,
}

/// Emotions offered by the check-in picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmotionType {
    Joy,
    Sadness,
    Anger,
    Fear,
    Disgust,
    Surprise,
    Trust,
    Anticipation,
    Gratitude,
    Contentment,
    Anxiety,
    Frustration,
    Overwhelm,
    Calm,
    Hope,
    Loneliness,
}

impl EmotionType {
    pub const ALL: [EmotionType; 16] = [
        EmotionType::Joy,
        EmotionType::Sadness,
        EmotionType::Anger,
        EmotionType::Fear,
        EmotionType::Disgust,
        EmotionType::Surprise,
        EmotionType::Trust,
        EmotionType::Anticipation,
        EmotionType::Gratitude,
        EmotionType::Contentment,
        EmotionType::Anxiety,
        EmotionType::Frustration,
        EmotionType::Overwhelm,
        EmotionType::Calm,
        EmotionType::Hope,
        EmotionType::Loneliness,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EmotionType::Joy => "joy",
            EmotionType::Sadness => "sadness",
            EmotionType::Anger => "anger",
            EmotionType::Fear => "fear",
            EmotionType::Disgust => "disgust",
            EmotionType::Surprise => "surprise",
            EmotionType::Trust => "trust",
            EmotionType::Anticipation => "anticipation",
            EmotionType::Gratitude => "gratitude",
            EmotionType::Contentment => "contentment",
            EmotionType::Anxiety => "anxiety",
            EmotionType::Frustration => "frustration",
            EmotionType::Overwhelm => "overwhelm",
            EmotionType::Calm => "calm",
            EmotionType::Hope => "hope",
            EmotionType::Loneliness => "loneliness",
        }
    }
}

impl fmt::Display for EmotionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EmotionType {
    type Err = AmiraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        EmotionType::ALL
            .iter()
            .copied()
            .find(|e| e.name() == wanted)
            .ok_or_else(|| AmiraError::UnknownEmotion(s.to_string()))
    }
}

/// When a check-in was taken relative to a journaling session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckinContext {
    PreJournaling,
    PostJournaling,
    Standalone,
}

/// Lowest and highest accepted check-in intensity
pub const MIN_INTENSITY: u8 = 1;
pub const MAX_INTENSITY: u8 = 10;

/// An emotion check-in. Sensitive: only ever stored inside sealed metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmotionalCheckin {
    pub emotion: EmotionType,
    pub intensity: u8,
    pub context: CheckinContext,
    #[serde(default)]
    pub notes: Option<String>,
}

impl EmotionalCheckin {
    pub fn new(emotion: EmotionType, intensity: u8, context: CheckinContext) -> Result<Self, AmiraError> {
        if !(MIN_INTENSITY..=MAX_INTENSITY).contains(&intensity) {
            return Err(AmiraError::InvalidCheckin(format!(
                "intensity {intensity} outside {MIN_INTENSITY}..={MAX_INTENSITY}"
            )));
        }
        Ok(Self {
            emotion,
            intensity,
            context,
            notes: None,
        })
    }

    /// Parse the CLI form `EMOTION:INTENSITY`, e.g. `joy:4`.
    pub fn parse(input: &str, context: CheckinContext) -> Result<Self, AmiraError> {
        let (emotion, intensity) = input
            .split_once(':')
            .ok_or_else(|| AmiraError::InvalidCheckin(format!("expected EMOTION:INTENSITY, got {input:?}")))?;
        let intensity: u8 = intensity
            .trim()
            .parse()
            .map_err(|_| AmiraError::InvalidCheckin(format!("bad intensity in {input:?}")))?;
        Self::new(emotion.parse()?, intensity, context)
    }
}

/// Change between the pre- and post-journaling check-ins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmotionalShift {
    pub from: EmotionType,
    pub to: EmotionType,
    /// Post intensity minus pre intensity
    pub intensity_change: i8,
}

impl EmotionalShift {
    pub fn between(pre: &EmotionalCheckin, post: &EmotionalCheckin) -> Self {
        Self {
            from: pre.emotion,
            to: post.emotion,
            intensity_change: post.intensity as i8 - pre.intensity as i8,
        }
    }

    pub fn emotion_changed(&self) -> bool {
        self.from != self.to
    }
}

/// Kinds of content the tool library serves. The encryption layer only ever
/// sees opaque bytes; this tag stays outside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentKind {
    Text { body: String },
    Audio { duration_seconds: u32 },
    Video { duration_seconds: u32 },
    Interactive { steps: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emotion_parse_case_insensitive() {
        assert_eq!("Joy".parse::<EmotionType>().unwrap(), EmotionType::Joy);
        assert_eq!(" calm ".parse::<EmotionType>().unwrap(), EmotionType::Calm);
        assert!("ennui".parse::<EmotionType>().is_err());
    }

    #[test]
    fn test_emotion_names_roundtrip() {
        for e in EmotionType::ALL {
            assert_eq!(e.name().parse::<EmotionType>().unwrap(), e);
        }
    }

    #[test]
    fn test_checkin_intensity_bounds() {
        assert!(EmotionalCheckin::new(EmotionType::Joy, 0, CheckinContext::Standalone).is_err());
        assert!(EmotionalCheckin::new(EmotionType::Joy, 11, CheckinContext::Standalone).is_err());
        assert!(EmotionalCheckin::new(EmotionType::Joy, 10, CheckinContext::Standalone).is_ok());
    }

    #[test]
    fn test_checkin_parse() {
        let c = EmotionalCheckin::parse("joy:4", CheckinContext::PreJournaling).unwrap();
        assert_eq!(c.emotion, EmotionType::Joy);
        assert_eq!(c.intensity, 4);

        assert!(EmotionalCheckin::parse("joy", CheckinContext::PreJournaling).is_err());
        assert!(EmotionalCheckin::parse("joy:x", CheckinContext::PreJournaling).is_err());
    }

    #[test]
    fn test_emotional_shift() {
        let pre = EmotionalCheckin::new(EmotionType::Joy, 4, CheckinContext::PreJournaling).unwrap();
        let post = EmotionalCheckin::new(EmotionType::Calm, 7, CheckinContext::PostJournaling).unwrap();
        let shift = EmotionalShift::between(&pre, &post);

        assert_eq!(shift.intensity_change, 3);
        assert!(shift.emotion_changed());
    }

    #[test]
    fn test_emotion_serde_uppercase() {
        let json = serde_json_like(EmotionType::Loneliness);
        assert_eq!(json, "\"LONELINESS\"");
    }

    fn serde_json_like(e: EmotionType) -> String {
        // toml cannot serialize a bare enum; wrap it in a table
        #[derive(Serialize)]
        struct W {
            e: EmotionType,
        }
        let s = toml::to_string(&W { e }).unwrap();
        s.trim().trim_start_matches("e = ").to_string()
    }

    #[test]
    fn test_journal_record_defaults() {
        #[derive(Deserialize)]
        struct W {
            r: JournalRecord,
        }
        let w: W = toml::from_str(
            r#"
[r]
id = "abc"
user_id = "u1"
duration_seconds = 5
created_at = 1700000000
storage_reference = "abc.amrb"
"#,
        )
        .unwrap();
        assert!(!w.r.is_uploaded);
        assert!(!w.r.is_deleted);
        assert_eq!(w.r.title, None);
    }
}
