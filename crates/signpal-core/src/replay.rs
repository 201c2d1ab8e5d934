//! Recorded sessions played back as a frame source and classifier.
//!
//! A script is a JSON list of per-poll outcomes:
//!
//! ```json
//! { "frames": [
//!     { "label": "A", "confidence": 0.91 },
//!     { "error": "no_hand" },
//!     { "missing": true }
//!   ],
//!   "loop": false }
//! ```

use crate::{
    classifier::{ClassificationError, Classifier, Prediction},
    frame::{Frame, FrameSource},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{de, Deserialize, Deserializer, Serialize};
use std::{
    fs,
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayFailure {
    NoHand,
    Preprocessing,
    Inference,
}

/// One recorded poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplayEntry {
    Recognized {
        label: String,
        confidence: f32,
    },
    Failed {
        error: ReplayFailure,
        #[serde(default)]
        detail: Option<String>,
    },
    Missing {
        #[serde(deserialize_with = "only_true")]
        missing: bool,
    },
}

/// Accept only `true` for the missing-frame marker.
fn only_true<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    if bool::deserialize(deserializer)? {
        Ok(true)
    } else {
        Err(de::Error::custom("`missing` may only be true"))
    }
}

impl ReplayEntry {
    fn to_prediction(&self) -> Result<Prediction, ClassificationError> {
        match self {
            Self::Recognized { label, confidence } => Ok(Prediction::single(label, *confidence)),
            Self::Failed { error, detail } => {
                let detail = detail.clone().unwrap_or_default();
                Err(match error {
                    ReplayFailure::NoHand => ClassificationError::NoHandDetected,
                    ReplayFailure::Preprocessing => ClassificationError::Preprocessing(detail),
                    ReplayFailure::Inference => ClassificationError::Inference(detail),
                })
            }
            // Never handed to the classifier: no frame is produced.
            Self::Missing { .. } => Err(ClassificationError::Preprocessing(
                "missing frame has no pixels".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayScript {
    pub frames: Vec<ReplayEntry>,
    #[serde(default, rename = "loop")]
    pub looped: bool,
}

impl ReplayScript {
    /// Read a script from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid script.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay script {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid replay script {}", path.display()))
    }

    /// Parse a script from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON does not describe a replay script.
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Plays a [`ReplayScript`] back one entry per poll.
///
/// The same value serves as both [`FrameSource`] and [`Classifier`]: frames
/// carry their script position in `sequence`, which the classifier looks up.
#[derive(Debug)]
pub struct Replay {
    script: ReplayScript,
    cursor: AtomicUsize,
}

impl Replay {
    #[must_use]
    pub fn new(script: ReplayScript) -> Self {
        log::info!(
            "Loaded replay script with {} entries{}",
            script.frames.len(),
            if script.looped { " (looping)" } else { "" }
        );
        Self {
            script,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Entries handed out so far (including missing ones).
    #[must_use]
    pub fn consumed(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    /// True once a non-looping script has nothing left to play.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        !self.script.looped && self.consumed() >= self.script.frames.len()
    }

    fn next_index(&self) -> Option<usize> {
        let len = self.script.frames.len();
        if len == 0 {
            return None;
        }
        let position = self.cursor.fetch_add(1, Ordering::SeqCst);
        if self.script.looped {
            Some(position % len)
        } else if position < len {
            Some(position)
        } else {
            // Keep the cursor from creeping toward overflow on long runs.
            self.cursor.store(len, Ordering::SeqCst);
            None
        }
    }
}

#[async_trait]
impl FrameSource for Replay {
    async fn current_frame(&self) -> Option<Frame> {
        let index = self.next_index()?;
        match self.script.frames.get(index)? {
            ReplayEntry::Missing { .. } => None,
            _ => Some(Frame::empty(index as u64)),
        }
    }
}

#[async_trait]
impl Classifier for Replay {
    async fn classify(&self, frame: &Frame) -> Result<Prediction, ClassificationError> {
        let entry = usize::try_from(frame.sequence)
            .ok()
            .and_then(|i| self.script.frames.get(i))
            .ok_or_else(|| {
                ClassificationError::Inference(format!("no replay entry for frame {}", frame.sequence))
            })?;
        entry.to_prediction()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"{
        "frames": [
            { "label": "A", "confidence": 0.9 },
            { "missing": true },
            { "error": "no_hand" },
            { "error": "inference", "detail": "model crashed" }
        ]
    }"#;

    #[test]
    fn test_parse_all_entry_kinds() {
        let script = ReplayScript::parse(SCRIPT).unwrap();
        assert!(!script.looped);
        assert_eq!(
            script.frames,
            vec![
                ReplayEntry::Recognized {
                    label: "A".to_string(),
                    confidence: 0.9
                },
                ReplayEntry::Missing { missing: true },
                ReplayEntry::Failed {
                    error: ReplayFailure::NoHand,
                    detail: None
                },
                ReplayEntry::Failed {
                    error: ReplayFailure::Inference,
                    detail: Some("model crashed".to_string())
                },
            ]
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ReplayScript::parse("{}").is_err());
        assert!(ReplayScript::parse(r#"{"frames": [{"label": "A"}]}"#).is_err());
        assert!(ReplayScript::parse(r#"{"frames": [{"error": "gremlins"}]}"#).is_err());
        assert!(ReplayScript::parse(r#"{"frames": [{"missing": false}]}"#).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.json");
        fs::write(&path, SCRIPT).unwrap();
        assert_eq!(ReplayScript::load(&path).unwrap().frames.len(), 4);
        assert!(ReplayScript::load(&dir.path().join("absent.json")).is_err());
    }

    #[tokio::test]
    async fn test_playback_order() {
        let replay = Replay::new(ReplayScript::parse(SCRIPT).unwrap());

        let frame = replay.current_frame().await.unwrap();
        let prediction = replay.classify(&frame).await.unwrap();
        assert_eq!(prediction.label, "A");
        assert!((prediction.confidence() - 0.9).abs() < f32::EPSILON);

        assert!(replay.current_frame().await.is_none());

        let frame = replay.current_frame().await.unwrap();
        assert_eq!(
            replay.classify(&frame).await,
            Err(ClassificationError::NoHandDetected)
        );

        let frame = replay.current_frame().await.unwrap();
        assert_eq!(
            replay.classify(&frame).await,
            Err(ClassificationError::Inference("model crashed".to_string()))
        );

        assert!(replay.is_exhausted());
        assert!(replay.current_frame().await.is_none());
        assert!(replay.current_frame().await.is_none());
        assert_eq!(replay.consumed(), 4);
    }

    #[tokio::test]
    async fn test_looping_script_wraps() {
        let mut script = ReplayScript::parse(SCRIPT).unwrap();
        script.looped = true;
        let replay = Replay::new(script);

        for _ in 0..4 {
            let _ = replay.current_frame().await;
        }
        assert!(!replay.is_exhausted());
        let frame = replay.current_frame().await.unwrap();
        assert_eq!(frame.sequence, 0);
    }

    #[tokio::test]
    async fn test_empty_script_never_yields_frames() {
        let replay = Replay::new(ReplayScript::default());
        assert!(replay.current_frame().await.is_none());
        assert!(replay.is_exhausted());
    }
}
