use crate::frame::Frame;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Label recorded when a frame produced no usable prediction.
pub const NO_SIGNAL_LABEL: &str = "no-signal";

/// Raw model output for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub probabilities: HashMap<String, f32>,
}

impl Prediction {
    #[must_use]
    pub fn new(label: impl Into<String>, probabilities: HashMap<String, f32>) -> Self {
        Self {
            label: label.into(),
            probabilities,
        }
    }

    /// Prediction whose distribution only holds the predicted label.
    #[must_use]
    pub fn single(label: impl Into<String>, confidence: f32) -> Self {
        let label = label.into();
        let probabilities = HashMap::from([(label.clone(), confidence)]);
        Self {
            label,
            probabilities,
        }
    }

    /// Probability mass the model assigned to its own label (0.0 when absent).
    #[must_use]
    pub fn confidence(&self) -> f32 {
        self.probabilities.get(&self.label).copied().unwrap_or(0.0)
    }
}

/// Why a frame could not be classified.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassificationError {
    #[error("No hand detected")]
    NoHandDetected,

    #[error("Preprocessing failed: {0}")]
    Preprocessing(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}

/// Outcome fed into the session: a label and the confidence behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    pub confidence: f32,
}

impl Classification {
    #[must_use]
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }

    /// The reserved result every classifier failure collapses into.
    #[must_use]
    pub fn no_signal() -> Self {
        Self::new(NO_SIGNAL_LABEL, 0.0)
    }

    #[must_use]
    pub fn is_no_signal(&self) -> bool {
        self.label == NO_SIGNAL_LABEL
    }
}

impl From<&Prediction> for Classification {
    fn from(prediction: &Prediction) -> Self {
        Self::new(prediction.label.clone(), prediction.confidence())
    }
}

/// Hand-pose classifier. Treated as a black box.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify a single frame.
    ///
    /// # Errors
    ///
    /// Returns a [`ClassificationError`] when no hand is found, the frame
    /// cannot be prepared for the model, or the model itself fails.
    async fn classify(&self, frame: &Frame) -> Result<Prediction, ClassificationError>;
}

/// Run `classifier` on `frame`, folding every failure into a no-signal result.
///
/// The error is returned alongside so callers can surface the reason.
pub async fn classify_frame(
    classifier: &dyn Classifier,
    frame: &Frame,
) -> (Classification, Option<ClassificationError>) {
    match classifier.classify(frame).await {
        Ok(prediction) => {
            log::debug!(
                "Frame {} classified as '{}' ({:.2})",
                frame.sequence,
                prediction.label,
                prediction.confidence()
            );
            (Classification::from(&prediction), None)
        }
        Err(e) => {
            log::debug!("Frame {} produced no signal: {e}", frame.sequence);
            (Classification::no_signal(), Some(e))
        }
    }
}
