use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A single captured camera frame.
///
/// Pixel layout is whatever the capturing platform hands over; the engine
/// only moves frames from the source to the classifier.
#[derive(Debug, Clone)]
pub struct Frame {
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u8]>,
}

impl Frame {
    #[must_use]
    pub fn new(sequence: u64, width: u32, height: u32, pixels: Arc<[u8]>) -> Self {
        Self {
            sequence,
            captured_at: Utc::now(),
            width,
            height,
            pixels,
        }
    }

    /// Frame without pixel data, for sources that carry their payload elsewhere.
    #[must_use]
    pub fn empty(sequence: u64) -> Self {
        Self::new(sequence, 0, 0, Arc::from(Vec::new()))
    }
}

/// Live frame provider (camera pipeline, replay file, ...).
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Most recent frame, or `None` if nothing is available right now.
    /// Must not block waiting for the camera.
    async fn current_frame(&self) -> Option<Frame>;
}
