pub mod alphabet;
pub mod classifier;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod frame;
pub mod ipc;
mod poller;
pub mod replay;
pub mod session;

pub use classifier::{Classification, ClassificationError, Classifier, Prediction};
pub use controller::{SessionController, SessionEvent, SessionHandle, StopReason};
pub use daemon::Daemon;
pub use frame::{Frame, FrameSource};
pub use session::{Feedback, LetterStats, SessionSnapshot};
