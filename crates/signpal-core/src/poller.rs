use crate::{
    classifier::{classify_frame, Classifier},
    config::Settings,
    controller::Command,
    frame::FrameSource,
};
use std::{ops::ControlFlow, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    time::{interval, MissedTickBehavior},
};

/// Fixed-interval frame poller feeding the session controller.
pub(crate) struct Poller {
    source: Arc<dyn FrameSource>,
    classifier: Arc<dyn Classifier>,
    commands: mpsc::WeakSender<Command>,
    interval: Duration,
    max_missed_frames: Option<u32>,
    warn_every: u32,
    epoch: u64,
    missed: u32,
}

impl Poller {
    pub(crate) fn new(
        source: Arc<dyn FrameSource>,
        classifier: Arc<dyn Classifier>,
        commands: mpsc::WeakSender<Command>,
        settings: &Settings,
        epoch: u64,
    ) -> Self {
        Self {
            source,
            classifier,
            commands,
            interval: settings.poll_interval(),
            max_missed_frames: settings.max_missed_frames,
            warn_every: settings.missed_frame_warn_every,
            epoch,
            missed: 0,
        }
    }

    /// Poll until `cancel` flips to true, the controller goes away, or the
    /// missed-frame limit is hit.
    pub(crate) async fn run(mut self, mut cancel: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        // A slow classifier pushes the next poll back instead of bursting.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick resolves immediately; the first poll happens one interval in.
        ticker.tick().await;
        log::debug!("Polling started ({:?} interval)", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.poll_once().await.is_break() {
                        break;
                    }
                }
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
            }
        }
        log::debug!("Polling stopped");
    }

    async fn poll_once(&mut self) -> ControlFlow<()> {
        let Some(frame) = self.source.current_frame().await else {
            return self.on_missing_frame().await;
        };
        self.missed = 0;

        let (result, error) = classify_frame(self.classifier.as_ref(), &frame).await;
        let command = Command::Submit {
            result,
            reason: error.map(|e| e.to_string()),
            reply: None,
        };
        self.send(command).await
    }

    async fn on_missing_frame(&mut self) -> ControlFlow<()> {
        self.missed = self.missed.saturating_add(1);

        if let Some(max) = self.max_missed_frames {
            if self.missed > max {
                let _ = self
                    .send(Command::FramesUnavailable {
                        epoch: self.epoch,
                        missed: self.missed,
                    })
                    .await;
                return ControlFlow::Break(());
            }
        }

        if self.warn_due() {
            log::warn!(
                "No frame available for {} consecutive polls, still retrying",
                self.missed
            );
        } else {
            log::debug!("No frame available, retrying");
        }
        ControlFlow::Continue(())
    }

    /// Whether the current miss streak has reached a warning boundary.
    fn warn_due(&self) -> bool {
        self.warn_every > 0 && self.missed % self.warn_every == 0
    }

    async fn send(&self, command: Command) -> ControlFlow<()> {
        let Some(tx) = self.commands.upgrade() else {
            return ControlFlow::Break(());
        };
        if tx.send(command).await.is_err() {
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }
}
