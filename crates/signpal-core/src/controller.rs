//! Session controller actor.
//!
//! One task owns the [`Session`]; everything else talks to it through a
//! [`SessionHandle`]. State changes go out as [`SessionEvent`]s and as the
//! latest [`SessionSnapshot`] on a watch channel.


use crate::{
    classifier::{Classification, Classifier},
    config::Settings,
    frame::FrameSource,
    poller::Poller,
    session::{AdvanceOutcome, Feedback, LetterStats, Session, SessionSnapshot, Verdict},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};
use uuid::Uuid;

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    Requested,
    /// The learner finished "Z"
    Completed,
    /// Too many consecutive polls without a camera frame
    FramesUnavailable,
}

/// Everything the presentation layer needs to render a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    Started {
        session_id: Uuid,
    },
    Feedback {
        target: char,
        label: String,
        confidence: f32,
        correct: bool,
    },
    NoSignal {
        reason: String,
    },
    Advanced {
        from: char,
        to: char,
    },
    AdvanceSkipped {
        letter: char,
    },
    Completed {
        session_id: Option<Uuid>,
        stats: Vec<LetterStats>,
    },
    Stopped {
        reason: StopReason,
    },
}

pub(crate) enum Command {
    Start(oneshot::Sender<Uuid>),
    Stop(oneshot::Sender<bool>),
    Submit {
        result: Classification,
        reason: Option<String>,
        reply: Option<oneshot::Sender<Feedback>>,
    },
    ConfirmAdvance {
        generation: u64,
        letter: char,
    },
    /// Sent by the poller spawned as `epoch` when it gives up on the camera
    FramesUnavailable {
        epoch: u64,
        missed: u32,
    },
}

/// Cloneable front door to the controller task.
///
/// The controller shuts down once every handle is dropped.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Start a session at "A", restarting if one is already running.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller task has exited.
    pub async fn start(&self) -> Result<Uuid> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start(reply)).await?;
        rx.await.context("Session controller dropped start request")
    }

    /// Stop the session and cancel any pending advance. Returns whether a
    /// session was running.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller task has exited.
    pub async fn stop(&self) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop(reply)).await?;
        rx.await.context("Session controller dropped stop request")
    }

    /// Feed one classification result and wait for the resulting feedback.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller task has exited.
    pub async fn submit_classification(&self, label: &str, confidence: f32) -> Result<Feedback> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit {
            result: Classification::new(label, confidence),
            reason: None,
            reply: Some(reply),
        })
        .await?;
        rx.await.context("Session controller dropped classification")
    }

    /// Latest published state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that wakes on every state change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!("Session controller is not running"))
    }
}

/// Owns the session, the polling task and pending confirmations.
pub struct SessionController {
    session: Session,
    settings: Settings,
    source: Arc<dyn FrameSource>,
    classifier: Arc<dyn Classifier>,
    commands: mpsc::WeakSender<Command>,
    events: broadcast::Sender<SessionEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
    poller: Option<(watch::Sender<bool>, JoinHandle<()>)>,
    poll_epoch: u64,
    pending: Vec<JoinHandle<()>>,
}

impl SessionController {
    /// Spawn the controller on the current tokio runtime.
    #[must_use]
    pub fn spawn(
        settings: Settings,
        source: Arc<dyn FrameSource>,
        classifier: Arc<dyn Classifier>,
    ) -> SessionHandle {
        let (controller, rx, handle) = Self::build(settings, source, classifier);
        tokio::spawn(controller.run(rx));
        handle
    }

    fn build(
        settings: Settings,
        source: Arc<dyn FrameSource>,
        classifier: Arc<dyn Classifier>,
    ) -> (Self, mpsc::Receiver<Command>, SessionHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let session = Session::new(settings.match_threshold);
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());

        let controller = Self {
            session,
            settings,
            source,
            classifier,
            commands: tx.downgrade(),
            events: events.clone(),
            snapshot: snapshot_tx,
            poller: None,
            poll_epoch: 0,
            pending: Vec::new(),
        };
        let handle = SessionHandle {
            commands: tx,
            events,
            snapshot: snapshot_rx,
        };
        (controller, rx, handle)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        log::debug!("Session controller started");
        while let Some(command) = rx.recv().await {
            self.handle(command);
            self.publish();
        }
        self.halt_polling();
        self.cancel_pending();
        log::debug!("Session controller stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                let session_id = self.start();
                self.publish();
                let _ = reply.send(session_id);
            }
            Command::Stop(reply) => {
                let was_active = self.stop(StopReason::Requested);
                self.publish();
                let _ = reply.send(was_active);
            }
            Command::Submit {
                result,
                reason,
                reply,
            } => {
                self.submit(&result, reason);
                self.publish();
                if let Some(reply) = reply {
                    let _ = reply.send(self.session.feedback());
                }
            }
            Command::ConfirmAdvance { generation, letter } => {
                match self.session.confirm_advance(generation, letter) {
                    AdvanceOutcome::Skipped => {
                        log::debug!(
                            "Skipping advance from '{letter}': state changed (active: {}, feedback: {:?}, target: '{}')",
                            self.session.is_active(),
                            self.session.feedback(),
                            self.session.target_letter()
                        );
                        self.emit(SessionEvent::AdvanceSkipped { letter });
                    }
                    outcome => self.on_advanced(outcome),
                }
            }
            Command::FramesUnavailable { epoch, missed } => {
                if epoch != self.poll_epoch {
                    log::debug!("Ignoring camera loss from retired poller {epoch}");
                    return;
                }
                log::warn!("No camera frame for {missed} consecutive polls, stopping session");
                self.stop(StopReason::FramesUnavailable);
            }
        }
    }

    fn start(&mut self) -> Uuid {
        self.cancel_pending();
        let session_id = self.session.start();
        log::info!("Learning session {session_id} started at 'A'");
        self.restart_polling();
        self.emit(SessionEvent::Started { session_id });
        session_id
    }

    fn stop(&mut self, reason: StopReason) -> bool {
        self.cancel_pending();
        self.halt_polling();
        let was_active = self.session.stop();
        if was_active {
            log::info!(
                "Learning session stopped at '{}' ({reason:?})",
                self.session.target_letter()
            );
            self.emit(SessionEvent::Stopped { reason });
        }
        was_active
    }

    fn submit(&mut self, result: &Classification, reason: Option<String>) {
        let target = self.session.target_letter();
        let verdict = self.session.submit(result);

        match verdict {
            Verdict::Ignored => return,
            Verdict::Correct { letter, generation } => {
                log::info!("Correct sign '{letter}' ({:.2})", result.confidence);
                self.schedule_confirmation(generation, letter);
            }
            Verdict::Incorrect => {
                log::debug!(
                    "Incorrect sign '{}' ({:.2}) for target '{target}'",
                    result.label,
                    result.confidence
                );
            }
        }

        if let Some(reason) = reason {
            self.emit(SessionEvent::NoSignal { reason });
        }
        self.emit(SessionEvent::Feedback {
            target,
            label: result.label.clone(),
            confidence: result.confidence,
            correct: matches!(verdict, Verdict::Correct { .. }),
        });
    }

    fn on_advanced(&mut self, outcome: AdvanceOutcome) {
        match outcome {
            AdvanceOutcome::Advanced { from, to } => {
                log::info!("Advancing from '{from}' to '{to}'");
                self.emit(SessionEvent::Advanced { from, to });
            }
            AdvanceOutcome::Completed => {
                log::info!("Alphabet complete");
                self.cancel_pending();
                self.halt_polling();
                self.emit(SessionEvent::Completed {
                    session_id: self.session.session_id(),
                    stats: self.session.stats().to_vec(),
                });
                self.emit(SessionEvent::Stopped {
                    reason: StopReason::Completed,
                });
            }
            AdvanceOutcome::Skipped => {}
        }
    }

    fn schedule_confirmation(&mut self, generation: u64, letter: char) {
        self.pending.retain(|task| !task.is_finished());
        let commands = self.commands.clone();
        let delay = self.settings.confirmation_delay();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = commands.upgrade() {
                let _ = tx
                    .send(Command::ConfirmAdvance { generation, letter })
                    .await;
            }
        });
        self.pending.push(task);
    }

    fn cancel_pending(&mut self) {
        for task in self.pending.drain(..) {
            task.abort();
        }
    }

    /// Replace any running poller with a fresh one under a new epoch.
    fn restart_polling(&mut self) {
        self.halt_polling();
        self.poll_epoch += 1;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let poller = Poller::new(
            self.source.clone(),
            self.classifier.clone(),
            self.commands.clone(),
            &self.settings,
            self.poll_epoch,
        );
        let task = tokio::spawn(poller.run(cancel_rx));
        self.poller = Some((cancel_tx, task));
    }

    fn halt_polling(&mut self) {
        if let Some((cancel, task)) = self.poller.take() {
            let _ = cancel.send(true);
            task.abort();
        }
    }

    /// Push the current state to watchers, skipping no-op updates.
    fn publish(&self) {
        let snapshot = self.session.snapshot();
        self.snapshot.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
