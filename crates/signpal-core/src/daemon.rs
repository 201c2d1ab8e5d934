use crate::{
    classifier::Classifier,
    config::Settings,
    controller::{SessionController, SessionEvent, SessionHandle},
    frame::FrameSource,
    ipc::{listen, DaemonIpcHandler},
    replay::{Replay, ReplayScript},
};
use anyhow::{Context, Result};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::broadcast, time::interval};

pub struct Daemon {
    session: SessionHandle,
    ipc_handler: Arc<DaemonIpcHandler>,
    shutdown_signal: Arc<AtomicBool>,
    tick_interval: Duration,
}

impl Daemon {
    /// Host a session controller over the given collaborators.
    #[must_use]
    pub fn new(
        settings: Settings,
        source: Arc<dyn FrameSource>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        let shutdown_signal = Arc::new(AtomicBool::new(false));
        let session = SessionController::spawn(settings, source, classifier);

        Self {
            ipc_handler: Arc::new(DaemonIpcHandler::new(
                session.clone(),
                shutdown_signal.clone(),
            )),
            session,
            shutdown_signal,
            tick_interval: Duration::from_secs(1),
        }
    }

    /// Daemon fed by the replay script named in `settings`.
    ///
    /// # Errors
    ///
    /// Returns an error if no script is configured or it cannot be loaded.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let path = settings
            .replay_script
            .clone()
            .context("No frame source configured: set `replay_script` in config.toml")?;
        let replay = Arc::new(Replay::new(ReplayScript::load(&path)?));
        Ok(Self::new(settings, replay.clone(), replay))
    }

    #[must_use]
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Serve IPC on `sock_path` until Ctrl-C or a shutdown request.
    ///
    /// # Errors
    ///
    /// Returns an error if stopping the session on shutdown fails.
    pub async fn run_on(&mut self, sock_path: PathBuf) -> Result<()> {
        let ipc_handler = self.ipc_handler.clone();
        tokio::spawn(async move {
            if let Err(e) = listen(ipc_handler, &sock_path).await {
                log::error!("IPC listener failed: {e}");
            }
        });
        tokio::spawn(log_events(self.session.subscribe()));

        let mut interval = interval(self.tick_interval);
        log::info!("Daemon started with signal handling and IPC");

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Received Ctrl-C, shutting down...");
                    self.shutdown_signal.store(true, Ordering::SeqCst);
                }
            }

            if self.shutdown_signal.load(Ordering::SeqCst) {
                break;
            }
        }

        let last = self.session.snapshot();
        if self.session.stop().await? {
            log::info!(
                "Ended learning session {} at '{}' ({}/26) on shutdown",
                last.session_id.map(|id| id.to_string()).unwrap_or_default(),
                last.target_letter,
                last.current_index + 1
            );
        }
        log::info!("Daemon shut down gracefully.");
        Ok(())
    }
}

async fn log_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Started { session_id }) => {
                log::info!("Session {session_id} started");
            }
            Ok(SessionEvent::Feedback {
                target,
                label,
                confidence,
                correct,
            }) => {
                log::debug!(
                    "Target '{target}': saw '{label}' ({confidence:.2}) -> {}",
                    if correct { "correct" } else { "try again" }
                );
            }
            Ok(SessionEvent::NoSignal { reason }) => log::debug!("No signal: {reason}"),
            Ok(SessionEvent::Advanced { from, to }) => log::info!("'{from}' done, next '{to}'"),
            Ok(SessionEvent::AdvanceSkipped { letter }) => {
                log::debug!("Advance from '{letter}' skipped");
            }
            Ok(SessionEvent::Completed { session_id, .. }) => {
                log::info!("Session {session_id:?} completed the alphabet");
            }
            Ok(SessionEvent::Stopped { reason }) => log::info!("Session stopped ({reason:?})"),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                log::warn!("Event logger lagged, {n} events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
