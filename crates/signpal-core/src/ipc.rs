//! Daemon control channel.
//!
//! Each connection carries one request and one reply, each sent as a
//! big-endian `u32` length followed by a bincode payload.

use crate::{controller::SessionHandle, session::SessionSnapshot};
use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
};

const MAX_MESSAGE_BYTES: u32 = 64 * 1024;
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// IPC request from CLI to daemon
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub enum IpcRequest {
    Status,
    StartSession,
    StopSession,
    Shutdown,
}

/// IPC response from daemon to CLI
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub enum IpcResponse {
    Status {
        running: bool,
        uptime_seconds: u64,
        session: SessionSnapshot,
    },
    SessionStarted {
        session_id: uuid::Uuid,
    },
    SessionStopped {
        was_active: bool,
    },
    Shutdown,
    Error(String),
}

#[derive(Debug)]
pub struct IpcClient {
    sock_path: PathBuf,
}

impl IpcClient {
    #[must_use]
    pub fn new(sock_path: &Path) -> Self {
        Self {
            sock_path: sock_path.to_path_buf(),
        }
    }

    /// Send one request and wait for the reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon socket is unreachable, the daemon does
    /// not answer within five seconds, or the reply cannot be decoded.
    pub async fn send_command(&self, request: IpcRequest) -> Result<IpcResponse> {
        let exchange = async {
            let mut stream = UnixStream::connect(&self.sock_path)
                .await
                .with_context(|| format!("Cannot connect to {}", self.sock_path.display()))?;
            write_message(&mut stream, &request).await?;
            read_message::<IpcResponse>(&mut stream).await
        };
        tokio::time::timeout(REPLY_TIMEOUT, exchange)
            .await
            .context("Daemon did not reply in time")?
    }
}

async fn write_message<T: Serialize>(stream: &mut UnixStream, message: &T) -> Result<()> {
    let payload = bincode::serialize(message)?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|&len| len <= MAX_MESSAGE_BYTES)
        .with_context(|| format!("IPC message of {} bytes is too large", payload.len()))?;
    stream.write_u32(len).await?;
    stream.write_all(&payload).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_message<T: DeserializeOwned>(stream: &mut UnixStream) -> Result<T> {
    let len = stream.read_u32().await.context("Peer closed before sending")?;
    if len > MAX_MESSAGE_BYTES {
        anyhow::bail!("IPC message of {len} bytes exceeds the {MAX_MESSAGE_BYTES} byte limit");
    }
    let mut payload = vec![0; usize::try_from(len)?];
    stream.read_exact(&mut payload).await?;
    Ok(bincode::deserialize(&payload)?)
}

pub struct DaemonIpcHandler {
    session: SessionHandle,
    started_at: chrono::DateTime<chrono::Utc>,
    shutdown_signal: Arc<AtomicBool>,
}

impl DaemonIpcHandler {
    #[must_use]
    pub fn new(session: SessionHandle, shutdown_signal: Arc<AtomicBool>) -> Self {
        Self {
            session,
            started_at: chrono::Utc::now(),
            shutdown_signal,
        }
    }

    /// Answer a request against the live session.
    pub async fn respond(&self, request: IpcRequest) -> IpcResponse {
        match request {
            IpcRequest::Status => {
                let uptime = chrono::Utc::now().signed_duration_since(self.started_at);
                IpcResponse::Status {
                    running: !self.shutdown_signal.load(Ordering::SeqCst),
                    uptime_seconds: u64::try_from(uptime.num_seconds()).unwrap_or(0),
                    session: self.session.snapshot(),
                }
            }
            IpcRequest::StartSession => match self.session.start().await {
                Ok(session_id) => IpcResponse::SessionStarted { session_id },
                Err(e) => IpcResponse::Error(e.to_string()),
            },
            IpcRequest::StopSession => match self.session.stop().await {
                Ok(was_active) => IpcResponse::SessionStopped { was_active },
                Err(e) => IpcResponse::Error(e.to_string()),
            },
            IpcRequest::Shutdown => {
                self.shutdown_signal.store(true, Ordering::SeqCst);
                IpcResponse::Shutdown
            }
        }
    }

    /// Read one request from `stream`, answer it and send the reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be read or the reply cannot
    /// be written.
    pub async fn serve(&self, mut stream: UnixStream) -> Result<()> {
        let request: IpcRequest = read_message(&mut stream).await?;
        log::debug!("IPC request: {request:?}");
        let response = self.respond(request).await;
        if let IpcResponse::Error(e) = &response {
            log::warn!("IPC request failed: {e}");
        }
        write_message(&mut stream, &response).await
    }
}

/// Accept connections on `sock_path` forever, one task per client.
///
/// # Errors
///
/// Returns an error if a stale socket cannot be removed or the socket cannot be bound.
pub async fn listen(handler: Arc<DaemonIpcHandler>, sock_path: &Path) -> io::Result<()> {
    if sock_path.exists() {
        fs::remove_file(sock_path)?;
    }
    let listener = UnixListener::bind(sock_path)?;
    log::info!("Accepting control connections on {}", sock_path.display());

    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(e) => {
                log::error!("IPC accept error: {e}");
                continue;
            }
        };
        let handler = handler.clone();
        tokio::spawn(async move {
            if let Err(e) = handler.serve(stream).await {
                log::warn!("IPC connection dropped: {e:#}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Settings,
        controller::SessionController,
        replay::{Replay, ReplayScript},
    };

    fn handler() -> Arc<DaemonIpcHandler> {
        let replay = Arc::new(Replay::new(ReplayScript::default()));
        let session = SessionController::spawn(Settings::default(), replay.clone(), replay);
        Arc::new(DaemonIpcHandler::new(
            session,
            Arc::new(AtomicBool::new(false)),
        ))
    }

    #[tokio::test]
    async fn test_start_stop_and_status() {
        let handler = handler();

        let IpcResponse::Status { running, session, .. } =
            handler.respond(IpcRequest::Status).await
        else {
            panic!("expected status");
        };
        assert!(running);
        assert!(!session.active);

        let IpcResponse::SessionStarted { session_id } =
            handler.respond(IpcRequest::StartSession).await
        else {
            panic!("expected session start");
        };

        let IpcResponse::Status { session, .. } = handler.respond(IpcRequest::Status).await else {
            panic!("expected status");
        };
        assert!(session.active);
        assert_eq!(session.session_id, Some(session_id));
        assert_eq!(session.target_letter, 'A');

        assert_eq!(
            handler.respond(IpcRequest::StopSession).await,
            IpcResponse::SessionStopped { was_active: true }
        );
        assert_eq!(
            handler.respond(IpcRequest::StopSession).await,
            IpcResponse::SessionStopped { was_active: false }
        );
    }

    #[tokio::test]
    async fn test_shutdown_sets_signal() {
        let signal = Arc::new(AtomicBool::new(false));
        let replay = Arc::new(Replay::new(ReplayScript::default()));
        let session = SessionController::spawn(Settings::default(), replay.clone(), replay);
        let handler = DaemonIpcHandler::new(session, signal.clone());

        assert_eq!(
            handler.respond(IpcRequest::Shutdown).await,
            IpcResponse::Shutdown
        );
        assert!(signal.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_socket_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let sock_path = dir.path().join("signpal.sock");
        let handler = handler();

        let listen_path = sock_path.clone();
        tokio::spawn(async move {
            let _ = listen(handler, &listen_path).await;
        });
        for _ in 0..100 {
            if sock_path.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let client = IpcClient::new(&sock_path);
        let response = client.send_command(IpcRequest::StartSession).await.unwrap();
        assert!(matches!(response, IpcResponse::SessionStarted { .. }));

        let response = client.send_command(IpcRequest::Status).await.unwrap();
        let IpcResponse::Status { session, .. } = response else {
            panic!("expected status, got {response:?}");
        };
        assert!(session.active);
    }

    #[tokio::test]
    async fn test_serve_answers_framed_request() {
        let handler = handler();
        let (mut client, server) = UnixStream::pair().unwrap();
        let serving = tokio::spawn(async move { handler.serve(server).await });

        write_message(&mut client, &IpcRequest::StopSession)
            .await
            .unwrap();
        let response: IpcResponse = read_message(&mut client).await.unwrap();
        assert_eq!(response, IpcResponse::SessionStopped { was_active: false });
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_oversized_message_is_rejected() {
        let (mut client, mut server) = UnixStream::pair().unwrap();
        client.write_u32(MAX_MESSAGE_BYTES + 1).await.unwrap();
        let err = read_message::<IpcRequest>(&mut server).await.unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[tokio::test]
    async fn test_client_reports_missing_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let client = IpcClient::new(&dir.path().join("absent.sock"));
        let err = client.send_command(IpcRequest::Status).await.unwrap_err();
        assert!(err.to_string().contains("Cannot connect"));
    }
}
