/// Learning session commands sent to the running daemon
use anyhow::{Context, Result};
use signpal_core::ipc::{IpcClient, IpcRequest, IpcResponse};
use std::path::Path;

async fn send(data_dir: &Path, request: IpcRequest) -> Result<IpcResponse> {
    let sock_path = data_dir.join("signpal.sock");
    if !sock_path.exists() {
        anyhow::bail!("Daemon is not running. Start it with `signpal start`.");
    }
    IpcClient::new(&sock_path)
        .send_command(request)
        .await
        .context("Daemon is not responding")
}

pub async fn start_learning(data_dir: &Path) -> Result<()> {
    match send(data_dir, IpcRequest::StartSession).await? {
        IpcResponse::SessionStarted { session_id } => {
            println!("Learning session started ({session_id}). Sign the letter A.");
            Ok(())
        }
        IpcResponse::Error(e) => anyhow::bail!("Daemon failed to start session: {e}"),
        other => anyhow::bail!("Unexpected response from daemon: {other:?}"),
    }
}

pub async fn stop_learning(data_dir: &Path) -> Result<()> {
    match send(data_dir, IpcRequest::StopSession).await? {
        IpcResponse::SessionStopped { was_active: true } => {
            println!("Learning session stopped.");
            Ok(())
        }
        IpcResponse::SessionStopped { was_active: false } => {
            println!("No learning session was running.");
            Ok(())
        }
        IpcResponse::Error(e) => anyhow::bail!("Daemon failed to stop session: {e}"),
        other => anyhow::bail!("Unexpected response from daemon: {other:?}"),
    }
}
