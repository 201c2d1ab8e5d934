/// Daemon lifecycle management commands
use anyhow::{Context, Result};
use signpal_core::{
    config::{get_data_dir, Settings, DATA_DIR_ENV},
    ipc::{IpcClient, IpcRequest, IpcResponse},
    replay::ReplayScript,
    Daemon, SessionSnapshot,
};
use std::{
    env,
    fs::{self, OpenOptions},
    io,
    path::Path,
    process::{self, Command},
    time::Duration,
};
use sysinfo::{Pid, System};

const PID_FILE: &str = "signpal.pid";
const SOCKET_FILE: &str = "signpal.sock";
const LOG_FILE: &str = "signpal.log";
const EXIT_TIMEOUT: Duration = Duration::from_secs(5);
const EXIT_POLL: Duration = Duration::from_millis(100);

fn read_pid(pid_file: &Path) -> Option<usize> {
    fs::read_to_string(pid_file).ok()?.trim().parse().ok()
}

fn is_running(pid: usize) -> bool {
    System::new().refresh_process(Pid::from(pid))
}

fn kill(pid: usize) -> bool {
    let mut sys = System::new();
    sys.refresh_process(Pid::from(pid))
        && sys.process(Pid::from(pid)).is_some_and(sysinfo::Process::kill)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Poll until `pid` is gone. Returns false if it outlives `timeout`.
async fn wait_for_exit(pid: usize, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while is_running(pid) {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(EXIT_POLL).await;
    }
    true
}

pub fn start_daemon(data_dir: &Path) -> Result<()> {
    let pid_file = data_dir.join(PID_FILE);

    // The detached process has no terminal, so surface config problems here.
    let config_path = Settings::path_in(data_dir);
    let settings = Settings::load(&config_path)?;
    let Some(script_path) = settings.replay_script.as_deref() else {
        anyhow::bail!(
            "No frame source configured: set `replay_script` in {}",
            config_path.display()
        );
    };
    let script = ReplayScript::load(script_path)?;

    if let Some(pid) = read_pid(&pid_file) {
        if is_running(pid) {
            println!("Daemon is already running (PID {pid}).");
            return Ok(());
        }
        log::warn!("Removing stale PID file for {pid}.");
    }
    remove_if_exists(&pid_file)?;
    remove_if_exists(&data_dir.join(SOCKET_FILE))?;
    fs::create_dir_all(data_dir)?;

    let child = Command::new(env::current_exe()?)
        .arg("daemon-internal-start")
        .env(DATA_DIR_ENV, data_dir)
        .current_dir(env::current_dir()?)
        .spawn()
        .context("Failed to spawn daemon process")?;
    fs::write(&pid_file, child.id().to_string())?;

    println!(
        "SignPal daemon started (PID {}), replaying {} ({} entries).",
        child.id(),
        script_path.display(),
        script.frames.len()
    );
    Ok(())
}

pub async fn run_daemon_process() -> Result<()> {
    let data_dir = get_data_dir()?;
    setup_daemon_logging(&data_dir)?;
    log::info!("Daemon process {} started", process::id());

    let result = async {
        let settings = Settings::load_default()?;
        let mut daemon = Daemon::from_settings(settings)?;
        daemon.run_on(data_dir.join(SOCKET_FILE)).await
    }
    .await;

    if let Err(e) = &result {
        log::error!("Daemon exited with a fatal error: {e:#}");
    }
    result
}

pub async fn stop_daemon(data_dir: &Path) -> Result<()> {
    let pid_file = data_dir.join(PID_FILE);
    let sock_path = data_dir.join(SOCKET_FILE);

    let Some(pid) = read_pid(&pid_file) else {
        println!("Daemon is not running.");
        remove_if_exists(&pid_file)?;
        remove_if_exists(&sock_path)?;
        return Ok(());
    };

    let client = IpcClient::new(&sock_path);
    if let Ok(IpcResponse::Status { session, .. }) = client.send_command(IpcRequest::Status).await
    {
        if session.active {
            println!(
                "Ending learning session at '{}' ({}/26).",
                session.target_letter,
                session.current_index + 1
            );
        }
    }

    let exited = match client.send_command(IpcRequest::Shutdown).await {
        Ok(IpcResponse::Shutdown) => wait_for_exit(pid, EXIT_TIMEOUT).await,
        Ok(other) => {
            log::error!("Unexpected response to shutdown: {other:?}");
            false
        }
        Err(e) => {
            log::warn!("Daemon did not accept shutdown: {e:#}");
            false
        }
    };
    if !exited && is_running(pid) {
        log::warn!("Daemon (PID {pid}) is still running, killing it.");
        if !kill(pid) {
            anyhow::bail!("Failed to kill daemon process {pid}");
        }
    }

    remove_if_exists(&pid_file)?;
    remove_if_exists(&sock_path)?;
    println!("Daemon stopped.");
    Ok(())
}

pub async fn show_status(data_dir: &Path) -> Result<()> {
    let sock_path = data_dir.join(SOCKET_FILE);
    if !sock_path.exists() {
        println!("Daemon: not running");
        return Ok(());
    }

    match IpcClient::new(&sock_path)
        .send_command(IpcRequest::Status)
        .await
    {
        Ok(IpcResponse::Status {
            running,
            uptime_seconds,
            session,
        }) => {
            let state = if running { "running" } else { "shutting down" };
            let pid = read_pid(&data_dir.join(PID_FILE))
                .map(|pid| format!("PID {pid}, "))
                .unwrap_or_default();
            println!("Daemon: {state} ({pid}up {})", format_uptime(uptime_seconds));
            println!("{}", describe_session(&session));
        }
        Ok(other) => anyhow::bail!("Unexpected response from daemon: {other:?}"),
        Err(e) => {
            log::debug!("Status request failed: {e:#}");
            println!("Daemon: not responding (stale socket at {})", sock_path.display());
        }
    }
    Ok(())
}

fn format_uptime(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

/// Human-readable summary of a session snapshot.
pub fn describe_session(session: &SessionSnapshot) -> String {
    if !session.active {
        return "Learning Session: Inactive".to_string();
    }
    let feedback = match (session.feedback_visible, session.feedback_correct) {
        (false, _) => "Waiting for sign",
        (true, true) => "Correct!",
        (true, false) => "Try again",
    };
    let last = match (&session.last_label, session.last_confidence) {
        (Some(label), Some(confidence)) => format!("{label} ({confidence:.2})"),
        _ => "None".to_string(),
    };
    format!(
        "Learning Session: Active\n  Target: {} ({}/26)\n  Feedback: {feedback}\n  Last sign: {last}",
        session.target_letter,
        session.current_index + 1
    )
}

/// Send daemon logs to `<data_dir>/signpal.log`, with session detail at debug.
fn setup_daemon_logging(data_dir: &Path) -> Result<()> {
    fs::create_dir_all(data_dir)?;
    let log_path = data_dir.join(LOG_FILE);
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Cannot open daemon log {}", log_path.display()))?;

    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("signpal_core", log::LevelFilter::Debug)
        .parse_default_env()
        .format_timestamp_millis()
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .try_init()?;
    Ok(())
}
