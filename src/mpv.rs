use std::fs;
use std::io::Write;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use rand::{distributions::Alphanumeric, Rng};
use serde_json::json;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::model::MediaSource;
use crate::player::{PlayerBackend, PlayerInstance};

const IPC_RETRIES: usize = 20;
const IPC_RETRY_DELAY: Duration = Duration::from_millis(50);
const QUIT_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct MpvOptions {
    pub mpv_path: String,
    pub fullscreen: bool,
    pub user_agent: String,
    pub referer: Option<String>,
    pub extra_args: Vec<String>,
}

impl Default for MpvOptions {
    fn default() -> Self {
        Self {
            mpv_path: "mpv".into(),
            fullscreen: false,
            user_agent: String::new(),
            referer: None,
            extra_args: Vec::new(),
        }
    }
}

/// Runs every item in one long-lived mpv process. The first item starts
/// the process; later items are sent over the JSON IPC socket with
/// `loadfile ... replace`.
pub struct MpvBackend {
    options: MpvOptions,
}

impl MpvBackend {
    pub fn new(options: MpvOptions) -> Self {
        Self { options }
    }

    fn args(&self, media: &MediaSource, ipc_path: Option<&str>) -> Vec<String> {
        let mut args = vec![media.url.clone()];
        if self.options.fullscreen {
            args.push("--fullscreen".to_string());
        }
        args.push("--force-window=yes".to_string());
        args.push("--idle=yes".to_string());
        args.push("--keep-open=no".to_string());
        args.push("--loop-file=inf".to_string());
        args.push("--really-quiet".to_string());
        args.push("--terminal=no".to_string());
        args.push("--ytdl=no".to_string());
        if let Some(path) = ipc_path {
            args.push(format!("--input-ipc-server={path}"));
        }
        if !media.label.is_empty() {
            args.push(format!("--force-media-title={}", media.label));
        }
        if !self.options.user_agent.trim().is_empty() {
            args.push(format!(
                "--http-header-fields-append=User-Agent: {}",
                self.options.user_agent.trim()
            ));
        }
        if let Some(referer) = self.options.referer.as_deref() {
            if !referer.trim().is_empty() {
                args.push(format!("--http-header-fields-append=Referer: {}", referer.trim()));
            }
        }
        args.extend(self.options.extra_args.iter().cloned());
        args
    }
}

impl PlayerBackend for MpvBackend {
    fn create(&mut self, media: &MediaSource) -> Result<Box<dyn PlayerInstance>> {
        if media.url.trim().is_empty() {
            return Err(anyhow!("video URL missing"));
        }

        let ipc_path = unique_ipc_path();
        if let Some(path) = &ipc_path {
            cleanup_ipc_path(path);
        }
        let args = self.args(media, ipc_path.as_deref());
        tracing::debug!(mpv = %self.options.mpv_path, ?args, "spawning mpv");

        let mut command = Command::new(&self.options.mpv_path);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let child = command
            .spawn()
            .with_context(|| format!("launch mpv to play {}", media.url))?;

        Ok(Box::new(MpvInstance { child, ipc_path }))
    }
}

pub struct MpvInstance {
    child: Child,
    ipc_path: Option<String>,
}

impl MpvInstance {
    fn send(&self, payload: serde_json::Value) -> Result<()> {
        let Some(path) = &self.ipc_path else {
            return Err(anyhow!("mpv IPC is not supported on this platform"));
        };
        let serialized = serde_json::to_string(&payload).context("serialize mpv command")?;
        send_ipc_command(path, &serialized)
    }
}

impl PlayerInstance for MpvInstance {
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn retarget(&mut self, media: &MediaSource) -> Result<()> {
        if !self.is_alive() {
            return Err(anyhow!("mpv exited"));
        }
        self.send(json!({ "command": ["loadfile", media.url, "replace"] }))?;
        if !media.label.is_empty() {
            self.send(json!({
                "command": ["set_property", "force-media-title", media.label]
            }))?;
        }
        self.send(json!({ "command": ["set_property", "pause", false] }))
    }

    fn stop(&mut self) -> Result<()> {
        // With --idle=yes mpv stays up after `stop`, ready for `loadfile`.
        self.send(json!({ "command": ["stop"] }))
    }

    fn release(mut self: Box<Self>) -> Result<()> {
        if self.is_alive() {
            if let Err(err) = self.send(json!({ "command": ["quit"] })) {
                tracing::debug!(error = %err, "mpv quit command failed");
            }
            let started = Instant::now();
            while self.is_alive() && started.elapsed() < QUIT_GRACE {
                thread::sleep(Duration::from_millis(20));
            }
            if self.is_alive() {
                if let Err(err) = self.child.kill() {
                    tracing::warn!(error = %err, "could not kill mpv");
                }
            }
        }
        let status = self.child.wait().context("wait for mpv to exit")?;
        tracing::debug!(code = ?status.code(), "mpv exited");
        if let Some(path) = self.ipc_path.take() {
            cleanup_ipc_path(&path);
        }
        Ok(())
    }
}

/// Writes one newline-terminated JSON command to the IPC endpoint. mpv
/// creates the socket shortly after spawning, so connecting is retried.
fn send_ipc_command(path: &str, serialized: &str) -> Result<()> {
    let mut endpoint = open_ipc(path)?;
    let mut line = String::with_capacity(serialized.len() + 1);
    line.push_str(serialized);
    line.push('\n');
    endpoint
        .write_all(line.as_bytes())
        .with_context(|| format!("send command over {path}"))?;
    endpoint.flush().ok();
    Ok(())
}

fn open_ipc(path: &str) -> Result<Box<dyn Write>> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match connect_ipc(path) {
            Ok(endpoint) => return Ok(endpoint),
            Err(err) if attempts >= IPC_RETRIES => {
                return Err(anyhow!(err).context(format!("mpv IPC endpoint {path} unreachable")));
            }
            Err(_) => thread::sleep(IPC_RETRY_DELAY),
        }
    }
}

#[cfg(unix)]
fn connect_ipc(path: &str) -> std::io::Result<Box<dyn Write>> {
    Ok(Box::new(UnixStream::connect(path)?))
}

#[cfg(target_os = "windows")]
fn connect_ipc(path: &str) -> std::io::Result<Box<dyn Write>> {
    let pipe = fs::OpenOptions::new().read(true).write(true).open(path)?;
    Ok(Box::new(pipe))
}

#[cfg(all(not(unix), not(target_os = "windows")))]
fn connect_ipc(_path: &str) -> std::io::Result<Box<dyn Write>> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "no IPC transport on this platform",
    ))
}

fn ipc_name() -> String {
    let tag: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("reels-mpv-{}-{tag}", std::process::id())
}

#[cfg(unix)]
fn unique_ipc_path() -> Option<String> {
    let path = std::env::temp_dir().join(format!("{}.sock", ipc_name()));
    Some(path.to_string_lossy().into_owned())
}

#[cfg(target_os = "windows")]
fn unique_ipc_path() -> Option<String> {
    Some(format!(r"\\.\pipe\{}", ipc_name()))
}

#[cfg(all(not(unix), not(target_os = "windows")))]
fn unique_ipc_path() -> Option<String> {
    None
}

#[cfg(unix)]
fn cleanup_ipc_path(path: &str) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(path, error = %err, "failed to remove mpv ipc path");
        }
    }
}

#[cfg(not(unix))]
fn cleanup_ipc_path(_path: &str) {}
