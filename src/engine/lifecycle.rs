//! Validator engine process lifecycle management.
//!
//! Provides the `ValidatorService` struct which manages:
//! - Artifact installation before launch
//! - Process spawning and stdout banner scanning
//! - Readiness polling against the engine's HTTP listener
//! - Forced shutdown with state cleanup
//!
//! All mutable runtime fields live in one `RuntimeState` behind a mutex. The
//! task that owns the child process and the readiness wait both observe the
//! same `watch` channel of `EngineState` transitions.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use log::Level;
use regex::Regex;
use reqwest::Client;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, watch};

use crate::client::{EngineEndpoint, ValidatorClient};
use crate::config::ServiceConfig;
use crate::defaults;
use crate::engine::fetch::{EnsureOptions, EnsureOutcome, FetchError, ValidatorFetcher};
use crate::engine::process::force_kill;
use crate::engine::readiness::{probe_health, wait_until_ready, Readiness};
use crate::logging::{ConsoleSink, LogSink};

/// Stdout banner announcing the engine version.
///
/// Tied to the engine's log format. If upstream rewords it, the engine still
/// starts but `engine_version()` stays unset.
pub const VERSION_BANNER: &str = "FHIR Validation tool Version ";

/// Errors that can occur during engine lifecycle management.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Validator is already running")]
    AlreadyRunning,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Validator artifact not found at {0:?} and auto-download is disabled")]
    ArtifactMissing(PathBuf),

    #[error("Failed to spawn validator: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Validator exited before becoming ready; check the engine log")]
    ExitedBeforeReady,

    #[error("Validator not ready after {0:?}; the process is still running")]
    ReadinessTimeout(Duration),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Externally visible engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Starting,
    Ready,
    Stopping,
}

#[derive(Debug)]
struct ProcessHandle {
    generation: u64,
    pid: Option<u32>,
    /// Tells the exit watcher to kill the child
    kill: Option<oneshot::Sender<()>>,
}

#[derive(Debug, Default)]
struct RuntimeState {
    handle: Option<ProcessHandle>,
    port: Option<u16>,
    base_url: Option<String>,
    is_ready: bool,
    engine_version: Option<String>,
}

/// State shared between the service, its background tasks and its clients.
pub(crate) struct Shared {
    state: Mutex<RuntimeState>,
    status: watch::Sender<EngineState>,
}

impl Shared {
    fn new() -> Self {
        let (status, _) = watch::channel(EngineState::Stopped);
        Self {
            state: Mutex::new(RuntimeState::default()),
            status,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn owns(state: &RuntimeState, generation: u64) -> bool {
        state.handle.as_ref().map(|h| h.generation) == Some(generation)
    }

    /// Clear the handle and everything derived from it. Ignores stale
    /// generations so a late exit cannot wipe a newer process.
    fn cleanup(&self, generation: u64) {
        let mut state = self.lock();
        if !Self::owns(&state, generation) {
            return;
        }
        state.handle = None;
        state.port = None;
        state.base_url = None;
        state.is_ready = false;
        self.status.send_replace(EngineState::Stopped);
    }

    fn mark_ready(&self, generation: u64) -> bool {
        let mut state = self.lock();
        if !Self::owns(&state, generation) || *self.status.borrow() != EngineState::Starting {
            return false;
        }
        state.is_ready = true;
        self.status.send_replace(EngineState::Ready);
        true
    }

    fn record_engine_version(&self, generation: u64, version: String) {
        let mut state = self.lock();
        if Self::owns(&state, generation) && state.engine_version.is_none() {
            log::info!("Validator engine version {}", version);
            state.engine_version = Some(version);
        }
    }
}

impl EngineEndpoint for Shared {
    fn ready_base_url(&self) -> Option<String> {
        let state = self.lock();
        match (&state.handle, state.is_ready) {
            (Some(_), true) => state.base_url.clone(),
            _ => None,
        }
    }
}

/// Owns at most one running validator engine.
pub struct ValidatorService {
    fetcher: ValidatorFetcher,
    http: Client,
    sink: Arc<dyn LogSink>,
    shared: Arc<Shared>,
    generations: AtomicU64,
}

impl ValidatorService {
    /// Create a service using the default artifact location.
    pub fn new() -> Self {
        Self::with_fetcher(ValidatorFetcher::new())
    }

    /// Create a service with a custom fetcher.
    pub fn with_fetcher(fetcher: ValidatorFetcher) -> Self {
        Self {
            fetcher,
            http: Client::new(),
            sink: Arc::new(ConsoleSink),
            shared: Arc::new(Shared::new()),
            generations: AtomicU64::new(0),
        }
    }

    /// Route engine stdout/stderr to `sink` instead of the `log` facade.
    pub fn with_log_sink(mut self, sink: impl LogSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn fetcher(&self) -> &ValidatorFetcher {
        &self.fetcher
    }

    /// Install or update the validator artifact without starting it.
    pub async fn ensure_validator(
        &self,
        options: EnsureOptions,
    ) -> std::result::Result<EnsureOutcome, FetchError> {
        self.fetcher.ensure_validator(options).await
    }

    /// A client bound to this service's readiness and base URL.
    pub fn client(&self) -> ValidatorClient {
        let endpoint: Arc<dyn EngineEndpoint> = Arc::clone(&self.shared) as Arc<dyn EngineEndpoint>;
        ValidatorClient::new(endpoint)
    }

    /// True while a process is held and has passed a health probe.
    pub fn is_running(&self) -> bool {
        let state = self.shared.lock();
        state.handle.is_some() && state.is_ready
    }

    pub fn state(&self) -> EngineState {
        *self.shared.status.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.shared.status.subscribe()
    }

    /// Engine version scraped from the startup banner, if seen.
    pub fn engine_version(&self) -> Option<String> {
        self.shared.lock().engine_version.clone()
    }

    pub fn base_url(&self) -> Option<String> {
        self.shared.lock().base_url.clone()
    }

    pub fn port(&self) -> Option<u16> {
        self.shared.lock().port
    }

    pub fn pid(&self) -> Option<u32> {
        self.shared.lock().handle.as_ref().and_then(|h| h.pid)
    }

    /// Launch the engine and wait until it answers health probes.
    ///
    /// On [`LifecycleError::ReadinessTimeout`] the process is left running;
    /// call [`stop`](Self::stop) to get rid of it.
    pub async fn start(&self, config: ServiceConfig) -> Result<()> {
        if self.shared.lock().handle.is_some() {
            return Err(LifecycleError::AlreadyRunning);
        }
        config.validate()?;

        let jar = self.prepare_artifact(&config).await?;
        let args = build_args(&config, &jar);

        log::info!("Launching validator: {} {}", config.java, args.join(" "));

        let mut child = Command::new(&config.java)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(LifecycleError::Spawn)?;

        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let base_url = format!("http://127.0.0.1:{}", config.port);
        let (kill_tx, kill_rx) = oneshot::channel();

        {
            let mut state = self.shared.lock();
            if state.handle.is_some() {
                drop(state);
                let _ = child.start_kill();
                return Err(LifecycleError::AlreadyRunning);
            }
            *state = RuntimeState {
                handle: Some(ProcessHandle {
                    generation,
                    pid: child.id(),
                    kill: Some(kill_tx),
                }),
                port: Some(config.port),
                base_url: Some(base_url.clone()),
                is_ready: false,
                engine_version: None,
            };
            self.shared.status.send_replace(EngineState::Starting);
        }

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(scan_stdout(
                stdout,
                Arc::clone(&self.shared),
                generation,
                Arc::clone(&self.sink),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr, Arc::clone(&self.sink)));
        }
        // The engine exits on stdin EOF, and `Child::wait` closes stdin if it
        // still holds it. The exit watcher keeps the pipe open until exit.
        let stdin = child.stdin.take();
        tokio::spawn(watch_exit(child, stdin, kill_rx, Arc::clone(&self.shared), generation));

        let timeout = config.startup_timeout();
        let http = self.http.clone();
        let readiness = wait_until_ready(
            move || {
                let http = http.clone();
                let url = base_url.clone();
                async move { probe_health(&http, &url).await }
            },
            self.shared.status.subscribe(),
            timeout,
            defaults::PROBE_INTERVAL,
        )
        .await;

        match readiness {
            Readiness::Ready if self.shared.mark_ready(generation) => {
                log::info!("Validator ready on port {}", config.port);
                Ok(())
            }
            Readiness::Ready | Readiness::Exited => Err(LifecycleError::ExitedBeforeReady),
            Readiness::TimedOut => {
                log::warn!("Validator not ready after {:?}; leaving it running", timeout);
                Err(LifecycleError::ReadinessTimeout(timeout))
            }
        }
    }

    /// Kill the engine and wait for it to exit. Never fails.
    ///
    /// SIGKILL is sent straight away: the engine blocks on stdin and ignores
    /// gentler signals. If no exit is observed within the stop bound, the PID
    /// is killed directly and state is cleared anyway.
    pub async fn stop(&self) {
        let mut status = self.shared.status.subscribe();

        let (generation, pid) = {
            let mut state = self.shared.lock();
            let Some(handle) = state.handle.as_mut() else {
                return;
            };
            let generation = handle.generation;
            let pid = handle.pid;
            if let Some(kill) = handle.kill.take() {
                let _ = kill.send(());
            }
            state.is_ready = false;
            self.shared.status.send_replace(EngineState::Stopping);
            (generation, pid)
        };

        log::info!("Stopping validator (pid {:?})", pid);

        let exited = matches!(
            tokio::time::timeout(
                defaults::STOP_TIMEOUT,
                status.wait_for(|s| *s == EngineState::Stopped),
            )
            .await,
            Ok(Ok(_))
        );

        if !exited {
            log::warn!(
                "Validator did not exit within {:?}; killing pid {:?}",
                defaults::STOP_TIMEOUT,
                pid
            );
            if let Some(pid) = pid {
                force_kill(pid);
            }
            self.shared.cleanup(generation);
        }
    }

    async fn prepare_artifact(&self, config: &ServiceConfig) -> Result<PathBuf> {
        if config.auto_download {
            let outcome = self
                .fetcher
                .ensure_validator(EnsureOptions {
                    force: false,
                    skip_update_check: config.skip_update_check,
                })
                .await?;
            return Ok(outcome.path);
        }

        let path = self.fetcher.artifact_path();
        if path.exists() {
            Ok(path.to_path_buf())
        } else {
            Err(LifecycleError::ArtifactMissing(path.to_path_buf()))
        }
    }

    #[cfg(test)]
    fn inject_handle(&self) {
        let mut state = self.shared.lock();
        state.handle = Some(ProcessHandle {
            generation: u64::MAX,
            pid: None,
            kill: None,
        });
    }
}

impl Default for ValidatorService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ValidatorService {
    fn drop(&mut self) {
        let handle = self.shared.lock().handle.take();
        if let Some(mut handle) = handle {
            if let Some(kill) = handle.kill.take() {
                let _ = kill.send(());
            }
            if let Some(pid) = handle.pid {
                force_kill(pid);
            }
            let mut state = self.shared.lock();
            state.port = None;
            state.base_url = None;
            state.is_ready = false;
            self.shared.status.send_replace(EngineState::Stopped);
        }
    }
}

/// Engine argument vector, excluding the Java launcher itself.
pub fn build_args(config: &ServiceConfig, jar: &Path) -> Vec<String> {
    let mut args = config.jvm_args.clone();
    args.push("-jar".into());
    args.push(jar.display().to_string());
    args.push("-server".into());
    args.push(config.port.to_string());
    args.push("-tx".into());
    args.push(config.tx_server.clone().unwrap_or_default());
    args.push("-txLog".into());
    args.push(
        config
            .tx_log
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
    );
    args.push("-version".into());
    args.push(config.version.clone().unwrap_or_default());
    for ig in &config.igs {
        args.push("-ig".into());
        args.push(ig.clone());
    }
    args
}

/// Remove ANSI escape sequences (colors, cursor moves) from a line.
pub fn strip_ansi(line: &str) -> String {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    let re = ANSI.get_or_init(|| {
        Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("ANSI pattern is valid")
    });
    re.replace_all(line, "").into_owned()
}

/// Extract the version from a banner line, e.g.
/// `FHIR Validation tool Version 6.3.4 (Git# 61c7e3d6e1ce)` yields `6.3.4`.
pub fn parse_banner(line: &str) -> Option<String> {
    line.trim_start()
        .strip_prefix(VERSION_BANNER)?
        .split_whitespace()
        .next()
        .map(str::to_string)
}

async fn scan_stdout<R>(stdout: R, shared: Arc<Shared>, generation: u64, sink: Arc<dyn LogSink>)
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(stdout).split(b'\n');
    let mut version_known = false;

    while let Ok(Some(raw)) = segments.next_segment().await {
        let line = strip_ansi(String::from_utf8_lossy(&raw).trim_end_matches('\r'));
        if !version_known {
            if let Some(version) = parse_banner(&line) {
                shared.record_engine_version(generation, version);
                version_known = true;
            }
        }
        sink.log(Level::Info, &line);
    }
}

async fn forward_stderr<R>(stderr: R, sink: Arc<dyn LogSink>)
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(stderr).split(b'\n');
    while let Ok(Some(raw)) = segments.next_segment().await {
        let line = strip_ansi(String::from_utf8_lossy(&raw).trim_end_matches('\r'));
        sink.log(Level::Warn, &line);
    }
}

async fn watch_exit(
    mut child: Child,
    stdin: Option<ChildStdin>,
    kill: oneshot::Receiver<()>,
    shared: Arc<Shared>,
    generation: u64,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            if let Err(e) = child.start_kill() {
                log::debug!("Kill failed: {}", e);
            }
            child.wait().await
        }
    };

    drop(stdin);

    match status {
        Ok(status) => log::info!("Validator exited with {}", status),
        Err(e) => log::warn!("Failed to wait for validator: {}", e),
    }

    shared.cleanup(generation);
}
