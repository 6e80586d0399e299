use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::browser::{BrowserSession, KillHandle};
use crate::config::{default_user_agent, FetchMode, StealthConfig};
use crate::error::{Result, TripwireError};

const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8";

/// Content fetched from a page
#[derive(Debug, Clone, PartialEq)]
pub struct PageContent {
    /// Final URL after redirects
    pub url: String,
    /// Raw HTML content
    pub html: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Status(u16),
    Network,
    Navigation,
}

/// Why a single target could not be fetched
#[derive(Debug, Clone, PartialEq)]
pub struct FetchFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl FetchFailure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self { kind, reason: reason.into() }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Result of fetching one target. Failures stay local to the target.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Content(PageContent),
    Failed(FetchFailure),
}

/// A fetch strategy shared by every target of a sweep
pub trait PageFetcher: Send + Sync {
    fn mode(&self) -> FetchMode;

    /// Acquire shared resources. An error aborts the whole sweep.
    fn begin_sweep(&self) -> Result<()> {
        Ok(())
    }

    fn fetch(&self, url: &str) -> FetchOutcome;

    /// Release shared resources. Safe to call more than once, and from
    /// another thread while a fetch is in flight.
    fn end_sweep(&self) {}
}

/// Build the fetcher for the configured mode
pub fn fetcher_for(
    mode: FetchMode,
    request_timeout: Duration,
    stealth: &StealthConfig,
    data_dir: PathBuf,
) -> Arc<dyn PageFetcher> {
    match mode {
        FetchMode::Plain => Arc::new(HttpFetcher::new(request_timeout)),
        FetchMode::Stealth => Arc::new(StealthFetcher::new(stealth.clone(), data_dir)),
    }
}

// ========== Plain HTTP ==========

/// Single GET per target, no JavaScript
pub struct HttpFetcher {
    agent: ureq::Agent,
    user_agent: String,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            agent,
            user_agent: default_user_agent(),
        }
    }

    fn get(&self, url: &str) -> std::result::Result<PageContent, ureq::Error> {
        let response = self
            .agent
            .get(url)
            .header("User-Agent", &self.user_agent)
            .header("Accept", ACCEPT)
            .header("Accept-Language", ACCEPT_LANGUAGE)
            .call()?;
        let html = response.into_body().read_to_string()?;
        Ok(PageContent {
            url: url.to_string(),
            html,
        })
    }
}

/// Sort a transport error into the failure taxonomy
fn classify_http_error(err: ureq::Error) -> FetchFailure {
    match err {
        ureq::Error::StatusCode(code) => FetchFailure::new(FailureKind::Status(code), format!("HTTP {}", code)),
        ureq::Error::Timeout(t) => FetchFailure::new(FailureKind::Timeout, format!("timed out ({})", t)),
        other => FetchFailure::new(FailureKind::Network, other.to_string()),
    }
}

impl PageFetcher for HttpFetcher {
    fn mode(&self) -> FetchMode {
        FetchMode::Plain
    }

    fn fetch(&self, url: &str) -> FetchOutcome {
        debug!(url, "http fetch");
        match self.get(url) {
            Ok(content) => FetchOutcome::Content(content),
            Err(e) => FetchOutcome::Failed(classify_http_error(e)),
        }
    }
}

// ========== Stealth browser ==========

/// Headless browser fetches through one shared sidecar session.
///
/// The session is launched on `begin_sweep` (or lazily on the first fetch)
/// and shut down on `end_sweep`. Every fetch runs in its own browser context.
pub struct StealthFetcher {
    config: StealthConfig,
    data_dir: PathBuf,
    session: Mutex<Option<BrowserSession>>,
    kill_handle: Mutex<Option<KillHandle>>,
}

impl StealthFetcher {
    pub fn new(config: StealthConfig, data_dir: PathBuf) -> Self {
        Self {
            config,
            data_dir,
            session: Mutex::new(None),
            kill_handle: Mutex::new(None),
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<BrowserSession>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_kill_handle(&self) -> MutexGuard<'_, Option<KillHandle>> {
        self.kill_handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_session(&self, slot: &mut Option<BrowserSession>) -> Result<()> {
        if slot.is_none() {
            let session = BrowserSession::launch(&self.config, &self.data_dir)?;
            *self.lock_kill_handle() = Some(session.kill_handle());
            info!("browser session started");
            *slot = Some(session);
        }
        Ok(())
    }
}

impl PageFetcher for StealthFetcher {
    fn mode(&self) -> FetchMode {
        FetchMode::Stealth
    }

    fn begin_sweep(&self) -> Result<()> {
        let mut slot = self.lock_session();
        self.ensure_session(&mut slot)
    }

    fn fetch(&self, url: &str) -> FetchOutcome {
        let mut slot = self.lock_session();
        if let Err(e) = self.ensure_session(&mut slot) {
            return FetchOutcome::Failed(FetchFailure::new(FailureKind::Navigation, e.to_string()));
        }
        let Some(session) = slot.as_mut() else {
            return FetchOutcome::Failed(FetchFailure::new(FailureKind::Navigation, "browser session unavailable"));
        };

        debug!(url, "stealth fetch");
        let result = session
            .open_context(&self.config)
            .and_then(|mut context| context.fetch(url));

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                // A broken pipe leaves the sidecar unusable; start over next time
                warn!(url, error = %e, "browser session failed, discarding it");
                slot.take();
                self.lock_kill_handle().take();
                let kind = match e {
                    TripwireError::BrowserTimeout(_) => FailureKind::Timeout,
                    _ => FailureKind::Navigation,
                };
                FetchOutcome::Failed(FetchFailure::new(kind, e.to_string()))
            }
        }
    }

    fn end_sweep(&self) {
        match self.session.try_lock() {
            Ok(mut slot) => {
                self.lock_kill_handle().take();
                if let Some(session) = slot.take() {
                    session.shutdown();
                    info!("browser session closed");
                }
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                self.lock_kill_handle().take();
                if let Some(session) = poisoned.into_inner().take() {
                    session.shutdown();
                }
            }
            Err(TryLockError::WouldBlock) => {
                // A fetch is in flight; kill the process so its read fails fast
                if let Some(handle) = self.lock_kill_handle().take() {
                    warn!("force-closing browser with a fetch in flight");
                    handle.kill();
                }
            }
        }
    }
}

/// Installation status of the stealth browser stack
#[derive(Debug, Clone, PartialEq)]
pub enum StealthStatus {
    Ready,
    NodeMissing,
    PlaywrightMissing,
    BrowserMissing,
}

impl StealthStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, StealthStatus::Ready)
    }

    pub fn install_instructions(&self) -> &'static str {
        match self {
            StealthStatus::Ready => "Stealth browser is ready",
            StealthStatus::NodeMissing => "Install Node.js: https://nodejs.org/",
            StealthStatus::PlaywrightMissing => "Run in the data directory: npm install playwright",
            StealthStatus::BrowserMissing => "Run: npx playwright install chromium",
        }
    }
}

/// Check whether Node, Playwright and Chromium are installed
pub fn check_stealth(node_binary: &str) -> StealthStatus {
    let node_available = Command::new(node_binary)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);

    if !node_available {
        return StealthStatus::NodeMissing;
    }

    let playwright_available = Command::new("npx")
        .args(["playwright", "--version"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);

    if !playwright_available {
        return StealthStatus::PlaywrightMissing;
    }

    if browser_cache_paths().iter().any(|p| p.exists()) {
        StealthStatus::Ready
    } else {
        StealthStatus::BrowserMissing
    }
}

/// Possible Playwright browser cache locations
fn browser_cache_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(custom) = std::env::var("PLAYWRIGHT_BROWSERS_PATH") {
        paths.push(PathBuf::from(custom));
    }
    let home = std::env::var("HOME").unwrap_or_default();
    // Linux
    paths.push(PathBuf::from(format!("{}/.cache/ms-playwright", home)));
    // macOS
    paths.push(PathBuf::from(format!("{}/Library/Caches/ms-playwright", home)));
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        let failure = classify_http_error(ureq::Error::StatusCode(503));
        assert_eq!(failure.kind, FailureKind::Status(503));
        assert_eq!(failure.reason, "HTTP 503");
    }

    #[test]
    fn test_classify_other_is_network() {
        let failure = classify_http_error(ureq::Error::ConnectionFailed);
        assert_eq!(failure.kind, FailureKind::Network);
    }

    #[test]
    fn test_unreachable_host_is_failure_not_error() {
        let fetcher = HttpFetcher::new(Duration::from_secs(2));
        // Port 9 on localhost is discard; nothing should be listening
        match fetcher.fetch("http://127.0.0.1:9/") {
            FetchOutcome::Failed(f) => assert!(!f.reason.is_empty()),
            FetchOutcome::Content(_) => panic!("expected failure"),
        }
    }

    #[test]
    fn test_stealth_status_instructions() {
        assert!(StealthStatus::Ready.is_ready());
        assert!(!StealthStatus::NodeMissing.is_ready());
        assert!(StealthStatus::BrowserMissing.install_instructions().contains("chromium"));
    }

    #[cfg(unix)]
    #[test]
    fn test_stealth_fetch_with_unresponsive_browser_times_out() {
        use std::sync::mpsc;
        use std::thread;

        let dir = tempfile::tempdir().unwrap();
        let config = StealthConfig {
            node_binary: crate::browser::tests::fake_node(
                dir.path(),
                "echo '{\"ok\":true}'\nwhile IFS= read -r line; do :; done",
            ),
            navigation_timeout_ms: 500,
            settle_ms: 0,
            scroll_settle_ms: 0,
            ..StealthConfig::default()
        };
        let fetcher = StealthFetcher::new(config, dir.path().to_path_buf());

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(fetcher.fetch("https://example.com/"));
        });

        match rx.recv_timeout(Duration::from_secs(10)).expect("fetch should not hang") {
            FetchOutcome::Failed(f) => assert_eq!(f.kind, FailureKind::Timeout),
            FetchOutcome::Content(_) => panic!("expected failure"),
        }
    }

    #[test]
    fn test_stealth_end_sweep_without_session() {
        let fetcher = StealthFetcher::new(StealthConfig::default(), std::env::temp_dir());
        fetcher.end_sweep();
        fetcher.end_sweep();
        assert_eq!(fetcher.mode(), FetchMode::Stealth);
    }
}
