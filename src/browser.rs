//! Long-lived headless browser driven through a Node/Playwright sidecar.
//!
//! The sidecar speaks JSON lines on stdin/stdout. Every request gets exactly
//! one reply of the form `{"ok": bool, ...}`; the first line after launch is a
//! readiness reply. Replies are read on a dedicated thread so every request
//! has a deadline; a sidecar that misses one is killed.

use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::StealthConfig;
use crate::error::{Result, TripwireError};
use crate::fetch::{FailureKind, FetchFailure, FetchOutcome, PageContent};

const SCRIPT_NAME: &str = "stealth.mjs";
const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(60);
const MIN_CONTROL_TIMEOUT: Duration = Duration::from_secs(1);
/// Slack on top of the page budget for process and IPC overhead
const FETCH_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    OpenContext {
        user_agent: &'a str,
        locale: &'a str,
        timezone: &'a str,
        languages: &'a [String],
        viewport_width: u32,
        viewport_height: u32,
    },
    Fetch {
        context_id: u64,
        url: &'a str,
        timeout_ms: u64,
        settle_ms: u64,
        scroll_settle_ms: u64,
    },
    CloseContext {
        context_id: u64,
    },
    Shutdown,
}

#[derive(Debug, Default, Deserialize)]
struct Reply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    context_id: Option<u64>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    html: Option<String>,
}

impl Reply {
    fn error_message(&self) -> String {
        self.error.clone().unwrap_or_else(|| "unknown browser error".to_string())
    }

    /// Map a fetch reply onto a per-target outcome
    fn into_outcome(self, requested_url: &str) -> FetchOutcome {
        if self.ok {
            return FetchOutcome::Content(PageContent {
                url: self.url.unwrap_or_else(|| requested_url.to_string()),
                html: self.html.unwrap_or_default(),
            });
        }
        let reason = self.error_message();
        let kind = match (self.kind.as_deref(), self.status) {
            (Some("timeout"), _) => FailureKind::Timeout,
            (Some("status"), Some(code)) => FailureKind::Status(code),
            _ => FailureKind::Navigation,
        };
        FetchOutcome::Failed(FetchFailure::new(kind, reason))
    }
}

/// Kills the sidecar process from any thread, even while a request is blocked
#[derive(Clone)]
pub struct KillHandle(Arc<Mutex<Child>>);

impl KillHandle {
    pub fn kill(&self) {
        let mut child = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Ok(None) = child.try_wait() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut child = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                match child.try_wait() {
                    Ok(Some(_)) | Err(_) => return true,
                    Ok(None) => {}
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(50));
        }
    }
}

/// Forward sidecar stdout lines until EOF or until the session is dropped
fn spawn_reader(stdout: ChildStdout) -> io::Result<Receiver<io::Result<String>>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("tripwire-sidecar".to_string())
        .spawn(move || {
            let mut reader = BufReader::new(stdout);
            loop {
                let mut line = String::new();
                match reader.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        if tx.send(Ok(line)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}

/// One running browser process
pub struct BrowserSession {
    child: KillHandle,
    stdin: ChildStdin,
    replies: Receiver<io::Result<String>>,
    /// Deadline for open_context and close_context
    control_timeout: Duration,
}

impl BrowserSession {
    /// Start the sidecar and wait for the browser to come up
    pub fn launch(config: &StealthConfig, data_dir: &Path) -> Result<Self> {
        let script_path = ensure_script(data_dir)?;

        // Run from the data directory so Node finds the local node_modules
        let mut child = Command::new(&config.node_binary)
            .arg(&script_path)
            .current_dir(data_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                TripwireError::EngineInitError(format!("could not start {}: {}", config.node_binary, e))
            })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                return Err(TripwireError::EngineInitError("sidecar pipes unavailable".into()));
            }
        };

        let child = KillHandle(Arc::new(Mutex::new(child)));
        let replies = match spawn_reader(stdout) {
            Ok(replies) => replies,
            Err(e) => {
                child.kill();
                return Err(TripwireError::EngineInitError(format!("could not read sidecar output: {}", e)));
            }
        };

        let session = Self {
            child,
            stdin,
            replies,
            control_timeout: Duration::from_millis(config.navigation_timeout_ms).max(MIN_CONTROL_TIMEOUT),
        };

        let ready = session
            .read_reply(LAUNCH_TIMEOUT)
            .map_err(|e| TripwireError::EngineInitError(e.to_string()))?;
        if !ready.ok {
            return Err(TripwireError::EngineInitError(ready.error_message()));
        }
        debug!("browser sidecar ready");
        Ok(session)
    }

    pub fn kill_handle(&self) -> KillHandle {
        self.child.clone()
    }

    /// Wait for the next reply. On timeout the sidecar is killed, since its
    /// late reply would otherwise answer the following request.
    fn read_reply(&self, timeout: Duration) -> Result<Reply> {
        match self.replies.recv_timeout(timeout) {
            Ok(Ok(line)) => Ok(serde_json::from_str(line.trim_end())?),
            Ok(Err(e)) => Err(e.into()),
            Err(RecvTimeoutError::Timeout) => {
                self.child.kill();
                Err(TripwireError::BrowserTimeout(format!(
                    "no reply within {:.1}s",
                    timeout.as_secs_f64()
                )))
            }
            Err(RecvTimeoutError::Disconnected) => Err(TripwireError::BrowserError("sidecar exited".into())),
        }
    }

    fn request(&mut self, request: &Request<'_>, timeout: Duration) -> Result<Reply> {
        let mut payload = serde_json::to_string(request)?;
        payload.push('\n');
        self.stdin
            .write_all(payload.as_bytes())
            .and_then(|_| self.stdin.flush())
            .map_err(|e| TripwireError::BrowserError(format!("sidecar write failed: {}", e)))?;
        self.read_reply(timeout)
    }

    /// Open a fresh isolated context with the configured fingerprint
    pub fn open_context(&mut self, config: &StealthConfig) -> Result<BrowserContext<'_>> {
        let reply = self.request(
            &Request::OpenContext {
                user_agent: &config.user_agent,
                locale: &config.locale,
                timezone: &config.timezone,
                languages: &config.languages,
                viewport_width: config.viewport_width,
                viewport_height: config.viewport_height,
            },
            self.control_timeout,
        )?;

        match (reply.ok, reply.context_id) {
            (true, Some(id)) => Ok(BrowserContext {
                session: self,
                id,
                timeout_ms: config.navigation_timeout_ms,
                settle_ms: config.settle_ms,
                scroll_settle_ms: config.scroll_settle_ms,
            }),
            _ => Err(TripwireError::BrowserError(reply.error_message())),
        }
    }

    /// Ask the sidecar to close the browser, killing it if it does not exit in time
    pub fn shutdown(mut self) {
        if let Err(e) = self.request(&Request::Shutdown, SHUTDOWN_WAIT) {
            debug!(error = %e, "sidecar shutdown request failed");
        }
        if !self.child.wait_timeout(SHUTDOWN_WAIT) {
            warn!("sidecar did not exit, killing it");
        }
        // Drop kills whatever is left
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.child.kill();
    }
}

/// A browser context scoped to one target. Closed when dropped.
pub struct BrowserContext<'a> {
    session: &'a mut BrowserSession,
    id: u64,
    timeout_ms: u64,
    settle_ms: u64,
    scroll_settle_ms: u64,
}

impl BrowserContext<'_> {
    /// Navigate, wait for the page to settle, scroll halfway, and read the HTML.
    ///
    /// Page-level problems come back as a failed outcome; an error means the
    /// session itself is broken.
    pub fn fetch(&mut self, url: &str) -> Result<FetchOutcome> {
        let reply = self.session.request(
            &Request::Fetch {
                context_id: self.id,
                url,
                timeout_ms: self.timeout_ms,
                settle_ms: self.settle_ms,
                scroll_settle_ms: self.scroll_settle_ms,
            },
            self.deadline(),
        )?;
        Ok(reply.into_outcome(url))
    }

    /// Navigation, both settle pauses and a fixed margin
    fn deadline(&self) -> Duration {
        Duration::from_millis(
            self.timeout_ms
                .saturating_add(self.settle_ms)
                .saturating_add(self.scroll_settle_ms),
        ) + FETCH_MARGIN
    }
}

impl Drop for BrowserContext<'_> {
    fn drop(&mut self) {
        let timeout = self.session.control_timeout;
        match self.session.request(&Request::CloseContext { context_id: self.id }, timeout) {
            Ok(reply) if !reply.ok => debug!(context = self.id, error = %reply.error_message(), "close_context refused"),
            Ok(_) => {}
            Err(e) => debug!(context = self.id, error = %e, "close_context failed"),
        }
    }
}

/// Write the embedded sidecar script into the data directory
pub fn ensure_script(data_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(data_dir)?;
    let script_path = data_dir.join(SCRIPT_NAME);
    let script_content = include_str!("../assets/stealth.mjs");

    let current = std::fs::read_to_string(&script_path).ok();
    if current.as_deref() != Some(script_content) {
        std::fs::write(&script_path, script_content)?;
    }
    Ok(script_path)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let json = serde_json::to_value(Request::Fetch {
            context_id: 3,
            url: "https://example.com",
            timeout_ms: 30000,
            settle_ms: 2000,
            scroll_settle_ms: 1000,
        })
        .unwrap();
        assert_eq!(json["op"], "fetch");
        assert_eq!(json["context_id"], 3);

        let json = serde_json::to_value(Request::Shutdown).unwrap();
        assert_eq!(json, serde_json::json!({"op": "shutdown"}));
    }

    #[test]
    fn test_reply_success_outcome() {
        let reply: Reply =
            serde_json::from_str(r#"{"ok":true,"url":"https://e.com/final","html":"<p>x</p>"}"#).unwrap();
        assert_eq!(
            reply.into_outcome("https://e.com"),
            FetchOutcome::Content(PageContent {
                url: "https://e.com/final".into(),
                html: "<p>x</p>".into(),
            })
        );
    }

    #[test]
    fn test_reply_failure_kinds() {
        let timeout: Reply = serde_json::from_str(r#"{"ok":false,"kind":"timeout","error":"30s"}"#).unwrap();
        match timeout.into_outcome("u") {
            FetchOutcome::Failed(f) => assert_eq!(f.kind, FailureKind::Timeout),
            other => panic!("unexpected {:?}", other),
        }

        let status: Reply =
            serde_json::from_str(r#"{"ok":false,"kind":"status","status":403,"error":"HTTP 403"}"#).unwrap();
        match status.into_outcome("u") {
            FetchOutcome::Failed(f) => {
                assert_eq!(f.kind, FailureKind::Status(403));
                assert_eq!(f.reason, "HTTP 403");
            }
            other => panic!("unexpected {:?}", other),
        }

        let other: Reply = serde_json::from_str(r#"{"ok":false}"#).unwrap();
        match other.into_outcome("u") {
            FetchOutcome::Failed(f) => assert_eq!(f.kind, FailureKind::Navigation),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_ensure_script_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = ensure_script(dir.path()).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("navigator"));
        assert_eq!(ensure_script(dir.path()).unwrap(), path);
    }

    /// Write an executable stand-in for node that runs `body` as a shell script
    #[cfg(unix)]
    pub(crate) fn fake_node(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-node.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[test]
    fn test_silent_sidecar_times_out_and_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let config = StealthConfig {
            node_binary: fake_node(dir.path(), "echo '{\"ok\":true}'\nwhile read -r line; do :; done"),
            navigation_timeout_ms: 200,
            ..StealthConfig::default()
        };

        let mut session = BrowserSession::launch(&config, dir.path()).unwrap();
        let started = Instant::now();
        let err = session.open_context(&config).err().unwrap();

        assert!(matches!(err, TripwireError::BrowserTimeout(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(session.kill_handle().wait_timeout(Duration::from_secs(2)));
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_fetch_hits_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"echo '{"ok":true}'
while read -r line; do
  case "$line" in
    *open_context*) echo '{"ok":true,"context_id":1}' ;;
  esac
done"#;
        let config = StealthConfig {
            node_binary: fake_node(dir.path(), script),
            navigation_timeout_ms: 200,
            settle_ms: 0,
            scroll_settle_ms: 0,
            ..StealthConfig::default()
        };

        let mut session = BrowserSession::launch(&config, dir.path()).unwrap();
        let started = Instant::now();
        let result = session.open_context(&config).and_then(|mut context| context.fetch("https://example.com"));

        assert!(matches!(result, Err(TripwireError::BrowserTimeout(_))));
        assert!(started.elapsed() < FETCH_MARGIN + Duration::from_secs(3));
    }

    #[test]
    fn test_launch_missing_node_is_init_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = StealthConfig {
            node_binary: "/nonexistent/node-binary".to_string(),
            ..StealthConfig::default()
        };
        let err = BrowserSession::launch(&config, dir.path()).err().unwrap();
        assert!(matches!(err, TripwireError::EngineInitError(_)));
    }
}
