//! ## iotguard-capture::capture
//! **At most one traffic capture per device, each backed by a sniffer process**
//!
//! A session is registered under the manager lock together with the spawn, so
//! two concurrent starts for the same device cannot both succeed. Every
//! session ends by computing a realized rate from the artifact size, writing
//! an audit event, and releasing the device, whatever way the sniffer exited.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use iotguard_core::prelude::{AuditLog, IpsError, MacAddr, RateSink};

use crate::rate::{effective_elapsed, realized_rate_kbps};
use crate::sniffer::Sniffer;

/// Extra wait in `stop` beyond the termination grace period.
const STOP_WAIT_SLACK: Duration = Duration::from_secs(1);
/// How long to drain sniffer output after exit before giving up on it.
const OUTPUT_DRAIN: Duration = Duration::from_millis(500);

/// Why a capture was started; decides the artifact name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePurpose {
    /// Operator-requested capture.
    Manual,
    /// Evidence taken in response to an anomaly.
    Evidence,
}

impl CapturePurpose {
    fn file_prefix(self) -> &'static str {
        match self {
            CapturePurpose::Manual => "capture",
            CapturePurpose::Evidence => "abnormal",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub output_dir: PathBuf,
    /// Time allowed between the termination signal and a forced kill.
    pub stop_grace: Duration,
    /// Time a bounded capture may overrun before it is terminated.
    pub deadline_slack: Duration,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("captures"),
            stop_grace: Duration::from_secs(3),
            deadline_slack: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// Sniffer exited on its own with status zero.
    Completed,
    /// Ended by `stop`.
    Stopped,
    /// Overran its window and was terminated.
    TimedOut,
    /// Sniffer failed; no rate is recorded.
    Failed(String),
}

impl CaptureOutcome {
    fn label(&self) -> &'static str {
        match self {
            CaptureOutcome::Completed => "completed",
            CaptureOutcome::Stopped => "stopped",
            CaptureOutcome::TimedOut => "timed out",
            CaptureOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureReport {
    pub mac: MacAddr,
    pub output: PathBuf,
    pub outcome: CaptureOutcome,
    pub bytes: Option<u64>,
    pub elapsed: Duration,
    pub rate_kbps: Option<f64>,
}

/// Handle to a started capture.
pub struct CaptureTicket {
    pub output: PathBuf,
    /// Resolves once the session has been finalized and released.
    pub completion: JoinHandle<CaptureReport>,
}

/// Snapshot of a running session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub mac: MacAddr,
    pub output: PathBuf,
    pub started_at: DateTime<Utc>,
    pub duration: Option<Duration>,
}

struct SessionEntry {
    info: SessionInfo,
    stop_tx: Option<oneshot::Sender<()>>,
    done_rx: watch::Receiver<bool>,
}

struct Inner {
    sniffer: Arc<dyn Sniffer>,
    rates: Arc<dyn RateSink>,
    audit: AuditLog,
    options: CaptureOptions,
    sessions: Mutex<HashMap<MacAddr, SessionEntry>>,
}

#[derive(Clone)]
pub struct CaptureManager {
    inner: Arc<Inner>,
}

/// Releases the device and wakes `stop` waiters on every exit path.
struct SessionRelease {
    inner: Arc<Inner>,
    mac: MacAddr,
    done_tx: watch::Sender<bool>,
}

impl Drop for SessionRelease {
    fn drop(&mut self) {
        self.inner.sessions.lock().remove(&self.mac);
        self.done_tx.send_replace(true);
    }
}

enum Exit {
    Natural(std::io::Result<ExitStatus>),
    Stop,
    Deadline,
}

impl CaptureManager {
    pub fn new(
        sniffer: Arc<dyn Sniffer>,
        rates: Arc<dyn RateSink>,
        audit: AuditLog,
        options: CaptureOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sniffer,
                rates,
                audit,
                options,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Starts capturing `mac`. A zero `duration` runs until `stop`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        &self,
        mac: &MacAddr,
        duration: Duration,
        purpose: CapturePurpose,
    ) -> Result<CaptureTicket, IpsError> {
        let duration = (!duration.is_zero()).then_some(duration);
        let started_at = Utc::now();
        let output = self.inner.options.output_dir.join(format!(
            "{}_{}_{}.pcap",
            purpose.file_prefix(),
            mac.compact(),
            started_at.timestamp()
        ));

        std::fs::create_dir_all(&self.inner.options.output_dir).map_err(|e| {
            IpsError::SnifferSpawnFailure(format!(
                "cannot create {}: {e}",
                self.inner.options.output_dir.display()
            ))
        })?;

        let mut sessions = self.inner.sessions.lock();
        if sessions.contains_key(mac) {
            return Err(IpsError::AlreadyCapturing(mac.clone()));
        }

        let mut cmd = self.inner.sniffer.command(mac, duration, &output);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = cmd.spawn().map_err(|e| {
            IpsError::SnifferSpawnFailure(format!(
                "{}: {e}",
                cmd.as_std().get_program().to_string_lossy()
            ))
        })?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let (done_tx, done_rx) = watch::channel(false);
        let info = SessionInfo {
            mac: mac.clone(),
            output: output.clone(),
            started_at,
            duration,
        };
        sessions.insert(
            mac.clone(),
            SessionEntry {
                info: info.clone(),
                stop_tx: Some(stop_tx),
                done_rx,
            },
        );
        drop(sessions);

        info!(%mac, file = %output.display(), ?duration, "Capture started");

        let release = SessionRelease {
            inner: self.inner.clone(),
            mac: mac.clone(),
            done_tx,
        };
        let completion = tokio::spawn(self.clone().supervise(info, child, stop_rx, release));
        Ok(CaptureTicket { output, completion })
    }

    /// Asks the running capture for `mac` to terminate and waits, bounded,
    /// until it has been released.
    pub async fn stop(&self, mac: &MacAddr) -> Result<(), IpsError> {
        let (stop_tx, mut done_rx) = {
            let mut sessions = self.inner.sessions.lock();
            let entry = sessions
                .get_mut(mac)
                .ok_or_else(|| IpsError::NoActiveSession(mac.clone()))?;
            (entry.stop_tx.take(), entry.done_rx.clone())
        };
        if let Some(stop_tx) = stop_tx {
            let _ = stop_tx.send(());
        }

        let wait = self.inner.options.stop_grace + STOP_WAIT_SLACK;
        if timeout(wait, done_rx.wait_for(|done| *done)).await.is_err() {
            warn!(%mac, "Capture did not release within {wait:?}");
        }
        Ok(())
    }

    pub fn is_capturing(&self, mac: &MacAddr) -> bool {
        self.inner.sessions.lock().contains_key(mac)
    }

    pub fn active_sessions(&self) -> Vec<SessionInfo> {
        self.inner
            .sessions
            .lock()
            .values()
            .map(|entry| entry.info.clone())
            .collect()
    }

    async fn supervise(
        self,
        info: SessionInfo,
        mut child: Child,
        mut stop_rx: oneshot::Receiver<()>,
        release: SessionRelease,
    ) -> CaptureReport {
        let started = Instant::now();
        let mut drain = spawn_output_drain(&info.mac, &mut child);

        let deadline = info.duration.map(|d| d + self.inner.options.deadline_slack);
        let exit = tokio::select! {
            status = child.wait() => Exit::Natural(status),
            _ = &mut stop_rx => Exit::Stop,
            _ = wait_deadline(deadline) => Exit::Deadline,
        };

        let outcome = match exit {
            Exit::Natural(Ok(status)) if status.success() => CaptureOutcome::Completed,
            Exit::Natural(Ok(status)) => CaptureOutcome::Failed(format!("sniffer {status}")),
            Exit::Natural(Err(e)) => CaptureOutcome::Failed(e.to_string()),
            Exit::Stop => {
                self.terminate(&info.mac, &mut child).await;
                CaptureOutcome::Stopped
            }
            Exit::Deadline => {
                warn!(mac = %info.mac, "Capture overran its window, terminating");
                self.terminate(&info.mac, &mut child).await;
                CaptureOutcome::TimedOut
            }
        };
        let elapsed = effective_elapsed(info.duration, started.elapsed());

        let last_line = match timeout(OUTPUT_DRAIN, &mut drain).await {
            Ok(Ok(line)) => line,
            _ => {
                drain.abort();
                None
            }
        };

        let report = self.finalize(info, outcome, elapsed, last_line).await;
        drop(release);
        report
    }

    /// SIGTERM first so the sniffer can flush its file, then a hard kill.
    async fn terminate(&self, mac: &MacAddr, child: &mut Child) {
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                let signalled = tokio::process::Command::new("kill")
                    .arg("-TERM")
                    .arg(pid.to_string())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await;
                if let Err(e) = signalled {
                    debug!(%mac, "kill -TERM {pid} failed: {e}");
                }
            }
        }

        let grace = self.inner.options.stop_grace;
        if timeout(grace, child.wait()).await.is_err() {
            warn!(%mac, "Sniffer ignored termination for {grace:?}, killing");
            if let Err(e) = child.kill().await {
                warn!(%mac, "Failed to kill sniffer: {e}");
            }
        }
    }

    async fn finalize(
        &self,
        info: SessionInfo,
        outcome: CaptureOutcome,
        elapsed: Duration,
        last_line: Option<String>,
    ) -> CaptureReport {
        let mut report = CaptureReport {
            mac: info.mac,
            output: info.output,
            outcome,
            bytes: None,
            elapsed,
            rate_kbps: None,
        };
        let audit = &self.inner.audit;

        if let CaptureOutcome::Failed(reason) = &report.outcome {
            let detail = last_line.map(|l| format!(" ({l})")).unwrap_or_default();
            audit.record_failure(
                &report.mac,
                0.0,
                format!("Traffic capture failed: {reason}{detail}"),
            );
            return report;
        }

        let bytes = match tokio::fs::metadata(&report.output).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                audit.record_failure(
                    &report.mac,
                    0.0,
                    format!(
                        "Traffic capture {} without artifact {}: {e}",
                        report.outcome.label(),
                        report.output.display()
                    ),
                );
                return report;
            }
        };
        report.bytes = Some(bytes);
        report.rate_kbps = realized_rate_kbps(bytes, elapsed.as_secs_f64());

        let rate = report.rate_kbps.unwrap_or(0.0);
        if let Some(kbps) = report.rate_kbps {
            if let Err(e) = self.inner.rates.record(&report.mac, kbps, Utc::now()) {
                warn!(mac = %report.mac, "Failed to record capture rate: {e}");
            }
        } else {
            debug!(mac = %report.mac, "Capture elapsed no time, rate not recorded");
        }
        audit.record(
            &report.mac,
            rate,
            format!(
                "Traffic capture {} and saved to {}",
                report.outcome.label(),
                file_name(&report.output)
            ),
        );
        report
    }
}

async fn wait_deadline(deadline: Option<Duration>) {
    match deadline {
        Some(deadline) => sleep(deadline).await,
        None => std::future::pending().await,
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Streams sniffer output to the debug log; resolves to the last line seen,
/// preferring stderr.
fn spawn_output_drain(mac: &MacAddr, child: &mut Child) -> JoinHandle<Option<String>> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let mac = mac.clone();
    tokio::spawn(async move {
        let (out, err) = tokio::join!(drain(&mac, stdout), drain(&mac, stderr));
        err.or(out)
    })
}

async fn drain<R>(mac: &MacAddr, pipe: Option<R>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(pipe?).lines();
    let mut last = None;
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        debug!(%mac, "sniffer: {line}");
        last = Some(line.to_string());
    }
    last
}
