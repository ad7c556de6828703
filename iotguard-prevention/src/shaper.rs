//! ## iotguard-prevention::shaper
//! **External traffic shaping via configured command templates**
//!
//! The stock templates drive a `dnctl` pipe, which limits the whole
//! interface rather than one device. `ShaperScope` tells the controller
//! which of the two it is dealing with.

use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use iotguard_core::prelude::{IpsError, MacAddr};

#[derive(Debug, Error)]
pub enum ShaperError {
    #[error("Shaper command is empty")]
    EmptyCommand,
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("{program} did not finish within {after:?}")]
    Timeout { program: String, after: Duration },
}

impl From<ShaperError> for IpsError {
    fn from(e: ShaperError) -> Self {
        IpsError::ShaperFailure(e.to_string())
    }
}

/// Whether one shaper rule can coexist with another for a different device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaperScope {
    /// A single process-wide limit; applying for one device replaces it.
    Global,
    /// Independent rules per device.
    PerDevice,
}

#[async_trait]
pub trait TrafficShaper: Send + Sync {
    fn scope(&self) -> ShaperScope;

    async fn apply(&self, mac: &MacAddr, rate_kbps: f64) -> Result<(), IpsError>;

    async fn remove(&self, mac: &MacAddr) -> Result<(), IpsError>;
}

/// Bound on a single shaper command unless configured otherwise.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs argv templates. `{rate}` expands to the limit in KB/s and `{mac}` to
/// the device address.
///
/// Commands get no stdin and are killed once `timeout` passes, so a shaper
/// waiting on a password prompt fails instead of hanging.
#[derive(Debug, Clone)]
pub struct CommandShaper {
    apply: Vec<String>,
    remove: Vec<String>,
    scope: ShaperScope,
    timeout: Duration,
}

impl CommandShaper {
    pub fn new(apply: Vec<String>, remove: Vec<String>, scope: ShaperScope) -> Self {
        Self {
            apply,
            remove,
            scope,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, template: &[String], mac: &MacAddr, rate_kbps: f64) -> Result<(), ShaperError> {
        let argv = render(template, mac, rate_kbps);
        let (program, args) = argv.split_first().ok_or(ShaperError::EmptyCommand)?;
        debug!(%mac, "Running shaper: {}", argv.join(" "));

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let Output { status, stderr, .. } = timeout(self.timeout, output)
            .await
            .map_err(|_| ShaperError::Timeout {
                program: program.clone(),
                after: self.timeout,
            })?
            .map_err(|source| ShaperError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !status.success() {
            return Err(ShaperError::Exit {
                program: program.clone(),
                status,
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TrafficShaper for CommandShaper {
    fn scope(&self) -> ShaperScope {
        self.scope
    }

    async fn apply(&self, mac: &MacAddr, rate_kbps: f64) -> Result<(), IpsError> {
        Ok(self.run(&self.apply, mac, rate_kbps).await?)
    }

    async fn remove(&self, mac: &MacAddr) -> Result<(), IpsError> {
        Ok(self.run(&self.remove, mac, 0.0).await?)
    }
}

fn render(template: &[String], mac: &MacAddr, rate_kbps: f64) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            arg.replace("{rate}", &rate_kbps.to_string())
                .replace("{mac}", mac.as_str())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    fn mac() -> MacAddr {
        MacAddr::parse("AA:BB:CC:DD:EE:FF").unwrap()
    }

    #[test]
    fn templates_expand_rate_and_mac() {
        let template = argv(&["sudo", "dnctl", "pipe", "config", "1", "bw={rate}KByte/s", "{mac}"]);
        assert_eq!(
            render(&template, &mac(), 10.0),
            argv(&["sudo", "dnctl", "pipe", "config", "1", "bw=10KByte/s", "aa:bb:cc:dd:ee:ff"])
        );
        assert_eq!(render(&template, &mac(), 12.5)[5], "bw=12.5KByte/s");
    }

    #[tokio::test]
    async fn successful_command() {
        let shaper = CommandShaper::new(
            argv(&["sh", "-c", "test \"$0\" = 10", "{rate}"]),
            argv(&["true"]),
            ShaperScope::Global,
        );
        shaper.apply(&mac(), 10.0).await.unwrap();
        shaper.remove(&mac()).await.unwrap();
        assert_eq!(shaper.scope(), ShaperScope::Global);
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_shaper_failure() {
        let shaper = CommandShaper::new(
            argv(&["sh", "-c", "echo 'dnctl: permission denied' >&2; exit 1"]),
            argv(&["true"]),
            ShaperScope::Global,
        );
        match shaper.apply(&mac(), 10.0).await {
            Err(IpsError::ShaperFailure(msg)) => assert!(msg.contains("permission denied")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn hung_command_is_killed_after_timeout() {
        let shaper = CommandShaper::new(
            argv(&["sleep", "30"]),
            argv(&["true"]),
            ShaperScope::Global,
        )
        .with_timeout(Duration::from_millis(200));

        let started = std::time::Instant::now();
        match shaper.apply(&mac(), 10.0).await {
            Err(IpsError::ShaperFailure(msg)) => assert!(msg.contains("did not finish")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
        shaper.remove(&mac()).await.unwrap();
    }

    #[tokio::test]
    async fn commands_do_not_inherit_stdin() {
        // `read` fails at end of input instead of waiting for a terminal
        let shaper = CommandShaper::new(
            argv(&["sh", "-c", "read answer"]),
            argv(&["true"]),
            ShaperScope::Global,
        )
        .with_timeout(Duration::from_secs(5));
        assert!(matches!(
            shaper.apply(&mac(), 10.0).await,
            Err(IpsError::ShaperFailure(msg)) if msg.contains("exited with")
        ));
    }

    #[tokio::test]
    async fn missing_program_is_a_shaper_failure() {
        let shaper = CommandShaper::new(
            argv(&["/nonexistent/dnctl"]),
            Vec::new(),
            ShaperScope::PerDevice,
        );
        assert!(matches!(
            shaper.apply(&mac(), 10.0).await,
            Err(IpsError::ShaperFailure(_))
        ));
        assert!(matches!(
            shaper.remove(&mac()).await,
            Err(IpsError::ShaperFailure(msg)) if msg.contains("empty")
        ));
    }
}
