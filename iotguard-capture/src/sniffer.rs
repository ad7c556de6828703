//! External packet sniffer invocation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;

use iotguard_core::prelude::MacAddr;

/// Builds the process that records one device's traffic into `output`.
///
/// `duration` of `None` means run until stopped. The process must exit with
/// status zero on a normal finish.
pub trait Sniffer: Send + Sync {
    fn command(&self, mac: &MacAddr, duration: Option<Duration>, output: &Path) -> Command;
}

/// `tshark` writing pcap files, filtered on the device's hardware address.
#[derive(Debug, Clone)]
pub struct TsharkSniffer {
    program: PathBuf,
    interface: String,
}

impl TsharkSniffer {
    pub fn new(program: impl Into<PathBuf>, interface: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            interface: interface.into(),
        }
    }
}

impl Sniffer for TsharkSniffer {
    fn command(&self, mac: &MacAddr, duration: Option<Duration>, output: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-i").arg(&self.interface);
        if let Some(duration) = duration {
            // autostop only takes whole seconds
            let secs = duration.as_secs_f64().ceil().max(1.0) as u64;
            cmd.arg("-a").arg(format!("duration:{secs}"));
        }
        cmd.arg("-w")
            .arg(output)
            .arg("-f")
            .arg(format!("ether host {mac}"));
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn bounded_capture_uses_autostop() {
        let sniffer = TsharkSniffer::new("tshark", "bridge100");
        let mac = MacAddr::parse("00:11:22:33:44:55").unwrap();
        let cmd = sniffer.command(&mac, Some(Duration::from_millis(9500)), Path::new("out.pcap"));

        assert_eq!(cmd.as_std().get_program(), "tshark");
        assert_eq!(
            args(&cmd),
            [
                "-i",
                "bridge100",
                "-a",
                "duration:10",
                "-w",
                "out.pcap",
                "-f",
                "ether host 00:11:22:33:44:55"
            ]
        );
    }

    #[test]
    fn unbounded_capture_has_no_autostop() {
        let sniffer = TsharkSniffer::new("/usr/bin/tshark", "eth0");
        let mac = MacAddr::parse("00:11:22:33:44:55").unwrap();
        let cmd = sniffer.command(&mac, None, Path::new("out.pcap"));

        assert!(!args(&cmd).iter().any(|a| a == "-a"));
    }
}
