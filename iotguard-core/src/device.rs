//! Device identity, per-device thresholds and the live IPS settings.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::IpsError;

/// Violation ceiling applied when a device has no threshold record (KB/s).
pub const DEFAULT_MAX_RATE: f64 = 100.0;
/// Throttle target applied when a device has no threshold record (KB/s).
pub const DEFAULT_MIN_RATE: f64 = 10.0;
/// Throttle duration used when no IPS configuration has been stored yet.
pub const DEFAULT_THROTTLE_MINUTES: u32 = 5;

lazy_static! {
    static ref MAC_RE: Regex =
        Regex::new("^[0-9a-fA-F]{2}([:-][0-9a-fA-F]{2}){5}$").expect("static MAC pattern");
}

/// Hardware address identifying a device, normalised to lowercase `aa:bb:cc:dd:ee:ff`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr(String);

impl MacAddr {
    pub fn parse(raw: &str) -> Result<Self, IpsError> {
        let raw = raw.trim();
        if !MAC_RE.is_match(raw) {
            return Err(IpsError::InvalidMac(raw.to_string()));
        }
        Ok(Self(raw.replace('-', ":").to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Separator-free form, safe for file names.
    pub fn compact(&self) -> String {
        self.0.replace(':', "")
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MacAddr {
    type Err = IpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MacAddr {
    type Error = IpsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.0
    }
}

/// A device known to the registry. The core only reads it to label alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub mac: MacAddr,
    pub name: Option<String>,
    pub ipv4: Option<Ipv4Addr>,
    pub vendor: Option<String>,
    pub description: Option<String>,
}

impl Device {
    pub fn new(mac: MacAddr) -> Self {
        Self {
            mac,
            name: None,
            ipv4: None,
            vendor: None,
            description: None,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }
}

/// Per-device rate limits in KB/s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub mac: MacAddr,
    /// Violation ceiling.
    pub max_rate: f64,
    /// Rate applied while the device is throttled.
    pub min_rate: f64,
}

impl Threshold {
    pub fn new(mac: MacAddr, max_rate: f64, min_rate: f64) -> Self {
        Self {
            mac,
            max_rate,
            min_rate,
        }
    }

    pub fn with_defaults(mac: MacAddr) -> Self {
        Self::new(mac, DEFAULT_MAX_RATE, DEFAULT_MIN_RATE)
    }

    #[inline]
    pub fn is_exceeded_by(&self, rate: f64) -> bool {
        rate > self.max_rate
    }
}

/// Global IPS settings, edited by the operator and re-read every poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpsSettings {
    pub enabled: bool,
    pub throttle_minutes: u32,
    pub notification_email: Option<String>,
    pub notification_phone: Option<String>,
}

impl Default for IpsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            throttle_minutes: DEFAULT_THROTTLE_MINUTES,
            notification_email: None,
            notification_phone: None,
        }
    }
}

impl IpsSettings {
    /// Email destination, ignoring blank values left behind by form input.
    pub fn email(&self) -> Option<&str> {
        non_blank(self.notification_email.as_deref())
    }

    pub fn phone(&self) -> Option<&str> {
        non_blank(self.notification_phone.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_is_normalised() {
        let mac = MacAddr::parse("AA-bb-CC-dd-EE-01").unwrap();
        assert_eq!(mac.as_str(), "aa:bb:cc:dd:ee:01");
        assert_eq!(mac.compact(), "aabbccddee01");
    }

    #[test]
    fn malformed_mac_is_rejected() {
        for raw in ["", "aa:bb:cc:dd:ee", "zz:bb:cc:dd:ee:ff", "aabbccddeeff"] {
            assert!(matches!(MacAddr::parse(raw), Err(IpsError::InvalidMac(_))));
        }
    }

    #[test]
    fn threshold_is_strictly_greater() {
        let t = Threshold::new(MacAddr::parse("00:11:22:33:44:55").unwrap(), 50.0, 5.0);
        assert!(!t.is_exceeded_by(50.0));
        assert!(t.is_exceeded_by(50.01));
    }

    #[test]
    fn defaults_match_registry_defaults() {
        let t = Threshold::with_defaults(MacAddr::parse("00:11:22:33:44:55").unwrap());
        assert_eq!((t.max_rate, t.min_rate), (100.0, 10.0));
        let settings = IpsSettings::default();
        assert!(settings.enabled);
        assert_eq!(settings.throttle_minutes, 5);
    }

    #[test]
    fn blank_destinations_are_absent() {
        let settings = IpsSettings {
            notification_email: Some("  ".into()),
            notification_phone: Some("+4670000000".into()),
            ..IpsSettings::default()
        };
        assert_eq!(settings.email(), None);
        assert_eq!(settings.phone(), Some("+4670000000"));
    }
}
