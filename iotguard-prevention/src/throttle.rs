//! ## iotguard-prevention::throttle
//! **Apply a rate limit, remove it again when its timer runs out**
//!
//! Each throttled device owns exactly one expiry task. Re-applying replaces
//! the task and bumps a generation counter; an expiry that finds a different
//! generation in the map does nothing. Shaper calls are serialized through
//! one async lock since the stock shaper is not device-scoped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use iotguard_core::prelude::{AuditLog, IpsError, MacAddr};

use crate::shaper::{ShaperScope, TrafficShaper};

/// A currently active limit.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleInfo {
    pub mac: MacAddr,
    pub rate_kbps: f64,
    pub until: DateTime<Utc>,
}

struct ActiveThrottle {
    generation: u64,
    info: ThrottleInfo,
    timer: JoinHandle<()>,
}

struct Inner {
    shaper: Arc<dyn TrafficShaper>,
    audit: AuditLog,
    ops: tokio::sync::Mutex<()>,
    active: Mutex<HashMap<MacAddr, ActiveThrottle>>,
    generation: AtomicU64,
}

#[derive(Clone)]
pub struct ThrottleController {
    inner: Arc<Inner>,
}

impl ThrottleController {
    pub fn new(shaper: Arc<dyn TrafficShaper>, audit: AuditLog) -> Self {
        Self {
            inner: Arc::new(Inner {
                shaper,
                audit,
                ops: tokio::sync::Mutex::new(()),
                active: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Limits `mac` to `rate_kbps` for `minutes`, then lifts the limit.
    ///
    /// An existing throttle for the device is superseded and its timer
    /// restarted. With a global shaper, throttles on other devices are
    /// superseded as well. On shaper failure nothing is armed and any
    /// previous throttle is left as it was.
    pub async fn apply(&self, mac: &MacAddr, rate_kbps: f64, minutes: u32) -> Result<(), IpsError> {
        let duration = Duration::from_secs(u64::from(minutes) * 60);
        let _op = self.inner.ops.lock().await;

        if let Err(e) = self.inner.shaper.apply(mac, rate_kbps).await {
            self.inner
                .audit
                .record_failure(mac, rate_kbps, format!("Failed to throttle: {e}"));
            return Err(e);
        }
        self.inner.audit.record(
            mac,
            rate_kbps,
            format!("Throttled to {rate_kbps} KB/s for {minutes} minutes"),
        );

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let deadline = Instant::now() + duration;
        let info = ThrottleInfo {
            mac: mac.clone(),
            rate_kbps,
            until: Utc::now() + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero()),
        };
        let timer = {
            let controller = self.clone();
            let mac = mac.clone();
            tokio::spawn(async move {
                sleep_until(deadline).await;
                controller.expire(&mac, generation).await;
            })
        };

        let superseded: Vec<MacAddr> = {
            let mut active = self.inner.active.lock();
            if let Some(previous) = active.insert(
                mac.clone(),
                ActiveThrottle {
                    generation,
                    info,
                    timer,
                },
            ) {
                previous.timer.abort();
                debug!(%mac, "Restarted throttle timer");
            }

            if self.inner.shaper.scope() == ShaperScope::Global {
                let others: Vec<MacAddr> = active.keys().filter(|m| *m != mac).cloned().collect();
                for other in &others {
                    if let Some(previous) = active.remove(other) {
                        previous.timer.abort();
                    }
                }
                others
            } else {
                Vec::new()
            }
        };

        for other in superseded {
            self.inner
                .audit
                .record(&other, 0.0, format!("Throttle superseded by {mac}"));
        }
        Ok(())
    }

    /// Lifts the limit on `mac` now. Without an active throttle this only
    /// records a no-op event.
    pub async fn remove(&self, mac: &MacAddr) -> Result<(), IpsError> {
        let _op = self.inner.ops.lock().await;

        let Some(previous) = self.inner.active.lock().remove(mac) else {
            self.inner
                .audit
                .record(mac, 0.0, "No active throttle to remove");
            return Ok(());
        };
        previous.timer.abort();

        self.lift(mac).await
    }

    pub fn is_throttled(&self, mac: &MacAddr) -> bool {
        self.inner.active.lock().contains_key(mac)
    }

    pub fn active(&self) -> Vec<ThrottleInfo> {
        self.inner
            .active
            .lock()
            .values()
            .map(|t| t.info.clone())
            .collect()
    }

    async fn expire(&self, mac: &MacAddr, generation: u64) {
        let _op = self.inner.ops.lock().await;

        {
            let mut active = self.inner.active.lock();
            match active.get(mac) {
                Some(current) if current.generation == generation => {
                    // the timer is this task; dropping its handle detaches it
                    active.remove(mac);
                }
                _ => {
                    debug!(%mac, generation, "Stale throttle timer ignored");
                    return;
                }
            }
        }

        let _ = self.lift(mac).await;
    }

    async fn lift(&self, mac: &MacAddr) -> Result<(), IpsError> {
        match self.inner.shaper.remove(mac).await {
            Ok(()) => {
                self.inner.audit.record(mac, 0.0, "Throttle removed");
                Ok(())
            }
            Err(e) => {
                self.inner
                    .audit
                    .record_failure(mac, 0.0, format!("Failed to remove throttle: {e}"));
                Err(e)
            }
        }
    }
}
