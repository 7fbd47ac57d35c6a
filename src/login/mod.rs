//! Per-host login failure tracking and throttling.
//!
//! Every failed attempt both records the failure and slows the caller down;
//! hosts that keep failing are refused outright until they stay quiet for the
//! configured reset window. A background sweeper keeps the ban list from
//! accumulating entries for hosts that gave up, by running the same expiry
//! check the login path runs.
//!
//! The delays are deliberate backpressure against automated retries, not
//! lock contention: they happen after all locks are released and are plain
//! [`tokio::time::sleep`] calls, so a cancelled login task cannot corrupt
//! the shared state.

use crate::{config::LoginConfig, error::Error, otp};
use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};
use tokio::{
    task::JoinHandle,
    time::{sleep, Duration, Instant, MissedTickBehavior},
};
use tracing::{debug, warn};

/// Reserved administrative username, never allowed to authenticate remotely.
const ROOT_USER: &str = "root";

/// User of the passcode-less local session channel.
const SESSION_USER: &str = "nx";

/// Loopback host of the passcode-less local session channel.
const LOOPBACK_HOST: &str = "127.0.0.1";

/// Failure history for one host.
#[derive(Debug, Clone, Copy)]
struct BanRecord {
    /// Reset to "now" on every failure: the window slides.
    window_start: Instant,
    attempts: u32,
}

/// Tracks failed login attempts per originating host and throttles repeat
/// offenders.
///
/// Cheap to clone; clones share the same ban list.
#[derive(Clone)]
pub struct LoginGuard {
    inner: Arc<Inner>,
}

struct Inner {
    config: LoginConfig,
    cache: RwLock<HashMap<String, BanRecord>>,
}

impl LoginGuard {
    #[must_use]
    pub fn new(config: LoginConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                cache: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Check whether `host` may start a login attempt.
    ///
    /// Hosts with no failure history, or whose history is older than the
    /// reset window, pass immediately (stale entries are dropped on the
    /// way). A banned host is held for the configured wait before the
    /// refusal is returned, to slow down automated retries.
    pub async fn check(&self, host: &str) -> bool {
        let record = self.read().get(host).copied();
        let Some(record) = record else {
            return true;
        };
        if record.window_start.elapsed() > self.inner.config.reset_window() {
            // No recent attempts from this host, give it a new chance.
            self.clear(host);
            return true;
        }
        if record.attempts > self.inner.config.max_attempts {
            let wait = self.inner.config.ban_wait();
            debug!(host, attempts = record.attempts, ?wait, "refusing banned host");
            sleep(wait).await;
            return false;
        }
        true
    }

    /// Record a failed attempt from `host` and delay the caller.
    ///
    /// The delay grows with the number of consecutive failures but never
    /// drops below the configured minimum. Does nothing when the feature is
    /// inactive.
    pub async fn increment(&self, host: &str) {
        if !self.inner.config.active {
            return;
        }
        let attempts = {
            let mut cache = self.write();
            let is_new = !cache.contains_key(host);
            let record = cache.entry(host.to_string()).or_insert_with(|| BanRecord {
                window_start: Instant::now(),
                attempts: 0,
            });
            record.window_start = Instant::now();
            record.attempts += 1;
            let attempts = record.attempts;
            if is_new {
                debug!(host, tracked = cache.len(), "tracking new host");
            }
            attempts
        };
        let delay = Duration::from_secs(u64::from(attempts)).max(self.inner.config.min_delay());
        debug!(host, attempts, ?delay, "throttling failed attempt");
        sleep(delay).await;
    }

    /// Forget the failure history of one host.
    pub fn clear(&self, host: &str) {
        let mut cache = self.write();
        cache.remove(host);
        debug!(host, tracked = cache.len(), "removed entry");
    }

    /// Forget all failure history.
    pub fn clear_all(&self) {
        self.write().clear();
        debug!("removed all entries");
    }

    /// Number of hosts currently tracked.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.read().len()
    }

    /// Composite gate run before any credential is verified.
    ///
    /// Whitelisted hosts bypass all checks, as does the passcode-less local
    /// session channel. The administrative user and absent or empty
    /// passcodes are rejected unconditionally. Credentials of the shape
    /// `login@secret` are validated on the `login` part only. Every
    /// rejection is recorded against the host, so the caller pays the
    /// throttling delay before the error comes back.
    ///
    /// # Errors
    /// Returns [`Error::Rejected`] when the attempt must not proceed.
    pub async fn authorize(
        &self,
        host: &str,
        user: &str,
        passcode: Option<&str>,
    ) -> Result<(), Error> {
        if self.inner.config.whitelist.iter().any(|entry| entry == host)
            || (passcode.is_none() && (user == SESSION_USER || host == LOOPBACK_HOST))
        {
            return Ok(());
        }
        let credentials = match passcode {
            Some(value) if !value.is_empty() && !user.eq_ignore_ascii_case(ROOT_USER) => value,
            _ => {
                self.increment(host).await;
                return Err(Error::Rejected);
            }
        };
        // The login and secret may arrive in one string (login@secret); only
        // the login part has a passcode shape.
        let login = credentials.split('@').next().unwrap_or(credentials);
        if !otp::is_valid_shape(login) {
            self.increment(host).await;
            return Err(Error::Rejected);
        }
        Ok(())
    }

    /// Spawn the background sweeper.
    ///
    /// The task periodically runs [`check`](Self::check) on every tracked
    /// host so stale entries are evicted even when the host never comes
    /// back. It is aborted when the returned guard drops, tying its
    /// lifetime to the owning service instead of the process.
    #[must_use]
    pub fn spawn_sweeper(&self) -> SweeperGuard {
        let guard = self.clone();
        let period = self
            .inner
            .config
            .sweep_interval()
            .max(Duration::from_secs(1));
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a freshly started
            // service does not sweep an empty list.
            interval.tick().await;
            loop {
                interval.tick().await;
                let hosts: Vec<String> = guard.read().keys().cloned().collect();
                debug!(tracked = hosts.len(), "sweeping ban list");
                for host in hosts {
                    if !guard.check(&host).await {
                        warn!(host, "host is still banned");
                    }
                }
            }
        });
        SweeperGuard { handle }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, BanRecord>> {
        self.inner
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, BanRecord>> {
        self.inner
            .cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Aborts the sweeper task when dropped.
pub struct SweeperGuard {
    handle: JoinHandle<()>,
}

impl Drop for SweeperGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
