//! Upstream session lifecycle.
//!
//! One session token is shared by every device. It is created lazily, replaced
//! wholesale whenever the upstream signals it is no longer valid, and never
//! refreshed on a timer.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::TelemetryApi;
use crate::error::{FetchError, Result};
use crate::wire;

/// Opaque upstream session token.
///
/// Cloning is cheap. `Debug` never prints the token itself.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(Arc<str>);

impl SessionToken {
    pub fn new(token: impl AsRef<str>) -> Self {
        Self(Arc::from(token.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix suitable for logs.
    pub fn preview(&self) -> String {
        let prefix: String = self.0.chars().take(4).collect();
        format!("{prefix}...")
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionToken").field(&self.preview()).finish()
    }
}

/// Account used to log in upstream.
#[derive(Clone)]
pub struct AccountCredentials {
    pub account: String,
    pub password: String,
}

impl AccountCredentials {
    pub fn new(account: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for AccountCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountCredentials")
            .field("account", &self.account)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Token slot plus the outcome of the latest login attempt.
#[derive(Debug, Default)]
struct SessionSlot {
    token: Option<SessionToken>,
    /// Bumped every time a login attempt completes
    epoch: u64,
    last_failure: Option<FetchError>,
}

/// Owns the process-wide session token.
pub struct SessionManager {
    api: Arc<dyn TelemetryApi>,
    credentials: AccountCredentials,
    slot: RwLock<SessionSlot>,
    /// Serializes logins so concurrent callers share one acquisition
    acquire_guard: Mutex<()>,
    logins: AtomicU64,
}

impl SessionManager {
    pub fn new(api: Arc<dyn TelemetryApi>, credentials: AccountCredentials) -> Self {
        Self {
            api,
            credentials,
            slot: RwLock::new(SessionSlot::default()),
            acquire_guard: Mutex::new(()),
            logins: AtomicU64::new(0),
        }
    }

    /// The installed token, if any.
    pub fn current(&self) -> Option<SessionToken> {
        self.slot.read().token.clone()
    }

    pub fn is_active(&self) -> bool {
        self.slot.read().token.is_some()
    }

    /// Number of login calls performed so far.
    pub fn login_count(&self) -> u64 {
        self.logins.load(Ordering::Relaxed)
    }

    /// Log in and install the resulting token.
    ///
    /// On failure the credential is left unset.
    pub async fn acquire(&self) -> Result<SessionToken> {
        let _guard = self.acquire_guard.lock().await;
        self.login_locked().await
    }

    /// Return the installed token, logging in first if there is none.
    ///
    /// Callers racing on a missing token wait for a single login and share
    /// its outcome: the token on success, the same error on failure.
    pub async fn current_or_acquire(&self) -> Result<SessionToken> {
        let seen = {
            let slot = self.slot.read();
            if let Some(token) = &slot.token {
                return Ok(token.clone());
            }
            slot.epoch
        };

        let _guard = self.acquire_guard.lock().await;
        {
            let slot = self.slot.read();
            if let Some(token) = &slot.token {
                debug!("session installed while waiting for login");
                return Ok(token.clone());
            }
            if slot.epoch != seen {
                if let Some(failure) = &slot.last_failure {
                    debug!(error = %failure, "login attempt failed while waiting, not retrying");
                    return Err(failure.clone());
                }
            }
        }
        self.login_locked().await
    }

    /// Drop `stale` if it is still the installed token.
    ///
    /// A newer token installed by another caller is left alone.
    pub fn invalidate(&self, stale: &SessionToken) -> bool {
        let mut slot = self.slot.write();
        if slot.token.as_ref() == Some(stale) {
            slot.token = None;
            info!(session = %stale.preview(), "upstream session invalidated");
            true
        } else {
            false
        }
    }

    async fn login_locked(&self) -> Result<SessionToken> {
        self.logins.fetch_add(1, Ordering::Relaxed);
        let outcome = match self
            .api
            .login(&self.credentials.account, &self.credentials.password)
            .await
        {
            Ok(body) => wire::parse_login(&body).map(SessionToken::new),
            Err(e) => Err(e),
        };

        let mut slot = self.slot.write();
        slot.epoch += 1;
        match outcome {
            Ok(token) => {
                slot.token = Some(token.clone());
                slot.last_failure = None;
                info!(session = %token.preview(), "upstream session acquired");
                Ok(token)
            }
            Err(e) => {
                slot.token = None;
                slot.last_failure = Some(e.clone());
                warn!(error = %e, "upstream login failed");
                Err(e)
            }
        }
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("credentials", &self.credentials)
            .field("current", &self.current())
            .field("logins", &self.login_count())
            .finish()
    }
}
