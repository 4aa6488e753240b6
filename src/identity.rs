use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use log::debug;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::{CoreError, Principal, Result};

/// Opaque handle for one active login
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken(Uuid);

impl SessionToken {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Creates and tears down the identity a privileged call runs under
///
/// The executor calls `login` exactly once per fresh call and `logout`
/// exactly once when the call ends, whatever the outcome was.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn login(&self, principal: &Principal) -> Result<SessionToken>;

    async fn logout(&self, token: SessionToken) -> Result<()>;
}

/// Session counters for a [`LocalIdentity`]
#[derive(Debug, Clone)]
pub struct IdentityStats {
    pub active_sessions: usize,
    pub logins: u64,
    pub logouts: u64,
}

impl fmt::Display for IdentityStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Identity: {} active sessions ({} logins, {} logouts)",
            self.active_sessions, self.logins, self.logouts
        )
    }
}

/// In-process identity provider
///
/// Hands out random tokens and tracks which are live. Logging out a
/// token twice is an error, which makes unbalanced login/logout pairs
/// visible in tests.
pub struct LocalIdentity {
    sessions: RwLock<HashMap<SessionToken, Principal>>,
    logins: AtomicU64,
    logouts: AtomicU64,
}

impl LocalIdentity {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            logins: AtomicU64::new(0),
            logouts: AtomicU64::new(0),
        }
    }

    pub async fn stats(&self) -> IdentityStats {
        let sessions = self.sessions.read().await;
        IdentityStats {
            active_sessions: sessions.len(),
            logins: self.logins.load(Ordering::Relaxed),
            logouts: self.logouts.load(Ordering::Relaxed),
        }
    }
}

impl Default for LocalIdentity {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentity {
    async fn login(&self, principal: &Principal) -> Result<SessionToken> {
        principal.validate().map_err(CoreError::Identity)?;

        let token = SessionToken::generate();
        let mut sessions = self.sessions.write().await;
        sessions.insert(token, principal.clone());
        self.logins.fetch_add(1, Ordering::Relaxed);
        debug!("login {token} as {principal}");
        Ok(token)
    }

    async fn logout(&self, token: SessionToken) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let principal = sessions
            .remove(&token)
            .ok_or_else(|| CoreError::Identity(format!("unknown session token {token}")))?;
        self.logouts.fetch_add(1, Ordering::Relaxed);
        debug!("logout {token} ({principal})");
        Ok(())
    }
}
