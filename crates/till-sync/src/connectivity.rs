//! Collaborators the engine consults before talking to the server.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

/// Reports whether the device currently has a route to the server.
pub trait ConnectivityMonitor: Send + Sync {
    fn is_connected(&self) -> bool;
}

/// Bearer token supplied by the host application.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(..)")
    }
}

/// Supplies the current credentials, if the user is logged in.
pub trait AuthProvider: Send + Sync {
    fn current_token(&self) -> Option<AuthToken>;
}

/// A connectivity flag flipped by the host (or by tests).
#[derive(Debug)]
pub struct StaticConnectivity {
    online: AtomicBool,
}

impl StaticConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn offline() -> Self {
        Self::new(false)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl ConnectivityMonitor for StaticConnectivity {
    fn is_connected(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// A token slot set on login and cleared on logout.
#[derive(Debug, Default)]
pub struct StaticAuth {
    token: RwLock<Option<AuthToken>>,
}

impl StaticAuth {
    pub fn new(token: Option<AuthToken>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self::new(Some(AuthToken::new(token)))
    }

    pub fn set_token(&self, token: Option<AuthToken>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }
}

impl AuthProvider for StaticAuth {
    fn current_token(&self) -> Option<AuthToken> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
