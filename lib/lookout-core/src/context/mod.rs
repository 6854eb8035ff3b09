//! Shared build state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// Process-wide state established by the build-start handshake.
///
/// The context starts unready: the queue rejects every event until [`mark_ready`] is called with
/// the identifier and bearer token the intake service handed back. The gate only ever transitions
/// from unset to set.
///
/// [`mark_ready`]: Self::mark_ready
#[derive(Debug, Default)]
pub struct BuildContext {
    ready: AtomicBool,
    auth_token: RwLock<Option<String>>,
    build_hashed_id: RwLock<Option<String>>,
}

impl BuildContext {
    /// Creates a new, unready `BuildContext`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the acknowledged build and opens the gate for enqueuing events.
    pub fn mark_ready(&self, build_hashed_id: impl Into<String>, auth_token: impl Into<String>) {
        if let Ok(mut id) = self.build_hashed_id.write() {
            *id = Some(build_hashed_id.into());
        }
        if let Ok(mut token) = self.auth_token.write() {
            *token = Some(auth_token.into());
        }
        self.ready.store(true, Ordering::Release);
    }

    /// Returns `true` once the build-start handshake has completed.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Bearer token for intake requests, if the handshake has completed.
    pub fn auth_token(&self) -> Option<String> {
        self.auth_token.read().ok().and_then(|token| token.clone())
    }

    /// Identifier the intake service assigned to the build, if known.
    pub fn build_hashed_id(&self) -> Option<String> {
        self.build_hashed_id.read().ok().and_then(|id| id.clone())
    }
}
