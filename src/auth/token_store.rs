//! In-memory token holder and pending login states for the HTTP service.

use crate::auth::oauth::Token;
use crate::error::AuthError;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// Single shared slot for the most recently obtained token.
///
/// Starts empty and is overwritten by every successful exchange. A refresh
/// only lands if the token it replaces is still the one held.
#[derive(Debug, Default)]
pub struct TokenHolder {
    slot: Mutex<Option<Token>>,
}

impl TokenHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held token.
    pub fn set(&self, token: Token) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    /// Store `refreshed` only if the held token is still `stale_access_token`.
    ///
    /// Returns the token held afterwards: `refreshed`, or whatever a concurrent
    /// sign-in stored in the meantime.
    pub fn replace_if_current(&self, stale_access_token: &str, refreshed: Token) -> Token {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(held) if held.access_token != stale_access_token => {
                debug!("Token changed during refresh, keeping the newer one");
                held.clone()
            }
            _ => {
                *slot = Some(refreshed.clone());
                refreshed
            }
        }
    }

    /// Snapshot of the held token; `None` until the first `set`.
    pub fn get(&self) -> Option<Token> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// `state` values handed out by `/login` that have not been redeemed yet.
///
/// Bounded: once full, the oldest outstanding state is forgotten.
#[derive(Debug)]
pub struct PendingStates {
    states: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl PendingStates {
    pub fn new(capacity: usize) -> Self {
        Self {
            states: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Remember a freshly issued state.
    pub fn insert(&self, state: String) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        if states.len() >= self.capacity {
            warn!("Too many pending logins, dropping the oldest");
            states.pop_front();
        }
        states.push_back(state);
    }

    /// Consume `state`; each state can be redeemed once.
    pub fn redeem(&self, state: Option<&str>) -> Result<(), AuthError> {
        let state = state.ok_or(AuthError::StateValidationFailed)?;
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);

        match states.iter().position(|pending| pending == state) {
            Some(index) => {
                states.remove(index);
                Ok(())
            }
            None => Err(AuthError::StateValidationFailed),
        }
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
