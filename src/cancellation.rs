//! Registry of cancellation tokens keyed by instance id, so a running
//! install can be cancelled from a separate command invocation (spec §5).

use beacon_core::{LauncherError, Result};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

lazy_static! {
    static ref CANCELLATION_TOKENS: Mutex<HashMap<String, CancellationToken>> = Mutex::new(HashMap::new());
}

pub fn create_token(instance_id: &str) -> CancellationToken {
    let token = CancellationToken::new();
    let mut tokens = CANCELLATION_TOKENS.lock().unwrap_or_else(|e| e.into_inner());
    tokens.insert(instance_id.to_string(), token.clone());
    token
}

pub fn cancel(instance_id: &str) -> bool {
    let tokens = CANCELLATION_TOKENS.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(token) = tokens.get(instance_id) {
        token.cancel();
        true
    } else {
        false
    }
}

pub fn remove_token(instance_id: &str) {
    let mut tokens = CANCELLATION_TOKENS.lock().unwrap_or_else(|e| e.into_inner());
    tokens.remove(instance_id);
}

pub fn is_cancelled(instance_id: &str) -> bool {
    let tokens = CANCELLATION_TOKENS.lock().unwrap_or_else(|e| e.into_inner());
    tokens.get(instance_id).map(|t| t.is_cancelled()).unwrap_or(false)
}

/// Checked between download/extract steps in the installers; turns a
/// tripped token into the `Cancelled` error the caller propagates.
pub fn ensure_not_cancelled(instance_id: &str) -> Result<()> {
    if is_cancelled(instance_id) {
        Err(LauncherError::Cancelled)
    } else {
        Ok(())
    }
}

/// Releases `instance_id`'s token when dropped, including on early return
/// via `?` from the guarded install.
pub struct CancelGuard {
    instance_id: String,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        remove_token(&self.instance_id);
    }
}

pub fn guard(instance_id: &str) -> CancelGuard {
    create_token(instance_id);
    CancelGuard {
        instance_id: instance_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_trips_the_token_for_that_instance_only() {
        create_token("cancel-a");
        create_token("cancel-b");
        assert!(cancel("cancel-a"));
        assert!(is_cancelled("cancel-a"));
        assert!(!is_cancelled("cancel-b"));
        remove_token("cancel-a");
        remove_token("cancel-b");
    }

    #[test]
    fn cancel_with_no_token_returns_false() {
        assert!(!cancel("cancel-missing"));
    }

    #[test]
    fn ensure_not_cancelled_errors_only_after_cancel() {
        create_token("cancel-c");
        assert!(ensure_not_cancelled("cancel-c").is_ok());
        cancel("cancel-c");
        assert!(matches!(ensure_not_cancelled("cancel-c"), Err(LauncherError::Cancelled)));
        remove_token("cancel-c");
    }

    #[test]
    fn guard_removes_its_token_on_drop() {
        {
            let _g = guard("cancel-d");
            assert!(ensure_not_cancelled("cancel-d").is_ok());
        }
        assert!(!is_cancelled("cancel-d"));
        assert!(!cancel("cancel-d"));
    }
}
