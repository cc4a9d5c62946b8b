//! Per-instance install lock. At most one install-class operation
//! (version download, loader install, mod install, modpack install) may be
//! in flight for a given instance; a second attempt fails immediately with
//! `Busy` rather than queuing behind the first.

use beacon_core::{LauncherError, Result};
use lazy_static::lazy_static;
use std::collections::HashSet;
use std::sync::Mutex;

lazy_static! {
    static ref BUSY_INSTANCES: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
}

/// Releases the lock for `instance_id` when dropped, including on early
/// return via `?` from the guarded operation.
pub struct InstallGuard {
    instance_id: String,
}

impl Drop for InstallGuard {
    fn drop(&mut self) {
        let mut busy = BUSY_INSTANCES.lock().unwrap_or_else(|e| e.into_inner());
        busy.remove(&self.instance_id);
    }
}

pub fn acquire(instance_id: &str) -> Result<InstallGuard> {
    let mut busy = BUSY_INSTANCES.lock().unwrap_or_else(|e| e.into_inner());
    if !busy.insert(instance_id.to_string()) {
        return Err(LauncherError::Busy);
    }
    Ok(InstallGuard {
        instance_id: instance_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_first_held() {
        let _first = acquire("inst-1").unwrap();
        let second = acquire("inst-1");
        assert!(matches!(second, Err(LauncherError::Busy)));
    }

    #[test]
    fn lock_releases_on_drop() {
        {
            let _guard = acquire("inst-2").unwrap();
        }
        assert!(acquire("inst-2").is_ok());
    }
}
