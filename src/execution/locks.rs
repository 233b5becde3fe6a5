//! Named exclusive locks for mutating steps

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Exclusive-lock acquisition timed out
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("deploy lock for '{environment}' not acquired within {wait_secs}s")]
pub struct LockTimeout {
    pub environment: String,
    pub wait_secs: u64,
}

/// Registry of per-deployment-target locks.
///
/// Build and deploy steps serialize on the lock keyed by their
/// request's environment id, so runs targeting different environments
/// deploy concurrently while runs targeting the same one cannot.
#[derive(Default)]
pub struct DeployLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DeployLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `environment`, waiting at most `wait`.
    pub async fn acquire(
        &self,
        environment: &str,
        wait: Duration,
    ) -> Result<OwnedMutexGuard<()>, LockTimeout> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(environment.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        tokio::time::timeout(wait, lock.lock_owned())
            .await
            .map_err(|_| LockTimeout {
                environment: environment.to_string(),
                wait_secs: wait.as_secs(),
            })
    }
}
