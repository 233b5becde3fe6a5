//! Step scheduling and shared-resource locking

pub mod locks;
pub mod orchestrator;

pub use locks::{DeployLocks, LockTimeout};
pub use orchestrator::{ExecutionEvent, Orchestrator};
