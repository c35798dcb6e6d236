//! Single-shot deferred values.
//!
//! A [`Deferred`] holds a value that becomes available at most once, either
//! fulfilled with a `T` or rejected with an `E`. Any number of observers may
//! attach before or after settlement and each one runs exactly once.
//!
//! ```
//! use deferred::Deferred;
//!
//! let source = Deferred::<i32, String>::new();
//! let doubled = source.then(|v| v * 2);
//! source.resolve(21);
//! assert_eq!(doubled.settlement().fulfilled(), Some(42));
//! ```
pub mod combine;
pub mod deferred;
pub mod executor;

pub use crate::combine::{CombineOptions, Order, RejectionPolicy};
pub use crate::deferred::{Deferred, Settlement};
pub use crate::executor::{Executor, Immediate, Job, SerialQueue, ThreadExecutor};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("deferred value was already settled")]
    AlreadySettled,
    #[error("failed to spawn executor thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("executor queue has shut down")]
    ExecutorClosed,
}
