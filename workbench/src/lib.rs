//! Project sandbox and execution engine for a browser-based dev environment.
//!
//! The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure logic (path sandboxing, interpreter selection, run
//!   types). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (filesystem, archives, child
//!   processes, git, the repository-hosting API).
//!
//! [`Workbench`] ties them together into the operations a transport calls.

pub mod core;
pub mod error;
pub mod io;
pub mod logging;
pub mod service;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use error::{Result, WorkbenchError};
pub use service::Workbench;
