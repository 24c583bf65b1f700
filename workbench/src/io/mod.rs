//! Side-effecting adapters: filesystem, child processes, git, HTTP.

pub mod archive;
pub mod backup;
pub mod config;
pub mod exec;
pub mod git;
pub mod process;
pub mod project_index;
pub mod remote;
pub mod store;
