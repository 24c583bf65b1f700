//! Pure logic: path algebra, interpreter selection, run types. No I/O.

pub mod interpreter;
pub mod run;
pub mod sandbox;
