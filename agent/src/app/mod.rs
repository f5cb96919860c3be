//! Agent startup and shutdown

pub mod options;
pub mod run;
