//! Library side of the `meds` command-line tool.

pub mod logging;
pub mod orchestrate;
pub mod progress;
pub mod types;
