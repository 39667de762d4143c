//! Process-level infrastructure shared by every gateway crate: runtime
//! configuration and logger initialisation.

pub mod config;
pub mod logging;
