//! Background services

pub mod probe;

pub use probe::{ProbeConfig, ProbeHandle, ProbeReport, ProbeService};
