//! Node-resident GPU telemetry logger for batch jobs.
//!
//! Once per fixed interval the daemon enumerates every NVIDIA device,
//! queries its utilization, memory, thermal, and power counters plus the
//! compute processes running on it, and appends the results as timestamped
//! records to two correlated append-only logs (device-level and
//! process-level) for offline job profiling.

pub mod app;
pub mod config;
pub mod data;
pub mod monitor;
pub mod record;
