//! Serialization of samples into the two append-only log streams.
//!
//! Each record is one line of space-separated fields prefixed with a UTC
//! timestamp, flushed as soon as it is written so a consumer tailing the log
//! sees it promptly. The emitter only writes into streams it is handed; it
//! never opens or closes them.

use std::io::{self, Write};

use chrono::{DateTime, Utc};

use crate::data::{DeviceSample, ProcessSample};

/// Header line of the device-level log.
pub const DEVICE_LOG_HEADER: &str =
    "timestamp dev_uuid dev_util_pc dev_mem_used_mb dev_mem_used_pc dev_mem_io_pc dev_temp_deg_c dev_power_w";

/// Header line of the process-level log.
pub const PROCESS_LOG_HEADER: &str = "timestamp dev_uuid pid proc_name proc_mem_mb";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Format a sampling instant the way the log consumers expect it.
pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.format(TIMESTAMP_FORMAT).to_string()
}

/// Append one device record, field order matching [`DEVICE_LOG_HEADER`].
pub fn write_device_record<W: Write>(
    w: &mut W,
    timestamp: &str,
    sample: &DeviceSample,
) -> io::Result<()> {
    writeln!(
        w,
        "{} {} {} {} {} {} {} {}",
        timestamp,
        sample.uuid,
        sample.util_pc,
        sample.mem_used_mb,
        sample.mem_used_pc,
        sample.mem_io_pc,
        sample.temp_deg_c,
        sample.power_w,
    )?;
    w.flush()
}

/// Append one process record, field order matching [`PROCESS_LOG_HEADER`].
pub fn write_process_record<W: Write>(
    w: &mut W,
    timestamp: &str,
    sample: &ProcessSample,
) -> io::Result<()> {
    writeln!(
        w,
        "{} {} {} {} {}",
        timestamp, sample.uuid, sample.pid, sample.name, sample.mem_used_mb,
    )?;
    w.flush()
}
