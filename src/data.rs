//! Sample record types and the raw-counter conversions that build them.

use thiserror::Error;

const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Raw per-device counter readings, in the units the hardware reports.
#[derive(Clone, Debug)]
pub struct DeviceCounters {
    pub util_pc: u32,
    pub mem_io_pc: u32,
    pub mem_used_bytes: u64,
    pub mem_total_bytes: u64,
    pub temp_deg_c: u32,
    pub power_mw: u32,
}

/// A device reported zero total memory, so its used-memory percentage is
/// undefined.
#[derive(Debug, Error)]
#[error("device {uuid} reports zero total memory")]
pub struct ZeroTotalMemoryError {
    pub uuid: String,
}

/// One device-level record, in logged units.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceSample {
    pub uuid: String,
    pub util_pc: u32,
    pub mem_io_pc: u32,
    pub mem_used_mb: u64,
    pub mem_used_pc: u64,
    pub temp_deg_c: u32,
    pub power_w: u32,
}

impl DeviceSample {
    /// Convert raw counters into logged units. Every conversion truncates.
    pub fn from_counters(
        uuid: String,
        counters: &DeviceCounters,
    ) -> Result<Self, ZeroTotalMemoryError> {
        if counters.mem_total_bytes == 0 {
            return Err(ZeroTotalMemoryError { uuid });
        }
        // The used * 100 product can exceed u64 on large counters.
        let mem_used_pc =
            (counters.mem_used_bytes as u128 * 100 / counters.mem_total_bytes as u128) as u64;
        Ok(Self {
            uuid,
            util_pc: counters.util_pc,
            mem_io_pc: counters.mem_io_pc,
            mem_used_mb: counters.mem_used_bytes / BYTES_PER_MIB,
            mem_used_pc,
            temp_deg_c: counters.temp_deg_c,
            power_w: counters.power_mw / 1000,
        })
    }
}

/// One process-level record, in logged units.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessSample {
    pub uuid: String,
    pub pid: u32,
    pub name: String,
    pub mem_used_mb: u64,
}

impl ProcessSample {
    pub fn new(uuid: String, pid: u32, name: String, used_bytes: u64) -> Self {
        Self {
            uuid,
            pid,
            name,
            mem_used_mb: used_bytes / BYTES_PER_MIB,
        }
    }
}
