//! NVML-backed telemetry source.
//!
//! Every call goes to the live hardware state; nothing is cached or retried.
//! Device handles are resolved per call rather than held across cycles.

use nvml_wrapper::enum_wrappers::device::TemperatureSensor;
use nvml_wrapper::enums::device::UsedGpuMemory;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::{Device, Nvml};
use thiserror::Error;

use crate::data::DeviceCounters;

/// Longest process name the library is asked to return.
const PROCESS_NAME_LENGTH: usize = 64;

/// One variant per failure point, each naming the operation that failed.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("NVML initialization failed: {0}")]
    Init(#[source] NvmlError),
    #[error("unable to get device count: {0}")]
    DeviceCount(#[source] NvmlError),
    #[error("unable to get device at index {index}: {source}")]
    DeviceHandle { index: u32, source: NvmlError },
    #[error("unable to get uuid of device at index {index}: {source}")]
    Uuid { index: u32, source: NvmlError },
    #[error("unable to get utilisation info for device {uuid}: {source}")]
    Utilization { uuid: String, source: NvmlError },
    #[error("unable to get memory info for device {uuid}: {source}")]
    Memory { uuid: String, source: NvmlError },
    #[error("unable to get temperature info for device {uuid}: {source}")]
    Temperature { uuid: String, source: NvmlError },
    #[error("unable to get power info for device {uuid}: {source}")]
    Power { uuid: String, source: NvmlError },
    #[error("unable to get process info for device {uuid}: {source}")]
    Processes { uuid: String, source: NvmlError },
    #[error("unable to get process name for pid {pid}: {source}")]
    ProcessName { pid: u32, source: NvmlError },
}

/// A process currently holding compute resources on a device.
#[derive(Clone, Debug)]
pub struct GpuProcess {
    pub pid: u32,
    pub used_gpu_memory_bytes: u64,
}

/// Query surface over the GPU management library.
///
/// The `uuid` parameters carry the device identity into error messages; the
/// index alone addresses the device. An empty process list is a valid result.
/// Name resolution can fail when a process exits between enumeration and
/// lookup, and the caller decides what that means.
pub trait GpuMonitor {
    fn device_count(&self) -> Result<u32, MonitorError>;
    fn device_uuid(&self, index: u32) -> Result<String, MonitorError>;
    fn device_counters(&self, index: u32, uuid: &str) -> Result<DeviceCounters, MonitorError>;
    fn running_processes(&self, index: u32, uuid: &str) -> Result<Vec<GpuProcess>, MonitorError>;
    fn process_name(&self, pid: u32) -> Result<String, MonitorError>;
}

pub struct NvmlMonitor {
    nvml: Nvml,
}

impl NvmlMonitor {
    /// Initialize NVML. The library is released when the monitor drops.
    pub fn new() -> Result<Self, MonitorError> {
        let nvml = Nvml::init().map_err(MonitorError::Init)?;
        Ok(Self { nvml })
    }

    fn device(&self, index: u32) -> Result<Device<'_>, MonitorError> {
        self.nvml
            .device_by_index(index)
            .map_err(|source| MonitorError::DeviceHandle { index, source })
    }
}

impl GpuMonitor for NvmlMonitor {
    fn device_count(&self) -> Result<u32, MonitorError> {
        self.nvml.device_count().map_err(MonitorError::DeviceCount)
    }

    fn device_uuid(&self, index: u32) -> Result<String, MonitorError> {
        self.device(index)?
            .uuid()
            .map_err(|source| MonitorError::Uuid { index, source })
    }

    fn device_counters(&self, index: u32, uuid: &str) -> Result<DeviceCounters, MonitorError> {
        let device = self.device(index)?;
        let util = device
            .utilization_rates()
            .map_err(|source| MonitorError::Utilization {
                uuid: uuid.to_owned(),
                source,
            })?;
        let mem = device.memory_info().map_err(|source| MonitorError::Memory {
            uuid: uuid.to_owned(),
            source,
        })?;
        let temp_deg_c = device
            .temperature(TemperatureSensor::Gpu)
            .map_err(|source| MonitorError::Temperature {
                uuid: uuid.to_owned(),
                source,
            })?;
        let power_mw = device.power_usage().map_err(|source| MonitorError::Power {
            uuid: uuid.to_owned(),
            source,
        })?;
        Ok(DeviceCounters {
            util_pc: util.gpu,
            mem_io_pc: util.memory,
            mem_used_bytes: mem.used,
            mem_total_bytes: mem.total,
            temp_deg_c,
            power_mw,
        })
    }

    fn running_processes(&self, index: u32, uuid: &str) -> Result<Vec<GpuProcess>, MonitorError> {
        let procs = self
            .device(index)?
            .running_compute_processes()
            .map_err(|source| MonitorError::Processes {
                uuid: uuid.to_owned(),
                source,
            })?;
        Ok(procs
            .into_iter()
            .map(|proc| GpuProcess {
                pid: proc.pid,
                used_gpu_memory_bytes: match proc.used_gpu_memory {
                    UsedGpuMemory::Used(bytes) => bytes,
                    UsedGpuMemory::Unavailable => 0,
                },
            })
            .collect())
    }

    fn process_name(&self, pid: u32) -> Result<String, MonitorError> {
        self.nvml
            .sys_process_name(pid, PROCESS_NAME_LENGTH)
            .map_err(|source| MonitorError::ProcessName { pid, source })
    }
}
