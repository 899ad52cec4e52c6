//! The sampling cycle and the fixed-interval loop that drives it.

use std::io::Write;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use thiserror::Error;

use crate::data::{DeviceSample, ProcessSample, ZeroTotalMemoryError};
use crate::monitor::{GpuMonitor, MonitorError};
use crate::record;

/// Any failure inside a cycle. All of these are fatal to the daemon; none are
/// retried or skipped.
#[derive(Debug, Error)]
pub enum SamplerError {
    #[error(transparent)]
    Monitor(#[from] MonitorError),
    #[error(transparent)]
    Arithmetic(#[from] ZeroTotalMemoryError),
    #[error("unable to write record: {0}")]
    Write(#[from] std::io::Error),
}

/// One full pass over every device: a device record per device, immediately
/// followed by a process record for each compute process on it, in device
/// index order. The first failed query or write aborts the cycle; records
/// already written stay in the log.
pub fn run_cycle<M, D, P>(
    monitor: &M,
    dev_log: &mut D,
    proc_log: &mut P,
    timestamp: &str,
) -> Result<(), SamplerError>
where
    M: GpuMonitor,
    D: Write,
    P: Write,
{
    let count = monitor.device_count()?;
    for index in 0..count {
        let uuid = monitor.device_uuid(index)?;
        let counters = monitor.device_counters(index, &uuid)?;
        let sample = DeviceSample::from_counters(uuid.clone(), &counters)?;
        record::write_device_record(dev_log, timestamp, &sample)?;

        for proc in monitor.running_processes(index, &uuid)? {
            let name = monitor.process_name(proc.pid)?;
            let sample = ProcessSample::new(uuid.clone(), proc.pid, name, proc.used_gpu_memory_bytes);
            record::write_process_record(proc_log, timestamp, &sample)?;
        }
    }
    Ok(())
}

/// Sample until a stop message arrives or the stop channel disconnects.
///
/// Both streams share one timestamp per cycle, which is what correlates their
/// records. The wait between cycles is the only suspension point; any error
/// propagates to the caller and ends the run.
pub fn run<M, D, P>(
    monitor: &M,
    dev_log: &mut D,
    proc_log: &mut P,
    interval: Duration,
    stop: &Receiver<()>,
) -> Result<(), SamplerError>
where
    M: GpuMonitor,
    D: Write,
    P: Write,
{
    loop {
        let timestamp = record::format_timestamp(Utc::now());
        run_cycle(monitor, dev_log, proc_log, &timestamp)?;
        match stop.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return Ok(()),
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DeviceCounters;
    use crate::monitor::GpuProcess;
    use crossbeam_channel::bounded;
    use nvml_wrapper::error::NvmlError;
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;

    struct FakeDevice {
        uuid: &'static str,
        counters: DeviceCounters,
        processes: Vec<GpuProcess>,
        fail_counters: bool,
    }

    impl FakeDevice {
        fn new(uuid: &'static str) -> Self {
            Self {
                uuid,
                counters: DeviceCounters {
                    util_pc: 10,
                    mem_io_pc: 5,
                    mem_used_bytes: 1 << 30,
                    mem_total_bytes: 1 << 34,
                    temp_deg_c: 50,
                    power_mw: 150_000,
                },
                processes: Vec::new(),
                fail_counters: false,
            }
        }

        fn with_process(mut self, pid: u32, used_bytes: u64) -> Self {
            self.processes.push(GpuProcess {
                pid,
                used_gpu_memory_bytes: used_bytes,
            });
            self
        }

        fn failing(mut self) -> Self {
            self.fail_counters = true;
            self
        }
    }

    struct FakeMonitor {
        devices: Vec<FakeDevice>,
    }

    impl GpuMonitor for FakeMonitor {
        fn device_count(&self) -> Result<u32, MonitorError> {
            Ok(self.devices.len() as u32)
        }

        fn device_uuid(&self, index: u32) -> Result<String, MonitorError> {
            Ok(self.devices[index as usize].uuid.to_string())
        }

        fn device_counters(&self, index: u32, uuid: &str) -> Result<DeviceCounters, MonitorError> {
            let device = &self.devices[index as usize];
            if device.fail_counters {
                return Err(MonitorError::Utilization {
                    uuid: uuid.to_owned(),
                    source: NvmlError::Unknown,
                });
            }
            Ok(device.counters.clone())
        }

        fn running_processes(&self, index: u32, _uuid: &str) -> Result<Vec<GpuProcess>, MonitorError> {
            Ok(self.devices[index as usize].processes.clone())
        }

        fn process_name(&self, pid: u32) -> Result<String, MonitorError> {
            Ok(format!("proc-{pid}"))
        }
    }

    /// Two handles over one buffer, to observe emission order across streams.
    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl SharedBuf {
        fn lines(&self) -> Vec<String> {
            String::from_utf8(self.0.borrow().clone())
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn cycle_emits_devices_in_index_order() {
        let monitor = FakeMonitor {
            devices: vec![
                FakeDevice::new("GPU-0").with_process(100, 1 << 20).with_process(101, 2 << 20),
                FakeDevice::new("GPU-1"),
                FakeDevice::new("GPU-2").with_process(102, 3 << 20),
            ],
        };
        let mut dev_log = Vec::new();
        let mut proc_log = Vec::new();
        run_cycle(&monitor, &mut dev_log, &mut proc_log, "T").unwrap();

        let dev_lines: Vec<String> = String::from_utf8(dev_log)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        assert_eq!(dev_lines.len(), 3);
        assert!(dev_lines[0].starts_with("T GPU-0 "));
        assert!(dev_lines[1].starts_with("T GPU-1 "));
        assert!(dev_lines[2].starts_with("T GPU-2 "));

        let proc_lines: Vec<String> = String::from_utf8(proc_log)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        assert_eq!(
            proc_lines,
            vec![
                "T GPU-0 100 proc-100 1",
                "T GPU-0 101 proc-101 2",
                "T GPU-2 102 proc-102 3",
            ]
        );
    }

    #[test]
    fn process_records_follow_their_device_record() {
        let monitor = FakeMonitor {
            devices: vec![
                FakeDevice::new("GPU-0").with_process(100, 1 << 20),
                FakeDevice::new("GPU-1").with_process(200, 1 << 20),
            ],
        };
        // Point both streams at one buffer so the write order is observable.
        let shared = SharedBuf::default();
        let mut dev_log = shared.clone();
        let mut proc_log = shared.clone();
        run_cycle(&monitor, &mut dev_log, &mut proc_log, "T").unwrap();

        let lines = shared.lines();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("T GPU-0 10 "));
        assert_eq!(lines[1], "T GPU-0 100 proc-100 1");
        assert!(lines[2].starts_with("T GPU-1 10 "));
        assert_eq!(lines[3], "T GPU-1 200 proc-200 1");
    }

    #[test]
    fn counter_failure_stops_the_cycle_after_prior_devices() {
        let monitor = FakeMonitor {
            devices: vec![
                FakeDevice::new("GPU-0"),
                FakeDevice::new("GPU-1").failing(),
                FakeDevice::new("GPU-2"),
            ],
        };
        let mut dev_log = Vec::new();
        let mut proc_log = Vec::new();
        let err = run_cycle(&monitor, &mut dev_log, &mut proc_log, "T").unwrap_err();

        assert!(matches!(
            err,
            SamplerError::Monitor(MonitorError::Utilization { .. })
        ));
        // Exactly one complete record, nothing partial for the failing device.
        let dev = String::from_utf8(dev_log).unwrap();
        assert_eq!(dev.lines().count(), 1);
        assert!(dev.starts_with("T GPU-0 "));
        assert!(String::from_utf8(proc_log).unwrap().is_empty());
    }

    #[test]
    fn zero_total_memory_stops_the_cycle() {
        let mut device = FakeDevice::new("GPU-0");
        device.counters.mem_total_bytes = 0;
        let monitor = FakeMonitor {
            devices: vec![device],
        };
        let mut dev_log = Vec::new();
        let mut proc_log = Vec::new();
        let err = run_cycle(&monitor, &mut dev_log, &mut proc_log, "T").unwrap_err();

        assert!(matches!(err, SamplerError::Arithmetic(_)));
        assert!(dev_log.is_empty());
    }

    #[test]
    fn run_stops_after_stop_message() {
        let monitor = FakeMonitor {
            devices: vec![FakeDevice::new("GPU-0")],
        };
        let mut dev_log = Vec::new();
        let mut proc_log = Vec::new();
        let (stop_tx, stop_rx) = bounded(1);
        stop_tx.send(()).unwrap();

        run(
            &monitor,
            &mut dev_log,
            &mut proc_log,
            Duration::from_secs(3600),
            &stop_rx,
        )
        .unwrap();

        // The stop message was consumed after exactly one cycle.
        assert_eq!(String::from_utf8(dev_log).unwrap().lines().count(), 1);
    }

    #[test]
    fn run_stops_when_stop_channel_disconnects() {
        let monitor = FakeMonitor {
            devices: vec![FakeDevice::new("GPU-0")],
        };
        let mut dev_log = Vec::new();
        let mut proc_log = Vec::new();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        drop(stop_tx);

        run(
            &monitor,
            &mut dev_log,
            &mut proc_log,
            Duration::from_secs(3600),
            &stop_rx,
        )
        .unwrap();

        assert_eq!(String::from_utf8(dev_log).unwrap().lines().count(), 1);
    }

    #[test]
    fn run_propagates_cycle_errors() {
        let monitor = FakeMonitor {
            devices: vec![FakeDevice::new("GPU-0").failing()],
        };
        let mut dev_log = Vec::new();
        let mut proc_log = Vec::new();
        let (_stop_tx, stop_rx) = bounded::<()>(1);

        let err = run(
            &monitor,
            &mut dev_log,
            &mut proc_log,
            Duration::from_secs(3600),
            &stop_rx,
        )
        .unwrap_err();
        assert!(matches!(err, SamplerError::Monitor(_)));
    }
}
