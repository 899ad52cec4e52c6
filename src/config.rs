//! Resolution of default log paths and the sampling interval.

use std::env;

/// Default sampling interval in whole seconds.
pub const DEFAULT_INTERVAL_SECS: u64 = 5;

/// Which of the two log streams a path is derived for.
#[derive(Clone, Copy, Debug)]
pub enum LogKind {
    Device,
    Process,
}

impl LogKind {
    fn tag(self) -> &'static str {
        match self {
            LogKind::Device => "dev",
            LogKind::Process => "proc",
        }
    }
}

/// Default log file name for the current job environment:
/// `gpu-<kind>-util[-$SLURM_JOB_ID[-$SLURM_ARRAY_TASK_ID]].log`.
pub fn default_log_path(kind: LogKind) -> String {
    log_file_name(
        kind,
        non_empty_env("SLURM_JOB_ID").as_deref(),
        non_empty_env("SLURM_ARRAY_TASK_ID").as_deref(),
    )
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

// The array-task suffix only applies under a job id, mirroring how the batch
// scheduler sets these variables.
fn log_file_name(kind: LogKind, job_id: Option<&str>, array_task_id: Option<&str>) -> String {
    let mut path = format!("gpu-{}-util", kind.tag());
    if let Some(jid) = job_id {
        path.push('-');
        path.push_str(jid);
        if let Some(atid) = array_task_id {
            path.push('-');
            path.push_str(atid);
        }
    }
    path.push_str(".log");
    path
}
