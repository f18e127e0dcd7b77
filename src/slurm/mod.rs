mod jobs;
mod nodes;

use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

pub use jobs::{parse_jobs, JobRecord, JobState};
pub use nodes::{parse_nodes, NodeRecord, NodeState};

use crate::error::CollectError;

/// Upper bound on a single scheduler command invocation
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of the raw scheduler text consumed by the record parsers.
///
/// The refresh cycle depends only on the textual contract of the two
/// commands, not on their execution mechanism, which also keeps the cycle
/// testable without a live cluster.
pub trait Collector: Send {
    /// Raw node inventory, as printed by `scontrol show node -d`
    fn collect_nodes(&self) -> Result<String, CollectError>;

    /// Raw job table, as printed by `squeue --Format=...`
    fn collect_jobs(&self) -> Result<String, CollectError>;
}

/// Collector invoking the real scheduler commands
pub struct SlurmCollector {
    scontrol: String,
    squeue: String,
}

impl SlurmCollector {
    pub fn new(scontrol: &str, squeue: &str) -> Self {
        Self {
            scontrol: scontrol.to_string(),
            squeue: squeue.to_string(),
        }
    }
}

impl Collector for SlurmCollector {
    fn collect_nodes(&self) -> Result<String, CollectError> {
        run_command(&self.scontrol, &["show", "node", "-d"], COMMAND_TIMEOUT)
    }

    fn collect_jobs(&self) -> Result<String, CollectError> {
        run_command(
            &self.squeue,
            &["--Format", &jobs::squeue_format()],
            COMMAND_TIMEOUT,
        )
    }
}

/// Runs a command with a bounded timeout, returning its stdout.
///
/// Stdout is drained on a separate thread so a large inventory cannot
/// fill the pipe and stall the wait loop; on timeout the child is killed
/// and reaped.
fn run_command(program: &str, args: &[&str], timeout: Duration) -> Result<String, CollectError> {
    let display = format!("{} {}", program, args.join(" "));

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| CollectError::new(&display, format!("failed to spawn: {}", err)))?;

    let stdout = child.stdout.take();
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let mut buffer = String::new();
        if let Some(mut stdout) = stdout {
            let _ = stdout.read_to_string(&mut buffer);
        }

        let _ = sender.send(buffer);
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(CollectError::new(
                        &display,
                        format!("timed out after {:?}", timeout),
                    ));
                }

                thread::sleep(Duration::from_millis(25));
            }
            Err(err) => {
                return Err(CollectError::new(&display, format!("wait failed: {}", err)));
            }
        }
    };

    if !status.success() {
        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr);
        }

        return Err(CollectError::new(
            &display,
            format!("{}: {}", status, stderr.trim()),
        ));
    }

    receiver
        .recv()
        .map_err(|_| CollectError::new(&display, "stdout reader thread died"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout() {
        let output = run_command("echo", &["hello"], COMMAND_TIMEOUT).unwrap();
        assert_eq!(output.trim(), "hello");
    }

    #[test]
    fn reports_missing_executable() {
        let err = run_command("definitely-not-slurm", &[], COMMAND_TIMEOUT).unwrap_err();
        assert!(err.detail.contains("failed to spawn"));
    }

    #[test]
    fn reports_nonzero_exit() {
        let err = run_command("false", &[], COMMAND_TIMEOUT).unwrap_err();
        assert!(err.detail.contains("exit"));
    }

    #[test]
    fn kills_on_timeout() {
        let err = run_command("sleep", &["5"], Duration::from_millis(100)).unwrap_err();
        assert!(err.detail.contains("timed out"));
    }
}
