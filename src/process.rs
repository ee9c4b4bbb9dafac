//! Runs external helpers (the legacy RPC client and the plotter) with piped
//! input, drained output and a deadline.

use crate::error::ScopeError;
use log::debug;
use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    /// Standard output followed by standard error, as text.
    pub fn merged_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&self.stderr));
        text
    }
}

/// Start `program`, feed it `input` and wait at most `timeout` for it to exit.
///
/// A program that cannot be started yields [`ScopeError::ProcessSpawn`]; one
/// that exits unsuccessfully yields [`ScopeError::ProcessExit`] carrying its
/// merged output. A program still running at the deadline is killed.
pub fn run(
    program: &str,
    args: &[&str],
    input: &[u8],
    timeout: Duration,
) -> Result<ProcessOutput, ScopeError> {
    debug!("Running {} {:?} ({} bytes of input)", program, args, input.len());

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ScopeError::ProcessSpawn {
            program: program.to_string(),
            source,
        })?;

    let stdout = spawn_reader(child.stdout.take());
    let stderr = spawn_reader(child.stderr.take());
    if let Some(mut stdin) = child.stdin.take() {
        let input = input.to_vec();
        thread::spawn(move || {
            // A helper that exits without reading closes the pipe; its exit
            // status reports the failure.
            if let Err(e) = stdin.write_all(&input) {
                debug!("Helper stdin closed early: {}", e);
            }
        });
    }

    let status = match wait_with_deadline(&mut child, timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            debug!("{} still running after {:?}, killing it", program, timeout);
            let _ = child.kill();
            let _ = child.wait();
            return Err(ScopeError::Timeout(timeout));
        }
        Err(source) => {
            return Err(ScopeError::Io {
                source,
                context: format!("Waiting for {program}"),
            });
        }
    };

    let output = ProcessOutput {
        stdout: join_reader(stdout, program)?,
        stderr: join_reader(stderr, program)?,
    };

    if status.success() {
        Ok(output)
    } else {
        Err(ScopeError::ProcessExit {
            program: program.to_string(),
            status: status.to_string(),
            output: output.merged_text().trim_end().to_string(),
        })
    }
}

/// Exit status of `child`, or `None` if it is still running at the deadline.
/// The child is checked at least once, even with a zero timeout.
fn wait_with_deadline(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    // An unrepresentable deadline means wait for as long as it takes.
    let deadline = Instant::now().checked_add(timeout);
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<std::io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn join_reader(
    handle: JoinHandle<std::io::Result<Vec<u8>>>,
    program: &str,
) -> Result<Vec<u8>, ScopeError> {
    let context = format!("Reading output of {program}");
    match handle.join() {
        Ok(result) => result.map_err(|source| ScopeError::Io { source, context }),
        Err(_) => Err(ScopeError::Io {
            source: std::io::Error::other("output reader panicked"),
            context,
        }),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_input_is_piped_through() {
        let output = run("cat", &[], b"1.5\n-2\n", Duration::from_secs(5)).unwrap();
        assert_eq!(output.stdout, b"1.5\n-2\n");
        assert!(output.stderr.is_empty());
    }

    #[test]
    fn test_output_is_merged() {
        let output = run(
            "sh",
            &["-c", "echo out; echo err >&2"],
            b"",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(output.merged_text(), "out\nerr\n");
    }

    #[test]
    fn test_nonzero_exit_is_distinct_from_spawn_failure() {
        let exit = run("sh", &["-c", "echo broken >&2; exit 3"], b"", Duration::from_secs(5))
            .unwrap_err();
        match exit {
            ScopeError::ProcessExit { output, .. } => assert_eq!(output, "broken"),
            other => panic!("unexpected error: {other}"),
        }

        let spawn = run("/nonexistent/scope-helper", &[], b"", Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(spawn, ScopeError::ProcessSpawn { .. }));
    }

    #[test]
    fn test_quick_exit_is_seen_with_zero_timeout() {
        let mut child = Command::new("true").spawn().unwrap();
        thread::sleep(Duration::from_millis(200));
        let status = wait_with_deadline(&mut child, Duration::ZERO).unwrap();
        assert!(status.is_some_and(|s| s.success()));
    }

    #[test]
    fn test_hung_helper_times_out() {
        let err = run("sleep", &["5"], b"", Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, ScopeError::Timeout(_)));
    }
}
