use anyhow::{Context, Result, anyhow};
use std::io::Read;
use std::process::{Child, Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub fn now_epoch_secs() -> Result<u64> {
    u64::try_from(chrono::Utc::now().timestamp()).context("system clock is before the Unix epoch")
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn collect(handle: JoinHandle<Vec<u8>>) -> Vec<u8> {
    handle.join().unwrap_or_default()
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Run `cmd` to completion, killing it once `timeout` elapses.
///
/// Both pipes are drained on their own threads while the child runs, so a
/// chatty child never stalls on a full pipe buffer.
pub fn run_command_with_optional_timeout(
    cmd: &mut Command,
    timeout: Option<Duration>,
) -> Result<Output> {
    let Some(timeout) = timeout else {
        return Ok(cmd.output()?);
    };

    let mut child = cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).spawn()?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let deadline = Instant::now() + timeout;

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            kill_and_reap(&mut child);
            // A grandchild may still hold the pipes open; leave the readers detached.
            drop((stdout, stderr));
            return Err(anyhow!(
                "command timed out after {}s",
                timeout.as_secs_f64()
            ));
        }
        thread::sleep(POLL_INTERVAL);
    };

    Ok(Output {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}
