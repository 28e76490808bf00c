//! Helpers for streaming child-process output with bounded buffering.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, ExitStatus};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Lines buffered between the reader thread and the consumer loop.
pub const LINE_CHANNEL_CAPACITY: usize = 64;

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Spawn a thread that forwards each line of `reader` into a bounded channel.
///
/// The reader blocks when the consumer falls behind. The channel disconnects
/// when the stream reaches EOF or the consumer drops the receiver.
pub fn spawn_line_reader<R: Read + Send + 'static>(
    reader: R,
    capacity: usize,
) -> (Receiver<String>, thread::JoinHandle<Result<()>>) {
    let (tx, rx) = sync_channel(capacity);
    let handle = thread::spawn(move || forward_lines(reader, &tx));
    (rx, handle)
}

fn forward_lines<R: Read>(reader: R, tx: &SyncSender<String>) -> Result<()> {
    let mut buf_reader = BufReader::new(reader);
    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&line).trim_end().to_string();
        if text.is_empty() {
            continue;
        }
        if tx.send(text).is_err() {
            // Consumer is gone; keep draining so the child never blocks on a full pipe.
            std::io::copy(&mut buf_reader, &mut std::io::sink()).context("drain output")?;
            return Ok(());
        }
    }
}

/// Read a stream to EOF, keeping at most `limit` bytes.
///
/// Returns the kept bytes and the number discarded.
pub fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

/// Wait up to `grace` for the child to exit, then kill it.
///
/// Returns the exit status and whether the child had to be killed.
pub fn wait_or_kill(child: &mut Child, grace: Duration) -> Result<(ExitStatus, bool)> {
    if let Some(status) = child.wait_timeout(grace).context("wait for child")? {
        debug!(exit_code = ?status.code(), "child exited");
        return Ok((status, false));
    }
    warn!(grace_secs = grace.as_secs(), "child did not exit, killing");
    kill(child)?;
    let status = child.wait().context("wait child after kill")?;
    Ok((status, true))
}

/// Kill the child, ignoring "already exited".
pub fn kill(child: &mut Child) -> Result<()> {
    match child.kill() {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
        Err(err) => Err(err).context("kill child"),
    }
}

/// Join a reader thread, mapping a panic to an error.
pub fn join_reader<T>(handle: thread::JoinHandle<Result<T>>) -> Result<T> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Join a reader thread if it finishes within `grace`.
///
/// Returns `None` and leaves the thread detached when the stream stays open,
/// e.g. because a grandchild inherited the pipe.
pub fn join_reader_within<T>(
    handle: thread::JoinHandle<Result<T>>,
    grace: Duration,
) -> Result<Option<T>> {
    let deadline = Instant::now() + grace;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            debug!(grace_ms = grace.as_millis(), "output stream still open, detaching reader");
            return Ok(None);
        }
        thread::sleep(JOIN_POLL_INTERVAL);
    }
    join_reader(handle).map(Some)
}
