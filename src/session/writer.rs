//! Log file writer for one port
//!
//! A [`LineWriter`] runs a thread that drains a [`LineReceiver`] into a log
//! file, one line per record. Output is buffered and flushed whenever the
//! port goes idle.

use crate::error::{LoggerError, RecvError, Result, ResultExt};
use crate::pipeline::LineReceiver;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How long a receive waits before the writer flushes and checks for stop
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lines and bytes a writer has written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub lines_written: u64,
    /// Bytes written, line separators included
    pub bytes_written: u64,
}

#[derive(Debug, Default)]
struct WriterCounters {
    lines: AtomicU64,
    bytes: AtomicU64,
}

impl WriterCounters {
    fn snapshot(&self) -> WriterStats {
        WriterStats {
            lines_written: self.lines.load(Ordering::Relaxed),
            bytes_written: self.bytes.load(Ordering::Relaxed),
        }
    }
}

/// Background writer draining one port into a file
#[derive(Debug)]
pub struct LineWriter {
    path: PathBuf,
    stop: Arc<AtomicBool>,
    counters: Arc<WriterCounters>,
    handle: Option<JoinHandle<std::io::Result<()>>>,
}

impl LineWriter {
    /// Open `path` for appending and start draining `receiver` into it
    pub fn spawn(receiver: LineReceiver, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;

        let stop = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(WriterCounters::default());
        let handle = {
            let stop = stop.clone();
            let counters = counters.clone();
            let name = format!("port{}-writer", receiver.port_index());
            std::thread::Builder::new()
                .name(name)
                .spawn(move || drain_loop(receiver, BufWriter::new(file), &stop, &counters))
                .context("Failed to spawn log writer")?
        };

        tracing::debug!("Writing port log to {}", path.display());
        Ok(Self {
            path,
            stop,
            counters,
            handle: Some(handle),
        })
    }

    /// File this writer appends to
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> WriterStats {
        self.counters.snapshot()
    }

    /// Drain the lines already framed, stop and report the totals
    pub fn stop(mut self) -> Result<WriterStats> {
        self.join()?;
        Ok(self.stats())
    }

    fn join(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(result) => result
                .with_context(|| format!("Failed to write log file {}", self.path.display())),
            Err(_) => Err(LoggerError::Io(std::io::Error::other("log writer panicked"))),
        }
    }
}

impl Drop for LineWriter {
    fn drop(&mut self) {
        if let Err(e) = self.join() {
            tracing::error!("{}", e);
        }
    }
}

fn drain_loop(
    receiver: LineReceiver,
    mut out: BufWriter<File>,
    stop: &AtomicBool,
    counters: &WriterCounters,
) -> std::io::Result<()> {
    let port = receiver.port_index();
    let mut dirty = false;
    let mut reported_fault = false;

    loop {
        let stopping = stop.load(Ordering::SeqCst);
        // Once stopping, only drain what is already framed
        let timeout = if stopping { Duration::ZERO } else { POLL_INTERVAL };

        match receiver.receive_line(timeout) {
            Ok(line) => {
                out.write_all(line.as_bytes())?;
                out.write_all(b"\n")?;
                counters.lines.fetch_add(1, Ordering::Relaxed);
                counters
                    .bytes
                    .fetch_add(line.len() as u64 + 1, Ordering::Relaxed);
                receiver.release_line(line);
                dirty = true;
                reported_fault = false;
                continue;
            }
            Err(RecvError::Timeout) => {}
            Err(RecvError::NotRunning) => {
                if !stopping {
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
            Err(RecvError::Faulted(reason)) => {
                if !reported_fault {
                    tracing::warn!(port, "Port faulted, nothing more to log: {}", reason);
                    reported_fault = true;
                }
                if !stopping {
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        }

        if dirty {
            out.flush()?;
            dirty = false;
        }
        if stopping {
            return Ok(());
        }
    }
}
