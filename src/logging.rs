//! Serialized run log.
//!
//! Every instance logs through a cloneable [`LogHandle`]. The messages are
//! queued on one unbounded channel and written by a single consumer task
//! that owns the log file, so lines from concurrent instances never
//! interleave. Output order is enqueue order.

use crate::error::Error;
use std::io;
use std::path::Path;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Timestamp format of log lines, e.g. `2016-05-01 12:00:00.123456`.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// A queued log record.
#[derive(Debug)]
pub enum LogRecord {
    /// A fully formatted line, without the trailing newline.
    Line(String),
    /// Sentinel: the consumer stops when it dequeues this.
    Exit,
}

/// Producer side of the run log.
#[derive(Debug, Clone)]
pub struct LogHandle {
    tx: UnboundedSender<LogRecord>,
}

impl LogHandle {
    /// Timestamp `msg` and queue it. Never blocks.
    ///
    /// Messages sent after the sink has stopped are dropped.
    pub fn log(&self, msg: impl AsRef<str>) {
        let line = format!(
            "{} {}",
            chrono::Local::now().format(TIMESTAMP_FORMAT),
            msg.as_ref()
        );
        if self.tx.send(LogRecord::Line(line)).is_err() {
            debug!(dropped = msg.as_ref(), "Log sink already stopped");
        }
    }
}

/// The single consumer of the run log.
pub struct LogSink {
    handle: LogHandle,
    task: JoinHandle<io::Result<()>>,
}

impl LogSink {
    /// Open (append/create) `path` and start the consumer task.
    pub async fn open(path: &Path) -> Result<Self, Error> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|source| Error::LogFile {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::spawn(file))
    }

    /// Start the consumer task writing to `writer`.
    pub fn spawn<W>(writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(drain(rx, writer));
        Self {
            handle: LogHandle { tx },
            task,
        }
    }

    /// A new producer handle.
    pub fn handle(&self) -> LogHandle {
        self.handle.clone()
    }

    /// Enqueue the sentinel and wait for the consumer to finish.
    ///
    /// Consumes the sink, so the sentinel is sent exactly once. Everything
    /// queued before this call is written first.
    pub async fn shutdown(self) -> io::Result<()> {
        // The consumer only goes away early after a write error, which the
        // join below reports.
        let _ = self.handle.tx.send(LogRecord::Exit);
        match self.task.await {
            Ok(result) => result,
            Err(join_err) => Err(io::Error::new(io::ErrorKind::Other, join_err)),
        }
    }
}

async fn drain<W>(mut rx: UnboundedReceiver<LogRecord>, mut writer: W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(record) = rx.recv().await {
        match record {
            LogRecord::Exit => break,
            LogRecord::Line(line) => {
                if let Err(e) = write_line(&mut writer, &line).await {
                    error!(error = %e, "Failed to write log file");
                    return Err(e);
                }
                info!(target: "mock_server::log", "{}", line);
            }
        }
    }
    writer.flush().await
}

async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');
    writer.write_all(&buf).await?;
    writer.flush().await
}
