//! In-process fan-out of formatted log lines
//!
//! The fmt layer formats every event into a fresh [`LineBuffer`]; the buffer
//! publishes its text as one line when tracing drops it. `/api/logs/stream`
//! subscribes here.

use once_cell::sync::Lazy;
use std::io::{self, Write};
use tokio::sync::broadcast;
use tracing_subscriber::fmt::writer::MakeWriter;

/// Lines kept for slow stream readers before they start lagging
const LINE_BACKLOG: usize = 1024;

static LOG_LINES: Lazy<broadcast::Sender<String>> =
    Lazy::new(|| broadcast::channel(LINE_BACKLOG).0);

#[derive(Clone)]
pub struct LogLineSink {
    lines: broadcast::Sender<String>,
}

impl LogLineSink {
    /// Sink publishing to the process-wide log line channel
    pub fn shared() -> Self {
        Self::to(LOG_LINES.clone())
    }

    fn to(lines: broadcast::Sender<String>) -> Self {
        Self { lines }
    }
}

pub struct LineBuffer {
    lines: broadcast::Sender<String>,
    text: Vec<u8>,
}

impl LineBuffer {
    fn finished_line(&self) -> Option<String> {
        let text = String::from_utf8_lossy(&self.text);
        let line = text.trim_end_matches(['\r', '\n']);
        (!line.is_empty()).then(|| line.to_owned())
    }
}

impl<'a> MakeWriter<'a> for LogLineSink {
    type Writer = LineBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        LineBuffer {
            lines: self.lines.clone(),
            text: Vec::with_capacity(160),
        }
    }
}

impl Write for LineBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.text.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LineBuffer {
    fn drop(&mut self) {
        if let Some(line) = self.finished_line() {
            // Err only means nobody is streaming
            let _ = self.lines.send(line);
        }
    }
}

pub fn subscribe_log_lines() -> broadcast::Receiver<String> {
    LOG_LINES.subscribe()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn one_event_becomes_one_trimmed_line() {
        let (tx, mut rx) = broadcast::channel(8);
        let sink = LogLineSink::to(tx);

        let mut writer = sink.make_writer();
        write!(writer, "INFO power_supply: ").unwrap();
        writeln!(writer, "Turning on\r").unwrap();
        drop(writer);

        assert_eq!(rx.try_recv().unwrap(), "INFO power_supply: Turning on");
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn blank_events_are_not_published() {
        let (tx, mut rx) = broadcast::channel(8);
        let sink = LogLineSink::to(tx);

        drop(sink.make_writer());
        let mut writer = sink.make_writer();
        writer.write_all(b"\n").unwrap();
        drop(writer);

        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn utf8_survives() {
        let (tx, mut rx) = broadcast::channel(8);
        let mut writer = LogLineSink::to(tx).make_writer();
        writeln!(writer, "Заслонка уже закрыта.").unwrap();
        drop(writer);
        assert_eq!(rx.try_recv().unwrap(), "Заслонка уже закрыта.");
    }
}
