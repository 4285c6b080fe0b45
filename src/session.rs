//! One practice run: load a text, reveal it key by key, and summarise.

use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::alert::AlertSink;
use crate::clock::Clock;
use crate::encoding::{detect_encoding, TextEncoding};
use crate::history::{TestRecord, TIMESTAMP_FORMAT};
use crate::monitor::RateMonitor;
use crate::typewriter::{TextError, TypeWriter};
use crate::util::{ratio, round_to};

/// Characters per word used for the WPM estimate
pub const CHARS_PER_WORD: f64 = 5.0;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("could not recognise the text encoding of {}", .0.display())]
    UnknownEncoding(PathBuf),
    #[error(transparent)]
    Text(#[from] TextError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    /// No file loaded or the session is over
    Ignored,
    Revealed(char),
    /// The text is exhausted; the session has ended
    Finished,
}

/// End-of-session figures, rounded to two decimals
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SessionStats {
    pub chars: u64,
    pub keys: u64,
    pub time_s: f64,
    pub cps: f64,
    pub wpm: f64,
}

pub struct PracticeSession {
    typewriter: TypeWriter,
    monitor: Arc<RateMonitor>,
    sink: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    path: Option<PathBuf>,
    revealed: String,
    started_at: Option<Instant>,
    ended_at: Option<Instant>,
    typed_chars: u64,
    key_events: u64,
    stopped: bool,
}

impl PracticeSession {
    pub fn new(monitor: Arc<RateMonitor>, sink: Arc<dyn AlertSink>) -> Self {
        let clock = monitor.clock();
        Self {
            typewriter: TypeWriter::new(),
            monitor,
            sink,
            clock,
            path: None,
            revealed: String::new(),
            started_at: None,
            ended_at: None,
            typed_chars: 0,
            key_events: 0,
            stopped: false,
        }
    }

    /// Open a text for practice, discarding any session in progress.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<TextEncoding, SessionError> {
        let path = path.as_ref();
        let encoding = detect_encoding(path)
            .map_err(TextError::from)?
            .ok_or_else(|| SessionError::UnknownEncoding(path.to_path_buf()))?;

        self.reset();
        self.typewriter.open(path, encoding)?;
        self.path = Some(path.to_path_buf());

        tracing::info!(path = %path.display(), %encoding, "loaded text");
        Ok(encoding)
    }

    /// Handle one counted key press.
    ///
    /// The first accepted key starts timing and rate monitoring.
    pub fn on_key(&mut self) -> Result<KeyOutcome, SessionError> {
        if !self.typewriter.is_loaded() || self.stopped {
            return Ok(KeyOutcome::Ignored);
        }

        if self.started_at.is_none() {
            self.started_at = Some(self.clock.now());
            self.monitor.start(Arc::clone(&self.sink));
        }

        self.key_events += 1;
        self.monitor.record_keystroke();

        match self.typewriter.next_char()? {
            Some(c) => {
                self.revealed.push(c);
                self.typed_chars += 1;
                Ok(KeyOutcome::Revealed(c))
            }
            None => {
                self.finish();
                tracing::info!(chars = self.typed_chars, "reached end of text");
                Ok(KeyOutcome::Finished)
            }
        }
    }

    /// End the session early. Returns false when there is nothing to stop.
    pub fn stop(&mut self) -> bool {
        if self.started_at.is_none() && !self.typewriter.is_loaded() {
            return false;
        }
        self.finish();
        self.typewriter.reset();
        true
    }

    fn finish(&mut self) {
        if self.ended_at.is_none() {
            self.ended_at = Some(self.clock.now());
        }
        self.stopped = true;
        self.monitor.stop();
    }

    /// Drop the loaded text and all counters.
    pub fn reset(&mut self) {
        self.monitor.stop();
        self.typewriter.reset();
        self.path = None;
        self.revealed.clear();
        self.started_at = None;
        self.ended_at = None;
        self.typed_chars = 0;
        self.key_events = 0;
        self.stopped = false;
    }

    pub fn stats(&self) -> SessionStats {
        let elapsed = match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            (Some(start), None) => self.clock.now().saturating_duration_since(start),
            _ => Default::default(),
        };
        let time_s = elapsed.as_secs_f64();
        let chars = self.typed_chars as f64;

        let cps = ratio(chars, time_s).unwrap_or(0.0);
        let wpm = ratio(chars / CHARS_PER_WORD, time_s / 60.0).unwrap_or(0.0);

        SessionStats {
            chars: self.typed_chars,
            keys: self.key_events,
            time_s: round_to(time_s, 2),
            cps: round_to(cps, 2),
            wpm: round_to(wpm, 2),
        }
    }

    /// History entry describing this session
    pub fn record(&self) -> TestRecord {
        let stats = self.stats();
        TestRecord {
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            speed: round_to(self.monitor.current_instantaneous_rate(), 2),
            duration: stats.time_s,
            typed_chars: stats.chars,
            total_keystrokes: self.monitor.total_event_count() as u64,
            wpm_estimated: stats.wpm,
        }
    }

    pub fn revealed(&self) -> &str {
        &self.revealed
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Encoding of the loaded text
    pub fn encoding(&self) -> Option<TextEncoding> {
        self.is_loaded().then(|| self.typewriter.encoding())
    }

    pub fn is_loaded(&self) -> bool {
        self.typewriter.is_loaded()
    }

    pub fn has_started(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn monitor(&self) -> &RateMonitor {
        &self.monitor
    }
}

impl Drop for PracticeSession {
    fn drop(&mut self) {
        self.monitor.stop();
    }
}
