//! Keystroke-rate monitoring.
//!
//! [`RateMonitor`] collects keystroke timestamps pushed from the input side
//! and runs a sampler thread that compares the rate over the last few
//! seconds against the session average. When the two diverge sharply an
//! [`Alert`] is handed to the session's [`AlertSink`].
//!
//! All shared state lives behind a single mutex. Keystroke recording and the
//! accessors only hold it long enough to push or binary-search the sorted
//! timestamp list, so they stay fast while the sampler is running.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::alert::{self, Alert, AlertSink};
use crate::clock::{Clock, SystemClock};
use crate::runtime::{FixedTicker, Ticker};

/// Trailing window used for the instantaneous rate
pub const RATE_WINDOW: Duration = Duration::from_secs(5);

/// Sessions with fewer events than this are never evaluated for alerts
pub const MIN_EVENTS_FOR_ALERT: usize = 10;

/// Sampler cadence
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Mutable per-session record shared between the input side and the sampler
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub is_active: bool,
    pub session_start: Option<Instant>,
    pub last_alert: Option<Instant>,
    /// Keystroke timestamps in arrival order, never reordered
    pub events: Vec<Instant>,
    generation: u64,
}

impl SessionState {
    fn begin(&mut self, now: Instant) {
        self.is_active = true;
        self.session_start = Some(now);
        self.last_alert = None;
        self.events.clear();
        self.generation += 1;
    }

    fn is_current(&self, generation: u64) -> bool {
        self.is_active && self.generation == generation
    }

    /// Events per minute over `[now - RATE_WINDOW, now]`
    pub fn instantaneous_rate(&self, now: Instant) -> f64 {
        // events are sorted, so both window edges can be found by bisection
        let upper = self.events.partition_point(|t| *t <= now);
        let lower = self.events[..upper]
            .partition_point(|t| now.duration_since(*t) > RATE_WINDOW);
        let recent = upper - lower;

        if recent == 0 {
            return 0.0;
        }
        recent as f64 / RATE_WINDOW.as_secs_f64() * 60.0
    }

    /// Events per minute over the whole session, `None` while undefined
    pub fn average_rate(&self, now: Instant) -> Option<f64> {
        let start = self.session_start?;
        let elapsed = now.saturating_duration_since(start).as_secs_f64();
        if elapsed == 0.0 {
            return None;
        }
        Some(self.events.len() as f64 / elapsed * 60.0)
    }

    /// One sampler step: compute both rates and decide on an alert.
    ///
    /// Updates `last_alert` when an alert is produced; otherwise leaves the
    /// state untouched.
    pub fn sample(&mut self, now: Instant) -> Option<Alert> {
        let instantaneous = self.instantaneous_rate(now);

        if self.events.len() < MIN_EVENTS_FOR_ALERT {
            return None;
        }

        let average = self.average_rate(now)?;
        let since_last_alert = self.last_alert.map(|t| now.saturating_duration_since(t));
        let kind = alert::evaluate(instantaneous, average, since_last_alert)?;

        self.last_alert = Some(now);
        Some(Alert::new(kind, instantaneous, average))
    }
}

/// Point-in-time view of the monitor
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RateSnapshot {
    pub instantaneous: f64,
    pub average: f64,
    pub total: usize,
}

struct Sampler {
    wake: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct RateMonitor {
    clock: Arc<dyn Clock>,
    interval: Duration,
    state: Arc<Mutex<SessionState>>,
    sampler: Mutex<Option<Sampler>>,
}

impl RateMonitor {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock), FixedTicker::new(SAMPLE_INTERVAL))
    }

    pub fn with_clock<T: Ticker>(clock: Arc<dyn Clock>, ticker: T) -> Self {
        Self {
            clock,
            interval: ticker.interval(),
            state: Arc::new(Mutex::new(SessionState::default())),
            sampler: Mutex::new(None),
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin a new session, replacing any session already running.
    pub fn start(&self, sink: Arc<dyn AlertSink>) {
        self.stop();

        let generation = {
            let mut state = self.lock_state();
            state.begin(self.clock.now());
            state.generation
        };

        let (wake, wake_rx) = mpsc::channel();
        let clock = Arc::clone(&self.clock);
        let state = Arc::clone(&self.state);
        let interval = self.interval;

        let handle = thread::Builder::new()
            .name("typeflow-sampler".into())
            .spawn(move || {
                tracing::debug!(generation, "sampler started");
                loop {
                    let alert = {
                        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                        if !state.is_current(generation) {
                            break;
                        }
                        state.sample(clock.now())
                    };

                    if let Some(alert) = alert {
                        deliver(sink.as_ref(), alert);
                    }

                    match wake_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!(generation, "sampler stopped");
            });

        match handle {
            Ok(handle) => {
                *self.sampler.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(Sampler { wake, handle });
                tracing::info!("rate monitor started");
            }
            Err(e) => {
                // without a sampler the session still counts keystrokes, it just never alerts
                tracing::warn!(error = %e, "failed to spawn sampler thread");
            }
        }
    }

    /// End the session. Safe to call repeatedly or before any `start`.
    ///
    /// Waits for the sampler to exit unless called from the sampler itself
    /// (i.e. from inside an alert callback).
    pub fn stop(&self) {
        let was_active = {
            let mut state = self.lock_state();
            std::mem::replace(&mut state.is_active, false)
        };

        let sampler = self
            .sampler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(Sampler { wake, handle }) = sampler {
            let _ = wake.send(());
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::warn!("sampler thread panicked");
            }
        }

        if was_active {
            tracing::info!(keystrokes = self.total_event_count(), "rate monitor stopped");
        }
    }

    /// Record one keystroke at the current time. No-op while inactive.
    pub fn record_keystroke(&self) {
        let mut state = self.lock_state();
        if state.is_active {
            // read under the lock so concurrent recorders push in time order
            let now = self.clock.now();
            state.events.push(now);
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock_state().is_active
    }

    pub fn current_instantaneous_rate(&self) -> f64 {
        let now = self.clock.now();
        self.lock_state().instantaneous_rate(now)
    }

    /// Session-average rate, 0 when no time has elapsed or no session started
    pub fn average_rate(&self) -> f64 {
        let now = self.clock.now();
        self.lock_state().average_rate(now).unwrap_or(0.0)
    }

    pub fn total_event_count(&self) -> usize {
        self.lock_state().events.len()
    }

    pub fn snapshot(&self) -> RateSnapshot {
        let now = self.clock.now();
        let state = self.lock_state();
        RateSnapshot {
            instantaneous: state.instantaneous_rate(now),
            average: state.average_rate(now).unwrap_or(0.0),
            total: state.events.len(),
        }
    }
}

impl Default for RateMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RateMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for RateMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateMonitor")
            .field("interval", &self.interval)
            .field("state", &*self.lock_state())
            .finish()
    }
}

fn deliver(sink: &dyn AlertSink, alert: Alert) {
    tracing::info!(kind = %alert.kind, message = %alert.message, "speed alert");
    if panic::catch_unwind(AssertUnwindSafe(|| sink.deliver(alert))).is_err() {
        tracing::warn!("alert callback panicked; sampler keeps running");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertKind;
    use crate::clock::ManualClock;
    use assert_matches::assert_matches;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    /// Session started at `origin`, events at the given offsets in seconds
    fn state_with_events(origin: Instant, offsets: &[f64]) -> SessionState {
        let mut state = SessionState::default();
        state.begin(origin);
        state.events = offsets.iter().map(|o| origin + secs(*o)).collect();
        state
    }

    #[test]
    fn test_windowed_rate_counts_only_last_five_seconds() {
        let origin = Instant::now();
        let state = state_with_events(origin, &[0.0, 1.0, 2.0, 6.0, 7.0, 8.0]);

        // window is [3s, 8s]
        let now = origin + secs(8.0);
        assert_eq!(state.instantaneous_rate(now), 3.0 / 5.0 * 60.0);
    }

    #[test]
    fn test_windowed_rate_includes_window_edge() {
        let origin = Instant::now();
        let state = state_with_events(origin, &[1.0, 2.0]);

        assert_eq!(state.instantaneous_rate(origin + secs(6.0)), 2.0 / 5.0 * 60.0);
        assert_eq!(
            state.instantaneous_rate(origin + secs(6.5)),
            1.0 / 5.0 * 60.0
        );
    }

    #[test]
    fn test_windowed_rate_empty() {
        let origin = Instant::now();
        let state = state_with_events(origin, &[]);
        assert_eq!(state.instantaneous_rate(origin + secs(3.0)), 0.0);

        let stale = state_with_events(origin, &[0.0, 0.5]);
        assert_eq!(stale.instantaneous_rate(origin + secs(30.0)), 0.0);
    }

    #[test]
    fn test_average_rate_undefined_at_zero_elapsed() {
        let origin = Instant::now();
        let state = state_with_events(origin, &[0.0; 12]);
        assert_eq!(state.average_rate(origin), None);
        assert_eq!(state.average_rate(origin + secs(2.0)), Some(12.0 / 2.0 * 60.0));
    }

    #[test]
    fn test_sample_requires_ten_events() {
        let origin = Instant::now();
        // nine events crammed into the last second after a quiet minute: ratio is huge
        let offsets: Vec<f64> = (0..9).map(|i| 59.0 + i as f64 * 0.1).collect();
        let mut state = state_with_events(origin, &offsets);

        assert_eq!(state.sample(origin + secs(60.0)), None);
        assert_eq!(state.last_alert, None);

        state.events.push(origin + secs(60.0));
        assert_matches!(
            state.sample(origin + secs(60.0)),
            Some(Alert {
                kind: AlertKind::TooFast,
                ..
            })
        );
    }

    #[test]
    fn test_sample_skips_at_zero_elapsed() {
        let origin = Instant::now();
        let mut state = state_with_events(origin, &[0.0; 20]);
        assert_eq!(state.sample(origin), None);
    }

    #[test]
    fn test_sample_exact_fast_ratio_is_quiet() {
        let origin = Instant::now();
        // at 10s: average = n / 10 * 60, instantaneous = k / 5 * 60, ratio = 2k / n
        // n = 20 events in total, k = 15 of them in the window -> ratio 1.5
        let mut offsets: Vec<f64> = (0..5).map(|i| i as f64).collect();
        offsets.extend((0..15).map(|i| 5.0 + i as f64 * 0.25));
        let mut state = state_with_events(origin, &offsets);

        let now = origin + secs(10.0);
        let inst = state.instantaneous_rate(now);
        let avg = state.average_rate(now).unwrap();
        assert_eq!(inst, 180.0);
        assert_eq!(avg, 120.0);
        assert_eq!(state.sample(now), None);

        // one more event in the window tips it over: ratio = 32 / 21 > 1.5
        state.events.push(origin + secs(9.9));
        assert_matches!(
            state.sample(now),
            Some(Alert {
                kind: AlertKind::TooFast,
                ..
            })
        );
    }

    #[test]
    fn test_sample_too_slow_after_pause() {
        let origin = Instant::now();
        // 40 events in the first 8s, then one keystroke after a long pause
        let mut offsets: Vec<f64> = (0..40).map(|i| i as f64 * 0.2).collect();
        offsets.push(19.0);
        let mut state = state_with_events(origin, &offsets);

        let alert = state.sample(origin + secs(20.0)).unwrap();
        assert_eq!(alert.kind, AlertKind::TooSlow);
        assert_eq!(alert.instantaneous, 1.0 / 5.0 * 60.0);
        assert_eq!(alert.average, 41.0 / 20.0 * 60.0);
        assert_eq!(alert.message, "当前速度: 12.0 字/分钟，平均: 123.0 字/分钟");
    }

    #[test]
    fn test_sample_no_keystrokes_in_window_is_not_slow() {
        let origin = Instant::now();
        let offsets: Vec<f64> = (0..40).map(|i| i as f64 * 0.2).collect();
        let mut state = state_with_events(origin, &offsets);

        assert_eq!(state.sample(origin + secs(20.0)), None);
    }

    #[test]
    fn test_sample_cooldown() {
        let origin = Instant::now();
        let offsets: Vec<f64> = (0..40).map(|i| i as f64 * 0.2).collect();
        let mut state = state_with_events(origin, &offsets);

        let first = origin + secs(19.0);
        state.events.push(first);
        assert!(state.sample(first).is_some());
        assert_eq!(state.last_alert, Some(first));

        // still alert-worthy, but inside the cooldown
        let during = origin + secs(28.9);
        state.events.push(during);
        assert_eq!(state.sample(during), None);
        assert_eq!(state.last_alert, Some(first));

        let after = origin + secs(29.0);
        assert!(state.sample(after).is_some());
        assert_eq!(state.last_alert, Some(after));
    }

    #[test]
    fn test_begin_resets_everything() {
        let origin = Instant::now();
        let mut state = state_with_events(origin, &[0.0, 1.0, 2.0]);
        state.last_alert = Some(origin);
        let generation = state.generation;

        state.begin(origin + secs(5.0));

        assert!(state.events.is_empty());
        assert_eq!(state.last_alert, None);
        assert_eq!(state.session_start, Some(origin + secs(5.0)));
        assert!(state.is_current(generation + 1));
        assert!(!state.is_current(generation));
    }

    fn manual_monitor() -> (RateMonitor, ManualClock) {
        let clock = ManualClock::new();
        let monitor = RateMonitor::with_clock(
            Arc::new(clock.clone()),
            FixedTicker::new(Duration::from_millis(5)),
        );
        (monitor, clock)
    }

    fn noop_sink() -> Arc<dyn AlertSink> {
        Arc::new(|_: AlertKind, _: &str| {})
    }

    #[test]
    fn test_accessors_before_start() {
        let (monitor, _clock) = manual_monitor();
        monitor.record_keystroke();

        assert!(!monitor.is_active());
        assert_eq!(monitor.total_event_count(), 0);
        assert_eq!(monitor.current_instantaneous_rate(), 0.0);
        assert_eq!(monitor.average_rate(), 0.0);
        assert_eq!(monitor.snapshot(), RateSnapshot::default());
    }

    #[test]
    fn test_record_counts_calls_since_start() {
        let (monitor, clock) = manual_monitor();
        monitor.start(noop_sink());
        for _ in 0..7 {
            clock.advance(secs(0.1));
            monitor.record_keystroke();
        }
        assert_eq!(monitor.total_event_count(), 7);

        monitor.start(noop_sink());
        assert_eq!(monitor.total_event_count(), 0);
        monitor.record_keystroke();
        assert_eq!(monitor.total_event_count(), 1);
        monitor.stop();
    }

    #[test]
    fn test_stop_keeps_counts_and_ignores_new_keys() {
        let (monitor, clock) = manual_monitor();
        monitor.start(noop_sink());
        for _ in 0..3 {
            clock.advance(secs(0.5));
            monitor.record_keystroke();
        }
        monitor.stop();
        monitor.record_keystroke();

        assert!(!monitor.is_active());
        assert_eq!(monitor.total_event_count(), 3);
        assert_eq!(monitor.current_instantaneous_rate(), 3.0 / 5.0 * 60.0);

        monitor.stop();
        assert!(!monitor.is_active());
    }

    #[test]
    fn test_snapshot_matches_accessors() {
        let (monitor, clock) = manual_monitor();
        monitor.start(noop_sink());
        for _ in 0..4 {
            clock.advance(secs(0.5));
            monitor.record_keystroke();
        }

        let snap = monitor.snapshot();
        assert_eq!(snap.total, 4);
        assert_eq!(snap.instantaneous, 4.0 / 5.0 * 60.0);
        assert_eq!(snap.average, 120.0);
        monitor.stop();
    }

    #[test]
    fn test_concurrent_recording() {
        let monitor = Arc::new(RateMonitor::with_clock(
            Arc::new(SystemClock),
            FixedTicker::new(Duration::from_millis(1)),
        ));
        monitor.start(noop_sink());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let monitor = Arc::clone(&monitor);
                thread::spawn(move || {
                    for _ in 0..250 {
                        monitor.record_keystroke();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(monitor.total_event_count(), 1000);
        assert!(monitor.lock_state().events.windows(2).all(|w| w[0] <= w[1]));
        monitor.stop();
    }

    /// Gives "recorder-a" an earlier time than "recorder-b" but stalls `a`
    /// after it has read the clock until `b` is done (or a timeout passes).
    struct StallingClock {
        origin: Instant,
        a_read: Mutex<mpsc::Sender<()>>,
        b_done: Mutex<mpsc::Receiver<()>>,
    }

    impl Clock for StallingClock {
        fn now(&self) -> Instant {
            match thread::current().name() {
                Some("recorder-a") => {
                    let _ = self.a_read.lock().unwrap().send(());
                    let _ = self
                        .b_done
                        .lock()
                        .unwrap()
                        .recv_timeout(Duration::from_millis(100));
                    self.origin + Duration::from_millis(10)
                }
                Some("recorder-b") => self.origin + Duration::from_millis(20),
                _ => self.origin,
            }
        }
    }

    #[test]
    fn test_slow_recorder_cannot_push_out_of_order() {
        let (a_read_tx, a_read_rx) = mpsc::channel();
        let (b_done_tx, b_done_rx) = mpsc::channel();
        let clock = StallingClock {
            origin: Instant::now(),
            a_read: Mutex::new(a_read_tx),
            b_done: Mutex::new(b_done_rx),
        };
        let monitor = Arc::new(RateMonitor::with_clock(
            Arc::new(clock),
            FixedTicker::new(Duration::from_secs(1)),
        ));
        monitor.start(noop_sink());

        let a = {
            let monitor = Arc::clone(&monitor);
            thread::Builder::new()
                .name("recorder-a".into())
                .spawn(move || monitor.record_keystroke())
                .unwrap()
        };
        let b = {
            let monitor = Arc::clone(&monitor);
            thread::Builder::new()
                .name("recorder-b".into())
                .spawn(move || {
                    a_read_rx.recv().unwrap();
                    monitor.record_keystroke();
                    let _ = b_done_tx.send(());
                })
                .unwrap()
        };
        a.join().unwrap();
        b.join().unwrap();

        let events = monitor.lock_state().events.clone();
        assert_eq!(events.len(), 2);
        assert!(events[0] <= events[1], "{events:?}");
        monitor.stop();
    }

    #[test]
    fn test_panicking_callback_does_not_kill_sampler() {
        let (monitor, clock) = manual_monitor();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        monitor.start(Arc::new(move |kind: AlertKind, _: &str| {
            let _ = tx.lock().unwrap().send(kind);
            panic!("ui blew up");
        }));

        // slow steady typing, then a long pause and a single key: too slow
        for _ in 0..40 {
            clock.advance(secs(0.2));
            monitor.record_keystroke();
        }
        clock.advance(secs(11.0));
        monitor.record_keystroke();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            AlertKind::TooSlow
        );

        // past the cooldown, still slow: sampler must alert again
        clock.advance(secs(10.0));
        monitor.record_keystroke();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            AlertKind::TooSlow
        );
        assert!(monitor.is_active());
        monitor.stop();
    }

    #[test]
    fn test_stop_from_inside_callback() {
        let clock = ManualClock::new();
        let monitor = Arc::new(RateMonitor::with_clock(
            Arc::new(clock.clone()),
            FixedTicker::new(Duration::from_millis(5)),
        ));
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let weak = Arc::downgrade(&monitor);
        monitor.start(Arc::new(move |_: AlertKind, _: &str| {
            if let Some(monitor) = weak.upgrade() {
                monitor.stop();
            }
            let _ = tx.lock().unwrap().send(());
        }));

        for _ in 0..40 {
            clock.advance(secs(0.2));
            monitor.record_keystroke();
        }
        clock.advance(secs(11.0));
        monitor.record_keystroke();

        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(!monitor.is_active());
    }
}
