use std::fmt;
use std::sync::mpsc::Sender;
use std::time::Duration;

/// Minimum time between two consecutive alerts
pub const ALERT_COOLDOWN: Duration = Duration::from_secs(10);

/// Instantaneous / average ratio above which typing is "too fast"
pub const FAST_RATIO: f64 = 1.5;

/// Instantaneous / average ratio below which typing is "too slow"
pub const SLOW_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum AlertKind {
    #[strum(serialize = "too-fast")]
    TooFast,
    #[strum(serialize = "too-slow")]
    TooSlow,
}

/// A speed anomaly detected by the sampler. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
    pub instantaneous: f64,
    pub average: f64,
}

impl Alert {
    pub fn new(kind: AlertKind, instantaneous: f64, average: f64) -> Self {
        Self {
            kind,
            message: format_message(instantaneous, average),
            instantaneous,
            average,
        }
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

pub fn format_message(instantaneous: f64, average: f64) -> String {
    format!(
        "当前速度: {:.1} 字/分钟，平均: {:.1} 字/分钟",
        instantaneous, average
    )
}

/// Decide whether the current rates warrant an alert.
///
/// `since_last_alert` is `None` when no alert has fired in this session.
/// Both ratio thresholds are strict: exactly 1.5x or 0.5x never fires.
pub fn evaluate(
    instantaneous: f64,
    average: f64,
    since_last_alert: Option<Duration>,
) -> Option<AlertKind> {
    if average == 0.0 {
        return None;
    }

    if matches!(since_last_alert, Some(elapsed) if elapsed < ALERT_COOLDOWN) {
        return None;
    }

    let ratio = instantaneous / average;

    if ratio > FAST_RATIO {
        Some(AlertKind::TooFast)
    } else if ratio < SLOW_RATIO && instantaneous > 0.0 {
        Some(AlertKind::TooSlow)
    } else {
        None
    }
}

/// Receiver of speed alerts.
///
/// Alerts are delivered on the sampler thread, so implementations must not
/// touch state owned by another thread directly. Use [`ChannelSink`] to hand
/// alerts over to whichever loop owns presentation.
pub trait AlertSink: Send + Sync + 'static {
    fn deliver(&self, alert: Alert);
}

impl<F> AlertSink for F
where
    F: Fn(AlertKind, &str) + Send + Sync + 'static,
{
    fn deliver(&self, alert: Alert) {
        self(alert.kind, &alert.message)
    }
}

/// Forwards alerts into an mpsc channel, converting them into the
/// receiver's event type.
pub struct ChannelSink<T> {
    tx: Sender<T>,
}

impl<T> ChannelSink<T> {
    pub fn new(tx: Sender<T>) -> Self {
        Self { tx }
    }
}

impl<T> AlertSink for ChannelSink<T>
where
    T: From<Alert> + Send + 'static,
{
    fn deliver(&self, alert: Alert) {
        // receiver gone means the front-end has shut down
        let _ = self.tx.send(T::from(alert));
    }
}
