use tokio::sync::mpsc;

use crate::console::LogKind;

/// Engine banner lines dumping the build configuration; pure noise for users
const CONFIG_DUMP_PREFIX: &str = "  configuration:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionEvent {
    /// Whole percent for the item currently converting; last value wins
    Progress(u8),
    /// Console line, appended in arrival order
    Log(LogKind, String),
}

/// Sending half of the bounded channel that carries progress and log events
/// from the engine and raster backends into the queue
#[derive(Debug, Clone)]
pub struct EventBridge {
    tx: mpsc::Sender<ConversionEvent>,
}

impl EventBridge {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ConversionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Report a fractional engine progress ratio (0.0 - 1.0)
    pub async fn progress(&self, ratio: f64) {
        self.percent(ratio_to_percent(ratio)).await;
    }

    pub async fn percent(&self, pct: u8) {
        // A dropped receiver means nobody is watching; the conversion carries on regardless
        let _ = self.tx.send(ConversionEvent::Progress(pct.min(100))).await;
    }

    /// Forward a raw engine log line, skipping the configuration dump
    pub async fn engine_log(&self, line: &str) {
        if line.is_empty() || line.starts_with(CONFIG_DUMP_PREFIX) {
            return;
        }
        self.notice(LogKind::Info, line).await;
    }

    pub async fn notice(&self, kind: LogKind, message: impl Into<String>) {
        let _ = self.tx.send(ConversionEvent::Log(kind, message.into())).await;
    }

    /// Progress from a blocking worker thread. Must not be called from async context.
    pub fn blocking_percent(&self, pct: u8) {
        let _ = self.tx.blocking_send(ConversionEvent::Progress(pct.min(100)));
    }
}

/// Clamp and round a progress ratio to a whole percentage
pub fn ratio_to_percent(ratio: f64) -> u8 {
    if !ratio.is_finite() {
        return 0;
    }
    (ratio * 100.0).round().clamp(0.0, 100.0) as u8
}
