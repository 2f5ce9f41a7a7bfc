use serde::{Deserialize, Serialize};

/// Outcome of one drain cycle. `ok` is the operational signal: false when
/// any item ended `failed` or the cycle aborted on a storage error. Skips
/// are expected behavior and leave `ok` untouched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub ok: bool,
    pub processed: u32,
    pub sent: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl Default for RunReport {
    fn default() -> Self {
        Self { ok: true, processed: 0, sent: 0, failed: 0, skipped: 0 }
    }
}

impl RunReport {
    pub fn record_sent(&mut self) {
        self.processed += 1;
        self.sent += 1;
    }

    pub fn record_failed(&mut self) {
        self.processed += 1;
        self.failed += 1;
        self.ok = false;
    }

    pub fn record_skipped(&mut self) {
        self.processed += 1;
        self.skipped += 1;
    }

    /// A retried item went back to the queue; it was processed but reached
    /// no terminal state this cycle.
    pub fn record_requeued(&mut self) {
        self.processed += 1;
    }

    pub fn record_aborted(&mut self) {
        self.ok = false;
    }
}
