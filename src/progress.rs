//! Transfer progress observation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Observer for live transfer progress.
///
/// The response reader reports every chunk it pulls off the wire
/// (headers included), and the range downloader announces the expected
/// total once a HEAD probe learns it. Implementations must tolerate
/// concurrent calls from parallel transfers.
pub trait ProgressObserver: Send + Sync {
    /// Expected total body size, when known.
    fn on_total(&self, _total: u64) {}

    /// Bytes just received from the wire.
    fn on_bytes(&self, _count: u64) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {}

/// Counting observer suitable for polling from a display task.
#[derive(Debug, Default)]
pub struct TransferProgress {
    downloaded: AtomicU64,
    total: AtomicU64,
}

impl TransferProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.downloaded.store(0, Ordering::Relaxed);
        self.total.store(0, Ordering::Relaxed);
    }
}

impl ProgressObserver for TransferProgress {
    fn on_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    fn on_bytes(&self, count: u64) {
        self.downloaded.fetch_add(count, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_progress_accumulates() {
        let progress = TransferProgress::new();
        progress.on_total(100);
        progress.on_bytes(30);
        progress.on_bytes(20);
        assert_eq!(progress.total(), 100);
        assert_eq!(progress.downloaded(), 50);

        progress.reset();
        assert_eq!(progress.downloaded(), 0);
        assert_eq!(progress.total(), 0);
    }
}
