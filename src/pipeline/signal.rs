use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::error::{MinerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRequest {
    None,
    /// Finish the current phase, write its checkpoint, then stop.
    Drain,
    /// Stop at the next cluster or candidate boundary.
    Cancel,
}

impl From<u8> for StopRequest {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Drain,
            2 => Self::Cancel,
            _ => Self::None,
        }
    }
}

impl From<StopRequest> for u8 {
    fn from(s: StopRequest) -> Self {
        match s {
            StopRequest::None => 0,
            StopRequest::Drain => 1,
            StopRequest::Cancel => 2,
        }
    }
}

/// Cooperative stop flag shared between a run and its caller.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    request: Arc<AtomicU8>,
    acknowledged: Arc<AtomicBool>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        Self {
            request: Arc::new(AtomicU8::new(0)),
            acknowledged: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn send(&self, request: StopRequest) {
        self.acknowledged.store(false, Ordering::SeqCst);
        self.request.store(request.into(), Ordering::SeqCst);
    }

    pub fn drain(&self) {
        self.send(StopRequest::Drain);
    }

    pub fn cancel(&self) {
        self.send(StopRequest::Cancel);
    }

    pub fn clear(&self) {
        self.request.store(0, Ordering::SeqCst);
        self.acknowledged.store(false, Ordering::SeqCst);
    }

    pub fn check(&self) -> StopRequest {
        StopRequest::from(self.request.load(Ordering::SeqCst))
    }

    pub fn is_cancelled(&self) -> bool {
        self.check() == StopRequest::Cancel
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged.load(Ordering::SeqCst)
    }

    /// Boundary inside a phase: errors only on `Cancel`.
    pub fn checkpoint(&self, phase: &str) -> Result<()> {
        if self.is_cancelled() {
            self.acknowledged.store(true, Ordering::SeqCst);
            return Err(MinerError::Cancelled {
                phase: phase.to_string(),
            });
        }
        Ok(())
    }

    /// Boundary between phases: errors on any stop request.
    pub fn phase_boundary(&self, completed: &str) -> Result<()> {
        if self.check() != StopRequest::None {
            self.acknowledged.store(true, Ordering::SeqCst);
            return Err(MinerError::Cancelled {
                phase: completed.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_seen_by_clones() {
        let signal = CancelSignal::new();
        let observer = signal.clone();
        assert!(observer.checkpoint("clustering").is_ok());

        signal.cancel();
        let err = observer.checkpoint("clustering").unwrap_err();
        assert!(matches!(err, MinerError::Cancelled { ref phase } if phase == "clustering"));
        assert!(signal.is_acknowledged());
    }

    #[test]
    fn test_drain_only_stops_at_phase_boundary() {
        let signal = CancelSignal::new();
        signal.drain();
        assert!(signal.checkpoint("validation").is_ok());
        assert!(signal.phase_boundary("validation").is_err());

        signal.clear();
        assert_eq!(signal.check(), StopRequest::None);
        assert!(signal.phase_boundary("validation").is_ok());
    }
}
