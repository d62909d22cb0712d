use crate::domain::{FitParameters, FitRecord, LineEntry};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation flag, polled between fitting stages and lines.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStage {
    ShiftAndContinuum,
    Convolution,
    Abundance,
    EquivalentWidth,
}

impl FitStage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ShiftAndContinuum => "shift+continuum",
            Self::Convolution => "convolution",
            Self::Abundance => "abundance",
            Self::EquivalentWidth => "equivalent-width",
        }
    }
}

/// Per-line fitting states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    Pending,
    RangeCheck,
    Skipped,
    Fitting { round: usize },
    Done,
    Cancelled,
}

/// Progress callbacks invoked at the fitter's checkpoints. All methods
/// default to doing nothing.
pub trait FitObserver {
    fn line_started(&mut self, _line: &LineEntry, _position: usize, _total: usize) {}

    fn state_changed(&mut self, _line: &LineEntry, _state: LineState) {}

    fn stage_finished(
        &mut self,
        _line: &LineEntry,
        _stage: FitStage,
        _parameters: &FitParameters,
        _chi: f64,
    ) {
    }

    /// Called once the line's record has been persisted.
    fn line_finished(&mut self, _record: &FitRecord) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl FitObserver for NoopObserver {}
