use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::trace;

/// Engine phases tracked by the timing aggregator.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum TimingOperation {
    DecomposeGuard,
    BuildTree,
    FindBranch,
    IsProven,
    SymbolLookup,
}

/// Accumulated duration and call count for one operation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TimingTotals {
    pub calls: u64,
    pub total: Duration,
}

static TIMINGS: Mutex<BTreeMap<TimingOperation, TimingTotals>> = Mutex::new(BTreeMap::new());

pub fn record(operation: TimingOperation, elapsed: Duration) {
    trace!(?operation, ?elapsed, "operation finished");
    let mut timings = match TIMINGS.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let totals = timings.entry(operation).or_default();
    totals.calls += 1;
    totals.total += elapsed;
}

/// Current totals, ordered by operation.
pub fn snapshot() -> Vec<(TimingOperation, TimingTotals)> {
    let timings = match TIMINGS.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    timings.iter().map(|(op, totals)| (*op, *totals)).collect()
}

pub fn reset() {
    let mut timings = match TIMINGS.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    timings.clear();
}

/// Records the elapsed time of the enclosing scope on drop.
pub struct OperationTimer {
    operation: TimingOperation,
    started: Instant,
}

impl OperationTimer {
    pub fn new(operation: TimingOperation) -> Self {
        Self {
            operation,
            started: Instant::now(),
        }
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        record(self.operation, self.started.elapsed());
    }
}
