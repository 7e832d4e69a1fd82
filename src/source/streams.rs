use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{Fetch, HistoryKey, Sample, END_OF_HISTORY, UNKNOWN_STREAM};

/// Server-side bookkeeping of open history cursors.
///
/// A cursor stays registered after it is drained and only disappears on
/// `cancel`, so forgotten cancels show up as open streams.
#[derive(Debug, Default)]
pub(crate) struct StreamTable {
    state: Mutex<TableState>,
}

#[derive(Debug, Default)]
struct TableState {
    next_key: u32,
    open: HashMap<HistoryKey, Cursor>,
    opened: u64,
    cancels: HashMap<HistoryKey, u32>,
}

#[derive(Debug)]
struct Cursor {
    samples: Vec<Sample>,
    pos: usize,
}

impl StreamTable {
    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn open(&self, samples: Vec<Sample>) -> HistoryKey {
        let mut state = self.lock();
        state.next_key = state.next_key.wrapping_add(1);
        let key = HistoryKey(state.next_key);
        state.open.insert(key, Cursor { samples, pos: 0 });
        state.opened += 1;
        key
    }

    pub(crate) fn next(&self, key: HistoryKey) -> Fetch {
        let mut state = self.lock();
        let Some(cursor) = state.open.get_mut(&key) else {
            return Fetch::Exhausted(UNKNOWN_STREAM);
        };
        match cursor.samples.get(cursor.pos) {
            Some(sample) => {
                cursor.pos += 1;
                Fetch::Sample(sample.clone())
            }
            None => Fetch::Exhausted(END_OF_HISTORY),
        }
    }

    pub(crate) fn cancel(&self, key: HistoryKey) {
        let mut state = self.lock();
        state.open.remove(&key);
        *state.cancels.entry(key).or_insert(0) += 1;
    }

    pub(crate) fn open_count(&self) -> usize {
        self.lock().open.len()
    }

    pub(crate) fn opened_total(&self) -> u64 {
        self.lock().opened
    }

    pub(crate) fn cancel_counts(&self) -> Vec<(HistoryKey, u32)> {
        let mut counts: Vec<_> = self.lock().cancels.iter().map(|(k, n)| (*k, *n)).collect();
        counts.sort_unstable();
        counts
    }
}
