//! Per-table mutual exclusion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use labgrid_state::TableNumber;
use tokio::sync::{Mutex, OwnedMutexGuard};

type Registry = Arc<StdMutex<HashMap<TableNumber, Arc<Mutex<()>>>>>;

/// Lock registry keyed by table number.
///
/// Flows on different tables never contend; a second flow on the same
/// table waits until the first releases its guard. An entry lives only
/// while some flow holds or waits on it.
#[derive(Debug, Clone, Default)]
pub struct TableLocks {
    locks: Registry,
}

/// Held for the duration of one flow on a table.
#[derive(Debug)]
pub struct TableGuard {
    table: TableNumber,
    registry: Registry,
    guard: OwnedMutexGuard<()>,
}

impl TableGuard {
    pub fn table(&self) -> TableNumber {
        self.table
    }
}

impl Drop for TableGuard {
    fn drop(&mut self) {
        let mut locks = registry(&self.registry);
        let ours = OwnedMutexGuard::mutex(&self.guard);
        // The map and this guard are the only holders: nobody is waiting.
        let idle = locks
            .get(&self.table)
            .is_some_and(|entry| Arc::ptr_eq(entry, ours) && Arc::strong_count(entry) == 2);
        if idle {
            locks.remove(&self.table);
        }
    }
}

fn registry(locks: &Registry) -> MutexGuard<'_, HashMap<TableNumber, Arc<Mutex<()>>>> {
    locks.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TableLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, table: TableNumber) -> TableGuard {
        let lock = registry(&self.locks).entry(table).or_default().clone();
        TableGuard {
            table,
            registry: self.locks.clone(),
            guard: lock.lock_owned().await,
        }
    }

    /// Tables with a live lock entry.
    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        registry(&self.locks).len()
    }
}
