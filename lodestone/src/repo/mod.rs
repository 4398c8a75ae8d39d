//! In-memory indexed record repository.
//!
//! Typed tables with stable row ids and automatic insert/change/delete
//! events. Tables are single-writer: the owning system mutates them during
//! its tick and consumers interact through the owner's API. This is the
//! in-core realization of the engine's repository contract, not a
//! database.

use std::collections::BTreeMap;
use std::collections::VecDeque;

use lodestone_shared::errors::{LodestoneError, LodestoneResult};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Stable identifier of one row within its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowId(u64);

impl RowId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Automatic event describing one table mutation.
#[derive(Debug, Clone)]
pub enum TableEvent<T> {
    Inserted { id: RowId, row: T },
    Changed { id: RowId, before: T, after: T },
    Removed { id: RowId, row: T },
}

/// Table of records with automatic mutation events.
pub struct EventedTable<T: Clone> {
    rows: BTreeMap<u64, T>,
    next_id: u64,
    events: VecDeque<TableEvent<T>>,
    events_enabled: bool,
}

impl<T: Clone> Default for EventedTable<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_id: 1,
            events: VecDeque::new(),
            events_enabled: false,
        }
    }
}

impl<T: Clone> EventedTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table that records insert/change/delete events for later drain.
    pub fn with_events() -> Self {
        Self {
            events_enabled: true,
            ..Self::default()
        }
    }

    pub fn insert(&mut self, row: T) -> RowId {
        let id = RowId(self.next_id);
        self.next_id += 1;

        if self.events_enabled {
            self.events.push_back(TableEvent::Inserted {
                id,
                row: row.clone(),
            });
        }
        self.rows.insert(id.0, row);
        id
    }

    pub fn get(&self, id: RowId) -> Option<&T> {
        self.rows.get(&id.0)
    }

    /// Mutate one row in place, emitting a change event with before and
    /// after copies.
    pub fn update(&mut self, id: RowId, mutate: impl FnOnce(&mut T)) -> LodestoneResult<()> {
        let row = self
            .rows
            .get_mut(&id.0)
            .ok_or_else(|| LodestoneError::NotFound(format!("row {}", id.0)))?;

        if self.events_enabled {
            let before = row.clone();
            mutate(row);
            let after = row.clone();
            self.events.push_back(TableEvent::Changed { id, before, after });
        } else {
            mutate(row);
        }
        Ok(())
    }

    pub fn remove(&mut self, id: RowId) -> Option<T> {
        let row = self.rows.remove(&id.0)?;
        if self.events_enabled {
            self.events.push_back(TableEvent::Removed {
                id,
                row: row.clone(),
            });
        }
        Some(row)
    }

    /// Drop every row without emitting events. Used by wholesale resets
    /// where consumers are rebuilt anyway.
    pub fn clear_silent(&mut self) {
        self.rows.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (RowId, &T)> {
        self.rows.iter().map(|(id, row)| (RowId(*id), row))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn find(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<(RowId, &T)> {
        self.iter().find(|(_, row)| predicate(row))
    }

    /// Row ids ordered by descending key: the interval-descending cursor
    /// of the repository contract. Ties keep insertion order.
    pub fn ids_by_key_descending<K: Ord>(&self, key: impl Fn(&T) -> K) -> Vec<RowId> {
        let mut ids: Vec<(K, RowId)> = self
            .iter()
            .map(|(id, row)| (key(row), id))
            .collect();
        ids.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Take every queued event.
    pub fn drain_events(&mut self) -> Vec<TableEvent<T>> {
        self.events.drain(..).collect()
    }
}

/// Read-mostly singleton cell with explicit write access.
pub struct Singleton<T> {
    cell: RwLock<T>,
}

impl<T> Singleton<T> {
    pub fn new(value: T) -> Self {
        Self {
            cell: RwLock::new(value),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.cell.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.cell.write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Row {
        name: &'static str,
        priority: u32,
    }

    #[test]
    fn insert_update_remove_emit_events() {
        let mut table = EventedTable::with_events();
        let id = table.insert(Row {
            name: "a",
            priority: 1,
        });
        table.update(id, |row| row.priority = 9).unwrap();
        table.remove(id).unwrap();

        let events = table.drain_events();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], TableEvent::Inserted { .. }));
        match &events[1] {
            TableEvent::Changed { before, after, .. } => {
                assert_eq!(before.priority, 1);
                assert_eq!(after.priority, 9);
            }
            other => panic!("expected change event, got {other:?}"),
        }
        assert!(matches!(events[2], TableEvent::Removed { .. }));
    }

    #[test]
    fn descending_cursor_orders_by_key_then_insertion() {
        let mut table: EventedTable<Row> = EventedTable::new();
        let low = table.insert(Row {
            name: "low",
            priority: 1,
        });
        let high = table.insert(Row {
            name: "high",
            priority: 10,
        });
        let high_twin = table.insert(Row {
            name: "high_twin",
            priority: 10,
        });

        let ids = table.ids_by_key_descending(|row| row.priority);
        assert_eq!(ids, vec![high, high_twin, low]);
    }

    #[test]
    fn update_missing_row_is_not_found() {
        let mut table: EventedTable<Row> = EventedTable::new();
        let id = table.insert(Row {
            name: "x",
            priority: 0,
        });
        table.remove(id);
        assert!(table.update(id, |_| {}).is_err());
    }

    #[test]
    fn singleton_read_write_access() {
        let singleton = Singleton::new(Row {
            name: "status",
            priority: 0,
        });
        assert_eq!(singleton.read().priority, 0);
        singleton.write().priority = 3;
        assert_eq!(singleton.read().priority, 3);
    }
}
