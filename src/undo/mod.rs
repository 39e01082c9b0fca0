use crate::models::{DurableId, EntityKind};
use crate::state::OperationKind;
use std::collections::VecDeque;
use tracing::debug;

pub const UNDO_CAPACITY: usize = 50;

/// What running an undo record does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compensation {
    /// Repository `undo_delete` plus removal of the local tombstone.
    Restore { kind: EntityKind, id: DurableId },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UndoRecord {
    pub seq: u64,
    pub operation: OperationKind,
    pub affected: DurableId,
    pub compensation: Compensation,
}

impl UndoRecord {
    pub fn kind(&self) -> EntityKind {
        match self.compensation {
            Compensation::Restore { kind, .. } => kind,
        }
    }
}

/// Bounded history of undoable deletes, newest last.
///
/// `pop` removes the record before anyone can act on it, so a record is
/// compensated at most once.
#[derive(Clone, Debug)]
pub struct UndoLedger {
    records: VecDeque<UndoRecord>,
    capacity: usize,
    next_seq: u64,
}

impl Default for UndoLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl UndoLedger {
    pub fn new() -> Self {
        Self::with_capacity(UNDO_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
            next_seq: 1,
        }
    }

    /// Records an undoable delete. Returns the record evicted to make room.
    pub fn push_delete(&mut self, kind: EntityKind, id: DurableId) -> Option<UndoRecord> {
        let record = UndoRecord {
            seq: self.next_seq,
            operation: OperationKind::Delete,
            affected: id,
            compensation: Compensation::Restore { kind, id },
        };
        self.next_seq += 1;
        self.push(record)
    }

    pub fn push(&mut self, record: UndoRecord) -> Option<UndoRecord> {
        let evicted = if self.records.len() >= self.capacity {
            self.records.pop_front()
        } else {
            None
        };
        if let Some(old) = &evicted {
            debug!(seq = old.seq, id = %old.affected, "evicted oldest undo record");
        }
        self.records.push_back(record);
        evicted
    }

    /// Puts back a record whose compensation failed, at its original place
    /// by sequence. Returns the record evicted to make room, which is the
    /// reinstated one itself when everything left is newer.
    pub fn reinstate(&mut self, record: UndoRecord) -> Option<UndoRecord> {
        let index = self.records.partition_point(|r| r.seq < record.seq);
        self.records.insert(index, record);
        if self.records.len() <= self.capacity {
            return None;
        }
        let evicted = self.records.pop_front();
        if let Some(old) = &evicted {
            debug!(seq = old.seq, id = %old.affected, "evicted oldest undo record");
        }
        evicted
    }

    pub fn pop(&mut self) -> Option<UndoRecord> {
        self.records.pop_back()
    }

    /// Drops the newest record for `(kind, id)`, e.g. when its delete was
    /// rolled back.
    pub fn discard(&mut self, kind: EntityKind, id: DurableId) -> Option<UndoRecord> {
        let index = self
            .records
            .iter()
            .rposition(|r| r.kind() == kind && r.affected == id)?;
        self.records.remove(index)
    }

    pub fn contains(&self, kind: EntityKind, id: DurableId) -> bool {
        self.records
            .iter()
            .any(|r| r.kind() == kind && r.affected == id)
    }

    pub fn latest(&self) -> Option<&UndoRecord> {
        self.records.back()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &UndoRecord> {
        self.records.iter()
    }
}
