//! Optimistic reconciliation store.
//!
//! State is two layers: the confirmed snapshot (what the repository has
//! acknowledged) and a log of pending updates. The presented list is a pure
//! [`fold`] of the two, recomputed after every change, so rolling back a
//! failed update is just dropping it from the log.

mod controller;
mod fold;

pub use controller::ShelfController;
pub use fold::fold;

use crate::error::EngineError;
use crate::models::{
    Body, Draft, DurableId, Entity, EntityKey, EntityKind, NewEntity, Presented, TentativeToken,
    TokenIssuer,
};
use crate::order;
use crate::reorder;
use crate::repo::{Call, Confirmation, Outcome, RepoError};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

/// Submission sequence number of a local update, unique per store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationId(u64);

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum OperationKind {
    Add,
    Delete,
    Restore,
    Edit,
    Reorder,
    Move,
}

/// A local mutation, replayed by [`fold`] until reconciled.
#[derive(Clone, Debug, PartialEq)]
pub enum Update<B: Body> {
    Add(Draft<B>),
    Delete(EntityKey),
    Restore(DurableId),
    /// Rename for collections, edit for links.
    Patch(EntityKey, B::Patch),
    Reorder(DurableId, f64),
    Move {
        id: DurableId,
        parent_id: Option<DurableId>,
        order: f64,
    },
}

impl<B: Body> Update<B> {
    pub fn key(&self) -> EntityKey {
        match self {
            Update::Add(draft) => EntityKey::Tentative(draft.token),
            Update::Delete(key) | Update::Patch(key, _) => *key,
            Update::Restore(id) | Update::Reorder(id, _) | Update::Move { id, .. } => {
                EntityKey::Durable(*id)
            }
        }
    }

    pub fn operation(&self) -> OperationKind {
        match self {
            Update::Add(_) => OperationKind::Add,
            Update::Delete(_) => OperationKind::Delete,
            Update::Restore(_) => OperationKind::Restore,
            Update::Patch(..) => OperationKind::Edit,
            Update::Reorder(..) => OperationKind::Reorder,
            Update::Move { .. } => OperationKind::Move,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pending<B: Body> {
    pub id: MutationId,
    pub update: Update<B>,
    in_flight: bool,
}

/// A repository call released by [`Store::take_dispatches`].
#[derive(Clone, Debug, PartialEq)]
pub struct Dispatch<B: Body> {
    pub mutation: MutationId,
    pub call: Call<B>,
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{operation} of {kind} {key} failed: {error}")]
pub struct Failure {
    pub mutation: MutationId,
    pub kind: EntityKind,
    pub operation: OperationKind,
    pub key: EntityKey,
    pub error: RepoError,
}

/// Result of folding one repository outcome into the store.
#[derive(Clone, Debug, PartialEq)]
pub enum Reconciled {
    Applied {
        mutation: MutationId,
        operation: OperationKind,
        id: DurableId,
    },
    RolledBack(Failure),
    /// Unknown or already reconciled mutation; nothing changed.
    Stale(MutationId),
}

pub struct Store<B: Body> {
    confirmed: Vec<Entity<B>>,
    pending: Vec<Pending<B>>,
    aliases: HashMap<TentativeToken, DurableId>,
    presented: Vec<Presented<B>>,
    failures: Vec<Failure>,
    tokens: TokenIssuer,
    next_mutation: u64,
}

impl<B: Body> Default for Store<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Body> Store<B> {
    pub fn new() -> Self {
        Self {
            confirmed: Vec::new(),
            pending: Vec::new(),
            aliases: HashMap::new(),
            presented: Vec::new(),
            failures: Vec::new(),
            tokens: TokenIssuer::new(),
            next_mutation: 1,
        }
    }

    /// Replaces the confirmed snapshot with a fresh repository listing.
    ///
    /// Local tombstones the listing no longer carries are kept so undo can
    /// still bring them back. So are rows with a delete still pending: the
    /// listing may already omit them, and they become tombstones here.
    pub fn hydrate(&mut self, entities: Vec<Entity<B>>) {
        let mut next = entities;
        let previous = std::mem::take(&mut self.confirmed);
        for mut row in previous {
            if next.iter().any(|e| e.id == row.id) {
                continue;
            }
            if row.deleted || self.has_pending_delete(row.id) {
                row.deleted = true;
                next.push(row);
            }
        }
        self.confirmed = next;
        self.refresh();
    }

    fn has_pending_delete(&self, id: DurableId) -> bool {
        let target = EntityKey::Durable(id);
        self.pending
            .iter()
            .any(|p| matches!(p.update, Update::Delete(key) if self.resolve(key) == target))
    }

    fn is_targeted(&self, id: DurableId) -> bool {
        let target = EntityKey::Durable(id);
        self.pending.iter().any(|p| self.resolve(p.update.key()) == target)
    }

    pub fn presented(&self) -> &[Presented<B>] {
        &self.presented
    }

    pub fn confirmed(&self) -> &[Entity<B>] {
        &self.confirmed
    }

    pub fn pending(&self) -> &[Pending<B>] {
        &self.pending
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub fn take_failures(&mut self) -> Vec<Failure> {
        std::mem::take(&mut self.failures)
    }

    /// True once every local update has been reconciled.
    pub fn is_settled(&self) -> bool {
        self.pending.is_empty()
    }

    /// Maps a token to its durable id once the add has been confirmed.
    pub fn resolve(&self, key: EntityKey) -> EntityKey {
        fold::resolve(key, &self.aliases)
    }

    pub fn get(&self, key: EntityKey) -> Option<&Presented<B>> {
        let key = self.resolve(key);
        self.presented.iter().find(|p| p.key() == key)
    }

    /// Visible children of `parent_id`, ascending by order key.
    pub fn siblings(&self, parent_id: Option<DurableId>) -> Vec<&Presented<B>> {
        self.presented
            .iter()
            .filter(|p| p.parent_id() == parent_id)
            .collect()
    }

    fn require(&self, key: EntityKey) -> Result<&Presented<B>, EngineError> {
        self.get(key).ok_or(EngineError::NotFound { kind: B::KIND, key })
    }

    /// Records `update` and re-renders synchronously. The durable call goes
    /// out with the next [`Store::take_dispatches`].
    pub fn apply_local(&mut self, update: Update<B>) -> MutationId {
        let id = MutationId(self.next_mutation);
        self.next_mutation += 1;
        debug!(
            kind = %B::KIND,
            mutation = %id,
            operation = %update.operation(),
            key = %update.key(),
            "applied optimistic update"
        );
        self.pending.push(Pending {
            id,
            update,
            in_flight: false,
        });
        self.refresh();
        id
    }

    /// Adds an Abstract entity at the end of its sibling group.
    pub fn add(
        &mut self,
        parent_id: Option<DurableId>,
        mut body: B,
    ) -> Result<(MutationId, TentativeToken), EngineError> {
        body.validate()?;
        body.normalize();
        let order = order::append_key(self.siblings(parent_id).iter().map(|p| p.order()))?;
        let token = self.tokens.issue();
        let draft = Draft {
            token,
            parent_id,
            order,
            body,
            created_at: Utc::now(),
        };
        Ok((self.apply_local(Update::Add(draft)), token))
    }

    pub fn delete(&mut self, key: EntityKey) -> Result<MutationId, EngineError> {
        let key = self.require(key)?.key();
        Ok(self.apply_local(Update::Delete(key)))
    }

    /// Brings back a tombstoned (or pending-delete) entity.
    pub fn restore(&mut self, id: DurableId) -> Result<MutationId, EngineError> {
        if !self.confirmed.iter().any(|e| e.id == id) {
            return Err(EngineError::NotFound {
                kind: B::KIND,
                key: id.into(),
            });
        }
        Ok(self.apply_local(Update::Restore(id)))
    }

    pub fn patch(&mut self, key: EntityKey, patch: B::Patch) -> Result<MutationId, EngineError> {
        B::validate_patch(&patch)?;
        let key = self.require(key)?.key();
        Ok(self.apply_local(Update::Patch(key, patch)))
    }

    /// Re-parents a Concrete entity, appending it to the new sibling group.
    /// Moving into the current parent does nothing.
    pub fn relocate(
        &mut self,
        key: EntityKey,
        parent_id: Option<DurableId>,
    ) -> Result<Option<MutationId>, EngineError> {
        let item = self.require(key)?;
        let id = match item.key() {
            EntityKey::Durable(id) => id,
            EntityKey::Tentative(token) => return Err(EngineError::Unconfirmed(token)),
        };
        if item.parent_id() == parent_id {
            return Ok(None);
        }

        let order = order::append_key(
            self.siblings(parent_id)
                .iter()
                .filter(|p| p.key() != EntityKey::Durable(id))
                .map(|p| p.order()),
        )?;
        Ok(Some(self.apply_local(Update::Move {
            id,
            parent_id,
            order,
        })))
    }

    /// Drag-and-drop reorder within the item's sibling group.
    pub fn reorder(
        &mut self,
        key: EntityKey,
        source: usize,
        destination: usize,
    ) -> Result<Option<MutationId>, EngineError> {
        let item = self.require(key)?;
        let item_key = item.key();
        let siblings = self.siblings(item.parent_id());

        let Some(order) = reorder::plan(item_key, source, destination, &siblings)? else {
            return Ok(None);
        };
        let EntityKey::Durable(id) = item_key else {
            return Err(EngineError::ReorderBlocked);
        };
        Ok(Some(self.apply_local(Update::Reorder(id, order))))
    }

    /// Respaces every key of a sibling group; one reorder per changed key.
    pub fn renumber(
        &mut self,
        parent_id: Option<DurableId>,
    ) -> Result<Vec<MutationId>, EngineError> {
        let siblings = self.siblings(parent_id);
        if siblings.iter().any(|p| !p.is_concrete()) {
            return Err(EngineError::ReorderBlocked);
        }

        let changes: Vec<(DurableId, f64)> = siblings
            .iter()
            .zip(order::resequence(siblings.len()))
            .filter_map(|(p, key)| {
                let id = p.durable_id()?;
                (p.order() != key).then_some((id, key))
            })
            .collect();

        Ok(changes
            .into_iter()
            .map(|(id, key)| self.apply_local(Update::Reorder(id, key)))
            .collect())
    }

    /// Releases every queued update that may run now.
    ///
    /// Updates run one at a time per entity, in submission order. Updates
    /// aimed at an Abstract entity wait until its add is confirmed.
    pub fn take_dispatches(&mut self) -> Vec<Dispatch<B>> {
        let mut busy: HashSet<EntityKey> = HashSet::new();
        let mut ready = Vec::new();

        for index in 0..self.pending.len() {
            let target = self.resolve(self.pending[index].update.key());
            if !busy.insert(target) || self.pending[index].in_flight {
                continue;
            }
            let Some(call) = self.call_for(&self.pending[index].update) else {
                continue;
            };

            let pending = &mut self.pending[index];
            pending.in_flight = true;
            debug!(
                kind = %B::KIND,
                mutation = %pending.id,
                operation = %pending.update.operation(),
                "dispatched repository call"
            );
            ready.push(Dispatch {
                mutation: pending.id,
                call,
            });
        }

        ready
    }

    fn call_for(&self, update: &Update<B>) -> Option<Call<B>> {
        let call = match update {
            Update::Add(draft) => Call::Add(NewEntity {
                parent_id: draft.parent_id,
                order: Some(draft.order),
                body: draft.body.clone(),
            }),
            Update::Delete(key) => Call::Remove(self.resolve(*key).durable()?),
            Update::Restore(id) => Call::Restore(*id),
            Update::Patch(key, patch) => Call::Update(self.resolve(*key).durable()?, patch.clone()),
            Update::Reorder(id, order) => Call::Reorder(*id, *order),
            Update::Move { id, parent_id, .. } => Call::Move(*id, *parent_id),
        };
        Some(call)
    }

    /// Folds a repository outcome into the confirmed layer.
    ///
    /// Success moves the update's effect into the snapshot; failure drops the
    /// update (and, for a failed add, everything queued behind it for the same
    /// token) and records a [`Failure`]. Newer local updates keep replaying on
    /// top either way.
    pub fn reconcile(&mut self, mutation: MutationId, outcome: Outcome<B>) -> Reconciled {
        let Some(index) = self.pending.iter().position(|p| p.id == mutation) else {
            debug!(kind = %B::KIND, mutation = %mutation, "ignored stale reconciliation");
            return Reconciled::Stale(mutation);
        };

        let update = self.pending.remove(index).update;
        let operation = update.operation();
        let key = update.key();

        let result = match outcome {
            Ok(confirmation) => self.confirm(update, confirmation),
            Err(error) => Err(error),
        };

        let reconciled = match result {
            Ok(id) => {
                debug!(kind = %B::KIND, mutation = %mutation, id = %id, "reconciled");
                Reconciled::Applied {
                    mutation,
                    operation,
                    id,
                }
            }
            Err(error) => {
                if let (OperationKind::Add, EntityKey::Tentative(_)) = (operation, key) {
                    self.pending.retain(|p| p.update.key() != key);
                }
                let failure = Failure {
                    mutation,
                    kind: B::KIND,
                    operation,
                    key,
                    error,
                };
                warn!(
                    kind = %B::KIND,
                    mutation = %mutation,
                    transient = failure.error.is_transient(),
                    error = %failure,
                    "rolled back optimistic update"
                );
                self.failures.push(failure.clone());
                Reconciled::RolledBack(failure)
            }
        };

        self.refresh();
        reconciled
    }

    fn confirm(
        &mut self,
        update: Update<B>,
        confirmation: Confirmation<B>,
    ) -> Result<DurableId, RepoError> {
        let now = Utc::now();
        match update {
            Update::Add(draft) => {
                let Confirmation::Created(entity) = confirmation else {
                    return Err(RepoError::parse("add confirmed without the created entity"));
                };
                let id = entity.id;
                self.aliases.insert(draft.token, id);
                match self.confirmed.iter_mut().find(|e| e.id == id) {
                    Some(slot) => *slot = entity,
                    None => self.confirmed.push(entity),
                }
                Ok(id)
            }
            Update::Delete(key) => self.touch(key, now, |e| e.deleted = true),
            Update::Restore(id) => self.touch(id.into(), now, |e| e.deleted = false),
            Update::Patch(key, patch) => self.touch(key, now, |e| e.body.apply_patch(&patch)),
            Update::Reorder(id, order) => self.touch(id.into(), now, |e| e.order = order),
            Update::Move {
                id,
                parent_id,
                order,
            } => self.touch(id.into(), now, |e| {
                e.parent_id = parent_id;
                e.order = order;
            }),
        }
    }

    fn touch(
        &mut self,
        key: EntityKey,
        now: DateTime<Utc>,
        apply: impl FnOnce(&mut Entity<B>),
    ) -> Result<DurableId, RepoError> {
        let id = self
            .resolve(key)
            .durable()
            .ok_or_else(|| RepoError::parse(format!("{key} confirmed without a durable id")))?;
        if let Some(entity) = self.confirmed.iter_mut().find(|e| e.id == id) {
            apply(entity);
            entity.updated_at = now;
        }
        Ok(id)
    }

    /// Forgets confirmed tombstones that `keep` rejects. Tombstones still
    /// targeted by a pending update survive. Returns how many were dropped.
    pub fn prune_tombstones(&mut self, keep: impl Fn(DurableId) -> bool) -> usize {
        let doomed: HashSet<DurableId> = self
            .confirmed
            .iter()
            .filter(|e| e.deleted && !keep(e.id) && !self.is_targeted(e.id))
            .map(|e| e.id)
            .collect();
        if doomed.is_empty() {
            return 0;
        }
        self.confirmed.retain(|e| !doomed.contains(&e.id));
        debug!(kind = %B::KIND, count = doomed.len(), "pruned tombstones");
        self.refresh();
        doomed.len()
    }

    fn refresh(&mut self) {
        self.presented = fold(&self.confirmed, &self.pending, &self.aliases);
    }
}

#[cfg(test)]
mod tests;
