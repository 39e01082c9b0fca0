//! Per-session context: both stores, the undo ledger and the repositories
//! behind them. Hosts create one and pass it around; nothing here is global.

use crate::config::ShelfConfig;
use crate::error::EngineError;
use crate::models::{
    Body, Collection, CollectionBody, DurableId, EntityKey, EntityKind, Link, LinkBody, LinkPatch,
    Rename, TentativeToken,
};
use crate::repo::{execute, Call, Outcome, RepoError, Repository};
use crate::state::{Dispatch, Failure, MutationId, OperationKind, Reconciled, Store};
use crate::undo::{Compensation, UndoLedger, UndoRecord};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// A repository call ready to run, tagged with its entity kind.
#[derive(Clone, Debug, PartialEq)]
pub enum Job {
    Link(Dispatch<LinkBody>),
    Collection(Dispatch<CollectionBody>),
}

/// A finished [`Job`], to be handed back to [`Session::complete`].
#[derive(Clone, Debug, PartialEq)]
pub enum Completion {
    Link(MutationId, Outcome<LinkBody>),
    Collection(MutationId, Outcome<CollectionBody>),
}

pub struct Session<L, C> {
    links: Store<LinkBody>,
    collections: Store<CollectionBody>,
    ledger: UndoLedger,
    link_repo: L,
    collection_repo: C,
    /// Deletes of Abstract entities; their undo record is pushed once the
    /// remove call can be issued.
    deferred_deletes: HashSet<(EntityKind, MutationId)>,
    /// Undo records whose restore is still pending, by restore mutation.
    /// A rolled-back restore puts its record back on the ledger.
    pending_restores: HashMap<(EntityKind, MutationId), UndoRecord>,
}

impl<L, C> Session<L, C>
where
    L: Repository<LinkBody>,
    C: Repository<CollectionBody>,
{
    pub fn new(link_repo: L, collection_repo: C) -> Self {
        Self::with_config(&ShelfConfig::default(), link_repo, collection_repo)
    }

    pub fn with_config(config: &ShelfConfig, link_repo: L, collection_repo: C) -> Self {
        Self {
            links: Store::new(),
            collections: Store::new(),
            ledger: UndoLedger::with_capacity(config.undo_capacity),
            link_repo,
            collection_repo,
            deferred_deletes: HashSet::new(),
            pending_restores: HashMap::new(),
        }
    }

    pub fn links(&self) -> &Store<LinkBody> {
        &self.links
    }

    pub fn collections(&self) -> &Store<CollectionBody> {
        &self.collections
    }

    pub fn ledger(&self) -> &UndoLedger {
        &self.ledger
    }

    pub fn link_repo(&self) -> &L {
        &self.link_repo
    }

    pub fn collection_repo(&self) -> &C {
        &self.collection_repo
    }

    /// Parents are collections; an unconfirmed one cannot be referenced.
    fn resolve_parent(&self, parent: Option<EntityKey>) -> Result<Option<DurableId>, EngineError> {
        match parent.map(|key| self.collections.resolve(key)) {
            None => Ok(None),
            Some(EntityKey::Durable(id)) => Ok(Some(id)),
            Some(EntityKey::Tentative(token)) => Err(EngineError::TentativeParent(token)),
        }
    }

    pub fn request_add_link(
        &mut self,
        parent: Option<EntityKey>,
        body: LinkBody,
    ) -> Result<TentativeToken, EngineError> {
        let parent_id = self.resolve_parent(parent)?;
        let (_, token) = self.links.add(parent_id, body)?;
        Ok(token)
    }

    pub fn request_add_collection(
        &mut self,
        parent: Option<EntityKey>,
        body: CollectionBody,
    ) -> Result<TentativeToken, EngineError> {
        let parent_id = self.resolve_parent(parent)?;
        let (_, token) = self.collections.add(parent_id, body)?;
        Ok(token)
    }

    pub fn request_delete_link(&mut self, key: EntityKey) -> Result<(), EngineError> {
        let evicted = delete_in(
            &mut self.links,
            &mut self.ledger,
            &mut self.deferred_deletes,
            key,
        )?;
        self.purge_evicted(evicted);
        Ok(())
    }

    pub fn request_delete_collection(&mut self, key: EntityKey) -> Result<(), EngineError> {
        let evicted = delete_in(
            &mut self.collections,
            &mut self.ledger,
            &mut self.deferred_deletes,
            key,
        )?;
        self.purge_evicted(evicted);
        Ok(())
    }

    pub fn request_rename(
        &mut self,
        key: EntityKey,
        name: impl Into<String>,
    ) -> Result<(), EngineError> {
        self.collections.patch(key, Rename { name: name.into() })?;
        Ok(())
    }

    pub fn request_edit(&mut self, key: EntityKey, patch: LinkPatch) -> Result<(), EngineError> {
        self.links.patch(key, patch)?;
        Ok(())
    }

    pub fn request_move_link(
        &mut self,
        key: EntityKey,
        parent: Option<EntityKey>,
    ) -> Result<(), EngineError> {
        let parent_id = self.resolve_parent(parent)?;
        self.links.relocate(key, parent_id)?;
        Ok(())
    }

    pub fn request_move_collection(
        &mut self,
        key: EntityKey,
        parent: Option<EntityKey>,
    ) -> Result<(), EngineError> {
        let parent_id = self.resolve_parent(parent)?;
        if let (EntityKey::Durable(id), Some(target)) = (self.collections.resolve(key), parent_id) {
            if self.is_within(target, id) {
                return Err(EngineError::Validation(format!(
                    "collection {id} cannot be moved into itself or one of its descendants"
                )));
            }
        }
        self.collections.relocate(key, parent_id)?;
        Ok(())
    }

    /// True when `start` is `ancestor` or sits somewhere below it.
    fn is_within(&self, start: DurableId, ancestor: DurableId) -> bool {
        let mut cursor = Some(start);
        let mut steps = 0;
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.collections.presented().len() {
                break;
            }
            cursor = self
                .collections
                .get(current.into())
                .and_then(|c| c.parent_id());
        }
        false
    }

    pub fn request_reorder_link(
        &mut self,
        key: EntityKey,
        source: usize,
        destination: usize,
    ) -> Result<(), EngineError> {
        self.links.reorder(key, source, destination)?;
        Ok(())
    }

    pub fn request_reorder_collection(
        &mut self,
        key: EntityKey,
        source: usize,
        destination: usize,
    ) -> Result<(), EngineError> {
        self.collections.reorder(key, source, destination)?;
        Ok(())
    }

    pub fn request_renumber_links(&mut self, parent: Option<EntityKey>) -> Result<(), EngineError> {
        let parent_id = self.resolve_parent(parent)?;
        self.links.renumber(parent_id)?;
        Ok(())
    }

    pub fn request_renumber_collections(
        &mut self,
        parent: Option<EntityKey>,
    ) -> Result<(), EngineError> {
        let parent_id = self.resolve_parent(parent)?;
        self.collections.renumber(parent_id)?;
        Ok(())
    }

    /// Compensates the newest undo record. An empty ledger is a no-op.
    ///
    /// The record leaves the ledger only once its restore is queued, and
    /// returns to it if the repository rejects the restore.
    pub fn request_undo(&mut self) -> Result<Option<UndoRecord>, EngineError> {
        let Some(record) = self.ledger.latest().cloned() else {
            return Ok(None);
        };
        let mutation = match record.compensation {
            Compensation::Restore {
                kind: EntityKind::Link,
                id,
            } => self.links.restore(id)?,
            Compensation::Restore {
                kind: EntityKind::Collection,
                id,
            } => self.collections.restore(id)?,
        };
        self.ledger.pop();
        info!(
            seq = record.seq,
            kind = %record.kind(),
            id = %record.affected,
            "undoing delete"
        );
        self.pending_restores
            .insert((record.kind(), mutation), record.clone());
        Ok(Some(record))
    }

    fn purge_evicted(&mut self, evicted: Vec<UndoRecord>) {
        if !evicted.is_empty() {
            self.prune_tombstones();
        }
    }

    /// Drops tombstones no undo record can bring back any more.
    fn prune_tombstones(&mut self) {
        let ledger = &self.ledger;
        self.links
            .prune_tombstones(|id| ledger.contains(EntityKind::Link, id));
        self.collections
            .prune_tombstones(|id| ledger.contains(EntityKind::Collection, id));
    }

    /// Every repository call that may run now. Collections go first so a
    /// parent confirmation is never queued behind its children.
    pub fn take_jobs(&mut self) -> Vec<Job> {
        let collections = self.collections.take_dispatches();
        let links = self.links.take_dispatches();

        let mut evicted = note_deferred(&mut self.deferred_deletes, &mut self.ledger, &collections);
        evicted.extend(note_deferred(
            &mut self.deferred_deletes,
            &mut self.ledger,
            &links,
        ));
        self.purge_evicted(evicted);

        collections
            .into_iter()
            .map(Job::Collection)
            .chain(links.into_iter().map(Job::Link))
            .collect()
    }

    pub async fn run(&self, job: Job) -> Completion {
        match job {
            Job::Link(d) => Completion::Link(d.mutation, execute(&self.link_repo, d.call).await),
            Job::Collection(d) => {
                Completion::Collection(d.mutation, execute(&self.collection_repo, d.call).await)
            }
        }
    }

    pub fn complete(&mut self, completion: Completion) -> Reconciled {
        let reconciled = match completion {
            Completion::Link(mutation, outcome) => self.links.reconcile(mutation, outcome),
            Completion::Collection(mutation, outcome) => {
                self.collections.reconcile(mutation, outcome)
            }
        };

        if let Reconciled::RolledBack(failure) = &reconciled {
            match failure.operation {
                OperationKind::Delete => {
                    let resolved = match failure.kind {
                        EntityKind::Link => self.links.resolve(failure.key),
                        EntityKind::Collection => self.collections.resolve(failure.key),
                    };
                    if let Some(id) = resolved.durable() {
                        self.ledger.discard(failure.kind, id);
                    }
                }
                OperationKind::Restore => {
                    if let Some(record) = self
                        .pending_restores
                        .remove(&(failure.kind, failure.mutation))
                    {
                        warn!(seq = record.seq, id = %record.affected, "undo failed, record kept");
                        self.ledger.reinstate(record);
                    }
                }
                _ => {}
            }
        }

        self.forget_settled();
        self.prune_tombstones();
        reconciled
    }

    /// Drops bookkeeping for mutations the stores no longer hold, e.g. a
    /// delete that vanished with its failed add.
    fn forget_settled(&mut self) {
        let links: HashSet<MutationId> = self.links.pending().iter().map(|p| p.id).collect();
        let collections: HashSet<MutationId> =
            self.collections.pending().iter().map(|p| p.id).collect();
        let live = |kind: EntityKind, mutation: &MutationId| match kind {
            EntityKind::Link => links.contains(mutation),
            EntityKind::Collection => collections.contains(mutation),
        };
        self.deferred_deletes
            .retain(|(kind, mutation)| live(*kind, mutation));
        self.pending_restores
            .retain(|(kind, mutation), _| live(*kind, mutation));
    }

    /// Drives queued calls until nothing is left to run.
    pub async fn settle(&mut self) -> Vec<Reconciled> {
        let mut results = Vec::new();
        loop {
            let jobs = self.take_jobs();
            if jobs.is_empty() {
                break;
            }
            for job in jobs {
                let done = self.run(job).await;
                results.push(self.complete(done));
            }
        }
        results
    }

    /// Reloads both confirmed snapshots from the repositories.
    pub async fn refresh(&mut self) -> Result<(), RepoError> {
        let collections = self.collection_repo.list().await?;
        let links = self.link_repo.list().await?;
        self.hydrate(collections, links);
        Ok(())
    }

    /// Drains rollback records from both stores, collections first.
    pub fn take_failures(&mut self) -> Vec<Failure> {
        let mut failures = self.collections.take_failures();
        failures.extend(self.links.take_failures());
        failures
    }

    /// Replaces both confirmed snapshots, e.g. from a cached listing.
    pub fn hydrate(&mut self, collections: Vec<Collection>, links: Vec<Link>) {
        self.collections.hydrate(collections);
        self.links.hydrate(links);
        self.prune_tombstones();
    }
}

fn delete_in<B: Body>(
    store: &mut Store<B>,
    ledger: &mut UndoLedger,
    deferred: &mut HashSet<(EntityKind, MutationId)>,
    key: EntityKey,
) -> Result<Vec<UndoRecord>, EngineError> {
    let mutation = store.delete(key)?;
    match store.resolve(key) {
        EntityKey::Durable(id) => Ok(ledger.push_delete(B::KIND, id).into_iter().collect()),
        EntityKey::Tentative(_) => {
            deferred.insert((B::KIND, mutation));
            Ok(Vec::new())
        }
    }
}

fn note_deferred<B: Body>(
    deferred: &mut HashSet<(EntityKind, MutationId)>,
    ledger: &mut UndoLedger,
    dispatches: &[Dispatch<B>],
) -> Vec<UndoRecord> {
    dispatches
        .iter()
        .filter_map(|d| match d.call {
            Call::Remove(id) if deferred.remove(&(B::KIND, d.mutation)) => {
                ledger.push_delete(B::KIND, id)
            }
            _ => None,
        })
        .collect()
}
