//! Boundary to durable storage.
//!
//! The store never talks to storage directly: it queues [`Call`]s, the host
//! runs them through [`execute`] against some [`Repository`], and the
//! resulting [`Outcome`] is folded back in by reconciliation.

mod memory;

pub use memory::{MemoryBackend, MemoryRepository};

use crate::models::{Body, DurableId, Entity, NewEntity};

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RepoErrorKind {
    /// Target or parent is missing or deleted.
    Reference,
    Unauthorized,
    Network,
    Http,
    Parse,
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct RepoError {
    pub kind: RepoErrorKind,
    pub message: String,
}

impl RepoError {
    pub fn new(kind: RepoErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn reference(message: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::Reference, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::Network, message)
    }

    pub fn parse(message: impl std::fmt::Display) -> Self {
        Self::new(RepoErrorKind::Parse, message.to_string())
    }

    pub fn unauthorized() -> Self {
        Self::new(RepoErrorKind::Unauthorized, "Unauthorized")
    }

    /// Network and plain HTTP failures; the caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, RepoErrorKind::Network | RepoErrorKind::Http)
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Durable storage for one entity kind.
///
/// `list` returns non-deleted rows ordered by `(parent_id, order)`.
/// `update` is rename for collections and edit for links. `move_to` appends
/// the entity under its new parent. `undo_delete` is idempotent.
#[allow(async_fn_in_trait)]
pub trait Repository<B: Body> {
    async fn list(&self) -> RepoResult<Vec<Entity<B>>>;

    async fn add(&self, new: NewEntity<B>) -> RepoResult<Entity<B>>;

    async fn remove(&self, id: DurableId) -> RepoResult<()>;

    async fn update(&self, id: DurableId, patch: B::Patch) -> RepoResult<()>;

    async fn reorder(&self, id: DurableId, order: f64) -> RepoResult<()>;

    async fn move_to(&self, id: DurableId, parent_id: Option<DurableId>) -> RepoResult<()>;

    async fn undo_delete(&self, id: DurableId) -> RepoResult<()>;
}

/// One durable write, ready to run.
#[derive(Clone, Debug, PartialEq)]
pub enum Call<B: Body> {
    Add(NewEntity<B>),
    Remove(DurableId),
    Update(DurableId, B::Patch),
    Reorder(DurableId, f64),
    Move(DurableId, Option<DurableId>),
    Restore(DurableId),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Confirmation<B> {
    Created(Entity<B>),
    Applied,
}

pub type Outcome<B> = Result<Confirmation<B>, RepoError>;

pub async fn execute<B: Body, R: Repository<B>>(repo: &R, call: Call<B>) -> Outcome<B> {
    match call {
        Call::Add(new) => repo.add(new).await.map(Confirmation::Created),
        Call::Remove(id) => repo.remove(id).await.map(|_| Confirmation::Applied),
        Call::Update(id, patch) => repo.update(id, patch).await.map(|_| Confirmation::Applied),
        Call::Reorder(id, order) => repo.reorder(id, order).await.map(|_| Confirmation::Applied),
        Call::Move(id, parent_id) => repo
            .move_to(id, parent_id)
            .await
            .map(|_| Confirmation::Applied),
        Call::Restore(id) => repo.undo_delete(id).await.map(|_| Confirmation::Applied),
    }
}
