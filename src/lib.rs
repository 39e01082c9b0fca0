//! Optimistic client state for a bookmark shelf: links grouped into nested
//! collections, ordered by fractional keys.
//!
//! Intents render immediately through a [`state::Store`]; repository calls
//! are released per entity in submission order and their outcomes folded
//! back in, rolling back on failure. Deletes can be undone from a bounded
//! [`undo::UndoLedger`]. A [`session::Session`] ties both stores, the ledger
//! and the repositories together; [`state::ShelfController`] exposes it to
//! Leptos views.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod order;
pub mod reorder;
pub mod repo;
pub mod session;
pub mod state;
pub(crate) mod storage;
pub mod undo;
pub(crate) mod util;

pub use api::{ApiClient, HttpRepository};
pub use config::ShelfConfig;
pub use error::EngineError;
pub use models::{
    Collection, CollectionBody, DurableId, Entity, EntityKey, EntityKind, Link, LinkBody,
    LinkPatch, Presented, Rename, TentativeToken,
};
pub use repo::{MemoryBackend, MemoryRepository, RepoError, RepoErrorKind, Repository};
pub use session::Session;
pub use state::{ShelfController, Store};
pub use undo::{UndoLedger, UndoRecord};

/// Session over the HTTP API described by `config`, reusing a saved token.
pub fn http_session(
    config: &ShelfConfig,
) -> Session<HttpRepository<LinkBody>, HttpRepository<CollectionBody>> {
    let client = ApiClient::load_from_storage(config);
    Session::with_config(
        config,
        HttpRepository::new(client.clone()),
        HttpRepository::new(client),
    )
}
