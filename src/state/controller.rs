use crate::cache::{load_snapshot, save_snapshot};
use crate::config::ShelfConfig;
use crate::error::EngineError;
use crate::models::{CollectionBody, EntityKey, LinkBody, LinkPatch, Presented, TentativeToken};
use crate::repo::{execute, Repository};
use crate::session::{Completion, Job, Session};
use crate::state::Reconciled;
use crate::undo::UndoRecord;
use leptos::prelude::*;
use leptos::task::spawn_local;
use tracing::{info, warn};

/// Reactive front of a [`Session`].
///
/// Responsibilities:
/// - render every intent synchronously into the `links` / `collections` signals
/// - run the released repository calls in the background and fold the
///   outcomes back in
/// - keep the cached snapshot current so the next visit paints immediately
///
/// The session itself is not `Send` (memory repositories share `Rc`s), so it
/// lives in local storage and is only touched from the UI thread.
#[derive(Clone)]
pub struct ShelfController<L, C> {
    session: StoredValue<Session<L, C>, LocalStorage>,
    namespace: StoredValue<String>,

    pub links: RwSignal<Vec<Presented<LinkBody>>>,
    pub collections: RwSignal<Vec<Presented<CollectionBody>>>,

    /// Latest rejected intent or rolled-back update.
    pub last_error: RwSignal<Option<String>>,
    pub undo_depth: RwSignal<usize>,
    /// Repository calls currently running.
    pub in_flight: RwSignal<usize>,
}

impl<L, C> ShelfController<L, C>
where
    L: Repository<LinkBody> + Clone + 'static,
    C: Repository<CollectionBody> + Clone + 'static,
{
    pub fn new(session: Session<L, C>, config: &ShelfConfig) -> Self {
        let controller = Self {
            session: StoredValue::new_local(session),
            namespace: StoredValue::new(config.snapshot_namespace.clone()),
            links: RwSignal::new(Vec::new()),
            collections: RwSignal::new(Vec::new()),
            last_error: RwSignal::new(None),
            undo_depth: RwSignal::new(0),
            in_flight: RwSignal::new(0),
        };
        controller.seed_from_cache();
        controller.publish();
        controller
    }

    fn seed_from_cache(&self) {
        let namespace = self.namespace.get_value();
        let collections = load_snapshot::<CollectionBody>(&namespace);
        let links = load_snapshot::<LinkBody>(&namespace);
        if collections.is_none() && links.is_none() {
            return;
        }

        self.session.update_value(|s| {
            s.hydrate(
                collections.map(|c| c.entities).unwrap_or_default(),
                links.map(|l| l.entities).unwrap_or_default(),
            )
        });
    }

    /// Fetches both listings. Whatever the cache painted stays on screen
    /// until they arrive.
    pub fn load(&self) {
        let Some((link_repo, collection_repo)) = self
            .session
            .try_with_value(|s| (s.link_repo().clone(), s.collection_repo().clone()))
        else {
            return;
        };

        let this = self.clone();
        self.in_flight.update(|n| *n += 1);
        spawn_local(async move {
            let listed = match collection_repo.list().await {
                Ok(collections) => link_repo.list().await.map(|links| (collections, links)),
                Err(e) => Err(e),
            };
            this.in_flight.update(|n| *n = n.saturating_sub(1));

            match listed {
                Ok((collections, links)) => {
                    info!(
                        collections = collections.len(),
                        links = links.len(),
                        "loaded shelf"
                    );
                    this.session.update_value(|s| s.hydrate(collections, links));
                    this.persist();
                    this.last_error.set(None);
                    this.publish();
                }
                Err(e) => {
                    warn!(error = %e, "loading shelf failed");
                    this.last_error.set(Some(e.to_string()));
                }
            }
        });
    }

    pub fn dismiss_error(&self) {
        self.last_error.set(None);
    }

    pub fn request_add_link(
        &self,
        parent: Option<EntityKey>,
        body: LinkBody,
    ) -> Result<TentativeToken, EngineError> {
        self.intent(|s| s.request_add_link(parent, body))
    }

    pub fn request_add_collection(
        &self,
        parent: Option<EntityKey>,
        body: CollectionBody,
    ) -> Result<TentativeToken, EngineError> {
        self.intent(|s| s.request_add_collection(parent, body))
    }

    pub fn request_delete_link(&self, key: EntityKey) -> Result<(), EngineError> {
        self.intent(|s| s.request_delete_link(key))
    }

    pub fn request_delete_collection(&self, key: EntityKey) -> Result<(), EngineError> {
        self.intent(|s| s.request_delete_collection(key))
    }

    pub fn request_rename(&self, key: EntityKey, name: String) -> Result<(), EngineError> {
        self.intent(|s| s.request_rename(key, name))
    }

    pub fn request_edit(&self, key: EntityKey, patch: LinkPatch) -> Result<(), EngineError> {
        self.intent(|s| s.request_edit(key, patch))
    }

    pub fn request_move_link(
        &self,
        key: EntityKey,
        parent: Option<EntityKey>,
    ) -> Result<(), EngineError> {
        self.intent(|s| s.request_move_link(key, parent))
    }

    pub fn request_move_collection(
        &self,
        key: EntityKey,
        parent: Option<EntityKey>,
    ) -> Result<(), EngineError> {
        self.intent(|s| s.request_move_collection(key, parent))
    }

    pub fn request_reorder_link(
        &self,
        key: EntityKey,
        source: usize,
        destination: usize,
    ) -> Result<(), EngineError> {
        self.intent(|s| s.request_reorder_link(key, source, destination))
    }

    pub fn request_reorder_collection(
        &self,
        key: EntityKey,
        source: usize,
        destination: usize,
    ) -> Result<(), EngineError> {
        self.intent(|s| s.request_reorder_collection(key, source, destination))
    }

    pub fn request_renumber_links(&self, parent: Option<EntityKey>) -> Result<(), EngineError> {
        self.intent(|s| s.request_renumber_links(parent))
    }

    pub fn request_renumber_collections(
        &self,
        parent: Option<EntityKey>,
    ) -> Result<(), EngineError> {
        self.intent(|s| s.request_renumber_collections(parent))
    }

    pub fn request_undo(&self) -> Result<Option<UndoRecord>, EngineError> {
        self.intent(|s| s.request_undo())
    }

    fn intent<T>(
        &self,
        apply: impl FnOnce(&mut Session<L, C>) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let result = self
            .session
            .try_update_value(apply)
            .unwrap_or(Err(EngineError::Disposed));

        match &result {
            Ok(_) => self.pump(),
            Err(e) => {
                info!(error = %e, "intent rejected");
                self.last_error.set(Some(e.to_string()));
            }
        }
        self.publish();
        result
    }

    /// Starts every repository call the session has released.
    fn pump(&self) {
        let Some(jobs) = self.session.try_update_value(|s| s.take_jobs()) else {
            return;
        };
        for job in jobs {
            self.spawn_job(job);
        }
    }

    fn spawn_job(&self, job: Job) {
        let this = self.clone();
        match job {
            Job::Link(dispatch) => {
                let Some(repo) = self.session.try_with_value(|s| s.link_repo().clone()) else {
                    return;
                };
                self.in_flight.update(|n| *n += 1);
                spawn_local(async move {
                    let outcome = execute(&repo, dispatch.call).await;
                    this.finish(Completion::Link(dispatch.mutation, outcome));
                });
            }
            Job::Collection(dispatch) => {
                let Some(repo) = self
                    .session
                    .try_with_value(|s| s.collection_repo().clone())
                else {
                    return;
                };
                self.in_flight.update(|n| *n += 1);
                spawn_local(async move {
                    let outcome = execute(&repo, dispatch.call).await;
                    this.finish(Completion::Collection(dispatch.mutation, outcome));
                });
            }
        }
    }

    fn finish(&self, completion: Completion) {
        self.in_flight.update(|n| *n = n.saturating_sub(1));

        let Some((reconciled, failures)) = self
            .session
            .try_update_value(|s| (s.complete(completion), s.take_failures()))
        else {
            return;
        };

        if let Some(failure) = failures.last() {
            self.last_error.set(Some(failure.to_string()));
        }
        if matches!(reconciled, Reconciled::Applied { .. }) {
            self.persist();
        }

        self.publish();
        // Completing an add may release updates that were waiting on it.
        self.pump();
    }

    fn persist(&self) {
        let namespace = self.namespace.get_value();
        self.session.try_with_value(|s| {
            save_snapshot(&namespace, s.collections().confirmed());
            save_snapshot(&namespace, s.links().confirmed());
        });
    }

    fn publish(&self) {
        let Some((links, collections, depth)) = self.session.try_with_value(|s| {
            (
                s.links().presented().to_vec(),
                s.collections().presented().to_vec(),
                s.ledger().len(),
            )
        }) else {
            return;
        };
        self.links.set(links);
        self.collections.set(collections);
        self.undo_depth.set(depth);
    }
}
