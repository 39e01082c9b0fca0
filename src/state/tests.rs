use super::*;
use crate::models::{CollectionBody, LinkBody, LinkPatch};
use crate::repo::RepoErrorKind;

fn link(id: i64, parent: Option<i64>, order: f64) -> Entity<LinkBody> {
    let now = Utc::now();
    Entity {
        id: DurableId(id),
        parent_id: parent.map(DurableId),
        order,
        deleted: false,
        created_at: now,
        updated_at: now,
        body: LinkBody::new(format!("https://{id}.example"), format!("link {id}")),
    }
}

fn store_with(rows: Vec<Entity<LinkBody>>) -> Store<LinkBody> {
    let mut store = Store::new();
    store.hydrate(rows);
    store
}

fn ids(store: &Store<LinkBody>) -> Vec<Option<i64>> {
    store
        .presented()
        .iter()
        .map(|p| p.durable_id().map(|id| id.0))
        .collect()
}

fn title(store: &Store<LinkBody>, id: i64) -> String {
    store
        .get(DurableId(id).into())
        .map(|p| p.body().title.clone())
        .unwrap_or_default()
}

fn retitle(title: &str) -> LinkPatch {
    LinkPatch {
        title: Some(title.to_string()),
        ..Default::default()
    }
}

/// Confirms an add the way a repository would, with the given id.
fn created(dispatch: &Dispatch<LinkBody>, id: i64) -> Outcome<LinkBody> {
    let Call::Add(new) = &dispatch.call else {
        panic!("expected an add, got {:?}", dispatch.call);
    };
    let now = Utc::now();
    Ok(Confirmation::Created(Entity {
        id: DurableId(id),
        parent_id: new.parent_id,
        order: new.order.unwrap_or(order::BUFFER),
        deleted: false,
        created_at: now,
        updated_at: now,
        body: new.body.clone(),
    }))
}

#[test]
fn test_add_is_abstract_until_confirmed() {
    let mut store = Store::new();
    let (mutation, token) = store
        .add(None, LinkBody::new("https://example.com", "Example"))
        .unwrap();

    assert_eq!(store.presented().len(), 1);
    assert!(!store.presented()[0].is_concrete());
    assert_eq!(store.presented()[0].key(), EntityKey::Tentative(token));
    assert_eq!(store.presented()[0].order(), 100.0);

    let dispatches = store.take_dispatches();
    assert_eq!(dispatches.len(), 1);
    assert_eq!(dispatches[0].mutation, mutation);

    let outcome = created(&dispatches[0], 42);
    let reconciled = store.reconcile(mutation, outcome);
    assert_eq!(
        reconciled,
        Reconciled::Applied {
            mutation,
            operation: OperationKind::Add,
            id: DurableId(42),
        }
    );

    // Exactly one entry: the Abstract one is replaced, not duplicated.
    assert_eq!(ids(&store), vec![Some(42)]);
    assert_eq!(store.resolve(token.into()), EntityKey::Durable(DurableId(42)));
    assert!(store.get(token.into()).is_some_and(|p| p.is_concrete()));
    assert!(store.is_settled());
}

#[test]
fn test_reconciling_twice_is_stale() {
    let mut store = Store::new();
    let (mutation, _) = store
        .add(None, LinkBody::new("https://example.com", ""))
        .unwrap();
    let dispatch = store.take_dispatches().remove(0);

    store.reconcile(mutation, created(&dispatch, 42));
    let before = store.presented().to_vec();

    assert_eq!(
        store.reconcile(mutation, created(&dispatch, 43)),
        Reconciled::Stale(mutation)
    );
    assert_eq!(store.presented(), before.as_slice());
}

#[test]
fn test_failed_add_removes_abstract_entry() {
    let mut store = Store::new();
    let (mutation, token) = store
        .add(None, LinkBody::new("https://example.com", ""))
        .unwrap();
    store.take_dispatches();

    let reconciled = store.reconcile(mutation, Err(RepoError::network("offline")));
    let Reconciled::RolledBack(failure) = reconciled else {
        panic!("expected rollback");
    };
    assert_eq!(failure.operation, OperationKind::Add);
    assert_eq!(failure.key, EntityKey::Tentative(token));
    assert_eq!(failure.error.kind, RepoErrorKind::Network);

    assert!(store.presented().is_empty());
    assert_eq!(store.failures().len(), 1);
    assert_eq!(store.take_failures().len(), 1);
    assert!(store.failures().is_empty());
}

#[test]
fn test_add_appends_after_siblings() {
    let mut store = store_with(vec![link(1, None, 100.0), link(2, None, 250.0)]);
    store
        .add(None, LinkBody::new("https://example.com", ""))
        .unwrap();
    assert_eq!(store.presented()[2].order(), 350.0);
}

#[test]
fn test_invalid_add_leaves_state_untouched() {
    let mut store = Store::new();
    let err = store.add(None, LinkBody::new("nope", "")).unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert!(store.presented().is_empty());
    assert!(store.is_settled());
}

#[test]
fn test_newer_edit_survives_older_confirmation() {
    let mut store = store_with(vec![link(7, None, 100.0)]);

    let first = store.patch(DurableId(7).into(), retitle("B")).unwrap();
    assert_eq!(store.take_dispatches().len(), 1);
    let second = store.patch(DurableId(7).into(), retitle("C")).unwrap();
    assert_eq!(title(&store, 7), "C");

    // One call in flight per entity.
    assert!(store.take_dispatches().is_empty());

    store.reconcile(first, Ok(Confirmation::Applied));
    assert_eq!(title(&store, 7), "C");
    assert_eq!(store.confirmed()[0].body.title, "B");

    let next = store.take_dispatches();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].mutation, second);
    assert_eq!(next[0].call, Call::Update(DurableId(7), retitle("C")));
}

#[test]
fn test_failed_edit_restores_confirmed_value() {
    let mut store = store_with(vec![link(7, None, 100.0)]);
    let mutation = store.patch(DurableId(7).into(), retitle("B")).unwrap();
    store.take_dispatches();

    store.reconcile(mutation, Err(RepoError::reference("gone")));
    assert_eq!(title(&store, 7), "link 7");
}

#[test]
fn test_edit_of_abstract_entity_waits_for_its_add() {
    let mut store = Store::new();
    let (add, token) = store
        .add(None, LinkBody::new("https://example.com", "Draft"))
        .unwrap();
    store.patch(token.into(), retitle("Renamed")).unwrap();

    assert_eq!(store.presented()[0].body().title, "Renamed");

    let first = store.take_dispatches();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].mutation, add);

    store.reconcile(add, created(&first[0], 42));
    assert_eq!(title(&store, 42), "Renamed");

    let second = store.take_dispatches();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].call, Call::Update(DurableId(42), retitle("Renamed")));
}

#[test]
fn test_failed_add_drops_updates_queued_behind_it() {
    let mut store = Store::new();
    let (add, token) = store
        .add(None, LinkBody::new("https://example.com", ""))
        .unwrap();
    store.patch(token.into(), retitle("Renamed")).unwrap();
    store.delete(token.into()).unwrap();
    store.take_dispatches();

    store.reconcile(add, Err(RepoError::network("offline")));
    assert!(store.is_settled());
    assert!(store.presented().is_empty());
    assert!(store.take_dispatches().is_empty());
}

#[test]
fn test_delete_hides_then_rollback_shows_again() {
    let mut store = store_with(vec![link(1, None, 100.0), link(2, None, 200.0)]);
    let mutation = store.delete(DurableId(1).into()).unwrap();
    assert_eq!(ids(&store), vec![Some(2)]);

    store.take_dispatches();
    store.reconcile(mutation, Err(RepoError::network("offline")));
    assert_eq!(ids(&store), vec![Some(1), Some(2)]);
}

#[test]
fn test_delete_of_unknown_entity_is_not_found() {
    let mut store = store_with(vec![link(1, None, 100.0)]);
    let err = store.delete(DurableId(9).into()).unwrap_err();
    assert_eq!(
        err,
        EngineError::NotFound {
            kind: EntityKind::Link,
            key: DurableId(9).into(),
        }
    );
}

#[test]
fn test_reorder_moves_item_to_destination() {
    let mut store = store_with(vec![
        link(1, None, 100.0),
        link(2, None, 200.0),
        link(3, None, 300.0),
    ]);

    let mutation = store.reorder(DurableId(3).into(), 2, 0).unwrap();
    assert!(mutation.is_some());
    assert_eq!(ids(&store), vec![Some(3), Some(1), Some(2)]);
    assert_eq!(store.presented()[0].order(), 50.0);

    let dispatched = store.take_dispatches();
    assert_eq!(dispatched[0].call, Call::Reorder(DurableId(3), 50.0));
}

#[test]
fn test_reorder_to_same_index_is_noop() {
    let mut store = store_with(vec![link(1, None, 100.0), link(2, None, 200.0)]);
    assert_eq!(store.reorder(DurableId(1).into(), 0, 0), Ok(None));
    assert!(store.is_settled());
}

#[test]
fn test_reorder_with_stale_index_is_refused() {
    let mut store = store_with(vec![link(1, None, 100.0), link(2, None, 200.0)]);
    let err = store.reorder(DurableId(1).into(), 1, 0).unwrap_err();
    assert!(matches!(err, EngineError::StaleIndex { .. }));
}

#[test]
fn test_reorder_blocked_by_abstract_sibling() {
    let mut store = store_with(vec![link(1, None, 100.0), link(2, None, 200.0)]);
    store
        .add(None, LinkBody::new("https://example.com", ""))
        .unwrap();

    assert_eq!(
        store.reorder(DurableId(1).into(), 0, 1),
        Err(EngineError::ReorderBlocked)
    );
}

#[test]
fn test_reorder_exhausted_keys_require_renumber() {
    let a: f64 = 1.0;
    let b = f64::from_bits(a.to_bits() + 1);
    let mut store = store_with(vec![
        link(1, None, a),
        link(2, None, b),
        link(3, None, 300.0),
    ]);

    let err = store.reorder(DurableId(3).into(), 2, 1).unwrap_err();
    assert!(err.renumber_required());

    // Link 3 already sits at 300.
    let mutations = store.renumber(None).unwrap();
    assert_eq!(mutations.len(), 2);
    let orders: Vec<f64> = store.presented().iter().map(|p| p.order()).collect();
    assert_eq!(orders, vec![100.0, 200.0, 300.0]);

    assert!(store.reorder(DurableId(3).into(), 2, 1).unwrap().is_some());
    assert_eq!(ids(&store), vec![Some(1), Some(3), Some(2)]);
}

#[test]
fn test_renumber_skips_keys_already_in_place() {
    let mut store = store_with(vec![link(1, None, 100.0), link(2, None, 150.0)]);
    let mutations = store.renumber(None).unwrap();
    assert_eq!(mutations.len(), 1);
    assert_eq!(
        store.take_dispatches()[0].call,
        Call::Reorder(DurableId(2), 200.0)
    );
}

#[test]
fn test_relocate_appends_under_new_parent() {
    let mut store = store_with(vec![
        link(1, None, 100.0),
        link(2, Some(5), 100.0),
        link(3, Some(5), 400.0),
    ]);

    let mutation = store.relocate(DurableId(1).into(), Some(DurableId(5))).unwrap();
    assert!(mutation.is_some());

    let moved = store.get(DurableId(1).into()).unwrap();
    assert_eq!(moved.parent_id(), Some(DurableId(5)));
    assert_eq!(moved.order(), 500.0);
    assert_eq!(store.siblings(None).len(), 0);

    assert_eq!(
        store.take_dispatches()[0].call,
        Call::Move(DurableId(1), Some(DurableId(5)))
    );
}

#[test]
fn test_relocate_to_current_parent_is_noop() {
    let mut store = store_with(vec![link(1, Some(5), 100.0)]);
    assert_eq!(store.relocate(DurableId(1).into(), Some(DurableId(5))), Ok(None));
}

#[test]
fn test_relocate_of_abstract_entity_is_refused() {
    let mut store = Store::new();
    let (_, token) = store
        .add(None, LinkBody::new("https://example.com", ""))
        .unwrap();
    assert_eq!(
        store.relocate(token.into(), Some(DurableId(5))),
        Err(EngineError::Unconfirmed(token))
    );
}

#[test]
fn test_hydrate_keeps_local_tombstones() {
    let mut store = store_with(vec![link(1, None, 100.0), link(2, None, 200.0)]);
    let mutation = store.delete(DurableId(1).into()).unwrap();
    store.take_dispatches();
    store.reconcile(mutation, Ok(Confirmation::Applied));
    assert!(store.confirmed().iter().any(|e| e.id == DurableId(1) && e.deleted));

    // The listing no longer carries the deleted row.
    store.hydrate(vec![link(2, None, 200.0)]);
    assert_eq!(ids(&store), vec![Some(2)]);

    store.restore(DurableId(1)).unwrap();
    assert_eq!(ids(&store), vec![Some(1), Some(2)]);
}

#[test]
fn test_prune_drops_unkept_tombstones_once_settled() {
    let mut store = store_with(vec![link(1, None, 100.0), link(2, None, 200.0)]);
    let first = store.delete(DurableId(1).into()).unwrap();
    let second = store.delete(DurableId(2).into()).unwrap();

    // Still pending: kept regardless of the predicate.
    assert_eq!(store.prune_tombstones(|_| false), 0);

    store.take_dispatches();
    store.reconcile(first, Ok(Confirmation::Applied));
    store.reconcile(second, Ok(Confirmation::Applied));
    assert_eq!(store.prune_tombstones(|id| id == DurableId(2)), 1);
    assert_eq!(store.confirmed().len(), 1);
    assert!(matches!(
        store.restore(DurableId(1)),
        Err(EngineError::NotFound { .. })
    ));
    store.restore(DurableId(2)).unwrap();
    assert_eq!(ids(&store), vec![Some(2)]);
}

#[test]
fn test_hydrate_keeps_row_with_pending_delete_as_tombstone() {
    let mut store = store_with(vec![link(1, None, 100.0), link(2, None, 200.0)]);
    let mutation = store.delete(DurableId(1).into()).unwrap();
    store.take_dispatches();

    // The repository applied the delete before our confirmation arrived.
    store.hydrate(vec![link(2, None, 200.0)]);
    assert!(store.confirmed().iter().any(|e| e.id == DurableId(1) && e.deleted));

    store.reconcile(mutation, Ok(Confirmation::Applied));
    store.restore(DurableId(1)).unwrap();
    assert_eq!(ids(&store), vec![Some(1), Some(2)]);
}

#[test]
fn test_hydrate_drops_missing_row_without_pending_delete() {
    let mut store = store_with(vec![link(1, None, 100.0), link(2, None, 200.0)]);
    store.hydrate(vec![link(2, None, 200.0)]);
    assert_eq!(store.confirmed().len(), 1);
    assert_eq!(ids(&store), vec![Some(2)]);
}

#[test]
fn test_add_stores_normalized_body() {
    let mut store: Store<CollectionBody> = Store::new();
    let (mutation, _) = store.add(None, CollectionBody::new("  Inbox  ")).unwrap();
    assert_eq!(store.presented()[0].body().name, "Inbox");

    let dispatches = store.take_dispatches();
    let [Dispatch {
        call: Call::Add(new),
        ..
    }] = dispatches.as_slice()
    else {
        panic!("expected one add, got {dispatches:?}");
    };
    assert_eq!(new.body.name, "Inbox");
    assert_eq!(dispatches[0].mutation, mutation);
}

#[test]
fn test_fold_is_pure() {
    let confirmed = vec![link(1, None, 100.0), link(2, None, 200.0)];
    let mut store = store_with(confirmed.clone());
    store.delete(DurableId(2).into()).unwrap();
    store.patch(DurableId(1).into(), retitle("X")).unwrap();

    let once = fold(&confirmed, store.pending(), &HashMap::new());
    let twice = fold(&confirmed, store.pending(), &HashMap::new());
    assert_eq!(once, twice);
    assert_eq!(once, store.presented());
    assert_eq!(once.len(), 1);
}

#[test]
fn test_collections_sort_by_parent_then_order() {
    let now = Utc::now();
    let row = |id: i64, parent: Option<i64>, order: f64| Entity {
        id: DurableId(id),
        parent_id: parent.map(DurableId),
        order,
        deleted: false,
        created_at: now,
        updated_at: now,
        body: CollectionBody::new(format!("c{id}")),
    };
    let mut store = Store::new();
    store.hydrate(vec![row(3, Some(1), 100.0), row(2, None, 200.0), row(1, None, 100.0)]);

    let ids: Vec<i64> = store
        .presented()
        .iter()
        .filter_map(|p| p.durable_id())
        .map(|id| id.0)
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);
}
