use crate::error::EngineError;
use crate::models::{EntityKey, Presented};
use crate::order::{self, OrderError};

/// Turns a "move `item` from `source` to `destination`" gesture into the new
/// order key for `item`.
///
/// `siblings` is the item's whole sibling group as presented, ascending.
/// Returns `Ok(None)` when the indexes are equal. Any Abstract sibling blocks
/// the reorder: the group's keys are not stable until every add is confirmed.
pub fn plan<B>(
    item: EntityKey,
    source: usize,
    destination: usize,
    siblings: &[&Presented<B>],
) -> Result<Option<f64>, EngineError> {
    if source == destination {
        return Ok(None);
    }
    if siblings.iter().any(|s| !s.is_concrete()) {
        return Err(EngineError::ReorderBlocked);
    }

    let len = siblings.len();
    let Some(at_source) = siblings.get(source) else {
        return Err(OrderError::OutOfRange { index: source, len }.into());
    };
    if at_source.key() != item {
        return Err(EngineError::StaleIndex { key: item, index: source });
    }

    let keys: Vec<f64> = siblings.iter().map(|s| s.order()).collect();
    Ok(Some(order::move_key(&keys, source, destination)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Draft, DurableId, Entity, LinkBody, TentativeToken};
    use chrono::Utc;

    fn concrete(id: i64, order: f64) -> Presented<LinkBody> {
        let now = Utc::now();
        Presented::Concrete(Entity {
            id: DurableId(id),
            parent_id: None,
            order,
            deleted: false,
            created_at: now,
            updated_at: now,
            body: LinkBody::new(format!("https://{id}.example"), ""),
        })
    }

    fn key(id: i64) -> EntityKey {
        DurableId(id).into()
    }

    #[test]
    fn test_plan_matches_allocator_scenarios() {
        let group = [concrete(1, 100.0), concrete(2, 200.0), concrete(3, 300.0)];
        let refs: Vec<_> = group.iter().collect();

        assert_eq!(plan(key(1), 0, 2, &refs).unwrap(), Some(400.0));
        assert_eq!(plan(key(3), 2, 0, &refs).unwrap(), Some(50.0));
        assert_eq!(plan(key(3), 2, 1, &refs).unwrap(), Some(150.0));
    }

    #[test]
    fn test_same_index_is_noop() {
        let group = [concrete(1, 100.0)];
        let refs: Vec<_> = group.iter().collect();
        assert_eq!(plan(key(1), 0, 0, &refs).unwrap(), None);
    }

    #[test]
    fn test_abstract_sibling_blocks() {
        let draft = Presented::Abstract(Draft {
            token: TentativeToken::new(1, 1),
            parent_id: None,
            order: 300.0,
            body: LinkBody::new("https://new.example", ""),
            created_at: Utc::now(),
        });
        let group = [concrete(1, 100.0), concrete(2, 200.0), draft];
        let refs: Vec<_> = group.iter().collect();

        assert_eq!(plan(key(1), 0, 1, &refs), Err(EngineError::ReorderBlocked));
    }

    #[test]
    fn test_source_index_must_point_at_item() {
        let group = [concrete(1, 100.0), concrete(2, 200.0)];
        let refs: Vec<_> = group.iter().collect();

        assert_eq!(
            plan(key(2), 0, 1, &refs),
            Err(EngineError::StaleIndex {
                key: key(2),
                index: 0
            })
        );
        assert!(matches!(
            plan(key(2), 5, 1, &refs),
            Err(EngineError::Order(OrderError::OutOfRange { index: 5, len: 2 }))
        ));
    }

    #[test]
    fn test_exhausted_gap_surfaces_renumber() {
        let group = [concrete(1, 100.0), concrete(2, 100.0), concrete(3, 300.0)];
        let refs: Vec<_> = group.iter().collect();

        let err = plan(key(3), 2, 1, &refs).unwrap_err();
        assert!(err.renumber_required());
    }
}
