use super::{Pending, Update};
use crate::models::{Body, DurableId, Entity, EntityKey, Presented, TentativeToken};
use std::collections::HashMap;

struct Row<B> {
    item: Presented<B>,
    hidden: bool,
}

// A target missing from the snapshot (e.g. dropped by a refresh) is skipped.
fn find<B>(rows: &mut [Row<B>], key: EntityKey) -> Option<&mut Row<B>> {
    rows.iter_mut().find(|r| r.item.key() == key)
}

pub(crate) fn resolve(key: EntityKey, aliases: &HashMap<TentativeToken, DurableId>) -> EntityKey {
    match key {
        EntityKey::Tentative(token) => aliases
            .get(&token)
            .map_or(key, |id| EntityKey::Durable(*id)),
        EntityKey::Durable(_) => key,
    }
}

/// Presented list = confirmed snapshot with every pending update replayed on
/// top, in submission order. Tombstoned and locally deleted rows are dropped;
/// the rest is sorted by `(parent_id, order)`.
pub fn fold<B: Body>(
    confirmed: &[Entity<B>],
    pending: &[Pending<B>],
    aliases: &HashMap<TentativeToken, DurableId>,
) -> Vec<Presented<B>> {
    let mut rows: Vec<Row<B>> = confirmed
        .iter()
        .map(|e| Row {
            hidden: e.deleted,
            item: Presented::Concrete(e.clone()),
        })
        .collect();

    for p in pending {
        let target = resolve(p.update.key(), aliases);
        match &p.update {
            Update::Add(draft) => rows.push(Row {
                hidden: false,
                item: Presented::Abstract(draft.clone()),
            }),
            Update::Delete(_) => {
                if let Some(row) = find(&mut rows, target) {
                    row.hidden = true;
                }
            }
            Update::Restore(_) => {
                if let Some(row) = find(&mut rows, target) {
                    row.hidden = false;
                    if let Presented::Concrete(e) = &mut row.item {
                        e.deleted = false;
                    }
                }
            }
            Update::Patch(_, patch) => {
                if let Some(row) = find(&mut rows, target) {
                    row.item.body_mut().apply_patch(patch);
                }
            }
            Update::Reorder(_, order) => {
                if let Some(row) = find(&mut rows, target) {
                    let parent_id = row.item.parent_id();
                    row.item.set_position(parent_id, *order);
                }
            }
            Update::Move {
                parent_id, order, ..
            } => {
                if let Some(row) = find(&mut rows, target) {
                    row.item.set_position(*parent_id, *order);
                }
            }
        }
    }

    let mut out: Vec<Presented<B>> = rows
        .into_iter()
        .filter(|r| !r.hidden)
        .map(|r| r.item)
        .collect();
    out.sort_by(|a, b| {
        a.parent_id()
            .cmp(&b.parent_id())
            .then(a.order().total_cmp(&b.order()))
    });
    out
}
