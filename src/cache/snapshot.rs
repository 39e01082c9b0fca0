use crate::models::{Body, Entity, EntityKind};
use crate::storage::{load_json_from_storage, remove_from_storage, save_json_to_storage};
use crate::util::now_ms;
use serde::{Deserialize, Serialize};

fn key(namespace: &str, kind: EntityKind) -> String {
    format!("linkshelf_snapshot::{namespace}::{kind}")
}

/// Last confirmed listing of one entity kind, used to paint before the
/// repository answers.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ShelfSnapshot<B> {
    pub saved_ms: i64,
    pub entities: Vec<Entity<B>>,
}

/// Stores the confirmed rows; tombstones are left out.
pub fn save_snapshot<B: Body>(namespace: &str, entities: &[Entity<B>]) {
    if namespace.trim().is_empty() {
        return;
    }

    let snap = ShelfSnapshot {
        saved_ms: now_ms(),
        entities: entities.iter().filter(|e| !e.deleted).cloned().collect(),
    };
    save_json_to_storage(&key(namespace, B::KIND), &snap);
}

pub fn load_snapshot<B: Body>(namespace: &str) -> Option<ShelfSnapshot<B>> {
    if namespace.trim().is_empty() {
        return None;
    }
    load_json_from_storage::<ShelfSnapshot<B>>(&key(namespace, B::KIND))
}

pub fn clear_snapshot<B: Body>(namespace: &str) {
    remove_from_storage(&key(namespace, B::KIND));
}
