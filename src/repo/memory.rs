use super::{RepoError, RepoErrorKind, RepoResult, Repository};
use crate::models::{Body, CollectionBody, DurableId, Entity, LinkBody, NewEntity};
use crate::order::append_key;
use chrono::Utc;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

type Shared<T> = Rc<RefCell<T>>;

#[derive(Debug)]
struct Table<B> {
    rows: Vec<Entity<B>>,
    next_id: i64,
}

impl<B> Table<B> {
    fn new(first_id: i64) -> Self {
        Self {
            rows: Vec::new(),
            next_id: first_id,
        }
    }

    fn live(&self, id: DurableId) -> Option<&Entity<B>> {
        self.rows.iter().find(|r| r.id == id && !r.deleted)
    }

    fn live_mut(&mut self, id: DurableId) -> Option<&mut Entity<B>> {
        self.rows.iter_mut().find(|r| r.id == id && !r.deleted)
    }

    fn sibling_keys(&self, parent_id: Option<DurableId>, except: Option<DurableId>) -> Vec<f64> {
        self.rows
            .iter()
            .filter(|r| !r.deleted && r.parent_id == parent_id && Some(r.id) != except)
            .map(|r| r.order)
            .collect()
    }

    fn next_id(&mut self) -> DurableId {
        let id = DurableId(self.next_id);
        self.next_id += 1;
        id
    }
}

/// In-process storage with the same contract as the HTTP repository.
///
/// Links are parented by collections, collections by other collections, so
/// both repositories check parents against the collection table.
#[derive(Clone)]
pub struct MemoryBackend {
    collections: Shared<Table<CollectionBody>>,
    links: Shared<Table<LinkBody>>,
    collection_faults: Shared<VecDeque<RepoError>>,
    link_faults: Shared<VecDeque<RepoError>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Both tables hand out ids starting at `first_id`.
    pub fn starting_at(first_id: i64) -> Self {
        Self {
            collections: Rc::new(RefCell::new(Table::new(first_id))),
            links: Rc::new(RefCell::new(Table::new(first_id))),
            collection_faults: Rc::default(),
            link_faults: Rc::default(),
        }
    }

    pub fn links(&self) -> MemoryRepository<LinkBody> {
        MemoryRepository {
            table: self.links.clone(),
            parents: self.collections.clone(),
            faults: self.link_faults.clone(),
        }
    }

    pub fn collections(&self) -> MemoryRepository<CollectionBody> {
        MemoryRepository {
            table: self.collections.clone(),
            parents: self.collections.clone(),
            faults: self.collection_faults.clone(),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct MemoryRepository<B> {
    table: Shared<Table<B>>,
    parents: Shared<Table<CollectionBody>>,
    faults: Shared<VecDeque<RepoError>>,
}

impl<B: Body> MemoryRepository<B> {
    /// The next call on this kind fails with `error` instead of running.
    pub fn fail_next(&self, error: RepoError) {
        self.faults.borrow_mut().push_back(error);
    }

    /// Inserts a row directly, appended under `parent_id`.
    pub fn seed(&self, parent_id: Option<DurableId>, body: B) -> Entity<B> {
        let mut table = self.table.borrow_mut();
        let order = append_key(table.sibling_keys(parent_id, None))
            .unwrap_or_else(|_| table.rows.len() as f64 + 1.0);
        let now = Utc::now();
        let entity = Entity {
            id: table.next_id(),
            parent_id,
            order,
            deleted: false,
            created_at: now,
            updated_at: now,
            body,
        };
        table.rows.push(entity.clone());
        entity
    }

    /// All rows, tombstones included.
    pub fn rows(&self) -> Vec<Entity<B>> {
        self.table.borrow().rows.clone()
    }

    pub fn get(&self, id: DurableId) -> Option<Entity<B>> {
        self.table.borrow().rows.iter().find(|r| r.id == id).cloned()
    }

    fn take_fault(&self) -> RepoResult<()> {
        match self.faults.borrow_mut().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn missing(id: DurableId) -> RepoError {
        RepoError::reference(format!("{} {id} does not exist", B::KIND))
    }

    fn check_parent(&self, parent_id: Option<DurableId>) -> RepoResult<()> {
        let Some(parent_id) = parent_id else {
            return Ok(());
        };
        if self.parents.borrow().live(parent_id).is_some() {
            Ok(())
        } else {
            Err(RepoError::reference(format!(
                "collection {parent_id} does not exist"
            )))
        }
    }

    /// Collections only: the new parent chain must not pass through `id`.
    fn check_cycle(&self, id: DurableId, parent_id: Option<DurableId>) -> RepoResult<()> {
        let same_table = Rc::as_ptr(&self.table) as *const () == Rc::as_ptr(&self.parents) as *const ();
        if !same_table {
            return Ok(());
        }

        let parents = self.parents.borrow();
        let mut cursor = parent_id;
        let mut steps = 0;
        while let Some(current) = cursor {
            if current == id {
                return Err(RepoError::reference(format!(
                    "collection {id} cannot be moved under itself"
                )));
            }
            steps += 1;
            if steps > parents.rows.len() {
                break;
            }
            cursor = parents.live(current).and_then(|c| c.parent_id);
        }
        Ok(())
    }
}

fn exhausted(e: crate::order::OrderError) -> RepoError {
    RepoError::new(RepoErrorKind::Http, e.to_string())
}

impl<B: Body> Repository<B> for MemoryRepository<B> {
    async fn list(&self) -> RepoResult<Vec<Entity<B>>> {
        self.take_fault()?;
        let mut rows: Vec<Entity<B>> = self
            .table
            .borrow()
            .rows
            .iter()
            .filter(|r| !r.deleted)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.parent_id
                .cmp(&b.parent_id)
                .then(a.order.total_cmp(&b.order))
        });
        Ok(rows)
    }

    async fn add(&self, new: NewEntity<B>) -> RepoResult<Entity<B>> {
        self.take_fault()?;
        self.check_parent(new.parent_id)?;

        let mut table = self.table.borrow_mut();
        let order = match new.order {
            Some(order) => order,
            None => append_key(table.sibling_keys(new.parent_id, None)).map_err(exhausted)?,
        };
        let now = Utc::now();
        let entity = Entity {
            id: table.next_id(),
            parent_id: new.parent_id,
            order,
            deleted: false,
            created_at: now,
            updated_at: now,
            body: new.body,
        };
        table.rows.push(entity.clone());
        Ok(entity)
    }

    async fn remove(&self, id: DurableId) -> RepoResult<()> {
        self.take_fault()?;
        let mut table = self.table.borrow_mut();
        let row = table.live_mut(id).ok_or_else(|| Self::missing(id))?;
        row.deleted = true;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn update(&self, id: DurableId, patch: B::Patch) -> RepoResult<()> {
        self.take_fault()?;
        let mut table = self.table.borrow_mut();
        let row = table.live_mut(id).ok_or_else(|| Self::missing(id))?;
        row.body.apply_patch(&patch);
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn reorder(&self, id: DurableId, order: f64) -> RepoResult<()> {
        self.take_fault()?;
        let mut table = self.table.borrow_mut();
        let row = table.live_mut(id).ok_or_else(|| Self::missing(id))?;
        row.order = order;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn move_to(&self, id: DurableId, parent_id: Option<DurableId>) -> RepoResult<()> {
        self.take_fault()?;
        self.check_parent(parent_id)?;
        self.check_cycle(id, parent_id)?;

        let mut table = self.table.borrow_mut();
        if table.live(id).is_none() {
            return Err(Self::missing(id));
        }
        let order = append_key(table.sibling_keys(parent_id, Some(id))).map_err(exhausted)?;
        if let Some(row) = table.live_mut(id) {
            row.parent_id = parent_id;
            row.order = order;
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn undo_delete(&self, id: DurableId) -> RepoResult<()> {
        self.take_fault()?;
        let mut table = self.table.borrow_mut();
        let row = table
            .rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Self::missing(id))?;
        if row.deleted {
            row.deleted = false;
            row.updated_at = Utc::now();
        }
        Ok(())
    }
}
