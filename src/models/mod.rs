use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier assigned by the repository once an entity is durable.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct DurableId(pub i64);

impl fmt::Display for DurableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-issued placeholder for an entity the repository has not confirmed yet.
///
/// There is no conversion into [`DurableId`], so a token cannot end up in a
/// `parent_id` field or in a repository call.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TentativeToken {
    nonce: u32,
    seq: u64,
}

impl TentativeToken {
    pub(crate) fn new(nonce: u32, seq: u64) -> Self {
        Self { nonce, seq }
    }
}

impl fmt::Display for TentativeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tmp-{:08x}-{}", self.nonce, self.seq)
    }
}

/// Hands out tokens for one store. Tokens from different stores (or browser
/// tabs) differ by nonce.
#[derive(Clone, Debug)]
pub(crate) struct TokenIssuer {
    nonce: u32,
    next: u64,
}

impl TokenIssuer {
    pub fn new() -> Self {
        Self {
            nonce: crate::util::session_nonce(),
            next: 1,
        }
    }

    pub fn issue(&mut self) -> TentativeToken {
        let token = TentativeToken::new(self.nonce, self.next);
        self.next += 1;
        token
    }
}

/// Either kind of identity a presented entity can have.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Durable(DurableId),
    Tentative(TentativeToken),
}

impl EntityKey {
    pub fn durable(self) -> Option<DurableId> {
        match self {
            EntityKey::Durable(id) => Some(id),
            EntityKey::Tentative(_) => None,
        }
    }
}

impl From<DurableId> for EntityKey {
    fn from(id: DurableId) -> Self {
        EntityKey::Durable(id)
    }
}

impl From<TentativeToken> for EntityKey {
    fn from(token: TentativeToken) -> Self {
        EntityKey::Tentative(token)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Durable(id) => write!(f, "#{id}"),
            EntityKey::Tentative(token) => write!(f, "{token}"),
        }
    }
}

#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
    Link,
    Collection,
}

/// Kind-specific payload of an entity.
///
/// Everything generic (ids, parent, order, tombstone, timestamps) lives in
/// [`Entity`]; the body only knows how to validate itself and how a patch
/// changes it.
pub trait Body: Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + 'static {
    type Patch: Clone + fmt::Debug + PartialEq + Serialize;

    const KIND: EntityKind;

    /// Path segment used by the HTTP repository.
    const RESOURCE: &'static str;

    fn validate(&self) -> Result<(), EngineError>;

    /// Canonical form stored for a new entity; matches what `apply_patch`
    /// writes for the same fields.
    fn normalize(&mut self);

    fn validate_patch(patch: &Self::Patch) -> Result<(), EngineError>;

    /// Only the fields the patch carries are touched.
    fn apply_patch(&mut self, patch: &Self::Patch);
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Entity<B> {
    pub id: DurableId,
    #[serde(default)]
    pub parent_id: Option<DurableId>,
    pub order: f64,
    #[serde(default)]
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub body: B,
}

pub type Link = Entity<LinkBody>;
pub type Collection = Entity<CollectionBody>;

/// Locally synthesized entity awaiting its durable id.
#[derive(Clone, Debug, PartialEq)]
pub struct Draft<B> {
    pub token: TentativeToken,
    pub parent_id: Option<DurableId>,
    pub order: f64,
    pub body: B,
    pub created_at: DateTime<Utc>,
}

/// What the view layer renders.
#[derive(Clone, Debug, PartialEq)]
pub enum Presented<B> {
    Concrete(Entity<B>),
    Abstract(Draft<B>),
}

impl<B> Presented<B> {
    pub fn key(&self) -> EntityKey {
        match self {
            Presented::Concrete(e) => EntityKey::Durable(e.id),
            Presented::Abstract(d) => EntityKey::Tentative(d.token),
        }
    }

    pub fn durable_id(&self) -> Option<DurableId> {
        self.key().durable()
    }

    pub fn is_concrete(&self) -> bool {
        matches!(self, Presented::Concrete(_))
    }

    pub fn parent_id(&self) -> Option<DurableId> {
        match self {
            Presented::Concrete(e) => e.parent_id,
            Presented::Abstract(d) => d.parent_id,
        }
    }

    pub fn order(&self) -> f64 {
        match self {
            Presented::Concrete(e) => e.order,
            Presented::Abstract(d) => d.order,
        }
    }

    pub fn body(&self) -> &B {
        match self {
            Presented::Concrete(e) => &e.body,
            Presented::Abstract(d) => &d.body,
        }
    }

    pub(crate) fn body_mut(&mut self) -> &mut B {
        match self {
            Presented::Concrete(e) => &mut e.body,
            Presented::Abstract(d) => &mut d.body,
        }
    }

    pub(crate) fn set_position(&mut self, parent_id: Option<DurableId>, order: f64) {
        match self {
            Presented::Concrete(e) => {
                e.parent_id = parent_id;
                e.order = order;
            }
            Presented::Abstract(d) => {
                d.parent_id = parent_id;
                d.order = order;
            }
        }
    }
}

/// Payload of a repository `add`.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewEntity<B> {
    pub parent_id: Option<DurableId>,
    pub order: Option<f64>,
    #[serde(flatten)]
    pub body: B,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LinkBody {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl LinkBody {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            description: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct LinkPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn validate_url(raw: &str) -> Result<(), EngineError> {
    let url = reqwest::Url::parse(raw.trim())
        .map_err(|e| EngineError::Validation(format!("malformed url `{raw}`: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(EngineError::Validation(format!(
            "unsupported url scheme `{other}`"
        ))),
    }
}

impl Body for LinkBody {
    type Patch = LinkPatch;

    const KIND: EntityKind = EntityKind::Link;
    const RESOURCE: &'static str = "links";

    fn validate(&self) -> Result<(), EngineError> {
        validate_url(&self.url)
    }

    fn normalize(&mut self) {
        self.url = self.url.trim().to_string();
        self.description = self.description.take().filter(|d| !d.trim().is_empty());
    }

    fn validate_patch(patch: &LinkPatch) -> Result<(), EngineError> {
        if patch.url.is_none() && patch.title.is_none() && patch.description.is_none() {
            return Err(EngineError::Validation("edit changes nothing".to_string()));
        }
        match &patch.url {
            Some(url) => validate_url(url),
            None => Ok(()),
        }
    }

    fn apply_patch(&mut self, patch: &LinkPatch) {
        if let Some(url) = &patch.url {
            self.url = url.trim().to_string();
        }
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(description) = &patch.description {
            self.description = Some(description.clone()).filter(|d| !d.trim().is_empty());
        }
    }
}

pub const MAX_COLLECTION_NAME: usize = 200;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CollectionBody {
    pub name: String,
}

impl CollectionBody {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Rename is the only edit a collection supports.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Rename {
    pub name: String,
}

fn validate_name(name: &str) -> Result<(), EngineError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::Validation(
            "collection name must not be empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_COLLECTION_NAME {
        return Err(EngineError::Validation(format!(
            "collection name is longer than {MAX_COLLECTION_NAME} characters"
        )));
    }
    Ok(())
}

impl Body for CollectionBody {
    type Patch = Rename;

    const KIND: EntityKind = EntityKind::Collection;
    const RESOURCE: &'static str = "collections";

    fn validate(&self) -> Result<(), EngineError> {
        validate_name(&self.name)
    }

    fn normalize(&mut self) {
        self.name = self.name.trim().to_string();
    }

    fn validate_patch(patch: &Rename) -> Result<(), EngineError> {
        validate_name(&patch.name)
    }

    fn apply_patch(&mut self, patch: &Rename) {
        self.name = patch.name.trim().to_string();
    }
}
