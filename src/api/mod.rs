//! HTTP-backed repositories.
//!
//! Every endpoint is `POST /api/{links|collections}/{action}` with a JSON
//! body (camelCase keys) and bearer auth when a token is set.

use crate::config::ShelfConfig;
use crate::models::{Body, DurableId, Entity, NewEntity};
use crate::repo::{RepoError, RepoErrorKind, RepoResult, Repository};
use crate::storage::{load_json_from_storage, remove_from_storage, save_json_to_storage};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

const TOKEN_KEY: &str = "linkshelf_token";

#[derive(Clone, Debug)]
pub struct ApiClient {
    pub(crate) base_url: String,
    pub(crate) token: Option<String>,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &ShelfConfig) -> Self {
        Self::new(config.api_url.clone())
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.set_token(token.into());
        self
    }

    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    pub fn get_token(&self) -> Option<&String> {
        self.token.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Client for `config` carrying the token saved by a previous session, if any.
    pub fn load_from_storage(config: &ShelfConfig) -> Self {
        let mut client = Self::from_config(config);
        client.token = load_json_from_storage::<String>(TOKEN_KEY);
        client
    }

    pub fn save_to_storage(&self) {
        match &self.token {
            Some(token) => save_json_to_storage(TOKEN_KEY, token),
            None => remove_from_storage(TOKEN_KEY),
        }
    }

    pub fn clear_storage() {
        remove_from_storage(TOKEN_KEY);
    }

    pub(crate) fn get_auth_header(&self) -> Option<String> {
        self.token.as_ref().map(|t| format!("Bearer {t}"))
    }

    async fn send(&self, path: &str, body: &impl Serialize) -> RepoResult<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.post(url).json(body);
        if let Some(header) = self.get_auth_header() {
            req = req.header("Authorization", header);
        }

        let res = req
            .send()
            .await
            .map_err(|e| RepoError::network(e.to_string()))?;

        let status = res.status();
        if status.is_success() {
            Ok(res)
        } else {
            let body = res.text().await.unwrap_or_default();
            Err(classify_status(status.as_u16(), &body, path))
        }
    }

    pub(crate) async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> RepoResult<T> {
        self.send(path, body)
            .await?
            .json()
            .await
            .map_err(RepoError::parse)
    }

    /// For endpoints whose response body carries nothing we need.
    pub(crate) async fn post_void(&self, path: &str, body: &impl Serialize) -> RepoResult<()> {
        self.send(path, body).await.map(|_| ())
    }
}

pub(crate) fn classify_status(status: u16, body: &str, path: &str) -> RepoError {
    match status {
        401 => RepoError::unauthorized(),
        404 | 409 | 410 | 422 => RepoError::reference(format!("{path} ({status}): {body}")),
        _ => RepoError::new(
            RepoErrorKind::Http,
            format!("Request failed {path} ({status}): {body}"),
        ),
    }
}

#[derive(Serialize, Clone, Debug)]
struct IdRequest {
    id: DurableId,
}

#[derive(Serialize, Clone, Debug)]
struct UpdateRequest<'a, P> {
    id: DurableId,
    #[serde(flatten)]
    patch: &'a P,
}

#[derive(Serialize, Clone, Debug)]
struct ReorderRequest {
    id: DurableId,
    order: f64,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
struct MoveRequest {
    id: DurableId,
    parent_id: Option<DurableId>,
}

/// List responses have been seen both as a bare array and wrapped in an
/// object (`items` or the resource name). Rows that fail to parse or are
/// tombstoned are dropped.
pub(crate) fn parse_list_response<B: Body>(data: serde_json::Value) -> Vec<Entity<B>> {
    let items = match data {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => map
            .remove("items")
            .or_else(|| map.remove(B::RESOURCE))
            .and_then(|v| match v {
                serde_json::Value::Array(items) => Some(items),
                _ => None,
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    };

    let mut out: Vec<Entity<B>> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<Entity<B>>(item).ok())
        .filter(|e| !e.deleted)
        .collect();
    out.sort_by(|a, b| {
        a.parent_id
            .cmp(&b.parent_id)
            .then(a.order.total_cmp(&b.order))
    });
    out
}

/// Created entity, either bare or under `item` / the singular kind name.
pub(crate) fn parse_entity_response<B: Body>(data: serde_json::Value) -> RepoResult<Entity<B>> {
    if let Ok(entity) = serde_json::from_value::<Entity<B>>(data.clone()) {
        return Ok(entity);
    }

    let kind = B::KIND.to_string();
    match data.get("item").or_else(|| data.get(kind.as_str())) {
        Some(inner) => serde_json::from_value(inner.clone()).map_err(RepoError::parse),
        None => Err(RepoError::parse(format!(
            "response is missing the created {kind}: {data}"
        ))),
    }
}

#[derive(Clone, Debug)]
pub struct HttpRepository<B> {
    client: ApiClient,
    _kind: PhantomData<fn() -> B>,
}

impl<B: Body> HttpRepository<B> {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    fn path(action: &str) -> String {
        format!("/api/{}/{action}", B::RESOURCE)
    }
}

impl<B: Body> Repository<B> for HttpRepository<B> {
    async fn list(&self) -> RepoResult<Vec<Entity<B>>> {
        let data: serde_json::Value = self
            .client
            .post_json(&Self::path("list"), &serde_json::json!({}))
            .await?;
        Ok(parse_list_response(data))
    }

    async fn add(&self, new: NewEntity<B>) -> RepoResult<Entity<B>> {
        let data: serde_json::Value = self.client.post_json(&Self::path("add"), &new).await?;
        parse_entity_response(data)
    }

    async fn remove(&self, id: DurableId) -> RepoResult<()> {
        self.client
            .post_void(&Self::path("remove"), &IdRequest { id })
            .await
    }

    async fn update(&self, id: DurableId, patch: B::Patch) -> RepoResult<()> {
        self.client
            .post_void(&Self::path("update"), &UpdateRequest { id, patch: &patch })
            .await
    }

    async fn reorder(&self, id: DurableId, order: f64) -> RepoResult<()> {
        self.client
            .post_void(&Self::path("reorder"), &ReorderRequest { id, order })
            .await
    }

    async fn move_to(&self, id: DurableId, parent_id: Option<DurableId>) -> RepoResult<()> {
        self.client
            .post_void(&Self::path("move"), &MoveRequest { id, parent_id })
            .await
    }

    async fn undo_delete(&self, id: DurableId) -> RepoResult<()> {
        self.client
            .post_void(&Self::path("undo-delete"), &IdRequest { id })
            .await
    }
}
