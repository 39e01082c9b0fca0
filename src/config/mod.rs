use crate::undo::UNDO_CAPACITY;

pub const DEFAULT_API_URL: &str = "http://localhost:6689";

#[derive(Clone, Debug, PartialEq)]
pub struct ShelfConfig {
    pub api_url: String,
    pub undo_capacity: usize,
    /// Prefix for locally cached snapshots, so two accounts on one browser
    /// do not share them.
    pub snapshot_namespace: String,
}

impl Default for ShelfConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            undo_capacity: UNDO_CAPACITY,
            snapshot_namespace: "default".to_string(),
        }
    }
}

impl ShelfConfig {
    /// Reads `window.ENV` in the browser, defaults anywhere else.
    ///
    /// Both `API_URL` (documented) and `api_url` are accepted.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(url) = env_string("API_URL").or_else(|| env_string("api_url")) {
            config.api_url = url;
        }
        if let Some(capacity) = env_string("UNDO_CAPACITY").and_then(|v| v.trim().parse().ok()) {
            config.undo_capacity = capacity;
        }
        if let Some(namespace) = env_string("SNAPSHOT_NAMESPACE").filter(|v| !v.trim().is_empty()) {
            config.snapshot_namespace = namespace;
        }

        config
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }
}

#[cfg(target_arch = "wasm32")]
fn env_string(key: &str) -> Option<String> {
    let window = web_sys::window()?;
    let env = window.get("ENV")?;
    if env.is_undefined() || !env.is_object() {
        return None;
    }
    let value = js_sys::Reflect::get(&env, &wasm_bindgen::JsValue::from_str(key)).ok()?;
    value
        .as_string()
        .or_else(|| value.as_f64().map(|n| n.to_string()))
}

#[cfg(not(target_arch = "wasm32"))]
fn env_string(_key: &str) -> Option<String> {
    None
}
