//! JSON values in `localStorage`. Off the browser every read misses and every
//! write is dropped.

use serde::{Deserialize, Serialize};

#[cfg(target_arch = "wasm32")]
fn local_storage() -> Option<web_sys::Storage> {
    web_sys::window().and_then(|w| w.local_storage().ok().flatten())
}

#[cfg(target_arch = "wasm32")]
pub(crate) fn load_json_from_storage<T: for<'de> Deserialize<'de>>(key: &str) -> Option<T> {
    let storage = local_storage()?;
    let json = storage.get_item(key).ok().flatten()?;
    serde_json::from_str(&json).ok()
}

#[cfg(target_arch = "wasm32")]
pub(crate) fn save_json_to_storage<T: Serialize>(key: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => {
            if let Some(storage) = local_storage() {
                if storage.set_item(key, &json).is_err() {
                    tracing::warn!(key, "localStorage write failed");
                }
            }
        }
        Err(e) => tracing::warn!(key, error = %e, "could not serialize value for localStorage"),
    }
}

#[cfg(target_arch = "wasm32")]
pub(crate) fn remove_from_storage(key: &str) {
    if let Some(storage) = local_storage() {
        let _ = storage.remove_item(key);
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn load_json_from_storage<T: for<'de> Deserialize<'de>>(_key: &str) -> Option<T> {
    None
}

#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn save_json_to_storage<T: Serialize>(_key: &str, _value: &T) {}

#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn remove_from_storage(_key: &str) {}
