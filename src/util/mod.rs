use chrono::Utc;

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Per-store random prefix for tentative tokens. Falls back to the clock if
/// the platform RNG is unavailable.
pub(crate) fn session_nonce() -> u32 {
    let mut buf = [0u8; 4];
    match getrandom::getrandom(&mut buf) {
        Ok(()) => u32::from_le_bytes(buf),
        Err(_) => now_ms() as u32,
    }
}
