//! Thin wrapper so every component derives "now" from one place.

pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
