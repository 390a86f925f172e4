//! Classifies a device's current request as `unlimited`, `burst`, `period`,
//! or `unknown`, independent of which account (if any) it ends up with.
//! Read-only with respect to both the account store and the request log.

use crate::{config::Config, request_log::RequestLog, store::Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitState {
    Unlimited,
    Burst,
    Period,
    Unknown,
}

pub async fn classify(
    store: &Store,
    request_log: &RequestLog,
    config: &Config,
    device: &str,
    now: i64,
) -> crate::errors::Result<RateLimitState> {
    if device.is_empty() {
        return Ok(RateLimitState::Unknown);
    }

    let history_usernames = request_log.usernames_of(device);
    let latest = store.latest_use_in(device, &history_usernames).await?;

    if now - latest < config.strict_rate_limit_seconds {
        return Ok(RateLimitState::Burst);
    }

    let window_start = now - config.rate_limit_minutes * 60;
    // `RequestLog` only tracks timestamps per device, not globally, so we
    // read the device's own history rather than a second store query.
    let recent_count = request_log_entries_after(request_log, device, window_start);
    if recent_count >= config.rate_limit_number {
        return Ok(RateLimitState::Period);
    }

    Ok(RateLimitState::Unlimited)
}

fn request_log_entries_after(request_log: &RequestLog, device: &str, cutoff: i64) -> usize {
    request_log
        .entries_of(device)
        .iter()
        .filter(|e| e.timestamp > cutoff)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_device_is_unknown() {
        let store = Store::in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let log = RequestLog::load(&dir.path().join("rl.json"), 3);
        let config = test_config();

        let state = classify(&store, &log, &config, "", 1_000).await.unwrap();
        assert_eq!(state, RateLimitState::Unknown);
    }

    #[tokio::test]
    async fn fresh_device_with_no_history_is_unlimited() {
        let store = Store::in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let log = RequestLog::load(&dir.path().join("rl.json"), 3);
        let config = test_config();

        let state = classify(&store, &log, &config, "device-a", 1_000).await.unwrap();
        assert_eq!(state, RateLimitState::Unlimited);
    }

    fn test_config() -> Config {
        Config {
            listen_host: "127.0.0.1".into(),
            listen_port: 9009,
            auth_username: "u".into(),
            auth_password: "p".into(),
            cooldown_seconds: 86_400,
            rate_limit_minutes: 60,
            rate_limit_number: 3,
            strict_rate_limit_seconds: 300,
            allow_rate_limit_override_when_burned: true,
            force_release_seconds: 30 * 86_400,
            db_host: "127.0.0.1".into(),
            db_port: 3306,
            db_user: "u".into(),
            db_pass: "p".into(),
            db_name: "accounts.db".into(),
            data_dir: std::path::PathBuf::from("."),
            accounts_file: std::path::PathBuf::from("accounts.txt"),
        }
    }
}
