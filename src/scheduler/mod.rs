//! Lease Scheduler — the heart of the system. Selects and assigns accounts
//! per device request, and owns the per-device serialization that keeps two
//! concurrent requests from the same device from racing each other through
//! the store.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::{
    config::Config,
    errors::{Error, Result},
    rate_limiter::{self, RateLimitState},
    reclaimer,
    request_log::RequestLog,
    store::Store,
};

pub const DEFAULT_REQUESTED_LEVEL: i64 = 30;

pub struct Scheduler {
    store: Store,
    request_log: AsyncMutex<RequestLog>,
    config: Config,
    device_locks: std::sync::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

#[derive(Debug, serde::Serialize)]
pub struct Lease {
    pub username: String,
    pub password: String,
}

#[derive(Debug, serde::Serialize)]
pub struct Stats {
    pub total: i64,
    pub in_use: i64,
    pub cooldown: i64,
    pub available: i64,
    pub accounts_per_device: f64,
    pub required_per_device: f64,
    pub hours_per_account: f64,
}

impl Scheduler {
    pub fn new(store: Store, request_log: RequestLog, config: Config) -> Self {
        Self {
            store,
            request_log: AsyncMutex::new(request_log),
            config,
            device_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    fn device_lock(&self, device: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.device_locks.lock().unwrap();
        locks
            .entry(device.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub async fn get_account(&self, device: &str, requested_level: i64, now: i64) -> Result<Lease> {
        if device.is_empty() {
            return Err(Error::invalid("device is required"));
        }

        let lock = self.device_lock(device);
        let _guard = lock.lock().await;

        self.reclaim(now).await?;

        let state = rate_limiter::classify(&self.store, &*self.request_log.lock().await, &self.config, device, now)
            .await?;

        let mut request_log = self.request_log.lock().await;
        let (candidate_username, candidate_password, effective_state, append_entry) =
            self.select_candidate(device, requested_level, state, now, &mut request_log).await?;

        self.store.release_all_for(device, now).await?;
        self.store
            .assign(&candidate_username, device, now, effective_state != RateLimitState::Burst)
            .await?;

        if append_entry {
            request_log.log(device, &candidate_username, now);
        }
        request_log
            .save()
            .unwrap_or_else(|e| warn!(err = %e, device = %device, "failed to persist request log"));

        info!(
            device = %device,
            username = %candidate_username,
            rate_limit_state = ?effective_state,
            "leased account"
        );

        Ok(Lease {
            username: candidate_username,
            password: candidate_password,
        })
    }

    /// Returns `(username, password, effective_state, should_append_to_log)`.
    ///
    /// The append decision always follows the same OR guard regardless of
    /// which branch produced the candidate: append when the device has no
    /// history at all, or when the candidate isn't already present in the
    /// device's history window (see DESIGN.md on `contains` semantics).
    async fn select_candidate(
        &self,
        device: &str,
        requested_level: i64,
        state: RateLimitState,
        now: i64,
        request_log: &mut RequestLog,
    ) -> Result<(String, String, RateLimitState, bool)> {
        let history = request_log.entries_of(device);
        let should_append = |username: &str| -> bool {
            history.is_empty() || !history.iter().any(|e| e.username == username)
        };

        if state == RateLimitState::Unlimited {
            let row = self
                .store
                .pick_free(requested_level, now - self.config.cooldown_seconds)
                .await?
                .ok_or_else(|| Error::invalid("No accounts available"))?;
            let append = should_append(&row.username);
            return Ok((row.username, row.password, state, append));
        }

        // burst / period / unknown: try to re-issue something this device
        // recently held before giving up its rate-limited status.
        let window = history.iter().take(self.config.rate_limit_number);

        let mut found = None;
        for entry in window {
            if let Some(row) = self.store.find_by_username(&entry.username).await? {
                let not_burned = row.last_burned.unwrap_or(0) < now - self.config.cooldown_seconds;
                if not_burned && row.level >= requested_level {
                    found = Some(row);
                    break;
                }
            }
        }

        if let Some(row) = found {
            request_log.rotate(device);
            // Always drawn from the existing window, so the guard above
            // would be false anyway — spelled out for clarity.
            return Ok((row.username, row.password, state, false));
        }

        if history.is_empty() {
            let current = self.store.current_for(device).await?;
            if let Some(row) = current {
                let append = should_append(&row.username);
                return Ok((row.username, row.password, state, append));
            }
            return Err(Error::invalid("No accounts available"));
        }

        if self.config.allow_rate_limit_override_when_burned {
            let row = self
                .store
                .pick_free(requested_level, now - self.config.cooldown_seconds)
                .await?
                .ok_or_else(|| Error::invalid("No accounts available"))?;
            let append = should_append(&row.username);
            Ok((row.username, row.password, RateLimitState::Unlimited, append))
        } else {
            Err(Error::invalid("No accounts available"))
        }
    }

    async fn reclaim(&self, now: i64) -> Result<()> {
        reclaimer::force_release(&self.store, self.config.force_release_seconds, now).await
    }

    pub async fn set_level_by_account(&self, username: &str, level: i64) -> Result<()> {
        self.store.set_level(username, level).await
    }

    pub async fn set_burned_by_account(&self, username: &str, now: i64) -> Result<()> {
        self.store.set_burned(username, now).await
    }

    pub async fn set_level_by_device(&self, device: &str, level: i64) -> Result<()> {
        let row = self
            .store
            .current_for(device)
            .await?
            .ok_or_else(|| Error::invalid("device has no active lease"))?;
        self.store.set_level(&row.username, level).await
    }

    pub async fn set_burned_by_device(&self, device: &str, now: i64) -> Result<()> {
        let row = self
            .store
            .current_for(device)
            .await?
            .ok_or_else(|| Error::invalid("device has no active lease"))?;
        self.store.set_burned(&row.username, now).await
    }

    pub async fn stats(&self, now: i64) -> Result<Stats> {
        self.reclaim(now).await?;

        let total = self.store.count_all().await?;
        let in_use = self.store.count_in_use().await?;
        let cooldown = self.store.count_cooldown(now - self.config.cooldown_seconds).await?;
        let available = total - in_use - cooldown;

        let (accounts_per_device, required_per_device, hours_per_account) = if in_use == 0 {
            (0.0, 0.0, 0.0)
        } else {
            let accounts_per_device = total as f64 / in_use as f64;
            let required_per_device = (in_use + cooldown) as f64 / in_use as f64;
            let hours_per_account = 24.0 / required_per_device;
            (accounts_per_device, required_per_device, hours_per_account)
        };

        Ok(Stats {
            total,
            in_use,
            cooldown,
            available,
            accounts_per_device: round2(accounts_per_device),
            required_per_device: round2(required_per_device),
            hours_per_account: round2(hours_per_account),
        })
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
