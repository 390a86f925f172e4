//! Integration tests for the lease scheduler.

use pogo_account_server::{
    config::Config, request_log::RequestLog, scheduler::Scheduler, store::Store,
};
use std::path::PathBuf;

/// Real deployments see Unix epoch timestamps; tests use a realistic base
/// so "no prior use" (stored as 0) never collides with an actual `now`.
const BASE: i64 = 1_700_000_000;

fn test_config(data_dir: &std::path::Path) -> Config {
    Config {
        listen_host: "127.0.0.1".into(),
        listen_port: 9009,
        auth_username: "u".into(),
        auth_password: "p".into(),
        cooldown_seconds: 24 * 3600,
        rate_limit_minutes: 60,
        rate_limit_number: 3,
        strict_rate_limit_seconds: 5 * 60,
        allow_rate_limit_override_when_burned: true,
        force_release_seconds: 30 * 86_400,
        db_host: "127.0.0.1".into(),
        db_port: 3306,
        db_user: "u".into(),
        db_pass: "p".into(),
        db_name: "accounts.db".into(),
        data_dir: data_dir.to_path_buf(),
        accounts_file: PathBuf::from("accounts.txt"),
    }
}

async fn scheduler_with_accounts(usernames: &[&str]) -> (Scheduler, tempfile::TempDir) {
    let store = Store::in_memory().await.unwrap();
    let pairs: Vec<(String, String)> = usernames
        .iter()
        .map(|u| (u.to_string(), format!("{u}-pass")))
        .collect();
    store.upsert_many(&pairs).await.unwrap();
    for u in usernames {
        store.set_level(u, 30).await.unwrap();
    }

    let dir = tempfile::tempdir().unwrap();
    let request_log = RequestLog::load(&dir.path().join("request_log.json"), 3);
    let config = test_config(dir.path());
    (Scheduler::new(store, request_log, config), dir)
}

// ── Scenario 1: fresh lease ─────────────────────────────────────────────────

#[tokio::test]
async fn fresh_lease_assigns_one_of_the_known_accounts() {
    let (scheduler, _dir) = scheduler_with_accounts(&["A", "B", "C", "D", "E", "F"]).await;

    let lease = scheduler.get_account("d1", 30, BASE + 1_000).await.unwrap();
    assert!(["A", "B", "C", "D", "E", "F"].contains(&lease.username.as_str()));

    let row = scheduler.store().current_for("d1").await.unwrap().unwrap();
    assert_eq!(row.username, lease.username);
    assert_eq!(row.last_use, Some(BASE + 1_000));
}

// ── Scenario 2: burst ────────────────────────────────────────────────────────

#[tokio::test]
async fn burst_reissues_the_same_account_without_advancing_last_use() {
    let (scheduler, _dir) = scheduler_with_accounts(&["A", "B", "C"]).await;

    let first = scheduler.get_account("d1", 30, BASE + 1_000).await.unwrap();
    // Repeat immediately — well inside the strict rate-limit window.
    let second = scheduler.get_account("d1", 30, BASE + 1_050).await.unwrap();

    assert_eq!(first.username, second.username, "burst should re-issue the same account");

    let row = scheduler.store().current_for("d1").await.unwrap().unwrap();
    assert_eq!(row.last_use, Some(BASE + 1_000), "last_use must not advance under burst");
}

// ── Scenario 3: period limit ─────────────────────────────────────────────────

#[tokio::test]
async fn period_limit_reissues_oldest_history_entry_and_rotates() {
    let (scheduler, _dir) = scheduler_with_accounts(&["A", "B", "C", "D", "E", "F"]).await;

    // Three distinct requests, well outside the strict (5 min) window, but
    // inside the 60-minute period window.
    let l1 = scheduler.get_account("d2", 30, BASE).await.unwrap();
    let l2 = scheduler.get_account("d2", 30, BASE + 600).await.unwrap();
    let l3 = scheduler.get_account("d2", 30, BASE + 1_200).await.unwrap();

    assert_ne!(l1.username, l2.username);
    assert_ne!(l2.username, l3.username);

    // Fourth request within the period window: history has 3 entries, so
    // classification is `period` and the oldest entry (l1's account) is
    // re-issued.
    let l4 = scheduler.get_account("d2", 30, BASE + 1_800).await.unwrap();
    assert_eq!(l4.username, l1.username);
}

// ── Scenario 4: all-burned override ─────────────────────────────────────────

#[tokio::test]
async fn all_burned_history_promotes_to_unlimited_and_leases_fresh_account() {
    let (scheduler, _dir) = scheduler_with_accounts(&["A", "B", "C", "D"]).await;

    let l1 = scheduler.get_account("d3", 30, BASE).await.unwrap();
    let l2 = scheduler.get_account("d3", 30, BASE + 600).await.unwrap();
    let l3 = scheduler.get_account("d3", 30, BASE + 1_200).await.unwrap();

    scheduler.set_burned_by_account(&l1.username, BASE + 1_200).await.unwrap();
    scheduler.set_burned_by_account(&l2.username, BASE + 1_200).await.unwrap();
    scheduler.set_burned_by_account(&l3.username, BASE + 1_200).await.unwrap();

    let l4 = scheduler.get_account("d3", 30, BASE + 1_800).await.unwrap();
    assert!(
        ![l1.username.as_str(), l2.username.as_str(), l3.username.as_str()]
            .contains(&l4.username.as_str()),
        "override should lease a fresh, non-burned account"
    );
}

// ── Scenario 5: force release ────────────────────────────────────────────────

#[tokio::test]
async fn stats_reclaims_a_stale_lease_before_reporting() {
    let (scheduler, _dir) = scheduler_with_accounts(&["A"]).await;

    let _ = scheduler.get_account("d4", 30, BASE).await.unwrap();

    // Far beyond force_release_seconds (30 days) with no clean return.
    let far_future = BASE + 40 * 86_400;
    let stats = scheduler.stats(far_future).await.unwrap();
    assert_eq!(stats.in_use, 0, "stale lease should have been force-released");

    let row = scheduler.store().find_by_username("A").await.unwrap().unwrap();
    assert!(row.in_use_by.is_none());
    assert_eq!(row.last_returned, Some(far_future));
}

// ── Scenario 6: level gate ────────────────────────────────────────────────────

#[tokio::test]
async fn low_level_account_is_never_returned_for_a_higher_request() {
    let (scheduler, _dir) = scheduler_with_accounts(&["A", "B"]).await;
    scheduler.set_level_by_account("A", 25).await.unwrap();

    for i in 0i64..5 {
        let lease = scheduler.get_account("d5", 30, BASE + i * 1_000).await.unwrap();
        assert_ne!(lease.username, "A", "level-25 account must not satisfy a level-30 request");
    }
}

// ── Invariant: one lease per device ─────────────────────────────────────────

#[tokio::test]
async fn releasing_and_reassigning_never_leaves_two_accounts_held_by_one_device() {
    let (scheduler, _dir) = scheduler_with_accounts(&["A", "B", "C"]).await;

    scheduler.get_account("d6", 30, BASE).await.unwrap();
    scheduler.get_account("d6", 30, BASE + 100_000).await.unwrap();

    let count_in_use = scheduler.store().count_in_use().await.unwrap();
    assert_eq!(count_in_use, 1);
}

#[tokio::test]
async fn no_accounts_available_is_an_invalid_request_error() {
    let (scheduler, _dir) = scheduler_with_accounts(&[]).await;
    let result = scheduler.get_account("d7", 30, BASE).await;
    assert!(result.is_err());
}
