//! INI-backed configuration, layered CLI/env > file > built-in default.
//!
//! Mirrors the original Python service's `config.ini` contract: a
//! `[general]` section for server/scheduler tuning and a `[database]`
//! section for store credentials. The store itself is an embedded SQLite
//! file rather than the original's MySQL instance (single-instance,
//! authoritative server — see DESIGN.md), so `database.db` names the
//! SQLite file under the data directory instead of a schema name; the
//! section is still required and validated at startup to preserve the
//! original's fail-fast contract.

use std::path::{Path, PathBuf};

use ini::Ini;
use tracing::{error, warn};

const DEFAULT_LISTEN_HOST: &str = "127.0.0.1";
const DEFAULT_LISTEN_PORT: u16 = 9009;
const DEFAULT_COOLDOWN_HOURS: i64 = 24;
const DEFAULT_RATE_LIMIT_MINUTES: i64 = 60;
const DEFAULT_RATE_LIMIT_NUMBER: usize = 3;
const DEFAULT_STRICT_RATE_LIMIT_MINUTES: i64 = 5;
const DEFAULT_ALLOW_OVERRIDE_WHEN_BURNED: bool = true;
const DEFAULT_FORCE_RELEASE_DAYS: i64 = 30;
const DEFAULT_DB_PORT: u16 = 3306;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_host: String,
    pub listen_port: u16,
    pub auth_username: String,
    pub auth_password: String,

    pub cooldown_seconds: i64,
    pub rate_limit_minutes: i64,
    pub rate_limit_number: usize,
    pub strict_rate_limit_seconds: i64,
    pub allow_rate_limit_override_when_burned: bool,
    pub force_release_seconds: i64,

    /// Recognized for parity with the original config contract; unused by
    /// the embedded store beyond validation (see module docs).
    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_pass: String,
    /// SQLite database file name under `data_dir`.
    pub db_name: String,

    pub data_dir: PathBuf,
    pub accounts_file: PathBuf,
}

/// Raw, possibly-incomplete values read from `config.ini`, before CLI/env
/// overrides and default substitution.
#[derive(Default)]
struct IniValues {
    listen_host: Option<String>,
    listen_port: Option<u16>,
    auth_username: Option<String>,
    auth_password: Option<String>,
    cooldown_hours: Option<i64>,
    rate_limit_minutes: Option<i64>,
    rate_limit_number: Option<usize>,
    strict_rate_limit_minutes: Option<i64>,
    allow_rate_limit_override_when_burned: Option<bool>,
    force_release_days: Option<i64>,
    db_host: Option<String>,
    db_port: Option<u16>,
    db_user: Option<String>,
    db_pass: Option<String>,
    db_name: Option<String>,
}

fn load_ini(path: &Path) -> IniValues {
    let ini = match Ini::load_from_file(path) {
        Ok(ini) => ini,
        Err(e) => {
            warn!(path = %path.display(), err = %e, "could not load config.ini — using defaults/env/CLI only");
            return IniValues::default();
        }
    };

    let general = ini.section(Some("general"));
    let database = ini.section(Some("database"));

    IniValues {
        listen_host: general.and_then(|s| s.get("listen_host")).map(str::to_string),
        listen_port: general.and_then(|s| s.get("listen_port")).and_then(|v| v.parse().ok()),
        auth_username: general.and_then(|s| s.get("auth_username")).map(str::to_string),
        auth_password: general.and_then(|s| s.get("auth_password")).map(str::to_string),
        cooldown_hours: general.and_then(|s| s.get("cooldown")).and_then(|v| v.parse().ok()),
        rate_limit_minutes: general
            .and_then(|s| s.get("rate_limit_minutes"))
            .and_then(|v| v.parse().ok()),
        rate_limit_number: general
            .and_then(|s| s.get("rate_limit_number"))
            .and_then(|v| v.parse().ok()),
        strict_rate_limit_minutes: general
            .and_then(|s| s.get("strict_rate_limit_minutes"))
            .and_then(|v| v.parse().ok()),
        allow_rate_limit_override_when_burned: general
            .and_then(|s| s.get("allow_rate_limit_override_when_burned"))
            .and_then(|v| v.parse().ok()),
        force_release_days: general
            .and_then(|s| s.get("force_release_days"))
            .and_then(|v| v.parse().ok()),
        db_host: database.and_then(|s| s.get("host")).map(str::to_string),
        db_port: database.and_then(|s| s.get("port")).and_then(|v| v.parse().ok()),
        db_user: database.and_then(|s| s.get("user")).map(str::to_string),
        db_pass: database.and_then(|s| s.get("pass")).map(str::to_string),
        db_name: database.and_then(|s| s.get("db")).map(str::to_string),
    }
}

fn env_or(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Build config from the INI file at `config_path`, overridden by
    /// `POGO_*` environment variables, overridden in turn by explicit CLI
    /// values (each `Some` CLI arg wins over everything else).
    pub fn load(
        config_path: &Path,
        data_dir: PathBuf,
        accounts_file: PathBuf,
    ) -> anyhow::Result<Self> {
        let ini = load_ini(config_path);

        let listen_host = env_or("POGO_LISTEN_HOST")
            .or(ini.listen_host)
            .unwrap_or_else(|| DEFAULT_LISTEN_HOST.to_string());
        let listen_port = env_or("POGO_LISTEN_PORT")
            .and_then(|v| v.parse().ok())
            .or(ini.listen_port)
            .unwrap_or(DEFAULT_LISTEN_PORT);
        let auth_username = env_or("POGO_AUTH_USERNAME").or(ini.auth_username);
        let auth_password = env_or("POGO_AUTH_PASSWORD").or(ini.auth_password);

        let cooldown_hours = ini.cooldown_hours.unwrap_or(DEFAULT_COOLDOWN_HOURS);
        let rate_limit_minutes = ini.rate_limit_minutes.unwrap_or(DEFAULT_RATE_LIMIT_MINUTES);
        let rate_limit_number = ini.rate_limit_number.unwrap_or(DEFAULT_RATE_LIMIT_NUMBER);
        let strict_rate_limit_minutes = ini
            .strict_rate_limit_minutes
            .unwrap_or(DEFAULT_STRICT_RATE_LIMIT_MINUTES);
        let allow_rate_limit_override_when_burned = ini
            .allow_rate_limit_override_when_burned
            .unwrap_or(DEFAULT_ALLOW_OVERRIDE_WHEN_BURNED);
        let force_release_days = ini.force_release_days.unwrap_or(DEFAULT_FORCE_RELEASE_DAYS);

        let db_host = env_or("POGO_DB_HOST").or(ini.db_host).unwrap_or_else(|| DEFAULT_LISTEN_HOST.to_string());
        let db_port = ini.db_port.unwrap_or(DEFAULT_DB_PORT);
        let db_user = env_or("POGO_DB_USER").or(ini.db_user);
        let db_pass = env_or("POGO_DB_PASS").or(ini.db_pass);
        let db_name = env_or("POGO_DB_NAME").or(ini.db_name);

        let missing: Vec<&str> = [
            ("auth_username", auth_username.is_none()),
            ("auth_password", auth_password.is_none()),
            ("database.user", db_user.is_none()),
            ("database.pass", db_pass.is_none()),
            ("database.db", db_name.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, missing)| missing.then_some(name))
        .collect();

        if !missing.is_empty() {
            error!(missing = ?missing, "missing required setting! check your config");
            anyhow::bail!("missing required config keys: {}", missing.join(", "));
        }

        Ok(Self {
            listen_host,
            listen_port,
            auth_username: auth_username.ok_or_else(|| anyhow::anyhow!("missing auth_username"))?,
            auth_password: auth_password.ok_or_else(|| anyhow::anyhow!("missing auth_password"))?,
            cooldown_seconds: cooldown_hours * 3600,
            rate_limit_minutes,
            rate_limit_number,
            strict_rate_limit_seconds: strict_rate_limit_minutes * 60,
            allow_rate_limit_override_when_burned,
            force_release_seconds: force_release_days * 86_400,
            db_host,
            db_port,
            db_user: db_user.ok_or_else(|| anyhow::anyhow!("missing database.user"))?,
            db_pass: db_pass.ok_or_else(|| anyhow::anyhow!("missing database.pass"))?,
            db_name: db_name.ok_or_else(|| anyhow::anyhow!("missing database.db"))?,
            data_dir,
            accounts_file,
        })
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_name)
    }

    pub fn request_log_path(&self) -> PathBuf {
        self.data_dir.join("request_log.json")
    }
}
