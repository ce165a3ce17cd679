//! Configuration types and loading
//!
//! Config path precedence: `--config` CLI arg > `CONFIG_PATH` env var >
//! `course-picker.toml`. The account password is resolved from the
//! `OBS_PASSWORD` env var, then `password_file`, then an inline `password`.
//!
//! ```toml
//! [account]
//! username = "student"
//! password_file = "/run/secrets/obs"
//!
//! [courses]
//! add = ["21345", "21346"]
//! drop = ["20001"]
//!
//! [courses.backups]
//! "21345" = "21399"
//!
//! [schedule]
//! start_time = "2026-09-15T14:00:00"
//! ```

use common::Secret;
use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub account: AccountConfig,
    #[serde(default)]
    pub courses: CoursesConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
}

/// Login for the student information system
#[derive(Debug, Deserialize)]
pub struct AccountConfig {
    pub username: String,
    /// Inline password, lowest precedence. Prefer `password_file` or `OBS_PASSWORD`.
    #[serde(default)]
    pub password: Option<Secret<String>>,
    #[serde(default)]
    pub password_file: Option<PathBuf>,
}

/// CRNs to add and drop, plus backup CRNs for additions
#[derive(Debug, Default, Deserialize)]
pub struct CoursesConfig {
    #[serde(default, deserialize_with = "crn_list")]
    pub add: Vec<String>,
    #[serde(default, deserialize_with = "crn_list")]
    pub drop: Vec<String>,
    /// primary CRN → backup CRN
    #[serde(default)]
    pub backups: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScheduleConfig {
    /// Local time registration opens. Unset means start immediately.
    #[serde(default)]
    pub start_time: Option<NaiveDateTime>,
}

/// Delays and limits for the run phases
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub delay_between_tries_ms: u64,
    pub time_check_interval_ms: u64,
    pub spam_duration_secs: u64,
    pub max_extra_wait_secs: u64,
    pub first_token_timeout_secs: u64,
    pub token_refresh_interval_secs: u64,
    pub provider_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub page_load_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            delay_between_tries_ms: 3000,
            time_check_interval_ms: 100,
            spam_duration_secs: 600,
            max_extra_wait_secs: 120,
            first_token_timeout_secs: 120,
            token_refresh_interval_secs: 30,
            provider_timeout_secs: 60,
            request_timeout_secs: 10,
            page_load_delay_ms: 3000,
        }
    }
}

impl TimingConfig {
    pub fn delay_between_tries(&self) -> Duration {
        Duration::from_millis(self.delay_between_tries_ms)
    }

    pub fn time_check_interval(&self) -> Duration {
        Duration::from_millis(self.time_check_interval_ms)
    }

    pub fn spam_duration(&self) -> Duration {
        Duration::from_secs(self.spam_duration_secs)
    }

    pub fn max_extra_wait(&self) -> Duration {
        Duration::from_secs(self.max_extra_wait_secs)
    }

    pub fn first_token_timeout(&self) -> Duration {
        Duration::from_secs(self.first_token_timeout_secs)
    }

    pub fn token_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.token_refresh_interval_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn page_load_delay(&self) -> Duration {
        Duration::from_millis(self.page_load_delay_ms)
    }
}

/// Remote endpoints. Defaults point at the production system.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    /// Page the browser keeps open to mint tokens
    pub target_url: String,
    pub course_selection_url: String,
    pub time_check_url: String,
    /// Request whose `Authorization` header is captured as the token
    pub token_url: String,
    /// Host the browser is redirected to when the session is gone
    pub login_host: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            target_url: "https://obs.itu.edu.tr/ogrenci/DersKayitIslemleri/DersKayit".into(),
            course_selection_url: "https://obs.itu.edu.tr/api/ders-kayit/v21/".into(),
            time_check_url: "https://obs.itu.edu.tr/api/ogrenci/Takvim/KayitZamaniKontrolu"
                .into(),
            token_url: "https://obs.itu.edu.tr/api/ogrenci/Takvim/KayitZamaniKontrolu".into(),
            login_host: "girisv3.itu.edu.tr".into(),
        }
    }
}

/// CRNs may be written as strings or bare integers.
fn crn_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Crn {
        Text(String),
        Number(u64),
    }

    let raw = Vec::<Crn>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|crn| match crn {
            Crn::Text(s) => s.trim().to_owned(),
            Crn::Number(n) => n.to_string(),
        })
        .collect())
}

impl Config {
    /// Load configuration from a TOML file, validate it, and resolve the password.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        config.validate()?;
        config.account.password = Some(config.account.resolve_password()?);

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if self.account.username.trim().is_empty() {
            return Err(common::Error::Config("account.username must not be empty".into()));
        }

        let endpoints = [
            ("target_url", &self.endpoints.target_url),
            ("course_selection_url", &self.endpoints.course_selection_url),
            ("time_check_url", &self.endpoints.time_check_url),
            ("token_url", &self.endpoints.token_url),
        ];
        for (name, url) in endpoints {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "{name} must start with http:// or https://, got: {url}"
                )));
            }
        }

        let timing = &self.timing;
        let non_zero = [
            ("delay_between_tries_ms", timing.delay_between_tries_ms),
            ("time_check_interval_ms", timing.time_check_interval_ms),
            ("spam_duration_secs", timing.spam_duration_secs),
            ("first_token_timeout_secs", timing.first_token_timeout_secs),
            ("token_refresh_interval_secs", timing.token_refresh_interval_secs),
            ("provider_timeout_secs", timing.provider_timeout_secs),
            ("request_timeout_secs", timing.request_timeout_secs),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(common::Error::Config(format!("{name} must be greater than 0")));
            }
        }

        self.courses.validate()
    }
}

impl CoursesConfig {
    /// One level of backups only, each backup used by a single primary.
    fn validate(&self) -> common::Result<()> {
        for crn in self.add.iter().chain(&self.drop) {
            if crn.is_empty() {
                return Err(common::Error::Courses("empty CRN in course list".into()));
            }
        }

        let add: HashSet<&str> = self.add.iter().map(String::as_str).collect();
        let drop: HashSet<&str> = self.drop.iter().map(String::as_str).collect();
        if let Some(crn) = add.intersection(&drop).next() {
            return Err(common::Error::Courses(format!(
                "CRN {crn} is listed in both add and drop"
            )));
        }

        let mut seen_backups: HashMap<&str, &str> = HashMap::new();
        for (primary, backup) in &self.backups {
            if !add.contains(primary.as_str()) {
                return Err(common::Error::Courses(format!(
                    "backup declared for {primary}, which is not in the add list"
                )));
            }
            if primary == backup {
                return Err(common::Error::Courses(format!(
                    "CRN {primary} is declared as its own backup"
                )));
            }
            if add.contains(backup.as_str()) || drop.contains(backup.as_str()) {
                return Err(common::Error::Courses(format!(
                    "backup {backup} for {primary} is already in a course list"
                )));
            }
            if self.backups.contains_key(backup) {
                return Err(common::Error::Courses(format!(
                    "backup {backup} for {primary} has a backup of its own; chained backups are not supported"
                )));
            }
            if let Some(other) = seen_backups.insert(backup.as_str(), primary.as_str()) {
                return Err(common::Error::Courses(format!(
                    "backup {backup} is shared by {other} and {primary}"
                )));
            }
        }

        Ok(())
    }
}

impl AccountConfig {
    /// Password resolution order:
    /// 1. OBS_PASSWORD env var
    /// 2. password_file path from config
    /// 3. inline password
    fn resolve_password(&self) -> common::Result<Secret<String>> {
        if let Ok(password) = std::env::var("OBS_PASSWORD") {
            if !password.is_empty() {
                return Ok(Secret::new(password));
            }
        }
        if let Some(ref file) = self.password_file {
            let password = std::fs::read_to_string(file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read password_file {}: {e}",
                    file.display()
                ))
            })?;
            let password = password.trim_end_matches(['\r', '\n']).to_owned();
            if !password.is_empty() {
                return Ok(Secret::new(password));
            }
        }
        match &self.password {
            Some(password) if !password.is_empty() => Ok(password.clone()),
            _ => Err(common::Error::Config(
                "no password: set OBS_PASSWORD, account.password_file or account.password".into(),
            )),
        }
    }

    /// Resolved password. Always present after `Config::load`.
    pub fn password(&self) -> Secret<String> {
        self.password
            .clone()
            .unwrap_or_else(|| Secret::new(String::new()))
    }
}

impl Config {
    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("course-picker.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that touch OBS_PASSWORD or CONFIG_PATH.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn valid_toml() -> &'static str {
        r#"
[account]
username = "student"
password = "inline-pw"

[courses]
add = ["21345", 21346]
drop = ["20001"]

[courses.backups]
"21345" = "21399"

[schedule]
start_time = "2026-09-15T14:00:00"
"#
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn load_str(contents: &str) -> common::Result<Config> {
        let dir = tempfile::tempdir().unwrap();
        Config::load(&write_config(&dir, contents))
    }

    #[test]
    fn test_load_valid_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("OBS_PASSWORD") };

        let config = load_str(valid_toml()).unwrap();
        assert_eq!(config.account.username, "student");
        assert_eq!(config.account.password().expose(), "inline-pw");
        assert_eq!(config.courses.add, ["21345", "21346"]);
        assert_eq!(config.courses.drop, ["20001"]);
        assert_eq!(config.courses.backups.get("21345").map(String::as_str), Some("21399"));
        assert_eq!(
            config.schedule.start_time.unwrap().to_string(),
            "2026-09-15 14:00:00"
        );
        assert_eq!(config.timing.delay_between_tries(), Duration::from_secs(3));
        assert_eq!(config.timing.spam_duration(), Duration::from_secs(600));
        assert_eq!(config.endpoints.login_host, "girisv3.itu.edu.tr");
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("OBS_PASSWORD", "env-pw") };
        let config = load_str("[account]\nusername = \"student\"\n").unwrap();
        unsafe { remove_env("OBS_PASSWORD") };

        assert!(config.courses.add.is_empty());
        assert!(config.schedule.start_time.is_none());
        assert_eq!(config.timing.max_extra_wait(), Duration::from_secs(120));
        assert_eq!(config.timing.time_check_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.toml"));
        assert!(matches!(result, Err(common::Error::Io(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let result = load_str("not valid {{{{ toml");
        assert!(matches!(result, Err(common::Error::Toml(_))));
    }

    #[test]
    fn test_password_env_overrides_file_and_inline() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let pw_path = dir.path().join("pw");
        std::fs::write(&pw_path, "file-pw\n").unwrap();
        let contents = format!(
            "[account]\nusername = \"s\"\npassword = \"inline\"\npassword_file = \"{}\"\n",
            pw_path.display()
        );
        let path = write_config(&dir, &contents);

        unsafe { set_env("OBS_PASSWORD", "env-pw") };
        let config = Config::load(&path).unwrap();
        assert_eq!(config.account.password().expose(), "env-pw");

        unsafe { remove_env("OBS_PASSWORD") };
        let config = Config::load(&path).unwrap();
        assert_eq!(config.account.password().expose(), "file-pw");
    }

    #[test]
    fn test_missing_password_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("OBS_PASSWORD") };
        let err = load_str("[account]\nusername = \"student\"\n").unwrap_err();
        assert!(err.to_string().contains("no password"), "got: {err}");
    }

    #[test]
    fn test_unreadable_password_file_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("OBS_PASSWORD") };
        let err = load_str(
            "[account]\nusername = \"s\"\npassword_file = \"/nonexistent/pw\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, common::Error::Config(_)), "got: {err:?}");
    }

    #[test]
    fn test_password_not_in_debug_output() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("OBS_PASSWORD") };
        let config = load_str(valid_toml()).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("inline-pw"), "got: {debug}");
    }

    fn courses(add: &[&str], drop: &[&str], backups: &[(&str, &str)]) -> CoursesConfig {
        CoursesConfig {
            add: add.iter().map(|s| s.to_string()).collect(),
            drop: drop.iter().map(|s| s.to_string()).collect(),
            backups: backups
                .iter()
                .map(|(p, b)| (p.to_string(), b.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_chained_backups_rejected() {
        let err = courses(&["A"], &[], &[("A", "B"), ("B", "C")])
            .validate()
            .unwrap_err();
        assert!(matches!(err, common::Error::Courses(_)), "got: {err:?}");
    }

    #[test]
    fn test_backup_for_unknown_primary_rejected() {
        let err = courses(&["A"], &[], &[("Z", "B")]).validate().unwrap_err();
        assert!(err.to_string().contains("not in the add list"), "got: {err}");
    }

    #[test]
    fn test_backup_already_in_list_rejected() {
        assert!(courses(&["A", "B"], &[], &[("A", "B")]).validate().is_err());
        assert!(courses(&["A"], &["B"], &[("A", "B")]).validate().is_err());
    }

    #[test]
    fn test_self_backup_rejected() {
        assert!(courses(&["A"], &[], &[("A", "A")]).validate().is_err());
    }

    #[test]
    fn test_shared_backup_rejected() {
        let err = courses(&["A", "C"], &[], &[("A", "B"), ("C", "B")])
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("shared"), "got: {err}");
    }

    #[test]
    fn test_crn_in_add_and_drop_rejected() {
        assert!(courses(&["A"], &["A"], &[]).validate().is_err());
    }

    #[test]
    fn test_valid_backups_accepted() {
        courses(&["A", "C"], &["D"], &[("A", "B"), ("C", "E")])
            .validate()
            .unwrap();
    }

    #[test]
    fn test_invalid_url_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("OBS_PASSWORD") };
        let err = load_str(
            "[account]\nusername = \"s\"\npassword = \"p\"\n[endpoints]\ncourse_selection_url = \"obs.itu.edu.tr/api\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("course_selection_url"), "got: {err}");
    }

    #[test]
    fn test_zero_delay_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("OBS_PASSWORD") };
        let err = load_str(
            "[account]\nusername = \"s\"\npassword = \"p\"\n[timing]\ndelay_between_tries_ms = 0\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("delay_between_tries_ms"), "got: {err}");
    }

    #[test]
    fn test_resolve_path_cli_arg() {
        let path = Config::resolve_path(Some("/custom/path.toml"));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
    }

    #[test]
    fn test_resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("/env/path.toml"));
        unsafe { remove_env("CONFIG_PATH") };
    }

    #[test]
    fn test_resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(Config::resolve_path(None), PathBuf::from("course-picker.toml"));
    }

    #[test]
    fn test_resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        assert_eq!(path, PathBuf::from("/cli/wins.toml"));
        unsafe { remove_env("CONFIG_PATH") };
    }
}
