// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use celda_db::Dataset;
use celda_grid::{
    DEFAULT_FILTER_DEBOUNCE, DEFAULT_PREFS_DEBOUNCE, DEFAULT_SORT_DEBOUNCE, GridOptions,
    SyncTimings, VirtualOptions,
};
use log::LevelFilter;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const CONFIG_VERSION: i64 = 1;
const DEFAULT_PERSIST_KEY: &str = "celda";
const DEFAULT_PAGE_SIZE: usize = 50;
const DEFAULT_PREFETCH_GAP: usize = 5;
const DEFAULT_SKELETON_ROWS: usize = 1;
const DEFAULT_OVERSCAN: usize = 5;
const DEFAULT_ROW_HEIGHT: u32 = 1;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub version: i64,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub grid: GridSection,
    #[serde(default)]
    pub log: LogSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            storage: Storage::default(),
            grid: GridSection::default(),
            log: LogSection::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Storage {
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GridSection {
    /// Prefix of the preference key; the dataset name is appended. Empty
    /// disables layout persistence.
    pub persist_key: Option<String>,
    pub prefs_version: Option<u32>,
    pub page_size: Option<usize>,
    pub prefetch_gap: Option<usize>,
    pub skeleton_rows: Option<usize>,
    pub overscan: Option<usize>,
    /// Terminal lines per row.
    pub row_height: Option<u32>,
    pub sort_debounce: Option<String>,
    pub filter_debounce: Option<String>,
    pub prefs_debounce: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogSection {
    pub level: Option<String>,
    pub file: Option<String>,
}

impl Config {
    pub fn default_path() -> Result<PathBuf> {
        if let Some(path) = env::var_os("CELDA_CONFIG_PATH") {
            return Ok(PathBuf::from(path));
        }

        let config_root = dirs::config_dir().ok_or_else(|| {
            anyhow!("cannot resolve config directory; set CELDA_CONFIG_PATH to the config file")
        })?;

        let app_dir = config_root.join(celda_db::APP_NAME);
        fs::create_dir_all(&app_dir)
            .with_context(|| format!("create config directory {}", app_dir.display()))?;
        Ok(app_dir.join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let value: toml::Value = toml::from_str(&raw)
            .with_context(|| format!("parse TOML config {}", path.display()))?;

        let version = value
            .get("version")
            .and_then(toml::Value::as_integer)
            .ok_or_else(|| {
                anyhow!(
                    "config file {} is not versioned. Add `version = 1` and put values under [storage], [grid], and [log]",
                    path.display()
                )
            })?;

        if version != CONFIG_VERSION {
            bail!(
                "unsupported config version {} in {}; expected version = 1",
                version,
                path.display()
            );
        }

        let config: Config = value
            .try_into()
            .with_context(|| format!("decode config {}", path.display()))?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if let Some(db_path) = &self.storage.db_path {
            celda_db::validate_db_path(db_path)?;
        }

        if self.grid.page_size == Some(0) {
            bail!("grid.page_size in {} must be positive", path.display());
        }
        if self.grid.row_height == Some(0) {
            bail!("grid.row_height in {} must be positive", path.display());
        }
        if self.grid.prefs_version == Some(0) {
            bail!("grid.prefs_version in {} must be positive", path.display());
        }

        for (name, raw) in [
            ("sort_debounce", &self.grid.sort_debounce),
            ("filter_debounce", &self.grid.filter_debounce),
            ("prefs_debounce", &self.grid.prefs_debounce),
        ] {
            let Some(raw) = raw else {
                continue;
            };
            if parse_duration(raw)? == Duration::ZERO {
                bail!(
                    "grid.{name} in {} must be positive, got {}",
                    path.display(),
                    raw
                );
            }
        }

        self.log_level()
            .with_context(|| format!("invalid [log] level in {}", path.display()))?;
        Ok(())
    }

    pub fn db_path(&self) -> Result<PathBuf> {
        match &self.storage.db_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => celda_db::default_db_path(),
        }
    }

    pub fn page_size(&self) -> usize {
        self.grid.page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    /// Grid settings for one dataset. Each dataset keeps its own layout.
    pub fn grid_options(&self, dataset: Dataset) -> Result<GridOptions> {
        let prefix = self
            .grid
            .persist_key
            .as_deref()
            .unwrap_or(DEFAULT_PERSIST_KEY)
            .trim();
        let persist_key = (!prefix.is_empty()).then(|| format!("{prefix}-{dataset}"));

        Ok(GridOptions {
            persist_key,
            prefs_version: self.grid.prefs_version.unwrap_or(1),
            prefs_debounce: duration_or(&self.grid.prefs_debounce, DEFAULT_PREFS_DEBOUNCE)?,
            sync: SyncTimings {
                sort_debounce: duration_or(&self.grid.sort_debounce, DEFAULT_SORT_DEBOUNCE)?,
                filter_debounce: duration_or(&self.grid.filter_debounce, DEFAULT_FILTER_DEBOUNCE)?,
            },
            virtual_rows: VirtualOptions {
                row_height: self.grid.row_height.unwrap_or(DEFAULT_ROW_HEIGHT),
                overscan: self.grid.overscan.unwrap_or(DEFAULT_OVERSCAN),
                prefetch_gap: self.grid.prefetch_gap.unwrap_or(DEFAULT_PREFETCH_GAP),
                skeleton_rows: self.grid.skeleton_rows.unwrap_or(DEFAULT_SKELETON_ROWS),
            },
        })
    }

    pub fn log_level(&self) -> Result<LevelFilter> {
        let raw = self.log.level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL);
        LevelFilter::from_str(raw.trim()).map_err(|_| {
            anyhow!("unknown log level {raw:?}; use off, error, warn, info, debug or trace")
        })
    }

    pub fn log_file(&self) -> Result<PathBuf> {
        if let Some(file) = &self.log.file {
            return Ok(PathBuf::from(file));
        }
        let data_root = dirs::data_local_dir().ok_or_else(|| {
            anyhow!("cannot resolve data directory; set [log] file to a writable path")
        })?;
        let app_dir = data_root.join(celda_db::APP_NAME);
        fs::create_dir_all(&app_dir)
            .with_context(|| format!("create data directory {}", app_dir.display()))?;
        Ok(app_dir.join("celda.log"))
    }

    pub fn example_config(path: &Path) -> String {
        format!(
            "# celda config\n# Place this file at: {}\n\nversion = 1\n\n[storage]\n# Optional. Default is platform data dir (for example ~/.local/share/celda/celda.db)\n# db_path = \"/absolute/path/to/celda.db\"\n\n[grid]\npersist_key = \"{}\"\nprefs_version = 1\npage_size = {}\nprefetch_gap = {}\nskeleton_rows = {}\noverscan = {}\nrow_height = {}\nsort_debounce = \"{}ms\"\nfilter_debounce = \"{}ms\"\nprefs_debounce = \"{}ms\"\n\n[log]\nlevel = \"{}\"\n# file = \"/absolute/path/to/celda.log\"\n",
            path.display(),
            DEFAULT_PERSIST_KEY,
            DEFAULT_PAGE_SIZE,
            DEFAULT_PREFETCH_GAP,
            DEFAULT_SKELETON_ROWS,
            DEFAULT_OVERSCAN,
            DEFAULT_ROW_HEIGHT,
            DEFAULT_SORT_DEBOUNCE.as_millis(),
            DEFAULT_FILTER_DEBOUNCE.as_millis(),
            DEFAULT_PREFS_DEBOUNCE.as_millis(),
            DEFAULT_LOG_LEVEL,
        )
    }
}

fn duration_or(raw: &Option<String>, default: Duration) -> Result<Duration> {
    raw.as_deref().map_or(Ok(default), parse_duration)
}

fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if let Some(value) = raw.strip_suffix("ms") {
        let millis: u64 = value
            .parse()
            .with_context(|| format!("invalid duration {raw:?}"))?;
        return Ok(Duration::from_millis(millis));
    }
    if let Some(value) = raw.strip_suffix('s') {
        let secs: u64 = value
            .parse()
            .with_context(|| format!("invalid duration {raw:?}"))?;
        return Ok(Duration::from_secs(secs));
    }
    if let Some(value) = raw.strip_suffix('m') {
        let mins: u64 = value
            .parse()
            .with_context(|| format!("invalid duration {raw:?}"))?;
        return Ok(Duration::from_secs(mins * 60));
    }

    bail!("invalid duration {raw:?}; use one of: <N>ms, <N>s, <N>m (for example 250ms or 1s)")
}

#[cfg(test)]
mod tests {
    use super::{Config, parse_duration};
    use anyhow::Result;
    use celda_db::Dataset;
    use log::LevelFilter;
    use std::path::PathBuf;
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    fn write_config(content: &str) -> Result<(tempfile::TempDir, PathBuf)> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("config.toml");
        std::fs::write(&path, content)?;
        Ok((temp, path))
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        match ENV_LOCK.get_or_init(|| Mutex::new(())).lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[test]
    fn missing_config_uses_defaults() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let config = Config::load(&temp.path().join("missing.toml"))?;
        assert_eq!(config.version, 1);
        assert_eq!(config.page_size(), 50);
        assert_eq!(config.log_level()?, LevelFilter::Info);

        let options = config.grid_options(Dataset::Circulation)?;
        assert_eq!(options.persist_key.as_deref(), Some("celda-circulation"));
        assert_eq!(options.virtual_rows.row_height, 1);
        Ok(())
    }

    #[test]
    fn unversioned_config_is_rejected_with_actionable_message() -> Result<()> {
        let (_temp, path) = write_config("[grid]\npage_size = 20\n")?;
        let error = Config::load(&path).expect_err("unversioned config should fail");
        let message = error.to_string();
        assert!(message.contains("version = 1"));
        assert!(message.contains("[storage], [grid], and [log]"));
        Ok(())
    }

    #[test]
    fn unsupported_config_version_is_rejected() -> Result<()> {
        let (_temp, path) = write_config("version = 2\n")?;
        let error = Config::load(&path).expect_err("v2 config should fail");
        assert!(error.to_string().contains("unsupported config version 2"));
        Ok(())
    }

    #[test]
    fn malformed_config_returns_parse_error() -> Result<()> {
        let (_temp, path) = write_config("{{not toml")?;
        let error = Config::load(&path).expect_err("malformed config should fail");
        assert!(error.to_string().contains("parse TOML config"));
        Ok(())
    }

    #[test]
    fn grid_section_feeds_grid_options() -> Result<()> {
        let (_temp, path) = write_config(
            "version = 1\n[grid]\npersist_key = \"desk\"\nprefs_version = 3\npage_size = 25\nprefetch_gap = 2\nrow_height = 2\nsort_debounce = \"100ms\"\nfilter_debounce = \"2s\"\nprefs_debounce = \"1s\"\n[log]\nlevel = \"DEBUG\"\n",
        )?;
        let config = Config::load(&path)?;
        assert_eq!(config.page_size(), 25);
        assert_eq!(config.log_level()?, LevelFilter::Debug);

        let options = config.grid_options(Dataset::Expenses)?;
        assert_eq!(options.persist_key.as_deref(), Some("desk-expenses"));
        assert_eq!(options.prefs_version, 3);
        assert_eq!(options.prefs_debounce, Duration::from_secs(1));
        assert_eq!(options.sync.sort_debounce, Duration::from_millis(100));
        assert_eq!(options.sync.filter_debounce, Duration::from_secs(2));
        assert_eq!(options.virtual_rows.prefetch_gap, 2);
        assert_eq!(options.virtual_rows.row_height, 2);
        Ok(())
    }

    #[test]
    fn blank_persist_key_disables_layout_persistence() -> Result<()> {
        let (_temp, path) = write_config("version = 1\n[grid]\npersist_key = \" \"\n")?;
        let config = Config::load(&path)?;
        assert_eq!(config.grid_options(Dataset::Circulation)?.persist_key, None);
        Ok(())
    }

    #[test]
    fn grid_limits_are_validated() -> Result<()> {
        for body in [
            "version = 1\n[grid]\npage_size = 0\n",
            "version = 1\n[grid]\nrow_height = 0\n",
            "version = 1\n[grid]\nsort_debounce = \"0ms\"\n",
        ] {
            let (_temp, path) = write_config(body)?;
            let error = Config::load(&path).expect_err("invalid grid values should fail");
            assert!(
                error.to_string().contains("must be positive"),
                "unexpected message: {error}"
            );
        }
        Ok(())
    }

    #[test]
    fn unknown_log_level_is_rejected() -> Result<()> {
        let (_temp, path) = write_config("version = 1\n[log]\nlevel = \"loud\"\n")?;
        let error = Config::load(&path).expect_err("unknown level should fail");
        assert!(format!("{error:#}").contains("unknown log level"));
        Ok(())
    }

    #[test]
    fn default_path_honors_env_override() -> Result<()> {
        let _guard = env_lock();
        let temp = tempfile::tempdir()?;
        let override_path = temp.path().join("custom-config.toml");
        // SAFETY: test-only process-local env mutation.
        unsafe {
            std::env::set_var("CELDA_CONFIG_PATH", &override_path);
        }
        let resolved = Config::default_path()?;
        // SAFETY: test cleanup for process-local env mutation.
        unsafe {
            std::env::remove_var("CELDA_CONFIG_PATH");
        }
        assert_eq!(resolved, override_path);
        Ok(())
    }

    #[test]
    fn db_path_prefers_storage_config_over_env_override() -> Result<()> {
        let _guard = env_lock();
        let (_temp, path) =
            write_config("version = 1\n[storage]\ndb_path = \"/explicit/from-config.db\"\n")?;
        // SAFETY: test-only process-local env mutation.
        unsafe {
            std::env::set_var("CELDA_DB_PATH", "/from/env.db");
        }
        let config = Config::load(&path)?;
        // SAFETY: test cleanup for process-local env mutation.
        unsafe {
            std::env::remove_var("CELDA_DB_PATH");
        }
        assert_eq!(config.db_path()?, PathBuf::from("/explicit/from-config.db"));
        Ok(())
    }

    #[test]
    fn db_path_uses_env_override_when_storage_db_path_missing() -> Result<()> {
        let _guard = env_lock();
        let (_temp, path) = write_config("version = 1\n")?;
        // SAFETY: test-only process-local env mutation.
        unsafe {
            std::env::set_var("CELDA_DB_PATH", "/from/env-only.db");
        }
        let config = Config::load(&path)?;
        let resolved = config.db_path()?;
        // SAFETY: test cleanup for process-local env mutation.
        unsafe {
            std::env::remove_var("CELDA_DB_PATH");
        }
        assert_eq!(resolved, PathBuf::from("/from/env-only.db"));
        Ok(())
    }

    #[test]
    fn db_path_rejects_uri_style_storage_value() -> Result<()> {
        let (_temp, path) =
            write_config("version = 1\n[storage]\ndb_path = \"https://evil.example/celda.db\"\n")?;
        assert!(Config::load(&path).is_err());
        Ok(())
    }

    #[test]
    fn durations_parse_ms_seconds_and_minutes() -> Result<()> {
        assert_eq!(parse_duration("250ms")?, Duration::from_millis(250));
        assert_eq!(parse_duration("5s")?, Duration::from_secs(5));
        assert_eq!(parse_duration("2m")?, Duration::from_secs(120));
        assert!(parse_duration("soon").is_err());
        Ok(())
    }

    #[test]
    fn example_config_round_trips() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("config.toml");
        std::fs::write(&path, Config::example_config(&path))?;
        let config = Config::load(&path)?;
        assert_eq!(config.page_size(), 50);
        assert_eq!(
            config.grid_options(Dataset::Expenses)?,
            Config::default().grid_options(Dataset::Expenses)?
        );
        Ok(())
    }
}
