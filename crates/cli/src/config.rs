use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub store: StoreConfig,
    pub retention: RetentionConfig,
    pub backup: BackupConfig,
}

#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RetentionConfig {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BackupConfig {
    pub dir: Option<PathBuf>,
}

impl Config {
    pub fn default_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("runvault").join("config.toml")
    }

    /// Reads the config file, or returns defaults when there is none.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        if !config_path.exists() {
            if path.is_some() {
                anyhow::bail!("config file not found at {}", config_path.display());
            }
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path).with_context(|| {
            format!("failed to read config file at {}", config_path.display())
        })?;
        Self::parse(&content)
            .with_context(|| format!("failed to parse config file at {}", config_path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.backup.dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("runvault")
                .join("backups")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn reads_every_section() {
        let config = Config::parse(
            r#"
            [store]
            path = "/var/lib/runvault/app.db"

            [retention]
            limit = 50

            [backup]
            dir = "/srv/backups"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.store.path.as_deref(),
            Some(Path::new("/var/lib/runvault/app.db"))
        );
        assert_eq!(config.retention.limit, Some(50));
        assert_eq!(config.backup_dir(), PathBuf::from("/srv/backups"));
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config = Config::parse("[retention]\nlimit = 3\n").unwrap();
        assert_eq!(config.retention.limit, Some(3));
        assert!(config.store.path.is_none());
        assert!(config.backup_dir().ends_with("runvault/backups"));
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(Config::parse("[store]\npth = \"x\"\n").is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Config::load(Some(&missing)).is_err());
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[backup]\ndir = \"snapshots\"\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.backup_dir(), PathBuf::from("snapshots"));
    }
}
