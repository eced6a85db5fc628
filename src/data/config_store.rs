//! Durable key/value configuration shared by every component.
//!
//! The whole record lives in one JSON file. Every write goes to a temporary
//! file in the same directory which is then renamed over the old record, so a
//! crash mid-write leaves the previous value intact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::NamedTempFile;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::data::secret::{SECRET_LENGTH, generate_secret};
use crate::web::error::AppError;

pub const CONFIGURATION_FILE: &str = "configuration.json";

/// Secret handed to the application container as its admin password.
pub const APPLICATION_PASSWORD: &str = "NEXTCLOUD_PASSWORD";
/// Secret protecting the backup repository.
pub const BACKUP_PASSWORD: &str = "BORGBACKUP_PASSWORD";
/// Secrets that must exist once setup is complete.
pub const REQUIRED_SECRETS: [&str; 2] = [APPLICATION_PASSWORD, BACKUP_PASSWORD];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupMode {
    Local,
    Remote,
}

impl BackupMode {
    /// Remote locations are `ssh://...` URLs or scp-like `user@host:path`.
    pub fn from_location(location: &str) -> Self {
        if location.starts_with('/') {
            BackupMode::Local
        } else if location.starts_with("ssh://")
            || (location.contains('@') && location.contains(':'))
        {
            BackupMode::Remote
        } else {
            BackupMode::Local
        }
    }
}

impl FromStr for BackupMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(BackupMode::Local),
            "remote" => Ok(BackupMode::Remote),
            other => Err(AppError::InvalidInput(format!(
                "backup mode must be 'local' or 'remote', got '{other}'"
            ))),
        }
    }
}

impl fmt::Display for BackupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackupMode::Local => "local",
            BackupMode::Remote => "remote",
        })
    }
}

/// The operation a backup container run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Backup,
    Check,
    Restore,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Backup => "backup",
            BackupKind::Check => "check",
            BackupKind::Restore => "restore",
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backup" => Ok(BackupKind::Backup),
            "check" => Ok(BackupKind::Check),
            "restore" => Ok(BackupKind::Restore),
            other => Err(AppError::InvalidInput(format!("unknown backup operation '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags {
    #[serde(default)]
    pub setup_complete: bool,
    #[serde(default)]
    pub start_button_clicked: bool,
    #[serde(default)]
    pub backup_run_once: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub backup_host_location: Option<String>,
    #[serde(default)]
    pub backup_mode: Option<BackupMode>,
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
    /// bcrypt hash of the login password generated by setup.
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub flags: Flags,
    #[serde(default)]
    pub last_backup_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_backup_exit_code: Option<i64>,
    /// Operation of the most recently started backup container run.
    #[serde(default)]
    pub backup_operation: Option<BackupKind>,
}

impl Configuration {
    fn validate(&self) -> Result<(), AppError> {
        if self.flags.setup_complete
            && self.password_hash.as_deref().is_none_or(str::is_empty)
        {
            return Err(AppError::InvalidInput(
                "setup cannot be complete without a login password".to_string(),
            ));
        }
        if self.flags.setup_complete {
            if let Some(missing) = REQUIRED_SECRETS
                .iter()
                .find(|name| self.secrets.get(**name).is_none_or(String::is_empty))
            {
                return Err(AppError::InvalidInput(format!(
                    "setup cannot be complete without secret {missing}"
                )));
            }
        }
        if self.secrets.values().any(String::is_empty) {
            return Err(AppError::InvalidInput("secrets must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Keys addressable through the generic [`ConfigurationStore::get`] / [`ConfigurationStore::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    Domain,
    BackupHostLocation,
    BackupMode,
    LastBackupTime,
    LastBackupExitCode,
    BackupOperation,
}

impl ConfigKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::Domain => "domain",
            ConfigKey::BackupHostLocation => "backup_host_location",
            ConfigKey::BackupMode => "backup_mode",
            ConfigKey::LastBackupTime => "last_backup_time",
            ConfigKey::LastBackupExitCode => "last_backup_exit_code",
            ConfigKey::BackupOperation => "backup_operation",
        }
    }
}

/// Fields an operator may change from the UI. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConfigurationUpdate {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub backup_host_location: Option<String>,
    #[serde(default)]
    pub backup_mode: Option<BackupMode>,
}

/// A bare host name: no scheme, port, path or whitespace.
fn validate_domain(domain: &str) -> Result<(), AppError> {
    let valid = !domain.is_empty()
        && domain.len() <= 253
        && !domain.starts_with(['.', '-'])
        && !domain.ends_with(['.', '-'])
        && domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!(
            "'{domain}' is not a valid domain, enter a host name like cloud.example.com"
        )))
    }
}

/// Absolute host paths or remote `ssh://` / `user@host:` locations.
fn validate_backup_location(location: &str) -> Result<(), AppError> {
    if location.chars().any(char::is_whitespace) {
        return Err(AppError::InvalidInput(
            "backup location must not contain whitespace".to_string(),
        ));
    }
    let local = location.starts_with('/') && location != "/" && !location.contains("/../");
    if local || BackupMode::from_location(location) == BackupMode::Remote {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!(
            "'{location}' is neither an absolute path nor a remote location"
        )))
    }
}

/// Writes `configuration` to a temporary sibling of `path`, syncs it and
/// renames it into place. Blocking.
fn persist(path: &Path, configuration: &Configuration) -> Result<(), AppError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, configuration)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| AppError::from(e.error))?;
    debug!(path = ?path, "Configuration persisted");
    Ok(())
}

pub struct ConfigurationStore {
    path: PathBuf,
    state: RwLock<Configuration>,
}

impl ConfigurationStore {
    /// Loads the record from `data_dir`, starting empty on first boot.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, AppError> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(CONFIGURATION_FILE);

        let configuration = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            let configuration: Configuration = serde_json::from_str(&contents)?;
            info!(path = ?path, "Loaded configuration");
            configuration
        } else {
            info!(path = ?path, "No configuration found, starting empty");
            Configuration::default()
        };

        Ok(Self {
            path,
            state: RwLock::new(configuration),
        })
    }

    pub async fn snapshot(&self) -> Configuration {
        self.state.read().await.clone()
    }

    /// Applies `f` to a copy of the record and persists it. Nothing changes
    /// when `f` or the write fails. The write guard is held until the file is
    /// in place, so writers never overtake each other on disk.
    pub async fn update<T, F>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut Configuration) -> Result<T, AppError>,
    {
        let mut guard = self.state.write().await;
        let mut next = guard.clone();
        let result = f(&mut next)?;
        next.validate()?;
        if next != *guard {
            let path = self.path.clone();
            let record = next.clone();
            tokio::task::spawn_blocking(move || persist(&path, &record))
                .await
                .map_err(|e| {
                    AppError::InternalServerError(format!("configuration write task failed: {e}"))
                })??;
            *guard = next;
        }
        Ok(result)
    }

    pub async fn get(&self, key: ConfigKey) -> Result<String, AppError> {
        let config = self.state.read().await;
        let value = match key {
            ConfigKey::Domain => config.domain.clone(),
            ConfigKey::BackupHostLocation => config.backup_host_location.clone(),
            ConfigKey::BackupMode => config.backup_mode.map(|m| m.to_string()),
            ConfigKey::LastBackupTime => config.last_backup_time.map(|t| t.to_rfc3339()),
            ConfigKey::LastBackupExitCode => config.last_backup_exit_code.map(|c| c.to_string()),
            ConfigKey::BackupOperation => config.backup_operation.map(|k| k.to_string()),
        };
        value
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::NotSet(key.as_str().to_string()))
    }

    pub async fn set(&self, key: ConfigKey, value: &str) -> Result<(), AppError> {
        let invalid = |e: &dyn fmt::Display| {
            AppError::InvalidInput(format!("invalid value for {}: {e}", key.as_str()))
        };
        match key {
            ConfigKey::Domain => {
                let value = value.to_string();
                self.update(|c| {
                    c.domain = Some(value);
                    Ok(())
                })
                .await
            }
            ConfigKey::BackupHostLocation => {
                let value = value.to_string();
                self.update(|c| {
                    c.backup_host_location = Some(value);
                    Ok(())
                })
                .await
            }
            ConfigKey::BackupMode => {
                let mode: BackupMode = value.parse()?;
                self.update(|c| {
                    c.backup_mode = Some(mode);
                    Ok(())
                })
                .await
            }
            ConfigKey::LastBackupTime => {
                let time = DateTime::parse_from_rfc3339(value)
                    .map_err(|e| invalid(&e))?
                    .with_timezone(&Utc);
                self.update(|c| {
                    c.last_backup_time = Some(time);
                    Ok(())
                })
                .await
            }
            ConfigKey::LastBackupExitCode => {
                let code: i64 = value.parse().map_err(|e| invalid(&e))?;
                self.update(|c| {
                    c.last_backup_exit_code = Some(code);
                    Ok(())
                })
                .await
            }
            ConfigKey::BackupOperation => {
                let kind: BackupKind = value.parse()?;
                self.update(|c| {
                    c.backup_operation = Some(kind);
                    Ok(())
                })
                .await
            }
        }
    }

    /// Applies an operator change in one transaction. The domain is frozen
    /// once the application was started.
    pub async fn set_configuration(&self, update: ConfigurationUpdate) -> Result<(), AppError> {
        let domain = update.domain.map(|d| d.trim().to_lowercase());
        if let Some(domain) = &domain {
            validate_domain(domain)?;
        }
        let location = update
            .backup_host_location
            .map(|l| l.trim().trim_end_matches('/').to_string());
        if let Some(location) = &location {
            validate_backup_location(location)?;
        }

        self.update(|c| {
            if let Some(domain) = domain {
                if c.flags.start_button_clicked && c.domain.as_deref() != Some(domain.as_str()) {
                    return Err(AppError::InvalidInput(
                        "the domain cannot be changed after the containers were started"
                            .to_string(),
                    ));
                }
                c.domain = Some(domain);
            }
            if let Some(location) = location {
                c.backup_mode = Some(
                    update
                        .backup_mode
                        .unwrap_or_else(|| BackupMode::from_location(&location)),
                );
                c.backup_host_location = Some(location);
            } else if let Some(mode) = update.backup_mode {
                c.backup_mode = Some(mode);
            }
            Ok(())
        })
        .await?;
        info!("Configuration updated");
        Ok(())
    }

    pub async fn get_secret(&self, name: &str) -> Result<String, AppError> {
        self.state
            .read()
            .await
            .secrets
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::NotConfigured(name.to_string()))
    }

    /// Stores or rotates a secret.
    pub async fn set_secret(&self, name: &str, value: &str) -> Result<(), AppError> {
        if value.is_empty() {
            return Err(AppError::InvalidInput(format!("secret {name} must not be empty")));
        }
        let (name, value) = (name.to_string(), value.to_string());
        self.update(|c| {
            c.secrets.insert(name, value);
            Ok(())
        })
        .await
    }

    /// Returns the secret, generating and storing it on first use.
    pub async fn ensure_secret(&self, name: &str) -> Result<String, AppError> {
        if let Ok(secret) = self.get_secret(name).await {
            return Ok(secret);
        }
        let name = name.to_string();
        self.update(|c| {
            let secret = c
                .secrets
                .entry(name)
                .or_insert_with(|| generate_secret(SECRET_LENGTH));
            Ok(secret.clone())
        })
        .await
    }

    pub async fn domain(&self) -> Option<String> {
        self.state.read().await.domain.clone()
    }

    pub async fn is_setup_complete(&self) -> bool {
        self.state.read().await.flags.setup_complete
    }

    pub async fn was_start_button_clicked(&self) -> bool {
        self.state.read().await.flags.start_button_clicked
    }

    pub async fn has_backup_run_once(&self) -> bool {
        self.state.read().await.flags.backup_run_once
    }

    pub async fn last_backup_time(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.last_backup_time
    }

    pub async fn last_backup_exit_code(&self) -> Option<i64> {
        self.state.read().await.last_backup_exit_code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_get_unset_key_fails() {
        let dir = TempDir::new().unwrap();
        let store = ConfigurationStore::open(dir.path()).unwrap();
        let err = store.get(ConfigKey::Domain).await.unwrap_err();
        assert!(matches!(err, AppError::NotSet(key) if key == "domain"));
    }

    #[tokio::test]
    async fn test_set_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = ConfigurationStore::open(dir.path()).unwrap();
            store.set(ConfigKey::Domain, "cloud.example.com").await.unwrap();
            store.set(ConfigKey::BackupMode, "remote").await.unwrap();
            store.set_secret(BACKUP_PASSWORD, "hunter2").await.unwrap();
        }
        let store = ConfigurationStore::open(dir.path()).unwrap();
        assert_eq!(store.get(ConfigKey::Domain).await.unwrap(), "cloud.example.com");
        assert_eq!(store.get(ConfigKey::BackupMode).await.unwrap(), "remote");
        assert_eq!(store.get_secret(BACKUP_PASSWORD).await.unwrap(), "hunter2");
    }

    #[tokio::test]
    async fn test_missing_secret_is_not_configured() {
        let dir = TempDir::new().unwrap();
        let store = ConfigurationStore::open(dir.path()).unwrap();
        let err = store.get_secret(APPLICATION_PASSWORD).await.unwrap_err();
        assert!(matches!(err, AppError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_ensure_secret_is_stable() {
        let dir = TempDir::new().unwrap();
        let store = ConfigurationStore::open(dir.path()).unwrap();
        let first = store.ensure_secret(BACKUP_PASSWORD).await.unwrap();
        let second = store.ensure_secret(BACKUP_PASSWORD).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), SECRET_LENGTH);
    }

    #[tokio::test]
    async fn test_failed_update_leaves_record_untouched() {
        let dir = TempDir::new().unwrap();
        let store = ConfigurationStore::open(dir.path()).unwrap();
        store.set(ConfigKey::Domain, "a.example.com").await.unwrap();

        let result: Result<(), AppError> = store
            .update(|c| {
                c.domain = Some("b.example.com".into());
                Err(AppError::InvalidInput("nope".into()))
            })
            .await;
        assert!(result.is_err());

        // Invariant violation is rejected as well.
        let result = store
            .update(|c| {
                c.flags.setup_complete = true;
                Ok(())
            })
            .await;
        assert!(result.is_err());

        let reopened = ConfigurationStore::open(dir.path()).unwrap();
        assert_eq!(reopened.snapshot().await, store.snapshot().await);
        assert_eq!(reopened.domain().await.as_deref(), Some("a.example.com"));
        assert!(!reopened.is_setup_complete().await);
    }

    #[tokio::test]
    async fn test_no_temporary_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = ConfigurationStore::open(dir.path()).unwrap();
        store.set(ConfigKey::LastBackupExitCode, "3").await.unwrap();
        store.set(ConfigKey::LastBackupExitCode, "0").await.unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(store.last_backup_exit_code().await, Some(0));
    }

    #[tokio::test]
    async fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let store = ConfigurationStore::open(dir.path()).unwrap();
        assert!(store.set(ConfigKey::BackupMode, "tape").await.is_err());
        assert!(store.set(ConfigKey::LastBackupTime, "yesterday").await.is_err());
        assert!(store.set_secret(BACKUP_PASSWORD, "").await.is_err());
    }

    #[tokio::test]
    async fn test_set_configuration_derives_backup_mode() {
        let dir = TempDir::new().unwrap();
        let store = ConfigurationStore::open(dir.path()).unwrap();
        store
            .set_configuration(ConfigurationUpdate {
                domain: Some(" Cloud.Example.com ".into()),
                backup_host_location: Some("/mnt/backup/".into()),
                backup_mode: None,
            })
            .await
            .unwrap();
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.domain.as_deref(), Some("cloud.example.com"));
        assert_eq!(snapshot.backup_host_location.as_deref(), Some("/mnt/backup"));
        assert_eq!(snapshot.backup_mode, Some(BackupMode::Local));

        store
            .set_configuration(ConfigurationUpdate {
                backup_host_location: Some("ssh://borg@backup.example.com:2222/./aio".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(store.snapshot().await.backup_mode, Some(BackupMode::Remote));
    }

    #[tokio::test]
    async fn test_set_configuration_rejects_invalid_fields() {
        let dir = TempDir::new().unwrap();
        let store = ConfigurationStore::open(dir.path()).unwrap();
        for domain in ["https://cloud.example.com", "cloud.example.com/path", "a b", ""] {
            let update = ConfigurationUpdate {
                domain: Some(domain.into()),
                ..Default::default()
            };
            assert!(store.set_configuration(update).await.is_err(), "{domain}");
        }
        for location in ["relative/dir", "/", "/mnt/a b"] {
            let update = ConfigurationUpdate {
                backup_host_location: Some(location.into()),
                ..Default::default()
            };
            assert!(store.set_configuration(update).await.is_err(), "{location}");
        }
        assert_eq!(store.snapshot().await, Configuration::default());
    }

    #[tokio::test]
    async fn test_domain_is_frozen_after_start() {
        let dir = TempDir::new().unwrap();
        let store = ConfigurationStore::open(dir.path()).unwrap();
        store.set(ConfigKey::Domain, "a.example.com").await.unwrap();
        store
            .update(|c| {
                c.flags.start_button_clicked = true;
                Ok(())
            })
            .await
            .unwrap();

        let change = ConfigurationUpdate {
            domain: Some("b.example.com".into()),
            ..Default::default()
        };
        assert!(store.set_configuration(change).await.is_err());
        // Re-submitting the same domain is fine.
        let same = ConfigurationUpdate {
            domain: Some("a.example.com".into()),
            ..Default::default()
        };
        store.set_configuration(same).await.unwrap();
    }

    #[test]
    fn test_backup_mode_from_location() {
        assert_eq!(BackupMode::from_location("/mnt/backup"), BackupMode::Local);
        assert_eq!(
            BackupMode::from_location("ssh://user@host:22/./borg"),
            BackupMode::Remote
        );
        assert_eq!(BackupMode::from_location("user@host:borg"), BackupMode::Remote);
        assert_eq!(BackupMode::from_location("/mnt/a@b:c"), BackupMode::Local);
    }

    #[tokio::test]
    async fn test_local_path_with_at_and_colon_stays_local() {
        let dir = TempDir::new().unwrap();
        let store = ConfigurationStore::open(dir.path()).unwrap();
        store
            .set_configuration(ConfigurationUpdate {
                backup_host_location: Some("/mnt/user@nas:backups".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(store.snapshot().await.backup_mode, Some(BackupMode::Local));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_are_all_persisted() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ConfigurationStore::open(dir.path()).unwrap());
        let writers = (0..16).map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .set_secret(&format!("SECRET_{i}"), &format!("value-{i}"))
                    .await
            })
        });
        for result in futures::future::join_all(writers).await {
            result.unwrap().unwrap();
        }

        let reopened = ConfigurationStore::open(dir.path()).unwrap();
        assert_eq!(reopened.snapshot().await.secrets.len(), 16);
        assert_eq!(reopened.snapshot().await, store.snapshot().await);
    }
}
