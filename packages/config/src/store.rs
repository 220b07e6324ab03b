//! Config persistence: load with forward migration, save with atomic
//! whole-file replacement.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::migration;
use crate::types::{Config, ConfigError, ConfigResult, CURRENT_CONFIG_VERSION};

pub const CONFIG_FILE_NAME: &str = "mineshed.json";

/// Default config location under the user's home (`~/.mineshed/mineshed.json`),
/// falling back to the current directory when no home is available
pub fn default_config_path() -> PathBuf {
    let base = dirs::home_dir().unwrap_or_else(|| {
        warn!("could not determine home directory, using current directory");
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    });
    base.join(".mineshed").join(CONFIG_FILE_NAME)
}

/// Loads and saves the whole [`Config`] aggregate
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn at_default_location() -> Self {
        Self::new(default_config_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the config, migrating older schema versions forward.
    ///
    /// A missing file yields an empty default config at the current version.
    /// A file newer than this build understands fails with
    /// [`ConfigError::UnsupportedVersion`] rather than guessing at a lossy
    /// downgrade.
    pub fn load(&self) -> ConfigResult<Config> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "no config file, starting empty");
            return Ok(Config::empty());
        }

        let content = fs::read_to_string(&self.path)?;
        let doc: Value = serde_json::from_str(&content)?;
        let version = doc
            .get("version")
            .and_then(Value::as_u64)
            .unwrap_or(1) as u32;

        if version > CURRENT_CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                found: version,
                supported: CURRENT_CONFIG_VERSION,
            });
        }

        let config = if version < CURRENT_CONFIG_VERSION {
            migration::migrate(version, doc)
        } else {
            serde_json::from_value(doc)?
        };
        info!(
            path = %self.path.display(),
            servers = config.servers.len(),
            commands = config.saved_commands.len(),
            "loaded config"
        );
        Ok(config)
    }

    /// Serialize the full config atomically: written to a temp file in the
    /// target directory, then renamed over the previous file, so a crash
    /// mid-write never corrupts the last good config.
    pub fn save(&self, config: &Config) -> ConfigResult<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent)?;

        let json = serde_json::to_string_pretty(config)?;
        let tmp = NamedTempFile::new_in(&parent)?;
        fs::write(tmp.path(), json.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        info!(path = %self.path.display(), "saved config");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NewNode;
    use crate::types::{LaunchCommand, LaunchType, ServerDefinition};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn store_in(dir: &tempfile::TempDir) -> ConfigStore {
        ConfigStore::new(dir.path().join(CONFIG_FILE_NAME))
    }

    #[test]
    fn missing_file_yields_empty_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = store_in(&dir).load().unwrap();
        assert_eq!(config.version, CURRENT_CONFIG_VERSION);
        assert!(config.servers.is_empty());
        assert!(config.saved_commands.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut config = Config::empty();
        let mut def = ServerDefinition::new(
            "survival",
            "/srv/mc/survival",
            LaunchCommand::new("java", vec!["-jar".into(), "server.jar".into()]),
            LaunchType::JavaConsole,
        );
        def.memory_min_mb = Some(512);
        def.memory_max_mb = Some(2048);
        config.servers.push(def);
        let cat = config
            .saved_commands
            .insert(None, NewNode::Category { name: "Admin".into() }, None)
            .unwrap();
        config
            .saved_commands
            .insert(
                Some(cat),
                NewNode::Command {
                    label: "save".into(),
                    command_text: "save-all".into(),
                },
                None,
            )
            .unwrap();
        config.settings.insert("poll_secs".into(), json!(2));

        store.save(&config).unwrap();
        let reloaded = store.load().unwrap();

        assert_eq!(reloaded.version, config.version);
        assert_eq!(reloaded.servers, config.servers);
        assert_eq!(reloaded.settings, config.settings);
        // Node ids for categories are session-local; compare shape instead
        let shape = |c: &Config| -> Vec<(usize, String)> {
            c.saved_commands
                .walk()
                .iter()
                .map(|(d, id)| (*d, c.saved_commands.node(*id).unwrap().title().to_string()))
                .collect()
        };
        assert_eq!(shape(&reloaded), shape(&config));
    }

    #[test]
    fn newer_version_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(
            store.path(),
            json!({"version": 9, "servers": [], "saved_commands": [], "settings": {}})
                .to_string(),
        )
        .unwrap();

        match store.load() {
            Err(ConfigError::UnsupportedVersion { found, supported }) => {
                assert_eq!(found, 9);
                assert_eq!(supported, CURRENT_CONFIG_VERSION);
            }
            other => panic!("expected UnsupportedVersion, got {other:?}"),
        }
    }

    #[test]
    fn save_replaces_file_without_leaving_temp_droppings() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save(&Config::empty()).unwrap();
        store.save(&Config::empty()).unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from(CONFIG_FILE_NAME)]);
    }
}
