use crate::error::Result;
use crate::settings::QueueSettings;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Configuration file structure
///
/// Queue settings live under a `[queue]` table so the file can grow other
/// sections without breaking existing ones.
#[derive(Serialize, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    queue: QueueSettings,
}

/// Gets the default configuration file path, `<config dir>/nfgate/config.toml`.
///
/// Returns `None` if the platform has no configuration directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("nfgate").join("config.toml"))
}

/// Loads queue settings from a TOML file.
pub fn load_config(path: &Path) -> Result<QueueSettings> {
    let content = fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&content)?;

    info!("Loaded configuration from {}", path.display());
    Ok(config.queue)
}

/// Saves queue settings to a TOML file, creating parent directories.
pub fn save_config(settings: &QueueSettings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let config = ConfigFile {
        queue: settings.clone(),
    };
    let content = toml::to_string_pretty(&config)?;

    let mut file = fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    info!("Saved configuration to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NfqError;
    use crate::network::types::{CopyMode, Verdict};

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("nfgate-test-{}-{}", std::process::id(), name))
            .join("config.toml")
    }

    #[test]
    fn test_save_then_load() {
        let path = scratch_path("save-load");
        let settings = QueueSettings {
            queue_num: 12,
            copy_mode: CopyMode::Metadata,
            queue_maxlen: Some(2048),
            fallback_verdict: Some(Verdict::Accept),
            ..Default::default()
        };

        save_config(&settings, &path).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded, settings);

        fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_missing_file() {
        let path = scratch_path("missing");
        assert!(matches!(load_config(&path), Err(NfqError::Io(_))));
    }

    #[test]
    fn test_invalid_toml() {
        let path = scratch_path("invalid");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "[queue]\ncopy_mode = \"everything\"\n").unwrap();

        assert!(matches!(load_config(&path), Err(NfqError::Config(_))));

        fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let path = scratch_path("empty");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "").unwrap();

        assert_eq!(load_config(&path).unwrap(), QueueSettings::default());

        fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_default_path_location() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("nfgate/config.toml"));
        }
    }
}
