use std::fs;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Remote server profile stored in settings.json. Credentials are never
/// persisted; authentication is interactive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteProfile {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub default_path: String,
}

fn default_port() -> u16 {
    22
}

fn default_local_start() -> String {
    dirs::home_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "/".to_string())
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory the local pane opens in
    #[serde(default = "default_local_start")]
    pub local_start_path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_profiles: Vec<RemoteProfile>,
    /// Overrides ~/.ssh/known_hosts as the host trust store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_hosts_path: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            local_start_path: default_local_start(),
            remote_profiles: Vec::new(),
            known_hosts_path: None,
        }
    }
}

impl Settings {
    pub fn config_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".duodir"))
    }

    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("settings.json"))
    }

    /// Loads settings from the config file, returns default if not found or invalid
    pub fn load() -> Self {
        Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    /// Loads settings from an explicit path, returns default if not found or invalid
    pub fn load_from(path: &PathBuf) -> Self {
        fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    /// Saves settings to the config file using atomic write pattern
    pub fn save(&self) -> io::Result<()> {
        let Some(config_dir) = Self::config_dir() else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "Could not determine config directory",
            ));
        };
        self.save_to(&config_dir.join("settings.json"))
    }

    /// Saves settings to an explicit path, creating parent directories
    pub fn save_to(&self, path: &PathBuf) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o700));
                }
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        let temp_path = path.with_extension("json.tmp");

        // Atomic write: write to temp file first, then rename
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_file_falls_back_to_default() {
        let dir = tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("settings.json"));
        assert!(settings.remote_profiles.is_empty());
        assert!(settings.known_hosts_path.is_none());
    }

    #[test]
    fn test_save_and_reload_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf").join("settings.json");

        let mut settings = Settings::default();
        settings.remote_profiles.push(RemoteProfile {
            name: "build box".to_string(),
            host: "build.example.com".to_string(),
            port: 2222,
            user: "ci".to_string(),
            default_path: "/srv".to_string(),
        });
        settings.save_to(&path).unwrap();

        let reloaded = Settings::load_from(&path);
        assert_eq!(reloaded.remote_profiles.len(), 1);
        assert_eq!(reloaded.remote_profiles[0].host, "build.example.com");
        assert_eq!(reloaded.remote_profiles[0].port, 2222);
    }

    #[test]
    fn test_port_defaults_to_22() {
        let profile: RemoteProfile =
            serde_json::from_str(r#"{"name": "a", "host": "h", "user": "u"}"#).unwrap();
        assert_eq!(profile.port, 22);
    }

    #[test]
    fn test_malformed_settings_fall_back_to_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();
        let settings = Settings::load_from(&path);
        assert!(settings.remote_profiles.is_empty());
    }
}
