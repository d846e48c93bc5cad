use std::path::{Path, PathBuf};

use color_eyre::Result;
use color_eyre::eyre::{Context, eyre};
use serde::{Deserialize, Serialize};

use crate::emit::{DEFAULT_FLAT_SEPARATOR, Layout};
use crate::naming::{DEFAULT_COLLISION_BOUND, DEFAULT_MAX_NAME_BYTES};

const APP_DIR: &str = "playlist-mirror";
/// Room for a suffix like ` (9999)` plus the `.m3u` extension
const MIN_NAME_BYTES: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Trusted directory every referenced media file must live under
    crates_root: String,
    /// JSON playlist export to read
    library_export: String,
    #[serde(default = "default_output_dir")]
    output_dir: String,
    #[serde(default = "default_destination_root")]
    pub destination_root: String,
    #[serde(default)]
    pub layout: Layout,
    #[serde(default = "default_flat_separator")]
    pub flat_separator: String,
    #[serde(default = "default_max_name_bytes")]
    pub max_name_bytes: usize,
    #[serde(default = "default_true")]
    pub case_insensitive_names: bool,
    #[serde(default)]
    pub case_insensitive_paths: bool,
    #[serde(default = "default_collision_bound")]
    pub collision_bound: u32,
    #[serde(default)]
    sync: Option<SyncConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Where the playback host's library is mounted locally
    pub mount_dir: String,
}

fn default_output_dir() -> String {
    "./output".to_string()
}

fn default_destination_root() -> String {
    "/data/music".to_string()
}

fn default_flat_separator() -> String {
    DEFAULT_FLAT_SEPARATOR.to_string()
}

fn default_max_name_bytes() -> usize {
    DEFAULT_MAX_NAME_BYTES
}

fn default_true() -> bool {
    true
}

fn default_collision_bound() -> u32 {
    DEFAULT_COLLISION_BOUND
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crates_root: "~/Music/Crates".to_string(),
            library_export: "~/Music/library-export.json".to_string(),
            output_dir: default_output_dir(),
            destination_root: default_destination_root(),
            layout: Layout::default(),
            flat_separator: default_flat_separator(),
            max_name_bytes: default_max_name_bytes(),
            case_insensitive_names: true,
            case_insensitive_paths: false,
            collision_bound: default_collision_bound(),
            sync: None,
        }
    }
}

/// Values given on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub crates_root: Option<PathBuf>,
    pub library_export: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub destination_root: Option<String>,
    pub mount_dir: Option<PathBuf>,
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err(format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&contents)
            .wrap_err(format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Get the default config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|path| path.join(APP_DIR).join("config.toml"))
    }

    /// Load the config from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path().ok_or(eyre!("No config directory on this system"))?;
        Self::from_file(&config_path)
    }

    /// Write a default config file, unless one already exists
    pub fn create_default() -> Result<PathBuf> {
        let path = Self::config_path().ok_or(eyre!("No config directory on this system"))?;
        Self::create_default_at(&path)?;
        Ok(path)
    }

    fn create_default_at(path: &Path) -> Result<()> {
        if path.exists() {
            log::info!("Config already exists at {}", path.display());
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .wrap_err(format!("Failed to create {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(&Config::default())?;
        std::fs::write(path, contents).wrap_err(format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(path) = overrides.crates_root {
            self.crates_root = path.to_string_lossy().to_string();
        }
        if let Some(path) = overrides.library_export {
            self.library_export = path.to_string_lossy().to_string();
        }
        if let Some(path) = overrides.output_dir {
            self.output_dir = path.to_string_lossy().to_string();
        }
        if let Some(root) = overrides.destination_root {
            self.destination_root = root;
        }
        if let Some(path) = overrides.mount_dir {
            self.sync = Some(SyncConfig {
                mount_dir: path.to_string_lossy().to_string(),
            });
        }
    }

    /// Expand ~ to home directory
    fn expand_path(&self, path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(path)
    }

    pub fn crates_root_path(&self) -> PathBuf {
        self.expand_path(&self.crates_root)
    }

    pub fn library_export_path(&self) -> PathBuf {
        self.expand_path(&self.library_export)
    }

    pub fn output_dir_path(&self) -> PathBuf {
        self.expand_path(&self.output_dir)
    }

    pub fn mount_dir_path(&self) -> Option<PathBuf> {
        self.sync
            .as_ref()
            .map(|sync| self.expand_path(&sync.mount_dir))
    }

    /// Everything that would stop a run, one message per problem
    pub fn check(&self) -> Vec<String> {
        let mut problems = Vec::new();

        let crates_root = self.crates_root_path();
        if !crates_root.is_dir() {
            problems.push(format!(
                "crates_root {} is not an existing directory",
                crates_root.display()
            ));
        }
        let export = self.library_export_path();
        if !export.is_file() {
            problems.push(format!("library_export {} does not exist", export.display()));
        }
        if !self.destination_root.starts_with('/') {
            problems.push(format!(
                "destination_root '{}' must be an absolute path",
                self.destination_root
            ));
        }
        problems.extend(self.naming_problems());
        if let Some(mount) = self.mount_dir_path() {
            if !mount.is_dir() {
                problems.push(format!("sync.mount_dir {} is not a directory", mount.display()));
            }
        }
        problems
    }

    /// Naming settings no run can work with
    fn naming_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.flat_separator.is_empty() {
            problems.push("flat_separator must not be empty".to_string());
        }
        if !(MIN_NAME_BYTES..=DEFAULT_MAX_NAME_BYTES).contains(&self.max_name_bytes) {
            problems.push(format!(
                "max_name_bytes must be between {} and {}, got {}",
                MIN_NAME_BYTES, DEFAULT_MAX_NAME_BYTES, self.max_name_bytes
            ));
        }
        if self.collision_bound == 0 {
            problems.push("collision_bound must be at least 1".to_string());
        }
        problems
    }

    /// Fail before any output is touched when the naming settings are unusable
    pub fn ensure_usable(&self) -> Result<()> {
        let problems = self.naming_problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(eyre!("Invalid config: {}", problems.join("; ")))
        }
    }
}
