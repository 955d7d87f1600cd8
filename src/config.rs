use crate::model::Settings;
use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const APP_DIR: &str = "retune";
const SETTINGS_FILE: &str = "settings.json";
const LOG_FILE: &str = "retune.log";

pub fn config_root() -> Result<PathBuf> {
    if let Ok(override_dir) = env::var("RETUNE_CONFIG_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let home = env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .context("neither HOME nor USERPROFILE is set")?;
    Ok(PathBuf::from(home).join(".config").join(APP_DIR))
}

pub fn ensure_config_dir() -> Result<PathBuf> {
    let root = config_root()?;
    fs::create_dir_all(&root).with_context(|| format!("failed to create {}", root.display()))?;
    Ok(root)
}

pub fn log_path() -> Result<PathBuf> {
    Ok(ensure_config_dir()?.join(LOG_FILE))
}

pub trait SettingsStore {
    fn load(&self) -> Result<Settings>;
    fn save(&mut self, settings: &Settings) -> Result<()>;
}

pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn open_default() -> Result<Self> {
        Ok(Self::at(config_root()?.join(SETTINGS_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonFileStore {
    fn load(&self) -> Result<Settings> {
        if !self.path.exists() {
            return Ok(Settings::default());
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read settings file {}", self.path.display()))?;
        let settings: Settings = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse settings file {}", self.path.display()))?;
        Ok(settings)
    }

    fn save(&mut self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, json)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}

/// In-memory store. Clones share the same document.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Settings>>,
}

impl MemoryStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(settings)),
        }
    }

    pub fn snapshot(&self) -> Settings {
        self.inner
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl SettingsStore for MemoryStore {
    fn load(&self) -> Result<Settings> {
        Ok(self.snapshot())
    }

    fn save(&mut self, settings: &Settings) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("settings lock poisoned"))?;
        *guard = settings.clone();
        Ok(())
    }
}

/// Settings document with write-through persistence.
pub struct Preferences {
    settings: Settings,
    store: Box<dyn SettingsStore>,
}

impl Preferences {
    pub fn load(store: Box<dyn SettingsStore>) -> Result<Self> {
        let settings = store.load()?;
        Ok(Self { settings, store })
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn update(&mut self, apply: impl FnOnce(&mut Settings)) -> Result<()> {
        apply(&mut self.settings);
        self.store.save(&self.settings)?;
        tracing::debug!(target: "retune::config", "settings saved");
        Ok(())
    }
}

pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let canonical = absolute.canonicalize().unwrap_or(absolute);
    strip_windows_verbatim_prefix(&canonical)
}

pub fn strip_windows_verbatim_prefix(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();

    if let Some(trimmed) = raw.strip_prefix(r"\\?\UNC\") {
        return PathBuf::from(format!(r"\\{trimmed}"));
    }

    if let Some(trimmed) = raw.strip_prefix(r"\\?\") {
        return PathBuf::from(trimmed);
    }

    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Theme;
    use tempfile::tempdir;

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().expect("tempdir");
        let mut store = JsonFileStore::at(dir.path().join("nested").join(SETTINGS_FILE));

        let settings = Settings {
            theme: Theme::SanAndreas,
            current_station: 7,
            ..Settings::default()
        };
        store.save(&settings).expect("save");
        let loaded = store.load().expect("load");
        assert_eq!(loaded.theme, Theme::SanAndreas);
        assert_eq!(loaded.current_station, 7);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempdir().expect("tempdir");
        let store = JsonFileStore::at(dir.path().join(SETTINGS_FILE));
        assert_eq!(store.load().expect("load"), Settings::default());
    }

    #[test]
    fn preferences_write_through_on_update() {
        let store = MemoryStore::default();
        let mut prefs = Preferences::load(Box::new(store.clone())).expect("prefs");
        prefs.update(|s| s.volume = 12).expect("update");
        assert_eq!(store.snapshot().volume, 12);
        assert_eq!(prefs.get().volume, 12);
    }

    #[test]
    fn strips_windows_verbatim_prefix() {
        let cleaned = strip_windows_verbatim_prefix(Path::new(r"\\?\E:\RADIO\flash.mp3"));
        assert_eq!(cleaned, PathBuf::from(r"E:\RADIO\flash.mp3"));
    }

    #[test]
    fn normalize_makes_relative_paths_absolute() {
        let normalized = normalize_path(Path::new("does-not-exist.mp3"));
        assert!(normalized.is_absolute());
    }
}
