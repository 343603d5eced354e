use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};

use super::SessionToken;
use crate::config::Config;

/// JSON file holding the persisted session between runs.
#[derive(Debug, Clone)]
pub struct SessionStore {
  path: PathBuf,
}

impl SessionStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  /// Store at the default location in the data directory.
  pub fn open_default() -> Result<Self> {
    Ok(Self::new(Config::data_dir()?.join("session.json")))
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn load(&self) -> Result<Option<SessionToken>> {
    if !self.path.exists() {
      return Ok(None);
    }
    let contents = std::fs::read_to_string(&self.path)
      .map_err(|e| eyre!("Failed to read session file {}: {}", self.path.display(), e))?;
    let token = serde_json::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse session file {}: {}", self.path.display(), e))?;
    Ok(Some(token))
  }

  pub fn save(&self, token: &SessionToken) -> Result<()> {
    if let Some(parent) = self.path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create session directory: {}", e))?;
    }
    let contents = serde_json::to_string_pretty(token)
      .map_err(|e| eyre!("Failed to serialize session: {}", e))?;
    std::fs::write(&self.path, contents)
      .map_err(|e| eyre!("Failed to write session file {}: {}", self.path.display(), e))?;
    Ok(())
  }

  pub fn clear(&self) -> Result<()> {
    match std::fs::remove_file(&self.path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(eyre!(
        "Failed to remove session file {}: {}",
        self.path.display(),
        e
      )),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  fn scratch_store(name: &str) -> SessionStore {
    let dir = std::env::temp_dir().join(format!("lifeline-test-{}-{}", name, std::process::id()));
    SessionStore::new(dir.join("session.json"))
  }

  #[test]
  fn test_save_load_clear() {
    let store = scratch_store("save-load");
    assert!(store.load().unwrap().is_none());

    let token = SessionToken::expiring_in("abc", Duration::hours(1));
    store.save(&token).unwrap();
    assert_eq!(store.load().unwrap(), Some(token));

    store.clear().unwrap();
    assert!(store.load().unwrap().is_none());
    // Clearing twice is fine
    store.clear().unwrap();
  }
}
