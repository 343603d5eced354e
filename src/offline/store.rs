//! SQLite storage for the offline cache, partitioned by generation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::StoredResponse;
use crate::config::Config;

/// Persistent offline store. Every row belongs to one cache generation.
pub struct OfflineStore {
  conn: Mutex<Connection>,
}

/// Schema for the offline store.
const OFFLINE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS offline_entries (
    generation TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, url)
);

CREATE INDEX IF NOT EXISTS idx_offline_entries_generation
    ON offline_entries(generation);
"#;

impl OfflineStore {
  /// Open the store at the default location in the data directory.
  pub fn open_default() -> Result<Self> {
    Self::open(&Config::data_dir()?.join("offline.db"))
  }

  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create offline store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open offline store at {}: {}", path.display(), e))?;
    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(OFFLINE_SCHEMA)
      .map_err(|e| eyre!("Failed to run offline store migrations: {}", e))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  pub fn put(&self, generation: &str, url: &str, response: &StoredResponse) -> Result<()> {
    let conn = self.lock()?;
    insert(&conn, generation, url, response)
  }

  /// Store a batch in one transaction: either every entry lands or none does.
  pub fn put_all(&self, generation: &str, entries: &[(String, StoredResponse)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    for (url, response) in entries {
      insert(&tx, generation, url, response)?;
    }
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  pub fn get(&self, generation: &str, url: &str) -> Result<Option<StoredResponse>> {
    let conn = self.lock()?;
    let row: Option<(u16, String, Vec<u8>)> = conn
      .query_row(
        "SELECT status, headers, body FROM offline_entries
         WHERE generation = ? AND url = ?",
        params![generation, url],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query offline entry: {}", e))?;

    match row {
      Some((status, headers, body)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to parse stored headers for {}: {}", url, e))?;
        Ok(Some(StoredResponse {
          status,
          headers,
          body,
        }))
      }
      None => Ok(None),
    }
  }

  /// URLs stored under a generation, sorted.
  pub fn urls(&self, generation: &str) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT url FROM offline_entries WHERE generation = ? ORDER BY url")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;
    let urls = stmt
      .query_map(params![generation], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list offline entries: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read offline entry: {}", e))?;
    Ok(urls)
  }

  /// Every generation that still has entries.
  pub fn generations(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT DISTINCT generation FROM offline_entries ORDER BY generation")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;
    let generations = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read generation: {}", e))?;
    Ok(generations)
  }

  /// Delete every entry not belonging to `generation`. Returns rows removed.
  pub fn delete_except(&self, generation: &str) -> Result<usize> {
    let conn = self.lock()?;
    conn
      .execute(
        "DELETE FROM offline_entries WHERE generation != ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to delete old generations: {}", e))
  }
}

fn insert(conn: &Connection, generation: &str, url: &str, response: &StoredResponse) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;
  conn
    .execute(
      "INSERT OR REPLACE INTO offline_entries (generation, url, status, headers, body, stored_at)
       VALUES (?, ?, ?, ?, ?, datetime('now'))",
      params![generation, url, response.status, headers, response.body],
    )
    .map_err(|e| eyre!("Failed to store offline entry {}: {}", url, e))?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn page(body: &str) -> StoredResponse {
    StoredResponse {
      status: 200,
      headers: vec![("content-type".to_string(), "text/html".to_string())],
      body: body.as_bytes().to_vec(),
    }
  }

  #[test]
  fn test_put_get() {
    let store = OfflineStore::open_in_memory().unwrap();
    store.put("v1", "http://shop.local/", &page("home")).unwrap();

    let hit = store.get("v1", "http://shop.local/").unwrap().unwrap();
    assert_eq!(hit.body, b"home");
    assert_eq!(hit.header("Content-Type"), Some("text/html"));
    assert!(store.get("v2", "http://shop.local/").unwrap().is_none());
  }

  #[test]
  fn test_delete_except_keeps_one_generation() {
    let store = OfflineStore::open_in_memory().unwrap();
    store.put("v1", "http://shop.local/a", &page("a")).unwrap();
    store.put("v1", "http://shop.local/b", &page("b")).unwrap();
    store.put("v2", "http://shop.local/a", &page("a2")).unwrap();

    assert_eq!(store.delete_except("v2").unwrap(), 2);
    assert_eq!(store.generations().unwrap(), vec!["v2".to_string()]);
    assert!(store.urls("v1").unwrap().is_empty());
  }

  #[test]
  fn test_put_all_is_atomic_batch() {
    let store = OfflineStore::open_in_memory().unwrap();
    let entries = vec![
      ("http://shop.local/".to_string(), page("home")),
      ("http://shop.local/offline.html".to_string(), page("offline")),
    ];
    store.put_all("v1", &entries).unwrap();
    assert_eq!(
      store.urls("v1").unwrap(),
      vec![
        "http://shop.local/".to_string(),
        "http://shop.local/offline.html".to_string()
      ]
    );
  }
}
