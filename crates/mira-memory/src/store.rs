// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Personal memory store.
//!
//! One embedded SQLite database; all access is serialized through a
//! process-wide mutex (single connection, writes mutually exclusive).

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::debug;

use crate::MemoryError;

/// One saved memory as exposed over the HTTP surface and to tools.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryRecord {
    pub id: i64,
    pub memory: String,
    pub has_media: bool,
    pub created_at: String,
}

pub struct MemoryStore {
    conn: Mutex<Connection>,
}

impl MemoryStore {
    /// Open (or create) the memory database at the given path.
    pub fn open(path: &Path) -> Result<Self, MemoryError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        Self::init(Connection::open(path)?)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, MemoryError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, MemoryError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                memory TEXT,
                media BLOB,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Persist a memory, optionally with its original media bytes.
    /// Returns the new row id.
    pub fn save_memory(&self, memory: &str, media: Option<&[u8]>) -> Result<i64, MemoryError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO memories (memory, media) VALUES (?1, ?2)",
            params![memory, media],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, chars = memory.len(), "memory saved");
        Ok(id)
    }

    pub fn recent_memories(&self, limit: u32) -> Result<Vec<MemoryRecord>, MemoryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, memory, media IS NOT NULL, created_at
             FROM memories ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], row_to_record)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn all_memories(&self) -> Result<Vec<MemoryRecord>, MemoryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, memory, media IS NOT NULL, created_at
             FROM memories ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map([], row_to_record)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Substring search across up to five terms.  Matches are
    /// de-duplicated across terms and returned newest first.
    pub fn search_memories(&self, terms: &[String]) -> Result<Vec<MemoryRecord>, MemoryError> {
        let conn = self.conn.lock().unwrap();
        let mut found: Vec<MemoryRecord> = Vec::new();
        for term in terms.iter().take(5) {
            let pattern = format!("%{term}%");
            let mut stmt = conn.prepare(
                "SELECT id, memory, media IS NOT NULL, created_at
                 FROM memories WHERE memory LIKE ?1 ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt.query_map(params![pattern], row_to_record)?;
            for record in rows {
                let record = record?;
                if !found.iter().any(|m| m.id == record.id) {
                    found.push(record);
                }
            }
        }
        found.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(found)
    }

    pub fn edit_memory(&self, id: i64, new_text: &str) -> Result<(), MemoryError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE memories SET memory = ?1 WHERE id = ?2",
            params![new_text, id],
        )?;
        if changed == 0 {
            return Err(MemoryError::NotFound(id));
        }
        debug!(id, "memory edited");
        Ok(())
    }

    pub fn delete_memory(&self, id: i64) -> Result<(), MemoryError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        debug!(id, "memory deleted");
        Ok(())
    }

    pub fn get_memory(&self, id: i64) -> Result<Option<MemoryRecord>, MemoryError> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT id, memory, media IS NOT NULL, created_at
                 FROM memories WHERE id = ?1",
                params![id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Render the whole archive as the XML block embedded in the
    /// memory-chat system prompt.
    pub fn memories_xml(&self) -> Result<String, MemoryError> {
        let memories = self.all_memories()?;
        let blocks: Vec<String> = memories
            .iter()
            .map(|m| {
                // `created_at` is `YYYY-MM-DD HH:MM:SS`; the prompt only
                // wants minute precision.
                let created = m.created_at.get(..16).unwrap_or(&m.created_at);
                format!(
                    "<memory id='{}' createdAt='{}'>\n\t{}\n</memory>",
                    m.id,
                    created,
                    m.memory.replace('\n', "\n\t")
                )
            })
            .collect();
        Ok(blocks.join("\n\n\n"))
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRecord> {
    Ok(MemoryRecord {
        id: row.get(0)?,
        memory: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        has_media: row.get(2)?,
        created_at: row.get(3)?,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::open_in_memory().unwrap()
    }

    #[test]
    fn save_and_fetch_roundtrip() {
        let s = store();
        let id = s.save_memory("first memory", None).unwrap();
        let m = s.get_memory(id).unwrap().unwrap();
        assert_eq!(m.memory, "first memory");
        assert!(!m.has_media);
    }

    #[test]
    fn media_flag_is_set_for_image_memories() {
        let s = store();
        let id = s.save_memory("Image: a cat", Some(&[1, 2, 3])).unwrap();
        assert!(s.get_memory(id).unwrap().unwrap().has_media);
    }

    #[test]
    fn recent_returns_newest_first_with_limit() {
        let s = store();
        for i in 0..10 {
            s.save_memory(&format!("memory {i}"), None).unwrap();
        }
        let recent = s.recent_memories(5).unwrap();
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].memory, "memory 9");
        assert_eq!(recent[4].memory, "memory 5");
    }

    #[test]
    fn search_matches_substring_case_insensitively() {
        let s = store();
        s.save_memory("The cat sat on the mat", None).unwrap();
        s.save_memory("unrelated entry", None).unwrap();
        // SQLite LIKE is case-insensitive for ASCII.
        let hits = s.search_memories(&["CAT".into()]).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].memory.contains("cat"));
    }

    #[test]
    fn search_deduplicates_across_terms() {
        let s = store();
        s.save_memory("cats enjoy cat food", None).unwrap();
        let hits = s
            .search_memories(&["cats".into(), "cat food".into()])
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn search_caps_at_five_terms() {
        let s = store();
        s.save_memory("zebra", None).unwrap();
        let terms: Vec<String> = ["q1", "q2", "q3", "q4", "q5", "zebra"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        // The sixth term is ignored.
        assert!(s.search_memories(&terms).unwrap().is_empty());
    }

    #[test]
    fn edit_rewrites_text() {
        let s = store();
        let id = s.save_memory("old", None).unwrap();
        s.edit_memory(id, "new").unwrap();
        assert_eq!(s.get_memory(id).unwrap().unwrap().memory, "new");
    }

    #[test]
    fn edit_unknown_id_is_not_found() {
        let s = store();
        assert!(matches!(
            s.edit_memory(999, "x"),
            Err(MemoryError::NotFound(999))
        ));
    }

    #[test]
    fn delete_removes_the_row() {
        let s = store();
        let id = s.save_memory("doomed", None).unwrap();
        s.delete_memory(id).unwrap();
        assert!(s.get_memory(id).unwrap().is_none());
    }

    #[test]
    fn memories_xml_indents_multiline_bodies() {
        let s = store();
        s.save_memory("line one\nline two", None).unwrap();
        let xml = s.memories_xml().unwrap();
        assert!(xml.contains("<memory id='1'"));
        assert!(xml.contains("\n\tline one\n\tline two\n"));
    }

    #[test]
    fn store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memories.db");
        {
            let s = MemoryStore::open(&path).unwrap();
            s.save_memory("persisted", None).unwrap();
        }
        let s = MemoryStore::open(&path).unwrap();
        assert_eq!(s.recent_memories(1).unwrap()[0].memory, "persisted");
    }
}
