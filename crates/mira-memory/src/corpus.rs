// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Read-only full-text search over the reference corpus.
//!
//! Articles live in a separate SQLite database.  Search results are
//! formatted directly for the model: ranked snippets with opaque topic
//! ids (base64 of the title) that unlock the full article through the
//! `get_full_topic_details` tool.

use std::path::Path;
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::MemoryError;

const SNIPPET_CONTEXT: usize = 50;
const SNIPPET_CAP: usize = 800;
const MAX_TERMS: usize = 5;
const MAX_RESULTS: usize = 25;
const RESULTS_PER_TERM: usize = 15;

pub struct ResearchCorpus {
    conn: Mutex<Connection>,
}

impl ResearchCorpus {
    pub fn open(path: &Path) -> Result<Self, MemoryError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, MemoryError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, MemoryError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS articles (
                title TEXT PRIMARY KEY,
                body TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Ingestion seam — used by corpus import tooling and tests.  The
    /// service itself never writes.
    pub fn insert_article(&self, title: &str, body: &str) -> Result<(), MemoryError> {
        self.conn.lock().unwrap().execute(
            "INSERT OR REPLACE INTO articles (title, body) VALUES (?1, ?2)",
            params![title, body],
        )?;
        Ok(())
    }

    /// Search up to five terms and format ranked snippet entries.
    /// Returns an empty string when nothing matches.
    pub fn search(&self, terms: &[String]) -> Result<String, MemoryError> {
        let conn = self.conn.lock().unwrap();
        let mut entries: Vec<String> = Vec::new();
        let mut seen: Vec<String> = Vec::new();
        let mut match_no = 1usize;

        for term in terms.iter().take(MAX_TERMS) {
            let pattern = format!("%{term}%");
            let mut stmt = conn.prepare(
                "SELECT title, body FROM articles
                 WHERE title LIKE ?1 OR body LIKE ?1 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![pattern, RESULTS_PER_TERM as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            for row in rows {
                let (title, body) = row?;
                let topic_id = BASE64.encode(title.as_bytes());
                if seen.contains(&topic_id) {
                    continue;
                }
                seen.push(topic_id.clone());

                let cleaned = remove_consecutive_short_lines(&body, 100, 3);
                let contexts = extract_contexts(&cleaned, term, SNIPPET_CONTEXT);
                let mut best = if contexts.is_empty() {
                    cleaned.clone()
                } else {
                    let mut joined = contexts[0].clone();
                    for snippet in &contexts[1..] {
                        let lead = joined.trim_end_matches(" …").to_string();
                        joined = format!("{lead} … {}", snippet.trim_start_matches("… "));
                    }
                    joined
                };
                if best.len() > SNIPPET_CAP {
                    debug!(title = %title, len = best.len(), "truncating snippet context");
                    best = format!("{} …", truncate_at_boundary(&best, SNIPPET_CAP).trim_end());
                }

                entries.push(format!(
                    "# [{match_no}]: {title}\n\n{best}\n\n\
                     LLMs: Content is truncated. Use the `get_full_topic_details(['{topic_id}'])` \
                     tool to unlock full topic details."
                ));
                match_no += 1;
            }
        }

        entries.truncate(MAX_RESULTS);
        Ok(entries.join("\n\n---\n\n"))
    }

    /// Fetch full article bodies by topic id.  Undecodable ids and
    /// missing titles are reported inline so the model can correct
    /// itself.
    pub fn full_articles(&self, topic_ids: &[String]) -> Result<String, MemoryError> {
        let conn = self.conn.lock().unwrap();
        let mut results: Vec<String> = Vec::new();

        for topic_id in topic_ids.iter().take(MAX_TERMS) {
            let title = match BASE64
                .decode(topic_id.as_bytes())
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
            {
                Some(t) => t,
                None => {
                    results.push(format!("Error decoding topic_id '{topic_id}'"));
                    continue;
                }
            };

            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM articles WHERE title = ?1",
                    params![title],
                    |row| row.get(0),
                )
                .optional()?;

            match body {
                Some(body) => results.push(remove_consecutive_short_lines(&body, 100, 3)),
                None => results.push(format!("Article not found for title: {title}")),
            }
        }

        Ok(results.join("\n\n---\n\n"))
    }
}

/// Merge overlapping or near-adjacent (within `gap`) byte intervals.
fn merge_intervals(mut intervals: Vec<(usize, usize)>, gap: usize) -> Vec<(usize, usize)> {
    if intervals.is_empty() {
        return intervals;
    }
    intervals.sort_by_key(|iv| iv.0);
    let mut merged = vec![intervals[0]];
    for (start, end) in intervals.into_iter().skip(1) {
        let last = merged.last_mut().unwrap();
        if start <= last.1 + gap {
            last.1 = last.1.max(end);
        } else {
            merged.push((start, end));
        }
    }
    merged
}

/// Drop runs of `min_consecutive` or more short lines — boilerplate
/// navigation noise in corpus dumps — then collapse repeated blank lines.
fn remove_consecutive_short_lines(text: &str, max_line_length: usize, min_consecutive: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() < min_consecutive {
        return text.to_string();
    }

    let mut keep = vec![true; lines.len()];
    let mut i = 0;
    while i < lines.len() {
        if lines[i].trim().len() < max_line_length {
            let mut j = i;
            while j < lines.len() && lines[j].trim().len() < max_line_length {
                j += 1;
            }
            if j - i >= min_consecutive {
                keep[i..j].iter_mut().for_each(|k| *k = false);
            }
            i = j.max(i + 1);
        } else {
            i += 1;
        }
    }

    let mut out: Vec<&str> = Vec::new();
    let mut prev_empty = false;
    for (line, keep) in lines.iter().zip(keep) {
        if !keep {
            continue;
        }
        let empty = line.trim().is_empty();
        if !(empty && prev_empty) {
            out.push(line);
        }
        prev_empty = empty;
    }
    out.join("\n")
}

/// Collect ±`ctx` byte windows around each occurrence of each word of
/// `term`, seeded with the article head, merged into snippets.
fn extract_contexts(text: &str, term: &str, ctx: usize) -> Vec<String> {
    let lower_text = text.to_lowercase();
    let mut spans: Vec<(usize, usize)> = vec![(0, text.len().min(400))];

    for word in term.split_whitespace() {
        let needle = word.to_lowercase();
        if needle.is_empty() {
            continue;
        }
        let mut from = 0;
        while let Some(pos) = lower_text[from..].find(&needle) {
            let start = from + pos;
            spans.push((start, start + needle.len()));
            from = start + needle.len();
        }
    }

    let merged = merge_intervals(spans, ctx);
    let full_len = text.len();
    let mut snippets = Vec::with_capacity(merged.len());

    for (start, end) in merged {
        let cs = floor_char_boundary(text, start.saturating_sub(ctx));
        let ce = ceil_char_boundary(text, (end + ctx).min(full_len));
        let mut snippet = text[cs..ce].trim().to_string();
        if cs > 0 {
            snippet = format!("… {snippet}");
        }
        if ce < full_len {
            snippet.push_str(" …");
        }
        snippets.push(snippet);
    }

    snippets
}

fn floor_char_boundary(text: &str, mut i: usize) -> usize {
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(text: &str, mut i: usize) -> usize {
    while i < text.len() && !text.is_char_boundary(i) {
        i += 1;
    }
    i
}

fn truncate_at_boundary(text: &str, cap: usize) -> &str {
    &text[..floor_char_boundary(text, cap.min(text.len()))]
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> ResearchCorpus {
        let c = ResearchCorpus::open_in_memory().unwrap();
        c.insert_article(
            "Domestic cat",
            "The cat is a small domesticated carnivorous mammal. \
             Cats are kept as pets around the world and are valued for companionship.",
        )
        .unwrap();
        c.insert_article("Steel", "Steel is an alloy of iron and carbon.")
            .unwrap();
        c
    }

    #[test]
    fn search_formats_numbered_entries_with_topic_ids() {
        let c = corpus();
        let out = c.search(&["cat".into()]).unwrap();
        assert!(out.starts_with("# [1]: Domestic cat"));
        let topic_id = BASE64.encode("Domestic cat");
        assert!(out.contains(&topic_id));
        assert!(out.contains("get_full_topic_details"));
    }

    #[test]
    fn search_misses_return_empty_string() {
        let c = corpus();
        assert!(c.search(&["quasar".into()]).unwrap().is_empty());
    }

    #[test]
    fn search_deduplicates_articles_across_terms() {
        let c = corpus();
        let out = c.search(&["cat".into(), "cats".into()]).unwrap();
        assert_eq!(out.matches("Domestic cat").count(), 1);
    }

    #[test]
    fn full_articles_roundtrip_through_topic_id() {
        let c = corpus();
        let topic_id = BASE64.encode("Steel");
        let out = c.full_articles(&[topic_id]).unwrap();
        assert!(out.contains("alloy of iron"));
    }

    #[test]
    fn full_articles_reports_bad_ids_inline() {
        let c = corpus();
        let out = c.full_articles(&["not!!base64".into()]).unwrap();
        assert!(out.contains("Error decoding topic_id"));
    }

    #[test]
    fn full_articles_reports_missing_titles() {
        let c = corpus();
        let out = c.full_articles(&[BASE64.encode("Nonexistent")]).unwrap();
        assert!(out.contains("Article not found for title: Nonexistent"));
    }

    #[test]
    fn merge_intervals_joins_within_gap() {
        let merged = merge_intervals(vec![(0, 5), (8, 12), (40, 45)], 5);
        assert_eq!(merged, vec![(0, 12), (40, 45)]);
    }

    #[test]
    fn short_line_runs_are_removed() {
        let long = "x".repeat(120);
        let text = format!("{long}\nnav\nnav\nnav\n{long}");
        let cleaned = remove_consecutive_short_lines(&text, 100, 3);
        assert!(!cleaned.contains("nav"));
        assert_eq!(cleaned.matches(&long).count(), 2);
    }

    #[test]
    fn short_pairs_are_kept() {
        let long = "x".repeat(120);
        let text = format!("{long}\nkeep me\nand me\n{long}");
        let cleaned = remove_consecutive_short_lines(&text, 100, 3);
        assert!(cleaned.contains("keep me"));
    }

    #[test]
    fn contexts_carry_ellipses_at_cut_points() {
        let body = format!("{} needle {}", "a".repeat(600), "b".repeat(600));
        let contexts = extract_contexts(&body, "needle", 50);
        assert!(contexts.iter().any(|s| s.contains("needle")));
        assert!(contexts.iter().any(|s| s.starts_with("… ") || s.ends_with(" …")));
    }

    #[test]
    fn long_snippets_are_capped() {
        let c = ResearchCorpus::open_in_memory().unwrap();
        let body = "cat ".repeat(1000);
        c.insert_article("Cats everywhere", &body).unwrap();
        let out = c.search(&["cat".into()]).unwrap();
        let snippet = out.split("\n\n").nth(1).unwrap();
        assert!(snippet.len() <= SNIPPET_CAP + 8);
    }

    #[test]
    fn multibyte_text_does_not_split_chars() {
        let c = ResearchCorpus::open_in_memory().unwrap();
        let body = format!("{} katze {}", "ä".repeat(300), "ö".repeat(300));
        c.insert_article("Katzen", &body).unwrap();
        // Must not panic on char boundaries.
        let out = c.search(&["katze".into()]).unwrap();
        assert!(out.contains("katze"));
    }
}
