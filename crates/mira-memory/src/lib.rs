// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod corpus;
mod store;

pub use corpus::ResearchCorpus;
pub use store::{MemoryRecord, MemoryStore};

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("memory {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}
