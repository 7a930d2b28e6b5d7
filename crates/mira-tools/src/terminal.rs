// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Terminal command execution with a safety blocklist.
//!
//! The blocklist is a last line of defense against the model destroying
//! the host: a forbidden pattern means the command is never spawned.

use std::sync::OnceLock;
use std::time::Duration;

use regex::RegexSet;
use tracing::{error, info};

pub const MAX_TERMINAL_OUTPUT_LENGTH: usize = 8000;

fn forbidden_patterns() -> &'static RegexSet {
    static PATTERNS: OnceLock<RegexSet> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        RegexSet::new([
            r"(?i)rm\s+-rf\s+[/~]",   // recursive delete at root or home
            r"(?i)>>?\s*[/~]",        // redirection into root or home
            r"(?i)\|\s*rm",           // piping into rm
            r"(?i)sudo",              // privilege escalation
            r"(?i)chmod\s+[0-7]*7\b", // world-execute permission grants
        ])
        .expect("blocklist patterns are valid")
    })
}

/// True when the command matches the blocklist and must not be spawned.
pub fn is_forbidden(command: &str) -> bool {
    forbidden_patterns().is_match(command)
}

fn truncate_output(text: &str) -> String {
    if text.len() <= MAX_TERMINAL_OUTPUT_LENGTH {
        return text.to_string();
    }
    let mut cut = MAX_TERMINAL_OUTPUT_LENGTH;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n\n[Output truncated to avoid exceeding context window]",
        &text[..cut]
    )
}

/// Run `command` through `sh -c`, capturing output.  Always returns
/// text — failures are described, never raised.
pub async fn run(command: &str, timeout_secs: u64) -> String {
    if is_forbidden(command) {
        error!(%command, "forbidden command pattern detected");
        return "Error: Forbidden command pattern detected".to_string();
    }

    info!(%command, "executing terminal command");
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c").arg(command);

    let output = match tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output()).await
    {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return format!("Error executing command: {e}"),
        Err(_) => {
            error!(%command, timeout_secs, "terminal command timed out");
            return format!("Error: Command timed out after {timeout_secs} seconds");
        }
    };

    let mut result = format!("Command executed: {command}\n");
    result.push_str(&format!(
        "Exit code: {}\n",
        output.status.code().unwrap_or(-1)
    ));

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stdout.is_empty() {
        result.push_str(&format!("Output:\n{}\n", truncate_output(&stdout)));
    }
    if !stderr.is_empty() {
        result.push_str(&format!("Error output:\n{}\n", truncate_output(&stderr)));
    }
    if stdout.is_empty() && stderr.is_empty() {
        result.push_str("Command completed with no output.");
    }
    result
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
