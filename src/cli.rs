// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "mira",
    version,
    about = "Locally-hosted agentic assistant over a personal memory store"
)]
pub struct Cli {
    /// Increase log verbosity (-v: debug, -vv: trace).  `MIRA_LOG` takes
    /// precedence when set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP service (the default when no command is given).
    Serve {
        /// Listen host override
        #[arg(long)]
        host: Option<String>,
        /// Listen port override
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the effective configuration and exit.
    ShowConfig,
}
