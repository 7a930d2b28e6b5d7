// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod envelope;
mod orchestrator;
pub mod prompts;
mod splitter;
mod subagent;
pub mod toolcall;

pub use envelope::{event_type, Envelope};
pub use orchestrator::{
    DirectHandler, EnvelopeStream, GenerationSettings, Orchestrator, OutputMode, ResultHandle,
    ToolCallHandler, ToolOutcome,
};
pub use splitter::{ControlEvent, SplitItem, StreamItem, TagSplitter};
pub use subagent::SubAgentHandler;
pub use toolcall::{format_tool_call, parse_tool_call, ToolInvocation};
