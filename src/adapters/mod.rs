//! Adapters module — user-facing front ends for the orchestrator.
//!
//! # Supported Channels
//!
//! - **CLI** — line-oriented interactive prompt and single-shot mode

pub mod cli;
