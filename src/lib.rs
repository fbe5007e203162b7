//! Orchestra - LLM-planned tool orchestration
//!
//! This library turns a free-text request into an ordered plan of tool
//! calls, runs the plan against external tool providers and summarizes
//! the outcomes into a single answer.

pub mod adapters;
pub mod catalog;
pub mod coerce;
pub mod config;
pub mod error;
pub mod executor;
pub mod llm;
pub mod orchestrator;
pub mod planner;
pub mod provider;
pub mod session;
pub mod synthesis;
pub mod ui;

pub use error::{Error, Result};
pub use orchestrator::Orchestrator;
