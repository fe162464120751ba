//! A relay between pull request tooling and a hosted LLM.
//!
//! The service reviews diffs, classifies their risk, flags security issues
//! and runs an agent that can act on pull requests through the PR backend.

#[macro_use]
extern crate tracing;

pub mod analysis;
pub mod config;
pub mod server;
pub mod session;
pub mod tools;
