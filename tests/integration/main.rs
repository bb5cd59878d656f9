//! Integration tests for HANDICAPPER.
//!
//! Exercises the pricing properties, the selector, the conversation
//! orchestrator and both request paths end to end against in-memory and
//! SQLite stores with scripted engines and mocked collaborators.

mod conversation;
mod end_to_end;
mod pricing;
mod selection;
mod support;
