//! HANDICAPPER: tool-augmented sports wagering recommendation engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod data;
pub mod llm;
pub mod tools;
pub mod strategy;
pub mod engine;
pub mod storage;
pub mod api;
