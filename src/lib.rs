//! Multi-signal bug localization.
//!
//! A bug report goes through extraction, classification and candidate
//! gathering. Four independent signals then score each candidate, and a
//! weighted judge fuses the scores into a ranked list of source locations.

pub mod agents;
pub mod classifier;
pub mod cli;
pub mod collab;
pub mod commands;
pub mod config;
pub mod error;
pub mod eval;
pub mod extract;
pub mod indexer;
pub mod output;
pub mod pipeline;
pub mod ranker;
pub mod scanner;
pub mod symbols;
pub mod tokens;
pub mod utils;
