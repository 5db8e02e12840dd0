//! tweetdump library.
//!
//! Incrementally collects posts from X/Twitter timelines (lists, user
//! profiles, conversation threads), deduplicates against a local SQLite
//! store, reconstructs self-authored threads, and persists idempotently so
//! repeated runs never re-fetch already-known content.

pub mod backend;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod normalize;
pub mod target;
pub mod thread;
pub mod view;
