//! Shared types for the deaddrop one-shot relay.
//!
//! This crate holds everything both deployables agree on:
//! - Configuration structures and their defaults
//! - Filename sanitization (the same rules apply on upload and download)
//! - Download token generation
//! - `Content-Disposition` rendering for attachment responses

pub mod config;
pub mod disposition;
pub mod filename;
pub mod query;
pub mod token;
