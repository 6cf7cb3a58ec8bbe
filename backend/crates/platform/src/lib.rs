//! Platform Crate - Technical Infrastructure
//!
//! This crate provides shared technical foundations:
//! - Client identification (IP extraction, User-Agent fingerprinting)
//! - Hashing utilities (SHA-256)
//! - Injectable clock for deterministic time handling
//! - TTL-bounded in-process cache

pub mod cache;
pub mod client;
pub mod clock;
pub mod crypto;
