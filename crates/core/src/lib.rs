//! Larder Core - Shared types library.
//!
//! This crate provides the types shared by every Larder component:
//! - `storefront` - Cart and checkout engine with its JSON API
//! - `cli` - Command-line tools for migrations and maintenance
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access,
//! no HTTP clients. The optional `postgres` feature adds `sqlx` encoding
//! for the ID newtypes and status enums.
//!
//! # Modules
//!
//! - [`types`] - Typed IDs, money helpers, statuses, emails and addresses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
