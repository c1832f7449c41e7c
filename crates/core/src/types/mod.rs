//! Core types for Larder.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod address;
pub mod email;
pub mod id;
pub mod money;
pub mod status;

pub use address::{Address, AddressError, AddressInput, AddressKind};
pub use email::{Email, EmailError};
pub use id::*;
pub use money::{CurrencyCode, MoneyError};
pub use status::*;
