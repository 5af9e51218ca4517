//! PycShop Core - Shared types library.
//!
//! This crate provides common types used across the PycShop services:
//! - `cart` - Cart service (cache + durable store + reconciliation)
//! - other services (auth, orders, products) share the same IDs at their
//!   boundaries
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access, no HTTP
//! clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs and prices

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
