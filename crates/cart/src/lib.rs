//! PycShop Cart Service library.
//!
//! This crate provides the cart service functionality as a library,
//! allowing it to be tested and reused.
//!
//! # Architecture
//!
//! - [`cache`] - Fast cart cache (moka, sliding 7-day TTL), the primary
//!   read/write path for live traffic
//! - [`db`] - Durable cart store (`PostgreSQL`), source of truth when the
//!   cache is cold
//! - [`sync`] - Partitioned sync event bus, reconciliation consumer, and
//!   the periodic pending-sync sweep
//! - [`routes`] - Cart operations HTTP API (axum)
//!
//! A client mutation updates the cache synchronously and returns; the user
//! is marked pending-sync and an event is published to the bus. The
//! reconciliation consumer (or the sweep) later re-reads the live cache and
//! writes it into `PostgreSQL` inside one transaction.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod sync;
