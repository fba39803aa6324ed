//! Cartgate Core - Shared types library.
//!
//! This crate provides the types shared by every Cartgate component:
//! - `storefront` - HTTP service (session gate, carts, guest cart claiming)
//! - `cli` - Command-line tools for migrations, users and tokens
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no database
//! access, no HTTP. The permission evaluator and the cart merge live here because
//! both are total functions over plain data.
//!
//! # Modules
//!
//! - [`types`] - Type-safe IDs, roles, the permission matrix, cart items, emails

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
