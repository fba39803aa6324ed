//! Business logic services for storefront.
//!
//! # Services
//!
//! - `token` - Signed session tokens (issue and validate)
//! - `auth` - Password login
//! - `cart` - Guest and user cart mutations
//! - `claims` - Merging a guest cart into the user cart after login

pub mod auth;
pub mod cart;
pub mod claims;
pub mod token;
