//! Core types for Cartgate.

pub mod cart;
pub mod email;
pub mod id;
pub mod permission;
pub mod role;

pub use cart::{CartItem, add_quantity, item_count, merge_items, set_quantity};
pub use email::{Email, EmailError};
pub use id::*;
pub use permission::{Capabilities, Mode, Permission, PermissionMatrix};
pub use role::{Role, RoleParseError};
