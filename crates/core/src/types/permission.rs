//! Role-based permission matrix and evaluator.
//!
//! Each [`Role`] maps to a fixed set of boolean [`Capabilities`]. A permission
//! check is a pure lookup: a missing role or an ungranted flag is a denial, never
//! an error. The matrix is built once at startup and only read afterwards.
//!
//! ```rust
//! use cartgate_core::{Mode, Permission, PermissionMatrix, Role};
//!
//! let matrix = PermissionMatrix::default();
//!
//! assert!(matrix.authorize(Some(Role::Admin), &[Permission::ManageOrders], Mode::All));
//! assert!(!matrix.authorize(Some(Role::Customer), &[Permission::ManageOrders], Mode::All));
//! assert!(!matrix.authorize(None, &[Permission::ViewAccount], Mode::Any));
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::role::Role;

/// A single capability a protected operation can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Read and change one's own cart.
    ManageOwnCart,
    /// Read one's own account summary.
    ViewAccount,
    /// Read any customer's cart.
    ViewCustomerCarts,
    /// Modify or empty any customer's cart.
    ManageCustomerCarts,
    /// Edit, refund and fulfil orders.
    ManageOrders,
    /// Edit the product catalog.
    ManageProducts,
    /// Create users and change roles.
    ManageUsers,
    /// Read sales and traffic analytics.
    ViewAnalytics,
}

/// How a list of required permissions is combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Every listed permission must be granted.
    #[default]
    All,
    /// At least one listed permission must be granted.
    Any,
}

/// Boolean grant flags for one role.
///
/// Flags left out of a matrix file default to `false`; unknown flag names are
/// rejected when the file is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    pub manage_own_cart: bool,
    pub view_account: bool,
    pub view_customer_carts: bool,
    pub manage_customer_carts: bool,
    pub manage_orders: bool,
    pub manage_products: bool,
    pub manage_users: bool,
    pub view_analytics: bool,
}

impl Capabilities {
    /// Every flag granted.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            manage_own_cart: true,
            view_account: true,
            view_customer_carts: true,
            manage_customer_carts: true,
            manage_orders: true,
            manage_products: true,
            manage_users: true,
            view_analytics: true,
        }
    }

    /// Whether this capability set grants `permission`.
    #[must_use]
    pub const fn grants(&self, permission: Permission) -> bool {
        match permission {
            Permission::ManageOwnCart => self.manage_own_cart,
            Permission::ViewAccount => self.view_account,
            Permission::ViewCustomerCarts => self.view_customer_carts,
            Permission::ManageCustomerCarts => self.manage_customer_carts,
            Permission::ManageOrders => self.manage_orders,
            Permission::ManageProducts => self.manage_products,
            Permission::ManageUsers => self.manage_users,
            Permission::ViewAnalytics => self.view_analytics,
        }
    }
}

/// Process-wide role to capability table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionMatrix {
    roles: HashMap<Role, Capabilities>,
}

impl PermissionMatrix {
    /// Build a matrix from explicit role grants.
    #[must_use]
    pub const fn new(roles: HashMap<Role, Capabilities>) -> Self {
        Self { roles }
    }

    /// Parse a matrix from JSON of the form `{"admin": {"manage_orders": true}}`.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed JSON, unknown role names or unknown
    /// capability names.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Capabilities of `role`, if the matrix lists it.
    #[must_use]
    pub fn capabilities(&self, role: Role) -> Option<&Capabilities> {
        self.roles.get(&role)
    }

    /// Decide whether `role` may perform an operation requiring `permissions`.
    ///
    /// An absent role (unauthenticated caller) is always denied. With
    /// [`Mode::All`] an empty permission list is granted to any present role;
    /// with [`Mode::Any`] it is denied.
    #[must_use]
    pub fn authorize(&self, role: Option<Role>, permissions: &[Permission], mode: Mode) -> bool {
        let Some(capabilities) = role.and_then(|r| self.roles.get(&r)) else {
            return false;
        };

        match mode {
            Mode::All => permissions.iter().all(|p| capabilities.grants(*p)),
            Mode::Any => permissions.iter().any(|p| capabilities.grants(*p)),
        }
    }
}

impl Default for PermissionMatrix {
    fn default() -> Self {
        let admin = Capabilities {
            manage_users: false,
            ..Capabilities::all()
        };
        let viewer = Capabilities {
            view_account: true,
            view_customer_carts: true,
            view_analytics: true,
            ..Capabilities::default()
        };
        let customer = Capabilities {
            manage_own_cart: true,
            view_account: true,
            ..Capabilities::default()
        };

        Self::new(HashMap::from([
            (Role::SuperAdmin, Capabilities::all()),
            (Role::Admin, admin),
            (Role::Viewer, viewer),
            (Role::Customer, customer),
        ]))
    }
}
