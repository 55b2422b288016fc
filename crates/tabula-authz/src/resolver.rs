//! Effective-permission resolution for a requesting identity.
//!
//! # Purpose
//! Combines the table walk with the one identity-level rule that bypasses
//! tables entirely: a game master owns everything.
use crate::permission::{Permission, PermissionTable};
use serde::{Deserialize, Serialize};

/// Identity on whose behalf a permission question is asked.
///
/// ```rust
/// use tabula_authz::Requester;
///
/// let gm = Requester::game_master("u0");
/// assert!(gm.gm);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub id: String,
    /// Unconditional elevated role; resolves to `Owner` on every document.
    pub gm: bool,
}

impl Requester {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            gm: false,
        }
    }

    pub fn game_master(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            gm: true,
        }
    }
}

/// Resolve the requester's own permission for `field`.
pub fn get_permission(table: &PermissionTable, requester: &Requester, field: &str) -> Permission {
    get_permission_as(table, requester, &requester.id, field)
}

/// Resolve the permission a given source id holds for `field`, on behalf of
/// `requester`. The game-master bypass applies before any table lookup.
pub fn get_permission_as(
    table: &PermissionTable,
    requester: &Requester,
    id: &str,
    field: &str,
) -> Permission {
    if requester.gm {
        return Permission::Owner;
    }
    table.resolve(id, field)
}

/// Threshold check over [`get_permission_as`].
pub fn has_permission(
    table: &PermissionTable,
    requester: &Requester,
    id: &str,
    field: &str,
    threshold: Permission,
) -> bool {
    get_permission_as(table, requester, id, field) >= threshold
}
