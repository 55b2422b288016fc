//! Permission levels and per-document permission tables.
//!
//! # Purpose
//! Defines the ordered permission enum and the two-level source/field table
//! attached to every synchronized document.
//!
//! # Key invariants
//! - The integer wire encoding (`0..=4`) matches the declaration order, so the
//!   derived `Ord` is the permission ordering.
//! - Table keys are raw source/field strings; the wildcard `"*"` means "all
//!   other sources" or "all fields" respectively.
use crate::errors::AuthzError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Source or field key matching every entry not covered by a specific one.
pub const WILDCARD: &str = "*";

/// Effective access level for a source/field pair.
///
/// ```rust
/// use tabula_authz::Permission;
///
/// assert!(Permission::Read < Permission::Write);
/// assert!(Permission::Inherit < Permission::None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Permission {
    /// Defer to the wildcard source; resolves to `None` at the base case.
    Inherit = 0,
    None = 1,
    Read = 2,
    Write = 3,
    Owner = 4,
}

impl From<Permission> for u8 {
    fn from(value: Permission) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for Permission {
    type Error = AuthzError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Permission::Inherit),
            1 => Ok(Permission::None),
            2 => Ok(Permission::Read),
            3 => Ok(Permission::Write),
            4 => Ok(Permission::Owner),
            other => Err(AuthzError::InvalidPermission(other)),
        }
    }
}

/// Per-document permission table: source id (or `"*"`) to field scope
/// (or `"*"`) to permission level.
///
/// ```rust
/// use tabula_authz::{Permission, PermissionTable};
///
/// let mut table = PermissionTable::new();
/// table.grant("*", "*", Permission::Read);
/// assert_eq!(table.resolve("anyone", "anything"), Permission::Read);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionTable(BTreeMap<String, BTreeMap<String, Permission>>);

impl PermissionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a permission for a source/field pair, replacing any previous
    /// value for that exact cell.
    pub fn grant(
        &mut self,
        source: impl Into<String>,
        field: impl Into<String>,
        permission: Permission,
    ) {
        self.0
            .entry(source.into())
            .or_default()
            .insert(field.into(), permission);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Walk the table for a source/field pair, resolving `Inherit` through the
    /// wildcard source. The fallback is asymmetric: an absent source falls
    /// back to the wildcard source, an absent field falls back to the wildcard
    /// field, and only a resolved `Inherit` restarts the walk at the wildcard
    /// source.
    pub fn resolve(&self, id: &str, field: &str) -> Permission {
        let permission = match self.0.get(id).or_else(|| self.0.get(WILDCARD)) {
            Some(scope) => scope
                .get(field)
                .or_else(|| scope.get(WILDCARD))
                .copied()
                .unwrap_or(Permission::Inherit),
            None => Permission::Inherit,
        };
        if permission == Permission::Inherit {
            // Base case: the wildcard source cannot inherit from anything.
            if id == WILDCARD {
                Permission::None
            } else {
                self.resolve(WILDCARD, field)
            }
        } else {
            permission
        }
    }
}
