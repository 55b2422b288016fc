//! Permission primitives shared by documents and the sync client.
//!
//! # Purpose
//! Centralizes the per-document permission model: ordered permission levels,
//! source/field permission tables, and the inheritance resolver that turns a
//! partially-specified table into an effective permission.
//!
//! # How it fits
//! Every synchronized document carries a permission table. The client consults
//! the resolver before rendering or offering edits on a field; the authority
//! applies the same model when filtering reads, so both sides must agree on
//! the fallback order exactly.
//!
//! # Key invariants
//! - `Inherit < None < Read < Write < Owner` is a total order.
//! - Resolution always terminates: `Inherit` at the wildcard/wildcard cell is
//!   the base case and resolves to `None`.
//! - Per-source entries fall back to the wildcard source and per-field entries
//!   fall back to the wildcard field independently; swapping that order changes
//!   the meaning of partially-specified tables.
//!
//! # Examples
//! ```rust
//! use tabula_authz::{Permission, PermissionTable, Requester, get_permission};
//!
//! let mut table = PermissionTable::new();
//! table.grant("u1", "hp", Permission::Write);
//! table.grant("*", "*", Permission::Read);
//!
//! let alice = Requester::user("u1");
//! assert_eq!(get_permission(&table, &alice, "hp"), Permission::Write);
//! assert_eq!(get_permission(&table, &alice, "notes"), Permission::Read);
//! ```

mod errors;
mod permission;
mod resolver;

pub use errors::{AuthzError, AuthzResult};
pub use permission::{Permission, PermissionTable, WILDCARD};
pub use resolver::{Requester, get_permission, get_permission_as, has_permission};
