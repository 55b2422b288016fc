// Shared data types and small helpers used across crates.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tabula_authz::PermissionTable;
use tabula_patch::{ChangeOp, ChangeSet};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid id: {0}")]
    InvalidId(String),
}

pub mod ids {
    // Strongly typed IDs to avoid mixing namespaces at compile time.
    use super::{Error, Result};
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use std::str::FromStr;
    use uuid::Uuid;

    macro_rules! id_type {
        ($name:ident) => {
            #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
            pub struct $name(Uuid);

            impl $name {
                // Generate a new random ID for this namespace.
                pub fn new() -> Self {
                    Self(Uuid::new_v4())
                }

                // Wrap an existing UUID when decoding from the wire.
                pub fn from_uuid(uuid: Uuid) -> Self {
                    Self(uuid)
                }

                // Expose the underlying UUID for interoperability.
                pub fn as_uuid(&self) -> Uuid {
                    self.0
                }

                // Sentinel nil ID; never a valid document address.
                pub fn nil() -> Self {
                    Self(Uuid::nil())
                }

                // The nil ID is never a valid document address; passing it to
                // a resolver is a programmer error.
                pub fn is_nil(&self) -> bool {
                    self.0.is_nil()
                }
            }

            impl Default for $name {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl FromStr for $name {
                type Err = Error;

                fn from_str(input: &str) -> Result<Self> {
                    // Preserve the original input for clearer error messages.
                    let uuid =
                        Uuid::parse_str(input).map_err(|_| Error::InvalidId(input.into()))?;
                    Ok(Self(uuid))
                }
            }
        };
    }

    id_type!(EntityId);
    id_type!(UserId);
}

pub use ids::{EntityId, UserId};

/// A permissioned document: the unit of synchronization.
///
/// `permissions` is a required field by construction — a wire document missing
/// it fails deserialization rather than defaulting, since a document without a
/// permission table cannot be rendered safely at all. Every other field lives
/// in the flattened `data` mapping and is addressed by dotted paths.
///
/// ```
/// use serde_json::json;
/// use tabula_common::Entry;
///
/// let entry: Entry = serde_json::from_value(json!({
///     "id": "6b7e6d2e-8f5a-4f44-9464-91e5a7a0c2a1",
///     "name": "Mordecai",
///     "permissions": {"*": {"*": 2}},
///     "hp": 10,
/// })).expect("decode");
/// assert_eq!(entry.data["hp"], json!(10));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntityId,
    pub name: String,
    pub permissions: PermissionTable,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Entry {
    pub fn new(id: EntityId, name: impl Into<String>, permissions: PermissionTable) -> Self {
        Self {
            id,
            name: name.into(),
            permissions,
            data: Map::new(),
        }
    }

    /// Merge a change descriptor into this document in place.
    ///
    /// Paths address the full flattened document, so `name` and nested `data`
    /// fields are reachable alike. A descriptor that would produce a document
    /// violating the model (e.g. unsetting `permissions`) is discarded whole,
    /// with a log line; the authority never sends one.
    pub fn apply_changes(
        &mut self,
        changes: &ChangeSet,
        observer: Option<&mut dyn FnMut(ChangeOp, &str, &Value)>,
    ) {
        let Ok(mut doc) = serde_json::to_value(&*self) else {
            return;
        };
        changes.apply(&mut doc, observer);
        match serde_json::from_value::<Entry>(doc) {
            Ok(updated) => *self = updated,
            Err(error) => tracing::warn!(
                entry = %self.id,
                %error,
                "change descriptor produced an invalid document; keeping previous state"
            ),
        }
    }
}
