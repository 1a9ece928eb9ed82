//! Strongly-typed identifiers.
//!
//! All IDs are validated at construction time and implement common traits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to define a strongly-typed ID newtype wrapper.
///
/// Generates: struct, `from_string()`, `as_str()`, Display, Serialize, Deserialize.
/// With a `uuid` prefix it also generates `new()` (prefixed UUID v4) and `Default`.
macro_rules! define_id {
    ($name:ident, uuid = $prefix:literal) => {
        define_id!($name);

        impl $name {
            pub fn new() -> Self {
                Self(format!(concat!($prefix, "-{}"), uuid::Uuid::new_v4()))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.trim().is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = &'static str;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::from_string(s)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = &'static str;

            fn try_from(s: &str) -> Result<Self, Self::Error> {
                Self::from_string(s.to_string())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(ProcessId);
define_id!(TaskId, uuid = "task");

impl From<&TaskId> for ProcessId {
    /// A task is registered in the ledger under its own id.
    fn from(id: &TaskId) -> Self {
        ProcessId(id.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ids_rejected() {
        assert!(ProcessId::from_string(String::new()).is_err());
        assert!(ProcessId::try_from("   ").is_err());
        assert_eq!(ProcessId::try_from("p1").unwrap().as_str(), "p1");
    }

    #[test]
    fn test_task_ids_are_prefixed_and_unique() {
        let a = TaskId::new();
        let b = TaskId::new();
        assert!(a.as_str().starts_with("task-"));
        assert_ne!(a, b);
        assert_eq!(ProcessId::from(&a).as_str(), a.as_str());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: ProcessId = serde_json::from_str("\"worker-1\"").unwrap();
        assert_eq!(ok.to_string(), "worker-1");
        assert!(serde_json::from_str::<ProcessId>("\"\"").is_err());
    }
}
