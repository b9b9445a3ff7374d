//! Core type definitions with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// Invalid aggregation period value.
    #[error("invalid period: {value}")]
    InvalidPeriod { value: String },
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                Ok(Self(id))
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// A validated editor instance identifier.
    ///
    /// Every running editor process picks its own ID and sends it with each
    /// event. Only one client is considered active at a time.
    ClientId, "client ID"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_rejects_empty() {
        assert_eq!(
            ClientId::new("").unwrap_err(),
            ValidationError::Empty { field: "client ID" }
        );
        assert!(ClientId::new("nvim-4242").is_ok());
    }

    #[test]
    fn client_id_serde_rejects_empty() {
        let result: Result<ClientId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }

    #[test]
    fn client_id_serializes_as_plain_string() {
        let id = ClientId::new("nvim-1").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"nvim-1\"");
        assert_eq!(id.to_string(), "nvim-1");
        let s: &str = id.as_ref();
        assert_eq!(s, "nvim-1");
    }
}
