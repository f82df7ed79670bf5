//! Prefixed random-token identifiers.
//!
//! IDs are `{prefix}-{hex}` where `hex` is 32 lowercase hex characters
//! (16 random bytes) drawn from a v4 UUID's simple representation. This
//! keeps the `uuid` crate as the sole source of randomness rather than
//! adding a dependency dedicated to ID generation.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a random hex token with the given type prefix, e.g. `run-<32 hex>`.
pub fn generate(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

/// Defines a newtype identifier with a fixed string prefix.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Generates a new random id with this type's prefix.
            pub fn new() -> Self {
                Self(generate($prefix))
            }

            /// Wraps an existing string without validating its prefix.
            ///
            /// Used when parsing an id that arrived over the wire or from a
            /// path parameter; a malformed id simply won't be found in the
            /// registry, which already yields the right `NotFound` behavior.
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

define_id!(
    /// Identifies a single agent workflow execution.
    RunId,
    "run"
);
define_id!(
    /// Identifies a plan awaiting approval, scoped to its run.
    PlanId,
    "plan"
);
define_id!(
    /// Identifies a tool invocation reported by a hook program.
    ToolCallId,
    "tool"
);
