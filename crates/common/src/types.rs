use thiserror::Error;
use uuid::Uuid;

/// Rejected identifier construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("{kind} must not be the nil UUID")]
    Nil { kind: &'static str },

    #[error("{kind} is not a valid UUID: {value}")]
    Malformed { kind: &'static str, value: String },
}

/// Declares a UUID-backed identifier newtype.
///
/// Each generated type is distinct, so a `CartId` can never be passed where a
/// `ProductId` is expected even when both wrap the same value. Construction
/// from an existing value goes through [`TryFrom<Uuid>`] (or [`FromStr`]) and
/// rejects the nil UUID; deserialization runs the same check.
///
/// The invoking crate must depend on `serde` and `uuid`.
///
/// [`FromStr`]: std::str::FromStr
#[macro_export]
macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            ::serde::Serialize,
            ::serde::Deserialize,
        )]
        #[serde(try_from = "uuid::Uuid", into = "uuid::Uuid")]
        pub struct $name(::uuid::Uuid);

        impl $name {
            /// Generates a fresh random identifier.
            pub fn new() -> Self {
                Self(::uuid::Uuid::new_v4())
            }

            /// Returns the wrapped UUID.
            pub fn as_uuid(&self) -> ::uuid::Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ::std::convert::TryFrom<::uuid::Uuid> for $name {
            type Error = $crate::IdError;

            fn try_from(value: ::uuid::Uuid) -> ::std::result::Result<Self, Self::Error> {
                if value.is_nil() {
                    return Err($crate::IdError::Nil {
                        kind: stringify!($name),
                    });
                }
                Ok(Self(value))
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                let value = ::uuid::Uuid::parse_str(s.trim()).map_err(|_| {
                    $crate::IdError::Malformed {
                        kind: stringify!($name),
                        value: s.to_string(),
                    }
                })?;
                Self::try_from(value)
            }
        }

        impl From<$name> for ::uuid::Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

typed_id!(
    /// Unique identifier of a single domain event occurrence.
    ///
    /// Doubles as the message id on the wire, which is what consumers
    /// deduplicate on.
    EventId
);

typed_id!(
    /// Identifier tying together every message produced on behalf of one
    /// inbound request.
    CorrelationId
);

impl CorrelationId {
    /// Uses the caller-supplied id when present, otherwise starts a new chain.
    pub fn propagate_or_new(existing: Option<CorrelationId>) -> Self {
        existing.unwrap_or_default()
    }
}
