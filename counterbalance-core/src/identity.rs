//! Identity types for counterbalance entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Defines a typed UUIDv7 identifier so assignment and result ids
/// cannot be mixed up at call sites.
macro_rules! define_entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
        #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new timestamp-sortable id.
            pub fn now_v7() -> Self {
                Self(Uuid::now_v7())
            }

            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_entity_id!(
    /// Identifier of an assignment record. Survives reclamation.
    AssignmentId
);

define_entity_id!(
    /// Identifier of a stored results submission.
    ResultId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_time_ordered() {
        let a = AssignmentId::now_v7();
        let b = AssignmentId::now_v7();
        assert!(a <= b);
    }

    #[test]
    fn test_parse_round_trips_display() -> Result<(), uuid::Error> {
        let id = ResultId::now_v7();
        let parsed: ResultId = id.to_string().parse()?;
        assert_eq!(parsed, id);
        Ok(())
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("not-a-uuid".parse::<AssignmentId>().is_err());
    }

    #[test]
    fn test_serializes_as_plain_string() -> Result<(), serde_json::Error> {
        let id = AssignmentId::from_uuid(Uuid::nil());
        let json = serde_json::to_string(&id)?;
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000000\"");
        Ok(())
    }
}
