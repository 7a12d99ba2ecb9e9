//! Strongly-typed identifiers used across the domain.
//!
//! Every id is a UUIDv7 newtype: time-ordered, serde-transparent, and
//! impossible to mix up across entity kinds at compile time.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $t:ident) => {
        $(#[$doc])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(Uuid);

        impl $t {
            /// Mint a fresh time-ordered identifier. Tests that need
            /// determinism should construct ids explicitly instead.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::from_str(s)
                    .map(Self)
                    .map_err(|e| {
                        DomainError::invalid_id(format!(concat!(stringify!($t), ": {}"), e))
                    })
            }
        }
    };
}

uuid_id! {
    /// Identifier of an organization (multi-tenant boundary).
    ///
    /// A job's `organization_id` never changes after creation; every access
    /// check in the orchestration subsystem keys off this id.
    TenantId
}

uuid_id! {
    /// Identifier of a user (actor identity).
    UserId
}

uuid_id! {
    /// Identifier of an inspection (the entity that owns analysis jobs).
    InspectionId
}

uuid_id! {
    /// Identifier of an inspection photo.
    PhotoId
}

uuid_id! {
    /// Identifier of a background job.
    JobId
}
