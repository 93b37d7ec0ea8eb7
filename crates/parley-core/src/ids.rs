//! Branded ID newtypes for type safety.
//!
//! Each kind of identifier in the server is a distinct newtype around
//! `String`, so a user ID can never be passed where a connection ID is
//! expected. Connection IDs are generated as UUID v7 (time-ordered);
//! user IDs come from verified credentials and room names from clients.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate a new UUID v7 string (time-ordered).
fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Unique identifier for one connected channel. No two live
    /// connections share an ID.
    ConnectionId
}

branded_id! {
    /// Identifier of an authenticated user, taken from the verified
    /// credential's subject claim.
    UserId
}

branded_id! {
    /// Name of a room. Rooms are created lazily on first join; a user's
    /// personal room is named after their [`UserId`].
    RoomName
}

impl From<&UserId> for RoomName {
    /// The personal room for a user is keyed by the user ID itself.
    fn from(user_id: &UserId) -> Self {
        Self(user_id.as_str().to_owned())
    }
}
