//! Entity identifier types.
//!
//! Identifiers are opaque strings. Fresh ones are UUID v4, but anything a
//! backend hands back is accepted as-is.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

/// Discriminates the entity an identifier refers to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A [`crate::Prompt`].
    Prompt,
    /// A [`crate::Collection`].
    Collection,
    /// A [`crate::Tag`].
    Tag,
    /// A [`crate::User`].
    User,
}

impl EntityKind {
    /// Returns the lowercase label used in messages and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prompt => "prompt",
            Self::Collection => "collection",
            Self::Tag => "tag",
            Self::User => "user",
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generates a fresh random identifier.
            #[must_use]
            pub fn random() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Wraps an identifier issued elsewhere.
            ///
            /// # Errors
            ///
            /// Returns [`Error::InvalidId`] when the value is empty or whitespace.
            pub fn new(value: impl Into<String>) -> Result<Self, Error> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(Error::InvalidId {
                        kind: $kind.as_str(),
                    });
                }
                Ok(Self(value))
            }

            /// Returns the entity kind this identifier refers to.
            #[must_use]
            pub const fn kind() -> EntityKind {
                $kind
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value.to_string())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }
    };
}

entity_id!(
    /// Unique identifier of a prompt.
    PromptId,
    EntityKind::Prompt
);
entity_id!(
    /// Unique identifier of a collection.
    CollectionId,
    EntityKind::Collection
);
entity_id!(
    /// Unique identifier of a tag.
    TagId,
    EntityKind::Tag
);
entity_id!(
    /// Unique identifier of a user.
    UserId,
    EntityKind::User
);
