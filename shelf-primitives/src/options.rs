//! Sort and view options.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Ordering applied to the visible prompt list.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOption {
    /// Most recently created first.
    #[default]
    Newest,
    /// Oldest created first.
    Oldest,
    /// By title.
    Alphabetical,
    /// Most recently updated first.
    Updated,
}

impl SortOption {
    /// Returns the wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Newest => "newest",
            Self::Oldest => "oldest",
            Self::Alphabetical => "alphabetical",
            Self::Updated => "updated",
        }
    }
}

impl Display for SortOption {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortOption {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newest" => Ok(Self::Newest),
            "oldest" => Ok(Self::Oldest),
            "alphabetical" => Ok(Self::Alphabetical),
            "updated" => Ok(Self::Updated),
            other => Err(Error::validation(
                "sort option",
                format!("unknown sort option `{other}`"),
            )),
        }
    }
}

/// Presentation hint for the prompt list.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    /// Card grid.
    #[default]
    Grid,
    /// Compact list.
    List,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sort_labels() {
        assert_eq!("Updated".parse::<SortOption>().unwrap(), SortOption::Updated);
        assert!("random".parse::<SortOption>().is_err());
    }

    #[test]
    fn defaults_match_a_fresh_library() {
        assert_eq!(SortOption::default(), SortOption::Newest);
        assert_eq!(ViewMode::default(), ViewMode::Grid);
    }
}
