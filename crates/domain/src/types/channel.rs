//! Real-time channel addressing

use std::fmt;

use serde::{Deserialize, Serialize};

/// Addressable real-time channel
///
/// Renders as `group_<id>`, `user_<id>` or `neighbourhood_<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Channel {
    Group(String),
    User(String),
    Neighbourhood(String),
}

impl Channel {
    pub fn group(id: impl Into<String>) -> Self {
        Self::Group(id.into())
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self::User(id.into())
    }

    pub fn neighbourhood(id: impl Into<String>) -> Self {
        Self::Neighbourhood(id.into())
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Group(_) => "group",
            Self::User(_) => "user",
            Self::Neighbourhood(_) => "neighbourhood",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Group(id) | Self::User(id) | Self::Neighbourhood(id) => id,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.prefix(), self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_naming_convention() {
        assert_eq!(Channel::group("G1").to_string(), "group_G1");
        assert_eq!(Channel::user("u7").to_string(), "user_u7");
        assert_eq!(Channel::neighbourhood("n2").to_string(), "neighbourhood_n2");
    }
}
