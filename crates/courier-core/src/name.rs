//! Validated subscription and topic names.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::Error;

const MAX_NAME_LEN: usize = 128;

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.:\-]+$").expect("name pattern is valid"));

fn validate(kind: &str, value: &str) -> Result<(), Error> {
    if value.is_empty() || value.len() > MAX_NAME_LEN {
        return Err(Error::InvalidInput(format!(
            "{} must be 1-{} characters",
            kind, MAX_NAME_LEN
        )));
    }
    if !NAME_PATTERN.is_match(value) {
        return Err(Error::InvalidInput(format!(
            "{} '{}' may only contain letters, digits, '_', '.', ':' and '-'",
            kind, value
        )));
    }
    Ok(())
}

macro_rules! validated_name {
    ($(#[$meta:meta])* $ty:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $ty(String);

        impl $ty {
            pub fn new(value: impl Into<String>) -> Result<Self, Error> {
                let value = value.into();
                validate($kind, &value)?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $ty {
            type Error = Error;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

validated_name!(
    /// Scoping identity under which jobs are produced and claimed.
    SubscriptionId,
    "subscription id"
);

validated_name!(
    /// A named channel real-time connections subscribe to.
    Topic,
    "topic"
);

impl Topic {
    /// Build a topic from a prefix and a suffix, e.g. `subscription.` + `S1`.
    pub fn prefixed(prefix: &str, suffix: &str) -> Result<Self, Error> {
        Self::new(format!("{}{}", prefix, suffix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_dotted_names() {
        assert!("orders.eu-west:1".parse::<Topic>().is_ok());
        assert!("agent_42".parse::<SubscriptionId>().is_ok());
    }

    #[test]
    fn rejects_empty_and_oversized() {
        assert!("".parse::<Topic>().is_err());
        assert!("x".repeat(129).parse::<SubscriptionId>().is_err());
        assert!("x".repeat(128).parse::<SubscriptionId>().is_ok());
    }

    #[test]
    fn rejects_whitespace_and_slashes() {
        assert!("two words".parse::<Topic>().is_err());
        assert!("a/b".parse::<SubscriptionId>().is_err());
    }

    #[test]
    fn deserialization_validates() {
        let ok: Result<Topic, _> = serde_json::from_str("\"notifications\"");
        assert!(ok.is_ok());
        let bad: Result<Topic, _> = serde_json::from_str("\"no spaces\"");
        assert!(bad.is_err());
    }

    #[test]
    fn prefixed_topic() {
        let topic = Topic::prefixed("subscription.", "S1").unwrap();
        assert_eq!(topic.as_str(), "subscription.S1");
    }
}
