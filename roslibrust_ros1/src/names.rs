//! ROS graph resource name validation and resolution.
//!
//! A `Name` is always fully resolved (starts with `/`) once constructed;
//! relative names are resolved against a namespace at construction time.

use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;

use crate::error::{Ros1Error, Result};

lazy_static! {
    static ref COMPONENT_RE: Regex = Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]*$").unwrap();
}

/// A validated, fully-resolved ROS graph resource name, e.g. `/robot/chatter`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(String);

impl Name {
    /// Validates and wraps an already-global name (must start with `/`).
    pub fn new(raw: &str) -> Result<Self> {
        if !raw.starts_with('/') {
            return Err(Ros1Error::InvalidName(format!(
                "name {raw:?} is not global (must start with '/')"
            )));
        }
        Self::validate_components(raw)?;
        Ok(Self(raw.to_owned()))
    }

    /// Resolves `raw` against `namespace` if it is relative (does not start
    /// with `/` or `~`), otherwise validates it as already-global.
    pub fn resolve(raw: &str, namespace: &str) -> Result<Self> {
        if raw.starts_with('/') {
            return Self::new(raw);
        }
        if raw.starts_with('~') {
            return Err(Ros1Error::InvalidName(format!(
                "private names (~name) are not resolvable without a node name: {raw:?}"
            )));
        }
        let ns = namespace.trim_end_matches('/');
        let joined = format!("{ns}/{raw}");
        Self::new(&joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate_components(raw: &str) -> Result<()> {
        let body = raw.trim_start_matches('/');
        if body.is_empty() {
            // "/" alone names the root namespace, which is valid.
            return Ok(());
        }
        for component in body.split('/') {
            if component.is_empty() {
                return Err(Ros1Error::InvalidName(format!(
                    "name {raw:?} has an empty path component"
                )));
            }
            if !COMPONENT_RE.is_match(component) {
                return Err(Ros1Error::InvalidName(format!(
                    "name {raw:?} has an invalid path component {component:?}"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for Name {
    type Error = Ros1Error;
    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<String> for Name {
    type Error = Ros1Error;
    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accepts_simple_global_name() {
        assert!(Name::new("/chatter").is_ok());
        assert!(Name::new("/robot/chatter").is_ok());
    }

    #[test]
    fn rejects_relative_name() {
        assert!(Name::new("chatter").is_err());
    }

    #[test]
    fn rejects_empty_component() {
        assert!(Name::new("/robot//chatter").is_err());
    }

    #[test]
    fn rejects_leading_digit_component() {
        assert!(Name::new("/1robot").is_err());
    }

    #[test]
    fn resolves_relative_against_namespace() {
        let n = Name::resolve("chatter", "/robot").unwrap();
        assert_eq!(n.as_str(), "/robot/chatter");
    }

    #[test]
    fn resolve_passes_through_already_global() {
        let n = Name::resolve("/chatter", "/robot").unwrap();
        assert_eq!(n.as_str(), "/chatter");
    }

    #[test]
    fn root_namespace_is_valid() {
        assert!(Name::new("/").is_ok());
    }
}
