use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

pub mod domain;
pub mod dto;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("A resource name cannot be empty")]
pub struct EmptyResourceName;

/// Identifier of a trackable resource, as the cluster names it (`cpu`,
/// `memory`, `nvidia.com/gpu`, ...). Compared by exact string match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceName(String);

impl ResourceName {
    pub fn as_str(&self) -> &str { &self.0 }
}

impl FromStr for ResourceName {
    type Err = EmptyResourceName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(EmptyResourceName);
        }
        Ok(ResourceName(trimmed.to_string()))
    }
}

impl Borrow<str> for ResourceName {
    fn borrow(&self) -> &str { &self.0 }
}

impl fmt::Display for ResourceName {
    #[inline(always)]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
