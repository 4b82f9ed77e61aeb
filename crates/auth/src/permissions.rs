use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Marker granting every permission when present in a permission list.
pub const WILDCARD: &str = "*";

/// Permission name.
///
/// Permissions are opaque strings issued by the back office
/// (e.g. `"view_customers"`, `"approve_loans"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub const fn wildcard() -> Self {
        Self(Cow::Borrowed(WILDCARD))
    }

    /// Permission name for an action on a resource: `{action}_{resource}`.
    pub fn for_action(resource: &str, action: &str) -> Self {
        Self(Cow::Owned(format!(
            "{}_{}",
            action.trim().to_ascii_lowercase(),
            resource.trim().to_ascii_lowercase()
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == WILDCARD
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Permission {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Permission {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
