use serde::{Deserialize, Serialize};

use crate::task::UserId;

/// What a counter limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Site,
    Group,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Site => "site",
            EntityKind::Group => "group",
        }
    }
}

/// Whose tasks a counter sees: everyone's, or a single user's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    PerUser(UserId),
}

const GLOBAL_SCOPE: &str = "global";

/// Identity of one counter; doubles as the rate-store key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub kind: EntityKind,
    pub name: String,
    pub scope: Scope,
}

impl CounterKey {
    pub fn new(kind: EntityKind, name: impl Into<String>, scope: Scope) -> Self {
        Self {
            kind,
            name: name.into(),
            scope,
        }
    }

    /// String form for persistence: "kind_name_scope". Names may contain '_'.
    pub fn to_string_key(&self) -> String {
        let scope = match self.scope {
            Scope::Global => GLOBAL_SCOPE.to_string(),
            Scope::PerUser(user) => user.to_string(),
        };
        format!("{}_{}_{}", self.kind.as_str(), self.name, scope)
    }

    /// Parse from persisted string key.
    pub fn from_string_key(s: &str) -> Option<Self> {
        let (kind, rest) = s.split_once('_')?;
        let (name, scope) = rest.rsplit_once('_')?;
        let kind = match kind {
            "site" => EntityKind::Site,
            "group" => EntityKind::Group,
            _ => return None,
        };
        if name.is_empty() {
            return None;
        }
        let scope = if scope == GLOBAL_SCOPE {
            Scope::Global
        } else {
            Scope::PerUser(scope.parse().ok()?)
        };
        Some(Self::new(kind, name, scope))
    }
}
