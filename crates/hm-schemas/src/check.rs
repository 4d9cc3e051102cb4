use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The compliance dimensions that carry a score penalty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CheckName {
    DiskEncryption,
    OsUpdate,
    Antivirus,
    Sleep,
}

impl CheckName {
    pub const ALL: [CheckName; 4] = [
        CheckName::DiskEncryption,
        CheckName::OsUpdate,
        CheckName::Antivirus,
        CheckName::Sleep,
    ];

    /// Wire key as sent by the field agents.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckName::DiskEncryption => "diskEncryption",
            CheckName::OsUpdate => "osUpdate",
            CheckName::Antivirus => "antivirus",
            CheckName::Sleep => "sleep",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "diskEncryption" => Some(CheckName::DiskEncryption),
            "osUpdate" => Some(CheckName::OsUpdate),
            "antivirus" => Some(CheckName::Antivirus),
            "sleep" => Some(CheckName::Sleep),
            _ => None,
        }
    }
}

/// One `{ok, details}` pair. A missing `ok` decodes as `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    #[serde(default)]
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl CheckResult {
    pub fn passing() -> Self {
        Self {
            ok: true,
            details: None,
        }
    }

    pub fn failing(details: impl Into<String>) -> Self {
        Self {
            ok: false,
            details: Some(details.into()),
        }
    }
}

/// Check name -> result. Unknown names are kept verbatim.
///
/// Backed by a `BTreeMap` so iteration and serialization order never depend
/// on the order the agent emitted the keys in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckSet(BTreeMap<String, CheckResult>);

impl CheckSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, result: CheckResult) -> Option<CheckResult> {
        self.0.insert(name.into(), result)
    }

    pub fn get(&self, name: &str) -> Option<&CheckResult> {
        self.0.get(name)
    }

    pub fn known(&self, name: CheckName) -> Option<&CheckResult> {
        self.0.get(name.as_str())
    }

    /// True only when the check is present and reports `ok: true`.
    pub fn passed(&self, name: CheckName) -> bool {
        self.known(name).map(|c| c.ok).unwrap_or(false)
    }

    pub fn unknown_names(&self) -> impl Iterator<Item = &str> {
        self.0
            .keys()
            .map(String::as_str)
            .filter(|k| CheckName::parse(k).is_none())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CheckResult)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, CheckResult)> for CheckSet {
    fn from_iter<I: IntoIterator<Item = (String, CheckResult)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl FromIterator<(CheckName, CheckResult)> for CheckSet {
    fn from_iter<I: IntoIterator<Item = (CheckName, CheckResult)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(n, r)| (n.as_str().to_string(), r))
                .collect(),
        )
    }
}
