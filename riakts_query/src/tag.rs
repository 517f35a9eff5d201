//! Tag filters: `key=value` constraints, AND-ed within a [`TagSet`] and OR-ed across
//! [`TagSets`].

use std::{collections::BTreeMap, fmt, str::FromStr};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::Error;

/// A single `key=value` constraint on a series' tags.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TagConstraint {
    key: String,
    value: String,
}

impl TagConstraint {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_satisfied_by(&self, tags: &BTreeMap<String, String>) -> bool {
        tags.get(&self.key).is_some_and(|v| *v == self.value)
    }
}

impl FromStr for TagConstraint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok(Self::new(key, value)),
            _ => Err(Error::InvalidTagConstraint(s.to_string())),
        }
    }
}

impl TryFrom<String> for TagConstraint {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TagConstraint> for String {
    fn from(c: TagConstraint) -> Self {
        c.to_string()
    }
}

impl fmt::Display for TagConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Constraints that must all hold for a series to satisfy the set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(Vec<TagConstraint>);

impl TagSet {
    pub fn new(constraints: impl IntoIterator<Item = TagConstraint>) -> Self {
        Self(constraints.into_iter().collect())
    }

    pub fn constraints(&self) -> &[TagConstraint] {
        &self.0
    }

    pub fn is_satisfied_by(&self, tags: &BTreeMap<String, String>) -> bool {
        self.0.iter().all(|c| c.is_satisfied_by(tags))
    }
}

impl FromIterator<TagConstraint> for TagSet {
    fn from_iter<I: IntoIterator<Item = TagConstraint>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.iter().join(" "))
    }
}

/// The tag filter of a query: a series passes if it satisfies any one of the tag sets.
///
/// No tag sets at all places no constraint on tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSets(Vec<TagSet>);

impl TagSets {
    pub fn new(sets: impl IntoIterator<Item = TagSet>) -> Self {
        Self(sets.into_iter().collect())
    }

    /// Parse tag sets from their `key=value` string form, e.g.
    /// `[["hostname=host_0", "region=eu"], ["hostname=host_1"]]`.
    pub fn parse<S: AsRef<str>>(sets: &[Vec<S>]) -> Result<Self, Error> {
        sets.iter()
            .map(|set| {
                set.iter()
                    .map(|c| c.as_ref().parse())
                    .collect::<Result<TagSet, _>>()
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn sets(&self) -> &[TagSet] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_satisfied_by(&self, tags: &BTreeMap<String, String>) -> bool {
        self.0.is_empty() || self.0.iter().any(|set| set.is_satisfied_by(tags))
    }
}

impl FromIterator<TagSet> for TagSets {
    fn from_iter<I: IntoIterator<Item = TagSet>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl fmt::Display for TagSets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.iter().join(" "))
    }
}
