// Subscription registry: the fixed set of source accounts being mirrored.
//
// Loaded once at startup. It drives three things: the filter rule
// expression, the display name used in composed text, and whether a
// referenced post's author counts as "subscribed" for threading decisions.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::twitter::post::Author;

/// One subscribed account: its unique handle and the name shown downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub username: String,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct Subscriptions {
    /// Kept in file order so the generated rule is reproducible.
    entries: Vec<Subscription>,
    index: HashMap<String, usize>,
}

impl Subscriptions {
    pub fn new(entries: impl IntoIterator<Item = Subscription>) -> Self {
        let mut registry = Self::default();
        for entry in entries {
            match registry.index.get(&entry.username) {
                // A repeated handle replaces the earlier display name in place.
                Some(&i) => registry.entries[i] = entry,
                None => {
                    registry
                        .index
                        .insert(entry.username.clone(), registry.entries.len());
                    registry.entries.push(entry);
                }
            }
        }
        registry
    }

    /// Read a JSON list of `{"username": ..., "name": ...}` objects.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read subscriptions from {}", path.display()))?;
        let entries: Vec<Subscription> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse subscriptions in {}", path.display()))?;
        Ok(Self::new(entries))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.username.as_str())
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.index.contains_key(handle)
    }

    pub fn display_name(&self, handle: &str) -> Option<&str> {
        self.index
            .get(handle)
            .map(|&i| self.entries[i].name.as_str())
    }

    /// Whether this author is one of ours. A missing author is never subscribed.
    pub fn is_subscribed(&self, author: Option<&Author>) -> bool {
        author.is_some_and(|a| self.contains(&a.username))
    }

    /// Name to show for an author: registry name, then the platform display
    /// name, then the bare handle.
    pub fn author_name(&self, author: &Author) -> String {
        self.display_name(&author.username)
            .map(str::to_string)
            .or_else(|| author.name.clone())
            .unwrap_or_else(|| author.username.clone())
    }
}
