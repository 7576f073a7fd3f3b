//! Change-feed types
//!
//! A [`ChangeEvent`] is produced by the storage layer for one collection and
//! consumed once per registered listener.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Interned collection name
///
/// Cloning is a reference-count bump, so the name can key registries and
/// travel with every event cheaply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionName(Arc<str>);

impl CollectionName {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CollectionName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for CollectionName {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl Borrow<str> for CollectionName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CollectionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Kind of change reported by the feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
    Replace,
}

impl OperationKind {
    /// Every kind a subscription is filtered to
    pub const ALL: [OperationKind; 4] = [Self::Insert, Self::Update, Self::Delete, Self::Replace];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Replace => "replace",
        }
    }

    /// `true` when the event carries the full document
    pub fn carries_document(&self) -> bool {
        matches!(self, Self::Insert | Self::Replace)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque position marker in a change feed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResumeToken(String);

impl ResumeToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the changed document (the `_id` value)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentKey(String);

impl DocumentKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// One change observed on a watched collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub collection: CollectionName,
    pub operation: OperationKind,
    pub resume_token: ResumeToken,
    pub document_key: DocumentKey,
    /// Present for insert and replace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_document: Option<Value>,
    /// Changed fields (update only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_fields: Option<Map<String, Value>>,
    /// Removed field names (update only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_fields: Vec<String>,
    pub cluster_time: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn insert(
        collection: impl Into<CollectionName>,
        token: impl Into<String>,
        key: impl Into<String>,
        document: Value,
    ) -> Self {
        Self::base(collection.into(), OperationKind::Insert, token.into(), key.into())
            .with_document(document)
    }

    pub fn replace(
        collection: impl Into<CollectionName>,
        token: impl Into<String>,
        key: impl Into<String>,
        document: Value,
    ) -> Self {
        Self::base(collection.into(), OperationKind::Replace, token.into(), key.into())
            .with_document(document)
    }

    pub fn update(
        collection: impl Into<CollectionName>,
        token: impl Into<String>,
        key: impl Into<String>,
        updated_fields: Map<String, Value>,
    ) -> Self {
        let mut event =
            Self::base(collection.into(), OperationKind::Update, token.into(), key.into());
        event.updated_fields = Some(updated_fields);
        event
    }

    pub fn delete(
        collection: impl Into<CollectionName>,
        token: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self::base(collection.into(), OperationKind::Delete, token.into(), key.into())
    }

    fn base(
        collection: CollectionName,
        operation: OperationKind,
        token: String,
        key: String,
    ) -> Self {
        Self {
            collection,
            operation,
            resume_token: ResumeToken::new(token),
            document_key: DocumentKey::new(key),
            full_document: None,
            updated_fields: None,
            removed_fields: Vec::new(),
            cluster_time: Utc::now(),
        }
    }

    fn with_document(mut self, document: Value) -> Self {
        self.full_document = Some(document);
        self
    }

    /// Real-time event name, e.g. `messages:insert`
    pub fn event_name(&self) -> String {
        format!("{}:{}", self.collection, self.operation)
    }
}
