//! Audience resolution
//!
//! Maps a document of a watched collection to the real-time channels that
//! should observe changes to it. Rules are pure functions of the document;
//! obtaining the document (full payload, point lookup, side index) is the
//! router's job.

use std::collections::HashMap;

use serde_json::Value;
use streamwarden_domain::{Channel, CollectionName};

const GROUP_CHAT: &str = "group";

/// How a collection's documents are addressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudienceRule {
    /// Chat messages: `chatType = "group"` goes to `group_<chatId>` only;
    /// anything else is a direct message to the sender and receiver.
    Chat,
    /// Every id in an array field gets a `user_<id>` channel (chat membership)
    Members { field: String },
    /// One `neighbourhood_<id>` channel from a scalar field
    Neighbourhood { field: String },
    /// One `user_<id>` channel per named field (friend requests)
    Participants { fields: Vec<String> },
}

impl AudienceRule {
    pub fn members(field: impl Into<String>) -> Self {
        Self::Members { field: field.into() }
    }

    pub fn neighbourhood(field: impl Into<String>) -> Self {
        Self::Neighbourhood { field: field.into() }
    }

    pub fn participants<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Participants { fields: fields.into_iter().map(Into::into).collect() }
    }

    /// Channels for `document`, de-duplicated in first-seen order
    pub fn resolve(&self, document: &Value) -> Vec<Channel> {
        let mut channels = Vec::new();
        match self {
            Self::Chat => {
                let is_group = document.get("chatType").and_then(Value::as_str) == Some(GROUP_CHAT);
                if is_group {
                    if let Some(chat) = document.get("chatId").and_then(reference_id) {
                        channels.push(Channel::group(chat));
                    }
                } else {
                    for field in ["sender", "receiver"] {
                        if let Some(user) = document.get(field).and_then(reference_id) {
                            channels.push(Channel::user(user));
                        }
                    }
                }
            }
            Self::Members { field } => {
                if let Some(Value::Array(members)) = document.get(field) {
                    channels.extend(members.iter().filter_map(reference_id).map(Channel::user));
                }
            }
            Self::Neighbourhood { field } => {
                if let Some(id) = document.get(field).and_then(reference_id) {
                    channels.push(Channel::neighbourhood(id));
                }
            }
            Self::Participants { fields } => {
                channels.extend(
                    fields
                        .iter()
                        .filter_map(|field| document.get(field).and_then(reference_id))
                        .map(Channel::user),
                );
            }
        }
        dedup_in_order(channels)
    }
}

/// Extract an id from a reference that may be a string, a number, or a
/// populated sub-document carrying `_id`/`id`
fn reference_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get("_id").or_else(|| map.get("id")).and_then(reference_id),
        _ => None,
    }
}

fn dedup_in_order(channels: Vec<Channel>) -> Vec<Channel> {
    let mut unique: Vec<Channel> = Vec::with_capacity(channels.len());
    for channel in channels {
        if !unique.contains(&channel) {
            unique.push(channel);
        }
    }
    unique
}

/// Per-collection audience rules
#[derive(Debug, Clone, Default)]
pub struct AudienceResolver {
    rules: HashMap<CollectionName, AudienceRule>,
}

impl AudienceResolver {
    /// Resolver without rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules for the social collections: `messages`, `chats`, `notices`,
    /// `reports` and `friends`
    pub fn with_default_rules() -> Self {
        Self::new()
            .with_rule("messages", AudienceRule::Chat)
            .with_rule("chats", AudienceRule::members("members"))
            .with_rule("notices", AudienceRule::neighbourhood("neighbourhood"))
            .with_rule("reports", AudienceRule::neighbourhood("neighbourhood"))
            .with_rule("friends", AudienceRule::participants(["requester", "recipient"]))
    }

    pub fn with_rule(mut self, collection: impl Into<CollectionName>, rule: AudienceRule) -> Self {
        self.rules.insert(collection.into(), rule);
        self
    }

    pub fn rule_for(&self, collection: &str) -> Option<&AudienceRule> {
        self.rules.get(collection)
    }

    /// `None` when the collection has no rule
    pub fn resolve(&self, collection: &str, document: &Value) -> Option<Vec<Channel>> {
        self.rule_for(collection).map(|rule| rule.resolve(document))
    }
}
