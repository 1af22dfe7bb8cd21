use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{errors::Error, Result};

/// Timestamp layout used in every exported artifact.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Separator between matched keywords inside one CSV cell.
pub const KEYWORD_SEPARATOR: &str = ", ";

/// Separator between common group titles inside one CSV cell.
pub const GROUP_SEPARATOR: &str = "; ";

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

/// Telegram group/channel id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GroupId(pub i64);

/// Telegram message id (numeric, unique per group).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SenderKind {
    User,
    Bot,
    Channel,
}

/// Author of a scraped message, as reported by the message source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sender {
    pub id: UserId,
    pub kind: SenderKind,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl Sender {
    pub fn user(id: i64) -> Self {
        Self {
            id: UserId(id),
            kind: SenderKind::User,
            username: None,
            first_name: None,
            last_name: None,
        }
    }

    /// First and last name joined by a space, skipping empty parts.
    pub fn display_name(&self) -> String {
        [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Username with a leading `@`, or empty when the sender has none.
    pub fn handle(&self) -> String {
        normalize_username(self.username.as_deref().unwrap_or(""))
    }
}

/// A group the message source can read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Group {
    pub id: GroupId,
    pub title: String,
}

/// One message as yielded by the message source, before annotation.
#[derive(Clone, Debug)]
pub struct RawMessage {
    pub id: MessageId,
    pub date: DateTime<Utc>,
    pub sender: Option<Sender>,
    pub text: String,
}

/// Profile attributes fetched per sender (and cached within a run).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub bio: String,
    pub common_groups: Vec<String>,
    /// Handle reported by the profile lookup; export-backed senders carry none.
    pub username: Option<String>,
}

/// One scraped message plus scrape-time annotations. Immutable once exported.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageRecord {
    pub message_id: i64,
    pub timestamp: DateTime<Utc>,
    /// `None` when the message had no resolvable sender (service messages, anonymous admins).
    pub sender_id: Option<String>,
    pub sender_username: String,
    pub sender_name: String,
    pub text: String,
    pub group_name: String,
    pub group_id: String,
    pub sender_bio: String,
    pub matched_keywords: Vec<String>,
    pub sender_common_groups: Vec<String>,
}

/// The per-user subset of a [`MessageRecord`] kept inside a [`UserAggregate`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedMessage {
    pub message_id: i64,
    #[serde(
        rename = "date",
        serialize_with = "serialize_date",
        deserialize_with = "deserialize_date"
    )]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "message_text")]
    pub text: String,
    #[serde(
        rename = "message_gaming_keywords",
        serialize_with = "serialize_keywords",
        deserialize_with = "deserialize_keywords"
    )]
    pub matched_keywords: Vec<String>,
}

impl From<&MessageRecord> for AggregatedMessage {
    fn from(r: &MessageRecord) -> Self {
        Self {
            message_id: r.message_id,
            timestamp: r.timestamp,
            text: r.text.clone(),
            matched_keywords: r.matched_keywords.clone(),
        }
    }
}

/// Per-user rollup of all messages sharing a sender id.
///
/// Profile fields come from the first record seen for the sender; later records
/// only append to `messages`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAggregate {
    pub sender_id: String,
    pub sender_username: String,
    pub sender_name: String,
    pub sender_bio: String,
    pub sender_common_groups: Vec<String>,
    pub group: String,
    pub group_id: String,
    pub messages: Vec<AggregatedMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier_output: Option<String>,
}

impl UserAggregate {
    /// Start an aggregate from the first record of a sender.
    pub fn from_first(sender_id: &str, r: &MessageRecord) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            sender_username: normalize_username(&r.sender_username),
            sender_name: r.sender_name.clone(),
            sender_bio: r.sender_bio.clone(),
            sender_common_groups: r.sender_common_groups.clone(),
            group: r.group_name.clone(),
            group_id: r.group_id.clone(),
            messages: vec![AggregatedMessage::from(r)],
            validated: None,
            classifier_output: None,
        }
    }

    pub fn has_keyword_match(&self) -> bool {
        self.messages.iter().any(|m| !m.matched_keywords.is_empty())
    }

    /// Most recent message by timestamp (ties resolve to the later entry).
    pub fn latest_message(&self) -> Option<&AggregatedMessage> {
        self.messages.iter().max_by_key(|m| m.timestamp)
    }

    /// Attach a classifier verdict. The only mutation allowed after aggregation.
    pub fn attach(&mut self, result: &ClassificationResult) {
        self.validated = Some(result.verdict);
        self.classifier_output = Some(result.raw_model_output.clone());
    }
}

/// Verdict of the external classifier for one user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassificationResult {
    pub sender_id: String,
    pub verdict: bool,
    pub raw_model_output: String,
    /// `false` when the model output could not be parsed and `verdict` is the default.
    pub well_formed: bool,
}

// ============== Field Helpers ==============

pub fn format_date(ts: &DateTime<Utc>) -> String {
    ts.format(DATE_FORMAT).to_string()
}

/// Parse an exported timestamp. Older exports omit the trailing ` UTC`.
pub fn parse_date(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    let naive = NaiveDateTime::parse_from_str(s, DATE_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .map_err(|e| Error::Validation(format!("invalid date {s:?}: {e}")))?;
    Ok(naive.and_utc())
}

pub fn join_keywords(keywords: &[String]) -> String {
    keywords.join(KEYWORD_SEPARATOR)
}

/// Inverse of [`join_keywords`]; an empty cell yields an empty list.
pub fn split_keywords(cell: &str) -> Vec<String> {
    split_cell(cell, ',')
}

pub fn join_groups(groups: &[String]) -> String {
    groups.join(GROUP_SEPARATOR)
}

pub fn split_groups(cell: &str) -> Vec<String> {
    split_cell(cell, ';')
}

fn split_cell(cell: &str, sep: char) -> Vec<String> {
    cell.split(sep)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Ensure a non-empty username carries exactly one leading `@`.
pub fn normalize_username(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('@') {
        return raw.to_string();
    }
    format!("@{raw}")
}

fn serialize_date<S: Serializer>(ts: &DateTime<Utc>, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&format_date(ts))
}

fn serialize_keywords<S: Serializer>(kw: &[String], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&join_keywords(kw))
}

fn deserialize_date<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(d)?;
    parse_date(&raw).map_err(serde::de::Error::custom)
}

fn deserialize_keywords<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<String>, D::Error> {
    Ok(split_keywords(&String::deserialize(d)?))
}
