//! Message source backed by a Telegram Desktop JSON export (`result.json`).
//!
//! Both export shapes are accepted: a single chat (top-level `messages`) and a
//! full account export (`chats.list`). Only group and channel chats are listed.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use tglead_core::{
    domain::{Group, GroupId, MessageId, RawMessage, Sender, SenderKind, UserId},
    errors::Error,
    ports::{MessagePage, MessageSource, PageCursor},
    Result,
};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExportFile {
    Account { chats: ChatList },
    Single(ExportChat),
}

#[derive(Debug, Deserialize)]
struct ChatList {
    list: Vec<ExportChat>,
}

#[derive(Debug, Deserialize)]
struct ExportChat {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type", default)]
    kind: String,
    id: i64,
    #[serde(default)]
    messages: Vec<ExportMessage>,
}

#[derive(Debug, Deserialize)]
struct ExportMessage {
    id: i64,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    date_unixtime: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    from_id: Option<String>,
    #[serde(default)]
    text: Text,
}

/// Plain string, or an array mixing strings and formatted entities.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Text {
    Plain(String),
    Parts(Vec<TextPart>),
}

impl Default for Text {
    fn default() -> Self {
        Text::Plain(String::new())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TextPart {
    Plain(String),
    Entity { text: String },
}

impl Text {
    fn flatten(self) -> String {
        match self {
            Text::Plain(s) => s,
            Text::Parts(parts) => parts
                .into_iter()
                .map(|p| match p {
                    TextPart::Plain(s) => s,
                    TextPart::Entity { text } => text,
                })
                .collect(),
        }
    }
}

struct Chat {
    group: Group,
    /// Newest first.
    messages: Vec<RawMessage>,
}

/// In-memory message history loaded from an export file.
pub struct ExportMessageSource {
    chats: Vec<Chat>,
}

impl ExportMessageSource {
    pub async fn open(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let source = Self::from_json(&raw)?;
        info!(
            path = %path.display(),
            chats = source.chats.len(),
            "export loaded"
        );
        Ok(source)
    }

    /// Load several exports into one source. A group present in more than one
    /// file is served from the first file that contains it.
    pub async fn open_all(paths: &[PathBuf]) -> Result<Self> {
        let mut merged = Self { chats: Vec::new() };
        for path in paths {
            merged.merge(Self::open(path).await?);
        }
        Ok(merged)
    }

    fn merge(&mut self, other: Self) {
        for chat in other.chats {
            if self.chats.iter().any(|c| c.group.id == chat.group.id) {
                debug!(group = %chat.group.title, "group already loaded, skipping duplicate");
                continue;
            }
            self.chats.push(chat);
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: ExportFile = serde_json::from_str(raw)?;
        let chats = match file {
            ExportFile::Account { chats } => chats.list,
            ExportFile::Single(chat) => vec![chat],
        };
        Ok(Self {
            chats: chats
                .into_iter()
                .filter(|c| is_group_like(&c.kind))
                .map(convert_chat)
                .collect(),
        })
    }

    fn chat(&self, group: &Group) -> Result<&Chat> {
        self.chats
            .iter()
            .find(|c| c.group.id == group.id)
            .ok_or_else(|| Error::Validation(format!("group {:?} is not in the export", group.title)))
    }
}

#[async_trait]
impl MessageSource for ExportMessageSource {
    async fn list_groups(&self) -> Result<Vec<Group>> {
        Ok(self.chats.iter().map(|c| c.group.clone()).collect())
    }

    async fn fetch_page(
        &self,
        group: &Group,
        cursor: Option<PageCursor>,
        limit: usize,
    ) -> Result<MessagePage> {
        let chat = self.chat(group)?;
        let offset = match cursor {
            Some(PageCursor(c)) => c
                .parse::<usize>()
                .map_err(|_| Error::Validation(format!("invalid page cursor {c:?}")))?,
            None => 0,
        };
        let start = offset.min(chat.messages.len());
        let end = start.saturating_add(limit.max(1)).min(chat.messages.len());
        Ok(MessagePage {
            messages: chat.messages[start..end].to_vec(),
            next: (end < chat.messages.len()).then(|| PageCursor(end.to_string())),
        })
    }
}

fn is_group_like(kind: &str) -> bool {
    kind.contains("group") || kind.contains("channel")
}

fn convert_chat(chat: ExportChat) -> Chat {
    let title = chat.name.unwrap_or_else(|| chat.id.to_string());
    let mut messages: Vec<RawMessage> = chat
        .messages
        .into_iter()
        .filter(|m| m.kind == "message")
        .filter_map(|m| {
            let id = m.id;
            let converted = convert_message(m);
            if converted.is_none() {
                debug!(message_id = id, "skipping message with unreadable date");
            }
            converted
        })
        .collect();
    // Exports are oldest first; pages are served newest first.
    messages.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));

    Chat {
        group: Group {
            id: GroupId(chat.id),
            title,
        },
        messages,
    }
}

fn convert_message(m: ExportMessage) -> Option<RawMessage> {
    let date = parse_export_date(m.date_unixtime.as_deref(), &m.date)?;
    let sender = m
        .from_id
        .as_deref()
        .and_then(|from_id| parse_sender(from_id, m.from.as_deref()));
    Some(RawMessage {
        id: MessageId(m.id),
        date,
        sender,
        text: m.text.flatten(),
    })
}

fn parse_export_date(unix: Option<&str>, local: &str) -> Option<DateTime<Utc>> {
    if let Some(ts) = unix.and_then(|s| s.trim().parse::<i64>().ok()) {
        return DateTime::from_timestamp(ts, 0);
    }
    NaiveDateTime::parse_from_str(local, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|n| n.and_utc())
}

/// `user123` / `channel123`; anything else has no addressable sender.
fn parse_sender(from_id: &str, from: Option<&str>) -> Option<Sender> {
    let (kind, id) = if let Some(id) = from_id.strip_prefix("user") {
        (SenderKind::User, id)
    } else if let Some(id) = from_id.strip_prefix("channel") {
        (SenderKind::Channel, id)
    } else {
        return None;
    };
    let id = id.parse::<i64>().ok()?;
    Some(Sender {
        id: UserId(id),
        kind,
        username: None,
        first_name: from.map(str::to_string).filter(|s| !s.trim().is_empty()),
        last_name: None,
    })
}
