//! Hexagonal ports for the external collaborators.
//!
//! The Telegram client and the AI endpoint are implemented in adapter crates;
//! the pipeline only sees these traits.

use async_trait::async_trait;

use crate::{
    domain::{Group, RawMessage, Sender, UserProfile},
    Result,
};

/// Opaque pagination cursor handed back by a [`MessageSource`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageCursor(pub String);

/// One page of messages, newest first.
#[derive(Clone, Debug, Default)]
pub struct MessagePage {
    pub messages: Vec<RawMessage>,
    /// `None` when the history is exhausted.
    pub next: Option<PageCursor>,
}

/// Read side of the Telegram capability: groups and their message history.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn list_groups(&self) -> Result<Vec<Group>>;

    /// Fetch up to `limit` messages of `group`, newest first, starting after `cursor`.
    async fn fetch_page(
        &self,
        group: &Group,
        cursor: Option<PageCursor>,
        limit: usize,
    ) -> Result<MessagePage>;
}

/// Profile lookups for message senders.
///
/// Implementations return [`crate::Error::PrivacyRestricted`] when the user is
/// not visible and [`crate::Error::Transport`] for rate limits/connectivity.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn fetch_profile(&self, sender: &Sender) -> Result<UserProfile>;
}

/// Black-box text classifier: prompt in, free-form text out.
#[async_trait]
pub trait ClassifierEndpoint: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}
