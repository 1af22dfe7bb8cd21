//! Bot API profile lookups (teloxide).

use async_trait::async_trait;
use teloxide::{prelude::*, ApiError, RequestError};
use tokio::time::sleep;
use tracing::debug;

use tglead_core::{
    domain::{Sender, UserProfile},
    errors::Error,
    ports::ProfileSource,
    Result,
};

#[derive(Clone)]
pub struct BotProfileSource {
    bot: Bot,
}

impl BotProfileSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }

    pub fn from_bot(bot: Bot) -> Self {
        Self { bot }
    }

    fn tg_chat(sender: &Sender) -> teloxide::types::ChatId {
        teloxide::types::ChatId(sender.id.0)
    }

    fn map_err(e: RequestError) -> Error {
        match e {
            RequestError::RetryAfter(d) => Error::Transport {
                message: "telegram rate limit".to_string(),
                retry_after: Some(d),
            },
            RequestError::Network(e) => Error::transport(format!("telegram network error: {e}")),
            RequestError::Api(
                api @ (ApiError::ChatNotFound
                | ApiError::UserNotFound
                | ApiError::BotBlocked
                | ApiError::UserDeactivated),
            ) => Error::PrivacyRestricted(format!("telegram: {api}")),
            other => Error::External(format!("telegram error: {other}")),
        }
    }

    /// One extra attempt on a flood-wait; everything else is mapped and returned.
    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    debug!(wait_secs = d.as_secs(), "telegram flood wait");
                    sleep(d).await;
                }
                Err(other) => return Err(Self::map_err(other)),
            }
        }
    }
}

#[async_trait]
impl ProfileSource for BotProfileSource {
    async fn fetch_profile(&self, sender: &Sender) -> Result<UserProfile> {
        let chat = self
            .with_retry(|| self.bot.get_chat(Self::tg_chat(sender)))
            .await?;
        Ok(profile_from_chat(chat.bio(), chat.username()))
    }
}

/// `getChat` carries no common-group list; the scraper fills that in.
fn profile_from_chat(bio: Option<&str>, username: Option<&str>) -> UserProfile {
    UserProfile {
        bio: bio.unwrap_or_default().to_string(),
        common_groups: Vec::new(),
        username: username.map(str::to_string),
    }
}
