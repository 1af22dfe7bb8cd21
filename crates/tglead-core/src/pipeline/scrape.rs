//! Scrape stage: page through one group's history and stream annotated rows.

use std::{fmt, io::Write, str::FromStr};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use crate::{
    cache::ProfileCache,
    domain::{
        normalize_username, Group, MessageRecord, RawMessage, Sender, SenderKind, UserProfile,
    },
    errors::Error,
    export::RecordExporter,
    keywords::KeywordMatcher,
    ports::{MessageSource, PageCursor, ProfileSource},
    report::RunSummary,
    retry::RetryPolicy,
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Period {
    Days,
    Weeks,
    /// Thirty days, not a calendar month.
    Months,
}

impl Period {
    fn days(self) -> i64 {
        match self {
            Period::Days => 1,
            Period::Weeks => 7,
            Period::Months => 30,
        }
    }
}

impl FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "d" | "day" | "days" => Ok(Period::Days),
            "w" | "week" | "weeks" => Ok(Period::Weeks),
            "m" | "month" | "months" => Ok(Period::Months),
            other => Err(Error::Validation(format!(
                "unknown period {other:?} (expected days, weeks or months)"
            ))),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Period::Days => "days",
            Period::Weeks => "weeks",
            Period::Months => "months",
        })
    }
}

/// Inclusive lookback window `[start, end]` in UTC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// The last `quantity` periods ending at `now`.
    pub fn last(period: Period, quantity: u32, now: DateTime<Utc>) -> Result<Self> {
        if quantity == 0 {
            return Err(Error::Validation("quantity must be at least 1".to_string()));
        }
        let span = TimeDelta::try_days(period.days() * i64::from(quantity))
            .ok_or_else(|| Error::Validation(format!("{quantity} {period} is out of range")))?;
        let start = now
            .checked_sub_signed(span)
            .ok_or_else(|| Error::Validation(format!("{quantity} {period} is out of range")))?;
        Ok(Self { start, end: now })
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        *ts >= self.start && *ts <= self.end
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrapeMode {
    /// No per-user lookups; bio stays empty.
    Fast,
    /// One profile lookup per new sender (cached, paced).
    Detailed,
}

impl FromStr for ScrapeMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "fast" => Ok(ScrapeMode::Fast),
            "detailed" => Ok(ScrapeMode::Detailed),
            other => Err(Error::Validation(format!(
                "unknown mode {other:?} (expected fast or detailed)"
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ScrapeSettings {
    pub page_size: usize,
    pub progress_every: usize,
    pub max_common_groups: usize,
    pub profile_cache_size: usize,
    /// Applied to page fetches; exhausting it aborts the run.
    pub page_retry: RetryPolicy,
    /// Applied to each profile lookup; exhausting it degrades the row to an empty bio.
    pub profile_retry: RetryPolicy,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            progress_every: 25,
            max_common_groups: 5,
            profile_cache_size: crate::cache::DEFAULT_CAPACITY,
            page_retry: RetryPolicy::default(),
            profile_retry: RetryPolicy::default(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ScrapeOutcome {
    pub rows: usize,
    pub pages: usize,
    pub profile_lookups: usize,
    pub cached_profiles: usize,
    pub summary: RunSummary,
}

/// Streams one group's messages within a window to a [`RecordExporter`].
pub struct Scraper<'a> {
    source: &'a dyn MessageSource,
    profiles: Option<&'a dyn ProfileSource>,
    matcher: &'a KeywordMatcher,
    /// Titles of the groups visible to the account, used as `sender_common_groups`.
    known_groups: Vec<String>,
    cache: ProfileCache,
    settings: ScrapeSettings,
}

impl<'a> Scraper<'a> {
    pub fn new(
        source: &'a dyn MessageSource,
        matcher: &'a KeywordMatcher,
        settings: ScrapeSettings,
    ) -> Self {
        Self {
            source,
            profiles: None,
            matcher,
            known_groups: Vec::new(),
            cache: ProfileCache::new(settings.profile_cache_size),
            settings,
        }
    }

    /// Enable detailed mode.
    pub fn with_profiles(mut self, profiles: &'a dyn ProfileSource) -> Self {
        self.profiles = Some(profiles);
        self
    }

    pub fn with_known_groups(mut self, titles: Vec<String>) -> Self {
        self.known_groups = titles;
        self
    }

    pub fn mode(&self) -> ScrapeMode {
        if self.profiles.is_some() {
            ScrapeMode::Detailed
        } else {
            ScrapeMode::Fast
        }
    }

    /// Export every message of `group` that falls inside `window`.
    ///
    /// Pages are read newest first; paging stops at the first message older than
    /// the window start. Profile lookups that still fail after retrying are
    /// counted and the row is written with an empty bio. A page fetch that keeps
    /// failing aborts the run, leaving the rows already written in place.
    pub async fn run<W: Write>(
        &mut self,
        group: &Group,
        window: &TimeWindow,
        out: &mut RecordExporter<W>,
    ) -> Result<ScrapeOutcome> {
        info!(
            group = %group.title,
            mode = ?self.mode(),
            start = %window.start,
            end = %window.end,
            "scrape started"
        );

        let mut outcome = ScrapeOutcome::default();
        let mut cursor: Option<PageCursor> = None;

        'pages: loop {
            let page = self
                .settings
                .page_retry
                .run(&format!("fetch page of {}", group.title), || {
                    self.source
                        .fetch_page(group, cursor.clone(), self.settings.page_size)
                })
                .await?;
            outcome.pages += 1;
            debug!(page = outcome.pages, messages = page.messages.len(), "page fetched");

            for msg in &page.messages {
                if msg.date > window.end {
                    continue;
                }
                if msg.date < window.start {
                    break 'pages;
                }

                let record = self.annotate(group, msg, &mut outcome).await;
                out.write(&record)?;
                outcome.rows += 1;
                outcome.summary.processed += 1;

                if outcome.rows % self.settings.progress_every.max(1) == 0 {
                    info!(rows = outcome.rows, "scrape progress");
                }
            }

            match page.next {
                Some(next) if !page.messages.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        outcome.cached_profiles = self.cache.len();
        info!(
            group = %group.title,
            rows = outcome.rows,
            users_cached = outcome.cached_profiles,
            "scrape finished"
        );
        Ok(outcome)
    }

    async fn annotate(
        &mut self,
        group: &Group,
        msg: &RawMessage,
        outcome: &mut ScrapeOutcome,
    ) -> MessageRecord {
        let text = msg.text.replace(['\n', '\r'], " ");
        let matched_keywords = self.matcher.find(&text);

        let (sender_id, sender_username, sender_name, profile) = match &msg.sender {
            Some(sender) => {
                let profile = self.profile_for(sender, outcome).await;
                // Export senders carry no handle; detailed mode learns it from the lookup.
                let username = match &sender.username {
                    Some(_) => sender.handle(),
                    None => normalize_username(profile.username.as_deref().unwrap_or("")),
                };
                (
                    Some(sender.id.0.to_string()),
                    username,
                    sender.display_name(),
                    profile,
                )
            }
            None => (None, String::new(), String::new(), UserProfile::default()),
        };

        MessageRecord {
            message_id: msg.id.0,
            timestamp: msg.date,
            sender_id,
            sender_username,
            sender_name,
            text,
            group_name: group.title.clone(),
            group_id: group.id.0.to_string(),
            sender_bio: profile.bio,
            matched_keywords,
            sender_common_groups: profile.common_groups,
        }
    }

    async fn profile_for(&mut self, sender: &Sender, outcome: &mut ScrapeOutcome) -> UserProfile {
        let key = sender.id.0.to_string();
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }

        let mut cacheable = true;
        let profile = match (sender.kind, self.profiles) {
            (SenderKind::Bot, _) => labelled("BOT"),
            (SenderKind::Channel, _) => labelled("CHANNEL"),
            (SenderKind::User, None) => self.fast_profile(),
            (SenderKind::User, Some(source)) => {
                outcome.profile_lookups += 1;
                let policy = self.settings.profile_retry;
                let fetched = policy
                    .run(&format!("profile {key}"), || source.fetch_profile(sender))
                    .await;
                match fetched {
                    Ok(found) => {
                        let mut common_groups = if found.common_groups.is_empty() {
                            self.known_groups.clone()
                        } else {
                            found.common_groups
                        };
                        common_groups.truncate(self.settings.max_common_groups);
                        UserProfile {
                            bio: found.bio.replace(['\n', '\r'], " "),
                            common_groups,
                            username: found.username.filter(|u| !u.trim().is_empty()),
                        }
                    }
                    Err(e) => {
                        outcome.summary.record_failure(&key, &e);
                        // Transport failures are not cached; the sender's next message retries.
                        cacheable = !e.is_retryable();
                        self.fast_profile()
                    }
                }
            }
        };

        if !cacheable {
            return profile;
        }
        if let Some(evicted) = self.cache.insert(key, profile.clone()) {
            debug!(evicted = %evicted, "profile cache full, evicted oldest entry");
        }
        profile
    }

    fn fast_profile(&self) -> UserProfile {
        UserProfile {
            bio: String::new(),
            common_groups: self
                .known_groups
                .iter()
                .take(self.settings.max_common_groups)
                .cloned()
                .collect(),
            username: None,
        }
    }
}

fn labelled(kind: &str) -> UserProfile {
    UserProfile {
        bio: kind.to_string(),
        ..UserProfile::default()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::{
        domain::{GroupId, MessageId},
        export::RecordReader,
        ports::MessagePage,
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn group() -> Group {
        Group {
            id: GroupId(-100123),
            title: "Poker Club".to_string(),
        }
    }

    fn sender(id: i64, username: &str) -> Sender {
        Sender {
            username: Some(username.to_string()),
            first_name: Some(format!("First{id}")),
            last_name: None,
            ..Sender::user(id)
        }
    }

    fn msg(id: i64, hours_ago: i64, sender: Option<Sender>, text: &str) -> RawMessage {
        RawMessage {
            id: MessageId(id),
            date: now() - TimeDelta::try_hours(hours_ago).unwrap(),
            sender,
            text: text.to_string(),
        }
    }

    /// Serves a fixed newest-first history in pages, recording each cursor it sees.
    struct History {
        messages: Vec<RawMessage>,
        failures: Mutex<u32>,
        cursors: Mutex<Vec<Option<String>>>,
    }

    impl History {
        fn new(messages: Vec<RawMessage>) -> Self {
            Self {
                messages,
                failures: Mutex::new(0),
                cursors: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MessageSource for History {
        async fn list_groups(&self) -> Result<Vec<Group>> {
            Ok(vec![group()])
        }

        async fn fetch_page(
            &self,
            _group: &Group,
            cursor: Option<PageCursor>,
            limit: usize,
        ) -> Result<MessagePage> {
            {
                let mut failures = self.failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(Error::transport("flood wait"));
                }
            }
            self.cursors.lock().unwrap().push(cursor.clone().map(|c| c.0));
            let offset: usize = cursor.map(|c| c.0.parse().unwrap()).unwrap_or(0);
            let end = (offset + limit).min(self.messages.len());
            Ok(MessagePage {
                messages: self.messages[offset..end].to_vec(),
                next: (end < self.messages.len()).then(|| PageCursor(end.to_string())),
            })
        }
    }

    struct Profiles {
        calls: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl ProfileSource for Profiles {
        async fn fetch_profile(&self, sender: &Sender) -> Result<UserProfile> {
            self.calls.lock().unwrap().push(sender.id.0);
            match sender.id.0 {
                3 => Err(Error::PrivacyRestricted("user 3".to_string())),
                id => Ok(UserProfile {
                    bio: format!("bio of {id}\nline two"),
                    ..UserProfile::default()
                }),
            }
        }
    }

    fn settings(page_size: usize) -> ScrapeSettings {
        ScrapeSettings {
            page_size,
            progress_every: 1,
            max_common_groups: 2,
            profile_cache_size: 50,
            page_retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
            },
            profile_retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
            },
        }
    }

    /// Fails the first `failures` lookups with a transport error, then answers.
    struct Flaky {
        failures: Mutex<u32>,
        calls: Mutex<u32>,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures: Mutex::new(failures),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ProfileSource for Flaky {
        async fn fetch_profile(&self, _sender: &Sender) -> Result<UserProfile> {
            *self.calls.lock().unwrap() += 1;
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(Error::transport("connection reset"));
            }
            Ok(UserProfile {
                bio: "real bio".to_string(),
                username: Some("real_handle".to_string()),
                ..UserProfile::default()
            })
        }
    }

    async fn scrape_detailed(
        messages: Vec<RawMessage>,
        profiles: &dyn ProfileSource,
    ) -> (ScrapeOutcome, Vec<MessageRecord>) {
        let source = History::new(messages);
        let matcher = KeywordMatcher::default();
        let window = TimeWindow::last(Period::Days, 1, now()).unwrap();
        let mut out = RecordExporter::new(Vec::new(), b',').unwrap();
        let outcome = Scraper::new(&source, &matcher, settings(10))
            .with_profiles(profiles)
            .run(&group(), &window, &mut out)
            .await
            .unwrap();
        (outcome, read_back(out.into_inner().unwrap()))
    }

    fn read_back(buf: Vec<u8>) -> Vec<MessageRecord> {
        let mut reader = RecordReader::new(buf.as_slice(), b',').unwrap();
        reader.records().collect::<Result<Vec<_>>>().unwrap()
    }

    #[test]
    fn window_arithmetic() {
        let w = TimeWindow::last(Period::Months, 2, now()).unwrap();
        assert_eq!(w.end - w.start, TimeDelta::try_days(60).unwrap());
        let w = TimeWindow::last(Period::Weeks, 1, now()).unwrap();
        assert_eq!(w.end - w.start, TimeDelta::try_days(7).unwrap());
        assert!(TimeWindow::last(Period::Days, 0, now()).is_err());
        assert_eq!("Weeks".parse::<Period>().unwrap(), Period::Weeks);
        assert!("years".parse::<Period>().is_err());
        assert_eq!("detailed".parse::<ScrapeMode>().unwrap(), ScrapeMode::Detailed);
    }

    #[tokio::test]
    async fn pages_until_window_start_and_annotates_rows() {
        let source = History::new(vec![
            msg(6, 1, Some(sender(1, "alice")), "Casino\nbetting"),
            msg(5, 2, None, "service message"),
            msg(4, 3, Some(sender(2, "@bob")), "hello"),
            msg(3, 30, Some(sender(1, "alice")), "poker night"),
            msg(2, 50, Some(sender(2, "bob")), "too old"),
            msg(1, 60, Some(sender(2, "bob")), "never fetched"),
        ]);
        let matcher = KeywordMatcher::default();
        let window = TimeWindow::last(Period::Days, 2, now()).unwrap();
        let mut out = RecordExporter::new(Vec::new(), b',').unwrap();

        let mut scraper = Scraper::new(&source, &matcher, settings(2))
            .with_known_groups(vec!["A".into(), "B".into(), "C".into()]);
        let outcome = scraper.run(&group(), &window, &mut out).await.unwrap();

        assert_eq!(outcome.rows, 4);
        assert_eq!(outcome.pages, 3);
        // Third page contains the first too-old message; no fourth request.
        assert_eq!(source.cursors.lock().unwrap().len(), 3);

        let rows = read_back(out.into_inner().unwrap());
        let ids: Vec<_> = rows.iter().map(|r| r.message_id).collect();
        assert_eq!(ids, vec![6, 5, 4, 3]);
        assert_eq!(rows[0].text, "Casino betting");
        assert_eq!(rows[0].sender_username, "@alice");
        assert_eq!(rows[0].sender_name, "First1");
        assert_eq!(rows[0].matched_keywords, vec!["casino", "bet", "betting"]);
        assert_eq!(rows[0].sender_common_groups, vec!["A", "B"]);
        assert_eq!(rows[0].group_id, "-100123");
        assert_eq!(rows[1].sender_id, None);
        assert_eq!(rows[2].sender_username, "@bob");
        assert!(rows[2].sender_bio.is_empty());
    }

    #[tokio::test]
    async fn detailed_mode_caches_and_degrades_on_privacy() {
        let mut bot = Sender::user(9);
        bot.kind = SenderKind::Bot;
        let source = History::new(vec![
            msg(5, 1, Some(sender(1, "a")), "x"),
            msg(4, 2, Some(sender(3, "hidden")), "y"),
            msg(3, 3, Some(sender(1, "a")), "z"),
            msg(2, 4, Some(bot), "beep"),
            msg(1, 5, Some(sender(3, "hidden")), "again"),
        ]);
        let profiles = Profiles {
            calls: Mutex::new(Vec::new()),
        };
        let matcher = KeywordMatcher::default();
        let window = TimeWindow::last(Period::Days, 1, now()).unwrap();
        let mut out = RecordExporter::new(Vec::new(), b',').unwrap();

        let mut scraper = Scraper::new(&source, &matcher, settings(10)).with_profiles(&profiles);
        assert_eq!(scraper.mode(), ScrapeMode::Detailed);
        let outcome = scraper.run(&group(), &window, &mut out).await.unwrap();

        assert_eq!(outcome.rows, 5);
        assert_eq!(outcome.profile_lookups, 2);
        assert_eq!(outcome.summary.skipped_privacy, 1);
        assert_eq!(*profiles.calls.lock().unwrap(), vec![1, 3]);

        let rows = read_back(out.into_inner().unwrap());
        assert_eq!(rows[0].sender_bio, "bio of 1 line two");
        assert_eq!(rows[1].sender_bio, "");
        assert_eq!(rows[2].sender_bio, "bio of 1 line two");
        assert_eq!(rows[3].sender_bio, "BOT");
    }

    #[tokio::test]
    async fn page_fetch_is_retried() {
        let source = History::new(vec![msg(1, 1, Some(sender(1, "a")), "x")]);
        *source.failures.lock().unwrap() = 2;
        let matcher = KeywordMatcher::default();
        let window = TimeWindow::last(Period::Days, 1, now()).unwrap();
        let mut out = RecordExporter::new(Vec::new(), b',').unwrap();

        let outcome = Scraper::new(&source, &matcher, settings(10))
            .run(&group(), &window, &mut out)
            .await
            .unwrap();
        assert_eq!(outcome.rows, 1);
    }

    #[tokio::test]
    async fn persistent_page_failure_aborts() {
        let source = History::new(vec![msg(1, 1, None, "x")]);
        *source.failures.lock().unwrap() = 5;
        let matcher = KeywordMatcher::default();
        let window = TimeWindow::last(Period::Days, 1, now()).unwrap();
        let mut out = RecordExporter::new(Vec::new(), b',').unwrap();

        let err = Scraper::new(&source, &matcher, settings(10))
            .run(&group(), &window, &mut out)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(out.rows_written(), 0);
    }

    #[tokio::test]
    async fn profile_lookup_recovers_from_one_transport_failure() {
        let profiles = Flaky::new(1);
        let (outcome, rows) = scrape_detailed(
            vec![
                msg(2, 1, Some(sender(1, "a")), "x"),
                msg(1, 2, Some(sender(1, "a")), "y"),
            ],
            &profiles,
        )
        .await;

        assert_eq!(outcome.profile_lookups, 1);
        assert_eq!(*profiles.calls.lock().unwrap(), 2);
        assert_eq!(outcome.summary.failed_transport, 0);
        let bios: Vec<_> = rows.iter().map(|r| r.sender_bio.as_str()).collect();
        assert_eq!(bios, vec!["real bio", "real bio"]);
    }

    #[tokio::test]
    async fn exhausted_profile_lookup_is_retried_on_next_message() {
        // Two attempts per lookup: the first message exhausts both, the second recovers.
        let profiles = Flaky::new(2);
        let (outcome, rows) = scrape_detailed(
            vec![
                msg(2, 1, Some(sender(1, "a")), "x"),
                msg(1, 2, Some(sender(1, "a")), "y"),
            ],
            &profiles,
        )
        .await;

        assert_eq!(outcome.profile_lookups, 2);
        assert_eq!(*profiles.calls.lock().unwrap(), 3);
        assert_eq!(outcome.summary.failed_transport, 1);
        assert_eq!(rows[0].sender_bio, "");
        assert_eq!(rows[1].sender_bio, "real bio");
        assert_eq!(outcome.cached_profiles, 1);
    }

    #[tokio::test]
    async fn missing_handle_is_filled_from_profile_lookup() {
        let profiles = Flaky::new(0);
        let (_, rows) = scrape_detailed(
            vec![
                msg(2, 1, Some(Sender::user(5)), "x"),
                msg(1, 2, Some(sender(6, "own")), "y"),
            ],
            &profiles,
        )
        .await;

        assert_eq!(rows[0].sender_username, "@real_handle");
        assert_eq!(rows[1].sender_username, "@own");
    }
}
