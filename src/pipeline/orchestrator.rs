// src/pipeline/orchestrator.rs

//! Polling loop tying the pipeline together.
//!
//! Each cycle fetches events past the cursor, selects and ranks the eligible
//! ones, publishes them under the rate budget and then advances the cursor
//! past everything fetched. The cursor and rate window are owned here and
//! flushed to the [`CursorStore`] after every cycle.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{Config, Event, Media, Post, RarityTier};
use crate::pipeline::filter;
use crate::pipeline::rate::{self, RateWindow};
use crate::publishers::Publisher;
use crate::render::{self, Renderer};
use crate::services::{EventSource, LinkResolver};
use crate::storage::CursorStore;

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Idle,
    Authenticating,
    Fetching,
    Filtering,
    Publishing,
    Sleeping,
    ErrorBackoff,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Authenticating => "authenticating",
            Self::Fetching => "fetching",
            Self::Filtering => "filtering",
            Self::Publishing => "publishing",
            Self::Sleeping => "sleeping",
            Self::ErrorBackoff => "error-backoff",
        };
        f.write_str(name)
    }
}

/// Settings the loop needs, resolved once from [`Config`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub feed_ids: Vec<String>,
    pub batch_limit: usize,
    pub min_tier: RarityTier,
    pub message_template: String,
    pub max_posts_per_hour: u32,
    pub max_posts_per_interval: usize,
    pub poll_interval: Duration,
    /// Pause after each successful publish
    pub post_delay: Duration,
    pub error_backoff: Duration,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        let posting = &config.posting;
        Self {
            feed_ids: config.feed_ids(),
            batch_limit: config.feed.batch_limit,
            min_tier: config.min_tier(),
            message_template: posting.message_template.clone(),
            max_posts_per_hour: posting.max_posts_per_hour,
            max_posts_per_interval: rate::max_posts_per_interval(
                posting.max_posts_per_hour,
                posting.poll_interval_minutes,
            ),
            poll_interval: Duration::from_secs(posting.poll_interval_minutes * 60),
            post_delay: Duration::from_secs(posting.post_delay_secs),
            error_backoff: Duration::from_secs(posting.error_backoff_secs),
        }
    }
}

/// Outcome of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub eligible: usize,
    pub attempted: usize,
    pub published: usize,
    /// The hourly cap cut the cycle short
    pub rate_limited: bool,
    /// Cursor after the cycle
    pub cursor: u64,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetched {}, eligible {}, attempted {}, published {}, cursor {}",
            self.fetched, self.eligible, self.attempted, self.published, self.cursor
        )?;
        if self.rate_limited {
            f.write_str(" (hourly cap reached)")?;
        }
        Ok(())
    }
}

/// The publishing loop and the state it owns.
pub struct Orchestrator {
    settings: Settings,
    source: Box<dyn EventSource>,
    renderer: Box<dyn Renderer>,
    resolver: Box<dyn LinkResolver>,
    publishers: Vec<Box<dyn Publisher>>,
    store: Arc<dyn CursorStore>,
    cursor: u64,
    window: RateWindow,
    stage: PipelineStage,
}

impl Orchestrator {
    pub fn new(
        settings: Settings,
        source: Box<dyn EventSource>,
        renderer: Box<dyn Renderer>,
        resolver: Box<dyn LinkResolver>,
        publishers: Vec<Box<dyn Publisher>>,
        store: Arc<dyn CursorStore>,
    ) -> Self {
        Self {
            settings,
            source,
            renderer,
            resolver,
            publishers,
            store,
            cursor: 0,
            window: RateWindow::new(Utc::now()),
            stage: PipelineStage::Idle,
        }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn window(&self) -> &RateWindow {
        &self.window
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    fn set_stage(&mut self, stage: PipelineStage) {
        if self.stage != stage {
            log::debug!("Pipeline {} -> {}", self.stage, stage);
            self.stage = stage;
        }
    }

    /// Load the persisted cursor and rate window.
    pub async fn initialize(&mut self, now: DateTime<Utc>) {
        self.cursor = self.cursor.max(self.store.load().await);
        self.window = self
            .store
            .load_window()
            .await
            .unwrap_or_else(|| RateWindow::new(now));
        log::info!(
            "Starting from cursor {} ({} posts in the current hour)",
            self.cursor,
            self.window.count
        );
    }

    /// Log in to every destination. Failures are logged; publishers retry
    /// lazily on their next publish.
    pub async fn authenticate_all(&mut self) {
        self.set_stage(PipelineStage::Authenticating);
        for publisher in self.publishers.iter_mut() {
            if let Err(e) = publisher.authenticate().await {
                log::error!("Authentication with {} failed: {}", publisher.name(), e);
            }
        }
        self.set_stage(PipelineStage::Idle);
    }

    /// Run one fetch-filter-publish cycle.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport> {
        self.set_stage(PipelineStage::Fetching);
        let events = self
            .source
            .fetch_since(self.cursor, &self.settings.feed_ids, self.settings.batch_limit)
            .await;
        let mut report = CycleReport {
            fetched: events.len(),
            cursor: self.cursor,
            ..CycleReport::default()
        };

        self.set_stage(PipelineStage::Filtering);
        let selected = filter::select_for_publish(&events, self.settings.min_tier);
        report.eligible = selected.len();
        let batch: Vec<&Event> = selected
            .into_iter()
            .take(self.settings.max_posts_per_interval)
            .collect();
        if !batch.is_empty() && self.publishers.is_empty() {
            return Err(AppError::config("no destinations configured"));
        }

        self.set_stage(PipelineStage::Publishing);
        for event in batch {
            if !self.window.try_acquire(now, self.settings.max_posts_per_hour) {
                log::warn!(
                    "Hourly cap of {} posts reached; deferring remaining achievements",
                    self.settings.max_posts_per_hour
                );
                report.rate_limited = true;
                break;
            }
            report.attempted += 1;

            let post = self.build_post(event).await;
            if self.publish_all(&post).await {
                report.published += 1;
                log::info!(
                    "Published achievement {} ({} for {})",
                    event.id,
                    event.achievement_name,
                    event.display_name()
                );
                if !self.settings.post_delay.is_zero() {
                    tokio::time::sleep(self.settings.post_delay).await;
                }
            } else {
                log::warn!("No destination accepted achievement {}", event.id);
                self.window.release();
            }
        }

        if let Some(max_id) = events.iter().map(|e| e.id).max() {
            self.cursor = self.cursor.max(max_id);
        }
        self.store.save(self.cursor).await;
        self.store.save_window(&self.window).await;
        report.cursor = self.cursor;

        Ok(report)
    }

    async fn build_post(&self, event: &Event) -> Post {
        let media = match self.renderer.render(event).await {
            Ok(card) => Some(Media::png(card.png, render::alt_text(event))),
            Err(e) => {
                log::warn!("Card render failed for achievement {}: {}", event.id, e);
                None
            }
        };

        let link = match event.share_url() {
            Some(url) => self.resolver.resolve(url).await,
            None => None,
        };

        Post {
            message: event.format(&self.settings.message_template),
            media,
            link,
        }
    }

    /// Publish to every destination. True if at least one accepted.
    async fn publish_all(&mut self, post: &Post) -> bool {
        let mut accepted = false;
        for publisher in self.publishers.iter_mut() {
            if publisher.publish(post).await {
                accepted = true;
            } else {
                log::warn!("{} rejected the post", publisher.name());
            }
        }
        accepted
    }

    /// Run cycles until `cancel` fires.
    ///
    /// A failed cycle waits the error backoff instead of the poll interval.
    pub async fn run(&mut self, cancel: CancellationToken) {
        self.initialize(Utc::now()).await;
        self.authenticate_all().await;

        log::info!(
            "Polling every {}s, up to {} posts per cycle and {} per hour",
            self.settings.poll_interval.as_secs(),
            self.settings.max_posts_per_interval,
            self.settings.max_posts_per_hour
        );

        while !cancel.is_cancelled() {
            let delay = match self.run_cycle(Utc::now()).await {
                Ok(report) => {
                    log::info!("Cycle complete: {}", report);
                    self.set_stage(PipelineStage::Sleeping);
                    self.settings.poll_interval
                }
                Err(e) => {
                    self.set_stage(PipelineStage::ErrorBackoff);
                    log::error!(
                        "Cycle failed: {}. Retrying in {}s",
                        e,
                        self.settings.error_backoff.as_secs()
                    );
                    self.settings.error_backoff
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("Stop requested, shutting down");
                }
                _ = tokio::time::sleep(delay) => {
                    self.set_stage(PipelineStage::Idle);
                }
            }
        }

        self.set_stage(PipelineStage::Idle);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::models::LinkPreview;
    use crate::render::RenderedCard;
    use crate::storage::MemoryStorage;

    fn event(id: u64, tier: Option<RarityTier>, pct: Option<f64>) -> Event {
        Event {
            id,
            user_handle: format!("user{id}.bsky.social"),
            user_display_name: None,
            user_avatar_url: None,
            achievement_name: format!("Achievement {id}"),
            rarity_tier: tier,
            rarity_percentage: pct,
            share_url: None,
            earned_at: "2026-04-01T08:00:00Z".parse().unwrap(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap()
    }

    struct FixedSource(Vec<Event>);

    #[async_trait]
    impl EventSource for FixedSource {
        async fn fetch_since(&self, cursor: u64, _: &[String], limit: usize) -> Vec<Event> {
            self.0
                .iter()
                .filter(|e| e.id > cursor)
                .take(limit)
                .cloned()
                .collect()
        }
    }

    /// Counts fetches, then behaves like [`FixedSource`].
    struct CountingSource {
        inner: FixedSource,
        fetches: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventSource for CountingSource {
        async fn fetch_since(&self, cursor: u64, feed_ids: &[String], limit: usize) -> Vec<Event> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch_since(cursor, feed_ids, limit).await
        }
    }

    struct StubRenderer {
        fail: bool,
    }

    #[async_trait]
    impl Renderer for StubRenderer {
        async fn render(&self, event: &Event) -> Result<RenderedCard> {
            if self.fail {
                return Err(AppError::render("no canvas"));
            }
            Ok(RenderedCard {
                key: event.id.to_string(),
                location: format!("memory://cards/{}.png", event.id),
                png: vec![0x89, b'P', b'N', b'G'],
                cached: false,
            })
        }
    }

    struct StubResolver;

    #[async_trait]
    impl LinkResolver for StubResolver {
        async fn resolve(&self, url: &str) -> Option<LinkPreview> {
            Some(LinkPreview {
                url: url.to_string(),
                title: "Preview".to_string(),
                description: "Preview description".to_string(),
                thumbnail: None,
            })
        }
    }

    /// Records every post it is handed.
    struct Recorder {
        name: &'static str,
        accept: bool,
        posts: Arc<Mutex<Vec<Post>>>,
    }

    impl Recorder {
        fn new(name: &'static str, accept: bool) -> (Self, Arc<Mutex<Vec<Post>>>) {
            let posts = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    name,
                    accept,
                    posts: Arc::clone(&posts),
                },
                posts,
            )
        }
    }

    #[async_trait]
    impl Publisher for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn publish(&mut self, post: &Post) -> bool {
            self.posts.lock().unwrap().push(post.clone());
            self.accept
        }
    }

    fn settings() -> Settings {
        let mut config = Config::default();
        config.feed.feed_ids = vec!["feed".to_string()];
        let mut settings = Settings::from_config(&config);
        settings.post_delay = Duration::ZERO;
        settings.error_backoff = Duration::from_millis(10);
        settings
    }

    fn orchestrator(
        settings: Settings,
        events: Vec<Event>,
        publishers: Vec<Box<dyn Publisher>>,
        store: Arc<MemoryStorage>,
    ) -> Orchestrator {
        Orchestrator::new(
            settings,
            Box::new(FixedSource(events)),
            Box::new(StubRenderer { fail: false }),
            Box::new(StubResolver),
            publishers,
            store,
        )
    }

    #[test]
    fn test_settings_from_config() {
        let settings = Settings::from_config(&Config::default());
        assert_eq!(settings.max_posts_per_interval, 5);
        assert_eq!(settings.poll_interval, Duration::from_secs(600));
        assert_eq!(settings.min_tier, RarityTier::Bronze);
    }

    #[tokio::test]
    async fn test_publishes_rarest_first_within_interval_cap() {
        let (recorder, posts) = Recorder::new("rec", true);
        let mut settings = settings();
        settings.max_posts_per_interval = 2;
        let events = vec![
            event(1, Some(RarityTier::Gold), Some(40.0)),
            event(2, Some(RarityTier::Gold), Some(2.0)),
            event(3, Some(RarityTier::Gold), None),
            event(4, Some(RarityTier::Gold), Some(10.0)),
        ];
        let store = Arc::new(MemoryStorage::new());
        let mut orch = orchestrator(settings, events, vec![Box::new(recorder)], store.clone());

        let report = orch.run_cycle(now()).await.unwrap();

        assert_eq!(report.eligible, 4);
        assert_eq!(report.published, 2);
        assert!(!report.rate_limited);
        let messages: Vec<String> = posts.lock().unwrap().iter().map(|p| p.message.clone()).collect();
        assert!(messages[0].contains("Achievement 2"));
        assert!(messages[1].contains("Achievement 4"));
        assert_eq!(report.cursor, 4);
        assert_eq!(store.stored_cursor(), Some(4));
    }

    #[tokio::test]
    async fn test_hourly_cap_stops_cycle() {
        let (recorder, posts) = Recorder::new("rec", true);
        let mut settings = settings();
        settings.max_posts_per_hour = 2;
        settings.max_posts_per_interval = 5;
        let events = (1..=4)
            .map(|id| event(id, Some(RarityTier::Silver), Some(id as f64)))
            .collect();
        let store = Arc::new(MemoryStorage::new());
        let mut orch = orchestrator(settings, events, vec![Box::new(recorder)], store.clone());

        let report = orch.run_cycle(now()).await.unwrap();

        assert!(report.rate_limited);
        assert_eq!((report.attempted, report.published), (2, 2));
        assert_eq!(posts.lock().unwrap().len(), 2);
        assert_eq!(report.cursor, 4);
        assert_eq!(orch.window().count, 2);
        assert_eq!(store.load_window().await.map(|w| w.count), Some(2));
    }

    #[tokio::test]
    async fn test_failed_destination_does_not_block_others() {
        let (failing, failing_posts) = Recorder::new("down", false);
        let (working, working_posts) = Recorder::new("up", true);
        let events = vec![event(1, Some(RarityTier::Gold), Some(5.0))];
        let mut orch = orchestrator(
            settings(),
            events,
            vec![Box::new(failing), Box::new(working)],
            Arc::new(MemoryStorage::new()),
        );

        let report = orch.run_cycle(now()).await.unwrap();

        assert_eq!(report.published, 1);
        assert_eq!(failing_posts.lock().unwrap().len(), 1);
        assert_eq!(working_posts.lock().unwrap().len(), 1);
        assert_eq!(orch.window().count, 1);
    }

    #[tokio::test]
    async fn test_slot_released_when_every_destination_fails() {
        let (failing, _) = Recorder::new("down", false);
        let events = vec![event(1, Some(RarityTier::Gold), Some(5.0))];
        let mut orch = orchestrator(
            settings(),
            events,
            vec![Box::new(failing)],
            Arc::new(MemoryStorage::new()),
        );

        let report = orch.run_cycle(now()).await.unwrap();

        assert_eq!((report.attempted, report.published), (1, 0));
        assert_eq!(orch.window().count, 0);
        assert_eq!(orch.cursor(), 1);
    }

    #[tokio::test]
    async fn test_render_failure_publishes_without_media() {
        let (recorder, posts) = Recorder::new("rec", true);
        let mut e = event(1, Some(RarityTier::Gold), Some(5.0));
        e.share_url = Some("https://feedmaster.fema.monster/share/1".to_string());
        let mut orch = Orchestrator::new(
            settings(),
            Box::new(FixedSource(vec![e])),
            Box::new(StubRenderer { fail: true }),
            Box::new(StubResolver),
            vec![Box::new(recorder)],
            Arc::new(MemoryStorage::new()),
        );

        let report = orch.run_cycle(now()).await.unwrap();

        assert_eq!(report.published, 1);
        let posts = posts.lock().unwrap();
        assert!(posts[0].media.is_none());
        assert_eq!(
            posts[0].link.as_ref().map(|l| l.title.as_str()),
            Some("Preview")
        );
        assert!(posts[0].message.ends_with("\n\nhttps://feedmaster.fema.monster/share/1"));
    }

    #[tokio::test]
    async fn test_cursor_never_decreases() {
        let store = Arc::new(MemoryStorage::with_cursor(10));
        let events = vec![event(3, Some(RarityTier::Gold), Some(5.0))];
        let (recorder, posts) = Recorder::new("rec", true);
        let mut orch = orchestrator(settings(), events, vec![Box::new(recorder)], store.clone());
        orch.initialize(now()).await;

        let report = orch.run_cycle(now()).await.unwrap();

        assert_eq!(report.fetched, 0);
        assert_eq!(report.cursor, 10);
        assert_eq!(store.stored_cursor(), Some(10));
        assert!(posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ineligible_events_still_advance_cursor() {
        let events = vec![event(5, None, Some(1.0)), event(6, Some(RarityTier::Bronze), None)];
        let mut settings = settings();
        settings.min_tier = RarityTier::Silver;
        let (recorder, posts) = Recorder::new("rec", true);
        let mut orch = orchestrator(
            settings,
            events,
            vec![Box::new(recorder)],
            Arc::new(MemoryStorage::new()),
        );

        let report = orch.run_cycle(now()).await.unwrap();

        assert_eq!((report.fetched, report.eligible), (2, 0));
        assert_eq!(report.cursor, 6);
        assert!(posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_destinations_is_a_cycle_error() {
        let events = vec![event(1, Some(RarityTier::Gold), Some(5.0))];
        let mut orch = orchestrator(settings(), events, Vec::new(), Arc::new(MemoryStorage::new()));

        assert!(orch.run_cycle(now()).await.is_err());
        assert_eq!(orch.cursor(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_when_cancelled() {
        let (recorder, posts) = Recorder::new("rec", true);
        let events = vec![event(1, Some(RarityTier::Gold), Some(5.0))];
        let store = Arc::new(MemoryStorage::new());
        let mut orch = orchestrator(settings(), events, vec![Box::new(recorder)], store.clone());

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.cancel();
        });

        tokio::time::timeout(Duration::from_secs(5), orch.run(cancel))
            .await
            .unwrap();

        assert_eq!(posts.lock().unwrap().len(), 1);
        assert_eq!(store.stored_cursor(), Some(1));
        assert_eq!(orch.stage(), PipelineStage::Idle);
    }

    #[tokio::test]
    async fn test_failed_cycle_retries_after_error_backoff() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            inner: FixedSource(vec![event(1, Some(RarityTier::Gold), Some(5.0))]),
            fetches: Arc::clone(&fetches),
        };
        let mut settings = settings();
        settings.poll_interval = Duration::from_secs(3600);
        settings.error_backoff = Duration::from_millis(10);

        let mut orch = Orchestrator::new(
            settings,
            Box::new(source),
            Box::new(StubRenderer { fail: false }),
            Box::new(StubResolver),
            Vec::new(),
            Arc::new(MemoryStorage::new()),
        );

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stopper.cancel();
        });

        tokio::time::timeout(Duration::from_secs(5), orch.run(cancel))
            .await
            .unwrap();

        assert!(fetches.load(Ordering::SeqCst) >= 2);
        assert_eq!(orch.cursor(), 0);
        assert_eq!(orch.stage(), PipelineStage::Idle);
    }
}
