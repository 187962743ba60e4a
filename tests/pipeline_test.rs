//! End-to-end cycle against mocked upstream and destination endpoints.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use feedmaster_bot::models::{Config, DiscordConfig};
use feedmaster_bot::pipeline::{Orchestrator, Settings};
use feedmaster_bot::publishers;
use feedmaster_bot::render::CardRenderer;
use feedmaster_bot::services::{FeedClient, MetadataResolver};
use feedmaster_bot::storage::{CursorStore, LocalStorage};
use feedmaster_bot::utils::retry::RetryPolicy;
use reqwest::Client;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

/// Raw body substring match; multipart bodies carry binary PNG data.
struct BodyContains(&'static str);

impl Match for BodyContains {
    fn matches(&self, request: &Request) -> bool {
        let needle = self.0.as_bytes();
        request.body.windows(needle.len()).any(|w| w == needle)
    }
}

fn achievement(id: u64, tier: &str, share_url: Option<String>) -> serde_json::Value {
    json!({
        "id": id,
        "user_handle": format!("user{id}.bsky.social"),
        "user_display_name": format!("User {id}"),
        "achievement_name": format!("Achievement {id}"),
        "rarity_tier": tier,
        "rarity_percentage": 10.0 / id as f64,
        "share_url": share_url,
        "earned_at": "2026-06-01T12:00:00Z",
    })
}

fn config(server: &MockServer, storage: &TempDir) -> Config {
    let mut config = Config::default();
    config.feed.api_base = format!("{}/api/v1", server.uri());
    config.feed.feed_ids = vec!["at://did:plc:feed/app.bsky.feed.generator/rare".to_string()];
    config.feed.min_rarity_tier = "Gold".to_string();
    config.posting.post_delay_secs = 0;
    config.storage.root_dir = storage.path().to_path_buf();
    config.discord = Some(DiscordConfig {
        webhook_url: format!("{}/api/webhooks/1/token", server.uri()),
    });
    config
}

fn orchestrator(config: &Config) -> Orchestrator {
    let client = Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let storage = Arc::new(LocalStorage::new(&config.storage.root_dir));

    Orchestrator::new(
        Settings::from_config(config),
        Box::new(FeedClient::new(client.clone(), &config.feed.api_base).unwrap()),
        Box::new(CardRenderer::with_font(
            client.clone(),
            storage.clone(),
            None,
            &config.render.brand_label,
        )),
        Box::new(MetadataResolver::with_retry(client.clone(), RetryPolicy::immediate(3))),
        publishers::from_config(config, &client),
        storage,
    )
}

#[tokio::test]
async fn test_only_eligible_event_is_published_and_cursor_advances() {
    let server = MockServer::start().await;
    let storage = TempDir::new().unwrap();
    let share_url = format!("{}/share/3", server.uri());

    Mock::given(method("GET"))
        .and(path("/api/v1/achievements/recent"))
        .and(query_param("since_id", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "achievements": [
                achievement(1, "Bronze", None),
                achievement(2, "Bronze", None),
                achievement(3, "Gold", Some(share_url.clone())),
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/share/3"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><head><meta property="og:title" content="Achievement 3"></head></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/webhooks/1/token"))
        .and(BodyContains("Achievement 3"))
        .and(BodyContains("attachment://card.png"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let config = config(&server, &storage);
    let mut orch = orchestrator(&config);
    orch.initialize(Utc::now()).await;
    let report = orch.run_cycle(Utc::now()).await.unwrap();

    assert_eq!(report.fetched, 3);
    assert_eq!(report.eligible, 1);
    assert_eq!(report.published, 1);
    assert_eq!(report.cursor, 3);

    let local = LocalStorage::new(storage.path());
    assert_eq!(local.load().await, 3);
    assert_eq!(local.load_window().await.map(|w| w.count), Some(1));
    assert_eq!(local.card_count().await.unwrap(), 1);
    let cursor_file = std::fs::read_to_string(storage.path().join("cursor.txt")).unwrap();
    assert_eq!(cursor_file.trim(), "3");
}

#[tokio::test]
async fn test_restart_does_not_republish_seen_events() {
    let server = MockServer::start().await;
    let storage = TempDir::new().unwrap();

    // Upstream ignores since_id and always returns the same batch.
    Mock::given(method("GET"))
        .and(path("/api/v1/achievements/recent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "achievements": [achievement(7, "Mythic", None)]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/webhooks/1/token"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let config = config(&server, &storage);

    let mut first = orchestrator(&config);
    first.initialize(Utc::now()).await;
    assert_eq!(first.run_cycle(Utc::now()).await.unwrap().published, 1);

    let mut second = orchestrator(&config);
    second.initialize(Utc::now()).await;
    assert_eq!(second.cursor(), 7);
    let report = second.run_cycle(Utc::now()).await.unwrap();
    assert_eq!((report.fetched, report.published), (0, 0));
    assert_eq!(second.window().count, 1);
}

#[tokio::test]
async fn test_upstream_outage_keeps_cursor() {
    let server = MockServer::start().await;
    let storage = TempDir::new().unwrap();
    std::fs::write(storage.path().join("cursor.txt"), "42").unwrap();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let config = config(&server, &storage);
    let mut orch = orchestrator(&config);
    orch.initialize(Utc::now()).await;
    let report = orch.run_cycle(Utc::now()).await.unwrap();

    assert_eq!(report.fetched, 0);
    assert_eq!(report.cursor, 42);
    assert_eq!(LocalStorage::new(storage.path()).load().await, 42);
}
