//! Integration tests for a full run: fetch, dedup against the cache, dispatch
//! to output handlers and persist the cache.
//!
//! Feeds are served by a local wiremock server. Each test works in its own
//! temp directory so cache and output files never collide.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use feedpoll::cache::FeedCache;
use feedpoll::config::{self, Config, RawConfig};
use feedpoll::hooks::{HookBus, HookFlow, HookPoint};
use feedpoll::output::OutputError;
use feedpoll::registry::RegistryError;
use feedpoll::{RunError, Runner};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn rss(title: &str, guids: &[&str]) -> String {
    let items: String = guids
        .iter()
        .map(|g| {
            format!(
                "<item><title>Item {g}</title><link>https://example.com/{g}</link><guid>{g}</guid>\
                 <description>About {g}</description></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>{title}</title><link>https://example.com/</link>
<description>test</description>{items}</channel></rss>"#
    )
}

fn work_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("feedpoll_run_{name}"));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

async fn serve(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

fn load(toml: &str) -> Config {
    let raw = RawConfig::from_toml_str(toml).unwrap();
    config::load(&raw, &HookBus::new()).unwrap()
}

fn json_handler(out: &Path) -> String {
    format!(
        "[OutputHandlerJson]\nClass = \"json\"\nPath = {:?}\n",
        out.display().to_string()
    )
}

fn read_updates(out: &Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(out).unwrap()).unwrap()
}

// ============================================================================
// Dedup across runs
// ============================================================================

#[tokio::test]
async fn test_second_run_reports_only_new_items() {
    let dir = work_dir("dedup");
    let cache_file = dir.join("cache.json");
    let out = dir.join("out.json");

    let server = MockServer::start().await;
    serve(&server, "/a.xml", rss("Feed A", &["a1", "a2"])).await;

    let toml = format!(
        "[feedpoll]\nCacheFile = {:?}\n\n[FeedA]\nURL = \"{}/a.xml\"\n\n{}",
        cache_file.display().to_string(),
        server.uri(),
        json_handler(&out)
    );

    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let report = Runner::new(load(&toml), HookBus::new()).run(now).await.unwrap();
    assert_eq!(report.feeds_fetched, 1);
    assert_eq!(report.new_items, 2);
    assert!(report.cache_saved);
    assert_eq!(report.handlers_succeeded, vec!["OutputHandlerJson".to_string()]);
    assert_eq!(read_updates(&out)[0]["channel"]["items"].as_array().unwrap().len(), 2);

    let cache = FeedCache::load(&cache_file).unwrap();
    assert_eq!(cache.len(), 2);

    // Same content again, plus one new item
    server.reset().await;
    serve(&server, "/a.xml", rss("Feed A", &["a1", "a2", "a3"])).await;

    let later = now + chrono::Duration::hours(1);
    let report = Runner::new(load(&toml), HookBus::new()).run(later).await.unwrap();
    assert_eq!(report.new_items, 1);
    let updates = read_updates(&out);
    let items = updates[0]["channel"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["key"], "a3");
    assert_eq!(FeedCache::load(&cache_file).unwrap().len(), 3);

    // Nothing new at all: the json sink still writes an empty array
    let report = Runner::new(load(&toml), HookBus::new()).run(later).await.unwrap();
    assert_eq!(report.new_items, 0);
    assert_eq!(read_updates(&out), serde_json::json!([]));

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_no_cache_update_leaves_cache_untouched() {
    let dir = work_dir("no_update");
    let cache_file = dir.join("cache.json");

    let server = MockServer::start().await;
    serve(&server, "/a.xml", rss("Feed A", &["a1"])).await;

    let toml = format!(
        "[feedpoll]\nCacheFile = {:?}\nNoCacheUpdate = true\n\n[FeedA]\nURL = \"{}/a.xml\"\n",
        cache_file.display().to_string(),
        server.uri(),
    );
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

    let report = Runner::new(load(&toml), HookBus::new()).run(now).await.unwrap();
    assert_eq!(report.new_items, 1);
    assert!(!report.cache_saved);
    assert!(!cache_file.exists());

    // Still new on the next run
    let report = Runner::new(load(&toml), HookBus::new()).run(now).await.unwrap();
    assert_eq!(report.new_items, 1);

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_download_only_run_still_updates_cache() {
    let dir = work_dir("download_only");
    let cache_file = dir.join("cache.json");

    let server = MockServer::start().await;
    serve(&server, "/a.xml", rss("Feed A", &["a1", "a2"])).await;

    let toml = format!(
        "[feedpoll]\nCacheFile = {:?}\n\n[FeedA]\nURL = \"{}/a.xml\"\n",
        cache_file.display().to_string(),
        server.uri(),
    );
    let config = load(&toml);
    assert!(config.is_download_only());

    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let report = Runner::new(config, HookBus::new()).run(now).await.unwrap();
    assert_eq!(report.new_items, 2);
    assert!(report.handlers_succeeded.is_empty());
    assert!(report.handlers_failed.is_empty());
    assert!(report.cache_saved);

    let cache = FeedCache::load(&cache_file).unwrap();
    let channel = format!("{}/a.xml", server.uri());
    assert!(cache.contains(&channel, "a1"));
    assert!(cache.contains(&channel, "a2"));

    std::fs::remove_dir_all(&dir).ok();
}

// ============================================================================
// Failure isolation
// ============================================================================

#[tokio::test]
async fn test_failing_feed_does_not_affect_others() {
    let dir = work_dir("isolation");
    let out = dir.join("out.json");

    let server = MockServer::start().await;
    serve(&server, "/good.xml", rss("Good", &["g1"])).await;
    Mock::given(method("GET"))
        .and(path("/gone.xml"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    serve(&server, "/broken.xml", "<html><body>not a feed</body></html>".to_string()).await;

    let toml = format!(
        "[feedpoll]\n\n[FeedGone]\nURL = \"{uri}/gone.xml\"\n\n\
         [FeedGood]\nURL = \"{uri}/good.xml\"\n\n\
         [FeedBroken]\nURL = \"{uri}/broken.xml\"\n\n{handler}",
        uri = server.uri(),
        handler = json_handler(&out)
    );

    let report = Runner::new(load(&toml), HookBus::new()).run(Utc::now()).await.unwrap();
    assert_eq!(report.feeds_fetched, 1);
    assert_eq!(
        report.feeds_failed,
        vec!["FeedGone".to_string(), "FeedBroken".to_string()]
    );
    assert_eq!(report.new_items, 1);

    let updates = read_updates(&out);
    assert_eq!(updates.as_array().unwrap().len(), 1);
    assert_eq!(updates[0]["section"], "FeedGood");

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_unreadable_cache_starts_empty() {
    let dir = work_dir("corrupt_cache");
    let cache_file = dir.join("cache.json");
    std::fs::write(&cache_file, "this is not json").unwrap();

    let server = MockServer::start().await;
    serve(&server, "/a.xml", rss("Feed A", &["a1"])).await;

    let toml = format!(
        "[feedpoll]\nCacheFile = {:?}\n\n[FeedA]\nURL = \"{}/a.xml\"\n",
        cache_file.display().to_string(),
        server.uri(),
    );

    let report = Runner::new(load(&toml), HookBus::new()).run(Utc::now()).await.unwrap();
    assert_eq!(report.new_items, 1);
    assert!(report.cache_saved);
    assert_eq!(FeedCache::load(&cache_file).unwrap().len(), 1);

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_pre_cache_save_hook_error_skips_save() {
    let dir = work_dir("pre_save_hook");
    let cache_file = dir.join("cache.json");

    let server = MockServer::start().await;
    serve(&server, "/a.xml", rss("Feed A", &["a1"])).await;

    let toml = format!(
        "[feedpoll]\nCacheFile = {:?}\n\n[FeedA]\nURL = \"{}/a.xml\"\n",
        cache_file.display().to_string(),
        server.uri(),
    );

    let seen = Arc::new(AtomicUsize::new(0));
    let mut hooks = HookBus::new();
    let counter = Arc::clone(&seen);
    hooks.register_fn(&[HookPoint::PreCacheSave], "veto", move |event| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(feedpoll::hooks::HookError::new(
            "veto",
            event.point(),
            "read-only run",
        ))
    });

    let report = Runner::new(load(&toml), hooks).run(Utc::now()).await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(report.cache_entries, 1);
    assert!(!report.cache_saved);
    assert!(!cache_file.exists());

    std::fs::remove_dir_all(&dir).ok();
}

// ============================================================================
// Setup errors
// ============================================================================

#[tokio::test]
async fn test_unknown_parser_fails_before_fetching() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss("A", &["a1"])))
        .expect(0)
        .mount(&server)
        .await;

    let toml = format!(
        "[feedpoll]\nParserClass = \"no-such-parser\"\n\n[FeedA]\nURL = \"{}/a.xml\"\n",
        server.uri()
    );

    let err = Runner::new(load(&toml), HookBus::new())
        .run(Utc::now())
        .await
        .unwrap_err();
    match err {
        RunError::Registry(RegistryError::UnknownParser { id, available }) => {
            assert_eq!(id, "no-such-parser");
            assert!(available.contains(&"feed-rs".to_string()));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_output_class_fails_before_fetching() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss("A", &["a1"])))
        .expect(0)
        .mount(&server)
        .await;

    let toml = format!(
        "[feedpoll]\n\n[FeedA]\nURL = \"{}/a.xml\"\n\n[OutputHandlerPigeon]\nClass = \"carrier-pigeon\"\n",
        server.uri()
    );

    let err = Runner::new(load(&toml), HookBus::new())
        .run(Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RunError::Output(OutputError::Registry(RegistryError::UnknownOutput { .. }))
    ));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_fetch_concurrency_is_bounded() {
    let server = MockServer::start().await;
    let mut toml = String::from("[feedpoll]\nMaxThreads = 2\n\n");
    for n in 0..5 {
        Mock::given(method("GET"))
            .and(path(format!("/slow{n}.xml")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(rss(&format!("Slow {n}"), &[&format!("s{n}")]))
                    .set_delay(Duration::from_millis(150)),
            )
            .mount(&server)
            .await;
        toml.push_str(&format!("[FeedSlow{n}]\nURL = \"{}/slow{n}.xml\"\n\n", server.uri()));
    }

    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut hooks = HookBus::new();
    let (current, max) = (Arc::clone(&in_flight), Arc::clone(&peak));
    hooks.register_fn(&[HookPoint::PreFetch], "enter", move |_| {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Ok(HookFlow::Continue)
    });
    let current = Arc::clone(&in_flight);
    hooks.register_fn(&[HookPoint::PostParse], "leave", move |_| {
        current.fetch_sub(1, Ordering::SeqCst);
        Ok(HookFlow::Continue)
    });

    let report = Runner::new(load(&toml), hooks).run(Utc::now()).await.unwrap();
    assert_eq!(report.feeds_fetched, 5);
    assert_eq!(report.new_items, 5);
    assert!(report.feeds_failed.is_empty());

    let peak = peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= 2, "peak concurrency was {peak}");
    assert_eq!(in_flight.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_output_follows_declaration_order_not_completion_order() {
    let dir = work_dir("ordering");
    let out = dir.join("out.json");

    let server = MockServer::start().await;
    let mut toml = String::from("[feedpoll]\nMaxThreads = 5\n\n");
    for n in 0..4u64 {
        // Earlier sections answer later, so completion order is reversed
        Mock::given(method("GET"))
            .and(path(format!("/order{n}.xml")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(rss(&format!("Order {n}"), &[&format!("o{n}")]))
                    .set_delay(Duration::from_millis(100 * (4 - n))),
            )
            .mount(&server)
            .await;
        toml.push_str(&format!("[FeedOrder{n}]\nURL = \"{}/order{n}.xml\"\n\n", server.uri()));
    }
    toml.push_str(&json_handler(&out));

    let completed = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut hooks = HookBus::new();
    let seen = Arc::clone(&completed);
    hooks.register_fn(&[HookPoint::PostParse], "completion", move |event| {
        if let feedpoll::hooks::HookEvent::PostParse { policy, .. } = event {
            seen.lock().unwrap().push(policy.section.clone());
        }
        Ok(HookFlow::Continue)
    });

    let report = Runner::new(load(&toml), hooks).run(Utc::now()).await.unwrap();
    assert_eq!(report.feeds_fetched, 4);

    let declared: Vec<String> = (0..4).map(|n| format!("FeedOrder{n}")).collect();
    let completed = completed.lock().unwrap().clone();
    assert_ne!(completed, declared, "feeds finished in declaration order");

    let updates = read_updates(&out);
    let sections: Vec<String> = updates
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["section"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(sections, declared);

    std::fs::remove_dir_all(&dir).ok();
}
