use super::*;
use crate::db::Database;
use crate::dispatch::{Module, ModuleContext};
use crate::error::DatabaseError;
use crate::types::{AccountId, NewUser};
use async_trait::async_trait;
use std::sync::Mutex;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    server: MockServer,
    db: Arc<Database>,
    _temp: NamedTempFile,
}

impl Harness {
    async fn new(accounts: &[&str]) -> Self {
        let temp = NamedTempFile::new().unwrap();
        let db = Arc::new(Database::new(temp.path()).await.unwrap());
        for id in accounts {
            db.insert_user(&NewUser {
                id: AccountId::from(*id),
                uuid: format!("uuid-{id}"),
                locale: "en-US".into(),
                modules: vec!["games".into(), "broken".into()],
                data: PlayerData::default(),
            })
            .await
            .unwrap();
        }
        Self {
            server: MockServer::start().await,
            db,
            _temp: temp,
        }
    }

    fn config(&self) -> Config {
        let mut config = Config::default();
        config.api.base_url = self.server.uri();
        config.api.api_key = "test-key".into();
        config.runtime.rest_request_timeout = Duration::from_millis(200);
        config.runtime.retry_limit = 0;
        config
    }

    fn scheduler(&self, config: &Config, dispatcher: ModuleDispatcher) -> PollScheduler {
        PollScheduler::new(config, self.db.clone(), dispatcher).unwrap()
    }

    async fn respond(&self, uuid: &str, template: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path("/status"))
            .and(query_param("uuid", uuid))
            .respond_with(template)
            .mount(&self.server)
            .await;
    }

    async fn user(&self, id: &str) -> UserRecord {
        self.db.get_user(&AccountId::from(id)).await.unwrap().unwrap()
    }
}

fn status_body(last_login: i64) -> serde_json::Value {
    serde_json::json!({
        "uuid": "ignored",
        "lastLogin": last_login,
        "gameType": "BEDWARS"
    })
}

/// Serve headers promising 100 bytes, send one, then go quiet
async fn stalled_body_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n{")
                    .await;
                tokio::time::sleep(Duration::from_secs(30)).await;
            });
        }
    });
    format!("http://{addr}")
}

struct Scripted {
    name: &'static str,
    fail: bool,
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Module for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    fn requires_online_status(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &ModuleContext<'_>) -> Result<()> {
        self.calls.lock().unwrap().push(ctx.user.id.to_string());
        if self.fail {
            return Err(Error::Other("webhook rejected".into()));
        }
        Ok(())
    }
}

fn scripted(name: &'static str, fail: bool, calls: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Module> {
    Arc::new(Scripted {
        name,
        fail,
        calls: calls.clone(),
    })
}

#[tokio::test]
async fn test_cycle_fetches_diffs_and_dispatches() {
    let h = Harness::new(&["alice", "bob"]).await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .and(header("API-Key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body(1_000)))
        .expect(2)
        .mount(&h.server)
        .await;

    let calls = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = ModuleDispatcher::new().with_module(scripted("games", false, &calls));
    let mut scheduler = h.scheduler(&h.config(), dispatcher);

    let summary = scheduler.run_cycle().await.unwrap();

    assert_eq!(
        summary,
        CycleSummary {
            accounts: 2,
            succeeded: 2,
            changed: 2,
            ..Default::default()
        }
    );
    assert_eq!(*calls.lock().unwrap(), vec!["alice", "bob"]);

    let alice = h.user("alice").await;
    assert_eq!(alice.data.last_login, Some(1_000));
    assert_eq!(alice.data.game_type.as_deref(), Some("BEDWARS"));
    assert_eq!(alice.history.len(), 1);
    assert!(alice.last_updated.is_some());

    assert_eq!(scheduler.metrics().len(), 2);
    assert_eq!(scheduler.metrics().latest().unwrap().account, "bob");
    assert_eq!(scheduler.metrics().latest().unwrap().modules[0].name, "games");
    assert_eq!(scheduler.status().cycles, 1);
}

#[tokio::test]
async fn test_unchanged_status_runs_no_modules() {
    let h = Harness::new(&["alice"]).await;
    h.respond(
        "uuid-alice",
        ResponseTemplate::new(200).set_body_json(status_body(1_000)),
    )
    .await;

    let calls = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = ModuleDispatcher::new().with_module(scripted("games", false, &calls));
    let mut scheduler = h.scheduler(&h.config(), dispatcher);

    scheduler.run_cycle().await.unwrap();
    let second = scheduler.run_cycle().await.unwrap();

    assert_eq!(second.succeeded, 1);
    assert_eq!(second.changed, 0);
    assert_eq!(calls.lock().unwrap().len(), 1);
    assert_eq!(h.user("alice").await.history.len(), 1);
}

#[tokio::test]
async fn test_unknown_account_is_left_untouched() {
    let h = Harness::new(&["alice", "ghost"]).await;
    h.respond(
        "uuid-alice",
        ResponseTemplate::new(200).set_body_json(status_body(1_000)),
    )
    .await;
    h.respond("uuid-ghost", ResponseTemplate::new(404)).await;

    let mut scheduler = h.scheduler(&h.config(), ModuleDispatcher::new());
    let summary = scheduler.run_cycle().await.unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    let ghost = h.user("ghost").await;
    assert_eq!(ghost.last_updated, None);
    assert_eq!(ghost.data, PlayerData::default());
    assert_eq!(
        scheduler
            .classifier()
            .timer(ErrorCategory::Generic)
            .failures_last_hour(),
        1
    );
}

#[tokio::test]
async fn test_rate_limit_uses_reset_header_and_global_flag() {
    let h = Harness::new(&["alice"]).await;
    h.respond(
        "uuid-alice",
        ResponseTemplate::new(429)
            .insert_header("RateLimit-Reset", "5")
            .set_body_json(serde_json::json!({ "global": true })),
    )
    .await;

    let mut scheduler = h.scheduler(&h.config(), ModuleDispatcher::new());
    let summary = scheduler.run_cycle().await.unwrap();

    assert_eq!(summary.failed, 1);
    let classifier = scheduler.classifier();
    assert!(classifier.is_global_rate_limit());
    assert!(classifier.is_timeout());
    assert_eq!(
        classifier.timer(ErrorCategory::RateLimit).pause_for(),
        Duration::from_secs(6)
    );
    assert_eq!(classifier.get_timeout(), Duration::from_secs(6));
}

#[tokio::test]
async fn test_success_clears_global_rate_limit() {
    let h = Harness::new(&["alice", "bob"]).await;
    h.respond(
        "uuid-alice",
        ResponseTemplate::new(429)
            .insert_header("Retry-After", "0")
            .set_body_json(serde_json::json!({ "global": true })),
    )
    .await;
    h.respond(
        "uuid-bob",
        ResponseTemplate::new(200).set_body_json(status_body(1_000)),
    )
    .await;

    let mut scheduler = h.scheduler(&h.config(), ModuleDispatcher::new());
    let started = Instant::now();
    let summary = scheduler.run_cycle().await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 1);
    assert!(started.elapsed() >= Duration::from_secs(1), "waited for reset");
    assert!(!scheduler.classifier().is_global_rate_limit());
}

#[tokio::test]
async fn test_consecutive_aborts_end_the_cycle() {
    let h = Harness::new(&["alice", "bob", "carol"]).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(1_000)))
        .expect(1)
        .mount(&h.server)
        .await;

    let mut config = h.config();
    config.runtime.abort_threshold = 1;
    let mut scheduler = h.scheduler(&config, ModuleDispatcher::new());

    let summary = scheduler.run_cycle().await.unwrap();

    assert!(summary.cut_short);
    assert_eq!(summary.accounts, 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(
        scheduler
            .classifier()
            .timer(ErrorCategory::Abort)
            .failures_last_hour(),
        1
    );
}

#[tokio::test]
async fn test_max_retries_repolls_after_abort() {
    let h = Harness::new(&["alice"]).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(1_000)))
        .up_to_n_times(1)
        .expect(1)
        .mount(&h.server)
        .await;
    h.respond(
        "uuid-alice",
        ResponseTemplate::new(200).set_body_json(status_body(2_000)),
    )
    .await;

    let mut config = h.config();
    config.runtime.max_retries = 1;
    let mut scheduler = h.scheduler(&config, ModuleDispatcher::new());

    let summary = scheduler.run_cycle().await.unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(h.user("alice").await.data.last_login, Some(2_000));
}

#[tokio::test]
async fn test_module_failure_does_not_stop_the_cycle() {
    let h = Harness::new(&["alice", "bob"]).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body(1_000)))
        .mount(&h.server)
        .await;

    let calls = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = ModuleDispatcher::new()
        .with_module(scripted("broken", true, &calls))
        .with_module(scripted("games", false, &calls));
    let mut scheduler = h.scheduler(&h.config(), dispatcher);

    let summary = scheduler.run_cycle().await.unwrap();

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.module_failures, 2);
    // The failing module runs first and stops "games" for each account
    assert_eq!(*calls.lock().unwrap(), vec!["alice", "bob"]);
    assert_eq!(h.user("bob").await.data.last_login, Some(1_000));
}

#[tokio::test]
async fn test_module_failure_keeps_earlier_module_timings() {
    let h = Harness::new(&["alice"]).await;
    h.respond(
        "uuid-alice",
        ResponseTemplate::new(200).set_body_json(status_body(1_000)),
    )
    .await;

    let calls = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = ModuleDispatcher::new()
        .with_module(scripted("games", false, &calls))
        .with_module(scripted("broken", true, &calls));
    let mut scheduler = h.scheduler(&h.config(), dispatcher);

    let summary = scheduler.run_cycle().await.unwrap();

    assert_eq!(summary.module_failures, 1);
    let record = scheduler.metrics().latest().unwrap();
    let names: Vec<&str> = record.modules.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["games"]);
}

#[tokio::test]
async fn test_stalled_body_aborts_within_deadline() {
    let h = Harness::new(&["alice"]).await;
    let mut config = h.config();
    config.api.base_url = stalled_body_server().await;
    let mut scheduler = h.scheduler(&config, ModuleDispatcher::new());

    let summary = tokio::time::timeout(Duration::from_secs(5), scheduler.run_cycle())
        .await
        .expect("cycle must not hang on a stalled body")
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(
        scheduler
            .classifier()
            .timer(ErrorCategory::Abort)
            .failures_last_hour(),
        1
    );
    assert_eq!(h.user("alice").await.last_updated, None);
}

#[tokio::test]
async fn test_http_retries_count_against_budget() {
    let h = Harness::new(&["alice"]).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&h.server)
        .await;

    let mut config = h.config();
    config.runtime.retry_limit = 2;
    let mut scheduler = h.scheduler(&config, ModuleDispatcher::new());

    let summary = scheduler.run_cycle().await.unwrap();

    assert_eq!(summary.failed, 1);
    let budget = scheduler.budget().status();
    assert_eq!(budget.window_usage, 3);
    assert_eq!(budget.remaining, budget.allowance as i64 - 3);
}

#[tokio::test]
async fn test_spent_budget_waits_for_window_rollover() {
    let h = Harness::new(&["alice", "bob"]).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(move |_: &wiremock::Request| {
            log.lock().unwrap().push(std::time::Instant::now());
            ResponseTemplate::new(200).set_body_json(status_body(1_000))
        })
        .expect(2)
        .mount(&h.server)
        .await;

    // Allowance of one request per one-second window
    let mut config = h.config();
    config.budget.window_limit = 1;
    config.budget.window = Duration::from_secs(1);
    let mut scheduler = h.scheduler(&config, ModuleDispatcher::new());

    let summary = scheduler.run_cycle().await.unwrap();

    assert_eq!(summary.succeeded, 2);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    let gap = seen[1].duration_since(seen[0]);
    assert!(
        gap >= Duration::from_millis(900),
        "second request issued before the window rolled over: {gap:?}"
    );
}

#[tokio::test]
async fn test_budget_follows_rate_limit_headers_and_fraction() {
    let h = Harness::new(&["alice"]).await;
    h.respond(
        "uuid-alice",
        ResponseTemplate::new(200)
            .insert_header("RateLimit-Limit", "100")
            .insert_header("RateLimit-Remaining", "90")
            .insert_header("RateLimit-Reset", "60")
            .set_body_json(status_body(1_000)),
    )
    .await;

    let mut scheduler = h.scheduler(&h.config(), ModuleDispatcher::new());
    scheduler.run_cycle().await.unwrap();

    let budget = scheduler.budget().status();
    assert_eq!(budget.window_limit, 100);
    assert_eq!(budget.window_usage, 10);
    assert_eq!(budget.remaining, 90);

    scheduler
        .config_handle()
        .update(|c| c.key_fraction = 0.5)
        .unwrap();
    scheduler.run_cycle().await.unwrap();

    let budget = scheduler.budget().status();
    assert_eq!(budget.fraction, 0.5);
    assert_eq!(budget.allowance, 50);
    assert_eq!(budget.remaining, 40);
}

struct BrokenStore;

#[async_trait]
impl UserStore for BrokenStore {
    async fn get_user(&self, _id: &AccountId) -> Result<Option<UserRecord>> {
        Err(Error::Database(DatabaseError::QueryFailed("disk I/O error".into())))
    }

    async fn update_user(&self, _id: &AccountId, _update: crate::types::UserUpdate) -> Result<()> {
        Err(Error::Database(DatabaseError::QueryFailed("disk I/O error".into())))
    }

    async fn new_user(&self, _user: NewUser) -> Result<()> {
        Err(Error::Database(DatabaseError::QueryFailed("disk I/O error".into())))
    }

    async fn get_all_users(&self) -> Result<Vec<UserRecord>> {
        Err(Error::Database(DatabaseError::QueryFailed("disk I/O error".into())))
    }

    async fn delete_user(&self, _id: &AccountId) -> Result<bool> {
        Err(Error::Database(DatabaseError::QueryFailed("disk I/O error".into())))
    }
}

#[tokio::test]
async fn test_persistence_failure_ends_run() {
    let server = MockServer::start().await;
    let mut config = Config::default();
    config.api.base_url = server.uri();
    config.api.api_key = "test-key".into();

    let mut scheduler =
        PollScheduler::new(&config, Arc::new(BrokenStore), ModuleDispatcher::new()).unwrap();

    let err = scheduler.run().await.unwrap_err();
    assert!(err.is_fatal(), "got {err:?}");
}

#[test]
fn test_status_url_encodes_uuid() {
    let url = status_url("http://api.test/", "a b&c").unwrap();
    assert_eq!(url.as_str(), "http://api.test/status?uuid=a+b%26c");
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let temp = NamedTempFile::new().unwrap();
    let config = Config::default(); // no API key
    let db = Database::new(temp.path()).await.unwrap();

    let result = PollScheduler::new(&config, Arc::new(db), ModuleDispatcher::new());
    assert!(matches!(result, Err(Error::Config { .. })));
}
