//! Database, config and mock API fixtures

use serde_json::{Value, json};
use status_sentinel::{AccountId, Config, Database, NewUser, PlayerData};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// API key the mock server expects
pub const TEST_API_KEY: &str = "11111111-2222-3333-4444-555555555555";

/// Database in a temporary directory, kept alive by the returned `TempDir`
pub async fn create_test_db() -> (Arc<Database>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("sentinel.db"))
        .await
        .unwrap();
    (Arc::new(db), temp_dir)
}

/// Configuration pointing at `server` with fast deadlines
pub fn test_config(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.api.base_url = server.uri();
    config.api.api_key = TEST_API_KEY.to_string();
    config.runtime.rest_request_timeout = Duration::from_millis(500);
    config.runtime.retry_limit = 0;
    config
}

/// Register `id` with the given modules and remote fields
pub async fn register(db: &Database, id: &str, modules: &[&str], data: PlayerData) {
    db.insert_user(&NewUser {
        id: AccountId::from(id),
        uuid: uuid_for(id),
        locale: "en-US".to_string(),
        modules: modules.iter().map(|m| m.to_string()).collect(),
        data,
    })
    .await
    .unwrap();
}

/// Game account uuid used for a registered id
pub fn uuid_for(id: &str) -> String {
    format!("uuid-{id}")
}

/// Status body as the API returns it
pub fn status_json(uuid: &str, last_login: Option<i64>, last_logout: Option<i64>) -> Value {
    json!({
        "uuid": uuid,
        "lastLogin": last_login,
        "lastLogout": last_logout,
        "version": "1.8.9",
    })
}

/// Answer status requests for `uuid` with `body`
pub async fn mount_status(server: &MockServer, uuid: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path("/status"))
        .and(query_param("uuid", uuid))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}
