//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use kwapi_core::{ApiConfig, AuthToken, ProgressSink, Session};
use wiremock::MockServer;

pub const USER: &str = "alice@example.com";

/// Config pointed at the mock server with a fast backoff.
pub fn config_for(server: &MockServer) -> ApiConfig {
    config_for_uri(&server.uri())
}

/// Same as [`config_for`] for an arbitrary base URL.
pub fn config_for_uri(uri: &str) -> ApiConfig {
    let mut config = ApiConfig::new("kw.example.com")
        .expect("valid host")
        .with_endpoint(uri)
        .expect("valid endpoint")
        .with_application_id("test-app")
        .with_redirect_uri("https://kw.example.com/rest/callback.html")
        .with_backoff_unit(Duration::from_millis(1))
        .with_timeouts(Duration::from_secs(5), Duration::from_secs(5));
    config.set_client_secret("test-secret").expect("secret sealed");
    config
}

/// Session with a valid stored access token `tok`.
pub async fn session_for(server: &MockServer) -> Session {
    let session = Session::new(Arc::new(config_for(server)), USER);
    store_token(&session, "tok", "ref").await;
    session
}

pub async fn store_token(session: &Session, access: &str, refresh: &str) {
    session
        .set_token(&AuthToken::from_grant(access.into(), refresh.into(), 3600))
        .await
        .expect("token stored");
}

/// Records every line the monitor emits.
#[derive(Default)]
pub struct CaptureSink {
    pub flashes: Mutex<Vec<String>>,
    pub logs: Mutex<Vec<String>>,
}

impl ProgressSink for CaptureSink {
    fn flash(&self, line: &str) {
        self.flashes.lock().expect("lock").push(line.to_string());
    }

    fn log(&self, line: &str) {
        self.logs.lock().expect("lock").push(line.to_string());
    }
}
