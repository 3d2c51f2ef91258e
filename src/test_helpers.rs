//! Test helper factories and state builders
#![allow(dead_code)]

use crate::api::{FeedState, ServerState};
use crate::store::{Document, MemoryStoreOptions};
use crate::stream::SessionConfig;
use crate::Config;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Config with short timings suitable for tests
pub fn test_config() -> Config {
    Config {
        server_port: 0,
        watcher_backoff: Duration::from_millis(50),
        lookup_timeout: Duration::from_secs(1),
        stream: SessionConfig::default(),
        store: MemoryStoreOptions::default(),
    }
}

/// Server state over an empty in-memory store, watcher not started
pub fn mock_server_state() -> FeedState {
    Arc::new(ServerState::new(&test_config()))
}

/// Convert a JSON object literal into a document
pub fn fields(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

/// A company record as a client would submit it
pub fn test_company(id: &str, name: &str, lat: f64, lng: f64) -> Document {
    fields(json!({
        "_id": id,
        "name": name,
        "address": format!("{} Main St", name),
        "lat": lat,
        "lng": lng,
    }))
}
