#![allow(dead_code)]

use async_trait::async_trait;
use infra_mcp::services::transport::{HttpTransport, OutboundRequest, RawResponse, TransportError};
use once_cell::sync::Lazy;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;

pub static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub fn temp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

/// In-process transport that replays canned responses in order and
/// records every request it was handed.
#[derive(Default)]
pub struct ScriptedTransport {
    script: StdMutex<VecDeque<Result<RawResponse, TransportError>>>,
    seen: StdMutex<Vec<OutboundRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, status: u16, body: serde_json::Value) -> Self {
        self.push(Ok(RawResponse::new(status, body.to_string())))
    }

    pub fn fail(self, err: TransportError) -> Self {
        self.push(Err(err))
    }

    fn push(self, entry: Result<RawResponse, TransportError>) -> Self {
        self.script.lock().expect("script lock").push_back(entry);
        self
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.seen.lock().expect("seen lock").clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().expect("script lock").len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: OutboundRequest) -> Result<RawResponse, TransportError> {
        self.seen.lock().expect("seen lock").push(request);
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Other("script exhausted".to_string())))
    }
}
