//! Scripted network for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use backstage_core::Error;
use backstage_core::policy::{InterceptedRequest, ResponseSnapshot};

use crate::fetch::Network;

#[derive(Clone)]
enum Reply {
    Respond(ResponseSnapshot),
    Fail,
}

#[derive(Default)]
struct Script {
    replies: HashMap<String, Reply>,
    delays: HashMap<String, Duration>,
    calls: HashMap<String, usize>,
}

/// Answers by exact URL; unknown URLs fail like an unreachable host.
#[derive(Default)]
pub(crate) struct MockNetwork {
    script: Mutex<Script>,
}

impl MockNetwork {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn respond(&self, url: &str, status: u16, body: &str) {
        self.script
            .lock()
            .unwrap()
            .replies
            .insert(url.to_string(), Reply::Respond(ResponseSnapshot::new(status, body)));
    }

    pub(crate) fn fail(&self, url: &str) {
        self.script.lock().unwrap().replies.insert(url.to_string(), Reply::Fail);
    }

    pub(crate) fn delay(&self, url: &str, delay: Duration) {
        self.script.lock().unwrap().delays.insert(url.to_string(), delay);
    }

    pub(crate) fn calls(&self, url: &str) -> usize {
        self.script.lock().unwrap().calls.get(url).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.script.lock().unwrap().calls.values().sum()
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<ResponseSnapshot, Error> {
        let url = request.url.as_str().to_string();
        let (reply, delay) = {
            let mut script = self.script.lock().unwrap();
            *script.calls.entry(url.clone()).or_default() += 1;
            (script.replies.get(&url).cloned(), script.delays.get(&url).copied())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match reply {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Fail) | None => Err(Error::Network(format!("connection refused: {url}"))),
        }
    }
}
