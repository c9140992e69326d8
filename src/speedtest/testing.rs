//! Scripted transport for phase and orchestrator tests. Pair with
//! `#[tokio::test(start_paused = true)]` so the simulated latency is exact.

use super::transport::Transport;
use super::{Result, SpeedTestError};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub enum Reply {
    /// Succeed after the delay; for `fetch` this many bytes arrive.
    Ok(u64),
    /// Non-2xx answer, as `HttpTransport` reports it.
    Status(u16),
    Fail,
    Panic,
}

type Script = Box<dyn Fn(&str) -> Reply + Send + Sync>;

pub struct FakeTransport {
    delay: Duration,
    probe: Script,
    fetch: Script,
    post: Script,
    calls: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            probe: Box::new(|_| Reply::Ok(0)),
            fetch: Box::new(|_| Reply::Ok(0)),
            post: Box::new(|_| Reply::Ok(0)),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails.
    pub fn offline() -> Self {
        Self::new(Duration::from_millis(10))
            .on_probe(|_| Reply::Fail)
            .on_fetch(|_| Reply::Fail)
            .on_post(|_| Reply::Fail)
    }

    pub fn on_probe(mut self, f: impl Fn(&str) -> Reply + Send + Sync + 'static) -> Self {
        self.probe = Box::new(f);
        self
    }

    pub fn on_fetch(mut self, f: impl Fn(&str) -> Reply + Send + Sync + 'static) -> Self {
        self.fetch = Box::new(f);
        self
    }

    pub fn on_post(mut self, f: impl Fn(&str) -> Reply + Send + Sync + 'static) -> Self {
        self.post = Box::new(f);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn answer<'a>(&'a self, call: String, reply: Reply) -> BoxFuture<'a, Result<u64>> {
        self.calls.lock().unwrap().push(call);
        async move {
            tokio::time::sleep(self.delay).await;
            match reply {
                Reply::Ok(bytes) => Ok(bytes),
                Reply::Status(code) => Err(SpeedTestError::Status(code)),
                Reply::Fail => Err(SpeedTestError::Status(503)),
                Reply::Panic => panic!("scripted transport panic"),
            }
        }
        .boxed()
    }
}

impl Transport for FakeTransport {
    fn probe<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<()>> {
        let reply = (self.probe)(url);
        self.answer(format!("PROBE {}", url), reply)
            .map(|r| r.map(|_| ()))
            .boxed()
    }

    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<u64>> {
        let reply = (self.fetch)(url);
        self.answer(format!("GET {}", url), reply)
    }

    fn post<'a>(&'a self, url: &'a str, body: Vec<u8>) -> BoxFuture<'a, Result<()>> {
        let reply = (self.post)(url);
        self.answer(format!("POST {} {}", url, body.len()), reply)
            .map(|r| r.map(|_| ()))
            .boxed()
    }
}
