use super::{Result, SpeedTestError};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The network calls the phases time. Each call is awaited to completion
/// before the next one is issued.
pub trait Transport: Send + Sync {
    /// GET that resolves once the response head arrives. Any status counts.
    fn probe<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<()>>;

    /// GET that drains the body and returns how many bytes arrived. A non-2xx
    /// answer is an error, not a payload.
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<u64>>;

    /// POST of an opaque body. Resolves once the response head arrives; the
    /// reply body is never read.
    fn post<'a>(&'a self, url: &'a str, body: Vec<u8>) -> BoxFuture<'a, Result<()>>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(CONNECT_TIMEOUT))
            .build()?;
        Ok(Self { client })
    }
}

fn ensure_success(response: &reqwest::Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(SpeedTestError::Status(status.as_u16()))
    }
}

impl Transport for HttpTransport {
    fn probe<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            self.client
                .get(url)
                .header(CACHE_CONTROL, "no-cache")
                .send()
                .await?;
            Ok(())
        }
        .boxed()
    }

    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<u64>> {
        async move {
            let response = self
                .client
                .get(url)
                .header(CACHE_CONTROL, "no-cache")
                .send()
                .await?;
            ensure_success(&response)?;

            let mut stream = response.bytes_stream();
            let mut received: u64 = 0;
            while let Some(chunk) = stream.next().await {
                received += chunk?.len() as u64;
            }
            Ok(received)
        }
        .boxed()
    }

    fn post<'a>(&'a self, url: &'a str, body: Vec<u8>) -> BoxFuture<'a, Result<()>> {
        async move {
            let response = self
                .client
                .post(url)
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(body)
                .send()
                .await?;
            ensure_success(&response)?;
            drop(response);
            Ok(())
        }
        .boxed()
    }
}
