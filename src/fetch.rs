use std::{path::Path, time::Duration};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header;
use serde_json::Value;
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::debug;

use crate::Result;

pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 16_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Mobile/15E148 Safari/604.1";

/// Headers a request presents itself with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
  pub user_agent: String,
  pub referer: Option<String>,
}

impl Identity {
  pub fn desktop() -> Self {
    Self {
      user_agent: DESKTOP_USER_AGENT.to_owned(),
      referer: None,
    }
  }

  pub fn mobile(referer: impl Into<String>) -> Self {
    Self {
      user_agent: MOBILE_USER_AGENT.to_owned(),
      referer: Some(referer.into()),
    }
  }
}

#[async_trait]
pub trait Fetch: Send + Sync {
  async fn get_json(
    &self,
    url: &str,
    identity: &Identity,
    timeout: Duration,
  ) -> Result<Value>;

  // stream `url` into `dest`, returning the number of bytes written
  async fn download(
    &self,
    url: &str,
    identity: &Identity,
    dest: &Path,
    timeout: Duration,
  ) -> Result<u64>;
}

#[derive(Default)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  fn get(
    &self,
    url: &str,
    identity: &Identity,
    timeout: Duration,
  ) -> reqwest::RequestBuilder {
    let req = self
      .client
      .get(url)
      .header(header::USER_AGENT, &identity.user_agent)
      .timeout(timeout);

    match &identity.referer {
      Some(referer) => req.header(header::REFERER, referer),
      None => req,
    }
  }
}

#[async_trait]
impl Fetch for HttpFetcher {
  async fn get_json(
    &self,
    url: &str,
    identity: &Identity,
    timeout: Duration,
  ) -> Result<Value> {
    let resp = self
      .get(url, identity, timeout)
      .send()
      .await?
      .error_for_status()?;

    // some resolvers answer json with a text/html content type
    let body = resp.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
  }

  async fn download(
    &self,
    url: &str,
    identity: &Identity,
    dest: &Path,
    timeout: Duration,
  ) -> Result<u64> {
    let resp = self
      .get(url, identity, timeout)
      .send()
      .await?
      .error_for_status()?;

    let mut file = File::create(dest).await?;
    let mut stream = resp.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
      let chunk = chunk?;
      file.write_all(&chunk).await?;
      written += chunk.len() as u64;
    }
    file.flush().await?;

    debug!("downloaded {} bytes into {}", written, dest.display());
    Ok(written)
  }
}
