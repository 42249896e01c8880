// the boundary to a browser automation driver. only what the sniffer
// needs is exposed here.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::{fetch::MOBILE_USER_AGENT, Error, Result};

#[derive(Debug, Clone)]
pub struct DeviceProfile {
  pub user_agent: String,
  pub viewport: (u32, u32),
  pub device_scale_factor: f64,
  pub is_mobile: bool,
  pub has_touch: bool,
  pub locale: String,
}

impl DeviceProfile {
  pub fn iphone() -> Self {
    Self {
      user_agent: MOBILE_USER_AGENT.to_owned(),
      viewport: (375, 812),
      device_scale_factor: 3.0,
      is_mobile: true,
      has_touch: true,
      locale: String::from("zh-CN"),
    }
  }
}

#[derive(Debug, Clone)]
pub struct ObservedResponse {
  pub url: String,
  pub status: u16,
  pub content_type: String,
}

pub type ResponseObserver = Box<dyn Fn(&ObservedResponse) + Send + Sync>;

#[async_trait]
pub trait BrowserDriver: Send + Sync {
  fn is_available(&self) -> bool;

  async fn launch(&self, args: &[&str]) -> Result<Box<dyn BrowserSession>>;
}

#[async_trait]
pub trait BrowserSession: Send {
  // an isolated context with a single page in it
  async fn new_page(
    &mut self,
    profile: &DeviceProfile,
  ) -> Result<Box<dyn BrowserPage>>;

  async fn close(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait BrowserPage: Send {
  // observers see responses in arrival order
  fn on_response(&mut self, observer: ResponseObserver);

  async fn goto(&mut self, url: &str, timeout: Duration) -> Result<()>;

  async fn tap(&mut self, x: f64, y: f64) -> Result<()>;

  async fn evaluate(&mut self, script: &str) -> Result<Value>;

  async fn has_element(&mut self, selector: &str) -> Result<bool>;

  async fn attribute(
    &mut self,
    selector: &str,
    name: &str,
  ) -> Result<Option<String>>;

  async fn inner_text(&mut self, selector: &str) -> Result<Option<String>>;

  async fn content(&mut self) -> Result<String>;
}

/// Stand-in used when no driver is wired in; sniffing is then skipped.
pub struct NoBrowser;

#[async_trait]
impl BrowserDriver for NoBrowser {
  fn is_available(&self) -> bool {
    false
  }

  async fn launch(&self, _args: &[&str]) -> Result<Box<dyn BrowserSession>> {
    Err(Error::Browser("no browser driver installed".into()))
  }
}
