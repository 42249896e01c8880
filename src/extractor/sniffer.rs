use std::{
  path::Path,
  sync::{Arc, OnceLock},
  time::Duration,
};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::{
  browser::{
    BrowserDriver, BrowserPage, BrowserSession, DeviceProfile,
    ObservedResponse,
  },
  ProgressFn, DOWNLOAD_TIMEOUT,
};
use crate::{
  fetch::{Fetch, Identity},
  util::sanitize_title,
  Error, Result,
};

pub const DEFAULT_TITLE: &str = "video";

const LAUNCH_ARGS: &[&str] = &[
  "--disable-blink-features=AutomationControlled",
  "--no-sandbox",
  "--disable-infobars",
  "--window-size=400,800",
];
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(45);
const TAP_POINT: (f64, f64) = (187.0, 400.0);
const SNIFF_TICKS: u32 = 5;
const TITLE_SELECTORS: &[&str] = &["h1", ".desc", "[data-e2e=\"video-desc\"]"];
const EXCLUDED_EXTENSIONS: &[&str] = &[".mp3", ".m4a", ".svg"];

static EMBEDDED_MEDIA_REGEX: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r#"https?://[^"'\s<>\\]+?(?:\.mp4|/play/\?)[^"'\s<>\\]*"#)
    .unwrap()
});

#[derive(thiserror::Error, Debug)]
pub enum SniffError {
  #[error("sniffing browser unavailable: {0}")]
  Unavailable(String),
  #[error("page navigation failed: {0}")]
  Navigation(String),
  #[error("media signal not captured")]
  SignalNotCaptured,
  #[error("raw stream download failed: {0}")]
  Download(#[source] Error),
}

impl SniffError {
  pub fn is_unavailable(&self) -> bool {
    matches!(self, SniffError::Unavailable(_))
  }
}

struct Capture {
  media_url: String,
  title: String,
}

// owns the browser session until it is closed. if the sniff is abandoned
// (unwinding, dropped future) the close is handed to the runtime instead.
struct SessionGuard(Option<Box<dyn BrowserSession>>);

impl SessionGuard {
  async fn new_page(
    &mut self,
    profile: &DeviceProfile,
  ) -> Result<Box<dyn BrowserPage>> {
    match self.0.as_mut() {
      Some(session) => session.new_page(profile).await,
      None => Err(Error::Browser("session already closed".into())),
    }
  }

  async fn close(mut self) {
    if let Some(session) = self.0.take() {
      close_session(session).await;
    }
  }
}

impl Drop for SessionGuard {
  fn drop(&mut self) {
    let Some(session) = self.0.take() else {
      return;
    };

    match tokio::runtime::Handle::try_current() {
      Ok(handle) => {
        handle.spawn(close_session(session));
      }
      Err(_) => debug!("no runtime left to close the browser session"),
    }
  }
}

async fn close_session(session: Box<dyn BrowserSession>) {
  if let Err(e) = session.close().await {
    debug!("closing browser session failed: {e}");
  }
}

/// Loads the share page in an emulated phone browser and takes the first
/// video response it sees on the wire.
pub struct Sniffer {
  driver: Arc<dyn BrowserDriver>,
  fetcher: Arc<dyn Fetch>,
  identity: Identity,
  navigation_timeout: Duration,
  tick: Duration,
  pause: Duration,
}

impl Sniffer {
  pub fn new(
    driver: Arc<dyn BrowserDriver>,
    fetcher: Arc<dyn Fetch>,
    referer: &str,
  ) -> Self {
    Self {
      driver,
      fetcher,
      identity: Identity::mobile(referer),
      navigation_timeout: NAVIGATION_TIMEOUT,
      tick: Duration::from_secs(1),
      pause: Duration::from_millis(500),
    }
  }

  #[cfg(test)]
  pub fn with_tick(self, tick: Duration) -> Self {
    Self {
      tick,
      pause: Duration::ZERO,
      ..self
    }
  }

  #[cfg(test)]
  pub fn with_navigation_timeout(self, navigation_timeout: Duration) -> Self {
    Self {
      navigation_timeout,
      ..self
    }
  }

  pub fn is_available(&self) -> bool {
    self.driver.is_available()
  }

  /// Resolve `source_url` and download the media into `dest`, returning the
  /// sanitized page title.
  pub async fn sniff(
    &self,
    source_url: &str,
    dest: &Path,
    progress: &ProgressFn<'_>,
  ) -> Result<String, SniffError> {
    progress(10, "launching sniffing browser");
    let session = self
      .driver
      .launch(LAUNCH_ARGS)
      .await
      .map_err(|e| SniffError::Unavailable(e.to_string()))?;

    let mut session = SessionGuard(Some(session));
    let captured = self.capture(&mut session, source_url, progress).await;
    session.close().await;

    let Capture { media_url, title } = captured?;

    progress(60, "downloading raw video stream");
    self
      .fetcher
      .download(&media_url, &self.identity, dest, DOWNLOAD_TIMEOUT)
      .await
      .map_err(SniffError::Download)?;

    Ok(title)
  }

  async fn capture(
    &self,
    session: &mut SessionGuard,
    source_url: &str,
    progress: &ProgressFn<'_>,
  ) -> Result<Capture, SniffError> {
    let mut page = session
      .new_page(&DeviceProfile::iphone())
      .await
      .map_err(|e| SniffError::Unavailable(e.to_string()))?;

    // first accepted response wins, later ones are ignored
    let sniffed = Arc::new(OnceLock::<String>::new());
    let slot = sniffed.clone();
    page.on_response(Box::new(move |resp| {
      if is_media_response(resp) && slot.set(resp.url.clone()).is_ok() {
        debug!("sniffed media stream: {}", resp.url);
      }
    }));

    progress(20, "opening page and watching traffic");
    let navigation = tokio::time::timeout(
      self.navigation_timeout,
      page.goto(source_url, self.navigation_timeout),
    )
    .await;
    match navigation {
      Ok(Ok(())) => (),
      Ok(Err(e)) => return Err(SniffError::Navigation(e.to_string())),
      Err(_) => {
        return Err(SniffError::Navigation(format!(
          "timed out after {:?}",
          self.navigation_timeout
        )))
      }
    }

    progress(35, "simulating taps to start playback");
    self.interact(page.as_mut()).await;

    for _ in 0..SNIFF_TICKS {
      if sniffed.get().is_some() {
        break;
      }
      tokio::time::sleep(self.tick).await;
    }

    let title = page_title(page.as_mut()).await;
    let media_url = match sniffed.get() {
      Some(url) => url.clone(),
      None => fallback_media_url(page.as_mut())
        .await
        .ok_or(SniffError::SignalNotCaptured)?,
    };

    Ok(Capture { media_url, title })
  }

  // tap, scroll down and back, force play. none of it is required to work.
  async fn interact(&self, page: &mut dyn BrowserPage) {
    let (x, y) = TAP_POINT;
    best_effort("tap", page.tap(x, y).await);
    tokio::time::sleep(self.pause).await;

    best_effort("scroll down", page.evaluate("window.scrollTo(0, 300)").await);
    tokio::time::sleep(self.pause).await;
    best_effort("scroll up", page.evaluate("window.scrollTo(0, 0)").await);

    match page.has_element("video").await {
      Ok(true) => best_effort(
        "play",
        page
          .evaluate("document.querySelector('video').play()")
          .await,
      ),
      Ok(false) => (),
      Err(e) => debug!("video lookup failed: {e}"),
    }
  }
}

fn best_effort<T>(step: &str, result: Result<T>) {
  if let Err(e) = result {
    debug!("interaction step {step:?} failed, continuing: {e}");
  }
}

pub fn is_media_response(resp: &ObservedResponse) -> bool {
  let content_type = resp.content_type.to_lowercase();
  let url = resp.url.as_str();

  let is_video = content_type.contains("video")
    || content_type.contains("mp4")
    || url.contains(".mp4");

  resp.status == 200
    && is_video
    && url.starts_with("http")
    && !EXCLUDED_EXTENSIONS.iter().any(|ext| url.contains(ext))
}

// media url embedded in the page, often inside escaped json
pub fn scan_markup(html: &str) -> Option<String> {
  let html = html
    .replace("\\u002F", "/")
    .replace("\\/", "/")
    .replace("&amp;", "&");

  EMBEDDED_MEDIA_REGEX
    .find(&html)
    .map(|m| m.as_str().to_owned())
}

async fn fallback_media_url(page: &mut dyn BrowserPage) -> Option<String> {
  match page.attribute("video", "src").await {
    Ok(Some(src)) if src.starts_with("http") => return Some(src),
    Ok(_) => (),
    Err(e) => debug!("reading video src failed: {e}"),
  }

  match page.content().await {
    Ok(html) => scan_markup(&html),
    Err(e) => {
      debug!("reading page markup failed: {e}");
      None
    }
  }
}

async fn page_title(page: &mut dyn BrowserPage) -> String {
  for selector in TITLE_SELECTORS {
    match page.inner_text(selector).await {
      Ok(Some(text)) => {
        let title = sanitize_title(&text);
        if !title.is_empty() {
          return title;
        }
      }
      Ok(None) => (),
      Err(e) => debug!("reading {selector} failed: {e}"),
    }
  }

  DEFAULT_TITLE.to_owned()
}
