// offline stand-ins for the browser driver, the http client and ffmpeg

use std::{
  collections::{HashMap, HashSet},
  io,
  path::Path,
  sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
  },
  time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
  extractor::browser::{
    BrowserDriver, BrowserPage, BrowserSession, DeviceProfile,
    ObservedResponse, ResponseObserver,
  },
  fetch::{Fetch, Identity},
  transcode::Transcode,
  Error, Result,
};

#[derive(Default)]
pub struct FakeFetcher {
  json: HashMap<String, Value>,
  failing_downloads: HashSet<String>,
  json_requests: Mutex<Vec<String>>,
  downloads: Mutex<Vec<(String, Identity)>>,
}

impl FakeFetcher {
  pub fn with_json(mut self, url: &str, payload: Value) -> Self {
    self.json.insert(url.to_owned(), payload);
    self
  }

  pub fn with_failing_download(mut self, url: &str) -> Self {
    self.failing_downloads.insert(url.to_owned());
    self
  }

  pub fn json_requests(&self) -> Vec<String> {
    self.json_requests.lock().unwrap().clone()
  }

  pub fn downloads(&self) -> Vec<String> {
    let downloads = self.downloads.lock().unwrap();
    downloads.iter().map(|(url, _)| url.clone()).collect()
  }

  pub fn identities(&self) -> Vec<Identity> {
    let downloads = self.downloads.lock().unwrap();
    downloads.iter().map(|(_, id)| id.clone()).collect()
  }
}

#[async_trait]
impl Fetch for FakeFetcher {
  async fn get_json(
    &self,
    url: &str,
    _identity: &Identity,
    _timeout: Duration,
  ) -> Result<Value> {
    self.json_requests.lock().unwrap().push(url.to_owned());
    self.json.get(url).cloned().ok_or_else(|| {
      Error::IO(io::Error::new(io::ErrorKind::NotFound, url.to_owned()))
    })
  }

  async fn download(
    &self,
    url: &str,
    identity: &Identity,
    dest: &Path,
    _timeout: Duration,
  ) -> Result<u64> {
    self
      .downloads
      .lock()
      .unwrap()
      .push((url.to_owned(), identity.clone()));

    if self.failing_downloads.contains(url) {
      let err = io::Error::new(io::ErrorKind::ConnectionReset, url.to_owned());
      return Err(Error::IO(err));
    }

    tokio::fs::write(dest, url.as_bytes()).await?;
    Ok(url.len() as u64)
  }
}

#[derive(Debug, Clone, Default)]
pub struct BrowserScript {
  pub launch_fails: bool,
  pub goto_fails: bool,
  // navigation never settles
  pub goto_hangs: bool,
  pub goto_panics: bool,
  pub interactions_fail: bool,
  // emitted to observers during navigation
  pub responses: Vec<ObservedResponse>,
  pub video_src: Option<String>,
  pub markup: String,
  // served for `h1`
  pub title: Option<String>,
}

#[derive(Clone)]
pub struct FakeBrowser {
  script: Arc<BrowserScript>,
  launches: Arc<AtomicUsize>,
  closes: Arc<AtomicUsize>,
}

impl FakeBrowser {
  pub fn new(script: BrowserScript) -> Self {
    Self {
      script: Arc::new(script),
      launches: Default::default(),
      closes: Default::default(),
    }
  }

  pub fn launches(&self) -> usize {
    self.launches.load(Ordering::SeqCst)
  }

  pub fn closes(&self) -> usize {
    self.closes.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl BrowserDriver for FakeBrowser {
  fn is_available(&self) -> bool {
    true
  }

  async fn launch(&self, _args: &[&str]) -> Result<Box<dyn BrowserSession>> {
    self.launches.fetch_add(1, Ordering::SeqCst);
    if self.script.launch_fails {
      return Err(Error::Browser("chromium missing".into()));
    }

    Ok(Box::new(FakeSession {
      script: self.script.clone(),
      closes: self.closes.clone(),
    }))
  }
}

struct FakeSession {
  script: Arc<BrowserScript>,
  closes: Arc<AtomicUsize>,
}

#[async_trait]
impl BrowserSession for FakeSession {
  async fn new_page(
    &mut self,
    _profile: &DeviceProfile,
  ) -> Result<Box<dyn BrowserPage>> {
    Ok(Box::new(FakePage {
      script: self.script.clone(),
      observers: Vec::new(),
    }))
  }

  async fn close(self: Box<Self>) -> Result<()> {
    self.closes.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

struct FakePage {
  script: Arc<BrowserScript>,
  observers: Vec<ResponseObserver>,
}

impl FakePage {
  fn interaction(&self) -> Result<()> {
    if self.script.interactions_fail {
      return Err(Error::Browser("element detached".into()));
    }
    Ok(())
  }
}

#[async_trait]
impl BrowserPage for FakePage {
  fn on_response(&mut self, observer: ResponseObserver) {
    self.observers.push(observer);
  }

  async fn goto(&mut self, _url: &str, _timeout: Duration) -> Result<()> {
    if self.script.goto_fails {
      return Err(Error::Browser("net::ERR_TIMED_OUT".into()));
    }
    if self.script.goto_hangs {
      return std::future::pending().await;
    }
    if self.script.goto_panics {
      panic!("renderer crashed");
    }

    for resp in &self.script.responses {
      for observer in &self.observers {
        observer(resp);
      }
    }
    Ok(())
  }

  async fn tap(&mut self, _x: f64, _y: f64) -> Result<()> {
    self.interaction()
  }

  async fn evaluate(&mut self, _script: &str) -> Result<Value> {
    self.interaction().map(|_| Value::Null)
  }

  async fn has_element(&mut self, selector: &str) -> Result<bool> {
    Ok(selector == "video" && self.script.video_src.is_some())
  }

  async fn attribute(
    &mut self,
    selector: &str,
    name: &str,
  ) -> Result<Option<String>> {
    match (selector, name) {
      ("video", "src") => Ok(self.script.video_src.clone()),
      _ => Ok(None),
    }
  }

  async fn inner_text(&mut self, selector: &str) -> Result<Option<String>> {
    match selector {
      "h1" => Ok(self.script.title.clone()),
      _ => Ok(None),
    }
  }

  async fn content(&mut self) -> Result<String> {
    Ok(self.script.markup.clone())
  }
}

pub enum FakeTranscoder {
  Copy,
  Fail,
  Panic,
}

#[async_trait]
impl Transcode for FakeTranscoder {
  async fn transcode(&self, input: &Path, output: &Path) -> Result<()> {
    match self {
      FakeTranscoder::Copy => {
        tokio::fs::copy(input, output).await?;
        Ok(())
      }
      FakeTranscoder::Fail => {
        Err(Error::Transcode("ffmpeg exited with exit status: 1".into()))
      }
      FakeTranscoder::Panic => panic!("transcoder blew up"),
    }
  }
}
