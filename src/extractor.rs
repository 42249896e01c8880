pub mod browser;
mod provider;
mod sniffer;

use std::{path::Path, sync::Arc, time::Duration};

use tracing::{info, warn};

use crate::{
  fetch::{Fetch, Identity},
  Error, Result,
};

pub use browser::NoBrowser;
pub use provider::{builtin_providers, JsonApi, Provider, Resolution};
pub use sniffer::{Sniffer, DEFAULT_TITLE};

/// Progress callback threaded through every strategy: (percent, message).
pub type ProgressFn<'a> = dyn Fn(u8, &str) + Send + Sync + 'a;

const API_TIMEOUT: Duration = Duration::from_secs(15);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// The strategy chain: interactive sniffing first when it can run, then the
/// remote providers in priority order.
pub struct Resolver {
  sniffer: Option<Sniffer>,
  providers: Vec<Arc<dyn Provider>>,
  fetcher: Arc<dyn Fetch>,
  identity: Identity,
}

impl Resolver {
  pub fn new(
    fetcher: Arc<dyn Fetch>,
    providers: Vec<Arc<dyn Provider>>,
  ) -> Self {
    Self {
      sniffer: None,
      providers,
      fetcher,
      identity: Identity::desktop(),
    }
  }

  pub fn with_sniffer(self, sniffer: Sniffer) -> Self {
    Self {
      sniffer: Some(sniffer),
      ..self
    }
  }

  pub fn sniffing_available(&self) -> bool {
    self.sniffer.as_ref().map_or(false, Sniffer::is_available)
  }

  // custom override first, then the built-ins
  pub fn routes(&self, custom_api: Option<&str>) -> Vec<Arc<dyn Provider>> {
    let custom = custom_api
      .filter(|api| !api.trim().is_empty())
      .map(|api| Arc::new(JsonApi::custom(api)) as Arc<dyn Provider>);

    custom
      .into_iter()
      .chain(self.providers.iter().cloned())
      .collect()
  }

  /// Fetch the raw media of `source_url` into `dest` and return its title.
  pub async fn resolve(
    &self,
    source_url: &str,
    custom_api: Option<&str>,
    dest: &Path,
    progress: &ProgressFn<'_>,
  ) -> Result<String> {
    let has_override = custom_api.map_or(false, |api| !api.trim().is_empty());

    if let Some(sniffer) = self.sniffer.as_ref() {
      if sniffer.is_available() && !has_override {
        match sniffer.sniff(source_url, dest, progress).await {
          Ok(title) => return Ok(title),
          Err(e) if e.is_unavailable() => {
            warn!("sniffer unavailable, using remote providers: {e}")
          }
          Err(e) => info!("sniffing found nothing, using remote providers: {e}"),
        }
      }
    }

    self.resolve_remote(source_url, custom_api, dest, progress).await
  }

  async fn resolve_remote(
    &self,
    source_url: &str,
    custom_api: Option<&str>,
    dest: &Path,
    progress: &ProgressFn<'_>,
  ) -> Result<String> {
    progress(20, "starting cloud fallback");
    let routes = self.routes(custom_api);
    let total = routes.len();

    for (i, provider) in routes.iter().enumerate() {
      // feedback only, stays within [20, 50)
      let band = 20 + (i * 30 / total) as u8;
      progress(band, &format!("trying {}", provider.name()));

      match self
        .try_provider(provider.as_ref(), source_url, dest, progress)
        .await
      {
        Ok(title) => return Ok(title),
        Err(e) => warn!("provider {} failed: {e}", provider.name()),
      }
    }

    Err(Error::RoutesExhausted)
  }

  async fn try_provider(
    &self,
    provider: &dyn Provider,
    source_url: &str,
    dest: &Path,
    progress: &ProgressFn<'_>,
  ) -> Result<String> {
    let request = provider.build_request(source_url);
    let payload = self
      .fetcher
      .get_json(&request, &self.identity, API_TIMEOUT)
      .await?;

    let Resolution { media_url, title } = provider.parse_response(&payload);
    let media_url =
      media_url.ok_or_else(|| Error::Extraction(provider.name().to_owned()))?;

    progress(60, &format!("{} succeeded, downloading", provider.name()));
    self
      .fetcher
      .download(&media_url, &self.identity, dest, DOWNLOAD_TIMEOUT)
      .await?;

    Ok(title.unwrap_or_else(|| DEFAULT_TITLE.to_owned()))
  }
}
