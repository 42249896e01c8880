use std::sync::Arc;

use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
  pub media_url: Option<String>,
  pub title: Option<String>,
}

/// A remote resolver service: turns a share page url into a request url,
/// and its json answer into a media url.
pub trait Provider: Send + Sync {
  fn name(&self) -> &str;

  fn build_request(&self, source_url: &str) -> String;

  // must not fail on missing or partial fields
  fn parse_response(&self, payload: &Value) -> Resolution;
}

// json api that takes the source url as a trailing query value and answers
// with the media url at one of a few json pointers.
pub struct JsonApi {
  name: String,
  endpoint: String,
  media_fields: &'static [&'static str],
  title_fields: &'static [&'static str],
}

impl JsonApi {
  pub fn new(
    name: impl Into<String>,
    endpoint: impl Into<String>,
    media_fields: &'static [&'static str],
    title_fields: &'static [&'static str],
  ) -> Self {
    Self {
      name: name.into(),
      endpoint: endpoint.into(),
      media_fields,
      title_fields,
    }
  }

  pub fn custom(endpoint: &str) -> Self {
    Self::new(
      "custom API",
      endpoint.trim(),
      &["/url", "/video/noWatermark", "/data/url"],
      &["/title"],
    )
  }

  pub fn tiklydown() -> Self {
    Self::new(
      "TiklyDown",
      "https://api.tiklydown.eu.org/api/download?url=",
      &["/video/noWatermark"],
      &["/title"],
    )
  }

  pub fn kuaishou() -> Self {
    Self::new(
      "KuaishouAPI",
      "https://api.kuaishouapi.com/douyin/index?url=",
      &["/data/url", "/data/play"],
      &["/data/desc"],
    )
  }

  pub fn pearktrue() -> Self {
    Self::new(
      "PearkTrue",
      "https://api.pearktrue.cn/api/video/douyin/?url=",
      &["/data/url"],
      &["/data/title"],
    )
  }
}

impl Provider for JsonApi {
  fn name(&self) -> &str {
    &self.name
  }

  fn build_request(&self, source_url: &str) -> String {
    format!("{}{}", self.endpoint, urlencoding::encode(source_url))
  }

  fn parse_response(&self, payload: &Value) -> Resolution {
    Resolution {
      media_url: first_str(payload, self.media_fields),
      title: first_str(payload, self.title_fields),
    }
  }
}

// built-in resolvers in priority order
pub fn builtin_providers() -> Vec<Arc<dyn Provider>> {
  vec![
    Arc::new(JsonApi::tiklydown()),
    Arc::new(JsonApi::kuaishou()),
    Arc::new(JsonApi::pearktrue()),
  ]
}

fn first_str(payload: &Value, pointers: &[&str]) -> Option<String> {
  pointers
    .iter()
    .filter_map(|pointer| payload.pointer(pointer))
    .filter_map(Value::as_str)
    .map(str::trim)
    .find(|s| !s.is_empty())
    .map(str::to_owned)
}
