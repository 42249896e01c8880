use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde_json::json;

use crate::job::JobId;

#[derive(thiserror::Error, Debug)]
pub enum Error {
  #[error("invalid source url: {0:?}")]
  InvalidUrl(String),
  #[error("job {0} not found")]
  JobNotFound(String),
  #[error("job {0} already exists")]
  DuplicateJob(JobId),
  #[error("artifact of job {0} is not ready")]
  NotReady(JobId),
  #[error("artifact of job {0} is missing on disk")]
  ArtifactMissing(JobId),
  #[error("no usable media url from {0}")]
  Extraction(String),
  #[error("all routes exhausted")]
  RoutesExhausted,
  #[error("transcoder failed: {0}")]
  Transcode(String),
  #[error("browser driver: {0}")]
  Browser(String),
  #[error("artifact store is not running")]
  StoreUnavailable,
  #[error("http: {0}")]
  Http(#[from] reqwest::Error),
  #[error("io: {0}")]
  IO(#[from] std::io::Error),
  #[error("json: {0}")]
  Json(#[from] serde_json::Error),
  #[error("invalid configuration: {0}")]
  Config(String),
  #[error("server: {0}")]
  Server(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    match self {
      Error::InvalidUrl(_) => {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": "Invalid URL" })))
          .into_response()
      }
      Error::JobNotFound(_) => {
        (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" })))
          .into_response()
      }
      Error::NotReady(_) => {
        (StatusCode::NOT_FOUND, "File not ready").into_response()
      }
      Error::ArtifactMissing(_) => {
        (StatusCode::NOT_FOUND, "File missing").into_response()
      }
      err => {
        tracing::error!("request failed: {err}");
        (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
      }
    }
  }
}
