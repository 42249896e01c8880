use std::sync::Arc;

use axum::{
  body::StreamBody,
  extract::{rejection::JsonRejection, Path, State},
  headers::ContentType,
  http::header,
  response::IntoResponse,
  routing::{get, post},
  Json, Router, TypedHeader,
};
use serde::Deserialize;
use serde_json::json;
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
  job::{Job, JobId},
  jobs::{Artifact, JobService},
  Error, Result,
};

pub const BANNER: &str = "clip-alac backend running";

pub fn router(service: Arc<JobService>) -> Router {
  Router::new()
    .route("/", get(homepage))
    .route("/health", get(health))
    .route("/api/start", post(start))
    .route("/api/progress/:job_id", get(progress))
    .route("/api/get_file/:job_id", get(get_file))
    .with_state(service)
    // the front end page is served from elsewhere
    .layer(CorsLayer::permissive())
}

#[derive(Deserialize)]
struct StartRequest {
  #[serde(default)]
  url: String,
  custom_api: Option<String>,
}

async fn homepage() -> impl IntoResponse {
  (TypedHeader::<ContentType>(ContentType::text()), BANNER)
}

async fn health() -> impl IntoResponse {
  "ok".to_owned()
}

async fn start(
  State(service): State<Arc<JobService>>,
  payload: Result<Json<StartRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
  let Json(req) = payload.map_err(|e| {
    debug!("rejected start request: {e}");
    Error::InvalidUrl(String::new())
  })?;

  let handle = service.submit(&req.url, req.custom_api)?;
  Ok(Json(json!({ "job_id": handle.id() })))
}

async fn progress(
  State(service): State<Arc<JobService>>,
  Path(job_id): Path<String>,
) -> Result<Json<Job>> {
  let job = service.poll_status(parse_job_id(&job_id)?)?;
  Ok(Json(job))
}

async fn get_file(
  State(service): State<Arc<JobService>>,
  Path(job_id): Path<String>,
) -> Result<impl IntoResponse> {
  let id = parse_job_id(&job_id)?;
  let Artifact {
    file,
    filename,
    len,
  } = service.retrieve_artifact(id).await?;

  info!(%id, %filename, len, "serving artifact");
  let disposition = format!(
    "attachment; filename*=UTF-8''{}",
    urlencoding::encode(&filename)
  );

  Ok((
    [
      (header::CONTENT_TYPE, "audio/mp4".to_owned()),
      (header::CONTENT_DISPOSITION, disposition),
      (header::CONTENT_LENGTH, len.to_string()),
    ],
    StreamBody::new(ReaderStream::new(file)),
  ))
}

// anything that is not a job id can't name a job either
fn parse_job_id(raw: &str) -> Result<JobId> {
  Uuid::parse_str(raw).map_err(|_| Error::JobNotFound(raw.to_owned()))
}
