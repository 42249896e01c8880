use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
  Queued,
  Processing,
  Completed,
  Failed,
}

impl JobStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, JobStatus::Completed | JobStatus::Failed)
  }
}

/// Snapshot of one submitted job, as served to pollers.
///
/// The wire names (`msg`, `filename`, `error`) are what the browser page
/// reads, so they differ from the field names.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
  #[serde(skip)]
  pub id: JobId,
  pub status: JobStatus,
  pub progress: u8,
  #[serde(rename = "msg")]
  pub message: String,
  #[serde(rename = "filename", skip_serializing_if = "Option::is_none")]
  pub artifact_name: Option<String>,
  #[serde(rename = "error", skip_serializing_if = "Option::is_none")]
  pub error_detail: Option<String>,
  pub updated_at: DateTime<Utc>,
}

impl Job {
  pub fn new(id: JobId) -> Self {
    Self {
      id,
      status: JobStatus::Queued,
      progress: 0,
      message: String::from("queued"),
      artifact_name: None,
      error_detail: None,
      updated_at: Utc::now(),
    }
  }

  // merge every field of the update at once. artifact name and error
  // detail only stick on the matching terminal transition.
  pub(crate) fn apply(&mut self, update: JobUpdate) {
    self.progress = update.progress.min(100);
    self.message = update.message;
    self.status = update.status;

    match update.status {
      JobStatus::Completed => {
        if let Some(name) = update.artifact_name {
          self.artifact_name = Some(name);
        }
      }
      JobStatus::Failed => {
        if let Some(detail) = update.error_detail {
          self.error_detail = Some(detail);
        }
      }
      JobStatus::Queued | JobStatus::Processing => (),
    }

    self.updated_at = Utc::now();
  }
}

/// A set of fields merged atomically into a job record.
///
/// Progress is expected to be non-decreasing while a job is processing; the
/// tracker stores whatever it is given, so strategies reporting progress
/// have to keep to that themselves.
#[derive(Debug, Clone)]
pub struct JobUpdate {
  pub progress: u8,
  pub message: String,
  pub status: JobStatus,
  pub artifact_name: Option<String>,
  pub error_detail: Option<String>,
}

impl JobUpdate {
  pub fn progress(progress: u8, message: impl Into<String>) -> Self {
    Self {
      progress,
      message: message.into(),
      status: JobStatus::Processing,
      artifact_name: None,
      error_detail: None,
    }
  }

  pub fn completed(artifact_name: impl Into<String>) -> Self {
    Self {
      progress: 100,
      message: String::from("done"),
      status: JobStatus::Completed,
      artifact_name: Some(artifact_name.into()),
      error_detail: None,
    }
  }

  pub fn failed(message: impl Into<String>, detail: impl Into<String>) -> Self {
    Self {
      progress: 0,
      message: message.into(),
      status: JobStatus::Failed,
      artifact_name: None,
      error_detail: Some(detail.into()),
    }
  }
}
