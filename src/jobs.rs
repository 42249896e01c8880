use std::{sync::Arc, time::Duration};

use tokio::fs::File;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  artifact_store::ArtifactStoreRef,
  extractor::Resolver,
  job::{Job, JobId, JobStatus, JobUpdate},
  tracker::JobTracker,
  transcode::Transcode,
  util::{find_source_url, sanitize_title},
  Error, Result,
};

const FALLBACK_ARTIFACT_TITLE: &str = "audio";

/// Handle to a spawned job. Dropping it leaves the job running.
pub struct JobHandle {
  id: JobId,
  #[cfg(test)]
  task: tokio::task::JoinHandle<()>,
}

impl JobHandle {
  pub fn id(&self) -> JobId {
    self.id
  }

  // resolves once the job reached a terminal state
  #[cfg(test)]
  pub async fn wait(self) {
    if let Err(e) = self.task.await {
      tracing::error!(id = %self.id, "job supervisor died: {e}");
    }
  }
}

pub struct Artifact {
  pub file: File,
  pub filename: String,
  pub len: u64,
}

// why a job ended up failed: short status text plus the diagnostic
struct Failure {
  message: &'static str,
  detail: String,
}

impl Failure {
  fn new(message: &'static str, detail: impl ToString) -> Self {
    Self {
      message,
      detail: detail.to_string(),
    }
  }
}

pub struct JobService {
  tracker: JobTracker,
  store: ArtifactStoreRef,
  resolver: Resolver,
  transcoder: Arc<dyn Transcode>,
  cleanup_delay: Duration,
  retention: Duration,
}

impl JobService {
  pub fn new(
    tracker: JobTracker,
    store: ArtifactStoreRef,
    resolver: Resolver,
    transcoder: Arc<dyn Transcode>,
  ) -> Self {
    Self {
      tracker,
      store,
      resolver,
      transcoder,
      cleanup_delay: Duration::from_secs(10),
      retention: Duration::from_secs(60 * 60),
    }
  }

  pub fn with_cleanup_delay(self, cleanup_delay: Duration) -> Self {
    Self {
      cleanup_delay,
      ..self
    }
  }

  pub fn with_retention(self, retention: Duration) -> Self {
    Self { retention, ..self }
  }

  pub fn sniffing_available(&self) -> bool {
    self.resolver.sniffing_available()
  }

  /// Validate the submission and spawn its pipeline. `source` may be share
  /// text with the link somewhere inside it.
  pub fn submit(
    self: &Arc<Self>,
    source: &str,
    custom_api: Option<String>,
  ) -> Result<JobHandle> {
    let source_url = find_source_url(source)
      .ok_or_else(|| Error::InvalidUrl(source.to_owned()))?;

    let id = Uuid::new_v4();
    self.tracker.create(id)?;
    info!(%id, %source_url, custom_api = custom_api.is_some(), "job submitted");

    let this = self.clone();
    let task = tokio::spawn(async move {
      this.supervise(id, source_url, custom_api).await;
    });
    // the supervisor always drives the job to a terminal state on its own
    #[cfg(not(test))]
    drop(task);

    Ok(JobHandle {
      id,
      #[cfg(test)]
      task,
    })
  }

  pub fn poll_status(&self, id: JobId) -> Result<Job> {
    self
      .tracker
      .get(id)
      .ok_or_else(|| Error::JobNotFound(id.to_string()))
  }

  /// Open the finished artifact and schedule its removal.
  pub async fn retrieve_artifact(self: &Arc<Self>, id: JobId) -> Result<Artifact> {
    let job = self.poll_status(id)?;
    if job.status != JobStatus::Completed {
      return Err(Error::NotReady(id));
    }

    let artifact = self
      .store
      .lookup(id)
      .await?
      .filter(|file| file.ready())
      .ok_or(Error::ArtifactMissing(id))?;
    let file = artifact.open().await?;
    let len = file.metadata().await?.len();

    self.schedule_cleanup(id);

    Ok(Artifact {
      file,
      filename: job
        .artifact_name
        .unwrap_or_else(|| format!("{FALLBACK_ARTIFACT_TITLE}.m4a")),
      len,
    })
  }

  // drop finished jobs nobody came to collect
  pub async fn sweep_abandoned(&self) -> usize {
    let expired = self.tracker.expired(self.retention);
    for &id in &expired {
      self.reap(id).await;
    }
    expired.len()
  }

  fn schedule_cleanup(self: &Arc<Self>, id: JobId) {
    let this = self.clone();
    tokio::spawn(async move {
      tokio::time::sleep(this.cleanup_delay).await;
      this.reap(id).await;
    });
  }

  async fn reap(&self, id: JobId) {
    if let Err(e) = self.store.remove(id).await {
      warn!(%id, "failed to release artifact: {e}");
    }
    self.tracker.remove(id);
    debug!(%id, "job reaped");
  }

  async fn supervise(
    self: Arc<Self>,
    id: JobId,
    source_url: String,
    custom_api: Option<String>,
  ) {
    let this = self.clone();
    let pipeline = tokio::spawn(async move {
      this.run(id, &source_url, custom_api.as_deref()).await
    });

    let outcome = match pipeline.await {
      Ok(outcome) => outcome,
      Err(e) => Err(Failure::new("system error", e)),
    };

    match outcome {
      Ok(artifact_name) => {
        info!(%id, %artifact_name, "job completed");
        self.tracker.update(id, JobUpdate::completed(artifact_name));
      }
      Err(Failure { message, detail }) => {
        warn!(%id, "job failed: {detail}");
        self.tracker.update(id, JobUpdate::failed(message, detail));
        // the raw download is not kept around for inspection
        if let Err(e) = self.store.remove(id).await {
          warn!(%id, "failed to release artifact: {e}");
        }
      }
    }
  }

  // resolve -> fetch -> transcode, yielding the artifact name
  async fn run(
    &self,
    id: JobId,
    source_url: &str,
    custom_api: Option<&str>,
  ) -> Result<String, Failure> {
    self.tracker.update(id, JobUpdate::progress(5, "initializing"));

    let file = self
      .store
      .allocate(id)
      .await
      .map_err(|e| Failure::new("system error", e))?;

    let tracker = self.tracker.clone();
    let progress = move |percent: u8, message: &str| {
      tracker.update(id, JobUpdate::progress(percent, message))
    };

    let title = self
      .resolver
      .resolve(source_url, custom_api, file.raw_path(), &progress)
      .await
      .map_err(|e| Failure::new("failed", format!("resolution failed: {e}")))?;

    if !file.raw_path().exists() {
      return Err(Failure::new(
        "download failed",
        "could not obtain the video file",
      ));
    }

    let title = sanitize_title(&title);
    let title = if title.is_empty() {
      FALLBACK_ARTIFACT_TITLE
    } else {
      &title
    };

    progress(80, "transcoding to ALAC");
    self
      .transcoder
      .transcode(file.raw_path(), file.path())
      .await
      .map_err(|e| Failure::new("transcode error", e))?;

    if let Err(e) = tokio::fs::remove_file(file.raw_path()).await {
      debug!(%id, "failed to remove raw download: {e}");
    }

    progress(100, "done");
    Ok(format!("{title}.m4a"))
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;
  use tempfile::TempDir;

  use super::*;
  use crate::{
    artifact_store::{artifact_path, ArtifactStore},
    extractor::{JsonApi, Provider},
    testing::{FakeFetcher, FakeTranscoder},
  };

  const SHARE_TEXT: &str = "look at this https://v.douyin.com/abc/ copy link";
  const SOURCE: &str = "https://v.douyin.com/abc/";

  struct Fixture {
    service: Arc<JobService>,
    dir: TempDir,
  }

  fn provider() -> JsonApi {
    JsonApi::new("P1", "https://p1.test/?u=", &["/url"], &["/title"])
  }

  fn fixture(payload: serde_json::Value, transcoder: FakeTranscoder) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(
      FakeFetcher::default().with_json(&provider().build_request(SOURCE), payload),
    );
    let resolver =
      Resolver::new(fetcher, vec![Arc::new(provider()) as Arc<dyn Provider>]);
    let store = ArtifactStore::new(dir.path()).unwrap().spawn();
    let service = JobService::new(
      JobTracker::new(),
      store,
      resolver,
      Arc::new(transcoder),
    )
    .with_cleanup_delay(Duration::from_millis(50));

    Fixture {
      service: Arc::new(service),
      dir,
    }
  }

  fn succeeding() -> Fixture {
    fixture(
      json!({ "url": "https://cdn/v.mp4", "title": "Hello! @#% World_2024" }),
      FakeTranscoder::Copy,
    )
  }

  #[tokio::test]
  async fn test_successful_job() {
    let Fixture { service, dir } = succeeding();

    let handle = service.submit(SHARE_TEXT, None).unwrap();
    let id = handle.id();
    handle.wait().await;

    let job = service.poll_status(id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.artifact_name.as_deref(), Some("Hello World_2024.m4a"));
    assert_eq!(job.error_detail, None);

    assert!(artifact_path(dir.path(), id).exists());
    assert!(!dir.path().join(format!("{id}_temp.mp4")).exists());
  }

  #[tokio::test]
  async fn test_invalid_url_creates_no_job() {
    let Fixture { service, dir: _dir } = succeeding();

    for bad in ["", "not a link", "ftp://example.com/x"] {
      assert!(matches!(
        service.submit(bad, None),
        Err(Error::InvalidUrl(_))
      ));
    }
    assert_eq!(service.tracker.len(), 0);
  }

  #[tokio::test]
  async fn test_unknown_job_is_not_found() {
    let Fixture { service, dir: _dir } = succeeding();
    assert!(matches!(
      service.poll_status(Uuid::new_v4()),
      Err(Error::JobNotFound(_))
    ));
  }

  #[tokio::test]
  async fn test_retrieve_before_completion_is_not_ready() {
    let Fixture { service, dir: _dir } = succeeding();
    let id = Uuid::new_v4();
    service.tracker.create(id).unwrap();
    service.tracker.update(id, JobUpdate::progress(40, "working"));

    let file = service.store.allocate(id).await.unwrap();
    std::fs::write(file.path(), b"partial").unwrap();
    drop(file);

    assert!(matches!(
      service.retrieve_artifact(id).await,
      Err(Error::NotReady(_))
    ));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(service.store.lookup(id).await.unwrap().unwrap().ready());
    assert!(service.poll_status(id).is_ok());
  }

  #[tokio::test]
  async fn test_retrieve_then_delayed_cleanup() {
    let Fixture { service, dir } = succeeding();

    let handle = service.submit(SHARE_TEXT, None).unwrap();
    let id = handle.id();
    handle.wait().await;

    let artifact = service.retrieve_artifact(id).await.unwrap();
    assert_eq!(artifact.filename, "Hello World_2024.m4a");
    assert_eq!(artifact.len, "https://cdn/v.mp4".len() as u64);
    drop(artifact);

    // still there within the delay
    assert!(service.poll_status(id).is_ok());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(matches!(
      service.poll_status(id),
      Err(Error::JobNotFound(_))
    ));
    assert!(!artifact_path(dir.path(), id).exists());
  }

  #[tokio::test]
  async fn test_all_providers_failing_fails_job() {
    let Fixture { service, dir } =
      fixture(json!({ "title": "no url" }), FakeTranscoder::Copy);

    let handle = service.submit(SHARE_TEXT, None).unwrap();
    let id = handle.id();
    handle.wait().await;

    let job = service.poll_status(id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.artifact_name, None);
    let detail = job.error_detail.unwrap();
    assert!(detail.starts_with("resolution failed"), "{detail}");
    assert!(!artifact_path(dir.path(), id).exists());

    assert!(matches!(
      service.retrieve_artifact(id).await,
      Err(Error::NotReady(_))
    ));
  }

  #[tokio::test]
  async fn test_transcoder_failure_fails_job_and_drops_raw_file() {
    let Fixture { service, dir } =
      fixture(json!({ "url": "https://cdn/v.mp4" }), FakeTranscoder::Fail);

    let handle = service.submit(SHARE_TEXT, None).unwrap();
    let id = handle.id();
    handle.wait().await;

    let job = service.poll_status(id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_detail.unwrap().contains("exit status"));
    assert!(!dir.path().join(format!("{id}_temp.mp4")).exists());
  }

  #[tokio::test]
  async fn test_panicking_pipeline_still_terminates() {
    let Fixture { service, dir: _dir } =
      fixture(json!({ "url": "https://cdn/v.mp4" }), FakeTranscoder::Panic);

    let handle = service.submit(SHARE_TEXT, None).unwrap();
    let id = handle.id();
    handle.wait().await;

    let job = service.poll_status(id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.message, "system error");
    // the fault came from the transcoder, not an earlier phase
    assert!(job.error_detail.unwrap().contains("panicked"));
  }

  #[tokio::test]
  async fn test_concurrent_jobs_are_independent() {
    let Fixture { service, dir: _dir } = succeeding();

    let handles = (0..8)
      .map(|_| service.submit(SHARE_TEXT, None).unwrap())
      .collect::<Vec<_>>();
    let ids = handles.iter().map(JobHandle::id).collect::<Vec<_>>();
    for handle in handles {
      handle.wait().await;
    }

    for id in ids {
      assert_eq!(service.poll_status(id).unwrap().status, JobStatus::Completed);
    }
  }

  #[tokio::test]
  async fn test_sweep_removes_abandoned_terminal_jobs() {
    let Fixture { service, dir } = succeeding();
    let service = match Arc::try_unwrap(service) {
      Ok(service) => Arc::new(service.with_retention(Duration::ZERO)),
      Err(_) => unreachable!("fixture service is not shared"),
    };

    let handle = service.submit(SHARE_TEXT, None).unwrap();
    let id = handle.id();
    handle.wait().await;

    let running = Uuid::new_v4();
    service.tracker.create(running).unwrap();

    assert_eq!(service.sweep_abandoned().await, 1);
    assert!(service.poll_status(id).is_err());
    assert!(service.poll_status(running).is_ok());
    assert!(!artifact_path(dir.path(), id).exists());
  }
}
