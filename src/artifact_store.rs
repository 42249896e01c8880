use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  sync::Arc,
};

use kameo::{actor::ActorRef, messages, Actor};
use tokio::fs::File;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{job::JobId, Error, Result};

pub struct ArtifactFile {
  id: JobId,
  path: PathBuf,
  raw_path: PathBuf,
}

impl Drop for ArtifactFile {
  fn drop(&mut self) {
    // delete both files on drop
    for path in [&self.raw_path, &self.path] {
      if !path.exists() {
        continue;
      }

      match std::fs::remove_file(path) {
        Ok(()) => debug!(id = %self.id, "deleted file: {}", path.display()),
        Err(e) => {
          warn!(id = %self.id, "failed to delete {}: {}", path.display(), e)
        }
      }
    }
  }
}

#[derive(Actor)]
pub struct ArtifactStore {
  base_dir: PathBuf,
  files: HashMap<JobId, Arc<ArtifactFile>>,
}

#[derive(Clone)]
pub struct ArtifactStoreRef(ActorRef<ArtifactStore>);

#[messages]
impl ArtifactStore {
  #[message]
  async fn allocate(&mut self, job_id: JobId) -> Result<Arc<ArtifactFile>> {
    let file = self
      .files
      .entry(job_id)
      .or_insert_with(|| Arc::new(ArtifactFile::new(&self.base_dir, job_id)));

    Ok(file.clone())
  }

  #[message]
  async fn lookup(&mut self, job_id: JobId) -> Result<Option<Arc<ArtifactFile>>> {
    Ok(self.files.get(&job_id).cloned())
  }

  #[message]
  async fn remove(&mut self, job_id: JobId) -> Result<()> {
    self.files.remove(&job_id);
    Ok(())
  }
}

impl ArtifactStore {
  pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
    let base_dir = base_dir.as_ref().to_owned();
    std::fs::create_dir_all(&base_dir)?;

    // leftovers of a previous run are unreachable: their jobs are gone
    for entry in std::fs::read_dir(&base_dir)? {
      let path = entry?.path();
      if path.is_file() && is_job_file(&path) {
        if let Err(e) = std::fs::remove_file(&path) {
          warn!("failed to delete stale {}: {}", path.display(), e);
        }
      }
    }

    Ok(Self {
      base_dir,
      files: HashMap::new(),
    })
  }

  pub fn spawn(self) -> ArtifactStoreRef {
    ArtifactStoreRef(kameo::spawn(self))
  }
}

impl ArtifactStoreRef {
  pub async fn allocate(&self, job_id: JobId) -> Result<Arc<ArtifactFile>> {
    self
      .0
      .ask(Allocate { job_id })
      .send()
      .await
      .map_err(|_| Error::StoreUnavailable)
  }

  pub async fn lookup(
    &self,
    job_id: JobId,
  ) -> Result<Option<Arc<ArtifactFile>>> {
    self
      .0
      .ask(Lookup { job_id })
      .send()
      .await
      .map_err(|_| Error::StoreUnavailable)
  }

  pub async fn remove(&self, job_id: JobId) -> Result<()> {
    self
      .0
      .ask(Remove { job_id })
      .send()
      .await
      .map_err(|_| Error::StoreUnavailable)
  }
}

impl ArtifactFile {
  fn new(base_dir: &Path, job_id: JobId) -> Self {
    Self {
      id: job_id,
      path: artifact_path(base_dir, job_id),
      raw_path: base_dir.join(format!("{job_id}_temp.mp4")),
    }
  }

  pub async fn open(&self) -> Result<File> {
    File::open(&self.path).await.map_err(Error::IO)
  }

  pub fn ready(&self) -> bool {
    self.path.exists()
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn raw_path(&self) -> &Path {
    &self.raw_path
  }
}

pub fn artifact_path(base_dir: &Path, job_id: JobId) -> PathBuf {
  base_dir.join(format!("{job_id}.m4a"))
}

fn is_job_file(path: &Path) -> bool {
  path
    .file_name()
    .and_then(|name| name.to_str())
    .and_then(|name| name.get(..36))
    .map_or(false, |prefix| Uuid::parse_str(prefix).is_ok())
}
