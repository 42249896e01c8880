use std::{
  ffi::OsString,
  path::{Path, PathBuf},
  process::Stdio,
};

use async_trait::async_trait;
use tokio::{process::Command, sync::Semaphore};
use tracing::debug;

use crate::{Error, Result};

#[async_trait]
pub trait Transcode: Send + Sync {
  async fn transcode(&self, input: &Path, output: &Path) -> Result<()>;
}

// strip the video stream and re-encode the audio as ALAC.
// requires an ffmpeg executable.
pub struct Ffmpeg {
  program: PathBuf,
  // ensure only a limited set of ffmpeg processes at a time
  permits: Semaphore,
}

impl Ffmpeg {
  pub fn new(program: impl Into<PathBuf>, concurrency: usize) -> Self {
    Self {
      program: program.into(),
      permits: Semaphore::new(concurrency.max(1)),
    }
  }

  // explicit path, else a binary shipped next to ours, else PATH lookup
  pub fn locate(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
      return path.to_owned();
    }

    let bundled = std::env::current_exe().ok().and_then(|exe| {
      let dir = exe.parent()?;
      ["ffmpeg", "ffmpeg.exe"]
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
    });

    bundled.unwrap_or_else(|| PathBuf::from("ffmpeg"))
  }

  pub fn program(&self) -> &Path {
    &self.program
  }

  fn args(input: &Path, output: &Path) -> Vec<OsString> {
    vec![
      "-y".into(),
      "-i".into(),
      input.into(),
      "-vn".into(),
      "-acodec".into(),
      "alac".into(),
      output.into(),
    ]
  }
}

#[async_trait]
impl Transcode for Ffmpeg {
  async fn transcode(&self, input: &Path, output: &Path) -> Result<()> {
    let _permit = self
      .permits
      .acquire()
      .await
      .map_err(|_| Error::Transcode("transcoder is shutting down".into()))?;

    debug!("transcoding {} -> {}", input.display(), output.display());
    let result = Command::new(&self.program)
      .args(Self::args(input, output))
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .output()
      .await
      .map_err(|e| {
        Error::Transcode(format!(
          "failed to start {}: {e}",
          self.program.display()
        ))
      })?;

    if !result.status.success() {
      let stderr = String::from_utf8_lossy(&result.stderr);
      let last_line = stderr.lines().rev().find(|l| !l.trim().is_empty());
      return Err(Error::Transcode(format!(
        "{} exited with {}: {}",
        self.program.display(),
        result.status,
        last_line.unwrap_or("no output")
      )));
    }

    Ok(())
  }
}
