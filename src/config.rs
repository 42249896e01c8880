use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use crate::{Error, Result};

pub const DEFAULT_REFERER: &str = "https://www.douyin.com/";

#[derive(Debug, Clone)]
pub struct Config {
  pub bind_addr: SocketAddr,
  pub download_dir: PathBuf,
  pub ffmpeg_path: Option<PathBuf>,
  pub ffmpeg_concurrency: usize,
  // how long a served artifact stays on disk
  pub cleanup_delay: Duration,
  // how long a finished but never retrieved job is kept
  pub retention: Duration,
  pub sweep_interval: Duration,
  pub referer: String,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
      download_dir: PathBuf::from("downloads"),
      ffmpeg_path: None,
      ffmpeg_concurrency: 2,
      cleanup_delay: Duration::from_secs(10),
      retention: Duration::from_secs(60 * 60),
      sweep_interval: Duration::from_secs(60),
      referer: DEFAULT_REFERER.to_owned(),
    }
  }
}

impl Config {
  pub fn from_env() -> Result<Self> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
    let mut config = Self::default();

    if let Some(addr) = lookup("BIND_ADDR") {
      config.bind_addr = parse("BIND_ADDR", &addr)?;
    }
    if let Some(dir) = lookup("DOWNLOAD_DIR") {
      config.download_dir = PathBuf::from(dir);
    }
    config.ffmpeg_path = lookup("FFMPEG_PATH").map(PathBuf::from);
    if let Some(n) = lookup("FFMPEG_CONCURRENCY") {
      config.ffmpeg_concurrency = parse("FFMPEG_CONCURRENCY", &n)?;
      if config.ffmpeg_concurrency == 0 {
        return Err(Error::Config("FFMPEG_CONCURRENCY must be > 0".into()));
      }
    }
    if let Some(secs) = lookup("CLEANUP_DELAY_SECS") {
      config.cleanup_delay = secs_of("CLEANUP_DELAY_SECS", &secs)?;
    }
    if let Some(secs) = lookup("JOB_RETENTION_SECS") {
      config.retention = secs_of("JOB_RETENTION_SECS", &secs)?;
    }
    if let Some(secs) = lookup("SWEEP_INTERVAL_SECS") {
      config.sweep_interval = secs_of("SWEEP_INTERVAL_SECS", &secs)?;
      if config.sweep_interval.is_zero() {
        return Err(Error::Config("SWEEP_INTERVAL_SECS must be > 0".into()));
      }
    }
    if let Some(referer) = lookup("SNIFF_REFERER") {
      config.referer = referer;
    }

    Ok(config)
  }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
  value
    .trim()
    .parse()
    .map_err(|_| Error::Config(format!("{key}: cannot parse {value:?}")))
}

fn secs_of(key: &str, value: &str) -> Result<Duration> {
  parse::<u64>(key, value).map(Duration::from_secs)
}
