use std::{sync::Arc, time::Duration};

use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod artifact_store;
mod config;
mod error;
mod extractor;
mod fetch;
mod job;
mod jobs;
#[cfg(test)]
mod testing;
mod tracker;
mod transcode;
mod util;

use artifact_store::ArtifactStore;
use config::Config;
use extractor::{builtin_providers, NoBrowser, Resolver, Sniffer};
use fetch::HttpFetcher;
use jobs::JobService;
use tracker::JobTracker;
use transcode::Ffmpeg;

pub use error::{Error, Result};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info")),
    )
    .init();

  let config = Config::from_env()?;
  let service = Arc::new(build_service(&config)?);

  if !service.sniffing_available() {
    warn!("no browser driver, jobs go straight to the remote providers");
  }

  let http_service = service.clone();
  let bind_addr = config.bind_addr;
  let sweep_interval = config.sweep_interval;

  Toplevel::new(move |s| async move {
    s.start(SubsystemBuilder::new("http", move |subsys| {
      serve(subsys, bind_addr, http_service)
    }));
    s.start(SubsystemBuilder::new("sweeper", move |subsys| {
      sweep(subsys, sweep_interval, service)
    }));
  })
  .catch_signals()
  .handle_shutdown_requests(SHUTDOWN_TIMEOUT)
  .await
  .map_err(|e| Error::Server(e.to_string()))
}

fn build_service(config: &Config) -> Result<JobService> {
  let fetcher = Arc::new(HttpFetcher::new());
  let sniffer =
    Sniffer::new(Arc::new(NoBrowser), fetcher.clone(), &config.referer);
  let resolver =
    Resolver::new(fetcher, builtin_providers()).with_sniffer(sniffer);

  let ffmpeg = Ffmpeg::new(
    Ffmpeg::locate(config.ffmpeg_path.as_deref()),
    config.ffmpeg_concurrency,
  );
  info!("using transcoder at {}", ffmpeg.program().display());

  let store = ArtifactStore::new(&config.download_dir)?.spawn();

  Ok(
    JobService::new(JobTracker::new(), store, resolver, Arc::new(ffmpeg))
      .with_cleanup_delay(config.cleanup_delay)
      .with_retention(config.retention),
  )
}

async fn serve(
  subsys: SubsystemHandle,
  bind_addr: std::net::SocketAddr,
  service: Arc<JobService>,
) -> Result<()> {
  let app = api::router(service);

  info!("Listening on http://{bind_addr}");

  axum::Server::try_bind(&bind_addr)
    .map_err(|e| Error::Server(e.to_string()))?
    .serve(app.into_make_service())
    .with_graceful_shutdown(subsys.on_shutdown_requested())
    .await
    .map_err(|e| Error::Server(e.to_string()))
}

async fn sweep(
  subsys: SubsystemHandle,
  interval: Duration,
  service: Arc<JobService>,
) -> Result<()> {
  let mut ticker = tokio::time::interval(interval);

  loop {
    tokio::select! {
      _ = ticker.tick() => {
        let swept = service.sweep_abandoned().await;
        if swept > 0 {
          info!("swept {swept} abandoned jobs");
        }
      }
      _ = subsys.on_shutdown_requested() => break,
    }
  }

  Ok(())
}
