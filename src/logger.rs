use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber: stdout always, plus an append-only file when asked.
/// `RUST_LOG` overrides `default_filter`.
pub fn init(log_file: Option<&Path>, default_filter: &str) -> anyhow::Result<()> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
  let file = match log_file {
    Some(path) => Some(file_layer(open_append(path)?)),
    None => None,
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_target(false))
    .with(file)
    .try_init()?;
  Ok(())
}

type FileLayer<S> = fmt::Layer<S, fmt::format::DefaultFields, fmt::format::Format<fmt::format::Full>, Mutex<File>>;

fn file_layer<S>(file: File) -> FileLayer<S> {
  fmt::layer().with_ansi(false).with_writer(Mutex::new(file))
}

fn open_append(path: &Path) -> std::io::Result<File> {
  OpenOptions::new().create(true).append(true).open(path)
}
