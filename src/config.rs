use serde::{Deserialize, Serialize};
use std::path::Path;

/// Expand ${VAR} references against the process environment. Unset
/// variables expand to the empty string.
fn expand_env_vars(input: &str) -> String {
  let mut result = input.to_string();
  while let Some(start) = result.find("${") {
    let Some(end) = result[start..].find('}') else {
      break;
    };
    let name = &result[start + 2..start + end];
    let value = std::env::var(name).unwrap_or_default();
    result = format!("{}{}{}", &result[..start], value, &result[start + end + 1..]);
  }
  result
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
  /// Auto-refetch a stale entry when a watcher attaches.
  #[serde(default = "default_true")]
  pub refetch_on_subscribe: bool,

  /// Start the post-settle refetch from `submit_edit`.
  #[serde(default = "default_true")]
  pub refetch_after_mutation: bool,

  /// Per-watcher update buffer; a slow watcher past this lags and skips.
  #[serde(default = "default_watch_capacity")]
  pub watch_capacity: usize,

  #[serde(default)]
  pub logging: LoggingSection,
}

fn default_true() -> bool {
  true
}

fn default_watch_capacity() -> usize {
  64
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      refetch_on_subscribe: default_true(),
      refetch_after_mutation: default_true(),
      watch_capacity: default_watch_capacity(),
      logging: LoggingSection::default(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
  #[serde(default = "default_level")]
  pub level: String,
}

fn default_level() -> String {
  "info".into()
}

impl Default for LoggingSection {
  fn default() -> Self {
    Self {
      level: default_level(),
    }
  }
}

impl ClientConfig {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
    let content = std::fs::read_to_string(&path)?;
    let expanded = expand_env_vars(&content);
    Ok(serde_yaml::from_str(&expanded)?)
  }

  pub fn find_and_load() -> Result<Option<Self>, anyhow::Error> {
    for p in ["querysync.yaml", "querysync.yml"] {
      if Path::new(p).exists() {
        tracing::info!("Loading config from {}", p);
        return Ok(Some(Self::from_file(p)?));
      }
    }
    Ok(None)
  }
}

/// Install the global tracing subscriber the way an embedding binary
/// would: RUST_LOG wins over the configured level.
pub fn init_tracing(level: &str) {
  use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.to_string().into()),
    )
    .with(tracing_subscriber::fmt::layer())
    .init();
}
