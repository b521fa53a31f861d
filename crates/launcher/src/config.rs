use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

/// Launcher configuration loaded from environment variables.
///
/// Every field has a default suitable for a local worker; command-line
/// flags override individual values.
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    /// Config file used when no path is given on the command line.
    pub config_path: PathBuf,
    /// Root holding `{project}/{sequence}/{shot}` output directories.
    pub output_root: PathBuf,
    /// Directory holding the base workflow templates.
    pub workflows_dir: PathBuf,
    /// HTTP request timeout in seconds (default: `15`).
    pub request_timeout_secs: u64,
    /// Delay between history checks in seconds (default: `10`).
    pub poll_interval_secs: u64,
    /// Give up polling after this many seconds (default: `300`).
    pub poll_timeout_secs: u64,
}

impl LauncherConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                      |
    /// |------------------------|------------------------------|
    /// | `SHOTQ_CONFIG`         | `configs/story_template.txt` |
    /// | `COMFYUI_OUTPUT`       | `/ComfyUI/output`            |
    /// | `SHOTQ_WORKFLOWS_DIR`  | `workflows`                  |
    /// | `REQUEST_TIMEOUT_SECS` | `15`                         |
    /// | `POLL_INTERVAL_SECS`   | `10`                         |
    /// | `POLL_TIMEOUT_SECS`    | `300`                        |
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let path = |key: &str, default: &str| {
            PathBuf::from(lookup(key).unwrap_or_else(|| default.to_string()))
        };
        let secs = |key: &str, default: u64| -> anyhow::Result<u64> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .with_context(|| format!("{key} must be a whole number of seconds, got '{raw}'")),
                None => Ok(default),
            }
        };

        Ok(Self {
            config_path: path("SHOTQ_CONFIG", "configs/story_template.txt"),
            output_root: path("COMFYUI_OUTPUT", "/ComfyUI/output"),
            workflows_dir: path("SHOTQ_WORKFLOWS_DIR", "workflows"),
            request_timeout_secs: secs("REQUEST_TIMEOUT_SECS", 15)?,
            poll_interval_secs: secs("POLL_INTERVAL_SECS", 10)?,
            poll_timeout_secs: secs("POLL_TIMEOUT_SECS", 300)?,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
