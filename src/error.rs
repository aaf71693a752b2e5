use std::path::PathBuf;
use thiserror::Error;

/// Errors from reading or writing the settings document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine a per-user data directory")]
    NoDataDir,

    #[error("config I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while locating or acquiring the external tools.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("{tool} not found; place it in {dir} or on your PATH")]
    Missing { tool: String, dir: PathBuf },

    #[error("failed to download {tool}: {reason}")]
    Download { tool: String, reason: String },

    #[error("I/O error while provisioning: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from running the external downloader.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("yt-dlp exited with {code}: {stderr}")]
    Failed { code: String, stderr: String },

    #[error("could not parse yt-dlp output: {0}")]
    Parse(String),

    #[error("thumbnail request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("thumbnail larger than {0} bytes")]
    TooLarge(usize),

    #[error("downloaded file not found")]
    OutputNotFound,

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// Single line suitable for the entry list.
    pub fn summary(&self) -> String {
        match self {
            ToolError::Failed { stderr, .. } => stderr
                .lines()
                .rev()
                .find(|line| line.contains("ERROR"))
                .or_else(|| stderr.lines().rev().find(|line| !line.trim().is_empty()))
                .map(|line| line.trim().to_string())
                .unwrap_or_else(|| self.to_string()),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_prefers_last_error_line() {
        let err = ToolError::Failed {
            code: "exit status: 1".into(),
            stderr: "WARNING: slow\nERROR: Video unavailable\n\n".into(),
        };
        assert_eq!(err.summary(), "ERROR: Video unavailable");
    }

    #[test]
    fn summary_falls_back_to_last_line() {
        let err = ToolError::Failed {
            code: "exit status: 2".into(),
            stderr: "something odd\n".into(),
        };
        assert_eq!(err.summary(), "something odd");
    }
}
