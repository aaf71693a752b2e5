use crate::config::app_dir;
use crate::error::ProvisionError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const YTDLP_RELEASE_BASE: &str = "https://github.com/yt-dlp/yt-dlp/releases/latest/download";

/// Absolute locations of the external tools, handed to every invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub ytdlp: PathBuf,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Toolchain {
    /// Bare program names, left for the OS to resolve at spawn time.
    pub fn unresolved() -> Self {
        Self {
            ytdlp: PathBuf::from(exe_name("yt-dlp")),
            ffmpeg: PathBuf::from(exe_name("ffmpeg")),
            ffprobe: PathBuf::from(exe_name("ffprobe")),
        }
    }

    /// Directory passed to yt-dlp's `--ffmpeg-location`.
    pub fn ffmpeg_dir(&self) -> Option<&Path> {
        self.ffmpeg.parent().filter(|p| !p.as_os_str().is_empty())
    }
}

/// Result of provisioning: the best toolchain available plus one error per
/// tool that could not be resolved.
#[derive(Debug)]
pub struct Provisioned {
    pub toolchain: Toolchain,
    pub errors: Vec<ProvisionError>,
}

fn exe_name(tool: &str) -> String {
    if cfg!(windows) {
        format!("{tool}.exe")
    } else {
        tool.to_string()
    }
}

fn ytdlp_asset() -> Option<&'static str> {
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("windows", _) => Some("yt-dlp.exe"),
        ("macos", _) => Some("yt-dlp_macos"),
        ("linux", "x86_64") => Some("yt-dlp_linux"),
        ("linux", "aarch64") => Some("yt-dlp_linux_aarch64"),
        _ => None,
    }
}

pub struct Provisioner {
    bin_dir: PathBuf,
    search_path: Option<OsString>,
    allow_download: bool,
}

impl Provisioner {
    pub fn new(bin_dir: impl Into<PathBuf>) -> Self {
        Self {
            bin_dir: bin_dir.into(),
            search_path: std::env::var_os("PATH"),
            allow_download: true,
        }
    }

    pub fn default_location() -> Self {
        let dir = app_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::new(dir.join("bin"))
    }

    #[cfg(test)]
    pub fn with_search_path(mut self, search_path: Option<OsString>) -> Self {
        self.search_path = search_path;
        self
    }

    #[cfg(test)]
    pub fn offline(mut self) -> Self {
        self.allow_download = false;
        self
    }

    /// Resolves every tool independently. A tool that cannot be found keeps
    /// its bare name so the others are still usable.
    pub async fn ensure_present(&self) -> Provisioned {
        let mut errors = Vec::new();
        let bare = Toolchain::unresolved();

        let ytdlp = match self.locate("yt-dlp") {
            Some(path) => path,
            None => self.acquire_ytdlp().await.unwrap_or_else(|e| {
                errors.push(e);
                bare.ytdlp
            }),
        };
        let ffmpeg = self.locate_or_bare("ffmpeg", bare.ffmpeg, &mut errors);
        let ffprobe = self.locate_or_bare("ffprobe", bare.ffprobe, &mut errors);

        let toolchain = Toolchain {
            ytdlp,
            ffmpeg,
            ffprobe,
        };
        if errors.is_empty() && toolchain.ffprobe.parent() != toolchain.ffmpeg.parent() {
            warn!(
                ffmpeg = %toolchain.ffmpeg.display(),
                ffprobe = %toolchain.ffprobe.display(),
                "ffprobe is not next to ffmpeg; yt-dlp only searches the ffmpeg folder"
            );
        }
        for error in &errors {
            warn!(%error, "tool unavailable");
        }
        info!(?toolchain, missing = errors.len(), "external tools resolved");

        Provisioned { toolchain, errors }
    }

    fn locate_or_bare(&self, tool: &str, bare: PathBuf, errors: &mut Vec<ProvisionError>) -> PathBuf {
        self.locate(tool).unwrap_or_else(|| {
            errors.push(self.missing(tool));
            bare
        })
    }

    /// Bundled folder first, then the search path.
    fn locate(&self, tool: &str) -> Option<PathBuf> {
        let bundled = self.bin_dir.join(exe_name(tool));
        if bundled.is_file() {
            return Some(bundled);
        }
        let cwd = std::env::current_dir().ok()?;
        which::which_in(tool, self.search_path.as_ref(), cwd).ok()
    }

    fn missing(&self, tool: &str) -> ProvisionError {
        ProvisionError::Missing {
            tool: tool.to_string(),
            dir: self.bin_dir.clone(),
        }
    }

    async fn acquire_ytdlp(&self) -> Result<PathBuf, ProvisionError> {
        let asset = match ytdlp_asset() {
            Some(asset) if self.allow_download => asset,
            _ => return Err(self.missing("yt-dlp")),
        };
        let url = format!("{YTDLP_RELEASE_BASE}/{asset}");
        info!(%url, dir = %self.bin_dir.display(), "downloading yt-dlp");

        let download_err = |reason: String| ProvisionError::Download {
            tool: "yt-dlp".to_string(),
            reason,
        };
        let bytes = reqwest::get(&url)
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| download_err(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| download_err(e.to_string()))?;

        tokio::fs::create_dir_all(&self.bin_dir).await?;
        let target = self.bin_dir.join(exe_name("yt-dlp"));
        let partial = target.with_extension("part");
        tokio::fs::write(&partial, &bytes).await?;
        make_executable(&partial).await?;
        tokio::fs::rename(&partial, &target).await?;

        info!(path = %target.display(), size = bytes.len(), "yt-dlp installed");
        Ok(target)
    }
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch_tool(dir: &Path, tool: &str) -> PathBuf {
        let path = dir.join(exe_name(tool));
        fs::write(&path, "#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    #[tokio::test]
    async fn bundled_tools_are_used_first() {
        let bin = tempfile::tempdir().unwrap();
        let path_dir = tempfile::tempdir().unwrap();
        for tool in ["yt-dlp", "ffmpeg", "ffprobe"] {
            touch_tool(bin.path(), tool);
            touch_tool(path_dir.path(), tool);
        }

        let provisioned = Provisioner::new(bin.path())
            .with_search_path(Some(path_dir.path().as_os_str().to_owned()))
            .offline()
            .ensure_present()
            .await;
        assert!(provisioned.errors.is_empty());
        let toolchain = provisioned.toolchain;
        assert_eq!(toolchain.ytdlp, bin.path().join(exe_name("yt-dlp")));
        assert_eq!(toolchain.ffmpeg_dir(), Some(bin.path()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn falls_back_to_search_path() {
        let bin = tempfile::tempdir().unwrap();
        let path_dir = tempfile::tempdir().unwrap();
        touch_tool(bin.path(), "yt-dlp");
        let ffmpeg = touch_tool(path_dir.path(), "ffmpeg");
        touch_tool(path_dir.path(), "ffprobe");

        let provisioned = Provisioner::new(bin.path())
            .with_search_path(Some(path_dir.path().as_os_str().to_owned()))
            .offline()
            .ensure_present()
            .await;
        assert!(provisioned.errors.is_empty());
        assert_eq!(provisioned.toolchain.ffmpeg, ffmpeg);
    }

    #[tokio::test]
    async fn missing_ffmpeg_keeps_the_resolved_ytdlp() {
        let bin = tempfile::tempdir().unwrap();
        let empty = tempfile::tempdir().unwrap();
        let ytdlp = touch_tool(bin.path(), "yt-dlp");

        let provisioned = Provisioner::new(bin.path())
            .with_search_path(Some(empty.path().as_os_str().to_owned()))
            .offline()
            .ensure_present()
            .await;

        assert_eq!(provisioned.toolchain.ytdlp, ytdlp);
        assert_eq!(provisioned.toolchain.ffmpeg, PathBuf::from(exe_name("ffmpeg")));
        assert_eq!(provisioned.toolchain.ffmpeg_dir(), None);

        let missing: Vec<_> = provisioned
            .errors
            .iter()
            .map(|e| match e {
                ProvisionError::Missing { tool, dir } => {
                    assert_eq!(dir, bin.path());
                    tool.as_str()
                }
                other => panic!("unexpected error: {other}"),
            })
            .collect();
        assert_eq!(missing, ["ffmpeg", "ffprobe"]);
    }

    #[tokio::test]
    async fn nothing_found_offline_reports_every_tool() {
        let bin = tempfile::tempdir().unwrap();
        let empty = tempfile::tempdir().unwrap();
        let provisioned = Provisioner::new(bin.path())
            .with_search_path(Some(empty.path().as_os_str().to_owned()))
            .offline()
            .ensure_present()
            .await;
        assert_eq!(provisioned.toolchain, Toolchain::unresolved());
        assert_eq!(provisioned.errors.len(), 3);
    }
}
