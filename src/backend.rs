use crate::error::ToolError;
use crate::models::{EntryUpdate, Preset, Thumbnail};
use crate::provision::Toolchain;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

const OUTPUT_TEMPLATE: &str = "%(title)s [%(id)s].%(ext)s";
const MAX_THUMBNAIL_BYTES: usize = 5 * 1024 * 1024;

/// Everything one download needs, captured at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub preset: Preset,
    pub folder: PathBuf,
}

/// Display fields reported by the extractor.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct VideoInfo {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub thumbnails: Vec<ThumbnailRef>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ThumbnailRef {
    pub url: Option<String>,
}

impl VideoInfo {
    /// The preferred thumbnail, or the last listed one (yt-dlp sorts best last).
    pub fn thumbnail_url(&self) -> Option<&str> {
        self.thumbnail
            .as_deref()
            .or_else(|| self.thumbnails.iter().rev().find_map(|t| t.url.as_deref()))
    }
}

/// Sends updates for one entry back to the interface loop.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    id: Uuid,
    tx: mpsc::UnboundedSender<(Uuid, EntryUpdate)>,
}

impl ProgressSink {
    pub fn new(id: Uuid, tx: mpsc::UnboundedSender<(Uuid, EntryUpdate)>) -> Self {
        Self { id, tx }
    }

    pub fn send(&self, update: EntryUpdate) {
        let _ = self.tx.send((self.id, update));
    }
}

/// The external tools as seen by the rest of the app.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    async fn probe(&self, url: &str) -> Result<VideoInfo, ToolError>;

    async fn fetch_thumbnail(&self, url: &str) -> Result<Thumbnail, ToolError>;

    /// Runs one download to completion and returns the produced file.
    async fn download(
        &self,
        request: DownloadRequest,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<PathBuf, ToolError>;
}

pub struct YtDlp {
    tools: Toolchain,
    http: reqwest::Client,
}

impl YtDlp {
    pub fn new(tools: Toolchain) -> Self {
        Self {
            tools,
            http: reqwest::Client::new(),
        }
    }

    fn program(&self) -> String {
        self.tools.ytdlp.to_string_lossy().to_string()
    }
}

pub fn download_args(request: &DownloadRequest, tools: &Toolchain) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--newline".into(),
        "--no-playlist".into(),
        "--no-colors".into(),
    ];
    if let Some(dir) = tools.ffmpeg_dir() {
        args.push("--ffmpeg-location".into());
        args.push(dir.as_os_str().to_owned());
    }
    args.push("-P".into());
    args.push(request.folder.as_os_str().to_owned());
    args.push("-o".into());
    args.push(OUTPUT_TEMPLATE.into());
    args.extend(request.preset.ytdlp_args().into_iter().map(OsString::from));
    args.push("--".into());
    args.push(request.url.clone().into());
    args
}

#[async_trait]
impl MediaBackend for YtDlp {
    async fn probe(&self, url: &str) -> Result<VideoInfo, ToolError> {
        let output = Command::new(&self.tools.ytdlp)
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg("--")
            .arg(url)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ToolError::Spawn {
                program: self.program(),
                source,
            })?;

        if !output.status.success() {
            return Err(ToolError::Failed {
                code: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| ToolError::Parse(e.to_string()))
    }

    async fn fetch_thumbnail(&self, url: &str) -> Result<Thumbnail, ToolError> {
        let mut response = self.http.get(url).send().await?.error_for_status()?;
        if response
            .content_length()
            .is_some_and(|len| len > MAX_THUMBNAIL_BYTES as u64)
        {
            return Err(ToolError::TooLarge(MAX_THUMBNAIL_BYTES));
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() + chunk.len() > MAX_THUMBNAIL_BYTES {
                return Err(ToolError::TooLarge(MAX_THUMBNAIL_BYTES));
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(Thumbnail(bytes))
    }

    async fn download(
        &self,
        request: DownloadRequest,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<PathBuf, ToolError> {
        tokio::fs::create_dir_all(&request.folder).await?;

        let args = download_args(&request, &self.tools);
        info!(url = %request.url, preset = %request.preset, folder = %request.folder.display(), "starting yt-dlp");

        let mut child = Command::new(&self.tools.ytdlp)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: self.program(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::Parse("stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ToolError::Parse("stderr not captured".into()))?;

        // stderr is drained separately so a chatty tool cannot stall on a full pipe
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).split(b'\n');
            let mut collected = Vec::new();
            while let Ok(Some(raw)) = lines.next_segment().await {
                collected.push(decode_line(&raw));
            }
            collected
        });

        let parser = OutputParser::new().map_err(|e| ToolError::Parse(e.to_string()))?;
        let mut stdout_lines = BufReader::new(stdout).split(b'\n');
        let mut output_path: Option<PathBuf> = None;

        loop {
            let raw = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(url = %request.url, "download cancelled");
                    return Err(ToolError::Cancelled);
                }
                raw = stdout_lines.next_segment() => raw?,
            };
            let Some(raw) = raw else { break };
            let line = decode_line(&raw);

            for event in parser.parse_line(&line) {
                match event {
                    LineEvent::Progress(percent) => progress.send(EntryUpdate::Progress(percent)),
                    LineEvent::Speed(speed) => progress.send(EntryUpdate::Speed(speed)),
                    LineEvent::Eta(eta) => progress.send(EntryUpdate::Eta(eta)),
                    LineEvent::Path(path) => output_path = Some(path),
                }
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => return Err(ToolError::Cancelled),
            status = child.wait() => status?,
        };
        let stderr_lines = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(ToolError::Failed {
                code: status.to_string(),
                stderr: stderr_lines.join("\n"),
            });
        }

        let path = output_path.ok_or(ToolError::OutputNotFound)?;
        let path = if path.is_absolute() {
            path
        } else {
            request.folder.join(path)
        };
        Ok(path)
    }
}

/// yt-dlp writes file names in the platform encoding, which is not always UTF-8.
fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim_end_matches('\r').to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    Progress(f64),
    Speed(String),
    Eta(String),
    Path(PathBuf),
}

/// Recognizes the progress and destination lines yt-dlp prints with `--newline`.
pub struct OutputParser {
    progress: Regex,
    speed: Regex,
    eta: Regex,
    paths: [Regex; 4],
}

impl OutputParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            progress: Regex::new(r"\[download\]\s+(\d+\.?\d*)%")?,
            speed: Regex::new(r"at\s+(\S+/s)")?,
            eta: Regex::new(r"ETA\s+(\S+)")?,
            paths: [
                Regex::new(r"^\[download\] Destination: (.+)$")?,
                Regex::new(r#"^\[Merger\] Merging formats into "(.+)"$"#)?,
                Regex::new(r"^\[ExtractAudio\] Destination: (.+)$")?,
                Regex::new(r"^\[download\] (.+) has already been downloaded")?,
            ],
        })
    }

    pub fn parse_line(&self, line: &str) -> Vec<LineEvent> {
        let line = line.trim_end();
        let mut events = Vec::new();

        if let Some(caps) = self.progress.captures(line) {
            if let Ok(percent) = caps[1].parse::<f64>() {
                events.push(LineEvent::Progress(percent.min(100.0)));
            }
            if let Some(caps) = self.speed.captures(line) {
                events.push(LineEvent::Speed(caps[1].to_string()));
            }
            if let Some(caps) = self.eta.captures(line) {
                events.push(LineEvent::Eta(caps[1].to_string()));
            }
        }

        if let Some(caps) = self.paths.iter().find_map(|re| re.captures(line)) {
            events.push(LineEvent::Path(PathBuf::from(&caps[1])));
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_progress_line() {
        let parser = OutputParser::new().unwrap();
        let events =
            parser.parse_line("[download]  42.5% of ~ 10.00MiB at    1.20MiB/s ETA 00:05");
        assert_eq!(
            events,
            vec![
                LineEvent::Progress(42.5),
                LineEvent::Speed("1.20MiB/s".into()),
                LineEvent::Eta("00:05".into()),
            ]
        );
    }

    #[test]
    fn merger_line_wins_as_final_path() {
        let parser = OutputParser::new().unwrap();
        let lines = [
            "[download] Destination: /tmp/out/Clip [abc].f137.mp4",
            "[download] 100% of 10.00MiB in 00:02",
            "[Merger] Merging formats into \"/tmp/out/Clip [abc].mp4\"",
        ];
        let last = lines
            .iter()
            .flat_map(|l| parser.parse_line(l))
            .filter_map(|e| match e {
                LineEvent::Path(p) => Some(p),
                _ => None,
            })
            .last();
        assert_eq!(last, Some(PathBuf::from("/tmp/out/Clip [abc].mp4")));
    }

    #[test]
    fn already_downloaded_reports_path() {
        let parser = OutputParser::new().unwrap();
        let events = parser.parse_line("[download] /v/Song [x1].mp3 has already been downloaded");
        assert_eq!(events, vec![LineEvent::Path(PathBuf::from("/v/Song [x1].mp3"))]);
    }

    #[test]
    fn unrelated_lines_are_ignored() {
        let parser = OutputParser::new().unwrap();
        assert!(parser.parse_line("[youtube] abc: Downloading webpage").is_empty());
    }

    #[test]
    fn download_args_carry_preset_folder_and_ffmpeg() {
        let tools = Toolchain {
            ytdlp: PathBuf::from("/opt/ytdx/bin/yt-dlp"),
            ffmpeg: PathBuf::from("/opt/ytdx/bin/ffmpeg"),
            ffprobe: PathBuf::from("/opt/ytdx/bin/ffprobe"),
        };
        let request = DownloadRequest {
            url: "https://youtu.be/abc".into(),
            preset: Preset::P1080,
            folder: PathBuf::from("/home/me/Videos"),
        };
        let args: Vec<String> = download_args(&request, &tools)
            .into_iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect();

        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[pos("--ffmpeg-location") + 1], "/opt/ytdx/bin");
        assert_eq!(args[pos("-P") + 1], "/home/me/Videos");
        assert_eq!(
            args[pos("-f") + 1],
            "bestvideo*[height<=1080]+bestaudio/best[height<=1080]"
        );
        assert_eq!(args.last().unwrap(), "https://youtu.be/abc");
    }

    #[test]
    fn bare_toolchain_omits_ffmpeg_location() {
        let request = DownloadRequest {
            url: "https://youtu.be/abc".into(),
            preset: Preset::Best,
            folder: PathBuf::from("."),
        };
        let args = download_args(&request, &Toolchain::unresolved());
        assert!(!args.iter().any(|a| a == "--ffmpeg-location"));
    }

    #[test]
    fn thumbnail_url_falls_back_to_list() {
        let info: VideoInfo = serde_json::from_str(
            r#"{"title":"Clip","thumbnails":[{"url":"https://i/a.jpg"},{"url":"https://i/b.jpg"}]}"#,
        )
        .unwrap();
        assert_eq!(info.title.as_deref(), Some("Clip"));
        assert_eq!(info.thumbnail_url(), Some("https://i/b.jpg"));
    }

    mod thumbnails {
        use super::*;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        async fn serve_once(response: Vec<u8>) -> String {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                if let Ok((mut socket, _)) = listener.accept().await {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket.write_all(&response).await;
                    let _ = socket.shutdown().await;
                }
            });
            format!("http://{addr}/thumb.jpg")
        }

        fn backend() -> YtDlp {
            YtDlp {
                tools: Toolchain::unresolved(),
                http: reqwest::Client::builder().no_proxy().build().unwrap(),
            }
        }

        #[tokio::test]
        async fn small_thumbnail_is_returned() {
            let url = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nabcd".to_vec()).await;
            let thumb = backend().fetch_thumbnail(&url).await.unwrap();
            assert_eq!(thumb, Thumbnail(b"abcd".to_vec()));
        }

        #[tokio::test]
        async fn declared_oversize_is_rejected_before_reading() {
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n",
                MAX_THUMBNAIL_BYTES * 2
            );
            let url = serve_once(header.into_bytes()).await;
            let err = backend().fetch_thumbnail(&url).await.unwrap_err();
            assert!(matches!(err, ToolError::TooLarge(MAX_THUMBNAIL_BYTES)));
        }

        #[tokio::test]
        async fn undeclared_body_is_capped_while_streaming() {
            let mut response = b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n".to_vec();
            response.extend(std::iter::repeat(0u8).take(MAX_THUMBNAIL_BYTES + 1));
            let url = serve_once(response).await;
            let err = backend().fetch_thumbnail(&url).await.unwrap_err();
            assert!(matches!(err, ToolError::TooLarge(_)));
        }
    }
}
