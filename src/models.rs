use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Quality presets offered in the format selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Preset {
    #[default]
    Best,
    P1080,
    P720,
    P480,
    P360,
    AudioMp3,
    AudioM4a,
}

impl Preset {
    pub const ALL: [Preset; 7] = [
        Preset::Best,
        Preset::P1080,
        Preset::P720,
        Preset::P480,
        Preset::P360,
        Preset::AudioMp3,
        Preset::AudioM4a,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Preset::Best => "Best Quality (Video + Audio)",
            Preset::P1080 => "1080p",
            Preset::P720 => "720p",
            Preset::P480 => "480p",
            Preset::P360 => "360p",
            Preset::AudioMp3 => "Audio Only (Best MP3)",
            Preset::AudioM4a => "Audio Only (M4A)",
        }
    }

    /// Parses a label; accepts the older `Best (video+audio)` spelling.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        if label.eq_ignore_ascii_case("Best (video+audio)") || label.eq_ignore_ascii_case("best")
        {
            return Some(Preset::Best);
        }
        Self::ALL
            .into_iter()
            .find(|p| p.label().eq_ignore_ascii_case(label))
    }

    pub fn max_height(&self) -> Option<u32> {
        match self {
            Preset::P1080 => Some(1080),
            Preset::P720 => Some(720),
            Preset::P480 => Some(480),
            Preset::P360 => Some(360),
            _ => None,
        }
    }

    /// yt-dlp arguments selecting and post-processing the streams.
    pub fn ytdlp_args(&self) -> Vec<String> {
        let mut args = vec!["-f".to_string()];
        match self {
            Preset::Best => {
                args.push("bestvideo*+bestaudio/best".into());
                args.extend(["--merge-output-format".into(), "mp4".into()]);
            }
            Preset::AudioMp3 => {
                args.push("bestaudio/best".into());
                args.extend([
                    "-x".into(),
                    "--audio-format".into(),
                    "mp3".into(),
                    "--audio-quality".into(),
                    "0".into(),
                ]);
            }
            Preset::AudioM4a => {
                args.push("bestaudio[ext=m4a]/bestaudio/best".into());
                args.extend(["-x".into(), "--audio-format".into(), "m4a".into()]);
            }
            height_capped => {
                let h = height_capped.max_height().unwrap_or(1080);
                args.push(format!(
                    "bestvideo*[height<={h}]+bestaudio/best[height<={h}]"
                ));
                args.extend(["--merge-output-format".into(), "mp4".into()]);
            }
        }
        args
    }

    pub fn next(&self) -> Self {
        let idx = Self::ALL.iter().position(|p| p == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }

    pub fn prev(&self) -> Self {
        let idx = Self::ALL.iter().position(|p| p == self).unwrap_or(0);
        Self::ALL[(idx + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl TryFrom<String> for Preset {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Preset::from_label(&value).ok_or_else(|| format!("unknown format preset: {value}"))
    }
}

impl From<Preset> for String {
    fn from(value: Preset) -> Self {
        value.label().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub last_folder: PathBuf,
    pub dark_mode: bool,
    pub format_preset: Preset,
    pub max_concurrent_downloads: usize,
    /// Keys this version does not know about, written back untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            last_folder: dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")),
            dark_mode: false,
            format_preset: Preset::default(),
            max_concurrent_downloads: 3,
            extra: serde_json::Map::new(),
        }
    }
}

impl Config {
    pub fn download_slots(&self) -> usize {
        self.max_concurrent_downloads.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    Idle,
    Queued,
    Downloading,
    Complete,
    Failed,
    Cancelled,
}

impl EntryStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, EntryStatus::Queued | EntryStatus::Downloading)
    }

    /// Any entry not already queued or running can be sent again, including
    /// a completed one being saved with another preset.
    pub fn can_dispatch(&self) -> bool {
        !self.is_active()
    }

    pub fn label(&self) -> &'static str {
        match self {
            EntryStatus::Idle => "ready",
            EntryStatus::Queued => "queued",
            EntryStatus::Downloading => "downloading",
            EntryStatus::Complete => "complete",
            EntryStatus::Failed => "failed",
            EntryStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataState {
    Pending,
    Ready,
    Unavailable,
}

/// Raw thumbnail image bytes as served by the site.
#[derive(Clone, PartialEq, Eq)]
pub struct Thumbnail(pub Vec<u8>);

impl Thumbnail {
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Debug for Thumbnail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thumbnail({} bytes)", self.0.len())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub title: Option<String>,
    pub thumbnail: Option<Thumbnail>,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.thumbnail.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct LinkEntry {
    pub id: Uuid,
    pub url: String,
    pub title: Option<String>,
    pub thumbnail: Option<Thumbnail>,
    pub metadata: MetadataState,
    pub status: EntryStatus,
    pub progress: f64,
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub error: Option<String>,
    pub output_path: Option<PathBuf>,
    pub marked: bool,
    /// Cancelled when the entry is removed; parent of every download token.
    pub cancel: CancellationToken,
    pub download_cancel: Option<CancellationToken>,
}

impl LinkEntry {
    pub fn new(url: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            url,
            title: None,
            thumbnail: None,
            metadata: MetadataState::Pending,
            status: EntryStatus::Idle,
            progress: 0.0,
            speed: None,
            eta: None,
            error: None,
            output_path: None,
            marked: false,
            cancel: CancellationToken::new(),
            download_cancel: None,
        }
    }

    pub fn display_title(&self) -> String {
        self.title.clone().unwrap_or_else(|| {
            if self.url.chars().count() > 60 {
                let head: String = self.url.chars().take(60).collect();
                format!("{head}...")
            } else {
                self.url.clone()
            }
        })
    }

    pub fn apply_metadata(&mut self, metadata: Metadata) {
        self.metadata = if metadata.is_empty() {
            MetadataState::Unavailable
        } else {
            MetadataState::Ready
        };
        if let Some(title) = metadata.title {
            self.title = Some(title);
        }
        if let Some(thumbnail) = metadata.thumbnail {
            self.thumbnail = Some(thumbnail);
        }
    }

    /// Resets download bookkeeping before a (re)dispatch and hands out the
    /// token the download task must watch.
    pub fn prepare_dispatch(&mut self) -> CancellationToken {
        let token = self.cancel.child_token();
        self.download_cancel = Some(token.clone());
        self.status = EntryStatus::Queued;
        self.progress = 0.0;
        self.speed = None;
        self.eta = None;
        self.error = None;
        self.output_path = None;
        token
    }

    pub fn cancel_download(&mut self) -> bool {
        match self.download_cancel.take() {
            Some(token) if self.status.is_active() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub title: String,
    pub message: String,
}

impl Notice {
    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Info,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Warning,
            title: title.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMode {
    Url,
    Folder(String),
}

#[derive(Debug)]
pub struct AppState {
    pub entries: Vec<LinkEntry>,
    pub config: Config,
    pub input_buffer: String,
    pub selected_index: usize,
    pub mode: InputMode,
    pub notices: VecDeque<Notice>,
    pub show_about: bool,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            entries: Vec::new(),
            config,
            input_buffer: String::new(),
            selected_index: 0,
            mode: InputMode::Url,
            notices: VecDeque::new(),
            show_about: false,
        }
    }

    pub fn has_entries(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn is_modal(&self) -> bool {
        self.show_about || !self.notices.is_empty()
    }

    pub fn notify(&mut self, notice: Notice) {
        self.notices.push_back(notice);
    }

    pub fn active_count(&self) -> usize {
        self.entries.iter().filter(|e| e.status.is_active()).count()
    }

    pub fn completed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == EntryStatus::Complete)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == EntryStatus::Failed)
            .count()
    }

    /// Removes marked entries, or the highlighted one when nothing is marked.
    /// Returns the removed entries so the caller can cancel their work.
    pub fn take_selected(&mut self) -> Vec<LinkEntry> {
        let any_marked = self.entries.iter().any(|e| e.marked);
        let selected = self.selected_index;
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.entries.len());
        for (idx, entry) in self.entries.drain(..).enumerate() {
            let hit = if any_marked { entry.marked } else { idx == selected };
            if hit {
                removed.push(entry);
            } else {
                kept.push(entry);
            }
        }
        self.entries = kept;
        if self.selected_index >= self.entries.len() {
            self.selected_index = self.entries.len().saturating_sub(1);
        }
        removed
    }

    pub fn get_entry_by_id_mut(&mut self, id: Uuid) -> Option<&mut LinkEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    Quit,
    Submit,
    DeleteSelected,
    ToggleMark,
    MoveUp,
    MoveDown,
    DownloadAll,
    Retry,
    CancelDownload,
    NextPreset,
    PrevPreset,
    ChooseFolder,
    ToggleDarkMode,
    OpenFolder,
    ShowAbout,
    Dismiss,
    InputChar(char),
    InputBackspace,
    InputPaste(String),
    ClearInput,
}

#[derive(Debug, Clone)]
pub enum EntryUpdate {
    Metadata(Metadata),
    Status(EntryStatus),
    Progress(f64),
    Speed(String),
    Eta(String),
    Error(String),
    OutputPath(PathBuf),
}
