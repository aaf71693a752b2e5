use crate::backend::{DownloadRequest, MediaBackend};
use crate::config::ConfigStore;
use crate::metadata::MetadataFetcher;
use crate::models::{
    AppEvent, AppState, Config, EntryUpdate, InputMode, LinkEntry, Notice, Preset,
};
use crate::queue::DownloadQueue;
use crate::ui;
use arboard::Clipboard;
use color_eyre::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::DefaultTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What the key reader needs to know to interpret a key press.
#[derive(Debug, Clone, Copy)]
struct KeyContext {
    input_empty: bool,
    has_entries: bool,
    modal: bool,
    editing_folder: bool,
}

impl KeyContext {
    fn of(state: &AppState) -> Self {
        Self {
            input_empty: state.input_buffer.is_empty(),
            has_entries: state.has_entries(),
            modal: state.is_modal(),
            editing_folder: matches!(state.mode, InputMode::Folder(_)),
        }
    }
}

pub struct App {
    state: Arc<Mutex<AppState>>,
    store: ConfigStore,
    fetcher: MetadataFetcher,
    queue: DownloadQueue,
    event_tx: mpsc::UnboundedSender<AppEvent>,
    event_rx: mpsc::UnboundedReceiver<AppEvent>,
    update_rx: mpsc::UnboundedReceiver<(Uuid, EntryUpdate)>,
    event_task: Option<tokio::task::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl App {
    pub fn new(config: Config, store: ConfigStore, backend: Arc<dyn MediaBackend>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        let queue = DownloadQueue::new(config.download_slots(), backend.clone(), update_tx.clone());
        let fetcher = MetadataFetcher::new(backend, update_tx);
        let state = Arc::new(Mutex::new(AppState::new(config)));

        Self {
            state,
            store,
            fetcher,
            queue,
            event_tx,
            event_rx,
            update_rx,
            event_task: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn notify(&self, notice: Notice) {
        self.state.lock().await.notify(notice);
    }

    pub async fn run(&mut self, terminal: &mut DefaultTerminal) -> Result<()> {
        self.run_with(|state| terminal.draw(|frame| ui::render(frame, state)).map(drop))
            .await
    }

    /// Drives the loop with `draw` as the render step. The key reader is
    /// stopped and joined however the loop ends.
    async fn run_with<D>(&mut self, draw: D) -> Result<()>
    where
        D: FnMut(&AppState) -> std::io::Result<()>,
    {
        self.spawn_key_reader();
        let result = self.event_loop(draw).await;

        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(task) = self.event_task.take() {
            let _ = task.await;
        }
        self.shutdown_work().await;
        result
    }

    fn spawn_key_reader(&mut self) {
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let shutdown = self.shutdown.clone();

        // crossterm polling blocks, so the reader lives on the blocking pool
        let event_task = tokio::task::spawn_blocking(move || {
            let mut clipboard = Clipboard::new().ok();

            while !shutdown.load(Ordering::Relaxed) {
                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(_) => {
                        std::thread::sleep(Duration::from_millis(100));
                        continue;
                    }
                }
                let Ok(Event::Key(key)) = event::read() else {
                    continue;
                };
                if key.kind != KeyEventKind::Press {
                    continue;
                }

                let ctx = KeyContext::of(&state.blocking_lock());
                if let Some(evt) = Self::map_key_event(key, ctx, &mut clipboard) {
                    if event_tx.send(evt).is_err() {
                        break;
                    }
                }
            }
        });
        self.event_task = Some(event_task);
    }

    async fn event_loop<D>(&mut self, mut draw: D) -> Result<()>
    where
        D: FnMut(&AppState) -> std::io::Result<()>,
    {
        loop {
            self.drain_updates().await;

            while let Ok(event) = self.event_rx.try_recv() {
                if !self.handle_event(event).await? {
                    return Ok(());
                }
            }

            let state = self.state.lock().await;
            draw(&*state)?;
            drop(state);

            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    fn map_key_event(
        key: KeyEvent,
        ctx: KeyContext,
        clipboard: &mut Option<Clipboard>,
    ) -> Option<AppEvent> {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

        if ctx.modal {
            return match key.code {
                KeyCode::Enter | KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char(' ') => {
                    Some(AppEvent::Dismiss)
                }
                _ => None,
            };
        }

        if ctrl {
            return match key.code {
                KeyCode::Char('c') => Some(AppEvent::Quit),
                KeyCode::Char('v') => clipboard
                    .as_mut()
                    .and_then(|c| c.get_text().ok())
                    .map(AppEvent::InputPaste),
                KeyCode::Char('s') => Some(AppEvent::DownloadAll),
                _ => None,
            };
        }

        if ctx.editing_folder {
            return match key.code {
                KeyCode::Enter => Some(AppEvent::Submit),
                KeyCode::Esc => Some(AppEvent::ClearInput),
                KeyCode::Backspace => Some(AppEvent::InputBackspace),
                KeyCode::Char(c) => Some(AppEvent::InputChar(c)),
                _ => None,
            };
        }

        // letters act as commands only while nothing has been typed
        let command = ctx.input_empty;
        let listed = command && ctx.has_entries;
        match key.code {
            KeyCode::Char('q') if command => Some(AppEvent::Quit),
            KeyCode::Char('s') if command => Some(AppEvent::DownloadAll),
            KeyCode::Char('p') if command => Some(AppEvent::NextPreset),
            KeyCode::Char('P') if command => Some(AppEvent::PrevPreset),
            KeyCode::Char('f') if command => Some(AppEvent::ChooseFolder),
            KeyCode::Char('t') if command => Some(AppEvent::ToggleDarkMode),
            KeyCode::Char('o') if command => Some(AppEvent::OpenFolder),
            KeyCode::Char('?') if command => Some(AppEvent::ShowAbout),
            KeyCode::Char('d') if listed => Some(AppEvent::DeleteSelected),
            KeyCode::Char('r') if listed => Some(AppEvent::Retry),
            KeyCode::Char('x') if listed => Some(AppEvent::CancelDownload),
            KeyCode::Char(' ') if listed => Some(AppEvent::ToggleMark),
            KeyCode::Delete if listed => Some(AppEvent::DeleteSelected),
            KeyCode::Up if listed => Some(AppEvent::MoveUp),
            KeyCode::Down if listed => Some(AppEvent::MoveDown),
            KeyCode::Left => Some(AppEvent::PrevPreset),
            KeyCode::Right => Some(AppEvent::NextPreset),
            KeyCode::Enter => Some(AppEvent::Submit),
            KeyCode::Esc => Some(AppEvent::ClearInput),
            KeyCode::Backspace => Some(AppEvent::InputBackspace),
            KeyCode::Char(c) => Some(AppEvent::InputChar(c)),
            _ => None,
        }
    }

    /// Applies one event. Returns `false` when the app should exit.
    async fn handle_event(&mut self, event: AppEvent) -> Result<bool> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        match event {
            AppEvent::Quit => return Ok(false),
            AppEvent::Dismiss => {
                if state.show_about {
                    state.show_about = false;
                } else {
                    state.notices.pop_front();
                }
            }
            AppEvent::ShowAbout => state.show_about = true,
            AppEvent::InputChar(c) => match &mut state.mode {
                InputMode::Folder(buffer) => buffer.push(c),
                InputMode::Url => state.input_buffer.push(c),
            },
            AppEvent::InputBackspace => match &mut state.mode {
                InputMode::Folder(buffer) => {
                    buffer.pop();
                }
                InputMode::Url => {
                    state.input_buffer.pop();
                }
            },
            AppEvent::InputPaste(text) => {
                let clean = text.trim().replace(['\n', '\r'], "");
                match &mut state.mode {
                    InputMode::Folder(buffer) => buffer.push_str(&clean),
                    InputMode::Url => state.input_buffer.push_str(&clean),
                }
            }
            AppEvent::ClearInput => {
                if matches!(state.mode, InputMode::Folder(_)) {
                    state.mode = InputMode::Url;
                } else {
                    state.input_buffer.clear();
                }
            }
            AppEvent::Submit => match state.mode.clone() {
                InputMode::Url => self.add_link(state),
                InputMode::Folder(raw) => self.confirm_folder(state, &raw),
            },
            AppEvent::DeleteSelected => self.remove_selected(state),
            AppEvent::ToggleMark => {
                let idx = state.selected_index;
                if let Some(entry) = state.entries.get_mut(idx) {
                    entry.marked = !entry.marked;
                }
            }
            AppEvent::MoveUp => {
                state.selected_index = state.selected_index.saturating_sub(1);
            }
            AppEvent::MoveDown => {
                if state.selected_index < state.entries.len().saturating_sub(1) {
                    state.selected_index += 1;
                }
            }
            AppEvent::DownloadAll => self.download_all(state),
            AppEvent::Retry => self.retry_selected(state),
            AppEvent::CancelDownload => {
                let idx = state.selected_index;
                if let Some(entry) = state.entries.get_mut(idx) {
                    if entry.cancel_download() {
                        info!(url = %entry.url, "cancelling download");
                    }
                }
            }
            AppEvent::NextPreset => {
                state.config.format_preset = state.config.format_preset.next();
                self.persist(state);
            }
            AppEvent::PrevPreset => {
                state.config.format_preset = state.config.format_preset.prev();
                self.persist(state);
            }
            AppEvent::ChooseFolder => {
                let current = state.config.last_folder.display().to_string();
                state.mode = InputMode::Folder(current);
            }
            AppEvent::ToggleDarkMode => {
                state.config.dark_mode = !state.config.dark_mode;
                self.persist(state);
            }
            AppEvent::OpenFolder => self.open_folder(state),
        }

        Ok(true)
    }

    fn add_link(&self, state: &mut AppState) {
        let url = state.input_buffer.trim().to_string();
        if url.is_empty() {
            state.notify(Notice::warning("Empty", "Please enter a valid link"));
            return;
        }

        let entry = LinkEntry::new(url.clone());
        self.fetcher
            .fetch_async(entry.id, url.clone(), entry.cancel.clone());
        debug!(id = %entry.id, %url, "link added");
        state.entries.push(entry);
        state.selected_index = state.entries.len() - 1;
        state.input_buffer.clear();
    }

    fn remove_selected(&self, state: &mut AppState) {
        for entry in state.take_selected() {
            entry.cancel.cancel();
            debug!(id = %entry.id, url = %entry.url, "link removed");
        }
    }

    fn download_all(&self, state: &mut AppState) {
        if state.entries.is_empty() {
            state.notify(Notice::info("No Links", "Add links before downloading."));
            return;
        }

        let preset = state.config.format_preset;
        let folder = state.config.last_folder.clone();
        let mut started = 0;
        for entry in state.entries.iter_mut() {
            if !entry.status.can_dispatch() {
                continue;
            }
            self.dispatch(entry, preset, folder.clone());
            started += 1;
        }

        if started == 0 {
            state.notify(Notice::info(
                "Nothing to do",
                "Every link is already downloading.",
            ));
        }
        info!(
            count = started,
            free_slots = self.queue.available_slots(),
            preset = %preset,
            folder = %folder.display(),
            "started downloads"
        );
    }

    fn retry_selected(&self, state: &mut AppState) {
        let preset = state.config.format_preset;
        let folder = state.config.last_folder.clone();
        let idx = state.selected_index;
        if let Some(entry) = state.entries.get_mut(idx) {
            if entry.status.can_dispatch() {
                self.dispatch(entry, preset, folder);
            }
        }
    }

    fn dispatch(&self, entry: &mut LinkEntry, preset: Preset, folder: PathBuf) {
        let token = entry.prepare_dispatch();
        let request = DownloadRequest {
            url: entry.url.clone(),
            preset,
            folder,
        };
        self.queue.start(entry.id, request, token);
    }

    fn confirm_folder(&self, state: &mut AppState, raw: &str) {
        let Some(folder) = expand_folder(raw) else {
            state.notify(Notice::warning("Folder", "Please enter a folder path"));
            return;
        };

        if let Err(e) = std::fs::create_dir_all(&folder) {
            warn!(folder = %folder.display(), error = %e, "folder not usable");
            state.notify(Notice::warning(
                "Folder",
                format!("Cannot use {}: {e}", folder.display()),
            ));
            return;
        }

        info!(folder = %folder.display(), "download folder changed");
        state.config.last_folder = folder;
        state.mode = InputMode::Url;
        self.persist(state);
    }

    fn open_folder(&self, state: &mut AppState) {
        let folder = state.config.last_folder.clone();
        if !folder.is_dir() {
            state.notify(Notice::warning(
                "Folder",
                format!("{} does not exist yet", folder.display()),
            ));
            return;
        }

        let opener = if cfg!(windows) {
            "explorer"
        } else if cfg!(target_os = "macos") {
            "open"
        } else {
            "xdg-open"
        };
        if let Err(e) = tokio::process::Command::new(opener)
            .arg(&folder)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
        {
            warn!(error = %e, opener, "could not open folder");
            state.notify(Notice::warning("Folder", format!("Could not run {opener}: {e}")));
        }
    }

    fn persist(&self, state: &mut AppState) {
        if let Err(e) = self.store.save(&state.config) {
            warn!(error = %e, "settings not saved");
            state.notify(Notice::warning("Settings", format!("Settings not saved: {e}")));
        }
    }

    pub async fn drain_updates(&mut self) {
        while let Ok((id, update)) = self.update_rx.try_recv() {
            self.apply_update(id, update).await;
        }
    }

    async fn apply_update(&mut self, id: Uuid, update: EntryUpdate) {
        let mut state = self.state.lock().await;

        let Some(entry) = state.get_entry_by_id_mut(id) else {
            debug!(%id, "update for removed entry ignored");
            return;
        };
        match update {
            EntryUpdate::Metadata(metadata) => entry.apply_metadata(metadata),
            EntryUpdate::Status(status) => {
                if !status.is_active() {
                    entry.download_cancel = None;
                    entry.speed = None;
                    entry.eta = None;
                }
                entry.status = status;
            }
            EntryUpdate::Progress(progress) => entry.progress = progress,
            EntryUpdate::Speed(speed) => entry.speed = Some(speed),
            EntryUpdate::Eta(eta) => entry.eta = Some(eta),
            EntryUpdate::Error(error) => entry.error = Some(error),
            EntryUpdate::OutputPath(path) => entry.output_path = Some(path),
        }
    }

    /// Stops every outstanding fetch and download before exit.
    async fn shutdown_work(&mut self) {
        let state = self.state.lock().await;
        for entry in &state.entries {
            entry.cancel.cancel();
        }
    }
}

/// Trims the prompt and expands a leading `~`.
fn expand_folder(raw: &str) -> Option<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw == "~" {
        return dirs::home_dir();
    }
    if let Some(rest) = raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\")) {
        return dirs::home_dir().map(|home| home.join(rest));
    }
    Some(PathBuf::from(raw))
}
