use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::debug;

use crate::audio::sync::SyncSignal;
use crate::error::QueueError;
use crate::models::{Song, SongId, Tag};

/// What the playback core needs from the playlist.
///
/// Called from the decode thread (`queued_song`, `advance`), the output
/// thread (`notify_position_changed`, `is_playing`) and the main thread.
pub trait SongQueue: Send + Sync {
    /// The song the decoder should decode next
    fn queued_song(&self) -> Option<Song>;

    /// Move the decode cursor past the current song
    fn advance(&self);

    /// The audible song changed. Must never block.
    fn notify_position_changed(&self);

    /// Whether running out of audio means "still catching up" rather than
    /// "end of playlist"
    fn is_playing(&self) -> bool;
}

#[derive(Debug, Default)]
struct QueueState {
    songs: Vec<Song>,
    /// Index of the song the decoder takes next
    decode_position: Option<usize>,
    /// Index of the audible song
    now_playing: Option<usize>,
    next_id: SongId,
}

/// In-memory ordered play queue
#[derive(Debug, Default)]
pub struct PlayQueue {
    state: Mutex<QueueState>,
    playing: AtomicBool,
    position_changes: AtomicU64,
    position_signal: SyncSignal<()>,
}

impl PlayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a file, returning its id
    pub fn add(&self, path: &Path, tag: Option<Tag>) -> Result<SongId, QueueError> {
        if !path.is_file() {
            return Err(QueueError::FileNotFound {
                path: path.to_string_lossy().to_string(),
            });
        }

        let mut state = self.state();
        state.next_id += 1;
        let mut song = Song::new(state.next_id, path.to_path_buf());
        song.tag = tag;
        let id = song.id;
        state.songs.push(song);
        if state.decode_position.is_none() {
            // The decoder ran out of songs: this one is next
            state.decode_position = Some(state.songs.len() - 1);
        }
        debug!("Queued {} as song {}", path.display(), id);
        Ok(id)
    }

    /// Recursively append every file under `dir` accepted by `accept`, in
    /// path order. Returns how many were added.
    pub fn add_directory<F>(&self, dir: &Path, accept: F) -> Result<usize, QueueError>
    where
        F: Fn(&Path) -> Option<Option<Tag>>,
    {
        if !dir.is_dir() {
            return Err(QueueError::FileNotFound {
                path: dir.to_string_lossy().to_string(),
            });
        }

        let mut files = Vec::new();
        collect_files(dir, &mut files);
        files.sort();

        let mut added = 0;
        for file in files {
            if let Some(tag) = accept(&file) {
                self.add(&file, tag)?;
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.songs.clear();
        state.decode_position = None;
        state.now_playing = None;
    }

    pub fn list(&self) -> Vec<Song> {
        self.state().songs.clone()
    }

    pub fn len(&self) -> usize {
        self.state().songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Song> {
        self.state().songs.get(index).cloned()
    }

    pub fn song_by_id(&self, id: SongId) -> Option<Song> {
        self.state().songs.iter().find(|song| song.id == id).cloned()
    }

    /// Point the decode cursor at `index`
    pub fn set_decode_position(&self, index: usize) -> Result<(), QueueError> {
        let mut state = self.state();
        if index >= state.songs.len() {
            return Err(QueueError::InvalidIndex { index });
        }
        state.decode_position = Some(index);
        Ok(())
    }

    pub fn decode_position(&self) -> Option<usize> {
        self.state().decode_position
    }

    /// Record `id` as the audible song, returning its index
    pub fn set_now_playing(&self, id: Option<SongId>) -> Option<usize> {
        let mut state = self.state();
        let index = id.and_then(|id| state.songs.iter().position(|song| song.id == id));
        state.now_playing = index;
        index
    }

    pub fn now_playing(&self) -> Option<(usize, Song)> {
        let state = self.state();
        let index = state.now_playing?;
        state.songs.get(index).map(|song| (index, song.clone()))
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }

    /// Number of position-change notifications so far
    pub fn position_changes(&self) -> u64 {
        self.position_changes.load(Ordering::Acquire)
    }

    /// Block until the counter moves past `seen` or `timeout` elapses.
    /// Returns the current counter.
    pub fn wait_position_change(&self, seen: u64, timeout: Duration) -> u64 {
        let deadline = Instant::now() + timeout;
        let mut guard = self.position_signal.enter();
        loop {
            let current = self.position_changes();
            let now = Instant::now();
            if current != seen || now >= deadline {
                return current;
            }
            // The notifier never blocks, so a wakeup may be lost; bound each wait.
            let wait = (deadline - now).min(Duration::from_millis(50));
            let (next, _) = self.position_signal.timed_wait(guard, wait);
            guard = next;
        }
    }
}

fn collect_files(dir: &Path, files: &mut Vec<std::path::PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, files);
        } else if path.is_file() {
            files.push(path);
        }
    }
}

impl SongQueue for PlayQueue {
    fn queued_song(&self) -> Option<Song> {
        let state = self.state();
        state
            .decode_position
            .and_then(|index| state.songs.get(index))
            .cloned()
    }

    fn advance(&self) {
        let mut state = self.state();
        let len = state.songs.len();
        state.decode_position = state
            .decode_position
            .map(|index| index + 1)
            .filter(|&index| index < len);
    }

    fn notify_position_changed(&self) {
        self.position_changes.fetch_add(1, Ordering::AcqRel);
        self.position_signal.try_signal();
    }

    /// Playback was requested and the decoder still has songs ahead
    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire) && self.state().decode_position.is_some()
    }
}
