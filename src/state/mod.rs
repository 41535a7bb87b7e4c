//! Session recovery file.
//!
//! The whole [`AppData`] is written to `<state_dir>/session_state.json`.
//! Writes go to a sibling temp file first and are then renamed over the
//! recovery file, so a crash mid-write leaves the previous file intact.

mod schema;

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::error::LabelkitError;
use crate::model::AppData;
use schema::StateFile;

pub use schema::{from_state_slice, to_state_string, STATE_VERSION};

pub const STATE_FILE_NAME: &str = "session_state.json";
const TEMP_FILE_NAME: &str = "session_state.json.tmp";

/// Minimum time between automatic saves.
pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(30);

/// Saves and restores the recovery file.
#[derive(Debug)]
pub struct StateManager {
    state_dir: PathBuf,
    interval: Duration,
    dirty: bool,
    last_save: Instant,
}

impl StateManager {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            interval: DEFAULT_AUTOSAVE_INTERVAL,
            dirty: false,
            last_save: Instant::now(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE_NAME)
    }

    fn temp_path(&self) -> PathBuf {
        self.state_dir.join(TEMP_FILE_NAME)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Records that `AppData` changed since the last save.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Writes `app` to the recovery file and clears the dirty flag.
    pub fn save_state(&mut self, app: &AppData) -> Result<(), LabelkitError> {
        fs::create_dir_all(&self.state_dir).map_err(LabelkitError::Io)?;

        let state_path = self.state_path();
        let temp_path = self.temp_path();
        let state = StateFile::from_app(app);

        let file = File::create(&temp_path).map_err(LabelkitError::Io)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &state).map_err(|source| {
            LabelkitError::StateWrite {
                path: temp_path.clone(),
                source,
            }
        })?;
        writer.flush().map_err(LabelkitError::Io)?;
        writer
            .get_ref()
            .sync_all()
            .map_err(LabelkitError::Io)?;
        drop(writer);

        fs::rename(&temp_path, &state_path).map_err(LabelkitError::Io)?;

        self.dirty = false;
        self.last_save = Instant::now();
        debug!(
            "saved session state ({} images) to {}",
            app.images.len(),
            state_path.display()
        );
        Ok(())
    }

    /// Saves if the data is dirty and the interval has elapsed since the
    /// last save. Returns whether a save happened.
    pub fn auto_save_if_needed(&mut self, app: &AppData) -> Result<bool, LabelkitError> {
        if !self.dirty || self.last_save.elapsed() < self.interval {
            return Ok(false);
        }
        self.save_state(app)?;
        Ok(true)
    }

    /// Reads the recovery file, or `None` if there is none.
    ///
    /// The result still holds synthetic and stale entries; purge them with
    /// [`crate::handler::DataHandler::purge_session_entries`].
    pub fn load_state(&self) -> Result<Option<AppData>, LabelkitError> {
        let path = self.state_path();
        if !path.is_file() {
            debug!("no session state at {}", path.display());
            return Ok(None);
        }

        let bytes = fs::read(&path).map_err(LabelkitError::Io)?;
        let state: StateFile =
            serde_json::from_slice(&bytes).map_err(|source| LabelkitError::StateParse {
                path: path.clone(),
                source,
            })?;
        if state.version != STATE_VERSION {
            return Err(LabelkitError::StateVersion {
                path,
                found: state.version,
                expected: STATE_VERSION,
            });
        }

        let app = state.into_app();
        info!(
            "loaded session state: {} images, {} classes",
            app.images.len(),
            app.classes.len()
        );
        Ok(Some(app))
    }

    /// Deletes the recovery file and any leftover temp file.
    pub fn clear_state(&mut self) -> Result<(), LabelkitError> {
        for path in [self.state_path(), self.temp_path()] {
            match fs::remove_file(&path) {
                Ok(()) => debug!("removed {}", path.display()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(LabelkitError::Io(err)),
            }
        }
        self.dirty = false;
        info!("session state cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BoundingBox, ImageAnnotation, NormBox};

    fn sample_app() -> AppData {
        let mut app = AppData::new();
        app.classes = vec!["cat".to_string()];
        let mut image = ImageAnnotation::new("a.jpg");
        image
            .boxes
            .push(BoundingBox::new(0, NormBox::new(0.5, 0.5, 0.2, 0.2)));
        app.images.insert("a.jpg".to_string(), image);
        app
    }

    #[test]
    fn load_without_file_is_none() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let manager = StateManager::new(temp.path());
        assert!(manager.load_state().expect("load").is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let mut manager = StateManager::new(temp.path().join("nested"));
        let app = sample_app();

        manager.save_state(&app).expect("save");
        assert!(manager.state_path().is_file());
        assert!(!temp.path().join("nested").join(TEMP_FILE_NAME).exists());

        let loaded = manager.load_state().expect("load").expect("state present");
        assert_eq!(loaded, app);
    }

    #[test]
    fn auto_save_needs_dirty_flag_and_elapsed_interval() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let app = sample_app();

        let mut slow = StateManager::new(temp.path().join("slow"));
        slow.mark_dirty();
        assert!(!slow.auto_save_if_needed(&app).expect("auto save"));

        let mut fast = StateManager::new(temp.path().join("fast")).with_interval(Duration::ZERO);
        assert!(!fast.auto_save_if_needed(&app).expect("auto save"));
        fast.mark_dirty();
        assert!(fast.auto_save_if_needed(&app).expect("auto save"));
        assert!(!fast.is_dirty());
        assert!(fast.state_path().is_file());
    }

    #[test]
    fn corrupt_file_is_a_parse_error() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let manager = StateManager::new(temp.path());
        fs::write(manager.state_path(), "{ not json").expect("write corrupt file");
        assert!(matches!(
            manager.load_state(),
            Err(LabelkitError::StateParse { .. })
        ));
    }

    #[test]
    fn newer_version_is_rejected() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let manager = StateManager::new(temp.path());
        fs::write(manager.state_path(), r#"{"version": 99}"#).expect("write state");
        assert!(matches!(
            manager.load_state(),
            Err(LabelkitError::StateVersion { found: 99, .. })
        ));
    }

    #[test]
    fn clear_removes_files() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let mut manager = StateManager::new(temp.path());
        manager.save_state(&sample_app()).expect("save");
        fs::write(manager.temp_path(), "partial").expect("write temp");

        manager.clear_state().expect("clear");
        assert!(!manager.state_path().exists());
        assert!(!manager.temp_path().exists());
        manager.clear_state().expect("clearing twice is fine");
    }
}
