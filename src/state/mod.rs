use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::{ForgeError, Result};
use crate::model::Plan;

/// State carried between invocations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub current_key_index: usize,
    #[serde(default)]
    pub last_plan: Option<Plan>,
    pub updated_at: DateTime<Utc>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            current_key_index: 0,
            last_plan: None,
            updated_at: Utc::now(),
        }
    }
}

/// State manager for loading and saving state
pub struct Manager {
    path: PathBuf,
    state: Mutex<State>,
}

impl Manager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(State::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load state from file. A missing file leaves the defaults in place.
    pub fn load(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }

        let content = fs::read_to_string(&self.path)?;
        let loaded: State = serde_json::from_str(&content)
            .map_err(|e| ForgeError::State(format!("Failed to parse state file: {}", e)))?;

        *self.lock() = loaded;
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let content = {
            let mut state = self.lock();
            state.updated_at = Utc::now();
            serde_json::to_string_pretty(&*state)
                .map_err(|e| ForgeError::State(format!("Failed to serialize state: {}", e)))?
        };

        write_atomic(&self.path, content.as_bytes())
    }

    pub fn current_key_index(&self) -> usize {
        self.lock().current_key_index
    }

    pub fn set_current_key_index(&self, index: usize) -> Result<()> {
        {
            let mut state = self.lock();
            if state.current_key_index == index {
                return Ok(());
            }
            state.current_key_index = index;
        }
        self.save()
    }

    pub fn last_plan(&self) -> Option<Plan> {
        self.lock().last_plan.clone()
    }

    pub fn set_last_plan(&self, plan: Plan) -> Result<()> {
        self.lock().last_plan = Some(plan);
        self.save()
    }
}

/// Write `content` to `path` through a 0600 temp file and a rename
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .set_mode(0o600)
        .open(&temp_path)?;

    file.write_all(content)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;
    Ok(())
}

// Helper trait for setting file mode
trait FileMode {
    fn set_mode(&mut self, mode: u32) -> &mut Self;
}

impl FileMode for OpenOptions {
    #[cfg(unix)]
    fn set_mode(&mut self, mode: u32) -> &mut Self {
        use std::os::unix::fs::OpenOptionsExt;
        OpenOptionsExt::mode(self, mode)
    }

    #[cfg(not(unix))]
    fn set_mode(&mut self, _mode: u32) -> &mut Self {
        self
    }
}
