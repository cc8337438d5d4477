//! Stealth mode: disguise the engine's process name
//!
//! Only hides the name from casual listings (`ps`, `top`). It is not a
//! security boundary. Linux only; the kernel truncates names to 15 bytes.

use parking_lot::Mutex;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StealthError {
    #[error("Stealth mode is not supported on this platform")]
    Unsupported,
    #[error("Failed to rename process: {0}")]
    Io(#[from] std::io::Error),
}

/// Longest name the kernel keeps for a task
const TASK_COMM_LEN: usize = 15;

#[derive(Debug)]
struct StealthState {
    original_name: Option<String>,
    active: bool,
}

#[derive(Debug)]
pub struct Stealth {
    disguised_name: String,
    /// `None` when renaming is not possible here
    comm_path: Option<PathBuf>,
    state: Mutex<StealthState>,
}

fn truncate_name(name: &str) -> String {
    let mut end = name.len().min(TASK_COMM_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

impl Stealth {
    /// Stealth for the current process
    pub fn new(disguised_name: &str) -> Self {
        let comm_path = if cfg!(target_os = "linux") {
            Some(PathBuf::from("/proc/self/comm"))
        } else {
            None
        };
        Self::with_comm_path(disguised_name, comm_path)
    }

    /// Stealth that reports itself unsupported and never renames anything
    pub fn unsupported(disguised_name: &str) -> Self {
        Self::with_comm_path(disguised_name, None)
    }

    fn with_comm_path(disguised_name: &str, comm_path: Option<PathBuf>) -> Self {
        let original_name = comm_path
            .as_ref()
            .and_then(|path| std::fs::read_to_string(path).ok())
            .map(|name| name.trim_end().to_string());
        Self {
            disguised_name: truncate_name(disguised_name),
            comm_path,
            state: Mutex::new(StealthState {
                original_name,
                active: false,
            }),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.comm_path.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    pub fn disguised_name(&self) -> &str {
        &self.disguised_name
    }

    fn comm_path(&self) -> Result<&PathBuf, StealthError> {
        self.comm_path.as_ref().ok_or(StealthError::Unsupported)
    }

    fn current_name(&self) -> Result<String, StealthError> {
        let name = std::fs::read_to_string(self.comm_path()?)?;
        Ok(name.trim_end().to_string())
    }

    fn rename(&self, name: &str) -> Result<(), StealthError> {
        std::fs::write(self.comm_path()?, name.as_bytes())?;
        Ok(())
    }

    pub fn enable(&self) -> Result<(), StealthError> {
        let mut state = self.state.lock();
        if state.original_name.is_none() {
            state.original_name = Some(self.current_name()?);
        }
        self.rename(&self.disguised_name)?;
        state.active = true;
        log::info!("Stealth mode enabled, process name now {}", self.disguised_name);
        Ok(())
    }

    pub fn disable(&self) -> Result<(), StealthError> {
        let mut state = self.state.lock();
        if !state.active {
            return Ok(());
        }
        if let Some(original) = state.original_name.clone() {
            self.rename(&original)?;
        }
        state.active = false;
        log::info!("Stealth mode disabled, process name restored");
        Ok(())
    }

    /// Re-apply the disguise if something reset the name.
    /// Returns whether the name had to be re-applied.
    pub fn ensure_applied(&self) -> Result<bool, StealthError> {
        let state = self.state.lock();
        if !state.active || self.current_name()? == self.disguised_name {
            return Ok(false);
        }
        self.rename(&self.disguised_name)?;
        log::debug!("Process name was reset, re-applied {}", self.disguised_name);
        Ok(true)
    }
}
