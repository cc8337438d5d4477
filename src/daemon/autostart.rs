//! Start the daemon at login
//!
//! The default integration writes an XDG autostart desktop entry under
//! `$XDG_CONFIG_HOME/autostart`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::constants::{AUTOSTART_ENTRY_NAME, DAEMON_RUN_SUBCOMMAND};

/// OS login-start integration
pub trait Autostart: Send + Sync {
    fn is_enabled(&self) -> Result<bool>;
    fn enable(&self) -> Result<()>;
    fn disable(&self) -> Result<()>;
}

/// Desktop entry contents
#[derive(Debug, Clone)]
pub struct DesktopEntry {
    pub name: String,
    pub comment: String,
    /// Executable and arguments
    pub exec: Vec<String>,
    pub terminal: bool,
}

impl DesktopEntry {
    pub fn new(daemon_path: &Path) -> Self {
        Self {
            name: "Ficha".to_string(),
            comment: "Application shield daemon".to_string(),
            exec: vec![
                daemon_path.to_string_lossy().to_string(),
                DAEMON_RUN_SUBCOMMAND.to_string(),
            ],
            terminal: false,
        }
    }

    /// Render as a freedesktop.org desktop entry
    pub fn generate(&self) -> String {
        let exec = self
            .exec
            .iter()
            .map(|arg| quote_exec_arg(arg))
            .collect::<Vec<_>>()
            .join(" ");

        let mut entry = String::new();
        entry.push_str("[Desktop Entry]\n");
        entry.push_str("Type=Application\n");
        entry.push_str(&format!("Name={}\n", self.name));
        entry.push_str(&format!("Comment={}\n", self.comment));
        entry.push_str(&format!("Exec={}\n", exec));
        entry.push_str(&format!("Terminal={}\n", self.terminal));
        entry.push_str("Categories=Security;System;\n");
        entry.push_str("X-GNOME-Autostart-enabled=true\n");
        entry
    }
}

/// Quote an Exec argument if it contains reserved characters
fn quote_exec_arg(arg: &str) -> String {
    const RESERVED: &[char] = &[' ', '\t', '"', '\'', '\\', '>', '<', '~', '|', '&', ';', '$', '*', '?', '#', '(', ')', '`'];
    if !arg.contains(RESERVED) {
        return arg.to_string();
    }
    let escaped = arg
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('`', "\\`")
        .replace('$', "\\$");
    format!("\"{}\"", escaped)
}

#[derive(Debug, Clone)]
pub struct XdgAutostart {
    entry_path: PathBuf,
    daemon_path: PathBuf,
}

impl XdgAutostart {
    /// Entry for the running executable in the user's config directory
    pub fn for_current_user() -> Result<Self> {
        let config_dir = dirs::config_dir().context("Could not determine the user config directory")?;
        let daemon_path = std::env::current_exe().context("Failed to resolve the daemon executable path")?;
        Ok(Self::new(&config_dir.join("autostart"), &daemon_path))
    }

    pub fn new(autostart_dir: &Path, daemon_path: &Path) -> Self {
        Self {
            entry_path: autostart_dir.join(AUTOSTART_ENTRY_NAME),
            daemon_path: daemon_path.to_path_buf(),
        }
    }

    pub fn entry_path(&self) -> &Path {
        &self.entry_path
    }
}

impl Autostart for XdgAutostart {
    fn is_enabled(&self) -> Result<bool> {
        Ok(self.entry_path.exists())
    }

    fn enable(&self) -> Result<()> {
        if let Some(dir) = self.entry_path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create autostart directory: {}", dir.display()))?;
        }
        let content = DesktopEntry::new(&self.daemon_path).generate();
        std::fs::write(&self.entry_path, content)
            .with_context(|| format!("Failed to write autostart entry: {}", self.entry_path.display()))?;
        log::info!("Autostart enabled: {}", self.entry_path.display());
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        if self.entry_path.exists() {
            std::fs::remove_file(&self.entry_path)
                .with_context(|| format!("Failed to remove autostart entry: {}", self.entry_path.display()))?;
            log::info!("Autostart disabled");
        }
        Ok(())
    }
}
