//! Sideband settings of the set-top box.
//!
//! Two process-wide switches live in proc files: the user's AC3/DTS output
//! preference, which must say `downmix` for this element to run, and the
//! hardware clock sync source, which is forced to audio while a session is
//! active.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Read/write access to the platform switches.
pub trait PlatformSettings {
    /// Whether stereo downmix output is wanted.
    fn downmix_enabled(&self) -> bool;

    fn read_sync_mode(&self) -> io::Result<String>;

    fn write_sync_mode(&self, mode: &str) -> io::Result<()>;
}

/// Locations and values of the proc-file switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformConfig {
    pub downmix_path: PathBuf,
    pub sync_mode_path: PathBuf,
    /// Value written to the sync switch for the lifetime of a session.
    pub sync_mode: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            downmix_path: PathBuf::from("/proc/stb/audio/ac3"),
            sync_mode_path: PathBuf::from("/proc/stb/stc/0/sync"),
            sync_mode: "audio".to_owned(),
        }
    }
}

/// [`PlatformSettings`] backed by proc files.
#[derive(Debug, Clone)]
pub struct ProcFs {
    config: PlatformConfig,
}

impl ProcFs {
    pub fn new(config: PlatformConfig) -> Self {
        Self { config }
    }
}

impl PlatformSettings for ProcFs {
    fn downmix_enabled(&self) -> bool {
        match fs::read(&self.config.downmix_path) {
            Ok(value) => value.starts_with(b"downmix"),
            Err(e) => {
                debug!(
                    "Cannot read {}: {e}",
                    self.config.downmix_path.display()
                );
                false
            }
        }
    }

    fn read_sync_mode(&self) -> io::Result<String> {
        fs::read_to_string(&self.config.sync_mode_path)
    }

    fn write_sync_mode(&self, mode: &str) -> io::Result<()> {
        fs::write(&self.config.sync_mode_path, mode)
    }
}

/// Holds the hardware sync switch at a forced value.
///
/// The value found on acquisition is written back when the guard is
/// dropped, on every exit path.
pub struct SyncModeGuard<P: PlatformSettings> {
    platform: Arc<P>,
    previous: Option<String>,
}

impl<P: PlatformSettings> SyncModeGuard<P> {
    pub fn acquire(platform: Arc<P>, mode: &str) -> Self {
        let previous = match platform.read_sync_mode() {
            Ok(value) => Some(value.trim_end().to_owned()).filter(|v| !v.is_empty()),
            Err(e) => {
                debug!("Sync mode not readable, nothing to restore: {e}");
                None
            }
        };

        if let Err(e) = platform.write_sync_mode(mode) {
            warn!("Cannot set sync mode to {mode}: {e}");
        } else {
            debug!(
                "Sync mode set to {mode} (was {})",
                previous.as_deref().unwrap_or("unknown")
            );
        }

        Self { platform, previous }
    }

    pub fn previous(&self) -> Option<&str> {
        self.previous.as_deref()
    }
}

impl<P: PlatformSettings> Drop for SyncModeGuard<P> {
    fn drop(&mut self) {
        let Some(previous) = self.previous.take() else {
            return;
        };
        match self.platform.write_sync_mode(&previous) {
            Ok(()) => debug!("Sync mode restored to {previous}"),
            Err(e) => warn!("Cannot restore sync mode {previous}: {e}"),
        }
    }
}
