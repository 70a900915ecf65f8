//! The output file currently being written, tracked so a termination signal
//! or a fatal error can unlink a partial result before the process exits.

use std::path::PathBuf;
use std::sync::Mutex;

static OUTPUT: Mutex<Option<PathBuf>> = Mutex::new(None);

pub fn set(path: Option<PathBuf>) {
    if let Ok(mut current) = OUTPUT.lock() {
        *current = path;
    }
}

/// Remove the in-progress output file, if any.
pub fn remove_current() {
    if let Ok(mut current) = OUTPUT.lock() {
        if let Some(path) = current.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}
