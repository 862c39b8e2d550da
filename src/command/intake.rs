// src/command/intake.rs

use std::path::Path;

use tracing::{debug, info, warn};

use crate::command::Command;
use crate::fs::{file_name, FileSystem};

/// Take the first command file of `commands_dir` (by file name).
///
/// The file is deleted whether or not it held a valid command. Malformed
/// commands are logged and yield `None`.
pub fn next_command(fs: &dyn FileSystem, commands_dir: &Path) -> Option<Command> {
    let entries = match fs.read_dir(commands_dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %commands_dir.display(), error = %err, "failed to list commands directory");
            return None;
        }
    };

    let path = entries.into_iter().find(|path| {
        file_name(path).is_some_and(|name| !name.starts_with('.')) && fs.is_file(path)
    })?;

    let text = fs.read_to_string(&path);

    match fs.remove_file(&path) {
        Ok(()) => debug!(file = %path.display(), "command file removed"),
        Err(err) => warn!(file = %path.display(), error = %err, "failed to delete command file"),
    }

    let text = match text {
        Ok(text) => text,
        Err(err) => {
            warn!(file = %path.display(), error = %err, "failed to read command file; dropped");
            return None;
        }
    };

    match Command::parse(&text) {
        Ok(command) => {
            info!(file = %path.display(), %command, "command received");
            Some(command)
        }
        Err(err) => {
            warn!(file = %path.display(), error = %err, "malformed command; dropped");
            None
        }
    }
}
