use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use yd_api::Workspace;
use yd_core::YaadeError;

use crate::{json_text, map_cli_input_invalid, map_cli_input_read, map_cli_state_write};

/// Inline JSON, or the contents of the file named after a leading `@`.
pub(crate) fn read_json_arg(arg: &str) -> Result<String, YaadeError> {
    match arg.strip_prefix('@') {
        Some(path) => read_file(Path::new(path)),
        None => Ok(arg.to_string()),
    }
}

pub(crate) fn parse_json_arg<T: DeserializeOwned>(arg: &str) -> Result<T, YaadeError> {
    let raw = read_json_arg(arg)?;
    serde_json::from_str(&raw).map_err(map_cli_input_invalid)
}

fn read_file(path: &Path) -> Result<String, YaadeError> {
    if !path.exists() {
        return Err(YaadeError::new(
            "CLI_INPUT_NOT_FOUND",
            format!("Input file does not exist: {}", path.display()),
        ));
    }
    fs::read_to_string(path).map_err(map_cli_input_read)
}

pub(crate) fn load_workspace(path: &str) -> Result<Workspace, YaadeError> {
    let raw = read_file(Path::new(path.strip_prefix('@').unwrap_or(path)))?;
    Workspace::from_json(&raw)
}

pub(crate) fn save_workspace(path: &Path, workspace: &Workspace) -> Result<(), YaadeError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(map_cli_state_write)?;
    let payload = json_text(&workspace.to_file())?;
    fs::write(path, payload).map_err(map_cli_state_write)
}
