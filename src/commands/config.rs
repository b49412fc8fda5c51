//! Configuration file editor command.
//!
//! Opens spectrec.toml in the user's preferred editor, writing the defaults
//! first when the file does not exist, and validates the result afterwards.

use std::process::Command;

use crate::config::{get_config_path, SpectrecConfig};

/// Opens the configuration file in the user's preferred editor.
///
/// Tries `$VISUAL`, then `$EDITOR`, then nano, then vi.
///
/// # Errors
/// - If the default config cannot be written
/// - If no editor can be found or executed
/// - If the edited file no longer parses
pub fn handle_config() -> anyhow::Result<()> {
    let config_path = get_config_path()?;
    if !config_path.exists() {
        SpectrecConfig::default().save_to(&config_path)?;
    }

    tracing::info!("Opening config file: {}", config_path.display());

    let editor = find_editor()?;
    tracing::debug!("Using editor: {}", editor);

    let status = Command::new(&editor)
        .arg(&config_path)
        .status()
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to open editor '{editor}': {e}. Make sure the editor is installed and accessible."
            )
        })?;

    if !status.success() {
        anyhow::bail!(
            "Editor exited with error code: {}",
            status.code().unwrap_or(-1)
        );
    }

    match SpectrecConfig::load_from(&config_path) {
        Ok(_) => tracing::info!("Config file edited successfully"),
        Err(e) => {
            tracing::warn!("Edited config is invalid: {e:#}");
            anyhow::bail!("The edited configuration is invalid: {e:#}");
        }
    }
    Ok(())
}

fn find_editor() -> anyhow::Result<String> {
    for var in ["VISUAL", "EDITOR"] {
        if let Ok(editor) = std::env::var(var) {
            if !editor.trim().is_empty() {
                return Ok(editor);
            }
        }
    }

    for editor in ["nano", "vi"] {
        if is_editor_available(editor) {
            return Ok(editor.to_string());
        }
    }

    Err(anyhow::anyhow!(
        "No editor found. Please set the $EDITOR environment variable."
    ))
}

fn is_editor_available(editor: &str) -> bool {
    Command::new("which")
        .arg(editor)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}
