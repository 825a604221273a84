use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::report::{read_output, render_text, DEFAULT_OUTPUT_FILE_NAME};

/// Показать output.json прошлого прогона (text или JSON).
pub fn cmd_inspect(path: PathBuf, json: bool) -> Result<()> {
    let file = if path.is_dir() {
        path.join(DEFAULT_OUTPUT_FILE_NAME)
    } else {
        path
    };
    let out = read_output(&file)?;
    if json {
        let s = serde_json::to_string_pretty(&out).context("serialize report")?;
        println!("{s}");
        return Ok(());
    }
    print!("{}", render_text(&out));
    Ok(())
}
