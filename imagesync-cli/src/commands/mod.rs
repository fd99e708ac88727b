pub mod config;
pub mod daemon;
pub mod sync;
pub mod task;

use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Password from `--password` or, with `--password-stdin`, the whole of stdin
/// minus its trailing newline.
pub(crate) fn read_password(inline: Option<String>, from_stdin: bool) -> Result<Option<String>> {
    if !from_stdin {
        return Ok(inline);
    }
    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .context("failed to read password from stdin")?;
    let password = buffer.trim_end_matches(|c: char| c == '\r' || c == '\n').to_string();
    if password.is_empty() {
        bail!("--password-stdin given but stdin was empty");
    }
    Ok(Some(password))
}
