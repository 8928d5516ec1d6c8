//! Login/logout command handlers
//!
//! The access token lives in a file under the data directory, read by
//! `FileCredentials` before every remote call.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

use fieldsync_core::Config;

use crate::output::Output;

/// Store an access token
pub fn login(config: &Config, token: String, output: &Output) -> Result<()> {
    let token = token.trim();
    if token.is_empty() {
        bail!("Token must not be empty");
    }

    let path = config.token_path();
    write_token(&path, token)?;

    output.success(&format!("Token saved to {}", path.display()));
    Ok(())
}

/// Remove the stored access token
pub fn logout(config: &Config, output: &Output) -> Result<()> {
    let path = config.token_path();
    if !path.exists() {
        output.message("Not signed in.");
        return Ok(());
    }

    fs::remove_file(&path).with_context(|| format!("Failed to remove {}", path.display()))?;
    output.success("Signed out");
    Ok(())
}

fn write_token(path: &Path, token: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    fs::write(path, format!("{}\n", token))
        .with_context(|| format!("Failed to write {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict permissions on {}", path.display()))?;
    }

    Ok(())
}
