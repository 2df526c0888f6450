use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub const REMOTE_URL_ENV: &str = "FITLEDGER_REMOTE_URL";
pub const API_KEY_ENV: &str = "FITLEDGER_API_KEY";

pub struct Config {
    pub store_path: PathBuf,
    /// Backing file for `fitledger serve`.
    pub server_store_path: PathBuf,
    pub data_dir: PathBuf,
    /// Base URL of the remote document store. `None` means offline.
    pub remote_url: Option<String>,
    pub remote_api_key: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "fitledger").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let store_path = data_dir.join("fitledger.db");
        let server_store_path = data_dir.join("documents.db");

        Ok(Config {
            store_path,
            server_store_path,
            data_dir,
            remote_url: env_non_empty(REMOTE_URL_ENV),
            remote_api_key: env_non_empty(API_KEY_ENV),
        })
    }

    fn identity_path(&self) -> PathBuf {
        self.data_dir.join("identity")
    }

    /// The signed-in user, if any.
    pub fn user_id(&self) -> Result<Option<String>> {
        read_identity(&self.identity_path())
    }

    pub fn set_user_id(&self, user_id: &str) -> Result<()> {
        let user_id = user_id.trim();
        if user_id.is_empty() || user_id.contains(char::is_whitespace) || user_id.contains('/') {
            bail!("Invalid user id '{user_id}'");
        }
        std::fs::write(self.identity_path(), user_id).context("Failed to write identity file")
    }

    /// Returns whether a user was signed in.
    pub fn clear_user_id(&self) -> Result<bool> {
        let path = self.identity_path();
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path).context("Failed to remove identity file")?;
        Ok(true)
    }

    /// Load the API key from disk, or generate a new one.
    ///
    /// Returns `(key, newly_created)` where `newly_created` is true when a
    /// fresh key was just generated (first run).
    pub fn load_or_create_api_key(&self) -> Result<(String, bool)> {
        use rand::Rng;
        use std::fmt::Write;

        let path = self.data_dir.join("api_key");

        if path.exists() {
            let key = std::fs::read_to_string(&path).context("Failed to read API key file")?;
            let key = key.trim().to_string();
            if !key.is_empty() {
                return Ok((key, false));
            }
        }

        let bytes: [u8; 32] = rand::rng().random();
        let key = bytes
            .iter()
            .fold(String::with_capacity(64), |mut acc: String, b| {
                let _ = write!(acc, "{b:02x}");
                acc
            });
        std::fs::write(&path, &key).context("Failed to write API key file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set API key file permissions")?;
        }
        eprintln!("Generated new API key: {key}");
        eprintln!("Point clients at it with {API_KEY_ENV}={key}");
        Ok((key, true))
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn read_identity(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path).context("Failed to read identity file")?;
    let id = raw.trim();
    Ok((!id.is_empty()).then(|| id.to_string()))
}
