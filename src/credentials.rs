use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::info;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::PathBuf;

/// Last successful sign in, used to prefill the log in form
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Credentials {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(email: &str, password: Option<&str>) -> Self {
        Credentials {
            email: email.to_string(),
            password: password.map(|p| BASE64.encode(p)),
        }
    }

    pub fn get_password(&self) -> Option<String> {
        let encoded = self.password.as_ref()?;
        let bytes = BASE64.decode(encoded).ok()?;
        String::from_utf8(bytes).ok()
    }
}

static CONFIG_DIR_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

pub fn set_config_dir_override(dir: PathBuf) {
    let _ = CONFIG_DIR_OVERRIDE.set(dir);
}

/// Directory holding accounts, messages, credentials and the log file
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = match CONFIG_DIR_OVERRIDE.get() {
        Some(dir) => dir.clone(),
        None => dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?
            .join("flashchat"),
    };

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

fn get_credentials_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("credentials.json"))
}

pub fn save_credentials(credentials: &Credentials) -> Result<()> {
    let file = File::create(get_credentials_path()?)?;
    serde_json::to_writer_pretty(file, credentials)?;

    info!("Credentials saved for {}", credentials.email);
    Ok(())
}

pub fn load_credentials() -> Result<Option<Credentials>> {
    let path = get_credentials_path()?;
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(&path)?;
    let credentials: Credentials = serde_json::from_str(&contents)?;
    info!("Loaded credentials for {} from {}", credentials.email, path.display());

    Ok(Some(credentials))
}
