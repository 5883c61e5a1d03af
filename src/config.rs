use crate::errors::{AppError, AppResult};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub firebase_project_id: String,
    pub identity_jwks_url: String,
    pub identity_public_key_path: Option<PathBuf>,
    pub key_refresh_secs: u64,
    pub data_dir: PathBuf,
    pub server_port: u16,
}

impl AppConfig {
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();

        let key_refresh_secs = env_var_or("KEY_REFRESH_SECS", "3600")
            .parse::<u64>()
            .map_err(|e| AppError::Config(format!("KEY_REFRESH_SECS: {e}")))?;

        let server_port = env_var_or("SERVER_PORT", "3001")
            .parse::<u16>()
            .map_err(|e| AppError::Config(format!("SERVER_PORT: {e}")))?;

        Ok(Self {
            firebase_project_id: env_var("FIREBASE_PROJECT_ID")?,
            identity_jwks_url: env_var_or(
                "IDENTITY_JWKS_URL",
                "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com",
            ),
            identity_public_key_path: std::env::var("IDENTITY_PUBLIC_KEY_PATH")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            key_refresh_secs,
            data_dir: PathBuf::from(env_var_or("DATA_DIR", "data")),
            server_port,
        })
    }

    /// Expected `iss` claim on ID tokens for this project.
    pub fn token_issuer(&self) -> String {
        format!("https://securetoken.google.com/{}", self.firebase_project_id)
    }
}

fn env_var(key: &str) -> AppResult<String> {
    std::env::var(key).map_err(|_| AppError::Config(format!("missing env var: {key}")))
}

fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
