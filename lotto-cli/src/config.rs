use anyhow::{Context, Result};
use lotto_core::SessionConfig;
use std::path::{Path, PathBuf};

const DATABASE_FILE: &str = "lotto.db";
const CLIENT_ID_FILE: &str = "client_id";

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub data_dir: PathBuf,
    pub session: SessionConfig,
}

impl CliConfig {
    /// Flags win over `LOTTO_*` variables, which win over saved and built-in defaults.
    pub async fn load(
        data_dir: Option<PathBuf>,
        session_key: Option<String>,
        client_id: Option<String>,
    ) -> Result<Self> {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create directory {}", data_dir.display()))?;

        let mut session = SessionConfig::from_env();
        if std::env::var("LOTTO_CLIENT_ID").map_or(true, |id| id.trim().is_empty()) {
            let client_id = saved_client_id(&data_dir, &session.client_id).await?;
            session = session.with_client_id(client_id);
        }
        if let Some(key) = session_key {
            session = session.with_session_key(key);
        }
        if let Some(id) = client_id {
            session = session.with_client_id(id);
        }

        session.validate()?;
        Ok(Self { data_dir, session })
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lotto")
}

/// Keeps one client id per data directory so separate invocations act as the same client.
async fn saved_client_id(data_dir: &Path, fresh: &str) -> Result<String> {
    let path = data_dir.join(CLIENT_ID_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(saved) if !saved.trim().is_empty() => Ok(saved.trim().to_string()),
        _ => {
            tokio::fs::write(&path, fresh)
                .await
                .with_context(|| format!("Failed to save client id to {}", path.display()))?;
            Ok(fresh.to_string())
        }
    }
}
