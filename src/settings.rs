//! Global settings persisted at `<data-root>/settings.json`.

use crate::paths;
use beacon_core::{Result, Settings};

pub async fn load() -> Result<Settings> {
    let path = paths::settings_path();
    if !path.exists() {
        return Ok(Settings::default());
    }
    let bytes = tokio::fs::read(&path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub async fn save(settings: &Settings) -> Result<()> {
    let path = paths::settings_path();
    let bytes = serde_json::to_vec_pretty(settings)?;
    tokio::task::spawn_blocking(move || paths::atomic_write(&path, &bytes)).await??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_returns_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        paths::init_paths(dir.path().to_path_buf()).ok();
        let settings = load().await.unwrap();
        assert_eq!(settings.min_memory, Settings::default().min_memory);
    }
}
