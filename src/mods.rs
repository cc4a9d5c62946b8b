//! Mod Manager (C8): enable/disable/remove installed mods and check for
//! updates against Modrinth via embedded JAR metadata.

use crate::modrinth;
use crate::paths;
use beacon_core::{LauncherError, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModEntry {
    pub filename: String,
    pub size: u64,
    pub enabled: bool,
}

/// `list_mods(instance)`: every `mods/*.jar` and `mods/*.jar.disabled`.
pub async fn list_mods(instance_id: &str) -> Result<Vec<ModEntry>> {
    let dir = paths::instance_mods_dir(instance_id);
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    let mut entries = tokio::fs::read_dir(&dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        let enabled = name.ends_with(".jar");
        if !enabled && !name.ends_with(".jar.disabled") {
            continue;
        }
        let size = entry.metadata().await?.len();
        out.push(ModEntry { filename: name, size, enabled });
    }
    out.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(out)
}

/// Renames between `.jar` and `.jar.disabled` — a pure filesystem rename,
/// atomic on the same volume.
pub async fn toggle_mod(instance_id: &str, filename: &str, enabled: bool) -> Result<()> {
    let dir = paths::instance_mods_dir(instance_id);
    let current = dir.join(filename);
    if !current.exists() {
        return Err(LauncherError::NotFound(filename.to_string()));
    }

    let new_name = if enabled {
        filename.strip_suffix(".disabled").unwrap_or(filename).to_string()
    } else if filename.ends_with(".disabled") {
        filename.to_string()
    } else {
        format!("{filename}.disabled")
    };

    if new_name == filename {
        return Ok(());
    }
    tokio::fs::rename(&current, dir.join(&new_name)).await?;
    Ok(())
}

/// Deletes a single mod file; never touches anything else in `mods/`.
pub async fn remove_mod(instance_id: &str, filename: &str) -> Result<()> {
    let path = paths::instance_mods_dir(instance_id).join(filename);
    tokio::fs::remove_file(&path)
        .await
        .map_err(|_| LauncherError::NotFound(filename.to_string()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModUpdateStatus {
    pub filename: String,
    pub current_version: Option<String>,
    pub latest_version: Option<String>,
    pub project_id: Option<String>,
    pub update_available: bool,
    /// Set when the embedded metadata declares a loader/MC range that
    /// doesn't match the instance; flagged only, never auto-disabled.
    pub broken: bool,
}

struct EmbeddedMeta {
    mod_id: Option<String>,
    version: Option<String>,
    declared_loader: Option<String>,
}

/// Reads `fabric.mod.json`, `quilt.mod.json` or `mods.toml` from a mod JAR,
/// whichever is present, to recover its mod id and version.
fn probe_jar_metadata(path: &Path) -> Result<EmbeddedMeta> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| LauncherError::Filesystem(e.to_string()))?;

    if let Ok(mut entry) = archive.by_name("fabric.mod.json") {
        let mut buf = String::new();
        entry.read_to_string(&mut buf)?;
        let json: serde_json::Value = serde_json::from_str(&buf)?;
        return Ok(EmbeddedMeta {
            mod_id: json.get("id").and_then(|v| v.as_str()).map(String::from),
            version: json.get("version").and_then(|v| v.as_str()).map(String::from),
            declared_loader: Some("fabric".to_string()),
        });
    }

    drop(archive);
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| LauncherError::Filesystem(e.to_string()))?;

    if let Ok(mut entry) = archive.by_name("quilt.mod.json") {
        let mut buf = String::new();
        entry.read_to_string(&mut buf)?;
        let json: serde_json::Value = serde_json::from_str(&buf)?;
        let quilt_loader = json.get("quilt_loader");
        return Ok(EmbeddedMeta {
            mod_id: quilt_loader.and_then(|q| q.get("id")).and_then(|v| v.as_str()).map(String::from),
            version: quilt_loader.and_then(|q| q.get("version")).and_then(|v| v.as_str()).map(String::from),
            declared_loader: Some("quilt".to_string()),
        });
    }

    drop(archive);
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| LauncherError::Filesystem(e.to_string()))?;

    if let Ok(mut entry) = archive.by_name("META-INF/mods.toml") {
        let mut buf = String::new();
        entry.read_to_string(&mut buf)?;
        let parsed: toml::Value = buf.parse().map_err(|e| LauncherError::SchemaInvalid(format!("mods.toml: {e}")))?;
        let first_mod = parsed.get("mods").and_then(|m| m.as_array()).and_then(|a| a.first());
        return Ok(EmbeddedMeta {
            mod_id: first_mod.and_then(|m| m.get("modId")).and_then(|v| v.as_str()).map(String::from),
            version: first_mod.and_then(|m| m.get("version")).and_then(|v| v.as_str()).map(String::from),
            declared_loader: Some("forge".to_string()),
        });
    }

    Ok(EmbeddedMeta { mod_id: None, version: None, declared_loader: None })
}

/// `check_updates(instance)`: probes each enabled JAR's embedded metadata,
/// falls back to a Modrinth lookup by file hash when no mod id can be
/// extracted, and reports the newest compatible version.
pub async fn check_updates(instance_id: &str) -> Result<Vec<ModUpdateStatus>> {
    let instance = crate::instances::get(instance_id).await?;
    let declared_loader = instance.loader.map(|l| l.as_str().to_string());
    let mods = list_mods(instance_id).await?;
    let dir = paths::instance_mods_dir(instance_id);

    let mut out = Vec::new();
    for m in mods.into_iter().filter(|m| m.enabled) {
        let path = dir.join(&m.filename);
        let meta = tokio::task::spawn_blocking({
            let path = path.clone();
            move || probe_jar_metadata(&path)
        })
        .await??;

        let broken = match (&meta.declared_loader, &declared_loader) {
            (Some(found), Some(expected)) => found != expected,
            _ => false,
        };

        let version = if let Some(project_id) = &meta.mod_id {
            modrinth::newest_compatible(instance_id, project_id).await.ok().flatten()
        } else {
            let path_owned = path.clone();
            let hash = tokio::task::spawn_blocking(move || paths::sha1_file(&path_owned)).await??;
            modrinth::version_by_hash(&hash).await.ok()
        };

        let latest_version = version.as_ref().map(|v| v.version_number.clone());
        let project_id = version.as_ref().map(|v| v.project_id.clone()).or(meta.mod_id.clone());
        let update_available = match (&meta.version, &latest_version) {
            (Some(current), Some(latest)) => current != latest,
            _ => false,
        };

        out.push(ModUpdateStatus {
            filename: m.filename,
            current_version: meta.version,
            latest_version,
            project_id,
            update_available,
            broken,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_mods_returns_empty_for_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        paths::init_paths(dir.path().to_path_buf()).ok();
        let mods = list_mods("does-not-exist").await.unwrap();
        assert!(mods.is_empty());
    }

    #[tokio::test]
    async fn toggle_mod_renames_between_states() {
        let dir = tempfile::tempdir().unwrap();
        paths::init_paths(dir.path().to_path_buf()).ok();
        let mods_dir = paths::instance_mods_dir("toggle-test");
        tokio::fs::create_dir_all(&mods_dir).await.unwrap();
        tokio::fs::write(mods_dir.join("example.jar"), b"jar").await.unwrap();

        toggle_mod("toggle-test", "example.jar", false).await.unwrap();
        assert!(mods_dir.join("example.jar.disabled").exists());

        toggle_mod("toggle-test", "example.jar.disabled", true).await.unwrap();
        assert!(mods_dir.join("example.jar").exists());
    }
}
