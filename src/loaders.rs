//! Loader Installer (C6): Fabric/Quilt metadata fetch and derived-version
//! synthesis. Forge/NeoForge are a reserved extension point (spec §4.6).

use crate::cancellation;
use crate::http;
use crate::instances;
use crate::paths;
use beacon_core::{LauncherError, LoaderType, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoaderVersionInfo {
    pub version: String,
    pub stable: bool,
    pub build: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FabricLoaderEntry {
    loader: FabricLoader,
}

#[derive(Debug, Clone, Deserialize)]
struct FabricLoader {
    version: String,
    build: Option<u64>,
    #[serde(default)]
    stable: bool,
}

fn api_base(loader: LoaderType) -> Result<&'static str> {
    match loader {
        LoaderType::Fabric => Ok("https://meta.fabricmc.net/v2"),
        LoaderType::Quilt => Ok("https://meta.quiltmc.org/v3"),
        LoaderType::Forge | LoaderType::NeoForge => Err(LauncherError::Internal(format!(
            "{} installer is a reserved extension point, not yet implemented",
            loader.as_str()
        ))),
    }
}

/// `list_loader_versions(type, mc_version, include_beta)`: stable versions
/// first, then descending by build number.
pub async fn list_loader_versions(
    loader: LoaderType,
    mc_version: &str,
    include_beta: bool,
) -> Result<Vec<LoaderVersionInfo>> {
    let base = api_base(loader)?;
    let url = format!("{base}/versions/loader/{mc_version}");
    let entries: Vec<FabricLoaderEntry> = http::get_json(&url).await?;

    let mut versions: Vec<LoaderVersionInfo> = entries
        .into_iter()
        .map(|e| LoaderVersionInfo {
            version: e.loader.version,
            stable: e.loader.stable,
            build: e.loader.build,
        })
        .filter(|v| include_beta || v.stable)
        .collect();

    versions.sort_by(|a, b| match (a.stable, b.stable) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => b.build.cmp(&a.build),
    });

    Ok(versions)
}

async fn latest_version(loader: LoaderType, mc_version: &str) -> Result<String> {
    let versions = list_loader_versions(loader, mc_version, false).await?;
    versions
        .into_iter()
        .next()
        .map(|v| v.version)
        .ok_or_else(|| LauncherError::NotFound(format!("{} loader for {mc_version}", loader.as_str())))
}

pub fn derived_version_id(loader: LoaderType, loader_version: &str, mc_version: &str) -> String {
    format!("{}-loader-{loader_version}-{mc_version}", loader.as_str())
}

/// `install_loader(type, mc_version, loader_version, instance_id)`. Fetches
/// the loader profile (already Mojang-version-JSON-shaped, with
/// `inheritsFrom` set to the target MC id), overrides its `id` to the
/// derived-id convention, persists it as
/// `versions/<derived-id>/<derived-id>.json`, then updates `instance_id`'s
/// `version`/`loader`/`loader_version` to point at it (spec §4.6).
pub async fn install_loader(
    loader: LoaderType,
    mc_version: &str,
    loader_version: Option<&str>,
    instance_id: &str,
) -> Result<String> {
    let base = api_base(loader)?;
    let version = match loader_version {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => latest_version(loader, mc_version).await?,
    };

    cancellation::ensure_not_cancelled(instance_id)?;
    let url = format!("{base}/versions/loader/{mc_version}/{version}/profile/json");
    let mut profile: serde_json::Value = http::get_json(&url).await?;

    let derived_id = derived_version_id(loader, &version, mc_version);
    profile["id"] = serde_json::Value::String(derived_id.clone());
    profile["inheritsFrom"] = serde_json::Value::String(mc_version.to_string());

    let path = paths::version_json_path(&derived_id);
    let bytes = serde_json::to_vec_pretty(&profile)?;
    paths::atomic_write(&path, &bytes)?;

    let mut instance = instances::get(instance_id).await?;
    instance.version = derived_id.clone();
    instance.loader = Some(loader);
    instance.loader_version = Some(version);
    instances::save(&instance).await?;

    Ok(derived_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_id_matches_convention() {
        assert_eq!(
            derived_version_id(LoaderType::Fabric, "0.15.11", "1.20.4"),
            "fabric-loader-0.15.11-1.20.4"
        );
        assert_eq!(
            derived_version_id(LoaderType::Quilt, "0.23.1", "1.20.4"),
            "quilt-loader-0.23.1-1.20.4"
        );
    }

    #[test]
    fn forge_is_reserved_extension_point() {
        assert!(api_base(LoaderType::Forge).is_err());
    }
}
