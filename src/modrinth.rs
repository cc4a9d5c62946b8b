//! Modrinth Client (C7): typed catalog endpoints plus `.mrpack` parse+apply.

use crate::cache::{modrinth_cache, modrinth_limiter, CacheTtl};
use crate::cancellation;
use crate::http;
use crate::instances;
use crate::loaders;
use crate::paths;
use beacon_core::{Instance, LauncherError, LoaderType, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const API_BASE: &str = "https://api.modrinth.com/v2";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModrinthSearchHit {
    pub project_id: String,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub icon_url: Option<String>,
    pub downloads: u64,
    pub project_type: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModrinthSearchResult {
    pub hits: Vec<ModrinthSearchHit>,
    pub total_hits: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModrinthVersion {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub version_number: String,
    pub game_versions: Vec<String>,
    pub loaders: Vec<String>,
    pub date_published: chrono::DateTime<chrono::Utc>,
    pub dependencies: Vec<ModrinthDependency>,
    pub files: Vec<ModrinthFile>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModrinthDependency {
    pub project_id: Option<String>,
    pub dependency_type: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModrinthFile {
    pub url: String,
    pub filename: String,
    #[serde(default)]
    pub primary: bool,
    pub size: u64,
    pub hashes: ModrinthHashes,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModrinthHashes {
    pub sha1: String,
}

/// `search(query, project_type, limit)`.
pub async fn search(query: &str, project_type: &str, limit: u32) -> Result<ModrinthSearchResult> {
    let url = format!(
        "{API_BASE}/search?query={}&facets=[[\"project_type:{project_type}\"]]&limit={limit}",
        urlencoding::encode(query)
    );
    let key = format!("search:{url}");
    modrinth_cache()
        .get_or_fetch_throttled(&key, CacheTtl::Medium, modrinth_limiter(), || {
            http::get_json::<ModrinthSearchResult>(&url)
        })
        .await
}

pub async fn get_popular(project_type: &str, limit: u32) -> Result<ModrinthSearchResult> {
    search("", project_type, limit).await
}

/// Looks a version up by one of its files' SHA-1, used by the mod manager's
/// update check when a JAR carries no parseable loader metadata.
pub async fn version_by_hash(sha1: &str) -> Result<ModrinthVersion> {
    let url = format!("{API_BASE}/version_file/{sha1}?algorithm=sha1");
    let key = format!("hash:{sha1}");
    modrinth_cache()
        .get_or_fetch_throttled(&key, CacheTtl::Long, modrinth_limiter(), || {
            http::get_json::<ModrinthVersion>(&url)
        })
        .await
}

/// Newest version of `project_id` compatible with `instance`, used to
/// decide update availability without requiring an already-installed file.
pub async fn newest_compatible(instance_id: &str, project_id: &str) -> Result<Option<ModrinthVersion>> {
    Ok(compatible_mod_versions(instance_id, project_id).await?.into_iter().next())
}

pub async fn project_versions(project_id: &str) -> Result<Vec<ModrinthVersion>> {
    let url = format!("{API_BASE}/project/{project_id}/version");
    let key = format!("versions:{project_id}");
    modrinth_cache()
        .get_or_fetch_throttled(&key, CacheTtl::Long, modrinth_limiter(), || {
            http::get_json::<Vec<ModrinthVersion>>(&url)
        })
        .await
}

/// Filters `project_versions(project_id)` to versions compatible with
/// `instance` — `v.loaders ∋ instance.loader` and `v.game_versions ∋
/// instance.mc_version` — sorted descending by publish date, primary file
/// first within a version's file list.
pub async fn compatible_mod_versions(instance_id: &str, project_id: &str) -> Result<Vec<ModrinthVersion>> {
    let instance = instances::get(instance_id).await?;
    let loader = instance
        .loader
        .ok_or_else(|| LauncherError::Internal("instance has no loader installed".into()))?;

    let mut versions = project_versions(project_id).await?;
    versions.retain(|v| {
        v.loaders.iter().any(|l| l == loader.as_str()) && v.game_versions.iter().any(|g| g == &instance.mc_version)
    });
    versions.sort_by(|a, b| b.date_published.cmp(&a.date_published));
    for v in &mut versions {
        v.files.sort_by(|a, b| b.primary.cmp(&a.primary));
    }
    Ok(versions)
}

/// Finds the mod-loader projects (by slug) compatible with `instance`'s
/// `mc_version`, used to offer the user loader choices when `install_mod`
/// is invoked before any loader is installed.
pub async fn find_loader_candidates(mc_version: &str, loader: LoaderType) -> Result<Vec<String>> {
    let versions = loaders::list_loader_versions(loader, mc_version, false).await?;
    Ok(versions.into_iter().map(|v| v.version).collect())
}

/// Downloads the project's newest compatible version (or the exact
/// `version_id` when given) into `<instance>/.minecraft/mods/`.
pub async fn install_mod(instance_id: &str, project_id: &str, version_id: Option<&str>) -> Result<()> {
    let version = match version_id {
        Some(vid) => {
            let url = format!("{API_BASE}/version/{vid}");
            http::get_json::<ModrinthVersion>(&url).await?
        }
        None => compatible_mod_versions(instance_id, project_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LauncherError::NotFound(format!("compatible version of {project_id}")))?,
    };

    let file = version
        .files
        .iter()
        .find(|f| f.primary)
        .or_else(|| version.files.first())
        .ok_or_else(|| LauncherError::NotFound(format!("downloadable file for version {}", version.id)))?;

    let dest = paths::instance_mods_dir(instance_id).join(&file.filename);
    http::download_cancellable(
        &file.url,
        &dest,
        http::Expected {
            sha1: Some(&file.hashes.sha1),
            size: Some(file.size),
        },
        Some(instance_id),
    )
    .await
}

#[derive(Debug, Deserialize)]
struct MrpackIndex {
    #[serde(default)]
    name: String,
    dependencies: HashMap<String, String>,
    files: Vec<MrpackFile>,
}

#[derive(Debug, Deserialize)]
struct MrpackFile {
    path: String,
    downloads: Vec<String>,
    #[serde(rename = "fileSize")]
    file_size: u64,
    hashes: MrpackFileHashes,
    #[serde(default)]
    env: Option<MrpackEnv>,
}

#[derive(Debug, Deserialize)]
struct MrpackFileHashes {
    sha1: String,
}

#[derive(Debug, Deserialize)]
struct MrpackEnv {
    #[serde(default)]
    client: String,
}

/// Implements spec §4.7's five-step `.mrpack` install.
pub async fn install_modpack(archive_path: &Path, requested_name: &str) -> Result<Instance> {
    let archive_path = archive_path.to_path_buf();
    let index = tokio::task::spawn_blocking({
        let archive_path = archive_path.clone();
        move || read_index(&archive_path)
    })
    .await??;

    let mc_version = index
        .dependencies
        .get("minecraft")
        .cloned()
        .ok_or_else(|| LauncherError::SchemaInvalid("modrinth.index.json missing minecraft dependency".into()))?;

    let (loader, loader_version) = detect_loader(&index.dependencies);

    let name = if requested_name.is_empty() { index.name.as_str() } else { requested_name };
    let instance = instances::create(name, &mc_version, Some(&mc_version), loader).await?;

    if let Some(lt) = loader {
        log::info!("modpack {} declares loader {}", instance.id, lt.as_str());
        // emitted by the command layer as `modpack-loader-detected`
    }

    for entry in &index.files {
        cancellation::ensure_not_cancelled(requested_name)?;

        if matches!(entry.env.as_ref().map(|e| e.client.as_str()), Some("unsupported")) {
            continue;
        }
        let url = entry
            .downloads
            .first()
            .ok_or_else(|| LauncherError::SchemaInvalid(format!("{} has no download URLs", entry.path)))?;

        let dest = resolve_instance_relative(&instance.id, &entry.path)?;
        http::download_cancellable(
            url,
            &dest,
            http::Expected {
                sha1: Some(&entry.hashes.sha1),
                size: Some(entry.file_size),
            },
            Some(requested_name),
        )
        .await?;
    }

    cancellation::ensure_not_cancelled(requested_name)?;
    let minecraft_dir = paths::instance_minecraft_dir(&instance.id);
    tokio::task::spawn_blocking({
        let archive_path = archive_path.clone();
        let minecraft_dir = minecraft_dir.clone();
        move || {
            extract_overrides(&archive_path, "overrides/", &minecraft_dir)?;
            extract_overrides(&archive_path, "client-overrides/", &minecraft_dir)
        }
    })
    .await??;

    let mut instance = instance;
    if let (Some(lt), Some(lv)) = (loader, loader_version.as_deref()) {
        match loaders::install_loader(lt, &mc_version, Some(lv), &instance.id).await {
            Ok(_derived_id) => {
                // install_loader already persisted version/loader/loader_version;
                // reload so the returned Instance reflects them.
                instance = instances::get(&instance.id).await?;
                // emitted by the command layer as `loader-installed`
            }
            Err(e) => log::warn!("could not auto-install {}: {e}", lt.as_str()),
        }
    }

    Ok(instance)
}

/// Fetches the `.mrpack` file for `version_id` from Modrinth into a scratch
/// location, then hands off to [`install_modpack`].
pub async fn install_modpack_version(requested_name: &str, version_id: &str) -> Result<Instance> {
    let version = http::get_json::<ModrinthVersion>(&format!("{API_BASE}/version/{version_id}")).await?;
    let file = version
        .files
        .iter()
        .find(|f| f.filename.ends_with(".mrpack"))
        .or_else(|| version.files.first())
        .ok_or_else(|| LauncherError::NotFound(format!("mrpack file for version {version_id}")))?;

    let scratch = paths::cache_dir().join("modpack-downloads").join(&file.filename);
    http::download_cancellable(
        &file.url,
        &scratch,
        http::Expected {
            sha1: Some(&file.hashes.sha1),
            size: Some(file.size),
        },
        Some(requested_name),
    )
    .await?;

    let result = install_modpack(&scratch, requested_name).await;
    let _ = tokio::fs::remove_file(&scratch).await;
    result
}

fn detect_loader(deps: &HashMap<String, String>) -> (Option<LoaderType>, Option<String>) {
    for (key, loader) in [
        ("fabric-loader", LoaderType::Fabric),
        ("quilt-loader", LoaderType::Quilt),
        ("forge", LoaderType::Forge),
        ("neoforge", LoaderType::NeoForge),
    ] {
        if let Some(version) = deps.get(key) {
            return (Some(loader), Some(version.clone()));
        }
    }
    (None, None)
}

fn read_index(archive_path: &Path) -> Result<MrpackIndex> {
    let file = std::fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| LauncherError::Filesystem(e.to_string()))?;
    let entry = archive
        .by_name("modrinth.index.json")
        .map_err(|_| LauncherError::SchemaInvalid("missing modrinth.index.json".into()))?;
    Ok(serde_json::from_reader(entry)?)
}

/// Joins `relative` onto the instance root and rejects any path that would
/// escape it, per spec §4.7 step 3.
fn resolve_instance_relative(instance_id: &str, relative: &str) -> Result<PathBuf> {
    let root = paths::instance_minecraft_dir(instance_id);
    let joined = root.join(relative);
    let normalized = normalize(&joined);
    if !normalized.starts_with(&root) {
        return Err(LauncherError::PathTraversal(relative.to_string()));
    }
    Ok(normalized)
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

/// Extracts every entry under `prefix` in the archive onto `dest`,
/// preserving the relative directory structure beneath the prefix.
/// Mirrors the path-traversal guard in `paths::unzip_into`.
fn extract_overrides(archive_path: &Path, prefix: &str, dest: &Path) -> Result<()> {
    let file = std::fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| LauncherError::Filesystem(e.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| LauncherError::Filesystem(e.to_string()))?;
        let name = match entry.enclosed_name() {
            Some(n) => n,
            None => return Err(LauncherError::PathTraversal(entry.name().to_string())),
        };
        let Ok(relative) = name.strip_prefix(prefix) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        let out_path = dest.join(relative);
        if !out_path.starts_with(dest) {
            return Err(LauncherError::PathTraversal(relative.display().to_string()));
        }

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out_file = std::fs::File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out_file)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_loader_prefers_declared_key() {
        let mut deps = HashMap::new();
        deps.insert("minecraft".to_string(), "1.20.4".to_string());
        deps.insert("fabric-loader".to_string(), "0.15.11".to_string());
        let (loader, version) = detect_loader(&deps);
        assert_eq!(loader, Some(LoaderType::Fabric));
        assert_eq!(version.as_deref(), Some("0.15.11"));
    }

    #[test]
    fn resolve_instance_relative_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        paths::init_paths(dir.path().to_path_buf()).ok();
        let err = resolve_instance_relative("inst1", "../../etc/passwd");
        assert!(err.is_err());
    }

    #[test]
    fn urlencode_escapes_spaces() {
        assert_eq!(urlencoding::encode("create mod"), "create%20mod");
    }
}
