//! Data-root layout, atomic writes, streaming hashing, archive extraction.

use beacon_core::{LauncherError, Result};
use sha1::{Digest, Sha1};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub static BASE_DIR: OnceLock<PathBuf> = OnceLock::new();

pub fn init_paths(base: PathBuf) -> Result<()> {
    fs::create_dir_all(base.join("instances"))?;
    fs::create_dir_all(base.join("versions"))?;
    fs::create_dir_all(base.join("libraries"))?;
    fs::create_dir_all(base.join("assets/indexes"))?;
    fs::create_dir_all(base.join("assets/objects"))?;
    fs::create_dir_all(base.join("assets/virtual"))?;
    fs::create_dir_all(base.join("cache"))?;
    fs::create_dir_all(base.join("logs"))?;

    BASE_DIR.set(base).map_err(|_| {
        LauncherError::Internal("data root already initialized".to_string())
    })?;
    Ok(())
}

pub fn data_root() -> &'static Path {
    BASE_DIR.get().expect("data root not initialized")
}

pub fn instances_dir() -> PathBuf {
    data_root().join("instances")
}

pub fn instance_dir(id: &str) -> PathBuf {
    instances_dir().join(id)
}

pub fn instance_minecraft_dir(id: &str) -> PathBuf {
    instance_dir(id).join(".minecraft")
}

pub fn instance_mods_dir(id: &str) -> PathBuf {
    instance_minecraft_dir(id).join("mods")
}

pub fn instance_natives_dir(id: &str) -> PathBuf {
    instance_dir(id).join("natives")
}

pub fn instance_logs_dir(id: &str) -> PathBuf {
    instance_dir(id).join("logs")
}

pub fn instance_last_launch_log(id: &str) -> PathBuf {
    instance_logs_dir(id).join("last-launch.log")
}

pub fn instance_crashes_dir(id: &str) -> PathBuf {
    instance_dir(id).join("crashes")
}

pub fn instance_json_path(id: &str) -> PathBuf {
    instance_dir(id).join("instance.json")
}

pub fn versions_dir() -> PathBuf {
    data_root().join("versions")
}

pub fn version_dir(vid: &str) -> PathBuf {
    versions_dir().join(vid)
}

pub fn version_json_path(vid: &str) -> PathBuf {
    version_dir(vid).join(format!("{vid}.json"))
}

pub fn version_jar_path(vid: &str) -> PathBuf {
    version_dir(vid).join(format!("{vid}.jar"))
}

pub fn libraries_dir() -> PathBuf {
    data_root().join("libraries")
}

/// `maven_coord` is `group:artifact:version[:classifier]`; returns the
/// conventional Maven repository-layout path under `libraries/`.
pub fn library_path(maven_coord: &str, classifier: Option<&str>) -> PathBuf {
    let parts: Vec<&str> = maven_coord.split(':').collect();
    let (group, artifact, version) = (parts[0], parts[1], parts[2]);
    let group_path = group.replace('.', "/");
    let file_classifier = classifier
        .or_else(|| parts.get(3).copied())
        .map(|c| format!("-{c}"))
        .unwrap_or_default();
    libraries_dir()
        .join(group_path)
        .join(artifact)
        .join(version)
        .join(format!("{artifact}-{version}{file_classifier}.jar"))
}

pub fn assets_dir() -> PathBuf {
    data_root().join("assets")
}

pub fn asset_index_path(asset_index_id: &str) -> PathBuf {
    assets_dir().join("indexes").join(format!("{asset_index_id}.json"))
}

pub fn asset_object_path(hash: &str) -> PathBuf {
    assets_dir().join("objects").join(&hash[0..2]).join(hash)
}

pub fn asset_virtual_legacy_path(relative: &str) -> PathBuf {
    assets_dir().join("virtual").join("legacy").join(relative)
}

pub fn cache_dir() -> PathBuf {
    data_root().join("cache")
}

pub fn manifest_cache_path() -> PathBuf {
    cache_dir().join("manifest.json")
}

pub fn logs_dir() -> PathBuf {
    data_root().join("logs")
}

pub fn settings_path() -> PathBuf {
    data_root().join("settings.json")
}

/// Writes `content` to `<path>.tmp`, fsyncs, then renames over `path`. A
/// failure at any point before the rename leaves the previous contents of
/// `path` untouched — readers never observe a partial write.
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");

    let mut file = File::create(&tmp_path)?;
    file.write_all(content)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Streaming SHA-1 over a 64 KiB buffer — constant memory regardless of file size.
pub fn sha1_file<P: AsRef<Path>>(path: P) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buffer = [0u8; 65536];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

pub fn sha1_bytes(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Extracts every entry of `archive` under `dest`, refusing any entry whose
/// normalised path would escape `dest` (`..` components or an absolute path).
/// When `strip_meta_inf` is set, entries under `META-INF/` are skipped — used
/// for native-library JARs, whose signature files must not land next to the
/// extracted `.so`/`.dll`/`.dylib`.
pub fn unzip_into<P: AsRef<Path>>(archive_path: P, dest: P, strip_meta_inf: bool) -> Result<()> {
    let dest = dest.as_ref();
    fs::create_dir_all(dest)?;
    let file = File::open(archive_path.as_ref())?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| LauncherError::Filesystem(format!("invalid archive: {e}")))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| LauncherError::Filesystem(format!("bad archive entry: {e}")))?;
        let name = match entry.enclosed_name() {
            Some(n) => n,
            None => {
                return Err(LauncherError::PathTraversal(
                    entry.name().to_string(),
                ))
            }
        };

        if strip_meta_inf && name.starts_with("META-INF") {
            continue;
        }

        let out_path = dest.join(&name);
        if !out_path.starts_with(dest) {
            return Err(LauncherError::PathTraversal(name.display().to_string()));
        }

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out_file = File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out_file)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instance.json");
        atomic_write(&path, b"first").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"first");
        atomic_write(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn library_path_uses_maven_layout() {
        let p = library_path("net.fabricmc:fabric-loader:0.15.11", None);
        assert!(p.ends_with("net/fabricmc/fabric-loader/0.15.11/fabric-loader-0.15.11.jar"));
    }

    #[test]
    fn sha1_file_matches_known_vector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        fs::write(&path, b"").unwrap();
        assert_eq!(sha1_file(&path).unwrap(), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }
}
