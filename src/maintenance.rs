//! Ambient housekeeping commands: disk usage, cleanup of orphaned
//! versions/asset cache, and directory scans for screenshots/worlds/
//! servers/crash logs. Not part of the install/launch pipeline proper.

use crate::instances;
use crate::paths;
use beacon_core::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub arch: String,
    pub total_memory_mb: u64,
    pub available_memory_mb: u64,
    pub cpu_count: usize,
}

pub fn get_system_info() -> SystemInfo {
    let mut system = sysinfo::System::new_all();
    system.refresh_memory();
    SystemInfo {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        total_memory_mb: system.total_memory() / 1024 / 1024,
        available_memory_mb: system.available_memory() / 1024 / 1024,
        cpu_count: system.cpus().len(),
    }
}

fn dir_size(path: &Path) -> u64 {
    if !path.exists() {
        return 0;
    }
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupInfo {
    pub orphaned_version_ids: Vec<String>,
    pub orphaned_size: u64,
    pub asset_cache_size: u64,
}

/// Versions referenced by no instance's `version` or `mc_version`.
pub async fn get_cleanup_info() -> Result<CleanupInfo> {
    let all_instances = instances::list().await?;
    let referenced: std::collections::HashSet<String> = all_instances
        .iter()
        .flat_map(|i| [i.version.clone(), i.mc_version.clone()])
        .collect();

    let versions_dir = paths::versions_dir();
    let mut orphaned_version_ids = Vec::new();
    let mut orphaned_size = 0u64;

    if versions_dir.exists() {
        let mut entries = tokio::fs::read_dir(&versions_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            if !referenced.contains(&id) {
                orphaned_size += dir_size(&entry.path());
                orphaned_version_ids.push(id);
            }
        }
    }

    Ok(CleanupInfo {
        orphaned_version_ids,
        orphaned_size,
        asset_cache_size: dir_size(&paths::assets_dir()),
    })
}

pub async fn cleanup_unused_versions() -> Result<u64> {
    let info = get_cleanup_info().await?;
    for id in &info.orphaned_version_ids {
        let dir = paths::version_dir(id);
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir).await?;
        }
    }
    Ok(info.orphaned_size)
}

pub async fn clear_asset_cache() -> Result<u64> {
    let size = dir_size(&paths::assets_dir());
    let dir = paths::assets_dir();
    if dir.exists() {
        tokio::fs::remove_dir_all(&dir).await?;
    }
    tokio::fs::create_dir_all(dir.join("indexes")).await?;
    tokio::fs::create_dir_all(dir.join("objects")).await?;
    tokio::fs::create_dir_all(dir.join("virtual")).await?;
    Ok(size)
}

async fn list_files(dir: &Path, extensions: &[&str]) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if extensions.is_empty() || extensions.iter().any(|ext| name.ends_with(ext)) {
            out.push(name);
        }
    }
    out.sort();
    Ok(out)
}

pub async fn list_instance_screenshots(instance_id: &str) -> Result<Vec<String>> {
    let dir = paths::instance_minecraft_dir(instance_id).join("screenshots");
    list_files(&dir, &[".png"]).await
}

pub async fn list_instance_worlds(instance_id: &str) -> Result<Vec<String>> {
    let dir = paths::instance_minecraft_dir(instance_id).join("saves");
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    let mut entries = tokio::fs::read_dir(&dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            out.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    out.sort();
    Ok(out)
}

pub async fn list_instance_servers(instance_id: &str) -> Result<Vec<beacon_core::ServerListEntry>> {
    let path = paths::instance_minecraft_dir(instance_id).join("servers.dat");
    if !path.exists() {
        return Ok(Vec::new());
    }
    crate::servers_dat::list_servers(&path).await
}

pub async fn get_instance_crash_logs(instance_id: &str) -> Result<Vec<String>> {
    list_files(&paths::instance_crashes_dir(instance_id), &[]).await
}

pub async fn clear_instance_logs(instance_id: &str) -> Result<()> {
    let crashes = paths::instance_crashes_dir(instance_id);
    if crashes.exists() {
        tokio::fs::remove_dir_all(&crashes).await?;
    }
    let last_launch = paths::instance_last_launch_log(instance_id);
    if last_launch.exists() {
        tokio::fs::remove_file(&last_launch).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_instance_screenshots_empty_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        paths::init_paths(dir.path().to_path_buf()).ok();
        let shots = list_instance_screenshots("no-such-instance").await.unwrap();
        assert!(shots.is_empty());
    }

    #[test]
    fn get_system_info_reports_nonzero_cpus() {
        let info = get_system_info();
        assert!(info.cpu_count >= 1);
    }
}
