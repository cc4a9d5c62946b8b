//! Asset Installer (C4): download the asset index, materialise the
//! content-addressed object store, and mirror legacy "virtual" resources.

use crate::cancellation;
use crate::http;
use crate::paths;
use crate::version::EffectiveVersion;
use beacon_core::{LauncherError, Result};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct AssetIndexJson {
    pub objects: HashMap<String, AssetObject>,
    #[serde(default)]
    pub map_to_resources: bool,
    #[serde(default)]
    pub r#virtual: bool,
}

#[derive(Debug, Deserialize)]
pub struct AssetObject {
    pub hash: String,
    pub size: u64,
}

pub type AssetProgress = Box<dyn Fn(u64, u64) + Send + Sync>;

/// Downloads the asset index and every referenced object through the
/// concurrency-limited HTTP fetcher, then — for index formats that carry
/// `map_to_resources`/`virtual` — additionally hard-links (falling back to
/// copy) each object into `assets/virtual/legacy/<orig>` for older clients
/// that expect a loose-file resources tree rather than the object store.
pub async fn ensure_assets(
    effective: &EffectiveVersion,
    instance_id: &str,
    on_progress: Option<AssetProgress>,
) -> Result<()> {
    let asset_index = effective
        .asset_index
        .as_ref()
        .ok_or_else(|| LauncherError::SchemaInvalid(format!("{} has no asset index", effective.id)))?;

    let index_path = paths::asset_index_path(&asset_index.id);
    http::download_cancellable(
        &asset_index.url,
        &index_path,
        http::Expected {
            sha1: Some(&asset_index.sha1),
            size: Some(asset_index.size),
        },
        Some(instance_id),
    )
    .await?;

    let bytes = tokio::fs::read(&index_path).await?;
    let index: AssetIndexJson = serde_json::from_slice(&bytes)?;

    let total = index.objects.len() as u64;
    let done = std::sync::atomic::AtomicU64::new(0);

    let downloads = index.objects.values().map(|obj| {
        let hash = obj.hash.clone();
        let size = obj.size;
        async move {
            let dest = paths::asset_object_path(&hash);
            let prefix = &hash[0..2];
            let url = format!("https://resources.download.minecraft.net/{prefix}/{hash}");
            http::download_cancellable(
                &url,
                &dest,
                http::Expected {
                    sha1: Some(&hash),
                    size: Some(size),
                },
                Some(instance_id),
            )
            .await
        }
    });

    let results: Vec<Result<()>> = futures::stream::iter(downloads)
        .buffer_unordered(64)
        .inspect(|_| {
            let n = done.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
            if let Some(cb) = &on_progress {
                cb(n, total);
            }
        })
        .collect()
        .await;
    for r in results {
        r?;
    }

    if index.map_to_resources || index.r#virtual {
        cancellation::ensure_not_cancelled(instance_id)?;
        mirror_legacy(&index).await?;
    }

    Ok(())
}

async fn mirror_legacy(index: &AssetIndexJson) -> Result<()> {
    for (orig_path, obj) in &index.objects {
        let object_path = paths::asset_object_path(&obj.hash);
        let legacy_path = paths::asset_virtual_legacy_path(orig_path);
        if legacy_path.exists() {
            continue;
        }
        if let Some(parent) = legacy_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::hard_link(&object_path, &legacy_path).await.is_err() {
            tokio::fs::copy(&object_path, &legacy_path).await?;
        }
    }
    Ok(())
}

use futures::StreamExt;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_index_defaults_virtual_flags_false() {
        let json = r#"{"objects":{}}"#;
        let index: AssetIndexJson = serde_json::from_str(json).unwrap();
        assert!(!index.map_to_resources);
        assert!(!index.r#virtual);
    }
}
