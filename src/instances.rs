//! Instance Store (C9): JSON-file CRUD over `instances/<id>/instance.json`.

use crate::paths;
use crate::utils;
use beacon_core::{Instance, InstanceState, LauncherError, LoaderType, Result, INSTANCE_SCHEMA_VERSION};

/// Reads every `instances/*/instance.json`, skipping entries that fail to
/// parse (a single corrupt instance must not take the whole list down).
pub async fn list() -> Result<Vec<Instance>> {
    let dir = paths::instances_dir();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    let mut entries = tokio::fs::read_dir(&dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let id = entry.file_name().to_string_lossy().to_string();
        match get(&id).await {
            Ok(instance) => out.push(instance),
            Err(e) => log::warn!("skipping unreadable instance {id}: {e}"),
        }
    }
    out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(out)
}

pub async fn get(id: &str) -> Result<Instance> {
    let path = paths::instance_json_path(id);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| LauncherError::NotFound(format!("instance {id}")))?;
    load_and_migrate(&bytes)
}

fn load_and_migrate(bytes: &[u8]) -> Result<Instance> {
    let raw: serde_json::Value = serde_json::from_slice(bytes)?;
    let schema_version = raw
        .get("schema_version")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| LauncherError::SchemaInvalid("missing schema_version".into()))? as u32;

    if schema_version > INSTANCE_SCHEMA_VERSION {
        return Err(LauncherError::SchemaTooNew {
            found: schema_version,
            max_supported: INSTANCE_SCHEMA_VERSION,
        });
    }

    // No migrations exist yet (schema_version has never moved past 1); a
    // future bump adds `if schema_version < N { ... }` arms here, each
    // followed by re-persisting the migrated instance.
    let instance: Instance = serde_json::from_value(raw)?;
    Ok(instance)
}

/// Finds a name with no existing collision, appending `" (N)"` with the
/// smallest N that is free.
async fn unique_name(base: &str) -> Result<String> {
    let existing: Vec<String> = list().await?.into_iter().map(|i| i.name).collect();
    if !existing.contains(&base.to_string()) {
        return Ok(base.to_string());
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base} ({n})");
        if !existing.contains(&candidate) {
            return Ok(candidate);
        }
        n += 1;
    }
}

pub async fn create(
    name: &str,
    version: &str,
    mc_version: Option<&str>,
    loader: Option<LoaderType>,
) -> Result<Instance> {
    let unique = unique_name(name).await?;
    let id = utils::gen_short_id();
    let mut instance = Instance::new(
        id,
        unique,
        version.to_string(),
        mc_version.unwrap_or(version).to_string(),
    );
    instance.loader = loader;

    tokio::fs::create_dir_all(paths::instance_minecraft_dir(&instance.id)).await?;
    save(&instance).await?;
    Ok(instance)
}

/// Serialises and atomically writes `instance.json`. Per spec §4.9 the
/// previous on-disk bytes are never touched until the new temp file has
/// been fully written and fsynced, so a write failure mid-way leaves the
/// existing instance readable.
///
/// Also enforces spec §3's invariant on `java_path_override`: if the
/// incoming value differs from what's currently on disk, `java_warning_ignored`
/// is forced back to `false` via [`Instance::set_java_path_override`] before
/// writing, regardless of what the caller (frontend or internal code) set it
/// to.
pub async fn save(instance: &Instance) -> Result<()> {
    let path = paths::instance_json_path(&instance.id);
    let mut instance = instance.clone();
    if let Ok(existing) = get(&instance.id).await {
        if existing.java_path_override != instance.java_path_override {
            instance.set_java_path_override(instance.java_path_override.clone());
        }
    }

    let bytes = serde_json::to_vec_pretty(&instance)?;
    let path_owned = path.clone();
    tokio::task::spawn_blocking(move || paths::atomic_write(&path_owned, &bytes)).await??;
    Ok(())
}

pub async fn transition(id: &str, next: InstanceState) -> Result<Instance> {
    let mut instance = get(id).await?;
    if !instance.state.can_transition_to(next) {
        return Err(LauncherError::Internal(format!(
            "illegal state transition {:?} -> {:?}",
            instance.state, next
        )));
    }
    instance.state = next;
    save(&instance).await?;
    Ok(instance)
}

/// True when no other instance references `version_id` as either its
/// derived `version` or its vanilla `mc_version`.
pub async fn is_only_user_of(version_id: &str, excluding_id: &str) -> Result<bool> {
    let others = list().await?;
    Ok(!others
        .iter()
        .any(|i| i.id != excluding_id && (i.version == version_id || i.mc_version == version_id)))
}

pub async fn delete(id: &str, delete_version: bool) -> Result<()> {
    let instance = get(id).await?;
    let dir = paths::instance_dir(id);
    if dir.exists() {
        tokio::fs::remove_dir_all(&dir).await?;
    }

    if delete_version && is_only_user_of(&instance.version, id).await? {
        let version_dir = paths::version_dir(&instance.version);
        if version_dir.exists() {
            tokio::fs::remove_dir_all(&version_dir).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn init() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        INIT.call_once(|| {
            paths::init_paths(dir.path().to_path_buf()).ok();
        });
        dir
    }

    #[tokio::test]
    async fn create_assigns_unique_name_on_collision() {
        let _dir = init();
        let first = create("Survival", "1.20.4", None, None).await.unwrap();
        assert_eq!(first.name, "Survival");
        let second = create("Survival", "1.20.4", None, None).await.unwrap();
        assert_eq!(second.name, "Survival (2)");
    }

    #[tokio::test]
    async fn is_only_user_of_is_false_when_shared() {
        let _dir = init();
        let a = create("A", "1.20.4", None, None).await.unwrap();
        let _b = create("B", "1.20.4", None, None).await.unwrap();
        assert!(!is_only_user_of(&a.version, &a.id).await.unwrap());
    }

    #[tokio::test]
    async fn save_clears_ignored_warning_when_java_path_override_changes() {
        let _dir = init();
        let mut instance = create("Survival", "1.20.4", None, None).await.unwrap();
        instance.java_warning_ignored = true;
        save(&instance).await.unwrap();
        assert!(get(&instance.id).await.unwrap().java_warning_ignored);

        instance.java_path_override = Some("/opt/jdk21/bin/java".to_string());
        save(&instance).await.unwrap();
        let reloaded = get(&instance.id).await.unwrap();
        assert!(!reloaded.java_warning_ignored);
        assert_eq!(reloaded.java_path_override.as_deref(), Some("/opt/jdk21/bin/java"));
    }
}
