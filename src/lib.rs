use chrono::Local;
use std::io::Write;
use std::sync::OnceLock;
use tauri::{Emitter, Manager};

mod assets;
mod cache;
mod cancellation;
mod http;
mod install_lock;
mod instances;
mod java;
mod launcher;
mod libraries;
mod loaders;
mod maintenance;
mod modrinth;
mod mods;
mod paths;
mod servers_dat;
mod settings;
mod utils;
mod version;

use beacon_core::{Instance, LauncherError, LoaderType, Result};
use futures::FutureExt;
use launcher::ChildMap;
use version::{VersionManifest, VersionResolver};

static APP_HANDLE: OnceLock<tauri::AppHandle> = OnceLock::new();

/// Mirrors fern output into a `rust-log` Tauri event so the frontend console
/// can show live log lines without a file-tail subscription.
struct TauriLogWriter;

impl Write for TauriLogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(app) = APP_HANDLE.get() {
            if let Ok(line) = std::str::from_utf8(buf) {
                if let Some(entry) = parse_log_line(line.trim()) {
                    let _ = app.emit("rust-log", entry);
                }
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Parses a fern line of the form `[2024-12-04 16:48:12.345 INFO target] message`.
fn parse_log_line(line: &str) -> Option<serde_json::Value> {
    if !line.starts_with('[') {
        return None;
    }
    let close = line.find(']')?;
    let header = &line[1..close];
    let message = line[close + 1..].trim();
    let parts: Vec<&str> = header.splitn(4, ' ').collect();
    if parts.len() < 4 {
        return None;
    }
    Some(serde_json::json!({
        "timestamp": format!("{} {}", parts[0], parts[1]),
        "level": parts[2],
        "target": parts[3],
        "message": message,
    }))
}

fn setup_logging(base_dir: &std::path::Path) {
    let logs_dir = base_dir.join("logs");
    let _ = std::fs::create_dir_all(&logs_dir);
    let log_file = logs_dir.join(format!("launcher_{}.log", Local::now().timestamp()));

    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);

    let file_logger = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .level_for("hyper", log::LevelFilter::Warn)
        .level_for("reqwest", log::LevelFilter::Warn)
        .level_for("tao", log::LevelFilter::Warn)
        .level_for("wry", log::LevelFilter::Warn);

    let file_output: fern::Output = match fern::log_file(&log_file) {
        Ok(file) => file.into(),
        Err(_) => fern::Output::writer(Box::new(std::io::sink()), "\n"),
    };
    let tauri_output = fern::Output::writer(Box::new(TauriLogWriter), "\n");

    #[cfg(debug_assertions)]
    let logger = file_logger.chain(std::io::stdout()).chain(file_output).chain(tauri_output);
    #[cfg(not(debug_assertions))]
    let logger = file_logger.chain(file_output).chain(tauri_output);

    if let Err(e) = logger.apply() {
        eprintln!("failed to initialize logger: {e}");
    }

    log::info!("beacon core started");
}

/// Catches an internal panic at the command boundary and reports it as
/// `LauncherError::Internal` rather than letting it cross into the
/// frontend, per the error propagation policy.
async fn guard<F, T>(fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("panic crossing command boundary: {message}");
            Err(LauncherError::Internal(message))
        }
    }
}

#[tauri::command]
async fn get_version_manifest() -> Result<VersionManifest> {
    guard(VersionResolver::get_manifest()).await
}

#[tauri::command]
async fn list_instances() -> Result<Vec<Instance>> {
    guard(instances::list()).await
}

#[tauri::command]
async fn create_instance(name: String, version: String) -> Result<Instance> {
    guard(instances::create(&name, &version, None, None)).await
}

#[tauri::command]
async fn save_instance(instance: Instance) -> Result<()> {
    guard(async move { instances::save(&instance).await }).await
}

#[tauri::command]
async fn delete_instance(instance_id: String, delete_version: bool) -> Result<()> {
    guard(async move { instances::delete(&instance_id, delete_version).await }).await
}

#[tauri::command]
async fn check_version_usage(instance_id: String, version_id: String) -> Result<bool> {
    guard(async move {
        instances::is_only_user_of(&version_id, &instance_id)
            .await
            .map(|only| !only)
    })
    .await
}

#[tauri::command]
async fn download_version(app: tauri::AppHandle, instance_id: String, version_id: String) -> Result<()> {
    let _install_guard = install_lock::acquire(&instance_id)?;
    let _cancel_guard = cancellation::guard(&instance_id);
    guard(async move {
        let effective = VersionResolver::resolve(&version_id).await?;
        VersionResolver::ensure_client_jar(&effective).await?;
        libraries::install_libraries_and_natives(&effective, &instance_id).await?;

        let app_for_progress = app.clone();
        assets::ensure_assets(
            &effective,
            &instance_id,
            Some(Box::new(move |done, total| {
                let _ = app_for_progress.emit(
                    "download-progress",
                    serde_json::json!({ "phase": "assets", "done": done, "total": total }),
                );
            })),
        )
        .await?;
        Ok(())
    })
    .await
}

#[tauri::command]
async fn install_loader(
    loader_type: String,
    mc_version: String,
    loader_version: Option<String>,
    instance_id: String,
) -> Result<String> {
    let _install_guard = install_lock::acquire(&instance_id)?;
    let _cancel_guard = cancellation::guard(&instance_id);
    guard(async move {
        let loader = LoaderType::parse(&loader_type)
            .ok_or_else(|| LauncherError::Internal(format!("unknown loader type {loader_type}")))?;
        loaders::install_loader(loader, &mc_version, loader_version.as_deref(), &instance_id).await
    })
    .await
}

/// Aborts any install in flight for `instance_id` (spec §5: cancellation aborts
/// in-flight downloads without deleting already-written content-addressed
/// files, and the caller transitions the instance back to `ready`/`error`).
/// Returns `false` when no install was running to cancel.
#[tauri::command]
async fn cancel_install(instance_id: String) -> Result<bool> {
    guard(async move { Ok(cancellation::cancel(&instance_id)) }).await
}

#[tauri::command]
async fn get_loader_versions(
    loader_type: String,
    mc_version: String,
    include_beta: bool,
) -> Result<Vec<loaders::LoaderVersionInfo>> {
    guard(async move {
        let loader = LoaderType::parse(&loader_type)
            .ok_or_else(|| LauncherError::Internal(format!("unknown loader type {loader_type}")))?;
        loaders::list_loader_versions(loader, &mc_version, include_beta).await
    })
    .await
}

#[tauri::command]
async fn find_loader_candidates(instance_id: String, loader: String) -> Result<Vec<String>> {
    guard(async move {
        let loader = LoaderType::parse(&loader)
            .ok_or_else(|| LauncherError::Internal(format!("unknown loader type {loader}")))?;
        let target = instances::get(&instance_id).await?;
        modrinth::find_loader_candidates(&target.mc_version, loader).await
    })
    .await
}

#[tauri::command]
async fn download_loader_version(app: tauri::AppHandle, instance_id: String, project_id: String, version_id: String) -> Result<()> {
    let _install_guard = install_lock::acquire(&instance_id)?;
    let _cancel_guard = cancellation::guard(&instance_id);
    guard(async move {
        modrinth::install_mod(&instance_id, &project_id, Some(&version_id)).await?;
        let _ = app.emit(
            "loader-installed",
            serde_json::json!({ "instance_id": instance_id, "project_id": project_id, "version_id": version_id }),
        );
        Ok(())
    })
    .await
}

#[tauri::command]
async fn search_projects(query: String, project_type: String) -> Result<modrinth::ModrinthSearchResult> {
    guard(async move { modrinth::search(&query, &project_type, 20).await }).await
}

#[tauri::command]
async fn get_project_versions(project_id: String) -> Result<Vec<modrinth::ModrinthVersion>> {
    guard(async move { modrinth::project_versions(&project_id).await }).await
}

#[tauri::command]
async fn get_compatible_mod_versions(instance_id: String, project_id: String) -> Result<Vec<modrinth::ModrinthVersion>> {
    guard(async move { modrinth::compatible_mod_versions(&instance_id, &project_id).await }).await
}

#[tauri::command]
async fn get_popular_mods(limit: u32) -> Result<modrinth::ModrinthSearchResult> {
    guard(async move { modrinth::get_popular("mod", limit).await }).await
}

#[tauri::command]
async fn install_modrinth_mod(instance_id: String, project_id: String, version_id: Option<String>) -> Result<()> {
    let _install_guard = install_lock::acquire(&instance_id)?;
    let _cancel_guard = cancellation::guard(&instance_id);
    guard(async move { modrinth::install_mod(&instance_id, &project_id, version_id.as_deref()).await }).await
}

#[tauri::command]
async fn install_modpack_version(app: tauri::AppHandle, name: String, version_id: String) -> Result<Instance> {
    let _install_guard = install_lock::acquire(&name)?;
    let _cancel_guard = cancellation::guard(&name);
    guard(async move {
        let instance = modrinth::install_modpack_version(&name, &version_id).await?;
        if let Some(loader) = instance.loader {
            let _ = app.emit("modpack-loader-detected", loader.as_str());
            let _ = app.emit(
                "loader-installed",
                serde_json::json!({
                    "instance_id": instance.id,
                    "project_id": loader.as_str(),
                    "version_id": instance.loader_version.clone().unwrap_or_default(),
                }),
            );
        }
        Ok(instance)
    })
    .await
}

#[tauri::command]
async fn list_instance_mods(instance_id: String) -> Result<Vec<mods::ModEntry>> {
    guard(async move { mods::list_mods(&instance_id).await }).await
}

#[tauri::command]
async fn toggle_mod(instance_id: String, filename: String, enabled: bool) -> Result<()> {
    guard(async move { mods::toggle_mod(&instance_id, &filename, enabled).await }).await
}

#[tauri::command]
async fn remove_mod(instance_id: String, filename: String) -> Result<()> {
    guard(async move { mods::remove_mod(&instance_id, &filename).await }).await
}

#[tauri::command]
async fn check_mod_updates(instance_id: String) -> Result<Vec<mods::ModUpdateStatus>> {
    guard(async move { mods::check_updates(&instance_id).await }).await
}

#[tauri::command]
async fn launch_instance(app: tauri::AppHandle, instance_id: String, child_map: tauri::State<'_, ChildMap>) -> Result<()> {
    let children = child_map.inner().clone();
    guard(async move {
        let mut instance = instances::get(&instance_id).await?;
        let current_settings = settings::load().await?;

        let app_for_logs = app.clone();
        let log_sink: launcher::LogSink = std::sync::Arc::new(move |id: &str, message: &str| {
            let _ = app_for_logs.emit(
                "instance-log",
                serde_json::json!({ "instance_id": id, "message": message }),
            );
        });

        let app_for_state = app.clone();
        let state_sink: launcher::StateSink = std::sync::Arc::new(move |instance: &Instance| {
            let _ = app_for_state.emit("instance-state-changed", instance);
        });

        let launch_handle = launcher::launch(&mut instance, &current_settings, log_sink, state_sink.clone(), children.clone()).await?;
        tokio::spawn(launcher::supervise(instance.id.clone(), launch_handle, children, state_sink));
        Ok(())
    })
    .await
}

#[tauri::command]
async fn kill_instance(instance_id: String, child_map: tauri::State<'_, ChildMap>) -> Result<()> {
    let children = child_map.inner().clone();
    guard(async move { launcher::kill_instance(&instance_id, children).await }).await
}

#[derive(serde::Serialize)]
struct JavaCompatibility {
    compatible: bool,
    actual_version: u32,
    required_version: u32,
    path: String,
}

#[tauri::command]
async fn check_java_compatibility(instance_id: String) -> Result<JavaCompatibility> {
    guard(async move {
        let instance = instances::get(&instance_id).await?;
        let current_settings = settings::load().await?;
        let effective = VersionResolver::resolve(&instance.version).await?;
        let java_path = java::resolve_java_path(
            instance.java_path_override.as_deref(),
            current_settings.global_java_path.as_deref(),
        );
        let required_version = effective.required_java_major(&instance.mc_version);
        let actual_version = java::probe_java_major(&java_path).await?;
        Ok(JavaCompatibility {
            compatible: actual_version == required_version,
            actual_version,
            required_version,
            path: java_path.to_string_lossy().to_string(),
        })
    })
    .await
}

#[tauri::command]
async fn get_settings() -> Result<beacon_core::Settings> {
    guard(settings::load()).await
}

#[tauri::command]
async fn save_settings(settings: beacon_core::Settings) -> Result<()> {
    guard(async move { self::settings::save(&settings).await }).await
}

#[tauri::command]
async fn list_instance_screenshots(instance_id: String) -> Result<Vec<String>> {
    guard(async move { maintenance::list_instance_screenshots(&instance_id).await }).await
}

#[tauri::command]
async fn list_instance_worlds(instance_id: String) -> Result<Vec<String>> {
    guard(async move { maintenance::list_instance_worlds(&instance_id).await }).await
}

#[tauri::command]
async fn list_instance_servers(instance_id: String) -> Result<Vec<beacon_core::ServerListEntry>> {
    guard(async move { maintenance::list_instance_servers(&instance_id).await }).await
}

#[tauri::command]
async fn get_instance_crash_logs(instance_id: String) -> Result<Vec<String>> {
    guard(async move { maintenance::get_instance_crash_logs(&instance_id).await }).await
}

#[tauri::command]
async fn clear_instance_logs(instance_id: String) -> Result<()> {
    guard(async move { maintenance::clear_instance_logs(&instance_id).await }).await
}

#[tauri::command]
async fn get_system_info() -> Result<maintenance::SystemInfo> {
    guard(async { Ok(maintenance::get_system_info()) }).await
}

#[tauri::command]
async fn get_cleanup_info() -> Result<maintenance::CleanupInfo> {
    guard(maintenance::get_cleanup_info()).await
}

#[tauri::command]
async fn cleanup_unused_versions() -> Result<u64> {
    guard(maintenance::cleanup_unused_versions()).await
}

#[tauri::command]
async fn clear_asset_cache() -> Result<u64> {
    guard(maintenance::clear_asset_cache()).await
}

#[tauri::command]
async fn open_path(app: tauri::AppHandle, path: String) -> Result<()> {
    use tauri_plugin_opener::OpenerExt;
    app.opener()
        .open_path(path, None::<&str>)
        .map_err(|e| LauncherError::Filesystem(e.to_string()))
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .manage(launcher::new_child_map())
        .setup(|app| {
            let base_dir = app
                .path()
                .app_data_dir()
                .map_err(|e| format!("failed to resolve app data directory: {e}"))?;
            std::fs::create_dir_all(&base_dir).map_err(|e| e.to_string())?;
            paths::init_paths(base_dir.clone()).map_err(|e| e.to_string())?;

            let _ = APP_HANDLE.set(app.handle().clone());
            setup_logging(&base_dir);

            log::info!("data root: {:?}", base_dir);
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            get_version_manifest,
            list_instances,
            create_instance,
            save_instance,
            delete_instance,
            check_version_usage,
            download_version,
            cancel_install,
            install_loader,
            get_loader_versions,
            find_loader_candidates,
            download_loader_version,
            search_projects,
            get_project_versions,
            get_compatible_mod_versions,
            get_popular_mods,
            install_modrinth_mod,
            install_modpack_version,
            list_instance_mods,
            toggle_mod,
            remove_mod,
            check_mod_updates,
            launch_instance,
            kill_instance,
            check_java_compatibility,
            get_settings,
            save_settings,
            list_instance_screenshots,
            list_instance_worlds,
            list_instance_servers,
            get_instance_crash_logs,
            clear_instance_logs,
            get_system_info,
            get_cleanup_info,
            cleanup_unused_versions,
            clear_asset_cache,
            open_path,
        ])
        .run(tauri::generate_context!())
        .expect("error while running beacon launcher");
}
