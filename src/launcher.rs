//! Launcher & Supervisor (C10): argv construction, process spawn, log
//! forwarding, exit handling and crash classification.

use crate::assets;
use crate::java;
use crate::libraries;
use crate::paths;
use crate::version::{check_rules, ArgumentValue, ArgumentValueType, EffectiveVersion, VersionResolver};
use beacon_core::{CrashCategory, Instance, InstanceState, LauncherError, Result};
use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::Mutex;

/// Single synchronized map of running child processes, keyed by instance
/// id. Per spec §5 it is the only shared mutable state in the supervisor:
/// the launcher inserts on spawn and removes on exit, `kill_instance` only
/// looks processes up.
pub type ChildMap = Arc<Mutex<HashMap<String, Child>>>;

pub fn new_child_map() -> ChildMap {
    Arc::new(Mutex::new(HashMap::new()))
}

const LOG_RING_CAPACITY: usize = 10_000;
const KILL_GRACE: Duration = Duration::from_secs(5);

pub type LogSink = Arc<dyn Fn(&str, &str) + Send + Sync>;
pub type StateSink = Arc<dyn Fn(&Instance) + Send + Sync>;

/// Fails on any `${...}` placeholder left unresolved after substitution,
/// correcting a model where unknown placeholders are silently dropped.
fn substitute(template: &str, vars: &HashMap<&str, String>) -> Result<String> {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("${{{key}}}"), value);
    }
    if let (Some(start), Some(end)) = (out.find("${"), out.find('}')) {
        if start < end {
            return Err(LauncherError::Internal(format!(
                "unresolved argument placeholder in: {out}"
            )));
        }
    }
    Ok(out)
}

fn flatten_arguments(values: &[ArgumentValue], os: &str, arch: &str) -> Vec<String> {
    let mut out = Vec::new();
    for value in values {
        match value {
            ArgumentValue::Plain(s) => out.push(s.clone()),
            ArgumentValue::Conditional(obj) => {
                if check_rules(&obj.rules, os, arch) {
                    match &obj.value {
                        ArgumentValueType::Single(s) => out.push(s.clone()),
                        ArgumentValueType::Many(v) => out.extend(v.clone()),
                    }
                }
            }
        }
    }
    out
}

/// Mojang's `nameUUIDFromBytes`: MD5 the raw bytes, then stamp version 3
/// and RFC 4122 variant bits onto the digest directly (not a namespaced
/// UUIDv3, which additionally hashes a namespace UUID in front).
fn offline_uuid(username: &str) -> uuid::Uuid {
    let digest = md5::compute(format!("OfflinePlayer:{username}"));
    uuid::Builder::from_bytes(digest.0)
        .with_variant(uuid::Variant::RFC4122)
        .with_version(uuid::Version::Md5)
        .into_uuid()
}

struct LaunchArgs {
    java_path: std::path::PathBuf,
    argv: Vec<String>,
}

fn build_argv(
    effective: &EffectiveVersion,
    instance: &Instance,
    java_path: std::path::PathBuf,
    username: &str,
    min_memory: u32,
    max_memory: u32,
) -> Result<LaunchArgs> {
    let os = libraries::current_os();
    let arch = libraries::current_arch();

    let client_jar = paths::version_jar_path(&effective.id);
    let classpath = libraries::resolve_classpath(effective, &client_jar);
    let separator = if cfg!(windows) { ";" } else { ":" };
    let classpath_str = classpath
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join(separator);

    let natives_dir = paths::instance_natives_dir(&instance.id);
    let minecraft_dir = paths::instance_minecraft_dir(&instance.id);
    let assets_dir = paths::assets_dir();
    let assets_index_name = effective.asset_index.as_ref().map(|a| a.id.clone()).unwrap_or_default();

    let uuid = offline_uuid(username);
    let access_token = uuid.simple().to_string();

    let mut jvm_vars = HashMap::new();
    jvm_vars.insert("natives_directory", natives_dir.to_string_lossy().to_string());
    jvm_vars.insert("launcher_name", "beacon".to_string());
    jvm_vars.insert("launcher_version", env!("CARGO_PKG_VERSION").to_string());
    jvm_vars.insert("classpath", classpath_str.clone());

    let mut game_vars = HashMap::new();
    game_vars.insert("auth_player_name", username.to_string());
    game_vars.insert("version_name", effective.id.clone());
    game_vars.insert("game_directory", minecraft_dir.to_string_lossy().to_string());
    game_vars.insert("assets_root", assets_dir.to_string_lossy().to_string());
    game_vars.insert("assets_index_name", assets_index_name);
    game_vars.insert("auth_uuid", uuid.to_string());
    game_vars.insert("auth_access_token", access_token);
    game_vars.insert("user_type", "legacy".to_string());
    game_vars.insert("version_type", "release".to_string());

    let mut argv = Vec::new();

    if let Some(arguments) = &effective.arguments {
        for raw in flatten_arguments(&arguments.jvm, os, arch) {
            argv.push(substitute(&raw, &jvm_vars)?);
        }
    } else {
        argv.push(format!("-Djava.library.path={}", natives_dir.display()));
        argv.push("-cp".to_string());
        argv.push(classpath_str.clone());
    }

    argv.push(format!("-Xms{min_memory}m"));
    argv.push(format!("-Xmx{max_memory}m"));

    if let Some(java_args) = &instance.java_args {
        argv.extend(java_args.split_whitespace().map(String::from));
    }

    argv.push(effective.main_class.clone());

    if let Some(arguments) = &effective.arguments {
        for raw in flatten_arguments(&arguments.game, os, arch) {
            argv.push(substitute(&raw, &game_vars)?);
        }
    } else if let Some(legacy) = &effective.minecraft_arguments {
        for raw in legacy.split_whitespace() {
            argv.push(substitute(raw, &game_vars)?);
        }
    }

    Ok(LaunchArgs { java_path, argv })
}

/// Everything [`supervise`] needs once [`launch`] has returned control to
/// the caller: the process start time (for playtime accounting) and the
/// stdout/stderr reader tasks that must finish flushing `last-launch.log`
/// before the post-exit crash tail is read.
pub struct LaunchHandle {
    pub start: Instant,
    log_readers: Vec<tokio::task::JoinHandle<()>>,
}

/// Runs the full install-then-launch algorithm from spec §4.10 steps 1-4.
/// Returns a [`LaunchHandle`] for the caller to hand to [`supervise`].
pub async fn launch(
    instance: &mut Instance,
    settings: &beacon_core::Settings,
    log_sink: LogSink,
    state_sink: StateSink,
    child_map: ChildMap,
) -> Result<LaunchHandle> {
    *instance = transition_and_persist(instance, InstanceState::Installing, &state_sink).await?;

    let effective = VersionResolver::resolve(&instance.version).await?;
    VersionResolver::ensure_client_jar(&effective).await?;
    libraries::install_libraries_and_natives(&effective, &instance.id).await?;
    assets::ensure_assets(&effective, &instance.id, None).await?;

    let java_path = java::resolve_java_path(
        instance.java_path_override.as_deref(),
        settings.global_java_path.as_deref(),
    );
    if !settings.skip_java_check && !instance.java_warning_ignored {
        let required = effective.required_java_major(&instance.mc_version);
        let actual = java::probe_java_major(&java_path).await?;
        if actual != required {
            transition_and_persist(instance, InstanceState::Ready, &state_sink).await?;
            return Err(LauncherError::JavaIncompatible {
                actual,
                required,
                path: java_path.to_string_lossy().to_string(),
            });
        }
    }

    let username = "Player".to_string();
    let min_memory = instance.min_memory.unwrap_or(settings.min_memory);
    let max_memory = instance.max_memory.unwrap_or(settings.max_memory);
    let launch_args = build_argv(&effective, instance, java_path, &username, min_memory, max_memory)?;

    let minecraft_dir = paths::instance_minecraft_dir(&instance.id);
    tokio::fs::create_dir_all(&minecraft_dir).await?;

    let mut command = tokio::process::Command::new(&launch_args.java_path);
    command
        .args(&launch_args.argv)
        .current_dir(&minecraft_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let start = Instant::now();
    let mut child = command.spawn().map_err(|e| LauncherError::Internal(format!("spawn failed: {e}")))?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    *instance = transition_and_persist(instance, InstanceState::Running, &state_sink).await?;
    instance.last_played = Some(chrono::Utc::now());

    let instance_id = instance.id.clone();
    child_map.lock().await.insert(instance_id.clone(), child);

    let ring = Arc::new(Mutex::new(VecDeque::<String>::with_capacity(LOG_RING_CAPACITY)));
    let log_readers = vec![
        spawn_log_reader(instance_id.clone(), stdout, ring.clone(), log_sink.clone()),
        spawn_log_reader(instance_id.clone(), stderr, ring.clone(), log_sink.clone()),
    ]
    .into_iter()
    .flatten()
    .collect();

    Ok(LaunchHandle { start, log_readers })
}

fn spawn_log_reader(
    instance_id: String,
    pipe: Option<impl tokio::io::AsyncRead + Unpin + Send + 'static>,
    ring: Arc<Mutex<VecDeque<String>>>,
    sink: LogSink,
) -> Option<tokio::task::JoinHandle<()>> {
    let pipe = pipe?;
    Some(tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            sink(&instance_id, &line);
            let mut buf = ring.lock().await;
            if buf.len() == LOG_RING_CAPACITY {
                buf.pop_front();
            }
            buf.push_back(line);
        }
        let log_path = paths::instance_last_launch_log(&instance_id);
        if let Some(parent) = log_path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let buf = ring.lock().await;
        let contents: String = buf.iter().cloned().collect::<Vec<_>>().join("\n");
        let _ = tokio::fs::write(&log_path, contents).await;
    }))
}

/// Waits for `instance_id`'s child to exit, then applies spec §4.10 steps
/// 6-7: state transition, crash file, playtime accumulation.
///
/// `log_readers` must be the stdout/stderr reader tasks started by
/// [`launch`] for this same process; they are joined before the crash tail
/// is read off disk so `last-launch.log` can't be read mid-flush (a reader
/// only hits EOF, and so only writes the file, once the process's pipes
/// close — which races this function's own `child.wait()`).
pub async fn await_exit(
    instance_id: &str,
    start: Instant,
    killed: bool,
    child_map: ChildMap,
    log_readers: Vec<tokio::task::JoinHandle<()>>,
) -> Result<(InstanceState, Option<String>)> {
    let mut child = child_map
        .lock()
        .await
        .remove(instance_id)
        .ok_or_else(|| LauncherError::NotFound(format!("no running process for {instance_id}")))?;

    let status = child.wait().await?;
    let elapsed_minutes = start.elapsed().as_secs_f64() / 60.0;

    for reader in log_readers {
        let _ = reader.await;
    }

    let clean = killed || status.success();
    if clean {
        return Ok((InstanceState::Ready, None));
    }

    let log_path = paths::instance_last_launch_log(instance_id);
    let tail = tokio::fs::read_to_string(&log_path).await.unwrap_or_default();
    let category = classify_crash(&tail);

    let crash_path = paths::instance_crashes_dir(instance_id).join(format!("{}.txt", chrono::Utc::now().timestamp()));
    if let Some(parent) = crash_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let header = format!(
        "beacon crash report\ninstance: {instance_id}\nplaytime this session: {:.1} min\ncategory: {}\n\n",
        elapsed_minutes,
        category.label()
    );
    tokio::fs::write(&crash_path, format!("{header}{tail}")).await?;

    Ok((InstanceState::Crashed, Some(category.label().to_string())))
}

fn classify_crash(log_tail: &str) -> CrashCategory {
    if log_tail.contains("OutOfMemoryError") {
        return CrashCategory::Memory;
    }
    if log_tail.contains("UnsupportedClassVersionError") || log_tail.contains("has been compiled by a more recent version") {
        return CrashCategory::JavaVersion;
    }
    if log_tail.contains("Incompatible mods found") {
        return CrashCategory::ModConflict;
    }
    if log_tail.contains("net.fabricmc.loader") {
        return CrashCategory::LoaderIssue;
    }
    CrashCategory::Unknown
}

/// SIGTERM, wait up to 5 s, then SIGKILL. Treated as a clean exit by the
/// caller — `await_exit` is told `killed = true`.
pub async fn kill_instance(instance_id: &str, child_map: ChildMap) -> Result<()> {
    let mut guard = child_map.lock().await;
    let child = guard
        .get_mut(instance_id)
        .ok_or_else(|| LauncherError::NotFound(format!("no running process for {instance_id}")))?;

    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe {
                libc_kill(pid as i32, 15);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }
    drop(guard);

    let graceful = tokio::time::timeout(KILL_GRACE, async {
        loop {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let mut guard = child_map.lock().await;
            if let Some(child) = guard.get_mut(instance_id) {
                if child.try_wait().ok().flatten().is_some() {
                    return;
                }
            } else {
                return;
            }
        }
    })
    .await;

    if graceful.is_err() {
        let mut guard = child_map.lock().await;
        if let Some(child) = guard.get_mut(instance_id) {
            let _ = child.start_kill();
        }
    }

    Ok(())
}

#[cfg(unix)]
unsafe fn libc_kill(pid: i32, signal: i32) {
    extern "C" {
        fn kill(pid: i32, sig: i32) -> i32;
    }
    kill(pid, signal);
}

async fn transition_and_persist(instance: &Instance, next: InstanceState, state_sink: &StateSink) -> Result<Instance> {
    let updated = crate::instances::transition(&instance.id, next).await?;
    state_sink(&updated);
    Ok(updated)
}

/// Waits for the launched process to exit (spec §4.10 steps 6-7), then
/// persists the resulting `ready`/`crashed` state and notifies `state_sink`.
/// Meant to be driven from a detached task started right after [`launch`]
/// returns, so the command that triggered the launch can return immediately.
pub async fn supervise(instance_id: String, launch_handle: LaunchHandle, child_map: ChildMap, state_sink: StateSink) {
    let LaunchHandle { start, log_readers } = launch_handle;
    let (next_state, crash_category) = match await_exit(&instance_id, start, false, child_map, log_readers).await {
        Ok(result) => result,
        Err(e) => {
            log::error!("failed to await exit of {instance_id}: {e}");
            return;
        }
    };

    match crate::instances::transition(&instance_id, next_state).await {
        Ok(mut updated) => {
            if let Some(category) = crash_category {
                updated.last_crash = Some(category);
                if let Err(e) = crate::instances::save(&updated).await {
                    log::error!("failed to persist crash category for {instance_id}: {e}");
                }
            }
            state_sink(&updated);
        }
        Err(e) => log::error!("failed to persist post-launch state for {instance_id}: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_fills_known_placeholders() {
        let mut vars = HashMap::new();
        vars.insert("auth_player_name", "Steve".to_string());
        assert_eq!(substitute("--username ${auth_player_name}", &vars).unwrap(), "--username Steve");
    }

    #[test]
    fn substitute_rejects_unresolved_placeholder() {
        let vars = HashMap::new();
        assert!(substitute("${unknown_var}", &vars).is_err());
    }

    #[test]
    fn offline_uuid_is_deterministic() {
        assert_eq!(offline_uuid("Steve"), offline_uuid("Steve"));
        assert_ne!(offline_uuid("Steve"), offline_uuid("Alex"));
    }

    #[test]
    fn classify_crash_detects_oom() {
        assert_eq!(classify_crash("java.lang.OutOfMemoryError: Java heap space"), CrashCategory::Memory);
    }

    #[test]
    fn classify_crash_detects_java_version_mismatch() {
        assert_eq!(
            classify_crash("has been compiled by a more recent version of the Java Runtime"),
            CrashCategory::JavaVersion
        );
    }

    #[test]
    fn classify_crash_defaults_to_unknown() {
        assert_eq!(classify_crash("some unrelated log line"), CrashCategory::Unknown);
    }
}
