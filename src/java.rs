//! Java discovery and compatibility probing for C10 step 2.

use beacon_core::{LauncherError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::timeout;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Resolves the Java executable to launch with, in priority order: an
/// instance-level override, the global setting, `JAVA_HOME`, then `java` on
/// `PATH`.
pub fn resolve_java_path(
    instance_override: Option<&str>,
    global_path: Option<&str>,
) -> PathBuf {
    if let Some(p) = instance_override {
        return PathBuf::from(p);
    }
    if let Some(p) = global_path {
        return PathBuf::from(p);
    }
    if let Ok(java_home) = std::env::var("JAVA_HOME") {
        let candidate = if cfg!(windows) {
            PathBuf::from(&java_home).join("bin/java.exe")
        } else {
            PathBuf::from(&java_home).join("bin/java")
        };
        if candidate.exists() {
            return candidate;
        }
    }
    PathBuf::from("java")
}

/// Runs `<java_path> -version` with a 3 s timeout and parses the major
/// version out of stderr (`java version "1.8.0_xxx"` or `openjdk version
/// "17.0.1"`).
pub async fn probe_java_major(java_path: &Path) -> Result<u32> {
    let path = java_path.to_path_buf();
    let run = async move {
        tokio::process::Command::new(&path)
            .arg("-version")
            .output()
            .await
    };

    let output = timeout(PROBE_TIMEOUT, run)
        .await
        .map_err(|_| LauncherError::Internal(format!("java probe timed out: {}", java_path.display())))?
        .map_err(|e| LauncherError::Internal(format!("failed to run java: {e}")))?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    parse_major_version(&stderr)
        .ok_or_else(|| LauncherError::Internal(format!("could not parse java version from: {stderr}")))
}

fn parse_major_version(stderr: &str) -> Option<u32> {
    for line in stderr.lines() {
        if line.contains("version") {
            let version = line.split('"').nth(1)?;
            let first = version.split('.').next()?;
            // "1.8.0_392" style reports major as the second component.
            if first == "1" {
                return version.split('.').nth(1)?.parse().ok();
            }
            return first.split('-').next()?.parse().ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_legacy_1_8_style() {
        assert_eq!(
            parse_major_version("java version \"1.8.0_392\"\nJava(TM) SE Runtime Environment"),
            Some(8)
        );
    }

    #[test]
    fn parses_modern_style() {
        assert_eq!(
            parse_major_version("openjdk version \"17.0.9\" 2023-10-17"),
            Some(17)
        );
        assert_eq!(
            parse_major_version("openjdk version \"21\" 2023-09-19"),
            Some(21)
        );
    }
}
