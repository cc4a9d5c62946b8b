//! Library & Native Installer (C5): rule evaluation, download, native
//! extraction and classpath construction.

use crate::cancellation;
use crate::http;
use crate::paths;
use crate::version::{check_rules, EffectiveVersion, Library};
use beacon_core::Result;
use std::path::PathBuf;

pub fn current_os() -> &'static str {
    if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "osx"
    } else {
        "linux"
    }
}

pub fn current_arch() -> &'static str {
    if cfg!(target_arch = "x86_64") {
        "x86_64"
    } else if cfg!(target_arch = "x86") {
        "x86"
    } else if cfg!(target_arch = "aarch64") {
        "arm64"
    } else {
        "unknown"
    }
}

fn allowed_libraries<'a>(effective: &'a EffectiveVersion, os: &str, arch: &str) -> Vec<&'a Library> {
    effective
        .libraries
        .iter()
        .filter(|lib| match &lib.rules {
            Some(rules) => check_rules(rules, os, arch),
            None => true,
        })
        .collect()
}

/// Downloads every allowed library's main artifact plus — for libraries
/// carrying a `natives` classifier for the current OS — its native JAR,
/// extracting it (minus `META-INF/`) into the instance's `natives/` dir.
/// The natives directory is wiped first, per spec §4.5 ("defeat stale native
/// libraries").
pub async fn install_libraries_and_natives(effective: &EffectiveVersion, instance_id: &str) -> Result<()> {
    let os = current_os();
    let arch = current_arch();
    let libs = allowed_libraries(effective, os, arch);

    let natives_dir = paths::instance_natives_dir(instance_id);
    if natives_dir.exists() {
        tokio::fs::remove_dir_all(&natives_dir).await?;
    }
    tokio::fs::create_dir_all(&natives_dir).await?;

    for lib in &libs {
        cancellation::ensure_not_cancelled(instance_id)?;

        if let Some(artifact) = &lib.downloads.artifact {
            let dest = paths::libraries_dir().join(&artifact.path);
            http::download_cancellable(
                &artifact.url,
                &dest,
                http::Expected {
                    sha1: Some(&artifact.sha1),
                    size: Some(artifact.size),
                },
                Some(instance_id),
            )
            .await?;
        }

        if let Some(natives) = &lib.natives {
            if let Some(classifier_template) = natives.get(os) {
                let classifier = classifier_template.replace("${arch}", if arch == "x86" { "32" } else { "64" });
                if let Some(artifact) = lib.downloads.classifiers.get(&classifier) {
                    let jar_dest = paths::libraries_dir().join(&artifact.path);
                    http::download_cancellable(
                        &artifact.url,
                        &jar_dest,
                        http::Expected {
                            sha1: Some(&artifact.sha1),
                            size: Some(artifact.size),
                        },
                        Some(instance_id),
                    )
                    .await?;
                    let natives_dir = natives_dir.clone();
                    tokio::task::spawn_blocking(move || {
                        paths::unzip_into(jar_dest, natives_dir, true)
                    })
                    .await??;
                }
            }
        }
    }

    Ok(())
}

/// Builds the ordered classpath: one entry per allowed library (already
/// deduped by coordinate in `EffectiveVersion`), plus the client JAR last.
pub fn resolve_classpath(effective: &EffectiveVersion, client_jar: &PathBuf) -> Vec<PathBuf> {
    let os = current_os();
    let arch = current_arch();
    let mut entries: Vec<PathBuf> = allowed_libraries(effective, os, arch)
        .into_iter()
        .filter_map(|lib| lib.downloads.artifact.as_ref())
        .map(|artifact| paths::libraries_dir().join(&artifact.path))
        .collect();
    entries.push(client_jar.clone());
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::{Artifact, LibraryDownloads, OsRule, Rule, RuleAction};
    use std::collections::HashMap;

    fn version_with(libs: Vec<Library>) -> EffectiveVersion {
        EffectiveVersion {
            id: "test".into(),
            assets: None,
            asset_index: None,
            downloads: None,
            libraries: libs,
            main_class: "net.minecraft.client.main.Main".into(),
            minecraft_arguments: None,
            arguments: None,
            java_version: None,
        }
    }

    fn artifact(path: &str) -> Artifact {
        Artifact {
            path: path.into(),
            url: format!("https://libraries.minecraft.net/{path}"),
            sha1: "0".repeat(40),
            size: 1,
        }
    }

    #[test]
    fn classpath_excludes_os_denied_libraries() {
        let mut linux_only = Library {
            name: "org.lwjgl:lwjgl:3.3.1".into(),
            downloads: LibraryDownloads {
                artifact: Some(artifact("org/lwjgl/lwjgl/3.3.1/lwjgl-3.3.1.jar")),
                classifiers: HashMap::new(),
            },
            rules: Some(vec![Rule {
                action: RuleAction::Allow,
                os: Some(OsRule {
                    name: Some("linux".into()),
                    arch: None,
                    version: None,
                }),
            }]),
            natives: None,
        };
        linux_only.rules.as_mut().unwrap()[0].action = RuleAction::Allow;

        let effective = version_with(vec![linux_only]);
        let cp = resolve_classpath(&effective, &PathBuf::from("client.jar"));
        if current_os() == "linux" {
            assert_eq!(cp.len(), 2);
        } else {
            assert_eq!(cp.len(), 1);
        }
    }

    #[test]
    fn classpath_appends_client_jar_last() {
        let effective = version_with(vec![Library {
            name: "com.google.guava:guava:32.1.2".into(),
            downloads: LibraryDownloads {
                artifact: Some(artifact("com/google/guava/guava/32.1.2/guava-32.1.2.jar")),
                classifiers: HashMap::new(),
            },
            rules: None,
            natives: None,
        }]);
        let client = PathBuf::from("versions/1.20.4/1.20.4.jar");
        let cp = resolve_classpath(&effective, &client);
        assert_eq!(cp.last().unwrap(), &client);
    }
}
