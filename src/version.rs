//! Version Resolver (C3): fetch/cache the Mojang version manifest, download
//! version JSON, follow `inheritsFrom`, and fold the chain into a single
//! effective version per spec §3/§4.3 and design note §9.

use crate::http;
use crate::paths;
use beacon_core::{LauncherError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const MOJANG_MANIFEST_URL: &str = "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VersionManifest {
    pub latest: LatestVersions,
    pub versions: Vec<VersionManifestEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LatestVersions {
    pub release: String,
    pub snapshot: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VersionManifestEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub version_type: String,
    pub url: String,
    #[serde(rename = "releaseTime")]
    pub release_time: String,
}

/// Raw version JSON as distributed upstream — kept field-for-field so the
/// file on disk is never rewritten, only merged in memory.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionJson {
    pub id: String,
    #[serde(rename = "type")]
    pub version_type: Option<String>,
    pub inherits_from: Option<String>,
    pub assets: Option<String>,
    pub asset_index: Option<AssetIndex>,
    pub downloads: Option<VersionDownloads>,
    #[serde(default)]
    pub libraries: Vec<Library>,
    pub main_class: Option<String>,
    pub minecraft_arguments: Option<String>,
    pub arguments: Option<Arguments>,
    pub java_version: Option<JavaVersionInfo>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JavaVersionInfo {
    #[serde(rename = "majorVersion")]
    pub major_version: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssetIndex {
    pub id: String,
    pub url: String,
    pub sha1: String,
    pub size: u64,
    #[serde(default)]
    pub total_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VersionDownloads {
    pub client: Option<DownloadInfo>,
    pub server: Option<DownloadInfo>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadInfo {
    pub url: String,
    pub sha1: String,
    pub size: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Library {
    pub name: String,
    #[serde(default)]
    pub downloads: LibraryDownloads,
    pub rules: Option<Vec<Rule>>,
    /// `{os_name: classifier}` — present on libraries that ship natives.
    pub natives: Option<HashMap<String, String>>,
}

impl Library {
    /// `groupId:artifactId` — the coordinate libraries dedupe on.
    pub fn coordinate(&self) -> &str {
        let mut parts = self.name.splitn(3, ':');
        let group = parts.next().unwrap_or_default();
        let artifact = parts.next().unwrap_or_default();
        let end = group.len() + 1 + artifact.len();
        &self.name[..end.min(self.name.len())]
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LibraryDownloads {
    pub artifact: Option<Artifact>,
    /// `{classifier: artifact}` — the native jar for each platform.
    #[serde(default)]
    pub classifiers: HashMap<String, Artifact>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Artifact {
    pub path: String,
    pub url: String,
    pub sha1: String,
    pub size: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Rule {
    pub action: RuleAction,
    pub os: Option<OsRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OsRule {
    pub name: Option<String>,
    pub arch: Option<String>,
    pub version: Option<String>,
}

/// Evaluates `rules` against `(os, arch)`: the last matching rule wins, and
/// the default with no rules (or no match) is `allow`, per spec §3.
pub fn check_rules(rules: &[Rule], os: &str, arch: &str) -> bool {
    if rules.is_empty() {
        return true;
    }
    let mut allowed = false;
    for rule in rules {
        let os_matches = match &rule.os {
            None => true,
            Some(os_rule) => {
                os_rule.name.as_deref().map_or(true, |n| n == os)
                    && os_rule.arch.as_deref().map_or(true, |a| a == arch)
            }
        };
        if os_matches {
            allowed = rule.action == RuleAction::Allow;
        }
    }
    allowed
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Arguments {
    #[serde(default)]
    pub game: Vec<ArgumentValue>,
    #[serde(default)]
    pub jvm: Vec<ArgumentValue>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ArgumentValue {
    Plain(String),
    Conditional(ArgumentObject),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArgumentObject {
    pub rules: Vec<Rule>,
    pub value: ArgumentValueType,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ArgumentValueType {
    Single(String),
    Many(Vec<String>),
}

/// The merged, in-memory result of folding a version's `inheritsFrom` chain.
/// Per design note §9 this is the single canonical record every downstream
/// component (assets, libraries, launcher) consumes.
#[derive(Debug, Clone)]
pub struct EffectiveVersion {
    pub id: String,
    pub assets: Option<String>,
    pub asset_index: Option<AssetIndex>,
    pub downloads: Option<VersionDownloads>,
    pub libraries: Vec<Library>,
    pub main_class: String,
    pub minecraft_arguments: Option<String>,
    pub arguments: Option<Arguments>,
    pub java_version: Option<JavaVersionInfo>,
}

impl EffectiveVersion {
    /// `mc_version` is the instance's actual dotted Minecraft version
    /// (e.g. `"1.20.4"`), used only as a fallback when this version JSON
    /// carries no explicit `javaVersion` block. `self.assets` is an asset
    /// index id like `"16"`, not a Minecraft version, and must not be
    /// passed here.
    pub fn required_java_major(&self, mc_version: &str) -> u32 {
        if let Some(jv) = &self.java_version {
            return jv.major_version;
        }
        required_java_for_mc(mc_version)
    }
}

/// Default Java major version by Minecraft release, used only when the
/// version JSON doesn't carry an explicit `javaVersion` (spec §4.3).
pub fn required_java_for_mc(mc_version: &str) -> u32 {
    let parts: Vec<u32> = mc_version
        .split('.')
        .filter_map(|p| p.split('-').next().unwrap_or("").parse().ok())
        .collect();
    let minor = parts.get(1).copied().unwrap_or(0);
    let patch = parts.get(2).copied().unwrap_or(0);

    if minor <= 16 {
        8
    } else if minor < 20 || (minor == 20 && patch <= 4) {
        17
    } else {
        21
    }
}

/// Folds one version JSON on top of its parent: libraries dedupe by
/// `groupId:artifactId` with the child's entry overriding the parent's,
/// argument lists concatenate parent-then-child, and scalar fields take the
/// nearest non-null value (child first, falling back to parent).
fn fold(child: VersionJson, parent: Option<EffectiveVersion>) -> EffectiveVersion {
    let parent = parent.unwrap_or(EffectiveVersion {
        id: String::new(),
        assets: None,
        asset_index: None,
        downloads: None,
        libraries: Vec::new(),
        main_class: String::new(),
        minecraft_arguments: None,
        arguments: None,
        java_version: None,
    });

    let mut libraries: Vec<Library> = Vec::new();
    let mut index_of: HashMap<String, usize> = HashMap::new();
    for lib in parent.libraries.into_iter().chain(child.libraries) {
        let coord = lib.coordinate().to_string();
        if let Some(&i) = index_of.get(&coord) {
            libraries[i] = lib;
        } else {
            index_of.insert(coord, libraries.len());
            libraries.push(lib);
        }
    }

    let arguments = match (parent.arguments, child.arguments) {
        (Some(p), Some(c)) => Some(Arguments {
            game: p.game.into_iter().chain(c.game).collect(),
            jvm: p.jvm.into_iter().chain(c.jvm).collect(),
        }),
        (None, Some(c)) => Some(c),
        (p, None) => p,
    };

    EffectiveVersion {
        id: child.id,
        assets: child.assets.or(parent.assets),
        asset_index: child.asset_index.or(parent.asset_index),
        downloads: child.downloads.or(parent.downloads),
        libraries,
        main_class: child.main_class.unwrap_or(parent.main_class),
        minecraft_arguments: child.minecraft_arguments.or(parent.minecraft_arguments),
        arguments,
        java_version: child.java_version.or(parent.java_version),
    }
}

pub struct VersionResolver;

impl VersionResolver {
    /// Returns the cached manifest from `cache/manifest.json` if present,
    /// otherwise fetches and caches it. The cache is only ever invalidated by
    /// `refresh_manifest`, never by age.
    pub async fn get_manifest() -> Result<VersionManifest> {
        let cache_path = paths::manifest_cache_path();
        if cache_path.exists() {
            let bytes = tokio::fs::read(&cache_path).await?;
            if let Ok(manifest) = serde_json::from_slice(&bytes) {
                return Ok(manifest);
            }
        }
        Self::refresh_manifest().await
    }

    pub async fn refresh_manifest() -> Result<VersionManifest> {
        let manifest: VersionManifest = http::get_json(MOJANG_MANIFEST_URL).await?;
        let bytes = serde_json::to_vec_pretty(&manifest)?;
        paths::atomic_write(paths::manifest_cache_path(), &bytes)?;
        Ok(manifest)
    }

    /// Ensures `versions/<vid>/<vid>.json` exists on disk, downloading it
    /// from the manifest entry if missing. Already-installed loader-derived
    /// versions (which have no manifest entry) are expected to already exist.
    async fn ensure_version_json(vid: &str) -> Result<VersionJson> {
        let path = paths::version_json_path(vid);
        if !path.exists() {
            let manifest = Self::get_manifest().await?;
            let entry = manifest
                .versions
                .iter()
                .find(|v| v.id == vid)
                .ok_or_else(|| LauncherError::NotFound(format!("version {vid}")))?;
            let raw: serde_json::Value = http::get_json(&entry.url).await?;
            let bytes = serde_json::to_vec_pretty(&raw)?;
            paths::atomic_write(&path, &bytes)?;
        }
        let bytes = tokio::fs::read(&path).await?;
        serde_json::from_slice(&bytes).map_err(Into::into)
    }

    /// Resolves `vid` into its fully merged effective version, recursing
    /// through `inheritsFrom`. The raw files on disk are left untouched.
    pub async fn resolve(vid: &str) -> Result<EffectiveVersion> {
        let json = Self::ensure_version_json(vid).await?;
        let parent = match &json.inherits_from {
            Some(parent_id) => Some(Box::pin(Self::resolve(parent_id)).await?),
            None => None,
        };
        Ok(fold(json, parent))
    }

    /// Downloads `<vid>.jar`, verifying its SHA-1 against the manifest.
    pub async fn ensure_client_jar(effective: &EffectiveVersion) -> Result<std::path::PathBuf> {
        let dest = paths::version_jar_path(&effective.id);
        let download = effective
            .downloads
            .as_ref()
            .and_then(|d| d.client.as_ref())
            .ok_or_else(|| LauncherError::SchemaInvalid(format!("{} has no client download", effective.id)))?;
        http::download(
            &download.url,
            &dest,
            http::Expected {
                sha1: Some(&download.sha1),
                size: Some(download.size),
            },
        )
        .await?;
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lib(name: &str) -> Library {
        Library {
            name: name.to_string(),
            downloads: LibraryDownloads::default(),
            rules: None,
            natives: None,
        }
    }

    #[test]
    fn required_java_matches_thresholds() {
        assert_eq!(required_java_for_mc("1.16.5"), 8);
        assert_eq!(required_java_for_mc("1.17"), 17);
        assert_eq!(required_java_for_mc("1.20.4"), 17);
        assert_eq!(required_java_for_mc("1.20.6"), 21);
        assert_eq!(required_java_for_mc("1.21"), 21);
    }

    #[test]
    fn required_java_major_uses_mc_version_not_asset_index_id() {
        let effective = EffectiveVersion {
            id: "fabric-loader-0.16.9-1.20.6".into(),
            assets: Some("16".into()),
            asset_index: None,
            downloads: None,
            libraries: Vec::new(),
            main_class: String::new(),
            minecraft_arguments: None,
            arguments: None,
            java_version: None,
        };
        assert_eq!(effective.required_java_major("1.20.6"), 21);
    }

    #[test]
    fn library_merge_dedupes_keeping_child() {
        let parent = EffectiveVersion {
            id: "1.20.4".into(),
            assets: None,
            asset_index: None,
            downloads: None,
            libraries: vec![lib("org.ow2.asm:asm:9.6"), lib("com.google.guava:guava:32.1.2")],
            main_class: "net.minecraft.client.main.Main".into(),
            minecraft_arguments: None,
            arguments: None,
            java_version: None,
        };
        let child = VersionJson {
            id: "fabric-loader-0.15.11-1.20.4".into(),
            version_type: None,
            inherits_from: Some("1.20.4".into()),
            assets: None,
            asset_index: None,
            downloads: None,
            libraries: vec![lib("org.ow2.asm:asm:9.7")],
            main_class: Some("net.fabricmc.loader.impl.launch.knot.KnotClient".into()),
            minecraft_arguments: None,
            arguments: None,
            java_version: None,
        };

        let merged = fold(child, Some(parent));
        assert_eq!(merged.libraries.len(), 2);
        let asm = merged
            .libraries
            .iter()
            .find(|l| l.coordinate() == "org.ow2.asm:asm")
            .unwrap();
        assert_eq!(asm.name, "org.ow2.asm:asm:9.7");
        assert_eq!(merged.main_class, "net.fabricmc.loader.impl.launch.knot.KnotClient");
    }

    #[test]
    fn rule_evaluation_last_match_wins() {
        let rules = vec![
            Rule {
                action: RuleAction::Allow,
                os: None,
            },
            Rule {
                action: RuleAction::Deny,
                os: Some(OsRule {
                    name: Some("osx".into()),
                    arch: None,
                    version: None,
                }),
            },
        ];
        assert!(check_rules(&rules, "linux", "x86_64"));
        assert!(!check_rules(&rules, "osx", "x86_64"));
    }
}
