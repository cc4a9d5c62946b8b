//! Small shared helpers: id generation, version comparison, filename
//! sanitisation. File hashing and atomic writes live in `paths.rs`.

use uuid::Uuid;

/// Short, URL-safe instance/operation id.
pub fn gen_short_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

pub fn parse_version(version: &str) -> Option<semver::Version> {
    if let Ok(v) = semver::Version::parse(version) {
        return Some(v);
    }
    let cleaned = version.trim_start_matches('v');
    if let Ok(v) = semver::Version::parse(cleaned) {
        return Some(v);
    }
    let parts: Vec<&str> = cleaned.split('.').collect();
    if parts.len() == 2 {
        let full = format!("{cleaned}.0");
        if let Ok(v) = semver::Version::parse(&full) {
            return Some(v);
        }
    }
    None
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;
    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }
    if unit_idx == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{size:.2} {}", UNITS[unit_idx])
    }
}

/// Strips characters that are unsafe in a file name on any of the three
/// target platforms.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gen_short_id_is_twelve_chars() {
        assert_eq!(gen_short_id().len(), 12);
    }

    #[test]
    fn format_bytes_scales_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1_048_576), "1.00 MB");
    }

    #[test]
    fn parse_version_accepts_loose_forms() {
        assert!(parse_version("1.0.0").is_some());
        assert!(parse_version("v1.0.0").is_some());
        assert!(parse_version("1.20").is_some());
    }

    #[test]
    fn sanitize_filename_strips_unsafe_chars() {
        assert_eq!(sanitize_filename("a/b:c*d"), "a_b_c_d");
    }
}
