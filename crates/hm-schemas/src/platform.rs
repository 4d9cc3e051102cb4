/// Normalized OS family for filtering. Stored platform strings are never
/// rewritten; only comparisons go through here.
pub fn platform_family(platform: &str) -> String {
    let p = platform.trim().to_ascii_lowercase();
    match p.as_str() {
        "win32" | "windows" | "win64" => "windows".to_string(),
        "darwin" | "macos" | "osx" | "mac" => "macos".to_string(),
        _ => p,
    }
}

/// True when `platform` belongs to the family named by `filter`.
pub fn platform_matches(platform: Option<&str>, filter: &str) -> bool {
    match platform {
        Some(p) => platform_family(p) == platform_family(filter),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn win32_and_windows_share_a_family() {
        assert!(platform_matches(Some("win32"), "windows"));
        assert!(platform_matches(Some("Windows"), "win32"));
        assert!(platform_matches(Some("darwin"), "macos"));
        assert!(platform_matches(Some("linux"), "LINUX"));
        assert!(!platform_matches(Some("linux"), "windows"));
        assert!(!platform_matches(None, "linux"));
    }
}
