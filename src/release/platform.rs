use std::fmt;

use serde::{Deserialize, Serialize};

/// Operating system names as they appear in frp asset names.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Darwin,
    Linux,
    Freebsd,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Darwin => "darwin",
            Self::Linux => "linux",
            Self::Freebsd => "freebsd",
        }
    }

    pub fn archive_extension(self) -> &'static str {
        match self {
            Self::Windows => "zip",
            _ => "tar.gz",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn host_platform() -> Platform {
    if cfg!(target_os = "windows") {
        Platform::Windows
    } else if cfg!(target_os = "macos") {
        Platform::Darwin
    } else if cfg!(target_os = "freebsd") {
        Platform::Freebsd
    } else {
        Platform::Linux
    }
}

pub fn host_arch() -> String {
    normalize_arch(std::env::consts::ARCH)
}

/// Maps the many spellings of a CPU architecture onto frp's asset names.
pub fn normalize_arch(arch: &str) -> String {
    match arch.trim().to_ascii_lowercase().as_str() {
        "x86_64" | "x64" | "amd64" => "amd64".to_string(),
        "aarch64" | "arm64" => "arm64".to_string(),
        "x86" | "i386" | "i686" | "ia32" => "386".to_string(),
        "arm" | "armv7" | "armv7l" => "arm".to_string(),
        other => other.to_string(),
    }
}

/// `frp_{version}_{platform}_{arch}.{ext}` for a release tag like `v0.50.0`.
pub fn resolve_asset_name(tag: &str, platform: Platform, arch: &str) -> String {
    let version = tag.trim().trim_start_matches('v');
    format!(
        "frp_{version}_{platform}_{}.{}",
        normalize_arch(arch),
        platform.archive_extension()
    )
}

/// `(major, minor, patch)` of `vX.Y.Z` or `X.Y.Z`.
pub fn parse_version(tag: &str) -> Option<(u64, u64, u64)> {
    let trimmed = tag.trim();
    let numbers = trimmed.strip_prefix('v').unwrap_or(trimmed);
    let mut parts = numbers.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}

pub fn normalize_version(tag: &str) -> Option<String> {
    parse_version(tag).map(|(major, minor, patch)| format!("v{major}.{minor}.{patch}"))
}

/// Version encoded in an asset file name such as `frp_0.50.0_linux_amd64.tar.gz`.
pub fn version_from_asset_name(name: &str) -> Option<String> {
    let rest = name.strip_prefix("frp_")?;
    normalize_version(rest.split('_').next()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_asset_name() {
        assert_eq!(
            resolve_asset_name("v0.50.0", Platform::Linux, "x86_64"),
            "frp_0.50.0_linux_amd64.tar.gz"
        );
        assert_eq!(
            resolve_asset_name("v0.61.1", Platform::Windows, "x64"),
            "frp_0.61.1_windows_amd64.zip"
        );
        assert_eq!(
            resolve_asset_name("0.61.1", Platform::Darwin, "aarch64"),
            "frp_0.61.1_darwin_arm64.tar.gz"
        );
    }

    #[test]
    fn test_normalize_arch() {
        assert_eq!(normalize_arch("ia32"), "386");
        assert_eq!(normalize_arch("i686"), "386");
        assert_eq!(normalize_arch("armv7"), "arm");
        assert_eq!(normalize_arch("riscv64"), "riscv64");
    }

    #[test]
    fn test_version_parsing() {
        assert_eq!(parse_version("v1.10.2"), Some((1, 10, 2)));
        assert_eq!(parse_version("0.5.0"), Some((0, 5, 0)));
        assert_eq!(parse_version("v1.2"), None);
        assert_eq!(parse_version("v1.2.3.4"), None);
        assert_eq!(parse_version("latest"), None);
        assert_eq!(
            version_from_asset_name("frp_0.50.0_linux_amd64.tar.gz").as_deref(),
            Some("v0.50.0")
        );
        assert_eq!(version_from_asset_name("frpc.tar.gz"), None);
    }
}
