//! Locating the packaged analyzer binary and provider bundles.
//!
//! Assets are laid out per platform under a base directory using Node-style
//! names, e.g. `assets/linux-x64/kai-analyzer-rpc` or
//! `assets/win32-arm64/kai-analyzer-rpc.exe`.

use std::io;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobMatcher};

use crate::error::AnalyzerError;

const ANALYZER_BINARY: &str = "kai-analyzer-rpc";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: &'static str,
    pub arch: &'static str,
}

impl Platform {
    #[must_use]
    pub fn current() -> Self {
        Self::from_rust(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Map Rust's `std::env::consts` names onto asset directory names.
    #[must_use]
    pub fn from_rust(os: &'static str, arch: &'static str) -> Self {
        let os = match os {
            "macos" => "darwin",
            "windows" => "win32",
            other => other,
        };
        let arch = match arch {
            "x86_64" => "x64",
            "aarch64" => "arm64",
            "x86" => "ia32",
            other => other,
        };
        Self { os, arch }
    }

    #[must_use]
    pub fn is_windows(self) -> bool {
        self.os == "win32"
    }

    #[must_use]
    pub fn dir_name(self) -> String {
        format!("{}-{}", self.os, self.arch)
    }
}

#[must_use]
pub fn analyzer_binary_name(platform: Platform) -> String {
    if platform.is_windows() {
        format!("{ANALYZER_BINARY}.exe")
    } else {
        ANALYZER_BINARY.to_string()
    }
}

/// `{base}/{platform}-{arch}/kai-analyzer-rpc[.exe]`. No existence check.
#[must_use]
pub fn analyzer_binary_path(base: &Path, platform: Platform) -> PathBuf {
    base.join(platform.dir_name())
        .join(analyzer_binary_name(platform))
}

/// Resolve the analyzer binary, failing early if it does not exist.
///
/// A configured path wins over the asset directory. A configured bare name
/// such as `kai-analyzer-rpc` is looked up on `PATH`.
pub fn resolve_analyzer_binary(
    configured: Option<&Path>,
    asset_dir: &Path,
    platform: Platform,
) -> Result<PathBuf, AnalyzerError> {
    let path = match configured {
        Some(path) if is_bare_name(path) => {
            return which::which(path).map_err(|_| AnalyzerError::BinaryNotFound {
                path: path.to_path_buf(),
            });
        }
        Some(path) => path.to_path_buf(),
        None => analyzer_binary_path(asset_dir, platform),
    };

    if path.is_file() {
        Ok(path)
    } else {
        Err(AnalyzerError::BinaryNotFound { path })
    }
}

fn is_bare_name(path: &Path) -> bool {
    path.components().count() == 1 && path.parent().is_some_and(|p| p.as_os_str().is_empty())
}

fn jar_matcher() -> io::Result<GlobMatcher> {
    Glob::new("*.jar")
        .map(|glob| glob.compile_matcher())
        .map_err(io::Error::other)
}

/// Every `*.jar` directly inside `dir`, sorted. A missing directory is empty.
pub fn bundle_jars(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };

    let matcher = jar_matcher()?;
    let mut jars = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() && matcher.is_match(entry.file_name()) {
            jars.push(entry.path());
        }
    }
    jars.sort();
    Ok(jars)
}
