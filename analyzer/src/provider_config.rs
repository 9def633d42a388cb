//! Writes the provider list the analyzer reads via `-provider-config`.

use std::io::{self, Write};
use std::path::Path;

use konveyor_types::ProviderRegistration;
use tempfile::NamedTempFile;

use crate::error::AnalyzerError;

/// Serialize `providers` as a JSON array of `{name, providerConfig}` to `path`.
///
/// The file is written to a temporary sibling and renamed into place, so a
/// failed write never leaves a truncated config behind.
pub fn write_provider_config(
    path: &Path,
    providers: &[ProviderRegistration],
) -> Result<(), AnalyzerError> {
    write_atomically(path, providers).map_err(|source| AnalyzerError::ProviderConfig {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), count = providers.len(), "Wrote provider config");
    Ok(())
}

fn write_atomically(path: &Path, providers: &[ProviderRegistration]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let body = serde_json::to_vec_pretty(providers).map_err(io::Error::other)?;
    let mut file = NamedTempFile::new_in(parent)?;
    file.write_all(&body)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| err.error)?;
    Ok(())
}
