//! Plugin unit discovery (spec §4.4 "Discovery rules"), condensed from
//! `plugin_host.py`'s `discover`: ignore `_`-prefixed entries, accept
//! single-file shared-library units and directory units that carry an
//! initialiser manifest.
//!
//! A Python source tree's "package directory with `__init__.py`" becomes,
//! in this realization, a directory containing `plugin.toml` naming the
//! compiled library path plus whatever data files should be folded into
//! the content hash.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use gridwatch_core::error::{GridError, GridResult};

/// One discovered plugin unit, not yet loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginUnit {
    SingleFile { name: String, path: PathBuf },
    Directory {
        name: String,
        root: PathBuf,
        files: Vec<PathBuf>,
    },
}

impl PluginUnit {
    pub fn name(&self) -> &str {
        match self {
            PluginUnit::SingleFile { name, .. } => name,
            PluginUnit::Directory { name, .. } => name,
        }
    }

    /// Path to the compiled library to hand `libloading`.
    pub fn library_path(&self) -> GridResult<PathBuf> {
        match self {
            PluginUnit::SingleFile { path, .. } => Ok(path.clone()),
            PluginUnit::Directory { root, .. } => {
                let manifest = read_manifest(root)?;
                Ok(root.join(&manifest.library))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct PluginManifest {
    library: PathBuf,
    #[serde(default)]
    data_files: Vec<PathBuf>,
}

fn read_manifest(root: &Path) -> GridResult<PluginManifest> {
    let manifest_path = root.join("plugin.toml");
    let text = std::fs::read_to_string(&manifest_path).map_err(|e| {
        GridError::PluginLoadFailed(root.display().to_string(), format!("reading plugin.toml: {e}"))
    })?;
    toml::from_str(&text).map_err(|e| {
        GridError::PluginLoadFailed(root.display().to_string(), format!("parsing plugin.toml: {e}"))
    })
}

fn is_library_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("so") | Some("dylib") | Some("dll")
    )
}

/// Scan a directory for plugin units (spec §4.4 discovery rules).
pub fn discover(plugin_dir: &Path) -> GridResult<Vec<PluginUnit>> {
    let mut units = Vec::new();
    let entries = std::fs::read_dir(plugin_dir).map_err(|e| {
        GridError::PluginLoadFailed(plugin_dir.display().to_string(), e.to_string())
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| {
            GridError::PluginLoadFailed(plugin_dir.display().to_string(), e.to_string())
        })?;
        let path = entry.path();
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy().to_string();
        let stem = name.split('.').next().unwrap_or(&name).to_string();

        if name.starts_with('_') {
            continue;
        }

        if path.is_file() && is_library_file(&path) {
            units.push(PluginUnit::SingleFile { name: stem, path });
            continue;
        }

        if path.is_dir() && path.join("plugin.toml").is_file() {
            let manifest = read_manifest(&path)?;
            let mut files = vec![path.join("plugin.toml")];
            for data_file in &manifest.data_files {
                files.push(path.join(data_file));
            }
            units.push(PluginUnit::Directory {
                name: stem,
                root: path,
                files,
            });
        }
    }

    units.sort_by(|a, b| a.name().cmp(b.name()));
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_underscore_prefixed_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("_scratch.so"), b"").unwrap();
        std::fs::write(dir.path().join("real.so"), b"").unwrap();
        let units = discover(dir.path()).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].name(), "real");
    }

    #[test]
    fn discovers_single_file_units_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lkv.so"), b"").unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"not a plugin").unwrap();
        let units = discover(dir.path()).unwrap();
        assert_eq!(units.len(), 1);
        assert!(matches!(units[0], PluginUnit::SingleFile { .. }));
    }

    #[test]
    fn discovers_directory_units_with_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("moving_average");
        std::fs::create_dir(&pkg).unwrap();
        std::fs::write(pkg.join("plugin.toml"), "library = \"libmoving_average.so\"\n").unwrap();
        std::fs::write(pkg.join("libmoving_average.so"), b"").unwrap();
        let units = discover(dir.path()).unwrap();
        assert_eq!(units.len(), 1);
        match &units[0] {
            PluginUnit::Directory { root, files, .. } => {
                assert_eq!(root, &pkg);
                assert_eq!(files.len(), 1);
            }
            _ => panic!("expected a directory unit"),
        }
    }

    #[test]
    fn results_are_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("zeta.so"), b"").unwrap();
        std::fs::write(dir.path().join("alpha.so"), b"").unwrap();
        let units = discover(dir.path()).unwrap();
        assert_eq!(units[0].name(), "alpha");
        assert_eq!(units[1].name(), "zeta");
    }
}
