//! Content hashing for reload-idempotency (spec §4.4 "Content hashing"),
//! condensed from `plugin_host.py`'s `_calc_hash`: SHA-256 over either a
//! single file's bytes or, for a directory unit, the concatenation of every
//! contained source file's bytes in sorted relative-path order.

use std::path::Path;

use sha2::{Digest, Sha256};

use gridwatch_core::error::{GridError, GridResult};

use crate::discovery::PluginUnit;

/// Hash a discovered plugin unit's current on-disk content.
pub fn hash_unit(unit: &PluginUnit) -> GridResult<String> {
    match unit {
        PluginUnit::SingleFile { path, .. } => hash_file(path),
        PluginUnit::Directory { files, .. } => hash_directory(files),
    }
}

fn hash_file(path: &Path) -> GridResult<String> {
    let bytes = std::fs::read(path)
        .map_err(|e| GridError::PluginLoadFailed(path.display().to_string(), e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

fn hash_directory(files: &[std::path::PathBuf]) -> GridResult<String> {
    let mut sorted: Vec<&std::path::PathBuf> = files.iter().collect();
    sorted.sort();
    let mut hasher = Sha256::new();
    for path in sorted {
        let bytes = std::fs::read(path)
            .map_err(|e| GridError::PluginLoadFailed(path.display().to_string(), e.to_string()))?;
        hasher.update(&bytes);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn single_file_hash_is_stable_and_content_sensitive() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "version one").unwrap();
        let unit = PluginUnit::SingleFile {
            name: "x".into(),
            path: file.path().to_path_buf(),
        };
        let h1 = hash_unit(&unit).unwrap();
        let h2 = hash_unit(&unit).unwrap();
        assert_eq!(h1, h2);

        let mut file2 = std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(file.path())
            .unwrap();
        write!(file2, "version two").unwrap();
        let h3 = hash_unit(&unit).unwrap();
        assert_ne!(h1, h3);
    }

    #[test]
    fn directory_hash_is_order_independent_of_listing_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.rs");
        let b = dir.path().join("b.rs");
        std::fs::write(&a, b"fn a() {}").unwrap();
        std::fs::write(&b, b"fn b() {}").unwrap();

        let unit_ab = PluginUnit::Directory {
            name: "pkg".into(),
            root: dir.path().to_path_buf(),
            files: vec![a.clone(), b.clone()],
        };
        let unit_ba = PluginUnit::Directory {
            name: "pkg".into(),
            root: dir.path().to_path_buf(),
            files: vec![b, a],
        };
        assert_eq!(hash_unit(&unit_ab).unwrap(), hash_unit(&unit_ba).unwrap());
    }
}
