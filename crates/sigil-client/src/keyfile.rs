//! Armored key files on disk: `<name>_public.asc` and `<name>_private.asc`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use sigil_shared::ArmoredKeyPair;

use crate::error::ConfigError;

pub fn key_file_paths(dir: &Path, name: &str) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("{name}_public.asc")),
        dir.join(format!("{name}_private.asc")),
    )
}

/// Write both halves of `pair` into `dir`. Existing files are never
/// overwritten.
pub fn write_key_pair(
    dir: &Path,
    name: &str,
    pair: &ArmoredKeyPair,
) -> Result<(PathBuf, PathBuf), ConfigError> {
    let (public_path, private_path) = key_file_paths(dir, name);
    for path in [&public_path, &private_path] {
        if path.exists() {
            return Err(ConfigError::Exists(path.display().to_string()));
        }
    }

    write_file(&public_path, &pair.public_key)?;
    write_file(&private_path, &pair.private_key)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&private_path, fs::Permissions::from_mode(0o600)).map_err(|e| {
            ConfigError::Write {
                path: private_path.display().to_string(),
                source: e,
            }
        })?;
    }

    info!(public = %public_path.display(), private = %private_path.display(), "Key pair written");
    Ok((public_path, private_path))
}

pub fn read_key_file(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        source: e,
    })
}

fn write_file(path: &Path, contents: &str) -> Result<(), ConfigError> {
    fs::write(path, contents).map_err(|e| ConfigError::Write {
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use sigil_shared::{CryptoEngine, SealEngine};

    use super::*;

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SealEngine::new();
        let pair = engine.generate_key_pair("alice", "pw").unwrap();

        let (public_path, private_path) = write_key_pair(dir.path(), "alice", &pair).unwrap();
        assert!(public_path.ends_with("alice_public.asc"));

        let public = read_key_file(&public_path).unwrap();
        let private = read_key_file(&private_path).unwrap();
        assert!(engine.read_public_key(&public).is_ok());
        assert!(engine.read_and_decrypt_private_key(&private, "pw").is_ok());
    }

    #[test]
    fn test_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SealEngine::new();
        let pair = engine.generate_key_pair("alice", "pw").unwrap();

        write_key_pair(dir.path(), "alice", &pair).unwrap();
        let err = write_key_pair(dir.path(), "alice", &pair).unwrap_err();
        assert!(matches!(err, ConfigError::Exists(_)));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_key_file(&dir.path().join("nope.asc")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
