//! Data-directory layout and permission-aware filesystem helpers.
//!
//! Everything the daemon writes lives under one root: the state database,
//! generated bundles, backups, and tunnel credentials. Directories are
//! created owner-only (0700); files are written 0600.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Resolved locations under the data root.
#[derive(Debug, Clone)]
pub struct DataPaths {
    /// The data root itself.
    pub root: PathBuf,
    /// `<root>/generated`; holds `current/` and transient staging dirs.
    pub generated_root: PathBuf,
    /// `<root>/backups`; `backup-<ts>/` bundles and `state-<ts>.json`.
    pub backups_dir: PathBuf,
    /// `<root>/cloudflared`; tunnel credentials JSON.
    pub cloudflared_dir: PathBuf,
    /// `<root>/state.db`.
    pub state_db: PathBuf,
}

impl DataPaths {
    /// Lay out the standard subdirectories under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            generated_root: root.join("generated"),
            backups_dir: root.join("backups"),
            cloudflared_dir: root.join("cloudflared"),
            state_db: root.join("state.db"),
            root,
        }
    }

    /// The live bundle directory.
    pub fn current_dir(&self) -> PathBuf {
        self.generated_root.join("current")
    }

    /// Create every directory, owner-only.
    pub fn ensure(&self) -> io::Result<()> {
        for dir in [
            &self.root,
            &self.generated_root,
            &self.backups_dir,
            &self.cloudflared_dir,
        ] {
            create_private_dir(dir)?;
        }
        Ok(())
    }
}

/// Create a directory tree with mode 0700.
pub fn create_private_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Write a file with mode 0600.
pub fn write_private_file(path: &Path, contents: impl AsRef<[u8]>) -> io::Result<()> {
    fs::write(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Recursively copy a directory tree, preserving the private modes.
pub fn copy_dir(src: &Path, dst: &Path) -> io::Result<()> {
    create_private_dir(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_rooted() {
        let paths = DataPaths::new("/tmp/ts-root");
        assert_eq!(paths.generated_root, Path::new("/tmp/ts-root/generated"));
        assert_eq!(paths.current_dir(), Path::new("/tmp/ts-root/generated/current"));
        assert_eq!(paths.state_db, Path::new("/tmp/ts-root/state.db"));
    }

    #[test]
    fn ensure_creates_every_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path().join("data"));
        paths.ensure().unwrap();
        assert!(paths.generated_root.is_dir());
        assert!(paths.backups_dir.is_dir());
        assert!(paths.cloudflared_dir.is_dir());
    }

    #[test]
    fn copy_dir_clones_nested_trees() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("a.txt"), "alpha").unwrap();
        fs::write(src.join("nested/b.txt"), "beta").unwrap();

        let dst = dir.path().join("dst");
        copy_dir(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "alpha");
        assert_eq!(fs::read_to_string(dst.join("nested/b.txt")).unwrap(), "beta");
    }

    #[cfg(unix)]
    #[test]
    fn private_modes_are_applied() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("private");
        create_private_dir(&sub).unwrap();
        assert_eq!(fs::metadata(&sub).unwrap().permissions().mode() & 0o777, 0o700);

        let file = sub.join("secret.yml");
        write_private_file(&file, "x").unwrap();
        assert_eq!(fs::metadata(&file).unwrap().permissions().mode() & 0o777, 0o600);
    }
}
