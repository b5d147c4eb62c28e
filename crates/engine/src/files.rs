use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

/// File-tree handle used for upload directories and staging areas.
pub trait FileTree: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    /// Recursively copy `src` into `dst`, overwriting existing files and
    /// preserving relative paths. Returns the number of files copied.
    fn copy_tree(&self, src: &Path, dst: &Path) -> io::Result<u64>;

    /// Files under `path`, relative to it, in a stable order.
    fn list_files_recursive(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    fn remove_tree(&self, path: &Path) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileTree;

impl FileTree for LocalFileTree {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn copy_tree(&self, src: &Path, dst: &Path) -> io::Result<u64> {
        let mut copied = 0;
        fs::create_dir_all(dst)?;
        for entry in WalkDir::new(src).sort_by_file_name() {
            let entry = entry?;
            let rel = entry
                .path()
                .strip_prefix(src)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            let target = dst.join(rel);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)?;
            } else {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(entry.path(), &target)?;
                copied += 1;
            }
        }
        Ok(copied)
    }

    fn list_files_recursive(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_dir() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(path)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            files.push(rel.to_path_buf());
        }
        Ok(files)
    }

    fn remove_tree(&self, path: &Path) -> io::Result<()> {
        match fs::remove_dir_all(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// Copy an upload directory if it exists. `None` means the source was
/// absent, which callers treat as zero files rather than an error.
pub fn copy_if_present(tree: &dyn FileTree, src: &Path, dst: &Path) -> io::Result<Option<u64>> {
    if !tree.exists(src) {
        return Ok(None);
    }
    tree.copy_tree(src, dst).map(Some)
}

/// True when joining `name` onto a root stays inside that root: non-empty,
/// relative, and made of normal components only.
pub fn is_contained(name: &str) -> bool {
    !name.is_empty()
        && Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

/// A single path component, as used for collection and snapshot names.
pub fn is_plain_name(name: &str) -> bool {
    is_contained(name) && !name.contains(['/', '\\'])
}

/// Drop entries nested under another entry of the list, so
/// `["uploads", "uploads/magazines"]` is processed once through `uploads`.
pub fn outermost_dirs(dirs: &[String]) -> Vec<String> {
    let normalized: Vec<&str> = dirs.iter().map(|d| d.trim_matches('/')).collect();
    let mut out: Vec<String> = Vec::new();
    for (i, dir) in normalized.iter().enumerate() {
        if dir.is_empty() {
            continue;
        }
        let nested = normalized.iter().enumerate().any(|(j, other)| {
            j != i && !other.is_empty() && Path::new(dir).starts_with(other) && dir != other
        });
        if !nested && !out.iter().any(|seen| seen == dir) {
            out.push((*dir).to_owned());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_tree_preserves_relative_paths_and_counts_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("uploads");
        fs::create_dir_all(src.join("magazines")).unwrap();
        fs::write(src.join("a.png"), b"a").unwrap();
        fs::write(src.join("magazines").join("issue-1.pdf"), b"pdf").unwrap();

        let dst = tmp.path().join("staging").join("uploads");
        let copied = LocalFileTree.copy_tree(&src, &dst).unwrap();

        assert_eq!(copied, 2);
        assert_eq!(fs::read(dst.join("magazines/issue-1.pdf")).unwrap(), b"pdf");
        assert_eq!(
            LocalFileTree.list_files_recursive(&dst).unwrap(),
            vec![PathBuf::from("a.png"), PathBuf::from("magazines/issue-1.pdf")]
        );
    }

    #[test]
    fn copy_tree_overwrites_existing_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(src.join("cover.jpg"), b"new").unwrap();
        fs::write(dst.join("cover.jpg"), b"old").unwrap();

        LocalFileTree.copy_tree(&src, &dst).unwrap();
        assert_eq!(fs::read(dst.join("cover.jpg")).unwrap(), b"new");
    }

    #[test]
    fn missing_source_is_not_an_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let copied = copy_if_present(
            &LocalFileTree,
            &tmp.path().join("nope"),
            &tmp.path().join("dst"),
        )
        .unwrap();
        assert_eq!(copied, None);
        assert!(!tmp.path().join("dst").exists());
    }

    #[test]
    fn nested_upload_dirs_collapse_to_outermost() {
        let dirs = vec![
            "uploads".to_string(),
            "uploads/magazines".to_string(),
            "media/".to_string(),
            "uploads".to_string(),
        ];
        assert_eq!(outermost_dirs(&dirs), vec!["uploads", "media"]);
    }

    #[test]
    fn names_that_leave_the_root_are_not_contained() {
        for bad in ["", ".", "..", "../x", "uploads/../../etc", "/var/www", "./"] {
            assert!(!is_contained(bad), "{bad:?}");
        }
        for good in ["uploads", "uploads/magazines", "media/"] {
            assert!(is_contained(good), "{good:?}");
        }
        assert!(is_plain_name("editions"));
        assert!(!is_plain_name("uploads/magazines"));
        assert!(!is_plain_name("..\\evil"));
    }
}
