use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{Error, Result};

/// A discovered document file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path relative to the directory it was found under.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path, used as the document source.
    pub absolute_path: PathBuf,
}

/// Supported file extensions for document discovery.
const SUPPORTED_EXTENSIONS: &[&str] = &["md", "txt"];

/// Compile `--exclude` patterns into a matcher.
pub fn build_excludes<S: AsRef<str>>(patterns: &[S]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let pattern = pattern.as_ref();
        let glob = Glob::new(pattern).map_err(|e| {
            Error::Configuration(format!("invalid glob pattern '{pattern}': {e}"))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Configuration(format!("invalid glob set: {e}")))
}

/// Expand command-line inputs into document files.
///
/// Files are taken as given, whatever their extension. Directories are
/// walked with [`discover_files`]. The result is deduplicated by absolute
/// path, keeping the first occurrence.
pub fn collect_inputs(
    inputs: &[PathBuf],
    excludes: &GlobSet,
) -> Result<Vec<DiscoveredFile>> {
    let mut results: Vec<DiscoveredFile> = Vec::new();
    for input in inputs {
        let metadata = std::fs::metadata(input).map_err(|_| Error::NotFound {
            kind: "path",
            name: input.display().to_string(),
        })?;

        let found = if metadata.is_dir() {
            discover_files(input, excludes)?
        } else {
            let absolute_path = input.canonicalize()?;
            let relative_path = input
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| input.clone());
            if is_excluded(excludes, &relative_path) {
                Vec::new()
            } else {
                vec![DiscoveredFile {
                    relative_path,
                    absolute_path,
                }]
            }
        };

        for file in found {
            if !results.iter().any(|r| r.absolute_path == file.absolute_path) {
                results.push(file);
            }
        }
    }
    Ok(results)
}

/// Recursively walk a directory and discover eligible document files.
///
/// Skips hidden files/directories (names starting with `.`), anything
/// matching `excludes`, and only returns files with supported extensions
/// (.md, .txt).
pub fn discover_files(
    root: &Path,
    excludes: &GlobSet,
) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, excludes, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    excludes: &GlobSet,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    let entries = std::fs::read_dir(current)?;

    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        // Skip hidden files and directories.
        if name.starts_with('.') {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        if is_excluded(excludes, &relative) {
            continue;
        }

        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &path, excludes, results)?;
        } else if file_type.is_symlink() {
            // Skip broken symlinks.
            let Ok(resolved) = path.canonicalize() else {
                continue;
            };
            // Directory symlinks are not followed (cycle prevention).
            if resolved.is_file() && is_supported(&resolved) {
                results.push(DiscoveredFile {
                    relative_path: relative,
                    absolute_path: resolved,
                });
            }
        } else if file_type.is_file() && is_supported(&path) {
            results.push(DiscoveredFile {
                relative_path: relative,
                absolute_path: path.canonicalize()?,
            });
        }
    }

    Ok(())
}

fn is_excluded(excludes: &GlobSet, relative: &Path) -> bool {
    excludes.is_match(relative)
        || relative
            .file_name()
            .is_some_and(|name| excludes.is_match(Path::new(name)))
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_excludes() -> GlobSet {
        GlobSet::empty()
    }

    fn names(files: &[DiscoveredFile]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.relative_path.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn discovers_md_and_txt() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("note.md"), "# Hello").unwrap();
        std::fs::write(tmp.path().join("readme.txt"), "Hello").unwrap();
        std::fs::write(tmp.path().join("image.png"), "binary").unwrap();

        let files = discover_files(tmp.path(), &no_excludes()).unwrap();
        assert_eq!(names(&files), vec!["note.md", "readme.txt"]);
        assert!(files.iter().all(|f| f.absolute_path.is_absolute()));
    }

    #[test]
    fn skips_hidden_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let hidden = tmp.path().join(".git");
        std::fs::create_dir(&hidden).unwrap();
        std::fs::write(hidden.join("config.md"), "git config").unwrap();
        std::fs::write(tmp.path().join(".hidden.md"), "secret").unwrap();
        std::fs::write(tmp.path().join("notes.md"), "notes").unwrap();

        let files = discover_files(tmp.path(), &no_excludes()).unwrap();
        assert_eq!(names(&files), vec!["notes.md"]);
    }

    #[test]
    fn recurses_subdirectories_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("subdir");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("deep.md"), "deep").unwrap();
        std::fs::write(tmp.path().join("z.md"), "z").unwrap();
        std::fs::write(tmp.path().join("a.md"), "a").unwrap();

        let files = discover_files(tmp.path(), &no_excludes()).unwrap();
        assert_eq!(names(&files), vec!["a.md", "subdir/deep.md", "z.md"]);
    }

    #[test]
    fn exclude_patterns_apply_to_names_and_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let drafts = tmp.path().join("drafts");
        std::fs::create_dir(&drafts).unwrap();
        std::fs::write(drafts.join("wip.md"), "wip").unwrap();
        std::fs::write(tmp.path().join("keep.md"), "keep").unwrap();
        std::fs::write(tmp.path().join("skip.txt"), "skip").unwrap();

        let excludes = build_excludes(&["drafts", "*.txt"]).unwrap();
        let files = discover_files(tmp.path(), &excludes).unwrap();
        assert_eq!(names(&files), vec!["keep.md"]);
    }

    #[test]
    fn invalid_glob_is_rejected() {
        assert!(build_excludes(&["a[b"]).is_err());
    }

    #[test]
    fn collect_inputs_mixes_files_and_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("notes");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("a.md"), "a").unwrap();
        let single = tmp.path().join("paper.rst");
        std::fs::write(&single, "paper").unwrap();

        let inputs = vec![dir.clone(), single.clone(), dir.join("a.md")];
        let files = collect_inputs(&inputs, &no_excludes()).unwrap();
        assert_eq!(names(&files), vec!["a.md", "paper.rst"]);
    }

    #[test]
    fn collect_inputs_reports_missing_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let err = collect_inputs(&[tmp.path().join("ghost.md")], &no_excludes())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "path", .. }));
    }
}
