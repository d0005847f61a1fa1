use ignore::WalkBuilder;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

pub const STORE_DIR: &str = ".repograph";

const PYTHON_EXTENSIONS: &[&str] = &["py", "pyi"];

#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub rel_path: String,
    pub abs_path: PathBuf,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    pub no_ignore: bool,
}

impl ScanOptions {
    pub fn new(no_ignore: bool) -> Self {
        Self { no_ignore }
    }
}

pub fn is_python_path(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .map(|ext| PYTHON_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Every Python source below `repo_root`, sorted by relative path. Walk
/// errors are logged and the offending entry skipped.
pub fn scan_repo(repo_root: &Path, options: ScanOptions) -> Vec<ScannedFile> {
    let mut files = Vec::new();
    let mut builder = WalkBuilder::new(repo_root);
    if options.no_ignore {
        builder
            .ignore(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .parents(false);
    } else {
        builder
            .ignore(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .parents(true)
            .require_git(false);
    }
    let walker = builder
        .hidden(false)
        .filter_entry(|entry| !is_ignored_entry(entry))
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("walk error: {err}");
                continue;
            }
        };
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        if !is_python_path(path) {
            continue;
        }
        let rel_path = match crate::util::normalize_rel_path(repo_root, path) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("skip {}: {err:#}", path.display());
                continue;
            }
        };
        files.push(ScannedFile {
            rel_path,
            abs_path: path.to_path_buf(),
        });
    }
    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    files
}

fn is_ignored_entry(entry: &ignore::DirEntry) -> bool {
    match entry.file_name() {
        name if name == OsStr::new(STORE_DIR) => true,
        name if name == OsStr::new(".git") => true,
        _ => false,
    }
}
