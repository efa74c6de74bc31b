//! Filesystem boundary.
//!
//! All persistent paths inside the front-end are addressed as [`PathId`]
//! handles interned in a [`FileSystem`]; conversion to a platform path only
//! happens here. Canonicalization goes through `dunce` so Windows UNC forms
//! never leak into interned keys, and interned keys are `/`-normalized with
//! `path-slash` to stay identical across platforms.

use crate::error::{Result, SvError};
use path_slash::PathExt;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt, fs,
    path::{Path, PathBuf},
    sync::RwLock,
};

/// Opaque handle to an interned filesystem path.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PathId(pub(crate) u32);

impl PathId {
    pub const BAD: Self = Self(0);

    pub fn is_bad(self) -> bool {
        self == Self::BAD
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "path#{}", self.0)
    }
}

#[derive(Debug, Default)]
struct PathInterner {
    paths: Vec<PathBuf>,
    ids: HashMap<PathBuf, u32>,
}

/// Path interner plus the small set of filesystem operations the front-end
/// needs. Reads are plain `std::fs` underneath; everything funnels through
/// here so the core never touches raw paths.
#[derive(Debug)]
pub struct FileSystem {
    inner: RwLock<PathInterner>,
}

impl Default for FileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem {
    pub fn new() -> Self {
        let mut interner = PathInterner::default();
        interner.ids.insert(PathBuf::new(), 0);
        interner.paths.push(PathBuf::new());
        Self { inner: RwLock::new(interner) }
    }

    /// Interns `path` after canonicalizing it as far as the filesystem allows.
    ///
    /// Non-existent paths are interned lexically normalized; existing paths
    /// are resolved through `dunce::canonicalize` so two spellings of the
    /// same file share one id.
    pub fn to_path_id(&self, path: impl AsRef<Path>) -> PathId {
        let path = path.as_ref();
        let canonical = dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let key = PathBuf::from(canonical.to_slash_lossy().as_ref());
        {
            let inner = self.inner.read().unwrap();
            if let Some(&id) = inner.ids.get(&key) {
                return PathId(id);
            }
        }
        let mut inner = self.inner.write().unwrap();
        if let Some(&id) = inner.ids.get(&key) {
            return PathId(id);
        }
        let id = inner.paths.len() as u32;
        inner.ids.insert(key.clone(), id);
        inner.paths.push(key);
        PathId(id)
    }

    /// The platform path for `id`; the bad id maps to an empty path.
    pub fn to_path(&self, id: PathId) -> PathBuf {
        let inner = self.inner.read().unwrap();
        inner.paths.get(id.index()).cloned().unwrap_or_default()
    }

    /// Reads the whole file into a string.
    pub fn read_to_string(&self, id: PathId) -> Result<String> {
        let path = self.to_path(id);
        fs::read_to_string(&path).map_err(|err| SvError::io(err, path))
    }

    /// Writes `contents`, creating parent directories as needed.
    pub fn write(&self, id: PathId, contents: &str) -> Result<()> {
        let path = self.to_path(id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| SvError::io(err, parent))?;
        }
        fs::write(&path, contents).map_err(|err| SvError::io(err, path))
    }

    /// Reads line `line` (1-based) of the file, used for error snippets.
    pub fn read_line(&self, id: PathId, line: u32) -> Option<String> {
        if line == 0 {
            return None;
        }
        let contents = self.read_to_string(id).ok()?;
        contents.lines().nth(line as usize - 1).map(str::to_owned)
    }

    /// Joins `leaf` onto the directory `base` and interns the result if the
    /// file exists.
    pub fn locate(&self, base: &Path, leaf: &Path) -> Option<PathId> {
        let candidate = base.join(leaf);
        candidate.is_file().then(|| self.to_path_id(candidate))
    }

    /// Lists the files directly inside `dir` whose extension is one of
    /// `extensions` (leading dot included, e.g. `.sv`).
    pub fn list_dir(&self, dir: &Path, extensions: &[String]) -> Vec<PathId> {
        let mut found = Vec::new();
        for entry in walkdir::WalkDir::new(dir)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(std::result::Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if extensions.iter().any(|ext| name.ends_with(ext.as_str())) {
                found.push(self.to_path_id(entry.path()));
            }
        }
        found
    }

    /// The file name without its extension.
    pub fn stem(&self, id: PathId) -> String {
        self.to_path(id).file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
    }

    /// The file name including its extension.
    pub fn leaf(&self, id: PathId) -> String {
        self.to_path(id).file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
    }

    pub fn exists(&self, id: PathId) -> bool {
        self.to_path(id).is_file()
    }

    /// File size in bytes, `0` when unreadable.
    pub fn file_size(&self, id: PathId) -> u64 {
        fs::metadata(self.to_path(id)).map(|m| m.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_identifies_spellings() {
        let fs = FileSystem::new();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("top.sv");
        std::fs::write(&file, "module top; endmodule\n").unwrap();

        let a = fs.to_path_id(&file);
        let b = fs.to_path_id(dir.path().join(".").join("top.sv"));
        assert_eq!(a, b);
        assert_eq!(fs.leaf(a), "top.sv");
        assert_eq!(fs.stem(a), "top");
    }

    #[test]
    fn read_line_is_one_based() {
        let fs = FileSystem::new();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.sv");
        std::fs::write(&file, "one\ntwo\nthree\n").unwrap();
        let id = fs.to_path_id(&file);
        assert_eq!(fs.read_line(id, 2).as_deref(), Some("two"));
        assert_eq!(fs.read_line(id, 0), None);
        assert_eq!(fs.read_line(id, 9), None);
    }

    #[test]
    fn list_dir_filters_extensions() {
        let fs = FileSystem::new();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.sv"), "").unwrap();
        std::fs::write(dir.path().join("b.v"), "").unwrap();
        std::fs::write(dir.path().join("c.txt"), "").unwrap();
        let found = fs.list_dir(dir.path(), &[".sv".into(), ".v".into()]);
        assert_eq!(found.len(), 2);
    }
}
