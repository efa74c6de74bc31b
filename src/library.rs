//! Library resolution.
//!
//! Maps every source, `-v` and `-y` file to a named library before any
//! compilation starts. Files default to the `work` library; library-map
//! files reassign them with `library <name> <path...>;` rules, where paths
//! may carry a single `*` wildcard in their leaf.

use crate::{
    config::Options,
    diagnostics::{ErrorContainer, ErrorKind, Location},
    error::Result,
    fs::{FileSystem, PathId},
    symbols::{SymbolId, SymbolTable},
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{collections::HashMap, path::Path};

pub const WORK_LIBRARY: &str = "work";

/// `library <name> <path...>;` statements in map files.
static RE_LIBRARY_STMT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"library\s+(?P<name>[A-Za-z_][A-Za-z0-9_$]*)\s+(?P<paths>[^;]+);")
        .expect("valid regex")
});

/// One named library and the files it owns, in discovery order.
#[derive(Clone, Debug)]
pub struct Library {
    pub name: SymbolId,
    pub files: Vec<PathId>,
}

/// The result of stage 2: every file of interest tagged with its library.
#[derive(Debug, Default)]
pub struct LibrarySet {
    libraries: Vec<Library>,
    by_file: HashMap<PathId, SymbolId>,
    work: SymbolId,
}

impl LibrarySet {
    pub fn libraries(&self) -> &[Library] {
        &self.libraries
    }

    /// The library owning `file`; unmapped files belong to `work`.
    pub fn library_of(&self, file: PathId) -> SymbolId {
        self.by_file.get(&file).copied().unwrap_or(self.work)
    }

    /// All files of the work library in command-line order, the compilation
    /// source set.
    pub fn work_files(&self) -> &[PathId] {
        self.libraries
            .iter()
            .find(|l| l.name == self.work)
            .map(|l| l.files.as_slice())
            .unwrap_or(&[])
    }

    fn assign(&mut self, library: SymbolId, file: PathId) {
        use std::collections::hash_map::Entry;
        match self.by_file.entry(file) {
            Entry::Occupied(_) => {} // first assignment wins, like -v before maps
            Entry::Vacant(entry) => {
                entry.insert(library);
                self.libraries
                    .iter_mut()
                    .find(|l| l.name == library)
                    .expect("library exists")
                    .files
                    .push(file);
            }
        }
    }

    fn ensure_library(&mut self, name: SymbolId) {
        if !self.libraries.iter().any(|l| l.name == name) {
            self.libraries.push(Library { name, files: Vec::new() });
        }
    }
}

/// Resolves the configured inputs into a [`LibrarySet`].
pub fn resolve(
    options: &Options,
    fs: &FileSystem,
    symbols: &SymbolTable,
    errors: &mut ErrorContainer,
) -> Result<LibrarySet> {
    let work = symbols.register(WORK_LIBRARY);
    let mut set = LibrarySet { libraries: Vec::new(), by_file: HashMap::new(), work };
    set.ensure_library(work);

    // map files first so their assignments take priority over defaults
    for map_file in &options.map_files {
        let map_id = fs.to_path_id(map_file);
        let Ok(contents) = fs.read_to_string(map_id) else {
            errors.add_kind(
                ErrorKind::PpCannotOpenIncludeFile,
                Location::object(symbols.register(&map_file.to_string_lossy())),
            );
            continue;
        };
        let base = map_file.parent().unwrap_or_else(|| Path::new("."));
        parse_map_file(&contents, base, fs, symbols, &mut set);
    }

    for source in &options.sources {
        let id = fs.to_path_id(source);
        set.assign(work, id);
    }
    for lib_file in &options.library_files {
        let id = fs.to_path_id(lib_file);
        set.assign(work, id);
    }
    for lib_dir in &options.library_dirs {
        for id in fs.list_dir(lib_dir, &options.libext) {
            set.assign(work, id);
        }
    }
    Ok(set)
}

/// `library <name> <path...>;` statements; `//` comments ignored.
fn parse_map_file(
    contents: &str,
    base: &Path,
    fs: &FileSystem,
    symbols: &SymbolTable,
    set: &mut LibrarySet,
) {
    let stripped = contents
        .lines()
        .map(|l| l.split("//").next().unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n");
    for captures in RE_LIBRARY_STMT.captures_iter(&stripped) {
        let library = symbols.register(&captures["name"]);
        set.ensure_library(library);
        for pattern in captures["paths"].split_whitespace() {
            for file in expand_pattern(base, pattern, fs) {
                set.assign(library, file);
            }
        }
    }
}

/// Expands a map-file path, supporting one `*` in the leaf component.
fn expand_pattern(base: &Path, pattern: &str, fs: &FileSystem) -> Vec<PathId> {
    let full = base.join(pattern);
    let leaf = full.file_name().map(|l| l.to_string_lossy().into_owned()).unwrap_or_default();
    if !leaf.contains('*') {
        return full.is_file().then(|| fs.to_path_id(&full)).into_iter().collect();
    }
    let Some(dir) = full.parent() else { return Vec::new() };
    let (prefix, suffix) = leaf.split_once('*').unwrap_or(("", ""));
    let mut found = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        let mut names: Vec<_> = entries
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .collect();
        names.sort_by_key(|e| e.file_name());
        for entry in names {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(prefix) && name.ends_with(suffix) && name.len() >= prefix.len() + suffix.len() {
                found.push(fs.to_path_id(entry.path()));
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        fs: FileSystem,
        symbols: SymbolTable,
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                fs: FileSystem::new(),
                symbols: SymbolTable::new(),
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn file(&self, name: &str, contents: &str) -> std::path::PathBuf {
            let path = self.dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&path, contents).unwrap();
            path
        }
    }

    #[test]
    fn sources_default_to_work() {
        let fixture = Fixture::new();
        let top = fixture.file("top.sv", "module top; endmodule\n");
        let options = Options { sources: vec![top.clone()], ..Options::default() };
        let mut errors = ErrorContainer::new();
        let set = resolve(&options, &fixture.fs, &fixture.symbols, &mut errors).unwrap();
        assert_eq!(set.work_files().len(), 1);
        let id = fixture.fs.to_path_id(&top);
        assert_eq!(&*fixture.symbols.text(set.library_of(id)), WORK_LIBRARY);
    }

    #[test]
    fn library_dirs_respect_libext() {
        let fixture = Fixture::new();
        fixture.file("lib/a.sv", "");
        fixture.file("lib/b.v", "");
        fixture.file("lib/c.txt", "");
        let options = Options {
            library_dirs: vec![fixture.dir.path().join("lib")],
            ..Options::default()
        };
        let mut errors = ErrorContainer::new();
        let set = resolve(&options, &fixture.fs, &fixture.symbols, &mut errors).unwrap();
        assert_eq!(set.work_files().len(), 2);
    }

    #[test]
    fn map_file_reassigns_with_wildcard() {
        let fixture = Fixture::new();
        fixture.file("rtl/cell_and.v", "");
        fixture.file("rtl/cell_or.v", "");
        let top = fixture.file("top.sv", "");
        let map = fixture.file("lib.map", "library cells rtl/cell_*.v;\n");
        let options = Options {
            sources: vec![top, fixture.dir.path().join("rtl/cell_and.v")],
            map_files: vec![map],
            ..Options::default()
        };
        let mut errors = ErrorContainer::new();
        let set = resolve(&options, &fixture.fs, &fixture.symbols, &mut errors).unwrap();
        let cells = fixture.symbols.register("cells");
        let and_id = fixture.fs.to_path_id(fixture.dir.path().join("rtl/cell_and.v"));
        // the map assignment wins over the source-list default
        assert_eq!(set.library_of(and_id), cells);
        // top.sv still belongs to work
        assert_eq!(set.work_files().len(), 1);
        let cell_lib = set.libraries().iter().find(|l| l.name == cells).unwrap();
        assert_eq!(cell_lib.files.len(), 2);
    }
}
