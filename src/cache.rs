//! On-disk preprocessor and parse caches.
//!
//! Entries are JSON files under `<out_dir>/cache/`, keyed by source path
//! stem plus a hash over (relevant command-line flags, file content, ambient
//! macro state at entry). A change to any of the three produces a different
//! key, so `` `undefineall `` upstream or an edited include invalidates
//! dependents. Both caches are bypassed under `-nohash`.
//!
//! Interned ids are session-local, so entries store plain strings and are
//! re-interned on load.

use crate::{
    config::{hex, Options},
    error::Result,
    fs::{FileSystem, PathId},
    node::{FileContent, NodeId, NodeKind, VObject},
    preprocessor::{
        line_map::{IncludeFileInfo, LineTranslationInfo, SectionAction, SectionContext},
        macros::{MacroArg, MacroInfo, MacroStorage},
        PreprocessResult, Sentinel,
    },
    symbols::SymbolTable,
};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Bumped whenever any serialized shape changes.
pub const CACHE_FORMAT_VERSION: &str = "svfe-cache-1";

/// Lowercase-hex md5 of `content`.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(content.as_bytes());
    hex(&hasher.finalize())
}

fn entry_path(options: &Options, fs: &FileSystem, file: PathId, key: &str, suffix: &str) -> PathBuf {
    let stem = fs.stem(file);
    options.out_dir.join("cache").join(format!("{stem}.{}.{suffix}.json", &key[..16.min(key.len())]))
}

fn cache_key(options_hash: &str, content: &str, ambient_hash: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(options_hash.as_bytes());
    hasher.update(b"|");
    hasher.update(content.as_bytes());
    hasher.update(b"|");
    hasher.update(ambient_hash.as_bytes());
    hex(&hasher.finalize())
}

// ---- portable forms ------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct PortableNode {
    kind: NodeKind,
    symbol: String,
    file: String,
    span: (u32, u16, u32, u16),
    links: (u32, u32, u32, u32),
}

#[derive(Debug, Serialize, Deserialize)]
struct PortableTree {
    file: String,
    root: u32,
    nodes: Vec<PortableNode>,
}

fn tree_to_portable(tree: &FileContent, fs: &FileSystem, symbols: &SymbolTable) -> PortableTree {
    let nodes = tree
        .objects()
        .map(|(_, object)| PortableNode {
            kind: object.kind,
            symbol: symbols.text(object.symbol).to_string(),
            file: fs.to_path(object.file).to_string_lossy().into_owned(),
            span: (object.start_line, object.start_col, object.end_line, object.end_col),
            links: (object.parent.0, object.definition.0, object.child.0, object.sibling.0),
        })
        .collect();
    PortableTree {
        file: fs.to_path(tree.file()).to_string_lossy().into_owned(),
        root: tree.root().0,
        nodes,
    }
}

fn tree_from_portable(portable: &PortableTree, fs: &FileSystem, symbols: &SymbolTable) -> FileContent {
    let objects: Vec<VObject> = portable
        .nodes
        .iter()
        .map(|node| VObject {
            kind: node.kind,
            symbol: symbols.register(&node.symbol),
            file: if node.file.is_empty() { PathId::BAD } else { fs.to_path_id(&node.file) },
            start_line: node.span.0,
            start_col: node.span.1,
            end_line: node.span.2,
            end_col: node.span.3,
            parent: NodeId(node.links.0),
            definition: NodeId(node.links.1),
            child: NodeId(node.links.2),
            sibling: NodeId(node.links.3),
        })
        .collect();
    let file = if portable.file.is_empty() { PathId::BAD } else { fs.to_path_id(&portable.file) };
    FileContent::from_objects(file, NodeId(portable.root), objects)
}

#[derive(Debug, Serialize, Deserialize)]
struct PortableTraceEntry {
    context: SectionContext,
    action: SectionAction,
    section_file: String,
    section_symbol: String,
    original: (u32, u16),
    expanded: (u32, u16),
    index_opposite: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct PortableMacro {
    name: String,
    file: String,
    start_line: u32,
    name_col: u16,
    arguments: Vec<MacroArg>,
    has_formal_list: bool,
    tokens: Vec<String>,
    token_positions: Vec<(u32, u16)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PortableSentinel {
    node: u32,
    exp_start: (u32, u16),
    exp_end: (u32, u16),
}

#[derive(Debug, Serialize, Deserialize)]
struct PortableTranslation {
    pretend_file: String,
    original_line: u32,
    pretend_line: u32,
}

/// One preprocessor cache entry: the full preprocessing output plus the
/// macro state after the file, replayed on a hit.
#[derive(Debug, Serialize, Deserialize)]
pub struct PreprocessCacheEntry {
    format_version: String,
    expanded_text: String,
    line_count: usize,
    tree: PortableTree,
    trace: Vec<PortableTraceEntry>,
    translations: Vec<PortableTranslation>,
    sentinels: Vec<PortableSentinel>,
    macros_after: Vec<PortableMacro>,
}

/// One parse cache entry per expanded file.
#[derive(Debug, Serialize, Deserialize)]
pub struct ParseCacheEntry {
    format_version: String,
    tree: PortableTree,
}

// ---- preprocessor cache --------------------------------------------------

/// Writes the preprocessing output of `file` to disk.
#[allow(clippy::too_many_arguments)]
pub fn store_preprocess(
    options: &Options,
    fs: &FileSystem,
    symbols: &SymbolTable,
    file: PathId,
    source: &str,
    ambient_hash: &str,
    result: &PreprocessResult,
    macros_after: &MacroStorage,
) -> Result<()> {
    if options.no_cache {
        return Ok(());
    }
    let key = cache_key(&options.cache_signature(), source, ambient_hash);
    let entry = PreprocessCacheEntry {
        format_version: CACHE_FORMAT_VERSION.to_owned(),
        expanded_text: result.text.clone(),
        line_count: result.line_count,
        tree: tree_to_portable(&result.tree, fs, symbols),
        trace: result
            .trace
            .iter()
            .map(|info| PortableTraceEntry {
                context: info.context,
                action: info.action,
                section_file: fs.to_path(info.section_file).to_string_lossy().into_owned(),
                section_symbol: symbols.text(info.section_symbol).to_string(),
                original: (info.original_line, info.original_col),
                expanded: (info.expanded_line, info.expanded_col),
                index_opposite: info.index_opposite,
            })
            .collect(),
        translations: result
            .translations
            .iter()
            .map(|t| PortableTranslation {
                pretend_file: fs.to_path(t.pretend_file).to_string_lossy().into_owned(),
                original_line: t.original_line,
                pretend_line: t.pretend_line,
            })
            .collect(),
        sentinels: result
            .sentinels
            .iter()
            .map(|s| PortableSentinel { node: s.node.0, exp_start: s.exp_start, exp_end: s.exp_end })
            .collect(),
        macros_after: macros_after
            .values()
            .map(|info| PortableMacro {
                name: symbols.text(info.name).to_string(),
                file: fs.to_path(info.file).to_string_lossy().into_owned(),
                start_line: info.start_line,
                name_col: info.name_col,
                arguments: info.arguments.clone(),
                has_formal_list: info.has_formal_list,
                tokens: info.tokens.clone(),
                token_positions: info.token_positions.clone(),
            })
            .collect(),
    };
    let path = entry_path(options, fs, file, &key, "pp");
    let json = serde_json::to_string(&entry)?;
    fs.write(fs.to_path_id(&path), &json)
}

/// Loads a matching preprocessor entry. Returns the replayed result and the
/// macro state to install, or `None` on any mismatch.
pub fn load_preprocess(
    options: &Options,
    fs: &FileSystem,
    symbols: &SymbolTable,
    file: PathId,
    source: &str,
    ambient_hash: &str,
) -> Option<(PreprocessResult, MacroStorage)> {
    if options.no_cache {
        return None;
    }
    let key = cache_key(&options.cache_signature(), source, ambient_hash);
    let path = entry_path(options, fs, file, &key, "pp");
    let entry: PreprocessCacheEntry = read_entry(fs, &path)?;
    if entry.format_version != CACHE_FORMAT_VERSION {
        return None;
    }
    let tree = tree_from_portable(&entry.tree, fs, symbols);
    let trace = entry
        .trace
        .iter()
        .map(|info| IncludeFileInfo {
            context: info.context,
            action: info.action,
            section_file: fs.to_path_id(&info.section_file),
            section_symbol: symbols.register(&info.section_symbol),
            original_line: info.original.0,
            original_col: info.original.1,
            expanded_line: info.expanded.0,
            expanded_col: info.expanded.1,
            index_opposite: info.index_opposite,
        })
        .collect();
    let translations = entry
        .translations
        .iter()
        .map(|t| LineTranslationInfo {
            pretend_file: fs.to_path_id(&t.pretend_file),
            original_line: t.original_line,
            pretend_line: t.pretend_line,
        })
        .collect();
    let sentinels = entry
        .sentinels
        .iter()
        .map(|s| Sentinel { node: NodeId(s.node), exp_start: s.exp_start, exp_end: s.exp_end })
        .collect();
    let mut macros = MacroStorage::default();
    for portable in &entry.macros_after {
        let name = symbols.register(&portable.name);
        macros.insert(
            name,
            MacroInfo {
                name,
                file: if portable.file.is_empty() {
                    PathId::BAD
                } else {
                    fs.to_path_id(&portable.file)
                },
                start_line: portable.start_line,
                name_col: portable.name_col,
                arguments: portable.arguments.clone(),
                has_formal_list: portable.has_formal_list,
                tokens: portable.tokens.clone(),
                token_positions: portable.token_positions.clone(),
            },
        );
    }
    let result = PreprocessResult {
        file,
        text: entry.expanded_text,
        tree,
        trace,
        translations,
        sentinels,
        line_count: entry.line_count,
    };
    Some((result, macros))
}

// ---- parse cache ---------------------------------------------------------

pub fn store_parse(
    options: &Options,
    fs: &FileSystem,
    symbols: &SymbolTable,
    file: PathId,
    expanded_text: &str,
    tree: &FileContent,
) -> Result<()> {
    if options.no_cache {
        return Ok(());
    }
    let key = cache_key(&options.cache_signature(), expanded_text, "");
    let entry = ParseCacheEntry {
        format_version: CACHE_FORMAT_VERSION.to_owned(),
        tree: tree_to_portable(tree, fs, symbols),
    };
    let path = entry_path(options, fs, file, &key, "ast");
    let json = serde_json::to_string(&entry)?;
    fs.write(fs.to_path_id(&path), &json)
}

pub fn load_parse(
    options: &Options,
    fs: &FileSystem,
    symbols: &SymbolTable,
    file: PathId,
    expanded_text: &str,
) -> Option<FileContent> {
    if options.no_cache {
        return None;
    }
    let key = cache_key(&options.cache_signature(), expanded_text, "");
    let path = entry_path(options, fs, file, &key, "ast");
    let entry: ParseCacheEntry = read_entry(fs, &path)?;
    if entry.format_version != CACHE_FORMAT_VERSION {
        return None;
    }
    Some(tree_from_portable(&entry.tree, fs, symbols))
}

fn read_entry<T: serde::de::DeserializeOwned>(fs: &FileSystem, path: &Path) -> Option<T> {
    if !path.is_file() {
        return None;
    }
    let contents = fs.read_to_string(fs.to_path_id(path)).ok()?;
    match serde_json::from_str(&contents) {
        Ok(entry) => Some(entry),
        Err(err) => {
            trace!("discarding unreadable cache entry {:?}: {err}", path);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Options,
        diagnostics::ErrorContainer,
        preprocessor::{CompilationUnit, Preprocessor},
    };

    struct Fixture {
        fs: FileSystem,
        symbols: SymbolTable,
        options: Options,
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let options = Options { out_dir: dir.path().join("out"), ..Options::default() };
            Self { fs: FileSystem::new(), symbols: SymbolTable::new(), options, dir }
        }

        fn file(&self, name: &str, contents: &str) -> PathId {
            let path = self.dir.path().join(name);
            std::fs::write(&path, contents).unwrap();
            self.fs.to_path_id(path)
        }
    }

    fn preprocess(fixture: &Fixture, file: PathId) -> (PreprocessResult, MacroStorage) {
        let mut unit = CompilationUnit::new();
        let mut errors = ErrorContainer::new();
        let result = {
            let mut pp = Preprocessor::new(
                &fixture.fs,
                &fixture.symbols,
                &fixture.options,
                &mut unit,
                &mut errors,
            );
            pp.preprocess(file).unwrap()
        };
        assert!(errors.is_empty(), "{errors:?}");
        (result, unit.macros)
    }

    #[test]
    fn preprocess_round_trips_through_cache() {
        let fixture = Fixture::new();
        let source = "`define W 8\nwire [`W-1:0] bus;\n";
        let file = fixture.file("t.sv", source);
        let (result, macros) = preprocess(&fixture, file);
        store_preprocess(
            &fixture.options,
            &fixture.fs,
            &fixture.symbols,
            file,
            source,
            "ambient",
            &result,
            &macros,
        )
        .unwrap();

        let (loaded, loaded_macros) = load_preprocess(
            &fixture.options,
            &fixture.fs,
            &fixture.symbols,
            file,
            source,
            "ambient",
        )
        .expect("cache hit");
        assert_eq!(loaded.text, result.text);
        assert_eq!(loaded.line_count, result.line_count);
        assert_eq!(loaded.trace, result.trace);
        assert_eq!(loaded_macros.len(), macros.len());
        assert_eq!(loaded.tree.validate(), Ok(()));
    }

    #[test]
    fn content_change_misses() {
        let fixture = Fixture::new();
        let source = "`define W 8\n";
        let file = fixture.file("t.sv", source);
        let (result, macros) = preprocess(&fixture, file);
        store_preprocess(
            &fixture.options,
            &fixture.fs,
            &fixture.symbols,
            file,
            source,
            "ambient",
            &result,
            &macros,
        )
        .unwrap();
        assert!(load_preprocess(
            &fixture.options,
            &fixture.fs,
            &fixture.symbols,
            file,
            "`define W 16\n",
            "ambient",
        )
        .is_none());
    }

    #[test]
    fn ambient_macro_state_misses() {
        let fixture = Fixture::new();
        let source = "`define W 8\n";
        let file = fixture.file("t.sv", source);
        let (result, macros) = preprocess(&fixture, file);
        store_preprocess(
            &fixture.options,
            &fixture.fs,
            &fixture.symbols,
            file,
            source,
            "ambient-a",
            &result,
            &macros,
        )
        .unwrap();
        assert!(load_preprocess(
            &fixture.options,
            &fixture.fs,
            &fixture.symbols,
            file,
            source,
            "ambient-b",
        )
        .is_none());
    }

    #[test]
    fn nohash_bypasses() {
        let mut fixture = Fixture::new();
        let source = "`define W 8\n";
        let file = fixture.file("t.sv", source);
        let (result, macros) = preprocess(&fixture, file);
        fixture.options.no_cache = true;
        store_preprocess(
            &fixture.options,
            &fixture.fs,
            &fixture.symbols,
            file,
            source,
            "ambient",
            &result,
            &macros,
        )
        .unwrap();
        assert!(load_preprocess(
            &fixture.options,
            &fixture.fs,
            &fixture.symbols,
            file,
            source,
            "ambient",
        )
        .is_none());
    }

    #[test]
    fn parse_tree_round_trips() {
        let fixture = Fixture::new();
        let text = "module m; wire w; endmodule\n";
        let file = fixture.file("t.sv", text);
        let (tree, issues) = crate::parser::parse_source(file, text, &fixture.symbols);
        assert!(issues.is_empty());
        store_parse(&fixture.options, &fixture.fs, &fixture.symbols, file, text, &tree).unwrap();
        let loaded =
            load_parse(&fixture.options, &fixture.fs, &fixture.symbols, file, text).expect("hit");
        let shape = |t: &FileContent| -> Vec<NodeKind> {
            t.preorder(t.root()).map(|id| t.object(id).kind).collect()
        };
        assert_eq!(shape(&loaded), shape(&tree));
    }
}
