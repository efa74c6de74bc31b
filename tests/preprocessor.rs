//! Preprocessor integration tests against the public API.

use pretty_assertions::assert_eq;
use std::path::PathBuf;
use sv_frontend::{
    diagnostics::{ErrorContainer, ErrorKind},
    preprocessor::{line_map::SectionContext, CompilationUnit, Preprocessor},
    FileSystem, Options, PathId, SymbolTable,
};

struct Workspace {
    fs: FileSystem,
    symbols: SymbolTable,
    options: Options,
    dir: tempfile::TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            fs: FileSystem::new(),
            symbols: SymbolTable::new(),
            options: Options::default(),
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn file(&self, name: &str, contents: &str) -> PathId {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
        self.fs.to_path_id(path)
    }

    fn include_dir(&mut self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(&path).unwrap();
        self.options.include_dirs.push(path.clone());
        path
    }

    fn preprocess(&mut self, file: PathId) -> (sv_frontend::preprocessor::PreprocessResult, ErrorContainer) {
        let mut unit = CompilationUnit::from_options(&self.options, &self.symbols);
        let mut errors = ErrorContainer::new();
        let result = {
            let mut pp =
                Preprocessor::new(&self.fs, &self.symbols, &self.options, &mut unit, &mut errors);
            pp.preprocess(file).unwrap()
        };
        (result, errors)
    }
}

#[test]
fn macro_argument_substitution_end_to_end() {
    let mut workspace = Workspace::new();
    let file = workspace.file("t.sv", "`define M(x, y=3) x+y\n`M(a)\n");
    let (result, errors) = workspace.preprocess(file);
    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(result.text.lines().nth(1), Some("a+3"));
    let macro_marks: Vec<_> =
        result.trace.iter().filter(|i| i.context == SectionContext::Macro).collect();
    assert_eq!(macro_marks.len(), 2, "one push/pop pair around the expansion");
    assert_eq!(macro_marks[0].index_opposite, 1);
    assert_eq!(macro_marks[1].index_opposite, 0);
}

#[test]
fn include_with_relative_path_provides_macro() {
    let mut workspace = Workspace::new();
    workspace.include_dir("inc");
    workspace.file("inc/foo.svh", "`define X 1\n");
    let file = workspace.file("t.sv", "`include \"foo.svh\"\n`ifdef X\nvisible\n`endif\n");
    let (result, errors) = workspace.preprocess(file);
    assert!(errors.is_empty(), "{errors:?}");
    assert!(result.text.contains("visible"));
}

#[test]
fn cyclic_macro_is_reported_exactly_once() {
    let mut workspace = Workspace::new();
    let file = workspace.file("t.sv", "`define A `B\n`define B `A\n`A\n");
    let (result, errors) = workspace.preprocess(file);
    let count = errors
        .diagnostics()
        .iter()
        .filter(|d| d.kind == ErrorKind::PpRecursiveMacroDefinition)
        .count();
    assert_eq!(count, 1);
    // no expansion output remains after the aborted instance
    assert_eq!(result.text.trim(), "");
}

#[test]
fn deep_conditional_nesting_across_includes() {
    let mut workspace = Workspace::new();
    workspace.include_dir("inc");
    let mut inner = String::new();
    for depth in 0..20 {
        inner.push_str(&format!("`ifdef COND{depth}\n"));
    }
    for _ in 0..20 {
        inner.push_str("`endif\n");
    }
    workspace.file("inc/deep.svh", &inner);
    let file =
        workspace.file("t.sv", "`ifndef GUARD\n`include \"deep.svh\"\n`endif\n");
    let (_result, errors) = workspace.preprocess(file);
    assert!(!errors.contains(ErrorKind::PpUnbalancedConditional), "{errors:?}");
}

#[test]
fn expanded_coordinates_map_back_into_include() {
    let mut workspace = Workspace::new();
    workspace.include_dir("inc");
    let header = workspace.file("inc/body.svh", "wire from_header;\nwire second;\n");
    let file = workspace.file("t.sv", "`include \"body.svh\"\nwire from_top;\n");
    let (result, errors) = workspace.preprocess(file);
    assert!(errors.is_empty(), "{errors:?}");
    let map = result.location_map();

    // expanded lines 1-2 come from the include
    let inside = map.map_locations(1, 0, 1, 4);
    assert_eq!(inside.start_file, header);
    assert_eq!(inside.start_line, 1);
    let second = map.map_locations(2, 0, 2, 4);
    assert_eq!(second.start_file, header);
    assert_eq!(second.start_line, 2);

    // the line after the blank directive replacement is top line 2
    let top = map.map_locations(4, 0, 4, 4);
    assert_eq!(top.start_file, file);
    assert_eq!(top.start_line, 2);

    // the characters at mapped positions agree with the originals
    let expanded_line = result.text.lines().next().unwrap();
    let original_line = workspace.fs.read_line(header, 1).unwrap();
    assert_eq!(expanded_line, original_line);
}

#[test]
fn line_directive_is_honored() {
    let mut workspace = Workspace::new();
    let file = workspace.file("t.sv", "`line 100 \"virtual.sv\" 0\nwire w;\n");
    let (result, errors) = workspace.preprocess(file);
    assert!(errors.is_empty(), "{errors:?}");
    let map = result.location_map();
    let span = map.map_locations(2, 0, 2, 4);
    assert_eq!(span.start_line, 100);
    assert_ne!(span.start_file, file);
}

#[test]
fn file_and_line_specials_expand() {
    let mut workspace = Workspace::new();
    let file = workspace.file("t.sv", "string s = `__FILE__;\nint l = `__LINE__;\n");
    let (result, errors) = workspace.preprocess(file);
    assert!(errors.is_empty(), "{errors:?}");
    let path = workspace.fs.to_path(file);
    assert!(result.text.contains(&format!("\"{}\"", path.display())));
    assert!(result.text.lines().nth(1).unwrap().contains("int l = 2;"));
}

#[test]
fn undefineall_clears_command_line_defines() {
    let mut workspace = Workspace::new();
    workspace.options.push_define_arg("FROM_CMDLINE=1");
    let file = workspace.file(
        "t.sv",
        "`ifdef FROM_CMDLINE\nbefore\n`endif\n`undefineall\n`ifdef FROM_CMDLINE\nafter\n`endif\n",
    );
    let (result, errors) = workspace.preprocess(file);
    assert!(errors.is_empty(), "{errors:?}");
    assert!(result.text.contains("before"));
    assert!(!result.text.contains("after"));
}

#[test]
fn line_count_is_preserved_with_directives_and_includes() {
    let mut workspace = Workspace::new();
    workspace.include_dir("inc");
    workspace.file("inc/three.svh", "a\nb\nc\n");
    let source = "`define X 1\n`include \"three.svh\"\nmodule m; endmodule\n";
    let file = workspace.file("t.sv", source);
    let (result, errors) = workspace.preprocess(file);
    assert!(errors.is_empty(), "{errors:?}");
    // 3 source lines preserved plus 3 inserted include lines
    assert_eq!(result.line_count, 6);
    assert_eq!(result.text.matches('\n').count(), 6);
}
