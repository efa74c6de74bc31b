//! The preprocessor.
//!
//! Given a source file this produces (a) the expanded text, with one output
//! line per original line (directive lines are replaced by blanks) so that
//! errors on expanded text can always be back-translated, (b) the
//! [`IncludeFileInfo`] trace, (c) the preprocessor [`FileContent`] tree of
//! directives, and (d) updated compilation-unit macro state.
//!
//! Includes are scanned recursively into the same output; macro expansions
//! are evaluated to text and appended inline. Both push a PUSH/POP
//! breadcrumb pair around the region they contribute, which is all the
//! location map needs to point diagnostics back at the real source.

pub mod line_map;
pub mod macros;

use crate::{
    config::{hex, Options},
    diagnostics::{Diagnostic, ErrorContainer, ErrorKind, Location},
    error::Result,
    fs::{FileSystem, PathId},
    node::{FileContent, NodeId, NodeKind},
    symbols::{SymbolId, SymbolTable},
};
use self::line_map::{
    IncludeFileInfo, LineTranslationInfo, LocationMap, SectionAction, SectionContext,
};
use self::macros::{LoopCheck, MacroArg, MacroInfo, MacroStorage, FILE_MARKING, LINE_MARKING};
use md5::{Digest, Md5};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// `` `timescale 1ns / 10ps `` and friends.
static RE_TIMESCALE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(1|10|100)\s*(s|ms|us|ns|ps|fs)\s*/\s*(1|10|100)\s*(s|ms|us|ns|ps|fs)\s*$")
        .expect("valid regex")
});

/// `` `default_nettype `` values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefaultNettype {
    #[default]
    Wire,
    Tri,
    Tri0,
    Tri1,
    Wand,
    Wor,
    Trireg,
    Uwire,
    None,
}

impl DefaultNettype {
    pub fn parse(text: &str) -> Option<Self> {
        Some(match text {
            "wire" => Self::Wire,
            "tri" => Self::Tri,
            "tri0" => Self::Tri0,
            "tri1" => Self::Tri1,
            "wand" => Self::Wand,
            "wor" => Self::Wor,
            "trireg" => Self::Trireg,
            "uwire" => Self::Uwire,
            "none" => Self::None,
            _ => return None,
        })
    }
}

/// A parsed `` `timescale `` value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timescale {
    pub unit: String,
    pub precision: String,
}

/// Macro and directive state scoped to one compilation unit: process-global
/// by default, per-file under `-fileunit`.
#[derive(Clone, Debug, Default)]
pub struct CompilationUnit {
    pub macros: MacroStorage,
    pub default_nettype: DefaultNettype,
    pub timescale: Option<Timescale>,
}

impl CompilationUnit {
    pub fn new() -> Self {
        Self::default()
    }

    /// A unit pre-seeded with the `+define+` command-line macros.
    pub fn from_options(options: &Options, symbols: &SymbolTable) -> Self {
        let mut unit = Self::new();
        for define in &options.defines {
            let name = symbols.register(&define.name);
            let body = define.value.clone().unwrap_or_default();
            let tokens = macros::tokenize(&body);
            let token_positions = vec![(0, 0); tokens.len()];
            unit.macros.insert(
                name,
                MacroInfo {
                    name,
                    file: PathId::BAD,
                    start_line: 0,
                    name_col: 0,
                    arguments: Vec::new(),
                    has_formal_list: false,
                    tokens,
                    token_positions,
                },
            );
        }
        unit
    }

    /// Hash over the ambient macro state, part of every cache key so that a
    /// `` `define ``/`` `undefineall `` upstream invalidates downstream
    /// entries.
    pub fn macro_signature(&self, symbols: &SymbolTable) -> String {
        let mut entries: Vec<(String, String)> = self
            .macros
            .values()
            .map(|info| (symbols.text(info.name).to_string(), info.body_text()))
            .collect();
        entries.sort();
        let mut hasher = Md5::new();
        for (name, body) in entries {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(body.as_bytes());
            hasher.update(b";");
        }
        hex(&hasher.finalize())
    }
}

/// Evaluation instructions passed from a calling scope, e.g. mute for
/// speculative trial expansion.
#[derive(Clone, Copy, Debug)]
pub struct SpecialInstructions {
    /// Suppress diagnostics entirely.
    pub mute: bool,
    /// Record macro-call edges and abort on cycles.
    pub check_loop: bool,
    /// Re-emit an undefined macro call as-is instead of diagnosing it.
    pub as_is_undefined_macro: bool,
    /// Substitute a marker for macros that expand to nothing.
    pub mark_empty_macro: bool,
    /// Strip `` `line `` bookkeeping from nested evaluation output.
    pub filter_file_line: bool,
    /// Keep macros defined during this evaluation in the unit.
    pub persist: bool,
}

impl Default for SpecialInstructions {
    fn default() -> Self {
        Self {
            mute: false,
            check_loop: true,
            as_is_undefined_macro: false,
            mark_empty_macro: false,
            filter_file_line: true,
            persist: true,
        }
    }
}

/// A directive-generated region of the expanded output, back-referencing its
/// preprocessor-tree node. The parse-tree listener grafts the referenced
/// subtree into the AST at this position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sentinel {
    pub node: NodeId,
    pub exp_start: (u32, u16),
    pub exp_end: (u32, u16),
}

/// Everything `preprocess` produces for one file.
#[derive(Debug)]
pub struct PreprocessResult {
    pub file: PathId,
    pub text: String,
    pub tree: FileContent,
    pub trace: Vec<IncludeFileInfo>,
    pub translations: Vec<LineTranslationInfo>,
    pub sentinels: Vec<Sentinel>,
    pub line_count: usize,
}

impl PreprocessResult {
    pub fn location_map(&self) -> LocationMap {
        LocationMap::build(self.file, self.line_count, &self.trace, &self.translations)
    }

    /// Renders the include/macro breadcrumb trace, one entry per line. A
    /// debugging aid for location-map issues.
    pub fn report_include_info(&self, fs: &FileSystem, symbols: &SymbolTable) -> String {
        let mut out = String::new();
        let mut depth = 0usize;
        for info in &self.trace {
            if info.action == SectionAction::Pop {
                depth = depth.saturating_sub(1);
            }
            let label = match info.context {
                SectionContext::Include => fs.leaf(info.section_file),
                SectionContext::Macro => format!("`{}", symbols.text(info.section_symbol)),
            };
            out.push_str(&format!(
                "{:indent$}{:?} {label} expanded {}:{} original {}:{}\n",
                "",
                info.action,
                info.expanded_line,
                info.expanded_col,
                info.original_line,
                info.original_col,
                indent = depth * 2,
            ));
            if info.action == SectionAction::Push {
                depth += 1;
            }
        }
        out
    }
}

struct Run {
    top_file: PathId,
    out: String,
    line: u32,
    col: u16,
    tree: FileContent,
    trace: Vec<IncludeFileInfo>,
    translations: Vec<LineTranslationInfo>,
    sentinels: Vec<Sentinel>,
    include_stack: Vec<PathId>,
    if_stack: Vec<CondFrame>,
    loop_check: LoopCheck,
    /// Macro name -> its `PpDefine` node in this run's tree, so instances
    /// can carry a definition cross-link.
    define_nodes: std::collections::HashMap<SymbolId, NodeId>,
}

impl Run {
    fn new(top_file: PathId) -> Self {
        Self {
            top_file,
            out: String::new(),
            line: 1,
            col: 0,
            tree: FileContent::new(top_file, NodeKind::PpTop),
            trace: Vec::new(),
            translations: Vec::new(),
            sentinels: Vec::new(),
            include_stack: Vec::new(),
            if_stack: Vec::new(),
            loop_check: LoopCheck::new(),
            define_nodes: std::collections::HashMap::new(),
        }
    }

    fn append(&mut self, text: &str) {
        for c in text.chars() {
            if c == '\n' {
                self.line += 1;
                self.col = 0;
            } else {
                self.col = self.col.saturating_add(1);
            }
        }
        self.out.push_str(text);
    }

    fn active(&self) -> bool {
        self.if_stack.last().map(|frame| frame.live).unwrap_or(true)
    }

    fn push_trace(
        &mut self,
        context: SectionContext,
        action: SectionAction,
        section_file: PathId,
        section_symbol: SymbolId,
        original: (u32, u16),
    ) -> usize {
        let index = self.trace.len();
        self.trace.push(IncludeFileInfo {
            context,
            action,
            section_file,
            section_symbol,
            original_line: original.0,
            original_col: original.1,
            expanded_line: self.line,
            expanded_col: self.col,
            index_opposite: -1,
        });
        index
    }

    fn link_trace(&mut self, opening: usize, closing: usize) {
        self.trace[opening].index_opposite = closing as i32;
        self.trace[closing].index_opposite = opening as i32;
    }
}

struct CondFrame {
    live: bool,
    taken_before: bool,
    parent_active: bool,
}

struct Cursor<'t> {
    text: &'t str,
    pos: usize,
    line: u32,
    col: u16,
}

impl<'t> Cursor<'t> {
    fn new(text: &'t str) -> Self {
        Self { text, pos: 0, line: 1, col: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn starts_with(&self, pattern: &str) -> bool {
        self.text[self.pos..].starts_with(pattern)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col = self.col.saturating_add(1);
        }
        Some(c)
    }

    fn eat_ident(&mut self) -> String {
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                ident.push(c);
                self.bump();
            } else {
                break;
            }
        }
        ident
    }

    fn skip_spaces(&mut self) {
        while matches!(self.peek(), Some(' ' | '\t')) {
            self.bump();
        }
    }

    /// Consumes up to and including the newline (or EOF). Returns the line
    /// remainder without the newline.
    fn rest_of_line(&mut self) -> String {
        let mut rest = String::new();
        while let Some(c) = self.peek() {
            self.bump();
            if c == '\n' {
                break;
            }
            rest.push(c);
        }
        rest
    }

    /// Consumes a balanced `(...)` group, returning the inner text.
    fn balanced_parens(&mut self) -> String {
        debug_assert_eq!(self.peek(), Some('('));
        self.bump();
        let mut inner = String::new();
        let mut depth = 1i32;
        let mut in_string = false;
        while let Some(c) = self.peek() {
            match c {
                '"' => in_string = !in_string,
                '\\' if in_string => {
                    inner.push(c);
                    self.bump();
                    if let Some(next) = self.peek() {
                        inner.push(next);
                        self.bump();
                    }
                    continue;
                }
                '(' if !in_string => depth += 1,
                ')' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        self.bump();
                        return inner;
                    }
                }
                _ => {}
            }
            inner.push(c);
            self.bump();
        }
        inner
    }
}

/// Per-file macro expander and directive interpreter.
pub struct Preprocessor<'a> {
    fs: &'a FileSystem,
    symbols: &'a SymbolTable,
    options: &'a Options,
    unit: &'a mut CompilationUnit,
    errors: &'a mut ErrorContainer,
    instructions: SpecialInstructions,
}

impl<'a> Preprocessor<'a> {
    pub fn new(
        fs: &'a FileSystem,
        symbols: &'a SymbolTable,
        options: &'a Options,
        unit: &'a mut CompilationUnit,
        errors: &'a mut ErrorContainer,
    ) -> Self {
        Self { fs, symbols, options, unit, errors, instructions: SpecialInstructions::default() }
    }

    pub fn with_instructions(mut self, instructions: SpecialInstructions) -> Self {
        self.instructions = instructions;
        self
    }

    /// Runs the preprocessor over `file`.
    pub fn preprocess(&mut self, file: PathId) -> Result<PreprocessResult> {
        let source = self.load(file)?;
        let mut run = Run::new(file);
        self.scan_text(&mut run, file, &source);
        if !run.if_stack.is_empty() {
            self.errors.add_kind(
                ErrorKind::PpUnbalancedConditional,
                Location::new(file, run.if_stack.len() as u32, 0, SymbolId::BAD),
            );
        }
        let line_count = run.out.matches('\n').count();
        let root = run.tree.root();
        run.tree.set_span(root, (1, 0), (line_count.max(1) as u32, 0));
        Ok(PreprocessResult {
            file,
            text: run.out,
            tree: run.tree,
            trace: run.trace,
            translations: run.translations,
            sentinels: run.sentinels,
            line_count,
        })
    }

    fn load(&mut self, file: PathId) -> Result<String> {
        let raw = self.fs.read_to_string(file)?;
        let printable =
            |b: u8| b.is_ascii() && (b >= 0x20 || b == b'\t' || b == b'\n' || b == b'\r');
        if !raw.bytes().all(printable) {
            self.errors.add_kind(
                ErrorKind::PpNonAsciiContent,
                Location::new(file, 1, 0, SymbolId::BAD),
            );
        }
        Ok(raw.replace("\r\n", "\n").replace('\r', "\n"))
    }

    fn scan_text(&mut self, run: &mut Run, file: PathId, source: &str) {
        let mut cur = Cursor::new(source);
        while let Some(c) = cur.peek() {
            match c {
                '`' => self.handle_directive(run, file, &mut cur),
                '/' if cur.starts_with("//") => {
                    let mut comment = String::new();
                    while let Some(c) = cur.peek() {
                        if c == '\n' {
                            break;
                        }
                        comment.push(c);
                        cur.bump();
                    }
                    if run.active() {
                        run.append(&comment);
                    }
                }
                '/' if cur.starts_with("/*") => {
                    let mut comment = String::new();
                    comment.push(cur.bump().unwrap());
                    comment.push(cur.bump().unwrap());
                    while let Some(c) = cur.bump() {
                        comment.push(c);
                        if comment.ends_with("*/") {
                            break;
                        }
                    }
                    if run.active() {
                        run.append(&comment);
                    } else {
                        // keep line parity inside suppressed branches
                        run.append(&"\n".repeat(comment.matches('\n').count()));
                    }
                }
                '"' => {
                    let start = (cur.line, cur.col);
                    let mut literal = String::new();
                    literal.push(cur.bump().unwrap());
                    let mut closed = false;
                    while let Some(c) = cur.peek() {
                        if c == '\n' {
                            break;
                        }
                        literal.push(c);
                        cur.bump();
                        if c == '\\' {
                            if let Some(next) = cur.peek() {
                                if next != '\n' {
                                    literal.push(next);
                                    cur.bump();
                                }
                            }
                            continue;
                        }
                        if c == '"' {
                            closed = true;
                            break;
                        }
                    }
                    if !closed && run.active() && !self.instructions.mute {
                        self.errors.add_kind(
                            ErrorKind::PpUnescapedCharacterInString,
                            Location::new(file, start.0, start.1, SymbolId::BAD),
                        );
                    }
                    if run.active() {
                        run.append(&literal);
                    }
                }
                '\n' => {
                    cur.bump();
                    run.append("\n");
                }
                _ => {
                    cur.bump();
                    if run.active() {
                        let mut buffer = [0u8; 4];
                        run.append(c.encode_utf8(&mut buffer));
                    }
                }
            }
        }
    }

    fn handle_directive(&mut self, run: &mut Run, file: PathId, cur: &mut Cursor<'_>) {
        let start = (cur.line, cur.col);
        cur.bump(); // backtick
        let name = cur.eat_ident();
        if name.is_empty() {
            if run.active() {
                run.append("`");
            }
            return;
        }
        match name.as_str() {
            "ifdef" | "ifndef" | "elsif" | "else" | "endif" => {
                self.handle_conditional(run, file, cur, &name, start);
            }
            _ if !run.active() => {
                // inactive branch: the directive is lexed for the if-stack
                // above but otherwise suppressed
            }
            "define" => self.handle_define(run, file, cur, start),
            "include" => self.handle_include(run, file, cur, start),
            "undef" => {
                cur.skip_spaces();
                let target = cur.eat_ident();
                let id = self.symbols.register(&target);
                if self.unit.macros.remove(&id).is_none() && !self.instructions.mute {
                    self.errors.add_kind(
                        ErrorKind::PpUndefUnknownMacro,
                        Location::new(file, start.0, start.1, id),
                    );
                }
                self.pp_node(run, NodeKind::PpUndef, id, start, (cur.line, cur.col));
            }
            "undefineall" => {
                self.unit.macros.clear();
                self.pp_node(run, NodeKind::PpUndefineall, SymbolId::BAD, start, (cur.line, cur.col));
            }
            "resetall" => {
                self.unit.default_nettype = DefaultNettype::Wire;
                self.unit.timescale = None;
                self.pp_node(run, NodeKind::PpResetall, SymbolId::BAD, start, (cur.line, cur.col));
            }
            "timescale" => {
                let rest = {
                    cur.skip_spaces();
                    let mut text = String::new();
                    while let Some(c) = cur.peek() {
                        if c == '\n' || c == '/' && cur.starts_with("//") {
                            break;
                        }
                        text.push(c);
                        cur.bump();
                    }
                    text
                };
                match RE_TIMESCALE.captures(&rest) {
                    Some(captures) => {
                        self.unit.timescale = Some(Timescale {
                            unit: format!("{}{}", &captures[1], &captures[2]),
                            precision: format!("{}{}", &captures[3], &captures[4]),
                        });
                    }
                    None => {
                        if !self.instructions.mute {
                            self.errors.add_kind(
                                ErrorKind::PpInvalidTimescale,
                                Location::new(file, start.0, start.1, SymbolId::BAD),
                            );
                        }
                    }
                }
                self.pp_node(run, NodeKind::PpTimescale, SymbolId::BAD, start, (cur.line, cur.col));
            }
            "default_nettype" => {
                cur.skip_spaces();
                let value = cur.eat_ident();
                if let Some(nettype) = DefaultNettype::parse(&value) {
                    self.unit.default_nettype = nettype;
                } else if !self.instructions.mute {
                    self.errors.add_kind(
                        ErrorKind::PpUnknownDirective,
                        Location::new(file, start.0, start.1, self.symbols.register(&value)),
                    );
                }
                let symbol = self.symbols.register(&value);
                self.pp_node(run, NodeKind::PpDefaultNettype, symbol, start, (cur.line, cur.col));
            }
            "line" => {
                cur.skip_spaces();
                let line_text = cur.eat_ident();
                cur.skip_spaces();
                let mut pretend_path = String::new();
                if cur.peek() == Some('"') {
                    cur.bump();
                    while let Some(c) = cur.peek() {
                        if c == '"' || c == '\n' {
                            break;
                        }
                        pretend_path.push(c);
                        cur.bump();
                    }
                    if cur.peek() == Some('"') {
                        cur.bump();
                    }
                }
                cur.skip_spaces();
                let _level = cur.eat_ident();
                if let Ok(pretend_line) = line_text.parse::<u32>() {
                    let pretend_file = self.fs.to_path_id(&pretend_path);
                    run.translations.push(LineTranslationInfo {
                        pretend_file,
                        // applies from the line after the directive
                        original_line: start.0 + 1,
                        pretend_line,
                    });
                }
                self.pp_node(run, NodeKind::PpLineDirective, SymbolId::BAD, start, (cur.line, cur.col));
            }
            "pragma" | "celldefine" | "endcelldefine" | "begin_keywords" | "end_keywords"
            | "unconnected_drive" | "nounconnected_drive" => {
                cur.rest_of_line();
                run.append("\n");
                self.pp_node(run, NodeKind::PpPragma, self.symbols.register(&name), start, (cur.line, cur.col));
            }
            "__LINE__" => run.append(&start.0.to_string()),
            "__FILE__" => {
                let path = self.fs.to_path(file);
                run.append(&format!("\"{}\"", path.display()));
            }
            _ => self.handle_macro_call(run, file, cur, &name, start),
        }
    }

    fn handle_conditional(
        &mut self,
        run: &mut Run,
        file: PathId,
        cur: &mut Cursor<'_>,
        directive: &str,
        start: (u32, u16),
    ) {
        let kind = match directive {
            "ifdef" => NodeKind::PpIfdef,
            "ifndef" => NodeKind::PpIfndef,
            "elsif" => NodeKind::PpElsif,
            "else" => NodeKind::PpElse,
            _ => NodeKind::PpEndif,
        };
        match directive {
            "ifdef" | "ifndef" => {
                cur.skip_spaces();
                let target = cur.eat_ident();
                let id = self.symbols.register(&target);
                let mut defined = self.unit.macros.contains_key(&id);
                if directive == "ifndef" {
                    defined = !defined;
                }
                let parent_active = run.active();
                run.if_stack.push(CondFrame {
                    live: parent_active && defined,
                    taken_before: defined,
                    parent_active,
                });
                self.pp_node(run, kind, id, start, (cur.line, cur.col));
            }
            "elsif" => {
                cur.skip_spaces();
                let target = cur.eat_ident();
                let id = self.symbols.register(&target);
                let defined = self.unit.macros.contains_key(&id);
                match run.if_stack.last_mut() {
                    Some(frame) => {
                        frame.live = frame.parent_active && !frame.taken_before && defined;
                        frame.taken_before |= defined;
                    }
                    None => self.errors.add_kind(
                        ErrorKind::PpUnbalancedConditional,
                        Location::new(file, start.0, start.1, id),
                    ),
                }
                self.pp_node(run, kind, id, start, (cur.line, cur.col));
            }
            "else" => {
                match run.if_stack.last_mut() {
                    Some(frame) => {
                        frame.live = frame.parent_active && !frame.taken_before;
                        frame.taken_before = true;
                    }
                    None => self.errors.add_kind(
                        ErrorKind::PpUnbalancedConditional,
                        Location::new(file, start.0, start.1, SymbolId::BAD),
                    ),
                }
                self.pp_node(run, kind, SymbolId::BAD, start, (cur.line, cur.col));
            }
            _ => {
                if run.if_stack.pop().is_none() {
                    self.errors.add_kind(
                        ErrorKind::PpUnbalancedConditional,
                        Location::new(file, start.0, start.1, SymbolId::BAD),
                    );
                }
                self.pp_node(run, kind, SymbolId::BAD, start, (cur.line, cur.col));
            }
        }
    }

    fn handle_define(&mut self, run: &mut Run, file: PathId, cur: &mut Cursor<'_>, start: (u32, u16)) {
        cur.skip_spaces();
        let name_col = cur.col;
        let name = cur.eat_ident();
        if name.is_empty() {
            if !self.instructions.mute {
                self.errors.add_kind(
                    ErrorKind::PpDefineSyntax,
                    Location::new(file, start.0, start.1, SymbolId::BAD),
                );
            }
            cur.rest_of_line();
            run.append("\n");
            return;
        }
        let name_id = self.symbols.register(&name);

        // a formal list only exists when '(' follows the name directly
        let has_formal_list = cur.peek() == Some('(');
        let mut arguments = Vec::new();
        if has_formal_list {
            let inner = cur.balanced_parens();
            for formal in macros::split_arguments(&inner) {
                let formal = formal.trim();
                if formal.is_empty() {
                    continue;
                }
                let (arg_name, default) = match formal.split_once('=') {
                    Some((n, d)) => (n.trim().to_owned(), Some(d.trim().to_owned())),
                    None => (formal.to_owned(), None),
                };
                arguments.push(MacroArg { name: arg_name, default });
            }
        }

        // body: rest of line plus continuation lines
        if cur.peek() == Some(' ') || cur.peek() == Some('\t') {
            cur.skip_spaces();
        }
        let body_start = (cur.line, cur.col);
        let mut body = String::new();
        let mut consumed_lines = 1u32;
        loop {
            let line = cur.rest_of_line();
            if let Some(stripped) = line.strip_suffix('\\') {
                body.push_str(stripped);
                body.push('\n');
                consumed_lines += 1;
            } else {
                body.push_str(&line);
                break;
            }
        }

        let tokens = macros::tokenize(&body);
        let mut token_positions = Vec::with_capacity(tokens.len());
        let mut position = body_start;
        for token in &tokens {
            token_positions.push(position);
            for c in token.chars() {
                if c == '\n' {
                    position.0 += 1;
                    position.1 = 0;
                } else {
                    position.1 = position.1.saturating_add(1);
                }
            }
        }

        let node = self.pp_node(run, NodeKind::PpDefine, name_id, start, (cur.line, cur.col));
        run.define_nodes.insert(name_id, node);
        for formal in &arguments {
            let symbol = self.symbols.register(&formal.name);
            let arg = run.tree.add_child(node, NodeKind::PpDefineArg, symbol);
            run.tree.set_span(arg, start, start);
        }
        let body_node = run.tree.add_child(node, NodeKind::PpDefineBody, SymbolId::BAD);
        run.tree.set_span(body_node, body_start, (cur.line, cur.col));

        let info = MacroInfo {
            name: name_id,
            file,
            start_line: start.0,
            name_col,
            arguments,
            has_formal_list,
            tokens,
            token_positions,
        };
        self.unit.macros.insert(name_id, info);

        // blank replacement for the consumed directive lines
        run.append(&"\n".repeat(consumed_lines as usize));
    }

    fn handle_include(&mut self, run: &mut Run, file: PathId, cur: &mut Cursor<'_>, start: (u32, u16)) {
        cur.skip_spaces();
        let delim = cur.peek();
        let close = match delim {
            Some('"') => '"',
            Some('<') => '>',
            _ => {
                if !self.instructions.mute {
                    self.errors.add_kind(
                        ErrorKind::PpCannotOpenIncludeFile,
                        Location::new(file, start.0, start.1, SymbolId::BAD),
                    );
                }
                cur.rest_of_line();
                run.append("\n");
                return;
            }
        };
        cur.bump();
        let mut filename = String::new();
        while let Some(c) = cur.peek() {
            if c == close || c == '\n' {
                break;
            }
            filename.push(c);
            cur.bump();
        }
        if cur.peek() == Some(close) {
            cur.bump();
        }
        let filename_id = self.symbols.register(&filename);

        let resolved = self.resolve_include(file, &filename);
        let Some(included) = resolved else {
            if !self.instructions.mute {
                self.errors.add_kind(
                    ErrorKind::PpCannotOpenIncludeFile,
                    Location::new(file, start.0, start.1, filename_id),
                );
            }
            cur.rest_of_line();
            run.append("\n");
            return;
        };

        if included == run.top_file || run.include_stack.contains(&included) {
            self.errors.add_kind(
                ErrorKind::PpRecursiveIncludeDirective,
                Location::new(file, start.0, start.1, filename_id),
            );
            cur.rest_of_line();
            run.append("\n");
            return;
        }

        let node = self.pp_node(run, NodeKind::PpInclude, filename_id, start, (cur.line, cur.col));
        cur.rest_of_line();

        let source = match self.fs.read_to_string(included) {
            Ok(source) => source.replace("\r\n", "\n").replace('\r', "\n"),
            Err(_) => {
                self.errors.add_kind(
                    ErrorKind::PpCannotOpenIncludeFile,
                    Location::new(file, start.0, start.1, filename_id),
                );
                run.append("\n");
                return;
            }
        };
        let source = if source.ends_with('\n') || source.is_empty() {
            source
        } else {
            format!("{source}\n")
        };

        let sentinel_start = (run.line, run.col);
        let opening =
            run.push_trace(SectionContext::Include, SectionAction::Push, included, filename_id, (1, 0));
        run.include_stack.push(included);
        self.scan_text(run, included, &source);
        run.include_stack.pop();
        // the blank line emitted below replaces the directive line, so the
        // outer mapping resumes at the directive's own line
        let closing = run.push_trace(
            SectionContext::Include,
            SectionAction::Pop,
            included,
            filename_id,
            (start.0, 0),
        );
        run.link_trace(opening, closing);
        run.sentinels.push(Sentinel { node, exp_start: sentinel_start, exp_end: (run.line, run.col) });
        run.append("\n");
    }

    fn resolve_include(&self, from: PathId, filename: &str) -> Option<PathId> {
        let leaf = std::path::Path::new(filename);
        if let Some(parent) = self.fs.to_path(from).parent() {
            if let Some(found) = self.fs.locate(parent, leaf) {
                return Some(found);
            }
        }
        for dir in &self.options.include_dirs {
            if let Some(found) = self.fs.locate(dir, leaf) {
                return Some(found);
            }
        }
        None
    }

    fn handle_macro_call(
        &mut self,
        run: &mut Run,
        file: PathId,
        cur: &mut Cursor<'_>,
        name: &str,
        start: (u32, u16),
    ) {
        let name_id = self.symbols.register(name);
        let info = self.unit.macros.get(&name_id).cloned();

        let Some(info) = info else {
            if self.instructions.as_is_undefined_macro {
                run.append(&format!("`{name}"));
            } else if !self.instructions.mute {
                self.errors.add_kind(
                    ErrorKind::PpUnknownMacro,
                    Location::new(file, start.0, start.1, name_id),
                );
            }
            return;
        };

        let mut actuals = Vec::new();
        if info.has_formal_list {
            cur.skip_spaces();
            if cur.peek() == Some('(') {
                let inner = cur.balanced_parens();
                actuals = macros::split_arguments(&inner);
                if actuals.len() == 1 && actuals[0].trim().is_empty() {
                    actuals.clear();
                }
            }
        }
        let call_end = (cur.line, cur.col);

        let node = self.pp_node(run, NodeKind::PpMacroInstance, name_id, start, call_end);
        if let Some(&definition) = run.define_nodes.get(&name_id) {
            run.tree.object_mut(node).definition = definition;
        }
        for actual in &actuals {
            let symbol = self.symbols.register(actual.trim());
            let arg = run.tree.add_child(node, NodeKind::PpMacroArg, symbol);
            run.tree.set_span(arg, start, call_end);
        }

        let Some(expansion) = self.evaluate_macro(run, file, start, &info, actuals) else {
            return;
        };

        // `__FILE__`/`__LINE__` sentinels resolve to the outermost caller
        let expansion = expansion
            .replace(FILE_MARKING, &format!("\"{}\"", self.fs.to_path(file).display()))
            .replace(LINE_MARKING, &start.0.to_string());

        let sentinel_start = (run.line, run.col);
        let opening = run.push_trace(
            SectionContext::Macro,
            SectionAction::Push,
            info.file,
            name_id,
            info.body_start(),
        );
        run.append(&expansion);
        let closing =
            run.push_trace(SectionContext::Macro, SectionAction::Pop, info.file, name_id, call_end);
        run.link_trace(opening, closing);
        run.sentinels.push(Sentinel { node, exp_start: sentinel_start, exp_end: (run.line, run.col) });
    }

    /// Evaluates one macro instance to its expansion text. `None` means the
    /// expansion was aborted (a diagnostic has been emitted).
    fn evaluate_macro(
        &mut self,
        run: &mut Run,
        file: PathId,
        call: (u32, u16),
        info: &MacroInfo,
        mut actuals: Vec<String>,
    ) -> Option<String> {
        // actual arguments are themselves macro-expanded before substitution
        for actual in &mut actuals {
            if actual.contains('`') {
                *actual = self.expand_text(run, file, call, SymbolId::BAD, actual)?;
            }
            *actual = actual.trim().to_owned();
        }

        if actuals.len() > info.arguments.len() && !self.instructions.mute {
            if info.arguments.is_empty()
                && info.tokens.iter().find(|t| !t.trim().is_empty()).map(String::as_str) == Some("(")
            {
                self.errors.add(Diagnostic::with_extras(
                    ErrorKind::PpMacroHasSpaceBeforeArgs,
                    vec![
                        Location::new(info.file, info.start_line, info.name_col, info.name),
                        Location::new(file, call.0, call.1, info.name),
                    ],
                ));
            } else if !info.arguments.is_empty() {
                let actual_count = self.symbols.register(&actuals.len().to_string());
                let formal_count = self.symbols.register(&info.arguments.len().to_string());
                self.errors.add(Diagnostic::with_extras(
                    ErrorKind::PpTooManyArgsMacro,
                    vec![
                        Location::new(file, call.0, call.1, info.name),
                        Location::object(actual_count),
                        Location::new(info.file, info.start_line, info.name_col, formal_count),
                    ],
                ));
            }
        }

        let mut tokens = info.tokens.clone();
        let mut missing_actual = false;
        for (index, formal) in info.arguments.iter().enumerate() {
            let actual = actuals.get(index).map(|s| s.trim()).filter(|s| !s.is_empty());
            match (actual, &formal.default) {
                (Some(actual), _) => macros::substitute(&mut tokens, &formal.name, actual),
                (None, Some(default)) => macros::substitute(&mut tokens, &formal.name, default),
                (None, None) => {
                    if index >= actuals.len() {
                        if !self.instructions.mute {
                            let described = self
                                .symbols
                                .register(&format!("{} ({})", index + 1, formal.name));
                            self.errors.add(Diagnostic::with_extras(
                                ErrorKind::PpMacroNoDefaultValue,
                                vec![
                                    Location::new(file, call.0, call.1, described),
                                    Location::new(
                                        info.file,
                                        info.start_line,
                                        info.name_col,
                                        info.name,
                                    ),
                                ],
                            ));
                        }
                        missing_actual = true;
                    }
                    macros::substitute(&mut tokens, &formal.name, "");
                }
            }
        }
        if missing_actual {
            // the unexpandable call is re-emitted verbatim
            return Some(format!("`{}", self.symbols.text(info.name)));
        }

        let tokens = macros::resolve_quotes(&tokens);
        let mut body = splice_continuations(&tokens.concat());

        // record `__LINE__`/`__FILE__` as opaque sentinels; they resolve at
        // the outermost call site, not here
        body = body.replace("`__LINE__", LINE_MARKING).replace("`__FILE__", FILE_MARKING);

        if body.contains('`') {
            // nested macros expand in a fresh scope under loop detection
            body = self.expand_text(run, file, call, info.name, &body)?;
        }
        Some(body)
    }

    /// Expands every macro instance inside `text`. `caller` is the macro
    /// whose body (or argument) this is; edges `caller -> callee` feed the
    /// recursion check.
    fn expand_text(
        &mut self,
        run: &mut Run,
        file: PathId,
        call: (u32, u16),
        caller: SymbolId,
        text: &str,
    ) -> Option<String> {
        let mut out = String::new();
        let mut cur = Cursor::new(text);
        while let Some(c) = cur.peek() {
            if c != '`' {
                out.push(c);
                cur.bump();
                continue;
            }
            cur.bump();
            let name = cur.eat_ident();
            if name.is_empty() {
                out.push('`');
                continue;
            }
            if name == "__LINE__" {
                out.push_str(LINE_MARKING);
                continue;
            }
            if name == "__FILE__" {
                out.push_str(FILE_MARKING);
                continue;
            }
            let name_id = self.symbols.register(&name);
            if self.instructions.check_loop && run.loop_check.add_edge(caller, name_id) {
                let cycle = run.loop_check.report_loop(caller, name_id);
                let mut locations = Vec::new();
                for symbol in cycle {
                    if let Some(info) = self.unit.macros.get(&symbol) {
                        locations.push(Location::new(
                            info.file,
                            info.start_line,
                            info.name_col,
                            symbol,
                        ));
                    } else {
                        locations.push(Location::object(symbol));
                    }
                }
                if locations.is_empty() {
                    locations.push(Location::new(file, call.0, call.1, name_id));
                }
                self.errors.add(Diagnostic::with_extras(
                    ErrorKind::PpRecursiveMacroDefinition,
                    locations,
                ));
                return None;
            }
            let Some(info) = self.unit.macros.get(&name_id).cloned() else {
                if self.instructions.as_is_undefined_macro {
                    out.push('`');
                    out.push_str(&name);
                } else if !self.instructions.mute {
                    self.errors.add_kind(
                        ErrorKind::PpUnknownMacro,
                        Location::new(file, call.0, call.1, name_id),
                    );
                }
                continue;
            };
            let mut actuals = Vec::new();
            if info.has_formal_list {
                cur.skip_spaces();
                if cur.peek() == Some('(') {
                    let inner = cur.balanced_parens();
                    actuals = macros::split_arguments(&inner);
                    if actuals.len() == 1 && actuals[0].trim().is_empty() {
                        actuals.clear();
                    }
                }
            }
            let expansion = self.evaluate_macro(run, file, call, &info, actuals)?;
            out.push_str(&expansion);
        }
        Some(out)
    }

    fn pp_node(
        &mut self,
        run: &mut Run,
        kind: NodeKind,
        symbol: SymbolId,
        start: (u32, u16),
        end: (u32, u16),
    ) -> NodeId {
        let root = run.tree.root();
        let node = run.tree.add_child(root, kind, symbol);
        run.tree.set_span(node, start, end);
        node
    }
}

/// Collapses backslash-newline pairs outside string literals.
fn splice_continuations(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut in_string = false;
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            in_string = !in_string;
            out.push(c);
        } else if c == '\\' && !in_string && chars.peek() == Some(&'\n') {
            chars.next();
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;
    use pretty_assertions::assert_eq;

    struct Fixture {
        fs: FileSystem,
        symbols: SymbolTable,
        options: Options,
        dir: tempfile::TempDir,
    }

    impl Fixture {
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

        fn preprocess(&mut self, file: PathId) -> (PreprocessResult, ErrorContainer) {
            let mut unit = CompilationUnit::from_options(&self.options, &self.symbols);
            let mut errors = ErrorContainer::new();
            let result = {
                let mut pp = Preprocessor::new(
                    &self.fs,
                    &self.symbols,
                    &self.options,
                    &mut unit,
                    &mut errors,
                );
                pp.preprocess(file).unwrap()
            };
            (result, errors)
        }
    }

    #[test]
    fn macro_with_default_argument() {
        let mut fixture = Fixture::new();
        let file = fixture.file("t.sv", "`define M(x, y=3) x+y\n`M(a)\n");
        let (result, errors) = fixture.preprocess(file);
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(result.text, "\na+3\n");
        // one macro push/pop pair around the expansion
        let macro_entries: Vec<_> = result
            .trace
            .iter()
            .filter(|i| i.context == SectionContext::Macro)
            .collect();
        assert_eq!(macro_entries.len(), 2);
        assert_eq!(macro_entries[0].action, SectionAction::Push);
        assert_eq!(macro_entries[1].action, SectionAction::Pop);
        assert_eq!(macro_entries[0].index_opposite, 1);
    }

    #[test]
    fn cyclic_macro_reports_once() {
        let mut fixture = Fixture::new();
        let file = fixture.file("t.sv", "`define A `B\n`define B `A\n`A\n");
        let (result, errors) = fixture.preprocess(file);
        let recursive: Vec<_> = errors
            .diagnostics()
            .iter()
            .filter(|d| d.kind == ErrorKind::PpRecursiveMacroDefinition)
            .collect();
        assert_eq!(recursive.len(), 1);
        // no expansion text ambient after the abort
        assert_eq!(result.text, "\n\n\n");
    }

    #[test]
    fn include_defines_are_visible() {
        let mut fixture = Fixture::new();
        fixture.file("inc/foo.svh", "`define X 1\n");
        let file = fixture.file("t.sv", "`include \"foo.svh\"\n`X\n");
        fixture.options.include_dirs.push(fixture.dir.path().join("inc"));
        let (result, errors) = fixture.preprocess(file);
        assert!(errors.is_empty(), "{errors:?}");
        // line 1: include body blank (its define line), line 2: blank for
        // the directive line, line 3: the expansion
        assert_eq!(result.text, "\n\n1\n");
        let includes: Vec<_> = result
            .trace
            .iter()
            .filter(|i| i.context == SectionContext::Include)
            .collect();
        assert_eq!(includes.len(), 2);
    }

    #[test]
    fn recursive_include_is_diagnosed() {
        let mut fixture = Fixture::new();
        fixture.file("a.svh", "`include \"b.svh\"\n");
        fixture.file("b.svh", "`include \"a.svh\"\n");
        let file = fixture.file("t.sv", "`include \"a.svh\"\n");
        fixture.options.include_dirs.push(fixture.dir.path().to_path_buf());
        let (_result, errors) = fixture.preprocess(file);
        assert!(errors.contains(ErrorKind::PpRecursiveIncludeDirective));
    }

    #[test]
    fn conditional_branches_select() {
        let mut fixture = Fixture::new();
        let file = fixture.file(
            "t.sv",
            "`define FOO\n`ifdef FOO\nyes\n`else\nno\n`endif\n",
        );
        let (result, errors) = fixture.preprocess(file);
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(result.text, "\n\nyes\n\n\n\n");
    }

    #[test]
    fn ifndef_nesting_balances() {
        let mut fixture = Fixture::new();
        let mut source = String::from("`ifndef GUARD\n");
        for depth in 0..20 {
            source.push_str(&format!("`ifdef X{depth}\n"));
        }
        for _ in 0..20 {
            source.push_str("`endif\n");
        }
        source.push_str("`endif\n");
        let file = fixture.file("t.sv", &source);
        let (_result, errors) = fixture.preprocess(file);
        assert!(!errors.contains(ErrorKind::PpUnbalancedConditional), "{errors:?}");
    }

    #[test]
    fn unbalanced_conditional_at_eof() {
        let mut fixture = Fixture::new();
        let file = fixture.file("t.sv", "`ifdef FOO\n");
        let (_result, errors) = fixture.preprocess(file);
        assert!(errors.contains(ErrorKind::PpUnbalancedConditional));
    }

    #[test]
    fn missing_actual_without_default() {
        let mut fixture = Fixture::new();
        let file = fixture.file("t.sv", "`define M(a, b) a+b\n`M(1)\n");
        let (_result, errors) = fixture.preprocess(file);
        assert!(errors.contains(ErrorKind::PpMacroNoDefaultValue));
    }

    #[test]
    fn token_concat_around_underscore() {
        let mut fixture = Fixture::new();
        let file = fixture.file("t.sv", "`define CAT(a, b) a``_``b\n`CAT(left, right)\n");
        let (result, errors) = fixture.preprocess(file);
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(result.text, "\nleft_right\n");
    }

    #[test]
    fn line_marker_resolves_to_outermost_caller() {
        let mut fixture = Fixture::new();
        let file = fixture.file(
            "t.sv",
            "`define INNER `__LINE__\n`define OUTER `INNER\n`OUTER\n",
        );
        let (result, errors) = fixture.preprocess(file);
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(result.text, "\n\n3\n");
    }

    #[test]
    fn line_count_is_preserved() {
        let mut fixture = Fixture::new();
        let source = "`define A 1\nmodule m;\n`ifdef NO\nhidden\n`endif\nendmodule\n";
        let file = fixture.file("t.sv", source);
        let (result, _errors) = fixture.preprocess(file);
        assert_eq!(result.text.matches('\n').count(), source.matches('\n').count());
    }

    #[test]
    fn single_newline_file_is_empty_output() {
        let mut fixture = Fixture::new();
        let file = fixture.file("t.sv", "\n");
        let (result, errors) = fixture.preprocess(file);
        assert!(errors.is_empty());
        assert_eq!(result.text, "\n");
    }

    #[test]
    fn undef_removes_macro() {
        let mut fixture = Fixture::new();
        let file = fixture.file("t.sv", "`define X 1\n`undef X\n`ifdef X\nyes\n`endif\n");
        let (result, errors) = fixture.preprocess(file);
        assert!(errors.is_empty(), "{errors:?}");
        assert!(!result.text.contains("yes"));
    }

    #[test]
    fn default_nettype_is_tracked() {
        let mut fixture = Fixture::new();
        let file = fixture.file("t.sv", "`default_nettype none\n");
        let mut unit = CompilationUnit::from_options(&fixture.options, &fixture.symbols);
        let mut errors = ErrorContainer::new();
        {
            let mut pp = Preprocessor::new(
                &fixture.fs,
                &fixture.symbols,
                &fixture.options,
                &mut unit,
                &mut errors,
            );
            pp.preprocess(file).unwrap();
        }
        assert_eq!(unit.default_nettype, DefaultNettype::None);
    }

    #[test]
    fn map_locations_points_into_macro_body() {
        let mut fixture = Fixture::new();
        let file = fixture.file("t.sv", "`define M xx+yy\nwire w = `M;\n");
        let (result, errors) = fixture.preprocess(file);
        assert!(errors.is_empty(), "{errors:?}");
        let map = result.location_map();
        // the expansion lands on line 2 after "wire w = "
        let col = result.text.lines().nth(1).unwrap().find("xx").unwrap() as u16;
        let span = map.map_locations(2, col, 2, col + 2);
        assert_eq!(span.start_file, file);
        // macro body starts on line 1 of the source
        assert_eq!(span.start_line, 1);
    }
}
