//! Language diagnostics.
//!
//! Diagnostics are never raised as Rust errors: they are appended to an
//! [`ErrorContainer`] owned by the worker that found them and merged upward
//! after its bucket completes. The pipeline keeps going for anything below
//! [`Severity::Fatal`].

use crate::{fs::FileSystem, fs::PathId, symbols::SymbolId, symbols::SymbolTable};
use serde::{Deserialize, Serialize};
use std::fmt;
use yansi::{Color, Paint};

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Note,
    Warning,
    Syntax,
    #[default]
    Error,
    Fatal,
}

impl Severity {
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Syntax | Self::Error | Self::Fatal)
    }

    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Note => "NOTE",
            Self::Warning => "WARNING",
            Self::Syntax => "SYNTAX",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }

    /// Returns the color to format the severity with.
    pub const fn color(&self) -> Color {
        match self {
            Self::Note => Color::Cyan,
            Self::Warning => Color::Yellow,
            Self::Syntax | Self::Error => Color::Red,
            Self::Fatal => Color::Magenta,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every diagnostic the front-end can emit, with its fixed severity and
/// message template. `%s` placeholders are substituted with the extra
/// location symbols in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    // Preprocessor
    PpDefineSyntax,
    PpUnknownDirective,
    PpUnknownMacro,
    PpUndefUnknownMacro,
    PpRecursiveMacroDefinition,
    PpRecursiveIncludeDirective,
    PpCannotOpenIncludeFile,
    PpMacroNoDefaultValue,
    PpTooManyArgsMacro,
    PpMacroHasSpaceBeforeArgs,
    PpUnescapedCharacterInString,
    PpNonAsciiContent,
    PpInvalidTimescale,
    PpUnbalancedConditional,
    // Parser
    PaSyntaxError,
    PaSplitFileBoundary,
    // First-pass compilation
    CompUnmatchedLabel,
    CompMultiplyDefinedDesignUnit,
    // Elaboration
    ElabUnknownInterfaceMember,
    ElabIllegalImplicitNet,
    ElabNoTopLevelModule,
    ElabInvalidParamOverride,
    // Binder / UHDM
    UhdmFailedToBind,
    UhdmUnsupportedStmt,
    UhdmUnsupportedType,
    // Integrity checker
    IntegrityMissingParent,
    IntegrityDuplicateMember,
    IntegrityNullActual,
    IntegrityEmptyName,
    IntegrityMissingFile,
    IntegrityBadRange,
}

impl ErrorKind {
    pub const fn severity(&self) -> Severity {
        use ErrorKind::*;
        match self {
            PpDefineSyntax | PpUnescapedCharacterInString | PpNonAsciiContent
            | PpInvalidTimescale | PpUnbalancedConditional | PaSyntaxError
            | CompUnmatchedLabel => Severity::Syntax,
            PpUnknownDirective | PpTooManyArgsMacro | PpMacroHasSpaceBeforeArgs
            | PpUndefUnknownMacro | PaSplitFileBoundary | UhdmUnsupportedStmt
            | UhdmUnsupportedType | IntegrityMissingParent | IntegrityDuplicateMember
            | IntegrityNullActual | IntegrityEmptyName | IntegrityMissingFile
            | IntegrityBadRange | CompMultiplyDefinedDesignUnit => Severity::Warning,
            PpUnknownMacro | PpRecursiveMacroDefinition | PpRecursiveIncludeDirective
            | PpCannotOpenIncludeFile | PpMacroNoDefaultValue | ElabUnknownInterfaceMember
            | ElabIllegalImplicitNet | ElabInvalidParamOverride | UhdmFailedToBind => {
                Severity::Error
            }
            ElabNoTopLevelModule => Severity::Fatal,
        }
    }

    pub const fn text(&self) -> &'static str {
        use ErrorKind::*;
        match self {
            PpDefineSyntax => "malformed `define directive",
            PpUnknownDirective => "unknown compiler directive `%s",
            PpUnknownMacro => "undefined macro `%s",
            PpUndefUnknownMacro => "`undef of unknown macro %s",
            PpRecursiveMacroDefinition => "recursive macro definition %s",
            PpRecursiveIncludeDirective => "recursive `include directive %s",
            PpCannotOpenIncludeFile => "cannot open include file %s",
            PpMacroNoDefaultValue => "missing actual for macro argument %s with no default",
            PpTooManyArgsMacro => "macro %s called with %s arguments, defined with %s",
            PpMacroHasSpaceBeforeArgs => "macro %s has a space before its argument list",
            PpUnescapedCharacterInString => "unescaped quote inside string literal",
            PpNonAsciiContent => "non-ASCII content",
            PpInvalidTimescale => "invalid `timescale specification",
            PpUnbalancedConditional => "unbalanced conditional compilation directive",
            PaSyntaxError => "syntax error: %s",
            PaSplitFileBoundary => "no safe split boundary found, parsing file whole",
            CompUnmatchedLabel => "block label mismatch: %s vs %s",
            CompMultiplyDefinedDesignUnit => "design unit %s multiply defined",
            ElabUnknownInterfaceMember => "unknown interface member %s",
            ElabIllegalImplicitNet => "implicit net %s illegal under `default_nettype none",
            ElabNoTopLevelModule => "no top level module found in the design",
            ElabInvalidParamOverride => "invalid parameter override %s",
            UhdmFailedToBind => "failed to bind %s",
            UhdmUnsupportedStmt => "statement is not representable, emitted as unsupported",
            UhdmUnsupportedType => "type is not representable, emitted as unsupported",
            IntegrityMissingParent => "object %s has no parent or is not owned by it",
            IntegrityDuplicateMember => "object %s appears twice in one collection",
            IntegrityNullActual => "reference %s has no actual after binding",
            IntegrityEmptyName => "reference without a name",
            IntegrityMissingFile => "object %s carries no file id",
            IntegrityBadRange => "object %s lies outside its parent's source range",
        }
    }
}

/// A position in the user's source plus an optional attached symbol (the
/// object the message talks about).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file: PathId,
    pub line: u32,
    pub col: u16,
    pub object: SymbolId,
}

impl Location {
    pub fn new(file: PathId, line: u32, col: u16, object: SymbolId) -> Self {
        Self { file, line, col, object }
    }

    /// A location that only names an object, with no source position.
    pub fn object(object: SymbolId) -> Self {
        Self { file: PathId::BAD, line: 0, col: 0, object }
    }
}

/// One reported problem: a kind, a primary location, and any number of
/// cross-referenced extra locations (definition sites, caller sites).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub locations: Vec<Location>,
}

impl Diagnostic {
    pub fn new(kind: ErrorKind, loc: Location) -> Self {
        Self { kind, locations: vec![loc] }
    }

    pub fn with_extras(kind: ErrorKind, locations: Vec<Location>) -> Self {
        debug_assert!(!locations.is_empty());
        Self { kind, locations }
    }

    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }

    pub fn primary(&self) -> &Location {
        &self.locations[0]
    }

    /// Renders `file:line:col: SEVERITY: message`, substituting `%s`
    /// placeholders with the extra locations' symbols in order.
    pub fn render(&self, fs: &FileSystem, symbols: &SymbolTable, color: bool) -> String {
        let primary = self.primary();
        let mut message = String::from(self.kind.text());
        let mut extras = self.locations.iter();
        // the primary's own symbol fills the first placeholder
        for loc in std::iter::once(primary).chain({
            extras.next();
            extras
        }) {
            if !message.contains("%s") {
                break;
            }
            let text = symbols.text(loc.object);
            if !text.is_empty() {
                message = message.replacen("%s", &text, 1);
            }
        }
        // leftover placeholders from locations with no symbol
        let message = message.replace("%s", "?");

        let severity = self.severity();
        let header = if primary.file.is_bad() {
            String::new()
        } else {
            format!("{}:{}:{}: ", fs.to_path(primary.file).display(), primary.line, primary.col)
        };
        let mut out = if color {
            format!("{header}{}: {message}", Paint::new(severity.as_str()).fg(severity.color()).bold())
        } else {
            format!("{header}{severity}: {message}")
        };
        for extra in self.locations.iter().skip(1).filter(|l| !l.file.is_bad()) {
            out.push_str(&format!(
                "\n    see {}:{}:{}",
                fs.to_path(extra.file).display(),
                extra.line,
                extra.col
            ));
        }
        out
    }
}

/// Accumulates diagnostics for one worker or for the whole session.
///
/// Containers are cheap; every preprocessing/parsing worker owns one and the
/// main thread merges them back in stage order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ErrorContainer {
    diagnostics: Vec<Diagnostic>,
    /// When set, `add` drops everything on the floor. Used for speculative
    /// macro evaluation.
    #[serde(skip)]
    muted: bool,
}

impl ErrorContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, diag: Diagnostic) {
        if !self.muted {
            self.diagnostics.push(diag);
        }
    }

    pub fn add_kind(&mut self, kind: ErrorKind, loc: Location) {
        self.add(Diagnostic::new(kind, loc));
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn merge(&mut self, other: ErrorContainer) {
        self.diagnostics.extend(other.diagnostics);
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics.iter().filter(|d| d.severity() == severity).count()
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.severity().is_error()).count()
    }

    pub fn has_fatal(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity().is_fatal())
    }

    pub fn contains(&self, kind: ErrorKind) -> bool {
        self.diagnostics.iter().any(|d| d.kind == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Renders every diagnostic in emission order, one per line group.
    pub fn render(&self, fs: &FileSystem, symbols: &SymbolTable, color: bool) -> String {
        let mut out = String::new();
        for diag in &self.diagnostics {
            out.push_str(&diag.render(fs, symbols, color));
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_matches_escalation() {
        assert!(Severity::Note < Severity::Warning);
        assert!(Severity::Warning < Severity::Syntax);
        assert!(Severity::Syntax < Severity::Error);
        assert!(Severity::Error < Severity::Fatal);
    }

    #[test]
    fn render_substitutes_symbols() {
        let fs = FileSystem::new();
        let symbols = SymbolTable::new();
        let name = symbols.register("MY_MACRO");
        let diag = Diagnostic::new(ErrorKind::PpUnknownMacro, Location::object(name));
        let text = diag.render(&fs, &symbols, false);
        assert_eq!(text, "ERROR: undefined macro `MY_MACRO");
    }

    #[test]
    fn muted_container_drops_diagnostics() {
        let mut container = ErrorContainer::new();
        container.set_muted(true);
        container.add_kind(ErrorKind::PpUnknownMacro, Location::object(SymbolId::BAD));
        assert!(container.is_empty());
        container.set_muted(false);
        container.add_kind(ErrorKind::PpUnknownMacro, Location::object(SymbolId::BAD));
        assert_eq!(container.error_count(), 1);
    }

    #[test]
    fn fatal_flag_is_sticky_through_merge() {
        let mut master = ErrorContainer::new();
        let mut worker = ErrorContainer::new();
        worker.add_kind(ErrorKind::ElabNoTopLevelModule, Location::object(SymbolId::BAD));
        master.merge(worker);
        assert!(master.has_fatal());
    }
}
