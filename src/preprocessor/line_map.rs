//! Bidirectional location mapping between expanded output and original
//! source.
//!
//! The preprocessor records an [`IncludeFileInfo`] breadcrumb at every point
//! where the provenance of the expanded text changes: entering an included
//! file or a macro expansion (PUSH) and returning from it (POP). The
//! breadcrumbs form balanced nested spans. [`LocationMap`] replays them once
//! into a per-expanded-line table so that [`LocationMap::map_locations`] can
//! answer queries in `O(log n)` per endpoint. This is the bridge that lets a
//! parser error on expanded text point into the programmer's real source even
//! inside a macro body or an included file.

use crate::{fs::PathId, symbols::SymbolId};
use serde::{Deserialize, Serialize};

/// What kind of section a breadcrumb delimits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SectionContext {
    Include,
    Macro,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SectionAction {
    Push,
    Pop,
}

/// One breadcrumb of the preprocessing trace.
///
/// For a PUSH, `original_*` is the position inside the *section's own source*
/// where its content begins (line 1 of an include file, the body start of a
/// macro definition). For a POP, `original_*` is the position in the *outer*
/// source at which scanning resumes. `index_opposite` cross-links each PUSH
/// with its POP; the pairs nest properly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeFileInfo {
    pub context: SectionContext,
    pub action: SectionAction,
    /// File the section content comes from (the included file, or the file
    /// holding the macro definition).
    pub section_file: PathId,
    /// Macro name for macro sections; BAD for includes.
    pub section_symbol: SymbolId,
    pub original_line: u32,
    pub original_col: u16,
    pub expanded_line: u32,
    pub expanded_col: u16,
    pub index_opposite: i32,
}

/// One `` `line `` directive, honored on top of the structural mapping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineTranslationInfo {
    pub pretend_file: PathId,
    /// First original line the translation applies to.
    pub original_line: u32,
    pub pretend_line: u32,
}

/// A resolved original span.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedSpan {
    pub start_file: PathId,
    pub start_line: u32,
    pub start_col: u16,
    pub end_file: PathId,
    pub end_line: u32,
    pub end_col: u16,
}

#[derive(Clone, Copy, Debug)]
struct MapEntry {
    /// First expanded column this entry covers on its line.
    exp_col_start: u16,
    file: PathId,
    orig_line: u32,
    /// `orig_col = exp_col - col_offset` for columns covered by this entry.
    col_offset: i32,
    /// Stack depth, the disambiguation hint for boundary-crossing spans.
    depth: u32,
}

/// Per-file location-translation cache, built once from the trace.
#[derive(Debug, Default)]
pub struct LocationMap {
    /// `lines[l]` holds the entries of expanded line `l` (1-based), sorted by
    /// `exp_col_start`.
    lines: Vec<Vec<MapEntry>>,
    translations: Vec<LineTranslationInfo>,
    top_file: PathId,
}

#[derive(Clone, Copy)]
struct Frame {
    file: PathId,
    orig_line: u32,
    orig_col: u16,
    depth: u32,
}

impl LocationMap {
    /// Replays `trace` over the expanded output of `top_file`.
    pub fn build(
        top_file: PathId,
        line_count: usize,
        trace: &[IncludeFileInfo],
        translations: &[LineTranslationInfo],
    ) -> Self {
        let mut map = Self {
            lines: vec![Vec::new(); line_count + 2],
            translations: translations.to_vec(),
            top_file,
        };

        let mut current = Frame { file: top_file, orig_line: 1, orig_col: 0, depth: 0 };
        let mut position = (1u32, 0u16);
        let mut stack: Vec<Frame> = Vec::new();

        for info in trace {
            let boundary = (info.expanded_line, info.expanded_col);
            map.emit(current, position, boundary);
            match info.action {
                SectionAction::Push => {
                    // the outer frame pauses; its resume coordinates come
                    // from the matching POP record
                    stack.push(current);
                    current = Frame {
                        file: info.section_file,
                        orig_line: info.original_line,
                        orig_col: info.original_col,
                        depth: current.depth + 1,
                    };
                }
                SectionAction::Pop => {
                    let outer = stack.pop().unwrap_or(Frame {
                        file: top_file,
                        orig_line: 1,
                        orig_col: 0,
                        depth: 0,
                    });
                    current = Frame {
                        file: outer.file,
                        orig_line: info.original_line,
                        orig_col: info.original_col,
                        depth: outer.depth,
                    };
                }
            }
            position = boundary;
        }
        let end = ((line_count + 1) as u32, 0u16);
        map.emit(current, position, end);
        map
    }

    /// Emits entries for `frame` covering expanded `[from, to)`.
    fn emit(&mut self, frame: Frame, from: (u32, u16), to: (u32, u16)) {
        if from > to {
            return;
        }
        let first = MapEntry {
            exp_col_start: from.1,
            file: frame.file,
            orig_line: frame.orig_line,
            col_offset: from.1 as i32 - frame.orig_col as i32,
            depth: frame.depth,
        };
        self.push_entry(from.0, first);
        let mut line = from.0 + 1;
        while line <= to.0 {
            self.push_entry(
                line,
                MapEntry {
                    exp_col_start: 0,
                    file: frame.file,
                    orig_line: frame.orig_line + (line - from.0),
                    col_offset: 0,
                    depth: frame.depth,
                },
            );
            line += 1;
        }
    }

    fn push_entry(&mut self, line: u32, entry: MapEntry) {
        if let Some(slot) = self.lines.get_mut(line as usize) {
            slot.push(entry);
        }
    }

    fn lookup(&self, line: u32, col: u16) -> Option<MapEntry> {
        let entries = self.lines.get(line as usize)?;
        // greatest entry whose start column is <= col; entries are pushed in
        // increasing column order, later entries win ties
        let index = entries.partition_point(|e| e.exp_col_start <= col);
        if index == 0 {
            return entries.first().copied();
        }
        Some(entries[index - 1])
    }

    fn apply_translations(&self, file: PathId, line: u32) -> (PathId, u32) {
        if file != self.top_file {
            return (file, line);
        }
        let mut result = (file, line);
        for translation in &self.translations {
            if line >= translation.original_line {
                result = (
                    translation.pretend_file,
                    translation.pretend_line + (line - translation.original_line),
                );
            }
        }
        result
    }

    /// Maps an expanded span back to original coordinates.
    ///
    /// When start and end fall into different sections (the span crosses a
    /// PUSH/POP boundary), the endpoint inside the deeper section keeps its
    /// own mapping and the other endpoint maps through the outer section;
    /// both endpoints are resolved independently so a query inside any single
    /// section maps monotonically.
    pub fn map_locations(&self, sl: u32, sc: u16, el: u32, ec: u16) -> ResolvedSpan {
        let start = self.lookup(sl, sc);
        let end = self.lookup(el, ec);
        let resolve = |entry: Option<MapEntry>, line: u32, col: u16| match entry {
            Some(entry) => {
                let orig_col = (col as i32 - entry.col_offset).max(0) as u16;
                let (file, orig_line) = self.apply_translations(entry.file, entry.orig_line);
                (file, orig_line, orig_col)
            }
            None => (self.top_file, line, col),
        };
        let (start_file, start_line, start_col) = resolve(start, sl, sc);
        let (end_file, end_line, end_col) = resolve(end, el, ec);
        ResolvedSpan { start_file, start_line, start_col, end_file, end_line, end_col }
    }

    /// The original file owning expanded line `line`.
    pub fn file_at(&self, line: u32) -> PathId {
        self.lookup(line, 0).map(|e| e.file).unwrap_or(self.top_file)
    }

    /// The original line for the start of expanded line `line`.
    pub fn line_at(&self, line: u32) -> u32 {
        let entry = self.lookup(line, 0);
        match entry {
            Some(entry) => self.apply_translations(entry.file, entry.orig_line).1,
            None => line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(
        context: SectionContext,
        file: PathId,
        original: (u32, u16),
        expanded: (u32, u16),
        opposite: i32,
    ) -> IncludeFileInfo {
        IncludeFileInfo {
            context,
            action: SectionAction::Push,
            section_file: file,
            section_symbol: SymbolId::BAD,
            original_line: original.0,
            original_col: original.1,
            expanded_line: expanded.0,
            expanded_col: expanded.1,
            index_opposite: opposite,
        }
    }

    fn pop(
        context: SectionContext,
        file: PathId,
        original: (u32, u16),
        expanded: (u32, u16),
        opposite: i32,
    ) -> IncludeFileInfo {
        IncludeFileInfo {
            context,
            action: SectionAction::Pop,
            section_file: file,
            section_symbol: SymbolId::BAD,
            original_line: original.0,
            original_col: original.1,
            expanded_line: expanded.0,
            expanded_col: expanded.1,
            index_opposite: opposite,
        }
    }

    #[test]
    fn identity_without_trace() {
        let top = PathId(1);
        let map = LocationMap::build(top, 10, &[], &[]);
        let span = map.map_locations(3, 4, 3, 9);
        assert_eq!(span.start_file, top);
        assert_eq!((span.start_line, span.start_col), (3, 4));
        assert_eq!((span.end_line, span.end_col), (3, 9));
    }

    #[test]
    fn include_shifts_following_lines() {
        let top = PathId(1);
        let inc = PathId(2);
        // line 1 of top, then an include of a 2-line file, then the blank
        // replacing the directive line, then top line 3 onward.
        //   expanded 1     <- top 1
        //   expanded 2..3  <- inc 1..2
        //   expanded 4     <- top 2 (blank directive line)
        //   expanded 5     <- top 3
        let trace = vec![
            push(SectionContext::Include, inc, (1, 0), (2, 0), 1),
            pop(SectionContext::Include, inc, (2, 0), (4, 0), 0),
        ];
        let map = LocationMap::build(top, 6, &trace, &[]);
        assert_eq!(map.file_at(1), top);
        assert_eq!(map.file_at(2), inc);
        assert_eq!(map.line_at(3), 2);
        assert_eq!(map.file_at(3), inc);
        assert_eq!(map.file_at(5), top);
        assert_eq!(map.line_at(5), 3);
    }

    #[test]
    fn macro_expansion_maps_mid_line() {
        let top = PathId(1);
        // `M expands to "a+3" at top line 2, columns 4..7; macro defined at
        // def line 5 col 14 of the same file.
        let trace = vec![
            push(SectionContext::Macro, top, (5, 14), (2, 4), 1),
            pop(SectionContext::Macro, top, (2, 6), (2, 7), 0),
        ];
        let map = LocationMap::build(top, 4, &trace, &[]);
        let inside = map.map_locations(2, 4, 2, 6);
        assert_eq!(inside.start_line, 5);
        assert_eq!(inside.start_col, 14);
        // after the pop the rest of line 2 belongs to the caller again
        let after = map.map_locations(2, 8, 2, 9);
        assert_eq!(after.start_line, 2);
        assert_eq!(after.start_col, 7);
    }

    #[test]
    fn mapping_is_monotone_within_a_section() {
        let top = PathId(1);
        let inc = PathId(2);
        let trace = vec![
            push(SectionContext::Include, inc, (1, 0), (2, 0), 1),
            pop(SectionContext::Include, inc, (3, 0), (6, 0), 0),
        ];
        let map = LocationMap::build(top, 8, &trace, &[]);
        let mut previous = 0;
        for line in 2..6 {
            let span = map.map_locations(line, 0, line, 1);
            assert!(span.start_line >= previous);
            previous = span.start_line;
        }
    }

    #[test]
    fn line_directive_overrides() {
        let top = PathId(1);
        let pretend = PathId(9);
        let translations = vec![LineTranslationInfo {
            pretend_file: pretend,
            original_line: 4,
            pretend_line: 100,
        }];
        let map = LocationMap::build(top, 8, &[], &translations);
        let span = map.map_locations(5, 0, 5, 1);
        assert_eq!(span.start_file, pretend);
        assert_eq!(span.start_line, 101);
        // lines before the directive stay untranslated
        let before = map.map_locations(2, 0, 2, 1);
        assert_eq!(before.start_file, top);
        assert_eq!(before.start_line, 2);
    }
}
