//! Macro definitions and their evaluation helpers.
//!
//! A [`MacroInfo`] is created per `` `define `` and owned by the compilation
//! unit. Bodies are stored as ordered token lists with their definition-site
//! positions so argument substitution works on token boundaries, never on
//! substrings: `WIDTH` inside `XWIDTHX` is one token and is left alone.

use crate::{fs::PathId, symbols::SymbolId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sentinel substituted for `` `__LINE__ `` inside macro bodies; resolved to
/// the outermost caller's line when the expansion reaches the source file.
pub const LINE_MARKING: &str = "SVFE__LINE__MARKING";
/// Sentinel substituted for `` `__FILE__ `` inside macro bodies.
pub const FILE_MARKING: &str = "SVFE__FILE__MARKING";
/// Substituted for an undefined macro evaluated under as-is instructions.
pub const MACRO_NOT_DEFINED: &str = "SVFE_MACRO_NOT_DEFINED";

/// One formal argument of a `` `define ``.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroArg {
    pub name: String,
    pub default: Option<String>,
}

/// One `` `define ``.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroInfo {
    pub name: SymbolId,
    pub file: PathId,
    pub start_line: u32,
    pub name_col: u16,
    /// Formal arguments; empty when defined without a parenthesized list.
    pub arguments: Vec<MacroArg>,
    /// `true` when the macro was defined with `(...)` directly after its
    /// name. Only such macros consume an argument list at call sites.
    pub has_formal_list: bool,
    /// Body tokens in definition order.
    pub tokens: Vec<String>,
    /// Definition-site (line, column) per token.
    pub token_positions: Vec<(u32, u16)>,
}

impl MacroInfo {
    /// First line of the body in the defining file.
    pub fn body_start(&self) -> (u32, u16) {
        self.token_positions.first().copied().unwrap_or((self.start_line, self.name_col))
    }

    /// The body re-assembled as written (tokens carry their own spacing).
    pub fn body_text(&self) -> String {
        self.tokens.concat()
    }
}

/// Macro storage of one compilation unit.
pub type MacroStorage = HashMap<SymbolId, MacroInfo>;

/// Splits macro-body text into substitution tokens: identifiers, strings,
/// the `` `` ``, `` `" `` and `` `\`" `` forms, whitespace runs, newlines and
/// single characters. `` ``_`` `` tokenizes as `` `` ``, `_`, `` `` `` so
/// concatenation around an underscore needs no special casing.
pub fn tokenize(body: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let bytes = body.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c == '`' {
            if bytes.get(i + 1) == Some(&b'`') {
                tokens.push("``".to_owned());
                i += 2;
            } else if bytes.get(i + 1) == Some(&b'"') {
                tokens.push("`\"".to_owned());
                i += 2;
            } else if body[i..].starts_with("`\\`\"") {
                tokens.push("`\\`\"".to_owned());
                i += 4;
            } else {
                tokens.push("`".to_owned());
                i += 1;
            }
        } else if c == '"' {
            // strings stay whole so formals inside them are not substituted
            let start = i;
            i += 1;
            while i < bytes.len() {
                if bytes[i] == b'\\' {
                    i += 2;
                    continue;
                }
                if bytes[i] == b'"' {
                    i += 1;
                    break;
                }
                i += 1;
            }
            tokens.push(body[start..i].to_owned());
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < bytes.len() {
                let c = bytes[i] as char;
                if c.is_alphanumeric() || c == '_' || c == '$' {
                    i += 1;
                } else {
                    break;
                }
            }
            tokens.push(body[start..i].to_owned());
        } else if c == ' ' || c == '\t' {
            let start = i;
            while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
                i += 1;
            }
            tokens.push(body[start..i].to_owned());
        } else {
            tokens.push(c.to_string());
            i += c.len_utf8();
        }
    }
    tokens
}

/// Substitutes one formal with `actual` across `tokens`, honoring the
/// stringification/concatenation forms: `` `f ``, ``` ``f`` ```, ``` f`` ```,
/// ``` ``f ``` and the plain token.
pub fn substitute(tokens: &mut Vec<String>, formal: &str, actual: &str) {
    let mut result: Vec<String> = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];
        let next = tokens.get(i + 1).map(String::as_str);
        let after = tokens.get(i + 2).map(String::as_str);
        if token == "`" && next == Some(formal) {
            // backtick-prefixed formal
            result.push(actual.to_owned());
            i += 2;
        } else if token == "``" && next == Some(formal) && after == Some("``") {
            drop_trailing_concat(&mut result);
            result.push(actual.to_owned());
            i += 3;
        } else if token == "``" && next == Some(formal) {
            drop_trailing_concat(&mut result);
            result.push(actual.to_owned());
            i += 2;
        } else if token == formal && next == Some("``") {
            result.push(actual.to_owned());
            i += 2;
        } else if token == formal {
            result.push(actual.to_owned());
            i += 1;
        } else {
            result.push(token.clone());
            i += 1;
        }
    }
    *tokens = result;
}

/// A token concatenation joins its neighbours: when the right side was
/// substituted, the `` `` `` separator (and any whitespace before it) is
/// dropped.
fn drop_trailing_concat(result: &mut Vec<String>) {
    while let Some(last) = result.last() {
        if last.chars().all(|c| c == ' ' || c == '\t') {
            result.pop();
        } else {
            break;
        }
    }
}

/// Resolves the stringification tokens of an assembled body: `` `" `` becomes
/// `"`, `` `\`" `` becomes `\"`, and remaining `` `` `` separators vanish.
pub fn resolve_quotes(tokens: &[String]) -> Vec<String> {
    tokens
        .iter()
        .filter(|t| t.as_str() != "``")
        .map(|t| match t.as_str() {
            "`\"" => "\"".to_owned(),
            "`\\`\"" => "\\\"".to_owned(),
            _ => t.clone(),
        })
        .collect()
}

/// Directed macro-call graph used for recursion detection.
///
/// One instance exists per source file being preprocessed; every macro
/// expansion records the edge `calling macro -> called macro`. An edge that
/// closes a cycle aborts the expansion.
#[derive(Debug, Default)]
pub struct LoopCheck {
    edges: HashMap<SymbolId, Vec<SymbolId>>,
}

impl LoopCheck {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `from -> to`. Returns `true` when the edge closes a cycle.
    pub fn add_edge(&mut self, from: SymbolId, to: SymbolId) -> bool {
        self.edges.entry(from).or_default().push(to);
        self.find_path(to, from).is_some()
    }

    /// The cycle through `from -> to`, as the node list `[to, ..., from]`.
    pub fn report_loop(&self, from: SymbolId, to: SymbolId) -> Vec<SymbolId> {
        self.find_path(to, from).unwrap_or_else(|| vec![to, from])
    }

    fn find_path(&self, start: SymbolId, goal: SymbolId) -> Option<Vec<SymbolId>> {
        let mut stack = vec![(start, vec![start])];
        let mut visited = std::collections::HashSet::new();
        while let Some((node, path)) = stack.pop() {
            if node == goal {
                return Some(path);
            }
            if !visited.insert(node) {
                continue;
            }
            if let Some(nexts) = self.edges.get(&node) {
                for &next in nexts {
                    let mut path = path.clone();
                    path.push(next);
                    stack.push((next, path));
                }
            }
        }
        None
    }
}

/// Splits a call-site argument list at top-level commas. `text` is the
/// content between the outer parentheses; nested parens, brackets, braces
/// and strings shield their commas.
pub fn split_arguments(text: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if !in_string => {
                in_string = true;
                current.push(c);
            }
            '"' if in_string => {
                in_string = false;
                current.push(c);
            }
            '\\' if in_string => {
                current.push(c);
                if let Some(&next) = chars.peek() {
                    current.push(next);
                    chars.next();
                }
            }
            '(' | '[' | '{' if !in_string => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' if !in_string => {
                depth -= 1;
                current.push(c);
            }
            ',' if !in_string && depth == 0 => {
                args.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    args.push(current);
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_splits_concat_around_underscore() {
        let tokens = tokenize("a``_``b");
        assert_eq!(tokens, vec!["a", "``", "_", "``", "b"]);
    }

    #[test]
    fn tokenize_keeps_strings_whole() {
        let tokens = tokenize("x \"a, b\" y");
        assert_eq!(tokens, vec!["x", " ", "\"a, b\"", " ", "y"]);
    }

    #[test]
    fn substitute_plain_and_concat() {
        let mut tokens = tokenize("f + f``_suffix + pre``f");
        substitute(&mut tokens, "f", "42");
        assert_eq!(tokens.concat(), "42 + 42_suffix + pre42");
    }

    #[test]
    fn substitute_is_token_exact() {
        let mut tokens = tokenize("ff + f");
        substitute(&mut tokens, "f", "1");
        assert_eq!(tokens.concat(), "ff + 1");
    }

    #[test]
    fn stringification_resolves() {
        let mut tokens = tokenize("`\"value: f`\"");
        substitute(&mut tokens, "f", "7");
        let resolved = resolve_quotes(&tokens);
        assert_eq!(resolved.concat(), "\"value: 7\"");
    }

    #[test]
    fn loop_check_detects_two_cycle() {
        let mut check = LoopCheck::new();
        let a = SymbolId(1);
        let b = SymbolId(2);
        assert!(!check.add_edge(a, b));
        assert!(check.add_edge(b, a));
        let cycle = check.report_loop(b, a);
        assert!(cycle.contains(&a) && cycle.contains(&b));
    }

    #[test]
    fn loop_check_allows_diamond() {
        let mut check = LoopCheck::new();
        let (a, b, c, d) = (SymbolId(1), SymbolId(2), SymbolId(3), SymbolId(4));
        assert!(!check.add_edge(a, b));
        assert!(!check.add_edge(a, c));
        assert!(!check.add_edge(b, d));
        assert!(!check.add_edge(c, d));
    }

    #[test]
    fn arguments_split_at_top_level_only() {
        let args = split_arguments("a, f(b, c), {d, e}, \"x,y\"");
        assert_eq!(args, vec!["a", " f(b, c)", " {d, e}", " \"x,y\""]);
    }
}
