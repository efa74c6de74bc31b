//! Large-file chunking.
//!
//! Expanded files above the split threshold are cut at top-level declaration
//! boundaries (module, class, package, interface, program starts) into
//! chunks that parse independently on separate workers. The chunk trees are
//! re-stitched under one synthetic root with their line offsets applied, so
//! downstream stages see a single `FileContent` per file.

use crate::{
    fs::PathId,
    lexer::{self, Keyword, TokenKind},
    node::{FileContent, NodeKind},
};

/// One independently parseable slice of an expanded file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileChunk {
    /// 1-based line of the original expanded text where this chunk begins.
    pub start_line: u32,
    pub text: String,
}

impl FileChunk {
    /// Line offset to apply when stitching this chunk's tree.
    pub fn line_offset(&self) -> u32 {
        self.start_line - 1
    }
}

/// Splits `text` into up to `target_chunks` chunks at top-level declaration
/// boundaries. Returns `None` when the file is below `threshold` bytes or no
/// safe boundary exists.
pub fn split(text: &str, threshold: u64, target_chunks: usize) -> Option<Vec<FileChunk>> {
    if (text.len() as u64) < threshold || target_chunks < 2 {
        return None;
    }
    let boundaries = unit_boundaries(text);
    if boundaries.len() < 2 {
        return None;
    }

    // bin the units into chunks of roughly equal byte weight
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let total: usize = text.len();
    let per_chunk = (total / target_chunks).max(1);

    let mut chunks = Vec::new();
    let mut chunk_start_line = 1u32;
    let mut chunk_text = String::new();
    let mut next_boundary = 1usize; // boundaries[0] starts the first chunk
    for (index, line) in lines.iter().enumerate() {
        let line_number = index as u32 + 1;
        if next_boundary < boundaries.len()
            && line_number == boundaries[next_boundary]
            && chunk_text.len() >= per_chunk
        {
            chunks.push(FileChunk { start_line: chunk_start_line, text: std::mem::take(&mut chunk_text) });
            chunk_start_line = line_number;
        }
        if next_boundary < boundaries.len() && line_number == boundaries[next_boundary] {
            next_boundary += 1;
        }
        chunk_text.push_str(line);
    }
    if !chunk_text.is_empty() {
        chunks.push(FileChunk { start_line: chunk_start_line, text: chunk_text });
    }
    if chunks.len() < 2 {
        return None;
    }
    Some(chunks)
}

/// Lines at which a top-level design unit starts.
fn unit_boundaries(text: &str) -> Vec<u32> {
    let tokens = lexer::lex(text);
    let mut boundaries = Vec::new();
    let mut depth = 0i32;
    for token in &tokens {
        match token.kind {
            TokenKind::Keyword(
                Keyword::Module
                | Keyword::Macromodule
                | Keyword::Interface
                | Keyword::Program
                | Keyword::Package
                | Keyword::Class
                | Keyword::Primitive
                | Keyword::Checker,
            ) => {
                if depth == 0 {
                    boundaries.push(token.line);
                }
                depth += 1;
            }
            TokenKind::Keyword(
                Keyword::Endmodule
                | Keyword::Endinterface
                | Keyword::Endprogram
                | Keyword::Endpackage
                | Keyword::Endclass
                | Keyword::Endprimitive
                | Keyword::Endchecker,
            ) => {
                depth -= 1;
            }
            _ => {}
        }
    }
    boundaries
}

/// Re-stitches independently parsed chunk trees in order under a fresh
/// synthetic root, applying each chunk's line offset.
pub fn stitch(file: PathId, parts: Vec<(FileContent, u32)>) -> FileContent {
    let mut stitched = FileContent::new(file, NodeKind::PaSourceText);
    let root = stitched.root();
    let mut end = (1u32, 0u16);
    for (tree, offset) in &parts {
        let children: Vec<_> = tree.children(tree.root()).collect();
        for child in children {
            let copy = stitched.graft(root, tree, child, *offset);
            let object = stitched.object(copy);
            end = end.max((object.end_line, object.end_col));
        }
    }
    stitched.set_span(root, (1, 0), end);
    stitched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parser, symbols::SymbolTable};

    fn two_modules() -> String {
        let mut text = String::new();
        text.push_str("module a;\n");
        for i in 0..20 {
            text.push_str(&format!("  wire w{i};\n"));
        }
        text.push_str("endmodule\n");
        text.push_str("module b;\n");
        for i in 0..20 {
            text.push_str(&format!("  wire v{i};\n"));
        }
        text.push_str("endmodule\n");
        text
    }

    #[test]
    fn small_files_are_not_split() {
        assert_eq!(split("module a; endmodule\n", 1024, 4), None);
    }

    #[test]
    fn splits_at_module_boundary() {
        let text = two_modules();
        let chunks = split(&text, 8, 2).expect("should split");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].start_line, 1);
        assert!(chunks[0].text.starts_with("module a;"));
        assert!(chunks[1].text.starts_with("module b;"));
        // chunk 2 starts where module b is declared
        assert_eq!(chunks[1].start_line, 23);
        // nothing is lost
        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn nested_units_are_not_boundaries() {
        let text = "module outer;\nendmodule\npackage p;\n  class inner;\n  endclass\nendpackage\n";
        let boundaries = unit_boundaries(text);
        assert_eq!(boundaries, vec![1, 3]);
    }

    #[test]
    fn stitched_tree_restores_positions() {
        let text = two_modules();
        let chunks = split(&text, 8, 2).unwrap();
        let symbols = SymbolTable::new();
        let mut parts = Vec::new();
        for chunk in &chunks {
            let (tree, issues) = parser::parse_source(PathId::BAD, &chunk.text, &symbols);
            assert!(issues.is_empty(), "{issues:?}");
            parts.push((tree, chunk.line_offset()));
        }
        let stitched = stitch(PathId::BAD, parts);
        let modules: Vec<_> = stitched
            .children(stitched.root())
            .filter(|&c| stitched.object(c).kind == NodeKind::PaModuleDecl)
            .collect();
        assert_eq!(modules.len(), 2);
        assert_eq!(stitched.object(modules[0]).start_line, 1);
        assert_eq!(stitched.object(modules[1]).start_line, 23);
        assert_eq!(stitched.validate(), Ok(()));
    }
}
