//! The parser.
//!
//! Parses preprocessor-expanded text into a `FileContent` whose rule nodes
//! are `Pa*` kinds and whose leaves are the lexical terminals, in source
//! order. Every significant token becomes a leaf, so re-assembling the
//! terminal sequence reproduces the token stream.
//!
//! Parsing runs in two attempts: a fast attempt that bails on the first
//! syntax error, then a recovering attempt that records every error,
//! resynchronizes at statement boundaries, and keeps going. Reported
//! coordinates are translated back to original source through the
//! preprocessor's location map.

use crate::{
    diagnostics::{ErrorContainer, ErrorKind, Location},
    fs::PathId,
    lexer::{self, Keyword, Punct, Token, TokenKind},
    node::{FileContent, NodeId, NodeKind},
    preprocessor::{line_map::LocationMap, Sentinel},
    symbols::{SymbolId, SymbolTable},
};

/// A raw syntax error in expanded-text coordinates.
#[derive(Clone, Debug)]
pub struct SyntaxIssue {
    pub line: u32,
    pub col: u16,
    pub message: String,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Fast,
    Recovering,
}

struct Abort;

type PResult<T> = Result<T, Abort>;

/// Parses `text` into an AST tree. Attempts a fast parse first; on failure
/// restarts in recovering mode and returns the collected issues.
pub fn parse_source(file: PathId, text: &str, symbols: &SymbolTable) -> (FileContent, Vec<SyntaxIssue>) {
    let tokens = lexer::lex(text);
    let mut fast = Parser::new(file, tokens.clone(), symbols, Mode::Fast);
    match fast.parse_source_text() {
        Ok(()) => (fast.tree, Vec::new()),
        Err(Abort) => {
            let mut recovering = Parser::new(file, tokens, symbols, Mode::Recovering);
            let _ = recovering.parse_source_text();
            (recovering.tree, recovering.issues)
        }
    }
}

/// Reports raw issues through the location map, attaching a snippet of the
/// offending expanded line.
pub fn report_issues(
    issues: &[SyntaxIssue],
    text: &str,
    map: &LocationMap,
    symbols: &SymbolTable,
    errors: &mut ErrorContainer,
) {
    let lines: Vec<&str> = text.lines().collect();
    for issue in issues {
        let span = map.map_locations(issue.line, issue.col, issue.line, issue.col);
        let snippet = lines
            .get(issue.line as usize - 1)
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .map(|l| format!("{} near \"{}\"", issue.message, l))
            .unwrap_or_else(|| issue.message.clone());
        let symbol = symbols.register(&snippet);
        errors.add_kind(
            ErrorKind::PaSyntaxError,
            Location::new(span.start_file, span.start_line, span.start_col, symbol),
        );
    }
}

/// Rewrites every node span from expanded coordinates to original-source
/// coordinates. Grafted preprocessor subtrees already carry original
/// coordinates and are left alone.
pub fn remap_locations(tree: &mut FileContent, map: &LocationMap) {
    let ids: Vec<NodeId> = tree.objects().map(|(id, _)| id).collect();
    for id in ids {
        let object = tree.object(id);
        if object.kind.is_preprocessor() || object.kind == NodeKind::Bad {
            continue;
        }
        let span =
            map.map_locations(object.start_line, object.start_col, object.end_line, object.end_col);
        let object = tree.object_mut(id);
        object.file = span.start_file;
        object.start_line = span.start_line;
        object.start_col = span.start_col;
        object.end_line = span.end_line;
        object.end_col = span.end_col;
    }
}

/// Grafts each sentinel's preprocessor subtree into the AST at the node
/// covering the sentinel's expanded position. This preserves directive
/// context in the parse tree for tools that need it.
pub fn merge_sentinels(tree: &mut FileContent, pp_tree: &FileContent, sentinels: &[Sentinel]) {
    for sentinel in sentinels {
        let target = containing_node(tree, sentinel.exp_start);
        tree.graft(target, pp_tree, sentinel.node, 0);
    }
}

fn containing_node(tree: &FileContent, position: (u32, u16)) -> NodeId {
    let mut current = tree.root();
    'descend: loop {
        for child in tree.children(current) {
            let object = tree.object(child);
            if object.kind.is_terminal() || object.kind.is_preprocessor() {
                continue;
            }
            let starts = (object.start_line, object.start_col);
            let ends = (object.end_line, object.end_col);
            if starts <= position && position <= ends {
                current = child;
                continue 'descend;
            }
        }
        return current;
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    mode: Mode,
    issues: Vec<SyntaxIssue>,
    tree: FileContent,
    symbols: &'a SymbolTable,
    last_end: (u32, u16),
    /// Comments crossed while building an expression leaf; they attach to
    /// the next enclosing rule so spans stay nested.
    pending_comments: Vec<Token>,
}

impl<'a> Parser<'a> {
    fn new(file: PathId, tokens: Vec<Token>, symbols: &'a SymbolTable, mode: Mode) -> Self {
        Self {
            tokens,
            pos: 0,
            mode,
            issues: Vec::new(),
            tree: FileContent::new(file, NodeKind::PaSourceText),
            symbols,
            last_end: (1, 0),
            pending_comments: Vec::new(),
        }
    }

    // ---- token cursor -------------------------------------------------

    fn skip_index(&self, mut index: usize) -> usize {
        while index < self.tokens.len() && self.tokens[index].kind == TokenKind::Comment {
            index += 1;
        }
        index.min(self.tokens.len() - 1)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.skip_index(self.pos)]
    }

    fn peek_at(&self, n: usize) -> &Token {
        let mut index = self.skip_index(self.pos);
        for _ in 0..n {
            index = self.skip_index(index + 1);
        }
        &self.tokens[index]
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn at_punct(&self, punct: Punct) -> bool {
        self.peek().is_punct(punct)
    }

    fn at_kw(&self, keyword: Keyword) -> bool {
        self.peek().is_keyword(keyword)
    }

    /// Consumes the next significant token into a leaf under `parent`,
    /// first attaching any comments that precede it.
    fn bump(&mut self, parent: NodeId) -> NodeId {
        self.attach_comments(parent);
        let token = self.tokens[self.pos].clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        self.leaf(parent, &token, leaf_kind(&token))
    }

    /// Same as [`Parser::bump`] with an explicit leaf kind; used to
    /// disambiguate operator tokens into unary vs binary leaves.
    fn bump_as(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        self.attach_comments(parent);
        let token = self.tokens[self.pos].clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        self.leaf(parent, &token, kind)
    }

    fn bump_orphan(&mut self) -> NodeId {
        while self.tokens[self.pos].kind == TokenKind::Comment {
            let comment = self.tokens[self.pos].clone();
            self.pending_comments.push(comment);
            self.pos += 1;
        }
        let token = self.tokens[self.pos].clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        let symbol = self.symbols.register(&token.text);
        let node = self.tree.orphan(leaf_kind(&token), symbol);
        self.tree.set_span(node, (token.line, token.col), token.end());
        self.last_end = self.last_end.max(token.end());
        node
    }

    fn attach_comments(&mut self, parent: NodeId) {
        for comment in std::mem::take(&mut self.pending_comments) {
            self.leaf(parent, &comment, NodeKind::Comment);
        }
        while self.tokens[self.pos].kind == TokenKind::Comment {
            let token = self.tokens[self.pos].clone();
            self.pos += 1;
            self.leaf(parent, &token, NodeKind::Comment);
        }
    }

    fn leaf(&mut self, parent: NodeId, token: &Token, kind: NodeKind) -> NodeId {
        let symbol = self.symbols.register(&token.text);
        let node = self.tree.add_child(parent, kind, symbol);
        self.tree.set_span(node, (token.line, token.col), token.end());
        // late-attached comments must not rewind the span cursor
        self.last_end = self.last_end.max(token.end());
        node
    }

    // ---- node helpers -------------------------------------------------

    fn open(&mut self, parent: NodeId, kind: NodeKind, symbol: SymbolId) -> NodeId {
        let token = self.peek();
        let start = (token.line, token.col);
        let node = self.tree.add_child(parent, kind, symbol);
        self.tree.set_span(node, start, start);
        node
    }

    fn open_orphan(&mut self, kind: NodeKind) -> NodeId {
        let token = self.peek();
        let start = (token.line, token.col);
        let node = self.tree.orphan(kind, SymbolId::BAD);
        self.tree.set_span(node, start, start);
        node
    }

    fn close(&mut self, node: NodeId) {
        let end = self.last_end;
        let start = {
            let object = self.tree.object(node);
            (object.start_line, object.start_col)
        };
        self.tree.set_span(node, start, end.max(start));
    }

    fn adopt(&mut self, parent: NodeId, child: NodeId) {
        self.tree.adopt(parent, child);
        // a rule node's span covers its adopted children
        let child_start = {
            let object = self.tree.object(child);
            (object.start_line, object.start_col)
        };
        let object = self.tree.object(parent);
        if (object.start_line, object.start_col) > child_start {
            let end = (object.end_line, object.end_col);
            self.tree.set_span(parent, child_start, end.max(child_start));
        }
    }

    // ---- errors -------------------------------------------------------

    fn fail(&mut self, message: impl Into<String>) -> Abort {
        let token = self.peek().clone();
        if self.mode == Mode::Recovering || self.issues.is_empty() {
            let near = if token.kind == TokenKind::Eof {
                "unexpected end of file".to_owned()
            } else {
                format!("unexpected \"{}\"", token.text)
            };
            self.issues
                .push(SyntaxIssue { line: token.line, col: token.col, message: format!("{}, {near}", message.into()) });
        }
        Abort
    }

    /// Consumes one token when `handler` made no progress, so recovery loops
    /// always terminate.
    fn ensure_progress(&mut self, before: usize) {
        if self.pos == before && !self.at_eof() {
            self.pos = self.skip_index(self.pos) + 1;
        }
    }

    /// Skips forward to the next statement boundary.
    fn recover(&mut self) {
        loop {
            let token = self.peek().clone();
            match token.kind {
                TokenKind::Eof => return,
                TokenKind::Punct(Punct::Semi) => {
                    self.pos = self.skip_index(self.pos) + 1;
                    return;
                }
                TokenKind::Keyword(
                    Keyword::End
                    | Keyword::Endmodule
                    | Keyword::Endpackage
                    | Keyword::Endinterface
                    | Keyword::Endprogram
                    | Keyword::Endclass
                    | Keyword::Endfunction
                    | Keyword::Endtask
                    | Keyword::Endcase
                    | Keyword::Endgenerate,
                ) => return,
                _ => {
                    self.pos = self.skip_index(self.pos) + 1;
                }
            }
        }
    }

    fn expect_punct(&mut self, parent: NodeId, punct: Punct) -> PResult<NodeId> {
        if self.at_punct(punct) {
            Ok(self.bump(parent))
        } else {
            Err(self.fail(format!("expected \"{}\"", punct.as_str())))
        }
    }

    fn expect_kw(&mut self, parent: NodeId, keyword: Keyword) -> PResult<NodeId> {
        if self.at_kw(keyword) {
            Ok(self.bump(parent))
        } else {
            Err(self.fail(format!("expected \"{keyword:?}\"")))
        }
    }

    fn expect_ident(&mut self, parent: NodeId) -> PResult<SymbolId> {
        match self.peek().kind {
            TokenKind::Identifier | TokenKind::EscapedIdentifier => {
                let symbol = self.symbols.register(&self.peek().text.clone());
                self.bump(parent);
                Ok(symbol)
            }
            _ => Err(self.fail("expected identifier")),
        }
    }

    // ---- source text --------------------------------------------------

    fn parse_source_text(&mut self) -> PResult<()> {
        let root = self.tree.root();
        while !self.at_eof() {
            let before = self.pos;
            match self.parse_description(root) {
                Ok(()) => {}
                Err(Abort) => {
                    if self.mode == Mode::Fast {
                        return Err(Abort);
                    }
                    self.recover();
                    self.ensure_progress(before);
                }
            }
        }
        self.attach_comments(root);
        let end = self.last_end;
        self.tree.set_span(root, (1, 0), end.max((1, 0)));
        Ok(())
    }

    fn parse_description(&mut self, parent: NodeId) -> PResult<()> {
        match self.peek().kind {
            TokenKind::Keyword(Keyword::Module | Keyword::Macromodule) => {
                self.parse_design_unit(parent, NodeKind::PaModuleDecl, Keyword::Endmodule)
            }
            TokenKind::Keyword(Keyword::Interface) => {
                self.parse_design_unit(parent, NodeKind::PaInterfaceDecl, Keyword::Endinterface)
            }
            TokenKind::Keyword(Keyword::Program) => {
                self.parse_design_unit(parent, NodeKind::PaProgramDecl, Keyword::Endprogram)
            }
            TokenKind::Keyword(Keyword::Package) => self.parse_package(parent),
            TokenKind::Keyword(Keyword::Class) => self.parse_class(parent),
            TokenKind::Keyword(Keyword::Virtual)
                if self.peek_at(1).is_keyword(Keyword::Class) =>
            {
                self.parse_class(parent)
            }
            TokenKind::Keyword(Keyword::Primitive) => {
                self.parse_opaque_unit(parent, NodeKind::PaUdpDecl, Keyword::Endprimitive)
            }
            TokenKind::Keyword(Keyword::Checker) => {
                self.parse_opaque_unit(parent, NodeKind::PaCheckerDecl, Keyword::Endchecker)
            }
            TokenKind::Keyword(Keyword::Import) => self.parse_import(parent),
            TokenKind::Keyword(Keyword::Typedef) => self.parse_typedef(parent),
            TokenKind::Keyword(Keyword::Parameter) => self.parse_param_decl(parent, false, true),
            TokenKind::Keyword(Keyword::Localparam) => self.parse_param_decl(parent, true, true),
            TokenKind::Keyword(Keyword::Timeunit | Keyword::Timeprecision) => {
                self.consume_through_semi(parent)
            }
            _ => Err(self.fail("expected a design unit")),
        }
    }

    /// `module`/`interface`/`program` share one shape.
    fn parse_design_unit(
        &mut self,
        parent: NodeId,
        kind: NodeKind,
        end_keyword: Keyword,
    ) -> PResult<()> {
        let node = self.open(parent, kind, SymbolId::BAD);
        self.bump(node); // module/interface/program
        let name = self.expect_ident(node)?;
        self.tree.object_mut(node).symbol = name;

        if self.at_punct(Punct::Hash) {
            self.parse_param_port_list(node)?;
        }
        if self.at_punct(Punct::LParen) {
            self.parse_port_list(node)?;
        }
        self.expect_punct(node, Punct::Semi)?;

        while !self.at_kw(end_keyword) && !self.at_eof() {
            let before = self.pos;
            match self.parse_module_item(node) {
                Ok(()) => {}
                Err(Abort) => {
                    if self.mode == Mode::Fast {
                        return Err(Abort);
                    }
                    self.recover();
                    self.ensure_progress(before);
                }
            }
        }
        self.expect_kw(node, end_keyword)?;
        self.parse_end_label(node)?;
        self.close(node);
        Ok(())
    }

    /// Opaque units (UDPs, checkers) are recorded with their name but their
    /// bodies are kept as raw leaves.
    fn parse_opaque_unit(
        &mut self,
        parent: NodeId,
        kind: NodeKind,
        end_keyword: Keyword,
    ) -> PResult<()> {
        let node = self.open(parent, kind, SymbolId::BAD);
        self.bump(node);
        let name = self.expect_ident(node)?;
        self.tree.object_mut(node).symbol = name;
        while !self.at_kw(end_keyword) && !self.at_eof() {
            self.bump(node);
        }
        self.expect_kw(node, end_keyword)?;
        self.parse_end_label(node)?;
        self.close(node);
        Ok(())
    }

    fn parse_end_label(&mut self, node: NodeId) -> PResult<()> {
        if self.at_punct(Punct::Colon) {
            self.bump(node);
            self.expect_ident(node)?;
        }
        Ok(())
    }

    fn parse_package(&mut self, parent: NodeId) -> PResult<()> {
        let node = self.open(parent, NodeKind::PaPackageDecl, SymbolId::BAD);
        self.bump(node);
        let name = self.expect_ident(node)?;
        self.tree.object_mut(node).symbol = name;
        self.expect_punct(node, Punct::Semi)?;
        while !self.at_kw(Keyword::Endpackage) && !self.at_eof() {
            let before = self.pos;
            match self.parse_package_item(node) {
                Ok(()) => {}
                Err(Abort) => {
                    if self.mode == Mode::Fast {
                        return Err(Abort);
                    }
                    self.recover();
                    self.ensure_progress(before);
                }
            }
        }
        self.expect_kw(node, Keyword::Endpackage)?;
        self.parse_end_label(node)?;
        self.close(node);
        Ok(())
    }

    fn parse_package_item(&mut self, parent: NodeId) -> PResult<()> {
        match self.peek().kind {
            TokenKind::Keyword(Keyword::Typedef) => self.parse_typedef(parent),
            TokenKind::Keyword(Keyword::Parameter) => self.parse_param_decl(parent, false, true),
            TokenKind::Keyword(Keyword::Localparam) => self.parse_param_decl(parent, true, true),
            TokenKind::Keyword(Keyword::Import) => self.parse_import(parent),
            TokenKind::Keyword(Keyword::Function) => self.parse_function(parent),
            TokenKind::Keyword(Keyword::Task) => self.parse_task(parent),
            TokenKind::Keyword(Keyword::Class) => self.parse_class(parent),
            TokenKind::Keyword(Keyword::Virtual)
                if self.peek_at(1).is_keyword(Keyword::Class) =>
            {
                self.parse_class(parent)
            }
            TokenKind::Keyword(k) if k.is_data_type() => self.parse_data_decl(parent),
            TokenKind::Keyword(Keyword::Const | Keyword::Var) => self.parse_data_decl(parent),
            TokenKind::Identifier => self.parse_data_decl(parent),
            _ => self.parse_unsupported_item(parent),
        }
    }

    fn parse_class(&mut self, parent: NodeId) -> PResult<()> {
        let node = self.open(parent, NodeKind::PaClassDecl, SymbolId::BAD);
        if self.at_kw(Keyword::Virtual) {
            self.bump(node);
        }
        self.expect_kw(node, Keyword::Class)?;
        let name = self.expect_ident(node)?;
        self.tree.object_mut(node).symbol = name;
        if self.at_punct(Punct::Hash) {
            self.parse_param_port_list(node)?;
        }
        if self.at_kw(Keyword::Extends) {
            let extends = self.open(node, NodeKind::PaExtendsClause, SymbolId::BAD);
            self.bump(extends);
            let base = self.parse_type_path(extends)?;
            self.tree.object_mut(extends).symbol = base;
            if self.at_punct(Punct::LParen) {
                self.skip_balanced(extends, Punct::LParen, Punct::RParen)?;
            }
            self.close(extends);
        }
        self.expect_punct(node, Punct::Semi)?;
        while !self.at_kw(Keyword::Endclass) && !self.at_eof() {
            let before = self.pos;
            match self.parse_class_item(node) {
                Ok(()) => {}
                Err(Abort) => {
                    if self.mode == Mode::Fast {
                        return Err(Abort);
                    }
                    self.recover();
                    self.ensure_progress(before);
                }
            }
        }
        self.expect_kw(node, Keyword::Endclass)?;
        self.parse_end_label(node)?;
        self.close(node);
        Ok(())
    }

    fn parse_class_item(&mut self, parent: NodeId) -> PResult<()> {
        // qualifiers are recorded as keyword leaves on the member
        match self.peek().kind {
            TokenKind::Keyword(
                Keyword::Local
                | Keyword::Protected
                | Keyword::Static
                | Keyword::Virtual
                | Keyword::Rand
                | Keyword::Randc,
            ) if !self.peek_at(1).is_keyword(Keyword::Class) => {
                // peel one qualifier and retry; leaves land on the member
                let next = self.peek_at(1).kind.clone();
                match next {
                    TokenKind::Keyword(Keyword::Function) => self.parse_function(parent),
                    TokenKind::Keyword(Keyword::Task) => self.parse_task(parent),
                    _ => self.parse_data_decl(parent),
                }
            }
            TokenKind::Keyword(Keyword::Function) => self.parse_function(parent),
            TokenKind::Keyword(Keyword::Task) => self.parse_task(parent),
            TokenKind::Keyword(Keyword::Typedef) => self.parse_typedef(parent),
            TokenKind::Keyword(Keyword::Parameter) => self.parse_param_decl(parent, false, true),
            TokenKind::Keyword(Keyword::Localparam) => self.parse_param_decl(parent, true, true),
            TokenKind::Keyword(Keyword::Constraint) => self.parse_unsupported_item(parent),
            TokenKind::Keyword(k) if k.is_data_type() => self.parse_data_decl(parent),
            TokenKind::Identifier => self.parse_data_decl(parent),
            _ => self.parse_unsupported_item(parent),
        }
    }

    fn parse_import(&mut self, parent: NodeId) -> PResult<()> {
        let node = self.open(parent, NodeKind::PaImportDecl, SymbolId::BAD);
        self.bump(node); // import
        let package = self.expect_ident(node)?;
        self.tree.object_mut(node).symbol = package;
        self.expect_punct(node, Punct::ColonColon)?;
        if self.at_punct(Punct::Star) {
            self.bump(node);
        } else {
            self.expect_ident(node)?;
        }
        while self.at_punct(Punct::Comma) {
            self.bump(node);
            self.expect_ident(node)?;
            self.expect_punct(node, Punct::ColonColon)?;
            if self.at_punct(Punct::Star) {
                self.bump(node);
            } else {
                self.expect_ident(node)?;
            }
        }
        self.expect_punct(node, Punct::Semi)?;
        self.close(node);
        Ok(())
    }

    // ---- parameter and port lists --------------------------------------

    fn parse_param_port_list(&mut self, parent: NodeId) -> PResult<()> {
        let node = self.open(parent, NodeKind::PaParamPortList, SymbolId::BAD);
        self.expect_punct(node, Punct::Hash)?;
        self.expect_punct(node, Punct::LParen)?;
        while !self.at_punct(Punct::RParen) && !self.at_eof() {
            let decl_kind = if self.at_kw(Keyword::Localparam) {
                NodeKind::PaLocalParamDecl
            } else {
                NodeKind::PaParamDecl
            };
            let decl = self.open(node, decl_kind, SymbolId::BAD);
            if self.at_kw(Keyword::Parameter) || self.at_kw(Keyword::Localparam) {
                self.bump(decl);
            }
            self.parse_optional_data_type(decl)?;
            self.parse_param_assign(decl)?;
            self.close(decl);
            if self.at_punct(Punct::Comma) {
                self.bump(node);
            } else {
                break;
            }
        }
        self.expect_punct(node, Punct::RParen)?;
        self.close(node);
        Ok(())
    }

    fn parse_param_assign(&mut self, parent: NodeId) -> PResult<()> {
        let node = self.open(parent, NodeKind::PaParamAssign, SymbolId::BAD);
        let name = self.expect_ident(node)?;
        self.tree.object_mut(node).symbol = name;
        while self.at_punct(Punct::LBracket) {
            self.parse_dimension(node, NodeKind::PaUnpackedDim)?;
        }
        if self.at_punct(Punct::Eq) {
            self.bump(node);
            let value = self.parse_expr()?;
            self.adopt(node, value);
        }
        self.close(node);
        Ok(())
    }

    fn parse_param_decl(&mut self, parent: NodeId, local: bool, semi: bool) -> PResult<()> {
        let kind = if local { NodeKind::PaLocalParamDecl } else { NodeKind::PaParamDecl };
        let node = self.open(parent, kind, SymbolId::BAD);
        self.bump(node); // parameter/localparam
        self.parse_optional_data_type(node)?;
        self.parse_param_assign(node)?;
        while self.at_punct(Punct::Comma) {
            self.bump(node);
            self.parse_param_assign(node)?;
        }
        if semi {
            self.expect_punct(node, Punct::Semi)?;
        }
        self.close(node);
        Ok(())
    }

    fn parse_port_list(&mut self, parent: NodeId) -> PResult<()> {
        let node = self.open(parent, NodeKind::PaPortList, SymbolId::BAD);
        self.expect_punct(node, Punct::LParen)?;
        while !self.at_punct(Punct::RParen) && !self.at_eof() {
            self.parse_port(node)?;
            if self.at_punct(Punct::Comma) {
                self.bump(node);
            } else {
                break;
            }
        }
        self.expect_punct(node, Punct::RParen)?;
        self.close(node);
        Ok(())
    }

    fn parse_port(&mut self, parent: NodeId) -> PResult<()> {
        let node = self.open(parent, NodeKind::PaPort, SymbolId::BAD);
        if matches!(
            self.peek().kind,
            TokenKind::Keyword(Keyword::Input | Keyword::Output | Keyword::Inout | Keyword::Ref)
        ) {
            self.bump(node);
        }
        // optional type section before the port name
        let has_type = match self.peek().kind {
            TokenKind::Keyword(k) if k.is_data_type() || k.is_net_type() => true,
            TokenKind::Keyword(Keyword::Signed | Keyword::Unsigned) => true,
            TokenKind::Identifier => {
                // `iface.modport name` or `type name`
                matches!(
                    self.peek_at(1).kind,
                    TokenKind::Identifier | TokenKind::EscapedIdentifier
                ) || self.peek_at(1).is_punct(Punct::Dot)
            }
            _ => false,
        };
        if has_type {
            self.parse_data_type(node)?;
        }
        let name = self.expect_ident(node)?;
        self.tree.object_mut(node).symbol = name;
        while self.at_punct(Punct::LBracket) {
            self.parse_dimension(node, NodeKind::PaUnpackedDim)?;
        }
        if self.at_punct(Punct::Eq) {
            self.bump(node);
            let value = self.parse_expr()?;
            self.adopt(node, value);
        }
        self.close(node);
        Ok(())
    }

    // ---- types ---------------------------------------------------------

    /// A data type when one is present; parameters allow `parameter W = 8`
    /// with no explicit type.
    fn parse_optional_data_type(&mut self, parent: NodeId) -> PResult<()> {
        let is_type = match self.peek().kind {
            TokenKind::Keyword(k) if k.is_data_type() => true,
            TokenKind::Keyword(Keyword::Struct | Keyword::Union | Keyword::Enum) => true,
            TokenKind::Identifier => matches!(
                self.peek_at(1).kind,
                TokenKind::Identifier | TokenKind::EscapedIdentifier
            ),
            _ => false,
        };
        if is_type {
            self.parse_data_type(parent)?;
        }
        Ok(())
    }

    fn parse_data_type(&mut self, parent: NodeId) -> PResult<NodeId> {
        let node = self.open(parent, NodeKind::PaDataType, SymbolId::BAD);
        match self.peek().kind {
            TokenKind::Keyword(Keyword::Struct | Keyword::Union) => {
                self.bump(node);
                if self.at_kw(Keyword::Packed) {
                    self.bump(node);
                }
                if self.at_kw(Keyword::Signed) || self.at_kw(Keyword::Unsigned) {
                    self.bump(node);
                }
                self.expect_punct(node, Punct::LBrace)?;
                while !self.at_punct(Punct::RBrace) && !self.at_eof() {
                    let member = self.open(node, NodeKind::PaStructMember, SymbolId::BAD);
                    self.parse_data_type(member)?;
                    let name = self.expect_ident(member)?;
                    self.tree.object_mut(member).symbol = name;
                    while self.at_punct(Punct::Comma) {
                        self.bump(member);
                        self.expect_ident(member)?;
                    }
                    self.expect_punct(member, Punct::Semi)?;
                    self.close(member);
                }
                self.expect_punct(node, Punct::RBrace)?;
            }
            TokenKind::Keyword(Keyword::Enum) => {
                self.bump(node);
                if matches!(self.peek().kind, TokenKind::Keyword(k) if k.is_data_type()) {
                    self.bump(node);
                    while self.at_punct(Punct::LBracket) {
                        self.parse_dimension(node, NodeKind::PaPackedDim)?;
                    }
                }
                self.expect_punct(node, Punct::LBrace)?;
                while !self.at_punct(Punct::RBrace) && !self.at_eof() {
                    let member = self.open(node, NodeKind::PaEnumMember, SymbolId::BAD);
                    let name = self.expect_ident(member)?;
                    self.tree.object_mut(member).symbol = name;
                    if self.at_punct(Punct::Eq) {
                        self.bump(member);
                        let value = self.parse_expr()?;
                        self.adopt(member, value);
                    }
                    self.close(member);
                    if self.at_punct(Punct::Comma) {
                        self.bump(node);
                    } else {
                        break;
                    }
                }
                self.expect_punct(node, Punct::RBrace)?;
            }
            TokenKind::Keyword(k) if k.is_data_type() || k.is_net_type() => {
                self.bump(node);
                if self.at_kw(Keyword::Signed) || self.at_kw(Keyword::Unsigned) {
                    self.bump(node);
                }
                while self.at_punct(Punct::LBracket) {
                    self.parse_dimension(node, NodeKind::PaPackedDim)?;
                }
            }
            TokenKind::Keyword(Keyword::Signed | Keyword::Unsigned) => {
                self.bump(node);
                while self.at_punct(Punct::LBracket) {
                    self.parse_dimension(node, NodeKind::PaPackedDim)?;
                }
            }
            TokenKind::Identifier => {
                let name = self.parse_type_path(node)?;
                self.tree.object_mut(node).symbol = name;
                while self.at_punct(Punct::LBracket) {
                    self.parse_dimension(node, NodeKind::PaPackedDim)?;
                }
            }
            _ => return Err(self.fail("expected a data type")),
        }
        self.close(node);
        Ok(node)
    }

    /// `pkg::name` or `name`, including interface.modport forms. Returns the
    /// final component.
    fn parse_type_path(&mut self, parent: NodeId) -> PResult<SymbolId> {
        let mut name = self.expect_ident(parent)?;
        loop {
            if self.at_punct(Punct::ColonColon) {
                self.bump(parent);
                name = self.expect_ident(parent)?;
            } else if self.at_punct(Punct::Dot) {
                self.bump(parent);
                name = self.expect_ident(parent)?;
            } else {
                break;
            }
        }
        Ok(name)
    }

    fn parse_dimension(&mut self, parent: NodeId, kind: NodeKind) -> PResult<()> {
        let node = self.open(parent, kind, SymbolId::BAD);
        self.expect_punct(node, Punct::LBracket)?;
        if !self.at_punct(Punct::RBracket) {
            let left = self.parse_expr()?;
            self.adopt(node, left);
            if self.at_punct(Punct::Colon) {
                self.bump(node);
                let right = self.parse_expr()?;
                self.adopt(node, right);
            }
        }
        self.expect_punct(node, Punct::RBracket)?;
        self.close(node);
        Ok(())
    }

    fn parse_typedef(&mut self, parent: NodeId) -> PResult<()> {
        let node = self.open(parent, NodeKind::PaTypedef, SymbolId::BAD);
        self.bump(node); // typedef
        self.parse_data_type(node)?;
        let name = self.expect_ident(node)?;
        self.tree.object_mut(node).symbol = name;
        while self.at_punct(Punct::LBracket) {
            self.parse_dimension(node, NodeKind::PaUnpackedDim)?;
        }
        self.expect_punct(node, Punct::Semi)?;
        self.close(node);
        Ok(())
    }

    // ---- module items ---------------------------------------------------

    fn parse_module_item(&mut self, parent: NodeId) -> PResult<()> {
        match self.peek().kind.clone() {
            TokenKind::Keyword(k) if k.is_net_type() => self.parse_net_decl(parent),
            TokenKind::Keyword(k) if k.is_data_type() => self.parse_data_decl(parent),
            TokenKind::Keyword(Keyword::Const | Keyword::Var | Keyword::Automatic | Keyword::Static) => {
                self.parse_data_decl(parent)
            }
            TokenKind::Keyword(Keyword::Parameter) => self.parse_param_decl(parent, false, true),
            TokenKind::Keyword(Keyword::Localparam) => self.parse_param_decl(parent, true, true),
            TokenKind::Keyword(Keyword::Specparam) => self.consume_through_semi(parent),
            TokenKind::Keyword(Keyword::Typedef) => self.parse_typedef(parent),
            TokenKind::Keyword(Keyword::Genvar) => {
                let node = self.open(parent, NodeKind::PaGenvarDecl, SymbolId::BAD);
                self.bump(node);
                let name = self.expect_ident(node)?;
                self.tree.object_mut(node).symbol = name;
                while self.at_punct(Punct::Comma) {
                    self.bump(node);
                    self.expect_ident(node)?;
                }
                self.expect_punct(node, Punct::Semi)?;
                self.close(node);
                Ok(())
            }
            TokenKind::Keyword(Keyword::Assign) => self.parse_cont_assign(parent),
            TokenKind::Keyword(
                Keyword::Always | Keyword::AlwaysComb | Keyword::AlwaysFf | Keyword::AlwaysLatch,
            ) => {
                let node = self.open(parent, NodeKind::PaAlwaysBlock, SymbolId::BAD);
                self.bump(node);
                let stmt = self.parse_statement()?;
                self.adopt(node, stmt);
                self.close(node);
                Ok(())
            }
            TokenKind::Keyword(Keyword::Initial) => {
                let node = self.open(parent, NodeKind::PaInitialBlock, SymbolId::BAD);
                self.bump(node);
                let stmt = self.parse_statement()?;
                self.adopt(node, stmt);
                self.close(node);
                Ok(())
            }
            TokenKind::Keyword(Keyword::Final) => {
                let node = self.open(parent, NodeKind::PaFinalBlock, SymbolId::BAD);
                self.bump(node);
                let stmt = self.parse_statement()?;
                self.adopt(node, stmt);
                self.close(node);
                Ok(())
            }
            TokenKind::Keyword(Keyword::Function) => self.parse_function(parent),
            TokenKind::Keyword(Keyword::Task) => self.parse_task(parent),
            TokenKind::Keyword(Keyword::Generate) => {
                let node = self.open(parent, NodeKind::PaGenerateRegion, SymbolId::BAD);
                self.bump(node);
                while !self.at_kw(Keyword::Endgenerate) && !self.at_eof() {
                    self.parse_generate_item(node)?;
                }
                self.expect_kw(node, Keyword::Endgenerate)?;
                self.close(node);
                Ok(())
            }
            TokenKind::Keyword(Keyword::If) => self.parse_gen_if(parent),
            TokenKind::Keyword(Keyword::For) => self.parse_gen_for(parent),
            TokenKind::Keyword(Keyword::Case) => self.parse_gen_case(parent),
            TokenKind::Keyword(Keyword::Defparam) => {
                let node = self.open(parent, NodeKind::PaDefparam, SymbolId::BAD);
                self.bump(node);
                let target = self.parse_postfix()?;
                self.adopt(node, target);
                self.expect_punct(node, Punct::Eq)?;
                let value = self.parse_expr()?;
                self.adopt(node, value);
                self.expect_punct(node, Punct::Semi)?;
                self.close(node);
                Ok(())
            }
            TokenKind::Keyword(Keyword::Import) => self.parse_import(parent),
            TokenKind::Keyword(Keyword::Modport) => self.parse_modport(parent),
            TokenKind::Keyword(Keyword::Input | Keyword::Output | Keyword::Inout) => {
                // non-ANSI port declarations
                self.parse_data_decl(parent)
            }
            TokenKind::Identifier | TokenKind::EscapedIdentifier => {
                // user-type declaration vs module instantiation
                if self.peek_at(1).is_punct(Punct::Hash) {
                    self.parse_instantiation(parent)
                } else if matches!(
                    self.peek_at(1).kind,
                    TokenKind::Identifier | TokenKind::EscapedIdentifier
                ) {
                    if self.peek_at(2).is_punct(Punct::LParen) {
                        self.parse_instantiation(parent)
                    } else {
                        self.parse_data_decl(parent)
                    }
                } else {
                    self.parse_unsupported_item(parent)
                }
            }
            TokenKind::Punct(Punct::Semi) => {
                let node = self.open(parent, NodeKind::PaStmt, SymbolId::BAD);
                self.bump(node);
                self.close(node);
                Ok(())
            }
            _ => self.parse_unsupported_item(parent),
        }
    }

    /// An item the grammar does not model. Its tokens are preserved under a
    /// `PaUnsupportedItem` node through the closing semicolon; stage 7 turns
    /// it into an unsupported UHDM node with a warning.
    fn parse_unsupported_item(&mut self, parent: NodeId) -> PResult<()> {
        if self.at_eof() {
            return Err(self.fail("expected a module item"));
        }
        let node = self.open(parent, NodeKind::PaUnsupportedItem, SymbolId::BAD);
        let mut consumed = 0usize;
        let mut depth = 0i32;
        while !self.at_eof() {
            let token = self.peek().clone();
            match token.kind {
                TokenKind::Punct(Punct::LParen | Punct::LBracket | Punct::LBrace) => depth += 1,
                TokenKind::Punct(Punct::RParen | Punct::RBracket | Punct::RBrace) => depth -= 1,
                TokenKind::Punct(Punct::Semi) if depth <= 0 => {
                    self.bump(node);
                    break;
                }
                TokenKind::Keyword(
                    Keyword::Endmodule
                    | Keyword::Endpackage
                    | Keyword::Endinterface
                    | Keyword::Endprogram
                    | Keyword::Endclass
                    | Keyword::Endgenerate,
                ) => break,
                _ => {}
            }
            self.bump(node);
            consumed += 1;
        }
        self.close(node);
        if consumed == 0 {
            return Err(self.fail("expected a module item"));
        }
        Ok(())
    }

    fn consume_through_semi(&mut self, parent: NodeId) -> PResult<()> {
        let node = self.open(parent, NodeKind::PaStmt, SymbolId::BAD);
        while !self.at_eof() && !self.at_punct(Punct::Semi) {
            self.bump(node);
        }
        if self.at_punct(Punct::Semi) {
            self.bump(node);
        }
        self.close(node);
        Ok(())
    }

    fn parse_modport(&mut self, parent: NodeId) -> PResult<()> {
        let node = self.open(parent, NodeKind::PaModportDecl, SymbolId::BAD);
        self.bump(node); // modport
        let name = self.expect_ident(node)?;
        self.tree.object_mut(node).symbol = name;
        self.skip_balanced(node, Punct::LParen, Punct::RParen)?;
        self.expect_punct(node, Punct::Semi)?;
        self.close(node);
        Ok(())
    }

    fn skip_balanced(&mut self, parent: NodeId, open: Punct, close: Punct) -> PResult<()> {
        self.expect_punct(parent, open)?;
        let mut depth = 1;
        while depth > 0 && !self.at_eof() {
            if self.at_punct(open) {
                depth += 1;
            } else if self.at_punct(close) {
                depth -= 1;
            }
            self.bump(parent);
        }
        Ok(())
    }

    fn parse_net_decl(&mut self, parent: NodeId) -> PResult<()> {
        let node = self.open(parent, NodeKind::PaNetDecl, SymbolId::BAD);
        self.parse_data_type(node)?;
        self.parse_declarators(node)?;
        self.expect_punct(node, Punct::Semi)?;
        self.close(node);
        Ok(())
    }

    fn parse_data_decl(&mut self, parent: NodeId) -> PResult<()> {
        let node = self.open(parent, NodeKind::PaDataDecl, SymbolId::BAD);
        while matches!(
            self.peek().kind,
            TokenKind::Keyword(
                Keyword::Const
                    | Keyword::Var
                    | Keyword::Automatic
                    | Keyword::Static
                    | Keyword::Local
                    | Keyword::Protected
                    | Keyword::Rand
                    | Keyword::Randc
                    | Keyword::Input
                    | Keyword::Output
                    | Keyword::Inout
            )
        ) {
            self.bump(node);
        }
        self.parse_data_type(node)?;
        self.parse_declarators(node)?;
        self.expect_punct(node, Punct::Semi)?;
        self.close(node);
        Ok(())
    }

    /// `name [dims] [= expr] {, name [dims] [= expr]}`
    fn parse_declarators(&mut self, node: NodeId) -> PResult<()> {
        loop {
            let name = self.expect_ident(node)?;
            if self.tree.object(node).symbol.is_bad() {
                self.tree.object_mut(node).symbol = name;
            }
            while self.at_punct(Punct::LBracket) {
                self.parse_dimension(node, NodeKind::PaUnpackedDim)?;
            }
            if self.at_punct(Punct::Eq) {
                self.bump(node);
                let value = self.parse_expr()?;
                self.adopt(node, value);
            }
            if self.at_punct(Punct::Comma) {
                self.bump(node);
            } else {
                return Ok(());
            }
        }
    }

    fn parse_cont_assign(&mut self, parent: NodeId) -> PResult<()> {
        let node = self.open(parent, NodeKind::PaContAssign, SymbolId::BAD);
        self.bump(node); // assign
        if self.at_punct(Punct::Hash) {
            let delay = self.open(node, NodeKind::PaDelayControl, SymbolId::BAD);
            self.bump(delay);
            let value = self.parse_primary()?;
            self.adopt(delay, value);
            self.close(delay);
        }
        loop {
            let assign = self.open(node, NodeKind::PaBlockingAssign, SymbolId::BAD);
            let lhs = self.parse_postfix()?;
            self.adopt(assign, lhs);
            self.expect_punct(assign, Punct::Eq)?;
            let rhs = self.parse_expr()?;
            self.adopt(assign, rhs);
            self.close(assign);
            if self.at_punct(Punct::Comma) {
                self.bump(node);
            } else {
                break;
            }
        }
        self.expect_punct(node, Punct::Semi)?;
        self.close(node);
        Ok(())
    }

    fn parse_function(&mut self, parent: NodeId) -> PResult<()> {
        let node = self.open(parent, NodeKind::PaFunctionDecl, SymbolId::BAD);
        while matches!(
            self.peek().kind,
            TokenKind::Keyword(
                Keyword::Local | Keyword::Protected | Keyword::Static | Keyword::Virtual
            )
        ) {
            self.bump(node);
        }
        self.expect_kw(node, Keyword::Function)?;
        if self.at_kw(Keyword::Automatic) || self.at_kw(Keyword::Static) {
            self.bump(node);
        }
        // return type, absent for constructors and implicit-int functions
        let name = if self.at_kw(Keyword::New) {
            let symbol = self.symbols.register("new");
            self.bump(node);
            symbol
        } else {
            let return_type_present = match self.peek().kind {
                TokenKind::Keyword(k) if k.is_data_type() => true,
                TokenKind::Identifier => matches!(
                    self.peek_at(1).kind,
                    TokenKind::Identifier | TokenKind::EscapedIdentifier
                ),
                _ => false,
            };
            if return_type_present {
                self.parse_data_type(node)?;
            }
            self.expect_ident(node)?
        };
        self.tree.object_mut(node).symbol = name;
        if self.at_punct(Punct::LParen) {
            self.parse_tf_ports(node)?;
        }
        self.expect_punct(node, Punct::Semi)?;
        while !self.at_kw(Keyword::Endfunction) && !self.at_eof() {
            let before = self.pos;
            match self.parse_block_item(node) {
                Ok(()) => {}
                Err(Abort) => {
                    if self.mode == Mode::Fast {
                        return Err(Abort);
                    }
                    self.recover();
                    self.ensure_progress(before);
                }
            }
        }
        self.expect_kw(node, Keyword::Endfunction)?;
        self.parse_end_label(node)?;
        self.close(node);
        Ok(())
    }

    fn parse_task(&mut self, parent: NodeId) -> PResult<()> {
        let node = self.open(parent, NodeKind::PaTaskDecl, SymbolId::BAD);
        while matches!(
            self.peek().kind,
            TokenKind::Keyword(
                Keyword::Local | Keyword::Protected | Keyword::Static | Keyword::Virtual
            )
        ) {
            self.bump(node);
        }
        self.expect_kw(node, Keyword::Task)?;
        if self.at_kw(Keyword::Automatic) || self.at_kw(Keyword::Static) {
            self.bump(node);
        }
        let name = self.expect_ident(node)?;
        self.tree.object_mut(node).symbol = name;
        if self.at_punct(Punct::LParen) {
            self.parse_tf_ports(node)?;
        }
        self.expect_punct(node, Punct::Semi)?;
        while !self.at_kw(Keyword::Endtask) && !self.at_eof() {
            let before = self.pos;
            match self.parse_block_item(node) {
                Ok(()) => {}
                Err(Abort) => {
                    if self.mode == Mode::Fast {
                        return Err(Abort);
                    }
                    self.recover();
                    self.ensure_progress(before);
                }
            }
        }
        self.expect_kw(node, Keyword::Endtask)?;
        self.parse_end_label(node)?;
        self.close(node);
        Ok(())
    }

    fn parse_tf_ports(&mut self, parent: NodeId) -> PResult<()> {
        let node = self.open(parent, NodeKind::PaPortList, SymbolId::BAD);
        self.expect_punct(node, Punct::LParen)?;
        while !self.at_punct(Punct::RParen) && !self.at_eof() {
            let port = self.open(node, NodeKind::PaTfPort, SymbolId::BAD);
            if matches!(
                self.peek().kind,
                TokenKind::Keyword(
                    Keyword::Input | Keyword::Output | Keyword::Inout | Keyword::Ref
                )
            ) {
                self.bump(port);
            }
            let typed = match self.peek().kind {
                TokenKind::Keyword(k) if k.is_data_type() => true,
                TokenKind::Identifier => matches!(
                    self.peek_at(1).kind,
                    TokenKind::Identifier | TokenKind::EscapedIdentifier
                ),
                _ => false,
            };
            if typed {
                self.parse_data_type(port)?;
            }
            let name = self.expect_ident(port)?;
            self.tree.object_mut(port).symbol = name;
            while self.at_punct(Punct::LBracket) {
                self.parse_dimension(port, NodeKind::PaUnpackedDim)?;
            }
            if self.at_punct(Punct::Eq) {
                self.bump(port);
                let value = self.parse_expr()?;
                self.adopt(port, value);
            }
            self.close(port);
            if self.at_punct(Punct::Comma) {
                self.bump(node);
            } else {
                break;
            }
        }
        self.expect_punct(node, Punct::RParen)?;
        self.close(node);
        Ok(())
    }

    /// Items inside function/task bodies: declarations or statements.
    fn parse_block_item(&mut self, parent: NodeId) -> PResult<()> {
        match self.peek().kind {
            TokenKind::Keyword(k) if k.is_data_type() => self.parse_data_decl(parent),
            TokenKind::Keyword(Keyword::Const | Keyword::Var) => self.parse_data_decl(parent),
            TokenKind::Identifier
                if matches!(
                    self.peek_at(1).kind,
                    TokenKind::Identifier | TokenKind::EscapedIdentifier
                ) && !self.peek_at(1).is_punct(Punct::LParen) =>
            {
                self.parse_data_decl(parent)
            }
            _ => {
                let stmt = self.parse_statement()?;
                self.adopt(parent, stmt);
                Ok(())
            }
        }
    }

    // ---- generate -------------------------------------------------------

    fn parse_generate_item(&mut self, parent: NodeId) -> PResult<()> {
        match self.peek().kind {
            TokenKind::Keyword(Keyword::If) => self.parse_gen_if(parent),
            TokenKind::Keyword(Keyword::For) => self.parse_gen_for(parent),
            TokenKind::Keyword(Keyword::Case) => self.parse_gen_case(parent),
            TokenKind::Keyword(Keyword::Begin) => {
                let block = self.parse_gen_block_orphan()?;
                self.adopt(parent, block);
                Ok(())
            }
            _ => self.parse_module_item(parent),
        }
    }

    fn parse_gen_for(&mut self, parent: NodeId) -> PResult<()> {
        let node = self.open(parent, NodeKind::PaGenFor, SymbolId::BAD);
        self.expect_kw(node, Keyword::For)?;
        self.expect_punct(node, Punct::LParen)?;
        // init: [genvar] i = expr
        let init = self.open(node, NodeKind::PaBlockingAssign, SymbolId::BAD);
        if self.at_kw(Keyword::Genvar) {
            self.bump(init);
        }
        let genvar = self.expect_ident(init)?;
        self.tree.object_mut(init).symbol = genvar;
        self.expect_punct(init, Punct::Eq)?;
        let start = self.parse_expr()?;
        self.adopt(init, start);
        self.close(init);
        self.expect_punct(node, Punct::Semi)?;
        let cond = self.parse_expr()?;
        self.adopt(node, cond);
        self.expect_punct(node, Punct::Semi)?;
        let step = self.parse_for_step()?;
        self.adopt(node, step);
        self.expect_punct(node, Punct::RParen)?;
        let body = self.parse_gen_body()?;
        self.adopt(node, body);
        self.close(node);
        Ok(())
    }

    fn parse_for_step(&mut self) -> PResult<NodeId> {
        // i++ / i-- / i = expr / i += expr
        let target = self.parse_postfix()?;
        if self.at_punct(Punct::PlusPlus) || self.at_punct(Punct::MinusMinus) {
            let node = self.open_orphan(NodeKind::PaIncDecExpr);
            self.adopt(node, target);
            self.bump_as(node, NodeKind::UnaryOp);
            self.close(node);
            Ok(node)
        } else if self.at_punct(Punct::Eq) {
            let node = self.open_orphan(NodeKind::PaBlockingAssign);
            self.adopt(node, target);
            self.bump(node);
            let value = self.parse_expr()?;
            self.adopt(node, value);
            self.close(node);
            Ok(node)
        } else if matches!(
            self.peek().kind,
            TokenKind::Punct(
                Punct::PlusEq
                    | Punct::MinusEq
                    | Punct::StarEq
                    | Punct::SlashEq
                    | Punct::PercentEq
                    | Punct::AndEq
                    | Punct::OrEq
                    | Punct::XorEq
                    | Punct::ShlEq
                    | Punct::ShrEq
            )
        ) {
            let node = self.open_orphan(NodeKind::PaBlockingAssign);
            self.adopt(node, target);
            self.bump_as(node, NodeKind::BinaryOp);
            let value = self.parse_expr()?;
            self.adopt(node, value);
            self.close(node);
            Ok(node)
        } else {
            Err(self.fail("expected a loop step"))
        }
    }

    fn parse_gen_if(&mut self, parent: NodeId) -> PResult<()> {
        let node = self.open(parent, NodeKind::PaGenIf, SymbolId::BAD);
        self.expect_kw(node, Keyword::If)?;
        self.expect_punct(node, Punct::LParen)?;
        let cond = self.parse_expr()?;
        self.adopt(node, cond);
        self.expect_punct(node, Punct::RParen)?;
        let then_block = self.parse_gen_body()?;
        self.adopt(node, then_block);
        if self.at_kw(Keyword::Else) {
            self.bump(node);
            if self.at_kw(Keyword::If) {
                self.parse_gen_if(node)?;
            } else {
                let else_block = self.parse_gen_body()?;
                self.adopt(node, else_block);
            }
        }
        self.close(node);
        Ok(())
    }

    fn parse_gen_case(&mut self, parent: NodeId) -> PResult<()> {
        let node = self.open(parent, NodeKind::PaGenCase, SymbolId::BAD);
        self.expect_kw(node, Keyword::Case)?;
        self.expect_punct(node, Punct::LParen)?;
        let subject = self.parse_expr()?;
        self.adopt(node, subject);
        self.expect_punct(node, Punct::RParen)?;
        while !self.at_kw(Keyword::Endcase) && !self.at_eof() {
            let item = self.open(node, NodeKind::PaGenCaseItem, SymbolId::BAD);
            if self.at_kw(Keyword::Default) {
                self.bump(item);
                if self.at_punct(Punct::Colon) {
                    self.bump(item);
                }
            } else {
                loop {
                    let label = self.parse_expr()?;
                    self.adopt(item, label);
                    if self.at_punct(Punct::Comma) {
                        self.bump(item);
                    } else {
                        break;
                    }
                }
                self.expect_punct(item, Punct::Colon)?;
            }
            let body = self.parse_gen_body()?;
            self.adopt(item, body);
            self.close(item);
        }
        self.expect_kw(node, Keyword::Endcase)?;
        self.close(node);
        Ok(())
    }

    /// A generate body: a labeled begin block or a single item.
    fn parse_gen_body(&mut self) -> PResult<NodeId> {
        if self.at_kw(Keyword::Begin) {
            self.parse_gen_block_orphan()
        } else {
            let node = self.open_orphan(NodeKind::PaGenBlock);
            self.parse_generate_item(node)?;
            self.close(node);
            Ok(node)
        }
    }

    fn parse_gen_block_orphan(&mut self) -> PResult<NodeId> {
        let node = self.open_orphan(NodeKind::PaGenBlock);
        self.expect_kw(node, Keyword::Begin)?;
        if self.at_punct(Punct::Colon) {
            self.bump(node);
            let label = self.expect_ident(node)?;
            self.tree.object_mut(node).symbol = label;
        }
        while !self.at_kw(Keyword::End) && !self.at_eof() {
            self.parse_generate_item(node)?;
        }
        self.expect_kw(node, Keyword::End)?;
        self.parse_end_label(node)?;
        self.close(node);
        Ok(node)
    }

    // ---- instantiation --------------------------------------------------

    fn parse_instantiation(&mut self, parent: NodeId) -> PResult<()> {
        let node = self.open(parent, NodeKind::PaModuleInstantiation, SymbolId::BAD);
        let module = self.expect_ident(node)?;
        self.tree.object_mut(node).symbol = module;
        if self.at_punct(Punct::Hash) {
            self.bump(node);
            self.expect_punct(node, Punct::LParen)?;
            while !self.at_punct(Punct::RParen) && !self.at_eof() {
                if self.at_punct(Punct::Dot) {
                    let assign = self.open(node, NodeKind::PaNamedParamAssign, SymbolId::BAD);
                    self.bump(assign);
                    let name = self.expect_ident(assign)?;
                    self.tree.object_mut(assign).symbol = name;
                    self.expect_punct(assign, Punct::LParen)?;
                    if !self.at_punct(Punct::RParen) {
                        let value = self.parse_expr()?;
                        self.adopt(assign, value);
                    }
                    self.expect_punct(assign, Punct::RParen)?;
                    self.close(assign);
                } else {
                    let assign = self.open(node, NodeKind::PaOrderedParamAssign, SymbolId::BAD);
                    let value = self.parse_expr()?;
                    self.adopt(assign, value);
                    self.close(assign);
                }
                if self.at_punct(Punct::Comma) {
                    self.bump(node);
                } else {
                    break;
                }
            }
            self.expect_punct(node, Punct::RParen)?;
        }
        loop {
            let instance = self.open(node, NodeKind::PaHierInstance, SymbolId::BAD);
            let name = self.expect_ident(instance)?;
            self.tree.object_mut(instance).symbol = name;
            while self.at_punct(Punct::LBracket) {
                self.parse_dimension(instance, NodeKind::PaUnpackedDim)?;
            }
            self.expect_punct(instance, Punct::LParen)?;
            while !self.at_punct(Punct::RParen) && !self.at_eof() {
                if self.at_punct(Punct::DotStar) {
                    let conn = self.open(instance, NodeKind::PaOrderedPortConn, SymbolId::BAD);
                    self.bump(conn);
                    self.close(conn);
                } else if self.at_punct(Punct::Dot) {
                    let conn = self.open(instance, NodeKind::PaNamedPortConn, SymbolId::BAD);
                    self.bump(conn);
                    let port = self.expect_ident(conn)?;
                    self.tree.object_mut(conn).symbol = port;
                    if self.at_punct(Punct::LParen) {
                        self.bump(conn);
                        if !self.at_punct(Punct::RParen) {
                            let value = self.parse_expr()?;
                            self.adopt(conn, value);
                        }
                        self.expect_punct(conn, Punct::RParen)?;
                    }
                    self.close(conn);
                } else {
                    let conn = self.open(instance, NodeKind::PaOrderedPortConn, SymbolId::BAD);
                    let value = self.parse_expr()?;
                    self.adopt(conn, value);
                    self.close(conn);
                }
                if self.at_punct(Punct::Comma) {
                    self.bump(instance);
                } else {
                    break;
                }
            }
            self.expect_punct(instance, Punct::RParen)?;
            self.close(instance);
            if self.at_punct(Punct::Comma) {
                self.bump(node);
            } else {
                break;
            }
        }
        self.expect_punct(node, Punct::Semi)?;
        self.close(node);
        Ok(())
    }

    // ---- statements -----------------------------------------------------

    fn parse_statement(&mut self) -> PResult<NodeId> {
        match self.peek().kind.clone() {
            TokenKind::Keyword(Keyword::Begin) => self.parse_seq_block(),
            TokenKind::Keyword(Keyword::Fork) => self.parse_par_block(),
            TokenKind::Keyword(Keyword::If) => self.parse_if_stmt(),
            TokenKind::Keyword(Keyword::Unique | Keyword::Unique0 | Keyword::Priority) => {
                // prefix attaches to the following if/case
                let next = self.peek_at(1).kind.clone();
                match next {
                    TokenKind::Keyword(Keyword::If) => self.parse_if_stmt(),
                    _ => self.parse_case_stmt(),
                }
            }
            TokenKind::Keyword(Keyword::Case | Keyword::Casex | Keyword::Casez) => {
                self.parse_case_stmt()
            }
            TokenKind::Keyword(Keyword::For) => self.parse_for_stmt(),
            TokenKind::Keyword(Keyword::Foreach) => self.parse_foreach_stmt(),
            TokenKind::Keyword(Keyword::While) => {
                let node = self.open_orphan(NodeKind::PaWhileStmt);
                self.bump(node);
                self.expect_punct(node, Punct::LParen)?;
                let cond = self.parse_expr()?;
                self.adopt(node, cond);
                self.expect_punct(node, Punct::RParen)?;
                let body = self.parse_statement()?;
                self.adopt(node, body);
                self.close(node);
                Ok(node)
            }
            TokenKind::Keyword(Keyword::Do) => {
                let node = self.open_orphan(NodeKind::PaWhileStmt);
                self.bump(node);
                let body = self.parse_statement()?;
                self.adopt(node, body);
                self.expect_kw(node, Keyword::While)?;
                self.expect_punct(node, Punct::LParen)?;
                let cond = self.parse_expr()?;
                self.adopt(node, cond);
                self.expect_punct(node, Punct::RParen)?;
                self.expect_punct(node, Punct::Semi)?;
                self.close(node);
                Ok(node)
            }
            TokenKind::Keyword(Keyword::Repeat) => {
                let node = self.open_orphan(NodeKind::PaRepeatStmt);
                self.bump(node);
                self.expect_punct(node, Punct::LParen)?;
                let count = self.parse_expr()?;
                self.adopt(node, count);
                self.expect_punct(node, Punct::RParen)?;
                let body = self.parse_statement()?;
                self.adopt(node, body);
                self.close(node);
                Ok(node)
            }
            TokenKind::Keyword(Keyword::Forever) => {
                let node = self.open_orphan(NodeKind::PaForeverStmt);
                self.bump(node);
                let body = self.parse_statement()?;
                self.adopt(node, body);
                self.close(node);
                Ok(node)
            }
            TokenKind::Keyword(Keyword::Return) => {
                let node = self.open_orphan(NodeKind::PaReturnStmt);
                self.bump(node);
                if !self.at_punct(Punct::Semi) {
                    let value = self.parse_expr()?;
                    self.adopt(node, value);
                }
                self.expect_punct(node, Punct::Semi)?;
                self.close(node);
                Ok(node)
            }
            TokenKind::Keyword(Keyword::Break | Keyword::Continue) => {
                let node = self.open_orphan(NodeKind::PaStmt);
                self.bump(node);
                self.expect_punct(node, Punct::Semi)?;
                self.close(node);
                Ok(node)
            }
            TokenKind::Keyword(Keyword::Disable | Keyword::Wait) => {
                let node = self.open_orphan(NodeKind::PaStmt);
                self.bump(node);
                while !self.at_punct(Punct::Semi) && !self.at_eof() {
                    self.bump(node);
                }
                self.expect_punct(node, Punct::Semi)?;
                self.close(node);
                Ok(node)
            }
            TokenKind::Punct(Punct::At) => self.parse_event_control(),
            TokenKind::Punct(Punct::Hash) => {
                let node = self.open_orphan(NodeKind::PaDelayControl);
                self.bump(node);
                let delay = self.parse_primary()?;
                self.adopt(node, delay);
                let stmt = self.parse_statement()?;
                self.adopt(node, stmt);
                self.close(node);
                Ok(node)
            }
            TokenKind::Punct(Punct::Arrow) => {
                let node = self.open_orphan(NodeKind::PaStmt);
                self.bump(node);
                let event = self.parse_postfix()?;
                self.adopt(node, event);
                self.expect_punct(node, Punct::Semi)?;
                self.close(node);
                Ok(node)
            }
            TokenKind::Punct(Punct::Semi) => {
                let node = self.open_orphan(NodeKind::PaStmt);
                self.bump(node);
                self.close(node);
                Ok(node)
            }
            TokenKind::SystemIdentifier => {
                let node = self.open_orphan(NodeKind::PaSubroutineCall);
                let call = self.parse_postfix()?;
                self.adopt(node, call);
                self.expect_punct(node, Punct::Semi)?;
                self.close(node);
                Ok(node)
            }
            TokenKind::Identifier
            | TokenKind::EscapedIdentifier
            | TokenKind::Keyword(Keyword::This | Keyword::Super)
            | TokenKind::Punct(Punct::LBrace) => self.parse_assign_or_call(),
            TokenKind::Punct(Punct::PlusPlus | Punct::MinusMinus) => {
                let node = self.open_orphan(NodeKind::PaIncDecExpr);
                self.bump_as(node, NodeKind::UnaryOp);
                let target = self.parse_postfix()?;
                self.adopt(node, target);
                self.expect_punct(node, Punct::Semi)?;
                self.close(node);
                Ok(node)
            }
            _ => Err(self.fail("expected a statement")),
        }
    }

    fn parse_seq_block(&mut self) -> PResult<NodeId> {
        let node = self.open_orphan(NodeKind::PaSeqBlock);
        self.expect_kw(node, Keyword::Begin)?;
        if self.at_punct(Punct::Colon) {
            self.bump(node);
            let label = self.expect_ident(node)?;
            self.tree.object_mut(node).symbol = label;
        }
        while !self.at_kw(Keyword::End) && !self.at_eof() {
            let before = self.pos;
            match self.parse_block_item(node) {
                Ok(()) => {}
                Err(Abort) => {
                    if self.mode == Mode::Fast {
                        return Err(Abort);
                    }
                    self.recover();
                    self.ensure_progress(before);
                }
            }
        }
        self.expect_kw(node, Keyword::End)?;
        self.parse_end_label(node)?;
        self.close(node);
        Ok(node)
    }

    fn parse_par_block(&mut self) -> PResult<NodeId> {
        let node = self.open_orphan(NodeKind::PaParBlock);
        self.expect_kw(node, Keyword::Fork)?;
        if self.at_punct(Punct::Colon) {
            self.bump(node);
            let label = self.expect_ident(node)?;
            self.tree.object_mut(node).symbol = label;
        }
        while !self.at_kw(Keyword::Join)
            && !self.at_kw(Keyword::JoinAny)
            && !self.at_kw(Keyword::JoinNone)
            && !self.at_eof()
        {
            let before = self.pos;
            match self.parse_block_item(node) {
                Ok(()) => {}
                Err(Abort) => {
                    if self.mode == Mode::Fast {
                        return Err(Abort);
                    }
                    self.recover();
                    self.ensure_progress(before);
                }
            }
        }
        if self.at_kw(Keyword::Join) || self.at_kw(Keyword::JoinAny) || self.at_kw(Keyword::JoinNone)
        {
            self.bump(node);
        } else {
            return Err(self.fail("expected \"join\""));
        }
        self.parse_end_label(node)?;
        self.close(node);
        Ok(node)
    }

    fn parse_if_stmt(&mut self) -> PResult<NodeId> {
        let node = self.open_orphan(NodeKind::PaIfStmt);
        if matches!(
            self.peek().kind,
            TokenKind::Keyword(Keyword::Unique | Keyword::Unique0 | Keyword::Priority)
        ) {
            self.bump(node);
        }
        self.expect_kw(node, Keyword::If)?;
        self.expect_punct(node, Punct::LParen)?;
        let cond = self.parse_expr()?;
        self.adopt(node, cond);
        self.expect_punct(node, Punct::RParen)?;
        let then_stmt = self.parse_statement()?;
        self.adopt(node, then_stmt);
        if self.at_kw(Keyword::Else) {
            self.bump(node);
            let else_stmt = self.parse_statement()?;
            self.adopt(node, else_stmt);
        }
        self.close(node);
        Ok(node)
    }

    fn parse_case_stmt(&mut self) -> PResult<NodeId> {
        let node = self.open_orphan(NodeKind::PaCaseStmt);
        if matches!(
            self.peek().kind,
            TokenKind::Keyword(Keyword::Unique | Keyword::Unique0 | Keyword::Priority)
        ) {
            self.bump(node);
        }
        match self.peek().kind {
            TokenKind::Keyword(Keyword::Case | Keyword::Casex | Keyword::Casez) => {
                self.bump(node);
            }
            _ => return Err(self.fail("expected \"case\"")),
        }
        self.expect_punct(node, Punct::LParen)?;
        let subject = self.parse_expr()?;
        self.adopt(node, subject);
        self.expect_punct(node, Punct::RParen)?;
        while !self.at_kw(Keyword::Endcase) && !self.at_eof() {
            let item = self.open(node, NodeKind::PaCaseItem, SymbolId::BAD);
            if self.at_kw(Keyword::Default) {
                self.bump(item);
                if self.at_punct(Punct::Colon) {
                    self.bump(item);
                }
            } else {
                loop {
                    let label = self.parse_expr()?;
                    self.adopt(item, label);
                    if self.at_punct(Punct::Comma) {
                        self.bump(item);
                    } else {
                        break;
                    }
                }
                self.expect_punct(item, Punct::Colon)?;
            }
            let body = self.parse_statement()?;
            self.adopt(item, body);
            self.close(item);
        }
        self.expect_kw(node, Keyword::Endcase)?;
        self.close(node);
        Ok(node)
    }

    fn parse_for_stmt(&mut self) -> PResult<NodeId> {
        let node = self.open_orphan(NodeKind::PaForStmt);
        self.expect_kw(node, Keyword::For)?;
        self.expect_punct(node, Punct::LParen)?;
        // init: declaration with initializer or plain assignment
        if !self.at_punct(Punct::Semi) {
            let is_decl = match self.peek().kind {
                TokenKind::Keyword(k) if k.is_data_type() => true,
                TokenKind::Identifier => matches!(
                    self.peek_at(1).kind,
                    TokenKind::Identifier | TokenKind::EscapedIdentifier
                ),
                _ => false,
            };
            if is_decl {
                let decl = self.open(node, NodeKind::PaDataDecl, SymbolId::BAD);
                self.parse_data_type(decl)?;
                self.parse_declarators(decl)?;
                self.close(decl);
            } else {
                let assign = self.open(node, NodeKind::PaBlockingAssign, SymbolId::BAD);
                let lhs = self.parse_postfix()?;
                self.adopt(assign, lhs);
                self.expect_punct(assign, Punct::Eq)?;
                let rhs = self.parse_expr()?;
                self.adopt(assign, rhs);
                self.close(assign);
            }
        }
        self.expect_punct(node, Punct::Semi)?;
        if !self.at_punct(Punct::Semi) {
            let cond = self.parse_expr()?;
            self.adopt(node, cond);
        }
        self.expect_punct(node, Punct::Semi)?;
        if !self.at_punct(Punct::RParen) {
            let step = self.parse_for_step()?;
            self.adopt(node, step);
        }
        self.expect_punct(node, Punct::RParen)?;
        let body = self.parse_statement()?;
        self.adopt(node, body);
        self.close(node);
        Ok(node)
    }

    fn parse_foreach_stmt(&mut self) -> PResult<NodeId> {
        let node = self.open_orphan(NodeKind::PaForeachStmt);
        self.expect_kw(node, Keyword::Foreach)?;
        self.expect_punct(node, Punct::LParen)?;
        let target = self.parse_postfix()?;
        self.adopt(node, target);
        self.expect_punct(node, Punct::RParen)?;
        let body = self.parse_statement()?;
        self.adopt(node, body);
        self.close(node);
        Ok(node)
    }

    fn parse_event_control(&mut self) -> PResult<NodeId> {
        let node = self.open_orphan(NodeKind::PaEventControl);
        self.expect_punct(node, Punct::At)?;
        if self.at_punct(Punct::Star) {
            self.bump(node);
        } else if self.at_punct(Punct::LParen) {
            self.bump(node);
            if self.at_punct(Punct::Star) {
                self.bump(node);
            } else {
                loop {
                    if self.at_kw(Keyword::Posedge) || self.at_kw(Keyword::Negedge) {
                        self.bump(node);
                    }
                    let event = self.parse_expr()?;
                    self.adopt(node, event);
                    if self.at_kw(Keyword::Iff) {
                        self.bump(node);
                        let guard = self.parse_expr()?;
                        self.adopt(node, guard);
                    }
                    if self.at_kw(Keyword::Or) || self.at_punct(Punct::Comma) {
                        self.bump(node);
                    } else {
                        break;
                    }
                }
            }
            self.expect_punct(node, Punct::RParen)?;
        } else {
            // @ident
            let event = self.parse_postfix()?;
            self.adopt(node, event);
        }
        let stmt = self.parse_statement()?;
        self.adopt(node, stmt);
        self.close(node);
        Ok(node)
    }

    fn parse_assign_or_call(&mut self) -> PResult<NodeId> {
        let lhs = self.parse_postfix()?;
        match self.peek().kind.clone() {
            TokenKind::Punct(Punct::Eq) => {
                let node = self.open_orphan(NodeKind::PaBlockingAssign);
                self.adopt(node, lhs);
                self.bump(node);
                if self.at_punct(Punct::Hash) {
                    let delay = self.open(node, NodeKind::PaDelayControl, SymbolId::BAD);
                    self.bump(delay);
                    let value = self.parse_primary()?;
                    self.adopt(delay, value);
                    self.close(delay);
                }
                let rhs = self.parse_expr()?;
                self.adopt(node, rhs);
                self.expect_punct(node, Punct::Semi)?;
                self.close(node);
                Ok(node)
            }
            TokenKind::Punct(Punct::Le) => {
                let node = self.open_orphan(NodeKind::PaNonblockingAssign);
                self.adopt(node, lhs);
                self.bump(node);
                if self.at_punct(Punct::Hash) {
                    let delay = self.open(node, NodeKind::PaDelayControl, SymbolId::BAD);
                    self.bump(delay);
                    let value = self.parse_primary()?;
                    self.adopt(delay, value);
                    self.close(delay);
                }
                let rhs = self.parse_expr()?;
                self.adopt(node, rhs);
                self.expect_punct(node, Punct::Semi)?;
                self.close(node);
                Ok(node)
            }
            TokenKind::Punct(
                Punct::PlusEq
                | Punct::MinusEq
                | Punct::StarEq
                | Punct::SlashEq
                | Punct::PercentEq
                | Punct::AndEq
                | Punct::OrEq
                | Punct::XorEq
                | Punct::ShlEq
                | Punct::ShrEq,
            ) => {
                let node = self.open_orphan(NodeKind::PaBlockingAssign);
                self.adopt(node, lhs);
                self.bump_as(node, NodeKind::BinaryOp);
                let rhs = self.parse_expr()?;
                self.adopt(node, rhs);
                self.expect_punct(node, Punct::Semi)?;
                self.close(node);
                Ok(node)
            }
            TokenKind::Punct(Punct::PlusPlus | Punct::MinusMinus) => {
                let node = self.open_orphan(NodeKind::PaIncDecExpr);
                self.adopt(node, lhs);
                self.bump_as(node, NodeKind::UnaryOp);
                self.expect_punct(node, Punct::Semi)?;
                self.close(node);
                Ok(node)
            }
            TokenKind::Punct(Punct::Semi) => {
                let node = self.open_orphan(NodeKind::PaSubroutineCall);
                self.adopt(node, lhs);
                self.bump(node);
                self.close(node);
                Ok(node)
            }
            _ => Err(self.fail("expected an assignment or call")),
        }
    }

    // ---- expressions ----------------------------------------------------

    fn parse_expr(&mut self) -> PResult<NodeId> {
        let cond = self.parse_binary(0)?;
        if self.at_punct(Punct::Question) {
            let node = self.open_orphan(NodeKind::PaCondExpr);
            self.adopt(node, cond);
            self.bump(node);
            let then_expr = self.parse_expr()?;
            self.adopt(node, then_expr);
            self.expect_punct(node, Punct::Colon)?;
            let else_expr = self.parse_expr()?;
            self.adopt(node, else_expr);
            self.close(node);
            Ok(node)
        } else {
            Ok(cond)
        }
    }

    fn parse_binary(&mut self, min_prec: u8) -> PResult<NodeId> {
        let mut lhs = self.parse_unary()?;
        loop {
            let Some((prec, right_assoc)) = binary_prec(&self.peek().kind) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            let node = self.open_orphan(NodeKind::PaBinaryExpr);
            self.adopt(node, lhs);
            self.bump_as(node, NodeKind::BinaryOp);
            let next_min = if right_assoc { prec } else { prec + 1 };
            let rhs = self.parse_binary(next_min)?;
            self.adopt(node, rhs);
            self.close(node);
            lhs = node;
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<NodeId> {
        match self.peek().kind {
            TokenKind::Punct(
                Punct::Plus
                | Punct::Minus
                | Punct::Bang
                | Punct::BitNot
                | Punct::BitAnd
                | Punct::BitOr
                | Punct::BitXor
                | Punct::Nand
                | Punct::Nor
                | Punct::Xnor,
            ) => {
                let node = self.open_orphan(NodeKind::PaUnaryExpr);
                self.bump_as(node, NodeKind::UnaryOp);
                let operand = self.parse_unary()?;
                self.adopt(node, operand);
                self.close(node);
                Ok(node)
            }
            TokenKind::Punct(Punct::PlusPlus | Punct::MinusMinus) => {
                let node = self.open_orphan(NodeKind::PaIncDecExpr);
                self.bump_as(node, NodeKind::UnaryOp);
                let operand = self.parse_postfix()?;
                self.adopt(node, operand);
                self.close(node);
                Ok(node)
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> PResult<NodeId> {
        let mut base = self.parse_primary()?;
        loop {
            match self.peek().kind {
                TokenKind::Punct(Punct::LBracket) => {
                    let node = self.open_orphan(NodeKind::PaBitSelect);
                    // span starts at the base, not the bracket
                    self.adopt(node, base);
                    self.bump(node); // [
                    let index = self.parse_expr()?;
                    self.adopt(node, index);
                    match self.peek().kind {
                        TokenKind::Punct(Punct::Colon) => {
                            self.tree.object_mut(node).kind = NodeKind::PaPartSelect;
                            self.bump(node);
                            let right = self.parse_expr()?;
                            self.adopt(node, right);
                        }
                        TokenKind::Punct(Punct::PlusColon | Punct::MinusColon) => {
                            self.tree.object_mut(node).kind = NodeKind::PaIndexedPartSelect;
                            self.bump(node);
                            let width = self.parse_expr()?;
                            self.adopt(node, width);
                        }
                        _ => {}
                    }
                    self.expect_punct(node, Punct::RBracket)?;
                    self.close(node);
                    base = node;
                }
                TokenKind::Punct(Punct::Dot) => {
                    let node = self.open_orphan(NodeKind::PaHierPath);
                    self.adopt(node, base);
                    self.bump(node);
                    let member = self.expect_ident(node)?;
                    self.tree.object_mut(node).symbol = member;
                    self.close(node);
                    base = node;
                }
                TokenKind::Punct(Punct::ColonColon) => {
                    let node = self.open_orphan(NodeKind::PaScopedPath);
                    self.adopt(node, base);
                    self.bump(node);
                    let member = self.expect_ident(node)?;
                    self.tree.object_mut(node).symbol = member;
                    self.close(node);
                    base = node;
                }
                TokenKind::Punct(Punct::LParen) => {
                    let node = self.open_orphan(NodeKind::PaCall);
                    let symbol = self.tree.object(base).symbol;
                    self.tree.object_mut(node).symbol = symbol;
                    self.adopt(node, base);
                    self.bump(node); // (
                    while !self.at_punct(Punct::RParen) && !self.at_eof() {
                        let arg = self.parse_expr()?;
                        self.adopt(node, arg);
                        if self.at_punct(Punct::Comma) {
                            self.bump(node);
                        } else {
                            break;
                        }
                    }
                    self.expect_punct(node, Punct::RParen)?;
                    self.close(node);
                    base = node;
                }
                _ => break,
            }
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> PResult<NodeId> {
        match self.peek().kind.clone() {
            TokenKind::IntLiteral
            | TokenKind::BasedLiteral
            | TokenKind::RealLiteral
            | TokenKind::TimeLiteral
            | TokenKind::StringLiteral
            | TokenKind::Identifier
            | TokenKind::EscapedIdentifier => Ok(self.bump_orphan()),
            TokenKind::SystemIdentifier => {
                let node = self.open_orphan(NodeKind::PaSystemCall);
                let symbol = self.symbols.register(&self.peek().text.clone());
                self.tree.object_mut(node).symbol = symbol;
                self.bump(node);
                if self.at_punct(Punct::LParen) {
                    self.bump(node);
                    while !self.at_punct(Punct::RParen) && !self.at_eof() {
                        let arg = self.parse_expr()?;
                        self.adopt(node, arg);
                        if self.at_punct(Punct::Comma) {
                            self.bump(node);
                        } else {
                            break;
                        }
                    }
                    self.expect_punct(node, Punct::RParen)?;
                }
                self.close(node);
                Ok(node)
            }
            TokenKind::Keyword(Keyword::This | Keyword::Super | Keyword::Null) => {
                Ok(self.bump_orphan())
            }
            TokenKind::Keyword(Keyword::New) => {
                let node = self.open_orphan(NodeKind::PaCall);
                let symbol = self.symbols.register("new");
                self.tree.object_mut(node).symbol = symbol;
                self.bump(node);
                if self.at_punct(Punct::LParen) {
                    self.bump(node);
                    while !self.at_punct(Punct::RParen) && !self.at_eof() {
                        let arg = self.parse_expr()?;
                        self.adopt(node, arg);
                        if self.at_punct(Punct::Comma) {
                            self.bump(node);
                        } else {
                            break;
                        }
                    }
                    self.expect_punct(node, Punct::RParen)?;
                }
                self.close(node);
                Ok(node)
            }
            TokenKind::Punct(Punct::LParen) => {
                let node = self.open_orphan(NodeKind::PaParenExpr);
                self.bump(node);
                let inner = self.parse_expr()?;
                self.adopt(node, inner);
                self.expect_punct(node, Punct::RParen)?;
                self.close(node);
                Ok(node)
            }
            TokenKind::Punct(Punct::LBrace) => {
                let node = self.open_orphan(NodeKind::PaConcat);
                self.bump(node); // {
                if self.at_punct(Punct::RBrace) {
                    self.bump(node);
                    self.close(node);
                    return Ok(node);
                }
                let first = self.parse_expr()?;
                self.adopt(node, first);
                if self.at_punct(Punct::LBrace) {
                    // replication: {count{elements}}
                    self.tree.object_mut(node).kind = NodeKind::PaReplication;
                    self.bump(node);
                    while !self.at_punct(Punct::RBrace) && !self.at_eof() {
                        let element = self.parse_expr()?;
                        self.adopt(node, element);
                        if self.at_punct(Punct::Comma) {
                            self.bump(node);
                        } else {
                            break;
                        }
                    }
                    self.expect_punct(node, Punct::RBrace)?;
                } else {
                    while self.at_punct(Punct::Comma) {
                        self.bump(node);
                        let element = self.parse_expr()?;
                        self.adopt(node, element);
                    }
                }
                self.expect_punct(node, Punct::RBrace)?;
                self.close(node);
                Ok(node)
            }
            TokenKind::Punct(Punct::ApostropheBrace) => {
                let node = self.open_orphan(NodeKind::PaAssignmentPattern);
                self.bump(node);
                while !self.at_punct(Punct::RBrace) && !self.at_eof() {
                    // `default: expr` or `member: expr` or plain expr
                    if self.at_kw(Keyword::Default) {
                        self.bump(node);
                        self.expect_punct(node, Punct::Colon)?;
                    }
                    let element = self.parse_expr()?;
                    self.adopt(node, element);
                    if self.at_punct(Punct::Colon) {
                        self.bump(node);
                        let value = self.parse_expr()?;
                        self.adopt(node, value);
                    }
                    if self.at_punct(Punct::Comma) {
                        self.bump(node);
                    } else {
                        break;
                    }
                }
                self.expect_punct(node, Punct::RBrace)?;
                self.close(node);
                Ok(node)
            }
            TokenKind::Punct(Punct::Dollar) => Ok(self.bump_orphan()),
            _ => Err(self.fail("expected an expression")),
        }
    }
}

fn binary_prec(kind: &TokenKind) -> Option<(u8, bool)> {
    let TokenKind::Punct(punct) = kind else { return None };
    Some(match punct {
        Punct::OrOr => (1, false),
        Punct::AndAnd => (2, false),
        Punct::BitOr => (3, false),
        Punct::BitXor | Punct::Xnor => (4, false),
        Punct::BitAnd => (5, false),
        Punct::EqEq
        | Punct::NotEq
        | Punct::CaseEq
        | Punct::CaseNotEq
        | Punct::WildEq
        | Punct::WildNotEq => (6, false),
        Punct::Lt | Punct::Le | Punct::Gt | Punct::Ge => (7, false),
        Punct::Shl | Punct::Shr | Punct::AShl | Punct::AShr => (8, false),
        Punct::Plus | Punct::Minus => (9, false),
        Punct::Star | Punct::Slash | Punct::Percent => (10, false),
        Punct::Power => (11, true),
        _ => return None,
    })
}

fn leaf_kind(token: &Token) -> NodeKind {
    match &token.kind {
        TokenKind::Identifier => NodeKind::Identifier,
        TokenKind::EscapedIdentifier => NodeKind::EscapedIdentifier,
        TokenKind::SystemIdentifier => NodeKind::SystemIdentifier,
        TokenKind::Keyword(_) => NodeKind::Keyword,
        TokenKind::IntLiteral => NodeKind::IntLiteral,
        TokenKind::BasedLiteral => NodeKind::BasedLiteral,
        TokenKind::RealLiteral => NodeKind::RealLiteral,
        TokenKind::TimeLiteral => NodeKind::TimeLiteral,
        TokenKind::StringLiteral => NodeKind::StringLiteral,
        TokenKind::Punct(_) => NodeKind::Punctuation,
        TokenKind::Comment => NodeKind::Comment,
        TokenKind::Unknown | TokenKind::Eof => NodeKind::Punctuation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::PathId;

    fn parse(source: &str) -> (FileContent, Vec<SyntaxIssue>) {
        let symbols = SymbolTable::new();
        parse_source(PathId::BAD, source, &symbols)
    }

    fn kinds_of(tree: &FileContent, parent: NodeId) -> Vec<NodeKind> {
        tree.children(parent).map(|c| tree.object(c).kind).collect()
    }

    fn find(tree: &FileContent, kind: NodeKind) -> Option<NodeId> {
        tree.preorder(tree.root()).find(|&id| tree.object(id).kind == kind)
    }

    #[test]
    fn empty_source_parses() {
        let (tree, issues) = parse("\n");
        assert!(issues.is_empty());
        assert_eq!(tree.children(tree.root()).count(), 0);
    }

    #[test]
    fn simple_module() {
        let (tree, issues) = parse(
            "module top(input logic clk, output logic [7:0] q);\n  assign q = 8'hFF;\nendmodule\n",
        );
        assert!(issues.is_empty(), "{issues:?}");
        let module = find(&tree, NodeKind::PaModuleDecl).unwrap();
        assert!(kinds_of(&tree, module).contains(&NodeKind::PaPortList));
        assert!(kinds_of(&tree, module).contains(&NodeKind::PaContAssign));
        assert_eq!(tree.validate(), Ok(()));
    }

    #[test]
    fn parameterized_module_and_instance() {
        let (tree, issues) = parse(
            "module m #(parameter int W = 8)(input logic [W-1:0] d);\nendmodule\n\
             module top;\n  m #(.W(16)) u(.d(16'h0));\nendmodule\n",
        );
        assert!(issues.is_empty(), "{issues:?}");
        let inst = find(&tree, NodeKind::PaModuleInstantiation).unwrap();
        let named = tree.child_of_kind(inst, NodeKind::PaNamedParamAssign).unwrap();
        assert!(!tree.object(named).symbol.is_bad());
        assert!(tree.child_of_kind(inst, NodeKind::PaHierInstance).is_some());
    }

    #[test]
    fn operators_are_disambiguated() {
        let (tree, issues) = parse("module m;\n  assign a = -b + c;\nendmodule\n");
        assert!(issues.is_empty(), "{issues:?}");
        let unary = find(&tree, NodeKind::PaUnaryExpr).unwrap();
        let ops: Vec<NodeKind> = tree
            .preorder(unary)
            .map(|id| tree.object(id).kind)
            .filter(|k| matches!(k, NodeKind::UnaryOp | NodeKind::BinaryOp))
            .collect();
        assert_eq!(ops, vec![NodeKind::UnaryOp]);
        assert!(find(&tree, NodeKind::PaBinaryExpr).is_some());
    }

    #[test]
    fn seq_and_par_blocks() {
        let (tree, issues) = parse(
            "module m;\ninitial begin : lbl\n  int x;\n  x = 1;\n  fork\n    x = 2;\n  join_none\nend : lbl\nendmodule\n",
        );
        assert!(issues.is_empty(), "{issues:?}");
        let seq = find(&tree, NodeKind::PaSeqBlock).unwrap();
        assert!(!tree.object(seq).symbol.is_bad());
        assert!(find(&tree, NodeKind::PaParBlock).is_some());
    }

    #[test]
    fn generate_for_with_label() {
        let (tree, issues) = parse(
            "module m;\ngenerate for (genvar i = 0; i < 3; i++) begin : g\n  wire w_i;\nend endgenerate\nendmodule\n",
        );
        assert!(issues.is_empty(), "{issues:?}");
        let gen_for = find(&tree, NodeKind::PaGenFor).unwrap();
        let block = tree.child_of_kind(gen_for, NodeKind::PaGenBlock).unwrap();
        assert!(!tree.object(block).symbol.is_bad());
    }

    #[test]
    fn case_statement_items() {
        let (tree, issues) = parse(
            "module m;\nalways_comb begin\n  case (sel)\n    2'b00, 2'b01: y = a;\n    default: y = b;\n  endcase\nend\nendmodule\n",
        );
        assert!(issues.is_empty(), "{issues:?}");
        let case_stmt = find(&tree, NodeKind::PaCaseStmt).unwrap();
        let items: Vec<NodeId> = tree
            .children(case_stmt)
            .filter(|&c| tree.object(c).kind == NodeKind::PaCaseItem)
            .collect();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn class_with_extends() {
        let (tree, issues) = parse(
            "class base;\nendclass\nclass derived extends base;\n  int member;\n  function new();\n  endfunction\nendclass\n",
        );
        assert!(issues.is_empty(), "{issues:?}");
        assert!(find(&tree, NodeKind::PaExtendsClause).is_some());
        assert!(find(&tree, NodeKind::PaFunctionDecl).is_some());
    }

    #[test]
    fn syntax_error_recovers() {
        let (tree, issues) = parse("module m;\n  assign = 1;\n  assign b = 2;\nendmodule\n");
        assert!(!issues.is_empty());
        // the second assign still parses
        let assigns: Vec<NodeId> = tree
            .preorder(tree.root())
            .filter(|&id| tree.object(id).kind == NodeKind::PaContAssign)
            .collect();
        assert!(!assigns.is_empty());
    }

    #[test]
    fn comments_attach_to_enclosing_rule() {
        let (tree, issues) = parse("module m; // header\n  wire w;\nendmodule\n");
        assert!(issues.is_empty(), "{issues:?}");
        assert!(find(&tree, NodeKind::Comment).is_some());
    }

    #[test]
    fn round_trip_terminals() {
        let source = "module m #(parameter int W = 4)(input logic [W-1:0] a, output logic b);\n\
                      assign b = (&a) | a[0];\nendmodule\n";
        let symbols = SymbolTable::new();
        let (tree, issues) = parse_source(PathId::BAD, source, &symbols);
        assert!(issues.is_empty(), "{issues:?}");
        let terminals: Vec<String> = tree
            .preorder(tree.root())
            .filter(|&id| {
                let object = tree.object(id);
                object.kind.is_terminal() && object.kind != NodeKind::Comment
            })
            .map(|id| symbols.text(tree.object(id).symbol).to_string())
            .collect();
        let rebuilt = terminals.join(" ");
        let (tree2, issues2) = parse_source(PathId::BAD, &rebuilt, &symbols);
        assert!(issues2.is_empty(), "{issues2:?}");
        let shape = |t: &FileContent| -> Vec<(NodeKind, SymbolId)> {
            t.preorder(t.root()).map(|id| (t.object(id).kind, t.object(id).symbol)).collect()
        };
        assert_eq!(shape(&tree), shape(&tree2));
    }

    #[test]
    fn typedef_enum() {
        let (tree, issues) = parse(
            "package p;\n  typedef enum logic [1:0] { IDLE = 0, RUN = 1 } state_e;\nendpackage\n",
        );
        assert!(issues.is_empty(), "{issues:?}");
        let typedef = find(&tree, NodeKind::PaTypedef).unwrap();
        assert!(tree.child_of_kind(typedef, NodeKind::PaDataType).is_some());
        let members: Vec<NodeId> = tree
            .preorder(typedef)
            .filter(|&id| tree.object(id).kind == NodeKind::PaEnumMember)
            .collect();
        assert_eq!(members.len(), 2);
    }
}
