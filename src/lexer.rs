//! Token lexer for the expanded source.
//!
//! Operates on preprocessor output, so no directives remain; backticks at
//! this level are lexical errors surfaced by the parser. Comments become
//! ordinary tokens so the tree builder can attach them to the enclosing
//! rule.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Keyword {
    Module,
    Endmodule,
    Macromodule,
    Interface,
    Endinterface,
    Program,
    Endprogram,
    Package,
    Endpackage,
    Class,
    Endclass,
    Primitive,
    Endprimitive,
    Checker,
    Endchecker,
    Config,
    Endconfig,
    Extends,
    Implements,
    Virtual,
    Import,
    Export,
    Begin,
    End,
    Fork,
    Join,
    JoinAny,
    JoinNone,
    If,
    Else,
    Case,
    Casex,
    Casez,
    Endcase,
    Default,
    For,
    Foreach,
    While,
    Do,
    Repeat,
    Forever,
    Return,
    Break,
    Continue,
    Disable,
    Wait,
    Generate,
    Endgenerate,
    Genvar,
    Function,
    Endfunction,
    Task,
    Endtask,
    Initial,
    Always,
    AlwaysComb,
    AlwaysFf,
    AlwaysLatch,
    Final,
    Assign,
    Deassign,
    Force,
    Release,
    Parameter,
    Localparam,
    Specparam,
    Defparam,
    Typedef,
    Struct,
    Union,
    Enum,
    Packed,
    Signed,
    Unsigned,
    Const,
    Static,
    Automatic,
    Var,
    Logic,
    Bit,
    Byte,
    Shortint,
    Int,
    Longint,
    Integer,
    Time,
    Real,
    Shortreal,
    Realtime,
    String,
    Chandle,
    Event,
    Void,
    Wire,
    Tri,
    Tri0,
    Tri1,
    Wand,
    Wor,
    Trireg,
    Uwire,
    Supply0,
    Supply1,
    Reg,
    Input,
    Output,
    Inout,
    Ref,
    Posedge,
    Negedge,
    Edge,
    Or,
    And,
    Not,
    Iff,
    Modport,
    Clocking,
    Endclocking,
    Property,
    Endproperty,
    Sequence,
    Endsequence,
    Assert,
    Assume,
    Cover,
    Restrict,
    New,
    This,
    Super,
    Null,
    Local,
    Protected,
    Rand,
    Randc,
    Constraint,
    Timeunit,
    Timeprecision,
    Unique,
    Unique0,
    Priority,
    Table,
    Endtable,
    Specify,
    Endspecify,
}

impl Keyword {
    pub fn from_str(text: &str) -> Option<Self> {
        Some(match text {
            "module" => Self::Module,
            "endmodule" => Self::Endmodule,
            "macromodule" => Self::Macromodule,
            "interface" => Self::Interface,
            "endinterface" => Self::Endinterface,
            "program" => Self::Program,
            "endprogram" => Self::Endprogram,
            "package" => Self::Package,
            "endpackage" => Self::Endpackage,
            "class" => Self::Class,
            "endclass" => Self::Endclass,
            "primitive" => Self::Primitive,
            "endprimitive" => Self::Endprimitive,
            "checker" => Self::Checker,
            "endchecker" => Self::Endchecker,
            "config" => Self::Config,
            "endconfig" => Self::Endconfig,
            "extends" => Self::Extends,
            "implements" => Self::Implements,
            "virtual" => Self::Virtual,
            "import" => Self::Import,
            "export" => Self::Export,
            "begin" => Self::Begin,
            "end" => Self::End,
            "fork" => Self::Fork,
            "join" => Self::Join,
            "join_any" => Self::JoinAny,
            "join_none" => Self::JoinNone,
            "if" => Self::If,
            "else" => Self::Else,
            "case" => Self::Case,
            "casex" => Self::Casex,
            "casez" => Self::Casez,
            "endcase" => Self::Endcase,
            "default" => Self::Default,
            "for" => Self::For,
            "foreach" => Self::Foreach,
            "while" => Self::While,
            "do" => Self::Do,
            "repeat" => Self::Repeat,
            "forever" => Self::Forever,
            "return" => Self::Return,
            "break" => Self::Break,
            "continue" => Self::Continue,
            "disable" => Self::Disable,
            "wait" => Self::Wait,
            "generate" => Self::Generate,
            "endgenerate" => Self::Endgenerate,
            "genvar" => Self::Genvar,
            "function" => Self::Function,
            "endfunction" => Self::Endfunction,
            "task" => Self::Task,
            "endtask" => Self::Endtask,
            "initial" => Self::Initial,
            "always" => Self::Always,
            "always_comb" => Self::AlwaysComb,
            "always_ff" => Self::AlwaysFf,
            "always_latch" => Self::AlwaysLatch,
            "final" => Self::Final,
            "assign" => Self::Assign,
            "deassign" => Self::Deassign,
            "force" => Self::Force,
            "release" => Self::Release,
            "parameter" => Self::Parameter,
            "localparam" => Self::Localparam,
            "specparam" => Self::Specparam,
            "defparam" => Self::Defparam,
            "typedef" => Self::Typedef,
            "struct" => Self::Struct,
            "union" => Self::Union,
            "enum" => Self::Enum,
            "packed" => Self::Packed,
            "signed" => Self::Signed,
            "unsigned" => Self::Unsigned,
            "const" => Self::Const,
            "static" => Self::Static,
            "automatic" => Self::Automatic,
            "var" => Self::Var,
            "logic" => Self::Logic,
            "bit" => Self::Bit,
            "byte" => Self::Byte,
            "shortint" => Self::Shortint,
            "int" => Self::Int,
            "longint" => Self::Longint,
            "integer" => Self::Integer,
            "time" => Self::Time,
            "real" => Self::Real,
            "shortreal" => Self::Shortreal,
            "realtime" => Self::Realtime,
            "string" => Self::String,
            "chandle" => Self::Chandle,
            "event" => Self::Event,
            "void" => Self::Void,
            "wire" => Self::Wire,
            "tri" => Self::Tri,
            "tri0" => Self::Tri0,
            "tri1" => Self::Tri1,
            "wand" => Self::Wand,
            "wor" => Self::Wor,
            "trireg" => Self::Trireg,
            "uwire" => Self::Uwire,
            "supply0" => Self::Supply0,
            "supply1" => Self::Supply1,
            "reg" => Self::Reg,
            "input" => Self::Input,
            "output" => Self::Output,
            "inout" => Self::Inout,
            "ref" => Self::Ref,
            "posedge" => Self::Posedge,
            "negedge" => Self::Negedge,
            "edge" => Self::Edge,
            "or" => Self::Or,
            "and" => Self::And,
            "not" => Self::Not,
            "iff" => Self::Iff,
            "modport" => Self::Modport,
            "clocking" => Self::Clocking,
            "endclocking" => Self::Endclocking,
            "property" => Self::Property,
            "endproperty" => Self::Endproperty,
            "sequence" => Self::Sequence,
            "endsequence" => Self::Endsequence,
            "assert" => Self::Assert,
            "assume" => Self::Assume,
            "cover" => Self::Cover,
            "restrict" => Self::Restrict,
            "new" => Self::New,
            "this" => Self::This,
            "super" => Self::Super,
            "null" => Self::Null,
            "local" => Self::Local,
            "protected" => Self::Protected,
            "rand" => Self::Rand,
            "randc" => Self::Randc,
            "constraint" => Self::Constraint,
            "timeunit" => Self::Timeunit,
            "timeprecision" => Self::Timeprecision,
            "unique" => Self::Unique,
            "unique0" => Self::Unique0,
            "priority" => Self::Priority,
            "table" => Self::Table,
            "endtable" => Self::Endtable,
            "specify" => Self::Specify,
            "endspecify" => Self::Endspecify,
            _ => return None,
        })
    }

    /// Net-type keywords, the ones a net declaration can start with.
    pub fn is_net_type(self) -> bool {
        matches!(
            self,
            Self::Wire
                | Self::Tri
                | Self::Tri0
                | Self::Tri1
                | Self::Wand
                | Self::Wor
                | Self::Trireg
                | Self::Uwire
                | Self::Supply0
                | Self::Supply1
        )
    }

    /// Built-in data-type keywords.
    pub fn is_data_type(self) -> bool {
        matches!(
            self,
            Self::Logic
                | Self::Bit
                | Self::Byte
                | Self::Shortint
                | Self::Int
                | Self::Longint
                | Self::Integer
                | Self::Time
                | Self::Real
                | Self::Shortreal
                | Self::Realtime
                | Self::String
                | Self::Chandle
                | Self::Event
                | Self::Void
                | Self::Reg
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Punct {
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Semi,
    Comma,
    Colon,
    ColonColon,
    Dot,
    DotStar,
    Hash,
    At,
    Question,
    Apostrophe,
    ApostropheBrace,
    Eq,
    PlusColon,
    MinusColon,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Power,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    CaseEq,
    CaseNotEq,
    WildEq,
    WildNotEq,
    AndAnd,
    OrOr,
    Bang,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    Nand,
    Nor,
    Xnor,
    Shl,
    Shr,
    AShr,
    AShl,
    PlusPlus,
    MinusMinus,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    AndEq,
    OrEq,
    XorEq,
    ShlEq,
    ShrEq,
    Arrow,
    EqArrow,
    Dollar,
}

impl Punct {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::Semi => ";",
            Self::Comma => ",",
            Self::Colon => ":",
            Self::ColonColon => "::",
            Self::Dot => ".",
            Self::DotStar => ".*",
            Self::Hash => "#",
            Self::At => "@",
            Self::Question => "?",
            Self::Apostrophe => "'",
            Self::ApostropheBrace => "'{",
            Self::Eq => "=",
            Self::PlusColon => "+:",
            Self::MinusColon => "-:",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::Power => "**",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::CaseEq => "===",
            Self::CaseNotEq => "!==",
            Self::WildEq => "==?",
            Self::WildNotEq => "!=?",
            Self::AndAnd => "&&",
            Self::OrOr => "||",
            Self::Bang => "!",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::BitNot => "~",
            Self::Nand => "~&",
            Self::Nor => "~|",
            Self::Xnor => "~^",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::AShr => ">>>",
            Self::AShl => "<<<",
            Self::PlusPlus => "++",
            Self::MinusMinus => "--",
            Self::PlusEq => "+=",
            Self::MinusEq => "-=",
            Self::StarEq => "*=",
            Self::SlashEq => "/=",
            Self::PercentEq => "%=",
            Self::AndEq => "&=",
            Self::OrEq => "|=",
            Self::XorEq => "^=",
            Self::ShlEq => "<<=",
            Self::ShrEq => ">>=",
            Self::Arrow => "->",
            Self::EqArrow => "=>",
            Self::Dollar => "$",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    Identifier,
    EscapedIdentifier,
    SystemIdentifier,
    Keyword(Keyword),
    IntLiteral,
    BasedLiteral,
    RealLiteral,
    TimeLiteral,
    StringLiteral,
    Punct(Punct),
    Comment,
    /// A character the lexer could not classify; the parser reports it.
    Unknown,
    Eof,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: u32,
    pub col: u16,
}

impl Token {
    pub fn is_keyword(&self, keyword: Keyword) -> bool {
        self.kind == TokenKind::Keyword(keyword)
    }

    pub fn is_punct(&self, punct: Punct) -> bool {
        self.kind == TokenKind::Punct(punct)
    }

    pub fn end(&self) -> (u32, u16) {
        let mut line = self.line;
        let mut col = self.col;
        for c in self.text.chars() {
            if c == '\n' {
                line += 1;
                col = 0;
            } else {
                col = col.saturating_add(1);
            }
        }
        (line, col)
    }
}

/// Lexes `source` into a token vector ending with one `Eof` token.
pub fn lex(source: &str) -> Vec<Token> {
    Lexer::new(source).run()
}

struct Lexer<'s> {
    source: &'s str,
    pos: usize,
    line: u32,
    col: u16,
    tokens: Vec<Token>,
}

impl<'s> Lexer<'s> {
    fn new(source: &'s str) -> Self {
        Self { source, pos: 0, line: 1, col: 0, tokens: Vec::new() }
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek2(&self) -> Option<char> {
        let mut chars = self.source[self.pos..].chars();
        chars.next();
        chars.next()
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

    fn push(&mut self, kind: TokenKind, text: String, line: u32, col: u16) {
        self.tokens.push(Token { kind, text, line, col });
    }

    fn run(mut self) -> Vec<Token> {
        while let Some(c) = self.peek() {
            let (line, col) = (self.line, self.col);
            match c {
                ' ' | '\t' | '\n' => {
                    self.bump();
                }
                '/' if self.source[self.pos..].starts_with("//") => {
                    let mut text = String::new();
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        text.push(c);
                        self.bump();
                    }
                    self.push(TokenKind::Comment, text, line, col);
                }
                '/' if self.source[self.pos..].starts_with("/*") => {
                    let mut text = String::new();
                    text.push(self.bump().unwrap());
                    text.push(self.bump().unwrap());
                    while let Some(c) = self.bump() {
                        text.push(c);
                        if text.ends_with("*/") {
                            break;
                        }
                    }
                    self.push(TokenKind::Comment, text, line, col);
                }
                '"' => self.lex_string(line, col),
                '\\' => self.lex_escaped_identifier(line, col),
                '$' => self.lex_system_identifier(line, col),
                '\'' => self.lex_apostrophe(line, col),
                c if c.is_ascii_digit() => self.lex_number(line, col),
                c if c.is_alphabetic() || c == '_' => self.lex_identifier(line, col),
                _ => self.lex_punct(line, col),
            }
        }
        self.tokens.push(Token {
            kind: TokenKind::Eof,
            text: String::new(),
            line: self.line,
            col: self.col,
        });
        self.tokens
    }

    fn lex_identifier(&mut self, line: u32, col: u16) {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        let kind = match Keyword::from_str(&text) {
            Some(keyword) => TokenKind::Keyword(keyword),
            None => TokenKind::Identifier,
        };
        self.push(kind, text, line, col);
    }

    fn lex_escaped_identifier(&mut self, line: u32, col: u16) {
        let mut text = String::new();
        text.push(self.bump().unwrap());
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                break;
            }
            text.push(c);
            self.bump();
        }
        self.push(TokenKind::EscapedIdentifier, text, line, col);
    }

    fn lex_system_identifier(&mut self, line: u32, col: u16) {
        self.bump();
        let mut text = String::from("$");
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if text.len() == 1 {
            self.push(TokenKind::Punct(Punct::Dollar), text, line, col);
        } else {
            self.push(TokenKind::SystemIdentifier, text, line, col);
        }
    }

    /// `'{` assignment pattern, `'0`/`'1`/`'x`/`'z` unbased unsized, or the
    /// cast apostrophe.
    fn lex_apostrophe(&mut self, line: u32, col: u16) {
        self.bump();
        match self.peek() {
            Some('{') => {
                self.bump();
                self.push(TokenKind::Punct(Punct::ApostropheBrace), "'{".into(), line, col);
            }
            Some(c) if matches!(c, '0' | '1' | 'x' | 'X' | 'z' | 'Z') => {
                self.bump();
                self.push(TokenKind::BasedLiteral, format!("'{c}"), line, col);
            }
            Some(c) if matches!(c, 's' | 'S' | 'b' | 'B' | 'o' | 'O' | 'd' | 'D' | 'h' | 'H') => {
                let mut text = String::from("'");
                self.lex_based_value(&mut text);
                self.push(TokenKind::BasedLiteral, text, line, col);
            }
            _ => self.push(TokenKind::Punct(Punct::Apostrophe), "'".into(), line, col),
        }
    }

    fn lex_based_value(&mut self, text: &mut String) {
        if matches!(self.peek(), Some('s' | 'S')) {
            text.push(self.bump().unwrap());
        }
        if matches!(self.peek(), Some('b' | 'B' | 'o' | 'O' | 'd' | 'D' | 'h' | 'H')) {
            text.push(self.bump().unwrap());
        }
        while matches!(self.peek(), Some(' ')) {
            self.bump();
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_hexdigit() || matches!(c, 'x' | 'X' | 'z' | 'Z' | '?' | '_') {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
    }

    fn lex_number(&mut self, line: u32, col: u16) {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        match self.peek() {
            Some('\'') if matches!(
                self.peek2(),
                Some('s' | 'S' | 'b' | 'B' | 'o' | 'O' | 'd' | 'D' | 'h' | 'H')
            ) =>
            {
                text.push(self.bump().unwrap());
                self.lex_based_value(&mut text);
                self.push(TokenKind::BasedLiteral, text, line, col);
            }
            Some('.') if self.peek2().is_some_and(|c| c.is_ascii_digit()) => {
                text.push(self.bump().unwrap());
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() || c == '_' {
                        text.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
                self.lex_exponent(&mut text);
                self.lex_time_suffix(text, line, col);
            }
            Some('e' | 'E') => {
                self.lex_exponent(&mut text);
                self.push(TokenKind::RealLiteral, text, line, col);
            }
            _ => self.lex_time_suffix(text, line, col),
        }
    }

    fn lex_exponent(&mut self, text: &mut String) {
        if matches!(self.peek(), Some('e' | 'E')) {
            text.push(self.bump().unwrap());
            if matches!(self.peek(), Some('+' | '-')) {
                text.push(self.bump().unwrap());
            }
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
        }
    }

    fn lex_time_suffix(&mut self, mut text: String, line: u32, col: u16) {
        let had_dot = text.contains('.') || text.contains('e') || text.contains('E');
        let suffix_start = self.pos;
        let mut suffix = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_lowercase() {
                suffix.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if matches!(suffix.as_str(), "s" | "ms" | "us" | "ns" | "ps" | "fs") {
            text.push_str(&suffix);
            self.push(TokenKind::TimeLiteral, text, line, col);
        } else {
            // not a time unit, rewind
            self.pos = suffix_start;
            self.col -= suffix.len() as u16;
            let kind = if had_dot { TokenKind::RealLiteral } else { TokenKind::IntLiteral };
            self.push(kind, text, line, col);
        }
    }

    /// Strings are normalized: recognized escapes stay, `\q` for unknown `q`
    /// drops the backslash.
    fn lex_string(&mut self, line: u32, col: u16) {
        let mut text = String::from("\"");
        self.bump();
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
            if c == '\\' {
                match self.peek() {
                    Some(e @ ('n' | 't' | '\\' | '"' | 'v' | 'f' | 'a' | '0'..='7' | 'x')) => {
                        text.push('\\');
                        text.push(e);
                        self.bump();
                    }
                    Some(other) => {
                        text.push(other);
                        self.bump();
                    }
                    None => break,
                }
                continue;
            }
            text.push(c);
            if c == '"' {
                break;
            }
        }
        if !text.ends_with('"') || text.len() == 1 {
            text.push('"');
        }
        self.push(TokenKind::StringLiteral, text, line, col);
    }

    fn lex_punct(&mut self, line: u32, col: u16) {
        use Punct::*;
        let rest = &self.source[self.pos..];
        // longest match first
        let table: &[(&str, Punct)] = &[
            ("<<<", AShl),
            (">>>", AShr),
            ("===", CaseEq),
            ("!==", CaseNotEq),
            ("==?", WildEq),
            ("!=?", WildNotEq),
            ("<<=", ShlEq),
            (">>=", ShrEq),
            ("**", Power),
            ("<<", Shl),
            (">>", Shr),
            ("==", EqEq),
            ("!=", NotEq),
            ("<=", Le),
            (">=", Ge),
            ("&&", AndAnd),
            ("||", OrOr),
            ("~&", Nand),
            ("~|", Nor),
            ("~^", Xnor),
            ("^~", Xnor),
            ("++", PlusPlus),
            ("--", MinusMinus),
            ("+=", PlusEq),
            ("-=", MinusEq),
            ("*=", StarEq),
            ("/=", SlashEq),
            ("%=", PercentEq),
            ("&=", AndEq),
            ("|=", OrEq),
            ("^=", XorEq),
            ("->", Arrow),
            ("=>", EqArrow),
            ("::", ColonColon),
            (".*", DotStar),
            ("+:", PlusColon),
            ("-:", MinusColon),
            ("(", LParen),
            (")", RParen),
            ("[", LBracket),
            ("]", RBracket),
            ("{", LBrace),
            ("}", RBrace),
            (";", Semi),
            (",", Comma),
            (":", Colon),
            (".", Dot),
            ("#", Hash),
            ("@", At),
            ("?", Question),
            ("=", Eq),
            ("+", Plus),
            ("-", Minus),
            ("*", Star),
            ("/", Slash),
            ("%", Percent),
            ("<", Lt),
            (">", Gt),
            ("!", Bang),
            ("&", BitAnd),
            ("|", BitOr),
            ("^", BitXor),
            ("~", BitNot),
        ];
        for (pattern, punct) in table {
            if rest.starts_with(pattern) {
                for _ in 0..pattern.len() {
                    self.bump();
                }
                self.push(TokenKind::Punct(*punct), (*pattern).to_owned(), line, col);
                return;
            }
        }
        let c = self.bump().unwrap();
        self.push(TokenKind::Unknown, c.to_string(), line, col);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        let tokens = lex("module top; endmodule");
        assert_eq!(tokens[0].kind, TokenKind::Keyword(Keyword::Module));
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
        assert_eq!(tokens[1].text, "top");
        assert_eq!(tokens[2].kind, TokenKind::Punct(Punct::Semi));
        assert_eq!(tokens[3].kind, TokenKind::Keyword(Keyword::Endmodule));
        assert_eq!(tokens[4].kind, TokenKind::Eof);
    }

    #[test]
    fn based_literals() {
        let tokens = lex("8'hFF 4'b10xz '0 12'sd42");
        assert!(tokens[..4].iter().all(|t| t.kind == TokenKind::BasedLiteral), "{tokens:?}");
        assert_eq!(tokens[0].text, "8'hFF");
        assert_eq!(tokens[2].text, "'0");
    }

    #[test]
    fn real_and_time_literals() {
        assert_eq!(
            kinds("3.14 1e6 2.5e-3 10ns"),
            vec![
                TokenKind::RealLiteral,
                TokenKind::RealLiteral,
                TokenKind::RealLiteral,
                TokenKind::TimeLiteral,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn operators_longest_match() {
        let tokens = lex("a <<< b >>> c === d");
        assert_eq!(tokens[1].kind, TokenKind::Punct(Punct::AShl));
        assert_eq!(tokens[3].kind, TokenKind::Punct(Punct::AShr));
        assert_eq!(tokens[5].kind, TokenKind::Punct(Punct::CaseEq));
    }

    #[test]
    fn nonblocking_lexes_as_le() {
        let tokens = lex("q <= d;");
        assert_eq!(tokens[1].kind, TokenKind::Punct(Punct::Le));
    }

    #[test]
    fn string_escape_normalization() {
        let tokens = lex(r#""a\n\q""#);
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        // \n stays escaped, unknown \q collapses to q
        assert_eq!(tokens[0].text, "\"a\\nq\"");
    }

    #[test]
    fn comments_are_tokens() {
        let tokens = lex("wire x; // trailing\n/* block */ wire y;");
        let comments: Vec<_> =
            tokens.iter().filter(|t| t.kind == TokenKind::Comment).collect();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].text, "// trailing");
    }

    #[test]
    fn positions_are_tracked() {
        let tokens = lex("a\n  b");
        assert_eq!((tokens[0].line, tokens[0].col), (1, 0));
        assert_eq!((tokens[1].line, tokens[1].col), (2, 2));
    }

    #[test]
    fn system_identifiers() {
        let tokens = lex("$display($bits(x));");
        assert_eq!(tokens[0].kind, TokenKind::SystemIdentifier);
        assert_eq!(tokens[0].text, "$display");
        assert_eq!(tokens[2].kind, TokenKind::SystemIdentifier);
        assert_eq!(tokens[2].text, "$bits");
    }

    #[test]
    fn escaped_identifier_runs_to_whitespace() {
        let tokens = lex("\\bus+index other");
        assert_eq!(tokens[0].kind, TokenKind::EscapedIdentifier);
        assert_eq!(tokens[0].text, "\\bus+index");
        assert_eq!(tokens[1].text, "other");
    }

    #[test]
    fn assignment_pattern_apostrophe() {
        let tokens = lex("'{1, 2}");
        assert_eq!(tokens[0].kind, TokenKind::Punct(Punct::ApostropheBrace));
    }
}
