//! Arena-backed syntax trees.
//!
//! A [`FileContent`] is an ordered tree of [`VObject`] nodes over one source
//! file. Two trees exist per file: the preprocessor tree (`Pp*` kinds,
//! directive structure) and the parser tree (`Pa*` kinds plus terminals,
//! syntactic structure of the expanded source). Nodes carry their source
//! coordinates and four link indices: parent, definition (cross-reference),
//! first child, next sibling.

use crate::{fs::PathId, symbols::SymbolId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index into a [`FileContent`] node arena. `0` is the bad sentinel.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub const BAD: Self = Self(0);

    pub fn is_bad(self) -> bool {
        self == Self::BAD
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Node kinds, partitioned into preprocessor-tree kinds (`Pp*`), parser rule
/// kinds (`Pa*`) and lexical terminals.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Bad,

    // ---- preprocessor tree ----
    PpTop,
    PpDefine,
    PpDefineArg,
    PpDefineBody,
    PpMacroInstance,
    PpMacroArg,
    PpInclude,
    PpIfdef,
    PpIfndef,
    PpElsif,
    PpElse,
    PpEndif,
    PpUndef,
    PpUndefineall,
    PpResetall,
    PpTimescale,
    PpDefaultNettype,
    PpLineDirective,
    PpPragma,

    // ---- parser tree: design units ----
    PaSourceText,
    PaModuleDecl,
    PaInterfaceDecl,
    PaProgramDecl,
    PaPackageDecl,
    PaClassDecl,
    PaUdpDecl,
    PaCheckerDecl,
    PaExtendsClause,
    PaImportDecl,

    // ---- parser tree: declarations ----
    PaPortList,
    PaPort,
    PaParamPortList,
    PaParamDecl,
    PaLocalParamDecl,
    PaParamAssign,
    PaDataDecl,
    PaNetDecl,
    PaTypedef,
    PaDataType,
    PaPackedDim,
    PaUnpackedDim,
    PaStructMember,
    PaEnumMember,
    PaTaskDecl,
    PaFunctionDecl,
    PaTfPort,
    PaModportDecl,
    PaGenvarDecl,
    PaDefparam,

    // ---- parser tree: processes and statements ----
    PaInitialBlock,
    PaAlwaysBlock,
    PaFinalBlock,
    PaContAssign,
    PaSeqBlock,
    PaParBlock,
    PaBlockingAssign,
    PaNonblockingAssign,
    PaIfStmt,
    PaCaseStmt,
    PaCaseItem,
    PaForStmt,
    PaForeachStmt,
    PaWhileStmt,
    PaRepeatStmt,
    PaForeverStmt,
    PaReturnStmt,
    PaEventControl,
    PaDelayControl,
    PaSubroutineCall,
    PaStmt,
    PaUnsupportedItem,

    // ---- parser tree: generate ----
    PaGenerateRegion,
    PaGenFor,
    PaGenIf,
    PaGenCase,
    PaGenCaseItem,
    PaGenBlock,

    // ---- parser tree: instantiation ----
    PaModuleInstantiation,
    PaHierInstance,
    PaNamedPortConn,
    PaOrderedPortConn,
    PaNamedParamAssign,
    PaOrderedParamAssign,

    // ---- parser tree: expressions ----
    PaBinaryExpr,
    PaUnaryExpr,
    PaParenExpr,
    PaCondExpr,
    PaIncDecExpr,
    PaConcat,
    PaReplication,
    PaHierPath,
    PaScopedPath,
    PaBitSelect,
    PaPartSelect,
    PaIndexedPartSelect,
    PaCall,
    PaSystemCall,
    PaRange,
    PaAssignmentPattern,

    // ---- terminals ----
    Identifier,
    EscapedIdentifier,
    SystemIdentifier,
    Keyword,
    IntLiteral,
    RealLiteral,
    BasedLiteral,
    StringLiteral,
    TimeLiteral,
    UnaryOp,
    BinaryOp,
    Punctuation,
    Comment,
}

impl NodeKind {
    pub fn is_preprocessor(self) -> bool {
        matches!(
            self,
            NodeKind::PpTop
                | NodeKind::PpDefine
                | NodeKind::PpDefineArg
                | NodeKind::PpDefineBody
                | NodeKind::PpMacroInstance
                | NodeKind::PpMacroArg
                | NodeKind::PpInclude
                | NodeKind::PpIfdef
                | NodeKind::PpIfndef
                | NodeKind::PpElsif
                | NodeKind::PpElse
                | NodeKind::PpEndif
                | NodeKind::PpUndef
                | NodeKind::PpUndefineall
                | NodeKind::PpResetall
                | NodeKind::PpTimescale
                | NodeKind::PpDefaultNettype
                | NodeKind::PpLineDirective
                | NodeKind::PpPragma
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeKind::Identifier
                | NodeKind::EscapedIdentifier
                | NodeKind::SystemIdentifier
                | NodeKind::Keyword
                | NodeKind::IntLiteral
                | NodeKind::RealLiteral
                | NodeKind::BasedLiteral
                | NodeKind::StringLiteral
                | NodeKind::TimeLiteral
                | NodeKind::UnaryOp
                | NodeKind::BinaryOp
                | NodeKind::Punctuation
                | NodeKind::Comment
        )
    }
}

/// One node of a [`FileContent`] tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VObject {
    pub kind: NodeKind,
    /// Name or literal text; BAD for pure structure nodes.
    pub symbol: SymbolId,
    pub file: PathId,
    pub start_line: u32,
    pub start_col: u16,
    pub end_line: u32,
    pub end_col: u16,
    pub parent: NodeId,
    /// Cross-reference to another node (macro definition site, sentinel
    /// back-reference); BAD when unused.
    pub definition: NodeId,
    pub child: NodeId,
    pub sibling: NodeId,
}

impl VObject {
    fn new(kind: NodeKind, symbol: SymbolId, file: PathId) -> Self {
        Self {
            kind,
            symbol,
            file,
            start_line: 0,
            start_col: 0,
            end_line: 0,
            end_col: 0,
            parent: NodeId::BAD,
            definition: NodeId::BAD,
            child: NodeId::BAD,
            sibling: NodeId::BAD,
        }
    }
}

/// Tree-walk event, the iterator form of an enter/exit listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkEvent {
    Enter(NodeId),
    Exit(NodeId),
}

/// Arena-backed ordered tree over one source file.
#[derive(Clone, Debug)]
pub struct FileContent {
    file: PathId,
    objects: Vec<VObject>,
    /// Last child per node, parallel to `objects`. Keeps sibling-chain
    /// appends O(1); rebuilt when loading from cache.
    last_child: Vec<NodeId>,
    root: NodeId,
}

impl FileContent {
    /// Creates a tree with a fresh root of the given kind.
    pub fn new(file: PathId, root_kind: NodeKind) -> Self {
        let mut content = Self {
            file,
            objects: vec![VObject::new(NodeKind::Bad, SymbolId::BAD, PathId::BAD)],
            last_child: vec![NodeId::BAD],
            root: NodeId::BAD,
        };
        content.root = content.alloc(root_kind, SymbolId::BAD);
        content
    }

    pub fn file(&self) -> PathId {
        self.file
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.len() <= 2
    }

    fn alloc(&mut self, kind: NodeKind, symbol: SymbolId) -> NodeId {
        let id = NodeId(self.objects.len() as u32);
        self.objects.push(VObject::new(kind, symbol, self.file));
        self.last_child.push(NodeId::BAD);
        id
    }

    /// Allocates a node and appends it as the last child of `parent`.
    pub fn add_child(&mut self, parent: NodeId, kind: NodeKind, symbol: SymbolId) -> NodeId {
        let id = self.alloc(kind, symbol);
        self.attach(parent, id);
        id
    }

    /// Allocates a detached node; the builder attaches it later with
    /// [`FileContent::adopt`]. Bottom-up expression construction needs this:
    /// the operands of a binary expression exist before their parent does.
    pub fn orphan(&mut self, kind: NodeKind, symbol: SymbolId) -> NodeId {
        self.alloc(kind, symbol)
    }

    /// Appends the detached subtree rooted at `node` as the last child of
    /// `parent`.
    pub fn adopt(&mut self, parent: NodeId, node: NodeId) {
        debug_assert!(self.objects[node.index()].parent.is_bad());
        self.attach(parent, node);
    }

    fn attach(&mut self, parent: NodeId, id: NodeId) {
        self.objects[id.index()].parent = parent;
        let last = self.last_child[parent.index()];
        if last.is_bad() {
            self.objects[parent.index()].child = id;
        } else {
            self.objects[last.index()].sibling = id;
        }
        self.last_child[parent.index()] = id;
    }

    pub fn object(&self, id: NodeId) -> &VObject {
        &self.objects[id.index()]
    }

    pub fn object_mut(&mut self, id: NodeId) -> &mut VObject {
        &mut self.objects[id.index()]
    }

    pub fn set_span(&mut self, id: NodeId, start: (u32, u16), end: (u32, u16)) {
        let object = &mut self.objects[id.index()];
        object.start_line = start.0;
        object.start_col = start.1;
        object.end_line = end.0;
        object.end_col = end.1;
    }

    pub fn children(&self, id: NodeId) -> ChildIter<'_> {
        ChildIter { content: self, next: self.objects[id.index()].child }
    }

    pub fn child_of_kind(&self, id: NodeId, kind: NodeKind) -> Option<NodeId> {
        self.children(id).find(|&c| self.object(c).kind == kind)
    }

    /// Depth-first enter/exit walk starting at `from`.
    pub fn walk(&self, from: NodeId) -> Walk<'_> {
        Walk { content: self, stack: vec![WalkEvent::Enter(from)] }
    }

    /// Preorder node ids, source order by construction.
    pub fn preorder(&self, from: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.walk(from).filter_map(|event| match event {
            WalkEvent::Enter(id) => Some(id),
            WalkEvent::Exit(_) => None,
        })
    }

    /// Deep-copies `src_node` (and its subtree) from `src` under `parent`,
    /// offsetting line numbers by `line_offset`. Returns the new root of the
    /// copy. Used for sentinel merging and chunk stitching.
    pub fn graft(
        &mut self,
        parent: NodeId,
        src: &FileContent,
        src_node: NodeId,
        line_offset: u32,
    ) -> NodeId {
        let source = *src.object(src_node);
        let copy = self.alloc(source.kind, source.symbol);
        {
            let object = &mut self.objects[copy.index()];
            object.file = source.file;
            object.start_line = source.start_line + line_offset;
            object.start_col = source.start_col;
            object.end_line = source.end_line + line_offset;
            object.end_col = source.end_col;
        }
        self.attach(parent, copy);
        let mut next = source.child;
        while !next.is_bad() {
            self.graft(copy, src, next, line_offset);
            next = src.object(next).sibling;
        }
        copy
    }

    /// Checks the structural invariants: parent/child agreement, span
    /// containment, acyclicity. Returns the first violation found.
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (index, object) in self.objects.iter().enumerate().skip(1) {
            let id = NodeId(index as u32);
            if id == self.root {
                continue;
            }
            let parent = object.parent;
            if parent.is_bad() || parent.index() >= self.objects.len() {
                return Err(format!("{id} has an invalid parent"));
            }
            if !self.children(parent).any(|c| c == id) {
                return Err(format!("{id} is not listed among its parent's children"));
            }
            let parent_object = self.object(parent);
            // span containment only applies within the same file; grafted
            // subtrees keep their original file coordinates
            if object.file == parent_object.file
                && parent_object.start_line != 0
                && object.start_line != 0
            {
                let starts_before = (object.start_line, object.start_col)
                    < (parent_object.start_line, parent_object.start_col);
                let ends_after = (object.end_line, object.end_col)
                    > (parent_object.end_line, parent_object.end_col);
                if starts_before || ends_after {
                    return Err(format!("{id} span escapes its parent"));
                }
            }
        }
        // acyclicity: walking each parent chain must terminate
        for index in 1..self.objects.len() {
            let mut seen = 0usize;
            let mut current = NodeId(index as u32);
            while !current.is_bad() {
                current = self.objects[current.index()].parent;
                seen += 1;
                if seen > self.objects.len() {
                    return Err(format!("n{index} has a cyclic parent chain"));
                }
            }
        }
        Ok(())
    }

    /// Iterates raw objects; used by the cache serializer.
    pub fn objects(&self) -> impl Iterator<Item = (NodeId, &VObject)> {
        self.objects.iter().enumerate().map(|(i, o)| (NodeId(i as u32), o))
    }

    /// Rebuilds a tree from raw objects; used by the cache loader.
    pub fn from_objects(file: PathId, root: NodeId, objects: Vec<VObject>) -> Self {
        let mut last_child = vec![NodeId::BAD; objects.len()];
        for object in &objects {
            if !object.child.is_bad() {
                let mut last = object.child;
                while !objects[last.index()].sibling.is_bad() {
                    last = objects[last.index()].sibling;
                }
                let parent = objects[object.child.index()].parent;
                last_child[parent.index()] = last;
            }
        }
        Self { file, objects, last_child, root }
    }
}

pub struct ChildIter<'a> {
    content: &'a FileContent,
    next: NodeId,
}

impl Iterator for ChildIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if self.next.is_bad() {
            return None;
        }
        let current = self.next;
        self.next = self.content.object(current).sibling;
        Some(current)
    }
}

pub struct Walk<'a> {
    content: &'a FileContent,
    stack: Vec<WalkEvent>,
}

impl Iterator for Walk<'_> {
    type Item = WalkEvent;

    fn next(&mut self) -> Option<WalkEvent> {
        let event = self.stack.pop()?;
        if let WalkEvent::Enter(id) = event {
            self.stack.push(WalkEvent::Exit(id));
            let children: Vec<NodeId> = self.content.children(id).collect();
            for child in children.into_iter().rev() {
                self.stack.push(WalkEvent::Enter(child));
            }
        }
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FileContent {
        let mut tree = FileContent::new(PathId::BAD, NodeKind::PaSourceText);
        let root = tree.root();
        tree.set_span(root, (1, 0), (10, 0));
        let module = tree.add_child(root, NodeKind::PaModuleDecl, SymbolId(1));
        tree.set_span(module, (1, 0), (5, 9));
        let port = tree.add_child(module, NodeKind::PaPort, SymbolId(2));
        tree.set_span(port, (1, 12), (1, 15));
        let body = tree.add_child(module, NodeKind::PaContAssign, SymbolId::BAD);
        tree.set_span(body, (2, 2), (2, 20));
        tree
    }

    #[test]
    fn preorder_is_source_order() {
        let tree = sample();
        let kinds: Vec<NodeKind> =
            tree.preorder(tree.root()).map(|id| tree.object(id).kind).collect();
        assert_eq!(
            kinds,
            vec![
                NodeKind::PaSourceText,
                NodeKind::PaModuleDecl,
                NodeKind::PaPort,
                NodeKind::PaContAssign
            ]
        );
    }

    #[test]
    fn walk_is_balanced() {
        let tree = sample();
        let mut depth = 0i32;
        let mut max_depth = 0;
        for event in tree.walk(tree.root()) {
            match event {
                WalkEvent::Enter(_) => {
                    depth += 1;
                    max_depth = max_depth.max(depth);
                }
                WalkEvent::Exit(_) => depth -= 1,
            }
        }
        assert_eq!(depth, 0);
        assert_eq!(max_depth, 3);
    }

    #[test]
    fn validate_accepts_well_formed() {
        assert_eq!(sample().validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_span_escape() {
        let mut tree = sample();
        let module = tree.child_of_kind(tree.root(), NodeKind::PaModuleDecl).unwrap();
        let port = tree.child_of_kind(module, NodeKind::PaPort).unwrap();
        tree.set_span(port, (1, 12), (99, 0));
        assert!(tree.validate().is_err());
    }

    #[test]
    fn graft_copies_subtree_with_offset() {
        let source = sample();
        let module = source.child_of_kind(source.root(), NodeKind::PaModuleDecl).unwrap();
        let mut dest = FileContent::new(PathId::BAD, NodeKind::PaSourceText);
        let root = dest.root();
        let copy = dest.graft(root, &source, module, 100);
        assert_eq!(dest.object(copy).kind, NodeKind::PaModuleDecl);
        assert_eq!(dest.object(copy).start_line, 101);
        assert_eq!(dest.children(copy).count(), 2);
    }

    #[test]
    fn from_objects_round_trips() {
        let tree = sample();
        let objects: Vec<VObject> = tree.objects().map(|(_, o)| *o).collect();
        let rebuilt = FileContent::from_objects(tree.file(), tree.root(), objects);
        assert_eq!(rebuilt.validate(), Ok(()));
        let a: Vec<NodeId> = tree.preorder(tree.root()).collect();
        let b: Vec<NodeId> = rebuilt.preorder(rebuilt.root()).collect();
        assert_eq!(a, b);
    }
}
