//! The UHDM object model.
//!
//! Every object of the typed hardware model lives in one [`Serializer`]
//! arena and is addressed by [`UhdmId`]. Parent/child, derived/base and
//! cross-module links are ids, so the cyclic shapes of an elaborated design
//! are plain data; the binder writes `actual` ids into references after the
//! tree is built. The arena is never collected mid-pipeline.
//!
//! Objects are one uniform record: a kind tag, common position/name fields,
//! a small kind-specific [`UhdmDetail`], and named ownership collections.
//! Visitors dispatch on the tag and iterate the collections.

use crate::{
    config::hex,
    fs::{FileSystem, PathId},
    symbols::{SymbolId, SymbolTable},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Handle into a [`Serializer`] arena. `0` is the bad sentinel.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct UhdmId(pub(crate) u32);

impl UhdmId {
    pub const BAD: Self = Self(0);

    pub fn is_bad(self) -> bool {
        self == Self::BAD
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for UhdmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UhdmKind {
    Design,
    // instances and definitions
    Module,
    Interface,
    Program,
    Package,
    ClassDefn,
    UdpDefn,
    CheckerDefn,
    GenScopeArray,
    GenScope,
    ModportDefn,
    // declarations
    Port,
    LogicNet,
    ArrayNet,
    LogicVar,
    IntVar,
    RealVar,
    StringVar,
    EnumVar,
    StructVar,
    ClassVar,
    ChandleVar,
    ArrayVar,
    NamedEvent,
    Parameter,
    ParamAssign,
    // typespecs
    LogicTypespec,
    BitTypespec,
    ByteTypespec,
    ShortintTypespec,
    IntTypespec,
    LongintTypespec,
    IntegerTypespec,
    TimeTypespec,
    RealTypespec,
    StringTypespec,
    ChandleTypespec,
    EventTypespec,
    VoidTypespec,
    EnumTypespec,
    StructTypespec,
    UnionTypespec,
    PackedArrayTypespec,
    ArrayTypespec,
    ClassTypespec,
    InterfaceTypespec,
    UnsupportedTypespec,
    TypespecMember,
    EnumConst,
    Range,
    // references
    RefObj,
    RefTypespec,
    RefModule,
    Extends,
    ImportDecl,
    // task/functions and processes
    Function,
    Task,
    Initial,
    Always,
    FinalStmt,
    ContAssign,
    // statements
    Begin,
    ForkStmt,
    Assignment,
    IfStmt,
    IfElse,
    CaseStmt,
    CaseItem,
    ForStmt,
    ForeachStmt,
    WhileStmt,
    RepeatStmt,
    ForeverStmt,
    ReturnStmt,
    EventControl,
    DelayControl,
    FuncCall,
    TaskCall,
    SysFuncCall,
    SysTaskCall,
    UnsupportedStmt,
    // expressions
    Operation,
    Constant,
    HierPath,
    BitSelect,
    PartSelect,
    IndexedPartSelect,
    UnsupportedExpr,
}

impl UhdmKind {
    /// Kinds that may own named declarations.
    pub fn is_scope(self) -> bool {
        matches!(
            self,
            Self::Design
                | Self::Module
                | Self::Interface
                | Self::Program
                | Self::Package
                | Self::ClassDefn
                | Self::GenScope
                | Self::Function
                | Self::Task
                | Self::Begin
                | Self::ForkStmt
                | Self::ForStmt
                | Self::ForeachStmt
        )
    }

    /// Scopes that also carry nets and sub-instances.
    pub fn is_instance(self) -> bool {
        matches!(
            self,
            Self::Module | Self::Interface | Self::Program | Self::Package | Self::ClassDefn
        )
    }

    pub fn is_typespec(self) -> bool {
        matches!(
            self,
            Self::LogicTypespec
                | Self::BitTypespec
                | Self::ByteTypespec
                | Self::ShortintTypespec
                | Self::IntTypespec
                | Self::LongintTypespec
                | Self::IntegerTypespec
                | Self::TimeTypespec
                | Self::RealTypespec
                | Self::StringTypespec
                | Self::ChandleTypespec
                | Self::EventTypespec
                | Self::VoidTypespec
                | Self::EnumTypespec
                | Self::StructTypespec
                | Self::UnionTypespec
                | Self::PackedArrayTypespec
                | Self::ArrayTypespec
                | Self::ClassTypespec
                | Self::InterfaceTypespec
                | Self::UnsupportedTypespec
        )
    }

    pub fn is_reference(self) -> bool {
        matches!(self, Self::RefObj | Self::RefTypespec | Self::RefModule | Self::ChandleVar)
    }
}

/// Expression operation kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpType {
    Add,
    Sub,
    Mult,
    Div,
    Mod,
    Pow,
    UnaryPlus,
    UnaryMinus,
    LogNot,
    BitNeg,
    BitAnd,
    BitOr,
    BitXor,
    BitXnor,
    UnaryAnd,
    UnaryNand,
    UnaryOr,
    UnaryNor,
    UnaryXor,
    UnaryXnor,
    LogAnd,
    LogOr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Neq,
    CaseEq,
    CaseNeq,
    WildEq,
    WildNeq,
    LShift,
    RShift,
    ArithLShift,
    ArithRShift,
    Conditional,
    Concat,
    MultiConcat,
    AssignmentPattern,
    PostIncrement,
    PostDecrement,
    PreIncrement,
    PreDecrement,
    Posedge,
    Negedge,
    EventOr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    Join,
    JoinAny,
    JoinNone,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetKind {
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
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlwaysKind {
    Always,
    AlwaysComb,
    AlwaysFf,
    AlwaysLatch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseKind {
    Case,
    Casex,
    Casez,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
    Inout,
    Ref,
}

/// Kind-specific payload; most objects carry `None`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UhdmDetail {
    #[default]
    None,
    Op(OpType),
    Join(JoinType),
    Net(NetKind),
    Always(AlwaysKind),
    Case(CaseKind),
    Direction(PortDirection),
    Signed(bool),
    Blocking(bool),
}

/// An evaluated constant.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum ConstValue {
    #[default]
    None,
    Int(i64),
    Real(f64),
    Str(String),
}

impl ConstValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Ownership collections. Integrity rules quantify over these: every
/// non-root object must appear in exactly one collection of its parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Collection {
    Ports,
    Nets,
    Variables,
    Parameters,
    ParamAssigns,
    Typespecs,
    Members,
    Ranges,
    NamedEvents,
    TaskFuncs,
    Scopes,
    Instances,
    Processes,
    ContAssigns,
    Stmts,
    Operands,
    CaseItems,
    DerivedClasses,
    Imports,
    Modports,
    Extends,
}

impl Collection {
    /// Collections that denote ownership; `DerivedClasses` is a
    /// cross-reference list, not ownership.
    pub fn is_ownership(self) -> bool {
        !matches!(self, Self::DerivedClasses)
    }
}

/// One object of the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UhdmObject {
    pub kind: UhdmKind,
    pub name: SymbolId,
    pub file: PathId,
    pub start_line: u32,
    pub start_col: u16,
    pub end_line: u32,
    pub end_col: u16,
    pub parent: UhdmId,
    /// Resolved target for reference kinds, BAD until the binder fills it.
    pub actual: UhdmId,
    /// Type of a typed object.
    pub typespec: UhdmId,
    pub value: ConstValue,
    pub detail: UhdmDetail,
    collections: BTreeMap<Collection, Vec<UhdmId>>,
}

impl UhdmObject {
    fn new(kind: UhdmKind) -> Self {
        Self {
            kind,
            name: SymbolId::BAD,
            file: PathId::BAD,
            start_line: 0,
            start_col: 0,
            end_line: 0,
            end_col: 0,
            parent: UhdmId::BAD,
            actual: UhdmId::BAD,
            typespec: UhdmId::BAD,
            value: ConstValue::None,
            detail: UhdmDetail::None,
            collections: BTreeMap::new(),
        }
    }

    pub fn owned(&self, collection: Collection) -> &[UhdmId] {
        self.collections.get(&collection).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn collections(&self) -> impl Iterator<Item = (Collection, &[UhdmId])> {
        self.collections.iter().map(|(&c, v)| (c, v.as_slice()))
    }

    /// All children across ownership collections, in collection order.
    pub fn owned_children(&self) -> impl Iterator<Item = UhdmId> + '_ {
        self.collections
            .iter()
            .filter(|(c, _)| c.is_ownership())
            .flat_map(|(_, v)| v.iter().copied())
    }
}

/// The arena owning every UHDM object of a design, and the writer of the
/// `.uhdm` output.
#[derive(Debug)]
pub struct Serializer {
    objects: Vec<UhdmObject>,
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer {
    pub fn new() -> Self {
        Self { objects: vec![UhdmObject::new(UhdmKind::UnsupportedStmt)] }
    }

    /// Allocates a fresh object. Ids are monotone within the arena.
    pub fn make(&mut self, kind: UhdmKind) -> UhdmId {
        let id = UhdmId(self.objects.len() as u32);
        self.objects.push(UhdmObject::new(kind));
        id
    }

    pub fn get(&self, id: UhdmId) -> &UhdmObject {
        &self.objects[id.index()]
    }

    pub fn get_mut(&mut self, id: UhdmId) -> &mut UhdmObject {
        &mut self.objects[id.index()]
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.len() <= 1
    }

    pub fn ids(&self) -> impl Iterator<Item = UhdmId> {
        (1..self.objects.len()).map(|i| UhdmId(i as u32))
    }

    /// Appends `child` to `parent`'s `collection` and sets the backlink.
    pub fn own(&mut self, parent: UhdmId, collection: Collection, child: UhdmId) {
        self.objects[parent.index()].collections.entry(collection).or_default().push(child);
        if collection.is_ownership() {
            self.objects[child.index()].parent = parent;
        }
    }

    /// Copies the position fields of `from` onto `to`.
    pub fn set_span_from(&mut self, to: UhdmId, file: PathId, span: (u32, u16, u32, u16)) {
        let object = self.get_mut(to);
        object.file = file;
        object.start_line = span.0;
        object.start_col = span.1;
        object.end_line = span.2;
        object.end_col = span.3;
    }

    /// Deep-copies the subtree rooted at `node` into the same arena under
    /// `new_parent`'s `collection`. Typespec links are shared, reference
    /// `actual`s are reset so the binder re-resolves them per copy. Used for
    /// parameter-override specialization.
    pub fn clone_tree(&mut self, node: UhdmId, new_parent: UhdmId, collection: Collection) -> UhdmId {
        let copy = self.clone_rec(node);
        self.own(new_parent, collection, copy);
        copy
    }

    /// Deep copy without attaching it anywhere yet; the caller owns it into
    /// a collection afterwards.
    pub fn clone_detached(&mut self, node: UhdmId) -> UhdmId {
        self.clone_rec(node)
    }

    fn clone_rec(&mut self, node: UhdmId) -> UhdmId {
        let mut object = self.objects[node.index()].clone();
        object.parent = UhdmId::BAD;
        object.actual = UhdmId::BAD;
        let children: Vec<(Collection, Vec<UhdmId>)> = object
            .collections
            .iter()
            .map(|(&c, v)| (c, v.clone()))
            .collect();
        object.collections.clear();
        let copy = UhdmId(self.objects.len() as u32);
        self.objects.push(object);
        for (collection, ids) in children {
            if !collection.is_ownership() {
                continue;
            }
            for child in ids {
                let child_copy = self.clone_rec(child);
                self.own(copy, collection, child_copy);
            }
        }
        copy
    }

    /// Structural equivalence up to object identity, the idempotence notion
    /// for repeated elaboration.
    pub fn structurally_equal(&self, a: UhdmId, other: &Serializer, b: UhdmId) -> bool {
        let left = self.get(a);
        let right = other.get(b);
        if left.kind != right.kind
            || left.name != right.name
            || left.value != right.value
            || left.detail != right.detail
        {
            return false;
        }
        let left_cols: Vec<(Collection, &[UhdmId])> =
            left.collections().filter(|(c, _)| c.is_ownership()).collect();
        let right_cols: Vec<(Collection, &[UhdmId])> =
            right.collections().filter(|(c, _)| c.is_ownership()).collect();
        if left_cols.len() != right_cols.len() {
            return false;
        }
        for ((lc, lv), (rc, rv)) in left_cols.iter().zip(&right_cols) {
            if lc != rc || lv.len() != rv.len() {
                return false;
            }
            for (&lchild, &rchild) in lv.iter().zip(rv.iter()) {
                if !self.structurally_equal(lchild, other, rchild) {
                    return false;
                }
            }
        }
        true
    }

    /// Serializes the arena to the `.uhdm` JSON rendering.
    pub fn to_output(&self, fs: &FileSystem, symbols: &SymbolTable) -> String {
        #[derive(Serialize)]
        struct OutObject<'a> {
            id: u32,
            kind: UhdmKind,
            name: &'a str,
            file: String,
            span: (u32, u16, u32, u16),
            parent: u32,
            actual: u32,
            typespec: u32,
            value: &'a ConstValue,
            detail: &'a UhdmDetail,
            collections: Vec<(Collection, &'a [UhdmId])>,
        }
        let names: Vec<std::sync::Arc<str>> =
            self.objects.iter().map(|o| symbols.text(o.name)).collect();
        let rendered: Vec<OutObject<'_>> = self
            .objects
            .iter()
            .enumerate()
            .skip(1)
            .map(|(index, object)| OutObject {
                id: index as u32,
                kind: object.kind,
                name: &names[index],
                file: fs.to_path(object.file).to_string_lossy().into_owned(),
                span: (object.start_line, object.start_col, object.end_line, object.end_col),
                parent: object.parent.0,
                actual: object.actual.0,
                typespec: object.typespec.0,
                value: &object.value,
                detail: &object.detail,
                collections: object.collections().collect(),
            })
            .collect();
        serde_json::to_string_pretty(&rendered).unwrap_or_default()
    }

    /// Content hash of the output, handy for idempotence checks.
    pub fn output_digest(&self, fs: &FileSystem, symbols: &SymbolTable) -> String {
        use md5::{Digest, Md5};
        let mut hasher = Md5::new();
        hasher.update(self.to_output(fs, symbols).as_bytes());
        hex(&hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ownership_sets_backlink() {
        let mut serializer = Serializer::new();
        let module = serializer.make(UhdmKind::Module);
        let net = serializer.make(UhdmKind::LogicNet);
        serializer.own(module, Collection::Nets, net);
        assert_eq!(serializer.get(net).parent, module);
        assert_eq!(serializer.get(module).owned(Collection::Nets), &[net]);
    }

    #[test]
    fn derived_classes_is_not_ownership() {
        let mut serializer = Serializer::new();
        let base = serializer.make(UhdmKind::ClassDefn);
        let derived = serializer.make(UhdmKind::ClassDefn);
        serializer.own(base, Collection::DerivedClasses, derived);
        // the backlink is untouched, derived is not owned by base
        assert_eq!(serializer.get(derived).parent, UhdmId::BAD);
    }

    #[test]
    fn clone_tree_copies_deep_and_resets_actuals() {
        let mut serializer = Serializer::new();
        let module = serializer.make(UhdmKind::Module);
        let param = serializer.make(UhdmKind::Parameter);
        serializer.get_mut(param).name = SymbolId(7);
        serializer.get_mut(param).value = ConstValue::Int(8);
        serializer.own(module, Collection::Parameters, param);
        let reference = serializer.make(UhdmKind::RefObj);
        serializer.get_mut(reference).actual = param;
        serializer.own(module, Collection::Variables, reference);

        let target = serializer.make(UhdmKind::Design);
        let copy = serializer.clone_tree(module, target, Collection::Instances);
        assert_ne!(copy, module);
        let copied_param = serializer.get(copy).owned(Collection::Parameters)[0];
        assert_ne!(copied_param, param);
        assert_eq!(serializer.get(copied_param).value, ConstValue::Int(8));
        let copied_ref = serializer.get(copy).owned(Collection::Variables)[0];
        assert!(serializer.get(copied_ref).actual.is_bad());
        // the original is untouched
        assert_eq!(serializer.get(reference).actual, param);
    }

    #[test]
    fn structural_equality_ignores_ids() {
        let build = |value: i64| {
            let mut serializer = Serializer::new();
            if value > 0 {
                // pad the arena so ids differ between the two builds
                serializer.make(UhdmKind::Constant);
            }
            let module = serializer.make(UhdmKind::Module);
            let param = serializer.make(UhdmKind::Parameter);
            serializer.get_mut(param).name = SymbolId(3);
            serializer.get_mut(param).value = ConstValue::Int(value.abs());
            serializer.own(module, Collection::Parameters, param);
            (serializer, module)
        };
        let (a, am) = build(-5);
        let (b, bm) = build(5);
        assert!(a.structurally_equal(am, &b, bm));
        let (c, cm) = build(6);
        assert!(!a.structurally_equal(am, &c, cm));
    }
}
