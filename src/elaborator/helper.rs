//! AST-to-UHDM compilation of declarations, statements and expressions.
//!
//! Every statement kind maps to one UHDM kind; malformed or unmodeled
//! constructs become `UnsupportedStmt`/`UnsupportedTypespec` placeholders
//! with a warning, never a fatal abort of the file.

use crate::{
    diagnostics::{Diagnostic, ErrorContainer, ErrorKind, Location},
    fs::PathId,
    node::{FileContent, NodeId, NodeKind},
    symbols::{SymbolId, SymbolTable},
    uhdm::{
        AlwaysKind, CaseKind, Collection, ConstValue, JoinType, NetKind, OpType, PortDirection,
        Serializer, UhdmDetail, UhdmId, UhdmKind,
    },
};

/// Builds UHDM objects from AST nodes. One instance is threaded through
/// stage 7 and re-used during generate expansion in stage 8.
pub struct CompileHelper<'a> {
    pub serializer: &'a mut Serializer,
    pub symbols: &'a SymbolTable,
    pub errors: &'a mut ErrorContainer,
}

/// Generate constructs deferred to elaboration, in source order.
pub type PendingGens = Vec<NodeId>;

impl<'a> CompileHelper<'a> {
    pub fn new(
        serializer: &'a mut Serializer,
        symbols: &'a SymbolTable,
        errors: &'a mut ErrorContainer,
    ) -> Self {
        Self { serializer, symbols, errors }
    }

    fn make_at(&mut self, kind: UhdmKind, tree: &FileContent, node: NodeId) -> UhdmId {
        let object = tree.object(node);
        let id = self.serializer.make(kind);
        self.serializer.set_span_from(
            id,
            object.file,
            (object.start_line, object.start_col, object.end_line, object.end_col),
        );
        id
    }

    fn location(&self, tree: &FileContent, node: NodeId, symbol: SymbolId) -> Location {
        let object = tree.object(node);
        Location::new(object.file, object.start_line, object.start_col, symbol)
    }

    // ---- module items ---------------------------------------------------

    /// Compiles one module/interface/program item into `scope`. Generate
    /// constructs are pushed onto `gens` for stage 8; defparams are recorded
    /// into `defparams` as `(path, value expr)`.
    pub fn compile_module_item(
        &mut self,
        tree: &FileContent,
        item: NodeId,
        scope: UhdmId,
        gens: &mut PendingGens,
        defparams: &mut Vec<(Vec<SymbolId>, UhdmId)>,
    ) {
        match tree.object(item).kind {
            NodeKind::PaNetDecl => self.compile_net_decl(tree, item, scope),
            NodeKind::PaDataDecl => self.compile_data_decl(tree, item, scope),
            NodeKind::PaParamDecl => self.compile_param_decl(tree, item, scope, false),
            NodeKind::PaLocalParamDecl => self.compile_param_decl(tree, item, scope, true),
            NodeKind::PaTypedef => self.compile_typedef(tree, item, scope),
            NodeKind::PaGenvarDecl => {
                // genvars exist only at elaboration time
            }
            NodeKind::PaContAssign => self.compile_cont_assign(tree, item, scope),
            NodeKind::PaAlwaysBlock => {
                let always = self.make_at(UhdmKind::Always, tree, item);
                let kind = match self.first_keyword(tree, item).as_deref() {
                    Some("always_comb") => AlwaysKind::AlwaysComb,
                    Some("always_ff") => AlwaysKind::AlwaysFf,
                    Some("always_latch") => AlwaysKind::AlwaysLatch,
                    _ => AlwaysKind::Always,
                };
                self.serializer.get_mut(always).detail = UhdmDetail::Always(kind);
                if let Some(stmt) = self.first_statement_child(tree, item) {
                    if let Some(compiled) = self.compile_statement(tree, stmt) {
                        self.serializer.own(always, Collection::Stmts, compiled);
                    }
                }
                self.serializer.own(scope, Collection::Processes, always);
            }
            NodeKind::PaInitialBlock => {
                let initial = self.make_at(UhdmKind::Initial, tree, item);
                if let Some(stmt) = self.first_statement_child(tree, item) {
                    if let Some(compiled) = self.compile_statement(tree, stmt) {
                        self.serializer.own(initial, Collection::Stmts, compiled);
                    }
                }
                self.serializer.own(scope, Collection::Processes, initial);
            }
            NodeKind::PaFinalBlock => {
                let final_stmt = self.make_at(UhdmKind::FinalStmt, tree, item);
                if let Some(stmt) = self.first_statement_child(tree, item) {
                    if let Some(compiled) = self.compile_statement(tree, stmt) {
                        self.serializer.own(final_stmt, Collection::Stmts, compiled);
                    }
                }
                self.serializer.own(scope, Collection::Processes, final_stmt);
            }
            NodeKind::PaFunctionDecl => self.compile_task_func(tree, item, scope, true),
            NodeKind::PaTaskDecl => self.compile_task_func(tree, item, scope, false),
            NodeKind::PaModuleInstantiation => self.compile_instantiation(tree, item, scope),
            NodeKind::PaGenerateRegion => {
                for child in tree.children(item) {
                    if matches!(
                        tree.object(child).kind,
                        NodeKind::PaGenFor
                            | NodeKind::PaGenIf
                            | NodeKind::PaGenCase
                            | NodeKind::PaGenBlock
                    ) {
                        gens.push(child);
                    } else if !tree.object(child).kind.is_terminal() {
                        self.compile_module_item(tree, child, scope, gens, defparams);
                    }
                }
            }
            NodeKind::PaGenFor | NodeKind::PaGenIf | NodeKind::PaGenCase => gens.push(item),
            NodeKind::PaImportDecl => {
                let import = self.make_at(UhdmKind::ImportDecl, tree, item);
                self.serializer.get_mut(import).name = tree.object(item).symbol;
                self.serializer.own(scope, Collection::Imports, import);
            }
            NodeKind::PaModportDecl => {
                let modport = self.make_at(UhdmKind::ModportDefn, tree, item);
                self.serializer.get_mut(modport).name = tree.object(item).symbol;
                self.serializer.own(scope, Collection::Modports, modport);
            }
            NodeKind::PaDefparam => {
                let mut path = Vec::new();
                let mut value = UhdmId::BAD;
                for child in tree.children(item) {
                    let kind = tree.object(child).kind;
                    if matches!(
                        kind,
                        NodeKind::Identifier | NodeKind::PaHierPath | NodeKind::PaScopedPath
                    ) && path.is_empty()
                    {
                        self.path_symbols(tree, child, &mut path);
                    } else if is_expr_kind(kind) && !path.is_empty() {
                        value = self.compile_expression(tree, child);
                    }
                }
                if !path.is_empty() && !value.is_bad() {
                    defparams.push((path, value));
                }
            }
            NodeKind::PaStmt => {
                // a stray semicolon; nothing to build
            }
            kind if kind.is_preprocessor() => {
                // directive context grafted into the AST; informational only
            }
            NodeKind::PaUnsupportedItem => {
                let unsupported = self.make_at(UhdmKind::UnsupportedStmt, tree, item);
                self.serializer.own(scope, Collection::Stmts, unsupported);
                self.errors.add(Diagnostic::new(
                    ErrorKind::UhdmUnsupportedStmt,
                    self.location(tree, item, SymbolId::BAD),
                ));
            }
            kind if kind.is_terminal() => {}
            _ => {
                let unsupported = self.make_at(UhdmKind::UnsupportedStmt, tree, item);
                self.serializer.own(scope, Collection::Stmts, unsupported);
                self.errors.add(Diagnostic::new(
                    ErrorKind::UhdmUnsupportedStmt,
                    self.location(tree, item, SymbolId::BAD),
                ));
            }
        }
    }

    /// ANSI port list of a design unit.
    pub fn compile_ports(&mut self, tree: &FileContent, unit: NodeId, def: UhdmId) {
        let Some(port_list) = tree.child_of_kind(unit, NodeKind::PaPortList) else { return };
        for port_node in tree.children(port_list) {
            if tree.object(port_node).kind != NodeKind::PaPort {
                continue;
            }
            let port = self.make_at(UhdmKind::Port, tree, port_node);
            self.serializer.get_mut(port).name = tree.object(port_node).symbol;
            let direction = match self.first_keyword(tree, port_node).as_deref() {
                Some("output") => PortDirection::Output,
                Some("inout") => PortDirection::Inout,
                Some("ref") => PortDirection::Ref,
                _ => PortDirection::Input,
            };
            self.serializer.get_mut(port).detail = UhdmDetail::Direction(direction);
            if let Some(data_type) = tree.child_of_kind(port_node, NodeKind::PaDataType) {
                let typespec = self.compile_data_type(tree, data_type, def);
                self.serializer.get_mut(port).typespec = typespec;
            }
            self.serializer.own(def, Collection::Ports, port);
        }
    }

    /// `#(parameter ...)` header of a design unit.
    pub fn compile_param_ports(&mut self, tree: &FileContent, unit: NodeId, def: UhdmId) {
        let Some(list) = tree.child_of_kind(unit, NodeKind::PaParamPortList) else { return };
        for decl in tree.children(list) {
            match tree.object(decl).kind {
                NodeKind::PaParamDecl => self.compile_param_decl(tree, decl, def, false),
                NodeKind::PaLocalParamDecl => self.compile_param_decl(tree, decl, def, true),
                _ => {}
            }
        }
    }

    fn compile_param_decl(&mut self, tree: &FileContent, decl: NodeId, scope: UhdmId, local: bool) {
        let typespec = tree
            .child_of_kind(decl, NodeKind::PaDataType)
            .map(|dt| self.compile_data_type(tree, dt, scope));
        for assign in tree.children(decl) {
            if tree.object(assign).kind != NodeKind::PaParamAssign {
                continue;
            }
            let parameter = self.make_at(UhdmKind::Parameter, tree, assign);
            self.serializer.get_mut(parameter).name = tree.object(assign).symbol;
            self.serializer.get_mut(parameter).detail = UhdmDetail::Signed(local);
            if let Some(ts) = typespec {
                self.serializer.get_mut(parameter).typespec = ts;
            }
            if let Some(default) = self.first_expr_child(tree, assign) {
                let expr = self.compile_expression(tree, default);
                self.serializer.own(parameter, Collection::Operands, expr);
            }
            self.serializer.own(scope, Collection::Parameters, parameter);
        }
    }

    fn compile_typedef(&mut self, tree: &FileContent, node: NodeId, scope: UhdmId) {
        let name = tree.object(node).symbol;
        let typespec = match tree.child_of_kind(node, NodeKind::PaDataType) {
            Some(dt) => self.compile_data_type(tree, dt, scope),
            None => {
                let placeholder = self.make_at(UhdmKind::UnsupportedTypespec, tree, node);
                self.serializer.own(scope, Collection::Typespecs, placeholder);
                placeholder
            }
        };
        self.serializer.get_mut(typespec).name = name;
    }

    /// Compiles a data-type node into a typespec owned by `scope`.
    pub fn compile_data_type(&mut self, tree: &FileContent, node: NodeId, scope: UhdmId) -> UhdmId {
        let keyword = self.first_keyword(tree, node);
        let user_type = tree.object(node).symbol;
        let kind = match keyword.as_deref() {
            Some("logic") | Some("reg") => UhdmKind::LogicTypespec,
            Some("bit") => UhdmKind::BitTypespec,
            Some("byte") => UhdmKind::ByteTypespec,
            Some("shortint") => UhdmKind::ShortintTypespec,
            Some("int") => UhdmKind::IntTypespec,
            Some("longint") => UhdmKind::LongintTypespec,
            Some("integer") => UhdmKind::IntegerTypespec,
            Some("time") => UhdmKind::TimeTypespec,
            Some("real") | Some("shortreal") | Some("realtime") => UhdmKind::RealTypespec,
            Some("string") => UhdmKind::StringTypespec,
            Some("chandle") => UhdmKind::ChandleTypespec,
            Some("event") => UhdmKind::EventTypespec,
            Some("void") => UhdmKind::VoidTypespec,
            Some("struct") => UhdmKind::StructTypespec,
            Some("union") => UhdmKind::UnionTypespec,
            Some("enum") => UhdmKind::EnumTypespec,
            Some(net) if NetKind::parse(net).is_some() => UhdmKind::LogicTypespec,
            None if !user_type.is_bad() => UhdmKind::RefTypespec,
            _ => {
                self.errors.add(Diagnostic::new(
                    ErrorKind::UhdmUnsupportedType,
                    self.location(tree, node, user_type),
                ));
                UhdmKind::UnsupportedTypespec
            }
        };
        let typespec = self.make_at(kind, tree, node);
        if kind == UhdmKind::RefTypespec {
            self.serializer.get_mut(typespec).name = user_type;
        }
        if self.has_keyword(tree, node, "signed") {
            self.serializer.get_mut(typespec).detail = UhdmDetail::Signed(true);
        }
        for child in tree.children(node) {
            match tree.object(child).kind {
                NodeKind::PaPackedDim => {
                    let range = self.compile_range(tree, child);
                    self.serializer.own(typespec, Collection::Ranges, range);
                }
                NodeKind::PaStructMember => {
                    let member = self.make_at(UhdmKind::TypespecMember, tree, child);
                    self.serializer.get_mut(member).name = tree.object(child).symbol;
                    if let Some(dt) = tree.child_of_kind(child, NodeKind::PaDataType) {
                        let member_ts = self.compile_data_type(tree, dt, scope);
                        self.serializer.get_mut(member).typespec = member_ts;
                    }
                    self.serializer.own(typespec, Collection::Members, member);
                }
                NodeKind::PaEnumMember => {
                    let member = self.make_at(UhdmKind::EnumConst, tree, child);
                    self.serializer.get_mut(member).name = tree.object(child).symbol;
                    if let Some(value) = self.first_expr_child(tree, child) {
                        let expr = self.compile_expression(tree, value);
                        self.serializer.own(member, Collection::Operands, expr);
                    }
                    self.serializer.own(typespec, Collection::Members, member);
                }
                _ => {}
            }
        }
        // implicit enum values continue from the previous member
        if kind == UhdmKind::EnumTypespec {
            let members: Vec<UhdmId> =
                self.serializer.get(typespec).owned(Collection::Members).to_vec();
            let mut next = 0i64;
            for member in members {
                let operand = self.serializer.get(member).owned(Collection::Operands).first().copied();
                let explicit = operand.and_then(|o| self.serializer.get(o).value.as_int());
                let value = explicit.unwrap_or(next);
                self.serializer.get_mut(member).value = ConstValue::Int(value);
                next = value + 1;
            }
        }
        self.serializer.own(scope, Collection::Typespecs, typespec);
        typespec
    }

    fn compile_range(&mut self, tree: &FileContent, node: NodeId) -> UhdmId {
        let range = self.make_at(UhdmKind::Range, tree, node);
        for child in tree.children(node) {
            if is_expr_kind(tree.object(child).kind) {
                let expr = self.compile_expression(tree, child);
                self.serializer.own(range, Collection::Operands, expr);
            }
        }
        range
    }

    fn compile_net_decl(&mut self, tree: &FileContent, node: NodeId, scope: UhdmId) {
        let data_type = tree.child_of_kind(node, NodeKind::PaDataType);
        let net_kind = data_type
            .and_then(|dt| self.first_keyword(tree, dt))
            .and_then(|kw| NetKind::parse(&kw))
            .unwrap_or(NetKind::Wire);
        let typespec = data_type.map(|dt| self.compile_data_type(tree, dt, scope));
        self.compile_declarators(tree, node, scope, |helper, tree, name_node, name, dims| {
            let kind = if dims { UhdmKind::ArrayNet } else { UhdmKind::LogicNet };
            let net = helper.make_at(kind, tree, name_node);
            helper.serializer.get_mut(net).name = name;
            helper.serializer.get_mut(net).detail = UhdmDetail::Net(net_kind);
            if let Some(ts) = typespec {
                helper.serializer.get_mut(net).typespec = ts;
            }
            helper.serializer.own(scope, Collection::Nets, net);
            net
        });
    }

    fn compile_data_decl(&mut self, tree: &FileContent, node: NodeId, scope: UhdmId) {
        let data_type = tree.child_of_kind(node, NodeKind::PaDataType);
        // net-typed "data" declarations appear for non-ANSI port styles
        if let Some(dt) = data_type {
            if self.first_keyword(tree, dt).as_deref().and_then(NetKind::parse).is_some() {
                self.compile_net_decl(tree, node, scope);
                return;
            }
        }
        let typespec = data_type.map(|dt| self.compile_data_type(tree, dt, scope));
        let var_kind = typespec
            .map(|ts| match self.serializer.get(ts).kind {
                UhdmKind::IntTypespec
                | UhdmKind::IntegerTypespec
                | UhdmKind::ByteTypespec
                | UhdmKind::ShortintTypespec
                | UhdmKind::LongintTypespec => UhdmKind::IntVar,
                UhdmKind::RealTypespec | UhdmKind::TimeTypespec => UhdmKind::RealVar,
                UhdmKind::StringTypespec => UhdmKind::StringVar,
                UhdmKind::EnumTypespec => UhdmKind::EnumVar,
                UhdmKind::StructTypespec | UhdmKind::UnionTypespec => UhdmKind::StructVar,
                UhdmKind::ChandleTypespec => UhdmKind::ChandleVar,
                UhdmKind::RefTypespec => UhdmKind::ClassVar,
                _ => UhdmKind::LogicVar,
            })
            .unwrap_or(UhdmKind::LogicVar);
        self.compile_declarators(tree, node, scope, |helper, tree, name_node, name, dims| {
            let kind = if dims { UhdmKind::ArrayVar } else { var_kind };
            let var = helper.make_at(kind, tree, name_node);
            helper.serializer.get_mut(var).name = name;
            if let Some(ts) = typespec {
                helper.serializer.get_mut(var).typespec = ts;
            }
            helper.serializer.own(scope, Collection::Variables, var);
            var
        });
    }

    /// Walks the `name [dims] [= init] {, ...}` tail of a declaration,
    /// invoking `make` per declarator and wiring initializers.
    fn compile_declarators<F>(&mut self, tree: &FileContent, node: NodeId, scope: UhdmId, make: F)
    where
        F: Fn(&mut Self, &FileContent, NodeId, SymbolId, bool) -> UhdmId,
    {
        let mut current: Option<UhdmId> = None;
        let mut pending: Option<(NodeId, SymbolId, bool)> = None;
        let mut after_eq = false;
        let flush =
            |helper: &mut Self, pending: &mut Option<(NodeId, SymbolId, bool)>| -> Option<UhdmId> {
                pending.take().map(|(n, name, dims)| make(helper, tree, n, name, dims))
            };
        for child in tree.children(node) {
            let object = *tree.object(child);
            match object.kind {
                NodeKind::Identifier | NodeKind::EscapedIdentifier if !after_eq => {
                    if let Some(made) = flush(self, &mut pending) {
                        current = Some(made);
                    }
                    pending = Some((child, object.symbol, false));
                }
                NodeKind::PaUnpackedDim => {
                    if let Some(p) = pending.as_mut() {
                        p.2 = true;
                    }
                }
                NodeKind::Punctuation => {
                    let text = self.symbols.text(object.symbol);
                    match &*text {
                        "=" => {
                            if let Some(made) = flush(self, &mut pending) {
                                current = Some(made);
                            }
                            after_eq = true;
                        }
                        "," => after_eq = false,
                        _ => {}
                    }
                }
                kind if is_expr_kind(kind) && after_eq => {
                    let expr = self.compile_expression(tree, child);
                    if let Some(target) = current {
                        // a declaration initializer becomes a continuous
                        // assignment for nets, an init expression for vars
                        if self.serializer.get(target).kind == UhdmKind::LogicNet
                            || self.serializer.get(target).kind == UhdmKind::ArrayNet
                        {
                            let assign = self.make_at(UhdmKind::ContAssign, tree, child);
                            let lhs = self.make_at(UhdmKind::RefObj, tree, child);
                            let target_name = self.serializer.get(target).name;
                            self.serializer.get_mut(lhs).name = target_name;
                            self.serializer.own(assign, Collection::Operands, lhs);
                            self.serializer.own(assign, Collection::Operands, expr);
                            self.serializer.own(scope, Collection::ContAssigns, assign);
                        } else {
                            self.serializer.own(target, Collection::Operands, expr);
                        }
                    }
                    after_eq = false;
                }
                _ => {}
            }
        }
        flush(self, &mut pending);
    }

    fn compile_cont_assign(&mut self, tree: &FileContent, node: NodeId, scope: UhdmId) {
        for child in tree.children(node) {
            if tree.object(child).kind != NodeKind::PaBlockingAssign {
                continue;
            }
            let assign = self.make_at(UhdmKind::ContAssign, tree, child);
            for expr_node in self.expr_children(tree, child) {
                let expr = self.compile_expression(tree, expr_node);
                self.serializer.own(assign, Collection::Operands, expr);
            }
            self.serializer.own(scope, Collection::ContAssigns, assign);
        }
    }

    fn compile_task_func(
        &mut self,
        tree: &FileContent,
        node: NodeId,
        scope: UhdmId,
        is_function: bool,
    ) {
        let kind = if is_function { UhdmKind::Function } else { UhdmKind::Task };
        let tf = self.make_at(kind, tree, node);
        self.serializer.get_mut(tf).name = tree.object(node).symbol;
        if let Some(return_type) = tree.child_of_kind(node, NodeKind::PaDataType) {
            let typespec = self.compile_data_type(tree, return_type, tf);
            self.serializer.get_mut(tf).typespec = typespec;
        }
        if let Some(port_list) = tree.child_of_kind(node, NodeKind::PaPortList) {
            for port_node in tree.children(port_list) {
                if tree.object(port_node).kind != NodeKind::PaTfPort {
                    continue;
                }
                let port = self.make_at(UhdmKind::Port, tree, port_node);
                self.serializer.get_mut(port).name = tree.object(port_node).symbol;
                let direction = match self.first_keyword(tree, port_node).as_deref() {
                    Some("output") => PortDirection::Output,
                    Some("inout") => PortDirection::Inout,
                    Some("ref") => PortDirection::Ref,
                    _ => PortDirection::Input,
                };
                self.serializer.get_mut(port).detail = UhdmDetail::Direction(direction);
                if let Some(dt) = tree.child_of_kind(port_node, NodeKind::PaDataType) {
                    let typespec = self.compile_data_type(tree, dt, tf);
                    self.serializer.get_mut(port).typespec = typespec;
                }
                self.serializer.own(tf, Collection::Ports, port);
            }
        }
        for child in tree.children(node) {
            match tree.object(child).kind {
                NodeKind::PaDataDecl => self.compile_data_decl(tree, child, tf),
                kind if is_statement_kind(kind) => {
                    if let Some(stmt) = self.compile_statement(tree, child) {
                        self.serializer.own(tf, Collection::Stmts, stmt);
                    }
                }
                _ => {}
            }
        }
        self.serializer.own(scope, Collection::TaskFuncs, tf);
    }

    /// A module instantiation statement becomes one `RefModule` placeholder
    /// per instance; elaboration resolves them into child instances.
    pub fn compile_instantiation(&mut self, tree: &FileContent, node: NodeId, scope: UhdmId) {
        let module_type = tree.object(node).symbol;
        // overrides at the instantiation site apply to every instance
        let param_nodes: Vec<NodeId> = tree
            .children(node)
            .filter(|&c| {
                matches!(
                    tree.object(c).kind,
                    NodeKind::PaNamedParamAssign | NodeKind::PaOrderedParamAssign
                )
            })
            .collect();
        for instance_node in tree.children(node) {
            if tree.object(instance_node).kind != NodeKind::PaHierInstance {
                continue;
            }
            let reference = self.make_at(UhdmKind::RefModule, tree, instance_node);
            self.serializer.get_mut(reference).name = tree.object(instance_node).symbol;
            let type_ref = self.make_at(UhdmKind::RefTypespec, tree, node);
            self.serializer.get_mut(type_ref).name = module_type;
            self.serializer.own(reference, Collection::Typespecs, type_ref);
            self.serializer.get_mut(reference).typespec = type_ref;

            for &param_node in &param_nodes {
                let assign = self.make_at(UhdmKind::ParamAssign, tree, param_node);
                self.serializer.get_mut(assign).name = tree.object(param_node).symbol;
                if let Some(value) = self.first_expr_child(tree, param_node) {
                    let expr = self.compile_expression(tree, value);
                    self.serializer.own(assign, Collection::Operands, expr);
                }
                self.serializer.own(reference, Collection::ParamAssigns, assign);
            }
            for conn_node in tree.children(instance_node) {
                let conn_kind = tree.object(conn_node).kind;
                if !matches!(
                    conn_kind,
                    NodeKind::PaNamedPortConn | NodeKind::PaOrderedPortConn
                ) {
                    continue;
                }
                let port = self.make_at(UhdmKind::Port, tree, conn_node);
                self.serializer.get_mut(port).name = tree.object(conn_node).symbol;
                if let Some(value) = self.first_expr_child(tree, conn_node) {
                    let expr = self.compile_expression(tree, value);
                    self.serializer.own(port, Collection::Operands, expr);
                }
                self.serializer.own(reference, Collection::Ports, port);
            }
            self.serializer.own(scope, Collection::Instances, reference);
        }
    }

    // ---- statements -----------------------------------------------------

    /// Compiles one statement subtree. `None` means the statement compiled
    /// to nothing (an empty `;`).
    pub fn compile_statement(&mut self, tree: &FileContent, node: NodeId) -> Option<UhdmId> {
        let kind = tree.object(node).kind;
        Some(match kind {
            NodeKind::PaSeqBlock => self.compile_seq_block(tree, node),
            NodeKind::PaParBlock => self.compile_par_block(tree, node),
            NodeKind::PaBlockingAssign | NodeKind::PaNonblockingAssign => {
                let assign = self.make_at(UhdmKind::Assignment, tree, node);
                self.serializer.get_mut(assign).detail =
                    UhdmDetail::Blocking(kind == NodeKind::PaBlockingAssign);
                for expr_node in self.expr_children(tree, node) {
                    let expr = self.compile_expression(tree, expr_node);
                    self.serializer.own(assign, Collection::Operands, expr);
                }
                assign
            }
            NodeKind::PaIfStmt => {
                let stmts: Vec<NodeId> = tree
                    .children(node)
                    .filter(|&c| is_statement_kind(tree.object(c).kind))
                    .collect();
                let uhdm_kind =
                    if stmts.len() >= 2 { UhdmKind::IfElse } else { UhdmKind::IfStmt };
                let if_stmt = self.make_at(uhdm_kind, tree, node);
                if let Some(cond) = self.first_expr_child(tree, node) {
                    let expr = self.compile_expression(tree, cond);
                    self.serializer.own(if_stmt, Collection::Operands, expr);
                }
                for stmt_node in stmts {
                    if let Some(stmt) = self.compile_statement(tree, stmt_node) {
                        self.serializer.own(if_stmt, Collection::Stmts, stmt);
                    }
                }
                if_stmt
            }
            NodeKind::PaCaseStmt => self.compile_case(tree, node),
            NodeKind::PaForStmt => {
                let for_stmt = self.make_at(UhdmKind::ForStmt, tree, node);
                for child in tree.children(node) {
                    match tree.object(child).kind {
                        NodeKind::PaDataDecl => self.compile_data_decl(tree, child, for_stmt),
                        kind if is_statement_kind(kind) => {
                            if let Some(stmt) = self.compile_statement(tree, child) {
                                self.serializer.own(for_stmt, Collection::Stmts, stmt);
                            }
                        }
                        kind if is_expr_kind(kind) => {
                            let expr = self.compile_expression(tree, child);
                            self.serializer.own(for_stmt, Collection::Operands, expr);
                        }
                        _ => {}
                    }
                }
                for_stmt
            }
            NodeKind::PaForeachStmt => {
                let foreach = self.make_at(UhdmKind::ForeachStmt, tree, node);
                self.compile_cond_and_body(tree, node, foreach);
                foreach
            }
            NodeKind::PaWhileStmt => {
                let while_stmt = self.make_at(UhdmKind::WhileStmt, tree, node);
                self.compile_cond_and_body(tree, node, while_stmt);
                while_stmt
            }
            NodeKind::PaRepeatStmt => {
                let repeat = self.make_at(UhdmKind::RepeatStmt, tree, node);
                self.compile_cond_and_body(tree, node, repeat);
                repeat
            }
            NodeKind::PaForeverStmt => {
                let forever = self.make_at(UhdmKind::ForeverStmt, tree, node);
                self.compile_cond_and_body(tree, node, forever);
                forever
            }
            NodeKind::PaReturnStmt => {
                let ret = self.make_at(UhdmKind::ReturnStmt, tree, node);
                if let Some(value) = self.first_expr_child(tree, node) {
                    let expr = self.compile_expression(tree, value);
                    self.serializer.own(ret, Collection::Operands, expr);
                }
                ret
            }
            NodeKind::PaEventControl => {
                let control = self.make_at(UhdmKind::EventControl, tree, node);
                let mut edge: Option<OpType> = None;
                for child in tree.children(node) {
                    let object = *tree.object(child);
                    if object.kind == NodeKind::Keyword {
                        match &*self.symbols.text(object.symbol) {
                            "posedge" => edge = Some(OpType::Posedge),
                            "negedge" => edge = Some(OpType::Negedge),
                            _ => {}
                        }
                    } else if is_expr_kind(object.kind) {
                        let expr = self.compile_expression(tree, child);
                        let wrapped = match edge.take() {
                            Some(op) => {
                                let operation = self.make_at(UhdmKind::Operation, tree, child);
                                self.serializer.get_mut(operation).detail = UhdmDetail::Op(op);
                                self.serializer.own(operation, Collection::Operands, expr);
                                operation
                            }
                            None => expr,
                        };
                        self.serializer.own(control, Collection::Operands, wrapped);
                    } else if is_statement_kind(object.kind) {
                        if let Some(stmt) = self.compile_statement(tree, child) {
                            self.serializer.own(control, Collection::Stmts, stmt);
                        }
                    }
                }
                control
            }
            NodeKind::PaDelayControl => {
                let control = self.make_at(UhdmKind::DelayControl, tree, node);
                self.compile_cond_and_body(tree, node, control);
                control
            }
            NodeKind::PaSubroutineCall => {
                let inner = self.first_expr_child(tree, node)?;
                let call_kind = match tree.object(inner).kind {
                    NodeKind::PaSystemCall => UhdmKind::SysTaskCall,
                    _ => UhdmKind::TaskCall,
                };
                let call = self.make_at(call_kind, tree, node);
                let compiled = self.compile_expression(tree, inner);
                let callee = self.serializer.get(compiled).name;
                self.serializer.get_mut(call).name = callee;
                self.serializer.own(call, Collection::Operands, compiled);
                call
            }
            NodeKind::PaIncDecExpr => {
                let expr = self.compile_expression(tree, node);
                expr
            }
            NodeKind::PaStmt => {
                let significant = tree
                    .children(node)
                    .any(|c| !matches!(tree.object(c).kind, NodeKind::Punctuation | NodeKind::Comment));
                if !significant {
                    return None;
                }
                let unsupported = self.make_at(UhdmKind::UnsupportedStmt, tree, node);
                unsupported
            }
            _ => {
                let unsupported = self.make_at(UhdmKind::UnsupportedStmt, tree, node);
                self.errors.add(Diagnostic::new(
                    ErrorKind::UhdmUnsupportedStmt,
                    self.location(tree, node, SymbolId::BAD),
                ));
                unsupported
            }
        })
    }

    fn compile_cond_and_body(&mut self, tree: &FileContent, node: NodeId, target: UhdmId) {
        for child in tree.children(node) {
            let kind = tree.object(child).kind;
            if is_statement_kind(kind) {
                if let Some(stmt) = self.compile_statement(tree, child) {
                    self.serializer.own(target, Collection::Stmts, stmt);
                }
            } else if is_expr_kind(kind) {
                let expr = self.compile_expression(tree, child);
                self.serializer.own(target, Collection::Operands, expr);
            }
        }
    }

    /// `begin…end` with label matching; declarations inside the block become
    /// variables of the block scope, assignments with no RHS already parsed
    /// as declarations.
    fn compile_seq_block(&mut self, tree: &FileContent, node: NodeId) -> UhdmId {
        let begin = self.make_at(UhdmKind::Begin, tree, node);
        self.serializer.get_mut(begin).name = tree.object(node).symbol;
        self.check_block_labels(tree, node);
        for child in tree.children(node) {
            match tree.object(child).kind {
                NodeKind::PaDataDecl => self.compile_data_decl(tree, child, begin),
                kind if is_statement_kind(kind) => {
                    if let Some(stmt) = self.compile_statement(tree, child) {
                        self.serializer.own(begin, Collection::Stmts, stmt);
                    }
                }
                _ => {}
            }
        }
        begin
    }

    fn compile_par_block(&mut self, tree: &FileContent, node: NodeId) -> UhdmId {
        let fork = self.make_at(UhdmKind::ForkStmt, tree, node);
        self.serializer.get_mut(fork).name = tree.object(node).symbol;
        self.check_block_labels(tree, node);
        let join = tree
            .children(node)
            .filter(|&c| tree.object(c).kind == NodeKind::Keyword)
            .filter_map(|c| {
                match &*self.symbols.text(tree.object(c).symbol) {
                    "join" => Some(JoinType::Join),
                    "join_any" => Some(JoinType::JoinAny),
                    "join_none" => Some(JoinType::JoinNone),
                    _ => None,
                }
            })
            .last()
            .unwrap_or(JoinType::Join);
        self.serializer.get_mut(fork).detail = UhdmDetail::Join(join);
        for child in tree.children(node) {
            match tree.object(child).kind {
                NodeKind::PaDataDecl => self.compile_data_decl(tree, child, fork),
                kind if is_statement_kind(kind) => {
                    if let Some(stmt) = self.compile_statement(tree, child) {
                        self.serializer.own(fork, Collection::Stmts, stmt);
                    }
                }
                _ => {}
            }
        }
        fork
    }

    /// Labels at `begin`/`fork` and at the matching `end`/`join` must agree.
    fn check_block_labels(&mut self, tree: &FileContent, node: NodeId) {
        let start = tree.object(node).symbol;
        let idents: Vec<(NodeId, SymbolId)> = tree
            .children(node)
            .filter(|&c| {
                matches!(tree.object(c).kind, NodeKind::Identifier | NodeKind::EscapedIdentifier)
            })
            .map(|c| (c, tree.object(c).symbol))
            .collect();
        let end_label = match (start.is_bad(), idents.len()) {
            (false, n) if n >= 2 => Some(idents[n - 1]),
            (true, n) if n >= 1 => Some(idents[n - 1]),
            _ => None,
        };
        if let Some((label_node, end)) = end_label {
            if end != start {
                self.errors.add(Diagnostic::with_extras(
                    ErrorKind::CompUnmatchedLabel,
                    vec![
                        self.location(tree, label_node, start),
                        Location::object(end),
                    ],
                ));
            }
        }
    }

    fn compile_case(&mut self, tree: &FileContent, node: NodeId) -> UhdmId {
        let case_stmt = self.make_at(UhdmKind::CaseStmt, tree, node);
        let case_kind = tree
            .children(node)
            .filter(|&c| tree.object(c).kind == NodeKind::Keyword)
            .filter_map(|c| match &*self.symbols.text(tree.object(c).symbol) {
                "case" => Some(CaseKind::Case),
                "casex" => Some(CaseKind::Casex),
                "casez" => Some(CaseKind::Casez),
                _ => None,
            })
            .next()
            .unwrap_or(CaseKind::Case);
        self.serializer.get_mut(case_stmt).detail = UhdmDetail::Case(case_kind);
        if let Some(subject) = self.first_expr_child(tree, node) {
            let expr = self.compile_expression(tree, subject);
            self.serializer.own(case_stmt, Collection::Operands, expr);
        }
        for item_node in tree.children(node) {
            if tree.object(item_node).kind != NodeKind::PaCaseItem {
                continue;
            }
            let item = self.make_at(UhdmKind::CaseItem, tree, item_node);
            for child in tree.children(item_node) {
                let kind = tree.object(child).kind;
                if is_statement_kind(kind) {
                    if let Some(stmt) = self.compile_statement(tree, child) {
                        self.serializer.own(item, Collection::Stmts, stmt);
                    }
                } else if is_expr_kind(kind) {
                    let expr = self.compile_expression(tree, child);
                    self.serializer.own(item, Collection::Operands, expr);
                }
            }
            self.serializer.own(case_stmt, Collection::CaseItems, item);
        }
        case_stmt
    }

    // ---- expressions ----------------------------------------------------

    pub fn compile_expression(&mut self, tree: &FileContent, node: NodeId) -> UhdmId {
        let object = *tree.object(node);
        match object.kind {
            NodeKind::Identifier | NodeKind::EscapedIdentifier => {
                let reference = self.make_at(UhdmKind::RefObj, tree, node);
                self.serializer.get_mut(reference).name = object.symbol;
                reference
            }
            NodeKind::Keyword => {
                // this / super / null leaves
                let reference = self.make_at(UhdmKind::RefObj, tree, node);
                self.serializer.get_mut(reference).name = object.symbol;
                reference
            }
            NodeKind::IntLiteral
            | NodeKind::BasedLiteral
            | NodeKind::RealLiteral
            | NodeKind::TimeLiteral
            | NodeKind::StringLiteral => {
                let constant = self.make_at(UhdmKind::Constant, tree, node);
                let text = self.symbols.text(object.symbol);
                self.serializer.get_mut(constant).value = parse_literal(object.kind, &text);
                constant
            }
            NodeKind::PaParenExpr => match self.first_expr_child(tree, node) {
                Some(inner) => self.compile_expression(tree, inner),
                None => self.unsupported_expr(tree, node),
            },
            NodeKind::PaBinaryExpr => {
                let operation = self.make_at(UhdmKind::Operation, tree, node);
                let op = self
                    .operator_text(tree, node, NodeKind::BinaryOp)
                    .and_then(|t| binary_op(&t))
                    .unwrap_or(OpType::Add);
                self.serializer.get_mut(operation).detail = UhdmDetail::Op(op);
                for child in self.expr_children(tree, node) {
                    let expr = self.compile_expression(tree, child);
                    self.serializer.own(operation, Collection::Operands, expr);
                }
                operation
            }
            NodeKind::PaUnaryExpr => {
                let operation = self.make_at(UhdmKind::Operation, tree, node);
                let op = self
                    .operator_text(tree, node, NodeKind::UnaryOp)
                    .and_then(|t| unary_op(&t))
                    .unwrap_or(OpType::UnaryPlus);
                self.serializer.get_mut(operation).detail = UhdmDetail::Op(op);
                for child in self.expr_children(tree, node) {
                    let expr = self.compile_expression(tree, child);
                    self.serializer.own(operation, Collection::Operands, expr);
                }
                operation
            }
            NodeKind::PaIncDecExpr => {
                let operation = self.make_at(UhdmKind::Operation, tree, node);
                let first_is_op = tree
                    .children(node)
                    .next()
                    .map(|c| tree.object(c).kind == NodeKind::UnaryOp)
                    .unwrap_or(false);
                let text = self.operator_text(tree, node, NodeKind::UnaryOp).unwrap_or_default();
                let op = match (first_is_op, text.as_str()) {
                    (true, "++") => OpType::PreIncrement,
                    (true, _) => OpType::PreDecrement,
                    (false, "++") => OpType::PostIncrement,
                    (false, _) => OpType::PostDecrement,
                };
                self.serializer.get_mut(operation).detail = UhdmDetail::Op(op);
                for child in self.expr_children(tree, node) {
                    let expr = self.compile_expression(tree, child);
                    self.serializer.own(operation, Collection::Operands, expr);
                }
                operation
            }
            NodeKind::PaCondExpr => {
                let operation = self.make_at(UhdmKind::Operation, tree, node);
                self.serializer.get_mut(operation).detail = UhdmDetail::Op(OpType::Conditional);
                for child in self.expr_children(tree, node) {
                    let expr = self.compile_expression(tree, child);
                    self.serializer.own(operation, Collection::Operands, expr);
                }
                operation
            }
            NodeKind::PaConcat => {
                let operation = self.make_at(UhdmKind::Operation, tree, node);
                self.serializer.get_mut(operation).detail = UhdmDetail::Op(OpType::Concat);
                for child in self.expr_children(tree, node) {
                    let expr = self.compile_expression(tree, child);
                    self.serializer.own(operation, Collection::Operands, expr);
                }
                operation
            }
            NodeKind::PaReplication => {
                let operation = self.make_at(UhdmKind::Operation, tree, node);
                self.serializer.get_mut(operation).detail = UhdmDetail::Op(OpType::MultiConcat);
                for child in self.expr_children(tree, node) {
                    let expr = self.compile_expression(tree, child);
                    self.serializer.own(operation, Collection::Operands, expr);
                }
                operation
            }
            NodeKind::PaAssignmentPattern => {
                let operation = self.make_at(UhdmKind::Operation, tree, node);
                self.serializer.get_mut(operation).detail =
                    UhdmDetail::Op(OpType::AssignmentPattern);
                for child in self.expr_children(tree, node) {
                    let expr = self.compile_expression(tree, child);
                    self.serializer.own(operation, Collection::Operands, expr);
                }
                operation
            }
            NodeKind::PaHierPath => {
                let path = self.make_at(UhdmKind::HierPath, tree, node);
                self.serializer.get_mut(path).name = object.symbol;
                if let Some(base) = self.first_expr_child(tree, node) {
                    let expr = self.compile_expression(tree, base);
                    self.serializer.own(path, Collection::Operands, expr);
                }
                let member = self.make_at(UhdmKind::RefObj, tree, node);
                self.serializer.get_mut(member).name = object.symbol;
                self.serializer.own(path, Collection::Operands, member);
                path
            }
            NodeKind::PaScopedPath => {
                // `pkg::name` binds through the scoped name as one reference
                let mut parts = Vec::new();
                self.path_symbols(tree, node, &mut parts);
                let joined = parts
                    .iter()
                    .map(|s| self.symbols.text(*s).to_string())
                    .collect::<Vec<_>>()
                    .join("::");
                let reference = self.make_at(UhdmKind::RefObj, tree, node);
                self.serializer.get_mut(reference).name = self.symbols.register(&joined);
                reference
            }
            NodeKind::PaBitSelect | NodeKind::PaPartSelect | NodeKind::PaIndexedPartSelect => {
                let kind = match object.kind {
                    NodeKind::PaBitSelect => UhdmKind::BitSelect,
                    NodeKind::PaPartSelect => UhdmKind::PartSelect,
                    _ => UhdmKind::IndexedPartSelect,
                };
                let select = self.make_at(kind, tree, node);
                for child in self.expr_children(tree, node) {
                    let expr = self.compile_expression(tree, child);
                    self.serializer.own(select, Collection::Operands, expr);
                }
                select
            }
            NodeKind::PaCall => {
                let call = self.make_at(UhdmKind::FuncCall, tree, node);
                self.serializer.get_mut(call).name = object.symbol;
                // the callee leaf is the first child; the remaining
                // expression children are the arguments
                let mut children = self.expr_children(tree, node);
                if !children.is_empty() {
                    children.remove(0);
                }
                for child in children {
                    let expr = self.compile_expression(tree, child);
                    self.serializer.own(call, Collection::Operands, expr);
                }
                call
            }
            NodeKind::PaSystemCall => {
                let call = self.make_at(UhdmKind::SysFuncCall, tree, node);
                self.serializer.get_mut(call).name = object.symbol;
                for child in self.expr_children(tree, node) {
                    let expr = self.compile_expression(tree, child);
                    self.serializer.own(call, Collection::Operands, expr);
                }
                call
            }
            _ => self.unsupported_expr(tree, node),
        }
    }

    fn unsupported_expr(&mut self, tree: &FileContent, node: NodeId) -> UhdmId {
        self.errors.add(Diagnostic::new(
            ErrorKind::UhdmUnsupportedStmt,
            self.location(tree, node, SymbolId::BAD),
        ));
        self.make_at(UhdmKind::UnsupportedExpr, tree, node)
    }

    // ---- tree probes ----------------------------------------------------

    fn first_keyword(&self, tree: &FileContent, node: NodeId) -> Option<String> {
        tree.children(node)
            .find(|&c| tree.object(c).kind == NodeKind::Keyword)
            .map(|c| self.symbols.text(tree.object(c).symbol).to_string())
    }

    fn has_keyword(&self, tree: &FileContent, node: NodeId, keyword: &str) -> bool {
        tree.children(node).any(|c| {
            tree.object(c).kind == NodeKind::Keyword
                && &*self.symbols.text(tree.object(c).symbol) == keyword
        })
    }

    fn operator_text(&self, tree: &FileContent, node: NodeId, kind: NodeKind) -> Option<String> {
        tree.children(node)
            .find(|&c| tree.object(c).kind == kind)
            .map(|c| self.symbols.text(tree.object(c).symbol).to_string())
    }

    fn expr_children(&self, tree: &FileContent, node: NodeId) -> Vec<NodeId> {
        tree.children(node).filter(|&c| is_expr_kind(tree.object(c).kind)).collect()
    }

    pub fn first_expr_child(&self, tree: &FileContent, node: NodeId) -> Option<NodeId> {
        tree.children(node).find(|&c| is_expr_kind(tree.object(c).kind))
    }

    fn first_statement_child(&self, tree: &FileContent, node: NodeId) -> Option<NodeId> {
        tree.children(node).find(|&c| is_statement_kind(tree.object(c).kind))
    }

    /// Flattens `a.b.c` / `a::b` into its component symbols.
    pub fn path_symbols(&self, tree: &FileContent, node: NodeId, out: &mut Vec<SymbolId>) {
        let object = tree.object(node);
        match object.kind {
            NodeKind::Identifier | NodeKind::EscapedIdentifier => out.push(object.symbol),
            NodeKind::PaHierPath | NodeKind::PaScopedPath => {
                if let Some(base) = self.first_expr_child(tree, node) {
                    self.path_symbols(tree, base, out);
                }
                out.push(object.symbol);
            }
            _ => {}
        }
    }
}

pub(crate) fn is_expr_kind(kind: NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::PaBinaryExpr
            | NodeKind::PaUnaryExpr
            | NodeKind::PaParenExpr
            | NodeKind::PaCondExpr
            | NodeKind::PaIncDecExpr
            | NodeKind::PaConcat
            | NodeKind::PaReplication
            | NodeKind::PaHierPath
            | NodeKind::PaScopedPath
            | NodeKind::PaBitSelect
            | NodeKind::PaPartSelect
            | NodeKind::PaIndexedPartSelect
            | NodeKind::PaCall
            | NodeKind::PaSystemCall
            | NodeKind::PaAssignmentPattern
            | NodeKind::Identifier
            | NodeKind::EscapedIdentifier
            | NodeKind::IntLiteral
            | NodeKind::RealLiteral
            | NodeKind::BasedLiteral
            | NodeKind::StringLiteral
            | NodeKind::TimeLiteral
    )
}

pub(crate) fn is_statement_kind(kind: NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::PaSeqBlock
            | NodeKind::PaParBlock
            | NodeKind::PaBlockingAssign
            | NodeKind::PaNonblockingAssign
            | NodeKind::PaIfStmt
            | NodeKind::PaCaseStmt
            | NodeKind::PaForStmt
            | NodeKind::PaForeachStmt
            | NodeKind::PaWhileStmt
            | NodeKind::PaRepeatStmt
            | NodeKind::PaForeverStmt
            | NodeKind::PaReturnStmt
            | NodeKind::PaEventControl
            | NodeKind::PaDelayControl
            | NodeKind::PaSubroutineCall
            | NodeKind::PaStmt
            | NodeKind::PaIncDecExpr
    )
}

fn binary_op(text: &str) -> Option<OpType> {
    Some(match text {
        "+" | "+=" => OpType::Add,
        "-" | "-=" => OpType::Sub,
        "*" | "*=" => OpType::Mult,
        "/" | "/=" => OpType::Div,
        "%" | "%=" => OpType::Mod,
        "**" => OpType::Pow,
        "&" | "&=" => OpType::BitAnd,
        "|" | "|=" => OpType::BitOr,
        "^" | "^=" => OpType::BitXor,
        "~^" | "^~" => OpType::BitXnor,
        "&&" => OpType::LogAnd,
        "||" => OpType::LogOr,
        "<" => OpType::Lt,
        "<=" => OpType::Le,
        ">" => OpType::Gt,
        ">=" => OpType::Ge,
        "==" => OpType::Eq,
        "!=" => OpType::Neq,
        "===" => OpType::CaseEq,
        "!==" => OpType::CaseNeq,
        "==?" => OpType::WildEq,
        "!=?" => OpType::WildNeq,
        "<<" | "<<=" => OpType::LShift,
        ">>" | ">>=" => OpType::RShift,
        "<<<" => OpType::ArithLShift,
        ">>>" => OpType::ArithRShift,
        _ => return None,
    })
}

fn unary_op(text: &str) -> Option<OpType> {
    Some(match text {
        "+" => OpType::UnaryPlus,
        "-" => OpType::UnaryMinus,
        "!" => OpType::LogNot,
        "~" => OpType::BitNeg,
        "&" => OpType::UnaryAnd,
        "~&" => OpType::UnaryNand,
        "|" => OpType::UnaryOr,
        "~|" => OpType::UnaryNor,
        "^" => OpType::UnaryXor,
        "~^" | "^~" => OpType::UnaryXnor,
        _ => return None,
    })
}

impl NetKind {
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
            "supply0" => Self::Supply0,
            "supply1" => Self::Supply1,
            _ => return None,
        })
    }
}

/// Parses a literal token into a constant value. Values carrying `x`/`z`
/// bits stay textual.
pub fn parse_literal(kind: NodeKind, text: &str) -> ConstValue {
    match kind {
        NodeKind::IntLiteral => {
            let digits: String = text.chars().filter(|&c| c != '_').collect();
            digits.parse::<i64>().map(ConstValue::Int).unwrap_or_else(|_| ConstValue::Str(text.to_owned()))
        }
        NodeKind::BasedLiteral => parse_based(text),
        NodeKind::RealLiteral => {
            text.parse::<f64>().map(ConstValue::Real).unwrap_or_else(|_| ConstValue::Str(text.to_owned()))
        }
        NodeKind::StringLiteral => {
            ConstValue::Str(text.trim_matches('"').to_owned())
        }
        _ => ConstValue::Str(text.to_owned()),
    }
}

fn parse_based(text: &str) -> ConstValue {
    let Some((_, rest)) = text.split_once('\'') else {
        return ConstValue::Str(text.to_owned());
    };
    let rest = rest.strip_prefix(['s', 'S']).unwrap_or(rest);
    let (radix, digits) = match rest.chars().next() {
        Some('b' | 'B') => (2, &rest[1..]),
        Some('o' | 'O') => (8, &rest[1..]),
        Some('d' | 'D') => (10, &rest[1..]),
        Some('h' | 'H') => (16, &rest[1..]),
        // unbased unsized '0 / '1 / 'x / 'z
        Some('0') => return ConstValue::Int(0),
        Some('1') => return ConstValue::Int(1),
        _ => return ConstValue::Str(text.to_owned()),
    };
    let digits: String = digits.chars().filter(|&c| c != '_').collect();
    if digits.chars().any(|c| matches!(c, 'x' | 'X' | 'z' | 'Z' | '?')) {
        return ConstValue::Str(text.to_owned());
    }
    i64::from_str_radix(&digits, radix)
        .map(ConstValue::Int)
        .unwrap_or_else(|_| ConstValue::Str(text.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_parsing() {
        assert_eq!(parse_literal(NodeKind::IntLiteral, "42"), ConstValue::Int(42));
        assert_eq!(parse_literal(NodeKind::IntLiteral, "1_000"), ConstValue::Int(1000));
        assert_eq!(parse_literal(NodeKind::BasedLiteral, "8'hFF"), ConstValue::Int(255));
        assert_eq!(parse_literal(NodeKind::BasedLiteral, "4'b1010"), ConstValue::Int(10));
        assert_eq!(parse_literal(NodeKind::BasedLiteral, "12'sd42"), ConstValue::Int(42));
        assert_eq!(parse_literal(NodeKind::BasedLiteral, "'1"), ConstValue::Int(1));
        assert_eq!(
            parse_literal(NodeKind::BasedLiteral, "4'b10xz"),
            ConstValue::Str("4'b10xz".into())
        );
        assert_eq!(
            parse_literal(NodeKind::StringLiteral, "\"hello\""),
            ConstValue::Str("hello".into())
        );
    }

    #[test]
    fn operator_mapping() {
        assert_eq!(binary_op("+"), Some(OpType::Add));
        assert_eq!(binary_op(">>>"), Some(OpType::ArithRShift));
        assert_eq!(unary_op("~&"), Some(OpType::UnaryNand));
        assert_eq!(unary_op("&"), Some(OpType::UnaryAnd));
        assert_eq!(binary_op("&"), Some(OpType::BitAnd));
    }
}
