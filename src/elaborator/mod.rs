//! Design compilation and elaboration.
//!
//! Stage 7 (`CompileDesign::compile`) builds the skeletal UHDM from each
//! parsed file: definitions, ports, un-evaluated parameters, typespecs and
//! statement bodies. Stage 8 (`CompileDesign::elaborate`) instantiates the
//! module hierarchy from the top modules: parameters are specialized via
//! deep copies, generate constructs are expanded with evaluated conditions,
//! and defparams are applied before per-instance evaluation.

pub mod expr;
pub mod helper;

use crate::{
    config::Options,
    diagnostics::{Diagnostic, ErrorContainer, ErrorKind, Location},
    node::{FileContent, NodeId, NodeKind},
    symbols::{SymbolId, SymbolTable},
    uhdm::{Collection, ConstValue, Serializer, UhdmId, UhdmKind},
};
use self::expr::Env;
use self::helper::{is_expr_kind, CompileHelper};
use std::collections::{HashMap, HashSet};

/// The growing hardware model: the arena plus definition registries.
#[derive(Debug)]
pub struct Design {
    pub serializer: Serializer,
    pub root: UhdmId,
    pub module_defs: HashMap<SymbolId, UhdmId>,
    pub interface_defs: HashMap<SymbolId, UhdmId>,
    pub program_defs: HashMap<SymbolId, UhdmId>,
    pub package_defs: HashMap<SymbolId, UhdmId>,
    pub class_defs: HashMap<SymbolId, UhdmId>,
    pub udp_defs: HashMap<SymbolId, UhdmId>,
    pub top_instances: Vec<UhdmId>,
    /// Set when a `uvm_pkg` package is part of the source set; relaxes
    /// several integrity rules.
    pub has_uvm: bool,
}

impl Default for Design {
    fn default() -> Self {
        Self::new()
    }
}

impl Design {
    pub fn new() -> Self {
        let mut serializer = Serializer::new();
        let root = serializer.make(UhdmKind::Design);
        Self {
            serializer,
            root,
            module_defs: HashMap::new(),
            interface_defs: HashMap::new(),
            program_defs: HashMap::new(),
            package_defs: HashMap::new(),
            class_defs: HashMap::new(),
            udp_defs: HashMap::new(),
            top_instances: Vec::new(),
            has_uvm: false,
        }
    }

    /// Looks a name up across the instantiable definition registries.
    pub fn find_unit(&self, name: SymbolId) -> Option<UhdmId> {
        self.module_defs
            .get(&name)
            .or_else(|| self.interface_defs.get(&name))
            .or_else(|| self.program_defs.get(&name))
            .copied()
    }
}

/// Drives stages 7 and 8.
pub struct CompileDesign<'a> {
    symbols: &'a SymbolTable,
    options: &'a Options,
    errors: &'a mut ErrorContainer,
    pub design: Design,
    trees: Vec<FileContent>,
    /// Module name -> deferred generate constructs `(tree index, node)`.
    def_gens: HashMap<SymbolId, Vec<(usize, NodeId)>>,
    /// Module names that appear as child instances somewhere.
    instantiated: HashSet<SymbolId>,
    /// Collected defparams: `(hierarchical path ending in the parameter,
    /// value expression)`.
    defparams: Vec<(Vec<SymbolId>, UhdmId)>,
}

impl<'a> CompileDesign<'a> {
    pub fn new(symbols: &'a SymbolTable, options: &'a Options, errors: &'a mut ErrorContainer) -> Self {
        Self {
            symbols,
            options,
            errors,
            design: Design::new(),
            trees: Vec::new(),
            def_gens: HashMap::new(),
            instantiated: HashSet::new(),
            defparams: Vec::new(),
        }
    }

    pub fn into_design(self) -> Design {
        self.design
    }

    // ---- stage 7 --------------------------------------------------------

    /// First pass over every parsed file: register definitions and build the
    /// un-elaborated model.
    #[instrument(skip_all, name = "compile-design")]
    pub fn compile(&mut self, trees: Vec<FileContent>) {
        for tree in trees {
            let index = self.trees.len();
            self.compile_tree(&tree, index);
            self.trees.push(tree);
        }
    }

    fn compile_tree(&mut self, tree: &FileContent, index: usize) {
        let root = tree.root();
        let design_root = self.design.root;
        let children: Vec<NodeId> = tree.children(root).collect();
        for child in children {
            match tree.object(child).kind {
                NodeKind::PaModuleDecl => self.compile_unit(tree, index, child, UhdmKind::Module),
                NodeKind::PaInterfaceDecl => {
                    self.compile_unit(tree, index, child, UhdmKind::Interface)
                }
                NodeKind::PaProgramDecl => self.compile_unit(tree, index, child, UhdmKind::Program),
                NodeKind::PaPackageDecl => self.compile_package(tree, index, child),
                NodeKind::PaClassDecl => self.compile_class(tree, child, design_root),
                NodeKind::PaUdpDecl => {
                    let name = tree.object(child).symbol;
                    let def = self.make_at(UhdmKind::UdpDefn, tree, child);
                    self.design.serializer.get_mut(def).name = name;
                    self.design.serializer.own(design_root, Collection::Scopes, def);
                    self.design.udp_defs.insert(name, def);
                }
                NodeKind::PaCheckerDecl => {
                    let name = tree.object(child).symbol;
                    let def = self.make_at(UhdmKind::CheckerDefn, tree, child);
                    self.design.serializer.get_mut(def).name = name;
                    self.design.serializer.own(design_root, Collection::Scopes, def);
                }
                kind if kind.is_terminal() || kind.is_preprocessor() => {}
                _ => {
                    let mut gens = Vec::new();
                    let mut defparams = Vec::new();
                    let mut helper = CompileHelper::new(
                        &mut self.design.serializer,
                        self.symbols,
                        &mut *self.errors,
                    );
                    helper.compile_module_item(tree, child, design_root, &mut gens, &mut defparams);
                    self.defparams.extend(defparams);
                }
            }
        }
    }

    fn make_at(&mut self, kind: UhdmKind, tree: &FileContent, node: NodeId) -> UhdmId {
        let object = tree.object(node);
        let id = self.design.serializer.make(kind);
        self.design.serializer.set_span_from(
            id,
            object.file,
            (object.start_line, object.start_col, object.end_line, object.end_col),
        );
        id
    }

    fn compile_unit(&mut self, tree: &FileContent, index: usize, node: NodeId, kind: UhdmKind) {
        let name = tree.object(node).symbol;
        let duplicate = {
            let map = match kind {
                UhdmKind::Module => &self.design.module_defs,
                UhdmKind::Interface => &self.design.interface_defs,
                _ => &self.design.program_defs,
            };
            map.contains_key(&name)
        };
        if duplicate {
            let object = tree.object(node);
            self.errors.add(Diagnostic::new(
                ErrorKind::CompMultiplyDefinedDesignUnit,
                Location::new(object.file, object.start_line, object.start_col, name),
            ));
            return;
        }
        let def = self.make_at(kind, tree, node);
        self.design.serializer.get_mut(def).name = name;
        self.design.serializer.own(self.design.root, Collection::Scopes, def);
        match kind {
            UhdmKind::Module => self.design.module_defs.insert(name, def),
            UhdmKind::Interface => self.design.interface_defs.insert(name, def),
            _ => self.design.program_defs.insert(name, def),
        };

        let mut gens = Vec::new();
        let mut defparams = Vec::new();
        {
            let mut helper =
                CompileHelper::new(&mut self.design.serializer, self.symbols, &mut *self.errors);
            helper.compile_param_ports(tree, node, def);
            helper.compile_ports(tree, node, def);
            for item in tree.children(node) {
                let item_kind = tree.object(item).kind;
                if item_kind.is_terminal()
                    || matches!(item_kind, NodeKind::PaPortList | NodeKind::PaParamPortList)
                {
                    continue;
                }
                helper.compile_module_item(tree, item, def, &mut gens, &mut defparams);
            }
        }
        self.defparams.extend(defparams);
        if !gens.is_empty() {
            self.def_gens.insert(name, gens.into_iter().map(|n| (index, n)).collect());
        }
        for inner in tree.preorder(node) {
            if tree.object(inner).kind == NodeKind::PaModuleInstantiation {
                self.instantiated.insert(tree.object(inner).symbol);
            }
        }
    }

    fn compile_package(&mut self, tree: &FileContent, _index: usize, node: NodeId) {
        let name = tree.object(node).symbol;
        if &*self.symbols.text(name) == "uvm_pkg" {
            self.design.has_uvm = true;
        }
        let def = self.make_at(UhdmKind::Package, tree, node);
        self.design.serializer.get_mut(def).name = name;
        self.design.serializer.own(self.design.root, Collection::Scopes, def);
        self.design.package_defs.insert(name, def);

        let children: Vec<NodeId> = tree.children(node).collect();
        for item in children {
            let item_kind = tree.object(item).kind;
            if item_kind == NodeKind::PaClassDecl {
                self.compile_class(tree, item, def);
                continue;
            }
            if item_kind.is_terminal() {
                continue;
            }
            let mut gens = Vec::new();
            let mut defparams = Vec::new();
            let mut helper =
                CompileHelper::new(&mut self.design.serializer, self.symbols, &mut *self.errors);
            helper.compile_module_item(tree, item, def, &mut gens, &mut defparams);
            self.defparams.extend(defparams);
        }
    }

    fn compile_class(&mut self, tree: &FileContent, node: NodeId, owner: UhdmId) {
        let name = tree.object(node).symbol;
        let defn = self.make_at(UhdmKind::ClassDefn, tree, node);
        self.design.serializer.get_mut(defn).name = name;
        self.design.serializer.own(owner, Collection::Scopes, defn);
        self.design.class_defs.entry(name).or_insert(defn);

        if let Some(clause) = tree.child_of_kind(node, NodeKind::PaExtendsClause) {
            let base = tree.object(clause).symbol;
            let extends = self.make_at(UhdmKind::Extends, tree, clause);
            let base_ref = self.make_at(UhdmKind::RefTypespec, tree, clause);
            self.design.serializer.get_mut(base_ref).name = base;
            self.design.serializer.own(extends, Collection::Typespecs, base_ref);
            self.design.serializer.get_mut(extends).typespec = base_ref;
            self.design.serializer.own(defn, Collection::Extends, extends);
        }

        let children: Vec<NodeId> = tree.children(node).collect();
        for item in children {
            let item_kind = tree.object(item).kind;
            if item_kind == NodeKind::PaClassDecl {
                self.compile_class(tree, item, defn);
                continue;
            }
            if item_kind.is_terminal() || item_kind == NodeKind::PaExtendsClause {
                continue;
            }
            let mut gens = Vec::new();
            let mut defparams = Vec::new();
            let mut helper =
                CompileHelper::new(&mut self.design.serializer, self.symbols, &mut *self.errors);
            helper.compile_module_item(tree, item, defn, &mut gens, &mut defparams);
            self.defparams.extend(defparams);
        }
    }

    // ---- stage 8 --------------------------------------------------------

    /// Instantiates the hierarchy from the top modules down.
    #[instrument(skip_all, name = "elaborate-design")]
    pub fn elaborate(&mut self) {
        let trees = std::mem::take(&mut self.trees);

        // packages elaborate in place: parameters evaluate once
        let packages: Vec<UhdmId> = {
            let mut ids: Vec<(SymbolId, UhdmId)> =
                self.design.package_defs.iter().map(|(&n, &d)| (n, d)).collect();
            ids.sort_by_key(|(n, _)| *n);
            ids.into_iter().map(|(_, d)| d).collect()
        };
        for package in packages {
            self.evaluate_parameters(package, &HashMap::new());
        }

        let tops = self.top_definitions();
        if tops.is_empty() {
            self.errors.add(Diagnostic::new(
                ErrorKind::ElabNoTopLevelModule,
                Location::object(SymbolId::BAD),
            ));
            self.trees = trees;
            return;
        }
        for top in tops {
            trace!("elaborating top {}", self.symbols.text(top));
            let mut hier = Vec::new();
            if let Some(instance) =
                self.instantiate(&trees, top, top, &HashMap::new(), &mut hier, 0)
            {
                let root = self.design.root;
                self.design.serializer.own(root, Collection::Instances, instance);
                self.design.top_instances.push(instance);
            }
        }
        self.trees = trees;
    }

    /// Configuration-selected tops, or roots not used by any other unit.
    fn top_definitions(&self) -> Vec<SymbolId> {
        if !self.options.top_modules.is_empty() {
            return self
                .options
                .top_modules
                .iter()
                .filter_map(|name| self.symbols.get(name))
                .filter(|name| self.design.module_defs.contains_key(name))
                .collect();
        }
        let mut tops: Vec<SymbolId> = self
            .design
            .module_defs
            .keys()
            .filter(|name| !self.instantiated.contains(name))
            .copied()
            .collect();
        tops.sort();
        tops
    }

    fn instantiate(
        &mut self,
        trees: &[FileContent],
        type_name: SymbolId,
        instance_name: SymbolId,
        overrides: &HashMap<SymbolId, i64>,
        hier: &mut Vec<SymbolId>,
        depth: usize,
    ) -> Option<UhdmId> {
        if depth > 64 {
            return None;
        }
        let def = self.design.find_unit(type_name)?;
        let instance = self.design.serializer.clone_detached(def);
        self.design.serializer.get_mut(instance).name = instance_name;
        hier.push(instance_name);

        // defparams targeting this instance win over instantiation-site
        // overrides; they were applied depth-first upstream already
        let mut merged = overrides.clone();
        let defparam_values: Vec<(SymbolId, Option<i64>)> = self
            .defparams
            .iter()
            .filter(|(path, _)| {
                path.len() >= 2 && hier.ends_with(&path[..path.len() - 1])
            })
            .map(|(path, value)| {
                let target = *path.last().expect("non-empty path");
                let value =
                    expr::eval(&self.design.serializer, self.symbols, *value, &Env::new());
                (target, value)
            })
            .collect();
        for (target, value) in defparam_values {
            if let Some(value) = value {
                merged.insert(target, value);
            }
        }

        let env = self.evaluate_parameters(instance, &merged);

        // invalid named overrides are reported against the definition
        let param_names: HashSet<SymbolId> = {
            let serializer = &self.design.serializer;
            serializer
                .get(instance)
                .owned(Collection::Parameters)
                .iter()
                .map(|&p| serializer.get(p).name)
                .collect()
        };
        for name in overrides.keys() {
            if !param_names.contains(name) {
                self.errors.add(Diagnostic::new(
                    ErrorKind::ElabInvalidParamOverride,
                    Location::object(*name),
                ));
            }
        }

        if let Some(gens) = self.def_gens.get(&type_name).cloned() {
            for (tree_index, node) in gens {
                self.expand_generate(trees, tree_index, node, instance, &env, depth);
            }
        }

        // resolve child instantiations recorded as RefModule placeholders
        let pending: Vec<UhdmId> = self.collect_unresolved_ref_modules(instance);
        for reference in pending {
            self.resolve_child_instance(trees, reference, &env, hier, depth);
        }

        hier.pop();
        Some(instance)
    }

    /// Evaluates the parameters of `scope` with `overrides` applied,
    /// installing values and `ParamAssign` records. Returns the resulting
    /// environment.
    fn evaluate_parameters(&mut self, scope: UhdmId, overrides: &HashMap<SymbolId, i64>) -> Env {
        let mut env = Env::new();
        let parameters: Vec<UhdmId> =
            self.design.serializer.get(scope).owned(Collection::Parameters).to_vec();
        for parameter in parameters {
            let (name, default_expr) = {
                let object = self.design.serializer.get(parameter);
                (object.name, object.owned(Collection::Operands).first().copied())
            };
            let value = overrides.get(&name).copied().or_else(|| {
                default_expr
                    .and_then(|e| expr::eval(&self.design.serializer, self.symbols, e, &env))
            });
            let Some(value) = value else { continue };
            let serializer = &mut self.design.serializer;
            serializer.get_mut(parameter).value = ConstValue::Int(value);
            env.insert(name, value);
            let span = {
                let object = serializer.get(parameter);
                (object.file, (object.start_line, object.start_col, object.end_line, object.end_col))
            };
            let assign = serializer.make(UhdmKind::ParamAssign);
            serializer.set_span_from(assign, span.0, span.1);
            serializer.get_mut(assign).name = name;
            serializer.get_mut(assign).actual = parameter;
            let constant = serializer.make(UhdmKind::Constant);
            serializer.set_span_from(constant, span.0, span.1);
            serializer.get_mut(constant).value = ConstValue::Int(value);
            serializer.own(assign, Collection::Operands, constant);
            serializer.own(scope, Collection::ParamAssigns, assign);
        }
        env
    }

    fn collect_unresolved_ref_modules(&self, root: UhdmId) -> Vec<UhdmId> {
        let mut found = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let object = self.design.serializer.get(id);
            if object.kind == UhdmKind::RefModule && object.actual.is_bad() {
                found.push(id);
            }
            let children: Vec<UhdmId> = object.owned_children().collect();
            stack.extend(children);
        }
        found.sort();
        found
    }

    fn resolve_child_instance(
        &mut self,
        trees: &[FileContent],
        reference: UhdmId,
        env: &Env,
        hier: &mut Vec<SymbolId>,
        depth: usize,
    ) {
        let (child_name, type_ref, assigns) = {
            let object = self.design.serializer.get(reference);
            (object.name, object.typespec, object.owned(Collection::ParamAssigns).to_vec())
        };
        let child_type = self.design.serializer.get(type_ref).name;
        let Some(child_def) = self.design.find_unit(child_type) else {
            // stays unresolved; the binder will report it if no library
            // definition surfaces later
            return;
        };
        let def_param_order: Vec<SymbolId> = {
            let serializer = &self.design.serializer;
            serializer
                .get(child_def)
                .owned(Collection::Parameters)
                .iter()
                .map(|&p| serializer.get(p).name)
                .collect()
        };
        let mut child_overrides = HashMap::new();
        let mut position = 0usize;
        for assign in assigns {
            let (name, value_expr) = {
                let object = self.design.serializer.get(assign);
                (object.name, object.owned(Collection::Operands).first().copied())
            };
            let target = if name.is_bad() {
                let target = def_param_order.get(position).copied();
                position += 1;
                target
            } else {
                Some(name)
            };
            let value = value_expr
                .and_then(|e| expr::eval(&self.design.serializer, self.symbols, e, env));
            if let (Some(target), Some(value)) = (target, value) {
                child_overrides.insert(target, value);
            }
        }
        if let Some(child) =
            self.instantiate(trees, child_type, child_name, &child_overrides, hier, depth + 1)
        {
            let parent_scope = self.design.serializer.get(reference).parent;
            self.design.serializer.own(parent_scope, Collection::Instances, child);
            self.design.serializer.get_mut(reference).actual = child;
        }
    }

    // ---- generate expansion ----------------------------------------------

    fn expand_generate(
        &mut self,
        trees: &[FileContent],
        tree_index: usize,
        node: NodeId,
        scope: UhdmId,
        env: &Env,
        depth: usize,
    ) {
        let kind = trees[tree_index].object(node).kind;
        match kind {
            NodeKind::PaGenFor => self.expand_gen_for(trees, tree_index, node, scope, env, depth),
            NodeKind::PaGenIf => self.expand_gen_if(trees, tree_index, node, scope, env, depth),
            NodeKind::PaGenCase => self.expand_gen_case(trees, tree_index, node, scope, env, depth),
            NodeKind::PaGenBlock => {
                let scope_name = self.gen_block_name(trees, tree_index, node);
                let gen_scope = self.make_at(UhdmKind::GenScope, &trees[tree_index], node);
                self.design.serializer.get_mut(gen_scope).name = scope_name;
                self.design.serializer.own(scope, Collection::Scopes, gen_scope);
                self.compile_gen_items(trees, tree_index, node, gen_scope, env, depth);
            }
            NodeKind::PaGenerateRegion => {
                let children: Vec<NodeId> = trees[tree_index].children(node).collect();
                for child in children {
                    if !trees[tree_index].object(child).kind.is_terminal() {
                        self.expand_generate(trees, tree_index, child, scope, env, depth);
                    }
                }
            }
            _ => {}
        }
    }

    fn gen_block_name(&self, trees: &[FileContent], tree_index: usize, node: NodeId) -> SymbolId {
        let symbol = trees[tree_index].object(node).symbol;
        if symbol.is_bad() {
            self.symbols.register("genblk")
        } else {
            symbol
        }
    }

    /// `for`-generate unrolls into a `GenScopeArray` with one `GenScope` per
    /// iteration and a fresh genvar value in each scope.
    fn expand_gen_for(
        &mut self,
        trees: &[FileContent],
        tree_index: usize,
        node: NodeId,
        scope: UhdmId,
        env: &Env,
        depth: usize,
    ) {
        let tree = &trees[tree_index];
        let init = tree.child_of_kind(node, NodeKind::PaBlockingAssign);
        let cond = tree
            .children(node)
            .find(|&c| is_expr_kind(tree.object(c).kind));
        let step = tree.children(node).find(|&c| {
            matches!(tree.object(c).kind, NodeKind::PaIncDecExpr)
                || (tree.object(c).kind == NodeKind::PaBlockingAssign && Some(c) != init)
        });
        let body = tree.child_of_kind(node, NodeKind::PaGenBlock);
        let (Some(init), Some(cond), Some(body)) = (init, cond, body) else {
            return;
        };

        let genvar = tree.object(init).symbol;
        let start = tree
            .children(init)
            .find(|&c| is_expr_kind(tree.object(c).kind))
            .and_then(|e| self.eval_ast(tree, e, env));
        let Some(mut value) = start else { return };

        let label = self.gen_block_name(trees, tree_index, body);
        let array = self.make_at(UhdmKind::GenScopeArray, tree, node);
        self.design.serializer.get_mut(array).name = label;
        self.design.serializer.own(scope, Collection::Scopes, array);

        let mut iterations = 0usize;
        loop {
            let mut iter_env = env.clone();
            iter_env.insert(genvar, value);
            match self.eval_ast(tree, cond, &iter_env) {
                Some(keep) if keep != 0 => {}
                _ => break,
            }
            if iterations >= 4096 {
                break;
            }
            iterations += 1;

            let scope_name = self
                .symbols
                .register(&format!("{}[{}]", self.symbols.text(label), value));
            let gen_scope = self.make_at(UhdmKind::GenScope, tree, body);
            self.design.serializer.get_mut(gen_scope).name = scope_name;
            self.design.serializer.own(array, Collection::Scopes, gen_scope);
            self.compile_gen_items(trees, tree_index, body, gen_scope, &iter_env, depth);

            value = match self.apply_gen_step(tree, step, genvar, value, &iter_env) {
                Some(next) => next,
                None => break,
            };
        }
    }

    fn apply_gen_step(
        &self,
        tree: &FileContent,
        step: Option<NodeId>,
        genvar: SymbolId,
        value: i64,
        env: &Env,
    ) -> Option<i64> {
        let step = step?;
        match tree.object(step).kind {
            NodeKind::PaIncDecExpr => {
                let op = tree
                    .children(step)
                    .find(|&c| tree.object(c).kind == NodeKind::UnaryOp)
                    .map(|c| self.symbols.text(tree.object(c).symbol).to_string());
                match op.as_deref() {
                    Some("--") => Some(value - 1),
                    _ => Some(value + 1),
                }
            }
            NodeKind::PaBlockingAssign => {
                let rhs = tree
                    .children(step)
                    .filter(|&c| is_expr_kind(tree.object(c).kind))
                    .last()?;
                let mut step_env = env.clone();
                step_env.insert(genvar, value);
                self.eval_ast(tree, rhs, &step_env)
            }
            _ => None,
        }
    }

    /// `if`-generate keeps only the chosen branch.
    fn expand_gen_if(
        &mut self,
        trees: &[FileContent],
        tree_index: usize,
        node: NodeId,
        scope: UhdmId,
        env: &Env,
        depth: usize,
    ) {
        let tree = &trees[tree_index];
        let cond = tree.children(node).find(|&c| is_expr_kind(tree.object(c).kind));
        let branches: Vec<NodeId> = tree
            .children(node)
            .filter(|&c| {
                matches!(tree.object(c).kind, NodeKind::PaGenBlock | NodeKind::PaGenIf)
            })
            .collect();
        let taken = cond.and_then(|c| self.eval_ast(tree, c, env)).unwrap_or(0) != 0;
        let chosen = if taken { branches.first() } else { branches.get(1) };
        let Some(&chosen) = chosen else { return };
        self.expand_generate(trees, tree_index, chosen, scope, env, depth);
    }

    fn expand_gen_case(
        &mut self,
        trees: &[FileContent],
        tree_index: usize,
        node: NodeId,
        scope: UhdmId,
        env: &Env,
        depth: usize,
    ) {
        let tree = &trees[tree_index];
        let subject = tree
            .children(node)
            .find(|&c| is_expr_kind(tree.object(c).kind))
            .and_then(|c| self.eval_ast(tree, c, env));
        let items: Vec<NodeId> = tree
            .children(node)
            .filter(|&c| tree.object(c).kind == NodeKind::PaGenCaseItem)
            .collect();
        let mut default = None;
        for item in &items {
            let labels: Vec<i64> = tree
                .children(*item)
                .filter(|&c| is_expr_kind(tree.object(c).kind))
                .filter_map(|c| self.eval_ast(tree, c, env))
                .collect();
            if labels.is_empty() {
                default = Some(*item);
                continue;
            }
            if let Some(subject) = subject {
                if labels.contains(&subject) {
                    if let Some(body) = tree.child_of_kind(*item, NodeKind::PaGenBlock) {
                        self.expand_generate(trees, tree_index, body, scope, env, depth);
                    }
                    return;
                }
            }
        }
        if let Some(default) = default {
            if let Some(body) = tree.child_of_kind(default, NodeKind::PaGenBlock) {
                self.expand_generate(trees, tree_index, body, scope, env, depth);
            }
        }
    }

    fn compile_gen_items(
        &mut self,
        trees: &[FileContent],
        tree_index: usize,
        block: NodeId,
        scope: UhdmId,
        env: &Env,
        depth: usize,
    ) {
        let children: Vec<NodeId> = {
            let tree = &trees[tree_index];
            tree.children(block).filter(|&c| !tree.object(c).kind.is_terminal()).collect()
        };
        for child in children {
            let kind = trees[tree_index].object(child).kind;
            match kind {
                NodeKind::PaGenFor
                | NodeKind::PaGenIf
                | NodeKind::PaGenCase
                | NodeKind::PaGenBlock
                | NodeKind::PaGenerateRegion => {
                    self.expand_generate(trees, tree_index, child, scope, env, depth);
                }
                _ => {
                    let tree = &trees[tree_index];
                    let mut gens = Vec::new();
                    let mut defparams = Vec::new();
                    {
                        let mut helper = CompileHelper::new(
                            &mut self.design.serializer,
                            self.symbols,
                            &mut *self.errors,
                        );
                        helper.compile_module_item(tree, child, scope, &mut gens, &mut defparams);
                    }
                    self.defparams.extend(defparams);
                    for gen in gens {
                        self.expand_generate(trees, tree_index, gen, scope, env, depth);
                    }
                }
            }
        }
    }

    /// Constant evaluation directly over AST expressions; used for generate
    /// conditions so no throwaway UHDM objects are allocated.
    fn eval_ast(&self, tree: &FileContent, node: NodeId, env: &Env) -> Option<i64> {
        let object = tree.object(node);
        match object.kind {
            NodeKind::IntLiteral | NodeKind::BasedLiteral => {
                helper::parse_literal(object.kind, &self.symbols.text(object.symbol)).as_int()
            }
            NodeKind::Identifier | NodeKind::EscapedIdentifier => env.get(&object.symbol).copied(),
            NodeKind::PaParenExpr => {
                let inner = tree.children(node).find(|&c| is_expr_kind(tree.object(c).kind))?;
                self.eval_ast(tree, inner, env)
            }
            NodeKind::PaUnaryExpr => {
                let op = tree
                    .children(node)
                    .find(|&c| tree.object(c).kind == NodeKind::UnaryOp)
                    .map(|c| self.symbols.text(tree.object(c).symbol).to_string())?;
                let operand = tree.children(node).find(|&c| is_expr_kind(tree.object(c).kind))?;
                let value = self.eval_ast(tree, operand, env)?;
                Some(match op.as_str() {
                    "-" => value.wrapping_neg(),
                    "+" => value,
                    "!" => (value == 0) as i64,
                    "~" => !value,
                    _ => return None,
                })
            }
            NodeKind::PaBinaryExpr => {
                let op = tree
                    .children(node)
                    .find(|&c| tree.object(c).kind == NodeKind::BinaryOp)
                    .map(|c| self.symbols.text(tree.object(c).symbol).to_string())?;
                let mut operands =
                    tree.children(node).filter(|&c| is_expr_kind(tree.object(c).kind));
                let lhs = self.eval_ast(tree, operands.next()?, env)?;
                let rhs = self.eval_ast(tree, operands.next()?, env)?;
                Some(match op.as_str() {
                    "+" => lhs.wrapping_add(rhs),
                    "-" => lhs.wrapping_sub(rhs),
                    "*" => lhs.wrapping_mul(rhs),
                    "/" if rhs != 0 => lhs / rhs,
                    "%" if rhs != 0 => lhs % rhs,
                    "<" => (lhs < rhs) as i64,
                    "<=" => (lhs <= rhs) as i64,
                    ">" => (lhs > rhs) as i64,
                    ">=" => (lhs >= rhs) as i64,
                    "==" => (lhs == rhs) as i64,
                    "!=" => (lhs != rhs) as i64,
                    "&&" => (lhs != 0 && rhs != 0) as i64,
                    "||" => (lhs != 0 || rhs != 0) as i64,
                    "&" => lhs & rhs,
                    "|" => lhs | rhs,
                    "^" => lhs ^ rhs,
                    "<<" => lhs.checked_shl(u32::try_from(rhs).ok()?)?,
                    ">>" => ((lhs as u64).checked_shr(u32::try_from(rhs).ok()?)?) as i64,
                    ">>>" => lhs.checked_shr(u32::try_from(rhs).ok()?)?,
                    "**" => lhs.checked_pow(u32::try_from(rhs).ok()?)?,
                    _ => return None,
                })
            }
            NodeKind::PaCondExpr => {
                let mut operands =
                    tree.children(node).filter(|&c| is_expr_kind(tree.object(c).kind));
                let cond = self.eval_ast(tree, operands.next()?, env)?;
                let then_expr = operands.next()?;
                let else_expr = operands.next()?;
                self.eval_ast(tree, if cond != 0 { then_expr } else { else_expr }, env)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fs::PathId, parser};

    struct Harness {
        symbols: SymbolTable,
        options: Options,
        errors: ErrorContainer,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                symbols: SymbolTable::new(),
                options: Options::default(),
                errors: ErrorContainer::new(),
            }
        }

        fn elaborate(&mut self, source: &str) -> Design {
            let (tree, issues) = parser::parse_source(PathId::BAD, source, &self.symbols);
            assert!(issues.is_empty(), "{issues:?}");
            let mut compiler = CompileDesign::new(&self.symbols, &self.options, &mut self.errors);
            compiler.compile(vec![tree]);
            compiler.elaborate();
            compiler.into_design()
        }
    }

    fn find_named(design: &Design, root: UhdmId, name: &str, symbols: &SymbolTable) -> Option<UhdmId> {
        find_kind(design, root, name, symbols, None)
    }

    fn find_kind(
        design: &Design,
        root: UhdmId,
        name: &str,
        symbols: &SymbolTable,
        kind: Option<UhdmKind>,
    ) -> Option<UhdmId> {
        let target = symbols.get(name)?;
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let object = design.serializer.get(id);
            if object.name == target && kind.map(|k| k == object.kind).unwrap_or(true) {
                return Some(id);
            }
            let children: Vec<UhdmId> = object.owned_children().collect();
            stack.extend(children);
        }
        None
    }

    #[test]
    fn parameter_override_specializes_instance() {
        let mut harness = Harness::new();
        let design = harness.elaborate(
            "module m #(parameter int W = 8)(input logic [W-1:0] d);\nendmodule\n\
             module top;\n  m #(.W(16)) u();\nendmodule\n",
        );
        let top = design.top_instances[0];
        let u = find_kind(&design, top, "u", &harness.symbols, Some(UhdmKind::Module))
            .expect("child instance");
        let assigns = design.serializer.get(u).owned(Collection::ParamAssigns);
        assert_eq!(assigns.len(), 1);
        let assign = design.serializer.get(assigns[0]);
        // LHS links the parameter object, RHS is the evaluated constant
        let lhs = design.serializer.get(assign.actual);
        assert_eq!(lhs.kind, UhdmKind::Parameter);
        assert_eq!(lhs.value, ConstValue::Int(16));
        let rhs = design.serializer.get(assign.owned(Collection::Operands)[0]);
        assert_eq!(rhs.value, ConstValue::Int(16));
    }

    #[test]
    fn generate_for_unrolls_three_scopes() {
        let mut harness = Harness::new();
        let design = harness.elaborate(
            "module top;\ngenerate for (genvar i = 0; i < 3; i++) begin : g\n  wire w_i;\nend endgenerate\nendmodule\n",
        );
        assert!(harness.errors.is_empty(), "{:?}", harness.errors);
        let top = design.top_instances[0];
        let array = find_named(&design, top, "g", &harness.symbols).expect("gen scope array");
        assert_eq!(design.serializer.get(array).kind, UhdmKind::GenScopeArray);
        let scopes = design.serializer.get(array).owned(Collection::Scopes);
        assert_eq!(scopes.len(), 3);
        for (index, &scope) in scopes.iter().enumerate() {
            let name = harness.symbols.text(design.serializer.get(scope).name);
            assert_eq!(&*name, &format!("g[{index}]"));
            let nets = design.serializer.get(scope).owned(Collection::Nets);
            assert_eq!(nets.len(), 1);
            assert_eq!(
                &*harness.symbols.text(design.serializer.get(nets[0]).name),
                "w_i"
            );
        }
    }

    #[test]
    fn generate_for_false_condition_is_empty() {
        let mut harness = Harness::new();
        let design = harness.elaborate(
            "module top;\ngenerate for (genvar i = 0; i < 0; i++) begin : g\n  wire w;\nend endgenerate\nendmodule\n",
        );
        let top = design.top_instances[0];
        let array = find_named(&design, top, "g", &harness.symbols).expect("array exists");
        assert_eq!(design.serializer.get(array).owned(Collection::Scopes).len(), 0);
    }

    #[test]
    fn generate_if_keeps_chosen_branch() {
        let mut harness = Harness::new();
        let design = harness.elaborate(
            "module top #(parameter USE_A = 1);\n\
             if (USE_A) begin : a\n wire wa;\nend else begin : b\n wire wb;\nend\nendmodule\n",
        );
        let top = design.top_instances[0];
        assert!(find_named(&design, top, "a", &harness.symbols).is_some());
        assert!(find_named(&design, top, "b", &harness.symbols).is_none());
    }

    #[test]
    fn defparam_overrides_default() {
        let mut harness = Harness::new();
        let design = harness.elaborate(
            "module leaf #(parameter W = 4);\nendmodule\n\
             module top;\n  leaf u();\n  defparam u.W = 9;\nendmodule\n",
        );
        let top = design.top_instances[0];
        let u = find_kind(&design, top, "u", &harness.symbols, Some(UhdmKind::Module))
            .expect("child");
        let parameters = design.serializer.get(u).owned(Collection::Parameters);
        assert_eq!(design.serializer.get(parameters[0]).value, ConstValue::Int(9));
    }

    #[test]
    fn no_top_module_is_fatal() {
        let mut harness = Harness::new();
        let _design = harness.elaborate("package p;\nendpackage\n");
        assert!(harness.errors.has_fatal());
    }

    #[test]
    fn elaboration_is_idempotent() {
        let source = "module m #(parameter int W = 2)(input logic [W-1:0] d);\nendmodule\n\
                      module top;\n  m #(.W(4)) u0();\n  m u1();\nendmodule\n";
        let mut harness = Harness::new();
        let a = harness.elaborate(source);
        let b = harness.elaborate(source);
        assert!(a.serializer.structurally_equal(a.root, &b.serializer, b.root));
    }

    #[test]
    fn class_extends_records_reference() {
        let mut harness = Harness::new();
        let design = harness.elaborate(
            "class base;\nendclass\nclass derived extends base;\nendclass\n\
             module top;\nendmodule\n",
        );
        let derived = design.class_defs[&harness.symbols.get("derived").unwrap()];
        let extends = design.serializer.get(derived).owned(Collection::Extends);
        assert_eq!(extends.len(), 1);
        let base_ref = design.serializer.get(extends[0]).typespec;
        assert_eq!(
            &*harness.symbols.text(design.serializer.get(base_ref).name),
            "base"
        );
    }
}
