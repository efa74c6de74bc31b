//! Reference binding.
//!
//! Resolves every unresolved `RefObj`, `RefTypespec`, `RefModule` and
//! `ChandleVar` in the elaborated model by walking outward through enclosing
//! scopes, with `::`-qualified lookups descending through packages and
//! classes and hierarchical members looked up in their resolved prefix.
//! After the first pass, unbound plain references either retry as typespecs
//! (under `$bits`), become implicit nets per `` `default_nettype ``, or are
//! reported.

use crate::{
    diagnostics::{Diagnostic, ErrorContainer, ErrorKind, Location},
    elaborator::Design,
    preprocessor::DefaultNettype,
    symbols::{SymbolId, SymbolTable},
    uhdm::{Collection, NetKind, UhdmDetail, UhdmId, UhdmKind},
};

/// Binds references over a completed design.
pub struct ObjectBinder<'a> {
    design: &'a mut Design,
    symbols: &'a SymbolTable,
    errors: &'a mut ErrorContainer,
    default_nettype: DefaultNettype,
}

impl<'a> ObjectBinder<'a> {
    pub fn new(
        design: &'a mut Design,
        symbols: &'a SymbolTable,
        errors: &'a mut ErrorContainer,
        default_nettype: DefaultNettype,
    ) -> Self {
        Self { design, symbols, errors, default_nettype }
    }

    /// Runs all binding passes and reports what stays unresolved.
    #[instrument(skip_all, name = "bind-objects")]
    pub fn bind(&mut self) {
        self.bind_class_inheritance();

        // member lookups need their prefix bound first, so iterate to a
        // fixpoint; the scope chains are shallow
        for _ in 0..4 {
            let unresolved = self.collect_unresolved();
            if unresolved.is_empty() {
                break;
            }
            let mut progressed = false;
            for reference in unresolved {
                if let Some(actual) = self.resolve(reference) {
                    self.design.serializer.get_mut(reference).actual = actual;
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }

        self.create_default_nets();
        self.report_unresolved();
    }

    fn collect_unresolved(&self) -> Vec<UhdmId> {
        let mut found = Vec::new();
        let mut stack = vec![self.design.root];
        while let Some(id) = stack.pop() {
            let object = self.design.serializer.get(id);
            if object.kind.is_reference() && object.actual.is_bad() {
                found.push(id);
            }
            let children: Vec<UhdmId> = object.owned_children().collect();
            stack.extend(children);
        }
        found.sort();
        found
    }

    // ---- class inheritance ----------------------------------------------

    /// Links every `extends` clause to its base definition and registers the
    /// derived class on the base's `DerivedClasses` list.
    fn bind_class_inheritance(&mut self) {
        let classes: Vec<UhdmId> = {
            let mut ids: Vec<(SymbolId, UhdmId)> =
                self.design.class_defs.iter().map(|(&n, &d)| (n, d)).collect();
            ids.sort_by_key(|(n, _)| *n);
            ids.into_iter().map(|(_, d)| d).collect()
        };
        for class in classes {
            let extends = self.design.serializer.get(class).owned(Collection::Extends).to_vec();
            for extend in extends {
                let base_ref = self.design.serializer.get(extend).typespec;
                if base_ref.is_bad() || !self.design.serializer.get(base_ref).actual.is_bad() {
                    continue;
                }
                let base_name = self.design.serializer.get(base_ref).name;
                if let Some(&base) = self.design.class_defs.get(&base_name) {
                    self.design.serializer.get_mut(base_ref).actual = base;
                    self.design.serializer.get_mut(extend).actual = base;
                    self.design.serializer.own(base, Collection::DerivedClasses, class);
                }
            }
        }
    }

    // ---- name resolution -------------------------------------------------

    fn resolve(&self, reference: UhdmId) -> Option<UhdmId> {
        let object = self.design.serializer.get(reference);
        let name = object.name;
        let text = self.symbols.text(name);

        if text.contains("::") {
            return self.resolve_qualified(&text);
        }
        match &*text {
            "this" => return self.enclosing_class(reference),
            "super" => {
                let class = self.enclosing_class(reference)?;
                return self.base_class(class);
            }
            _ => {}
        }

        if object.kind == UhdmKind::RefModule {
            // module references resolve against the definition registries;
            // elaborated ones already carry their instance
            let type_name = if object.typespec.is_bad() {
                name
            } else {
                self.design.serializer.get(object.typespec).name
            };
            return self
                .design
                .find_unit(type_name)
                .or_else(|| self.design.udp_defs.get(&type_name).copied());
        }

        // a member of a hierarchical path binds inside its prefix
        if let Some(prefix) = self.hier_path_prefix(reference) {
            let target = self.design.serializer.get(prefix).actual;
            if target.is_bad() {
                return None;
            }
            return self.find_member(target, name);
        }

        // outward scope walk
        let mut scope = object.parent;
        let want_typespec = object.kind == UhdmKind::RefTypespec;
        while !scope.is_bad() {
            let scope_object = self.design.serializer.get(scope);
            if scope_object.kind.is_scope() {
                if let Some(found) = self.find_in_scope(scope, name, want_typespec) {
                    return Some(found);
                }
                // class scopes also search their superclass chain
                if scope_object.kind == UhdmKind::ClassDefn {
                    let mut base = self.base_class(scope);
                    let mut guard = 0;
                    while let Some(class) = base {
                        if let Some(found) = self.find_in_scope(class, name, want_typespec) {
                            return Some(found);
                        }
                        base = self.base_class(class);
                        guard += 1;
                        if guard > 32 {
                            break;
                        }
                    }
                }
            }
            scope = scope_object.parent;
        }

        // design-level definitions resolve type references
        if want_typespec {
            if let Some(&class) = self.design.class_defs.get(&name) {
                return Some(class);
            }
            if let Some(unit) = self.design.find_unit(name) {
                return Some(unit);
            }
        }
        // packages referenced without qualification (import scope)
        if let Some(&package) = self.design.package_defs.get(&name) {
            return Some(package);
        }
        None
    }

    /// `pkg::name` / `class::member` lookup: the leftmost component selects
    /// a package or class, the rest descend through members.
    fn resolve_qualified(&self, text: &str) -> Option<UhdmId> {
        let mut parts = text.split("::");
        let first = self.symbols.get(parts.next()?)?;
        let mut current = self
            .design
            .package_defs
            .get(&first)
            .or_else(|| self.design.class_defs.get(&first))
            .copied()?;
        for part in parts {
            let name = self.symbols.get(part)?;
            current = self.find_in_scope(current, name, false)
                .or_else(|| self.find_in_scope(current, name, true))?;
        }
        Some(current)
    }

    /// The first operand of the enclosing `HierPath` when `reference` is a
    /// member position (not the head) of that path.
    fn hier_path_prefix(&self, reference: UhdmId) -> Option<UhdmId> {
        let parent = self.design.serializer.get(reference).parent;
        if parent.is_bad() {
            return None;
        }
        let parent_object = self.design.serializer.get(parent);
        if parent_object.kind != UhdmKind::HierPath {
            return None;
        }
        let operands = parent_object.owned(Collection::Operands);
        let head = *operands.first()?;
        if head == reference {
            return None;
        }
        Some(head)
    }

    fn find_member(&self, target: UhdmId, name: SymbolId) -> Option<UhdmId> {
        let target_object = self.design.serializer.get(target);
        if target_object.kind.is_instance() || target_object.kind == UhdmKind::GenScope {
            return self.find_in_scope(target, name, false);
        }
        if target_object.typespec.is_bad() {
            return None;
        }
        // typed prefix: the type either is a design unit (module instance
        // reference, interface port) or carries members (struct, class)
        let typespec = self.resolve_typespec(target_object.typespec);
        let typespec_object = self.design.serializer.get(typespec);
        if typespec_object.kind.is_instance() {
            return self.find_in_scope(typespec, name, false);
        }
        typespec_object
            .owned(Collection::Members)
            .iter()
            .copied()
            .find(|&m| self.design.serializer.get(m).name == name)
    }

    fn resolve_typespec(&self, typespec: UhdmId) -> UhdmId {
        let object = self.design.serializer.get(typespec);
        if object.kind == UhdmKind::RefTypespec && !object.actual.is_bad() {
            object.actual
        } else {
            typespec
        }
    }

    /// Checks one scope's ownership collections for `name`.
    fn find_in_scope(&self, scope: UhdmId, name: SymbolId, want_typespec: bool) -> Option<UhdmId> {
        let serializer = &self.design.serializer;
        let object = serializer.get(scope);
        if want_typespec {
            for &typespec in object.owned(Collection::Typespecs) {
                if serializer.get(typespec).name == name {
                    return Some(typespec);
                }
            }
            for &inner in object.owned(Collection::Scopes) {
                if serializer.get(inner).kind == UhdmKind::ClassDefn
                    && serializer.get(inner).name == name
                {
                    return Some(inner);
                }
            }
            return None;
        }
        const SEARCH: &[Collection] = &[
            Collection::Variables,
            Collection::Nets,
            Collection::Ports,
            Collection::Parameters,
            Collection::TaskFuncs,
            Collection::NamedEvents,
            Collection::Instances,
            Collection::Modports,
        ];
        for &collection in SEARCH {
            for &child in object.owned(collection) {
                let child_object = serializer.get(child);
                if child_object.name == name {
                    // an elaborated module reference yields its instance
                    if child_object.kind == UhdmKind::RefModule && !child_object.actual.is_bad() {
                        return Some(child_object.actual);
                    }
                    return Some(child);
                }
            }
        }
        // enum members of the scope's typespecs are directly visible
        for &typespec in object.owned(Collection::Typespecs) {
            if serializer.get(typespec).kind == UhdmKind::EnumTypespec {
                for &member in serializer.get(typespec).owned(Collection::Members) {
                    if serializer.get(member).name == name {
                        return Some(member);
                    }
                }
            }
        }
        // named generate scopes
        for &inner in object.owned(Collection::Scopes) {
            let inner_object = serializer.get(inner);
            if matches!(inner_object.kind, UhdmKind::GenScope | UhdmKind::GenScopeArray)
                && inner_object.name == name
            {
                return Some(inner);
            }
        }
        None
    }

    fn enclosing_class(&self, reference: UhdmId) -> Option<UhdmId> {
        let mut scope = self.design.serializer.get(reference).parent;
        while !scope.is_bad() {
            let object = self.design.serializer.get(scope);
            if object.kind == UhdmKind::ClassDefn {
                return Some(scope);
            }
            scope = object.parent;
        }
        None
    }

    fn base_class(&self, class: UhdmId) -> Option<UhdmId> {
        let extends = self.design.serializer.get(class).owned(Collection::Extends);
        let extend = *extends.first()?;
        let actual = self.design.serializer.get(extend).actual;
        (!actual.is_bad()).then_some(actual)
    }

    // ---- default nets ----------------------------------------------------

    /// After the first binding pass, unbound plain references either retry
    /// as typespecs (under `$bits`) or become implicit nets of the enclosing
    /// module per `` `default_nettype ``.
    fn create_default_nets(&mut self) {
        let unresolved = self.collect_unresolved();
        for reference in unresolved {
            if self.design.serializer.get(reference).kind != UhdmKind::RefObj {
                continue;
            }

            // `$bits(x)` with no object `x`: retry as a typespec lookup
            if self.is_bits_argument(reference) {
                let name = self.design.serializer.get(reference).name;
                if let Some(typespec) = self.retry_as_typespec(reference, name) {
                    let object = self.design.serializer.get_mut(reference);
                    object.kind = UhdmKind::RefTypespec;
                    object.actual = typespec;
                    continue;
                }
            }

            let Some(module) = self.enclosing_module(reference) else { continue };
            if self.hier_path_prefix(reference).is_some() {
                continue;
            }
            let name = self.design.serializer.get(reference).name;
            match self.implicit_net_kind() {
                Some(net_kind) => {
                    let (file, line, col) = {
                        let object = self.design.serializer.get(reference);
                        (object.file, object.start_line, object.start_col)
                    };
                    let net = self.design.serializer.make(UhdmKind::LogicNet);
                    {
                        let object = self.design.serializer.get_mut(net);
                        object.name = name;
                        object.detail = UhdmDetail::Net(net_kind);
                        object.file = file;
                        object.start_line = line;
                        object.start_col = col;
                        object.end_line = line;
                        object.end_col = col;
                    }
                    self.design.serializer.own(module, Collection::Nets, net);
                    self.design.serializer.get_mut(reference).actual = net;
                }
                None => {
                    let object = self.design.serializer.get(reference);
                    self.errors.add(Diagnostic::new(
                        ErrorKind::ElabIllegalImplicitNet,
                        Location::new(object.file, object.start_line, object.start_col, name),
                    ));
                }
            }
        }
    }

    fn implicit_net_kind(&self) -> Option<NetKind> {
        Some(match self.default_nettype {
            DefaultNettype::Wire => NetKind::Wire,
            DefaultNettype::Tri => NetKind::Tri,
            DefaultNettype::Tri0 => NetKind::Tri0,
            DefaultNettype::Tri1 => NetKind::Tri1,
            DefaultNettype::Wand => NetKind::Wand,
            DefaultNettype::Wor => NetKind::Wor,
            DefaultNettype::Trireg => NetKind::Trireg,
            DefaultNettype::Uwire => NetKind::Uwire,
            DefaultNettype::None => return None,
        })
    }

    fn is_bits_argument(&self, reference: UhdmId) -> bool {
        let parent = self.design.serializer.get(reference).parent;
        if parent.is_bad() {
            return false;
        }
        let parent_object = self.design.serializer.get(parent);
        parent_object.kind == UhdmKind::SysFuncCall
            && &*self.symbols.text(parent_object.name) == "$bits"
    }

    fn retry_as_typespec(&self, reference: UhdmId, name: SymbolId) -> Option<UhdmId> {
        let mut scope = self.design.serializer.get(reference).parent;
        while !scope.is_bad() {
            let object = self.design.serializer.get(scope);
            if object.kind.is_scope() {
                if let Some(found) = self.find_in_scope(scope, name, true) {
                    return Some(found);
                }
            }
            scope = object.parent;
        }
        self.design.class_defs.get(&name).copied()
    }

    fn enclosing_module(&self, reference: UhdmId) -> Option<UhdmId> {
        let mut scope = self.design.serializer.get(reference).parent;
        while !scope.is_bad() {
            let object = self.design.serializer.get(scope);
            if matches!(object.kind, UhdmKind::Module | UhdmKind::Interface | UhdmKind::Program) {
                return Some(scope);
            }
            scope = object.parent;
        }
        None
    }

    // ---- reporting -------------------------------------------------------

    fn report_unresolved(&mut self) {
        let unresolved = self.collect_unresolved();
        for reference in unresolved {
            let (name, file, line, col) = {
                let object = self.design.serializer.get(reference);
                (object.name, object.file, object.start_line, object.start_col)
            };
            if self.is_exempt(reference, name) {
                continue;
            }
            // a member whose prefix resolved is an interface/member miss,
            // everything else is a plain bind failure
            let kind = match self.hier_path_prefix(reference) {
                Some(prefix) if !self.design.serializer.get(prefix).actual.is_bad() => {
                    ErrorKind::ElabUnknownInterfaceMember
                }
                _ => ErrorKind::UhdmFailedToBind,
            };
            self.errors.add(Diagnostic::new(kind, Location::new(file, line, col, name)));
        }
    }

    fn is_exempt(&self, reference: UhdmId, name: SymbolId) -> bool {
        let text = self.symbols.text(name);
        if &*text == "$root" {
            return true;
        }
        if self.is_member_exempt(name) && self.hier_path_prefix(reference).is_some() {
            return true;
        }
        // members of an unresolved prefix cannot be diagnosed independently
        if let Some(prefix) = self.hier_path_prefix(reference) {
            if self.design.serializer.get(prefix).actual.is_bad() {
                return true;
            }
        }
        // synthetic provenance is trusted
        if self.design.has_uvm && text.starts_with("uvm_") {
            return true;
        }
        false
    }

    /// Built-in methods that legally appear as unresolved members.
    fn is_member_exempt(&self, name: SymbolId) -> bool {
        matches!(&*self.symbols.text(name), "size" | "delete" | "num" | "exists" | "first" | "last")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Options, diagnostics::ErrorContainer, elaborator::CompileDesign, fs::PathId,
        parser, symbols::SymbolTable,
    };

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

        fn bind(&mut self, source: &str, nettype: DefaultNettype) -> Design {
            let (tree, issues) = parser::parse_source(PathId::BAD, source, &self.symbols);
            assert!(issues.is_empty(), "{issues:?}");
            let mut compiler = CompileDesign::new(&self.symbols, &self.options, &mut self.errors);
            compiler.compile(vec![tree]);
            compiler.elaborate();
            let mut design = compiler.into_design();
            let mut binder =
                ObjectBinder::new(&mut design, &self.symbols, &mut self.errors, nettype);
            binder.bind();
            design
        }
    }

    fn count_kind(design: &Design, kind: UhdmKind) -> usize {
        design.serializer.ids().filter(|&id| design.serializer.get(id).kind == kind).count()
    }

    #[test]
    fn binds_local_net_reference() {
        let mut harness = Harness::new();
        let design = harness.bind(
            "module top;\n  wire a;\n  wire b;\n  assign b = a;\nendmodule\n",
            DefaultNettype::Wire,
        );
        assert!(!harness.errors.contains(ErrorKind::UhdmFailedToBind), "{:?}", harness.errors);
        // every RefObj reachable from the root is bound
        let mut stack = vec![design.root];
        while let Some(id) = stack.pop() {
            let object = design.serializer.get(id);
            if object.kind == UhdmKind::RefObj {
                assert!(!object.actual.is_bad());
            }
            let children: Vec<UhdmId> = object.owned_children().collect();
            stack.extend(children);
        }
    }

    #[test]
    fn implicit_net_is_synthesized() {
        let mut harness = Harness::new();
        let design = harness.bind(
            "module top;\n  assign x = 1'b1;\nendmodule\n",
            DefaultNettype::Wire,
        );
        assert!(!harness.errors.contains(ErrorKind::UhdmFailedToBind), "{:?}", harness.errors);
        assert!(!harness.errors.contains(ErrorKind::ElabIllegalImplicitNet));
        // both the definition copy and the elaborated instance get one
        let nets: Vec<UhdmId> = design
            .serializer
            .ids()
            .filter(|&id| {
                let object = design.serializer.get(id);
                object.kind == UhdmKind::LogicNet
                    && &*harness.symbols.text(object.name) == "x"
            })
            .collect();
        assert!(!nets.is_empty());
        assert_eq!(design.serializer.get(nets[0]).detail, UhdmDetail::Net(NetKind::Wire));
    }

    #[test]
    fn default_nettype_none_is_an_error() {
        let mut harness = Harness::new();
        let _design = harness.bind(
            "module top;\n  assign x = 1'b1;\nendmodule\n",
            DefaultNettype::None,
        );
        assert!(harness.errors.contains(ErrorKind::ElabIllegalImplicitNet));
    }

    #[test]
    fn package_qualified_parameter_binds() {
        let mut harness = Harness::new();
        let design = harness.bind(
            "package p;\n  parameter W = 8;\nendpackage\n\
             module top;\n  wire [p::W-1:0] bus;\n  assign bus = 0;\nendmodule\n",
            DefaultNettype::Wire,
        );
        assert!(!harness.errors.contains(ErrorKind::UhdmFailedToBind), "{:?}", harness.errors);
        let _ = design;
    }

    #[test]
    fn class_inheritance_links_base_and_derived() {
        let mut harness = Harness::new();
        let design = harness.bind(
            "class base;\nendclass\nclass derived extends base;\nendclass\n\
             module top;\nendmodule\n",
            DefaultNettype::Wire,
        );
        let base = design.class_defs[&harness.symbols.get("base").unwrap()];
        let derived = design.class_defs[&harness.symbols.get("derived").unwrap()];
        let derived_list = design.serializer.get(base).owned(Collection::DerivedClasses);
        assert_eq!(derived_list, &[derived]);
        let extends = design.serializer.get(derived).owned(Collection::Extends)[0];
        assert_eq!(design.serializer.get(extends).actual, base);
    }

    #[test]
    fn unresolved_reference_is_reported() {
        let mut harness = Harness::new();
        let _design = harness.bind(
            "module top;\n  initial begin\n    y = no_such_task(1);\n  end\nendmodule\n",
            DefaultNettype::None,
        );
        assert!(
            harness.errors.contains(ErrorKind::UhdmFailedToBind)
                || harness.errors.contains(ErrorKind::ElabIllegalImplicitNet),
            "{:?}",
            harness.errors
        );
    }

    #[test]
    fn hierarchical_member_binds_through_instance() {
        let mut harness = Harness::new();
        let design = harness.bind(
            "module leaf;\n  wire w;\nendmodule\n\
             module top;\n  leaf u();\n  assign z = u.w;\nendmodule\n",
            DefaultNettype::Wire,
        );
        assert!(!harness.errors.contains(ErrorKind::UhdmFailedToBind), "{:?}", harness.errors);
        let _ = count_kind(&design, UhdmKind::HierPath);
    }
}
