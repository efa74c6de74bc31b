//! Post-build model validation.
//!
//! Traverses the completed UHDM from the design root and checks the
//! structural invariants: ownership consistency, duplicate membership, null
//! actuals on references, empty names, missing file ids and source-range
//! containment. Every violation is a warning diagnostic; the checker never
//! aborts.
//!
//! Contents of the `builtin` package and, when present, the UVM library are
//! exempted from the stricter rules because their provenance is synthetic.

use crate::{
    diagnostics::{Diagnostic, ErrorContainer, ErrorKind, Location},
    elaborator::Design,
    symbols::{SymbolId, SymbolTable},
    uhdm::{Collection, UhdmId, UhdmKind},
};
use std::collections::HashSet;

/// Expected position of a child relative to its parent's span.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Relation {
    /// Child span nested within the parent span.
    Inside,
    /// Child begins at or after the parent's start (event-control bodies,
    /// trailing range typespecs).
    After,
    /// No positional relation (shared typespecs, synthetic assignments,
    /// cross-file instances).
    Any,
}

fn expected_relation(parent: UhdmKind, collection: Collection) -> Relation {
    match (parent, collection) {
        // the controlled statement follows the event expression
        (UhdmKind::EventControl, Collection::Stmts) => Relation::After,
        (UhdmKind::DelayControl, Collection::Stmts) => Relation::After,
        // queue/array dimension typespecs trail the variable name
        (UhdmKind::ArrayVar | UhdmKind::ArrayNet, Collection::Typespecs) => Relation::After,
        // shared, synthetic or cross-file children carry no constraint
        (_, Collection::Typespecs)
        | (_, Collection::ParamAssigns)
        | (_, Collection::Instances)
        | (_, Collection::Scopes)
        | (_, Collection::DerivedClasses)
        | (_, Collection::Nets) => Relation::Any,
        _ => Relation::Inside,
    }
}

/// Walks the design and validates it.
pub struct IntegrityChecker<'a> {
    design: &'a Design,
    symbols: &'a SymbolTable,
    errors: &'a mut ErrorContainer,
}

impl<'a> IntegrityChecker<'a> {
    pub fn new(design: &'a Design, symbols: &'a SymbolTable, errors: &'a mut ErrorContainer) -> Self {
        Self { design, symbols, errors }
    }

    #[instrument(skip_all, name = "integrity-check")]
    pub fn check(&mut self) {
        let mut owned_once: HashSet<UhdmId> = HashSet::new();
        let mut stack = vec![(self.design.root, false)];
        while let Some((id, exempt)) = stack.pop() {
            let object = self.design.serializer.get(id);
            let exempt = exempt || self.is_synthetic_scope(id);

            // ownership consistency, checked from the owner's side
            for (collection, children) in object.collections() {
                let mut seen_here: HashSet<UhdmId> = HashSet::new();
                for &child in children {
                    if !seen_here.insert(child) {
                        self.warn(ErrorKind::IntegrityDuplicateMember, child);
                    }
                    if !collection.is_ownership() {
                        continue;
                    }
                    if !owned_once.insert(child) {
                        self.warn(ErrorKind::IntegrityDuplicateMember, child);
                        continue;
                    }
                    let child_object = self.design.serializer.get(child);
                    if child_object.parent != id {
                        self.warn(ErrorKind::IntegrityMissingParent, child);
                    }
                    self.check_range(id, collection, child);
                    stack.push((child, exempt));
                }
            }

            if exempt || id == self.design.root {
                continue;
            }

            if object.parent.is_bad() {
                self.warn(ErrorKind::IntegrityMissingParent, id);
            }
            if object.kind.is_reference() {
                if object.actual.is_bad() && !self.is_actual_exempt(id) {
                    self.warn(ErrorKind::IntegrityNullActual, id);
                }
                if object.name.is_bad() && !self.is_unnamed_exempt(id) {
                    self.errors.add(Diagnostic::new(
                        ErrorKind::IntegrityEmptyName,
                        self.location(id),
                    ));
                }
            }
            if object.file.is_bad() && !matches!(object.kind, UhdmKind::Constant) {
                self.warn(ErrorKind::IntegrityMissingFile, id);
            }
        }
    }

    fn warn(&mut self, kind: ErrorKind, id: UhdmId) {
        self.errors.add(Diagnostic::new(kind, self.location(id)));
    }

    fn location(&self, id: UhdmId) -> Location {
        let object = self.design.serializer.get(id);
        Location::new(object.file, object.start_line, object.start_col, object.name)
    }

    fn check_range(&mut self, parent: UhdmId, collection: Collection, child: UhdmId) {
        let parent_object = self.design.serializer.get(parent);
        let child_object = self.design.serializer.get(child);
        // only comparable within one file with real positions
        if parent_object.file != child_object.file
            || parent_object.file.is_bad()
            || parent_object.start_line == 0
            || child_object.start_line == 0
        {
            return;
        }
        let parent_start = (parent_object.start_line, parent_object.start_col);
        let parent_end = (parent_object.end_line, parent_object.end_col);
        let child_start = (child_object.start_line, child_object.start_col);
        let child_end = (child_object.end_line, child_object.end_col);
        let ok = match expected_relation(parent_object.kind, collection) {
            Relation::Any => true,
            Relation::After => child_start >= parent_start,
            Relation::Inside => child_start >= parent_start && child_end <= parent_end,
        };
        if !ok {
            self.warn(ErrorKind::IntegrityBadRange, child);
        }
    }

    /// Scopes whose contents are synthetic: the `builtin` package, and the
    /// UVM library when it is part of the design.
    fn is_synthetic_scope(&self, id: UhdmId) -> bool {
        let object = self.design.serializer.get(id);
        if object.kind != UhdmKind::Package {
            return false;
        }
        let name = self.symbols.text(object.name);
        &*name == "builtin" || (self.design.has_uvm && &*name == "uvm_pkg")
    }

    fn is_actual_exempt(&self, id: UhdmId) -> bool {
        let object = self.design.serializer.get(id);
        let name = self.symbols.text(object.name);
        if &*name == "$root" {
            return true;
        }
        // built-in methods on hierarchical paths resolve dynamically
        if matches!(&*name, "size" | "delete" | "num" | "exists" | "first" | "last") {
            let parent = object.parent;
            if !parent.is_bad()
                && self.design.serializer.get(parent).kind == UhdmKind::HierPath
            {
                return true;
            }
        }
        // an unresolved module reference may target a library unit supplied
        // downstream; the binder reported it already
        if object.kind == UhdmKind::RefModule {
            return true;
        }
        // a member of an unresolved prefix was already counted through it
        !parent_is_resolved_hier(self, id)
    }

    fn is_unnamed_exempt(&self, id: UhdmId) -> bool {
        // the anonymous return reference of a constructor
        let parent = self.design.serializer.get(id).parent;
        if parent.is_bad() {
            return false;
        }
        let parent_object = self.design.serializer.get(parent);
        parent_object.kind == UhdmKind::Function
            && &*self.symbols.text(parent_object.name) == "new"
    }
}

fn parent_is_resolved_hier(checker: &IntegrityChecker<'_>, id: UhdmId) -> bool {
    let parent = checker.design.serializer.get(id).parent;
    if parent.is_bad() {
        return true;
    }
    let parent_object = checker.design.serializer.get(parent);
    if parent_object.kind != UhdmKind::HierPath {
        return true;
    }
    parent_object
        .owned(Collection::Operands)
        .first()
        .map(|&head| !checker.design.serializer.get(head).actual.is_bad())
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uhdm::ConstValue;

    fn fresh() -> (Design, SymbolTable, ErrorContainer) {
        (Design::new(), SymbolTable::new(), ErrorContainer::new())
    }

    fn place(design: &mut Design, id: UhdmId) {
        let object = design.serializer.get_mut(id);
        object.file = crate::fs::PathId(1);
        object.start_line = 1;
        object.end_line = 1;
    }

    #[test]
    fn clean_tree_passes() {
        let (mut design, symbols, mut errors) = fresh();
        let module = design.serializer.make(UhdmKind::Module);
        design.serializer.get_mut(module).name = symbols.register("m");
        place(&mut design, module);
        let net = design.serializer.make(UhdmKind::LogicNet);
        design.serializer.get_mut(net).name = symbols.register("w");
        place(&mut design, net);
        let root = design.root;
        design.serializer.own(root, Collection::Scopes, module);
        design.serializer.own(module, Collection::Nets, net);
        IntegrityChecker::new(&design, &symbols, &mut errors).check();
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn duplicate_membership_is_flagged() {
        let (mut design, symbols, mut errors) = fresh();
        let module = design.serializer.make(UhdmKind::Module);
        place(&mut design, module);
        let net = design.serializer.make(UhdmKind::LogicNet);
        design.serializer.get_mut(net).name = symbols.register("w");
        place(&mut design, net);
        let root = design.root;
        design.serializer.own(root, Collection::Scopes, module);
        design.serializer.own(module, Collection::Nets, net);
        design.serializer.own(module, Collection::Nets, net);
        IntegrityChecker::new(&design, &symbols, &mut errors).check();
        assert!(errors.contains(ErrorKind::IntegrityDuplicateMember));
    }

    #[test]
    fn broken_backlink_is_flagged() {
        let (mut design, symbols, mut errors) = fresh();
        let module = design.serializer.make(UhdmKind::Module);
        place(&mut design, module);
        let net = design.serializer.make(UhdmKind::LogicNet);
        design.serializer.get_mut(net).name = symbols.register("w");
        place(&mut design, net);
        let root = design.root;
        design.serializer.own(root, Collection::Scopes, module);
        design.serializer.own(module, Collection::Nets, net);
        // corrupt the backlink
        design.serializer.get_mut(net).parent = UhdmId::BAD;
        IntegrityChecker::new(&design, &symbols, &mut errors).check();
        assert!(errors.contains(ErrorKind::IntegrityMissingParent));
    }

    #[test]
    fn null_actual_is_flagged() {
        let (mut design, symbols, mut errors) = fresh();
        let module = design.serializer.make(UhdmKind::Module);
        place(&mut design, module);
        let reference = design.serializer.make(UhdmKind::RefObj);
        design.serializer.get_mut(reference).name = symbols.register("missing");
        place(&mut design, reference);
        let root = design.root;
        design.serializer.own(root, Collection::Scopes, module);
        design.serializer.own(module, Collection::Variables, reference);
        IntegrityChecker::new(&design, &symbols, &mut errors).check();
        assert!(errors.contains(ErrorKind::IntegrityNullActual));
    }

    #[test]
    fn root_exemption_applies() {
        let (mut design, symbols, mut errors) = fresh();
        let module = design.serializer.make(UhdmKind::Module);
        place(&mut design, module);
        let reference = design.serializer.make(UhdmKind::RefObj);
        design.serializer.get_mut(reference).name = symbols.register("$root");
        place(&mut design, reference);
        let root = design.root;
        design.serializer.own(root, Collection::Scopes, module);
        design.serializer.own(module, Collection::Variables, reference);
        IntegrityChecker::new(&design, &symbols, &mut errors).check();
        assert!(!errors.contains(ErrorKind::IntegrityNullActual));
    }

    #[test]
    fn span_escape_is_flagged() {
        let (mut design, symbols, mut errors) = fresh();
        let module = design.serializer.make(UhdmKind::Module);
        design.serializer.get_mut(module).name = symbols.register("m");
        {
            let object = design.serializer.get_mut(module);
            object.file = crate::fs::PathId(1);
            object.start_line = 1;
            object.end_line = 5;
        }
        let process = design.serializer.make(UhdmKind::Initial);
        {
            let object = design.serializer.get_mut(process);
            object.file = crate::fs::PathId(1);
            object.start_line = 9;
            object.end_line = 10;
        }
        let root = design.root;
        design.serializer.own(root, Collection::Scopes, module);
        design.serializer.own(module, Collection::Processes, process);
        IntegrityChecker::new(&design, &symbols, &mut errors).check();
        assert!(errors.contains(ErrorKind::IntegrityBadRange));
    }

    #[test]
    fn builtin_package_contents_are_exempt() {
        let (mut design, symbols, mut errors) = fresh();
        let package = design.serializer.make(UhdmKind::Package);
        design.serializer.get_mut(package).name = symbols.register("builtin");
        place(&mut design, package);
        let reference = design.serializer.make(UhdmKind::RefObj);
        design.serializer.get_mut(reference).name = symbols.register("process");
        let root = design.root;
        design.serializer.own(root, Collection::Scopes, package);
        design.serializer.own(package, Collection::Variables, reference);
        IntegrityChecker::new(&design, &symbols, &mut errors).check();
        assert!(!errors.contains(ErrorKind::IntegrityNullActual));
        assert!(!errors.contains(ErrorKind::IntegrityMissingFile));
    }

    #[test]
    fn constants_do_not_need_files() {
        let (mut design, symbols, mut errors) = fresh();
        let module = design.serializer.make(UhdmKind::Module);
        place(&mut design, module);
        let parameter = design.serializer.make(UhdmKind::Parameter);
        design.serializer.get_mut(parameter).name = symbols.register("W");
        design.serializer.get_mut(parameter).value = ConstValue::Int(8);
        place(&mut design, parameter);
        let constant = design.serializer.make(UhdmKind::Constant);
        design.serializer.get_mut(constant).value = ConstValue::Int(8);
        let root = design.root;
        design.serializer.own(root, Collection::Scopes, module);
        design.serializer.own(module, Collection::Parameters, parameter);
        design.serializer.own(parameter, Collection::Operands, constant);
        IntegrityChecker::new(&design, &symbols, &mut errors).check();
        assert!(!errors.contains(ErrorKind::IntegrityMissingFile), "{errors:?}");
    }
}
