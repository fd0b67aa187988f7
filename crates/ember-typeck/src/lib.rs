mod annotate;
mod captures;
pub mod error;
pub mod scope;
pub mod symbols;
pub mod types;
pub mod unify;

use ember_ast::{pretty_print_form, walk, ExprId, ExprKind, Module};
use la_arena::ArenaMap;
use smol_str::SmolStr;
use std::collections::HashMap;
use std::fmt::Write;

use crate::annotate::Annotator;
pub use crate::error::{TypeError, TypeErrorKind};
pub use crate::scope::{Binding, BindingId, BindingKind, Scope, ScopeMark};
pub use crate::symbols::{Symbol, SymbolTable};
pub use crate::types::{FnKind, Record, Ty, TyId, TypeStore};
pub use crate::unify::{Assignment, Checkpoint, Relation, Unifier};

// ── Results ──────────────────────────────────────────────────────

/// Per-node facts the backend reads.
#[derive(Default)]
pub struct Tables {
    /// Type of every node, fully substituted once its form has checked.
    pub types: ArenaMap<ExprId, TyId>,
    /// Binding of every identifier, assignment target and declaration site.
    pub bindings: ArenaMap<ExprId, BindingId>,
    /// Captured bindings of every function and lambda node, in layout order.
    pub captures: ArenaMap<ExprId, Vec<BindingId>>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SessionOptions {
    /// Attach the annotated tree and the solved assignments to each form.
    pub trace: bool,
}

#[derive(Debug, Clone)]
pub struct CheckedForm {
    pub form: ExprId,
    pub ty: TyId,
    /// Expression forms produce a value worth printing.
    pub is_expression: bool,
    /// Names bound by a declaration form, with their types.
    pub declarations: Vec<(SmolStr, TyId)>,
    pub trace: Option<String>,
}

/// Everything inference reads and writes, threaded through each pass.
pub(crate) struct InferCtx {
    pub(crate) symbols: SymbolTable,
    pub(crate) store: TypeStore,
    pub(crate) unifier: Unifier,
    pub(crate) scope: Scope,
    pub(crate) tables: Tables,
    pub(crate) datatypes: HashMap<Symbol, TyId>,
}

// ── Session ──────────────────────────────────────────────────────

/// Inference state for one REPL run. Forms are checked one at a time
/// against a single growing global scope; a form that fails leaves no
/// trace in the scope or the substitution.
pub struct Session {
    cx: InferCtx,
    options: SessionOptions,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionOptions::default())
    }
}

impl Session {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            cx: InferCtx {
                symbols: SymbolTable::new(),
                store: TypeStore::new(),
                unifier: Unifier::new(),
                scope: Scope::new(),
                tables: Tables::default(),
                datatypes: HashMap::new(),
            },
            options,
        }
    }

    /// Annotate, solve and analyze one top-level form of `module`.
    pub fn check_form(&mut self, module: &Module, form: ExprId) -> Result<CheckedForm, TypeError> {
        let mark = self.cx.scope.mark();
        let checkpoint = self.cx.unifier.checkpoint();
        match self.check_form_inner(module, form, checkpoint) {
            Ok(checked) => Ok(checked),
            Err(err) => {
                log::debug!("form rejected, rewinding: {}", err);
                self.cx.scope.rewind(mark);
                self.cx.unifier.rewind(&mut self.cx.store, checkpoint);
                Err(err)
            }
        }
    }

    fn check_form_inner(
        &mut self,
        module: &Module,
        form: ExprId,
        checkpoint: Checkpoint,
    ) -> Result<CheckedForm, TypeError> {
        let mut annotator = Annotator::new(module, &mut self.cx);
        let ty = annotator.annotate(form)?;
        let (sites, new_datatypes) = annotator.finish();

        self.cx.unifier.unify(&mut self.cx.store, &self.cx.symbols)?;

        for id in walk::preorder(&module.exprs, form) {
            if let Some(&node_ty) = self.cx.tables.types.get(id) {
                let resolved = self.cx.store.subst(node_ty);
                self.cx.tables.types.insert(id, resolved);
            }
        }
        let ty = self.cx.tables.types.get(form).copied().unwrap_or(ty);

        let is_expression = !module.exprs[form].kind.is_statement();
        if is_expression && self.cx.store.has_var(ty) {
            return Err(TypeError::new(
                TypeErrorKind::UnresolvedType(self.display_type(ty)),
                module.exprs[form].span,
            ));
        }

        captures::analyze(module, &self.cx.scope, &mut self.cx.tables, &sites);
        self.cx.datatypes.extend(new_datatypes);

        let declarations = self.declarations(module, form);
        let trace = self
            .options
            .trace
            .then(|| self.trace(module, form, checkpoint));
        Ok(CheckedForm {
            form,
            ty,
            is_expression,
            declarations,
            trace,
        })
    }

    fn declarations(&self, module: &Module, form: ExprId) -> Vec<(SmolStr, TyId)> {
        let binders: Vec<ExprId> = match &module.exprs[form].kind {
            ExprKind::VarDecl(items) => items.iter().map(|item| item.target).collect(),
            ExprKind::FnDecl { name, .. } | ExprKind::Datatype { name, .. } => vec![*name],
            _ => Vec::new(),
        };
        binders
            .into_iter()
            .filter_map(|binder| {
                let binding = self.binding(*self.cx.tables.bindings.get(binder)?);
                Some((self.symbol_name(binding.symbol).clone(), binding.ty))
            })
            .collect()
    }

    fn trace(&self, module: &Module, form: ExprId, checkpoint: Checkpoint) -> String {
        let mut out = pretty_print_form(module, form, |id| {
            self.cx
                .tables
                .types
                .get(id)
                .map(|&ty| self.display_type(ty))
        });
        out.push_str("assignments:\n");
        for assignment in self.cx.unifier.assignments_since(checkpoint) {
            if let Ty::Var(n) = self.cx.store.get(assignment.target) {
                let _ = writeln!(out, "  T{} := {}", n, self.display_type(assignment.value));
            }
        }
        out
    }

    // ── Queries ──────────────────────────────────────────────────

    pub fn expr_type(&self, id: ExprId) -> Option<TyId> {
        self.cx.tables.types.get(id).copied()
    }

    pub fn binding_of(&self, id: ExprId) -> Option<BindingId> {
        self.cx.tables.bindings.get(id).copied()
    }

    pub fn binding(&self, id: BindingId) -> &Binding {
        self.cx.scope.get(id)
    }

    pub fn is_global(&self, id: BindingId) -> bool {
        self.cx.scope.is_global(id)
    }

    /// Capture list of a function or lambda node.
    pub fn captures(&self, site: ExprId) -> &[BindingId] {
        self.cx
            .tables
            .captures
            .get(site)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn tables(&self) -> &Tables {
        &self.cx.tables
    }

    pub fn symbol_name(&self, sym: Symbol) -> &SmolStr {
        self.cx.symbols.name(sym)
    }

    /// Visible binding of `name` in the global scope.
    pub fn lookup(&self, name: &str) -> Option<BindingId> {
        let sym = self.cx.symbols.get(name)?;
        self.cx.scope.lookup(sym)
    }

    pub fn type_of(&self, name: &str) -> Option<String> {
        self.lookup(name)
            .map(|id| self.display_type(self.binding(id).ty))
    }

    pub fn display_type(&self, ty: TyId) -> String {
        self.cx.store.display(ty, &self.cx.symbols)
    }

    pub fn store(&self) -> &TypeStore {
        &self.cx.store
    }

    pub fn unifier(&self) -> &Unifier {
        &self.cx.unifier
    }
}

#[cfg(test)]
mod tests;
