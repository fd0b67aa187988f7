use ember_ast::*;
use smol_str::SmolStr;

use crate::error::{TypeError, TypeErrorKind};
use crate::scope::{BindingId, BindingKind};
use crate::symbols::Symbol;
use crate::types::{FnKind, Record, Ty, TyId};
use crate::InferCtx;

// ── Annotator ────────────────────────────────────────────────────

struct FnFrame {
    site: ExprId,
    saw_return: bool,
    outer_loop_depth: u32,
}

/// One walk over a top-level form: assigns a type to every node, resolves
/// identifiers to bindings and queues the relations between types. Solving
/// them is left to the caller.
pub(crate) struct Annotator<'a> {
    module: &'a Module,
    cx: &'a mut InferCtx,
    functions: Vec<FnFrame>,
    loop_depth: u32,
    return_sym: Symbol,
    /// Function and lambda nodes seen, outermost first.
    sites: Vec<ExprId>,
    /// Datatypes declared by this form, committed only if it checks.
    new_datatypes: Vec<(Symbol, TyId)>,
}

impl<'a> Annotator<'a> {
    pub(crate) fn new(module: &'a Module, cx: &'a mut InferCtx) -> Self {
        let return_sym = cx.symbols.intern("return");
        Self {
            module,
            cx,
            functions: Vec::new(),
            loop_depth: 0,
            return_sym,
            sites: Vec::new(),
            new_datatypes: Vec::new(),
        }
    }

    pub(crate) fn finish(self) -> (Vec<ExprId>, Vec<(Symbol, TyId)>) {
        (self.sites, self.new_datatypes)
    }

    // ── Helpers ──────────────────────────────────────────────────

    fn fresh(&mut self) -> TyId {
        self.cx.store.fresh_var()
    }

    fn record(&mut self, id: ExprId, ty: TyId) -> TyId {
        self.cx.tables.types.insert(id, ty);
        ty
    }

    fn relate(&mut self, t1: TyId, t2: TyId, span: Span) {
        self.cx
            .unifier
            .push_relation(&mut self.cx.store, t1, t2, span);
    }

    /// Relate a value of type `actual` to the slot it flows into. A plain
    /// function flowing into a closure slot is viewed as a closure.
    fn flow(&mut self, expected: TyId, actual: TyId, span: Span) {
        self.cx
            .unifier
            .push_flow(&mut self.cx.store, expected, actual, span);
    }

    fn fresh_vars(&mut self, n: usize) -> Vec<TyId> {
        (0..n).map(|_| self.cx.store.fresh_var()).collect()
    }

    fn binder_name(&self, id: ExprId) -> (SmolStr, Span) {
        let expr = &self.module.exprs[id];
        let name = match &expr.kind {
            ExprKind::Binder(name) | ExprKind::Ident(name) | ExprKind::LValue(name) => {
                name.clone()
            }
            _ => SmolStr::default(),
        };
        (name, expr.span)
    }

    fn owner(&self) -> Option<ExprId> {
        self.functions.last().map(|f| f.site)
    }

    fn resolve_name(&mut self, name: &SmolStr, span: Span) -> Result<BindingId, TypeError> {
        let sym = self.cx.symbols.intern(name);
        self.cx
            .scope
            .lookup(sym)
            .ok_or_else(|| TypeError::new(TypeErrorKind::UnboundSymbol(name.clone()), span))
    }

    /// Same-scope redeclaration check. The global frame allows it.
    fn check_local_redefinition(&self, sym: Symbol, name: &SmolStr, span: Span) -> Result<(), TypeError> {
        if !self.cx.scope.at_global() && self.cx.scope.lookup_in_frame(sym).is_some() {
            return Err(TypeError::new(
                TypeErrorKind::LocalRedefinition(name.clone()),
                span,
            ));
        }
        Ok(())
    }

    fn declare(
        &mut self,
        binder: ExprId,
        sym: Symbol,
        ty: TyId,
        initialized: bool,
        kind: BindingKind,
        defining_ast: Option<ExprId>,
    ) -> BindingId {
        let owner = self.owner();
        let id = self
            .cx
            .scope
            .bind(sym, ty, initialized, kind, owner, defining_ast);
        self.cx.tables.bindings.insert(binder, id);
        self.record(binder, ty);
        id
    }

    // ── Expressions and statements ───────────────────────────────

    pub(crate) fn annotate(&mut self, id: ExprId) -> Result<TyId, TypeError> {
        let module = self.module;
        let expr = &module.exprs[id];
        let span = expr.span;

        let ty = match &expr.kind {
            ExprKind::Lit(lit) => match lit {
                Literal::Int(_) => self.cx.store.int(),
                Literal::Double(_) => self.cx.store.double(),
                Literal::Str(_) => self.cx.store.str(),
                Literal::Char(_) => self.cx.store.char(),
                Literal::Bool(_) => self.cx.store.bool(),
                Literal::Nil => self.cx.store.nil(),
            },

            ExprKind::Ident(name) => {
                let binding_id = self.resolve_name(name, span)?;
                let binding = self.cx.scope.get(binding_id);
                if !binding.initialized {
                    return Err(TypeError::new(
                        TypeErrorKind::UnboundSymbol(name.clone()),
                        span,
                    ));
                }
                let ty = binding.ty;
                self.cx.tables.bindings.insert(id, binding_id);
                ty
            }

            ExprKind::LValue(name) => {
                let binding_id = self.resolve_name(name, span)?;
                let binding = self.cx.scope.get(binding_id);
                if matches!(binding.kind, BindingKind::Function | BindingKind::Constructor) {
                    return Err(TypeError::new(
                        TypeErrorKind::AssignToFunction(name.clone()),
                        span,
                    ));
                }
                let ty = binding.ty;
                self.cx.scope.initialize(binding_id);
                self.cx.tables.bindings.insert(id, binding_id);
                ty
            }

            // Declaration sites are typed by the form that declares them.
            ExprKind::Binder(_) => match self.cx.tables.types.get(id) {
                Some(&ty) => ty,
                None => self.fresh(),
            },

            ExprKind::Unary { op, operand } => {
                let operand_ty = self.annotate(*operand)?;
                match op {
                    UnaryOp::Not => {
                        let bool_ty = self.cx.store.bool();
                        self.relate(bool_ty, operand_ty, span);
                        bool_ty
                    }
                    UnaryOp::Neg | UnaryOp::BitNot => operand_ty,
                }
            }

            ExprKind::Postfix { target, .. } => self.annotate_target(*target, true)?,

            ExprKind::Binary { op, lhs, rhs } => {
                // Right operand first.
                let rhs_ty = self.annotate(*rhs)?;
                let lhs_ty = self.annotate(*lhs)?;
                if op.is_logical() {
                    let bool_ty = self.cx.store.bool();
                    self.relate(bool_ty, lhs_ty, module.exprs[*lhs].span);
                    self.relate(bool_ty, rhs_ty, module.exprs[*rhs].span);
                    bool_ty
                } else {
                    self.relate(lhs_ty, rhs_ty, span);
                    if op.is_comparison() {
                        self.cx.store.bool()
                    } else {
                        lhs_ty
                    }
                }
            }

            ExprKind::Assign { target, value } => {
                let value_ty = self.annotate(*value)?;
                let target_ty = self.annotate_target(*target, false)?;
                self.flow(target_ty, value_ty, span);
                target_ty
            }

            ExprKind::CompoundAssign { target, value, .. } => {
                let value_ty = self.annotate(*value)?;
                let target_ty = self.annotate_target(*target, true)?;
                self.relate(target_ty, value_ty, span);
                target_ty
            }

            ExprKind::Call { callee, args } => self.annotate_call(*callee, args)?,

            ExprKind::Tuple(elems) => {
                let mut tys = Vec::with_capacity(elems.len());
                for &elem in elems {
                    tys.push(self.annotate(elem)?);
                }
                self.cx.store.alloc(Ty::Tuple(tys))
            }

            ExprKind::Array(elems) => {
                let elem_ty = self.fresh();
                for &elem in elems {
                    let ty = self.annotate(elem)?;
                    self.flow(elem_ty, ty, module.exprs[elem].span);
                }
                self.cx.store.alloc(Ty::Array(elem_ty))
            }

            ExprKind::Record(fields) => {
                let mut slots: Vec<(Symbol, TyId)> = Vec::with_capacity(fields.len());
                for field in fields {
                    let sym = self.cx.symbols.intern(&field.name);
                    if slots.iter().any(|(slot, _)| *slot == sym) {
                        return Err(TypeError::new(
                            TypeErrorKind::ImmediateRedefinition(field.name.clone()),
                            field.name_span,
                        ));
                    }
                    let ty = self.annotate(field.value)?;
                    slots.push((sym, ty));
                }
                self.cx.store.alloc(Ty::Record(Record { owner: None, slots }))
            }

            ExprKind::Slot { target, slot } => {
                let target_ty = self.annotate(*target)?;
                self.annotate_slot(target_ty, slot, span)?
            }

            ExprKind::Index { target, index } => {
                let target_ty = self.annotate(*target)?;
                let index_ty = self.annotate(*index)?;
                let elem_ty = self.fresh();
                let array_ty = self.cx.store.alloc(Ty::Array(elem_ty));
                self.relate(target_ty, array_ty, module.exprs[*target].span);
                let int_ty = self.cx.store.int();
                self.relate(int_ty, index_ty, module.exprs[*index].span);
                elem_ty
            }

            ExprKind::Lambda { params, body } => {
                let param_tys = self.fresh_vars(params.len());
                let ret = self.fresh();
                let ty = self.cx.store.alloc(Ty::Fn {
                    kind: FnKind::Closure,
                    params: param_tys.clone(),
                    ret,
                });
                self.annotate_function(id, params, &param_tys, ret, body)?;
                ty
            }

            ExprKind::IfExpr {
                cond,
                then_branch,
                else_branch,
            } => {
                self.annotate_condition(*cond)?;
                let then_ty = self.annotate(*then_branch)?;
                let else_ty = self.annotate(*else_branch)?;
                // Relations are solved last first: the then branch fixes the type.
                let ty = self.fresh();
                self.flow(ty, else_ty, module.exprs[*else_branch].span);
                self.flow(ty, then_ty, module.exprs[*then_branch].span);
                ty
            }

            ExprKind::VarDecl(items) => {
                self.annotate_var_decl(items)?;
                self.cx.store.nil()
            }

            ExprKind::FnDecl { name, params, body } => {
                self.annotate_fn_decl(id, *name, params, body)?;
                self.cx.store.nil()
            }

            ExprKind::Datatype { name, slots } => {
                self.annotate_datatype(id, *name, slots)?;
                self.cx.store.nil()
            }

            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.annotate_condition(*cond)?;
                self.annotate(*then_branch)?;
                if let Some(else_branch) = else_branch {
                    self.annotate(*else_branch)?;
                }
                self.cx.store.nil()
            }

            ExprKind::While { cond, body } => {
                self.annotate_condition(*cond)?;
                self.loop_depth += 1;
                self.annotate(*body)?;
                self.loop_depth -= 1;
                self.cx.store.nil()
            }

            ExprKind::Block(stmts) => {
                self.cx.scope.push_frame();
                for &stmt in stmts {
                    self.annotate(stmt)?;
                }
                self.cx.scope.pop_frame();
                self.cx.store.nil()
            }

            ExprKind::Break => {
                if self.loop_depth == 0 {
                    return Err(TypeError::new(TypeErrorKind::BreakOutsideLoop, span));
                }
                self.cx.store.nil()
            }

            ExprKind::Return(value) => {
                let ret_binding = self
                    .cx
                    .scope
                    .lookup(self.return_sym)
                    .ok_or_else(|| TypeError::new(TypeErrorKind::ReturnOutsideFunction, span))?;
                let ret_ty = self.cx.scope.get(ret_binding).ty;
                match value {
                    Some(value) => {
                        let value_ty = self.annotate(*value)?;
                        self.flow(ret_ty, value_ty, module.exprs[*value].span);
                    }
                    None => {
                        let nil = self.cx.store.nil();
                        self.relate(ret_ty, nil, span);
                    }
                }
                if let Some(frame) = self.functions.last_mut() {
                    frame.saw_return = true;
                }
                self.cx.store.nil()
            }
        };

        log::trace!(
            "{}:{} : {}",
            span.start,
            span.end,
            self.cx.store.display(ty, &self.cx.symbols)
        );
        Ok(self.record(id, ty))
    }

    fn annotate_condition(&mut self, cond: ExprId) -> Result<(), TypeError> {
        let span = self.module.exprs[cond].span;
        let cond_ty = self.annotate(cond)?;
        let bool_ty = self.cx.store.bool();
        self.relate(bool_ty, cond_ty, span);
        Ok(())
    }

    /// Assignment targets. Compound assignment and `++`/`--` read the
    /// target first, so it must already hold a value.
    fn annotate_target(&mut self, target: ExprId, reads_first: bool) -> Result<TyId, TypeError> {
        let module = self.module;
        let expr = &module.exprs[target];
        if let (true, ExprKind::LValue(name)) = (reads_first, &expr.kind) {
            let binding_id = self.resolve_name(name, expr.span)?;
            if !self.cx.scope.get(binding_id).initialized {
                return Err(TypeError::new(
                    TypeErrorKind::UnboundSymbol(name.clone()),
                    expr.span,
                ));
            }
        }
        self.annotate(target)
    }

    fn annotate_call(&mut self, callee: ExprId, args: &[ExprId]) -> Result<TyId, TypeError> {
        let module = self.module;
        let callee_ty = self.annotate(callee)?;
        let mut arg_tys = Vec::with_capacity(args.len());
        for &arg in args {
            arg_tys.push((self.annotate(arg)?, module.exprs[arg].span));
        }
        let callee_span = module.exprs[callee].span;

        match self.cx.store.resolve(callee_ty).clone() {
            Ty::Fn { params, ret, .. } => {
                if params.len() != args.len() {
                    return Err(TypeError::new(
                        TypeErrorKind::WrongArity {
                            callee: self.describe_callee(callee),
                            expected: params.len(),
                            found: args.len(),
                        },
                        callee_span,
                    ));
                }
                for (param, (arg_ty, arg_span)) in params.into_iter().zip(arg_tys) {
                    self.flow(param, arg_ty, arg_span);
                }
                Ok(ret)
            }
            // Nothing proves the callee captures nothing, so it is called
            // as a closure.
            _ => {
                let params = self.fresh_vars(args.len());
                let ret = self.fresh();
                let synthesized = self.cx.store.alloc(Ty::Fn {
                    kind: FnKind::Closure,
                    params: params.clone(),
                    ret,
                });
                self.relate(callee_ty, synthesized, callee_span);
                for (param, (arg_ty, arg_span)) in params.into_iter().zip(arg_tys) {
                    self.flow(param, arg_ty, arg_span);
                }
                Ok(ret)
            }
        }
    }

    fn describe_callee(&self, callee: ExprId) -> String {
        match (
            &self.module.exprs[callee].kind,
            self.cx.tables.bindings.get(callee),
        ) {
            (ExprKind::Ident(name), Some(&binding))
                if self.cx.scope.get(binding).kind == BindingKind::Constructor =>
            {
                format!("constructor {}", name)
            }
            (ExprKind::Ident(name), _) => format!("function '{}'", name),
            _ => "function".to_string(),
        }
    }

    fn annotate_slot(&mut self, target_ty: TyId, slot: &SmolStr, span: Span) -> Result<TyId, TypeError> {
        let sym = self.cx.symbols.intern(slot);
        if let Ty::Record(record) = self.cx.store.resolve(target_ty) {
            match (record.slot(sym), record.is_open()) {
                (Some(ty), _) => return Ok(ty),
                (None, false) => {
                    return Err(TypeError::new(
                        TypeErrorKind::NonexistentSlot {
                            slot: slot.clone(),
                            ty: self.cx.store.display(target_ty, &self.cx.symbols),
                        },
                        span,
                    ))
                }
                (None, true) => {}
            }
        }
        // Narrow the target toward a record that has at least this slot.
        let slot_ty = self.fresh();
        let probe = self.cx.store.alloc(Ty::Record(Record {
            owner: None,
            slots: vec![(sym, slot_ty)],
        }));
        self.relate(target_ty, probe, span);
        Ok(slot_ty)
    }

    // ── Declarations ─────────────────────────────────────────────

    fn annotate_var_decl(&mut self, items: &[VarItem]) -> Result<(), TypeError> {
        let module = self.module;
        let mut introduced: Vec<Symbol> = Vec::with_capacity(items.len());
        for item in items {
            let (name, name_span) = self.binder_name(item.target);
            let sym = self.cx.symbols.intern(&name);
            if introduced.contains(&sym) {
                return Err(TypeError::new(
                    TypeErrorKind::ImmediateRedefinition(name),
                    name_span,
                ));
            }
            self.check_local_redefinition(sym, &name, name_span)?;

            // The initializer is checked before its own name exists.
            let init_ty = match item.init {
                Some(init) => Some((self.annotate(init)?, module.exprs[init].span)),
                None => None,
            };
            let defining_ast = item
                .init
                .filter(|&init| matches!(module.exprs[init].kind, ExprKind::Lambda { .. }));
            let ty = self.fresh();
            self.declare(
                item.target,
                sym,
                ty,
                init_ty.is_some(),
                BindingKind::Variable,
                defining_ast,
            );
            if let Some((init_ty, init_span)) = init_ty {
                self.flow(ty, init_ty, init_span);
            }
            introduced.push(sym);
        }
        Ok(())
    }

    fn annotate_fn_decl(
        &mut self,
        site: ExprId,
        name: ExprId,
        params: &[ExprId],
        body: &[ExprId],
    ) -> Result<(), TypeError> {
        let (fn_name, name_span) = self.binder_name(name);
        let sym = self.cx.symbols.intern(&fn_name);
        self.check_local_redefinition(sym, &fn_name, name_span)?;

        let kind = if self.cx.scope.at_global() {
            FnKind::Function
        } else {
            FnKind::Closure
        };
        let param_tys = self.fresh_vars(params.len());
        let ret = self.fresh();
        let fn_ty = self.cx.store.alloc(Ty::Fn {
            kind,
            params: param_tys.clone(),
            ret,
        });
        // Bound before the body so the function can call itself.
        self.declare(name, sym, fn_ty, true, BindingKind::Function, Some(site));
        self.annotate_function(site, params, &param_tys, ret, body)
    }

    fn annotate_function(
        &mut self,
        site: ExprId,
        params: &[ExprId],
        param_tys: &[TyId],
        ret: TyId,
        body: &[ExprId],
    ) -> Result<(), TypeError> {
        self.sites.push(site);
        self.cx.scope.push_frame();
        self.functions.push(FnFrame {
            site,
            saw_return: false,
            outer_loop_depth: self.loop_depth,
        });
        self.loop_depth = 0;

        for (&param, &ty) in params.iter().zip(param_tys) {
            let (name, span) = self.binder_name(param);
            if name == "return" {
                return Err(TypeError::new(TypeErrorKind::ReservedWordAsParameter, span));
            }
            let sym = self.cx.symbols.intern(&name);
            if self.cx.scope.lookup_in_frame(sym).is_some() {
                return Err(TypeError::new(TypeErrorKind::LocalRedefinition(name), span));
            }
            self.declare(param, sym, ty, true, BindingKind::Variable, None);
        }
        let owner = self.owner();
        self.cx
            .scope
            .bind(self.return_sym, ret, true, BindingKind::Return, owner, None);

        for &stmt in body {
            self.annotate(stmt)?;
        }

        if let Some(frame) = self.functions.pop() {
            if !frame.saw_return {
                let nil = self.cx.store.nil();
                let span = self.module.exprs[site].span;
                self.relate(ret, nil, span);
            }
            self.loop_depth = frame.outer_loop_depth;
        }
        self.cx.scope.pop_frame();
        Ok(())
    }

    fn annotate_datatype(
        &mut self,
        site: ExprId,
        name: ExprId,
        slots: &[SlotDecl],
    ) -> Result<(), TypeError> {
        let (type_name, name_span) = self.binder_name(name);
        let sym = self.cx.symbols.intern(&type_name);
        self.check_local_redefinition(sym, &type_name, name_span)?;

        // Allocated empty first: slots may name the datatype itself.
        let record = self.cx.store.alloc(Ty::Record(Record {
            owner: Some(sym),
            slots: Vec::new(),
        }));
        let mut resolved: Vec<(Symbol, TyId)> = Vec::with_capacity(slots.len());
        for slot in slots {
            if slot.name == "return" {
                return Err(TypeError::new(
                    TypeErrorKind::ReservedWordAsParameter,
                    slot.name_span,
                ));
            }
            let slot_sym = self.cx.symbols.intern(&slot.name);
            if resolved.iter().any(|(s, _)| *s == slot_sym) {
                return Err(TypeError::new(
                    TypeErrorKind::ImmediateRedefinition(slot.name.clone()),
                    slot.name_span,
                ));
            }
            let ty = self.resolve_type_expr(slot.type_ann, sym, record)?;
            resolved.push((slot_sym, ty));
        }
        let params = resolved.iter().map(|&(_, ty)| ty).collect();
        self.cx.store.replace(
            record,
            Ty::Record(Record {
                owner: Some(sym),
                slots: resolved,
            }),
        );
        let ctor_ty = self.cx.store.alloc(Ty::Fn {
            kind: FnKind::Function,
            params,
            ret: record,
        });
        self.declare(name, sym, ctor_ty, true, BindingKind::Constructor, Some(site));
        self.new_datatypes.push((sym, record));
        Ok(())
    }

    fn resolve_type_expr(
        &mut self,
        id: TypeExprId,
        self_name: Symbol,
        self_ty: TyId,
    ) -> Result<TyId, TypeError> {
        let module = self.module;
        let type_expr = &module.type_exprs[id];
        match &type_expr.kind {
            TypeExprKind::Named(name) => {
                let ty = match name.as_str() {
                    "nil" => self.cx.store.nil(),
                    "bool" => self.cx.store.bool(),
                    "int" => self.cx.store.int(),
                    "double" => self.cx.store.double(),
                    "string" => self.cx.store.str(),
                    "char" => self.cx.store.char(),
                    _ => {
                        let sym = self.cx.symbols.intern(name);
                        if sym == self_name {
                            self_ty
                        } else {
                            self.lookup_datatype(sym).ok_or_else(|| {
                                TypeError::new(
                                    TypeErrorKind::UnknownType(name.clone()),
                                    type_expr.span,
                                )
                            })?
                        }
                    }
                };
                Ok(ty)
            }
            TypeExprKind::Array(elem) => {
                let elem = self.resolve_type_expr(*elem, self_name, self_ty)?;
                Ok(self.cx.store.alloc(Ty::Array(elem)))
            }
            TypeExprKind::Tuple(elems) => {
                let mut tys = Vec::with_capacity(elems.len());
                for &elem in elems {
                    tys.push(self.resolve_type_expr(elem, self_name, self_ty)?);
                }
                Ok(self.cx.store.alloc(Ty::Tuple(tys)))
            }
        }
    }

    fn lookup_datatype(&self, sym: Symbol) -> Option<TyId> {
        self.new_datatypes
            .iter()
            .rev()
            .find(|(name, _)| *name == sym)
            .map(|&(_, ty)| ty)
            .or_else(|| self.cx.datatypes.get(&sym).copied())
    }
}
