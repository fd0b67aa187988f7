use crate::{ExprId, ExprKind};

/// Direct children of a node in source order. Binder nodes of declarations
/// come before their initializers and bodies.
pub fn children(kind: &ExprKind) -> Vec<ExprId> {
    match kind {
        ExprKind::Lit(_)
        | ExprKind::Ident(_)
        | ExprKind::LValue(_)
        | ExprKind::Binder(_)
        | ExprKind::Break => Vec::new(),
        ExprKind::Unary { operand, .. } => vec![*operand],
        ExprKind::Postfix { target, .. } => vec![*target],
        ExprKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
        ExprKind::Assign { target, value } | ExprKind::CompoundAssign { target, value, .. } => {
            vec![*target, *value]
        }
        ExprKind::Call { callee, args } => {
            let mut out = vec![*callee];
            out.extend(args.iter().copied());
            out
        }
        ExprKind::Tuple(elems) | ExprKind::Array(elems) | ExprKind::Block(elems) => elems.clone(),
        ExprKind::Record(fields) => fields.iter().map(|f| f.value).collect(),
        ExprKind::Slot { target, .. } => vec![*target],
        ExprKind::Index { target, index } => vec![*target, *index],
        ExprKind::Lambda { params, body } => params.iter().chain(body.iter()).copied().collect(),
        ExprKind::IfExpr {
            cond,
            then_branch,
            else_branch,
        } => vec![*cond, *then_branch, *else_branch],
        ExprKind::VarDecl(items) => {
            let mut out = Vec::new();
            for item in items {
                out.push(item.target);
                out.extend(item.init);
            }
            out
        }
        ExprKind::FnDecl { name, params, body } => std::iter::once(*name)
            .chain(params.iter().copied())
            .chain(body.iter().copied())
            .collect(),
        ExprKind::Datatype { name, .. } => vec![*name],
        ExprKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            let mut out = vec![*cond, *then_branch];
            out.extend(*else_branch);
            out
        }
        ExprKind::While { cond, body } => vec![*cond, *body],
        ExprKind::Return(value) => value.iter().copied().collect(),
    }
}

/// Pre-order walk of the subtree rooted at `root`, including `root`.
pub fn preorder(exprs: &la_arena::Arena<crate::Expr>, root: ExprId) -> Vec<ExprId> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        out.push(id);
        let kids = children(&exprs[id].kind);
        stack.extend(kids.into_iter().rev());
    }
    out
}
