use ember_ast::{walk, ExprId, ExprKind, Module};
use std::collections::HashSet;

use crate::scope::{BindingId, Scope};
use crate::Tables;

/// Work out, for every function and lambda node in `sites`, which outer
/// local bindings its body refers to. The result is ordered by first
/// reference in a pre-order walk, without duplicates.
pub(crate) fn analyze(module: &Module, scope: &Scope, tables: &mut Tables, sites: &[ExprId]) {
    for &site in sites {
        let captures = captures_of(module, scope, tables, site);
        log::debug!("captures of {:?}: {:?}", site, captures);
        tables.captures.insert(site, captures);
    }
}

fn captures_of(module: &Module, scope: &Scope, tables: &Tables, site: ExprId) -> Vec<BindingId> {
    let nodes = walk::preorder(&module.exprs, site);
    // A binding owned by the site or by a function nested in it is local.
    let local_owners: HashSet<ExprId> = nodes
        .iter()
        .copied()
        .filter(|&id| {
            matches!(
                module.exprs[id].kind,
                ExprKind::Lambda { .. } | ExprKind::FnDecl { .. }
            )
        })
        .collect();

    let mut captures = Vec::new();
    for id in nodes {
        if !matches!(
            module.exprs[id].kind,
            ExprKind::Ident(_) | ExprKind::LValue(_)
        ) {
            continue;
        }
        let Some(&binding_id) = tables.bindings.get(id) else {
            continue;
        };
        if scope.is_global(binding_id) {
            continue;
        }
        let owned_inside = scope
            .get(binding_id)
            .owner
            .is_some_and(|owner| local_owners.contains(&owner));
        if !owned_inside && !captures.contains(&binding_id) {
            captures.push(binding_id);
        }
    }
    captures
}
