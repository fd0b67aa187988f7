use la_arena::{Arena, Idx};
use std::collections::{HashMap, HashSet};
use std::fmt::Write;

use crate::symbols::{Symbol, SymbolTable};

// ── Types ────────────────────────────────────────────────────────

pub type TyId = Idx<Ty>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FnKind {
    /// Captures nothing; may be called directly.
    Function,
    /// Called through its captured environment.
    Closure,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ty {
    Nil,
    Bool,
    Int,
    Double,
    Str,
    Char,
    /// Unification variable. The number is only used for printing.
    Var(u32),
    Fn {
        kind: FnKind,
        params: Vec<TyId>,
        ret: TyId,
    },
    Tuple(Vec<TyId>),
    Array(TyId),
    Record(Record),
}

impl Ty {
    pub fn is_base(&self) -> bool {
        matches!(
            self,
            Ty::Nil | Ty::Bool | Ty::Int | Ty::Double | Ty::Str | Ty::Char
        )
    }
}

/// `owner: None` is an open record: a value with at least these slots.
/// `owner: Some(name)` is the closed record of datatype `name`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub owner: Option<Symbol>,
    pub slots: Vec<(Symbol, TyId)>,
}

impl Record {
    pub fn slot(&self, name: Symbol) -> Option<TyId> {
        self.slots
            .iter()
            .find(|(slot, _)| *slot == name)
            .map(|(_, ty)| *ty)
    }

    pub fn is_open(&self) -> bool {
        self.owner.is_none()
    }
}

#[derive(Clone, Copy, Debug)]
struct BaseTypes {
    nil: TyId,
    bool: TyId,
    int: TyId,
    double: TyId,
    str: TyId,
    char: TyId,
}

// ── Type store ───────────────────────────────────────────────────

/// Every type node lives here. Solved nodes are forwarded to their
/// solution; `find` follows forwards to the representative node.
#[derive(Debug)]
pub struct TypeStore {
    tys: Arena<Ty>,
    forward: HashMap<TyId, TyId>,
    next_var: u32,
    base: BaseTypes,
}

impl Default for TypeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeStore {
    pub fn new() -> Self {
        let mut tys = Arena::new();
        let base = BaseTypes {
            nil: tys.alloc(Ty::Nil),
            bool: tys.alloc(Ty::Bool),
            int: tys.alloc(Ty::Int),
            double: tys.alloc(Ty::Double),
            str: tys.alloc(Ty::Str),
            char: tys.alloc(Ty::Char),
        };
        Self {
            tys,
            forward: HashMap::new(),
            next_var: 0,
            base,
        }
    }

    pub fn nil(&self) -> TyId {
        self.base.nil
    }

    pub fn bool(&self) -> TyId {
        self.base.bool
    }

    pub fn int(&self) -> TyId {
        self.base.int
    }

    pub fn double(&self) -> TyId {
        self.base.double
    }

    pub fn str(&self) -> TyId {
        self.base.str
    }

    pub fn char(&self) -> TyId {
        self.base.char
    }

    /// Allocate a compound type. Base types are singletons and map back to
    /// their shared node.
    pub fn alloc(&mut self, ty: Ty) -> TyId {
        match ty {
            Ty::Nil => self.base.nil,
            Ty::Bool => self.base.bool,
            Ty::Int => self.base.int,
            Ty::Double => self.base.double,
            Ty::Str => self.base.str,
            Ty::Char => self.base.char,
            ty => self.tys.alloc(ty),
        }
    }

    pub fn fresh_var(&mut self) -> TyId {
        self.next_var += 1;
        self.tys.alloc(Ty::Var(self.next_var))
    }

    pub fn get(&self, id: TyId) -> &Ty {
        &self.tys[id]
    }

    /// Fill in a node allocated ahead of its contents (a datatype whose
    /// slots refer back to itself).
    pub(crate) fn replace(&mut self, id: TyId, ty: Ty) {
        self.tys[id] = ty;
    }

    /// Representative of `id` after all forwards.
    pub fn find(&self, mut id: TyId) -> TyId {
        while let Some(&next) = self.forward.get(&id) {
            id = next;
        }
        id
    }

    /// The node `id` currently stands for.
    pub fn resolve(&self, id: TyId) -> &Ty {
        &self.tys[self.find(id)]
    }

    pub(crate) fn set_forward(&mut self, from: TyId, to: TyId) {
        self.forward.insert(from, to);
    }

    pub(crate) fn clear_forward(&mut self, from: TyId) {
        self.forward.remove(&from);
    }

    /// Whether the structure reachable from `ty` mentions the node `needle`.
    /// Base types never do.
    pub fn contains(&self, ty: TyId, needle: TyId) -> bool {
        let mut visited = HashSet::new();
        self.contains_in(ty, self.find(needle), &mut visited)
    }

    fn contains_in(&self, ty: TyId, needle: TyId, visited: &mut HashSet<TyId>) -> bool {
        let ty = self.find(ty);
        if ty == needle {
            return true;
        }
        if !visited.insert(ty) {
            return false;
        }
        match &self.tys[ty] {
            Ty::Nil | Ty::Bool | Ty::Int | Ty::Double | Ty::Str | Ty::Char => false,
            Ty::Var(_) => false,
            Ty::Fn { params, ret, .. } => {
                params.iter().any(|&p| self.contains_in(p, needle, visited))
                    || self.contains_in(*ret, needle, visited)
            }
            Ty::Tuple(elems) => elems.iter().any(|&e| self.contains_in(e, needle, visited)),
            Ty::Array(elem) => self.contains_in(*elem, needle, visited),
            Ty::Record(record) => record
                .slots
                .iter()
                .any(|&(_, t)| self.contains_in(t, needle, visited)),
        }
    }

    /// Whether any unsolved variable is reachable from `ty`.
    pub fn has_var(&self, ty: TyId) -> bool {
        let mut visited = HashSet::new();
        self.has_var_in(ty, &mut visited)
    }

    fn has_var_in(&self, ty: TyId, visited: &mut HashSet<TyId>) -> bool {
        let ty = self.find(ty);
        if !visited.insert(ty) {
            return false;
        }
        match &self.tys[ty] {
            Ty::Var(_) => true,
            Ty::Fn { params, ret, .. } => {
                params.iter().any(|&p| self.has_var_in(p, visited)) || self.has_var_in(*ret, visited)
            }
            Ty::Tuple(elems) => elems.iter().any(|&e| self.has_var_in(e, visited)),
            Ty::Array(elem) => self.has_var_in(*elem, visited),
            Ty::Record(record) => record.slots.iter().any(|&(_, t)| self.has_var_in(t, visited)),
            _ => false,
        }
    }

    // ── Substitution ─────────────────────────────────────────────

    /// Copy of `ty` with every solved node replaced by its solution. The copy
    /// contains no forwarded nodes; cycles in the input stay cycles.
    pub fn subst(&mut self, ty: TyId) -> TyId {
        let mut done = HashMap::new();
        self.subst_in(ty, &mut done)
    }

    fn subst_in(&mut self, ty: TyId, done: &mut HashMap<TyId, TyId>) -> TyId {
        let ty = self.find(ty);
        if let Some(&copy) = done.get(&ty) {
            return copy;
        }
        let node = self.tys[ty].clone();
        if node.is_base() || matches!(node, Ty::Var(_)) {
            return ty;
        }
        // Reserve the copy first so a cycle back to `ty` lands on it.
        let copy = self.tys.alloc(Ty::Nil);
        done.insert(ty, copy);
        let rebuilt = match node {
            Ty::Fn { kind, params, ret } => Ty::Fn {
                kind,
                params: params.into_iter().map(|p| self.subst_in(p, done)).collect(),
                ret: self.subst_in(ret, done),
            },
            Ty::Tuple(elems) => {
                Ty::Tuple(elems.into_iter().map(|e| self.subst_in(e, done)).collect())
            }
            Ty::Array(elem) => Ty::Array(self.subst_in(elem, done)),
            Ty::Record(record) => Ty::Record(Record {
                owner: record.owner,
                slots: record
                    .slots
                    .into_iter()
                    .map(|(name, t)| (name, self.subst_in(t, done)))
                    .collect(),
            }),
            base => base,
        };
        self.tys[copy] = rebuilt;
        copy
    }

    /// Structural equality through forwards. Cyclic types compare equal when
    /// they unfold to the same infinite tree.
    pub fn equivalent(&self, a: TyId, b: TyId) -> bool {
        let mut assumed = HashSet::new();
        self.equivalent_in(a, b, &mut assumed)
    }

    fn equivalent_in(&self, a: TyId, b: TyId, assumed: &mut HashSet<(TyId, TyId)>) -> bool {
        let (a, b) = (self.find(a), self.find(b));
        if a == b || !assumed.insert((a, b)) {
            return true;
        }
        match (&self.tys[a], &self.tys[b]) {
            (Ty::Var(_), _) | (_, Ty::Var(_)) => false,
            (
                Ty::Fn {
                    kind: k1,
                    params: p1,
                    ret: r1,
                },
                Ty::Fn {
                    kind: k2,
                    params: p2,
                    ret: r2,
                },
            ) => {
                k1 == k2
                    && p1.len() == p2.len()
                    && p1
                        .iter()
                        .zip(p2)
                        .all(|(&x, &y)| self.equivalent_in(x, y, assumed))
                    && self.equivalent_in(*r1, *r2, assumed)
            }
            (Ty::Tuple(e1), Ty::Tuple(e2)) => {
                e1.len() == e2.len()
                    && e1
                        .iter()
                        .zip(e2)
                        .all(|(&x, &y)| self.equivalent_in(x, y, assumed))
            }
            (Ty::Array(e1), Ty::Array(e2)) => self.equivalent_in(*e1, *e2, assumed),
            (Ty::Record(r1), Ty::Record(r2)) => {
                r1.owner == r2.owner
                    && r1.slots.len() == r2.slots.len()
                    && r1.slots.iter().all(|&(name, t1)| match r2.slot(name) {
                        Some(t2) => self.equivalent_in(t1, t2, assumed),
                        None => false,
                    })
            }
            (x, y) => x.is_base() && x == y,
        }
    }

    // ── Printing ─────────────────────────────────────────────────

    pub fn display(&self, ty: TyId, symbols: &SymbolTable) -> String {
        let mut out = String::new();
        let mut visiting = Vec::new();
        self.write_ty(&mut out, ty, symbols, &mut visiting);
        out
    }

    fn write_ty(
        &self,
        out: &mut String,
        ty: TyId,
        symbols: &SymbolTable,
        visiting: &mut Vec<TyId>,
    ) {
        let ty = self.find(ty);
        let node = &self.tys[ty];
        match node {
            Ty::Nil => out.push_str("nil"),
            Ty::Bool => out.push_str("bool"),
            Ty::Int => out.push_str("int"),
            Ty::Double => out.push_str("double"),
            Ty::Str => out.push_str("string"),
            Ty::Char => out.push_str("char"),
            Ty::Var(n) => {
                let _ = write!(out, "T{}", n);
            }
            // Datatypes are nominal; their name is enough.
            Ty::Record(Record {
                owner: Some(owner), ..
            }) => out.push_str(symbols.name(*owner)),
            _ if visiting.contains(&ty) => out.push_str("..."),
            Ty::Fn { kind, params, ret } => {
                visiting.push(ty);
                out.push_str(match kind {
                    FnKind::Function => "fn(",
                    FnKind::Closure => "closure(",
                });
                self.write_list(out, params, symbols, visiting);
                out.push_str(") -> ");
                self.write_ty(out, *ret, symbols, visiting);
                visiting.pop();
            }
            Ty::Tuple(elems) => {
                visiting.push(ty);
                out.push('(');
                self.write_list(out, elems, symbols, visiting);
                out.push(')');
                visiting.pop();
            }
            Ty::Array(elem) => {
                visiting.push(ty);
                out.push('[');
                self.write_ty(out, *elem, symbols, visiting);
                out.push(']');
                visiting.pop();
            }
            Ty::Record(record) => {
                visiting.push(ty);
                out.push('{');
                for (i, (name, slot_ty)) in record.slots.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(symbols.name(*name));
                    out.push_str(": ");
                    self.write_ty(out, *slot_ty, symbols, visiting);
                }
                out.push('}');
                visiting.pop();
            }
        }
    }

    fn write_list(
        &self,
        out: &mut String,
        tys: &[TyId],
        symbols: &SymbolTable,
        visiting: &mut Vec<TyId>,
    ) {
        for (i, &ty) in tys.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            self.write_ty(out, ty, symbols, visiting);
        }
    }
}
