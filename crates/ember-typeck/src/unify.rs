use ember_lexer::Span;

use crate::error::{TypeError, TypeErrorKind};
use crate::symbols::SymbolTable;
use crate::types::{FnKind, Record, Ty, TyId, TypeStore};

/// An equality obligation between two types.
#[derive(Clone, Copy, Debug)]
pub struct Relation {
    pub t1: TyId,
    pub t2: TyId,
    pub span: Span,
    /// A value of type `t2` flows into a slot of type `t1`, so a plain
    /// function may stand in for a closure.
    pub coerce: bool,
}

/// One solved step: `target` now stands for `value`.
#[derive(Clone, Copy, Debug)]
pub struct Assignment {
    pub target: TyId,
    pub value: TyId,
}

/// Position in the assignment list to roll back to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint(usize);

/// Pending relations plus the list of solved assignments. The assignment
/// list is the substitution: each entry is a forward in the type store,
/// and undoing entries undoes the forwards.
#[derive(Debug, Default)]
pub struct Unifier {
    pending: Vec<Relation>,
    assignments: Vec<Assignment>,
}

impl Unifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.assignments.len())
    }

    /// Drop every assignment made since `checkpoint` along with anything
    /// still pending.
    pub fn rewind(&mut self, store: &mut TypeStore, checkpoint: Checkpoint) {
        self.pending.clear();
        while self.assignments.len() > checkpoint.0 {
            if let Some(assignment) = self.assignments.pop() {
                store.clear_forward(assignment.target);
            }
        }
    }

    pub fn pending(&self) -> &[Relation] {
        &self.pending
    }

    /// Solved assignments, most recent first.
    pub fn assignments(&self) -> impl Iterator<Item = &Assignment> {
        self.assignments.iter().rev()
    }

    /// Assignments made since `checkpoint`, oldest first.
    pub fn assignments_since(&self, checkpoint: Checkpoint) -> &[Assignment] {
        &self.assignments[checkpoint.0.min(self.assignments.len())..]
    }

    /// Queue `t1 = t2`. Two open records are merged on the spot.
    pub fn push_relation(&mut self, store: &mut TypeStore, t1: TyId, t2: TyId, span: Span) {
        self.push(store, t1, t2, span, false);
    }

    /// Queue a value of type `actual` flowing into a slot of type
    /// `expected`. Whether a function becomes a closure is settled while
    /// solving, once both sides are known.
    pub fn push_flow(&mut self, store: &mut TypeStore, expected: TyId, actual: TyId, span: Span) {
        self.push(store, expected, actual, span, true);
    }

    fn push(&mut self, store: &mut TypeStore, t1: TyId, t2: TyId, span: Span, coerce: bool) {
        let (a, b) = (store.find(t1), store.find(t2));
        if a == b {
            return;
        }
        if is_open_record(store, a) && is_open_record(store, b) {
            self.merge_open_records(store, a, b, span);
        } else {
            self.pending.push(Relation {
                t1,
                t2,
                span,
                coerce,
            });
        }
    }

    /// Union the slots of two open records into a new open record and
    /// forward both inputs to it. Slots present in both must agree.
    pub fn merge_open_records(
        &mut self,
        store: &mut TypeStore,
        r1: TyId,
        r2: TyId,
        span: Span,
    ) -> TyId {
        let (r1, r2) = (store.find(r1), store.find(r2));
        if r1 == r2 {
            return r1;
        }
        let (Ty::Record(left), Ty::Record(right)) = (store.get(r1).clone(), store.get(r2).clone())
        else {
            self.push_relation(store, r1, r2, span);
            return r1;
        };

        let mut slots = left.slots;
        let mut shared = Vec::new();
        for (name, ty) in right.slots {
            match slots.iter().find(|(slot, _)| *slot == name) {
                Some(&(_, existing)) => shared.push((existing, ty)),
                None => slots.push((name, ty)),
            }
        }
        let merged = store.alloc(Ty::Record(Record { owner: None, slots }));
        self.assign(store, r1, merged);
        self.assign(store, r2, merged);
        for (existing, ty) in shared {
            self.push_relation(store, existing, ty, span);
        }
        merged
    }

    /// Solve everything pending.
    ///
    /// A flow whose sides are not yet known waits until the other
    /// relations have been solved. Flows nothing else decides fall back to
    /// plain equality, oldest first.
    pub fn unify(&mut self, store: &mut TypeStore, symbols: &SymbolTable) -> Result<(), TypeError> {
        let mut waiting: Vec<Relation> = Vec::new();
        let mut coerced: Vec<(TyId, TyId)> = Vec::new();
        loop {
            while let Some(relation) = self.pending.pop() {
                if relation.coerce && undecided_flow(store, &relation) {
                    waiting.push(relation);
                    continue;
                }
                self.solve(store, symbols, relation, &mut coerced)?;
            }
            if waiting.is_empty() {
                return Ok(());
            }
            let view: &TypeStore = store;
            let (ready, still): (Vec<Relation>, Vec<Relation>) = waiting
                .into_iter()
                .partition(|relation| !undecided_flow(view, relation));
            waiting = still;
            if ready.is_empty() {
                let mut oldest = waiting.remove(0);
                log::trace!("flow undecided, relating as equal");
                oldest.coerce = false;
                self.pending.push(oldest);
            } else {
                // Pushed in reverse so they are solved oldest first.
                self.pending.extend(ready.into_iter().rev());
            }
        }
    }

    fn solve(
        &mut self,
        store: &mut TypeStore,
        symbols: &SymbolTable,
        relation: Relation,
        coerced: &mut Vec<(TyId, TyId)>,
    ) -> Result<(), TypeError> {
        let Relation { span, .. } = relation;
        let a = store.find(relation.t1);
        let b = store.find(relation.t2);
        if a == b {
            return Ok(());
        }
        log::trace!(
            "solve {} = {}",
            store.display(a, symbols),
            store.display(b, symbols)
        );

        let mismatch = |store: &TypeStore| TypeError {
            kind: TypeErrorKind::TypeMismatch {
                expected: store.display(a, symbols),
                found: store.display(b, symbols),
            },
            span,
        };

        match (store.get(a).clone(), store.get(b).clone()) {
            (Ty::Var(_), _) => self.bind_var(store, symbols, a, b),
            (_, Ty::Var(_)) => self.bind_var(store, symbols, b, a),
            (
                Ty::Fn {
                    kind: FnKind::Closure,
                    params: p1,
                    ret: r1,
                },
                Ty::Fn {
                    kind: FnKind::Function,
                    params: p2,
                    ret: r2,
                },
            ) if relation.coerce && p1.len() == p2.len() => {
                // The function is used as a closure; the two types stay distinct.
                if coerced.contains(&(a, b)) {
                    return Ok(());
                }
                coerced.push((a, b));
                log::trace!(
                    "function coerced to closure at {}:{}",
                    span.start,
                    span.end
                );
                self.push_flow(store, r1, r2, span);
                for (x, y) in p1.into_iter().zip(p2) {
                    self.push_relation(store, x, y, span);
                }
            }
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
                if k1 != k2 || p1.len() != p2.len() {
                    return Err(mismatch(&*store));
                }
                // Forward before descending so cyclic types terminate.
                self.assign(store, a, b);
                self.push_relation(store, r1, r2, span);
                for (x, y) in p1.into_iter().zip(p2) {
                    self.push_relation(store, x, y, span);
                }
            }
            (Ty::Tuple(e1), Ty::Tuple(e2)) => {
                if e1.len() != e2.len() {
                    return Err(mismatch(&*store));
                }
                self.assign(store, a, b);
                for (x, y) in e1.into_iter().zip(e2) {
                    self.push_relation(store, x, y, span);
                }
            }
            (Ty::Array(e1), Ty::Array(e2)) => {
                self.assign(store, a, b);
                self.push_relation(store, e1, e2, span);
            }
            (Ty::Record(r1), Ty::Record(r2)) => match (r1.owner, r2.owner) {
                (None, None) => {
                    self.merge_open_records(store, a, b, span);
                }
                (Some(o1), Some(o2)) => {
                    if o1 != o2 || r1.slots.len() != r2.slots.len() {
                        return Err(mismatch(&*store));
                    }
                    let mut pairs = Vec::new();
                    for &(name, t1) in &r1.slots {
                        match r2.slot(name) {
                            Some(t2) => pairs.push((t1, t2)),
                            None => return Err(mismatch(&*store)),
                        }
                    }
                    self.assign(store, a, b);
                    for (x, y) in pairs {
                        self.push_relation(store, x, y, span);
                    }
                }
                (Some(_), None) => self.widen(store, symbols, b, &r2, a, &r1, span)?,
                (None, Some(_)) => self.widen(store, symbols, a, &r1, b, &r2, span)?,
            },
            (x, y) if x.is_base() && x == y => {}
            _ => return Err(mismatch(&*store)),
        }
        Ok(())
    }

    /// Solve variable `var` as `ty`. A `ty` that mentions `var` is a
    /// recursive type: the forward ties the knot.
    fn bind_var(&mut self, store: &mut TypeStore, symbols: &SymbolTable, var: TyId, ty: TyId) {
        if store.contains(ty, var) {
            log::debug!(
                "recursive type: {} = {}",
                store.display(var, symbols),
                store.display(ty, symbols)
            );
        }
        self.assign(store, var, ty);
    }

    /// Give an open record the shape of a closed one. Every slot the open
    /// record asks for must exist in the datatype.
    #[allow(clippy::too_many_arguments)]
    fn widen(
        &mut self,
        store: &mut TypeStore,
        symbols: &SymbolTable,
        open_id: TyId,
        open: &Record,
        closed_id: TyId,
        closed: &Record,
        span: Span,
    ) -> Result<(), TypeError> {
        let mut pairs = Vec::new();
        for &(name, ty) in &open.slots {
            match closed.slot(name) {
                Some(slot_ty) => pairs.push((ty, slot_ty)),
                None => {
                    return Err(TypeError {
                        kind: TypeErrorKind::NonexistentSlot {
                            slot: symbols.name(name).clone(),
                            ty: store.display(closed_id, symbols),
                        },
                        span,
                    })
                }
            }
        }
        self.assign(store, open_id, closed_id);
        for (x, y) in pairs {
            self.push_relation(store, x, y, span);
        }
        Ok(())
    }

    fn assign(&mut self, store: &mut TypeStore, target: TyId, value: TyId) {
        store.set_forward(target, value);
        self.assignments.push(Assignment { target, value });
    }
}

/// A flow is undecided while a variable on one side could still turn out
/// to be the function or the closure that makes coercion apply.
fn undecided_flow(store: &TypeStore, relation: &Relation) -> bool {
    let expected = store.get(store.find(relation.t1));
    let actual = store.get(store.find(relation.t2));
    matches!(
        (expected, actual),
        (Ty::Var(_), Ty::Var(_))
            | (
                Ty::Var(_),
                Ty::Fn {
                    kind: FnKind::Function,
                    ..
                }
            )
            | (
                Ty::Fn {
                    kind: FnKind::Closure,
                    ..
                },
                Ty::Var(_)
            )
    )
}

fn is_open_record(store: &TypeStore, ty: TyId) -> bool {
    matches!(store.get(ty), Ty::Record(record) if record.is_open())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        symbols: SymbolTable,
        store: TypeStore,
        unifier: Unifier,
        relations: Vec<(TyId, TyId)>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                symbols: SymbolTable::new(),
                store: TypeStore::new(),
                unifier: Unifier::new(),
                relations: Vec::new(),
            }
        }

        fn open(&mut self, slots: &[(&str, TyId)]) -> TyId {
            let slots = slots
                .iter()
                .map(|(name, ty)| (self.symbols.intern(name), *ty))
                .collect();
            self.store.alloc(Ty::Record(Record { owner: None, slots }))
        }

        fn relate(&mut self, t1: TyId, t2: TyId) {
            self.relations.push((t1, t2));
            self.unifier
                .push_relation(&mut self.store, t1, t2, Span::default());
        }

        fn unify(&mut self) -> Result<(), TypeError> {
            self.unifier.unify(&mut self.store, &self.symbols)
        }

        fn show(&self, ty: TyId) -> String {
            self.store.display(ty, &self.symbols)
        }

        fn assert_sound(&mut self) {
            for (t1, t2) in self.relations.clone() {
                let s1 = self.store.subst(t1);
                let s2 = self.store.subst(t2);
                assert!(
                    self.store.equivalent(s1, s2),
                    "{} != {}",
                    self.show(s1),
                    self.show(s2)
                );
            }
        }
    }

    #[test]
    fn var_solved_by_base() {
        let mut fx = Fixture::new();
        let v = fx.store.fresh_var();
        let int = fx.store.int();
        fx.relate(v, int);
        fx.unify().unwrap();
        assert_eq!(fx.show(v), "int");
        assert!(fx.unifier.pending().is_empty());
        fx.assert_sound();
    }

    #[test]
    fn base_mismatch() {
        let mut fx = Fixture::new();
        let (int, double) = (fx.store.int(), fx.store.double());
        fx.relate(int, double);
        let err = fx.unify().unwrap_err();
        insta::assert_snapshot!(err.kind.to_string(), @"type mismatch: expected int, found double");
    }

    #[test]
    fn function_and_closure_do_not_unify() {
        let mut fx = Fixture::new();
        let int = fx.store.int();
        let f = fx.store.alloc(Ty::Fn {
            kind: FnKind::Function,
            params: vec![int],
            ret: int,
        });
        let c = fx.store.alloc(Ty::Fn {
            kind: FnKind::Closure,
            params: vec![int],
            ret: int,
        });
        fx.relate(f, c);
        let err = fx.unify().unwrap_err();
        insta::assert_snapshot!(err.kind.to_string(), @"type mismatch: expected fn(int) -> int, found closure(int) -> int");
    }

    fn int_fn(fx: &mut Fixture, kind: FnKind) -> TyId {
        let int = fx.store.int();
        fx.store.alloc(Ty::Fn {
            kind,
            params: vec![int],
            ret: int,
        })
    }

    #[test]
    fn function_flows_into_closure_slot_solved_later() {
        let mut fx = Fixture::new();
        let slot = fx.store.fresh_var();
        let f = int_fn(&mut fx, FnKind::Function);
        let c = int_fn(&mut fx, FnKind::Closure);
        fx.relate(slot, c);
        // Solved first, while the slot is still a variable.
        fx.unifier
            .push_flow(&mut fx.store, slot, f, Span::default());
        fx.unify().unwrap();
        assert_eq!(fx.show(slot), "closure(int) -> int");
        assert_eq!(fx.show(f), "fn(int) -> int");
        assert!(fx.unifier.pending().is_empty());
    }

    #[test]
    fn undecided_flow_falls_back_to_equality() {
        let mut fx = Fixture::new();
        let slot = fx.store.fresh_var();
        let f = int_fn(&mut fx, FnKind::Function);
        fx.unifier
            .push_flow(&mut fx.store, slot, f, Span::default());
        fx.unify().unwrap();
        assert_eq!(fx.show(slot), "fn(int) -> int");
    }

    #[test]
    fn closure_does_not_flow_into_function_slot() {
        let mut fx = Fixture::new();
        let f = int_fn(&mut fx, FnKind::Function);
        let c = int_fn(&mut fx, FnKind::Closure);
        fx.unifier.push_flow(&mut fx.store, f, c, Span::default());
        let err = fx.unify().unwrap_err();
        insta::assert_snapshot!(err.kind.to_string(), @"type mismatch: expected fn(int) -> int, found closure(int) -> int");
    }

    #[test]
    fn function_arity_mismatch() {
        let mut fx = Fixture::new();
        let int = fx.store.int();
        let f1 = fx.store.alloc(Ty::Fn {
            kind: FnKind::Function,
            params: vec![int],
            ret: int,
        });
        let f2 = fx.store.alloc(Ty::Fn {
            kind: FnKind::Function,
            params: vec![int, int],
            ret: int,
        });
        fx.relate(f1, f2);
        assert!(matches!(
            fx.unify().unwrap_err().kind,
            TypeErrorKind::TypeMismatch { .. }
        ));
    }

    #[test]
    fn functions_unify_pointwise() {
        let mut fx = Fixture::new();
        let (a, b) = (fx.store.fresh_var(), fx.store.fresh_var());
        let (int, str) = (fx.store.int(), fx.store.str());
        let f1 = fx.store.alloc(Ty::Fn {
            kind: FnKind::Closure,
            params: vec![a],
            ret: str,
        });
        let f2 = fx.store.alloc(Ty::Fn {
            kind: FnKind::Closure,
            params: vec![int],
            ret: b,
        });
        fx.relate(f1, f2);
        fx.unify().unwrap();
        assert_eq!(fx.show(f1), "closure(int) -> string");
        fx.assert_sound();
    }

    #[test]
    fn tuple_arity_mismatch() {
        let mut fx = Fixture::new();
        let int = fx.store.int();
        let t1 = fx.store.alloc(Ty::Tuple(vec![int]));
        let t2 = fx.store.alloc(Ty::Tuple(vec![int, int]));
        fx.relate(t1, t2);
        let err = fx.unify().unwrap_err();
        insta::assert_snapshot!(err.kind.to_string(), @"type mismatch: expected (int), found (int, int)");
    }

    #[test]
    fn open_records_merge_on_push() {
        let mut fx = Fixture::new();
        let (int, bool) = (fx.store.int(), fx.store.bool());
        let r1 = fx.open(&[("x", int)]);
        let r2 = fx.open(&[("y", bool)]);
        fx.relate(r1, r2);
        assert!(fx.unifier.pending().is_empty());
        fx.unify().unwrap();
        assert_eq!(fx.show(r1), "{x: int, y: bool}");
        assert_eq!(fx.store.find(r1), fx.store.find(r2));
        fx.assert_sound();
    }

    #[test]
    fn open_record_merge_relates_shared_slots() {
        let mut fx = Fixture::new();
        let v = fx.store.fresh_var();
        let int = fx.store.int();
        let r1 = fx.open(&[("x", int)]);
        let r2 = fx.open(&[("x", v)]);
        fx.relate(r1, r2);
        fx.unify().unwrap();
        assert_eq!(fx.show(v), "int");
        assert_eq!(fx.show(r2), "{x: int}");
    }

    #[test]
    fn open_record_merge_conflict() {
        let mut fx = Fixture::new();
        let (int, str) = (fx.store.int(), fx.store.str());
        let r1 = fx.open(&[("x", int)]);
        let r2 = fx.open(&[("x", str)]);
        fx.relate(r1, r2);
        assert!(fx.unify().is_err());
    }

    fn closed(fx: &mut Fixture, owner: &str, slots: &[(&str, TyId)]) -> TyId {
        let owner = fx.symbols.intern(owner);
        let slots = slots
            .iter()
            .map(|(name, ty)| (fx.symbols.intern(name), *ty))
            .collect();
        fx.store.alloc(Ty::Record(Record {
            owner: Some(owner),
            slots,
        }))
    }

    #[test]
    fn open_record_widens_to_closed() {
        let mut fx = Fixture::new();
        let (int, v) = (fx.store.int(), fx.store.fresh_var());
        let point = closed(&mut fx, "Point", &[("x", int), ("y", int)]);
        let open = fx.open(&[("x", v)]);
        fx.relate(open, point);
        fx.unify().unwrap();
        assert_eq!(fx.show(open), "Point");
        assert_eq!(fx.show(v), "int");
    }

    #[test]
    fn open_record_with_unknown_slot_is_rejected() {
        let mut fx = Fixture::new();
        let int = fx.store.int();
        let point = closed(&mut fx, "Point", &[("x", int)]);
        let open = fx.open(&[("z", int)]);
        fx.relate(point, open);
        let err = fx.unify().unwrap_err();
        insta::assert_snapshot!(err.kind.to_string(), @"type Point has no slot 'z'");
    }

    #[test]
    fn closed_records_need_same_owner() {
        let mut fx = Fixture::new();
        let int = fx.store.int();
        let a = closed(&mut fx, "A", &[("x", int)]);
        let b = closed(&mut fx, "B", &[("x", int)]);
        fx.relate(a, b);
        let err = fx.unify().unwrap_err();
        insta::assert_snapshot!(err.kind.to_string(), @"type mismatch: expected A, found B");
    }

    #[test]
    fn recursive_type_terminates() {
        let mut fx = Fixture::new();
        let v = fx.store.fresh_var();
        let int = fx.store.int();
        let node = fx.open(&[("value", int), ("next", v)]);
        fx.relate(v, node);
        fx.unify().unwrap();
        assert_eq!(fx.show(v), "{value: int, next: ...}");
        let copy = fx.store.subst(v);
        assert_eq!(fx.show(copy), "{value: int, next: ...}");
        assert!(fx.store.equivalent(copy, node));
        fx.assert_sound();
    }

    #[test]
    fn unifying_two_recursive_types_terminates() {
        let mut fx = Fixture::new();
        let (v1, v2) = (fx.store.fresh_var(), fx.store.fresh_var());
        let int = fx.store.int();
        let f1 = fx.store.alloc(Ty::Fn {
            kind: FnKind::Closure,
            params: vec![int],
            ret: v1,
        });
        let f2 = fx.store.alloc(Ty::Fn {
            kind: FnKind::Closure,
            params: vec![int],
            ret: v2,
        });
        fx.relate(v1, f1);
        fx.relate(v2, f2);
        fx.unify().unwrap();
        fx.relate(v1, v2);
        fx.unify().unwrap();
        assert_eq!(fx.show(v1), "closure(int) -> ...");
        fx.assert_sound();
    }

    #[test]
    fn rewind_restores_variables() {
        let mut fx = Fixture::new();
        let (v, w) = (fx.store.fresh_var(), fx.store.fresh_var());
        let int = fx.store.int();
        fx.relate(v, int);
        fx.unify().unwrap();
        let checkpoint = fx.unifier.checkpoint();
        fx.relate(w, int);
        fx.unify().unwrap();
        assert_eq!(fx.show(w), "int");
        fx.unifier.rewind(&mut fx.store, checkpoint);
        assert!(fx.show(w).starts_with('T'));
        assert_eq!(fx.show(v), "int");
        assert_eq!(fx.unifier.assignments().count(), 1);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn base(store: &TypeStore, n: u8) -> TyId {
            match n % 4 {
                0 => store.int(),
                1 => store.bool(),
                2 => store.str(),
                _ => store.double(),
            }
        }

        /// Slot types are a function of the slot name so records with
        /// overlapping names are always consistent.
        fn record_from(fx: &mut Fixture, names: &[u8]) -> TyId {
            let slots: Vec<(String, TyId)> = names
                .iter()
                .map(|&n| (format!("s{}", n), base(&fx.store, n)))
                .collect();
            let slots: Vec<(&str, TyId)> = slots.iter().map(|(s, t)| (s.as_str(), *t)).collect();
            fx.open(&slots)
        }

        fn slot_set(fx: &Fixture, ty: TyId) -> Vec<String> {
            match fx.store.resolve(ty) {
                Ty::Record(record) => {
                    let mut names: Vec<String> = record
                        .slots
                        .iter()
                        .map(|(name, t)| format!("{}:{}", fx.symbols.name(*name), fx.show(*t)))
                        .collect();
                    names.sort();
                    names
                }
                other => panic!("expected a record, got {:?}", other),
            }
        }

        fn names() -> impl Strategy<Value = Vec<u8>> {
            proptest::collection::btree_set(0u8..8, 0..5).prop_map(|s| s.into_iter().collect())
        }

        proptest! {
            #[test]
            fn open_record_merge_commutes(a in names(), b in names(), c in names()) {
                let mut left = Fixture::new();
                let (ra, rb, rc) = (record_from(&mut left, &a), record_from(&mut left, &b), record_from(&mut left, &c));
                let ab = left.unifier.merge_open_records(&mut left.store, ra, rb, Span::default());
                let abc = left.unifier.merge_open_records(&mut left.store, ab, rc, Span::default());
                left.unify().unwrap();

                let mut right = Fixture::new();
                let (ra, rb, rc) = (record_from(&mut right, &a), record_from(&mut right, &b), record_from(&mut right, &c));
                let bc = right.unifier.merge_open_records(&mut right.store, rb, rc, Span::default());
                let abc2 = right.unifier.merge_open_records(&mut right.store, ra, bc, Span::default());
                right.unify().unwrap();

                prop_assert_eq!(slot_set(&left, abc), slot_set(&right, abc2));
            }

            #[test]
            fn subst_is_idempotent(picks in proptest::collection::vec((0u8..4, 0u8..4), 1..6)) {
                let mut fx = Fixture::new();
                let vars: Vec<TyId> = (0..4).map(|_| fx.store.fresh_var()).collect();
                // Chain variables together and close the chain with base types.
                for &(i, j) in &picks {
                    let arr = fx.store.alloc(Ty::Array(vars[j as usize]));
                    if i == j {
                        let b = base(&fx.store, i);
                        fx.relate(vars[i as usize], b);
                    } else {
                        let tuple = fx.store.alloc(Ty::Tuple(vec![arr]));
                        fx.relate(vars[i as usize], tuple);
                    }
                }
                if fx.unify().is_ok() {
                    fx.assert_sound();
                    let top = fx.store.alloc(Ty::Tuple(vars.clone()));
                    let once = fx.store.subst(top);
                    let twice = fx.store.subst(once);
                    prop_assert!(fx.store.equivalent(once, twice));
                    prop_assert_eq!(fx.show(once), fx.show(twice));
                }
            }
        }
    }
}
