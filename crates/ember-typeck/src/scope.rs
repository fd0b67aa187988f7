use ember_ast::ExprId;
use la_arena::{Arena, Idx};

use crate::symbols::Symbol;
use crate::types::TyId;

pub type BindingId = Idx<Binding>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingKind {
    Variable,
    /// Introduced by a named function declaration.
    Function,
    /// A datatype constructor.
    Constructor,
    /// The `return` pseudo-binding of a function body.
    Return,
}

#[derive(Clone, Debug)]
pub struct Binding {
    pub symbol: Symbol,
    pub ty: TyId,
    /// False for `var x;` until something is assigned to `x`.
    pub initialized: bool,
    /// Function, lambda or datatype node that produces this binding's value.
    pub defining_ast: Option<ExprId>,
    pub kind: BindingKind,
    /// Innermost function or lambda whose body declares the binding.
    pub owner: Option<ExprId>,
    /// Frame depth; 0 is the global frame.
    pub depth: usize,
}

/// Position to rewind the scope to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScopeMark {
    frames: usize,
    top_len: usize,
    initialized: usize,
}

/// Chain of lexical frames, innermost last. Bindings stay in the arena
/// after their frame is popped so checked forms can still refer to them.
#[derive(Debug)]
pub struct Scope {
    bindings: Arena<Binding>,
    frames: Vec<Vec<BindingId>>,
    /// Bindings flipped to initialized, oldest first.
    init_log: Vec<BindingId>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Self {
            bindings: Arena::new(),
            frames: vec![Vec::new()],
            init_log: Vec::new(),
        }
    }

    pub fn push_frame(&mut self) {
        self.frames.push(Vec::new());
    }

    pub fn pop_frame(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    pub fn at_global(&self) -> bool {
        self.frames.len() == 1
    }

    pub fn mark(&self) -> ScopeMark {
        ScopeMark {
            frames: self.frames.len(),
            top_len: self.frames.last().map_or(0, Vec::len),
            initialized: self.init_log.len(),
        }
    }

    /// Forget every binding introduced since `mark`, drop frames pushed
    /// since then, and undo initializations.
    pub fn rewind(&mut self, mark: ScopeMark) {
        self.frames.truncate(mark.frames.max(1));
        if let Some(top) = self.frames.last_mut() {
            top.truncate(mark.top_len);
        }
        while self.init_log.len() > mark.initialized {
            if let Some(id) = self.init_log.pop() {
                self.bindings[id].initialized = false;
            }
        }
    }

    pub fn bind(
        &mut self,
        symbol: Symbol,
        ty: TyId,
        initialized: bool,
        kind: BindingKind,
        owner: Option<ExprId>,
        defining_ast: Option<ExprId>,
    ) -> BindingId {
        let depth = self.depth();
        let id = self.bindings.alloc(Binding {
            symbol,
            ty,
            initialized,
            defining_ast,
            kind,
            owner,
            depth,
        });
        if let Some(top) = self.frames.last_mut() {
            top.push(id);
        }
        id
    }

    /// Innermost visible binding of `symbol`.
    pub fn lookup(&self, symbol: Symbol) -> Option<BindingId> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| self.find_in(frame, symbol))
    }

    /// Binding of `symbol` in the current frame only.
    pub fn lookup_in_frame(&self, symbol: Symbol) -> Option<BindingId> {
        self.frames
            .last()
            .and_then(|frame| self.find_in(frame, symbol))
    }

    fn find_in(&self, frame: &[BindingId], symbol: Symbol) -> Option<BindingId> {
        frame
            .iter()
            .rev()
            .copied()
            .find(|&id| self.bindings[id].symbol == symbol)
    }

    pub fn is_global(&self, id: BindingId) -> bool {
        self.bindings[id].depth == 0
    }

    pub fn get(&self, id: BindingId) -> &Binding {
        &self.bindings[id]
    }

    pub fn initialize(&mut self, id: BindingId) {
        let binding = &mut self.bindings[id];
        if !binding.initialized {
            binding.initialized = true;
            self.init_log.push(id);
        }
    }
}
