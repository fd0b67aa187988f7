use ember_ast::*;
use ember_typeck::{BindingId, Session};
use smol_str::SmolStr;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

// ── Error ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeErrorKind {
    #[error("division by zero")]
    DivisionByZero,
    #[error("index {index} out of bounds for array of length {len}")]
    IndexOutOfBounds { index: i64, len: usize },
    #[error("integer literal '{0}' out of range")]
    IntegerOutOfRange(SmolStr),
    #[error("invalid literal '{0}'")]
    InvalidLiteral(SmolStr),
    #[error("variable '{0}' has no value")]
    Unassigned(SmolStr),
    #[error("operator '{op}' is not defined for {operand}")]
    InvalidOperands {
        op: &'static str,
        operand: &'static str,
    },
    #[error("record has no slot '{0}'")]
    MissingSlot(SmolStr),
    #[error("{0} is not callable")]
    NotCallable(&'static str),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("[{}:{}] {}", .span.start, .span.end, .kind)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub span: Span,
}

impl RuntimeError {
    fn new(kind: RuntimeErrorKind, span: Span) -> Self {
        Self { kind, span }
    }
}

// ── Value ────────────────────────────────────────────────────────

/// Storage of one variable. Closures hold the same cell as the frame that
/// declared the variable, so writes on either side are seen by both.
pub type Cell = Rc<RefCell<Option<Value>>>;

fn new_cell(value: Option<Value>) -> Cell {
    Rc::new(RefCell::new(value))
}

#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(Rc<str>),
    Char(char),
    Tuple(Rc<[Value]>),
    Array(Rc<RefCell<Vec<Value>>>),
    Record(Rc<RefCell<RecordValue>>),
    /// Non-capturing function: a named function declared at top level.
    Function { name: SmolStr, site: ExprId },
    /// Function value with its captured cells, in capture-list order.
    Closure { site: ExprId, env: Rc<[Cell]> },
    Constructor { name: SmolStr, slots: Rc<[SmolStr]> },
}

#[derive(Debug)]
pub struct RecordValue {
    /// Datatype name; `None` for a record literal.
    pub owner: Option<SmolStr>,
    pub slots: Vec<(SmolStr, Value)>,
}

impl Value {
    fn kind_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::Char(_) => "char",
            Value::Tuple(_) => "tuple",
            Value::Array(_) => "array",
            Value::Record(_) => "record",
            Value::Function { .. } | Value::Constructor { .. } => "function",
            Value::Closure { .. } => "closure",
        }
    }

    fn is_true(&self) -> bool {
        matches!(self, Value::Bool(true))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(f, self, &mut Vec::new())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(f, self, &mut Vec::new())
    }
}

/// `seen` holds the arrays and records being printed; meeting one again
/// prints `...` instead of looping.
fn write_value(f: &mut fmt::Formatter<'_>, value: &Value, seen: &mut Vec<*const ()>) -> fmt::Result {
    match value {
        Value::Nil => write!(f, "nil"),
        Value::Bool(b) => write!(f, "{}", b),
        Value::Int(n) => write!(f, "{}", n),
        Value::Double(n) => {
            if n.is_finite() && n.fract() == 0.0 {
                write!(f, "{:.1}", n)
            } else {
                write!(f, "{}", n)
            }
        }
        Value::Str(s) => {
            write!(f, "\"")?;
            for c in s.chars() {
                match c {
                    '"' => write!(f, "\\\"")?,
                    '\\' => write!(f, "\\\\")?,
                    '\n' => write!(f, "\\n")?,
                    '\t' => write!(f, "\\t")?,
                    '\r' => write!(f, "\\r")?,
                    '\0' => write!(f, "\\0")?,
                    c => write!(f, "{}", c)?,
                }
            }
            write!(f, "\"")
        }
        Value::Char(c) => write!(f, "{}", c),
        Value::Tuple(elems) => {
            write!(f, "(")?;
            write_list(f, elems.iter(), seen)?;
            write!(f, ")")
        }
        Value::Array(elems) => {
            let ptr = Rc::as_ptr(elems) as *const ();
            if seen.contains(&ptr) {
                return write!(f, "...");
            }
            seen.push(ptr);
            write!(f, "[")?;
            write_list(f, elems.borrow().iter(), seen)?;
            seen.pop();
            write!(f, "]")
        }
        Value::Record(record) => {
            let ptr = Rc::as_ptr(record) as *const ();
            if seen.contains(&ptr) {
                return write!(f, "...");
            }
            seen.push(ptr);
            let record = record.borrow();
            let (open, close) = match &record.owner {
                Some(owner) => {
                    write!(f, "{}", owner)?;
                    ("(", ")")
                }
                None => ("{", "}"),
            };
            write!(f, "{}", open)?;
            for (i, (name, slot)) in record.slots.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}: ", name)?;
                write_value(f, slot, seen)?;
            }
            seen.pop();
            write!(f, "{}", close)
        }
        Value::Function { name, .. } | Value::Constructor { name, .. } => write!(f, "<fn {}>", name),
        Value::Closure { .. } => write!(f, "<closure>"),
    }
}

fn write_list<'v>(
    f: &mut fmt::Formatter<'_>,
    values: impl Iterator<Item = &'v Value>,
    seen: &mut Vec<*const ()>,
) -> fmt::Result {
    for (i, value) in values.enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write_value(f, value, seen)?;
    }
    Ok(())
}

/// `==` on values. Arrays, records and functions compare by identity.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Double(a), Value::Double(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Char(a), Value::Char(b)) => a == b,
        (Value::Tuple(a), Value::Tuple(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y))
        }
        (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
        (Value::Record(a), Value::Record(b)) => Rc::ptr_eq(a, b),
        (Value::Function { site: a, .. }, Value::Function { site: b, .. }) => a == b,
        (Value::Closure { site: a, env: x }, Value::Closure { site: b, env: y }) => {
            a == b && Rc::ptr_eq(x, y)
        }
        (Value::Constructor { name: a, .. }, Value::Constructor { name: b, .. }) => a == b,
        _ => false,
    }
}

// ── Interpreter ──────────────────────────────────────────────────

/// Values of global bindings, kept across forms.
#[derive(Default)]
pub struct Interpreter {
    globals: HashMap<BindingId, Cell>,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate a form that `session` has already checked. Statements
    /// evaluate to `nil`.
    pub fn eval_form(
        &mut self,
        module: &Module,
        session: &Session,
        form: ExprId,
    ) -> Result<Value, RuntimeError> {
        let mut eval = Eval {
            module,
            session,
            globals: &mut self.globals,
            frames: vec![Frame::default()],
        };
        match eval.eval(form) {
            Ok(value) => Ok(value),
            Err(Unwind::Error(err)) => Err(err),
            Err(Unwind::Break) | Err(Unwind::Return(_)) => Ok(Value::Nil),
        }
    }
}

/// Non-local exits. `break` and `return` travel up the same path as errors
/// until a loop or a call catches them.
enum Unwind {
    Break,
    Return(Value),
    Error(RuntimeError),
}

impl From<RuntimeError> for Unwind {
    fn from(err: RuntimeError) -> Self {
        Unwind::Error(err)
    }
}

type EvalResult = Result<Value, Unwind>;

/// Locals of one call. Block-scoped variables share their function's frame;
/// each declaration has its own binding, so they cannot collide.
#[derive(Default)]
struct Frame {
    locals: HashMap<BindingId, Cell>,
}

/// Where an assignment writes.
enum Place {
    Var(Cell, SmolStr),
    Slot(Rc<RefCell<RecordValue>>, SmolStr),
    Index(Rc<RefCell<Vec<Value>>>, usize),
}

struct Eval<'a> {
    module: &'a Module,
    session: &'a Session,
    globals: &'a mut HashMap<BindingId, Cell>,
    frames: Vec<Frame>,
}

impl<'a> Eval<'a> {
    // ── Bindings ─────────────────────────────────────────────────

    fn binding(&self, id: ExprId, name: &SmolStr, span: Span) -> Result<BindingId, RuntimeError> {
        self.session
            .binding_of(id)
            .ok_or_else(|| RuntimeError::new(RuntimeErrorKind::Unassigned(name.clone()), span))
    }

    fn cell_of(&self, binding: BindingId) -> Option<Cell> {
        if self.session.is_global(binding) {
            return self.globals.get(&binding).cloned();
        }
        self.frames
            .last()
            .and_then(|frame| frame.locals.get(&binding).cloned())
    }

    fn declare(&mut self, binding: BindingId, value: Option<Value>) -> Cell {
        let cell = new_cell(value);
        if self.session.is_global(binding) {
            self.globals.insert(binding, cell.clone());
        } else if let Some(frame) = self.frames.last_mut() {
            frame.locals.insert(binding, cell.clone());
        }
        cell
    }

    fn binder_name(&self, id: ExprId) -> SmolStr {
        match &self.module.exprs[id].kind {
            ExprKind::Binder(name) | ExprKind::Ident(name) | ExprKind::LValue(name) => name.clone(),
            _ => SmolStr::default(),
        }
    }

    fn read_var(&self, id: ExprId, name: &SmolStr, span: Span) -> Result<Value, RuntimeError> {
        let unassigned = || RuntimeError::new(RuntimeErrorKind::Unassigned(name.clone()), span);
        let cell = self
            .cell_of(self.binding(id, name, span)?)
            .ok_or_else(unassigned)?;
        let value = cell.borrow().clone();
        value.ok_or_else(unassigned)
    }

    // ── Evaluation ───────────────────────────────────────────────

    fn eval(&mut self, id: ExprId) -> EvalResult {
        let module = self.module;
        let expr = &module.exprs[id];
        let span = expr.span;

        match &expr.kind {
            ExprKind::Lit(lit) => Ok(literal(lit).map_err(|kind| RuntimeError::new(kind, span))?),

            ExprKind::Ident(name) => Ok(self.read_var(id, name, span)?),

            ExprKind::LValue(_) | ExprKind::Binder(_) => Ok(Value::Nil),

            ExprKind::Unary { op, operand } => {
                let value = self.eval(*operand)?;
                let result = match (op, &value) {
                    (UnaryOp::Neg, Value::Int(n)) => Value::Int(n.wrapping_neg()),
                    (UnaryOp::Neg, Value::Double(n)) => Value::Double(-n),
                    (UnaryOp::Not, Value::Bool(b)) => Value::Bool(!b),
                    (UnaryOp::BitNot, Value::Int(n)) => Value::Int(!n),
                    _ => {
                        return Err(RuntimeError::new(
                            RuntimeErrorKind::InvalidOperands {
                                op: op.symbol(),
                                operand: value.kind_name(),
                            },
                            span,
                        )
                        .into())
                    }
                };
                Ok(result)
            }

            ExprKind::Postfix { op, target } => {
                let place = self.place(*target)?;
                let old = self.read(&place, span)?;
                let bin_op = match op {
                    PostfixOp::Inc => BinOp::Add,
                    PostfixOp::Dec => BinOp::Sub,
                };
                let one = match old {
                    Value::Double(_) => Value::Double(1.0),
                    _ => Value::Int(1),
                };
                let new = binary(bin_op, &old, &one).map_err(|kind| RuntimeError::new(kind, span))?;
                self.write(&place, new, span)?;
                Ok(old)
            }

            ExprKind::Binary { op, lhs, rhs } => match op {
                BinOp::And => {
                    let left = self.eval(*lhs)?;
                    if !left.is_true() {
                        return Ok(Value::Bool(false));
                    }
                    Ok(Value::Bool(self.eval(*rhs)?.is_true()))
                }
                BinOp::Or => {
                    let left = self.eval(*lhs)?;
                    if left.is_true() {
                        return Ok(Value::Bool(true));
                    }
                    Ok(Value::Bool(self.eval(*rhs)?.is_true()))
                }
                _ => {
                    // Right operand first, matching the checker.
                    let right = self.eval(*rhs)?;
                    let left = self.eval(*lhs)?;
                    Ok(binary(*op, &left, &right).map_err(|kind| RuntimeError::new(kind, span))?)
                }
            },

            ExprKind::Assign { target, value } => {
                let value = self.eval(*value)?;
                let place = self.place(*target)?;
                self.write(&place, value.clone(), span)?;
                Ok(value)
            }

            ExprKind::CompoundAssign { op, target, value } => {
                let value = self.eval(*value)?;
                let place = self.place(*target)?;
                let current = self.read(&place, span)?;
                let result =
                    binary(*op, &current, &value).map_err(|kind| RuntimeError::new(kind, span))?;
                self.write(&place, result.clone(), span)?;
                Ok(result)
            }

            ExprKind::Call { callee, args } => {
                let func = self.eval(*callee)?;
                let mut values = Vec::with_capacity(args.len());
                for &arg in args {
                    values.push(self.eval(arg)?);
                }
                Ok(self.call(&func, values, span)?)
            }

            ExprKind::Tuple(elems) => {
                let mut values = Vec::with_capacity(elems.len());
                for &elem in elems {
                    values.push(self.eval(elem)?);
                }
                Ok(Value::Tuple(values.into()))
            }

            ExprKind::Array(elems) => {
                let mut values = Vec::with_capacity(elems.len());
                for &elem in elems {
                    values.push(self.eval(elem)?);
                }
                Ok(Value::Array(Rc::new(RefCell::new(values))))
            }

            ExprKind::Record(fields) => {
                let mut slots = Vec::with_capacity(fields.len());
                for field in fields {
                    slots.push((field.name.clone(), self.eval(field.value)?));
                }
                Ok(Value::Record(Rc::new(RefCell::new(RecordValue {
                    owner: None,
                    slots,
                }))))
            }

            ExprKind::Slot { .. } | ExprKind::Index { .. } => {
                let place = self.place(id)?;
                Ok(self.read(&place, span)?)
            }

            ExprKind::Lambda { .. } => Ok(self.make_closure(id, span)?),

            ExprKind::IfExpr {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.eval(*cond)?.is_true() {
                    self.eval(*then_branch)
                } else {
                    self.eval(*else_branch)
                }
            }

            ExprKind::VarDecl(items) => {
                for item in items {
                    let value = match item.init {
                        Some(init) => Some(self.eval(init)?),
                        None => None,
                    };
                    let name = self.binder_name(item.target);
                    let binding = self.binding(item.target, &name, item.span)?;
                    self.declare(binding, value);
                }
                Ok(Value::Nil)
            }

            ExprKind::FnDecl { name, .. } => {
                let fn_name = self.binder_name(*name);
                let binding = self.binding(*name, &fn_name, span)?;
                // The cell exists before the value so a local function can
                // capture itself.
                let cell = self.declare(binding, None);
                let value = if self.session.is_global(binding) {
                    Value::Function {
                        name: fn_name,
                        site: id,
                    }
                } else {
                    self.make_closure(id, span)?
                };
                *cell.borrow_mut() = Some(value);
                Ok(Value::Nil)
            }

            ExprKind::Datatype { name, slots } => {
                let type_name = self.binder_name(*name);
                let binding = self.binding(*name, &type_name, span)?;
                let ctor = Value::Constructor {
                    name: type_name,
                    slots: slots.iter().map(|slot| slot.name.clone()).collect(),
                };
                self.declare(binding, Some(ctor));
                Ok(Value::Nil)
            }

            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.eval(*cond)?.is_true() {
                    self.eval(*then_branch)?;
                } else if let Some(else_branch) = else_branch {
                    self.eval(*else_branch)?;
                }
                Ok(Value::Nil)
            }

            ExprKind::While { cond, body } => {
                while self.eval(*cond)?.is_true() {
                    match self.eval(*body) {
                        Ok(_) => {}
                        Err(Unwind::Break) => break,
                        Err(other) => return Err(other),
                    }
                }
                Ok(Value::Nil)
            }

            ExprKind::Block(stmts) => {
                for &stmt in stmts {
                    self.eval(stmt)?;
                }
                Ok(Value::Nil)
            }

            ExprKind::Break => Err(Unwind::Break),

            ExprKind::Return(value) => {
                let value = match value {
                    Some(value) => self.eval(*value)?,
                    None => Value::Nil,
                };
                Err(Unwind::Return(value))
            }
        }
    }

    // ── Places ───────────────────────────────────────────────────

    fn place(&mut self, target: ExprId) -> Result<Place, Unwind> {
        let module = self.module;
        let expr = &module.exprs[target];
        let span = expr.span;
        match &expr.kind {
            ExprKind::Ident(name) | ExprKind::LValue(name) => {
                let binding = self.binding(target, name, span)?;
                let cell = self.cell_of(binding).unwrap_or_else(|| self.declare(binding, None));
                Ok(Place::Var(cell, name.clone()))
            }
            ExprKind::Slot { target, slot } => match self.eval(*target)? {
                Value::Record(record) => Ok(Place::Slot(record, slot.clone())),
                other => Err(RuntimeError::new(
                    RuntimeErrorKind::InvalidOperands {
                        op: ".",
                        operand: other.kind_name(),
                    },
                    span,
                )
                .into()),
            },
            ExprKind::Index { target, index } => {
                let array = self.eval(*target)?;
                let index = self.eval(*index)?;
                match (array, index) {
                    (Value::Array(elems), Value::Int(i)) => {
                        let len = elems.borrow().len();
                        match usize::try_from(i) {
                            Ok(at) if at < len => Ok(Place::Index(elems, at)),
                            _ => Err(RuntimeError::new(
                                RuntimeErrorKind::IndexOutOfBounds { index: i, len },
                                span,
                            )
                            .into()),
                        }
                    }
                    (other, _) => Err(RuntimeError::new(
                        RuntimeErrorKind::InvalidOperands {
                            op: "[]",
                            operand: other.kind_name(),
                        },
                        span,
                    )
                    .into()),
                }
            }
            _ => {
                let value = self.eval(target)?;
                Err(RuntimeError::new(
                    RuntimeErrorKind::InvalidOperands {
                        op: "=",
                        operand: value.kind_name(),
                    },
                    span,
                )
                .into())
            }
        }
    }

    fn read(&self, place: &Place, span: Span) -> Result<Value, RuntimeError> {
        match place {
            Place::Var(cell, name) => cell.borrow().clone().ok_or_else(|| {
                RuntimeError::new(RuntimeErrorKind::Unassigned(name.clone()), span)
            }),
            Place::Slot(record, slot) => record
                .borrow()
                .slots
                .iter()
                .find(|(name, _)| name == slot)
                .map(|(_, value)| value.clone())
                .ok_or_else(|| RuntimeError::new(RuntimeErrorKind::MissingSlot(slot.clone()), span)),
            Place::Index(elems, at) => Ok(elems.borrow()[*at].clone()),
        }
    }

    fn write(&self, place: &Place, value: Value, span: Span) -> Result<(), RuntimeError> {
        match place {
            Place::Var(cell, _) => {
                *cell.borrow_mut() = Some(value);
                Ok(())
            }
            Place::Slot(record, slot) => {
                let mut record = record.borrow_mut();
                match record.slots.iter_mut().find(|(name, _)| name == slot) {
                    Some((_, current)) => {
                        *current = value;
                        Ok(())
                    }
                    None => Err(RuntimeError::new(
                        RuntimeErrorKind::MissingSlot(slot.clone()),
                        span,
                    )),
                }
            }
            Place::Index(elems, at) => {
                elems.borrow_mut()[*at] = value;
                Ok(())
            }
        }
    }

    // ── Functions ────────────────────────────────────────────────

    /// Close over the cells of every binding the function captures.
    fn make_closure(&self, site: ExprId, span: Span) -> Result<Value, RuntimeError> {
        let mut env = Vec::new();
        for &binding in self.session.captures(site) {
            let cell = self.cell_of(binding).ok_or_else(|| {
                let name = self.session.symbol_name(self.session.binding(binding).symbol);
                RuntimeError::new(RuntimeErrorKind::Unassigned(name.clone()), span)
            })?;
            env.push(cell);
        }
        Ok(Value::Closure {
            site,
            env: env.into(),
        })
    }

    fn call(&mut self, func: &Value, args: Vec<Value>, span: Span) -> Result<Value, RuntimeError> {
        match func {
            Value::Function { site, .. } => self.invoke(*site, &[], args, span),
            Value::Closure { site, env } => self.invoke(*site, env, args, span),
            Value::Constructor { name, slots } => {
                let slots = slots.iter().cloned().zip(args).collect();
                Ok(Value::Record(Rc::new(RefCell::new(RecordValue {
                    owner: Some(name.clone()),
                    slots,
                }))))
            }
            other => Err(RuntimeError::new(
                RuntimeErrorKind::NotCallable(other.kind_name()),
                span,
            )),
        }
    }

    fn invoke(
        &mut self,
        site: ExprId,
        env: &[Cell],
        args: Vec<Value>,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        let module = self.module;
        let (params, body) = match &module.exprs[site].kind {
            ExprKind::Lambda { params, body } | ExprKind::FnDecl { params, body, .. } => {
                (params, body)
            }
            _ => return Err(RuntimeError::new(RuntimeErrorKind::NotCallable("node"), span)),
        };
        log::trace!("call {:?} with {} arguments", site, args.len());

        let mut frame = Frame::default();
        for (&binding, cell) in self.session.captures(site).iter().zip(env) {
            frame.locals.insert(binding, cell.clone());
        }
        for (&param, arg) in params.iter().zip(args) {
            let name = self.binder_name(param);
            let binding = self.binding(param, &name, span)?;
            frame.locals.insert(binding, new_cell(Some(arg)));
        }

        self.frames.push(frame);
        let mut result = Ok(Value::Nil);
        for &stmt in body {
            if let Err(unwind) = self.eval(stmt) {
                result = match unwind {
                    Unwind::Return(value) => Ok(value),
                    Unwind::Break => Ok(Value::Nil),
                    Unwind::Error(err) => Err(err),
                };
                break;
            }
        }
        self.frames.pop();
        result
    }
}

// ── Literals ─────────────────────────────────────────────────────

fn literal(lit: &Literal) -> Result<Value, RuntimeErrorKind> {
    match lit {
        Literal::Int(raw) => raw
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| RuntimeErrorKind::IntegerOutOfRange(raw.clone())),
        Literal::Double(raw) => raw
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| RuntimeErrorKind::InvalidLiteral(raw.clone())),
        Literal::Str(raw) => decode_escapes(raw)
            .map(|s| Value::Str(s.into()))
            .ok_or_else(|| RuntimeErrorKind::InvalidLiteral(raw.clone())),
        Literal::Char(raw) => {
            let decoded = decode_escapes(raw);
            let mut chars = decoded.as_deref().unwrap_or_default().chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Value::Char(c)),
                _ => Err(RuntimeErrorKind::InvalidLiteral(raw.clone())),
            }
        }
        Literal::Bool(b) => Ok(Value::Bool(*b)),
        Literal::Nil => Ok(Value::Nil),
    }
}

fn decode_escapes(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        out.push(match chars.next()? {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            '\\' => '\\',
            '"' => '"',
            '\'' => '\'',
            _ => return None,
        });
    }
    Some(out)
}

// ── Operators ────────────────────────────────────────────────────

fn compare(op: BinOp, ord: Ordering) -> Option<bool> {
    Some(match op {
        BinOp::Lt => ord == Ordering::Less,
        BinOp::Gt => ord == Ordering::Greater,
        BinOp::Le => ord != Ordering::Greater,
        BinOp::Ge => ord != Ordering::Less,
        BinOp::Eq => ord == Ordering::Equal,
        BinOp::Ne => ord != Ordering::Equal,
        _ => return None,
    })
}

// The checker only makes both operands agree, so an operator applied to a
// type it has no meaning for (`true + false`, `[1] + [2]`) is caught here.
fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, RuntimeErrorKind> {
    let invalid = || RuntimeErrorKind::InvalidOperands {
        op: op.symbol(),
        operand: left.kind_name(),
    };
    let result = match (left, right) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            if let Some(result) = compare(op, a.cmp(&b)) {
                return Ok(Value::Bool(result));
            }
            Value::Int(match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                BinOp::Mul => a.wrapping_mul(b),
                BinOp::Div | BinOp::Rem if b == 0 => return Err(RuntimeErrorKind::DivisionByZero),
                BinOp::Div => a.wrapping_div(b),
                BinOp::Rem => a.wrapping_rem(b),
                BinOp::Shl => a.wrapping_shl(b as u32),
                BinOp::Shr => a.wrapping_shr(b as u32),
                BinOp::BitAnd => a & b,
                BinOp::BitOr => a | b,
                BinOp::BitXor => a ^ b,
                _ => return Err(invalid()),
            })
        }
        (Value::Double(a), Value::Double(b)) => {
            let (a, b) = (*a, *b);
            match op {
                BinOp::Add => Value::Double(a + b),
                BinOp::Sub => Value::Double(a - b),
                BinOp::Mul => Value::Double(a * b),
                BinOp::Div => Value::Double(a / b),
                BinOp::Rem => Value::Double(a % b),
                BinOp::Lt => Value::Bool(a < b),
                BinOp::Gt => Value::Bool(a > b),
                BinOp::Le => Value::Bool(a <= b),
                BinOp::Ge => Value::Bool(a >= b),
                BinOp::Eq => Value::Bool(a == b),
                BinOp::Ne => Value::Bool(a != b),
                _ => return Err(invalid()),
            }
        }
        (Value::Str(a), Value::Str(b)) => match op {
            BinOp::Add => Value::Str(format!("{}{}", a, b).into()),
            _ => Value::Bool(compare(op, a.cmp(b)).ok_or_else(invalid)?),
        },
        (Value::Char(a), Value::Char(b)) => Value::Bool(compare(op, a.cmp(b)).ok_or_else(invalid)?),
        (Value::Bool(a), Value::Bool(b)) => Value::Bool(match op {
            BinOp::BitAnd => a & b,
            BinOp::BitOr => a | b,
            BinOp::BitXor | BinOp::Ne => a != b,
            BinOp::Eq => a == b,
            _ => return Err(invalid()),
        }),
        _ => match op {
            BinOp::Eq => Value::Bool(values_equal(left, right)),
            BinOp::Ne => Value::Bool(!values_equal(left, right)),
            _ => return Err(invalid()),
        },
    };
    Ok(result)
}

// ── Tests ────────────────────────────────────────────────────────
