pub mod walk;

use la_arena::{Arena, Idx};
use smol_str::SmolStr;
pub use ember_lexer::Span;

// ── ID types ──────────────────────────────────────────────────────

pub type ExprId = Idx<Expr>;
pub type TypeExprId = Idx<TypeExpr>;

// ── Module ────────────────────────────────────────────────────────

/// Every form read so far. The REPL keeps one module for the whole session,
/// so nodes of earlier forms stay addressable by later ones.
#[derive(Debug, Clone)]
pub struct Module {
    pub forms: Vec<ExprId>,
    pub exprs: Arena<Expr>,
    pub type_exprs: Arena<TypeExpr>,
}

impl Module {
    pub fn new() -> Self {
        Self {
            forms: Vec::new(),
            exprs: Arena::new(),
            type_exprs: Arena::new(),
        }
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

// ── Expressions and statements ────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Literal value, payload kept as source text.
    Lit(Literal),
    /// Identifier used as a value.
    Ident(SmolStr),
    /// Identifier used as an assignment target.
    LValue(SmolStr),
    /// Declaration site of a name: `var` item, parameter, function or datatype name.
    Binder(SmolStr),
    Unary {
        op: UnaryOp,
        operand: ExprId,
    },
    /// `x++` / `x--`
    Postfix {
        op: PostfixOp,
        target: ExprId,
    },
    Binary {
        op: BinOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    Assign {
        target: ExprId,
        value: ExprId,
    },
    /// `x += e` and friends.
    CompoundAssign {
        op: BinOp,
        target: ExprId,
        value: ExprId,
    },
    Call {
        callee: ExprId,
        args: Vec<ExprId>,
    },
    Tuple(Vec<ExprId>),
    Array(Vec<ExprId>),
    /// Record literal: `{x: 1, y: true}`
    Record(Vec<RecordField>),
    /// Slot access: `r.x`
    Slot {
        target: ExprId,
        slot: SmolStr,
    },
    /// Index access: `a[i]`
    Index {
        target: ExprId,
        index: ExprId,
    },
    /// Lambda literal: `fn(params) { body }`. Params are `Binder` nodes.
    Lambda {
        params: Vec<ExprId>,
        body: Vec<ExprId>,
    },
    /// `if (c) e1 else e2` in expression position.
    IfExpr {
        cond: ExprId,
        then_branch: ExprId,
        else_branch: ExprId,
    },

    /// `var a = e1, b, c = e3;`
    VarDecl(Vec<VarItem>),
    /// `fn name(params) { body }`. Name and params are `Binder` nodes.
    FnDecl {
        name: ExprId,
        params: Vec<ExprId>,
        body: Vec<ExprId>,
    },
    /// `datatype Name(slot: type, ...);`
    Datatype {
        name: ExprId,
        slots: Vec<SlotDecl>,
    },
    If {
        cond: ExprId,
        then_branch: ExprId,
        else_branch: Option<ExprId>,
    },
    While {
        cond: ExprId,
        body: ExprId,
    },
    Block(Vec<ExprId>),
    Break,
    Return(Option<ExprId>),
}

impl ExprKind {
    /// Statements have no printable value at the top level.
    pub fn is_statement(&self) -> bool {
        matches!(
            self,
            ExprKind::VarDecl(_)
                | ExprKind::FnDecl { .. }
                | ExprKind::Datatype { .. }
                | ExprKind::If { .. }
                | ExprKind::While { .. }
                | ExprKind::Block(_)
                | ExprKind::Break
                | ExprKind::Return(_)
        )
    }
}

/// Literal values. Numbers, strings and chars carry their raw source text;
/// strings and chars without the surrounding quotes and with escapes intact.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(SmolStr),
    Double(SmolStr),
    Str(SmolStr),
    Char(SmolStr),
    Bool(bool),
    Nil,
}

/// One item of a `var` statement.
#[derive(Debug, Clone)]
pub struct VarItem {
    /// A `Binder` node.
    pub target: ExprId,
    pub init: Option<ExprId>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct RecordField {
    pub name: SmolStr,
    pub name_span: Span,
    pub value: ExprId,
}

#[derive(Debug, Clone)]
pub struct SlotDecl {
    pub name: SmolStr,
    pub name_span: Span,
    pub type_ann: TypeExprId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostfixOp {
    Inc,
    Dec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq | BinOp::Ne
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
        }
    }
}

// ── Type expressions ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TypeExpr {
    pub kind: TypeExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum TypeExprKind {
    /// Base type or datatype name: `int`, `string`, `Point`
    Named(SmolStr),
    /// `[T]`
    Array(TypeExprId),
    /// `(T1, T2)`
    Tuple(Vec<TypeExprId>),
}

// ── Pretty printer ────────────────────────────────────────────────

pub fn pretty_print(module: &Module) -> String {
    let mut out = String::new();
    for &form in &module.forms {
        out.push_str(&pretty_print_form(module, form, |_| None));
    }
    out
}

/// Print one form as an indented tree, one node per line. `annotate` may
/// attach text (a type, a binding) to any node.
pub fn pretty_print_form(
    module: &Module,
    form: ExprId,
    annotate: impl Fn(ExprId) -> Option<String>,
) -> String {
    let mut printer = PrettyPrinter {
        module,
        annotate: &annotate,
        buf: String::new(),
        indent: 0,
    };
    printer.print_expr(form);
    printer.buf
}

struct PrettyPrinter<'a> {
    module: &'a Module,
    annotate: &'a dyn Fn(ExprId) -> Option<String>,
    buf: String,
    indent: usize,
}

impl<'a> PrettyPrinter<'a> {
    fn write_indent(&mut self) {
        for _ in 0..self.indent {
            self.buf.push_str("  ");
        }
    }

    fn node_line(&mut self, id: ExprId, label: &str) {
        self.write_indent();
        self.buf.push_str("+ ");
        self.buf.push_str(label);
        if let Some(note) = (self.annotate)(id) {
            self.buf.push_str(" : ");
            self.buf.push_str(&note);
        }
        self.buf.push('\n');
    }

    fn text_line(&mut self, text: &str) {
        self.write_indent();
        self.buf.push_str(text);
        self.buf.push('\n');
    }

    fn children(&mut self, ids: &[ExprId]) {
        self.indent += 1;
        for &id in ids {
            self.print_expr(id);
        }
        self.indent -= 1;
    }

    fn print_expr(&mut self, id: ExprId) {
        let module = self.module;
        let expr = &module.exprs[id];
        match &expr.kind {
            ExprKind::Lit(lit) => {
                let label = match lit {
                    Literal::Int(s) => format!("int({})", s),
                    Literal::Double(s) => format!("double({})", s),
                    Literal::Str(s) => format!("string(\"{}\")", s),
                    Literal::Char(s) => format!("char('{}')", s),
                    Literal::Bool(b) => format!("bool({})", b),
                    Literal::Nil => "nil".to_string(),
                };
                self.node_line(id, &label);
            }
            ExprKind::Ident(name) => self.node_line(id, &format!("ident({})", name)),
            ExprKind::LValue(name) => self.node_line(id, &format!("lvalue({})", name)),
            ExprKind::Binder(name) => self.node_line(id, &format!("binder({})", name)),
            ExprKind::Unary { op, operand } => {
                self.node_line(id, &format!("unary({})", op.symbol()));
                self.children(&[*operand]);
            }
            ExprKind::Postfix { op, target } => {
                let label = match op {
                    PostfixOp::Inc => "postinc",
                    PostfixOp::Dec => "postdec",
                };
                self.node_line(id, label);
                self.children(&[*target]);
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.node_line(id, &format!("binary({})", op.symbol()));
                self.children(&[*lhs, *rhs]);
            }
            ExprKind::Assign { target, value } => {
                self.node_line(id, "assign");
                self.children(&[*target, *value]);
            }
            ExprKind::CompoundAssign { op, target, value } => {
                self.node_line(id, &format!("assign({}=)", op.symbol()));
                self.children(&[*target, *value]);
            }
            ExprKind::Call { callee, args } => {
                self.node_line(id, "call");
                self.children(&[*callee]);
                self.indent += 1;
                self.text_line("args:");
                self.children(args);
                self.indent -= 1;
            }
            ExprKind::Tuple(elems) => {
                self.node_line(id, "tuple");
                self.children(elems);
            }
            ExprKind::Array(elems) => {
                self.node_line(id, "array");
                self.children(elems);
            }
            ExprKind::Record(fields) => {
                self.node_line(id, "record");
                self.indent += 1;
                for field in fields {
                    self.text_line(&format!("{}:", field.name));
                    self.children(&[field.value]);
                }
                self.indent -= 1;
            }
            ExprKind::Slot { target, slot } => {
                self.node_line(id, &format!("slot(.{})", slot));
                self.children(&[*target]);
            }
            ExprKind::Index { target, index } => {
                self.node_line(id, "index");
                self.children(&[*target, *index]);
            }
            ExprKind::Lambda { params, body } => {
                self.node_line(id, "lambda");
                self.print_function_parts(params, body);
            }
            ExprKind::IfExpr {
                cond,
                then_branch,
                else_branch,
            } => {
                self.node_line(id, "ifexpr");
                self.children(&[*cond, *then_branch, *else_branch]);
            }
            ExprKind::VarDecl(items) => {
                self.node_line(id, "var");
                self.indent += 1;
                for item in items {
                    self.print_expr(item.target);
                    if let Some(init) = item.init {
                        self.children(&[init]);
                    }
                }
                self.indent -= 1;
            }
            ExprKind::FnDecl { name, params, body } => {
                self.node_line(id, "fndec");
                self.children(&[*name]);
                self.print_function_parts(params, body);
            }
            ExprKind::Datatype { name, slots } => {
                self.node_line(id, "datatype");
                self.children(&[*name]);
                self.indent += 1;
                for slot in slots {
                    self.write_indent();
                    self.buf.push_str(&format!("{}: ", slot.name));
                    self.print_type_expr(slot.type_ann);
                    self.buf.push('\n');
                }
                self.indent -= 1;
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.node_line(id, "if");
                self.children(&[*cond, *then_branch]);
                if let Some(else_branch) = else_branch {
                    self.indent += 1;
                    self.text_line("else:");
                    self.children(&[*else_branch]);
                    self.indent -= 1;
                }
            }
            ExprKind::While { cond, body } => {
                self.node_line(id, "while");
                self.children(&[*cond, *body]);
            }
            ExprKind::Block(stmts) => {
                self.node_line(id, "block");
                self.children(stmts);
            }
            ExprKind::Break => self.node_line(id, "break"),
            ExprKind::Return(value) => {
                self.node_line(id, "return");
                if let Some(value) = value {
                    self.children(&[*value]);
                }
            }
        }
    }

    fn print_function_parts(&mut self, params: &[ExprId], body: &[ExprId]) {
        self.indent += 1;
        self.text_line("params:");
        self.children(params);
        self.text_line("body:");
        self.children(body);
        self.indent -= 1;
    }

    fn print_type_expr(&mut self, id: TypeExprId) {
        let module = self.module;
        match &module.type_exprs[id].kind {
            TypeExprKind::Named(name) => self.buf.push_str(name),
            TypeExprKind::Array(elem) => {
                self.buf.push('[');
                self.print_type_expr(*elem);
                self.buf.push(']');
            }
            TypeExprKind::Tuple(elems) => {
                self.buf.push('(');
                for (i, &elem) in elems.iter().enumerate() {
                    if i > 0 {
                        self.buf.push_str(", ");
                    }
                    self.print_type_expr(elem);
                }
                self.buf.push(')');
            }
        }
    }
}
