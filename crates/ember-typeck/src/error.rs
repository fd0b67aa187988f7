use ember_lexer::Span;
use smol_str::SmolStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeErrorKind {
    #[error("unbound symbol '{0}'")]
    UnboundSymbol(SmolStr),
    #[error("'{0}' is already defined in this scope")]
    LocalRedefinition(SmolStr),
    #[error("'{0}' is declared twice in the same statement")]
    ImmediateRedefinition(SmolStr),
    #[error("'return' is reserved and cannot be used as a parameter or slot name")]
    ReservedWordAsParameter,
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("type {ty} has no slot '{slot}'")]
    NonexistentSlot { slot: SmolStr, ty: String },
    #[error("{callee} expects {expected} arguments, got {found}")]
    WrongArity {
        callee: String,
        expected: usize,
        found: usize,
    },
    #[error("cannot assign to function '{0}'")]
    AssignToFunction(SmolStr),
    #[error("'break' outside of a loop")]
    BreakOutsideLoop,
    #[error("'return' outside of a function")]
    ReturnOutsideFunction,
    #[error("cannot resolve type {0}")]
    UnresolvedType(String),
    #[error("unknown type '{0}'")]
    UnknownType(SmolStr),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("[{}:{}] {}", .span.start, .span.end, .kind)]
pub struct TypeError {
    pub kind: TypeErrorKind,
    pub span: Span,
}

impl TypeError {
    pub fn new(kind: TypeErrorKind, span: Span) -> Self {
        Self { kind, span }
    }
}
