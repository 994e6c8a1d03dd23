use crate::token::Span;

/// Parsed user source, in one of the two calling conventions.
#[derive(Debug, Clone)]
pub enum Program {
    /// A single (possibly comma-sequenced) expression evaluated once per tick.
    Expression(Expr),
    /// A function body run once; it must `return` the per-tick function.
    Body(Vec<Stmt>),
}

/// An expression with the byte range it was parsed from.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    /// Height of the tree rooted here, leaves included.
    pub depth: usize,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Number(f64),
    Str(String),
    Bool(bool),
    Ident(String),
    Array(Vec<Expr>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// `target = value` or `target op= value`.
    Assign {
        target: Box<Expr>,
        op: Option<BinaryOp>,
        value: Box<Expr>,
    },
    /// `++x`, `x--`, ...
    Update {
        target: Box<Expr>,
        increment: bool,
        prefix: bool,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Member {
        object: Box<Expr>,
        property: String,
    },
    Sequence(Vec<Expr>),
    Function(Box<FunctionDef>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    UShr,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: FunctionBody,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum FunctionBody {
    /// Arrow function with an expression body.
    Expr(Box<Expr>),
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
    pub depth: usize,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    /// `let a = 1, b;`
    Declare {
        kind: DeclKind,
        bindings: Vec<Binding>,
    },
    /// `function name(params) { ... }`
    FunctionDecl(Box<FunctionDef>),
    Return(Option<Expr>),
    If {
        test: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    For {
        init: Option<Box<Stmt>>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    Block(Vec<Stmt>),
    Break,
    Continue,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Let,
    Const,
    Var,
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub name: String,
    pub init: Option<Expr>,
    pub span: Span,
}

fn max_depth<'a>(exprs: impl IntoIterator<Item = &'a Expr>) -> usize {
    exprs.into_iter().map(|e| e.depth).max().unwrap_or(0)
}

fn opt_depth(expr: &Option<Expr>) -> usize {
    expr.as_ref().map_or(0, |e| e.depth)
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        let depth = 1 + kind.child_depth();
        Expr { kind, span, depth }
    }

    /// Whether this expression can appear on the left of `=`.
    pub fn is_assignable(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Ident(_) | ExprKind::Index { .. } | ExprKind::Member { .. }
        )
    }
}

impl ExprKind {
    /// Height of the tallest direct child. Children carry their own height,
    /// so this never walks the tree.
    fn child_depth(&self) -> usize {
        match self {
            ExprKind::Number(_) | ExprKind::Str(_) | ExprKind::Bool(_) | ExprKind::Ident(_) => 0,
            ExprKind::Array(items) | ExprKind::Sequence(items) => max_depth(items),
            ExprKind::Unary { operand, .. } => operand.depth,
            ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
                left.depth.max(right.depth)
            }
            ExprKind::Conditional { test, then, otherwise } => {
                test.depth.max(then.depth).max(otherwise.depth)
            }
            ExprKind::Assign { target, value, .. } => target.depth.max(value.depth),
            ExprKind::Update { target, .. } => target.depth,
            ExprKind::Call { callee, args } => callee.depth.max(max_depth(args)),
            ExprKind::Index { object, index } => object.depth.max(index.depth),
            ExprKind::Member { object, .. } => object.depth,
            ExprKind::Function(def) => def.depth(),
        }
    }
}

impl FunctionDef {
    pub fn depth(&self) -> usize {
        match &self.body {
            FunctionBody::Expr(e) => e.depth,
            FunctionBody::Block(stmts) => stmts.iter().map(|s| s.depth).max().unwrap_or(0),
        }
    }
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        let depth = 1 + kind.child_depth();
        Stmt { kind, span, depth }
    }
}

impl StmtKind {
    fn child_depth(&self) -> usize {
        let stmt = |s: &Stmt| s.depth;
        match self {
            StmtKind::Expr(e) => e.depth,
            StmtKind::Declare { bindings, .. } => bindings.iter().map(|b| opt_depth(&b.init)).max().unwrap_or(0),
            StmtKind::FunctionDecl(def) => def.depth(),
            StmtKind::Return(value) => opt_depth(value),
            StmtKind::If { test, then, otherwise } => test
                .depth
                .max(then.depth)
                .max(otherwise.as_deref().map_or(0, stmt)),
            StmtKind::While { test, body } => test.depth.max(body.depth),
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => init
                .as_deref()
                .map_or(0, stmt)
                .max(opt_depth(test))
                .max(opt_depth(update))
                .max(body.depth),
            StmtKind::Block(stmts) => stmts.iter().map(stmt).max().unwrap_or(0),
            StmtKind::Break | StmtKind::Continue | StmtKind::Empty => 0,
        }
    }
}
