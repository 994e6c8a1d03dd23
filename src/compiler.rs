use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::ast::*;
use crate::dsp::quantizer::RawSample;
use crate::error::{format_error, location, CompileError, ErrorPhase, RuntimeError};
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::prelude::{self, PreludeItem};
use crate::runtime::{BodyIr, Closure, FunctionIr, Instr, Interpreter, Node, Place, Slot, Value};
use crate::token::Span;
use crate::unbake;

// ── Calling Convention ──────────────────────────────────────

/// How user source is turned into the per-tick function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    /// The source is one expression over `t` (and `mic`), evaluated per tick.
    Expression,
    /// The source is a function body run once; it returns the per-tick
    /// function, called as `(t / sampleRate, sampleRate, t, mic)`.
    Factory,
}

// ── Compiled Function ───────────────────────────────────────

/// A validated, callable user program with its persistent state.
#[derive(Debug)]
pub struct CompiledFunction {
    source: String,
    convention: Convention,
    interp: Interpreter,
    entry: Value,
    mic: Value,
}

impl CompiledFunction {
    pub fn convention(&self) -> Convention {
        self.convention
    }

    /// The unwrapped source this function was built from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate one tick.
    pub fn call_tick(&mut self, t: f64, sample_rate: f64, mic: [f64; 3]) -> Result<RawSample, RuntimeError> {
        if let Value::Array(items) = &mut self.mic {
            let items = Arc::make_mut(items);
            items.clear();
            items.extend(mic.map(Value::Number));
        }
        let result = match self.convention {
            Convention::Expression => {
                let args = [Value::Number(t), self.mic.clone()];
                self.interp.call(&self.entry, &args)?
            }
            Convention::Factory => {
                let args = [
                    Value::Number(t / sample_rate),
                    Value::Number(sample_rate),
                    Value::Number(t),
                    self.mic.clone(),
                ];
                self.interp.call(&self.entry, &args)?
            }
        };
        Ok(to_raw_sample(&result))
    }

    /// `"t=<tick> error (at line L, character C): <message>"`
    pub fn describe_runtime(&self, err: &RuntimeError, t: f64) -> String {
        let loc = err.span.map(|s| location(&self.source, s.start));
        format_error(ErrorPhase::Runtime { t }, &err.message, loc)
    }
}

fn to_raw_sample(value: &Value) -> RawSample {
    match value {
        Value::Array(items) => {
            let mut values = [f64::NAN; 3];
            for (slot, item) in values.iter_mut().zip(items.iter()) {
                *slot = item.to_number();
            }
            RawSample::List {
                values,
                len: items.len().min(3),
            }
        }
        other => RawSample::Scalar(other.to_number()),
    }
}

// ── Public API ──────────────────────────────────────────────

/// Trim the source and strip the `eval(unescape(escape…)))` wrapper if present.
pub fn prepare_source(source: &str) -> String {
    unbake::unwrap(source.trim()).into_owned()
}

/// Build and validate a user function. The trial call uses `t = 0` and a
/// silent microphone sample; any failure is reported and nothing is returned,
/// so callers keep whatever function they already had.
pub fn compile(source: &str, convention: Convention, sample_rate: f64) -> Result<CompiledFunction, CompileError> {
    let code = prepare_source(source);
    let tokens = Lexer::new(&code).tokenize()?;
    let mut parser = Parser::new(tokens);
    let program = match convention {
        Convention::Expression => parser.parse_expression_program()?,
        Convention::Factory => parser.parse_body_program()?,
    };

    let mut resolver = Resolver::new(&code, &program);
    let entry_ir = resolver.resolve_program(&program)?;
    let mut interp = Interpreter::new(resolver.global_count);
    let entry = Value::Function(Arc::new(Closure {
        func: Arc::new(entry_ir),
        captured: Vec::new(),
    }));

    let entry = match convention {
        Convention::Expression => entry,
        Convention::Factory => {
            let produced = interp.call(&entry, &[])?;
            if !produced.is_callable() {
                return Err(RuntimeError::new("Funcbeat did not return a function").into());
            }
            produced
        }
    };

    let mut compiled = CompiledFunction {
        source: code,
        convention,
        interp,
        entry,
        mic: Value::array(vec![Value::Number(0.0); 3]),
    };
    compiled.call_tick(0.0, sample_rate, [0.0; 3])?;
    Ok(compiled)
}

// ── Resolver ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Binding {
    slot: Slot,
    constant: bool,
}

/// Per-function resolution state.
#[derive(Default)]
struct FunctionScope {
    blocks: Vec<HashMap<String, Binding>>,
    /// Slots in the enclosing function copied into this closure on creation.
    captures: Vec<Slot>,
    capture_names: HashMap<String, (usize, bool)>,
    next_local: usize,
    frame_size: usize,
    self_name: Option<String>,
    loops: usize,
}

struct Resolver<'a> {
    source: &'a str,
    functions: Vec<FunctionScope>,
    /// Undeclared names that receive an assignment; they become persistent.
    implicit: HashMap<String, Binding>,
    assigned: HashSet<String>,
    global_count: usize,
}

impl<'a> Resolver<'a> {
    fn new(source: &'a str, program: &Program) -> Self {
        let mut assigned = HashSet::new();
        match program {
            Program::Expression(expr) => collect_assigned_expr(expr, &mut assigned),
            Program::Body(stmts) => stmts
                .iter()
                .for_each(|s| collect_assigned_stmt(s, &mut assigned)),
        }
        Resolver {
            source,
            functions: Vec::new(),
            implicit: HashMap::new(),
            assigned,
            global_count: 0,
        }
    }

    fn resolve_program(&mut self, program: &Program) -> Result<FunctionIr, CompileError> {
        match program {
            Program::Expression(expr) => {
                self.functions.push(FunctionScope::default());
                self.push_block();
                self.declare_local("t", false);
                self.declare_local("mic", false);
                let body = self.resolve_expr(expr)?;
                let scope = self.pop_function();
                Ok(FunctionIr {
                    name: None,
                    params: 2,
                    frame_size: scope.frame_size,
                    body: BodyIr::Expr(body),
                })
            }
            Program::Body(stmts) => {
                self.functions.push(FunctionScope::default());
                let body = self.resolve_block(stmts, true)?;
                let scope = self.pop_function();
                Ok(FunctionIr {
                    name: None,
                    params: 0,
                    frame_size: scope.frame_size,
                    body: BodyIr::Block(body),
                })
            }
        }
    }

    // ── Scopes ──

    fn current(&mut self) -> &mut FunctionScope {
        let last = self.functions.len() - 1;
        &mut self.functions[last]
    }

    fn pop_function(&mut self) -> FunctionScope {
        self.functions.pop().unwrap_or_default()
    }

    fn push_block(&mut self) {
        self.current().blocks.push(HashMap::new());
    }

    fn pop_block(&mut self, saved_next_local: usize) {
        let scope = self.current();
        scope.blocks.pop();
        scope.next_local = saved_next_local;
    }

    fn declare_local(&mut self, name: &str, constant: bool) {
        let scope = self.current();
        let index = scope.next_local;
        scope.next_local += 1;
        scope.frame_size = scope.frame_size.max(scope.next_local);
        if let Some(block) = scope.blocks.last_mut() {
            block.insert(
                name.to_string(),
                Binding {
                    slot: Slot::Local(index),
                    constant,
                },
            );
        }
    }

    fn declare_global(&mut self, name: &str, constant: bool) {
        let slot = Slot::Global(self.global_count);
        self.global_count += 1;
        if let Some(block) = self.current().blocks.last_mut() {
            block.insert(name.to_string(), Binding { slot, constant });
        }
    }

    fn declare(&mut self, name: &str, constant: bool, persistent: bool) {
        let already = self
            .current()
            .blocks
            .last()
            .is_some_and(|b| b.contains_key(name));
        if already {
            return;
        }
        if persistent {
            self.declare_global(name, constant);
        } else {
            self.declare_local(name, constant);
        }
    }

    /// Find `name` in function `depth` or its enclosing functions, adding
    /// captures along the way.
    fn lookup_in(&mut self, depth: usize, name: &str) -> Option<Binding> {
        let scope = &self.functions[depth];
        if let Some(binding) = scope.blocks.iter().rev().find_map(|b| b.get(name)) {
            return Some(*binding);
        }
        if scope.self_name.as_deref() == Some(name) {
            return Some(Binding {
                slot: Slot::SelfRef,
                constant: true,
            });
        }
        if let Some(&(index, constant)) = scope.capture_names.get(name) {
            return Some(Binding {
                slot: Slot::Capture(index),
                constant,
            });
        }
        if depth == 0 {
            return None;
        }
        let outer = self.lookup_in(depth - 1, name)?;
        if let Slot::Global(_) = outer.slot {
            return Some(outer);
        }
        let scope = &mut self.functions[depth];
        let index = scope.captures.len();
        scope.captures.push(outer.slot);
        scope
            .capture_names
            .insert(name.to_string(), (index, outer.constant));
        Some(Binding {
            slot: Slot::Capture(index),
            constant: outer.constant,
        })
    }

    fn lookup(&mut self, name: &str) -> Option<Binding> {
        let depth = self.functions.len().checked_sub(1)?;
        self.lookup_in(depth, name)
            .or_else(|| self.implicit.get(name).copied())
    }

    fn implicit_global(&mut self, name: &str) -> Binding {
        if let Some(binding) = self.implicit.get(name) {
            return *binding;
        }
        let binding = Binding {
            slot: Slot::Global(self.global_count),
            constant: false,
        };
        self.global_count += 1;
        self.implicit.insert(name.to_string(), binding);
        binding
    }

    fn text(&self, span: Span) -> String {
        self.source
            .get(span.start..span.end)
            .unwrap_or("expression")
            .to_string()
    }

    fn is_math(&mut self, expr: &Expr) -> bool {
        matches!(&expr.kind, ExprKind::Ident(name) if name == "Math") && self.lookup("Math").is_none()
    }

    // ── Statements ──

    fn resolve_block(&mut self, stmts: &[Stmt], persistent: bool) -> Result<Vec<Instr>, CompileError> {
        let saved = self.current().next_local;
        self.push_block();

        // First pass: hoist declarations so earlier code can refer to them.
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::Declare { kind, bindings } => {
                    for binding in bindings {
                        self.declare(&binding.name, *kind == DeclKind::Const, persistent);
                    }
                }
                StmtKind::FunctionDecl(def) => {
                    if let Some(name) = &def.name {
                        self.declare(name, false, persistent);
                    }
                }
                _ => {}
            }
        }

        let mut out = Vec::new();
        // Function declarations are created before anything else runs.
        for stmt in stmts {
            if let StmtKind::FunctionDecl(def) = &stmt.kind {
                let closure = self.resolve_function(def)?;
                let name = def.name.as_deref().unwrap_or_default();
                let binding = self.lookup(name).ok_or_else(|| CompileError::Scope {
                    message: format!("{name} is not defined"),
                    span: def.span,
                })?;
                out.push(Instr::Eval(Node::Assign {
                    place: Place::Slot(binding.slot),
                    op: None,
                    value: Box::new(closure),
                }));
            }
        }

        // Second pass: everything else in order.
        for stmt in stmts {
            self.resolve_stmt(stmt, &mut out)?;
        }

        self.pop_block(saved);
        Ok(out)
    }

    fn resolve_nested(&mut self, stmt: &Stmt) -> Result<Vec<Instr>, CompileError> {
        self.resolve_block(std::slice::from_ref(stmt), false)
    }

    fn resolve_stmt(&mut self, stmt: &Stmt, out: &mut Vec<Instr>) -> Result<(), CompileError> {
        match &stmt.kind {
            StmtKind::Expr(expr) => out.push(Instr::Eval(self.resolve_expr(expr)?)),
            StmtKind::Declare { kind, bindings } => {
                for binding in bindings {
                    let value = match &binding.init {
                        Some(init) => self.resolve_expr(init)?,
                        None if *kind == DeclKind::Var => continue,
                        None => Node::Const(Value::Undefined),
                    };
                    let target = self.lookup(&binding.name).ok_or_else(|| CompileError::Scope {
                        message: format!("{} is not defined", binding.name),
                        span: binding.span,
                    })?;
                    out.push(Instr::Eval(Node::Assign {
                        place: Place::Slot(target.slot),
                        op: None,
                        value: Box::new(value),
                    }));
                }
            }
            StmtKind::FunctionDecl(_) | StmtKind::Empty => {}
            StmtKind::Return(value) => {
                let value = value.as_ref().map(|v| self.resolve_expr(v)).transpose()?;
                out.push(Instr::Return(value));
            }
            StmtKind::If {
                test,
                then,
                otherwise,
            } => {
                let test = self.resolve_expr(test)?;
                let then = self.resolve_nested(then)?;
                let otherwise = match otherwise {
                    Some(stmt) => self.resolve_nested(stmt)?,
                    None => Vec::new(),
                };
                out.push(Instr::If {
                    test,
                    then,
                    otherwise,
                });
            }
            StmtKind::While { test, body } => {
                let test = self.resolve_expr(test)?;
                self.current().loops += 1;
                let body = self.resolve_nested(body);
                self.current().loops -= 1;
                out.push(Instr::Loop {
                    test: Some(test),
                    update: None,
                    body: body?,
                });
            }
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => {
                let saved = self.current().next_local;
                self.push_block();
                let mut instrs = Vec::new();
                if let Some(init) = init {
                    if let StmtKind::Declare { kind, bindings } = &init.kind {
                        for binding in bindings {
                            self.declare(&binding.name, *kind == DeclKind::Const, false);
                        }
                    }
                    self.resolve_stmt(init, &mut instrs)?;
                }
                let test = test.as_ref().map(|t| self.resolve_expr(t)).transpose()?;
                let update = update.as_ref().map(|u| self.resolve_expr(u)).transpose()?;
                self.current().loops += 1;
                let body = self.resolve_nested(body);
                self.current().loops -= 1;
                instrs.push(Instr::Loop {
                    test,
                    update,
                    body: body?,
                });
                self.pop_block(saved);
                out.push(Instr::Block(instrs));
            }
            StmtKind::Block(stmts) => out.push(Instr::Block(self.resolve_block(stmts, false)?)),
            StmtKind::Break | StmtKind::Continue => {
                if self.current().loops == 0 {
                    let word = if matches!(stmt.kind, StmtKind::Break) { "break" } else { "continue" };
                    return Err(CompileError::Scope {
                        message: format!("Illegal {word} statement"),
                        span: stmt.span,
                    });
                }
                out.push(if matches!(stmt.kind, StmtKind::Break) {
                    Instr::Break
                } else {
                    Instr::Continue
                });
            }
        }
        Ok(())
    }

    // ── Functions ──

    fn resolve_function(&mut self, def: &FunctionDef) -> Result<Node, CompileError> {
        self.functions.push(FunctionScope {
            self_name: def.name.clone(),
            ..FunctionScope::default()
        });
        self.push_block();
        for param in &def.params {
            self.declare_local(param, false);
        }
        let body = match &def.body {
            FunctionBody::Expr(expr) => self.resolve_expr(expr).map(BodyIr::Expr),
            FunctionBody::Block(stmts) => self.resolve_block(stmts, false).map(BodyIr::Block),
        };
        let scope = self.pop_function();
        let func = FunctionIr {
            name: def.name.clone(),
            params: def.params.len(),
            frame_size: scope.frame_size,
            body: body?,
        };
        Ok(Node::Closure {
            func: Arc::new(func),
            captures: scope.captures,
        })
    }

    // ── Expressions ──

    fn resolve_ident(&mut self, name: &str, span: Span) -> Result<Node, CompileError> {
        if let Some(binding) = self.lookup(name) {
            return Ok(Node::Load(binding.slot));
        }
        match prelude::lookup(name) {
            Some(PreludeItem::Constant(v)) => return Ok(Node::Const(Value::Number(v))),
            Some(PreludeItem::Function(b)) => return Ok(Node::Const(Value::Builtin(b))),
            None => {}
        }
        match name {
            "undefined" => return Ok(Node::Const(Value::Undefined)),
            "NaN" => return Ok(Node::Const(Value::Number(f64::NAN))),
            "Infinity" => return Ok(Node::Const(Value::Number(f64::INFINITY))),
            _ => {}
        }
        if self.assigned.contains(name) {
            return Ok(Node::Load(self.implicit_global(name).slot));
        }
        Err(CompileError::Scope {
            message: format!("{name} is not defined"),
            span,
        })
    }

    fn resolve_place(&mut self, target: &Expr) -> Result<Place, CompileError> {
        match &target.kind {
            ExprKind::Ident(name) => {
                let binding = match self.lookup(name) {
                    Some(binding) => binding,
                    None if prelude::lookup(name).is_some() => {
                        return Err(CompileError::Scope {
                            message: format!("Cannot assign to read-only binding '{name}'"),
                            span: target.span,
                        });
                    }
                    None => self.implicit_global(name),
                };
                if binding.constant {
                    return Err(CompileError::Scope {
                        message: format!("Assignment to constant variable '{name}'"),
                        span: target.span,
                    });
                }
                Ok(Place::Slot(binding.slot))
            }
            ExprKind::Index { object, index } => {
                if !object.is_assignable() {
                    return Err(CompileError::Scope {
                        message: "Invalid assignment target".into(),
                        span: object.span,
                    });
                }
                Ok(Place::Index {
                    object: Box::new(self.resolve_place(object)?),
                    index: Box::new(self.resolve_expr(index)?),
                    span: target.span,
                })
            }
            ExprKind::Member { property, .. } => Err(CompileError::Scope {
                message: format!("Assignment to property '{property}' is not supported"),
                span: target.span,
            }),
            _ => Err(CompileError::Scope {
                message: "Invalid assignment target".into(),
                span: target.span,
            }),
        }
    }

    fn resolve_all(&mut self, exprs: &[Expr]) -> Result<Vec<Node>, CompileError> {
        exprs.iter().map(|e| self.resolve_expr(e)).collect()
    }

    fn boxed(&mut self, expr: &Expr) -> Result<Box<Node>, CompileError> {
        self.resolve_expr(expr).map(Box::new)
    }

    fn resolve_expr(&mut self, expr: &Expr) -> Result<Node, CompileError> {
        let node = match &expr.kind {
            ExprKind::Number(n) => Node::Const(Value::Number(*n)),
            ExprKind::Str(s) => Node::Const(Value::str(s)),
            ExprKind::Bool(b) => Node::Const(Value::Bool(*b)),
            ExprKind::Ident(name) => self.resolve_ident(name, expr.span)?,
            ExprKind::Array(items) => Node::Array(self.resolve_all(items)?),
            ExprKind::Unary { op, operand } => Node::Unary(*op, self.boxed(operand)?),
            ExprKind::Binary { op, left, right } => {
                Node::Binary(*op, self.boxed(left)?, self.boxed(right)?)
            }
            ExprKind::Logical { op, left, right } => {
                Node::Logical(*op, self.boxed(left)?, self.boxed(right)?)
            }
            ExprKind::Conditional {
                test,
                then,
                otherwise,
            } => Node::Conditional(self.boxed(test)?, self.boxed(then)?, self.boxed(otherwise)?),
            ExprKind::Assign { target, op, value } => {
                let place = self.resolve_place(target)?;
                Node::Assign {
                    place,
                    op: *op,
                    value: self.boxed(value)?,
                }
            }
            ExprKind::Update {
                target,
                increment,
                prefix,
            } => Node::Update {
                place: self.resolve_place(target)?,
                increment: *increment,
                prefix: *prefix,
            },
            ExprKind::Call { callee, args } => match &callee.kind {
                ExprKind::Member { object, property } if !self.is_math(object) => Node::Method {
                    object: self.boxed(object)?,
                    name: property.clone(),
                    args: self.resolve_all(args)?,
                    span: expr.span,
                },
                _ => Node::Call {
                    callee: self.boxed(callee)?,
                    args: self.resolve_all(args)?,
                    label: self.text(callee.span),
                    span: expr.span,
                },
            },
            ExprKind::Index { object, index } => Node::Index {
                object: self.boxed(object)?,
                index: self.boxed(index)?,
                span: expr.span,
            },
            ExprKind::Member { object, property } => {
                if self.is_math(object) {
                    match prelude::lookup_math(property) {
                        Some(PreludeItem::Constant(v)) => Node::Const(Value::Number(v)),
                        Some(PreludeItem::Function(b)) => Node::Const(Value::Builtin(b)),
                        None => Node::Const(Value::Undefined),
                    }
                } else {
                    Node::Member {
                        object: self.boxed(object)?,
                        property: property.clone(),
                        span: expr.span,
                    }
                }
            }
            ExprKind::Sequence(items) => Node::Sequence(self.resolve_all(items)?),
            ExprKind::Function(def) => self.resolve_function(def)?,
        };
        Ok(node)
    }
}

// ── Assigned-name collection ────────────────────────────────

fn collect_assigned_expr(expr: &Expr, out: &mut HashSet<String>) {
    let mut walk = |e: &Expr| collect_assigned_expr(e, out);
    match &expr.kind {
        ExprKind::Number(_) | ExprKind::Str(_) | ExprKind::Bool(_) | ExprKind::Ident(_) => {}
        ExprKind::Array(items) | ExprKind::Sequence(items) => items.iter().for_each(walk),
        ExprKind::Unary { operand, .. } => walk(operand),
        ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
            walk(left);
            walk(right);
        }
        ExprKind::Conditional {
            test,
            then,
            otherwise,
        } => {
            walk(test);
            walk(then);
            walk(otherwise);
        }
        ExprKind::Assign { target, value, .. } => {
            if let ExprKind::Ident(name) = &target.kind {
                out.insert(name.clone());
            }
            collect_assigned_expr(target, out);
            collect_assigned_expr(value, out);
        }
        ExprKind::Update { target, .. } => {
            if let ExprKind::Ident(name) = &target.kind {
                out.insert(name.clone());
            }
            collect_assigned_expr(target, out);
        }
        ExprKind::Call { callee, args } => {
            walk(callee);
            args.iter().for_each(walk);
        }
        ExprKind::Index { object, index } => {
            walk(object);
            walk(index);
        }
        ExprKind::Member { object, .. } => walk(object),
        ExprKind::Function(def) => collect_assigned_function(def, out),
    }
}

fn collect_assigned_function(def: &FunctionDef, out: &mut HashSet<String>) {
    match &def.body {
        FunctionBody::Expr(e) => collect_assigned_expr(e, out),
        FunctionBody::Block(stmts) => stmts.iter().for_each(|s| collect_assigned_stmt(s, out)),
    }
}

fn collect_assigned_stmt(stmt: &Stmt, out: &mut HashSet<String>) {
    match &stmt.kind {
        StmtKind::Expr(e) => collect_assigned_expr(e, out),
        StmtKind::Declare { bindings, .. } => bindings
            .iter()
            .filter_map(|b| b.init.as_ref())
            .for_each(|e| collect_assigned_expr(e, out)),
        StmtKind::FunctionDecl(def) => collect_assigned_function(def, out),
        StmtKind::Return(value) => {
            if let Some(e) = value {
                collect_assigned_expr(e, out);
            }
        }
        StmtKind::If {
            test,
            then,
            otherwise,
        } => {
            collect_assigned_expr(test, out);
            collect_assigned_stmt(then, out);
            if let Some(s) = otherwise {
                collect_assigned_stmt(s, out);
            }
        }
        StmtKind::While { test, body } => {
            collect_assigned_expr(test, out);
            collect_assigned_stmt(body, out);
        }
        StmtKind::For {
            init,
            test,
            update,
            body,
        } => {
            if let Some(s) = init {
                collect_assigned_stmt(s, out);
            }
            for e in test.iter().chain(update.iter()) {
                collect_assigned_expr(e, out);
            }
            collect_assigned_stmt(body, out);
        }
        StmtKind::Block(stmts) => stmts.iter().for_each(|s| collect_assigned_stmt(s, out)),
        StmtKind::Break | StmtKind::Continue | StmtKind::Empty => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(sample: RawSample) -> f64 {
        match sample {
            RawSample::Scalar(v) => v,
            other => panic!("expected scalar, got {other:?}"),
        }
    }

    fn eval_at(source: &str, t: f64) -> f64 {
        let mut f = compile(source, Convention::Expression, 8000.0).unwrap();
        scalar(f.call_tick(t, 8000.0, [0.0; 3]).unwrap())
    }

    #[test]
    fn test_compile_simple_expression() {
        assert_eq!(eval_at("t&255", 300.0), 44.0);
        assert_eq!(eval_at("t*(t>>5|t>>8)&255", 0.0), 0.0);
        assert_eq!(eval_at("", 12.0), 0.0);
    }

    #[test]
    fn test_implicit_names_persist_across_ticks() {
        let mut f = compile("a = (a|0) + 1, a", Convention::Expression, 8000.0).unwrap();
        // The trial call already ran once.
        assert_eq!(scalar(f.call_tick(1.0, 8000.0, [0.0; 3]).unwrap()), 2.0);
        assert_eq!(scalar(f.call_tick(2.0, 8000.0, [0.0; 3]).unwrap()), 3.0);
    }

    #[test]
    fn test_factory_state_and_arguments() {
        let src = "let n = 0\nreturn (time, rate, t) => (n++, t + n + rate / 8000)";
        let mut f = compile(src, Convention::Factory, 8000.0).unwrap();
        assert_eq!(f.convention(), Convention::Factory);
        let v = scalar(f.call_tick(10.0, 8000.0, [0.0; 3]).unwrap());
        assert_eq!(v, 13.0);
    }

    #[test]
    fn test_factory_must_return_function() {
        let err = compile("return 5", Convention::Factory, 8000.0).unwrap_err();
        assert!(err.is_compiled());
        assert!(err.describe("return 5").contains("did not return a function"));
    }

    #[test]
    fn test_unknown_name_reports_location() {
        let err = compile("t*q", Convention::Expression, 8000.0).unwrap_err();
        assert!(!err.is_compiled());
        assert_eq!(
            err.describe("t*q"),
            "compilation error (at line 1, character 3): q is not defined"
        );
    }

    #[test]
    fn test_prelude_and_const_are_read_only() {
        let err = compile("sin = 1", Convention::Expression, 8000.0).unwrap_err();
        assert!(err.message().contains("read-only"), "{}", err.message());
        let err = compile("const a = 1; a = 2; return t => t", Convention::Factory, 8000.0).unwrap_err();
        assert!(err.message().contains("constant"), "{}", err.message());
    }

    #[test]
    fn test_runtime_error_location_and_phase() {
        let mut f = compile("t > 5 ? br(t, 40) : t", Convention::Expression, 8000.0).unwrap();
        let err = f.call_tick(6.0, 8000.0, [0.0; 3]).unwrap_err();
        assert_eq!(
            f.describe_runtime(&err, 6.0),
            "t=6 error (at line 1, character 9): br() Size cannot be greater than 32"
        );
    }

    #[test]
    fn test_strings_arrays_and_math_namespace() {
        assert_eq!(eval_at("'ABC'.charCodeAt(t%3)", 1.0), 66.0);
        assert_eq!(eval_at("[3,5,7][t&3] | 0", 2.0), 7.0);
        assert_eq!(eval_at("Math.floor(Math.PI * t)", 1.0), 3.0);
        assert_eq!(eval_at("'hello'.length", 0.0), 5.0);
        let mut f = compile("[t, t*2]", Convention::Expression, 8000.0).unwrap();
        match f.call_tick(1.0, 8000.0, [0.0; 3]).unwrap() {
            RawSample::List { values, len } => {
                assert_eq!(len, 2);
                assert_eq!(&values[..2], &[1.0, 2.0]);
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn test_mic_binding() {
        let mut f = compile("mic[2]", Convention::Expression, 8000.0).unwrap();
        let v = scalar(f.call_tick(0.0, 8000.0, [0.2, 0.4, 0.3]).unwrap());
        assert!((v - 0.3).abs() < 1e-12, "mic[2] = {v}");
    }

    #[test]
    fn test_functions_closures_and_recursion() {
        assert_eq!(eval_at("(f => f(3))(x => x * t)", 2.0), 6.0);
        let src = "function fib(n) { return n < 2 ? n : fib(n - 1) + fib(n - 2) }\nreturn t => fib(10)";
        let mut f = compile(src, Convention::Factory, 8000.0).unwrap();
        assert_eq!(scalar(f.call_tick(0.0, 8000.0, [0.0; 3]).unwrap()), 55.0);
    }

    #[test]
    fn test_loops_and_locals() {
        let src = "return t => { let s = 0; for (let i = 0; i < 4; i++) { if (i == 2) continue; s += i } return s + t }";
        let mut f = compile(src, Convention::Factory, 8000.0).unwrap();
        assert_eq!(scalar(f.call_tick(1.0, 8000.0, [0.0; 3]).unwrap()), 5.0);
    }

    #[test]
    fn test_array_mutation_in_place() {
        let src = "let buf = [0, 0]\nreturn (x, r, t) => (buf[t & 1] = t, buf[0] + buf[1])";
        let mut f = compile(src, Convention::Factory, 8000.0).unwrap();
        f.call_tick(4.0, 8000.0, [0.0; 3]).unwrap();
        assert_eq!(scalar(f.call_tick(5.0, 8000.0, [0.0; 3]).unwrap()), 9.0);
    }

    #[test]
    fn test_illegal_break() {
        let err = compile("break", Convention::Factory, 8000.0).unwrap_err();
        assert!(err.message().contains("Illegal break"));
    }

    #[test]
    fn test_trial_call_failure_is_validation() {
        let err = compile("undefined[0]", Convention::Expression, 8000.0).unwrap_err();
        assert!(err.is_compiled());
        assert_eq!(err.phase(), ErrorPhase::Runtime { t: 0.0 });
    }

    #[test]
    fn test_deep_nesting_is_a_compile_error() {
        let src = format!("{}t{}", "(".repeat(10_000), ")".repeat(10_000));
        let err = compile(&src, Convention::Expression, 8000.0).unwrap_err();
        assert!(!err.is_compiled());
        assert!(err.describe(&src).contains("nested too deeply"), "{}", err.describe(&src));

        let chain = vec!["t"; 5_000].join("^");
        assert!(compile(&chain, Convention::Expression, 8000.0).is_err());
        let chain = vec!["t"; 100].join("^");
        let mut f = compile(&chain, Convention::Expression, 8000.0).unwrap();
        assert_eq!(scalar(f.call_tick(7.0, 8000.0, [0.0; 3]).unwrap()), 0.0);
    }
}
