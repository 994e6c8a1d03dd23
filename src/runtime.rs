//! Tree-walking evaluator for resolved user programs.
//!
//! The compiler lowers the AST into [`Node`]/[`Instr`] trees whose names are
//! already resolved to [`Slot`]s. Locals live on a value stack that is reused
//! across calls, so steady-state evaluation of a scalar expression does not
//! allocate. Persistent values live in `globals` and survive between ticks.

use std::sync::Arc;

use crate::ast::{BinaryOp, LogicalOp, UnaryOp};
use crate::error::RuntimeError;
use crate::prelude::{js_pow, to_int32, to_uint32, Builtin};
use crate::token::Span;

pub const MAX_CALL_DEPTH: usize = 256;
pub const MAX_LOOP_ITERATIONS: u64 = 10_000_000;

/// Largest index an array assignment may grow to.
const MAX_ARRAY_LEN: usize = 1 << 24;

// ── Values ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Bool(bool),
    Number(f64),
    Str(Arc<str>),
    /// Copy-on-write: writes go through `Arc::make_mut`.
    Array(Arc<Vec<Value>>),
    Function(Arc<Closure>),
    Builtin(&'static Builtin),
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(Arc::from(s))
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Arc::new(items))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "object",
            Value::Function(_) | Value::Builtin(_) => "function",
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Builtin(_))
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Array(_) | Value::Function(_) | Value::Builtin(_) => true,
        }
    }

    /// ECMAScript ToNumber.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Bool(b) => *b as u8 as f64,
            Value::Number(n) => *n,
            Value::Str(s) => string_to_number(s),
            Value::Array(items) => match items.as_slice() {
                [] => 0.0,
                [Value::Undefined] => 0.0,
                [only] => only.to_number(),
                _ => f64::NAN,
            },
            Value::Function(_) | Value::Builtin(_) => f64::NAN,
        }
    }

    /// ECMAScript ToString.
    pub fn to_js_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".into(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::Str(s) => s.to_string(),
            Value::Array(items) => items
                .iter()
                .map(|v| match v {
                    Value::Undefined => String::new(),
                    other => other.to_js_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
            Value::Function(c) => format!(
                "function {}() {{ ... }}",
                c.func.name.as_deref().unwrap_or("")
            ),
            Value::Builtin(b) => format!("function {}() {{ [native code] }}", b.name),
        }
    }
}

fn string_to_number(s: &str) -> f64 {
    let s = s.trim();
    if s.is_empty() {
        return 0.0;
    }
    let radix = |digits: &str, radix: u32| {
        u64::from_str_radix(digits, radix)
            .map(|v| v as f64)
            .unwrap_or(f64::NAN)
    };
    match s {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return radix(hex, 16);
    }
    if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        return radix(bin, 2);
    }
    if let Some(oct) = s.strip_prefix("0o").or_else(|| s.strip_prefix("0O")) {
        return radix(oct, 8);
    }
    // Rust accepts "inf"/"nan" spellings that JS does not.
    if s.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return f64::NAN;
    }
    s.parse().unwrap_or(f64::NAN)
}

/// Number formatting as JS prints it.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".into();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.into();
    }
    if n == 0.0 {
        return "0".into();
    }
    if (1e-6..1e21).contains(&n.abs()) {
        return format!("{n}");
    }
    let s = format!("{n:e}");
    match s.split_once('e') {
        Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
        _ => s,
    }
}

/// `==`
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    use Value::*;
    match (a, b) {
        (Undefined, Undefined) => true,
        (Undefined, _) | (_, Undefined) => false,
        (Number(x), Number(y)) => x == y,
        (Str(x), Str(y)) => x == y,
        (Bool(x), Bool(y)) => x == y,
        (Bool(x), other) | (other, Bool(x)) => loose_eq(&Number(*x as u8 as f64), other),
        (Number(x), Str(_)) | (Str(_), Number(x)) => {
            let other = if matches!(a, Number(_)) { b } else { a };
            *x == other.to_number()
        }
        (Array(x), Array(y)) => Arc::ptr_eq(x, y),
        (Array(_), other) | (other, Array(_)) if matches!(other, Number(_) | Str(_)) => {
            let arr = if matches!(a, Array(_)) { a } else { b };
            loose_eq(&Value::str(&arr.to_js_string()), other)
        }
        _ => strict_eq(a, b),
    }
}

/// `===`
pub fn strict_eq(a: &Value, b: &Value) -> bool {
    use Value::*;
    match (a, b) {
        (Undefined, Undefined) => true,
        (Number(x), Number(y)) => x == y,
        (Str(x), Str(y)) => x == y,
        (Bool(x), Bool(y)) => x == y,
        (Array(x), Array(y)) => Arc::ptr_eq(x, y),
        (Function(x), Function(y)) => Arc::ptr_eq(x, y),
        (Builtin(x), Builtin(y)) => std::ptr::eq(*x, *y),
        _ => false,
    }
}

pub fn unary(op: UnaryOp, v: &Value) -> Value {
    match op {
        UnaryOp::Neg => Value::Number(-v.to_number()),
        UnaryOp::Plus => Value::Number(v.to_number()),
        UnaryOp::Not => Value::Bool(!v.truthy()),
        UnaryOp::BitNot => Value::Number(!to_int32(v.to_number()) as f64),
    }
}

pub fn binary(op: BinaryOp, a: &Value, b: &Value) -> Value {
    use BinaryOp::*;
    let stringish = |v: &Value| {
        matches!(
            v,
            Value::Str(_) | Value::Array(_) | Value::Function(_) | Value::Builtin(_)
        )
    };
    let num = |f: fn(f64, f64) -> f64| Value::Number(f(a.to_number(), b.to_number()));
    let int = |f: fn(i32, u32) -> i32| {
        Value::Number(f(to_int32(a.to_number()), to_uint32(b.to_number()) & 31) as f64)
    };
    match op {
        Add if stringish(a) || stringish(b) => {
            let mut s = a.to_js_string();
            s.push_str(&b.to_js_string());
            Value::Str(Arc::from(s))
        }
        Add => num(|x, y| x + y),
        Sub => num(|x, y| x - y),
        Mul => num(|x, y| x * y),
        Div => num(|x, y| x / y),
        Rem => num(|x, y| x % y),
        Pow => num(js_pow),
        BitAnd => Value::Number((to_int32(a.to_number()) & to_int32(b.to_number())) as f64),
        BitOr => Value::Number((to_int32(a.to_number()) | to_int32(b.to_number())) as f64),
        BitXor => Value::Number((to_int32(a.to_number()) ^ to_int32(b.to_number())) as f64),
        Shl => int(|x, s| x.wrapping_shl(s)),
        Shr => int(|x, s| x >> s),
        UShr => {
            let s = to_uint32(b.to_number()) & 31;
            Value::Number((to_uint32(a.to_number()) >> s) as f64)
        }
        Eq => Value::Bool(loose_eq(a, b)),
        NotEq => Value::Bool(!loose_eq(a, b)),
        StrictEq => Value::Bool(strict_eq(a, b)),
        StrictNotEq => Value::Bool(!strict_eq(a, b)),
        Lt | Gt | LtEq | GtEq => Value::Bool(compare(op, a, b)),
    }
}

fn compare(op: BinaryOp, a: &Value, b: &Value) -> bool {
    if let (Value::Str(x), Value::Str(y)) = (a, b) {
        return match op {
            BinaryOp::Lt => x < y,
            BinaryOp::Gt => x > y,
            BinaryOp::LtEq => x <= y,
            _ => x >= y,
        };
    }
    let (x, y) = (a.to_number(), b.to_number());
    match op {
        BinaryOp::Lt => x < y,
        BinaryOp::Gt => x > y,
        BinaryOp::LtEq => x <= y,
        _ => x >= y,
    }
}

/// UTF-16 code unit `idx` of `s`.
fn code_unit(s: &str, idx: f64) -> Option<u16> {
    if idx < 0.0 || idx.fract() != 0.0 {
        return None;
    }
    s.encode_utf16().nth(idx as usize)
}

fn array_index(idx: &Value) -> Option<usize> {
    let n = match idx {
        Value::Number(n) => *n,
        Value::Str(s) => string_to_number(s),
        _ => return None,
    };
    (n >= 0.0 && n.fract() == 0.0 && n < 4_294_967_295.0).then_some(n as usize)
}

fn get_index(object: &Value, idx: &Value, span: Span) -> Result<Value, RuntimeError> {
    match object {
        Value::Undefined => Err(RuntimeError::at(
            format!(
                "Cannot read properties of undefined (reading '{}')",
                idx.to_js_string()
            ),
            span,
        )),
        Value::Array(items) => {
            if let Some(i) = array_index(idx) {
                return Ok(items.get(i).cloned().unwrap_or_default());
            }
            get_member(object, &idx.to_js_string(), span)
        }
        Value::Str(s) => match idx {
            Value::Number(n) => Ok(code_unit(s, *n)
                .map(|u| Value::str(&String::from_utf16_lossy(&[u])))
                .unwrap_or_default()),
            other => get_member(object, &other.to_js_string(), span),
        },
        _ => Ok(Value::Undefined),
    }
}

fn get_member(object: &Value, property: &str, span: Span) -> Result<Value, RuntimeError> {
    match (object, property) {
        (Value::Undefined, _) => Err(RuntimeError::at(
            format!("Cannot read properties of undefined (reading '{property}')"),
            span,
        )),
        (Value::Array(items), "length") => Ok(Value::Number(items.len() as f64)),
        (Value::Str(s), "length") => Ok(Value::Number(s.encode_utf16().count() as f64)),
        _ => Ok(Value::Undefined),
    }
}

fn index_mut<'a>(
    object: &'a mut Value,
    idx: &Value,
    span: Span,
) -> Result<&'a mut Value, RuntimeError> {
    let type_name = object.type_name();
    if let Value::Array(items) = object {
        if let Some(i) = array_index(idx) {
            if i < items.len() {
                return Ok(&mut Arc::make_mut(items)[i]);
            }
        }
    }
    Err(RuntimeError::at(
        format!(
            "Cannot set properties of {} (setting '{}')",
            if type_name == "undefined" { "undefined" } else { "a non-array value" },
            idx.to_js_string()
        ),
        span,
    ))
}

fn set_index(object: &mut Value, idx: &Value, value: Value, span: Span) -> Result<(), RuntimeError> {
    match object {
        Value::Undefined => Err(RuntimeError::at(
            format!(
                "Cannot set properties of undefined (setting '{}')",
                idx.to_js_string()
            ),
            span,
        )),
        Value::Array(items) => {
            let Some(i) = array_index(idx) else {
                return Ok(());
            };
            if i >= MAX_ARRAY_LEN {
                return Err(RuntimeError::at("Invalid array length", span));
            }
            let items = Arc::make_mut(items);
            if i >= items.len() {
                items.resize(i + 1, Value::Undefined);
            }
            items[i] = value;
            Ok(())
        }
        // Writes to properties of primitives are silently dropped.
        _ => Ok(()),
    }
}

// ── Resolved program representation ─────────────────────────

/// Where a resolved name lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Parameter or local of the running function.
    Local(usize),
    /// Value copied from an enclosing function when the closure was created.
    Capture(usize),
    /// Persistent value shared by every function of the program.
    Global(usize),
    /// The running function itself (its own name inside its body).
    SelfRef,
}

#[derive(Debug)]
pub enum Place {
    Slot(Slot),
    Index {
        object: Box<Place>,
        index: Box<Node>,
        span: Span,
    },
}

#[derive(Debug)]
pub enum Node {
    Const(Value),
    Load(Slot),
    Array(Vec<Node>),
    Unary(UnaryOp, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Logical(LogicalOp, Box<Node>, Box<Node>),
    Conditional(Box<Node>, Box<Node>, Box<Node>),
    Assign {
        place: Place,
        op: Option<BinaryOp>,
        value: Box<Node>,
    },
    Update {
        place: Place,
        increment: bool,
        prefix: bool,
    },
    Call {
        callee: Box<Node>,
        args: Vec<Node>,
        /// Source text of the callee, for "is not a function" errors.
        label: String,
        span: Span,
    },
    Method {
        object: Box<Node>,
        name: String,
        args: Vec<Node>,
        span: Span,
    },
    Index {
        object: Box<Node>,
        index: Box<Node>,
        span: Span,
    },
    Member {
        object: Box<Node>,
        property: String,
        span: Span,
    },
    Sequence(Vec<Node>),
    Closure {
        func: Arc<FunctionIr>,
        captures: Vec<Slot>,
    },
}

#[derive(Debug)]
pub enum Instr {
    Eval(Node),
    Return(Option<Node>),
    If {
        test: Node,
        then: Vec<Instr>,
        otherwise: Vec<Instr>,
    },
    /// `while` and `for`; a `for` initializer is emitted before the loop.
    Loop {
        test: Option<Node>,
        update: Option<Node>,
        body: Vec<Instr>,
    },
    Block(Vec<Instr>),
    Break,
    Continue,
}

#[derive(Debug)]
pub enum BodyIr {
    Expr(Node),
    Block(Vec<Instr>),
}

#[derive(Debug)]
pub struct FunctionIr {
    pub name: Option<String>,
    pub params: usize,
    /// Parameters plus every local the body declares.
    pub frame_size: usize,
    pub body: BodyIr,
}

#[derive(Debug)]
pub struct Closure {
    pub func: Arc<FunctionIr>,
    pub captured: Vec<Value>,
}

// ── Interpreter ─────────────────────────────────────────────

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

#[derive(Debug, Default)]
struct Frame {
    capture_base: usize,
    local_base: usize,
    closure: Option<Arc<Closure>>,
}

#[derive(Debug)]
pub struct Interpreter {
    globals: Vec<Value>,
    stack: Vec<Value>,
    frame: Frame,
    depth: usize,
    iterations: u64,
}

impl Interpreter {
    pub fn new(globals: usize) -> Self {
        Interpreter {
            globals: vec![Value::Undefined; globals],
            stack: Vec::with_capacity(64),
            frame: Frame::default(),
            depth: 0,
            iterations: 0,
        }
    }

    /// Invoke `callee` from outside user code. Loop budgets are per invocation.
    pub fn call(&mut self, callee: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
        self.iterations = 0;
        let result = match callee {
            Value::Function(closure) => {
                let base = self.stack.len();
                self.stack.extend(closure.captured.iter().cloned());
                self.stack
                    .extend(args.iter().take(closure.func.params).cloned());
                self.run_frame(closure.clone(), base, Span::default())
            }
            Value::Builtin(b) => {
                let nums: Vec<f64> = args.iter().map(Value::to_number).collect();
                (b.func)(&nums).map(Value::Number).map_err(RuntimeError::new)
            }
            other => Err(RuntimeError::new(format!(
                "{} is not a function",
                other.type_name()
            ))),
        };
        if result.is_err() {
            self.stack.clear();
            self.depth = 0;
            self.frame = Frame::default();
        }
        result
    }

    fn run_frame(&mut self, closure: Arc<Closure>, base: usize, span: Span) -> Result<Value, RuntimeError> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(RuntimeError::at("Maximum call stack size exceeded", span));
        }
        let captures = closure.captured.len();
        self.stack
            .resize(base + captures + closure.func.frame_size, Value::Undefined);
        let saved = std::mem::replace(
            &mut self.frame,
            Frame {
                capture_base: base,
                local_base: base + captures,
                closure: Some(closure.clone()),
            },
        );
        self.depth += 1;
        let result = match &closure.func.body {
            BodyIr::Expr(node) => self.eval(node),
            BodyIr::Block(instrs) => match self.exec_block(instrs) {
                Ok(Flow::Return(v)) => Ok(v),
                Ok(_) => Ok(Value::Undefined),
                Err(e) => Err(e),
            },
        };
        self.depth -= 1;
        self.frame = saved;
        self.stack.truncate(base);
        result
    }

    fn call_node(&mut self, callee: Value, args: &[Node], label: &str, span: Span) -> Result<Value, RuntimeError> {
        match callee {
            Value::Function(closure) => {
                let base = self.stack.len();
                self.stack.extend(closure.captured.iter().cloned());
                let params = closure.func.params;
                for (i, arg) in args.iter().enumerate() {
                    let v = self.eval(arg)?;
                    if i < params {
                        self.stack.push(v);
                    }
                }
                self.run_frame(closure, base, span)
            }
            Value::Builtin(b) => {
                let mut buf = [0.0f64; 8];
                let result = if args.len() <= buf.len() {
                    for (slot, arg) in buf.iter_mut().zip(args) {
                        *slot = self.eval(arg)?.to_number();
                    }
                    (b.func)(&buf[..args.len()])
                } else {
                    let mut nums = Vec::with_capacity(args.len());
                    for arg in args {
                        nums.push(self.eval(arg)?.to_number());
                    }
                    (b.func)(&nums)
                };
                result
                    .map(Value::Number)
                    .map_err(|msg| RuntimeError::at(msg, span))
            }
            _ => Err(RuntimeError::at(format!("{label} is not a function"), span)),
        }
    }

    // ── Slots ──

    fn load(&self, slot: Slot) -> Value {
        let v = match slot {
            Slot::Local(i) => self.stack.get(self.frame.local_base + i),
            Slot::Capture(i) => self.stack.get(self.frame.capture_base + i),
            Slot::Global(i) => self.globals.get(i),
            Slot::SelfRef => {
                return self
                    .frame
                    .closure
                    .clone()
                    .map(Value::Function)
                    .unwrap_or_default();
            }
        };
        v.cloned().unwrap_or_default()
    }

    fn slot_mut(&mut self, slot: Slot) -> Result<&mut Value, RuntimeError> {
        let v = match slot {
            Slot::Local(i) => self.stack.get_mut(self.frame.local_base + i),
            Slot::Capture(i) => self.stack.get_mut(self.frame.capture_base + i),
            Slot::Global(i) => self.globals.get_mut(i),
            Slot::SelfRef => None,
        };
        v.ok_or_else(|| RuntimeError::new("Assignment to constant variable."))
    }

    /// Evaluate the index expressions of a place, outermost last.
    fn resolve_place(&mut self, place: &Place, path: &mut Vec<(Value, Span)>) -> Result<Slot, RuntimeError> {
        match place {
            Place::Slot(slot) => Ok(*slot),
            Place::Index {
                object,
                index,
                span,
            } => {
                let root = self.resolve_place(object, path)?;
                let idx = self.eval(index)?;
                path.push((idx, *span));
                Ok(root)
            }
        }
    }

    fn read_place(&self, root: Slot, path: &[(Value, Span)]) -> Result<Value, RuntimeError> {
        let mut v = self.load(root);
        for (idx, span) in path {
            v = get_index(&v, idx, *span)?;
        }
        Ok(v)
    }

    fn write_place(&mut self, root: Slot, path: &[(Value, Span)], value: Value) -> Result<(), RuntimeError> {
        let mut target = self.slot_mut(root)?;
        match path.split_last() {
            None => {
                *target = value;
                Ok(())
            }
            Some(((last, span), init)) => {
                for (idx, span) in init {
                    target = index_mut(target, idx, *span)?;
                }
                set_index(target, last, value, *span)
            }
        }
    }

    fn assign(&mut self, place: &Place, op: Option<BinaryOp>, value: &Node) -> Result<Value, RuntimeError> {
        let mut path = Vec::new();
        let root = self.resolve_place(place, &mut path)?;
        let new = match op {
            None => self.eval(value)?,
            Some(op) => {
                let old = self.read_place(root, &path)?;
                let rhs = self.eval(value)?;
                binary(op, &old, &rhs)
            }
        };
        self.write_place(root, &path, new.clone())?;
        Ok(new)
    }

    fn update(&mut self, place: &Place, increment: bool, prefix: bool) -> Result<Value, RuntimeError> {
        let mut path = Vec::new();
        let root = self.resolve_place(place, &mut path)?;
        let old = self.read_place(root, &path)?.to_number();
        let new = if increment { old + 1.0 } else { old - 1.0 };
        self.write_place(root, &path, Value::Number(new))?;
        Ok(Value::Number(if prefix { new } else { old }))
    }

    // ── Expressions ──

    fn eval(&mut self, node: &Node) -> Result<Value, RuntimeError> {
        match node {
            Node::Const(v) => Ok(v.clone()),
            Node::Load(slot) => Ok(self.load(*slot)),
            Node::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                Ok(Value::array(values))
            }
            Node::Unary(op, operand) => Ok(unary(*op, &self.eval(operand)?)),
            Node::Binary(op, left, right) => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                Ok(binary(*op, &l, &r))
            }
            Node::Logical(op, left, right) => {
                let l = self.eval(left)?;
                let short = match op {
                    LogicalOp::And => !l.truthy(),
                    LogicalOp::Or => l.truthy(),
                };
                if short { Ok(l) } else { self.eval(right) }
            }
            Node::Conditional(test, then, otherwise) => {
                if self.eval(test)?.truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Node::Assign { place, op, value } => self.assign(place, *op, value),
            Node::Update {
                place,
                increment,
                prefix,
            } => self.update(place, *increment, *prefix),
            Node::Call {
                callee,
                args,
                label,
                span,
            } => {
                let f = self.eval(callee)?;
                self.call_node(f, args, label, *span)
            }
            Node::Method {
                object,
                name,
                args,
                span,
            } => {
                let target = self.eval(object)?;
                let mut first = None;
                for (i, arg) in args.iter().enumerate() {
                    let v = self.eval(arg)?;
                    if i == 0 {
                        first = Some(v);
                    }
                }
                match (&target, name.as_str()) {
                    (Value::Str(s), "charCodeAt") => {
                        let idx = first.map(|v| v.to_number()).unwrap_or(0.0);
                        let idx = if idx.is_nan() { 0.0 } else { idx.trunc() };
                        Ok(Value::Number(
                            code_unit(s, idx).map(f64::from).unwrap_or(f64::NAN),
                        ))
                    }
                    (Value::Undefined, _) => Err(RuntimeError::at(
                        format!("Cannot read properties of undefined (reading '{name}')"),
                        *span,
                    )),
                    _ => Err(RuntimeError::at(
                        format!("{}.{name} is not a function", target.type_name()),
                        *span,
                    )),
                }
            }
            Node::Index {
                object,
                index,
                span,
            } => {
                let o = self.eval(object)?;
                let i = self.eval(index)?;
                get_index(&o, &i, *span)
            }
            Node::Member {
                object,
                property,
                span,
            } => {
                let o = self.eval(object)?;
                get_member(&o, property, *span)
            }
            Node::Sequence(items) => {
                let mut last = Value::Undefined;
                for item in items {
                    last = self.eval(item)?;
                }
                Ok(last)
            }
            Node::Closure { func, captures } => {
                let captured = captures.iter().map(|s| self.load(*s)).collect();
                Ok(Value::Function(Arc::new(Closure {
                    func: func.clone(),
                    captured,
                })))
            }
        }
    }

    // ── Statements ──

    fn exec_block(&mut self, instrs: &[Instr]) -> Result<Flow, RuntimeError> {
        for instr in instrs {
            match self.exec(instr)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, instr: &Instr) -> Result<Flow, RuntimeError> {
        match instr {
            Instr::Eval(node) => {
                self.eval(node)?;
                Ok(Flow::Normal)
            }
            Instr::Return(value) => {
                let v = match value {
                    Some(node) => self.eval(node)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(v))
            }
            Instr::If {
                test,
                then,
                otherwise,
            } => {
                if self.eval(test)?.truthy() {
                    self.exec_block(then)
                } else {
                    self.exec_block(otherwise)
                }
            }
            Instr::Loop { test, update, body } => {
                loop {
                    if let Some(test) = test {
                        if !self.eval(test)?.truthy() {
                            break;
                        }
                    }
                    self.iterations += 1;
                    if self.iterations > MAX_LOOP_ITERATIONS {
                        return Err(RuntimeError::new("Loop iteration limit exceeded"));
                    }
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Continue | Flow::Normal => {}
                    }
                    if let Some(update) = update {
                        self.eval(update)?;
                    }
                }
                Ok(Flow::Normal)
            }
            Instr::Block(instrs) => self.exec_block(instrs),
            Instr::Break => Ok(Flow::Break),
            Instr::Continue => Ok(Flow::Continue),
        }
    }
}
