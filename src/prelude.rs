//! Read-only bindings visible to user code: `Math` constants and functions
//! (reachable bare or as `Math.name`), `int`, and the bit/periodic helpers.

use std::f64::consts;

/// A native function callable from user code. Arguments arrive already
/// coerced to numbers; missing arguments read as NaN.
#[derive(Debug)]
pub struct Builtin {
    pub name: &'static str,
    pub func: fn(&[f64]) -> Result<f64, String>,
}

/// A prelude binding: either a constant or a native function.
#[derive(Debug, Clone, Copy)]
pub enum PreludeItem {
    Constant(f64),
    Function(&'static Builtin),
}

const CONSTANTS: &[(&str, f64)] = &[
    ("E", consts::E),
    ("LN10", consts::LN_10),
    ("LN2", consts::LN_2),
    ("LOG10E", consts::LOG10_E),
    ("LOG2E", consts::LOG2_E),
    ("PI", consts::PI),
    ("SQRT1_2", consts::FRAC_1_SQRT_2),
    ("SQRT2", consts::SQRT_2),
];

macro_rules! unary {
    ($name:literal, $f:expr) => {
        Builtin {
            name: $name,
            func: |args| Ok($f(arg(args, 0))),
        }
    };
}

static BUILTINS: &[Builtin] = &[
    unary!("abs", f64::abs),
    unary!("acos", f64::acos),
    unary!("acosh", f64::acosh),
    unary!("asin", f64::asin),
    unary!("asinh", f64::asinh),
    unary!("atan", f64::atan),
    unary!("atanh", f64::atanh),
    unary!("cbrt", f64::cbrt),
    unary!("ceil", f64::ceil),
    unary!("cos", f64::cos),
    unary!("cosh", f64::cosh),
    unary!("exp", f64::exp),
    unary!("expm1", f64::exp_m1),
    unary!("floor", f64::floor),
    unary!("log", f64::ln),
    unary!("log10", f64::log10),
    unary!("log1p", f64::ln_1p),
    unary!("log2", f64::log2),
    unary!("round", js_round),
    unary!("sign", js_sign),
    unary!("sin", f64::sin),
    unary!("sinh", f64::sinh),
    unary!("sqrt", f64::sqrt),
    unary!("tan", f64::tan),
    unary!("tanh", f64::tanh),
    unary!("trunc", f64::trunc),
    unary!("int", f64::floor),
    unary!("fround", |x: f64| x as f32 as f64),
    unary!("clz32", |x: f64| to_uint32(x).leading_zeros() as f64),
    unary!("sinf", |x: f64| (x / (128.0 / consts::PI)).sin()),
    unary!("cosf", |x: f64| (x / (128.0 / consts::PI)).cos()),
    unary!("tanf", |x: f64| (x / (128.0 / consts::PI)).tan()),
    Builtin {
        name: "atan2",
        func: |args| Ok(arg(args, 0).atan2(arg(args, 1))),
    },
    Builtin {
        name: "pow",
        func: |args| Ok(js_pow(arg(args, 0), arg(args, 1))),
    },
    Builtin {
        name: "imul",
        func: |args| {
            Ok(to_int32(arg(args, 0)).wrapping_mul(to_int32(arg(args, 1))) as f64)
        },
    },
    Builtin {
        name: "hypot",
        func: |args| {
            if args.iter().any(|a| a.is_infinite()) {
                return Ok(f64::INFINITY);
            }
            Ok(args.iter().map(|a| a * a).sum::<f64>().sqrt())
        },
    },
    Builtin {
        name: "max",
        func: |args| Ok(fold_nan(args, f64::NEG_INFINITY, f64::max)),
    },
    Builtin {
        name: "min",
        func: |args| Ok(fold_nan(args, f64::INFINITY, f64::min)),
    },
    Builtin {
        name: "random",
        func: |_| Ok(fastrand::f64()),
    },
    Builtin {
        name: "bitC",
        func: |args| Ok(bit_c(arg(args, 0), arg(args, 1), arg(args, 2))),
    },
    Builtin {
        name: "br",
        func: |args| {
            let size = args.get(1).copied().unwrap_or(8.0);
            bit_reverse(arg(args, 0), size)
        },
    },
];

/// Look up a prelude binding by its bare name.
pub fn lookup(name: &str) -> Option<PreludeItem> {
    if let Some((_, value)) = CONSTANTS.iter().find(|(n, _)| *n == name) {
        return Some(PreludeItem::Constant(*value));
    }
    BUILTINS
        .iter()
        .find(|b| b.name == name)
        .map(PreludeItem::Function)
}

/// Names reachable as `Math.name`. `int` and the helpers are bare-only.
pub fn lookup_math(name: &str) -> Option<PreludeItem> {
    match name {
        "int" | "bitC" | "br" | "sinf" | "cosf" | "tanf" => None,
        _ => lookup(name),
    }
}

fn arg(args: &[f64], idx: usize) -> f64 {
    args.get(idx).copied().unwrap_or(f64::NAN)
}

fn fold_nan(args: &[f64], init: f64, f: fn(f64, f64) -> f64) -> f64 {
    if args.iter().any(|a| a.is_nan()) {
        return f64::NAN;
    }
    args.iter().copied().fold(init, f)
}

// ── Numeric coercions shared with the runtime ───────────────

/// ECMAScript ToInt32.
pub fn to_int32(x: f64) -> i32 {
    if !x.is_finite() {
        return 0;
    }
    let m = x.trunc().rem_euclid(4_294_967_296.0);
    if m >= 2_147_483_648.0 {
        (m - 4_294_967_296.0) as i32
    } else {
        m as i32
    }
}

/// ECMAScript ToUint32.
pub fn to_uint32(x: f64) -> u32 {
    to_int32(x) as u32
}

/// `Math.round`: halves round toward positive infinity.
pub fn js_round(x: f64) -> f64 {
    if !x.is_finite() || x.fract() == 0.0 {
        return x;
    }
    (x + 0.5).floor()
}

fn js_sign(x: f64) -> f64 {
    if x.is_nan() || x == 0.0 { x } else { x.signum() }
}

/// `**` with the NaN cases where IEEE `pow` returns 1.
pub fn js_pow(base: f64, exp: f64) -> f64 {
    if exp.is_nan() || (base.abs() == 1.0 && exp.is_infinite()) {
        return f64::NAN;
    }
    base.powf(exp)
}

/// `x & y ? z : 0`
pub fn bit_c(x: f64, y: f64, z: f64) -> f64 {
    if to_int32(x) & to_int32(y) != 0 { z } else { 0.0 }
}

/// Reverse the low `size` bits of `x`.
pub fn bit_reverse(x: f64, size: f64) -> Result<f64, String> {
    if size > 32.0 {
        return Err("br() Size cannot be greater than 32".into());
    }
    let mut result = 0.0;
    let mut idx = 0.0;
    while idx < size {
        result += bit_c(x, 2f64.powf(idx), 2f64.powf(size - (idx + 1.0)));
        idx += 1.0;
    }
    Ok(result)
}
