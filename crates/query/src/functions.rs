//! Scalar functions
//!
//! Builtins live in a static table; user-defined functions register into a
//! `FunctionRegistry` per query context. The compiler resolves names at
//! build time (builtins first, then user functions) and refuses unknown
//! names, so evaluation never does a by-name lookup.
//!
//! All comparison and arithmetic builtins are null-poisoning: a `Null`
//! operand yields `Null`. Logic builtins follow the SQL three-valued truth
//! tables instead.

use crate::expr::Truth;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rillet_core::{Result, RilletError, Value};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::sync::Arc;

/// A resolved scalar function
pub type ScalarFn = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// Registry of user-defined scalar functions
///
/// Builtins resolve without registration. User functions may not shadow a
/// builtin name.
#[derive(Default)]
pub struct FunctionRegistry {
    user: RwLock<FxHashMap<String, ScalarFn>>,
}

impl FunctionRegistry {
    /// Empty registry (builtins still resolve)
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user function. Fails on builtin names and duplicates.
    pub fn register(
        &self,
        name: impl Into<String>,
        func: impl Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Result<()> {
        let name = name.into();
        if BUILTINS.contains_key(name.as_str()) {
            return Err(RilletError::invalid_input(format!(
                "'{name}' is a builtin function"
            )));
        }
        let mut user = self.user.write();
        if user.contains_key(&name) {
            return Err(RilletError::invalid_input(format!(
                "function '{name}' already registered"
            )));
        }
        user.insert(name, Arc::new(func));
        Ok(())
    }

    /// Resolve a name to its evaluator
    pub fn resolve(&self, name: &str) -> Option<ScalarFn> {
        if let Some(builtin) = BUILTINS.get(name) {
            return Some(builtin.clone());
        }
        self.user.read().get(name).cloned()
    }
}

static BUILTINS: Lazy<FxHashMap<&'static str, ScalarFn>> = Lazy::new(|| {
    let mut table: FxHashMap<&'static str, ScalarFn> = FxHashMap::default();
    table.insert("eq", Arc::new(|args| compare(args, &[Ordering::Equal])));
    table.insert(
        "neq",
        Arc::new(|args| compare(args, &[Ordering::Less, Ordering::Greater])),
    );
    table.insert("lt", Arc::new(|args| compare(args, &[Ordering::Less])));
    table.insert(
        "lte",
        Arc::new(|args| compare(args, &[Ordering::Less, Ordering::Equal])),
    );
    table.insert("gt", Arc::new(|args| compare(args, &[Ordering::Greater])));
    table.insert(
        "gte",
        Arc::new(|args| compare(args, &[Ordering::Greater, Ordering::Equal])),
    );
    table.insert("and", Arc::new(logical_and));
    table.insert("or", Arc::new(logical_or));
    table.insert("not", Arc::new(logical_not));
    table.insert("add", Arc::new(|args| arithmetic(args, "add")));
    table.insert("sub", Arc::new(|args| arithmetic(args, "sub")));
    table.insert("mul", Arc::new(|args| arithmetic(args, "mul")));
    table.insert("div", Arc::new(|args| arithmetic(args, "div")));
    table.insert("in", Arc::new(in_list));
    table.insert("coalesce", Arc::new(coalesce));
    table.insert("is_null", Arc::new(is_null));
    table.insert("upper", Arc::new(|args| string_map(args, str::to_uppercase)));
    table.insert("lower", Arc::new(|args| string_map(args, str::to_lowercase)));
    table.insert("length", Arc::new(length));
    table.insert("concat", Arc::new(concat));
    table.insert("like", Arc::new(like));
    table
});

fn arity(args: &[Value], expected: usize, name: &str) -> Result<()> {
    if args.len() != expected {
        return Err(RilletError::invalid_input(format!(
            "{name} expects {expected} arguments, got {}",
            args.len()
        )));
    }
    Ok(())
}

/// Comparison with null poisoning. Values of incomparable types (a string
/// against an integer) compare as UNKNOWN rather than by type rank; type
/// rank ordering is for sorts, not predicates.
fn compare(args: &[Value], accept: &[Ordering]) -> Result<Value> {
    arity(args, 2, "comparison")?;
    let (a, b) = (&args[0], &args[1]);
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    let comparable = matches!(
        (a, b),
        (Value::Bool(_), Value::Bool(_))
            | (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_))
            | (Value::Str(_), Value::Str(_))
            | (Value::Bytes(_), Value::Bytes(_))
            | (Value::List(_), Value::List(_))
            | (Value::Map(_), Value::Map(_))
    );
    if !comparable {
        return Ok(Value::Null);
    }
    Ok(Value::Bool(accept.contains(&a.cmp(b))))
}

fn logical_and(args: &[Value]) -> Result<Value> {
    let mut acc = Truth::True;
    for arg in args {
        acc = acc.and(Truth::of(arg));
        if acc == Truth::False {
            break;
        }
    }
    Ok(acc.to_value())
}

fn logical_or(args: &[Value]) -> Result<Value> {
    let mut acc = Truth::False;
    for arg in args {
        acc = acc.or(Truth::of(arg));
        if acc == Truth::True {
            break;
        }
    }
    Ok(acc.to_value())
}

fn logical_not(args: &[Value]) -> Result<Value> {
    arity(args, 1, "not")?;
    Ok(Truth::of(&args[0]).not().to_value())
}

/// Numeric arithmetic with null poisoning. Integer pairs stay integral
/// except under division, which always yields a float. Division by zero
/// is UNKNOWN.
fn arithmetic(args: &[Value], op: &str) -> Result<Value> {
    arity(args, 2, op)?;
    let (a, b) = (&args[0], &args[1]);
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        return Ok(match op {
            "add" => Value::Int(x.wrapping_add(*y)),
            "sub" => Value::Int(x.wrapping_sub(*y)),
            "mul" => Value::Int(x.wrapping_mul(*y)),
            "div" => {
                if *y == 0 {
                    Value::Null
                } else {
                    Value::Float(*x as f64 / *y as f64)
                }
            }
            _ => unreachable!(),
        });
    }
    let (x, y) = match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x, y),
        _ => return Ok(Value::Null),
    };
    Ok(match op {
        "add" => Value::Float(x + y),
        "sub" => Value::Float(x - y),
        "mul" => Value::Float(x * y),
        "div" => {
            if y == 0.0 {
                Value::Null
            } else {
                Value::Float(x / y)
            }
        }
        _ => unreachable!(),
    })
}

/// `in(needle, list)`: UNKNOWN for a null needle; for a non-matching
/// needle, UNKNOWN if the list contains a null (SQL IN semantics)
fn in_list(args: &[Value]) -> Result<Value> {
    arity(args, 2, "in")?;
    let needle = &args[0];
    if needle.is_null() {
        return Ok(Value::Null);
    }
    let haystack = match args[1].as_list() {
        Some(list) => list,
        None => return Ok(Value::Null),
    };
    if haystack.iter().any(|v| v == needle) {
        return Ok(Value::Bool(true));
    }
    if haystack.iter().any(|v| v.is_null()) {
        return Ok(Value::Null);
    }
    Ok(Value::Bool(false))
}

fn coalesce(args: &[Value]) -> Result<Value> {
    Ok(args
        .iter()
        .find(|v| !v.is_null())
        .cloned()
        .unwrap_or(Value::Null))
}

fn is_null(args: &[Value]) -> Result<Value> {
    arity(args, 1, "is_null")?;
    Ok(Value::Bool(args[0].is_null()))
}

fn string_map(args: &[Value], f: impl Fn(&str) -> String) -> Result<Value> {
    arity(args, 1, "string function")?;
    Ok(match &args[0] {
        Value::Str(s) => Value::Str(f(s)),
        _ => Value::Null,
    })
}

fn length(args: &[Value]) -> Result<Value> {
    arity(args, 1, "length")?;
    Ok(match &args[0] {
        Value::Str(s) => Value::Int(s.chars().count() as i64),
        Value::List(l) => Value::Int(l.len() as i64),
        Value::Bytes(b) => Value::Int(b.len() as i64),
        _ => Value::Null,
    })
}

fn concat(args: &[Value]) -> Result<Value> {
    let mut out = String::new();
    for arg in args {
        match arg {
            Value::Null => return Ok(Value::Null),
            Value::Str(s) => out.push_str(s),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Float(f) => out.push_str(&f.to_string()),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            _ => return Ok(Value::Null),
        }
    }
    Ok(Value::Str(out))
}

/// `like(text, pattern)` with `%` (any run) and `_` (any one char)
fn like(args: &[Value]) -> Result<Value> {
    arity(args, 2, "like")?;
    let (text, pattern) = match (&args[0], &args[1]) {
        (Value::Str(t), Value::Str(p)) => (t, p),
        (a, b) if a.is_null() || b.is_null() => return Ok(Value::Null),
        _ => return Ok(Value::Null),
    };
    Ok(Value::Bool(like_match(
        &text.chars().collect::<Vec<_>>(),
        &pattern.chars().collect::<Vec<_>>(),
    )))
}

fn like_match(text: &[char], pattern: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some(('%', rest)) => (0..=text.len()).any(|skip| like_match(&text[skip..], rest)),
        Some(('_', rest)) => !text.is_empty() && like_match(&text[1..], rest),
        Some((c, rest)) => text.first() == Some(c) && like_match(&text[1..], rest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Value]) -> Value {
        FunctionRegistry::new().resolve(name).unwrap()(args).unwrap()
    }

    #[test]
    fn test_eq_null_poisoning() {
        assert_eq!(call("eq", &[Value::Int(1), Value::Null]), Value::Null);
        assert_eq!(
            call("eq", &[Value::Int(1), Value::Int(1)]),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_cross_type_comparison_is_unknown() {
        assert_eq!(
            call("eq", &[Value::Int(1), Value::from("1")]),
            Value::Null
        );
        assert_eq!(
            call("lt", &[Value::Int(1), Value::Float(1.5)]),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_and_or_truth_tables() {
        assert_eq!(
            call("and", &[Value::Null, Value::Bool(false)]),
            Value::Bool(false)
        );
        assert_eq!(call("and", &[Value::Null, Value::Bool(true)]), Value::Null);
        assert_eq!(
            call("or", &[Value::Null, Value::Bool(true)]),
            Value::Bool(true)
        );
        assert_eq!(call("or", &[Value::Null, Value::Bool(false)]), Value::Null);
    }

    #[test]
    fn test_arithmetic_integer_preservation() {
        assert_eq!(call("add", &[Value::Int(2), Value::Int(3)]), Value::Int(5));
        assert_eq!(
            call("add", &[Value::Int(2), Value::Float(0.5)]),
            Value::Float(2.5)
        );
        assert_eq!(call("div", &[Value::Int(1), Value::Int(0)]), Value::Null);
    }

    #[test]
    fn test_in_list_with_null_member() {
        let list = Value::List(vec![Value::Int(1), Value::Null]);
        assert_eq!(
            call("in", &[Value::Int(1), list.clone()]),
            Value::Bool(true)
        );
        // not found, but a null member makes it UNKNOWN
        assert_eq!(call("in", &[Value::Int(9), list]), Value::Null);
        assert_eq!(
            call("in", &[Value::Int(9), Value::List(vec![Value::Int(1)])]),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_coalesce_picks_first_non_null() {
        assert_eq!(
            call("coalesce", &[Value::Null, Value::Int(2), Value::Int(3)]),
            Value::Int(2)
        );
        assert_eq!(call("coalesce", &[Value::Null]), Value::Null);
    }

    #[test]
    fn test_like_wildcards() {
        let s = |s: &str| Value::from(s);
        assert_eq!(call("like", &[s("hello"), s("h%")]), Value::Bool(true));
        assert_eq!(call("like", &[s("hello"), s("h_llo")]), Value::Bool(true));
        assert_eq!(call("like", &[s("hello"), s("h_l")]), Value::Bool(false));
        assert_eq!(call("like", &[s("abc"), s("%c")]), Value::Bool(true));
    }

    #[test]
    fn test_user_function_registration() {
        let registry = FunctionRegistry::new();
        registry
            .register("double", |args: &[Value]| {
                Ok(args[0]
                    .as_f64()
                    .map(|f| Value::Float(f * 2.0))
                    .unwrap_or(Value::Null))
            })
            .unwrap();
        let f = registry.resolve("double").unwrap();
        assert_eq!(f(&[Value::Int(4)]).unwrap(), Value::Float(8.0));

        // builtins cannot be shadowed, duplicates are refused
        assert!(registry.register("eq", |_| Ok(Value::Null)).is_err());
        assert!(registry.register("double", |_| Ok(Value::Null)).is_err());
    }
}
