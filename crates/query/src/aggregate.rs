//! Aggregate functions
//!
//! Aggregates run inside the reduce operator, folding over a group's
//! histogram of evaluated argument values with multiplicities. Each
//! aggregate declares a value transform:
//!
//! - `Numeric` coerces operands to numbers (`sum`, `avg`, `min`, `max`)
//! - `Raw` preserves original types and compares with the value total
//!   order (`min_str`, `max_str`), which is what you want for
//!   lexicographic minima over ISO-8601 timestamp strings
//!
//! Null arguments never contribute: a group whose argument values are all
//! null aggregates to null (`count` reports 0).

use rillet_core::{Result, Value};
use serde::{Deserialize, Serialize};

use crate::expr::Expr;

/// How operand values are treated before folding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueTransform {
    /// Coerce to f64 (non-numeric operands are skipped like nulls)
    Numeric,
    /// Fold over original values with the total order
    Raw,
}

/// The aggregate function set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateFunc {
    /// Row count (no argument) or non-null count (with argument)
    Count,
    /// Numeric sum
    Sum,
    /// Numeric average
    Avg,
    /// Numeric minimum
    Min,
    /// Numeric maximum
    Max,
    /// Minimum under the raw value order
    MinStr,
    /// Maximum under the raw value order
    MaxStr,
}

impl AggregateFunc {
    /// The transform this function applies to its operands
    pub fn value_transform(self) -> ValueTransform {
        match self {
            AggregateFunc::Count
            | AggregateFunc::Sum
            | AggregateFunc::Avg
            | AggregateFunc::Min
            | AggregateFunc::Max => ValueTransform::Numeric,
            AggregateFunc::MinStr | AggregateFunc::MaxStr => ValueTransform::Raw,
        }
    }

    /// Name used in builder surfaces and error messages
    pub fn name(self) -> &'static str {
        match self {
            AggregateFunc::Count => "count",
            AggregateFunc::Sum => "sum",
            AggregateFunc::Avg => "avg",
            AggregateFunc::Min => "min",
            AggregateFunc::Max => "max",
            AggregateFunc::MinStr => "min_str",
            AggregateFunc::MaxStr => "max_str",
        }
    }
}

/// An aggregate applied to an argument expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateExpr {
    /// The function
    pub func: AggregateFunc,
    /// Argument; `None` only for `count(*)`
    pub arg: Option<Box<Expr>>,
}

impl AggregateExpr {
    /// `count(*)`
    pub fn count() -> Self {
        AggregateExpr {
            func: AggregateFunc::Count,
            arg: None,
        }
    }

    /// `count(expr)`: counts rows where the argument is non-null
    pub fn count_of(arg: Expr) -> Self {
        AggregateExpr {
            func: AggregateFunc::Count,
            arg: Some(Box::new(arg)),
        }
    }

    /// `sum(expr)`
    pub fn sum(arg: Expr) -> Self {
        AggregateExpr {
            func: AggregateFunc::Sum,
            arg: Some(Box::new(arg)),
        }
    }

    /// `avg(expr)`
    pub fn avg(arg: Expr) -> Self {
        AggregateExpr {
            func: AggregateFunc::Avg,
            arg: Some(Box::new(arg)),
        }
    }

    /// `min(expr)` (numeric)
    pub fn min(arg: Expr) -> Self {
        AggregateExpr {
            func: AggregateFunc::Min,
            arg: Some(Box::new(arg)),
        }
    }

    /// `max(expr)` (numeric)
    pub fn max(arg: Expr) -> Self {
        AggregateExpr {
            func: AggregateFunc::Max,
            arg: Some(Box::new(arg)),
        }
    }

    /// `min_str(expr)` (raw value order)
    pub fn min_str(arg: Expr) -> Self {
        AggregateExpr {
            func: AggregateFunc::MinStr,
            arg: Some(Box::new(arg)),
        }
    }

    /// `max_str(expr)` (raw value order)
    pub fn max_str(arg: Expr) -> Self {
        AggregateExpr {
            func: AggregateFunc::MaxStr,
            arg: Some(Box::new(arg)),
        }
    }
}

/// Fold one aggregate over `(argument value, multiplicity)` pairs.
///
/// The reduce operator evaluates the argument expression once per distinct
/// histogram row and passes the weighted values here. Multiplicities are
/// positive (histograms are consolidated).
pub fn fold(func: AggregateFunc, values: &[(Value, isize)]) -> Result<Value> {
    match func {
        AggregateFunc::Count => {
            let total: isize = values
                .iter()
                .filter(|(v, _)| !v.is_null())
                .map(|(_, m)| *m)
                .sum();
            Ok(Value::Int(total as i64))
        }
        AggregateFunc::Sum => {
            let mut int_sum: i64 = 0;
            let mut float_sum = 0.0f64;
            let mut saw_float = false;
            let mut saw_any = false;
            for (value, m) in values {
                match value {
                    Value::Int(i) => {
                        saw_any = true;
                        int_sum = int_sum.wrapping_add(i.wrapping_mul(*m as i64));
                    }
                    Value::Float(f) => {
                        saw_any = true;
                        saw_float = true;
                        float_sum += f * (*m as f64);
                    }
                    _ => {}
                }
            }
            if !saw_any {
                return Ok(Value::Null);
            }
            Ok(if saw_float {
                Value::Float(float_sum + int_sum as f64)
            } else {
                Value::Int(int_sum)
            })
        }
        AggregateFunc::Avg => {
            let mut sum = 0.0f64;
            let mut count = 0isize;
            for (value, m) in values {
                if let Some(f) = value.as_f64() {
                    sum += f * (*m as f64);
                    count += m;
                }
            }
            if count == 0 {
                return Ok(Value::Null);
            }
            Ok(Value::Float(sum / count as f64))
        }
        AggregateFunc::Min | AggregateFunc::Max => {
            let mut extremum: Option<f64> = None;
            for (value, _) in values {
                if let Some(f) = value.as_f64() {
                    extremum = Some(match extremum {
                        None => f,
                        Some(current) => {
                            if func == AggregateFunc::Min {
                                current.min(f)
                            } else {
                                current.max(f)
                            }
                        }
                    });
                }
            }
            Ok(extremum.map(Value::Float).unwrap_or(Value::Null))
        }
        AggregateFunc::MinStr | AggregateFunc::MaxStr => {
            let mut extremum: Option<&Value> = None;
            for (value, _) in values {
                if value.is_null() {
                    continue;
                }
                extremum = Some(match extremum {
                    None => value,
                    Some(current) => {
                        let keep_new = if func == AggregateFunc::MinStr {
                            value < current
                        } else {
                            value > current
                        };
                        if keep_new {
                            value
                        } else {
                            current
                        }
                    }
                });
            }
            Ok(extremum.cloned().unwrap_or(Value::Null))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weighted(values: &[(Value, isize)]) -> Vec<(Value, isize)> {
        values.to_vec()
    }

    #[test]
    fn test_count_star_vs_count_expr() {
        let values = weighted(&[(Value::Int(1), 2), (Value::Null, 1)]);
        // fold with nulls filtered models count(expr); count(*) is fed the
        // row itself, which is never null
        assert_eq!(fold(AggregateFunc::Count, &values).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_sum_integer_preservation() {
        let values = weighted(&[(Value::Int(3), 2), (Value::Int(4), 1)]);
        assert_eq!(fold(AggregateFunc::Sum, &values).unwrap(), Value::Int(10));

        let with_float = weighted(&[(Value::Int(3), 1), (Value::Float(0.5), 1)]);
        assert_eq!(
            fold(AggregateFunc::Sum, &with_float).unwrap(),
            Value::Float(3.5)
        );
    }

    #[test]
    fn test_sum_of_all_nulls_is_null() {
        let values = weighted(&[(Value::Null, 3)]);
        assert_eq!(fold(AggregateFunc::Sum, &values).unwrap(), Value::Null);
    }

    #[test]
    fn test_avg_weights_by_multiplicity() {
        let values = weighted(&[(Value::Int(2), 3), (Value::Int(10), 1)]);
        assert_eq!(
            fold(AggregateFunc::Avg, &values).unwrap(),
            Value::Float(4.0)
        );
    }

    #[test]
    fn test_min_str_lexicographic_on_timestamps() {
        let values = weighted(&[
            (Value::from("2024-03-01T10:00:00Z"), 1),
            (Value::from("2024-01-15T08:30:00Z"), 1),
            (Value::Null, 1),
        ]);
        assert_eq!(
            fold(AggregateFunc::MinStr, &values).unwrap(),
            Value::from("2024-01-15T08:30:00Z")
        );
    }

    #[test]
    fn test_min_str_all_null_group_reports_null() {
        let values = weighted(&[(Value::Null, 2)]);
        assert_eq!(fold(AggregateFunc::MinStr, &values).unwrap(), Value::Null);
    }

    #[test]
    fn test_numeric_min_skips_non_numeric() {
        let values = weighted(&[(Value::from("x"), 1), (Value::Int(5), 1)]);
        assert_eq!(
            fold(AggregateFunc::Min, &values).unwrap(),
            Value::Float(5.0)
        );
    }

    #[test]
    fn test_transform_declarations() {
        assert_eq!(
            AggregateFunc::Sum.value_transform(),
            ValueTransform::Numeric
        );
        assert_eq!(AggregateFunc::MinStr.value_transform(), ValueTransform::Raw);
    }
}
