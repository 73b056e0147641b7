//! Deadline-checked evaluation of parsed expressions against fetched series

use std::collections::HashMap;
use std::time::Instant;

use crate::model::{MetricSeries, TimeSeries};

use super::parser::{BinaryOp, Expr, UnaryOp};

/// Aggregate functions the sandbox exposes
const FUNCTIONS: &[&str] = &["min", "max", "avg", "sum", "count", "last", "abs"];

/// Capability names that mark a job definition as hostile rather than wrong.
/// Calls to these are reported distinctly so the owner-facing status can
/// say security_error instead of a generic fault.
const FORBIDDEN: &[&str] = &[
    "open", "read", "write", "file", "exec", "system", "spawn", "shell", "socket", "connect",
    "http", "fetch", "env", "import", "include", "eval",
];

/// Evaluation outcome for an expression that ran to completion
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub passed: bool,
    /// Rendered result text
    pub output: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EvalError {
    #[error("Parse error: {0}")]
    Parse(#[from] super::parser::ParseError),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Forbidden capability '{0}'")]
    Forbidden(String),

    #[error("Evaluation deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Value<'a> {
    Number(f64),
    Bool(bool),
    Series(&'a MetricSeries),
}

impl<'a> Value<'a> {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Bool(_) => "boolean",
            Value::Series(_) => "series",
        }
    }

    fn as_number(&self) -> Result<f64, EvalError> {
        match self {
            Value::Number(n) => Ok(*n),
            other => Err(EvalError::Runtime(format!(
                "expected number, got {}",
                other.type_name()
            ))),
        }
    }

    fn as_bool(&self) -> Result<bool, EvalError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(EvalError::Runtime(format!(
                "expected boolean, got {}",
                other.type_name()
            ))),
        }
    }
}

/// Evaluate a parsed expression against the fetched series
///
/// The deadline is checked on every node visit, so a pathological
/// expression returns [`EvalError::DeadlineExceeded`] instead of running
/// past the cycle that scheduled it. The top-level result must be a
/// boolean verdict.
pub fn evaluate(expr: &Expr, series: &TimeSeries, deadline: Instant) -> Result<Verdict, EvalError> {
    let evaluator = Evaluator {
        bindings: bind_series(series),
        deadline,
    };

    match evaluator.eval(expr)? {
        Value::Bool(passed) => Ok(Verdict {
            passed,
            output: passed.to_string(),
        }),
        other => Err(EvalError::Runtime(format!(
            "expression must yield a boolean verdict, got {}",
            other.type_name()
        ))),
    }
}

/// Map identifier names to series: full selector names always bind, and the
/// final dot-segment binds as shorthand when it is unambiguous.
fn bind_series(series: &TimeSeries) -> HashMap<&str, Option<&MetricSeries>> {
    let mut bindings: HashMap<&str, Option<&MetricSeries>> = HashMap::new();

    for s in &series.series {
        bindings.insert(s.metric.as_str(), Some(s));
    }

    for s in &series.series {
        if let Some(short) = s.metric.rsplit('.').next() {
            if short != s.metric {
                // None marks a shorthand claimed by more than one selector
                bindings
                    .entry(short)
                    .and_modify(|existing| *existing = None)
                    .or_insert(Some(s));
            }
        }
    }

    bindings
}

struct Evaluator<'a> {
    bindings: HashMap<&'a str, Option<&'a MetricSeries>>,
    deadline: Instant,
}

impl<'a> Evaluator<'a> {
    fn eval(&self, expr: &Expr) -> Result<Value<'a>, EvalError> {
        if Instant::now() >= self.deadline {
            return Err(EvalError::DeadlineExceeded);
        }

        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Metric(name) => self.resolve(name),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Neg => Ok(Value::Number(-value.as_number()?)),
                    UnaryOp::Not => Ok(Value::Bool(!value.as_bool()?)),
                }
            }
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right),
            Expr::Call { function, args } => self.eval_call(function, args),
        }
    }

    fn resolve(&self, name: &str) -> Result<Value<'a>, EvalError> {
        match self.bindings.get(name).copied() {
            Some(Some(series)) => Ok(Value::Series(series)),
            Some(None) => Err(EvalError::Runtime(format!(
                "metric shorthand '{}' is ambiguous, use the full selector name",
                name
            ))),
            None => Err(EvalError::Runtime(format!(
                "unknown metric '{}' (not among the job's selectors)",
                name
            ))),
        }
    }

    fn eval_binary(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Value<'a>, EvalError> {
        // Boolean operators short-circuit
        match op {
            BinaryOp::And => {
                return if !self.eval(left)?.as_bool()? {
                    Ok(Value::Bool(false))
                } else {
                    Ok(Value::Bool(self.eval(right)?.as_bool()?))
                };
            }
            BinaryOp::Or => {
                return if self.eval(left)?.as_bool()? {
                    Ok(Value::Bool(true))
                } else {
                    Ok(Value::Bool(self.eval(right)?.as_bool()?))
                };
            }
            _ => {}
        }

        let l = self.eval(left)?.as_number()?;
        let r = self.eval(right)?.as_number()?;

        let value = match op {
            BinaryOp::Add => Value::Number(l + r),
            BinaryOp::Sub => Value::Number(l - r),
            BinaryOp::Mul => Value::Number(l * r),
            BinaryOp::Div => {
                if r == 0.0 {
                    return Err(EvalError::Runtime("division by zero".to_string()));
                }
                Value::Number(l / r)
            }
            BinaryOp::Lt => Value::Bool(l < r),
            BinaryOp::LtEq => Value::Bool(l <= r),
            BinaryOp::Gt => Value::Bool(l > r),
            BinaryOp::GtEq => Value::Bool(l >= r),
            BinaryOp::Eq => Value::Bool(l == r),
            BinaryOp::NotEq => Value::Bool(l != r),
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        };

        Ok(value)
    }

    fn eval_call(&self, function: &str, args: &[Expr]) -> Result<Value<'a>, EvalError> {
        if FORBIDDEN.contains(&function) {
            return Err(EvalError::Forbidden(function.to_string()));
        }
        if !FUNCTIONS.contains(&function) {
            return Err(EvalError::Runtime(format!(
                "unknown function '{}'",
                function
            )));
        }

        if args.len() != 1 {
            return Err(EvalError::Runtime(format!(
                "{}() takes exactly one argument",
                function
            )));
        }

        if function == "abs" {
            let n = self.eval(&args[0])?.as_number()?;
            return Ok(Value::Number(n.abs()));
        }

        let series = match self.eval(&args[0])? {
            Value::Series(s) => s,
            other => {
                return Err(EvalError::Runtime(format!(
                    "{}() expects a metric series, got {}",
                    function,
                    other.type_name()
                )))
            }
        };

        let values: Vec<f64> = series.values().collect();

        if function == "count" {
            return Ok(Value::Number(values.len() as f64));
        }

        if values.is_empty() {
            return Err(EvalError::Runtime(format!(
                "no data for metric '{}' in the fetched window",
                series.metric
            )));
        }

        let result = match function {
            "min" => values.iter().copied().fold(f64::INFINITY, f64::min),
            "max" => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            "sum" => values.iter().sum(),
            "avg" => values.iter().sum::<f64>() / values.len() as f64,
            "last" => *values.last().unwrap(),
            _ => unreachable!("function list checked above"),
        };

        Ok(Value::Number(result))
    }
}
