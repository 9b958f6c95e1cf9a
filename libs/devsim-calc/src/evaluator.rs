//! ExpressionEvaluator - sandboxed expression evaluation
//!
//! Expressions run inside an `evalexpr` context that only knows the variables
//! bound by the caller and a closed set of numeric functions:
//! abs, min, max, clamp, scale, sign, round, floor, ceil, pow, sqrt, random
//!
//! The `Math.` prefix is accepted and ignored so that `Math.pow(x, 2)` and
//! `pow(x, 2)` are equivalent.

use crate::error::{CalcError, Result};
use evalexpr::{
    Context, ContextWithMutableFunctions, ContextWithMutableVariables, EvalexprError, Function,
    HashMapContext, Node, Value,
};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// A parsed expression, ready to be evaluated many times
#[derive(Debug, Clone)]
pub struct ExpressionEvaluator {
    source: String,
    tree: Node,
}

impl ExpressionEvaluator {
    /// Parse an expression
    ///
    /// Syntax errors are reported as [`CalcError::InvalidSpec`].
    pub fn compile(expression: &str) -> Result<Self> {
        let source = expression.trim().replace("Math.", "");
        let tree = evalexpr::build_operator_tree(&source).map_err(|e| {
            CalcError::invalid_spec(format!("Failed to parse '{}': {}", expression, e))
        })?;
        Ok(Self { source, tree })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate with the given variable bindings
    pub fn evaluate(&self, variables: &HashMap<String, JsonValue>) -> Result<JsonValue> {
        let mut context = HashMapContext::new();

        for (name, value) in variables {
            context
                .set_value(name.to_string(), json_to_value(value))
                .map_err(|e| {
                    CalcError::expression(format!("Failed to set variable {}: {}", name, e))
                })?;
        }
        context
            .set_value("PI".to_string(), Value::Float(std::f64::consts::PI))
            .map_err(|e| CalcError::expression(format!("Failed to set PI: {}", e)))?;
        context
            .set_value("E".to_string(), Value::Float(std::f64::consts::E))
            .map_err(|e| CalcError::expression(format!("Failed to set E: {}", e)))?;

        register_functions(&mut context)?;

        let result = self.tree.eval_with_context(&context).map_err(|e| match e {
            EvalexprError::VariableIdentifierNotFound(name) => CalcError::variable_not_found(name),
            EvalexprError::FunctionIdentifierNotFound(name) => {
                CalcError::function(format!("Unknown function '{}'", name))
            },
            other => CalcError::expression(format!(
                "Failed to evaluate '{}': {}",
                self.source, other
            )),
        })?;

        Ok(value_to_json(result))
    }

    /// Evaluate to a number
    pub fn evaluate_f64(&self, variables: &HashMap<String, JsonValue>) -> Result<f64> {
        match self.evaluate(variables)? {
            JsonValue::Number(n) => n.as_f64().ok_or_else(|| {
                CalcError::expression(format!("Expression did not evaluate to a number: {}", self.source))
            }),
            JsonValue::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
            _ => Err(CalcError::expression(format!(
                "Expression did not evaluate to a number: {}",
                self.source
            ))),
        }
    }
}

/// Helper to convert Value to f64 (handles both Int and Float)
fn to_f64(value: &Value) -> std::result::Result<f64, EvalexprError> {
    match value {
        Value::Float(f) => Ok(*f),
        Value::Int(i) => Ok(*i as f64),
        _ => Err(EvalexprError::expected_number(value.clone())),
    }
}

/// Extract exactly `n` numeric arguments
fn numeric_args(args: &Value, n: usize) -> std::result::Result<Vec<f64>, EvalexprError> {
    let values: Vec<f64> = match args {
        Value::Tuple(tuple) => tuple.iter().map(to_f64).collect::<std::result::Result<_, _>>()?,
        Value::Empty => Vec::new(),
        single => vec![to_f64(single)?],
    };
    if values.len() != n {
        return Err(EvalexprError::CustomMessage(format!(
            "expected {} argument(s), got {}",
            n,
            values.len()
        )));
    }
    Ok(values)
}

fn unary(f: fn(f64) -> f64) -> Function {
    Function::new(move |args| {
        let v = numeric_args(args, 1)?;
        Ok(Value::Float(f(v[0])))
    })
}

fn binary(f: fn(f64, f64) -> f64) -> Function {
    Function::new(move |args| {
        let v = numeric_args(args, 2)?;
        Ok(Value::Float(f(v[0], v[1])))
    })
}

/// Inverted bounds leave the value untouched
fn clamp(value: f64, min: f64, max: f64) -> f64 {
    if min > max {
        value
    } else {
        value.clamp(min, max)
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

/// Register the closed function set with an evalexpr context
fn register_functions(context: &mut HashMapContext) -> Result<()> {
    context
        .set_builtin_functions_disabled(true)
        .map_err(|e| CalcError::expression(format!("Failed to disable builtins: {}", e)))?;

    let functions: Vec<(&str, Function)> = vec![
        ("abs", unary(f64::abs)),
        ("sign", unary(|v| if v == 0.0 { 0.0 } else { v.signum() })),
        ("floor", unary(f64::floor)),
        ("ceil", unary(f64::ceil)),
        ("sqrt", unary(f64::sqrt)),
        ("min", binary(f64::min)),
        ("max", binary(f64::max)),
        ("scale", binary(|value, factor| value * factor)),
        ("pow", binary(f64::powf)),
        // clamp(value, min, max)
        (
            "clamp",
            Function::new(|args| {
                let v = numeric_args(args, 3)?;
                Ok(Value::Float(clamp(v[0], v[1], v[2])))
            }),
        ),
        // round(value) or round(value, decimals)
        (
            "round",
            Function::new(|args| match args {
                Value::Tuple(_) => {
                    let v = numeric_args(args, 2)?;
                    Ok(Value::Float(round_to(v[0], v[1] as i32)))
                },
                single => Ok(Value::Float(to_f64(single)?.round())),
            }),
        ),
        (
            "random",
            Function::new(|args| {
                numeric_args(args, 0)?;
                Ok(Value::Float(rand::random::<f64>()))
            }),
        ),
    ];

    for (name, function) in functions {
        context
            .set_function(name.to_string(), function)
            .map_err(|e| CalcError::expression(format!("Failed to register {}: {}", name, e)))?;
    }

    Ok(())
}

/// Bind a JSON value as an evalexpr value
///
/// Numeric strings are bound as numbers, since broker attributes commonly
/// carry numbers as text.
pub fn json_to_value(value: &JsonValue) -> Value {
    match value {
        JsonValue::Null => Value::Empty,
        JsonValue::Bool(b) => Value::Boolean(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(s) => {
            if let Ok(i) = s.trim().parse::<i64>() {
                Value::Int(i)
            } else if let Ok(f) = s.trim().parse::<f64>() {
                Value::Float(f)
            } else {
                Value::String(s.clone())
            }
        },
        JsonValue::Array(items) => Value::Tuple(items.iter().map(json_to_value).collect()),
        JsonValue::Object(_) => Value::String(value.to_string()),
    }
}

/// Convert an evalexpr result back to JSON
pub fn value_to_json(value: Value) -> JsonValue {
    match value {
        Value::Float(f) => crate::number_to_json(f),
        Value::Int(i) => JsonValue::from(i),
        Value::Boolean(b) => JsonValue::Bool(b),
        Value::String(s) => JsonValue::String(s),
        Value::Tuple(items) => JsonValue::Array(items.into_iter().map(value_to_json).collect()),
        Value::Empty => JsonValue::Null,
    }
}
