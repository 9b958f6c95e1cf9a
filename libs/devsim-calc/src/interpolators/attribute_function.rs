//! Expressions over live Context Broker attribute values
//!
//! A spec may reference attributes of other entities with
//! `${{EntityId}{AttributeName}}`. References become generated variables of a
//! sandboxed expression; the caller fetches their values and passes them to
//! [`AttributeFunctionInterpolator::evaluate`].

use super::InterpolatorKind;
use crate::error::{CalcError, Result};
use crate::evaluator::ExpressionEvaluator;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeReference {
    pub entity_id: String,
    pub attribute: String,
}

#[derive(Debug, Clone)]
enum Body {
    /// The spec is a JSON literal and is returned unchanged
    Literal(Value),
    Expression(ExpressionEvaluator),
}

#[derive(Debug, Clone)]
pub struct AttributeFunctionInterpolator {
    spec: String,
    /// Distinct references in order of first appearance; the variable of
    /// reference `i` is `attr_ref_{i}`
    references: Vec<AttributeReference>,
    body: Body,
}

impl AttributeFunctionInterpolator {
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if let Ok(literal) = serde_json::from_str::<Value>(spec) {
            return Ok(Self {
                spec: spec.to_string(),
                references: Vec::new(),
                body: Body::Literal(literal),
            });
        }

        let re = Regex::new(r"\$\{\{([^{}]+)\}\{([^{}]+)\}\}")
            .map_err(|e| CalcError::expression(format!("Regex error: {}", e)))?;

        let mut references: Vec<AttributeReference> = Vec::new();
        let expression = re.replace_all(spec, |caps: &regex::Captures<'_>| {
            let reference = AttributeReference {
                entity_id: caps[1].to_string(),
                attribute: caps[2].to_string(),
            };
            let index = match references.iter().position(|r| *r == reference) {
                Some(index) => index,
                None => {
                    references.push(reference);
                    references.len() - 1
                },
            };
            variable_name(index)
        });

        let evaluator = ExpressionEvaluator::compile(&expression).map_err(|e| {
            CalcError::invalid_spec(format!("{}: {}", InterpolatorKind::AttributeFunction, e))
        })?;

        Ok(Self {
            spec: spec.to_string(),
            references,
            body: Body::Expression(evaluator),
        })
    }

    pub fn spec(&self) -> &str {
        &self.spec
    }

    pub fn references(&self) -> &[AttributeReference] {
        &self.references
    }

    /// Entity ids with the attributes referenced on each, in order of first appearance
    pub fn references_by_entity(&self) -> Vec<(&str, Vec<&str>)> {
        let mut grouped: Vec<(&str, Vec<&str>)> = Vec::new();
        for reference in &self.references {
            match grouped.iter_mut().find(|(id, _)| *id == reference.entity_id) {
                Some((_, attributes)) => attributes.push(&reference.attribute),
                None => grouped.push((&reference.entity_id, vec![&reference.attribute])),
            }
        }
        grouped
    }

    /// Evaluate with the fetched value of every reference
    pub fn evaluate(&self, values: &HashMap<AttributeReference, Value>) -> Result<Value> {
        let evaluator = match &self.body {
            Body::Literal(value) => return Ok(value.clone()),
            Body::Expression(evaluator) => evaluator,
        };

        let variables = self
            .references
            .iter()
            .enumerate()
            .map(|(index, reference)| {
                values
                    .get(reference)
                    .map(|value| (variable_name(index), value.clone()))
                    .ok_or_else(|| {
                        CalcError::variable_not_found(format!(
                            "${{{{{}}}{{{}}}}}",
                            reference.entity_id, reference.attribute
                        ))
                    })
            })
            .collect::<Result<HashMap<_, _>>>()?;

        evaluator.evaluate(&variables)
    }
}

fn variable_name(index: usize) -> String {
    format!("attr_ref_{}", index)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reference(entity: &str, attribute: &str) -> AttributeReference {
        AttributeReference {
            entity_id: entity.to_string(),
            attribute: attribute.to_string(),
        }
    }

    #[test]
    fn test_literals_are_returned_as_is() {
        let none = HashMap::new();
        for (spec, expected) in [
            ("666", json!(666)),
            ("\"some-text\"", json!("some-text")),
            ("[1, 2, 3]", json!([1, 2, 3])),
        ] {
            let interpolator = AttributeFunctionInterpolator::parse(spec).unwrap();
            assert_eq!(interpolator.evaluate(&none).unwrap(), expected);
        }
    }

    #[test]
    fn test_reference_arithmetic() {
        let interpolator =
            AttributeFunctionInterpolator::parse("${{EntityId}{AttributeName}} + 111").unwrap();
        assert_eq!(interpolator.references(), [reference("EntityId", "AttributeName")]);

        let values = HashMap::from([(reference("EntityId", "AttributeName"), json!(555))]);
        assert_eq!(interpolator.evaluate(&values).unwrap(), json!(666));
    }

    #[test]
    fn test_math_function_over_reference() {
        let interpolator =
            AttributeFunctionInterpolator::parse("Math.pow(${{EntityId}{AttributeName}}, 2)").unwrap();
        let values = HashMap::from([(reference("EntityId", "AttributeName"), json!("3"))]);
        assert_eq!(interpolator.evaluate(&values).unwrap(), json!(9));
    }

    #[test]
    fn test_repeated_references_share_a_variable() {
        let interpolator = AttributeFunctionInterpolator::parse(
            "${{E1}{a}} + ${{E1}{a}} + ${{E1}{b}} + ${{E2}{a}}",
        )
        .unwrap();
        assert_eq!(interpolator.references().len(), 3);
        assert_eq!(
            interpolator.references_by_entity(),
            vec![("E1", vec!["a", "b"]), ("E2", vec!["a"])]
        );
    }

    #[test]
    fn test_syntax_error_is_invalid_spec() {
        let err = AttributeFunctionInterpolator::parse("${{E}{a}} + (").unwrap_err();
        assert!(err.is_invalid_spec());
    }

    #[test]
    fn test_undeclared_variable_fails_at_evaluation() {
        let interpolator = AttributeFunctionInterpolator::parse("undeclaredVariable").unwrap();
        let err = interpolator.evaluate(&HashMap::new()).unwrap_err();
        assert!(matches!(err, CalcError::VariableNotFound(_)));
    }

    #[test]
    fn test_missing_fetched_value() {
        let interpolator = AttributeFunctionInterpolator::parse("${{E}{a}} * 2").unwrap();
        assert!(interpolator.evaluate(&HashMap::new()).is_err());
    }
}
