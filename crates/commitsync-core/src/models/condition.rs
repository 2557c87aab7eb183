//! Collection filter conditions
//!
//! Collections persist their filter as an ordered list of [`Condition`]
//! clauses. Before querying, the list is folded left to right into a
//! [`Filter`] expression tree which the entity store compiles to SQL.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::{Error, Result};

static FIELD_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("Invalid regex")
});

/// How a clause joins the expression built so far
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    #[default]
    And,
    Or,
}

/// Comparison operator of a single clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    /// Substring match on text fields
    Contains,
    IsNull,
    NotNull,
}

impl Operator {
    /// Operators that ignore the clause value
    pub const fn is_unary(self) -> bool {
        matches!(self, Self::IsNull | Self::NotNull)
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::NotEq => "not_eq",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Contains => "contains",
            Self::IsNull => "is_null",
            Self::NotNull => "not_null",
        }
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eq" | "=" => Ok(Self::Eq),
            "not_eq" | "ne" | "!=" => Ok(Self::NotEq),
            "lt" | "<" => Ok(Self::Lt),
            "lte" | "<=" => Ok(Self::Lte),
            "gt" | ">" => Ok(Self::Gt),
            "gte" | ">=" => Ok(Self::Gte),
            "contains" => Ok(Self::Contains),
            "is_null" => Ok(Self::IsNull),
            "not_null" => Ok(Self::NotNull),
            other => Err(Error::InvalidInput(format!("unknown operator '{other}'"))),
        }
    }
}

/// One persisted filter clause: `(combinator, field, operator, value)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default)]
    pub combinator: Combinator,
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    /// Create an AND clause
    pub fn and(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            combinator: Combinator::And,
            field: field.into(),
            operator,
            value,
        }
    }

    /// Create an OR clause
    pub fn or(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            combinator: Combinator::Or,
            ..Self::and(field, operator, value)
        }
    }

    /// Reject field names that are not plain (optionally dotted) identifiers
    pub fn validate(&self) -> Result<()> {
        if FIELD_NAME.is_match(&self.field) {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "invalid condition field '{}'",
                self.field
            )))
        }
    }
}

/// Parses the compact form `combinator:field:operator[:json-value]`.
///
/// The value is read as JSON and falls back to a plain string, so both
/// `and:owner:eq:"U"` and `and:owner:eq:U` work.
impl FromStr for Condition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(4, ':');
        let combinator = match parts.next().map(str::trim) {
            Some("and" | "AND") => Combinator::And,
            Some("or" | "OR") => Combinator::Or,
            _ => {
                return Err(Error::InvalidInput(format!(
                    "condition '{s}' must start with and: or or:"
                )))
            }
        };
        let field = parts
            .next()
            .map(str::trim)
            .filter(|field| !field.is_empty())
            .ok_or_else(|| Error::InvalidInput(format!("condition '{s}' has no field")))?;
        let operator: Operator = parts
            .next()
            .ok_or_else(|| Error::InvalidInput(format!("condition '{s}' has no operator")))?
            .parse()?;
        let value = match parts.next() {
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.into())),
            None if operator.is_unary() => Value::Null,
            None => {
                return Err(Error::InvalidInput(format!(
                    "condition '{s}' needs a value"
                )))
            }
        };

        let condition = Self {
            combinator,
            field: field.to_string(),
            operator,
            value,
        };
        condition.validate()?;
        Ok(condition)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let combinator = match self.combinator {
            Combinator::And => "and",
            Combinator::Or => "or",
        };
        write!(f, "{combinator}:{}:{}", self.field, self.operator.as_str())?;
        if !self.operator.is_unary() {
            write!(f, ":{}", self.value)?;
        }
        Ok(())
    }
}

/// A single `field <op> value` test
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

/// Filter expression tree evaluated by the entity store's query builder
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Comparison(Comparison),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    /// Fold an ordered clause list into a tree, left to right.
    ///
    /// The first clause's combinator is ignored. Returns `None` for an
    /// empty list (no restriction).
    pub fn from_conditions(conditions: &[Condition]) -> Result<Option<Self>> {
        let mut tree: Option<Self> = None;

        for condition in conditions {
            condition.validate()?;
            let leaf = Self::Comparison(Comparison {
                field: condition.field.clone(),
                operator: condition.operator,
                value: condition.value.clone(),
            });

            tree = Some(match tree {
                None => leaf,
                Some(current) => current.join(condition.combinator, leaf),
            });
        }

        Ok(tree)
    }

    fn join(self, combinator: Combinator, next: Self) -> Self {
        match (combinator, self) {
            (Combinator::And, Self::And(mut children)) => {
                children.push(next);
                Self::And(children)
            }
            (Combinator::Or, Self::Or(mut children)) => {
                children.push(next);
                Self::Or(children)
            }
            (Combinator::And, current) => Self::And(vec![current, next]),
            (Combinator::Or, current) => Self::Or(vec![current, next]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn leaf(field: &str, value: Value) -> Filter {
        Filter::Comparison(Comparison {
            field: field.into(),
            operator: Operator::Eq,
            value,
        })
    }

    #[test]
    fn test_empty_conditions_have_no_filter() {
        assert_eq!(Filter::from_conditions(&[]).unwrap(), None);
    }

    #[test]
    fn test_clauses_fold_left_to_right() {
        let conditions = vec![
            Condition::and("owner", Operator::Eq, json!("U")),
            Condition::or("owner", Operator::Eq, json!("V")),
            Condition::and("status", Operator::Eq, json!("open")),
        ];

        let tree = Filter::from_conditions(&conditions).unwrap().unwrap();
        assert_eq!(
            tree,
            Filter::And(vec![
                Filter::Or(vec![leaf("owner", json!("U")), leaf("owner", json!("V"))]),
                leaf("status", json!("open")),
            ])
        );
    }

    #[test]
    fn test_consecutive_and_clauses_flatten() {
        let conditions = vec![
            Condition::and("a", Operator::Eq, json!(1)),
            Condition::and("b", Operator::Eq, json!(2)),
            Condition::and("c", Operator::Eq, json!(3)),
        ];

        let Some(Filter::And(children)) = Filter::from_conditions(&conditions).unwrap() else {
            panic!("expected AND node");
        };
        assert_eq!(children.len(), 3);
    }

    #[test]
    fn test_invalid_field_names_are_rejected() {
        let conditions = vec![Condition::and("owner') OR 1=1 --", Operator::Eq, json!(1))];
        assert!(Filter::from_conditions(&conditions).is_err());
    }

    #[test]
    fn test_parse_compact_condition() {
        let condition: Condition = "and:owner:eq:\"U\"".parse().unwrap();
        assert_eq!(condition, Condition::and("owner", Operator::Eq, json!("U")));

        let bare: Condition = "or:priority:gte:3".parse().unwrap();
        assert_eq!(bare, Condition::or("priority", Operator::Gte, json!(3)));

        let unquoted: Condition = "and:owner:eq:U".parse().unwrap();
        assert_eq!(unquoted.value, json!("U"));

        let unary: Condition = "and:due:is_null".parse().unwrap();
        assert_eq!(unary.value, Value::Null);
    }

    #[test]
    fn test_parse_rejects_incomplete_conditions() {
        assert!("owner:eq:U".parse::<Condition>().is_err());
        assert!("and::eq:U".parse::<Condition>().is_err());
        assert!("and:owner:eq".parse::<Condition>().is_err());
        assert!("and:owner:like:U".parse::<Condition>().is_err());
    }

    #[test]
    fn test_display_round_trips_compact_form() {
        let condition = Condition::and("owner", Operator::NotEq, json!("U"));
        assert_eq!(condition.to_string(), "and:owner:not_eq:\"U\"");
        assert_eq!(condition.to_string().parse::<Condition>().unwrap(), condition);
    }
}
