//! Simple `column OP literal` row conditions, e.g. `age > 25`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::DataError;
use crate::query::{Row, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn parse(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "=" | "==" => Self::Eq,
            "!=" | "<>" => Self::Ne,
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            _ => return None,
        })
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }
}

/// A predicate over one column of a row.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    column: String,
    op: CompareOp,
    value: Value,
}

impl Condition {
    pub fn new(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// Whether `row` satisfies the condition. A missing column never matches;
    /// `= null` / `!= null` test for null, other comparisons with null fail.
    pub fn matches(&self, row: &Row) -> bool {
        let Some(actual) = row.get(&self.column) else {
            return false;
        };
        match (&self.value, self.op) {
            (Value::Null, CompareOp::Eq) => actual.is_null(),
            (Value::Null, CompareOp::Ne) => !actual.is_null(),
            (expected, op) => actual
                .compare(expected)
                .is_some_and(|ordering| op.holds(ordering)),
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }
}

static CONDITION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_.]*)\s*(==|!=|<>|<=|>=|=|<|>)\s*(.+?)\s*$")
        .expect("condition pattern is valid")
});

impl FromStr for Condition {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = CONDITION_RE.captures(s).ok_or_else(|| {
            DataError::config(format!(
                "invalid condition '{s}' (expected `column OP value`, e.g. `age > 25`)"
            ))
        })?;
        let op = CompareOp::parse(&caps[2])
            .ok_or_else(|| DataError::config(format!("unknown operator '{}'", &caps[2])))?;

        Ok(Self::new(&caps[1], op, Value::parse_literal(&caps[3])))
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.column, self.op.symbol(), self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(age: i64) -> Row {
        Row::from_pairs([("name", Value::from("Ada")), ("age", Value::from(age))])
    }

    #[test]
    fn test_parse_and_match() {
        let cond: Condition = "age > 25".parse().unwrap();
        assert_eq!(cond, Condition::new("age", CompareOp::Gt, 25));
        assert!(cond.matches(&user(26)));
        assert!(!cond.matches(&user(25)));
    }

    #[test]
    fn test_float_literal_against_int_column() {
        let cond: Condition = "age<=25.5".parse().unwrap();
        assert!(cond.matches(&user(25)));
        assert!(!cond.matches(&user(26)));
    }

    #[test]
    fn test_text_and_null() {
        let cond: Condition = "name = 'Ada'".parse().unwrap();
        assert!(cond.matches(&user(1)));

        let row = Row::from_pairs([("email", Value::Null)]);
        assert!("email = null".parse::<Condition>().unwrap().matches(&row));
        assert!(!"email != null".parse::<Condition>().unwrap().matches(&row));
        assert!(!"email > 3".parse::<Condition>().unwrap().matches(&row));
    }

    #[test]
    fn test_missing_column_never_matches() {
        let cond: Condition = "height != 0".parse().unwrap();
        assert!(!cond.matches(&user(30)));
    }

    #[test]
    fn test_invalid_condition() {
        assert!("age".parse::<Condition>().is_err());
        assert!("> 25".parse::<Condition>().is_err());
    }

    #[test]
    fn test_display_round_trip() {
        let cond: Condition = "age >= 40".parse().unwrap();
        assert_eq!(cond.to_string(), "age >= 40");
    }
}
