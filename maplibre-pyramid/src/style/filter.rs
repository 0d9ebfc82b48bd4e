//! Feature filters of style layers.
//!
//! Both the legacy filter syntax (`["==", "class", "park"]`) and the common expression forms
//! (`["==", ["get", "class"], "park"]`) are understood.

use std::cmp::Ordering;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::tile::geometry_tile_data::GeometryTileFeature;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// The part of a feature a filter looks at.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterKey {
    Property(String),
    GeometryType,
    Id,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Literal(bool),
    All(Vec<Filter>),
    Any(Vec<Filter>),
    Not(Box<Filter>),
    Compare {
        op: CompareOp,
        key: FilterKey,
        value: Value,
    },
    In {
        key: FilterKey,
        values: Vec<Value>,
    },
    Has(FilterKey),
}

impl Filter {
    pub fn parse(value: &Value) -> Result<Filter, String> {
        match value {
            Value::Bool(b) => Ok(Filter::Literal(*b)),
            Value::Null => Ok(Filter::Literal(true)),
            Value::Array(array) => {
                let (op, args) = array
                    .split_first()
                    .ok_or_else(|| "empty filter".to_string())?;
                let op = op
                    .as_str()
                    .ok_or_else(|| format!("filter operator must be a string: {op}"))?;
                Self::parse_operator(op, args)
            }
            other => Err(format!("unsupported filter {other}")),
        }
    }

    fn parse_all(args: &[Value]) -> Result<Vec<Filter>, String> {
        args.iter().map(Filter::parse).collect()
    }

    fn parse_operator(op: &str, args: &[Value]) -> Result<Filter, String> {
        let compare = |op: CompareOp| -> Result<Filter, String> {
            match args {
                [key, value] => Ok(Filter::Compare {
                    op,
                    key: parse_key(key)?,
                    value: unwrap_literal(value).clone(),
                }),
                _ => Err(format!("comparison expects two arguments, got {}", args.len())),
            }
        };

        match op {
            "all" => Ok(Filter::All(Self::parse_all(args)?)),
            "any" => Ok(Filter::Any(Self::parse_all(args)?)),
            "none" => Ok(Filter::Not(Box::new(Filter::Any(Self::parse_all(args)?)))),
            "!" => match args {
                [inner] => Ok(Filter::Not(Box::new(Filter::parse(inner)?))),
                _ => Err("! expects one argument".to_string()),
            },
            "==" => compare(CompareOp::Eq),
            "!=" => compare(CompareOp::Ne),
            "<" => compare(CompareOp::Lt),
            "<=" => compare(CompareOp::Le),
            ">" => compare(CompareOp::Gt),
            ">=" => compare(CompareOp::Ge),
            "has" | "!has" => {
                let key = parse_key(args.first().ok_or("has expects a key")?)?;
                let has = Filter::Has(key);
                Ok(if op == "has" {
                    has
                } else {
                    Filter::Not(Box::new(has))
                })
            }
            "in" | "!in" => {
                let (key, rest) = args.split_first().ok_or("in expects a key")?;
                let key = parse_key(key)?;
                // Expression form: ["in", ["get", key], ["literal", [..]]]
                let values = match rest {
                    [Value::Array(literal)]
                        if literal.first().and_then(Value::as_str) == Some("literal") =>
                    {
                        literal
                            .get(1)
                            .and_then(Value::as_array)
                            .cloned()
                            .unwrap_or_default()
                    }
                    values => values.to_vec(),
                };
                let filter = Filter::In { key, values };
                Ok(if op == "in" {
                    filter
                } else {
                    Filter::Not(Box::new(filter))
                })
            }
            "match" => {
                // ["match", input, labels, true|false, .., fallback] where outputs are booleans.
                let (input, rest) = args.split_first().ok_or("match expects an input")?;
                let key = parse_key(input)?;
                let (fallback, pairs) = rest.split_last().ok_or("match expects a fallback")?;
                let mut any = Vec::new();
                for pair in pairs.chunks(2) {
                    let [labels, output] = pair else {
                        return Err("match expects label/output pairs".to_string());
                    };
                    if output.as_bool() != Some(true) {
                        continue;
                    }
                    let values = match labels {
                        Value::Array(labels) => labels.clone(),
                        label => vec![label.clone()],
                    };
                    any.push(Filter::In {
                        key: key.clone(),
                        values,
                    });
                }
                let matched = Filter::Any(any);
                if fallback.as_bool() == Some(true) {
                    // Everything not explicitly mapped to false passes.
                    let mut rejected = Vec::new();
                    for pair in pairs.chunks(2) {
                        if let [labels, Value::Bool(false)] = pair {
                            let values = match labels {
                                Value::Array(labels) => labels.clone(),
                                label => vec![label.clone()],
                            };
                            rejected.push(Filter::In {
                                key: key.clone(),
                                values,
                            });
                        }
                    }
                    Ok(Filter::Not(Box::new(Filter::Any(rejected))))
                } else {
                    Ok(matched)
                }
            }
            other => Err(format!("unsupported filter operator {other}")),
        }
    }

    pub fn evaluate(&self, feature: &GeometryTileFeature) -> bool {
        match self {
            Filter::Literal(b) => *b,
            Filter::All(filters) => filters.iter().all(|f| f.evaluate(feature)),
            Filter::Any(filters) => filters.iter().any(|f| f.evaluate(feature)),
            Filter::Not(filter) => !filter.evaluate(feature),
            Filter::Has(key) => lookup(key, feature).is_some(),
            Filter::In { key, values } => match lookup(key, feature) {
                Some(actual) => values.iter().any(|value| equals(&actual, value)),
                None => false,
            },
            Filter::Compare { op, key, value } => {
                let Some(actual) = lookup(key, feature) else {
                    return *op == CompareOp::Ne;
                };
                match op {
                    CompareOp::Eq => equals(&actual, value),
                    CompareOp::Ne => !equals(&actual, value),
                    _ => match compare(&actual, value) {
                        Some(ordering) => match op {
                            CompareOp::Lt => ordering == Ordering::Less,
                            CompareOp::Le => ordering != Ordering::Greater,
                            CompareOp::Gt => ordering == Ordering::Greater,
                            CompareOp::Ge => ordering != Ordering::Less,
                            CompareOp::Eq | CompareOp::Ne => false,
                        },
                        None => false,
                    },
                }
            }
        }
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Filter::parse(&value).map_err(serde::de::Error::custom)
    }
}

fn parse_key(value: &Value) -> Result<FilterKey, String> {
    match value {
        Value::String(key) => Ok(match key.as_str() {
            "$type" => FilterKey::GeometryType,
            "$id" => FilterKey::Id,
            key => FilterKey::Property(key.to_string()),
        }),
        Value::Array(expr) => match expr.first().and_then(Value::as_str) {
            Some("get") => expr
                .get(1)
                .and_then(Value::as_str)
                .map(|key| FilterKey::Property(key.to_string()))
                .ok_or_else(|| "get expects a property name".to_string()),
            Some("geometry-type") => Ok(FilterKey::GeometryType),
            Some("id") => Ok(FilterKey::Id),
            _ => Err(format!("unsupported filter key {value}")),
        },
        other => Err(format!("unsupported filter key {other}")),
    }
}

fn unwrap_literal(value: &Value) -> &Value {
    match value {
        Value::Array(array) if array.first().and_then(Value::as_str) == Some("literal") => {
            array.get(1).unwrap_or(value)
        }
        value => value,
    }
}

fn lookup(key: &FilterKey, feature: &GeometryTileFeature) -> Option<Value> {
    match key {
        FilterKey::Property(name) => feature.property(name).filter(|v| !v.is_null()).cloned(),
        FilterKey::GeometryType => Some(Value::String(feature.feature_type.as_str().to_string())),
        FilterKey::Id => feature.id.map(Value::from),
    }
}

fn equals(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
