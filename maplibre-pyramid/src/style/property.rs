//! Layout and paint property values which may depend on zoom or feature properties.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::tile::geometry_tile_data::PropertyMap;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum StyleProperty<T> {
    Constant(T),
    Expression(Value),
}

impl<T> Default for StyleProperty<T>
where
    T: Default,
{
    fn default() -> Self {
        StyleProperty::Constant(T::default())
    }
}

impl<T: DeserializeOwned + Clone> StyleProperty<T> {
    /// Evaluates the property at `zoom` for a feature with `properties`.
    ///
    /// Supported are `{"stops": [[zoom, value], ..]}` step functions and the `literal`, `get`,
    /// `coalesce` and `match` expressions. Everything else evaluates to `None`.
    pub fn evaluate(&self, zoom: f64, properties: &PropertyMap) -> Option<T> {
        match self {
            StyleProperty::Constant(value) => Some(value.clone()),
            StyleProperty::Expression(expr) => {
                serde_json::from_value(evaluate_value(expr, zoom, properties)?).ok()
            }
        }
    }

    /// Whether the value is the same for every feature.
    pub fn is_constant(&self) -> bool {
        matches!(self, StyleProperty::Constant(_))
    }
}

fn evaluate_value(expr: &Value, zoom: f64, properties: &PropertyMap) -> Option<Value> {
    match expr {
        Value::Object(object) => {
            let stops = object.get("stops")?.as_array()?;
            let mut result = None;
            for stop in stops {
                let stop = stop.as_array()?;
                let stop_zoom = stop.first()?.as_f64()?;
                if result.is_none() || stop_zoom <= zoom {
                    result = stop.get(1).cloned();
                }
                if stop_zoom > zoom {
                    break;
                }
            }
            result
        }
        Value::Array(array) => {
            let (op, args) = array.split_first()?;
            match op.as_str()? {
                "literal" => args.first().cloned(),
                "get" => properties.get(args.first()?.as_str()?).cloned(),
                "coalesce" => args
                    .iter()
                    .filter_map(|arg| evaluate_value(arg, zoom, properties))
                    .find(|value| !value.is_null()),
                "match" => {
                    let input = evaluate_value(args.first()?, zoom, properties);
                    let (fallback, pairs) = args[1..].split_last()?;
                    for pair in pairs.chunks(2) {
                        let [labels, output] = pair else {
                            break;
                        };
                        let matches = match (labels, &input) {
                            (Value::Array(labels), Some(input)) => labels.contains(input),
                            (label, Some(input)) => label == input,
                            _ => false,
                        };
                        if matches {
                            return evaluate_value(output, zoom, properties);
                        }
                    }
                    evaluate_value(fallback, zoom, properties)
                }
                _ => None,
            }
        }
        value => Some(value.clone()),
    }
}

/// Replaces `{token}` placeholders in `template` with feature properties. Unknown tokens become
/// empty strings.
pub fn resolve_tokens(template: &str, properties: &PropertyMap) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let Some(end) = rest[start..].find('}') else {
            break;
        };
        result.push_str(&rest[..start]);
        let key = &rest[start + 1..start + end];
        match properties.get(key) {
            Some(Value::String(value)) => result.push_str(value),
            Some(Value::Null) | None => {}
            Some(value) => result.push_str(&value.to_string()),
        }
        rest = &rest[start + end + 1..];
    }
    result.push_str(rest);
    result
}
