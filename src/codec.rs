//! Conversion between native JSON values and DynamoDB's typed attribute encoding.

use super::{
    wire::{AttributeValue, WireItem},
    Error, Item, Result,
};
use serde_json::{Number, Value};

const TAGS: [&str; 6] = ["S", "N", "BOOL", "NULL", "L", "M"];

/// Marshals any JSON value. This cannot fail: every JSON value has a typed counterpart.
pub fn marshal_value(v: &Value) -> AttributeValue {
    match v {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(a) => AttributeValue::L(a.iter().map(marshal_value).collect()),
        Value::Object(m) => AttributeValue::M(m.iter().map(|(k, v)| (k.clone(), marshal_value(v))).collect()),
    }
}

pub fn marshal_map(item: &Item) -> WireItem {
    item.iter().map(|(k, v)| (k.clone(), marshal_value(v))).collect()
}

/// Marshals a value that must be an object.
pub fn marshal_item(item: &Value) -> Result<WireItem> {
    match item {
        Value::Object(m) => Ok(marshal_map(m)),
        other => Err(Error::validation(format!("an item must be a JSON object, got {}", type_name(other)))),
    }
}

pub fn unmarshal_value(v: &AttributeValue) -> Value {
    match v {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => parse_number(n),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::L(l) => Value::Array(l.iter().map(unmarshal_value).collect()),
        AttributeValue::M(m) => Value::Object(m.iter().map(|(k, v)| (k.clone(), unmarshal_value(v))).collect()),
    }
}

pub fn unmarshal_item(item: &WireItem) -> Item {
    item.iter().map(|(k, v)| (k.clone(), unmarshal_value(v))).collect()
}

/// Unmarshals an item straight from an untyped response body. Anything that isn't an object
/// yields an empty item, and attributes that aren't typed values are passed through untouched.
pub fn unmarshal_json(item: &Value) -> Item {
    let Value::Object(m) = item else {
        return Item::new();
    };
    m.iter()
        .map(|(k, v)| {
            let v = match serde_json::from_value::<AttributeValue>(v.clone()) {
                Ok(av) => unmarshal_value(&av),
                Err(_) => v.clone(),
            };
            (k.clone(), v)
        })
        .collect()
}

/// Reports whether every attribute of `item` is a single-tag typed value.
pub fn is_marshalled_item(item: &Value) -> bool {
    let Value::Object(m) = item else {
        return false;
    };
    m.values().all(|v| match v {
        Value::Object(tagged) => tagged.len() == 1 && tagged.keys().all(|k| TAGS.contains(&k.as_str())),
        _ => false,
    })
}

// Decimal points mean floats. Anything else is tried as an integer first so that large
// unsigned values and exponent notation still come back as numbers.
fn parse_number(n: &str) -> Value {
    if !n.contains('.') {
        if let Ok(i) = n.parse::<i64>() {
            return Value::from(i);
        }
        if let Ok(u) = n.parse::<u64>() {
            return Value::from(u);
        }
    }
    match n.parse::<f64>().ok().and_then(Number::from_f64) {
        Some(f) => Value::Number(f),
        None => Value::String(n.to_string()),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
