use rhai::{Array, Dynamic, ImmutableString, Map, FLOAT, INT};
use serde_json::{Number, Value};
use yd_core::YaadeError;

use crate::host::DateTimeValue;

pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract().abs() < f64::EPSILON && value.abs() < 1e15 {
        (value as i64).to_string()
    } else {
        value.to_string()
    }
}

pub fn json_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(value) => Dynamic::from_bool(*value),
        Value::Number(number) => match number.as_i64() {
            Some(value) => Dynamic::from_int(value as INT),
            None => Dynamic::from_float(number.as_f64().unwrap_or(f64::NAN) as FLOAT),
        },
        Value::String(value) => Dynamic::from(value.clone()),
        Value::Array(values) => {
            Dynamic::from_array(values.iter().map(json_to_dynamic).collect::<Array>())
        }
        Value::Object(values) => {
            let mut map = Map::new();
            for (key, value) in values {
                map.insert(key.as_str().into(), json_to_dynamic(value));
            }
            Dynamic::from_map(map)
        }
    }
}

pub fn dynamic_to_json(value: Dynamic) -> Result<Value, YaadeError> {
    if value.is_unit() {
        return Ok(Value::Null);
    }
    if value.is::<bool>() {
        return Ok(Value::Bool(value.cast::<bool>()));
    }
    if value.is::<INT>() {
        return Ok(Value::from(value.cast::<INT>()));
    }
    if value.is::<FLOAT>() {
        return Ok(Number::from_f64(value.cast::<FLOAT>())
            .map(Value::Number)
            .unwrap_or(Value::Null));
    }
    if value.is::<ImmutableString>() {
        return Ok(Value::String(value.cast::<ImmutableString>().to_string()));
    }
    if value.is::<char>() {
        return Ok(Value::String(value.cast::<char>().to_string()));
    }
    if value.is::<DateTimeValue>() {
        return Ok(Value::String(value.cast::<DateTimeValue>().to_iso()));
    }
    if value.is::<Array>() {
        let array = value.cast::<Array>();
        let mut out = Vec::with_capacity(array.len());
        for item in array {
            out.push(dynamic_to_json(item)?);
        }
        return Ok(Value::Array(out));
    }
    if value.is::<Map>() {
        let map = value.cast::<Map>();
        let mut out = serde_json::Map::new();
        for (key, value) in map {
            out.insert(key.to_string(), dynamic_to_json(value)?);
        }
        return Ok(Value::Object(out));
    }

    Err(YaadeError::new(
        "ENGINE_VALUE_UNSUPPORTED",
        format!("Unsupported script value type \"{}\".", value.type_name()),
    ))
}

/// Text form of a value spliced into a template.
pub fn dynamic_to_text(value: &Dynamic) -> String {
    if value.is_unit() {
        return String::new();
    }
    if let Some(text) = value.read_lock::<ImmutableString>() {
        return text.to_string();
    }
    if let Ok(number) = value.as_int() {
        return number.to_string();
    }
    if let Ok(number) = value.as_float() {
        return format_number(number);
    }
    if let Some(datetime) = value.read_lock::<DateTimeValue>() {
        return datetime.to_iso();
    }
    if value.is::<Array>() || value.is::<Map>() {
        if let Ok(json) = dynamic_to_json(value.clone()) {
            return json.to_string();
        }
    }
    value.to_string()
}

#[cfg(test)]
mod rhai_bridge_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_roundtrip_keeps_scalars_and_nesting() {
        let value = json!({"a": [1, 2.5, true, null, "x"], "b": {"c": "d"}});
        let back = dynamic_to_json(json_to_dynamic(&value)).expect("roundtrip");
        assert_eq!(back, value);
    }

    #[test]
    fn dynamic_to_text_formats_numbers_and_collections() {
        assert_eq!(dynamic_to_text(&Dynamic::from_int(7)), "7");
        assert_eq!(dynamic_to_text(&Dynamic::from_float(2.0)), "2");
        assert_eq!(dynamic_to_text(&Dynamic::from_float(2.5)), "2.5");
        assert_eq!(dynamic_to_text(&Dynamic::from_bool(false)), "false");
        assert_eq!(dynamic_to_text(&Dynamic::UNIT), "");
        assert_eq!(dynamic_to_text(&Dynamic::from("abc".to_string())), "abc");
        let array = Dynamic::from_array(vec![Dynamic::from_int(1), Dynamic::from_int(2)]);
        assert_eq!(dynamic_to_text(&array), "[1,2]");
    }

    #[test]
    fn dynamic_to_json_rejects_opaque_values() {
        #[derive(Clone)]
        struct Opaque;
        let error = dynamic_to_json(Dynamic::from(Opaque)).expect_err("opaque should fail");
        assert_eq!(error.code, "ENGINE_VALUE_UNSUPPORTED");
    }
}
