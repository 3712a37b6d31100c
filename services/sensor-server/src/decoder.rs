use serde_json::Value;

use crate::error::DecodeError;
use crate::types::SensorPayload;

// camelCase spellings some firmware builds publish
const CAMEL_KEYS: [(&str, &str); 5] = [
    ("binId", "bin_id"),
    ("distanceMm", "distance_mm"),
    ("weightG", "weight_g"),
    ("waterAdc", "water_adc"),
    ("needCollection", "need_collection"),
];

/// Decode one raw MQTT payload into a [`SensorPayload`].
///
/// Absent numeric fields and `need_collection` decode to their zero values,
/// absent `lat`/`lng` stay `None`. A field that is present with the wrong JSON
/// type fails the whole message. camelCase keys are accepted; when both
/// spellings are present the snake_case one wins.
pub fn decode(raw: &[u8]) -> Result<SensorPayload, DecodeError> {
    let text = std::str::from_utf8(raw)?;
    let value: Value = serde_json::from_str(text).map_err(DecodeError::Json)?;
    let mut fields = match value {
        Value::Object(fields) => fields,
        other => return Err(DecodeError::NotAnObject(json_kind(&other))),
    };
    for (camel, snake) in CAMEL_KEYS {
        if let Some(v) = fields.remove(camel) {
            fields.entry(snake).or_insert(v);
        }
    }
    serde_json::from_value(Value::Object(fields)).map_err(DecodeError::Field)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
