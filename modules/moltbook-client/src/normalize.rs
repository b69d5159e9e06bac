// Shape-tolerant extraction from drifting response envelopes.
//
// The API has wrapped the same payloads under different key names over its
// lifetime, and some endpoints return bare arrays. These helpers try an
// ordered candidate-key list and default to empty; they never fail.

use serde_json::{Map, Value};

/// Extract a list from a response that may be a bare array or an object
/// wrapping the array under one of the candidate keys.
pub fn extract_list(resp: &Value, candidate_keys: &[&str]) -> Vec<Value> {
    match resp {
        Value::Array(items) => items.clone(),
        Value::Object(map) => {
            for key in candidate_keys {
                if let Some(Value::Array(items)) = map.get(*key) {
                    return items.clone();
                }
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}

/// Extract an object wrapped under one of the candidate keys. An object
/// response matching none of the keys is assumed to be the payload itself.
pub fn extract_object(resp: &Value, candidate_keys: &[&str]) -> Map<String, Value> {
    if let Value::Object(map) = resp {
        for key in candidate_keys {
            if let Some(Value::Object(inner)) = map.get(*key) {
                return inner.clone();
            }
        }
        return map.clone();
    }
    Map::new()
}
