//! Fusión de payloads entre trigger padre e hijo.
//!
//! Merge "shallow": las claves de `overlay` reemplazan a las de `base`.
//! Los objetos anidados no se fusionan.

use log::warn;

use crate::trigger::Payload;

pub fn merge_payload(base: &Payload, overlay: &Payload, warn_on_overwrite: bool) -> Payload {
    let mut out = base.clone();
    for (k, v) in overlay.iter() {
        if let Some(prev) = out.insert(k.clone(), v.clone()) {
            if warn_on_overwrite && prev != *v {
                warn!("payload key '{k}' overwritten ({prev} -> {v})");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: serde_json::Value) -> Payload {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn overlay_keys_win() {
        let base = obj(json!({"a": 1, "shared": "base"}));
        let overlay = obj(json!({"b": 2, "shared": "child"}));
        let merged = merge_payload(&base, &overlay, true);
        assert_eq!(merged.get("a"), Some(&json!(1)));
        assert_eq!(merged.get("b"), Some(&json!(2)));
        assert_eq!(merged.get("shared"), Some(&json!("child")));
        // base intacto
        assert_eq!(base.get("shared"), Some(&json!("base")));
    }
}
