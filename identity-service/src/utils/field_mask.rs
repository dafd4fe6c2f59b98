//! Field masks over JSON responses.

use serde_json::{Map, Value};

/// Fields never returned, whatever the mask says.
const RESERVED: &[&str] = &[
    "password",
    "password_hash",
    "secret",
    "secret_hash",
    "key_hash",
    "token_hash",
    "temporary_password_hash",
];

/// Identifier fields always returned.
const IDENTIFIERS: &[&str] = &["ids", "id", "user_id", "email", "created_at", "updated_at"];

/// Parsed `field_mask=a,b.c` query value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMask {
    paths: Vec<Vec<String>>,
}

impl FieldMask {
    pub fn parse(raw: Option<&str>) -> Self {
        let paths = raw
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| p.split('.').map(str::to_string).collect())
            .collect();
        Self { paths }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Keeps the masked paths (all fields for an empty mask) and drops
    /// reserved fields. Paths naming unknown fields are ignored.
    pub fn apply(&self, value: Value) -> Value {
        let value = strip_reserved(value);
        if self.is_empty() {
            return value;
        }
        match value {
            Value::Object(map) => {
                let mut out = Map::new();
                for key in IDENTIFIERS {
                    if let Some(v) = map.get(*key) {
                        out.insert(key.to_string(), v.clone());
                    }
                }
                for path in &self.paths {
                    copy_path(&map, path, &mut out);
                }
                Value::Object(out)
            }
            other => other,
        }
    }
}

fn strip_reserved(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| !RESERVED.contains(&k.as_str()))
                .map(|(k, v)| (k, strip_reserved(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_reserved).collect()),
        other => other,
    }
}

fn copy_path(source: &Map<String, Value>, path: &[String], out: &mut Map<String, Value>) {
    let Some((head, rest)) = path.split_first() else {
        return;
    };
    let Some(value) = source.get(head) else {
        return;
    };
    if rest.is_empty() {
        out.insert(head.clone(), value.clone());
        return;
    }
    if let Value::Object(inner) = value {
        let slot = out
            .entry(head.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(slot) = slot {
            copy_path(inner, rest, slot);
        }
    }
}
