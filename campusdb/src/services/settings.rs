use crate::backend::Record;
use crate::error::Result;
use crate::schema::CONFIG;
use crate::store::Store;
use crate::util::field_text;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Key/value settings kept in the Config table. Values are stored as JSON text.
pub struct Settings<'a> {
    store: &'a Store,
}

impl Store {
    pub fn settings(&self) -> Settings<'_> {
        Settings { store: self }
    }
}

impl<'a> Settings<'a> {
    pub fn get(&self, key: &str) -> Result<Value> {
        self.store
            .read(|tx| Ok(decode(&tx.get_entity(CONFIG, key)?)))
    }

    /// Insert or replace a setting. Either way one audit entry is written.
    pub fn set(&self, key: &str, value: &Value) -> Result<Value> {
        self.store.transaction(|tx| {
            let text = serde_json::to_string(value)?;
            let mut entry = Record::new();
            entry.insert("json_value".into(), json!(text));

            let stored = if tx.find_entity(CONFIG, key)?.is_some() {
                tx.update_entity(CONFIG, key, &entry)?
            } else {
                entry.insert("config_key".into(), json!(key));
                tx.create_entity(CONFIG, entry)?
            };
            Ok(decode(&stored))
        })
    }

    pub fn list(&self) -> Result<BTreeMap<String, Value>> {
        self.store.read(|tx| {
            Ok(tx
                .records(CONFIG)?
                .iter()
                .map(|entry| (field_text(entry, "config_key"), decode(entry)))
                .collect())
        })
    }
}

/// Parse the stored JSON text; text that is not JSON is returned as a string.
fn decode(entry: &Record) -> Value {
    let text = field_text(entry, "json_value");
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}
