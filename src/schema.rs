use super::{Error, Item, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::HashMap, path::Path, sync::RwLock};

/// The scalar type a key attribute is declared with when its table is created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAttributeType {
    #[default]
    S,
    N,
}

impl KeyAttributeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S => "S",
            Self::N => "N",
        }
    }
}

fn is_default<T: Default + PartialEq>(v: &T) -> bool {
    *v == T::default()
}

/// The key schema of one table. Key attributes are strings unless declared otherwise with
/// `PKType` / `SKType`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    #[serde(rename = "PK")]
    pub partition_key: String,
    #[serde(rename = "SK", default, skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<String>,
    #[serde(rename = "PKType", default, skip_serializing_if = "is_default")]
    pub partition_key_type: KeyAttributeType,
    #[serde(rename = "SKType", default, skip_serializing_if = "is_default")]
    pub sort_key_type: KeyAttributeType,
}

impl TableConfig {
    pub fn new(partition_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            sort_key: None,
            partition_key_type: KeyAttributeType::S,
            sort_key_type: KeyAttributeType::S,
        }
    }

    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }

    pub fn with_partition_key_type(mut self, t: KeyAttributeType) -> Self {
        self.partition_key_type = t;
        self
    }

    pub fn with_sort_key_type(mut self, t: KeyAttributeType) -> Self {
        self.sort_key_type = t;
        self
    }

    /// Key attribute names paired with their declared types.
    pub fn typed_key_attributes(&self) -> impl Iterator<Item = (&str, KeyAttributeType)> {
        std::iter::once((self.partition_key.as_str(), self.partition_key_type)).chain(self.sort_key.as_deref().map(|sk| (sk, self.sort_key_type)))
    }

    pub fn key_attributes(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.partition_key.as_str()).chain(self.sort_key.as_deref())
    }

    pub fn is_key_attribute(&self, name: &str) -> bool {
        self.key_attributes().any(|k| k == name)
    }

    /// Copies whichever key attributes `item` carries. No validation.
    pub fn project_key(&self, item: &Item) -> Item {
        self.key_attributes()
            .filter_map(|k| item.get(k).map(|v| (k.to_string(), v.clone())))
            .collect()
    }
}

fn is_blank(v: Option<&Value>) -> bool {
    match v {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        _ => false,
    }
}

/// Table name to key schema. Loaded once at startup and replaced wholesale on reload.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    tables: RwLock<HashMap<String, TableConfig>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a JSON file of the form `{"users": {"PK": "id", "SK": "created_at"}}`.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let raw = std::fs::read_to_string(path)?;
        self.load_str(&raw)
    }

    pub fn load_str(&self, raw: &str) -> Result<()> {
        let value: Value = serde_json::from_str(raw)?;
        if !value.is_object() {
            return Err(Error::Config("table configuration must be a JSON object keyed by table name".to_string()));
        }
        let tables: HashMap<String, TableConfig> = serde_json::from_value(value)?;
        *self.tables.write().unwrap() = tables;
        Ok(())
    }

    pub fn register(&self, table: impl Into<String>, config: TableConfig) {
        self.tables.write().unwrap().insert(table.into(), config);
    }

    pub fn get(&self, table: &str) -> Result<TableConfig> {
        self.tables.read().unwrap().get(table).cloned().ok_or_else(|| Error::UnknownTable(table.to_string()))
    }

    pub fn tables(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tables.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Checks that `key` carries every key attribute of `table`, reporting all of the missing
    /// ones at once. Null and empty strings count as missing.
    pub fn validate_keys(&self, table: &str, key: &Item) -> Result<()> {
        let schema = self.get(table)?;
        let missing: Vec<_> = schema.key_attributes().filter(|k| is_blank(key.get(*k))).collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::validation(format!(
                "missing required key attributes for table {:?}: {}",
                table,
                missing.join(", ")
            )))
        }
    }

    /// Validates and returns just the key attributes of `item`.
    pub fn extract_key(&self, table: &str, item: &Item) -> Result<Item> {
        self.validate_keys(table, item)?;
        Ok(self.get(table)?.project_key(item))
    }
}
