use super::{
    codec,
    wire::{AttributesOutput, DeleteItemInput, GetItemInput, GetItemOutput, Operation, PutItemInput, ReturnValue, UpdateItemInput, WireItem},
    Client, Error, Item, Result, ResultExt, Transport,
};
use itertools::Itertools as _;
use std::collections::BTreeMap;
use tracing::{debug, field, Span};

/// Extra conditions for a single-item write, passed through to the store verbatim apart from
/// marshaling the values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteOptions {
    pub condition_expression: Option<String>,
    pub expression_attribute_names: Option<BTreeMap<String, String>>,
    pub expression_attribute_values: Option<Item>,
}

/// What a put did. `Inserted` and `Updated` are only reported when the change is tracked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    Written,
    Inserted,
    Updated,
}

fn non_empty(item: Option<WireItem>) -> Option<WireItem> {
    item.filter(|i| !i.is_empty())
}

impl<T: Transport> Client<T> {
    pub async fn put_item(&self, table: &str, item: &Item) -> Result<PutOutcome> {
        self.put_item_with(table, item, &WriteOptions::default(), false).await
    }

    /// Writes `item` in full, replacing any previous item with the same key. With `track_change`
    /// the store is asked for the previous item so that inserts and updates can be told apart.
    #[tracing::instrument(skip_all, fields(table = table, key, otel.status_code, error.msg, otel.span_kind = "client"))]
    pub async fn put_item_with(&self, table: &str, item: &Item, options: &WriteOptions, track_change: bool) -> Result<PutOutcome> {
        self.put_item_inner(table, item, options, track_change, None).await.spanify_err()
    }

    pub(crate) async fn put_item_inner(&self, table: &str, item: &Item, options: &WriteOptions, track_change: bool, attempts: Option<u32>) -> Result<PutOutcome> {
        let key = self.schemas().extract_key(table, item)?;
        Span::current().record("key", field::debug(&key));

        let input = PutItemInput {
            table_name: table.to_string(),
            item: codec::marshal_map(item),
            condition_expression: options.condition_expression.clone(),
            expression_attribute_names: options.expression_attribute_names.clone(),
            expression_attribute_values: options.expression_attribute_values.as_ref().map(codec::marshal_map),
            return_values: track_change.then_some(ReturnValue::AllOld),
        };
        let output: AttributesOutput = self.call(Operation::PutItem, &input, attempts).await?;
        self.cache.invalidate(table, &key);

        Ok(match (track_change, non_empty(output.attributes)) {
            (false, _) => PutOutcome::Written,
            (true, Some(_)) => PutOutcome::Updated,
            (true, None) => PutOutcome::Inserted,
        })
    }

    /// Returns `None` if there is no item with the given key. Served from the cache when enabled.
    #[tracing::instrument(skip_all, fields(table = table, key, otel.status_code, error.msg, otel.span_kind = "client"))]
    pub async fn get_item(&self, table: &str, key: &Item) -> Result<Option<Item>> {
        self.get_item_inner(table, key, false, true, None).await.spanify_err()
    }

    pub(crate) async fn get_item_inner(&self, table: &str, key: &Item, consistent_read: bool, use_cache: bool, attempts: Option<u32>) -> Result<Option<Item>> {
        let key = self.schemas().extract_key(table, key)?;
        Span::current().record("key", field::debug(&key));

        if use_cache {
            if let Some(item) = self.cache.load(table, &key) {
                debug!(table, "cache hit");
                return Ok(Some(item));
            }
        }

        let input = GetItemInput {
            table_name: table.to_string(),
            key: codec::marshal_map(&key),
            consistent_read: consistent_read.then_some(true),
        };
        let output: GetItemOutput = self.call(Operation::GetItem, &input, attempts).await?;
        Ok(non_empty(output.item).map(|wire| {
            let item = codec::unmarshal_item(&wire);
            if use_cache {
                self.cache.store(table, &key, item.clone());
            }
            item
        }))
    }

    /// Sets every non-key attribute of `data` on the item, creating it if needed, and returns the
    /// item as it is afterwards.
    #[tracing::instrument(skip_all, fields(table = table, key, otel.status_code, error.msg, otel.span_kind = "client"))]
    pub async fn update_item(&self, table: &str, key: &Item, data: &Item) -> Result<Option<Item>> {
        self.update_item_inner(table, key, data, None).await.spanify_err()
    }

    pub(crate) async fn update_item_inner(&self, table: &str, key: &Item, data: &Item, attempts: Option<u32>) -> Result<Option<Item>> {
        let key = self.schemas().extract_key(table, key)?;
        Span::current().record("key", field::debug(&key));
        if data.is_empty() {
            return Err(Error::validation("update data must contain at least one attribute"));
        }
        let schema = self.schemas().get(table)?;
        let fields: Vec<_> = data.iter().filter(|(name, _)| !schema.is_key_attribute(name)).collect();
        if fields.is_empty() {
            return Err(Error::validation("update data must contain at least one non-key attribute"));
        }

        // Placeholders keep attribute names clear of reserved words.
        let mut names = BTreeMap::new();
        let mut values = WireItem::new();
        for (i, (name, value)) in fields.iter().enumerate() {
            names.insert(format!("#f{}", i), name.to_string());
            values.insert(format!(":v{}", i), codec::marshal_value(value));
        }
        let input = UpdateItemInput {
            table_name: table.to_string(),
            key: codec::marshal_map(&key),
            update_expression: format!("SET {}", (0..fields.len()).map(|i| format!("#f{} = :v{}", i, i)).join(", ")),
            condition_expression: None,
            expression_attribute_names: Some(names),
            expression_attribute_values: Some(values),
            return_values: Some(ReturnValue::AllNew),
        };
        let output: AttributesOutput = self.call(Operation::UpdateItem, &input, attempts).await?;

        match non_empty(output.attributes) {
            Some(wire) => {
                let item = codec::unmarshal_item(&wire);
                self.cache.store(table, &key, item.clone());
                Ok(Some(item))
            }
            None => {
                self.cache.invalidate(table, &key);
                Ok(None)
            }
        }
    }

    pub async fn delete_item(&self, table: &str, key: &Item) -> Result<bool> {
        self.delete_item_with(table, key, &WriteOptions::default()).await
    }

    /// Returns whether an item was actually deleted.
    #[tracing::instrument(skip_all, fields(table = table, key, otel.status_code, error.msg, otel.span_kind = "client"))]
    pub async fn delete_item_with(&self, table: &str, key: &Item, options: &WriteOptions) -> Result<bool> {
        self.delete_item_inner(table, key, options, None).await.spanify_err()
    }

    pub(crate) async fn delete_item_inner(&self, table: &str, key: &Item, options: &WriteOptions, attempts: Option<u32>) -> Result<bool> {
        let key = self.schemas().extract_key(table, key)?;
        Span::current().record("key", field::debug(&key));

        // Invalidated up front: a failed delete must not leave a cached item behind.
        self.cache.invalidate(table, &key);

        let input = DeleteItemInput {
            table_name: table.to_string(),
            key: codec::marshal_map(&key),
            condition_expression: options.condition_expression.clone(),
            expression_attribute_names: options.expression_attribute_names.clone(),
            expression_attribute_values: options.expression_attribute_values.as_ref().map(codec::marshal_map),
            return_values: Some(ReturnValue::AllOld),
        };
        let output: AttributesOutput = self.call(Operation::DeleteItem, &input, attempts).await?;
        Ok(non_empty(output.attributes).is_some())
    }
}
