use super::{
    codec,
    wire::{Operation, PageOutput, ReadInput},
    Client, Error, Item, Result, ResultExt, Transport,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Optional parameters for [`Client::query`] and [`Client::scan`]. `limit` bounds each page, not
/// the overall result, which always holds every matching item.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryOptions {
    pub index_name: Option<String>,
    pub filter_expression: Option<String>,
    pub projection_expression: Option<String>,
    pub expression_attribute_names: Option<BTreeMap<String, String>>,
    pub expression_attribute_values: Option<Item>,
    pub limit: Option<u32>,
    pub consistent_read: Option<bool>,
    /// Query only. `Some(false)` returns items in descending sort key order.
    pub scan_index_forward: Option<bool>,
}

impl QueryOptions {
    fn read_input(&self, table: &str, values: Option<Item>) -> ReadInput {
        ReadInput {
            table_name: table.to_string(),
            index_name: self.index_name.clone(),
            filter_expression: self.filter_expression.clone(),
            projection_expression: self.projection_expression.clone(),
            expression_attribute_names: self.expression_attribute_names.clone(),
            expression_attribute_values: values.filter(|v| !v.is_empty()).as_ref().map(codec::marshal_map),
            limit: self.limit,
            consistent_read: self.consistent_read,
            ..ReadInput::default()
        }
    }
}

impl<T: Transport> Client<T> {
    /// Returns every item matching `key_condition`, following continuation keys until the store
    /// reports no more pages. `values` are merged over `options.expression_attribute_values`.
    #[tracing::instrument(skip_all, fields(table = table, pages, otel.status_code, error.msg, otel.span_kind = "client"))]
    pub async fn query(&self, table: &str, key_condition: &str, values: &Item, options: &QueryOptions) -> Result<Vec<Item>> {
        if table.is_empty() || key_condition.trim().is_empty() {
            return Err(Error::validation("query requires a table name and a key condition expression")).spanify_err();
        }
        let mut merged = options.expression_attribute_values.clone().unwrap_or_default();
        merged.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));

        let input = ReadInput {
            key_condition_expression: Some(key_condition.to_string()),
            scan_index_forward: options.scan_index_forward,
            ..options.read_input(table, Some(merged))
        };
        self.read_all(Operation::Query, input).await.spanify_err()
    }

    /// Returns every item in the table that passes the optional filter.
    #[tracing::instrument(skip_all, fields(table = table, pages, otel.status_code, error.msg, otel.span_kind = "client"))]
    pub async fn scan(&self, table: &str, options: &QueryOptions) -> Result<Vec<Item>> {
        if table.is_empty() {
            return Err(Error::validation("scan requires a table name")).spanify_err();
        }
        let input = options.read_input(table, options.expression_attribute_values.clone());
        self.read_all(Operation::Scan, input).await.spanify_err()
    }

    async fn read_all(&self, operation: Operation, mut input: ReadInput) -> Result<Vec<Item>> {
        let mut items = vec![];
        let mut pages = 0u32;
        loop {
            let page: PageOutput = self.call(operation, &input, None).await?;
            pages += 1;
            items.extend(page.items.iter().map(codec::unmarshal_item));
            match page.last_evaluated_key {
                Some(key) if !key.is_empty() => input.exclusive_start_key = Some(key),
                _ => break,
            }
        }
        tracing::Span::current().record("pages", pages);
        debug!(%operation, pages, count = items.len(), "read complete");
        Ok(items)
    }
}
