use super::{
    schema::TableConfig,
    wire::{
        AttributeDefinition, CreateTableInput, DescribeTableOutput, KeySchemaElement, KeyType, ListTablesInput, ListTablesOutput, Operation,
        TableDescription, TableDescriptionOutput, TableNameInput,
    },
    Client, Error, Result, ResultExt, Transport,
};

/// The `CreateTable` input for `table` with the key schema in `config`. The table is billed per
/// request.
pub fn create_table_input(table: &str, config: &TableConfig) -> CreateTableInput {
    let mut key_schema = vec![KeySchemaElement {
        attribute_name: config.partition_key.clone(),
        key_type: KeyType::Hash,
    }];
    if let Some(sk) = &config.sort_key {
        key_schema.push(KeySchemaElement {
            attribute_name: sk.clone(),
            key_type: KeyType::Range,
        });
    }
    CreateTableInput {
        table_name: table.to_string(),
        attribute_definitions: config
            .typed_key_attributes()
            .map(|(k, t)| AttributeDefinition {
                attribute_name: k.to_string(),
                attribute_type: t.as_str().to_string(),
            })
            .collect(),
        key_schema,
        billing_mode: Some("PAY_PER_REQUEST".to_string()),
    }
}

fn missing(what: &'static str) -> Error {
    <serde_json::Error as serde::de::Error>::missing_field(what).into()
}

impl<T: Transport> Client<T> {
    /// Creates `table` from its registered schema.
    #[tracing::instrument(skip_all, fields(table = table, otel.status_code, error.msg, otel.span_kind = "client"))]
    pub async fn create_table(&self, table: &str) -> Result<TableDescription> {
        let input = create_table_input(table, &self.schemas().get(table).spanify_err()?);
        let output: TableDescriptionOutput = self.call(Operation::CreateTable, &input, None).await.spanify_err()?;
        output.table_description.ok_or_else(|| missing("TableDescription")).spanify_err()
    }

    /// Deletes `table` and drops every cached item.
    #[tracing::instrument(skip_all, fields(table = table, otel.status_code, error.msg, otel.span_kind = "client"))]
    pub async fn delete_table(&self, table: &str) -> Result<TableDescription> {
        let input = TableNameInput {
            table_name: table.to_string(),
        };
        let output: TableDescriptionOutput = self.call(Operation::DeleteTable, &input, None).await.spanify_err()?;
        self.cache.clear();
        output.table_description.ok_or_else(|| missing("TableDescription")).spanify_err()
    }

    #[tracing::instrument(skip_all, fields(table = table, otel.status_code, error.msg, otel.span_kind = "client"))]
    pub async fn describe_table(&self, table: &str) -> Result<TableDescription> {
        let input = TableNameInput {
            table_name: table.to_string(),
        };
        let output: DescribeTableOutput = self.call(Operation::DescribeTable, &input, None).await.spanify_err()?;
        output.table.ok_or_else(|| missing("Table")).spanify_err()
    }

    /// Lists every table, following `LastEvaluatedTableName` across pages.
    #[tracing::instrument(skip_all, fields(otel.status_code, error.msg, otel.span_kind = "client"))]
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let mut input = ListTablesInput::default();
        let mut names = vec![];
        loop {
            let output: ListTablesOutput = self.call(Operation::ListTables, &input, None).await.spanify_err()?;
            names.extend(output.table_names);
            match output.last_evaluated_table_name {
                Some(last) => input.exclusive_start_table_name = Some(last),
                None => return Ok(names),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        schema::KeyAttributeType,
        testutil::{body, config, memory_client, Scripted, ScriptedTransport},
    };
    use serde_json::json;

    #[tokio::test]
    async fn test_table_lifecycle() {
        let c = memory_client(false).await;
        assert_eq!(c.list_tables().await.unwrap(), vec!["events".to_string(), "users".to_string()]);

        let description = c.describe_table("events").await.unwrap();
        assert_eq!(description.table_status.as_deref(), Some("ACTIVE"));
        assert_eq!(description.key_schema.len(), 2);
        assert_eq!(description.key_schema[1].key_type, KeyType::Range);

        let err = c.create_table("users").await.unwrap_err();
        assert_eq!(err.error_code(), Some("ResourceInUseException"));

        c.delete_table("users").await.unwrap();
        assert_eq!(c.list_tables().await.unwrap(), vec!["events".to_string()]);
        let err = c.describe_table("users").await.unwrap_err();
        assert_eq!(err.error_code(), Some("ResourceNotFoundException"));
    }

    #[tokio::test]
    async fn test_create_table_needs_a_schema() {
        let c = memory_client(false).await;
        assert!(matches!(c.create_table("unregistered").await, Err(Error::UnknownTable(_))));
        assert_eq!(c.transport().count(), 0);
    }

    #[tokio::test]
    async fn test_list_tables_pagination() {
        let transport = ScriptedTransport::new(Scripted::ok(json!({"TableNames": ["c"]})))
            .then(Scripted::ok(json!({"TableNames": ["a", "b"], "LastEvaluatedTableName": "b"})));
        let c = Client::with_transport(config(), transport).unwrap();

        assert_eq!(c.list_tables().await.unwrap(), vec!["a", "b", "c"]);
        let requests = c.transport().requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(body(&requests[1]), json!({"ExclusiveStartTableName": "b"}));
    }

    #[test]
    fn test_create_table_input() {
        let input = create_table_input(
            "events",
            &TableConfig::new("id").with_sort_key("sort").with_sort_key_type(KeyAttributeType::N),
        );
        assert_eq!(
            serde_json::to_value(&input).unwrap(),
            json!({
                "TableName": "events",
                "KeySchema": [
                    {"AttributeName": "id", "KeyType": "HASH"},
                    {"AttributeName": "sort", "KeyType": "RANGE"},
                ],
                "AttributeDefinitions": [
                    {"AttributeName": "id", "AttributeType": "S"},
                    {"AttributeName": "sort", "AttributeType": "N"},
                ],
                "BillingMode": "PAY_PER_REQUEST",
            })
        );
    }
}
