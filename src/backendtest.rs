use super::{Client, Result, TableConfig, Transport};
use std::time::Duration;

pub const USERS: &str = "backend_test_users";
pub const EVENTS: &str = "backend_test_events";
/// Registered with the client but never created on the store.
pub const MISSING: &str = "backend_test_missing";

/// Registers the test schemas and recreates their tables empty.
pub async fn prepare<T: Transport>(c: &Client<T>) -> Result<()> {
    c.schemas().register(USERS, TableConfig::new("id"));
    c.schemas().register(EVENTS, TableConfig::new("id").with_sort_key("sort"));
    c.schemas().register(MISSING, TableConfig::new("id"));

    for table in [USERS, EVENTS] {
        if c.delete_table(table).await.is_ok() {
            for _ in 0..10u32 {
                match c.describe_table(table).await {
                    Err(e) if e.error_code() == Some("ResourceNotFoundException") => break,
                    _ => tokio::time::sleep(Duration::from_millis(200)).await,
                }
            }
        }
        c.create_table(table).await?;
    }
    c.clear_errors();
    Ok(())
}

/// Runs the client contract against whatever store `$f` connects to. `$f` returns `None` when
/// the store isn't available, in which case the tests pass vacuously.
#[macro_export]
macro_rules! test_client {
    ($f:expr) => {
        use crate::{
            backendtest::{EVENTS, MISSING, USERS},
            Item, QueryOptions, TransactGetOperation, TransactOperation, TransactResult, TransactWriteOptions,
        };
        use serde_json::json;
        use serial_test::serial;

        fn item(v: serde_json::Value) -> Item {
            v.as_object().cloned().unwrap_or_default()
        }

        #[tokio::test]
        #[serial]
        async fn test_put_get_delete() {
            let Some(c) = ($f)().await else { return };
            let key = item(json!({"id": "foo"}));

            assert_eq!(c.get_item(USERS, &key).await.unwrap(), None);
            c.put_item(USERS, &item(json!({"id": "foo", "n": 1, "f": 1.5, "tags": ["a", "b"], "nested": {"ok": true, "none": null}})))
                .await
                .unwrap();
            assert_eq!(
                c.get_item(USERS, &key).await.unwrap(),
                Some(item(json!({"id": "foo", "n": 1, "f": 1.5, "tags": ["a", "b"], "nested": {"ok": true, "none": null}})))
            );

            assert_eq!(c.delete_item(USERS, &key).await.unwrap(), true);
            assert_eq!(c.get_item(USERS, &key).await.unwrap(), None);
            assert_eq!(c.delete_item(USERS, &key).await.unwrap(), false);
        }

        #[tokio::test]
        #[serial]
        async fn test_put_tracks_change() {
            let Some(c) = ($f)().await else { return };
            let options = crate::WriteOptions::default();

            assert_eq!(
                c.put_item_with(USERS, &item(json!({"id": "foo", "v": 1})), &options, true).await.unwrap(),
                crate::PutOutcome::Inserted
            );
            assert_eq!(
                c.put_item_with(USERS, &item(json!({"id": "foo", "v": 2})), &options, true).await.unwrap(),
                crate::PutOutcome::Updated
            );
        }

        #[tokio::test]
        #[serial]
        async fn test_update_item() {
            let Some(c) = ($f)().await else { return };
            let key = item(json!({"id": "foo", "sort": "1"}));

            let created = c.update_item(EVENTS, &key, &item(json!({"name": "a"}))).await.unwrap();
            assert_eq!(created, Some(item(json!({"id": "foo", "sort": "1", "name": "a"}))));

            let merged = c.update_item(EVENTS, &key, &item(json!({"count": 2}))).await.unwrap();
            assert_eq!(merged, Some(item(json!({"id": "foo", "sort": "1", "name": "a", "count": 2}))));
        }

        #[tokio::test]
        #[serial]
        async fn test_batch_write_and_get() {
            let Some(c) = ($f)().await else { return };
            let events: Vec<Item> = (1..=3).map(|i| item(json!({"id": "foo", "sort": i.to_string(), "v": i}))).collect();

            let outcome = c.batch_write_item(EVENTS, &events).await.unwrap();
            assert_eq!(outcome.inserted.len(), 3);
            assert!(outcome.failed.is_empty());

            let keys = vec![
                item(json!({"id": "foo", "sort": "3"})),
                item(json!({"id": "bar", "sort": "1"})),
                item(json!({"id": "foo", "sort": "1"})),
            ];
            let found = c.batch_get_item(EVENTS, &keys).await.unwrap();
            assert_eq!(found, vec![Some(events[2].clone()), None, Some(events[0].clone())]);
        }

        #[tokio::test]
        #[serial]
        async fn test_query_pages() {
            let Some(c) = ($f)().await else { return };
            let events: Vec<Item> = (1..=5).map(|i| item(json!({"id": "foo", "sort": format!("{:02}", i)}))).collect();
            c.batch_write_item(EVENTS, &events).await.unwrap();
            c.put_item(EVENTS, &item(json!({"id": "bar", "sort": "03"}))).await.unwrap();

            let options = QueryOptions {
                limit: Some(2),
                expression_attribute_names: Some(
                    vec![("#id".to_string(), "id".to_string()), ("#s".to_string(), "sort".to_string())]
                        .into_iter()
                        .collect(),
                ),
                ..QueryOptions::default()
            };
            let items = c
                .query(EVENTS, "#id = :id AND #s BETWEEN :lo AND :hi", &item(json!({":id": "foo", ":lo": "02", ":hi": "04"})), &options)
                .await
                .unwrap();
            assert_eq!(items, events[1..4].to_vec());

            let reversed = QueryOptions {
                scan_index_forward: Some(false),
                ..options
            };
            let items = c
                .query(EVENTS, "#id = :id AND begins_with(#s, :p)", &item(json!({":id": "foo", ":p": "0"})), &reversed)
                .await
                .unwrap();
            assert_eq!(items.first(), events.last());
            assert_eq!(items.len(), 5);
        }

        #[tokio::test]
        #[serial]
        async fn test_scan_pages() {
            let Some(c) = ($f)().await else { return };
            for i in 0..3 {
                c.put_item(USERS, &item(json!({"id": format!("u{}", i), "age": i * 10}))).await.unwrap();
            }

            let options = QueryOptions {
                limit: Some(1),
                ..QueryOptions::default()
            };
            let mut ids: Vec<_> = c.scan(USERS, &options).await.unwrap().into_iter().map(|i| i["id"].clone()).collect();
            ids.sort_by_key(|id| id.to_string());
            assert_eq!(ids, vec![json!("u0"), json!("u1"), json!("u2")]);
        }

        #[tokio::test]
        #[serial]
        async fn test_transact_write_rolls_back() {
            let Some(c) = ($f)().await else { return };
            c.put_item(USERS, &item(json!({"id": "a", "v": "before"}))).await.unwrap();

            let operations = vec![
                TransactOperation::Update {
                    table: USERS.to_string(),
                    key: item(json!({"id": "a"})),
                    data: item(json!({"v": "after"})),
                },
                TransactOperation::Put {
                    table: MISSING.to_string(),
                    item: item(json!({"id": "b"})),
                },
            ];
            let err = c.transact_write(&operations, &TransactWriteOptions::default()).await.unwrap_err();
            assert!(matches!(err, crate::Error::Transaction { index: 1, rolled_back: true, .. }), "{}", err);
            assert_eq!(
                c.get_item(USERS, &item(json!({"id": "a"}))).await.unwrap(),
                Some(item(json!({"id": "a", "v": "before"})))
            );
            assert!(!c.errors().is_empty());
        }

        #[tokio::test]
        #[serial]
        async fn test_transact_write_and_get() {
            let Some(c) = ($f)().await else { return };
            let operations = vec![
                TransactOperation::Put {
                    table: USERS.to_string(),
                    item: item(json!({"id": "a"})),
                },
                TransactOperation::Put {
                    table: EVENTS.to_string(),
                    item: item(json!({"id": "a", "sort": "1"})),
                },
                TransactOperation::Delete {
                    table: USERS.to_string(),
                    key: item(json!({"id": "never"})),
                },
            ];
            let outcome = c.transact_write(&operations, &TransactWriteOptions::default()).await.unwrap();
            assert_eq!(outcome.results[2], TransactResult::Delete(false));

            let gets = vec![
                TransactGetOperation {
                    table: EVENTS.to_string(),
                    key: item(json!({"id": "a", "sort": "1"})),
                },
                TransactGetOperation {
                    table: USERS.to_string(),
                    key: item(json!({"id": "never"})),
                },
                TransactGetOperation {
                    table: USERS.to_string(),
                    key: item(json!({"id": "a"})),
                },
            ];
            let outcome = c.transact_get(&gets, true).await.unwrap();
            let items: Vec<_> = outcome.results.into_iter().map(|r| r.item).collect();
            assert_eq!(
                items,
                vec![Some(item(json!({"id": "a", "sort": "1"}))), None, Some(item(json!({"id": "a"})))]
            );
        }
    };
}
