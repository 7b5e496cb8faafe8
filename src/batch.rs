use super::{
    cache::ItemCache,
    codec, sigv4,
    wire::{BatchGetItemInput, BatchGetItemOutput, BatchWriteItemInput, BatchWriteItemOutput, KeysAndAttributes, Operation, WireItem, WriteRequest},
    Client, Error, Item, Result, ResultExt, Transport,
};
use itertools::Itertools as _;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// The most items a batch write, batch get or transaction may carry.
pub const MAX_BATCH_SIZE: usize = 25;

/// How the items of a batch write fared. `inserted` and `failed` partition the input items;
/// `unprocessed` holds the items the store handed back, which callers may resubmit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchWriteOutcome {
    pub inserted: Vec<Item>,
    pub failed: Vec<Item>,
    pub unprocessed: Vec<Item>,
}

/// Identifies marshaled items by content. Items that marshal identically can't be told apart.
fn content_hash(item: &WireItem) -> Result<String> {
    Ok(sigv4::sha256_hex(serde_json::to_vec(item)?))
}

fn check_batch_size(len: usize) -> Result<()> {
    if len > MAX_BATCH_SIZE {
        return Err(Error::validation(format!("batch size {} exceeds the maximum of {}", len, MAX_BATCH_SIZE)));
    }
    Ok(())
}

impl<T: Transport> Client<T> {
    /// Puts up to 25 items with a single request.
    #[tracing::instrument(skip_all, fields(table = table, count = items.len(), unprocessed, otel.status_code, error.msg, otel.span_kind = "client"))]
    pub async fn batch_write_item(&self, table: &str, items: &[Item]) -> Result<BatchWriteOutcome> {
        check_batch_size(items.len()).spanify_err()?;
        if items.is_empty() {
            return Ok(BatchWriteOutcome::default());
        }
        let keys = items.iter().map(|item| self.schemas().extract_key(table, item)).collect::<Result<Vec<_>>>().spanify_err()?;

        let marshaled: Vec<WireItem> = items.iter().map(codec::marshal_map).collect();
        let input = BatchWriteItemInput {
            request_items: std::iter::once((table.to_string(), marshaled.iter().cloned().map(WriteRequest::put).collect())).collect(),
        };
        let output: BatchWriteItemOutput = self.call(Operation::BatchWriteItem, &input, None).await.spanify_err()?;
        for key in &keys {
            self.cache.invalidate(table, key);
        }

        let unprocessed: Vec<WireItem> = output
            .unprocessed_items
            .get(table)
            .into_iter()
            .flatten()
            .filter_map(|r| r.put_request.as_ref().map(|p| p.item.clone()))
            .collect();
        tracing::Span::current().record("unprocessed", unprocessed.len());
        let unprocessed_hashes = unprocessed.iter().map(content_hash).collect::<Result<HashSet<_>>>()?;

        let mut outcome = BatchWriteOutcome::default();
        for (item, wire) in items.iter().zip(&marshaled) {
            if unprocessed_hashes.contains(&content_hash(wire)?) {
                outcome.failed.push(item.clone());
            } else {
                outcome.inserted.push(item.clone());
            }
        }
        outcome.unprocessed = unprocessed.iter().map(codec::unmarshal_item).collect();
        Ok(outcome)
    }

    /// Fetches up to 25 items with a single request. The result lines up with `keys`, holding
    /// `None` wherever no item was found.
    #[tracing::instrument(skip_all, fields(table = table, count = keys.len(), otel.status_code, error.msg, otel.span_kind = "client"))]
    pub async fn batch_get_item(&self, table: &str, keys: &[Item]) -> Result<Vec<Option<Item>>> {
        check_batch_size(keys.len()).spanify_err()?;
        if keys.is_empty() {
            return Ok(vec![]);
        }
        let keys = keys.iter().map(|key| self.schemas().extract_key(table, key)).collect::<Result<Vec<_>>>().spanify_err()?;
        self.batch_get_inner(table, &keys, false, None).await.spanify_err()
    }

    /// `keys` must already be validated and hold only key attributes. Keys the store leaves
    /// unprocessed are resubmitted, backing off between rounds, for as many rounds as a single
    /// request may be attempted.
    pub(crate) async fn batch_get_inner(&self, table: &str, keys: &[Item], consistent_read: bool, attempts: Option<u32>) -> Result<Vec<Option<Item>>> {
        let schema = self.schemas().get(table)?;
        // Stores reject duplicate keys within one request.
        let mut pending: Vec<WireItem> = keys.iter().unique_by(|k| ItemCache::entry_key(table, k)).map(codec::marshal_map).collect();
        let max_rounds = attempts.unwrap_or(self.config().max_attempts).max(1);
        let mut delay = self.config().initial_backoff();
        let mut found: HashMap<String, Item> = HashMap::new();
        let mut round = 1;

        loop {
            let input = BatchGetItemInput {
                request_items: std::iter::once((
                    table.to_string(),
                    KeysAndAttributes {
                        keys: pending,
                        consistent_read: consistent_read.then_some(true),
                    },
                ))
                .collect(),
            };
            let mut output: BatchGetItemOutput = self.call(Operation::BatchGetItem, &input, attempts).await?;

            for wire in output.responses.remove(table).unwrap_or_default() {
                let item = codec::unmarshal_item(&wire);
                found.insert(ItemCache::entry_key(table, &schema.project_key(&item)), item);
            }

            pending = output.unprocessed_keys.remove(table).map(|k| k.keys).unwrap_or_default();
            if pending.is_empty() {
                break;
            }
            if round >= max_rounds {
                return Err(Error::Unprocessed {
                    table: table.to_string(),
                    count: pending.len(),
                });
            }
            warn!(table, count = pending.len(), round, "batch get left keys unprocessed, resubmitting");
            tokio::time::sleep(delay).await;
            delay *= 2;
            round += 1;
        }

        Ok(keys.iter().map(|k| found.get(&ItemCache::entry_key(table, k)).cloned()).collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        testutil::{body, item, memory_client},
        WireResponse,
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_batch_limits() {
        let c = memory_client(false).await;
        let items: Vec<Item> = (0..26).map(|i| item(json!({"id": i.to_string()}))).collect();

        assert!(matches!(c.batch_write_item("users", &items).await, Err(Error::Validation(_))));
        assert!(matches!(c.batch_get_item("users", &items).await, Err(Error::Validation(_))));
        assert_eq!(c.transport().count(), 0);

        assert_eq!(c.batch_write_item("users", &items[..25]).await.unwrap().inserted.len(), 25);
        assert_eq!(c.transport().count(), 1);
    }

    #[tokio::test]
    async fn test_batch_write_validates_every_key_first() {
        let c = memory_client(false).await;
        let items = vec![item(json!({"id": "1"})), item(json!({"name": "keyless"}))];
        assert!(matches!(c.batch_write_item("users", &items).await, Err(Error::Validation(_))));
        assert_eq!(c.transport().count(), 0);
    }

    #[tokio::test]
    async fn test_batch_write_classifies_unprocessed_items() {
        let c = memory_client(false).await;
        c.transport().inject(|request| {
            if request.operation() != Some("BatchWriteItem") {
                return None;
            }
            let sent = body(request);
            let second = sent["RequestItems"]["users"][1].clone();
            Some(WireResponse::json(200, &json!({"UnprocessedItems": {"users": [second]}})))
        });

        let items = vec![item(json!({"id": "1", "v": "a"})), item(json!({"id": "2", "v": "b"})), item(json!({"id": "3"}))];
        let outcome = c.batch_write_item("users", &items).await.unwrap();
        assert_eq!(outcome.inserted, vec![items[0].clone(), items[2].clone()]);
        assert_eq!(outcome.failed, vec![items[1].clone()]);
        assert_eq!(outcome.unprocessed, vec![items[1].clone()]);
    }

    #[tokio::test]
    async fn test_batch_get_preserves_order() {
        let c = memory_client(false).await;
        c.batch_write_item(
            "events",
            &[item(json!({"id": "a", "sort": 1, "v": 1})), item(json!({"id": "a", "sort": 2, "v": 2}))],
        )
        .await
        .unwrap();

        let keys = vec![
            item(json!({"id": "a", "sort": 2})),
            item(json!({"id": "missing", "sort": 1})),
            item(json!({"id": "a", "sort": 1, "ignored": true})),
            item(json!({"id": "a", "sort": 2})),
        ];
        let found = c.batch_get_item("events", &keys).await.unwrap();
        assert_eq!(
            found,
            vec![
                Some(item(json!({"id": "a", "sort": 2, "v": 2}))),
                None,
                Some(item(json!({"id": "a", "sort": 1, "v": 1}))),
                Some(item(json!({"id": "a", "sort": 2, "v": 2}))),
            ]
        );
    }

    /// Answers the first `rounds` batch gets itself. The first of them returns only the first
    /// requested key and every round hands the remaining keys back as unprocessed.
    fn hold_back_keys(rounds: usize) -> impl Fn(&crate::WireRequest) -> Option<WireResponse> + Send + Sync + 'static {
        let seen = AtomicUsize::new(0);
        move |request| {
            if request.operation() != Some("BatchGetItem") {
                return None;
            }
            let round = seen.fetch_add(1, Ordering::SeqCst);
            if round >= rounds {
                return None;
            }
            let keys = body(request)["RequestItems"]["users"]["Keys"].as_array().cloned().unwrap_or_default();
            let (found, left) = if round == 0 {
                let mut stored = keys[0].clone();
                stored["v"] = json!({"N": "1"});
                (vec![stored], keys[1..].to_vec())
            } else {
                (vec![], keys)
            };
            Some(WireResponse::json(
                200,
                &json!({"Responses": {"users": found}, "UnprocessedKeys": {"users": {"Keys": left}}}),
            ))
        }
    }

    #[tokio::test]
    async fn test_batch_get_resubmits_unprocessed_keys() {
        let c = memory_client(false).await;
        c.put_item("users", &item(json!({"id": "a", "v": 1}))).await.unwrap();
        c.put_item("users", &item(json!({"id": "b", "v": 2}))).await.unwrap();
        c.transport().reset();
        c.transport().inject(hold_back_keys(1));

        let found = c.batch_get_item("users", &[item(json!({"id": "a"})), item(json!({"id": "b"}))]).await.unwrap();
        assert_eq!(found, vec![Some(item(json!({"id": "a", "v": 1}))), Some(item(json!({"id": "b", "v": 2})))]);
        assert_eq!(c.transport().operations(), vec!["BatchGetItem", "BatchGetItem"]);
    }

    #[tokio::test]
    async fn test_batch_get_fails_when_keys_stay_unprocessed() {
        let c = memory_client(false).await;
        c.put_item("users", &item(json!({"id": "a", "v": 1}))).await.unwrap();
        c.put_item("users", &item(json!({"id": "b", "v": 2}))).await.unwrap();
        c.transport().reset();
        c.transport().inject(hold_back_keys(usize::MAX));

        let err = c.batch_get_item("users", &[item(json!({"id": "a"})), item(json!({"id": "b"}))]).await.unwrap_err();
        assert!(matches!(err, Error::Unprocessed { count: 1, .. }), "{}", err);
        assert_eq!(c.transport().count(), 3);
    }

    #[tokio::test]
    async fn test_empty_batches_skip_the_wire() {
        let c = memory_client(false).await;
        assert_eq!(c.batch_write_item("users", &[]).await.unwrap(), BatchWriteOutcome::default());
        assert!(c.batch_get_item("users", &[]).await.unwrap().is_empty());
        assert_eq!(c.transport().count(), 0);
    }
}
