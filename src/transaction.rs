//! Multi-item writes and reads for stores without native transactions.
//!
//! Writes run one at a time after every key has been validated and the items they touch have been
//! snapshotted. When one fails, the snapshots are written back. Nothing stops other clients from
//! observing or racing with the intermediate states, so this narrows the window for partial
//! failures rather than closing it.

use super::{
    batch::MAX_BATCH_SIZE,
    cache::ItemCache,
    crud::{PutOutcome, WriteOptions},
    Client, Error, Item, Result, ResultExt, Transport,
};
use itertools::Itertools as _;
use std::collections::HashSet;
use tracing::{error, warn};

#[derive(Clone, Debug, PartialEq)]
pub enum TransactOperation {
    Put { table: String, item: Item },
    Update { table: String, key: Item, data: Item },
    Delete { table: String, key: Item },
}

impl TransactOperation {
    pub fn table(&self) -> &str {
        match self {
            Self::Put { table, .. } | Self::Update { table, .. } | Self::Delete { table, .. } => table,
        }
    }

    /// The item or key the operation's key is taken from.
    fn key_source(&self) -> &Item {
        match self {
            Self::Put { item, .. } => item,
            Self::Update { key, .. } | Self::Delete { key, .. } => key,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactWriteOptions {
    /// Write the snapshots back when an operation fails.
    pub rollback_on_failure: bool,
    /// Overrides the client's `max_attempts` for every request the transaction makes.
    pub retry_attempts: Option<u32>,
    /// Also snapshot the targets of puts, and undo writes to items that didn't exist beforehand
    /// by deleting them. Without this, new items survive a rollback.
    pub rollback_new_items: bool,
}

impl Default for TransactWriteOptions {
    fn default() -> Self {
        Self {
            rollback_on_failure: true,
            retry_attempts: None,
            rollback_new_items: false,
        }
    }
}

/// The result of one operation of a successful transactional write, as the corresponding
/// single-item call would have returned it.
#[derive(Clone, Debug, PartialEq)]
pub enum TransactResult {
    Put(PutOutcome),
    Update(Option<Item>),
    Delete(bool),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransactWriteOutcome {
    pub success: bool,
    pub results: Vec<TransactResult>,
}

/// How to restore one item during rollback.
#[derive(Clone, Debug, PartialEq)]
pub enum RollbackAction {
    RestoreSnapshot(Item),
    DeleteSinceNew,
}

struct Snapshot {
    /// Index of the first operation touching the item.
    index: usize,
    table: String,
    key: Item,
    action: RollbackAction,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransactGetOperation {
    pub table: String,
    pub key: Item,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransactGetResult {
    pub table: String,
    pub key: Item,
    pub item: Option<Item>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransactGetOutcome {
    pub success: bool,
    pub results: Vec<TransactGetResult>,
}

fn check_size(len: usize) -> Result<()> {
    if len > MAX_BATCH_SIZE {
        return Err(Error::validation(format!(
            "a transaction may hold at most {} operations, got {}",
            MAX_BATCH_SIZE, len
        )));
    }
    Ok(())
}

impl<T: Transport> Client<T> {
    /// Applies up to 25 operations in order, stopping at the first failure. If rollback is
    /// enabled the failure is reported as [`Error::Transaction`] once the snapshots are restored,
    /// or as [`Error::Rollback`] if restoring them failed too.
    #[tracing::instrument(skip_all, fields(count = operations.len(), snapshots, otel.status_code, error.msg, otel.span_kind = "client"))]
    pub async fn transact_write(&self, operations: &[TransactOperation], options: &TransactWriteOptions) -> Result<TransactWriteOutcome> {
        check_size(operations.len()).spanify_err()?;
        let attempts = options.retry_attempts;

        let keys = operations
            .iter()
            .map(|op| self.schemas().extract_key(op.table(), op.key_source()))
            .collect::<Result<Vec<_>>>()
            .spanify_err()?;

        let snapshots = if options.rollback_on_failure {
            self.snapshot(operations, &keys, options).await.spanify_err()?
        } else {
            vec![]
        };
        tracing::Span::current().record("snapshots", snapshots.len());

        let mut results = Vec::with_capacity(operations.len());
        for (index, op) in operations.iter().enumerate() {
            let result = match op {
                TransactOperation::Put { table, item } => self
                    .put_item_inner(table, item, &WriteOptions::default(), true, attempts)
                    .await
                    .map(TransactResult::Put),
                TransactOperation::Update { table, key, data } => self.update_item_inner(table, key, data, attempts).await.map(TransactResult::Update),
                TransactOperation::Delete { table, key } => self
                    .delete_item_inner(table, key, &WriteOptions::default(), attempts)
                    .await
                    .map(TransactResult::Delete),
            };
            match result {
                Ok(result) => results.push(result),
                Err(e) if options.rollback_on_failure => return Err(self.roll_back(index, e, &snapshots, attempts).await).spanify_err(),
                Err(e) => {
                    return Err(Error::Transaction {
                        index,
                        rolled_back: false,
                        source: Box::new(e),
                    })
                    .spanify_err()
                }
            }
        }

        Ok(TransactWriteOutcome { success: true, results })
    }

    async fn snapshot(&self, operations: &[TransactOperation], keys: &[Item], options: &TransactWriteOptions) -> Result<Vec<Snapshot>> {
        let mut seen = HashSet::new();
        let mut snapshots = vec![];
        for (index, (op, key)) in operations.iter().zip(keys).enumerate() {
            if matches!(op, TransactOperation::Put { .. }) && !options.rollback_new_items {
                continue;
            }
            // The first snapshot of an item is the one that predates the transaction.
            if !seen.insert(ItemCache::entry_key(op.table(), key)) {
                continue;
            }
            let action = match self.get_item_inner(op.table(), key, true, false, options.retry_attempts).await? {
                Some(item) => RollbackAction::RestoreSnapshot(item),
                None if options.rollback_new_items => RollbackAction::DeleteSinceNew,
                None => continue,
            };
            snapshots.push(Snapshot {
                index,
                table: op.table().to_string(),
                key: key.clone(),
                action,
            });
        }
        Ok(snapshots)
    }

    /// Restores every item touched by operations up to and including `index`.
    async fn roll_back(&self, index: usize, original: Error, snapshots: &[Snapshot], attempts: Option<u32>) -> Error {
        warn!(index, error = %original, "transactional write failed, rolling back");
        let mut failure = None;
        for snapshot in snapshots.iter().filter(|s| s.index <= index) {
            let result = match &snapshot.action {
                RollbackAction::RestoreSnapshot(item) => self
                    .put_item_inner(&snapshot.table, item, &WriteOptions::default(), false, attempts)
                    .await
                    .map(|_| ()),
                RollbackAction::DeleteSinceNew => self
                    .delete_item_inner(&snapshot.table, &snapshot.key, &WriteOptions::default(), attempts)
                    .await
                    .map(|_| ()),
            };
            if let Err(e) = result {
                error!(table = snapshot.table.as_str(), key = ?snapshot.key, error = %e, "rollback failed");
                failure.get_or_insert(e);
            }
        }

        match failure {
            Some(rollback) => Error::Rollback {
                index,
                original: Box::new(original),
                rollback: Box::new(rollback),
            },
            None => Error::Transaction {
                index,
                rolled_back: true,
                source: Box::new(original),
            },
        }
    }

    /// Reads up to 25 items with one batch get per table. Results line up with `operations`.
    #[tracing::instrument(skip_all, fields(count = operations.len(), otel.status_code, error.msg, otel.span_kind = "client"))]
    pub async fn transact_get(&self, operations: &[TransactGetOperation], consistent_read: bool) -> Result<TransactGetOutcome> {
        check_size(operations.len()).spanify_err()?;
        let keys = operations
            .iter()
            .map(|op| self.schemas().extract_key(&op.table, &op.key))
            .collect::<Result<Vec<_>>>()
            .spanify_err()?;

        let mut items = vec![None; operations.len()];
        let by_table = operations.iter().enumerate().map(|(i, op)| (op.table.as_str(), i)).into_group_map();
        for (table, indexes) in by_table.into_iter().sorted() {
            let table_keys: Vec<Item> = indexes.iter().map(|&i| keys[i].clone()).collect();
            let found = self.batch_get_inner(table, &table_keys, consistent_read, None).await.spanify_err()?;
            for (i, item) in indexes.into_iter().zip(found) {
                items[i] = item;
            }
        }

        Ok(TransactGetOutcome {
            success: true,
            results: operations
                .iter()
                .zip(keys)
                .zip(items)
                .map(|((op, key), item)| TransactGetResult {
                    table: op.table.clone(),
                    key,
                    item,
                })
                .collect(),
        })
    }
}
