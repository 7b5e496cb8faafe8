//! An in-process stand-in for an Alternator node. It answers the same JSON operations the client
//! sends, which makes it suitable for tests and offline development. Expression support is
//! limited to what [`Client`](crate::Client) generates plus simple comparisons joined by `AND`.

use super::{
    schema::{KeyAttributeType, TableConfig},
    wire::{
        AttributeValue, AttributesOutput, BatchGetItemInput, BatchGetItemOutput, BatchWriteItemInput, BatchWriteItemOutput, CreateTableInput,
        DeleteItemInput, DescribeTableOutput, GetItemInput, GetItemOutput, KeyType, ListTablesInput, ListTablesOutput,
        PageOutput, PutItemInput, ReadInput, ReturnValue, TableDescription, TableDescriptionOutput, TableNameInput, UpdateItemInput, WireItem,
        ERROR_NAMESPACE,
    },
    Result, Transport, WireRequest, WireResponse,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex},
};

const MAX_BATCH_WRITE: usize = 25;
const MAX_BATCH_GET: usize = 100;
const DEFAULT_LIST_LIMIT: usize = 100;

#[derive(Debug)]
struct Fault {
    code: &'static str,
    message: String,
}

impl Fault {
    fn validation(message: impl Into<String>) -> Self {
        Self {
            code: "ValidationException",
            message: message.into(),
        }
    }

    fn not_found(table: &str) -> Self {
        Self {
            code: "ResourceNotFoundException",
            message: format!("Requested resource not found: Table: {} not found", table),
        }
    }
}

type OpResult<T> = std::result::Result<T, Fault>;

struct Table {
    schema: TableConfig,
    description: TableDescription,
    items: BTreeMap<String, WireItem>,
}

impl Table {
    fn key_of(&self, item: &WireItem) -> WireItem {
        self.schema
            .key_attributes()
            .filter_map(|k| item.get(k).map(|v| (k.to_string(), v.clone())))
            .collect()
    }

    /// The storage key of `item`: its key attributes serialized canonically.
    fn storage_key(&self, item: &WireItem) -> OpResult<String> {
        for (k, expected) in self.schema.typed_key_attributes() {
            let actual = match item.get(k) {
                Some(AttributeValue::S(s)) if s.is_empty() => {
                    return Err(Fault::validation(format!(
                        "One or more parameter values are not valid. The AttributeValue for a key attribute cannot contain an empty string value. Key: {}",
                        k
                    )))
                }
                Some(AttributeValue::S(_)) => "S",
                Some(AttributeValue::N(_)) => "N",
                Some(_) => "non-scalar",
                None => return Err(Fault::validation("One of the required keys was not given a value")),
            };
            if actual != expected.as_str() {
                return Err(Fault::validation(format!(
                    "One or more parameter values were invalid: Type mismatch for key {} expected: {} actual: {}",
                    k,
                    expected.as_str(),
                    actual
                )));
            }
        }
        serde_json::to_string(&self.key_of(item)).map_err(|e| Fault::validation(e.to_string()))
    }

    /// Like `storage_key`, but the key must consist of exactly the key attributes.
    fn exact_key(&self, key: &WireItem) -> OpResult<String> {
        if key.len() != self.schema.key_attributes().count() {
            return Err(Fault::validation("The provided key element does not match the schema"));
        }
        self.storage_key(key)
    }
}

#[derive(Clone, Default)]
pub struct Backend {
    tables: Arc<Mutex<HashMap<String, Table>>>,
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> OpResult<T> {
    serde_json::from_slice(body).map_err(|e| Fault::validation(format!("malformed request: {}", e)))
}

fn respond<T: Serialize>(r: OpResult<T>) -> OpResult<Value> {
    r.and_then(|v| serde_json::to_value(v).map_err(|e| Fault::validation(e.to_string())))
}

fn returned(rv: Option<ReturnValue>, old: Option<WireItem>, new: Option<WireItem>) -> Option<WireItem> {
    match rv {
        Some(ReturnValue::AllOld) => old,
        Some(ReturnValue::AllNew) => new,
        _ => None,
    }
    .filter(|i| !i.is_empty())
}

impl Backend {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_table<R, F: FnOnce(&mut Table) -> OpResult<R>>(&self, name: &str, f: F) -> OpResult<R> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables.get_mut(name).ok_or_else(|| Fault::not_found(name))?;
        f(table)
    }

    fn handle(&self, operation: &str, body: &[u8]) -> OpResult<Value> {
        match operation {
            "PutItem" => respond(self.put_item(parse(body)?)),
            "GetItem" => respond(self.get_item(parse(body)?)),
            "UpdateItem" => respond(self.update_item(parse(body)?)),
            "DeleteItem" => respond(self.delete_item(parse(body)?)),
            "BatchWriteItem" => respond(self.batch_write_item(parse(body)?)),
            "BatchGetItem" => respond(self.batch_get_item(parse(body)?)),
            "Query" => respond(self.query(parse(body)?)),
            "Scan" => respond(self.scan(parse(body)?)),
            "CreateTable" => respond(self.create_table(parse(body)?)),
            "DeleteTable" => respond(self.delete_table(parse(body)?)),
            "DescribeTable" => respond(self.describe_table(parse(body)?)),
            "ListTables" => respond(self.list_tables(parse(body)?)),
            other => Err(Fault {
                code: "UnknownOperationException",
                message: format!("unknown operation {}", other),
            }),
        }
    }

    fn put_item(&self, input: PutItemInput) -> OpResult<AttributesOutput> {
        let PutItemInput {
            table_name,
            item,
            condition_expression,
            expression_attribute_names,
            return_values,
            ..
        } = input;
        self.with_table(&table_name, |t| {
            let key = t.storage_key(&item)?;
            check_condition(condition_expression.as_deref(), expression_attribute_names.as_ref(), t.items.get(&key))?;
            let old = t.items.insert(key, item);
            Ok(AttributesOutput {
                attributes: returned(return_values, old, None),
            })
        })
    }

    fn get_item(&self, input: GetItemInput) -> OpResult<GetItemOutput> {
        self.with_table(&input.table_name, |t| {
            let key = t.exact_key(&input.key)?;
            Ok(GetItemOutput {
                item: t.items.get(&key).cloned(),
            })
        })
    }

    fn update_item(&self, input: UpdateItemInput) -> OpResult<AttributesOutput> {
        let names = input.expression_attribute_names.unwrap_or_default();
        let values = input.expression_attribute_values.unwrap_or_default();
        let assignments = parse_set(&input.update_expression, &names, &values)?;
        self.with_table(&input.table_name, |t| {
            let key = t.exact_key(&input.key)?;
            if let Some((name, _)) = assignments.iter().find(|(name, _)| t.schema.is_key_attribute(name)) {
                return Err(Fault::validation(format!("Cannot update attribute {}. This attribute is part of the key", name)));
            }
            let old = t.items.get(&key).cloned();
            check_condition(input.condition_expression.as_deref(), Some(&names), old.as_ref())?;
            let mut new = old.clone().unwrap_or_else(|| input.key.clone());
            new.extend(assignments);
            t.items.insert(key, new.clone());
            Ok(AttributesOutput {
                attributes: returned(input.return_values, old, Some(new)),
            })
        })
    }

    fn delete_item(&self, input: DeleteItemInput) -> OpResult<AttributesOutput> {
        self.with_table(&input.table_name, |t| {
            let key = t.exact_key(&input.key)?;
            check_condition(input.condition_expression.as_deref(), input.expression_attribute_names.as_ref(), t.items.get(&key))?;
            let old = t.items.remove(&key);
            Ok(AttributesOutput {
                attributes: returned(input.return_values, old, None),
            })
        })
    }

    fn batch_write_item(&self, input: BatchWriteItemInput) -> OpResult<BatchWriteItemOutput> {
        let total: usize = input.request_items.values().map(Vec::len).sum();
        if total == 0 || total > MAX_BATCH_WRITE {
            return Err(Fault::validation(format!("BatchWriteItem accepts 1 to {} requests", MAX_BATCH_WRITE)));
        }
        let mut tables = self.tables.lock().unwrap();

        // Everything is validated before anything is applied.
        let mut writes = vec![];
        for (name, requests) in &input.request_items {
            let t = tables.get(name).ok_or_else(|| Fault::not_found(name))?;
            for request in requests {
                match (&request.put_request, &request.delete_request) {
                    (Some(put), None) => writes.push((name.clone(), t.storage_key(&put.item)?, Some(put.item.clone()))),
                    (None, Some(delete)) => writes.push((name.clone(), t.exact_key(&delete.key)?, None)),
                    _ => return Err(Fault::validation("each write request needs exactly one of PutRequest or DeleteRequest")),
                }
            }
        }

        for (name, key, item) in writes {
            if let Some(t) = tables.get_mut(&name) {
                match item {
                    Some(item) => t.items.insert(key, item),
                    None => t.items.remove(&key),
                };
            }
        }
        Ok(BatchWriteItemOutput::default())
    }

    fn batch_get_item(&self, input: BatchGetItemInput) -> OpResult<BatchGetItemOutput> {
        let total: usize = input.request_items.values().map(|r| r.keys.len()).sum();
        if total == 0 || total > MAX_BATCH_GET {
            return Err(Fault::validation(format!("BatchGetItem accepts 1 to {} keys", MAX_BATCH_GET)));
        }
        let tables = self.tables.lock().unwrap();
        let mut out = BatchGetItemOutput::default();
        for (name, request) in input.request_items {
            let t = tables.get(&name).ok_or_else(|| Fault::not_found(&name))?;
            let mut seen = HashSet::new();
            let mut found = vec![];
            for key in &request.keys {
                let key = t.exact_key(key)?;
                if !seen.insert(key.clone()) {
                    return Err(Fault::validation("Provided list of item keys contains duplicates"));
                }
                if let Some(item) = t.items.get(&key) {
                    found.push(item.clone());
                }
            }
            out.responses.insert(name, found);
        }
        Ok(out)
    }

    fn query(&self, input: ReadInput) -> OpResult<PageOutput> {
        if input.index_name.is_some() {
            return Err(Fault::validation("secondary indexes are not supported"));
        }
        let names = input.expression_attribute_names.clone().unwrap_or_default();
        let values = input.expression_attribute_values.clone().unwrap_or_default();
        let expr = input
            .key_condition_expression
            .as_deref()
            .ok_or_else(|| Fault::validation("KeyConditionExpression is required"))?;
        let key_conditions = parse_conditions(expr, &names, &values)?;
        let filter = input.filter_expression.as_deref().map(|f| parse_conditions(f, &names, &values)).transpose()?;

        self.with_table(&input.table_name, |t| {
            if !key_conditions
                .iter()
                .any(|c| c.attribute == t.schema.partition_key && matches!(c.comparison, Comparison::Eq(_)))
            {
                return Err(Fault::validation("Query condition missed key schema element"));
            }
            let mut matched: Vec<&WireItem> = t.items.values().filter(|i| key_conditions.iter().all(|c| c.matches(i))).collect();
            if let Some(sk) = &t.schema.sort_key {
                matched.sort_by(|a, b| match (a.get(sk), b.get(sk)) {
                    (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
                    _ => Ordering::Equal,
                });
            }
            if input.scan_index_forward == Some(false) {
                matched.reverse();
            }
            page(t, matched, input.exclusive_start_key.as_ref(), input.limit, filter.as_deref())
        })
    }

    fn scan(&self, input: ReadInput) -> OpResult<PageOutput> {
        if input.index_name.is_some() {
            return Err(Fault::validation("secondary indexes are not supported"));
        }
        let names = input.expression_attribute_names.clone().unwrap_or_default();
        let values = input.expression_attribute_values.clone().unwrap_or_default();
        let filter = input.filter_expression.as_deref().map(|f| parse_conditions(f, &names, &values)).transpose()?;
        self.with_table(&input.table_name, |t| {
            let all = t.items.values().collect();
            page(t, all, input.exclusive_start_key.as_ref(), input.limit, filter.as_deref())
        })
    }

    fn create_table(&self, input: CreateTableInput) -> OpResult<TableDescriptionOutput> {
        let key_of_type = |kt: KeyType| input.key_schema.iter().filter(|k| k.key_type == kt).map(|k| k.attribute_name.clone()).collect::<Vec<_>>();
        let (hash, range) = (key_of_type(KeyType::Hash), key_of_type(KeyType::Range));
        if hash.len() != 1 || range.len() > 1 {
            return Err(Fault::validation("a key schema needs one HASH key and at most one RANGE key"));
        }
        let mut types = vec![];
        for k in hash.iter().chain(range.iter()) {
            let definition = input
                .attribute_definitions
                .iter()
                .find(|d| &d.attribute_name == k)
                .ok_or_else(|| Fault::validation(format!("key attribute {} has no attribute definition", k)))?;
            types.push(match definition.attribute_type.as_str() {
                "S" => KeyAttributeType::S,
                "N" => KeyAttributeType::N,
                other => return Err(Fault::validation(format!("unsupported key attribute type {} for {}", other, k))),
            });
        }

        let mut tables = self.tables.lock().unwrap();
        if tables.contains_key(&input.table_name) {
            return Err(Fault {
                code: "ResourceInUseException",
                message: format!("Table already exists: {}", input.table_name),
            });
        }
        let mut schema = TableConfig::new(hash[0].clone()).with_partition_key_type(types[0]);
        if let Some(sk) = range.into_iter().next() {
            schema = schema.with_sort_key(sk).with_sort_key_type(types[1]);
        }
        let description = TableDescription {
            table_name: input.table_name.clone(),
            key_schema: input.key_schema,
            attribute_definitions: input.attribute_definitions,
            table_status: Some("ACTIVE".to_string()),
            item_count: Some(0),
            creation_date_time: Some(chrono::Utc::now().timestamp() as f64),
        };
        tables.insert(
            input.table_name,
            Table {
                schema,
                description: description.clone(),
                items: BTreeMap::new(),
            },
        );
        Ok(TableDescriptionOutput {
            table_description: Some(description),
        })
    }

    fn delete_table(&self, input: TableNameInput) -> OpResult<TableDescriptionOutput> {
        let t = self
            .tables
            .lock()
            .unwrap()
            .remove(&input.table_name)
            .ok_or_else(|| Fault::not_found(&input.table_name))?;
        let mut description = t.description;
        description.table_status = Some("DELETING".to_string());
        Ok(TableDescriptionOutput {
            table_description: Some(description),
        })
    }

    fn describe_table(&self, input: TableNameInput) -> OpResult<DescribeTableOutput> {
        self.with_table(&input.table_name, |t| {
            let mut description = t.description.clone();
            description.item_count = Some(t.items.len() as u64);
            Ok(DescribeTableOutput { table: Some(description) })
        })
    }

    fn list_tables(&self, input: ListTablesInput) -> OpResult<ListTablesOutput> {
        let mut names: Vec<String> = self.tables.lock().unwrap().keys().cloned().collect();
        names.sort();
        if let Some(start) = &input.exclusive_start_table_name {
            names.retain(|n| n > start);
        }
        let limit = input.limit.map_or(DEFAULT_LIST_LIMIT, |l| l as usize);
        let last_evaluated_table_name = if names.len() > limit {
            names.truncate(limit);
            names.last().cloned()
        } else {
            None
        };
        Ok(ListTablesOutput {
            table_names: names,
            last_evaluated_table_name,
        })
    }
}

/// Returns one page of `items` starting after `start`, filtering after the limit is applied the
/// way DynamoDB does.
fn page(t: &Table, items: Vec<&WireItem>, start: Option<&WireItem>, limit: Option<u32>, filter: Option<&[Condition]>) -> OpResult<PageOutput> {
    if limit == Some(0) {
        return Err(Fault::validation("Limit must be greater than or equal to 1"));
    }
    let skip = match start {
        Some(start) => {
            let start = t.storage_key(start)?;
            let keys: Vec<String> = items.iter().map(|i| t.storage_key(i)).collect::<OpResult<_>>()?;
            match keys.iter().position(|k| *k == start) {
                Some(p) => p + 1,
                None => keys.iter().position(|k| *k > start).unwrap_or(keys.len()),
            }
        }
        None => 0,
    };
    let remaining = &items[skip..];
    let take = limit.map_or(remaining.len(), |l| (l as usize).min(remaining.len()));
    let evaluated = &remaining[..take];
    let last_evaluated_key = if take < remaining.len() {
        evaluated.last().map(|i| t.key_of(i))
    } else {
        None
    };
    let items: Vec<WireItem> = evaluated
        .iter()
        .filter(|i| filter.map_or(true, |f| f.iter().all(|c| c.matches(i))))
        .map(|i| (*i).clone())
        .collect();
    Ok(PageOutput {
        count: items.len() as u64,
        scanned_count: take as u64,
        items,
        last_evaluated_key,
    })
}

fn resolve_name(token: &str, names: &BTreeMap<String, String>) -> OpResult<String> {
    if token.starts_with('#') {
        names
            .get(token)
            .cloned()
            .ok_or_else(|| Fault::validation(format!("An expression attribute name used in the document path is not defined: {}", token)))
    } else {
        Ok(token.to_string())
    }
}

fn resolve_value(token: &str, values: &WireItem) -> OpResult<AttributeValue> {
    values
        .get(token)
        .cloned()
        .ok_or_else(|| Fault::validation(format!("An expression attribute value used in expression is not defined: {}", token)))
}

fn check_condition(expr: Option<&str>, names: Option<&BTreeMap<String, String>>, existing: Option<&WireItem>) -> OpResult<()> {
    let Some(expr) = expr else {
        return Ok(());
    };
    let empty = BTreeMap::new();
    let names = names.unwrap_or(&empty);
    let expr = expr.trim();
    let (must_exist, inner) = if let Some(inner) = expr.strip_prefix("attribute_not_exists(") {
        (false, inner)
    } else if let Some(inner) = expr.strip_prefix("attribute_exists(") {
        (true, inner)
    } else {
        return Err(Fault::validation(format!("unsupported condition expression: {}", expr)));
    };
    let name = resolve_name(inner.trim_end_matches(')').trim(), names)?;
    let exists = existing.map_or(false, |i| i.contains_key(&name));
    if exists == must_exist {
        Ok(())
    } else {
        Err(Fault {
            code: "ConditionalCheckFailedException",
            message: "The conditional request failed".to_string(),
        })
    }
}

fn parse_set(expr: &str, names: &BTreeMap<String, String>, values: &WireItem) -> OpResult<Vec<(String, AttributeValue)>> {
    let expr = expr.trim();
    let body = match expr.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("SET ") => &expr[4..],
        _ => return Err(Fault::validation(format!("only SET update expressions are supported: {}", expr))),
    };
    body.split(',')
        .map(|clause| {
            let (lhs, rhs) = clause
                .split_once('=')
                .ok_or_else(|| Fault::validation(format!("invalid assignment: {}", clause.trim())))?;
            Ok((resolve_name(lhs.trim(), names)?, resolve_value(rhs.trim(), values)?))
        })
        .collect()
}

enum Comparison {
    Eq(AttributeValue),
    Lt(AttributeValue),
    Le(AttributeValue),
    Gt(AttributeValue),
    Ge(AttributeValue),
    Between(AttributeValue, AttributeValue),
    BeginsWith(AttributeValue),
}

struct Condition {
    attribute: String,
    comparison: Comparison,
}

impl Condition {
    fn matches(&self, item: &WireItem) -> bool {
        let Some(v) = item.get(&self.attribute) else {
            return false;
        };
        match &self.comparison {
            Comparison::Eq(target) => v == target,
            Comparison::Lt(target) => compare(v, target) == Some(Ordering::Less),
            Comparison::Le(target) => matches!(compare(v, target), Some(Ordering::Less | Ordering::Equal)),
            Comparison::Gt(target) => compare(v, target) == Some(Ordering::Greater),
            Comparison::Ge(target) => matches!(compare(v, target), Some(Ordering::Greater | Ordering::Equal)),
            Comparison::Between(lo, hi) => {
                matches!(compare(v, lo), Some(Ordering::Greater | Ordering::Equal)) && matches!(compare(v, hi), Some(Ordering::Less | Ordering::Equal))
            }
            Comparison::BeginsWith(prefix) => match (v, prefix) {
                (AttributeValue::S(s), AttributeValue::S(p)) => s.starts_with(p.as_str()),
                _ => false,
            },
        }
    }
}

fn compare(a: &AttributeValue, b: &AttributeValue) -> Option<Ordering> {
    match (a, b) {
        (AttributeValue::S(a), AttributeValue::S(b)) => Some(a.cmp(b)),
        (AttributeValue::N(a), AttributeValue::N(b)) => a.parse::<f64>().ok()?.partial_cmp(&b.parse::<f64>().ok()?),
        _ => None,
    }
}

fn tokenize(expr: &str) -> Vec<String> {
    let mut tokens = vec![];
    let mut current = String::new();
    let mut chars = expr.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '(' | ')' | ',' | '=' => tokens.push(c.to_string()),
            '<' | '>' => {
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(format!("{}=", c));
                } else {
                    tokens.push(c.to_string());
                }
            }
            c => {
                current.push(c);
                if chars.peek().map_or(true, |n| n.is_whitespace() || "(),=<>".contains(*n)) {
                    tokens.push(std::mem::take(&mut current));
                }
            }
        }
    }
    tokens
}

struct Cursor<'a> {
    expr: &'a str,
    tokens: Vec<String>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn is_done(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn next(&mut self) -> OpResult<String> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| Fault::validation(format!("unexpected end of expression: {}", self.expr)))?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, expected: &str) -> OpResult<()> {
        let token = self.next()?;
        if token.eq_ignore_ascii_case(expected) {
            Ok(())
        } else {
            Err(Fault::validation(format!("expected {} but found {} in {}", expected, token, self.expr)))
        }
    }
}

/// Parses conditions of the form `a = :v`, `a < :v` (and `<=`, `>`, `>=`),
/// `a BETWEEN :lo AND :hi` and `begins_with(a, :v)`, joined by `AND`.
fn parse_conditions(expr: &str, names: &BTreeMap<String, String>, values: &WireItem) -> OpResult<Vec<Condition>> {
    let mut cursor = Cursor {
        expr,
        tokens: tokenize(expr),
        pos: 0,
    };
    let mut conditions = vec![];
    loop {
        let first = cursor.next()?;
        let condition = if first.eq_ignore_ascii_case("begins_with") {
            cursor.expect("(")?;
            let attribute = resolve_name(&cursor.next()?, names)?;
            cursor.expect(",")?;
            let prefix = resolve_value(&cursor.next()?, values)?;
            cursor.expect(")")?;
            Condition {
                attribute,
                comparison: Comparison::BeginsWith(prefix),
            }
        } else {
            let attribute = resolve_name(&first, names)?;
            let op = cursor.next()?;
            let comparison = match op.to_ascii_uppercase().as_str() {
                "=" => Comparison::Eq(resolve_value(&cursor.next()?, values)?),
                "<" => Comparison::Lt(resolve_value(&cursor.next()?, values)?),
                "<=" => Comparison::Le(resolve_value(&cursor.next()?, values)?),
                ">" => Comparison::Gt(resolve_value(&cursor.next()?, values)?),
                ">=" => Comparison::Ge(resolve_value(&cursor.next()?, values)?),
                "BETWEEN" => {
                    let lo = resolve_value(&cursor.next()?, values)?;
                    cursor.expect("AND")?;
                    Comparison::Between(lo, resolve_value(&cursor.next()?, values)?)
                }
                other => return Err(Fault::validation(format!("unsupported operator {} in {}", other, expr))),
            };
            Condition { attribute, comparison }
        };
        conditions.push(condition);

        if cursor.is_done() {
            return Ok(conditions);
        }
        cursor.expect("AND")?;
    }
}

#[async_trait]
impl Transport for Backend {
    async fn send(&self, request: WireRequest) -> Result<WireResponse> {
        let result = match (request.header("authorization"), request.operation()) {
            (None, _) => Err(Fault {
                code: "MissingAuthenticationTokenException",
                message: "Request is missing Authentication Token".to_string(),
            }),
            (_, None) => Err(Fault {
                code: "UnknownOperationException",
                message: "missing or malformed X-Amz-Target".to_string(),
            }),
            (Some(_), Some(operation)) => self.handle(operation, &request.body),
        };
        Ok(match result {
            Ok(body) => WireResponse::json(200, &body),
            Err(fault) => WireResponse::json(
                400,
                &json!({
                    "__type": format!("{}#{}", ERROR_NAMESPACE, fault.code),
                    "message": fault.message,
                }),
            ),
        })
    }
}
