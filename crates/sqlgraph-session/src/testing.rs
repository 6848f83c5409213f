//! Fixtures shared by the unit tests: an order aggregate and a recording
//! mock connection that answers SELECTs from canned rows.

use asupersync::CancelKind;
use asupersync::runtime::RuntimeBuilder;
use sqlgraph_core::{
    AnyEntity, ClassMapping, Connection, Cx, Dialect, Error, Executor, ForeignKeyDescriptor,
    MappingRegistry, Outcome, RelationMapping, Row, TransactionOps, Value,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct Order {
    pub id: i64,
    pub customer: String,
    pub payment_kind: Option<String>,
    pub lines: Vec<Line>,
    pub note: Option<Note>,
    pub payment: Option<AnyEntity>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Line {
    pub id: i64,
    pub order_id: i64,
    pub sku: String,
    pub qty: i32,
    pub notes: Vec<Note>,
}

impl Line {
    pub fn new(sku: &str) -> Self {
        Self {
            sku: sku.into(),
            qty: 1,
            ..Self::default()
        }
    }

    pub fn saved(id: i64, order_id: i64, sku: &str) -> Self {
        Self {
            id,
            order_id,
            ..Self::new(sku)
        }
    }
}

/// Notes share one table between orders and lines, told apart by `owner_kind`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Note {
    pub id: i64,
    pub owner_id: i64,
    pub text: String,
}

impl Note {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn saved(id: i64, owner_id: i64, text: &str) -> Self {
        Self {
            id,
            owner_id,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CardPayment {
    pub id: i64,
    pub order_id: i64,
    pub last4: String,
}

/// Carries its order reference out of band: no `order_id` field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CashPayment {
    pub id: i64,
    pub currency: String,
}

pub fn registry() -> MappingRegistry {
    let orders = ClassMapping::builder::<Order>("orders", Order::default)
        .generated_key("id", |o| &o.id, |o| &mut o.id)
        .property("customer", |o| &o.customer, |o| &mut o.customer)
        .property("payment_kind", |o| &o.payment_kind, |o| &mut o.payment_kind)
        .relation(
            RelationMapping::one_to_many::<Order, Line>("lines", |o| &o.lines, |o| &mut o.lines)
                .foreign_key(ForeignKeyDescriptor::new("order_id", "id").property("order_id"))
                .order_by("id"),
        )
        .relation(
            RelationMapping::one_to_one::<Order, Note>("note", |o| &o.note, |o| &mut o.note)
                .foreign_key(ForeignKeyDescriptor::new("owner_id", "id").property("owner_id"))
                .subset("owner_kind", "order"),
        )
        .relation(
            RelationMapping::one_to_one_variant::<Order>(
                "payment",
                |o| &o.payment,
                |o| &mut o.payment,
                "payment_kind",
            )
            .variant::<CardPayment>(
                "card",
                Some(ForeignKeyDescriptor::new("order_id", "id").property("order_id")),
            )
            .variant::<CashPayment>("cash", Some(ForeignKeyDescriptor::new("order_id", "id"))),
        )
        .build()
        .unwrap();

    let lines = ClassMapping::builder::<Line>("lines", Line::default)
        .generated_key("id", |l| &l.id, |l| &mut l.id)
        .property("order_id", |l| &l.order_id, |l| &mut l.order_id)
        .property("sku", |l| &l.sku, |l| &mut l.sku)
        .property("qty", |l| &l.qty, |l| &mut l.qty)
        .relation(
            RelationMapping::one_to_many::<Line, Note>("notes", |l| &l.notes, |l| &mut l.notes)
                .foreign_key(ForeignKeyDescriptor::new("owner_id", "id").property("owner_id"))
                .subset("owner_kind", "line"),
        )
        .build()
        .unwrap();

    let notes = ClassMapping::builder::<Note>("notes", Note::default)
        .generated_key("id", |n| &n.id, |n| &mut n.id)
        .property("owner_id", |n| &n.owner_id, |n| &mut n.owner_id)
        .property("text", |n| &n.text, |n| &mut n.text)
        .build()
        .unwrap();

    let cards = ClassMapping::builder::<CardPayment>("card_payments", CardPayment::default)
        .generated_key("id", |c| &c.id, |c| &mut c.id)
        .property("order_id", |c| &c.order_id, |c| &mut c.order_id)
        .property("last4", |c| &c.last4, |c| &mut c.last4)
        .build()
        .unwrap();

    let cash = ClassMapping::builder::<CashPayment>("cash_payments", CashPayment::default)
        .generated_key("id", |c| &c.id, |c| &mut c.id)
        .property("currency", |c| &c.currency, |c| &mut c.currency)
        .build()
        .unwrap();

    MappingRegistry::builder()
        .register(orders)
        .register(lines)
        .register(notes)
        .register(cards)
        .register(cash)
        .build()
        .unwrap()
}

pub fn row(pairs: &[(&str, Value)]) -> Row {
    Row::new(
        pairs.iter().map(|(c, _)| (*c).to_string()).collect(),
        pairs.iter().map(|(_, v)| v.clone()).collect(),
    )
}

pub fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
    }
}

pub fn block_on<F: Future>(future: F) -> F::Output {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    rt.block_on(future)
}

#[derive(Debug, Default)]
pub struct MockState {
    pub tables: HashMap<String, Vec<Row>>,
    pub queries: Vec<(String, Vec<Value>)>,
    pub executed: Vec<(String, Vec<Value>)>,
    pub next_id: i64,
    /// Statements containing this text fail.
    pub fail_on: Option<String>,
    /// The context is cancelled once a statement containing this text ran.
    pub cancel_on: Option<String>,
    /// Rows reported for UPDATE and DELETE; 1 when unset.
    pub affected: Option<u64>,
    /// Return every canned row of the table, ignoring WHERE.
    pub ignore_filters: bool,
    pub commits: usize,
    pub rollbacks: usize,
}

impl MockState {
    pub fn with_rows(mut self, table: &str, rows: Vec<Row>) -> Self {
        self.tables.entry(table.to_string()).or_default().extend(rows);
        self
    }

    fn fails(&self, sql: &str) -> bool {
        self.fail_on.as_deref().is_some_and(|f| sql.contains(f))
    }

    fn select(&self, sql: &str, params: &[Value]) -> Vec<Row> {
        let table = between(sql, " FROM \"", "\"");
        let rows = self.tables.get(table).cloned().unwrap_or_default();
        if self.ignore_filters {
            return rows;
        }
        let Some(start) = sql.find(" WHERE ") else {
            return rows;
        };
        let clause = &sql[start + " WHERE ".len()..];
        let clause = clause.split(" ORDER BY ").next().unwrap_or(clause);
        let clause = clause.split(" LIMIT ").next().unwrap_or(clause);

        let mut params = params.iter();
        let mut conditions = Vec::new();
        for part in clause.split(" AND ") {
            let part = part.trim_matches(|c| c == '(' || c == ')');
            if part == "1 = 0" {
                return Vec::new();
            }
            let column = between(part, "\"", "\"").to_string();
            let count = part.matches('$').count();
            let wanted: Vec<Value> = params.by_ref().take(count).map(Value::key_form).collect();
            conditions.push((column, wanted));
        }

        rows.into_iter()
            .filter(|row| {
                conditions.iter().all(|(column, wanted)| {
                    row.get_by_name(column)
                        .is_some_and(|v| wanted.contains(&v.key_form()))
                })
            })
            .collect()
    }
}

fn between<'a>(text: &'a str, open: &str, close: &str) -> &'a str {
    let Some(start) = text.find(open) else {
        return "";
    };
    let rest = &text[start + open.len()..];
    rest.find(close).map_or(rest, |end| &rest[..end])
}

fn failure(sql: &str) -> Error {
    Error::Custom(format!("constraint violated by {sql}"))
}

fn run_query(state: &Mutex<MockState>, sql: &str, params: &[Value]) -> Outcome<Vec<Row>, Error> {
    let mut guard = state.lock().expect("lock poisoned");
    guard.queries.push((sql.to_string(), params.to_vec()));
    if guard.fails(sql) {
        return Outcome::Err(failure(sql));
    }
    Outcome::Ok(guard.select(sql, params))
}

fn run_execute(
    cx: &Cx,
    state: &Mutex<MockState>,
    sql: &str,
    params: &[Value],
) -> Outcome<u64, Error> {
    let mut guard = state.lock().expect("lock poisoned");
    guard.executed.push((sql.to_string(), params.to_vec()));
    if guard.fails(sql) {
        return Outcome::Err(failure(sql));
    }
    if guard.cancel_on.as_deref().is_some_and(|c| sql.contains(c)) {
        cx.cancel_with(CancelKind::User, Some("cancelled by test"));
    }
    Outcome::Ok(guard.affected.unwrap_or(1))
}

fn run_insert(
    cx: &Cx,
    state: &Mutex<MockState>,
    sql: &str,
    params: &[Value],
) -> Outcome<i64, Error> {
    match run_execute(cx, state, sql, params) {
        Outcome::Ok(_) => {
            let mut guard = state.lock().expect("lock poisoned");
            guard.next_id += 1;
            Outcome::Ok(100 + guard.next_id)
        }
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockConnection {
    pub state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub fn new(state: MockState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn queries(&self) -> Vec<(String, Vec<Value>)> {
        self.state.lock().expect("lock poisoned").queries.clone()
    }

    pub fn executed(&self) -> Vec<(String, Vec<Value>)> {
        self.state.lock().expect("lock poisoned").executed.clone()
    }
}

#[derive(Debug)]
pub struct MockTransaction {
    state: Arc<Mutex<MockState>>,
}

macro_rules! mock_executor {
    ($ty:ty) => {
        impl Executor for $ty {
            fn dialect(&self) -> Dialect {
                Dialect::Postgres
            }

            fn query(
                &self,
                _cx: &Cx,
                sql: &str,
                params: &[Value],
            ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
                let result = run_query(&self.state, sql, params);
                async move { result }
            }

            fn query_one(
                &self,
                _cx: &Cx,
                sql: &str,
                params: &[Value],
            ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
                let result = run_query(&self.state, sql, params).map(|rows| rows.into_iter().next());
                async move { result }
            }

            fn execute(
                &self,
                cx: &Cx,
                sql: &str,
                params: &[Value],
            ) -> impl Future<Output = Outcome<u64, Error>> + Send {
                let result = run_execute(cx, &self.state, sql, params);
                async move { result }
            }

            fn insert(
                &self,
                cx: &Cx,
                sql: &str,
                params: &[Value],
            ) -> impl Future<Output = Outcome<i64, Error>> + Send {
                let result = run_insert(cx, &self.state, sql, params);
                async move { result }
            }
        }
    };
}

mock_executor!(MockConnection);
mock_executor!(MockTransaction);

impl Connection for MockConnection {
    type Tx<'conn>
        = MockTransaction
    where
        Self: 'conn;

    fn begin(&self, _cx: &Cx) -> impl Future<Output = Outcome<Self::Tx<'_>, Error>> + Send {
        let tx = MockTransaction {
            state: Arc::clone(&self.state),
        };
        async move { Outcome::Ok(tx) }
    }

    fn close(self, _cx: &Cx) -> impl Future<Output = sqlgraph_core::Result<()>> + Send {
        async { Ok(()) }
    }
}

impl TransactionOps for MockTransaction {
    fn savepoint(&self, _cx: &Cx, _name: &str) -> impl Future<Output = Outcome<(), Error>> + Send {
        async { Outcome::Ok(()) }
    }

    fn commit(self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.state.lock().expect("lock poisoned").commits += 1;
        async { Outcome::Ok(()) }
    }

    fn rollback(self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.state.lock().expect("lock poisoned").rollbacks += 1;
        async { Outcome::Ok(()) }
    }
}
