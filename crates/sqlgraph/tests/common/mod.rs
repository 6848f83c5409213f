//! Shared fixtures for the integration tests: a blog-post aggregate and a
//! recording connection that answers SELECTs from canned rows.

#![allow(dead_code)]

use asupersync::runtime::RuntimeBuilder;
use sqlgraph::{
    AnyEntity, ClassMapping, Connection, Cx, Dialect, Error, Executor, ForeignKeyDescriptor,
    MappingRegistry, Outcome, RelationMapping, Row, TransactionOps, Value,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub kind: Option<String>,
    pub comments: Vec<Comment>,
    pub summary: Option<Summary>,
    pub tags: Vec<Tag>,
    pub attachment: Option<AnyEntity>,
}

impl Post {
    pub fn saved(id: i64, title: &str) -> Self {
        Self {
            id,
            title: title.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub body: String,
    pub reactions: Vec<Reaction>,
    pub tags: Vec<Tag>,
}

impl Comment {
    pub fn new(body: &str) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn saved(id: i64, post_id: i64, body: &str) -> Self {
        Self {
            id,
            post_id,
            ..Self::new(body)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reaction {
    pub id: i64,
    pub comment_id: i64,
    pub emoji: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub id: i64,
    pub post_id: i64,
    pub text: String,
}

/// Tags for posts and comments share a table, split by `owner_kind`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tag {
    pub id: i64,
    pub owner_id: i64,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Image {
    pub id: i64,
    pub post_id: i64,
    pub url: String,
}

/// Has no field for its `post_id` column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Link {
    pub id: i64,
    pub href: String,
}

fn comment_mapping(with_children: bool) -> ClassMapping {
    let mut builder = ClassMapping::builder::<Comment>("comments", Comment::default)
        .generated_key("id", |c| &c.id, |c| &mut c.id)
        .property("post_id", |c| &c.post_id, |c| &mut c.post_id)
        .property("body", |c| &c.body, |c| &mut c.body);
    if with_children {
        builder = builder
            .relation(
                RelationMapping::one_to_many::<Comment, Reaction>(
                    "reactions",
                    |c| &c.reactions,
                    |c| &mut c.reactions,
                )
                .foreign_key(ForeignKeyDescriptor::new("comment_id", "id").property("comment_id"))
                .order_by("id"),
            )
            .relation(
                RelationMapping::one_to_many::<Comment, Tag>("tags", |c| &c.tags, |c| &mut c.tags)
                    .foreign_key(ForeignKeyDescriptor::new("owner_id", "id").property("owner_id"))
                    .subset("owner_kind", "comment")
                    .order_by("id"),
            );
    }
    builder.build().expect("comment mapping")
}

/// The full blog aggregate.
pub fn blog_registry() -> MappingRegistry {
    let posts = ClassMapping::builder::<Post>("posts", Post::default)
        .generated_key("id", |p| &p.id, |p| &mut p.id)
        .property("title", |p| &p.title, |p| &mut p.title)
        .property("kind", |p| &p.kind, |p| &mut p.kind)
        .relation(
            RelationMapping::one_to_many::<Post, Comment>(
                "comments",
                |p| &p.comments,
                |p| &mut p.comments,
            )
            .foreign_key(ForeignKeyDescriptor::new("post_id", "id").property("post_id"))
            .order_by("id"),
        )
        .relation(
            RelationMapping::one_to_one::<Post, Summary>("summary", |p| &p.summary, |p| {
                &mut p.summary
            })
            .foreign_key(ForeignKeyDescriptor::new("post_id", "id").property("post_id")),
        )
        .relation(
            RelationMapping::one_to_many::<Post, Tag>("tags", |p| &p.tags, |p| &mut p.tags)
                .foreign_key(ForeignKeyDescriptor::new("owner_id", "id").property("owner_id"))
                .subset("owner_kind", "post")
                .order_by("id"),
        )
        .relation(
            RelationMapping::one_to_one_variant::<Post>(
                "attachment",
                |p| &p.attachment,
                |p| &mut p.attachment,
                "kind",
            )
            .variant::<Image>(
                "image",
                Some(ForeignKeyDescriptor::new("post_id", "id").property("post_id")),
            )
            .variant::<Link>("link", Some(ForeignKeyDescriptor::new("post_id", "id"))),
        )
        .build()
        .expect("post mapping");

    let reactions = ClassMapping::builder::<Reaction>("reactions", Reaction::default)
        .generated_key("id", |r| &r.id, |r| &mut r.id)
        .property("comment_id", |r| &r.comment_id, |r| &mut r.comment_id)
        .property("emoji", |r| &r.emoji, |r| &mut r.emoji)
        .build()
        .expect("reaction mapping");
    let summaries = ClassMapping::builder::<Summary>("summaries", Summary::default)
        .generated_key("id", |s| &s.id, |s| &mut s.id)
        .property("post_id", |s| &s.post_id, |s| &mut s.post_id)
        .property("text", |s| &s.text, |s| &mut s.text)
        .build()
        .expect("summary mapping");
    let tags = ClassMapping::builder::<Tag>("tags", Tag::default)
        .generated_key("id", |t| &t.id, |t| &mut t.id)
        .property("owner_id", |t| &t.owner_id, |t| &mut t.owner_id)
        .property("label", |t| &t.label, |t| &mut t.label)
        .build()
        .expect("tag mapping");
    let images = ClassMapping::builder::<Image>("images", Image::default)
        .generated_key("id", |i| &i.id, |i| &mut i.id)
        .property("post_id", |i| &i.post_id, |i| &mut i.post_id)
        .property("url", |i| &i.url, |i| &mut i.url)
        .build()
        .expect("image mapping");
    let links = ClassMapping::builder::<Link>("links", Link::default)
        .generated_key("id", |l| &l.id, |l| &mut l.id)
        .property("href", |l| &l.href, |l| &mut l.href)
        .build()
        .expect("link mapping");

    MappingRegistry::builder()
        .register(posts)
        .register(comment_mapping(true))
        .register(reactions)
        .register(summaries)
        .register(tags)
        .register(images)
        .register(links)
        .build()
        .expect("blog registry")
}

/// Posts and their comments, nothing deeper.
pub fn comments_registry() -> MappingRegistry {
    let posts = ClassMapping::builder::<Post>("posts", Post::default)
        .generated_key("id", |p| &p.id, |p| &mut p.id)
        .property("title", |p| &p.title, |p| &mut p.title)
        .relation(
            RelationMapping::one_to_many::<Post, Comment>(
                "comments",
                |p| &p.comments,
                |p| &mut p.comments,
            )
            .foreign_key(ForeignKeyDescriptor::new("post_id", "id").property("post_id"))
            .order_by("id"),
        )
        .build()
        .expect("post mapping");
    MappingRegistry::builder()
        .register(posts)
        .register(comment_mapping(false))
        .build()
        .expect("comments registry")
}

pub fn row(pairs: &[(&str, Value)]) -> Row {
    Row::new(
        pairs.iter().map(|(c, _)| (*c).to_string()).collect(),
        pairs.iter().map(|(_, v)| v.clone()).collect(),
    )
}

pub fn post_row(id: i64, title: &str, kind: Option<&str>) -> Row {
    row(&[
        ("id", Value::BigInt(id)),
        ("title", Value::Text(title.into())),
        ("kind", kind.map_or(Value::Null, |k| Value::Text(k.into()))),
    ])
}

pub fn comment_row(id: i64, post_id: i64, body: &str) -> Row {
    row(&[
        ("id", Value::BigInt(id)),
        ("post_id", Value::BigInt(post_id)),
        ("body", Value::Text(body.into())),
    ])
}

pub fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        other => panic!("unexpected outcome: {other:?}"),
    }
}

pub fn expect_err<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        other => panic!("expected an error, got {other:?}"),
    }
}

pub fn run<F: Future>(future: F) -> F::Output {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    rt.block_on(future)
}

/// One statement seen by the connection.
#[derive(Debug, Clone)]
pub struct Logged {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Default)]
pub struct Database {
    pub tables: HashMap<String, Vec<Row>>,
    pub selects: Vec<Logged>,
    pub writes: Vec<Logged>,
    pub last_id: i64,
    /// Statements containing this text fail.
    pub fail_on: Option<String>,
    /// Answer every SELECT with the whole table, as a broken driver might.
    pub unfiltered: bool,
    pub commits: usize,
    pub rollbacks: usize,
}

impl Database {
    pub fn with_rows(mut self, table: &str, rows: impl IntoIterator<Item = Row>) -> Self {
        self.tables.entry(table.to_string()).or_default().extend(rows);
        self
    }

    pub fn failing_on(mut self, fragment: &str) -> Self {
        self.fail_on = Some(fragment.to_string());
        self
    }

    fn check(&self, sql: &str) -> Result<(), Error> {
        match &self.fail_on {
            Some(fragment) if sql.contains(fragment.as_str()) => {
                Err(Error::Custom(format!("constraint violated by {sql}")))
            }
            _ => Ok(()),
        }
    }

    /// Answers `SELECT ... FROM "t" [WHERE c = $n AND c IN ($n, ...)]`.
    fn select(&self, sql: &str, params: &[Value]) -> Vec<Row> {
        let Some(table) = quoted_after(sql, " FROM ") else {
            return Vec::new();
        };
        let rows = self.tables.get(table).cloned().unwrap_or_default();
        if self.unfiltered {
            return rows;
        }
        let Some((_, clause)) = sql.split_once(" WHERE ") else {
            return rows;
        };
        let clause = clause.split(" ORDER BY ").next().unwrap_or_default();
        let clause = clause.split(" LIMIT ").next().unwrap_or_default();

        let conditions: Vec<(String, Vec<Value>)> = clause
            .split(" AND ")
            .filter_map(|part| {
                let column = quoted_after(part, "")?.to_string();
                let wanted = placeholders(part)
                    .into_iter()
                    .filter_map(|n| params.get(n - 1))
                    .map(Value::key_form)
                    .collect();
                Some((column, wanted))
            })
            .collect();

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

fn quoted_after<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let start = text.find(marker)? + marker.len();
    let rest = &text[start..];
    let open = rest.find('"')? + 1;
    let close = rest[open..].find('"')?;
    Some(&rest[open..open + close])
}

fn placeholders(text: &str) -> Vec<usize> {
    text.split('$')
        .skip(1)
        .filter_map(|s| {
            let digits: String = s.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok()
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct RecordingConnection {
    pub db: Arc<Mutex<Database>>,
}

impl RecordingConnection {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn selects(&self) -> Vec<Logged> {
        self.db.lock().unwrap().selects.clone()
    }

    pub fn writes(&self) -> Vec<Logged> {
        self.db.lock().unwrap().writes.clone()
    }

    pub fn write_sql(&self) -> Vec<String> {
        self.writes().into_iter().map(|w| w.sql).collect()
    }
}

#[derive(Debug)]
pub struct RecordingTransaction {
    db: Arc<Mutex<Database>>,
}

fn do_query(db: &Mutex<Database>, sql: &str, params: &[Value]) -> Outcome<Vec<Row>, Error> {
    let mut db = db.lock().unwrap();
    db.selects.push(Logged {
        sql: sql.to_string(),
        params: params.to_vec(),
    });
    match db.check(sql) {
        Ok(()) => Outcome::Ok(db.select(sql, params)),
        Err(e) => Outcome::Err(e),
    }
}

fn do_write(db: &Mutex<Database>, sql: &str, params: &[Value]) -> Outcome<i64, Error> {
    let mut db = db.lock().unwrap();
    db.writes.push(Logged {
        sql: sql.to_string(),
        params: params.to_vec(),
    });
    if let Err(e) = db.check(sql) {
        return Outcome::Err(e);
    }
    db.last_id += 1;
    Outcome::Ok(1000 + db.last_id)
}

macro_rules! recording_executor {
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
                let result = do_query(&self.db, sql, params);
                async move { result }
            }

            fn query_one(
                &self,
                _cx: &Cx,
                sql: &str,
                params: &[Value],
            ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
                let result = do_query(&self.db, sql, params).map(|rows| rows.into_iter().next());
                async move { result }
            }

            fn execute(
                &self,
                _cx: &Cx,
                sql: &str,
                params: &[Value],
            ) -> impl Future<Output = Outcome<u64, Error>> + Send {
                let result = do_write(&self.db, sql, params).map(|_| 1);
                async move { result }
            }

            fn insert(
                &self,
                _cx: &Cx,
                sql: &str,
                params: &[Value],
            ) -> impl Future<Output = Outcome<i64, Error>> + Send {
                let result = do_write(&self.db, sql, params);
                async move { result }
            }
        }
    };
}

recording_executor!(RecordingConnection);
recording_executor!(RecordingTransaction);

impl Connection for RecordingConnection {
    type Tx<'conn>
        = RecordingTransaction
    where
        Self: 'conn;

    fn begin(&self, _cx: &Cx) -> impl Future<Output = Outcome<Self::Tx<'_>, Error>> + Send {
        let tx = RecordingTransaction {
            db: Arc::clone(&self.db),
        };
        async move { Outcome::Ok(tx) }
    }

    fn close(self, _cx: &Cx) -> impl Future<Output = sqlgraph::Result<()>> + Send {
        async { Ok(()) }
    }
}

impl TransactionOps for RecordingTransaction {
    fn savepoint(&self, _cx: &Cx, _name: &str) -> impl Future<Output = Outcome<(), Error>> + Send {
        async { Outcome::Ok(()) }
    }

    fn commit(self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.db.lock().unwrap().commits += 1;
        async { Outcome::Ok(()) }
    }

    fn rollback(self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.db.lock().unwrap().rollbacks += 1;
        async { Outcome::Ok(()) }
    }
}
