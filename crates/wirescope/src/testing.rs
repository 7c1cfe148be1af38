//! Scripted in-memory connection used by the unit tests.
//!
//! The server keeps a single integer table. Statements are matched by
//! prefix: `insert` stores every bound parameter, `select` returns the
//! visible rows, `count` returns the row count, `null` returns one NULL,
//! `text` returns one text value, `pairs` returns two-column rows, `empty`
//! returns no rows, `fail` raises a driver error and `sleep` stalls for an
//! hour before succeeding. Batches are separated by `;`.
//!
//! [`Capture`] records the lifecycle log events of one component.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::arithmetic_side_effects,
    clippy::missing_const_for_fn
)]

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt as _;
use futures::stream::{self, BoxStream};
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt as _};

use crate::command::Command;
use crate::driver::{Connection, Fetched, IsolationLevel};
use crate::error::DriverError;
use crate::row::Row;
use crate::value::Value;

/// Collaborator-side resource counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Counters {
    pub created: usize,
    pub released: usize,
    pub opens: usize,
    pub closes: usize,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

impl Counters {
    pub fn live_handles(&self) -> usize {
        self.created - self.released
    }
}

#[derive(Debug, Default)]
struct ServerState {
    rows: Vec<i64>,
    counters: Counters,
    refuse_connections: bool,
    failing_commits: usize,
    failing_rollbacks: usize,
    uncooperative: bool,
    last_isolation: Option<IsolationLevel>,
}

/// Shared state standing in for the database server.
#[derive(Debug, Default, Clone)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory closure producing connections to this server.
    pub fn factory(&self) -> impl Fn() -> FakeConnection + Send + Sync + 'static {
        let server = self.clone();
        move || server.connect()
    }

    pub fn connect(&self) -> FakeConnection {
        self.state.lock().unwrap().counters.created += 1;
        FakeConnection {
            server: self.clone(),
            open: false,
            pending: None,
        }
    }

    pub fn counters(&self) -> Counters {
        self.state.lock().unwrap().counters.clone()
    }

    pub fn rows(&self) -> Vec<i64> {
        self.state.lock().unwrap().rows.clone()
    }

    pub fn refuse_connections(&self) {
        self.state.lock().unwrap().refuse_connections = true;
    }

    pub fn fail_next_commits(&self, count: usize) {
        self.state.lock().unwrap().failing_commits = count;
    }

    pub fn fail_next_rollbacks(&self, count: usize) {
        self.state.lock().unwrap().failing_rollbacks = count;
    }

    /// Make connections report that dropping an in-flight statement does
    /// not abort it, like a driver without cooperative cancellation.
    pub fn without_cooperative_cancellation(&self) {
        self.state.lock().unwrap().uncooperative = true;
    }

    pub fn last_isolation(&self) -> Option<IsolationLevel> {
        self.state.lock().unwrap().last_isolation
    }
}

/// One handle onto the [`FakeServer`].
#[derive(Debug)]
pub struct FakeConnection {
    server: FakeServer,
    open: bool,
    pending: Option<Vec<i64>>,
}

enum Reply {
    Rows(Vec<Row>),
    Affected(u64),
}

fn single_column(name: &str, values: impl IntoIterator<Item = Value>) -> Vec<Row> {
    let columns: Arc<[String]> = vec![name.to_owned()].into();
    values
        .into_iter()
        .map(|value| Row::new(Arc::clone(&columns), vec![value]))
        .collect()
}

impl FakeConnection {
    fn ensure_open(&self) -> Result<(), DriverError> {
        if self.open {
            Ok(())
        } else {
            Err("connection is not open".into())
        }
    }

    fn visible(&self) -> Vec<i64> {
        let mut rows = self.server.rows();
        if let Some(pending) = &self.pending {
            rows.extend(pending);
        }
        rows
    }

    fn run(&mut self, statement: &str, params: &[Value]) -> Result<Reply, DriverError> {
        self.ensure_open()?;
        let statement = statement.trim().to_ascii_lowercase();
        if statement.starts_with("insert") {
            let values = params
                .iter()
                .map(|value| match value {
                    Value::Int(v) => Ok(*v),
                    other => Err(format!("cannot insert {}", other.kind())),
                })
                .collect::<Result<Vec<_>, _>>()?;
            let affected = values.len() as u64;
            match &mut self.pending {
                Some(pending) => pending.extend(values),
                None => self.server.state.lock().unwrap().rows.extend(values),
            }
            Ok(Reply::Affected(affected))
        } else if statement.starts_with("select") {
            Ok(Reply::Rows(single_column(
                "value",
                self.visible().into_iter().map(Value::Int),
            )))
        } else if statement.starts_with("count") {
            let count = i64::try_from(self.visible().len()).unwrap();
            Ok(Reply::Rows(single_column("count", [Value::Int(count)])))
        } else if statement.starts_with("null") {
            Ok(Reply::Rows(single_column("value", [Value::Null])))
        } else if statement.starts_with("text") {
            Ok(Reply::Rows(single_column("value", [Value::Text("abc".to_owned())])))
        } else if statement.starts_with("pairs") {
            let columns: Arc<[String]> = vec!["id".to_owned(), "name".to_owned()].into();
            Ok(Reply::Rows(
                self.visible()
                    .into_iter()
                    .map(|v| {
                        Row::new(
                            Arc::clone(&columns),
                            vec![Value::Int(v), Value::Text(format!("row {v}"))],
                        )
                    })
                    .collect(),
            ))
        } else if statement.starts_with("empty") {
            Ok(Reply::Rows(Vec::new()))
        } else if statement.starts_with("sleep") {
            Ok(Reply::Affected(0))
        } else if statement.starts_with("fail") {
            Err("syntax error at or near \"fail\"".into())
        } else {
            Err(format!("unknown statement: {statement}").into())
        }
    }
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        self.server.state.lock().unwrap().counters.released += 1;
    }
}

impl Connection for FakeConnection {
    fn supports_cancellation(&self) -> bool {
        !self.server.state.lock().unwrap().uncooperative
    }

    async fn open(&mut self) -> Result<(), DriverError> {
        let mut state = self.server.state.lock().unwrap();
        if state.refuse_connections {
            return Err("connection refused".into());
        }
        state.counters.opens += 1;
        drop(state);
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        if self.open {
            self.open = false;
            self.pending = None;
            self.server.state.lock().unwrap().counters.closes += 1;
        }
        Ok(())
    }

    async fn execute(&mut self, command: Command<'_>) -> Result<u64, DriverError> {
        if command.sql().trim().starts_with("sleep") {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        let mut total = 0;
        for statement in command.sql().split(';') {
            if let Reply::Affected(count) = self.run(statement, command.params())? {
                total += count;
            }
        }
        Ok(total)
    }

    fn fetch<'c>(&'c mut self, command: Command<'c>) -> BoxStream<'c, Result<Row, DriverError>> {
        match self.run(command.sql(), command.params()) {
            Ok(Reply::Rows(rows)) => stream::iter(rows.into_iter().map(Ok)).boxed(),
            Ok(Reply::Affected(_)) => stream::empty().boxed(),
            Err(error) => stream::once(async move { Err(error) }).boxed(),
        }
    }

    fn fetch_multiple<'c>(
        &'c mut self,
        command: Command<'c>,
    ) -> BoxStream<'c, Result<Fetched, DriverError>> {
        let mut items = Vec::new();
        for statement in command.sql().split(';').filter(|s| !s.trim().is_empty()) {
            match self.run(statement, command.params()) {
                Ok(Reply::Rows(rows)) => {
                    items.extend(rows.into_iter().map(|row| Ok(Fetched::Row(row))));
                    items.push(Ok(Fetched::Done { rows_affected: 0 }));
                }
                Ok(Reply::Affected(rows_affected)) => {
                    items.push(Ok(Fetched::Done { rows_affected }));
                }
                Err(error) => {
                    items.push(Err(error));
                    break;
                }
            }
        }
        stream::iter(items).boxed()
    }

    async fn begin(&mut self, isolation: Option<IsolationLevel>) -> Result<(), DriverError> {
        self.ensure_open()?;
        if self.pending.is_some() {
            return Err("there is already a transaction in progress".into());
        }
        let mut state = self.server.state.lock().unwrap();
        state.counters.begins += 1;
        state.last_isolation = isolation;
        drop(state);
        self.pending = Some(Vec::new());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.ensure_open()?;
        let mut state = self.server.state.lock().unwrap();
        if state.failing_commits > 0 {
            state.failing_commits -= 1;
            return Err("could not serialize access".into());
        }
        let pending = self.pending.take().ok_or("no transaction in progress")?;
        state.rows.extend(pending);
        state.counters.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.ensure_open()?;
        {
            let mut state = self.server.state.lock().unwrap();
            if state.failing_rollbacks > 0 {
                state.failing_rollbacks -= 1;
                return Err("connection reset".into());
            }
        }
        self.pending.take().ok_or("no transaction in progress")?;
        self.server.state.lock().unwrap().counters.rollbacks += 1;
        Ok(())
    }
}

/// Records `(level, message)` for every event emitted by one component.
#[derive(Clone)]
pub struct Capture {
    component: &'static str,
    events: Arc<Mutex<Vec<(Level, String)>>>,
}

#[derive(Default)]
struct EventFields {
    component: String,
    message: String,
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "component" {
            value.clone_into(&mut self.component);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for Capture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = EventFields::default();
        event.record(&mut fields);
        if fields.component == self.component {
            self.events
                .lock()
                .unwrap()
                .push((*event.metadata().level(), fields.message));
        }
    }
}

impl Capture {
    /// Install a capture for `component` as the thread's default subscriber.
    ///
    /// Events are recorded until the returned guard is dropped.
    pub fn install(component: &'static str) -> (Self, DefaultGuard) {
        let capture = Self {
            component,
            events: Arc::default(),
        };
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    pub fn events(&self) -> Vec<(Level, String)> {
        self.events.lock().unwrap().clone()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}
