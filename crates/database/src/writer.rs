//! The single-writer message processor.
//!
//! Every mutating statement is funnelled through one background task that
//! owns the sole writing connection, so cross-record ordering at the
//! database always matches submission order. The queue is bounded;
//! producers block when it fills, which is the ingester's only
//! backpressure mechanism against the broker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sqlx::{Connection, PgConnection};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use model::reference::ReferenceSnapshot;

use crate::error::DatabaseError;
use crate::store::meta;
use crate::value::SqlValue;

/// Submissions beyond this block the producer until the writer catches up.
pub const QUEUE_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: &'static str,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: &'static str, params: Vec<SqlValue>) -> Self {
        Self { sql, params }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchStatement {
    pub sql: &'static str,
    pub rows: Vec<Vec<SqlValue>>,
}

impl BatchStatement {
    pub fn new(sql: &'static str, rows: Vec<Vec<SqlValue>>) -> Self {
        Self { sql, rows }
    }
}

/// One unit of work for the writer. Submission order is execution order.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Begin,
    Commit,
    Execute(Statement),
    ExecuteBatch(BatchStatement),
    /// Reads the associations referencing a rid onto the writer-local
    /// stack, ahead of the location replacement that may cascade-delete
    /// them.
    RetainAssociations { rid: String },
    /// Pops the retained associations and re-inserts those whose call
    /// points exist again.
    InsertRetainedAssociations,
    /// Rebuilds every schedule's origin/destination lists, then replays
    /// association propagation.
    RenewScheduleMeta { refs: Arc<ReferenceSnapshot> },
    /// Propagates endpoints for one confirmed association pair.
    RenewAssociationMeta {
        main_rid: String,
        assoc_rid: String,
    },
}

/// Inserted only when both referenced call points exist; conflicting rows
/// are left untouched.
pub(crate) const INSERT_ASSOCIATION: &str = "\
    INSERT INTO darwin_associations \
        (category, tiploc, main_rid, main_original_wt, assoc_rid, assoc_original_wt) \
    SELECT $1, $2, $3, $4, $5, $6 \
    WHERE EXISTS (SELECT 1 FROM darwin_schedule_locations \
            WHERE tiploc = $2 AND rid = $3 AND original_wt = $4) \
        AND EXISTS (SELECT 1 FROM darwin_schedule_locations \
            WHERE tiploc = $2 AND rid = $5 AND original_wt = $6) \
    ON CONFLICT (tiploc, main_rid, assoc_rid) DO NOTHING;";

const RETAIN_ASSOCIATIONS: &str = "\
    SELECT category, tiploc, main_rid, main_original_wt, assoc_rid, assoc_original_wt \
    FROM darwin_associations WHERE main_rid = $1 OR assoc_rid = $1;";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AssociationRow {
    pub category: String,
    pub tiploc: String,
    pub main_rid: String,
    pub main_original_wt: String,
    pub assoc_rid: String,
    pub assoc_original_wt: String,
}

/// Cloneable producer side of the writer queue.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<WriteOp>,
    depth: Arc<AtomicUsize>,
}

impl WriterHandle {
    /// Enqueues an operation, blocking while the queue is full.
    pub async fn submit(&self, op: WriteOp) -> Result<(), DatabaseError> {
        self.depth.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(op).await.is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(DatabaseError::Closed);
        }
        Ok(())
    }

    /// Operations accepted but not yet executed.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

/// The background writer. Dropping every [`WriterHandle`] and calling
/// [`MessageProcessor::close`] drains the queue before the task exits.
pub struct MessageProcessor {
    handle: WriterHandle,
    worker: JoinHandle<()>,
}

impl MessageProcessor {
    pub async fn connect(database_string: &str) -> Result<Self, DatabaseError> {
        let connection = PgConnection::connect(database_string).await?;
        Ok(Self::spawn(connection))
    }

    pub fn spawn(connection: PgConnection) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let depth = Arc::new(AtomicUsize::new(0));
        let worker = Worker {
            connection,
            rx,
            depth: depth.clone(),
            retained: Vec::new(),
            in_transaction: false,
            aborted: false,
        };
        Self {
            handle: WriterHandle { tx, depth },
            worker: tokio::spawn(worker.run()),
        }
    }

    pub fn handle(&self) -> WriterHandle {
        self.handle.clone()
    }

    pub fn depth(&self) -> usize {
        self.handle.depth()
    }

    /// Drops the producer side and waits for the queue to drain.
    pub async fn close(self) {
        let Self { handle, worker } = self;
        drop(handle);
        if let Err(why) = worker.await {
            log::error!("write processor task failed: {}", why);
        }
    }
}

struct Worker {
    connection: PgConnection,
    rx: mpsc::Receiver<WriteOp>,
    depth: Arc<AtomicUsize>,
    /// LIFO hand-off between RetainAssociations and its re-insert.
    retained: Vec<Vec<AssociationRow>>,
    in_transaction: bool,
    /// A statement failed mid-transaction; remaining operations are
    /// discarded until the next Begin.
    aborted: bool,
}

impl Worker {
    async fn run(mut self) {
        while let Some(op) = self.rx.recv().await {
            if let Err(why) = self.apply(op).await {
                log::error!("database write failed: {}", why);
                if self.in_transaction {
                    if let Err(why) =
                        sqlx::query("ROLLBACK;").execute(&mut self.connection).await
                    {
                        log::error!("rollback failed: {}", why);
                    }
                    self.in_transaction = false;
                    self.aborted = true;
                }
            }
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn apply(&mut self, op: WriteOp) -> Result<(), DatabaseError> {
        if self.aborted && !matches!(op, WriteOp::Begin) {
            return Ok(());
        }
        match op {
            WriteOp::Begin => {
                sqlx::query("BEGIN;").execute(&mut self.connection).await?;
                self.in_transaction = true;
                self.aborted = false;
            }
            WriteOp::Commit => {
                sqlx::query("COMMIT;").execute(&mut self.connection).await?;
                self.in_transaction = false;
            }
            WriteOp::Execute(statement) => {
                let mut query = sqlx::query(statement.sql);
                for param in statement.params {
                    query = param.bind(query);
                }
                query.execute(&mut self.connection).await?;
            }
            WriteOp::ExecuteBatch(batch) => {
                for row in batch.rows {
                    let mut query = sqlx::query(batch.sql);
                    for param in row {
                        query = param.bind(query);
                    }
                    query.execute(&mut self.connection).await?;
                }
            }
            WriteOp::RetainAssociations { rid } => {
                let rows: Vec<AssociationRow> = sqlx::query_as(RETAIN_ASSOCIATIONS)
                    .bind(&rid)
                    .fetch_all(&mut self.connection)
                    .await?;
                self.retained.push(rows);
            }
            WriteOp::InsertRetainedAssociations => {
                let rows = self.retained.pop().unwrap_or_default();
                for row in rows {
                    sqlx::query(INSERT_ASSOCIATION)
                        .bind(&row.category)
                        .bind(&row.tiploc)
                        .bind(&row.main_rid)
                        .bind(&row.main_original_wt)
                        .bind(&row.assoc_rid)
                        .bind(&row.assoc_original_wt)
                        .execute(&mut self.connection)
                        .await?;
                }
            }
            WriteOp::RenewScheduleMeta { refs } => {
                meta::renew_schedule_meta(&mut self.connection, &refs).await?;
            }
            WriteOp::RenewAssociationMeta {
                main_rid,
                assoc_rid,
            } => {
                meta::renew_association_meta(
                    &mut self.connection,
                    Some((main_rid.as_str(), assoc_rid.as_str())),
                )
                .await?;
            }
        }
        Ok(())
    }
}
