//! SQL execution seam.
//!
//! The orchestrator only sees [`SqlExecutor`] and [`SqlSession`]. The SQL
//! Server implementation hands each request one pooled connection; statements
//! run inside a transaction that is rolled back before the connection goes
//! back to the pool.

use crate::error::{Result, SqlRagError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tiberius::{Client, ColumnData, Config, FromSql};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

/// One result row, column name → JSON value.
pub type Row = Map<String, Value>;

#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Exclusive session for one request.
    async fn session(&self) -> Result<Box<dyn SqlSession>>;
}

#[async_trait]
pub trait SqlSession: Send {
    async fn execute(&mut self, sql: &str) -> Result<Vec<Row>>;

    /// Discards whatever the failed statement left behind so the session can
    /// be used for the next one.
    async fn rollback(&mut self) -> Result<()>;
}

const MAX_CONNECTIONS: usize = 10;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
const BEGIN: &str = "BEGIN TRANSACTION";
const ROLLBACK: &str = "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION";

type Connection = Client<Compat<TcpStream>>;

/// Accepts ADO.NET (`server=tcp:host,1433;user=...`) and JDBC
/// (`jdbc:sqlserver://host:1433;...`) connection strings.
pub fn parse_connection_string(connection_string: &str) -> Result<Config> {
    let trimmed = connection_string.trim();
    let config = if trimmed.starts_with("jdbc:") {
        Config::from_jdbc_string(trimmed)?
    } else {
        Config::from_ado_string(trimmed)?
    };
    Ok(config)
}

async fn open_connection(config: &Config) -> Result<Connection> {
    let tcp = TcpStream::connect(config.get_addr()).await?;
    tcp.set_nodelay(true)?;
    Ok(Client::connect(config.clone(), tcp.compat_write()).await?)
}

async fn run(client: &mut Connection, sql: &str) -> Result<()> {
    client.simple_query(sql).await?.into_results().await?;
    Ok(())
}

pub struct MssqlExecutor {
    config: Config,
    idle: Arc<Mutex<Vec<Connection>>>,
    permits: Arc<Semaphore>,
}

impl MssqlExecutor {
    /// Opens the first connection and checks it with `SELECT 1`.
    pub async fn connect(connection_string: &str) -> Result<Self> {
        let config = parse_connection_string(connection_string)?;
        let mut client = open_connection(&config).await?;
        run(&mut client, "SELECT 1").await?;
        info!("SQL Server connection ready");

        Ok(Self {
            config,
            idle: Arc::new(Mutex::new(vec![client])),
            permits: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        })
    }

    async fn checkout(&self) -> Result<Connection> {
        if let Some(client) = self.idle.lock().await.pop() {
            return Ok(client);
        }
        debug!("Opening new SQL Server connection");
        open_connection(&self.config).await
    }
}

#[async_trait]
impl SqlExecutor for MssqlExecutor {
    async fn session(&self) -> Result<Box<dyn SqlSession>> {
        let permit = tokio::time::timeout(ACQUIRE_TIMEOUT, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| {
                SqlRagError::Execution("Timed out waiting for a database connection".to_string())
            })?
            .map_err(|e| SqlRagError::Execution(e.to_string()))?;
        let client = self.checkout().await?;

        Ok(Box::new(MssqlSession {
            client: Some(client),
            in_transaction: false,
            idle: self.idle.clone(),
            permit: Some(permit),
        }))
    }
}

struct MssqlSession {
    client: Option<Connection>,
    in_transaction: bool,
    idle: Arc<Mutex<Vec<Connection>>>,
    permit: Option<OwnedSemaphorePermit>,
}

#[async_trait]
impl SqlSession for MssqlSession {
    async fn execute(&mut self, sql: &str) -> Result<Vec<Row>> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| SqlRagError::Execution("Session connection is closed".to_string()))?;
        if !self.in_transaction {
            run(client, BEGIN).await?;
            self.in_transaction = true;
        }

        let rows = client
            .simple_query(sql)
            .await
            .map_err(|e| SqlRagError::Execution(e.to_string()))?
            .into_first_result()
            .await
            .map_err(|e| SqlRagError::Execution(e.to_string()))?;
        debug!(rows = rows.len(), "Statement executed");
        Ok(rows.into_iter().map(row_to_json).collect())
    }

    async fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        let Some(client) = self.client.as_mut() else {
            return Ok(());
        };
        let result = run(client, ROLLBACK).await;
        if result.is_err() {
            // Connection state is unknown; it is not reused.
            self.client = None;
        }
        result
    }
}

impl Drop for MssqlSession {
    fn drop(&mut self) {
        let Some(mut client) = self.client.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let idle = self.idle.clone();
        let permit = self.permit.take();
        let in_transaction = self.in_transaction;

        handle.spawn(async move {
            let _permit = permit;
            if in_transaction {
                if let Err(e) = run(&mut client, ROLLBACK).await {
                    warn!(error = %e, "Rollback on release failed, closing connection");
                    return;
                }
            }
            idle.lock().await.push(client);
        });
    }
}

fn row_to_json(row: tiberius::Row) -> Row {
    let names: Vec<String> = row
        .columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect();
    names
        .into_iter()
        .zip(row)
        .map(|(name, data)| (name, column_to_json(&data)))
        .collect()
}

fn column_to_json(data: &ColumnData<'static>) -> Value {
    let value = match data {
        ColumnData::U8(v) => v.map(Value::from),
        ColumnData::I16(v) => v.map(Value::from),
        ColumnData::I32(v) => v.map(Value::from),
        ColumnData::I64(v) => v.map(Value::from),
        ColumnData::F32(v) => v.map(Value::from),
        ColumnData::F64(v) => v.map(Value::from),
        ColumnData::Bit(v) => v.map(Value::from),
        ColumnData::String(v) => v.as_ref().map(|s| Value::from(s.as_ref())),
        ColumnData::Guid(v) => v.map(|g| Value::from(g.to_string())),
        ColumnData::Numeric(v) => v
            .as_ref()
            .and_then(|n| n.to_string().parse::<f64>().ok())
            .map(Value::from),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            decode::<chrono::NaiveDateTime>(data).map(|v| Value::from(v.to_string()))
        }
        ColumnData::Date(_) => decode::<chrono::NaiveDate>(data).map(|v| Value::from(v.to_string())),
        ColumnData::Time(_) => decode::<chrono::NaiveTime>(data).map(|v| Value::from(v.to_string())),
        ColumnData::DateTimeOffset(_) => decode::<chrono::DateTime<chrono::Utc>>(data)
            .map(|v| Value::from(v.to_rfc3339())),
        other => {
            debug!(column = ?other, "Unsupported column type, returning null");
            None
        }
    };
    value.unwrap_or(Value::Null)
}

fn decode<'a, T: FromSql<'a>>(data: &'a ColumnData<'static>) -> Option<T> {
    T::from_sql(data).ok().flatten()
}
