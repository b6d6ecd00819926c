//! PostgreSQL session over `tokio-postgres`.

use async_trait::async_trait;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::{debug, info, warn};

use crate::config::TargetConfig;
use crate::core::traits::Connection;
use crate::core::value::{Row, SqlValue};
use crate::dialect::DbType;
use crate::drivers::common::{SslMode, TlsBuilder};
use crate::error::{MigrateError, Result};

/// One client connection; DDL runs inside a transaction opened by the first
/// statement after a commit.
pub struct PostgresConnection {
    client: Client,
    in_transaction: bool,
}

impl PostgresConnection {
    /// Connect using the target's host, credentials and `ssl_mode`.
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&config.host)
            .port(config.port_or_default())
            .dbname(&config.database)
            .user(&config.user)
            .password(&config.password);

        let context = format!(
            "connecting to PostgreSQL {}:{}/{}",
            config.host,
            config.port_or_default(),
            config.database
        );
        let ssl_mode = SslMode::parse(&config.ssl_mode)?;
        let client = match TlsBuilder::new(ssl_mode).connector()? {
            Some(tls) => {
                let (client, connection) = pg_config
                    .connect(tls)
                    .await
                    .map_err(|e| MigrateError::connection(e.to_string(), &context))?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        warn!("PostgreSQL connection closed with error: {}", e);
                    }
                });
                client
            }
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                let (client, connection) = pg_config
                    .connect(NoTls)
                    .await
                    .map_err(|e| MigrateError::connection(e.to_string(), &context))?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        warn!("PostgreSQL connection closed with error: {}", e);
                    }
                });
                client
            }
        };

        client.simple_query("SELECT 1").await?;
        info!(
            "Connected to PostgreSQL: {}:{}/{}",
            config.host,
            config.port_or_default(),
            config.database
        );
        Ok(Self {
            client,
            in_transaction: false,
        })
    }

    async fn begin_if_needed(&mut self) -> Result<()> {
        if !self.in_transaction {
            self.client.batch_execute("BEGIN").await?;
            self.in_transaction = true;
        }
        Ok(())
    }
}

fn convert_row(row: &tokio_postgres::Row) -> Result<Row> {
    let mut values = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(idx)?.map(SqlValue::Bool)
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(idx)?.map(|v| SqlValue::I64(v.into()))
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(idx)?.map(|v| SqlValue::I64(v.into()))
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(idx)?.map(SqlValue::I64)
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(idx)?.map(|v| SqlValue::F64(v.into()))
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(idx)?.map(SqlValue::F64)
        } else if *ty == Type::BYTEA {
            row.try_get::<_, Option<Vec<u8>>>(idx)?.map(SqlValue::Bytes)
        } else {
            row.try_get::<_, Option<String>>(idx)?.map(SqlValue::Text)
        };
        values.push(value.unwrap_or(SqlValue::Null));
    }
    Ok(Row::new(values))
}

fn to_sql(value: &SqlValue) -> Box<dyn ToSql + Sync + Send> {
    match value {
        SqlValue::Null => Box::new(None::<String>),
        SqlValue::Bool(v) => Box::new(*v),
        SqlValue::I64(v) => Box::new(*v),
        SqlValue::F64(v) => Box::new(*v),
        SqlValue::Text(v) => Box::new(v.clone()),
        SqlValue::Bytes(v) => Box::new(v.clone()),
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    fn db_type(&self) -> DbType {
        DbType::Postgres
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        debug!("{}", sql);
        self.begin_if_needed().await?;
        let messages = self.client.simple_query(sql).await?;
        Ok(messages
            .iter()
            .map(|m| match m {
                SimpleQueryMessage::CommandComplete(n) => *n,
                _ => 0,
            })
            .sum())
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        debug!("{}", sql);
        let boxed: Vec<Box<dyn ToSql + Sync + Send>> = params.iter().map(to_sql).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = boxed
            .iter()
            .map(|b| b.as_ref() as &(dyn ToSql + Sync))
            .collect();
        let rows = self.client.query(sql, &refs).await?;
        rows.iter().map(convert_row).collect()
    }

    async fn commit(&mut self) -> Result<()> {
        if self.in_transaction {
            self.client.batch_execute("COMMIT").await?;
            self.in_transaction = false;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.in_transaction {
            self.client.batch_execute("ROLLBACK").await?;
            self.in_transaction = false;
        }
        Ok(())
    }
}
