//! SQL Server session over `tiberius`.

use async_trait::async_trait;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

use crate::config::TargetConfig;
use crate::core::traits::Connection;
use crate::core::value::{Row, SqlValue};
use crate::dialect::DbType;
use crate::error::{MigrateError, Result};

/// One TDS connection. Statements after a commit run inside a fresh
/// `BEGIN TRANSACTION`.
pub struct MssqlConnection {
    client: Client<Compat<TcpStream>>,
    in_transaction: bool,
}

impl MssqlConnection {
    fn build_config(config: &TargetConfig) -> Config {
        let mut tds = Config::new();
        tds.host(&config.host);
        tds.port(config.port_or_default());
        tds.database(&config.database);
        tds.authentication(AuthMethod::sql_server(&config.user, &config.password));

        if !config.encrypt || config.ssl_mode.eq_ignore_ascii_case("disable") {
            warn!("SQL Server encryption is disabled. Credentials will be transmitted in plaintext.");
            tds.encryption(EncryptionLevel::NotSupported);
        } else {
            if config.trust_server_cert {
                tds.trust_cert();
            }
            tds.encryption(EncryptionLevel::Required);
        }
        tds
    }

    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let tds = Self::build_config(config);
        let context = format!(
            "connecting to SQL Server {}:{}/{}",
            config.host,
            config.port_or_default(),
            config.database
        );

        let tcp = TcpStream::connect(tds.get_addr())
            .await
            .map_err(|e| MigrateError::connection(e.to_string(), &context))?;
        tcp.set_nodelay(true).ok();

        let mut client = Client::connect(tds, tcp.compat_write())
            .await
            .map_err(|e| MigrateError::connection(e.to_string(), &context))?;

        // Generated statements quote identifiers with double quotes.
        client.execute("SET QUOTED_IDENTIFIER ON", &[]).await?;
        client.simple_query("SELECT 1").await?.into_row().await?;
        info!(
            "Connected to SQL Server: {}:{}/{}",
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
            self.client.execute("BEGIN TRANSACTION", &[]).await?;
            self.in_transaction = true;
        }
        Ok(())
    }
}

fn convert_cell(data: ColumnData<'static>) -> SqlValue {
    let value = match data {
        ColumnData::Bit(v) => v.map(SqlValue::Bool),
        ColumnData::U8(v) => v.map(|n| SqlValue::I64(n.into())),
        ColumnData::I16(v) => v.map(|n| SqlValue::I64(n.into())),
        ColumnData::I32(v) => v.map(|n| SqlValue::I64(n.into())),
        ColumnData::I64(v) => v.map(SqlValue::I64),
        ColumnData::F32(v) => v.map(|n| SqlValue::F64(n.into())),
        ColumnData::F64(v) => v.map(SqlValue::F64),
        ColumnData::String(v) => v.map(|s| SqlValue::Text(s.into_owned())),
        ColumnData::Binary(v) => v.map(|b| SqlValue::Bytes(b.into_owned())),
        ColumnData::Numeric(v) => v.map(|n| SqlValue::Text(n.to_string())),
        ColumnData::Guid(v) => v.map(|g| SqlValue::Text(g.to_string())),
        other => Some(SqlValue::Text(format!("{:?}", other))),
    };
    value.unwrap_or(SqlValue::Null)
}

fn to_sql(value: &SqlValue) -> Box<dyn ToSql> {
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
impl Connection for MssqlConnection {
    fn db_type(&self) -> DbType {
        DbType::Mssql
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        debug!("{}", sql);
        self.begin_if_needed().await?;
        let result = self.client.execute(sql, &[]).await?;
        Ok(result.rows_affected().iter().sum())
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        debug!("{}", sql);
        let boxed: Vec<Box<dyn ToSql>> = params.iter().map(to_sql).collect();
        let refs: Vec<&dyn ToSql> = boxed.iter().map(|b| b.as_ref()).collect();
        let stream = self.client.query(sql, &refs).await?;
        let rows = stream.into_first_result().await?;
        Ok(rows
            .into_iter()
            .map(|row| Row::new(row.into_iter().map(convert_cell).collect()))
            .collect())
    }

    async fn commit(&mut self) -> Result<()> {
        if self.in_transaction {
            self.client.execute("COMMIT TRANSACTION", &[]).await?;
            self.in_transaction = false;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.in_transaction {
            // A failed batch may already have aborted the transaction.
            self.client
                .execute("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION", &[])
                .await?;
            self.in_transaction = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    #[test]
    fn test_convert_cell() {
        assert_eq!(convert_cell(ColumnData::I32(Some(7))), SqlValue::I64(7));
        assert_eq!(convert_cell(ColumnData::Bit(Some(true))), SqlValue::Bool(true));
        assert_eq!(
            convert_cell(ColumnData::String(Some(Cow::Borrowed("pk_orders")))),
            SqlValue::Text("pk_orders".into())
        );
        assert_eq!(convert_cell(ColumnData::I64(None)), SqlValue::Null);
    }

    #[test]
    fn test_build_config_default_port() {
        let mut target = TargetConfig {
            r#type: "mssql".into(),
            host: "db.local".into(),
            port: None,
            database: "app".into(),
            user: "sa".into(),
            password: "secret".into(),
            ssl_mode: "disable".into(),
            trust_server_cert: false,
            encrypt: false,
            connection_string: None,
            path: None,
        };
        assert_eq!(MssqlConnection::build_config(&target).get_addr(), "db.local:1433");
        target.port = Some(14330);
        assert_eq!(MssqlConnection::build_config(&target).get_addr(), "db.local:14330");
    }
}
