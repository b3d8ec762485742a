//! Direct ODBC access to the host through the IBM i Access driver.
//!
//! odbc-api is blocking, so every call runs on the blocking pool. One
//! connection backs a session; calls on it are serialized by a mutex.

use std::sync::{Arc, Mutex, OnceLock};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ilib_core::{
    credentials::CredentialsRecord,
    remote::{
        object_name, MessageOutcome, RemoteConnector, RemoteHost, SaveFileOutcome,
        SaveFileRequest,
    },
};
use odbc_api::{
    Connection, ConnectionOptions, Cursor, Environment, IntoParameter, ResultSetMetadata,
};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::{
    archive,
    statements::{self, SaveFilePlan},
};

/// Process-wide ODBC environment; connections borrow it for `'static`.
fn environment() -> Result<&'static Environment> {
    static ENV: OnceLock<Environment> = OnceLock::new();
    if let Some(env) = ENV.get() {
        return Ok(env);
    }
    let env = Environment::new().context("allocating ODBC environment")?;
    // A concurrent first caller may have won; its environment is kept.
    let _ = ENV.set(env);
    ENV.get().ok_or_else(|| anyhow!("ODBC environment unavailable"))
}

#[derive(Debug, Default, Clone)]
pub struct OdbcConnector;

impl OdbcConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RemoteConnector for OdbcConnector {
    fn name(&self) -> &'static str {
        "odbc"
    }

    #[instrument(skip_all, fields(host = %credentials.host))]
    async fn connect(&self, credentials: &CredentialsRecord) -> Result<Arc<dyn RemoteHost>> {
        let connection_string = statements::connection_string(credentials);
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection<'static>> {
            environment()?
                .connect_with_connection_string(&connection_string, ConnectionOptions::default())
                .context("ODBC connection failed")
        })
        .await??;
        debug!("ODBC connection established");
        Ok(Arc::new(OdbcHost {
            conn: Arc::new(Mutex::new(conn)),
        }))
    }
}

/// Open ODBC session against one host.
pub struct OdbcHost {
    conn: Arc<Mutex<Connection<'static>>>,
}

impl OdbcHost {
    async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection<'static>) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| anyhow!("ODBC connection lock poisoned: {e}"))?;
            f(&conn)
        })
        .await?
    }

    async fn query(&self, sql: &'static str, param: Option<String>) -> Result<Vec<Value>> {
        self.with_connection(move |conn| query_rows(conn, sql, param.as_deref()))
            .await
    }
}

#[async_trait]
impl RemoteHost for OdbcHost {
    #[instrument(skip_all)]
    async fn list_libraries(&self) -> Result<Vec<Value>> {
        self.query(statements::LIST_LIBRARIES, None).await
    }

    #[instrument(skip_all)]
    async fn list_users(&self) -> Result<Vec<Value>> {
        self.query(statements::LIST_USERS, None).await
    }

    #[instrument(skip_all, fields(library = %name))]
    async fn library_info(&self, name: &str) -> Result<Option<Value>> {
        let name = object_name(name)?;
        let rows = self.query(statements::LIBRARY_INFO, Some(name)).await?;
        Ok(rows.into_iter().next())
    }

    #[instrument(skip_all, fields(user = %name))]
    async fn user_info(&self, name: &str) -> Result<Option<Value>> {
        let name = object_name(name)?;
        let rows = self.query(statements::USER_INFO, Some(name)).await?;
        Ok(rows.into_iter().next())
    }

    #[instrument(skip_all, fields(library = %request.library))]
    async fn create_save_file(&self, request: &SaveFileRequest) -> Result<SaveFileOutcome> {
        let plan = SaveFilePlan::new(request)?;
        let path = request.download_dir.join(format!("{}.savf", plan.save_file));

        let data = self
            .with_connection(move |conn| {
                let result = export(conn, &plan);
                for command in &plan.cleanup {
                    if let Err(err) = run_command(conn, command) {
                        warn!(command = %command, error = %err, "cleanup on host failed");
                    }
                }
                result
            })
            .await?;

        let bytes = archive::store(path.clone(), data).await?;
        Ok(SaveFileOutcome { path, bytes })
    }

    #[instrument(skip_all, fields(user = %username))]
    async fn send_message(&self, username: &str, text: &str) -> Result<MessageOutcome> {
        let command = statements::send_message(username, text)?;
        self.with_connection(move |conn| {
            Ok(match run_command(conn, &command) {
                Ok(()) => MessageOutcome::Delivered,
                Err(err) => MessageOutcome::Rejected(err.to_string()),
            })
        })
        .await
    }
}

fn export(conn: &Connection<'_>, plan: &SaveFilePlan) -> Result<Vec<u8>> {
    for command in plan.steps() {
        run_command(conn, command)?;
    }
    read_binary(conn, &plan.stream_file)
}

fn run_command(conn: &Connection<'_>, command: &str) -> Result<()> {
    debug!(command, "running CL command");
    let mut prepared = conn.prepare(statements::RUN_COMMAND)?;
    prepared
        .execute(&command.into_parameter())
        .with_context(|| format!("host command failed: {command}"))?;
    Ok(())
}

/// Every row as a JSON object keyed by column name; values arrive as text.
fn query_rows(conn: &Connection<'_>, sql: &str, param: Option<&str>) -> Result<Vec<Value>> {
    let mut prepared = conn.prepare(sql)?;
    let cursor = match param {
        Some(param) => prepared.execute(&param.into_parameter())?,
        None => prepared.execute(())?,
    };
    let Some(mut cursor) = cursor else {
        return Ok(Vec::new());
    };

    let columns = cursor
        .column_names()?
        .collect::<Result<Vec<String>, _>>()?;
    let mut rows = Vec::new();
    let mut buf = Vec::new();
    while let Some(mut row) = cursor.next_row()? {
        let mut object = Map::with_capacity(columns.len());
        for (index, column) in columns.iter().enumerate() {
            let value = if row.get_text(u16::try_from(index + 1)?, &mut buf)? {
                Value::String(String::from_utf8_lossy(&buf).into_owned())
            } else {
                Value::Null
            };
            object.insert(column.clone(), value);
        }
        rows.push(Value::Object(object));
    }
    Ok(rows)
}

fn read_binary(conn: &Connection<'_>, stream_file: &str) -> Result<Vec<u8>> {
    let sql = statements::read_stream_file();
    let mut prepared = conn.prepare(&sql)?;
    let Some(mut cursor) = prepared.execute(&stream_file.into_parameter())? else {
        return Ok(Vec::new());
    };
    let mut archive = Vec::new();
    let mut chunk = Vec::new();
    while let Some(mut row) = cursor.next_row()? {
        if row.get_binary(1, &mut chunk)? {
            archive.extend_from_slice(&chunk);
        }
    }
    Ok(archive)
}
