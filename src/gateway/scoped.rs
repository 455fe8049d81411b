//! Scoped backend handler
//!
//! Owns one opened handler and its statistics tracker for the duration of a
//! single tool invocation, starting before the handler is opened.
//! `release()` closes the handler on normal paths; `Drop` covers early
//! returns, panics and cancelled futures (including a cancelled open) by
//! spawning the cleanup onto the current runtime.

use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::ConnectionProfile;
use crate::engine::{
    BackendHandler, EngineError, EngineKind, EngineResult, HandlerRegistry, QueryResult,
    TableConstraint, TableIndex, TableInfo, TableSchema, TableStats, WriteOutcome,
};
use crate::gateway::error::{GatewayError, GatewayResult};
use crate::interceptor::{ResourceStats, ResourceStatsSnapshot};

const OPEN_TIMEOUT_MS: u64 = 30_000;

pub struct ScopedHandler {
    connection: String,
    kind: EngineKind,
    handler: Option<Box<dyn BackendHandler>>,
    stats: ResourceStats,
}

impl ScopedHandler {
    /// Builds and opens the handler for a resolved profile.
    ///
    /// An engine without a registered handler is a configuration error.
    pub async fn acquire(
        registry: &HandlerRegistry,
        profile: &ConnectionProfile,
    ) -> GatewayResult<Self> {
        let kind = profile.kind();
        if !registry.supports(kind) {
            return Err(GatewayError::configuration(format!(
                "Database type '{kind}' is not supported by this gateway (connection '{}')",
                profile.name
            )));
        }

        let handler = registry
            .build(profile)
            .map_err(|e| GatewayError::configuration(e.to_string()))?;

        let mut stats = ResourceStats::new();
        stats.on_connection_start();
        // From here on Drop releases the handler, even if open() is cancelled.
        let mut scoped = Self {
            connection: profile.name.clone(),
            kind,
            handler: Some(handler),
            stats,
        };

        let open = scoped.handler()?.open();
        let opened = match timeout(Duration::from_millis(OPEN_TIMEOUT_MS), open).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout {
                timeout_ms: OPEN_TIMEOUT_MS,
            }),
        };
        if let Err(e) = opened {
            scoped.release().await;
            return Err(e.into());
        }

        debug!(connection = %profile.name, engine = %kind, "Handler acquired");
        Ok(scoped)
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn stats(&self) -> ResourceStatsSnapshot {
        self.stats.snapshot()
    }

    fn handler(&mut self) -> GatewayResult<&mut (dyn BackendHandler + 'static)> {
        self.handler
            .as_deref_mut()
            .ok_or_else(|| EngineError::internal("Handler already released").into())
    }

    /// Feeds one backend call into the tracker. `sql` is `None` for
    /// introspection calls, which count errors but not queries.
    fn observe<T>(
        &mut self,
        sql: Option<&str>,
        started: Instant,
        result: EngineResult<T>,
    ) -> GatewayResult<T> {
        match result {
            Ok(value) => {
                if let Some(sql) = sql {
                    self.stats.on_query(sql, started.elapsed().as_secs_f64());
                }
                Ok(value)
            }
            Err(e) => {
                self.stats.on_error(e.kind());
                Err(e.into())
            }
        }
    }

    pub async fn list_tables(&mut self) -> GatewayResult<Vec<TableInfo>> {
        let started = Instant::now();
        let result = self.handler()?.list_tables().await;
        self.observe(None, started, result)
    }

    pub async fn get_schema(&mut self, table: &str) -> GatewayResult<TableSchema> {
        let started = Instant::now();
        let result = self.handler()?.get_schema(table).await;
        self.observe(None, started, result)
    }

    pub async fn execute_read(&mut self, sql: &str) -> GatewayResult<QueryResult> {
        let started = Instant::now();
        let result = self.handler()?.execute_read(sql).await;
        if let Ok(rows) = &result {
            self.stats.on_memory(rows.approx_size() as u64);
        }
        self.observe(Some(sql), started, result)
    }

    pub async fn execute_write(&mut self, sql: &str) -> GatewayResult<WriteOutcome> {
        let started = Instant::now();
        let result = self.handler()?.execute_write(sql).await;
        self.observe(Some(sql), started, result)
    }

    pub async fn table_ddl(&mut self, table: &str) -> GatewayResult<String> {
        let started = Instant::now();
        let result = self.handler()?.table_ddl(table).await;
        self.observe(None, started, result)
    }

    pub async fn table_indexes(&mut self, table: &str) -> GatewayResult<Vec<TableIndex>> {
        let started = Instant::now();
        let result = self.handler()?.table_indexes(table).await;
        self.observe(None, started, result)
    }

    pub async fn table_stats(&mut self, table: &str) -> GatewayResult<TableStats> {
        let started = Instant::now();
        let result = self.handler()?.table_stats(table).await;
        self.observe(None, started, result)
    }

    pub async fn table_constraints(&mut self, table: &str) -> GatewayResult<Vec<TableConstraint>> {
        let started = Instant::now();
        let result = self.handler()?.table_constraints(table).await;
        self.observe(None, started, result)
    }

    pub async fn explain(&mut self, sql: &str) -> GatewayResult<String> {
        let started = Instant::now();
        let result = self.handler()?.explain(sql).await;
        self.observe(None, started, result)
    }

    /// Closes the handler and returns the final statistics.
    pub async fn release(mut self) -> ResourceStatsSnapshot {
        if let Some(mut handler) = self.handler.take() {
            handler.cleanup().await;
            self.stats.on_connection_end();
            debug!(connection = %self.connection, "Handler released");
        }
        self.stats.snapshot()
    }
}

impl Drop for ScopedHandler {
    fn drop(&mut self) {
        let Some(mut handler) = self.handler.take() else {
            return;
        };
        self.stats.on_connection_end();

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let connection = self.connection.clone();
                runtime.spawn(async move {
                    handler.cleanup().await;
                    debug!(connection = %connection, "Handler released after early exit");
                });
            }
            Err(_) => warn!(
                connection = %self.connection,
                "No runtime available to release handler; dropping it"
            ),
        }
    }
}
