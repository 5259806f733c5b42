//! Simulated table-client workload
//!
//! Workers pick a random table, borrow a client for it through the registry,
//! perform a fake write and hand the client back (or discard it when the
//! write fails).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use async_trait::async_trait;
use futures::FutureExt;
use keypool_core::{HandleFactory, KeypoolError, ResourceKey};
use keypool_pool::PoolRegistry;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Shape of the simulated workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Number of distinct tables (keys)
    pub tables: usize,
    /// Concurrent worker tasks
    pub workers: usize,
    /// Units of work per worker
    pub iterations: usize,
    /// Time a unit of work holds its client, in milliseconds
    pub work_ms: u64,
    /// Time to open a client, in milliseconds
    pub create_latency_ms: u64,
    /// Probability that opening a client or a write fails
    pub failure_rate: f64,
    /// Borrow timeout, in milliseconds
    pub borrow_timeout_ms: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            tables: 4,
            workers: 16,
            iterations: 200,
            work_ms: 1,
            create_latency_ms: 5,
            failure_rate: 0.0,
            borrow_timeout_ms: 2_000,
        }
    }
}

impl WorkloadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tables == 0 {
            bail!("workload.tables must be greater than 0");
        }
        if self.workers == 0 {
            bail!("workload.workers must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.failure_rate) {
            bail!(
                "workload.failure_rate must be between 0 and 1, got {}",
                self.failure_rate
            );
        }
        Ok(())
    }

    pub fn table_name(index: usize) -> String {
        format!("table_{index}")
    }
}

/// A fake client for one table
#[derive(Debug)]
pub struct TableClient {
    pub table: String,
    pub serial: u64,
    writes: AtomicU64,
}

impl TableClient {
    /// Record one write; fails with probability `failure_rate`
    fn put(&self, failure_rate: f64) -> Result<(), KeypoolError> {
        if failure_rate > 0.0 && rand::thread_rng().gen_bool(failure_rate) {
            return Err(KeypoolError::Other(format!(
                "put to '{}' rejected by client {}",
                self.table, self.serial
            )));
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Opens [`TableClient`]s with configurable latency and failure rate
#[derive(Debug, Default)]
pub struct TableClientFactory {
    create_latency: Duration,
    failure_rate: f64,
    next_serial: AtomicU64,
    destroyed: AtomicU64,
}

impl TableClientFactory {
    pub fn new(config: &WorkloadConfig) -> Self {
        Self {
            create_latency: Duration::from_millis(config.create_latency_ms),
            failure_rate: config.failure_rate,
            ..Self::default()
        }
    }

    pub fn created(&self) -> u64 {
        self.next_serial.load(Ordering::Relaxed)
    }

    pub fn destroyed(&self) -> u64 {
        self.destroyed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl HandleFactory for TableClientFactory {
    type Handle = TableClient;

    async fn create(&self, key: &ResourceKey) -> keypool_core::Result<TableClient> {
        if !self.create_latency.is_zero() {
            tokio::time::sleep(self.create_latency).await;
        }
        let refused = self.failure_rate > 0.0 && rand::thread_rng().gen_bool(self.failure_rate);
        if refused {
            return Err(KeypoolError::factory(key.as_str(), "region server refused connection"));
        }
        Ok(TableClient {
            table: key.to_string(),
            serial: self.next_serial.fetch_add(1, Ordering::Relaxed),
            writes: AtomicU64::new(0),
        })
    }

    async fn destroy(&self, key: &ResourceKey, handle: TableClient) -> keypool_core::Result<()> {
        self.destroyed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            table = %key,
            serial = handle.serial,
            writes = handle.writes.load(Ordering::Relaxed),
            "closed table client"
        );
        Ok(())
    }
}

/// Outcome counts of a workload run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcomes {
    pub succeeded: usize,
    pub work_failed: usize,
    pub exhausted: usize,
    pub factory_failed: usize,
    pub other_errors: usize,
}

#[derive(Default)]
struct Tally {
    succeeded: AtomicUsize,
    work_failed: AtomicUsize,
    exhausted: AtomicUsize,
    factory_failed: AtomicUsize,
    other_errors: AtomicUsize,
}

impl Tally {
    fn record(&self, result: &Result<(), KeypoolError>) {
        let counter = match result {
            Ok(()) => &self.succeeded,
            Err(e) if e.is_retryable() => &self.exhausted,
            Err(e) if e.is_factory_failure() => &self.factory_failed,
            Err(KeypoolError::Other(_)) => &self.work_failed,
            Err(e) => {
                tracing::warn!(error = %e, "unexpected workload error");
                &self.other_errors
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn outcomes(&self) -> Outcomes {
        Outcomes {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            work_failed: self.work_failed.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            factory_failed: self.factory_failed.load(Ordering::Relaxed),
            other_errors: self.other_errors.load(Ordering::Relaxed),
        }
    }
}

/// Result of [`run_workload`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSummary {
    pub elapsed_ms: u64,
    pub operations: usize,
    pub outcomes: Outcomes,
}

/// Run `config.workers` workers against `registry` until each has done
/// `config.iterations` units of work
pub async fn run_workload(
    registry: &PoolRegistry<TableClientFactory>,
    config: &WorkloadConfig,
) -> Result<WorkloadSummary> {
    config.validate()?;
    let tally = Arc::new(Tally::default());
    let started = Instant::now();

    let mut workers = Vec::with_capacity(config.workers);
    for worker in 0..config.workers {
        let registry = registry.clone();
        let config = config.clone();
        let tally = Arc::clone(&tally);
        workers.push(tokio::spawn(async move {
            for _ in 0..config.iterations {
                let table = WorkloadConfig::table_name(rand::thread_rng().gen_range(0..config.tables));
                let result = unit_of_work(&registry, &config, table).await;
                tally.record(&result);
            }
            tracing::debug!(worker, "worker finished");
        }));
    }

    for worker in workers {
        worker.await?;
    }

    let outcomes = tally.outcomes();
    let summary = WorkloadSummary {
        elapsed_ms: started.elapsed().as_millis() as u64,
        operations: config.workers * config.iterations,
        outcomes,
    };
    tracing::info!(
        elapsed_ms = summary.elapsed_ms,
        succeeded = summary.outcomes.succeeded,
        work_failed = summary.outcomes.work_failed,
        exhausted = summary.outcomes.exhausted,
        "workload finished"
    );
    Ok(summary)
}

async fn unit_of_work(
    registry: &PoolRegistry<TableClientFactory>,
    config: &WorkloadConfig,
    table: String,
) -> Result<(), KeypoolError> {
    let work = Duration::from_millis(config.work_ms);
    let failure_rate = config.failure_rate;
    registry
        .run(
            table,
            Duration::from_millis(config.borrow_timeout_ms),
            move |client: &TableClient| {
                async move {
                    if !work.is_zero() {
                        tokio::time::sleep(work).await;
                    }
                    client.put(failure_rate)
                }
                .boxed()
            },
        )
        .await
}

#[cfg(test)]
mod tests {
    use keypool_pool::{PoolConfig, RegistryConfig};

    use super::*;

    fn quick_workload() -> WorkloadConfig {
        WorkloadConfig {
            tables: 3,
            workers: 6,
            iterations: 25,
            work_ms: 0,
            create_latency_ms: 0,
            failure_rate: 0.0,
            borrow_timeout_ms: 5_000,
        }
    }

    #[test]
    fn test_workload_validation() {
        assert!(WorkloadConfig::default().validate().is_ok());

        let mut config = quick_workload();
        config.failure_rate = 1.5;
        assert!(config.validate().is_err());

        config.failure_rate = 0.0;
        config.tables = 0;
        assert!(config.validate().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_workload_without_failures() {
        let config = quick_workload();
        let factory = Arc::new(TableClientFactory::new(&config));
        let registry = PoolRegistry::new(
            RegistryConfig::default(),
            PoolConfig::new(0, 2),
            Arc::clone(&factory),
        );

        let summary = run_workload(&registry, &config).await.expect("workload");
        assert_eq!(summary.operations, 150);
        assert_eq!(summary.outcomes.succeeded, 150);
        assert!(registry.len() <= 3);
        assert!(factory.created() <= 6, "at most two clients per table");

        registry.shutdown().await;
        assert_eq!(factory.destroyed(), factory.created());
    }

    #[tokio::test]
    async fn test_failed_writes_discard_clients() {
        let mut config = quick_workload();
        config.failure_rate = 1.0;
        config.workers = 1;
        config.iterations = 3;

        let factory = Arc::new(TableClientFactory {
            failure_rate: 0.0,
            ..TableClientFactory::new(&config)
        });
        let registry = PoolRegistry::new(
            RegistryConfig::default(),
            PoolConfig::new(0, 2),
            Arc::clone(&factory),
        );

        let summary = run_workload(&registry, &config).await.expect("workload");
        assert_eq!(summary.outcomes.work_failed, 3);
        assert_eq!(factory.created(), 3);
        assert_eq!(factory.destroyed(), 3);
    }
}
