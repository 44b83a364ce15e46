//! Reconcile Worker
//!
//! Background sweep that resyncs every active account from the chain. This
//! bounds how long a cache can lag after a crash between chain confirmation
//! and reconciliation.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::account::AccountService;
use crate::config::ReconcileConfig;
use crate::error::LedgerError;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Pause between sweeps
    pub scan_interval: Duration,
    /// Accounts resynced concurrently
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

impl From<&ReconcileConfig> for WorkerConfig {
    fn from(config: &ReconcileConfig) -> Self {
        Self {
            scan_interval: Duration::from_secs(config.interval_secs),
            batch_size: config.batch_size.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub synced: usize,
    pub failed: usize,
}

pub struct ReconcileWorker {
    accounts: Arc<AccountService>,
    config: WorkerConfig,
}

impl ReconcileWorker {
    pub fn new(accounts: Arc<AccountService>, config: WorkerConfig) -> Self {
        Self { accounts, config }
    }

    pub fn with_defaults(accounts: Arc<AccountService>) -> Self {
        Self::new(accounts, WorkerConfig::default())
    }

    /// Sweep forever
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            batch_size = self.config.batch_size,
            "Starting reconcile worker"
        );

        loop {
            if let Err(e) = self.sweep().await {
                error!(error = %e, "Reconcile sweep failed");
            }

            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// One pass over all active accounts. Per-account failures are logged
    /// and counted; only a failure to list accounts aborts the pass.
    pub async fn sweep(&self) -> Result<SweepReport, LedgerError> {
        let accounts = self.accounts.store().list_accounts().await?;
        let targets: Vec<_> = accounts
            .into_iter()
            .filter(|a| a.is_active && a.address.is_some())
            .map(|a| a.account_id)
            .collect();

        if targets.is_empty() {
            debug!("No accounts to reconcile");
            return Ok(SweepReport::default());
        }

        let mut report = SweepReport::default();
        for batch in targets.chunks(self.config.batch_size) {
            let results = join_all(batch.iter().map(|id| self.accounts.resync(*id))).await;
            for (account_id, result) in batch.iter().zip(results) {
                match result {
                    Ok(_) => report.synced += 1,
                    Err(e) => {
                        warn!(account_id, error = %e, "Account resync failed");
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            synced = report.synced,
            failed = report.failed,
            "Reconcile sweep finished"
        );
        Ok(report)
    }
}
