//! chain-ledger - operator CLI
//!
//! ```text
//! chain-ledger [--env <name>] init-schema
//! chain-ledger [--env <name>] resync <account_id>
//! chain-ledger [--env <name>] reconcile-once
//! chain-ledger [--env <name>] reconcile
//! ```
//!
//! Runs against the configured Postgres store and chain node.

use anyhow::{Context, bail};
use std::sync::Arc;

use chain_ledger::Ledger;
use chain_ledger::chain::EthGateway;
use chain_ledger::config::AppConfig;
use chain_ledger::notify::NoopNotifier;
use chain_ledger::store::PgLedgerStore;
use chain_ledger::transfer::{ReconcileWorker, WorkerConfig};

#[derive(Debug, PartialEq, Eq)]
enum Command {
    InitSchema,
    Resync(i64),
    ReconcileOnce,
    Reconcile,
}

fn get_env(args: &[String]) -> String {
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn parse_command(args: &[String]) -> anyhow::Result<Command> {
    let mut rest = Vec::new();
    let mut skip = false;
    for arg in args.iter().skip(1) {
        if skip {
            skip = false;
            continue;
        }
        if arg == "--env" || arg == "-e" {
            skip = true;
            continue;
        }
        rest.push(arg.as_str());
    }

    match rest.as_slice() {
        ["init-schema"] => Ok(Command::InitSchema),
        ["resync", id] => Ok(Command::Resync(
            id.parse().with_context(|| format!("invalid account id: {}", id))?,
        )),
        ["reconcile-once"] => Ok(Command::ReconcileOnce),
        ["reconcile"] => Ok(Command::Reconcile),
        _ => bail!("usage: chain-ledger [--env <name>] <init-schema|resync <account_id>|reconcile-once|reconcile>"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let command = parse_command(&args)?;

    let env = get_env(&args);
    let config = AppConfig::load(&env).with_context(|| format!("loading config/{}.yaml", env))?;
    let _log_guard = chain_ledger::logging::init_logging(&config);

    tracing::info!(
        git_hash = env!("GIT_HASH"),
        env = %env,
        command = ?command,
        "Starting chain-ledger"
    );

    let postgres_url = config
        .postgres_url
        .as_deref()
        .context("postgres_url is not configured")?;
    let store = Arc::new(PgLedgerStore::connect(postgres_url).await?);

    if command == Command::InitSchema {
        store.init_schema().await?;
        return Ok(());
    }

    let chain = Arc::new(EthGateway::new(config.chain.clone())?);
    let bank_account_id = config.ledger.bank_account_id;
    let ledger = Ledger::new(store, chain, Arc::new(NoopNotifier), bank_account_id);
    match ledger.accounts().account(bank_account_id).await {
        Ok(bank) => tracing::info!(
            bank_account_id,
            address = bank.address.as_deref().unwrap_or("-"),
            "Bank account resolved"
        ),
        // Loan repayments fail until the bank account exists
        Err(e) => tracing::warn!(bank_account_id, error = %e, "Bank account not available"),
    }
    let accounts = ledger.accounts().clone();

    match command {
        Command::Resync(account_id) => {
            let account = accounts.resync(account_id).await?;
            println!("account {} balance {}", account.account_id, account.balance);
        }
        Command::ReconcileOnce => {
            let report = ReconcileWorker::new(accounts, WorkerConfig::from(&config.reconcile))
                .sweep()
                .await?;
            println!("synced {} failed {}", report.synced, report.failed);
        }
        Command::Reconcile => {
            ReconcileWorker::new(accounts, WorkerConfig::from(&config.reconcile))
                .run()
                .await
        }
        Command::InitSchema => {}
    }

    Ok(())
}
