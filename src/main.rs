use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Serialize;

use financeflow::account::{AccountService, CreateAccountParams};
use financeflow::config::AppConfig;
use financeflow::coordinator::TxCoordinator;
use financeflow::db::{Database, schema};
use financeflow::models::Currency;
use financeflow::store::PgLedgerStore;
use financeflow::transfer::{TransferParams, TransferService};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Values following `flag`, if the flag is present with enough of them
fn flag_values(flag: &str, count: usize) -> Option<Vec<String>> {
    let args: Vec<String> = std::env::args().collect();
    let pos = args.iter().position(|a| a == flag)?;
    let values = args.get(pos + 1..pos + 1 + count)?;
    Some(values.to_vec())
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|a| a == flag)
}

fn parse_id(value: &str, what: &str) -> Result<i64> {
    value
        .parse()
        .with_context(|| format!("Invalid {}: '{}'", what, value))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn usage() -> &'static str {
    "usage: financeflow [--env <name>] <command>\n\
     commands:\n  \
       --init-schema\n  \
       --open-account <owner> <currency> <opening_balance>\n  \
       --transfer <from_account_id> <to_account_id> <amount>\n  \
       --reconcile <account_id>"
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = financeflow::logging::init_logging(&app_config)?;

    tracing::info!(
        git_hash = env!("GIT_HASH"),
        "Starting financeflow in {} mode",
        env
    );

    let db = Database::connect(&app_config.database).await?;
    db.health_check().await?;
    let pool = db.pool().clone();

    if has_flag("--init-schema") {
        schema::ensure_schema(&pool).await?;
        println!("Schema ready");
        return Ok(());
    }

    let store = Arc::new(PgLedgerStore::new(pool));
    let coordinator =
        TxCoordinator::new(store).with_timeout(app_config.database.transaction_timeout());
    let accounts = AccountService::new(coordinator.clone());
    let transfers = TransferService::new(coordinator);

    if let Some(values) = flag_values("--open-account", 3) {
        let currency: Currency = values[1].parse()?;
        let opening_balance = parse_id(&values[2], "opening balance")?;
        let account = accounts
            .create_account(CreateAccountParams::new(
                values[0].clone(),
                currency,
                opening_balance,
            ))
            .await?;
        return print_json(&account);
    }

    if let Some(values) = flag_values("--transfer", 3) {
        let params = TransferParams::new(
            parse_id(&values[0], "from account id")?,
            parse_id(&values[1], "to account id")?,
            parse_id(&values[2], "amount")?,
        );
        let result = transfers.transfer(params).await?;
        return print_json(&result);
    }

    if let Some(values) = flag_values("--reconcile", 1) {
        let report = accounts
            .reconcile(parse_id(&values[0], "account id")?)
            .await?;
        print_json(&report)?;
        if !report.is_balanced() {
            bail!(
                "account {} does not reconcile (drift {})",
                report.account_id,
                report.drift()
            );
        }
        return Ok(());
    }

    eprintln!("{}", usage());
    bail!("no command given")
}
