use anyhow::Result;
use sqlx::PgPool;

/// Create ledger tables and indexes if they do not exist yet
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    tracing::info!("Initializing ledger schema...");

    for (name, ddl) in SCHEMA {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create {}: {}", name, e))?;
    }

    tracing::info!("Ledger schema initialized successfully");
    Ok(())
}

const SCHEMA: [(&str, &str); 7] = [
    ("accounts table", CREATE_ACCOUNTS_TABLE),
    ("transfers table", CREATE_TRANSFERS_TABLE),
    ("entries table", CREATE_ENTRIES_TABLE),
    ("accounts owner index", CREATE_ACCOUNTS_OWNER_INDEX),
    ("transfers from index", CREATE_TRANSFERS_FROM_INDEX),
    ("transfers to index", CREATE_TRANSFERS_TO_INDEX),
    ("entries account index", CREATE_ENTRIES_ACCOUNT_INDEX),
];

/// The CHECK on balance backs up the conditional UPDATE used for debits
const CREATE_ACCOUNTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id          BIGSERIAL PRIMARY KEY,
    owner       VARCHAR NOT NULL,
    balance     BIGINT NOT NULL CHECK (balance >= 0),
    currency    VARCHAR(3) NOT NULL CHECK (currency IN ('USD', 'EUR', 'CAD')),
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const CREATE_TRANSFERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transfers (
    id              BIGSERIAL PRIMARY KEY,
    from_account_id BIGINT NOT NULL REFERENCES accounts (id),
    to_account_id   BIGINT NOT NULL REFERENCES accounts (id),
    amount          BIGINT NOT NULL CHECK (amount > 0),
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

/// transfer_id is NULL only for opening-balance entries
const CREATE_ENTRIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    id          BIGSERIAL PRIMARY KEY,
    account_id  BIGINT NOT NULL REFERENCES accounts (id),
    amount      BIGINT NOT NULL,
    transfer_id BIGINT REFERENCES transfers (id),
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const CREATE_ACCOUNTS_OWNER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS accounts_owner_idx ON accounts (owner)";

const CREATE_TRANSFERS_FROM_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS transfers_from_idx ON transfers (from_account_id)";

const CREATE_TRANSFERS_TO_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS transfers_to_idx ON transfers (to_account_id)";

const CREATE_ENTRIES_ACCOUNT_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS entries_account_idx ON entries (account_id)";
