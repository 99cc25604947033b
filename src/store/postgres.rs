//! `sqlx`-backed [`Store`] implementation. Schema lives under `/migrations`
//! and is applied via `sqlx::migrate!` at startup, the way the teacher's
//! other pack sibling wires up its Postgres-backed services.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::str::FromStr;

use super::{RemainingDeposit, Store, StoreError};
use crate::model::{
    Bundle, BundleBody, CidRecord, Deposit, DepositId, Destination, ExecutionObject, Vault, VaultId,
};
use crate::util::Amount;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(PgStore { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn row_to_vault(id: VaultId, controllers: Vec<String>, rules: Option<String>, nonce: Decimal) -> Vault {
    Vault {
        id,
        controllers,
        rules,
        nonce: nonce.to_string().parse().unwrap_or(0),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_balance(&self, vault: VaultId, token: &str) -> Result<Amount, StoreError> {
        let row = sqlx::query("SELECT balance FROM balances WHERE vault_id = $1 AND LOWER(token) = LOWER($2)")
            .bind(vault)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .map(|r| Amount(r.get::<Decimal, _>("balance")))
            .unwrap_or_else(Amount::zero))
    }

    async fn set_balance(&self, vault: VaultId, token: &str, amount: Amount) -> Result<(), StoreError> {
        if amount.0.is_sign_negative() {
            return Err(StoreError::NegativeBalance {
                vault,
                token: token.to_string(),
            });
        }
        sqlx::query(
            "INSERT INTO balances (vault_id, token, balance) VALUES ($1, LOWER($2), $3)
             ON CONFLICT (vault_id, token) DO UPDATE SET balance = EXCLUDED.balance, updated_at = now()",
        )
        .bind(vault)
        .bind(token)
        .bind(amount.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn credit(&self, vault: VaultId, token: &str, amount: Amount) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO balances (vault_id, token, balance) VALUES ($1, LOWER($2), $3)
             ON CONFLICT (vault_id, token) DO UPDATE SET balance = balances.balance + EXCLUDED.balance, updated_at = now()",
        )
        .bind(vault)
        .bind(token)
        .bind(amount.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn apply_transfer(
        &self,
        from: VaultId,
        to: VaultId,
        token: &str,
        amount: Amount,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        apply_transfer_tx(&mut tx, from, to, token, amount).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_vault(&self, vault: VaultId) -> Result<Option<Vault>, StoreError> {
        let row = sqlx::query("SELECT id, controllers, rules, nonce FROM vaults WHERE id = $1")
            .bind(vault)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| {
            row_to_vault(
                r.get("id"),
                r.get::<Vec<String>, _>("controllers"),
                r.get("rules"),
                r.get::<Decimal, _>("nonce"),
            )
        }))
    }

    async fn create_vault(&self, initial_controller: &str) -> Result<VaultId, StoreError> {
        let row = sqlx::query(
            "INSERT INTO vaults (controllers, nonce) VALUES (ARRAY[LOWER($1)], 0) RETURNING id",
        )
        .bind(initial_controller)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }

    async fn get_controllers(&self, vault: VaultId) -> Result<Vec<String>, StoreError> {
        let row = sqlx::query("SELECT controllers FROM vaults WHERE id = $1")
            .bind(vault)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("controllers")).unwrap_or_default())
    }

    async fn add_controller(&self, vault: VaultId, controller: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE vaults SET controllers = array_append(controllers, LOWER($2))
             WHERE id = $1 AND NOT (LOWER($2) = ANY(controllers))",
        )
        .bind(vault)
        .bind(controller)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 && self.get_vault(vault).await?.is_none() {
            return Err(StoreError::UnknownVault(vault));
        }
        Ok(())
    }

    async fn remove_controller(&self, vault: VaultId, controller: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE vaults SET controllers = array_remove(controllers, LOWER($2)) WHERE id = $1")
            .bind(vault)
            .bind(controller)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownVault(vault));
        }
        Ok(())
    }

    async fn set_rules(&self, vault: VaultId, rules: Option<&str>) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE vaults SET rules = $2 WHERE id = $1")
            .bind(vault)
            .bind(rules)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownVault(vault));
        }
        Ok(())
    }

    async fn list_vaults_for(&self, controller: &str) -> Result<Vec<VaultId>, StoreError> {
        let rows = sqlx::query("SELECT id FROM vaults WHERE LOWER($1) = ANY(controllers)")
            .bind(controller)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get("id")).collect())
    }

    async fn get_vault_nonce(&self, vault: VaultId) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT nonce FROM vaults WHERE id = $1")
            .bind(vault)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .map(|r| r.get::<Decimal, _>("nonce").to_string().parse().unwrap_or(0))
            .unwrap_or(0))
    }

    async fn set_vault_nonce(&self, vault: VaultId, nonce: u64) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE vaults SET nonce = $2 WHERE id = $1")
            .bind(vault)
            .bind(Decimal::from_str(&nonce.to_string()).unwrap_or(Decimal::ZERO))
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            tracing::warn!(vault, nonce, "set_vault_nonce: no such vault row, no-op");
        }
        Ok(())
    }

    async fn next_bundle_nonce(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COALESCE(MAX(nonce), -1) + 1 AS next FROM bundles")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("next"))
    }

    async fn get_bundle(&self, nonce: i64) -> Result<Option<Bundle>, StoreError> {
        let row = sqlx::query("SELECT nonce, proposer, signature, cid, body FROM bundles WHERE nonce = $1")
            .bind(nonce)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_bundle))
    }

    async fn list_bundles(&self) -> Result<Vec<Bundle>, StoreError> {
        let rows = sqlx::query("SELECT nonce, proposer, signature, cid, body FROM bundles ORDER BY nonce ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(row_to_bundle).collect())
    }

    async fn get_cid(&self, nonce: i64) -> Result<Option<CidRecord>, StoreError> {
        let row = sqlx::query("SELECT cid, nonce, proposer FROM cids WHERE nonce = $1")
            .bind(nonce)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| CidRecord {
            cid: r.get("cid"),
            nonce: r.get("nonce"),
            proposer: r.get("proposer"),
        }))
    }

    async fn insert_deposit_if_missing(
        &self,
        tx_hash: &str,
        transfer_uid: &str,
        chain_id: u64,
        depositor: &str,
        token: &str,
        amount: Amount,
    ) -> Result<DepositId, StoreError> {
        let row = sqlx::query(
            "INSERT INTO deposits (tx_hash, transfer_uid, chain_id, depositor, token, amount)
             VALUES ($1, $2, $3, LOWER($4), LOWER($5), $6)
             ON CONFLICT (transfer_uid) DO UPDATE SET transfer_uid = EXCLUDED.transfer_uid
             RETURNING id",
        )
        .bind(tx_hash)
        .bind(transfer_uid)
        .bind(Decimal::from_str(&chain_id.to_string()).unwrap_or(Decimal::ZERO))
        .bind(depositor)
        .bind(token)
        .bind(amount.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }

    async fn get_deposit(&self, deposit_id: DepositId) -> Result<Option<Deposit>, StoreError> {
        let row = sqlx::query(
            "SELECT id, tx_hash, transfer_uid, chain_id, depositor, token, amount, assigned_at
             FROM deposits WHERE id = $1",
        )
        .bind(deposit_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_deposit))
    }

    async fn remaining(&self, deposit_id: DepositId) -> Result<Amount, StoreError> {
        let row = sqlx::query(
            "SELECT d.amount - COALESCE(SUM(e.amount), 0) AS remaining
             FROM deposits d LEFT JOIN deposit_assignment_events e ON e.deposit_id = d.id
             WHERE d.id = $1 GROUP BY d.id",
        )
        .bind(deposit_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(r) => Ok(Amount(r.get("remaining"))),
            None => Err(StoreError::UnknownDeposit(deposit_id)),
        }
    }

    async fn find_next_with_remaining(
        &self,
        depositor: &str,
        token: &str,
        chain_id: u64,
        exclude: &[DepositId],
    ) -> Result<Option<RemainingDeposit>, StoreError> {
        find_remaining(&self.pool, depositor, token, chain_id, None, exclude).await
    }

    async fn find_with_sufficient_remaining(
        &self,
        depositor: &str,
        token: &str,
        chain_id: u64,
        min: Amount,
        exclude: &[DepositId],
    ) -> Result<Option<RemainingDeposit>, StoreError> {
        find_remaining(&self.pool, depositor, token, chain_id, Some(min), exclude).await
    }

    async fn assign(&self, deposit_id: DepositId, amount: Amount, credited_vault: VaultId) -> Result<(), StoreError> {
        if amount.is_zero() {
            return Err(StoreError::NonPositiveAssignment);
        }
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT amount FROM deposits WHERE id = $1 FOR UPDATE")
            .bind(deposit_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::UnknownDeposit(deposit_id))?;
        let deposit_amount: Decimal = row.get("amount");

        let assigned_row = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0) AS assigned FROM deposit_assignment_events WHERE deposit_id = $1",
        )
        .bind(deposit_id)
        .fetch_one(&mut *tx)
        .await?;
        let assigned: Decimal = assigned_row.get("assigned");
        let remaining = deposit_amount - assigned;
        if amount.0 > remaining {
            return Err(StoreError::DepositOverAssign {
                deposit_id,
                amount: amount.to_string(),
                remaining: remaining.to_string(),
            });
        }

        sqlx::query(
            "INSERT INTO deposit_assignment_events (deposit_id, amount, credited_vault) VALUES ($1, $2, $3)",
        )
        .bind(deposit_id)
        .bind(amount.0)
        .bind(credited_vault)
        .execute(&mut *tx)
        .await?;

        if amount.0 == remaining {
            sqlx::query("UPDATE deposits SET assigned_at = now() WHERE id = $1")
                .bind(deposit_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn commit_bundle(&self, bundle: &Bundle, executions: &[ExecutionObject]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT 1 FROM bundles WHERE nonce = $1")
            .bind(bundle.nonce)
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() {
            return Ok(()); // idempotent replay of an already-committed bundle
        }

        for execution in executions {
            for transfer in &execution.proof {
                match &transfer.to {
                    Destination::Vault(to_vault) => {
                        if let Some(deposit_id) = transfer.deposit_id {
                            assign_tx(&mut tx, deposit_id, transfer.amount, *to_vault).await?;
                            credit_tx(&mut tx, *to_vault, &transfer.token, transfer.amount).await?;
                        } else {
                            apply_transfer_tx(&mut tx, transfer.from_vault_id, *to_vault, &transfer.token, transfer.amount)
                                .await?;
                        }
                    }
                    Destination::External(_) => {
                        debit_tx(&mut tx, transfer.from_vault_id, &transfer.token, transfer.amount).await?;
                    }
                }
            }
            sqlx::query("UPDATE vaults SET nonce = $2 WHERE id = $1")
                .bind(execution.from)
                .bind(Decimal::from_str(&execution.intention.nonce.to_string()).unwrap_or(Decimal::ZERO))
                .execute(&mut *tx)
                .await?;
        }

        let body_json = serde_json::to_value(&bundle.body).map_err(|e| StoreError::Backend(e.to_string()))?;
        sqlx::query(
            "INSERT INTO bundles (nonce, proposer, signature, cid, body) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(bundle.nonce)
        .bind(&bundle.proposer)
        .bind(&bundle.signature)
        .bind(&bundle.cid)
        .bind(body_json)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO cids (cid, nonce, proposer) VALUES ($1, $2, $3)")
            .bind(&bundle.cid)
            .bind(bundle.nonce)
            .bind(&bundle.proposer)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO proposers (proposer, last_seen) VALUES ($1, now())
             ON CONFLICT (proposer) DO UPDATE SET last_seen = now()",
        )
        .bind(&bundle.proposer)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

async fn apply_transfer_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    from: VaultId,
    to: VaultId,
    token: &str,
    amount: Amount,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE balances SET balance = balance - $3, updated_at = now()
         WHERE vault_id = $1 AND LOWER(token) = LOWER($2) AND balance >= $3",
    )
    .bind(from)
    .bind(token)
    .bind(amount.0)
    .execute(&mut **tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NegativeBalance {
            vault: from,
            token: token.to_string(),
        });
    }
    credit_tx(tx, to, token, amount).await
}

async fn credit_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    vault: VaultId,
    token: &str,
    amount: Amount,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO balances (vault_id, token, balance) VALUES ($1, LOWER($2), $3)
         ON CONFLICT (vault_id, token) DO UPDATE SET balance = balances.balance + EXCLUDED.balance, updated_at = now()",
    )
    .bind(vault)
    .bind(token)
    .bind(amount.0)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn debit_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    vault: VaultId,
    token: &str,
    amount: Amount,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE balances SET balance = balance - $3, updated_at = now()
         WHERE vault_id = $1 AND LOWER(token) = LOWER($2) AND balance >= $3",
    )
    .bind(vault)
    .bind(token)
    .bind(amount.0)
    .execute(&mut **tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NegativeBalance {
            vault,
            token: token.to_string(),
        });
    }
    Ok(())
}

async fn assign_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    deposit_id: DepositId,
    amount: Amount,
    credited_vault: VaultId,
) -> Result<(), StoreError> {
    if amount.is_zero() {
        return Err(StoreError::NonPositiveAssignment);
    }
    let row = sqlx::query("SELECT amount FROM deposits WHERE id = $1 FOR UPDATE")
        .bind(deposit_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(StoreError::UnknownDeposit(deposit_id))?;
    let deposit_amount: Decimal = row.get("amount");
    let assigned_row = sqlx::query(
        "SELECT COALESCE(SUM(amount), 0) AS assigned FROM deposit_assignment_events WHERE deposit_id = $1",
    )
    .bind(deposit_id)
    .fetch_one(&mut **tx)
    .await?;
    let assigned: Decimal = assigned_row.get("assigned");
    let remaining = deposit_amount - assigned;
    if amount.0 > remaining {
        return Err(StoreError::DepositOverAssign {
            deposit_id,
            amount: amount.to_string(),
            remaining: remaining.to_string(),
        });
    }
    sqlx::query("INSERT INTO deposit_assignment_events (deposit_id, amount, credited_vault) VALUES ($1, $2, $3)")
        .bind(deposit_id)
        .bind(amount.0)
        .bind(credited_vault)
        .execute(&mut **tx)
        .await?;
    if amount.0 == remaining {
        sqlx::query("UPDATE deposits SET assigned_at = now() WHERE id = $1")
            .bind(deposit_id)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

async fn find_remaining(
    pool: &PgPool,
    depositor: &str,
    token: &str,
    chain_id: u64,
    min: Option<Amount>,
    exclude: &[DepositId],
) -> Result<Option<RemainingDeposit>, StoreError> {
    let rows = sqlx::query(
        "SELECT d.id, d.amount - COALESCE(SUM(e.amount), 0) AS remaining
         FROM deposits d LEFT JOIN deposit_assignment_events e ON e.deposit_id = d.id
         WHERE LOWER(d.depositor) = LOWER($1) AND LOWER(d.token) = LOWER($2) AND d.chain_id = $3
         GROUP BY d.id ORDER BY d.id ASC",
    )
    .bind(depositor)
    .bind(token)
    .bind(Decimal::from_str(&chain_id.to_string()).unwrap_or(Decimal::ZERO))
    .fetch_all(pool)
    .await?;
    for row in rows {
        let id: DepositId = row.get("id");
        if exclude.contains(&id) {
            continue;
        }
        let remaining = Amount(row.get("remaining"));
        if remaining.is_zero() {
            continue;
        }
        if let Some(min) = min {
            if remaining < min {
                continue;
            }
        }
        return Ok(Some(RemainingDeposit {
            deposit_id: id,
            remaining,
        }));
    }
    Ok(None)
}

fn row_to_bundle(row: sqlx::postgres::PgRow) -> Bundle {
    let body_json: serde_json::Value = row.get("body");
    let body: BundleBody = serde_json::from_value(body_json).unwrap_or(BundleBody {
        bundle: vec![],
        nonce: row.get("nonce"),
    });
    Bundle {
        nonce: row.get("nonce"),
        proposer: row.get("proposer"),
        signature: row.get("signature"),
        cid: row.get("cid"),
        body,
    }
}

fn row_to_deposit(row: sqlx::postgres::PgRow) -> Deposit {
    Deposit {
        id: row.get("id"),
        tx_hash: row.get("tx_hash"),
        transfer_uid: row.get("transfer_uid"),
        chain_id: row
            .get::<Decimal, _>("chain_id")
            .to_string()
            .parse()
            .unwrap_or(0),
        depositor: row.get("depositor"),
        token: row.get("token"),
        amount: Amount(row.get("amount")),
        assigned_at: row
            .get::<Option<chrono::DateTime<chrono::Utc>>, _>("assigned_at")
            .map(|dt| crate::timestamp::UnixTimestamp(dt.timestamp())),
    }
}
