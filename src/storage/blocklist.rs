use anyhow::Result;

use super::schema::Database;
use super::types::{BlockedDomain, DatabaseError};
use crate::util::Plan;

impl Database {
    // ========================================================================
    // Blocklist Operations
    // ========================================================================

    /// Load every blocklist pattern.
    ///
    /// A database without the `blocked_domains` table (not provisioned yet)
    /// yields an empty list with a warning rather than an error.
    pub async fn get_blocked_domains(&self) -> Result<Vec<BlockedDomain>, DatabaseError> {
        match sqlx::query_as::<_, BlockedDomain>("SELECT domain, reason FROM blocked_domains")
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => Ok(rows),
            Err(e) if DatabaseError::is_missing_table(&e) => {
                tracing::warn!("Blocklist table not provisioned, treating blocklist as empty");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Add or replace a blocklist pattern.
    pub async fn block_domain(&self, pattern: &str, reason: Option<&str>) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO blocked_domains (domain, reason, created_at) VALUES (?, ?, ?)
             ON CONFLICT(domain) DO UPDATE SET reason = excluded.reason",
        )
        .bind(pattern.trim().to_ascii_lowercase())
        .bind(reason)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn unblock_domain(&self, pattern: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM blocked_domains WHERE domain = ?")
            .bind(pattern.trim().to_ascii_lowercase())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Subscriber Plan Lookups
    // ========================================================================

    pub async fn add_user(&self, plan: Plan) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("INSERT INTO users (plan) VALUES (?) RETURNING id")
            .bind(plan.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    pub async fn subscribe(&self, user_id: i64, source_id: i64) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO subscriptions (user_id, source_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Distinct plans held by the subscribers of a source.
    pub async fn subscriber_plans(&self, source_id: i64) -> Result<Vec<Plan>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT u.plan FROM subscriptions s
             JOIN users u ON u.id = s.user_id
             WHERE s.source_id = ?",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;

        let plans = rows
            .into_iter()
            .filter_map(|(plan,)| match plan.parse::<Plan>() {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::warn!(source_id, error = %e, "Ignoring unknown subscriber plan");
                    None
                }
            })
            .collect();
        Ok(plans)
    }

    /// Whether any subscriber of the source holds a plan that bypasses the blocklist.
    pub async fn has_elevated_subscriber(&self, source_id: i64) -> Result<bool> {
        let plans = self.subscriber_plans(source_id).await?;
        Ok(plans.iter().any(Plan::bypasses_blocklist))
    }
}
