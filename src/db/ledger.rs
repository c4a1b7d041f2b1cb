use async_trait::async_trait;
use sqlx::{PgPool, Pool, Postgres};
use tracing::instrument;

use crate::db::PgError;
use crate::db::models::account::{Account, CommunityId, House, HouseStanding, MemberId};
use crate::db::models::award::{AwardKey, TakenAward};

pub type LedgerResult<T> = core::result::Result<T, PgError>;

/// The durable point ledger. Every mutation goes through these primitives;
/// point totals are never cached in-process.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Creates the (community, member) account row if it does not exist yet.
    async fn upsert_account(
        &self,
        community: &CommunityId,
        member: &MemberId,
    ) -> LedgerResult<()>;

    /// Applies a signed delta to the target account and appends the audit
    /// record, returning the new cumulative total.
    async fn add_delta(
        &self,
        community: &CommunityId,
        target: &MemberId,
        source: &MemberId,
        delta: i64,
        reason: &str,
    ) -> LedgerResult<i64>;

    /// Overwrites the member's classification. Re-classification replaces,
    /// never accumulates.
    async fn set_classification(
        &self,
        community: &CommunityId,
        member: &MemberId,
        house: House,
    ) -> LedgerResult<()>;

    /// Atomic insert-if-absent on the award key. `false` means the key was
    /// already present (duplicate delivery) and nothing was written.
    async fn try_record_award(
        &self,
        key: &AwardKey,
        target: &MemberId,
        delta: i64,
    ) -> LedgerResult<bool>;

    /// Atomically deletes the award under `key`, returning its recorded delta
    /// and target. `None` means no outstanding award exists for the key.
    async fn take_award(&self, key: &AwardKey) -> LedgerResult<Option<TakenAward>>;

    async fn get_account(
        &self,
        community: &CommunityId,
        member: &MemberId,
    ) -> LedgerResult<Option<Account>>;

    async fn leaderboard(&self, community: &CommunityId, limit: i64)
    -> LedgerResult<Vec<Account>>;

    async fn house_totals(&self, community: &CommunityId) -> LedgerResult<Vec<HouseStanding>>;
}

#[derive(Debug)]
pub struct PgLedger {
    pool: &'static Pool<Postgres>,
}

impl PgLedger {
    pub fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Applies the schema idempotently. Run once at startup.
    #[instrument(skip(pool))]
    pub async fn migrate(pool: &PgPool) -> LedgerResult<()> {
        sqlx::raw_sql(include_str!("schema.sql")).execute(pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Ledger for PgLedger {
    #[instrument(skip(self))]
    async fn upsert_account(
        &self,
        community: &CommunityId,
        member: &MemberId,
    ) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO account (community_id, member_id, points, created_at, updated_at)
            VALUES ($1, $2, 0, NOW(), NOW())
            ON CONFLICT (community_id, member_id)
            DO NOTHING
            "#,
        )
        .bind(community)
        .bind(member)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, reason))]
    async fn add_delta(
        &self,
        community: &CommunityId,
        target: &MemberId,
        source: &MemberId,
        delta: i64,
        reason: &str,
    ) -> LedgerResult<i64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO account (community_id, member_id, points, created_at, updated_at)
            VALUES ($1, $2, 0, NOW(), NOW())
            ON CONFLICT (community_id, member_id)
            DO NOTHING
            "#,
        )
        .bind(community)
        .bind(target)
        .execute(&mut *tx)
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            UPDATE account
            SET points = points + $3,
                updated_at = NOW()
            WHERE community_id = $1 AND member_id = $2
            RETURNING points
            "#,
        )
        .bind(community)
        .bind(target)
        .bind(delta)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO point_delta (community_id, target_id, source_id, delta, reason, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            "#,
        )
        .bind(community)
        .bind(target)
        .bind(source)
        .bind(delta)
        .bind(reason)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(total)
    }

    #[instrument(skip(self))]
    async fn set_classification(
        &self,
        community: &CommunityId,
        member: &MemberId,
        house: House,
    ) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO account (community_id, member_id, house, points, sorted_at, created_at, updated_at)
            VALUES ($1, $2, $3, 0, NOW(), NOW(), NOW())
            ON CONFLICT (community_id, member_id)
            DO UPDATE SET
                house = EXCLUDED.house,
                sorted_at = EXCLUDED.sorted_at,
                updated_at = NOW()
            "#,
        )
        .bind(community)
        .bind(member)
        .bind(house.as_str())
        .execute(self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn try_record_award(
        &self,
        key: &AwardKey,
        target: &MemberId,
        delta: i64,
    ) -> LedgerResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO reaction_award
                (community_id, message_id, reactor_id, emoji, target_id, delta, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (community_id, message_id, reactor_id, emoji)
            DO NOTHING
            "#,
        )
        .bind(&key.community)
        .bind(&key.message)
        .bind(&key.reactor)
        .bind(&key.emoji)
        .bind(target)
        .bind(delta)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn take_award(&self, key: &AwardKey) -> LedgerResult<Option<TakenAward>> {
        Ok(sqlx::query_as::<_, TakenAward>(
            r#"
            DELETE FROM reaction_award
            WHERE community_id = $1 AND message_id = $2 AND reactor_id = $3 AND emoji = $4
            RETURNING delta, target_id
            "#,
        )
        .bind(&key.community)
        .bind(&key.message)
        .bind(&key.reactor)
        .bind(&key.emoji)
        .fetch_optional(self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn get_account(
        &self,
        community: &CommunityId,
        member: &MemberId,
    ) -> LedgerResult<Option<Account>> {
        Ok(sqlx::query_as::<_, Account>(
            r#"
            SELECT community_id, member_id, house, points, sorted_at, created_at, updated_at
            FROM account
            WHERE community_id = $1 AND member_id = $2
            "#,
        )
        .bind(community)
        .bind(member)
        .fetch_optional(self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn leaderboard(
        &self,
        community: &CommunityId,
        limit: i64,
    ) -> LedgerResult<Vec<Account>> {
        Ok(sqlx::query_as::<_, Account>(
            r#"
            SELECT community_id, member_id, house, points, sorted_at, created_at, updated_at
            FROM account
            WHERE community_id = $1
            ORDER BY points DESC, created_at ASC
            LIMIT $2
            "#,
        )
        .bind(community)
        .bind(limit)
        .fetch_all(self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn house_totals(&self, community: &CommunityId) -> LedgerResult<Vec<HouseStanding>> {
        Ok(sqlx::query_as::<_, HouseStanding>(
            r#"
            SELECT house, COALESCE(SUM(points), 0) AS total
            FROM account
            WHERE community_id = $1 AND house IS NOT NULL
            GROUP BY house
            ORDER BY total DESC
            "#,
        )
        .bind(community)
        .fetch_all(self.pool)
        .await?)
    }
}
