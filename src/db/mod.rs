pub mod models;

use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use self::models::{Template, User, UserSettings, WorkEntry};

#[derive(Debug, Clone)]
pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        // Each CREATE TABLE must be a separate query (Postgres doesn't allow
        // multiple commands in a single prepared statement).

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS users (
                id BIGINT PRIMARY KEY,
                username TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS work_entries (
                user_id BIGINT NOT NULL,
                work_date DATE NOT NULL,
                start_min INT NOT NULL,
                end_min INT NOT NULL,
                break_min INT NOT NULL DEFAULT 0,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (user_id, work_date)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS work_templates (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL,
                start_min INT NOT NULL,
                end_min INT NOT NULL,
                break_min INT NOT NULL DEFAULT 0,
                last_used_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (user_id, start_min, end_min, break_min)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS user_settings (
                user_id BIGINT PRIMARY KEY,
                baseline_date DATE NOT NULL,
                baseline_worked_min INT NOT NULL DEFAULT 0,
                reminder_minutes INT NOT NULL DEFAULT 0,
                timezone TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_templates_recency \
             ON work_templates(user_id, last_used_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ── User Operations ────────────────────────────────────────────

    pub async fn upsert_user(&self, user_id: i64, username: Option<&str>) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET username = COALESCE($2, users.username)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(username)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn get_user(&self, user_id: i64) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    // ── Settings Operations ────────────────────────────────────────

    /// Fetch the user's settings, creating the row with defaults on first
    /// access. `today` is the calendar date in the default zone.
    pub async fn get_or_create_settings(
        &self,
        user_id: i64,
        today: NaiveDate,
        default_tz: &str,
    ) -> anyhow::Result<UserSettings> {
        sqlx::query(
            r#"
            INSERT INTO user_settings (user_id, baseline_date, timezone)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(today)
        .bind(default_tz)
        .execute(&self.pool)
        .await?;

        let settings =
            sqlx::query_as::<_, UserSettings>("SELECT * FROM user_settings WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(settings)
    }

    pub async fn set_baseline(
        &self,
        user_id: i64,
        baseline_date: NaiveDate,
        worked_min: i32,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE user_settings \
             SET baseline_date = $2, baseline_worked_min = $3, updated_at = NOW() \
             WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(baseline_date)
        .bind(worked_min)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_reminder_minutes(&self, user_id: i64, minutes: i32) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE user_settings SET reminder_minutes = $2, updated_at = NOW() WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(minutes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_timezone(&self, user_id: i64, timezone: &str) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE user_settings SET timezone = $2, updated_at = NOW() WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(timezone)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Every user whose weekly reminder must be re-scheduled at startup.
    pub async fn list_reminder_settings(&self) -> anyhow::Result<Vec<UserSettings>> {
        let rows = sqlx::query_as::<_, UserSettings>(
            "SELECT * FROM user_settings WHERE reminder_minutes > 0",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ── Ledger Operations ──────────────────────────────────────────

    pub async fn upsert_entry(
        &self,
        user_id: i64,
        work_date: NaiveDate,
        start_min: i32,
        end_min: i32,
        break_min: i32,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO work_entries (user_id, work_date, start_min, end_min, break_min, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (user_id, work_date) DO UPDATE SET
                start_min = EXCLUDED.start_min,
                end_min = EXCLUDED.end_min,
                break_min = EXCLUDED.break_min,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user_id)
        .bind(work_date)
        .bind(start_min)
        .bind(end_min)
        .bind(break_min)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Deleting a day that has no entry is a valid no-op.
    pub async fn delete_entry(&self, user_id: i64, work_date: NaiveDate) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM work_entries WHERE user_id = $1 AND work_date = $2")
            .bind(user_id)
            .bind(work_date)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn fetch_range(
        &self,
        user_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> anyhow::Result<Vec<WorkEntry>> {
        let entries = sqlx::query_as::<_, WorkEntry>(
            "SELECT user_id, work_date, start_min, end_min, break_min \
             FROM work_entries \
             WHERE user_id = $1 AND work_date BETWEEN $2 AND $3 \
             ORDER BY work_date ASC",
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    // ── Template Operations ────────────────────────────────────────

    /// Insert or refresh a triple's recency, then trim the user to the four
    /// most recently used. Both statements run in one transaction.
    pub async fn touch_template(
        &self,
        user_id: i64,
        start_min: i32,
        end_min: i32,
        break_min: i32,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO work_templates (user_id, start_min, end_min, break_min, last_used_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (user_id, start_min, end_min, break_min)
                DO UPDATE SET last_used_at = EXCLUDED.last_used_at
            "#,
        )
        .bind(user_id)
        .bind(start_min)
        .bind(end_min)
        .bind(break_min)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM work_templates
            WHERE user_id = $1 AND id NOT IN (
                SELECT id FROM work_templates
                WHERE user_id = $1
                ORDER BY last_used_at DESC, id DESC
                LIMIT 4
            )
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_templates(&self, user_id: i64) -> anyhow::Result<Vec<Template>> {
        let templates = sqlx::query_as::<_, Template>(
            "SELECT start_min, end_min, break_min \
             FROM work_templates \
             WHERE user_id = $1 \
             ORDER BY last_used_at DESC, id DESC \
             LIMIT 4",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(templates)
    }
}

#[cfg(test)]
mod tests {
    //! Storage tests against a live Postgres. Run with a scratch database:
    //! `DATABASE_URL=postgres://... cargo test -- --ignored`

    use super::*;

    async fn test_db() -> Database {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL for storage tests");
        let db = Database::connect(&url).await.expect("connect");
        db.run_migrations().await.expect("migrations");
        db
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    #[ignore = "requires a running Postgres"]
    async fn upsert_is_last_write_wins() {
        let db = test_db().await;
        let user = 900_001;
        let day = date(2030, 5, 6);
        db.delete_entry(user, day).await.unwrap();

        db.upsert_entry(user, day, 540, 1020, 60).await.unwrap();
        db.upsert_entry(user, day, 480, 960, 0).await.unwrap();

        let rows = db.fetch_range(user, day, day).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            (rows[0].start_min, rows[0].end_min, rows[0].break_min),
            (480, 960, 0)
        );

        db.delete_entry(user, day).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Postgres"]
    async fn delete_absent_entry_is_a_noop() {
        let db = test_db().await;
        let user = 900_002;
        let day = date(2030, 5, 7);
        db.delete_entry(user, day).await.unwrap();
        db.delete_entry(user, day).await.unwrap();
        assert!(db.fetch_range(user, day, day).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires a running Postgres"]
    async fn fifth_template_evicts_the_least_recent() {
        let db = test_db().await;
        let user = 900_003;
        sqlx::query("DELETE FROM work_templates WHERE user_id = $1")
            .bind(user)
            .execute(&db.pool)
            .await
            .unwrap();

        for i in 0..5 {
            db.touch_template(user, 480 + i, 1020, 30).await.unwrap();
        }

        let templates = db.list_templates(user).await.unwrap();
        assert_eq!(templates.len(), 4);
        // the first triple touched (480) is gone; the newest leads
        assert!(templates.iter().all(|t| t.start_min != 480));
        assert_eq!(templates[0].start_min, 484);
    }

    #[tokio::test]
    #[ignore = "requires a running Postgres"]
    async fn range_fetch_is_ascending_and_inclusive() {
        let db = test_db().await;
        let user = 900_004;
        for d in [date(2030, 6, 3), date(2030, 6, 1), date(2030, 6, 2)] {
            db.upsert_entry(user, d, 540, 1020, 0).await.unwrap();
        }

        let rows = db
            .fetch_range(user, date(2030, 6, 1), date(2030, 6, 3))
            .await
            .unwrap();
        let dates: Vec<NaiveDate> = rows.iter().map(|r| r.work_date).collect();
        assert_eq!(
            dates,
            vec![date(2030, 6, 1), date(2030, 6, 2), date(2030, 6, 3)]
        );

        for d in dates {
            db.delete_entry(user, d).await.unwrap();
        }
    }

    #[tokio::test]
    #[ignore = "requires a running Postgres"]
    async fn settings_are_lazily_created_then_updated() {
        let db = test_db().await;
        let user = 900_005;
        sqlx::query("DELETE FROM user_settings WHERE user_id = $1")
            .bind(user)
            .execute(&db.pool)
            .await
            .unwrap();

        let today = date(2030, 7, 1);
        let created = db
            .get_or_create_settings(user, today, "Europe/Warsaw")
            .await
            .unwrap();
        assert_eq!(created.baseline_date, today);
        assert_eq!(created.baseline_worked_min, 0);
        assert_eq!(created.reminder_minutes, 0);
        assert_eq!(created.timezone, "Europe/Warsaw");

        db.set_baseline(user, date(2025, 10, 25), 56 * 60 + 30)
            .await
            .unwrap();
        db.set_reminder_minutes(user, 540).await.unwrap();

        let updated = db
            .get_or_create_settings(user, today, "Europe/Warsaw")
            .await
            .unwrap();
        assert_eq!(updated.baseline_date, date(2025, 10, 25));
        assert_eq!(updated.baseline_worked_min, 3390);
        assert_eq!(updated.reminder_minutes, 540);

        let with_reminders = db.list_reminder_settings().await.unwrap();
        assert!(with_reminders.iter().any(|s| s.user_id == user));
    }
}
