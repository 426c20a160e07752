use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous, SqliteRow}, Row};
use uuid::Uuid;

use crate::footprint::{EnergyMix, ModelSize, Settings};
use crate::session::{Message, Role, Session, SessionPatch, SessionTotals};

#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, title: String, settings: Settings) -> anyhow::Result<Session>;
    async fn get_session(&self, id: Uuid) -> anyhow::Result<Option<Session>>;
    // most recently updated first
    async fn list_sessions(&self) -> anyhow::Result<Vec<Session>>;
    async fn update_session(&self, id: Uuid, patch: SessionPatch) -> anyhow::Result<Option<Session>>;
    async fn update_title(&self, id: Uuid, title: &str) -> anyhow::Result<()>;
    // absolute overwrite; the caller computed the sums from its own snapshot
    async fn apply_metrics(&self, id: Uuid, totals: &SessionTotals) -> anyhow::Result<()>;
    async fn append_message(&self, msg: &Message) -> anyhow::Result<()>;
    // ascending creation time
    async fn list_messages(&self, session_id: Uuid) -> anyhow::Result<Vec<Message>>;
    async fn message_count(&self, session_id: Uuid) -> anyhow::Result<i64>;
    async fn delete_session(&self, id: Uuid) -> anyhow::Result<bool>;
}

impl SqliteStore {
    pub async fn initialize(database_url: &str) -> anyhow::Result<Self> {
        let options = database_url.parse::<SqliteConnectOptions>()?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            // cascade delete of messages relies on enforced foreign keys
            .foreign_keys(true);
        let pool = Pool::<Sqlite>::connect_with(options).await?;
        // busy_timeout via PRAGMA
        sqlx::query("PRAGMA busy_timeout = 5000;").execute(&pool).await?;
        // apply migrations
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn pool(&self) -> &Pool<Sqlite> { &self.pool }
}

fn parse_timestamp(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

fn session_from_row(r: &SqliteRow) -> Session {
    let id_str: String = r.get("id");
    let model_size: String = r.get("model_size");
    let energy_mix: String = r.get("energy_mix");
    Session {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::new_v4()),
        title: r.get("title"),
        created_at: parse_timestamp(r.get("created_at")),
        updated_at: parse_timestamp(r.get("updated_at")),
        total_tokens: r.get("total_tokens"),
        energy_wh: r.get("energy_wh"),
        carbon_gco2: r.get("carbon_gco2"),
        water_l: r.get("water_l"),
        model_size: ModelSize::parse_lossy(&model_size),
        energy_mix: EnergyMix::parse_lossy(&energy_mix),
        water_factor: r.get("water_factor"),
    }
}

fn message_from_row(r: &SqliteRow) -> Message {
    let id_str: String = r.get("id");
    let session_str: String = r.get("session_id");
    let role: String = r.get("role");
    Message {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::new_v4()),
        session_id: Uuid::parse_str(&session_str).unwrap_or_else(|_| Uuid::new_v4()),
        role: Role::try_from(role.as_str()).unwrap_or(Role::User),
        content: r.get("content"),
        input_tokens: r.get("input_tokens"),
        output_tokens: r.get("output_tokens"),
        created_at: parse_timestamp(r.get("created_at")),
    }
}

const SESSION_COLUMNS: &str = "id, title, created_at, updated_at, total_tokens, energy_wh, carbon_gco2, water_l, model_size, energy_mix, water_factor";

#[async_trait]
impl SessionStore for SqliteStore {
    async fn create_session(&self, title: String, settings: Settings) -> anyhow::Result<Session> {
        let session = Session::new(title, settings);
        sqlx::query("INSERT INTO chat_sessions (id, title, created_at, updated_at, total_tokens, energy_wh, carbon_gco2, water_l, model_size, energy_mix, water_factor) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)")
            .bind(session.id.to_string())
            .bind(&session.title)
            .bind(session.created_at.to_rfc3339())
            .bind(session.updated_at.to_rfc3339())
            .bind(session.total_tokens)
            .bind(session.energy_wh)
            .bind(session.carbon_gco2)
            .bind(session.water_l)
            .bind(session.model_size.as_str())
            .bind(session.energy_mix.as_str())
            .bind(session.water_factor)
            .execute(&self.pool).await?;
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> anyhow::Result<Option<Session>> {
        let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE id = ?1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| session_from_row(&r)))
    }

    async fn list_sessions(&self) -> anyhow::Result<Vec<Session>> {
        let rows = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM chat_sessions ORDER BY updated_at DESC"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(session_from_row).collect())
    }

    async fn update_session(&self, id: Uuid, patch: SessionPatch) -> anyhow::Result<Option<Session>> {
        let Some(mut session) = self.get_session(id).await? else { return Ok(None) };
        patch.apply(&mut session);
        session.updated_at = Utc::now();
        sqlx::query("UPDATE chat_sessions SET title = ?1, model_size = ?2, energy_mix = ?3, water_factor = ?4, updated_at = ?5 WHERE id = ?6")
            .bind(&session.title)
            .bind(session.model_size.as_str())
            .bind(session.energy_mix.as_str())
            .bind(session.water_factor)
            .bind(session.updated_at.to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool).await?;
        Ok(Some(session))
    }

    async fn update_title(&self, id: Uuid, title: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE chat_sessions SET title = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(title)
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn apply_metrics(&self, id: Uuid, totals: &SessionTotals) -> anyhow::Result<()> {
        sqlx::query("UPDATE chat_sessions SET total_tokens = ?1, energy_wh = ?2, carbon_gco2 = ?3, water_l = ?4, updated_at = ?5 WHERE id = ?6")
            .bind(totals.total_tokens)
            .bind(totals.energy_wh)
            .bind(totals.carbon_gco2)
            .bind(totals.water_l)
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn append_message(&self, msg: &Message) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO messages (id, session_id, role, content, input_tokens, output_tokens, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)")
            .bind(msg.id.to_string())
            .bind(msg.session_id.to_string())
            .bind(msg.role.as_str())
            .bind(&msg.content)
            .bind(msg.input_tokens)
            .bind(msg.output_tokens)
            .bind(msg.created_at.to_rfc3339())
            .execute(&self.pool).await?;
        // not atomic with the insert; a crash in between leaves updated_at stale
        sqlx::query("UPDATE chat_sessions SET updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now().to_rfc3339())
            .bind(msg.session_id.to_string())
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn list_messages(&self, session_id: Uuid) -> anyhow::Result<Vec<Message>> {
        let rows = sqlx::query("SELECT id, session_id, role, content, input_tokens, output_tokens, created_at FROM messages WHERE session_id = ?1 ORDER BY created_at ASC")
            .bind(session_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(message_from_row).collect())
    }

    async fn message_count(&self, session_id: Uuid) -> anyhow::Result<i64> {
        let row = sqlx::query("SELECT count(*) as c FROM messages WHERE session_id = ?1")
            .bind(session_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("c"))
    }

    async fn delete_session(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM chat_sessions WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}
