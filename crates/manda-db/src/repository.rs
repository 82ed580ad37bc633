use std::path::PathBuf;

use directories::ProjectDirs;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, QueryBuilder, Sqlite, SqlitePool};

use crate::error::{DbError, Result};
use crate::models::{
    Contact, CredentialRecord, CredentialStats, Instance, InstanceOverview, InstanceStatus,
    InstanceUpdate, Message, NewMessage, User,
};
use crate::schema::SCHEMA;

pub struct MandaDb {
    pool: Pool<Sqlite>,
}

impl MandaDb {
    pub async fn new() -> Result<Self> {
        let db_path = Self::default_db_path()?;

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Self::new_with_path(&db_path.display().to_string()).await?;
        tracing::info!("Database initialized at: {}", db_path.display());
        Ok(db)
    }

    pub async fn new_with_path(path: &str) -> Result<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", path);
        let pool = SqlitePool::connect(&db_url).await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// A private in-memory database. Pinned to one connection, since every
    /// SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub fn default_db_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("com.br", "manda", "manda").ok_or(DbError::NoDataDir)?;
        Ok(dirs.data_dir().join("manda.db"))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn create_user(&self, email: &str, name: Option<&str>) -> Result<User> {
        self.insert_user(email, name, None).await
    }

    /// Creates a user who can log in with a password. `password_hash` is the
    /// encoded hash, never the password itself.
    pub async fn create_user_with_password(
        &self,
        email: &str,
        name: Option<&str>,
        password_hash: &str,
    ) -> Result<User> {
        self.insert_user(email, name, Some(password_hash)).await
    }

    async fn insert_user(&self, email: &str, name: Option<&str>, password_hash: Option<&str>) -> Result<User> {
        let result = sqlx::query_as::<_, User>(
            "INSERT INTO users (id, email, name, password_hash, created_at)
             VALUES (?, ?, ?, ?, ?) RETURNING id, email, name, created_at",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(email)
        .bind(name)
        .bind(password_hash)
        .bind(now_millis())
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(user) => Ok(user),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(DbError::EmailTaken(email.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>> {
        Ok(
            sqlx::query_as::<_, User>("SELECT id, email, name, created_at FROM users WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(
            sqlx::query_as::<_, User>("SELECT id, email, name, created_at FROM users WHERE email = ?")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    /// The stored password hash, `None` for users created without one.
    pub async fn get_password_hash(&self, user_id: &str) -> Result<Option<String>> {
        let hash: Option<Option<String>> =
            sqlx::query_scalar("SELECT password_hash FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(hash.flatten())
    }

    pub async fn create_instance(&self, user_id: &str, name: &str) -> Result<Instance> {
        let now = now_millis();

        let instance = sqlx::query_as::<_, Instance>(
            "INSERT INTO instances (id, user_id, name, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(name)
        .bind(InstanceStatus::Disconnected)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(instance)
    }

    pub async fn get_instance(&self, id: &str) -> Result<Option<Instance>> {
        Ok(sqlx::query_as::<_, Instance>("SELECT * FROM instances WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn list_instances(&self, user_id: &str) -> Result<Vec<InstanceOverview>> {
        Ok(sqlx::query_as::<_, InstanceOverview>(
            r#"SELECT i.*,
                 (SELECT COUNT(*) FROM messages m WHERE m.instance_id = i.id) AS message_count,
                 (SELECT COUNT(*) FROM contacts c WHERE c.instance_id = i.id) AS contact_count
               FROM instances i
               WHERE i.user_id = ?
               ORDER BY i.created_at"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn list_instances_by_status(
        &self,
        statuses: &[InstanceStatus],
    ) -> Result<Vec<Instance>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM instances WHERE status IN (");
        let mut separated = query.separated(", ");
        for status in statuses {
            separated.push_bind(*status);
        }
        separated.push_unseparated(") ORDER BY created_at");

        Ok(query
            .build_query_as::<Instance>()
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn update_instance(&self, id: &str, update: InstanceUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }

        let mut query = QueryBuilder::<Sqlite>::new("UPDATE instances SET updated_at = ");
        query.push_bind(now_millis());

        if let Some(status) = update.status {
            query.push(", status = ").push_bind(status);
        }
        if let Some(phone_number) = update.phone_number {
            query.push(", phone_number = ").push_bind(phone_number);
        }
        if let Some(qr_code) = update.qr_code {
            query.push(", qr_code = ").push_bind(qr_code);
        }

        query.push(" WHERE id = ").push_bind(id);

        let result = query.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(DbError::InstanceNotFound(id.to_string()));
        }

        Ok(())
    }

    /// Another instance currently `connected` with the given phone number.
    pub async fn find_connected_by_phone(
        &self,
        phone_number: &str,
        excluding: &str,
    ) -> Result<Option<Instance>> {
        Ok(sqlx::query_as::<_, Instance>(
            "SELECT * FROM instances WHERE phone_number = ? AND status = ? AND id != ? LIMIT 1",
        )
        .bind(phone_number)
        .bind(InstanceStatus::Connected)
        .bind(excluding)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn delete_instance(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM instances WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_contact_by_jid(&self, instance_id: &str, jid: &str) -> Result<Option<Contact>> {
        Ok(sqlx::query_as::<_, Contact>(
            "SELECT * FROM contacts WHERE instance_id = ? AND jid = ?",
        )
        .bind(instance_id)
        .bind(jid)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn create_contact(
        &self,
        instance_id: &str,
        jid: &str,
        number: &str,
        name: Option<&str>,
    ) -> Result<Contact> {
        let now = now_millis();

        Ok(sqlx::query_as::<_, Contact>(
            r#"INSERT INTO contacts (instance_id, jid, name, number, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(instance_id, jid) DO UPDATE SET updated_at = updated_at
               RETURNING *"#,
        )
        .bind(instance_id)
        .bind(jid)
        .bind(name)
        .bind(number)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?)
    }

    /// Inserts the contact or refreshes its name and picture. Missing values
    /// never overwrite known ones.
    pub async fn upsert_contact(
        &self,
        instance_id: &str,
        jid: &str,
        name: Option<&str>,
        number: &str,
        profile_pic: Option<&str>,
    ) -> Result<Contact> {
        let now = now_millis();

        Ok(sqlx::query_as::<_, Contact>(
            r#"INSERT INTO contacts (instance_id, jid, name, number, profile_pic, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(instance_id, jid) DO UPDATE SET
                 name = COALESCE(excluded.name, name),
                 profile_pic = COALESCE(excluded.profile_pic, profile_pic),
                 updated_at = excluded.updated_at
               RETURNING *"#,
        )
        .bind(instance_id)
        .bind(jid)
        .bind(name)
        .bind(number)
        .bind(profile_pic)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn get_contacts(&self, instance_id: &str) -> Result<Vec<Contact>> {
        Ok(sqlx::query_as::<_, Contact>(
            "SELECT * FROM contacts WHERE instance_id = ? ORDER BY name, id",
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Returns `false` when a message with the same protocol id already exists.
    pub async fn insert_message(&self, message: &NewMessage) -> Result<bool> {
        let result = sqlx::query(
            r#"INSERT OR IGNORE INTO messages
               (instance_id, message_id, from_me, text, message_type, timestamp, status, contact_id, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&message.instance_id)
        .bind(&message.message_id)
        .bind(message.from_me)
        .bind(&message.text)
        .bind(&message.message_type)
        .bind(message.timestamp)
        .bind(&message.status)
        .bind(message.contact_id)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// One page of messages, oldest first. Pages start at 1.
    pub async fn get_messages(
        &self,
        instance_id: &str,
        page: i64,
        page_size: i64,
    ) -> Result<Vec<Message>> {
        let page_size = page_size.max(1);
        let offset = (page.max(1) - 1).saturating_mul(page_size);

        Ok(sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE instance_id = ? ORDER BY timestamp ASC, id ASC LIMIT ? OFFSET ?",
        )
        .bind(instance_id)
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn list_credentials(&self, instance_id: &str) -> Result<Vec<CredentialRecord>> {
        Ok(sqlx::query_as::<_, CredentialRecord>(
            "SELECT * FROM auth_sessions WHERE instance_id = ?",
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn get_credential(
        &self,
        instance_id: &str,
        key_id: &str,
    ) -> Result<Option<CredentialRecord>> {
        Ok(sqlx::query_as::<_, CredentialRecord>(
            "SELECT * FROM auth_sessions WHERE instance_id = ? AND key_id = ?",
        )
        .bind(instance_id)
        .bind(key_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn put_credential(&self, instance_id: &str, key_id: &str, key_data: &str) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO auth_sessions (instance_id, key_id, key_data, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(instance_id, key_id) DO UPDATE SET
                 key_data = excluded.key_data,
                 updated_at = excluded.updated_at"#,
        )
        .bind(instance_id)
        .bind(key_id)
        .bind(key_data)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns `false` if the record was already absent.
    pub async fn delete_credential(&self, instance_id: &str, key_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM auth_sessions WHERE instance_id = ? AND key_id = ?")
            .bind(instance_id)
            .bind(key_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn clear_credentials(&self, instance_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM auth_sessions WHERE instance_id = ?")
            .bind(instance_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn credential_stats(
        &self,
        instance_id: &str,
        identity_key_id: &str,
    ) -> Result<CredentialStats> {
        let (total_keys, has_credentials, last_updated): (i64, i64, Option<i64>) = sqlx::query_as(
            r#"SELECT COUNT(*),
                 COALESCE(MAX(CASE WHEN key_id = ? THEN 1 ELSE 0 END), 0),
                 MAX(updated_at)
               FROM auth_sessions WHERE instance_id = ?"#,
        )
        .bind(identity_key_id)
        .bind(instance_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(CredentialStats {
            total_keys,
            has_credentials: has_credentials > 0,
            last_updated,
        })
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
