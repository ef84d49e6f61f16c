use diesel::prelude::*;
use crate::{
    db::{now_epoch, DbError, DbPool},
    models::meeting_models::{GoogleCalendarTokens, NewGoogleCalendar},
    schema::google_calendar,
    utils::encryption::{EncryptionError, TokenCipher},
};

#[derive(Debug, thiserror::Error)]
pub enum CalendarTokenError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("failed to decrypt tokens: {0}")]
    Encryption(#[from] EncryptionError),
}

/// Google Calendar OAuth tokens, encrypted at rest.
pub struct CalendarRepository {
    pool: DbPool,
    cipher: TokenCipher,
}

impl CalendarRepository {
    pub fn new(pool: DbPool, cipher: TokenCipher) -> Self {
        Self { pool, cipher }
    }

    pub fn has_active_google_calendar(&self, user_id: i32) -> Result<bool, DbError> {
        let mut conn = self.pool.get()?;
        let count: i64 = google_calendar::table
            .filter(google_calendar::user_id.eq(user_id))
            .filter(google_calendar::status.eq("active"))
            .count()
            .get_result(&mut conn)?;
        Ok(count > 0)
    }

    /// Stores a fresh connection, replacing any earlier one for the user.
    pub fn create_google_calendar_connection(
        &self,
        user_id: i32,
        access_token: &str,
        refresh_token: &str,
        expires_in: i32,
    ) -> Result<(), CalendarTokenError> {
        let encrypted_access_token = self.cipher.encrypt(access_token)?;
        let encrypted_refresh_token = self.cipher.encrypt(refresh_token)?;
        let now = now_epoch();

        let mut conn = self.pool.get().map_err(DbError::from)?;
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            diesel::delete(google_calendar::table.filter(google_calendar::user_id.eq(user_id)))
                .execute(conn)?;
            diesel::insert_into(google_calendar::table)
                .values(&NewGoogleCalendar {
                    user_id,
                    encrypted_access_token,
                    encrypted_refresh_token,
                    status: "active".to_string(),
                    expires_in,
                    last_update: now,
                    created_on: now,
                })
                .execute(conn)?;
            Ok(())
        })
        .map_err(DbError::from)?;
        Ok(())
    }

    /// Decrypted `(access_token, refresh_token)` of the active connection.
    pub fn get_google_calendar_tokens(&self, user_id: i32) -> Result<Option<(String, String)>, CalendarTokenError> {
        let mut conn = self.pool.get().map_err(DbError::from)?;
        let connection = google_calendar::table
            .filter(google_calendar::user_id.eq(user_id))
            .filter(google_calendar::status.eq("active"))
            .select(GoogleCalendarTokens::as_select())
            .first(&mut conn)
            .optional()
            .map_err(DbError::from)?;

        match connection {
            Some(connection) => {
                let access = self.cipher.decrypt(&connection.encrypted_access_token)?;
                let refresh = self.cipher.decrypt(&connection.encrypted_refresh_token)?;
                Ok(Some((access, refresh)))
            }
            None => Ok(None),
        }
    }

    pub fn update_google_calendar_access_token(
        &self,
        user_id: i32,
        access_token: &str,
        expires_in: i32,
    ) -> Result<(), CalendarTokenError> {
        let encrypted = self.cipher.encrypt(access_token)?;
        let mut conn = self.pool.get().map_err(DbError::from)?;
        diesel::update(google_calendar::table.filter(google_calendar::user_id.eq(user_id)))
            .set((
                google_calendar::encrypted_access_token.eq(encrypted),
                google_calendar::expires_in.eq(expires_in),
                google_calendar::last_update.eq(now_epoch()),
            ))
            .execute(&mut conn)
            .map_err(DbError::from)?;
        Ok(())
    }

    pub fn delete_google_calendar_connection(&self, user_id: i32) -> Result<bool, DbError> {
        let mut conn = self.pool.get()?;
        let deleted = diesel::delete(google_calendar::table.filter(google_calendar::user_id.eq(user_id)))
            .execute(&mut conn)?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::repositories::user_repository::UserRepository;

    fn repo() -> (CalendarRepository, i32, DbPool) {
        let pool = test_pool();
        let user = UserRepository::new(pool.clone())
            .create_user("cal@example.com", "hash", None, None)
            .unwrap();
        let cipher = TokenCipher::from_base64_key(&crate::config::AppConfig::for_tests().encryption_key).unwrap();
        (CalendarRepository::new(pool.clone(), cipher), user.id, pool)
    }

    #[test]
    fn tokens_are_stored_encrypted() {
        let (repo, user_id, pool) = repo();
        repo.create_google_calendar_connection(user_id, "access-abc", "refresh-xyz", 3600).unwrap();

        let mut conn = pool.get().unwrap();
        let stored: String = google_calendar::table
            .filter(google_calendar::user_id.eq(user_id))
            .select(google_calendar::encrypted_access_token)
            .first(&mut conn)
            .unwrap();
        drop(conn);
        assert_ne!(stored, "access-abc");

        let (access, refresh) = repo.get_google_calendar_tokens(user_id).unwrap().unwrap();
        assert_eq!(access, "access-abc");
        assert_eq!(refresh, "refresh-xyz");
    }

    #[test]
    fn reconnect_replaces_previous_connection() {
        let (repo, user_id, _) = repo();
        repo.create_google_calendar_connection(user_id, "a1", "r1", 3600).unwrap();
        repo.create_google_calendar_connection(user_id, "a2", "r2", 3600).unwrap();
        repo.update_google_calendar_access_token(user_id, "a3", 1800).unwrap();

        let (access, refresh) = repo.get_google_calendar_tokens(user_id).unwrap().unwrap();
        assert_eq!((access.as_str(), refresh.as_str()), ("a3", "r2"));
        assert!(repo.has_active_google_calendar(user_id).unwrap());

        assert!(repo.delete_google_calendar_connection(user_id).unwrap());
        assert!(!repo.has_active_google_calendar(user_id).unwrap());
        assert!(repo.get_google_calendar_tokens(user_id).unwrap().is_none());
    }
}
