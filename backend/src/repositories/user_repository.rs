use diesel::prelude::*;
use crate::{
    db::{now_epoch, DbError, DbPool},
    models::user_models::{NewUser, NewUserProfile, User, UserProfile},
    schema::{user_profiles, users},
};

pub struct UserRepository {
    pool: DbPool
}

impl UserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    // Check if an email is already registered
    pub fn email_exists(&self, search_email: &str) -> Result<bool, DbError> {
        let mut conn = self.pool.get()?;
        let count: i64 = users::table
            .filter(users::email.eq(search_email))
            .count()
            .get_result(&mut conn)?;
        Ok(count > 0)
    }

    // Create a user together with an empty profile row
    pub fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        full_name: Option<String>,
        company_name: Option<String>,
    ) -> Result<User, DbError> {
        let mut conn = self.pool.get()?;
        let now = now_epoch();
        let user = conn.transaction::<User, diesel::result::Error, _>(|conn| {
            let user = diesel::insert_into(users::table)
                .values(&NewUser {
                    email: email.to_string(),
                    password_hash: password_hash.to_string(),
                    created_at: now,
                })
                .returning(User::as_returning())
                .get_result(conn)?;

            diesel::insert_into(user_profiles::table)
                .values(&NewUserProfile {
                    user_id: user.id,
                    full_name,
                    company_name,
                    credits_balance: 0,
                    updated_at: now,
                })
                .execute(conn)?;
            Ok(user)
        })?;
        Ok(user)
    }

    pub fn find_by_email(&self, search_email: &str) -> Result<Option<User>, DbError> {
        let mut conn = self.pool.get()?;
        let user = users::table
            .filter(users::email.eq(search_email))
            .select(User::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(user)
    }

    pub fn find_by_id(&self, user_id: i32) -> Result<Option<User>, DbError> {
        let mut conn = self.pool.get()?;
        let user = users::table
            .find(user_id)
            .select(User::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(user)
    }

    pub fn get_profile(&self, user_id: i32) -> Result<Option<UserProfile>, DbError> {
        let mut conn = self.pool.get()?;
        let profile = user_profiles::table
            .find(user_id)
            .select(UserProfile::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(profile)
    }

    pub fn get_stripe_customer_id(&self, user_id: i32) -> Result<Option<String>, DbError> {
        let mut conn = self.pool.get()?;
        let customer_id = user_profiles::table
            .find(user_id)
            .select(user_profiles::stripe_customer_id)
            .first::<Option<String>>(&mut conn)
            .optional()?;
        Ok(customer_id.flatten())
    }

    pub fn set_stripe_customer_id(&self, user_id: i32, customer_id: &str) -> Result<(), DbError> {
        let mut conn = self.pool.get()?;
        diesel::update(user_profiles::table.find(user_id))
            .set((
                user_profiles::stripe_customer_id.eq(customer_id),
                user_profiles::updated_at.eq(now_epoch()),
            ))
            .execute(&mut conn)?;
        Ok(())
    }
}
