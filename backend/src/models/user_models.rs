use diesel::prelude::*;
use serde::Serialize;
use crate::schema::users;
use crate::schema::user_profiles;

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct User {
    pub id: i32,
    pub email: String,
    pub password_hash: String,
    pub created_at: i32, // epoch seconds
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub created_at: i32,
}

#[derive(Queryable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = user_profiles)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UserProfile {
    pub user_id: i32,
    pub full_name: Option<String>,
    pub company_name: Option<String>,
    pub credits_balance: i32, // cache of the ledger sum, the ledger is authoritative
    #[serde(skip_serializing)]
    pub stripe_customer_id: Option<String>,
    pub updated_at: i32,
}

#[derive(Insertable)]
#[diesel(table_name = user_profiles)]
pub struct NewUserProfile {
    pub user_id: i32,
    pub full_name: Option<String>,
    pub company_name: Option<String>,
    pub credits_balance: i32,
    pub updated_at: i32,
}
