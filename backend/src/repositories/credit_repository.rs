use diesel::prelude::*;
use crate::{
    db::{now_epoch, DbError, DbPool},
    models::credit_models::{ledger_balance, CreditTransaction, NewCreditTransaction, TransactionType},
    schema::{credit_transactions, user_profiles},
};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient credits: {available} available, {required} required")]
    InsufficientCredits { available: i64, required: i32 },
    #[error("Credit amount must be positive, got {0}")]
    InvalidAmount(i32),
    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<diesel::result::Error> for LedgerError {
    fn from(e: diesel::result::Error) -> Self {
        LedgerError::Db(DbError::Query(e))
    }
}

impl From<diesel::r2d2::PoolError> for LedgerError {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        LedgerError::Db(DbError::Pool(e))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseOutcome {
    Recorded { balance: i64 },
    /// The payment id was already credited; nothing was written.
    Duplicate,
}

/// Append-only credit ledger. Balances are always derived from the
/// transaction log; `user_profiles.credits_balance` is refreshed after every
/// write as a read cache.
pub struct CreditRepository {
    pool: DbPool
}

impl CreditRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn balance(&self, user_id: i32) -> Result<i64, DbError> {
        let mut conn = self.pool.get()?;
        Ok(balance_on(&mut conn, user_id)?)
    }

    pub fn transactions(&self, user_id: i32, limit: i64) -> Result<Vec<CreditTransaction>, DbError> {
        let mut conn = self.pool.get()?;
        let rows = credit_transactions::table
            .filter(credit_transactions::user_id.eq(user_id))
            .order((credit_transactions::created_at.desc(), credit_transactions::id.desc()))
            .limit(limit)
            .select(CreditTransaction::as_select())
            .load(&mut conn)?;
        Ok(rows)
    }

    /// Credits a completed payment once. A second call with the same
    /// `stripe_payment_id` is a no-op reported as `Duplicate`.
    pub fn record_purchase(
        &self,
        user_id: i32,
        credits: i32,
        stripe_payment_id: &str,
        description: Option<String>,
    ) -> Result<PurchaseOutcome, LedgerError> {
        if credits <= 0 {
            return Err(LedgerError::InvalidAmount(credits));
        }
        let mut conn = self.pool.get()?;
        conn.immediate_transaction::<_, LedgerError, _>(|conn| {
            let already_recorded: i64 = credit_transactions::table
                .filter(credit_transactions::stripe_payment_id.eq(stripe_payment_id))
                .count()
                .get_result(conn)?;
            if already_recorded > 0 {
                return Ok(PurchaseOutcome::Duplicate);
            }

            insert_on(conn, NewCreditTransaction {
                user_id,
                transaction_type: TransactionType::Purchase.to_string(),
                credits_amount: credits,
                stripe_payment_id: Some(stripe_payment_id.to_string()),
                campaign_id: None,
                description,
                created_at: now_epoch(),
            })?;
            let balance = refresh_cache_on(conn, user_id)?;
            Ok(PurchaseOutcome::Recorded { balance })
        })
    }

    /// Atomically checks the balance and writes a deduction. Returns the new balance.
    pub fn deduct(
        &self,
        user_id: i32,
        credits: i32,
        campaign_id: Option<i32>,
        description: Option<String>,
    ) -> Result<i64, LedgerError> {
        let mut conn = self.pool.get()?;
        conn.immediate_transaction::<_, LedgerError, _>(|conn| {
            deduct_on(conn, user_id, credits, campaign_id, description)
        })
    }

    pub fn refund(
        &self,
        user_id: i32,
        credits: i32,
        campaign_id: Option<i32>,
        description: Option<String>,
    ) -> Result<i64, LedgerError> {
        let mut conn = self.pool.get()?;
        conn.immediate_transaction::<_, LedgerError, _>(|conn| {
            refund_on(conn, user_id, credits, campaign_id, description)
        })
    }

    pub fn refresh_cached_balance(&self, user_id: i32) -> Result<i64, DbError> {
        let mut conn = self.pool.get()?;
        Ok(refresh_cache_on(&mut conn, user_id)?)
    }

    /// Recomputes every cached balance. Returns how many caches were stale.
    pub fn reconcile_all(&self) -> Result<usize, DbError> {
        let mut conn = self.pool.get()?;
        let cached: Vec<(i32, i32)> = user_profiles::table
            .select((user_profiles::user_id, user_profiles::credits_balance))
            .load(&mut conn)?;

        let mut corrected = 0;
        for (user_id, cached_balance) in cached {
            let actual = balance_on(&mut conn, user_id)?;
            if actual != cached_balance as i64 {
                tracing::warn!(
                    "Cached balance for user {} was {}, ledger says {}",
                    user_id, cached_balance, actual
                );
                refresh_cache_on(&mut conn, user_id)?;
                corrected += 1;
            }
        }
        Ok(corrected)
    }
}

pub(crate) fn balance_on(conn: &mut SqliteConnection, user_id: i32) -> QueryResult<i64> {
    let rows: Vec<(String, i32)> = credit_transactions::table
        .filter(credit_transactions::user_id.eq(user_id))
        .select((credit_transactions::transaction_type, credit_transactions::credits_amount))
        .load(conn)?;
    Ok(ledger_balance(rows.iter().map(|(kind, amount)| (kind.as_str(), *amount))))
}

/// Check-and-deduct. Callers must run this inside an immediate transaction
/// so the balance read and the insert are not interleaved with other writers.
pub(crate) fn deduct_on(
    conn: &mut SqliteConnection,
    user_id: i32,
    credits: i32,
    campaign_id: Option<i32>,
    description: Option<String>,
) -> Result<i64, LedgerError> {
    if credits <= 0 {
        return Err(LedgerError::InvalidAmount(credits));
    }
    let available = balance_on(conn, user_id)?;
    if available < credits as i64 {
        return Err(LedgerError::InsufficientCredits { available, required: credits });
    }
    insert_on(conn, NewCreditTransaction {
        user_id,
        transaction_type: TransactionType::Deduction.to_string(),
        credits_amount: credits,
        stripe_payment_id: None,
        campaign_id,
        description,
        created_at: now_epoch(),
    })?;
    Ok(refresh_cache_on(conn, user_id)?)
}

pub(crate) fn refund_on(
    conn: &mut SqliteConnection,
    user_id: i32,
    credits: i32,
    campaign_id: Option<i32>,
    description: Option<String>,
) -> Result<i64, LedgerError> {
    if credits <= 0 {
        return Err(LedgerError::InvalidAmount(credits));
    }
    insert_on(conn, NewCreditTransaction {
        user_id,
        transaction_type: TransactionType::Refund.to_string(),
        credits_amount: credits,
        stripe_payment_id: None,
        campaign_id,
        description,
        created_at: now_epoch(),
    })?;
    Ok(refresh_cache_on(conn, user_id)?)
}

fn insert_on(conn: &mut SqliteConnection, new_transaction: NewCreditTransaction) -> QueryResult<()> {
    diesel::insert_into(credit_transactions::table)
        .values(&new_transaction)
        .execute(conn)?;
    Ok(())
}

fn refresh_cache_on(conn: &mut SqliteConnection, user_id: i32) -> QueryResult<i64> {
    let balance = balance_on(conn, user_id)?;
    let cached = balance.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
    diesel::update(user_profiles::table.find(user_id))
        .set((
            user_profiles::credits_balance.eq(cached),
            user_profiles::updated_at.eq(now_epoch()),
        ))
        .execute(conn)?;
    Ok(balance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::repositories::user_repository::UserRepository;

    fn setup() -> (CreditRepository, UserRepository, i32) {
        let pool = test_pool();
        let users = UserRepository::new(pool.clone());
        let user = users.create_user("ledger@example.com", "hash", None, None).unwrap();
        (CreditRepository::new(pool), users, user.id)
    }

    #[test]
    fn balance_follows_signed_sum_of_transactions() {
        let (ledger, users, user_id) = setup();

        ledger.record_purchase(user_id, 500, "pi_1", None).unwrap();
        ledger.deduct(user_id, 120, None, None).unwrap();
        ledger.refund(user_id, 20, None, None).unwrap();
        ledger.record_purchase(user_id, 100, "pi_2", None).unwrap();
        ledger.deduct(user_id, 300, None, None).unwrap();

        assert_eq!(ledger.balance(user_id).unwrap(), 500 - 120 + 20 + 100 - 300);
        let profile = users.get_profile(user_id).unwrap().unwrap();
        assert_eq!(profile.credits_balance, 200);
        assert_eq!(ledger.transactions(user_id, 50).unwrap().len(), 5);
    }

    #[test]
    fn duplicate_payment_id_is_not_credited_twice() {
        let (ledger, _, user_id) = setup();

        let first = ledger.record_purchase(user_id, 250, "pi_same", None).unwrap();
        let second = ledger.record_purchase(user_id, 250, "pi_same", None).unwrap();

        assert_eq!(first, PurchaseOutcome::Recorded { balance: 250 });
        assert_eq!(second, PurchaseOutcome::Duplicate);
        assert_eq!(ledger.balance(user_id).unwrap(), 250);
    }

    #[test]
    fn deduction_never_overdraws() {
        let (ledger, _, user_id) = setup();
        ledger.record_purchase(user_id, 10, "pi_small", None).unwrap();

        let err = ledger.deduct(user_id, 11, None, None).unwrap_err();
        match err {
            LedgerError::InsufficientCredits { available, required } => {
                assert_eq!(available, 10);
                assert_eq!(required, 11);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(ledger.balance(user_id).unwrap(), 10);
        assert_eq!(ledger.deduct(user_id, 10, None, None).unwrap(), 0);
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let (ledger, _, user_id) = setup();
        assert!(matches!(ledger.refund(user_id, 0, None, None), Err(LedgerError::InvalidAmount(0))));
        assert!(matches!(
            ledger.record_purchase(user_id, -5, "pi_neg", None),
            Err(LedgerError::InvalidAmount(-5))
        ));
        assert!(ledger.transactions(user_id, 10).unwrap().is_empty());
    }

    #[test]
    fn reconcile_repairs_stale_cache() {
        let (ledger, users, user_id) = setup();
        ledger.record_purchase(user_id, 40, "pi_cache", None).unwrap();

        let mut conn = ledger.pool.get().unwrap();
        diesel::update(user_profiles::table.find(user_id))
            .set(user_profiles::credits_balance.eq(999))
            .execute(&mut conn)
            .unwrap();
        drop(conn);

        assert_eq!(ledger.reconcile_all().unwrap(), 1);
        assert_eq!(users.get_profile(user_id).unwrap().unwrap().credits_balance, 40);
        assert_eq!(ledger.reconcile_all().unwrap(), 0);
    }

    #[test]
    fn refresh_rewrites_one_cached_balance() {
        let (ledger, users, user_id) = setup();
        ledger.record_purchase(user_id, 75, "pi_refresh", None).unwrap();

        let mut conn = ledger.pool.get().unwrap();
        diesel::update(user_profiles::table.find(user_id))
            .set(user_profiles::credits_balance.eq(0))
            .execute(&mut conn)
            .unwrap();
        drop(conn);

        assert_eq!(ledger.refresh_cached_balance(user_id).unwrap(), 75);
        assert_eq!(users.get_profile(user_id).unwrap().unwrap().credits_balance, 75);
    }
}
