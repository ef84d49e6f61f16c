use diesel::prelude::*;
use crate::{
    db::{now_epoch, DbError, DbPool},
    models::campaign_models::{Campaign, CampaignChanges, CampaignStatus, NewCampaign},
    models::lead_models::NewLead,
    repositories::credit_repository::{deduct_on, refund_on, LedgerError},
    schema::{campaigns, linkedin_leads},
    utils::usage::charge_for,
};

/// Result of trying to move a campaign into `enriching`.
#[derive(Debug)]
pub enum LaunchStart {
    /// The campaign is now `enriching` and holds its credit reservation.
    Reserved(Campaign),
    /// Not enough credits for the reservation; the campaign was marked `failed`.
    InsufficientCredits { available: i64, required: i32 },
    /// The campaign was not in the expected status (someone else moved it first).
    NotLaunchable,
}

pub struct CampaignRepository {
    pool: DbPool
}

impl CampaignRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn create(&self, new_campaign: NewCampaign) -> Result<Campaign, DbError> {
        let mut conn = self.pool.get()?;
        let campaign = diesel::insert_into(campaigns::table)
            .values(&new_campaign)
            .returning(Campaign::as_returning())
            .get_result(&mut conn)?;
        Ok(campaign)
    }

    pub fn list_for_user(&self, user_id: i32) -> Result<Vec<Campaign>, DbError> {
        let mut conn = self.pool.get()?;
        let rows = campaigns::table
            .filter(campaigns::user_id.eq(user_id))
            .order(campaigns::created_at.desc())
            .select(Campaign::as_select())
            .load(&mut conn)?;
        Ok(rows)
    }

    // Only returns the campaign if it belongs to the user
    pub fn find_for_user(&self, campaign_id: i32, user_id: i32) -> Result<Option<Campaign>, DbError> {
        let mut conn = self.pool.get()?;
        let campaign = campaigns::table
            .filter(campaigns::id.eq(campaign_id))
            .filter(campaigns::user_id.eq(user_id))
            .select(Campaign::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(campaign)
    }

    pub fn find_by_id(&self, campaign_id: i32) -> Result<Option<Campaign>, DbError> {
        let mut conn = self.pool.get()?;
        let campaign = campaigns::table
            .find(campaign_id)
            .select(Campaign::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(campaign)
    }

    /// Applies `changes` only while the campaign is still in an editable
    /// status. `None` when the row is missing or has moved on.
    pub fn update(&self, campaign_id: i32, user_id: i32, changes: CampaignChanges) -> Result<Option<Campaign>, DbError> {
        let editable: Vec<&str> = CampaignStatus::ALL
            .into_iter()
            .filter(|s| s.is_editable())
            .map(|s| s.as_str())
            .collect();
        let mut conn = self.pool.get()?;
        let campaign = diesel::update(
            campaigns::table
                .filter(campaigns::id.eq(campaign_id))
                .filter(campaigns::user_id.eq(user_id))
                .filter(campaigns::status.eq_any(editable)),
        )
        .set(&changes)
        .returning(Campaign::as_returning())
        .get_result(&mut conn)
        .optional()?;
        Ok(campaign)
    }

    /// Deletes the campaign with its leads, notes and meetings (cascade).
    /// Campaigns in `enriching` are left alone. Returns whether a row was removed.
    pub fn delete(&self, campaign_id: i32, user_id: i32) -> Result<bool, DbError> {
        let mut conn = self.pool.get()?;
        let deleted = diesel::delete(
            campaigns::table
                .filter(campaigns::id.eq(campaign_id))
                .filter(campaigns::user_id.eq(user_id))
                .filter(campaigns::status.ne(CampaignStatus::Enriching.as_str())),
        )
        .execute(&mut conn)?;
        Ok(deleted > 0)
    }

    /// Compare-and-set status change. Returns false when the transition is not
    /// allowed or the campaign was no longer in `from`.
    pub fn transition(&self, campaign_id: i32, from: CampaignStatus, to: CampaignStatus) -> Result<bool, DbError> {
        if !from.can_transition_to(to) {
            return Ok(false);
        }
        let mut conn = self.pool.get()?;
        let updated = diesel::update(
            campaigns::table
                .filter(campaigns::id.eq(campaign_id))
                .filter(campaigns::status.eq(from.as_str())),
        )
        .set((
            campaigns::status.eq(to.as_str()),
            campaigns::updated_at.eq(now_epoch()),
        ))
        .execute(&mut conn)?;
        Ok(updated == 1)
    }

    /// Moves a `draft`/`failed` campaign into `enriching` and reserves
    /// `credits` for it in the same transaction.
    pub fn begin_enrichment(
        &self,
        campaign: &Campaign,
        from: CampaignStatus,
        credits: i32,
    ) -> Result<LaunchStart, LedgerError> {
        if !from.can_transition_to(CampaignStatus::Enriching) {
            return Ok(LaunchStart::NotLaunchable);
        }
        let mut conn = self.pool.get()?;
        conn.immediate_transaction::<_, LedgerError, _>(|conn| {
            let now = now_epoch();
            let moved = diesel::update(
                campaigns::table
                    .filter(campaigns::id.eq(campaign.id))
                    .filter(campaigns::status.eq(from.as_str())),
            )
            .set((
                campaigns::status.eq(CampaignStatus::Enriching.as_str()),
                campaigns::last_error.eq(None::<String>),
                campaigns::retryable.eq(false),
                campaigns::updated_at.eq(now),
            ))
            .execute(conn)?;
            if moved != 1 {
                return Ok(LaunchStart::NotLaunchable);
            }

            let reservation = deduct_on(
                conn,
                campaign.user_id,
                credits,
                Some(campaign.id),
                Some(format!("Lead search reservation for campaign {}", campaign.id)),
            );
            match reservation {
                Ok(_) => {
                    let reserved = diesel::update(campaigns::table.find(campaign.id))
                        .set(campaigns::credits_reserved.eq(credits))
                        .returning(Campaign::as_returning())
                        .get_result(conn)?;
                    Ok(LaunchStart::Reserved(reserved))
                }
                Err(LedgerError::InsufficientCredits { available, required }) => {
                    diesel::update(campaigns::table.find(campaign.id))
                        .set((
                            campaigns::status.eq(CampaignStatus::Failed.as_str()),
                            campaigns::last_error.eq(Some("Insufficient credits".to_string())),
                            campaigns::retryable.eq(true),
                            campaigns::updated_at.eq(now),
                        ))
                        .execute(conn)?;
                    Ok(LaunchStart::InsufficientCredits { available, required })
                }
                Err(e) => Err(e),
            }
        })
    }

    /// Stores the found leads, returns unused reserved credits and marks the
    /// campaign `active`. Returns None if the campaign had already left
    /// `enriching`, in which case nothing is written.
    pub fn complete_enrichment(
        &self,
        campaign: &Campaign,
        leads: Vec<NewLead>,
        credits_per_lead: i32,
    ) -> Result<Option<Campaign>, LedgerError> {
        let mut conn = self.pool.get()?;
        conn.immediate_transaction::<_, LedgerError, _>(|conn| {
            let reserved: i32 = campaigns::table
                .find(campaign.id)
                .filter(campaigns::status.eq(CampaignStatus::Enriching.as_str()))
                .select(campaigns::credits_reserved)
                .first(conn)
                .optional()?
                .unwrap_or(-1);
            if reserved < 0 {
                return Ok(None);
            }

            let found = leads.len() as i32;
            for lead in &leads {
                diesel::insert_into(linkedin_leads::table)
                    .values(lead)
                    .execute(conn)?;
            }

            let charged = charge_for(found, credits_per_lead, reserved);
            let unused = reserved - charged;
            if unused > 0 {
                refund_on(
                    conn,
                    campaign.user_id,
                    unused,
                    Some(campaign.id),
                    Some(format!("Unused lead search reservation for campaign {}", campaign.id)),
                )?;
            }

            let updated = diesel::update(campaigns::table.find(campaign.id))
                .set((
                    campaigns::status.eq(CampaignStatus::Active.as_str()),
                    campaigns::leads_generated.eq(found),
                    campaigns::credits_reserved.eq(0),
                    campaigns::last_error.eq(None::<String>),
                    campaigns::retryable.eq(false),
                    campaigns::updated_at.eq(now_epoch()),
                ))
                .returning(Campaign::as_returning())
                .get_result(conn)?;
            Ok(Some(updated))
        })
    }

    /// Marks an `enriching` campaign `failed` and refunds its whole
    /// reservation. Returns false if the campaign was not `enriching`.
    pub fn fail_enrichment(
        &self,
        campaign_id: i32,
        error: &str,
        retryable: bool,
    ) -> Result<bool, LedgerError> {
        let mut conn = self.pool.get()?;
        conn.immediate_transaction::<_, LedgerError, _>(|conn| {
            let current = campaigns::table
                .find(campaign_id)
                .filter(campaigns::status.eq(CampaignStatus::Enriching.as_str()))
                .select(Campaign::as_select())
                .first(conn)
                .optional()?;
            let Some(current) = current else {
                return Ok(false);
            };

            if current.credits_reserved > 0 {
                refund_on(
                    conn,
                    current.user_id,
                    current.credits_reserved,
                    Some(current.id),
                    Some(format!("Refund for failed lead search on campaign {}", current.id)),
                )?;
            }

            diesel::update(campaigns::table.find(campaign_id))
                .set((
                    campaigns::status.eq(CampaignStatus::Failed.as_str()),
                    campaigns::credits_reserved.eq(0),
                    campaigns::last_error.eq(Some(error.to_string())),
                    campaigns::retryable.eq(retryable),
                    campaigns::updated_at.eq(now_epoch()),
                ))
                .execute(conn)?;
            Ok(true)
        })
    }

    /// Campaigns that entered `enriching` before `updated_before` and never resolved.
    pub fn find_stale_enriching(&self, updated_before: i32) -> Result<Vec<Campaign>, DbError> {
        let mut conn = self.pool.get()?;
        let rows = campaigns::table
            .filter(campaigns::status.eq(CampaignStatus::Enriching.as_str()))
            .filter(campaigns::updated_at.lt(updated_before))
            .select(Campaign::as_select())
            .load(&mut conn)?;
        Ok(rows)
    }

    pub fn count_by_status(&self, user_id: i32) -> Result<Vec<(String, i64)>, DbError> {
        let mut conn = self.pool.get()?;
        let rows = campaigns::table
            .filter(campaigns::user_id.eq(user_id))
            .group_by(campaigns::status)
            .select((campaigns::status, diesel::dsl::count(campaigns::id)))
            .load::<(String, i64)>(&mut conn)?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::models::campaign_models::encode_list;
    use crate::repositories::credit_repository::CreditRepository;
    use crate::repositories::user_repository::UserRepository;

    struct Fixture {
        campaigns: CampaignRepository,
        ledger: CreditRepository,
        user_id: i32,
    }

    fn fixture() -> Fixture {
        let pool = test_pool();
        let user = UserRepository::new(pool.clone())
            .create_user("owner@example.com", "hash", None, None)
            .unwrap();
        Fixture {
            campaigns: CampaignRepository::new(pool.clone()),
            ledger: CreditRepository::new(pool),
            user_id: user.id,
        }
    }

    fn draft(user_id: i32, max_leads: i32) -> NewCampaign {
        let now = now_epoch();
        NewCampaign {
            user_id,
            name: "Q3 CTOs".to_string(),
            status: CampaignStatus::Draft.to_string(),
            job_titles: encode_list(&["CTO".to_string()]),
            industries: encode_list(&[]),
            locations: encode_list(&["Berlin".to_string()]),
            company_sizes: encode_list(&[]),
            message_template: "Hi {first_name}".to_string(),
            max_leads,
            created_at: now,
            updated_at: now,
        }
    }

    fn lead(campaign_id: i32, name: &str) -> NewLead {
        NewLead {
            campaign_id,
            first_name: None,
            last_name: None,
            full_name: name.to_string(),
            job_title: Some("CTO".to_string()),
            company: None,
            industry: None,
            location: None,
            linkedin_url: None,
            email: None,
            created_at: now_epoch(),
        }
    }

    #[test]
    fn campaigns_are_scoped_to_owner() {
        let f = fixture();
        let campaign = f.campaigns.create(draft(f.user_id, 10)).unwrap();
        assert!(f.campaigns.find_for_user(campaign.id, f.user_id).unwrap().is_some());
        assert!(f.campaigns.find_for_user(campaign.id, f.user_id + 1).unwrap().is_none());
        assert_eq!(f.campaigns.list_for_user(f.user_id).unwrap().len(), 1);
    }

    #[test]
    fn transition_is_compare_and_set() {
        let f = fixture();
        let campaign = f.campaigns.create(draft(f.user_id, 10)).unwrap();

        assert!(!f.campaigns.transition(campaign.id, CampaignStatus::Draft, CampaignStatus::Active).unwrap());
        assert!(f.campaigns.transition(campaign.id, CampaignStatus::Draft, CampaignStatus::Enriching).unwrap());
        // second writer expecting draft loses
        assert!(!f.campaigns.transition(campaign.id, CampaignStatus::Draft, CampaignStatus::Enriching).unwrap());
    }

    fn retarget(titles: &[&str], max_leads: i32) -> CampaignChanges {
        let titles: Vec<String> = titles.iter().map(|t| t.to_string()).collect();
        CampaignChanges {
            name: None,
            job_titles: Some(encode_list(&titles)),
            industries: None,
            locations: None,
            company_sizes: None,
            message_template: None,
            max_leads: Some(max_leads),
            updated_at: now_epoch(),
        }
    }

    #[test]
    fn edits_do_not_land_once_enrichment_started() {
        let f = fixture();
        f.ledger.record_purchase(f.user_id, 50, "pi_edit", None).unwrap();
        let campaign = f.campaigns.create(draft(f.user_id, 5)).unwrap();

        let edited = f.campaigns.update(campaign.id, f.user_id, retarget(&["VP Sales"], 8)).unwrap().unwrap();
        assert_eq!(edited.max_leads, 8);

        // edit computed from a draft snapshot, launch wins the race
        assert!(matches!(
            f.campaigns.begin_enrichment(&edited, CampaignStatus::Draft, 8).unwrap(),
            LaunchStart::Reserved(_)
        ));
        assert!(f.campaigns.update(campaign.id, f.user_id, retarget(&["Intern"], 1000)).unwrap().is_none());

        let stored = f.campaigns.find_by_id(campaign.id).unwrap().unwrap();
        assert_eq!(stored.status, "enriching");
        assert_eq!(stored.max_leads, 8);
        assert_eq!(stored.credits_reserved, 8);
        assert_eq!(stored.filters().job_titles, vec!["VP Sales".to_string()]);
    }

    #[test]
    fn launch_reserves_then_settles_actual_leads() {
        let f = fixture();
        f.ledger.record_purchase(f.user_id, 100, "pi_launch", None).unwrap();
        let campaign = f.campaigns.create(draft(f.user_id, 10)).unwrap();

        let reserved = match f.campaigns.begin_enrichment(&campaign, CampaignStatus::Draft, 10).unwrap() {
            LaunchStart::Reserved(c) => c,
            other => panic!("unexpected: {:?}", other),
        };
        assert_eq!(reserved.status, "enriching");
        assert_eq!(reserved.credits_reserved, 10);
        assert_eq!(f.ledger.balance(f.user_id).unwrap(), 90);

        let leads = vec![lead(campaign.id, "A"), lead(campaign.id, "B"), lead(campaign.id, "C")];
        let done = f.campaigns.complete_enrichment(&reserved, leads, 1).unwrap().unwrap();
        assert_eq!(done.status, "active");
        assert_eq!(done.leads_generated, 3);
        assert_eq!(done.credits_reserved, 0);
        assert_eq!(f.ledger.balance(f.user_id).unwrap(), 97);
    }

    #[test]
    fn insufficient_credits_marks_failed_without_charging() {
        let f = fixture();
        f.ledger.record_purchase(f.user_id, 5, "pi_low", None).unwrap();
        let campaign = f.campaigns.create(draft(f.user_id, 10)).unwrap();

        match f.campaigns.begin_enrichment(&campaign, CampaignStatus::Draft, 10).unwrap() {
            LaunchStart::InsufficientCredits { available, required } => {
                assert_eq!(available, 5);
                assert_eq!(required, 10);
            }
            other => panic!("unexpected: {:?}", other),
        }
        let stored = f.campaigns.find_by_id(campaign.id).unwrap().unwrap();
        assert_eq!(stored.status, "failed");
        assert!(stored.retryable);
        assert_eq!(f.ledger.balance(f.user_id).unwrap(), 5);
    }

    #[test]
    fn failing_refunds_reservation_once() {
        let f = fixture();
        f.ledger.record_purchase(f.user_id, 50, "pi_fail", None).unwrap();
        let campaign = f.campaigns.create(draft(f.user_id, 20)).unwrap();
        f.campaigns.begin_enrichment(&campaign, CampaignStatus::Draft, 20).unwrap();
        assert_eq!(f.ledger.balance(f.user_id).unwrap(), 30);

        assert!(f.campaigns.fail_enrichment(campaign.id, "timeout", true).unwrap());
        assert!(!f.campaigns.fail_enrichment(campaign.id, "timeout", true).unwrap());

        let stored = f.campaigns.find_by_id(campaign.id).unwrap().unwrap();
        assert_eq!(stored.status, "failed");
        assert_eq!(stored.last_error.as_deref(), Some("timeout"));
        assert_eq!(f.ledger.balance(f.user_id).unwrap(), 50);
    }

    #[test]
    fn completion_after_failure_writes_nothing() {
        let f = fixture();
        f.ledger.record_purchase(f.user_id, 50, "pi_race", None).unwrap();
        let campaign = f.campaigns.create(draft(f.user_id, 5)).unwrap();
        let reserved = match f.campaigns.begin_enrichment(&campaign, CampaignStatus::Draft, 5).unwrap() {
            LaunchStart::Reserved(c) => c,
            other => panic!("unexpected: {:?}", other),
        };
        f.campaigns.fail_enrichment(campaign.id, "stale", true).unwrap();

        let result = f.campaigns.complete_enrichment(&reserved, vec![lead(campaign.id, "Late")], 1).unwrap();
        assert!(result.is_none());
        assert_eq!(f.ledger.balance(f.user_id).unwrap(), 50);
    }

    #[test]
    fn enriching_campaign_cannot_be_deleted() {
        let f = fixture();
        f.ledger.record_purchase(f.user_id, 50, "pi_del", None).unwrap();
        let campaign = f.campaigns.create(draft(f.user_id, 5)).unwrap();
        f.campaigns.begin_enrichment(&campaign, CampaignStatus::Draft, 5).unwrap();

        assert!(!f.campaigns.delete(campaign.id, f.user_id).unwrap());
        f.campaigns.fail_enrichment(campaign.id, "x", false).unwrap();
        assert!(f.campaigns.delete(campaign.id, f.user_id).unwrap());
        assert!(f.campaigns.find_by_id(campaign.id).unwrap().is_none());
    }
}
