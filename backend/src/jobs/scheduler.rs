use tokio_cron_scheduler::{JobScheduler, Job, JobSchedulerError};
use std::sync::Arc;
use tracing::{info, error, warn};
use crate::AppState;
use crate::db::now_epoch;
use crate::repositories::campaign_repository::CampaignRepository;
use crate::repositories::credit_repository::CreditRepository;

const STALE_ENRICHMENT_ERROR: &str = "Lead search did not finish, credits were refunded";

/// Fails campaigns stuck in `enriching` for longer than `stale_after_secs`,
/// refunding their reservation. Returns how many were failed.
pub fn sweep_stale_enrichments(campaigns: &CampaignRepository, stale_after_secs: i64) -> usize {
    let cutoff = (now_epoch() as i64 - stale_after_secs) as i32;
    let stale = match campaigns.find_stale_enriching(cutoff) {
        Ok(stale) => stale,
        Err(e) => {
            error!("Failed to look up stale enrichments: {}", e);
            return 0;
        }
    };

    let mut failed = 0;
    for campaign in stale {
        match campaigns.fail_enrichment(campaign.id, STALE_ENRICHMENT_ERROR, true) {
            Ok(true) => {
                warn!("Campaign {} was stuck in enriching, marked failed", campaign.id);
                failed += 1;
            }
            Ok(false) => info!("Campaign {} settled before the sweep reached it", campaign.id),
            Err(e) => error!("Failed to fail stale campaign {}: {}", campaign.id, e),
        }
    }
    failed
}

pub fn reconcile_balances(ledger: &CreditRepository) -> usize {
    match ledger.reconcile_all() {
        Ok(corrected) => {
            info!("Balance reconciliation corrected {} cached balances", corrected);
            corrected
        }
        Err(e) => {
            error!("Balance reconciliation failed: {}", e);
            0
        }
    }
}

pub async fn start_scheduler(state: Arc<AppState>) -> Result<(), JobSchedulerError> {
    let sched = JobScheduler::new().await?;

    // Every minute: campaigns whose lead search never came back
    let state_clone = Arc::clone(&state);
    let stale_enrichment_job = Job::new_async("0 * * * * *", move |_, _| {
        let state = state_clone.clone();
        Box::pin(async move {
            let swept = sweep_stale_enrichments(
                &state.campaign_repository,
                state.config.stale_enrichment_secs,
            );
            if swept > 0 {
                info!("Stale enrichment sweep failed {} campaigns", swept);
            }
        })
    })?;
    sched.add(stale_enrichment_job).await?;

    // Hourly: cached balances against the ledger
    let state_clone = Arc::clone(&state);
    let reconcile_job = Job::new_async("0 0 * * * *", move |_, _| {
        let state = state_clone.clone();
        Box::pin(async move {
            reconcile_balances(&state.credit_repository);
        })
    })?;
    sched.add(reconcile_job).await?;

    sched.start().await?;
    info!("Scheduler started");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::models::campaign_models::{encode_list, CampaignStatus, NewCampaign};
    use crate::repositories::campaign_repository::LaunchStart;
    use crate::repositories::user_repository::UserRepository;

    #[test]
    fn stuck_enrichment_is_failed_and_refunded() {
        let pool = test_pool();
        let user = UserRepository::new(pool.clone())
            .create_user("sweep@example.com", "hash", None, None)
            .unwrap();
        let ledger = CreditRepository::new(pool.clone());
        ledger.record_purchase(user.id, 40, "pi_sweep", None).unwrap();
        let campaigns = CampaignRepository::new(pool);
        let now = now_epoch();
        let campaign = campaigns
            .create(NewCampaign {
                user_id: user.id,
                name: "Stuck".to_string(),
                status: CampaignStatus::Draft.to_string(),
                job_titles: encode_list(&["CFO".to_string()]),
                industries: encode_list(&[]),
                locations: encode_list(&[]),
                company_sizes: encode_list(&[]),
                message_template: String::new(),
                max_leads: 10,
                created_at: now,
                updated_at: now,
            })
            .unwrap();
        assert!(matches!(
            campaigns.begin_enrichment(&campaign, CampaignStatus::Draft, 10).unwrap(),
            LaunchStart::Reserved(_)
        ));
        assert_eq!(ledger.balance(user.id).unwrap(), 30);

        // not stale yet
        assert_eq!(sweep_stale_enrichments(&campaigns, 300), 0);
        // a negative threshold puts the cutoff in the future
        assert_eq!(sweep_stale_enrichments(&campaigns, -10), 1);

        let stored = campaigns.find_by_id(campaign.id).unwrap().unwrap();
        assert_eq!(stored.status, "failed");
        assert!(stored.retryable);
        assert_eq!(stored.last_error.as_deref(), Some(STALE_ENRICHMENT_ERROR));
        assert_eq!(ledger.balance(user.id).unwrap(), 40);
        assert_eq!(sweep_stale_enrichments(&campaigns, -10), 0);
    }
}
