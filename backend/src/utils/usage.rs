use crate::config::AppConfig;

/// Credits held back when a campaign launches: one lead costs
/// `credits_per_lead`, and up to `max_leads` may be found.
pub fn reservation_for(max_leads: i32, credits_per_lead: i32) -> Result<i32, String> {
    if max_leads <= 0 || credits_per_lead <= 0 {
        return Err("Campaign has no lead budget".to_string());
    }
    max_leads
        .checked_mul(credits_per_lead)
        .ok_or_else(|| "Lead budget is too large".to_string())
}

/// Credits actually spent on `found` leads, never more than the reservation.
pub fn charge_for(found: i32, credits_per_lead: i32, reserved: i32) -> i32 {
    found.saturating_mul(credits_per_lead).min(reserved)
}

/// Validates a purchase request and returns its price in cents.
pub fn purchase_amount_cents(credits: i32, config: &AppConfig) -> Result<i64, String> {
    if credits < config.min_credit_purchase {
        return Err(format!("Minimum purchase is {} credits", config.min_credit_purchase));
    }
    if credits > config.max_credit_purchase {
        return Err(format!("Maximum purchase is {} credits", config.max_credit_purchase));
    }
    (credits as i64)
        .checked_mul(config.credit_price_cents)
        .filter(|amount| *amount > 0)
        .ok_or_else(|| "Invalid purchase amount".to_string())
}
