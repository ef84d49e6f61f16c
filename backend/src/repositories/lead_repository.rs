use diesel::prelude::*;
use serde::Serialize;
use crate::{
    db::{now_epoch, DbError, DbPool},
    models::lead_models::{Lead, LeadNote, NewLeadNote, ReplyIntent},
    schema::{campaigns, lead_notes, linkedin_leads},
};

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct LeadStats {
    pub total_leads: i64,
    pub messages_sent: i64,
    pub replies: i64,
    pub positive_replies: i64,
    pub meetings_scheduled: i64,
    pub reply_rate: f64, // replies / messages sent, 0 when nothing was sent
}

impl LeadStats {
    fn from_rows(rows: &[(bool, bool, Option<String>, bool)]) -> Self {
        let mut stats = LeadStats::default();
        for (message_sent, replied, intent, meeting_scheduled) in rows {
            stats.total_leads += 1;
            if *message_sent {
                stats.messages_sent += 1;
            }
            if *replied {
                stats.replies += 1;
            }
            let positive = intent
                .as_deref()
                .and_then(|i| i.parse::<ReplyIntent>().ok())
                .map(|i| i.is_positive())
                .unwrap_or(false);
            if positive {
                stats.positive_replies += 1;
            }
            if *meeting_scheduled {
                stats.meetings_scheduled += 1;
            }
        }
        if stats.messages_sent > 0 {
            stats.reply_rate = stats.replies as f64 / stats.messages_sent as f64;
        }
        stats
    }
}

pub struct LeadRepository {
    pool: DbPool
}

impl LeadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn list_for_campaign(&self, campaign_id: i32) -> Result<Vec<Lead>, DbError> {
        let mut conn = self.pool.get()?;
        let leads = linkedin_leads::table
            .filter(linkedin_leads::campaign_id.eq(campaign_id))
            .order(linkedin_leads::id.asc())
            .select(Lead::as_select())
            .load(&mut conn)?;
        Ok(leads)
    }

    // Leads are owned through their campaign
    pub fn find_for_user(&self, lead_id: i32, user_id: i32) -> Result<Option<Lead>, DbError> {
        let mut conn = self.pool.get()?;
        let lead = linkedin_leads::table
            .inner_join(campaigns::table)
            .filter(linkedin_leads::id.eq(lead_id))
            .filter(campaigns::user_id.eq(user_id))
            .select(Lead::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(lead)
    }

    pub fn mark_message_sent(&self, lead_id: i32) -> Result<Lead, DbError> {
        let mut conn = self.pool.get()?;
        let lead = diesel::update(linkedin_leads::table.find(lead_id))
            .set((
                linkedin_leads::message_sent.eq(true),
                linkedin_leads::message_sent_at.eq(Some(now_epoch())),
            ))
            .returning(Lead::as_returning())
            .get_result(&mut conn)?;
        Ok(lead)
    }

    pub fn record_reply(&self, lead_id: i32, content: &str, intent: Option<ReplyIntent>) -> Result<Lead, DbError> {
        let mut conn = self.pool.get()?;
        let lead = diesel::update(linkedin_leads::table.find(lead_id))
            .set((
                linkedin_leads::replied.eq(true),
                linkedin_leads::reply_content.eq(Some(content.to_string())),
                linkedin_leads::replied_at.eq(Some(now_epoch())),
                linkedin_leads::intent.eq(intent.map(|i| i.to_string())),
            ))
            .returning(Lead::as_returning())
            .get_result(&mut conn)?;
        Ok(lead)
    }

    pub fn add_note(&self, lead_id: i32, user_id: i32, content: &str) -> Result<LeadNote, DbError> {
        let mut conn = self.pool.get()?;
        let note = diesel::insert_into(lead_notes::table)
            .values(&NewLeadNote {
                lead_id,
                user_id,
                content: content.to_string(),
                created_at: now_epoch(),
            })
            .returning(LeadNote::as_returning())
            .get_result(&mut conn)?;
        Ok(note)
    }

    pub fn notes(&self, lead_id: i32) -> Result<Vec<LeadNote>, DbError> {
        let mut conn = self.pool.get()?;
        let notes = lead_notes::table
            .filter(lead_notes::lead_id.eq(lead_id))
            .order((lead_notes::created_at.desc(), lead_notes::id.desc()))
            .select(LeadNote::as_select())
            .load(&mut conn)?;
        Ok(notes)
    }

    pub fn campaign_stats(&self, campaign_id: i32) -> Result<LeadStats, DbError> {
        let mut conn = self.pool.get()?;
        let rows = linkedin_leads::table
            .filter(linkedin_leads::campaign_id.eq(campaign_id))
            .select((
                linkedin_leads::message_sent,
                linkedin_leads::replied,
                linkedin_leads::intent,
                linkedin_leads::meeting_scheduled,
            ))
            .load::<(bool, bool, Option<String>, bool)>(&mut conn)?;
        Ok(LeadStats::from_rows(&rows))
    }

    pub fn user_stats(&self, user_id: i32) -> Result<LeadStats, DbError> {
        let mut conn = self.pool.get()?;
        let rows = linkedin_leads::table
            .inner_join(campaigns::table)
            .filter(campaigns::user_id.eq(user_id))
            .select((
                linkedin_leads::message_sent,
                linkedin_leads::replied,
                linkedin_leads::intent,
                linkedin_leads::meeting_scheduled,
            ))
            .load::<(bool, bool, Option<String>, bool)>(&mut conn)?;
        Ok(LeadStats::from_rows(&rows))
    }
}
