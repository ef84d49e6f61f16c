use diesel::prelude::*;
use crate::{
    db::{DbError, DbPool},
    models::meeting_models::{Meeting, MeetingStatus, NewMeeting},
    schema::{linkedin_leads, meetings},
};

pub struct MeetingRepository {
    pool: DbPool
}

impl MeetingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Records the meeting and flags the lead in one transaction.
    pub fn create(&self, new_meeting: NewMeeting) -> Result<Meeting, DbError> {
        let mut conn = self.pool.get()?;
        let meeting = conn.transaction::<Meeting, diesel::result::Error, _>(|conn| {
            let meeting = diesel::insert_into(meetings::table)
                .values(&new_meeting)
                .returning(Meeting::as_returning())
                .get_result(conn)?;
            diesel::update(linkedin_leads::table.find(new_meeting.lead_id))
                .set(linkedin_leads::meeting_scheduled.eq(true))
                .execute(conn)?;
            Ok(meeting)
        })?;
        Ok(meeting)
    }

    pub fn list_for_user(&self, user_id: i32) -> Result<Vec<Meeting>, DbError> {
        let mut conn = self.pool.get()?;
        let rows = meetings::table
            .filter(meetings::user_id.eq(user_id))
            .order(meetings::scheduled_at.asc())
            .select(Meeting::as_select())
            .load(&mut conn)?;
        Ok(rows)
    }

    pub fn find_for_user(&self, meeting_id: i32, user_id: i32) -> Result<Option<Meeting>, DbError> {
        let mut conn = self.pool.get()?;
        let meeting = meetings::table
            .filter(meetings::id.eq(meeting_id))
            .filter(meetings::user_id.eq(user_id))
            .select(Meeting::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(meeting)
    }

    /// Updates the status. A cancelled meeting clears the lead's
    /// `meeting_scheduled` flag unless another live meeting remains.
    pub fn update_status(&self, meeting_id: i32, status: MeetingStatus) -> Result<Meeting, DbError> {
        let mut conn = self.pool.get()?;
        let meeting = conn.transaction::<Meeting, diesel::result::Error, _>(|conn| {
            let meeting = diesel::update(meetings::table.find(meeting_id))
                .set(meetings::status.eq(status.as_str()))
                .returning(Meeting::as_returning())
                .get_result(conn)?;

            if status == MeetingStatus::Cancelled {
                let remaining: i64 = meetings::table
                    .filter(meetings::lead_id.eq(meeting.lead_id))
                    .filter(meetings::status.ne(MeetingStatus::Cancelled.as_str()))
                    .count()
                    .get_result(conn)?;
                if remaining == 0 {
                    diesel::update(linkedin_leads::table.find(meeting.lead_id))
                        .set(linkedin_leads::meeting_scheduled.eq(false))
                        .execute(conn)?;
                }
            }
            Ok(meeting)
        })?;
        Ok(meeting)
    }

    pub fn count_for_user(&self, user_id: i32) -> Result<i64, DbError> {
        let mut conn = self.pool.get()?;
        let count = meetings::table
            .filter(meetings::user_id.eq(user_id))
            .filter(meetings::status.ne(MeetingStatus::Cancelled.as_str()))
            .count()
            .get_result(&mut conn)?;
        Ok(count)
    }
}
