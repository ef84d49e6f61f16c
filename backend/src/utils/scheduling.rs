use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

pub const MAX_RANGE_DAYS: i64 = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeSlot {
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SlotOptions {
    pub slot_minutes: i64,
    pub day_start_hour: u32,
    pub day_end_hour: u32,
    pub skip_weekends: bool,
}

impl Default for SlotOptions {
    fn default() -> Self {
        Self {
            slot_minutes: 30,
            day_start_hour: 9,
            day_end_hour: 17,
            skip_weekends: true,
        }
    }
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum SlotError {
    #[error("end must be after start")]
    EmptyRange,
    #[error("range may span at most 31 days")]
    RangeTooLong,
    #[error("slot length must be between 15 and 480 minutes")]
    InvalidDuration,
}

pub fn validate_duration(minutes: i64) -> Result<(), SlotError> {
    if (15..=480).contains(&minutes) {
        Ok(())
    } else {
        Err(SlotError::InvalidDuration)
    }
}

pub fn validate_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), SlotError> {
    if end <= start {
        return Err(SlotError::EmptyRange);
    }
    if end - start > Duration::days(MAX_RANGE_DAYS) {
        return Err(SlotError::RangeTooLong);
    }
    Ok(())
}

/// True when `slot` overlaps none of `busy`.
pub fn is_free(slot: &TimeSlot, busy: &[TimeSlot]) -> bool {
    busy.iter().all(|b| !slot.overlaps(b))
}

/// Free working-hour slots in `[range_start, range_end)`.
///
/// Slots are aligned to the start of the working day, never begin before
/// `now`, never overlap a busy interval and never cross the end of the
/// working day or the range.
pub fn generate_slots(
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
    busy: &[TimeSlot],
    now: DateTime<Utc>,
    options: SlotOptions,
) -> Result<Vec<TimeSlot>, SlotError> {
    validate_range(range_start, range_end)?;
    validate_duration(options.slot_minutes)?;

    let step = Duration::minutes(options.slot_minutes);
    let (Some(open), Some(close)) = (
        NaiveTime::from_hms_opt(options.day_start_hour, 0, 0),
        NaiveTime::from_hms_opt(options.day_end_hour, 0, 0),
    ) else {
        return Ok(Vec::new());
    };

    let mut slots = Vec::new();
    let mut day = range_start.date_naive();
    let last_day = range_end.date_naive();

    while day <= last_day {
        let weekend = matches!(day.weekday(), Weekday::Sat | Weekday::Sun);
        if !(options.skip_weekends && weekend) {
            let day_open = Utc.from_utc_datetime(&day.and_time(open));
            let day_close = Utc.from_utc_datetime(&day.and_time(close));

            let mut start = day_open;
            while start + step <= day_close {
                let slot = TimeSlot { start, end: start + step };
                if slot.start >= range_start
                    && slot.end <= range_end
                    && slot.start >= now
                    && is_free(&slot, busy)
                {
                    slots.push(slot);
                }
                start += step;
            }
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }

    Ok(slots)
}
