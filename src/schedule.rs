/*!
 # Startup and shutdown schedules

 The RTC alarms store a schedule as day, hour, minute (and for the startup
 alarm, second) in packed decimal. A day or hour holding the wildcard value
 matches any day or hour, which turns a single alarm into a recurring one:

 | day      | hour     | fires           |
 |----------|----------|-----------------|
 | 0        | any      | never           |
 | wildcard | set      | every day       |
 | set      | set      | every month     |
 | wildcard | wildcard | every hour      |

 Schedules are written and shown as `"<day> <hour>:<minute>"`, with `??`
 standing for the wildcard, e.g. `"?? 07:30"` for every day at 07:30.
*/

use chrono::{DateTime, Datelike, Months, NaiveDate, TimeDelta, TimeZone, Timelike, Utc};
use std::fmt;
use std::ops::RangeInclusive;
use tracing::{debug, instrument, trace};

use crate::bcd::{dec_to_bcd, decode_all};
use crate::{Error, Result};

/// Decoded field value marking a day or hour as "any"
pub const WILDCARD_DECODED: u8 = 80;

/// Register byte written for a wildcard field.
///
/// Packed decimal `0x80`, which decodes back to [`WILDCARD_DECODED`]. It is
/// also `80 * 1.6`, the scaling used by the vendor scripts; that scaling only
/// agrees with packed decimal on multiples of ten.
pub const WILDCARD_RAW_WRITE: u8 = 0x80;

/// Placeholder shown for a wildcard field
pub const PLACEHOLDER: &str = "??";

/// How often a schedule fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurrencePattern {
    /// No schedule configured
    Never,
    /// Every hour at the given minute
    EveryHour,
    /// Every day at the given time
    EveryDay,
    /// Every month on the given day and time
    EveryMonth,
}

/// Decoded contents of an alarm's registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTime {
    /// Day of month (1-31), [`WILDCARD_DECODED`], or 0 when unset
    pub day: u8,
    /// Hour (0-23) or [`WILDCARD_DECODED`]
    pub hour: u8,
    /// Minute (0-59)
    pub minute: u8,
    /// Second (0-59), only present on the startup alarm
    pub second: Option<u8>,
}

impl ScheduleTime {
    /// Builds a schedule from decoded register values in address order:
    /// `[second, minute, hour, day]` or `[minute, hour, day]`.
    pub fn from_decoded(values: &[u8]) -> Result<Self> {
        match *values {
            [second, minute, hour, day] => Ok(Self {
                day,
                hour,
                minute,
                second: Some(second),
            }),
            [minute, hour, day] => Ok(Self {
                day,
                hour,
                minute,
                second: None,
            }),
            _ => Err(Error::General(format!(
                "expected 3 or 4 schedule registers, got {}",
                values.len()
            ))),
        }
    }

    /// Builds a schedule from raw register bytes in address order.
    pub fn from_registers(raw: &[u8]) -> Result<Self> {
        Self::from_decoded(&decode_all(raw))
    }

    /// Parses `"<day> <hour>:<minute>"` or `"<day> <hour>:<minute>:<second>"`.
    ///
    /// Day and hour accept `??`. The minute is always required.
    pub fn parse(text: &str) -> Result<Self> {
        let malformed = || Error::MalformedSchedule(text.to_string());

        let (day, clock) = text.trim().split_once(' ').ok_or_else(malformed)?;
        let mut parts = clock.trim().split(':');
        let hour = parts.next().ok_or_else(malformed)?;
        let minute = parts.next().ok_or_else(malformed)?;
        let second = parts.next();
        if parts.next().is_some() {
            return Err(malformed());
        }

        let schedule = Self {
            day: parse_field(text, day, true, 1..=31)?,
            hour: parse_field(text, hour, true, 0..=23)?,
            minute: parse_field(text, minute, false, 0..=59)?,
            second: second
                .map(|s| parse_field(text, s, false, 0..=59))
                .transpose()?,
        };
        trace!("Parsed schedule '{}' as {:?}", text, schedule);
        Ok(schedule)
    }

    /// Classifies the schedule.
    ///
    /// A zero day means no schedule regardless of the other fields. A set day
    /// with a wildcard hour has no matching pattern.
    pub fn pattern(&self) -> Result<RecurrencePattern> {
        if self.day == 0 {
            return Ok(RecurrencePattern::Never);
        }
        match (self.day == WILDCARD_DECODED, self.hour == WILDCARD_DECODED) {
            (true, false) => Ok(RecurrencePattern::EveryDay),
            (false, false) => Ok(RecurrencePattern::EveryMonth),
            (true, true) => Ok(RecurrencePattern::EveryHour),
            (false, true) => Err(Error::UnsupportedSchedule {
                day: self.day,
                hour: self.hour,
            }),
        }
    }

    /// Register bytes for minute, hour and day, in that order
    pub fn register_bytes(&self) -> [u8; 3] {
        [
            encode_field(self.minute),
            encode_field(self.hour),
            encode_field(self.day),
        ]
    }
}

fn parse_field(text: &str, field: &str, wildcard: bool, range: RangeInclusive<u32>) -> Result<u8> {
    if wildcard && field == PLACEHOLDER {
        return Ok(WILDCARD_DECODED);
    }
    let value: u32 = field
        .parse()
        .map_err(|_| Error::MalformedSchedule(text.to_string()))?;
    if !range.contains(&value) {
        return Err(Error::ValueOutOfRange(value, *range.start(), *range.end()));
    }
    Ok(value as u8)
}

fn encode_field(value: u8) -> u8 {
    if value == WILDCARD_DECODED {
        WILDCARD_RAW_WRITE
    } else {
        dec_to_bcd(value)
    }
}

struct Field(u8);

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == WILDCARD_DECODED {
            f.write_str(PLACEHOLDER)
        } else {
            write!(f, "{:02}", self.0)
        }
    }
}

impl fmt::Display for ScheduleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{}:{}",
            Field(self.day),
            Field(self.hour),
            Field(self.minute),
            Field(self.second.unwrap_or(0))
        )
    }
}

/// Next time a schedule fires
#[derive(Debug, Clone)]
pub struct ScheduleOccurrence<Tz: TimeZone> {
    /// Recurrence of the schedule
    pub pattern: RecurrencePattern,
    /// Occurrence in UTC
    pub utc: DateTime<Utc>,
    /// Occurrence in the configured local timezone
    pub local: DateTime<Tz>,
    /// Schedule as `"<day> <hour>:<minute>:<second>"`
    pub display: String,
    /// Time left until the occurrence
    pub until: TimeDelta,
}

/// Computes the next occurrence of alarm schedules
#[derive(Debug, Clone)]
pub struct ScheduleCodec<Tz: TimeZone> {
    local: Tz,
}

impl<Tz: TimeZone> ScheduleCodec<Tz> {
    /// Creates a codec reporting local times in `local`
    pub fn new(local: Tz) -> Self {
        Self { local }
    }

    /// The local timezone
    pub fn timezone(&self) -> &Tz {
        &self.local
    }

    /// Next occurrence relative to the system clock
    pub fn next_occurrence(&self, time: &ScheduleTime) -> Result<Option<ScheduleOccurrence<Tz>>> {
        self.next_occurrence_at(time, Utc::now())
    }

    /// Next occurrence relative to `now`.
    ///
    /// Returns `None` when no schedule is set. The candidate is built from
    /// the current UTC date; when it lies before `now` it moves forward by one
    /// period of its recurrence.
    #[instrument(skip(self))]
    pub fn next_occurrence_at(
        &self,
        time: &ScheduleTime,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduleOccurrence<Tz>>> {
        let pattern = time.pattern()?;
        let second = time.second.unwrap_or(0);

        let utc = match pattern {
            RecurrencePattern::Never => {
                debug!("No schedule set");
                return Ok(None);
            }
            RecurrencePattern::EveryDay => {
                let candidate = utc_at(now.date_naive(), time.hour, time.minute, second)?;
                if candidate < now {
                    candidate + TimeDelta::days(1)
                } else {
                    candidate
                }
            }
            RecurrencePattern::EveryMonth => {
                let date = NaiveDate::from_ymd_opt(now.year(), now.month(), time.day as u32)
                    .ok_or_else(|| {
                        Error::InvalidDateTime(format!(
                            "day {} in {}-{:02}",
                            time.day,
                            now.year(),
                            now.month()
                        ))
                    })?;
                let candidate = utc_at(date, time.hour, time.minute, second)?;
                if candidate < now {
                    let next = add_one_month(candidate.date_naive()).ok_or_else(|| {
                        Error::InvalidDateTime(format!("month after {}", candidate))
                    })?;
                    next.and_time(candidate.time()).and_utc()
                } else {
                    candidate
                }
            }
            RecurrencePattern::EveryHour => {
                let candidate = utc_at(now.date_naive(), now.hour() as u8, time.minute, second)?;
                if candidate < now {
                    candidate + TimeDelta::hours(1)
                } else {
                    candidate
                }
            }
        };

        let local = utc.with_timezone(&self.local);
        let until = local.clone() - now.with_timezone(&self.local);
        let shown = time.to_string();
        debug!(
            "Schedule '{}' ({:?}) next fires at {} (in {}s)",
            shown,
            pattern,
            utc,
            until.num_seconds()
        );

        Ok(Some(ScheduleOccurrence {
            pattern,
            utc,
            local,
            display: shown,
            until,
        }))
    }
}

fn utc_at(date: NaiveDate, hour: u8, minute: u8, second: u8) -> Result<DateTime<Utc>> {
    date.and_hms_opt(hour as u32, minute as u32, second as u32)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| {
            Error::InvalidDateTime(format!(
                "{} {:02}:{:02}:{:02}",
                date, hour, minute, second
            ))
        })
}

/// Same day of month one month later, clamped to the last day of that month.
///
/// Jan 31 becomes Feb 28 (or 29 in leap years); Mar 31 becomes Apr 30.
pub fn add_one_month(date: NaiveDate) -> Option<NaiveDate> {
    date.checked_add_months(Months::new(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn codec() -> ScheduleCodec<FixedOffset> {
        ScheduleCodec::new(FixedOffset::east_opt(2 * 3600).unwrap())
    }

    #[test]
    fn month_advance_clamps_to_month_end() {
        assert_eq!(add_one_month(date(2023, 1, 31)), Some(date(2023, 2, 28)));
        assert_eq!(add_one_month(date(2024, 1, 31)), Some(date(2024, 2, 29)));
        assert_eq!(add_one_month(date(2024, 3, 31)), Some(date(2024, 4, 30)));
        assert_eq!(add_one_month(date(2024, 12, 15)), Some(date(2025, 1, 15)));
        assert_eq!(add_one_month(date(2024, 6, 10)), Some(date(2024, 7, 10)));
    }

    #[test]
    fn zero_day_means_never() {
        let time = ScheduleTime::from_decoded(&[0, 0, 0]).unwrap();
        assert_eq!(time.pattern().unwrap(), RecurrencePattern::Never);
        let next = codec().next_occurrence_at(&time, utc(2024, 6, 10, 12, 0, 0)).unwrap();
        assert!(next.is_none());
    }

    #[test]
    fn zero_day_wins_over_other_fields() {
        let time = ScheduleTime::from_decoded(&[30, 80, 0]).unwrap();
        assert_eq!(time.pattern().unwrap(), RecurrencePattern::Never);
    }

    #[test]
    fn every_day_later_today() {
        let time = ScheduleTime::from_decoded(&[0, 20, WILDCARD_DECODED]).unwrap();
        let now = utc(2024, 6, 10, 15, 0, 0);
        let next = codec().next_occurrence_at(&time, now).unwrap().unwrap();

        assert_eq!(next.pattern, RecurrencePattern::EveryDay);
        assert_eq!(next.utc, utc(2024, 6, 10, 20, 0, 0));
        assert_eq!(next.local.to_rfc3339(), "2024-06-10T22:00:00+02:00");
        assert_eq!(next.until, TimeDelta::hours(5));
        assert_eq!(next.display, "?? 20:00:00");
    }

    #[test]
    fn every_day_already_passed_moves_to_tomorrow() {
        let time = ScheduleTime::from_decoded(&[0, 20, WILDCARD_DECODED]).unwrap();
        let next = codec()
            .next_occurrence_at(&time, utc(2024, 6, 10, 21, 0, 0))
            .unwrap()
            .unwrap();
        assert_eq!(next.utc, utc(2024, 6, 11, 20, 0, 0));
        assert_eq!(next.until, TimeDelta::hours(23));
    }

    #[test]
    fn occurrence_equal_to_now_is_kept() {
        let time = ScheduleTime::from_decoded(&[0, 20, WILDCARD_DECODED]).unwrap();
        let now = utc(2024, 6, 10, 20, 0, 0);
        let next = codec().next_occurrence_at(&time, now).unwrap().unwrap();
        assert_eq!(next.utc, now);
        assert_eq!(next.until, TimeDelta::zero());
    }

    #[test]
    fn every_hour_fires_within_the_hour() {
        let time = ScheduleTime::from_decoded(&[15, WILDCARD_DECODED, WILDCARD_DECODED]).unwrap();
        assert_eq!(time.pattern().unwrap(), RecurrencePattern::EveryHour);

        let now = utc(2024, 6, 10, 10, 40, 0);
        let next = codec().next_occurrence_at(&time, now).unwrap().unwrap();
        assert_eq!(next.utc, utc(2024, 6, 10, 11, 15, 0));
        assert!(next.until > TimeDelta::zero() && next.until <= TimeDelta::minutes(60));
        assert_eq!(next.display, "?? ??:15:00");

        let now = utc(2024, 6, 10, 10, 5, 0);
        let next = codec().next_occurrence_at(&time, now).unwrap().unwrap();
        assert_eq!(next.utc, utc(2024, 6, 10, 10, 15, 0));
    }

    #[test]
    fn every_hour_rolls_over_midnight() {
        let time = ScheduleTime::from_decoded(&[10, WILDCARD_DECODED, WILDCARD_DECODED]).unwrap();
        let next = codec()
            .next_occurrence_at(&time, utc(2024, 12, 31, 23, 30, 0))
            .unwrap()
            .unwrap();
        assert_eq!(next.utc, utc(2025, 1, 1, 0, 10, 0));
    }

    #[test]
    fn every_month_this_month_or_next() {
        let time = ScheduleTime::from_decoded(&[0, 8, 31]).unwrap();
        assert_eq!(time.pattern().unwrap(), RecurrencePattern::EveryMonth);

        let next = codec()
            .next_occurrence_at(&time, utc(2023, 1, 15, 12, 0, 0))
            .unwrap()
            .unwrap();
        assert_eq!(next.utc, utc(2023, 1, 31, 8, 0, 0));

        let next = codec()
            .next_occurrence_at(&time, utc(2023, 1, 31, 9, 0, 0))
            .unwrap()
            .unwrap();
        assert_eq!(next.utc, utc(2023, 2, 28, 8, 0, 0));
        assert_eq!(next.display, "31 08:00:00");
    }

    #[test]
    fn every_month_day_missing_from_current_month_is_an_error() {
        let time = ScheduleTime::from_decoded(&[0, 8, 31]).unwrap();
        let err = codec()
            .next_occurrence_at(&time, utc(2024, 4, 10, 12, 0, 0))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDateTime(_)));
    }

    #[test]
    fn corrupted_hour_is_an_error() {
        let time = ScheduleTime::from_decoded(&[0, 25, WILDCARD_DECODED]).unwrap();
        let err = codec()
            .next_occurrence_at(&time, utc(2024, 4, 10, 12, 0, 0))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDateTime(_)));
    }

    #[test]
    fn set_day_with_wildcard_hour_is_unsupported() {
        let time = ScheduleTime::from_decoded(&[0, WILDCARD_DECODED, 15]).unwrap();
        assert!(matches!(
            time.pattern(),
            Err(Error::UnsupportedSchedule { day: 15, hour: 80 })
        ));
    }

    #[test]
    fn startup_second_is_used() {
        let time = ScheduleTime::from_decoded(&[45, 30, 6, WILDCARD_DECODED]).unwrap();
        let next = codec()
            .next_occurrence_at(&time, utc(2024, 6, 10, 5, 0, 0))
            .unwrap()
            .unwrap();
        assert_eq!(next.utc, utc(2024, 6, 10, 6, 30, 45));
        assert_eq!(next.display, "?? 06:30:45");
    }

    #[test]
    fn display_pads_fields_and_marks_wildcards() {
        let time = ScheduleTime::from_decoded(&[0, 0, 7, WILDCARD_DECODED]).unwrap();
        assert_eq!(time.to_string(), "?? 07:00:00");

        let time = ScheduleTime::from_decoded(&[5, 23, 15]).unwrap();
        assert_eq!(time.to_string(), "15 23:05:00");
    }

    #[test]
    fn parse_accepts_wildcards_and_seconds() {
        let time = ScheduleTime::parse("?? 20:00").unwrap();
        assert_eq!(time.day, WILDCARD_DECODED);
        assert_eq!(time.hour, 20);
        assert_eq!(time.minute, 0);
        assert_eq!(time.second, None);

        let time = ScheduleTime::parse("?? ??:30:15").unwrap();
        assert_eq!(time.hour, WILDCARD_DECODED);
        assert_eq!(time.second, Some(15));
    }

    #[test]
    fn parse_rejects_malformed_strings() {
        for text in ["", "15", "15 10", "?? ??:??", "x 10:00", "15 10:00:00:00", "15 ten:00"] {
            assert!(
                matches!(ScheduleTime::parse(text), Err(Error::MalformedSchedule(_))),
                "{text:?} should be malformed"
            );
        }
    }

    #[test]
    fn parse_rejects_out_of_range_fields() {
        assert!(matches!(
            ScheduleTime::parse("32 10:00"),
            Err(Error::ValueOutOfRange(32, 1, 31))
        ));
        assert!(matches!(
            ScheduleTime::parse("0 10:00"),
            Err(Error::ValueOutOfRange(0, 1, 31))
        ));
        assert!(matches!(
            ScheduleTime::parse("15 24:00"),
            Err(Error::ValueOutOfRange(24, 0, 23))
        ));
        assert!(matches!(
            ScheduleTime::parse("15 10:60"),
            Err(Error::ValueOutOfRange(60, 0, 59))
        ));
    }

    #[test]
    fn encoded_schedule_reads_back_unchanged() {
        let time = ScheduleTime::parse("15 09:30").unwrap();
        let bytes = time.register_bytes();
        assert_eq!(bytes, [0x30, 0x09, 0x15]);

        let read = ScheduleTime::from_registers(&bytes).unwrap();
        assert_eq!((read.day, read.hour, read.minute), (15, 9, 30));
    }

    #[test]
    fn next_occurrence_display_matches_schedule() {
        let time = ScheduleTime::parse("?? 07:30").unwrap();
        let next = codec()
            .next_occurrence_at(&time, utc(2024, 6, 10, 5, 0, 0))
            .unwrap()
            .unwrap();
        assert_eq!(next.display, time.to_string());
        assert_eq!(next.display, "?? 07:30:00");
    }

    #[test]
    fn wildcard_is_written_as_0x80_and_read_as_80() {
        let bytes = ScheduleTime::parse("?? ??:10").unwrap().register_bytes();
        assert_eq!(bytes, [0x10, WILDCARD_RAW_WRITE, WILDCARD_RAW_WRITE]);
        assert_eq!(WILDCARD_RAW_WRITE, 128);

        let read = ScheduleTime::from_registers(&bytes).unwrap();
        assert_eq!(read.day, WILDCARD_DECODED);
        assert_eq!(read.hour, WILDCARD_DECODED);
        assert_eq!(read.pattern().unwrap(), RecurrencePattern::EveryHour);
    }

    #[test]
    fn from_decoded_needs_three_or_four_values() {
        assert!(ScheduleTime::from_decoded(&[1, 2]).is_err());
        assert!(ScheduleTime::from_decoded(&[1, 2, 3, 4, 5]).is_err());
    }
}
