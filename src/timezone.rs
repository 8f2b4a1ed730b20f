//! Small hardcoded table of US time zones.
//!
//! Feeds from Canvas and Apple mostly carry `TZID=America/...` parameters, so a
//! full tz database is not needed. Zones that observe daylight saving follow the
//! current US rule: from the second Sunday of March 02:00 local time until the
//! first Sunday of November 02:00 local time.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    TimeZone, Utc, Weekday,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsZone {
    pub name: &'static str,
    /// Standard-time offset from UTC in hours.
    pub standard_offset_hours: i32,
    pub observes_dst: bool,
}

// (name, standard offset, observes DST)
const ZONES: &[(&str, i32, bool)] = &[
    ("America/New_York", -5, true),
    ("America/Detroit", -5, true),
    ("America/Indiana/Indianapolis", -5, true),
    ("America/Kentucky/Louisville", -5, true),
    ("US/Eastern", -5, true),
    ("Eastern Standard Time", -5, true),
    ("America/Chicago", -6, true),
    ("US/Central", -6, true),
    ("Central Standard Time", -6, true),
    ("America/Denver", -7, true),
    ("America/Boise", -7, true),
    ("US/Mountain", -7, true),
    ("Mountain Standard Time", -7, true),
    ("America/Phoenix", -7, false),
    ("US/Arizona", -7, false),
    ("US Mountain Standard Time", -7, false),
    ("America/Los_Angeles", -8, true),
    ("US/Pacific", -8, true),
    ("Pacific Standard Time", -8, true),
    ("America/Anchorage", -9, true),
    ("US/Alaska", -9, true),
    ("Alaskan Standard Time", -9, true),
    ("Pacific/Honolulu", -10, false),
    ("US/Hawaii", -10, false),
    ("Hawaiian Standard Time", -10, false),
    ("UTC", 0, false),
    ("Etc/UTC", 0, false),
    ("GMT", 0, false),
];

/// Look up a zone by name (case-insensitive, surrounding quotes ignored).
pub fn lookup(name: &str) -> Option<UsZone> {
    let name = name.trim().trim_matches('"');
    ZONES
        .iter()
        .find(|(n, _, _)| n.eq_ignore_ascii_case(name))
        .map(|&(name, standard_offset_hours, observes_dst)| UsZone {
            name,
            standard_offset_hours,
            observes_dst,
        })
}

/// Names accepted by [`lookup`], used for settings validation.
pub fn known_zone_names() -> impl Iterator<Item = &'static str> {
    ZONES.iter().map(|(n, _, _)| *n)
}

fn nth_sunday(year: i32, month: u32, n: u8) -> NaiveDate {
    NaiveDate::from_weekday_of_month_opt(year, month, Weekday::Sun, n)
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(year, month, 1).unwrap_or_default())
}

fn two_am(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::from_hms_opt(2, 0, 0).unwrap_or_default())
}

impl UsZone {
    fn standard_offset(&self) -> Duration {
        Duration::hours(self.standard_offset_hours as i64)
    }

    /// DST window for `year` expressed in local standard time.
    fn dst_window_local(&self, year: i32) -> (NaiveDateTime, NaiveDateTime) {
        let start = two_am(nth_sunday(year, 3, 2));
        // 02:00 daylight time is 01:00 standard time.
        let end = two_am(nth_sunday(year, 11, 1)) - Duration::hours(1);
        (start, end)
    }

    /// Offset in effect at the given UTC instant.
    pub fn offset_at(&self, utc: DateTime<Utc>) -> FixedOffset {
        let mut offset = self.standard_offset();
        if self.observes_dst {
            let local_standard = utc.naive_utc() + self.standard_offset();
            let (start, end) = self.dst_window_local(local_standard.year());
            if local_standard >= start && local_standard < end {
                offset = offset + Duration::hours(1);
            }
        }
        FixedOffset::east_opt(offset.num_seconds() as i32).unwrap_or_else(|| Utc.fix())
    }

    /// Interpret a wall-clock time in this zone and convert it to UTC.
    ///
    /// Wall-clock times inside the repeated November hour resolve to daylight
    /// time; times inside the skipped March hour resolve to standard time.
    pub fn to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        let mut offset = self.standard_offset();
        if self.observes_dst {
            let (start, _) = self.dst_window_local(local.year());
            let end_daylight = two_am(nth_sunday(local.year(), 11, 1));
            if local >= start + Duration::hours(1) && local < end_daylight {
                offset = offset + Duration::hours(1);
            }
        }
        Utc.from_utc_datetime(&(local - offset))
    }

    /// Convert a UTC instant to wall-clock time in this zone.
    pub fn to_local(&self, utc: DateTime<Utc>) -> NaiveDateTime {
        utc.with_timezone(&self.offset_at(utc)).naive_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let zone = lookup("america/chicago").unwrap();
        assert_eq!(zone.name, "America/Chicago");
        assert_eq!(zone.standard_offset_hours, -6);
        assert!(lookup("\"America/Denver\"").is_some());
        assert!(lookup("Europe/Warsaw").is_none());
    }

    #[test]
    fn new_york_winter_and_summer() {
        let zone = lookup("America/New_York").unwrap();
        assert_eq!(
            zone.to_utc(dt("2024-01-15 09:00:00")),
            Utc.from_utc_datetime(&dt("2024-01-15 14:00:00"))
        );
        assert_eq!(
            zone.to_utc(dt("2024-07-15 09:00:00")),
            Utc.from_utc_datetime(&dt("2024-07-15 13:00:00"))
        );
    }

    #[test]
    fn phoenix_ignores_dst() {
        let zone = lookup("America/Phoenix").unwrap();
        assert_eq!(
            zone.to_utc(dt("2024-07-15 09:00:00")),
            Utc.from_utc_datetime(&dt("2024-07-15 16:00:00"))
        );
    }

    #[test]
    fn dst_boundaries_2024() {
        let zone = lookup("US/Pacific").unwrap();
        // DST starts 2024-03-10 02:00 PST == 10:00 UTC
        let before = Utc.from_utc_datetime(&dt("2024-03-10 09:59:59"));
        let after = Utc.from_utc_datetime(&dt("2024-03-10 10:00:00"));
        assert_eq!(zone.offset_at(before).local_minus_utc(), -8 * 3600);
        assert_eq!(zone.offset_at(after).local_minus_utc(), -7 * 3600);

        // DST ends 2024-11-03 02:00 PDT == 09:00 UTC
        let before = Utc.from_utc_datetime(&dt("2024-11-03 08:59:59"));
        let after = Utc.from_utc_datetime(&dt("2024-11-03 09:00:00"));
        assert_eq!(zone.offset_at(before).local_minus_utc(), -7 * 3600);
        assert_eq!(zone.offset_at(after).local_minus_utc(), -8 * 3600);
    }

    #[test]
    fn to_local_inverts_to_utc() {
        let zone = lookup("America/Chicago").unwrap();
        for local in ["2024-02-01 08:30:00", "2024-06-01 23:15:00", "2024-12-31 00:00:00"] {
            let local = dt(local);
            assert_eq!(zone.to_local(zone.to_utc(local)), local);
        }
    }
}
