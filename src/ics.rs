//! Best-effort iCalendar (RFC 5545) reader for Canvas and Apple feeds.
//!
//! Only `VEVENT` components are read and only the handful of properties the
//! planner stores. Malformed input never fails the parse: broken dates fall
//! back to defaults, which is reported through [`ParsedFeed::date_fallbacks`]
//! and the per-event `date_fallback` flag. A feed the `icalendar` parser
//! rejects as a whole is read again one `VEVENT` block at a time.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SubsecRound, TimeZone, Utc};
use icalendar::{Calendar, CalendarComponent, Component, Event, Property};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::db::models::{CalendarEvent, EventType, Provider};
use crate::timezone;

/// Result of parsing one feed body.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub events: Vec<CalendarEvent>,
    /// Number of `BEGIN:VEVENT` blocks seen.
    pub vevent_blocks: usize,
    /// Physical lines that were continuations of a folded property.
    pub folded_lines: usize,
    /// Events dropped because they had no SUMMARY.
    pub dropped_untitled: usize,
    /// Events that received a generated id because they had no UID.
    pub synthetic_uids: usize,
    /// Dates replaced by a default value.
    pub date_fallbacks: usize,
}

fn is_continuation(line: &str) -> bool {
    line.starts_with(' ') || line.starts_with('\t')
}

fn is_line(line: &str, expected: &str) -> bool {
    line.trim_end().eq_ignore_ascii_case(expected)
}

fn count_folded(text: &str) -> usize {
    text.split('\n').skip(1).filter(|l| is_continuation(l)).count()
}

fn count_vevents(text: &str) -> usize {
    text.split('\n').filter(|l| is_line(l, "BEGIN:VEVENT")).count()
}

/// Cut the feed into standalone `VEVENT` blocks, leaving out any nested
/// component. `END:VEVENT` always closes the open block, even when a nested
/// component was never terminated.
fn vevent_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;
    let mut nested = 0usize;

    for line in text.split('\n').map(|l| l.trim_end_matches('\r')) {
        if is_line(line, "BEGIN:VEVENT") {
            if current.is_some() {
                debug!("VEVENT opened before the previous one closed; discarding the previous one");
            }
            current = Some(vec![line]);
            nested = 0;
            continue;
        }
        let Some(lines) = current.as_mut() else {
            continue;
        };
        if is_line(line, "END:VEVENT") {
            lines.push(line);
            blocks.push(lines.join("\r\n"));
            current = None;
            nested = 0;
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        let upper = line.to_ascii_uppercase();
        if !is_continuation(line) && upper.starts_with("BEGIN:") {
            nested += 1;
        } else if !is_continuation(line) && upper.starts_with("END:") {
            nested = nested.saturating_sub(1);
        } else if nested == 0 {
            lines.push(line);
        }
    }

    if current.is_some() {
        debug!("Feed ended inside an unterminated VEVENT; ignoring it");
    }
    blocks
}

fn calendar_events(calendar: Calendar) -> Vec<Event> {
    calendar
        .components
        .into_iter()
        .filter_map(|c| match c {
            CalendarComponent::Event(e) => Some(e),
            _ => None,
        })
        .collect()
}

/// Parse the whole feed; when that fails or loses events, parse every
/// `VEVENT` block on its own and keep the ones that parse.
fn read_events(text: &str, expected: usize) -> Vec<Event> {
    match text.parse::<Calendar>() {
        Ok(calendar) => {
            let events = calendar_events(calendar);
            if events.len() == expected {
                return events;
            }
            warn!(
                "Feed parsed to {} of {} VEVENT blocks; reading blocks one by one",
                events.len(),
                expected
            );
        }
        Err(e) => warn!("Feed is not a well-formed calendar ({}); reading blocks one by one", e),
    }

    vevent_blocks(text)
        .into_iter()
        .filter_map(|block| {
            let wrapped = format!(
                "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//StudyHub//Feed//EN\r\n{}\r\nEND:VCALENDAR\r\n",
                block
            );
            match wrapped.parse::<Calendar>() {
                Ok(calendar) => calendar_events(calendar).into_iter().next(),
                Err(e) => {
                    warn!("Skipping unreadable VEVENT block: {}", e);
                    None
                }
            }
        })
        .collect()
}

fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    let eod = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default();
    Utc.from_utc_datetime(&date.and_time(eod))
}

/// Parse an iCalendar DATE or DATE-TIME value.
///
/// * `YYYYMMDD` is a date-only value and resolves to 23:59:59 UTC that day.
/// * `YYYYMMDDTHHMMSSZ` is UTC.
/// * `YYYYMMDDTHHMMSS` is local to `tzid` when the zone is known, otherwise
///   read as UTC.
pub fn parse_ics_datetime(value: &str, tzid: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value.trim();

    if value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()) {
        return NaiveDate::parse_from_str(value, "%Y%m%d").ok().map(end_of_day);
    }

    let (body, is_utc) = match value.strip_suffix('Z').or_else(|| value.strip_suffix('z')) {
        Some(body) => (body, true),
        None => (value, false),
    };
    let local = NaiveDateTime::parse_from_str(body, "%Y%m%dT%H%M%S")
        .or_else(|_| NaiveDateTime::parse_from_str(body, "%Y%m%dT%H%M"))
        .ok()?;

    if is_utc {
        return Some(Utc.from_utc_datetime(&local));
    }

    match tzid {
        Some(tz) => match timezone::lookup(tz) {
            Some(zone) => Some(zone.to_utc(local)),
            None => {
                debug!("Unknown TZID '{}'; reading {} as UTC", tz, value);
                Some(Utc.from_utc_datetime(&local))
            }
        },
        None => Some(Utc.from_utc_datetime(&local)),
    }
}

/// Deterministic id for events that lack a UID, so repeated syncs of the same
/// feed keep matching the same stored row.
///
/// Built from the raw DTSTART / DTEND / DUE text, never from a substituted
/// default, so an event with broken or missing dates keeps its id.
pub fn synthetic_uid(
    title: &str,
    dtstart: Option<&str>,
    dtend: Option<&str>,
    due: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    for part in [dtstart, dtend, due] {
        hasher.update(b"|");
        hasher.update(part.unwrap_or_default().trim().as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    format!("synthetic-{}", &digest[..32])
}

/// Single-valued property lookup, tolerant of lower-case names.
fn property<'a>(event: &'a Event, name: &str) -> Option<&'a Property> {
    event.properties().get(name).or_else(|| {
        event
            .properties()
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, p)| p)
    })
}

fn text_property(event: &Event, name: &str) -> Option<String> {
    property(event, name).and_then(|p| non_empty(unescape_text(p.value())))
}

fn raw_value<'a>(event: &'a Event, name: &str) -> Option<&'a str> {
    property(event, name).map(|p| p.value())
}

fn property_datetime(prop: &Property) -> Option<DateTime<Utc>> {
    let tzid = prop
        .params()
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("TZID"))
        .map(|(_, p)| p.value().trim_matches('"'));
    parse_ics_datetime(prop.value(), tzid)
}

fn categories(event: &Event) -> Vec<String> {
    let single = event
        .properties()
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case("CATEGORIES"))
        .map(|(_, p)| p);
    let multi = event
        .multi_properties()
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case("CATEGORIES"))
        .flat_map(|(_, props)| props.iter());

    let mut out: Vec<String> = single
        .chain(multi)
        .flat_map(|p| {
            unescape_text(p.value())
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect::<Vec<_>>()
        })
        .collect();
    out.dedup();
    out
}

fn to_calendar_event(
    event: &Event,
    provider: Provider,
    feed: &mut ParsedFeed,
) -> Option<CalendarEvent> {
    let Some(title) = text_property(event, "SUMMARY") else {
        feed.dropped_untitled += 1;
        return None;
    };

    let dtstart = property(event, "DTSTART");
    let dtend = property(event, "DTEND");
    let due_prop = property(event, "DUE");

    let mut fallback = false;
    let due = due_prop.and_then(property_datetime);

    let start = match dtstart {
        Some(prop) => property_datetime(prop).or_else(|| {
            warn!(
                "Unparseable DTSTART '{}' for '{}'; using current time",
                prop.value(),
                title
            );
            None
        }),
        None => due,
    };
    let start = start.unwrap_or_else(|| {
        fallback = true;
        if dtstart.is_none() {
            warn!("Event '{}' has no start date; using current time", title);
        }
        Utc::now().trunc_subsecs(0)
    });

    let end = match dtend {
        Some(prop) => property_datetime(prop).unwrap_or_else(|| {
            warn!(
                "Unparseable DTEND '{}' for '{}'; reusing start time",
                prop.value(),
                title
            );
            fallback = true;
            start
        }),
        None => due.unwrap_or(start),
    };

    if fallback {
        feed.date_fallbacks += 1;
    }

    let source_event_id = match raw_value(event, "UID").and_then(|v| non_empty(v.to_string())) {
        Some(uid) => uid,
        None => {
            feed.synthetic_uids += 1;
            synthetic_uid(
                &title,
                raw_value(event, "DTSTART"),
                raw_value(event, "DTEND"),
                raw_value(event, "DUE"),
            )
        }
    };

    let event_type =
        EventType::classify(&title, &categories(event), Some(&source_event_id));

    Some(CalendarEvent {
        title,
        description: text_property(event, "DESCRIPTION"),
        start_time: start,
        end_time: end,
        location: text_property(event, "LOCATION"),
        event_type,
        source_provider: provider,
        source_event_id,
        date_fallback: fallback,
    })
}

/// Parse raw ICS text into calendar events for `provider`.
pub fn parse_ics(text: &str, provider: Provider) -> ParsedFeed {
    let vevent_blocks = count_vevents(text);
    let mut feed = ParsedFeed {
        vevent_blocks,
        folded_lines: count_folded(text),
        ..Default::default()
    };

    // Tab-folded continuations read the same as space-folded ones.
    let text = text.replace("\n\t", "\n ");
    for event in read_events(&text, vevent_blocks) {
        if let Some(parsed) = to_calendar_event(&event, provider, &mut feed) {
            feed.events.push(parsed);
        }
    }

    feed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn wrap(body: &str) -> String {
        format!(
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Test//EN\r\n{}END:VCALENDAR\r\n",
            body
        )
    }

    #[test]
    fn parses_utc_date_time() {
        assert_eq!(
            parse_ics_datetime("20241201T140000Z", None),
            Some(utc("2024-12-01T14:00:00Z"))
        );
    }

    #[test]
    fn date_only_is_end_of_day_utc() {
        assert_eq!(
            parse_ics_datetime("20241201", None),
            Some(utc("2024-12-01T23:59:59Z"))
        );
    }

    #[test]
    fn honors_tzid() {
        assert_eq!(
            parse_ics_datetime("20241201T090000", Some("America/Chicago")),
            Some(utc("2024-12-01T15:00:00Z"))
        );
        // Unknown zone reads as UTC
        assert_eq!(
            parse_ics_datetime("20241201T090000", Some("Mars/Olympus")),
            Some(utc("2024-12-01T09:00:00Z"))
        );
        assert_eq!(parse_ics_datetime("garbage", None), None);
    }

    #[test]
    fn unfolds_continuation_lines() {
        let ics = wrap(
            "BEGIN:VEVENT\r\nUID:abc\r\nSUMMARY:Read chapter\r\n  four and five\r\nDESCRIPTION:line one\r\n\tline two\r\nDTSTART:20241201T140000Z\r\nEND:VEVENT\r\n",
        );
        let feed = parse_ics(&ics, Provider::Canvas);
        assert_eq!(feed.folded_lines, 2);
        let ev = &feed.events[0];
        assert_eq!(ev.title, "Read chapter four and five");
        assert_eq!(ev.description.as_deref(), Some("line oneline two"));
    }

    #[test]
    fn canvas_assignment_event() {
        let ics = wrap(
            "BEGIN:VEVENT\r\nDTSTAMP:20241101T000000Z\r\nDTSTART;VALUE=DATE:20241201\r\nDTEND;VALUE=DATE:20241201\r\nSUMMARY:Lab Report 3 [CHEM 101]\r\nUID:event-assignment-9981\r\nURL:https://canvas.example.edu/courses/1/assignments/9981\r\nEND:VEVENT\r\n",
        );
        let feed = parse_ics(&ics, Provider::Canvas);
        assert_eq!(feed.vevent_blocks, 1);
        let ev = &feed.events[0];
        assert_eq!(ev.source_event_id, "event-assignment-9981");
        assert_eq!(ev.event_type, EventType::Assignment);
        assert_eq!(ev.start_time, utc("2024-12-01T23:59:59Z"));
        assert_eq!(ev.source_provider, Provider::Canvas);
        assert!(!ev.date_fallback);
    }

    #[test]
    fn drops_untitled_and_generates_stable_ids() {
        let body = "BEGIN:VEVENT\r\nDTSTART:20241201T140000Z\r\nEND:VEVENT\r\nBEGIN:VEVENT\r\nSUMMARY:Study group\r\nDTSTART:20241202T180000Z\r\nDTEND:20241202T200000Z\r\nEND:VEVENT\r\n";
        let first = parse_ics(&wrap(body), Provider::Apple);
        let second = parse_ics(&wrap(body), Provider::Apple);

        assert_eq!(first.vevent_blocks, 2);
        assert_eq!(first.dropped_untitled, 1);
        assert_eq!(first.synthetic_uids, 1);
        assert_eq!(first.events.len(), 1);
        assert!(first.events[0].source_event_id.starts_with("synthetic-"));
        assert_eq!(
            first.events[0].source_event_id,
            second.events[0].source_event_id
        );
    }

    #[test]
    fn missing_end_reuses_start_and_due_is_used() {
        let body = "BEGIN:VEVENT\r\nUID:a\r\nSUMMARY:Office hours\r\nDTSTART:20241203T150000Z\r\nEND:VEVENT\r\nBEGIN:VEVENT\r\nUID:b\r\nSUMMARY:Essay due\r\nDUE:20241204T235900Z\r\nEND:VEVENT\r\n";
        let feed = parse_ics(&wrap(body), Provider::Canvas);
        assert_eq!(feed.events[0].end_time, feed.events[0].start_time);
        assert_eq!(feed.events[1].start_time, utc("2024-12-04T23:59:00Z"));
        assert_eq!(feed.events[1].end_time, utc("2024-12-04T23:59:00Z"));
        assert_eq!(feed.date_fallbacks, 0);
    }

    #[test]
    fn bad_dates_are_flagged_as_fallbacks() {
        let body = "BEGIN:VEVENT\r\nUID:x\r\nSUMMARY:Broken\r\nDTSTART:not-a-date\r\nDTEND:also-bad\r\nEND:VEVENT\r\n";
        let before = Utc::now().trunc_subsecs(0);
        let feed = parse_ics(&wrap(body), Provider::Canvas);
        let ev = &feed.events[0];
        assert!(ev.date_fallback);
        assert_eq!(feed.date_fallbacks, 1);
        assert!(ev.start_time >= before);
        assert_eq!(ev.end_time, ev.start_time);
    }

    #[test]
    fn nested_alarm_does_not_overwrite_event_fields() {
        let body = "BEGIN:VEVENT\r\nUID:n\r\nSUMMARY:Midterm\r\nDESCRIPTION:Room 204\r\nDTSTART:20241010T130000Z\r\nBEGIN:VALARM\r\nACTION:DISPLAY\r\nDESCRIPTION:Reminder\r\nEND:VALARM\r\nEND:VEVENT\r\n";
        let feed = parse_ics(&wrap(body), Provider::Apple);
        let ev = &feed.events[0];
        assert_eq!(ev.description.as_deref(), Some("Room 204"));
        assert_eq!(ev.event_type, EventType::Exam);
    }

    #[test]
    fn unescapes_text_and_reads_quoted_params() {
        let body = "BEGIN:VEVENT\r\nUID:q\r\nSUMMARY:Lunch\\, then review\r\nLOCATION:Hall A\\; Room 2\r\nDTSTART;TZID=\"America/New_York\":20240715T090000\r\nCATEGORIES:Social,Food\r\nEND:VEVENT\r\n";
        let feed = parse_ics(&wrap(body), Provider::Apple);
        let ev = &feed.events[0];
        assert_eq!(ev.title, "Lunch, then review");
        assert_eq!(ev.location.as_deref(), Some("Hall A; Room 2"));
        assert_eq!(ev.start_time, utc("2024-07-15T13:00:00Z"));
    }

    #[test]
    fn lf_only_feeds_and_unknown_properties() {
        let ics = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nUID:lf\nX-CUSTOM:whatever\nSUMMARY:Seminar\nDTSTART:20240101T100000Z\nEND:VEVENT\nEND:VCALENDAR";
        let feed = parse_ics(ics, Provider::Apple);
        assert_eq!(feed.events.len(), 1);
        assert_eq!(feed.events[0].event_type, EventType::Class);
    }

    #[test]
    fn unclosed_alarm_does_not_swallow_following_events() {
        let body = "BEGIN:VEVENT\r\nUID:a\r\nSUMMARY:Alpha\r\nDTSTART:20241201T100000Z\r\nBEGIN:VALARM\r\nACTION:DISPLAY\r\nDESCRIPTION:Reminder\r\nEND:VEVENT\r\nBEGIN:VEVENT\r\nUID:b\r\nSUMMARY:Bravo\r\nDTSTART:20241202T100000Z\r\nEND:VEVENT\r\nBEGIN:VEVENT\r\nUID:c\r\nSUMMARY:Charlie\r\nDTSTART:20241203T100000Z\r\nEND:VEVENT\r\n";
        let feed = parse_ics(&wrap(body), Provider::Apple);
        assert_eq!(feed.vevent_blocks, 3);
        let mut ids: Vec<&str> = feed
            .events
            .iter()
            .map(|e| e.source_event_id.as_str())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c"]);
        let bravo = feed.events.iter().find(|e| e.source_event_id == "b").unwrap();
        assert_eq!(bravo.start_time, utc("2024-12-02T10:00:00Z"));
    }

    #[test]
    fn blocks_close_on_end_vevent_and_drop_nested_lines() {
        let text = "BEGIN:VEVENT\r\nUID:a\r\nBEGIN:VALARM\r\nTRIGGER:-PT15M\r\nEND:VEVENT\r\nBEGIN:VEVENT\r\nUID:b\r\nEND:VEVENT\r\n";
        let blocks = vevent_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], "BEGIN:VEVENT\r\nUID:a\r\nEND:VEVENT");
        assert!(!blocks[0].contains("TRIGGER"));
    }

    #[test]
    fn synthetic_id_does_not_depend_on_substituted_dates() {
        let body = "BEGIN:VEVENT\r\nSUMMARY:Read syllabus\r\nEND:VEVENT\r\n";
        let feed = parse_ics(&wrap(body), Provider::Apple);
        let ev = &feed.events[0];
        assert!(ev.date_fallback);
        assert_eq!(
            ev.source_event_id,
            synthetic_uid("Read syllabus", None, None, None)
        );

        let other = parse_ics(
            &wrap("BEGIN:VEVENT\r\nSUMMARY:Read syllabus\r\nDTSTART:20241201T100000Z\r\nEND:VEVENT\r\n"),
            Provider::Apple,
        );
        assert_ne!(other.events[0].source_event_id, ev.source_event_id);
    }
}
