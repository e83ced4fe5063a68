//! Conversion of a parsed VEVENT component into [`EventData`].

use chrono::{NaiveDate, NaiveDateTime};
use icalendar::parser::{Component, Property};
use icsync_core::{Alarm, EventData, EventTime};

const DATE: &str = "%Y%m%d";
const DATE_TIME: &str = "%Y%m%dT%H%M%S";

/// Returns the first property with the given name.
pub(crate) fn find_prop<'c, 'a>(component: &'c Component<'a>, name: &str) -> Option<&'c Property<'a>> {
    component
        .properties
        .iter()
        .find(|p| p.name.as_ref().eq_ignore_ascii_case(name))
}

/// Returns the unescaped text value of a property, if present and not blank.
pub(crate) fn text_prop(component: &Component<'_>, name: &str) -> Option<String> {
    find_prop(component, name)
        .map(|p| unescape_text(p.val.as_ref()))
        .filter(|v| !v.trim().is_empty())
}

fn param<'p>(prop: &'p Property<'_>, key: &str) -> Option<&'p str> {
    prop.params
        .iter()
        .find(|p| p.key.as_ref().eq_ignore_ascii_case(key))
        .and_then(|p| p.val.as_ref().map(|v| v.as_ref()))
}

/// Builds the event payload of one VEVENT.
pub(crate) fn event_data(component: &Component<'_>) -> EventData {
    let start = find_prop(component, "DTSTART").and_then(parse_time);
    let end = find_prop(component, "DTEND").and_then(parse_time);

    let alarms = component
        .components
        .iter()
        .filter(|c| c.name.as_ref().eq_ignore_ascii_case("VALARM"))
        .filter_map(|alarm| parse_alarm(alarm, start.as_ref(), end.as_ref()))
        .collect();

    EventData {
        summary: text_prop(component, "SUMMARY"),
        description: text_prop(component, "DESCRIPTION"),
        location: text_prop(component, "LOCATION"),
        url: text_prop(component, "URL"),
        status: text_prop(component, "STATUS"),
        duration: end
            .is_none()
            .then(|| text_prop(component, "DURATION"))
            .flatten(),
        start,
        end,
        rrule: text_prop(component, "RRULE"),
        rdates: verbatim_values(component, "RDATE"),
        exdates: verbatim_values(component, "EXDATE"),
        recurrence_id: find_prop(component, "RECURRENCE-ID").map(verbatim),
        alarms,
        last_modified: find_prop(component, "LAST-MODIFIED")
            .and_then(parse_time)
            .map(|t| t.approximate_utc().timestamp_millis()),
    }
}

/// Parses a DATE or DATE-TIME property, keeping its timezone reference.
pub(crate) fn parse_time(prop: &Property<'_>) -> Option<EventTime> {
    let value = prop.val.as_ref().trim();
    let is_date = param(prop, "VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE"))
        || (value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()));

    if is_date {
        return NaiveDate::parse_from_str(value, DATE)
            .ok()
            .map(EventTime::AllDay);
    }

    if let Some(utc) = value.strip_suffix('Z') {
        return NaiveDateTime::parse_from_str(utc, DATE_TIME)
            .ok()
            .map(|dt| EventTime::Utc(dt.and_utc()));
    }

    let date_time = NaiveDateTime::parse_from_str(value, DATE_TIME).ok()?;
    Some(match param(prop, "TZID") {
        Some(tzid) => EventTime::Zoned {
            date_time,
            tzid: tzid.to_string(),
        },
        None => EventTime::Floating(date_time),
    })
}

/// Keeps a property's value together with its parameters, e.g.
/// `TZID=Europe/Paris:20240101T100000`.
fn verbatim(prop: &Property<'_>) -> String {
    let params: Vec<String> = prop
        .params
        .iter()
        .map(|p| match &p.val {
            Some(val) => format!("{}={}", p.key.as_ref(), val.as_ref()),
            None => p.key.as_ref().to_string(),
        })
        .collect();

    if params.is_empty() {
        prop.val.as_ref().to_string()
    } else {
        format!("{}:{}", params.join(";"), prop.val.as_ref())
    }
}

fn verbatim_values(component: &Component<'_>, name: &str) -> Vec<String> {
    component
        .properties
        .iter()
        .filter(|p| p.name.as_ref().eq_ignore_ascii_case(name))
        .map(verbatim)
        .collect()
}

fn parse_alarm(
    alarm: &Component<'_>,
    start: Option<&EventTime>,
    end: Option<&EventTime>,
) -> Option<Alarm> {
    let trigger = find_prop(alarm, "TRIGGER")?;
    let is_absolute = param(trigger, "VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE-TIME"));

    let minutes_before = if is_absolute {
        let at = parse_time(trigger)?.approximate_utc();
        (start?.approximate_utc() - at).num_minutes()
    } else {
        let offset = parse_duration_minutes(trigger.val.as_ref())?;
        let related_to_end = param(trigger, "RELATED").is_some_and(|v| v.eq_ignore_ascii_case("END"));
        match (related_to_end, start, end) {
            (true, Some(start), Some(end)) => {
                let length = (end.approximate_utc() - start.approximate_utc()).num_minutes();
                -offset - length
            }
            _ => -offset,
        }
    };

    Some(Alarm {
        minutes_before,
        action: text_prop(alarm, "ACTION").unwrap_or_else(|| "DISPLAY".to_string()),
        description: text_prop(alarm, "DESCRIPTION"),
    })
}

/// Parses an RFC 5545 duration (`-PT15M`, `P1DT2H`, `-P1W`) into signed
/// minutes. Seconds are truncated.
pub(crate) fn parse_duration_minutes(value: &str) -> Option<i64> {
    let value = value.trim();
    let (sign, rest) = match value.as_bytes().first()? {
        b'-' => (-1, &value[1..]),
        b'+' => (1, &value[1..]),
        _ => (1, value),
    };
    let rest = rest.strip_prefix('P').or_else(|| rest.strip_prefix('p'))?;

    let mut seconds: i64 = 0;
    let mut number = String::new();
    let mut in_time = false;
    let mut saw_unit = false;

    for c in rest.chars() {
        match c.to_ascii_uppercase() {
            'T' => in_time = true,
            d if d.is_ascii_digit() => number.push(d),
            unit => {
                let n: i64 = number.parse().ok()?;
                number.clear();
                let factor = match (unit, in_time) {
                    ('W', false) => 7 * 86_400,
                    ('D', false) => 86_400,
                    ('H', true) => 3_600,
                    ('M', true) => 60,
                    ('S', true) => 1,
                    _ => return None,
                };
                seconds = n
                    .checked_mul(factor)
                    .and_then(|s| seconds.checked_add(s))?;
                saw_unit = true;
            }
        }
    }

    (saw_unit && number.is_empty()).then_some(sign * seconds / 60)
}

/// Reverses RFC 5545 TEXT escaping.
pub(crate) fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n' | 'N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(parse_duration_minutes("-PT15M"), Some(-15));
        assert_eq!(parse_duration_minutes("PT0S"), Some(0));
        assert_eq!(parse_duration_minutes("-P1D"), Some(-1440));
        assert_eq!(parse_duration_minutes("-P1DT2H30M"), Some(-1590));
        assert_eq!(parse_duration_minutes("P1W"), Some(10_080));
        assert_eq!(parse_duration_minutes("15M"), None);
        assert_eq!(parse_duration_minutes("-PT"), None);
        assert_eq!(parse_duration_minutes("PT5"), None);
        assert_eq!(parse_duration_minutes("-P9999999999999999W"), None);
        assert_eq!(parse_duration_minutes("P99999999999999999999D"), None);
    }

    #[test]
    fn text_unescaping() {
        assert_eq!(
            unescape_text(r"Line one\nLine two\, with comma\; and \\ backslash"),
            "Line one\nLine two, with comma; and \\ backslash"
        );
    }
}
