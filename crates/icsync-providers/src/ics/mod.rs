//! Parsing and validation of iCalendar feeds.
//!
//! [`parse_calendar`] turns fetched bytes into calendar metadata plus one
//! [`CalendarEntry`] per UID. It performs no I/O.

mod decode;
mod event;

use std::collections::HashMap;

use icalendar::parser::{read_calendar, unfold};
use icsync_core::{CalendarEntry, EventData, color_from_string};
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use crate::error::{ProviderResult, SyncError};

pub use decode::decode;

/// The normalized content of one feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCalendar {
    /// Calendar name from the feed, or the fetch-provided hint.
    pub name: Option<String>,
    /// Calendar color (ARGB) from the feed.
    pub color: Option<u32>,
    /// One entry per UID, in feed order.
    pub entries: Vec<CalendarEntry>,
}

impl ParsedCalendar {
    /// Returns the number of VEVENT components, exceptions included.
    pub fn event_count(&self) -> usize {
        self.entries.iter().map(|e| 1 + e.exceptions.len()).sum()
    }
}

/// Parses ICS bytes declared in `charset` into a [`ParsedCalendar`].
///
/// `name_hint` is used when the feed has no name of its own.
pub fn parse_calendar(
    bytes: &[u8],
    charset: Option<&str>,
    name_hint: Option<&str>,
) -> ProviderResult<ParsedCalendar> {
    let text = decode(bytes, charset);
    if !text
        .trim_start()
        .get(..15)
        .is_some_and(|head| head.eq_ignore_ascii_case("BEGIN:VCALENDAR"))
    {
        return Err(SyncError::parse("Not an iCalendar feed (missing BEGIN:VCALENDAR)"));
    }

    let unfolded = unfold(&text);
    let calendar = read_calendar(&unfolded)
        .map_err(|e| SyncError::parse(format!("Invalid iCalendar data: {}", e)))?;

    let calendar_prop = |name: &str| {
        calendar
            .properties
            .iter()
            .find(|p| p.name.as_ref().eq_ignore_ascii_case(name))
            .map(|p| event::unescape_text(p.val.as_ref()).trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let name = calendar_prop("X-WR-CALNAME")
        .or_else(|| calendar_prop("NAME"))
        .or_else(|| name_hint.map(str::to_string));

    let color = calendar_prop("COLOR")
        .and_then(|c| parse_color(&c))
        .or_else(|| calendar_prop("X-APPLE-CALENDAR-COLOR").and_then(|c| parse_color(&c)));

    let mut groups = EntryGroups::default();
    for component in calendar
        .components
        .iter()
        .filter(|c| c.name.as_ref().eq_ignore_ascii_case("VEVENT"))
    {
        let uid = event::text_prop(component, "UID").map(|uid| uid.trim().to_string());
        let data = event::event_data(component);
        trace!(uid = ?uid, summary = ?data.summary, "Parsed VEVENT");
        groups.push(uid, data);
    }

    let entries = groups.into_entries();
    debug!(entries = entries.len(), name = ?name, "Parsed calendar");

    Ok(ParsedCalendar {
        name,
        color,
        entries,
    })
}

/// Accepts CSS3 names, `#RGB`, `#RRGGBB` and the `#RRGGBBAA` form some
/// vendors emit.
fn parse_color(value: &str) -> Option<u32> {
    let value = value.trim();
    match value.strip_prefix('#') {
        Some(hex) if hex.len() == 8 && hex.is_ascii() => color_from_string(&value[..7]),
        _ => color_from_string(value),
    }
}

struct Group {
    uid: Option<String>,
    master: Option<EventData>,
    exceptions: Vec<EventData>,
}

/// Groups VEVENTs by UID into a master and its recurrence exceptions.
#[derive(Default)]
struct EntryGroups {
    groups: Vec<Group>,
    by_uid: HashMap<String, usize>,
}

impl EntryGroups {
    fn push(&mut self, uid: Option<String>, data: EventData) {
        let Some(key) = uid.clone().filter(|u| !u.is_empty()) else {
            self.groups.push(Group {
                uid,
                master: Some(data),
                exceptions: Vec::new(),
            });
            return;
        };

        let is_exception = data.recurrence_id.is_some();
        if let Some(&index) = self.by_uid.get(&key) {
            let group = &mut self.groups[index];
            if is_exception {
                group.exceptions.push(data);
                return;
            }
            if group.master.is_none() {
                group.master = Some(data);
                return;
            }
            // A second master under the same UID stays separate so the
            // reconciler rejects it as a duplicate.
            self.groups.push(Group {
                uid,
                master: Some(data),
                exceptions: Vec::new(),
            });
            return;
        }

        self.by_uid.insert(key, self.groups.len());
        let (master, exceptions) = if is_exception {
            (None, vec![data])
        } else {
            (Some(data), Vec::new())
        };
        self.groups.push(Group {
            uid,
            master,
            exceptions,
        });
    }

    fn into_entries(self) -> Vec<CalendarEntry> {
        self.groups
            .into_iter()
            .filter_map(|group| {
                let Group {
                    uid,
                    master,
                    mut exceptions,
                } = group;
                let master = match master {
                    Some(master) => master,
                    None if !exceptions.is_empty() => exceptions.remove(0),
                    None => return None,
                };
                let fingerprint = fingerprint(uid.as_deref(), &master, &exceptions);
                Some(CalendarEntry::new(uid, master, fingerprint).with_exceptions(exceptions))
            })
            .collect()
    }
}

/// SHA-256 over the normalized payload of an entry.
fn fingerprint(uid: Option<&str>, master: &EventData, exceptions: &[EventData]) -> String {
    let payload = serde_json::to_vec(&(uid, master, exceptions)).unwrap_or_default();
    format!("{:x}", Sha256::digest(&payload))
}
