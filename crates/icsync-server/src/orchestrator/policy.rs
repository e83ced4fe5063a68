//! Per-subscription rewrites applied to parsed entries before they are
//! reconciled.

use icsync_core::{Alarm, CalendarEntry, EventData, Subscription};

/// The alarm and description settings of one subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionPolicy {
    pub ignore_embedded_alerts: bool,
    pub default_alarm_minutes: Option<i64>,
    pub default_all_day_alarm_minutes: Option<i64>,
    pub ignore_description: bool,
}

impl SubscriptionPolicy {
    /// Reads the policy from a subscription's settings.
    pub fn from_subscription(subscription: &Subscription) -> Self {
        Self {
            ignore_embedded_alerts: subscription.ignore_embedded_alerts,
            default_alarm_minutes: subscription.default_alarm_minutes,
            default_all_day_alarm_minutes: subscription.default_all_day_alarm_minutes,
            ignore_description: subscription.ignore_description,
        }
    }

    /// Returns true if applying the policy changes nothing.
    pub fn is_passthrough(&self) -> bool {
        *self == Self::default()
    }

    /// Rewrites the master event and all of its exceptions.
    ///
    /// Whether the default alarm is the all-day one is decided by the
    /// master, so exceptions get the same alarm as their series.
    pub fn apply(&self, mut entry: CalendarEntry) -> CalendarEntry {
        if self.is_passthrough() {
            return entry;
        }

        let alarm_minutes = if entry.is_all_day() {
            self.default_all_day_alarm_minutes
        } else {
            self.default_alarm_minutes
        };

        self.rewrite(&mut entry.event, alarm_minutes);
        for exception in &mut entry.exceptions {
            self.rewrite(exception, alarm_minutes);
        }
        entry
    }

    fn rewrite(&self, event: &mut EventData, alarm_minutes: Option<i64>) {
        if self.ignore_embedded_alerts {
            event.alarms.clear();
        }
        if let Some(minutes) = alarm_minutes {
            event.alarms.push(Alarm::display(minutes));
        }
        if self.ignore_description {
            event.description = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use icsync_core::EventTime;

    fn event(all_day: bool) -> EventData {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let start = if all_day {
            EventTime::AllDay(date)
        } else {
            EventTime::Utc(date.and_hms_opt(9, 0, 0).unwrap().and_utc())
        };
        EventData {
            summary: Some("Review".to_string()),
            description: Some("Bring slides".to_string()),
            start: Some(start),
            alarms: vec![Alarm::display(30)],
            ..Default::default()
        }
    }

    fn entry(all_day: bool) -> CalendarEntry {
        let mut exception = event(all_day);
        exception.recurrence_id = Some("20240308T090000Z".to_string());
        CalendarEntry::new(Some("uid-1".to_string()), event(all_day), "fp")
            .with_exceptions(vec![exception])
    }

    #[test]
    fn default_policy_is_passthrough() {
        let policy = SubscriptionPolicy::default();
        assert!(policy.is_passthrough());
        assert_eq!(policy.apply(entry(false)), entry(false));
    }

    #[test]
    fn ignoring_alerts_and_adding_default_alarm() {
        let policy = SubscriptionPolicy {
            ignore_embedded_alerts: true,
            default_alarm_minutes: Some(15),
            default_all_day_alarm_minutes: Some(600),
            ..Default::default()
        };

        let timed = policy.apply(entry(false));
        assert_eq!(timed.event.alarms, vec![Alarm::display(15)]);
        assert_eq!(timed.exceptions[0].alarms, vec![Alarm::display(15)]);

        let all_day = policy.apply(entry(true));
        assert_eq!(all_day.event.alarms, vec![Alarm::display(600)]);
    }

    #[test]
    fn default_alarm_is_added_next_to_embedded_ones() {
        let policy = SubscriptionPolicy {
            default_alarm_minutes: Some(5),
            ..Default::default()
        };
        let applied = policy.apply(entry(false));
        assert_eq!(
            applied.event.alarms,
            vec![Alarm::display(30), Alarm::display(5)]
        );
    }

    #[test]
    fn descriptions_can_be_dropped() {
        let policy = SubscriptionPolicy {
            ignore_description: true,
            ..Default::default()
        };
        let applied = policy.apply(entry(false));
        assert!(applied.event.description.is_none());
        assert!(applied.exceptions[0].description.is_none());
        assert_eq!(applied.fingerprint, "fp");
    }

    #[test]
    fn reads_subscription_settings() {
        let sub = Subscription::new("https://example.com/a.ics", "A")
            .with_ignore_embedded_alerts(true)
            .with_default_alarms(Some(10), None);
        let policy = SubscriptionPolicy::from_subscription(&sub);
        assert!(policy.ignore_embedded_alerts);
        assert_eq!(policy.default_alarm_minutes, Some(10));
        assert!(!policy.is_passthrough());
    }
}
