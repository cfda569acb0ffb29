//! Discretizes a scheduling horizon into fixed-size slots and maps between
//! datetimes and slot indices, respecting the preference timezone.

use crate::models::{BusyEvent, Preferences, RecurringWindow};
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayPart {
    Morning,
    Afternoon,
    Evening,
    Night,
}

#[derive(Debug, Clone, Copy)]
pub struct SlotContext {
    pub hour: u8,
    pub day_of_week: u8,
    pub is_weekend: bool,
    pub day_part: DayPart,
    pub in_workday: bool,
}

pub struct TimeIndex {
    pub granularity_minutes: u32,
    pub horizon_start: DateTime<Utc>,
    pub slots: Vec<DateTime<Utc>>,
    tz: Tz,
}

impl TimeIndex {
    pub fn new(
        timezone: &str,
        start_instant: DateTime<Utc>,
        end_instant: DateTime<Utc>,
        granularity_minutes: u32,
    ) -> crate::error::Result<Self> {
        let tz: Tz = timezone
            .parse()
            .map_err(|_| crate::error::Error::Validation(format!("unknown timezone: {timezone}")))?;

        let local_start = start_instant.with_timezone(&tz);
        let midnight = tz
            .with_ymd_and_hms(local_start.year(), local_start.month(), local_start.day(), 0, 0, 0)
            .single()
            .ok_or_else(|| crate::error::Error::Validation("ambiguous local midnight".to_string()))?;
        let horizon_start = midnight.with_timezone(&Utc);

        let step = Duration::minutes(granularity_minutes as i64);
        let mut slots = Vec::new();
        let mut cursor = horizon_start;
        while cursor < end_instant {
            slots.push(cursor);
            cursor += step;
        }

        Ok(Self { granularity_minutes, horizon_start, slots, tz })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn datetime_to_index(&self, dt: DateTime<Utc>) -> Option<usize> {
        if dt < self.horizon_start {
            return None;
        }
        let minutes = (dt - self.horizon_start).num_minutes();
        let idx = (minutes / self.granularity_minutes as i64) as usize;
        if idx < self.slots.len() { Some(idx) } else { None }
    }

    pub fn index_to_datetime(&self, idx: usize) -> Option<DateTime<Utc>> {
        self.slots.get(idx).copied()
    }

    pub fn slot_end(&self, idx: usize) -> Option<DateTime<Utc>> {
        self.index_to_datetime(idx)
            .map(|start| start + Duration::minutes(self.granularity_minutes as i64))
    }

    pub fn get_slot_context(&self, idx: usize, prefs: &Preferences) -> Option<SlotContext> {
        let start = self.index_to_datetime(idx)?;
        let local = start.with_timezone(&self.tz);
        let hour = local.hour() as u8;
        let day_of_week = local.weekday().num_days_from_monday() as u8;
        let is_weekend = day_of_week >= 5;
        let day_part = match hour {
            5..=11 => DayPart::Morning,
            12..=16 => DayPart::Afternoon,
            17..=21 => DayPart::Evening,
            _ => DayPart::Night,
        };
        let in_workday = !is_weekend && self.within_workday(local.time(), prefs);

        Some(SlotContext { hour, day_of_week, is_weekend, day_part, in_workday })
    }

    fn within_workday(&self, time: chrono::NaiveTime, prefs: &Preferences) -> bool {
        let Some(start) = parse_hhmm(&prefs.workday_start) else { return false };
        let Some(end) = parse_hhmm(&prefs.workday_end) else { return false };
        time >= start && time < end
    }

    /// Returns the set of slot indices whose interval intersects any event.
    pub fn filter_busy_slots(&self, events: &[BusyEvent]) -> std::collections::HashSet<usize> {
        let mut blocked = std::collections::HashSet::new();
        for event in events {
            for (idx, slot_start) in self.slots.iter().enumerate() {
                let slot_end = *slot_start + Duration::minutes(self.granularity_minutes as i64);
                if *slot_start < event.end && event.start < slot_end {
                    blocked.insert(idx);
                }
            }
        }
        blocked
    }

    fn in_recurring_window(&self, idx: usize, windows: &[RecurringWindow]) -> bool {
        let Some(start) = self.index_to_datetime(idx) else { return false };
        let local = start.with_timezone(&self.tz);
        let dow = local.weekday().num_days_from_monday() as u8;
        let time = local.time();
        windows.iter().any(|w| {
            w.day_of_week == dow
                && parse_hhmm(&w.start_hhmm).map_or(false, |s| time >= s)
                && parse_hhmm(&w.end_hhmm).map_or(false, |e| time < e)
        })
    }

    /// Maximal free contiguous ranges, intersected with each day's workday
    /// window, with `noStudyWindows` subtracted.
    pub fn get_free_slots(
        &self,
        events: &[BusyEvent],
        prefs: &Preferences,
    ) -> Vec<(usize, usize)> {
        let blocked = self.filter_busy_slots(events);
        let mut free = Vec::new();
        let mut run_start: Option<usize> = None;

        for idx in 0..self.slots.len() {
            let context = self.get_slot_context(idx, prefs);
            let in_no_study = self.in_recurring_window(idx, &prefs.no_study_windows);
            let usable = context.map_or(false, |c| c.in_workday) && !blocked.contains(&idx) && !in_no_study;

            match (usable, run_start) {
                (true, None) => run_start = Some(idx),
                (false, Some(s)) => {
                    free.push((s, idx));
                    run_start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = run_start {
            free.push((s, self.slots.len()));
        }
        free
    }
}

fn parse_hhmm(s: &str) -> Option<chrono::NaiveTime> {
    chrono::NaiveTime::parse_from_str(s, "%H:%M").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BusyEventSource;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_slots_tile_horizon() {
        let idx = TimeIndex::new("UTC", utc(2026, 1, 5, 9, 0), utc(2026, 1, 5, 11, 0), 30).unwrap();
        assert_eq!(idx.len(), 22); // midnight to 11:00 in 30-min slots
    }

    #[test]
    fn test_datetime_roundtrip() {
        let idx = TimeIndex::new("UTC", utc(2026, 1, 5, 0, 0), utc(2026, 1, 6, 0, 0), 30).unwrap();
        let slot_idx = idx.datetime_to_index(utc(2026, 1, 5, 9, 0)).unwrap();
        assert_eq!(idx.index_to_datetime(slot_idx), Some(utc(2026, 1, 5, 9, 0)));
    }

    #[test]
    fn test_filter_busy_slots() {
        let idx = TimeIndex::new("UTC", utc(2026, 1, 5, 0, 0), utc(2026, 1, 6, 0, 0), 30).unwrap();
        let event = BusyEvent {
            id: "e1".into(),
            source: BusyEventSource::Pulse,
            start: utc(2026, 1, 5, 10, 0),
            end: utc(2026, 1, 5, 11, 0),
            title: "Meeting".into(),
            hard: true,
            movable: false,
        };
        let blocked = idx.filter_busy_slots(&[event]);
        assert!(blocked.contains(&idx.datetime_to_index(utc(2026, 1, 5, 10, 0)).unwrap()));
        assert!(!blocked.contains(&idx.datetime_to_index(utc(2026, 1, 5, 9, 0)).unwrap()));
    }

    #[test]
    fn test_free_slots_within_workday() {
        let idx = TimeIndex::new("UTC", utc(2026, 1, 5, 0, 0), utc(2026, 1, 6, 0, 0), 30).unwrap();
        let prefs = Preferences::default();
        let free = idx.get_free_slots(&[], &prefs);
        assert!(!free.is_empty());
        for (s, e) in &free {
            let ctx = idx.get_slot_context(*s, &prefs).unwrap();
            assert!(ctx.in_workday);
            assert!(e > s);
        }
    }
}
