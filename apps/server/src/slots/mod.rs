//! Slot allocation engine.
//!
//! This module holds the pure pieces (interval math, the availability
//! validator and the overlap resolver). Persistence-bound parts live in the
//! submodules:
//!
//! - [`generator`] derives fixed-width slots for a salon+date from working hours
//! - [`allocation`] claims and releases slot ranges when appointments are saved
//! - [`maintenance`] keeps the rolling horizon generated and regenerates it
//! - [`queries`] read models for customers and owners

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};

use crate::error::AppError;
use crate::models::{AvailableSlot, Slot, SlotOverlay, SlotStatus};

pub mod allocation;
pub mod generator;
pub mod maintenance;
pub mod queries;
pub mod store;

/// Slot width assumed when a slot's own bounds are degenerate.
pub const DEFAULT_SLOT_MINUTES: i64 = 30;

/// Slot intervals a salon may configure.
pub const ALLOWED_INTERVALS: [i64; 3] = [15, 30, 60];

const MINUTES_PER_DAY: i64 = 24 * 60;

pub fn minute_of_day(t: NaiveTime) -> i64 {
    (t.num_seconds_from_midnight() / 60) as i64
}

/// Time at `minute` past midnight, or `None` outside the same day.
pub fn time_at(minute: i64) -> Option<NaiveTime> {
    if !(0..MINUTES_PER_DAY).contains(&minute) {
        return None;
    }
    NaiveTime::from_num_seconds_from_midnight_opt((minute * 60) as u32, 0)
}

/// 0 = Monday … 6 = Sunday, matching `working_hours.weekday`.
pub fn weekday_index(date: NaiveDate) -> i64 {
    date.weekday().num_days_from_monday() as i64
}

/// Width of a slot in minutes, falling back to 30 for zero/negative spans.
pub fn slot_minutes(start: NaiveTime, end: NaiveTime) -> i64 {
    let minutes = minute_of_day(end) - minute_of_day(start);
    if minutes > 0 {
        minutes
    } else {
        DEFAULT_SLOT_MINUTES
    }
}

/// Salon interval, guarded the same way as slot widths.
pub fn effective_interval(interval_minutes: i64) -> i64 {
    if interval_minutes > 0 {
        interval_minutes
    } else {
        DEFAULT_SLOT_MINUTES
    }
}

/// How many contiguous slots of `interval_min` a service of `duration_min` consumes.
///
/// Always at least one: an appointment occupies its anchor slot.
pub fn required_slot_count(duration_min: i64, interval_min: i64) -> usize {
    let interval = effective_interval(interval_min);
    let duration = duration_min.max(1);
    ((duration + interval - 1) / interval) as usize
}

/// Half-open wall-clock interval `[start, end)` in minutes past midnight.
///
/// `end` may run past 1440 for appointments that overrun the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: i64,
    pub end: i64,
}

impl Interval {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            start: minute_of_day(start),
            end: minute_of_day(end),
        }
    }

    pub fn of_slot(slot: &Slot) -> Self {
        Self::new(slot.start_time, slot.end_time)
    }

    pub fn starting_at(start: NaiveTime, duration_min: i64) -> Self {
        let start = minute_of_day(start);
        Self {
            start,
            end: start + duration_min,
        }
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// Wall-clock coverage of one active appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveSpan {
    pub appointment_id: i64,
    pub interval: Interval,
}

impl ActiveSpan {
    /// Span of an appointment anchored at `start`. Without a service the
    /// appointment lasts one anchor slot.
    pub fn new(
        appointment_id: i64,
        start: NaiveTime,
        service_duration: Option<i64>,
        anchor_width: i64,
    ) -> Self {
        Self {
            appointment_id,
            interval: Interval::starting_at(start, service_duration.unwrap_or(anchor_width)),
        }
    }
}

/// Candidate `(start, end)` pairs from `open` stepping by `interval` while the
/// whole slot still ends by `close`.
pub fn slot_grid(open: NaiveTime, close: NaiveTime, interval: i64) -> Vec<(NaiveTime, NaiveTime)> {
    let interval = effective_interval(interval);
    let close = minute_of_day(close);
    let mut current = minute_of_day(open);
    let mut grid = Vec::new();

    while current + interval <= close {
        if let (Some(start), Some(end)) = (time_at(current), time_at(current + interval)) {
            grid.push((start, end));
        }
        current += interval;
    }
    grid
}

/// All-or-nothing availability check over a claimed range.
///
/// `appointment_id` is the appointment being saved; slots it already
/// occupies pass.
pub fn check_availability(slots: &[Slot], appointment_id: Option<i64>) -> Result<(), AppError> {
    for slot in slots {
        if slot.status == SlotStatus::Blocked {
            return Err(AppError::SlotBlocked { slot_id: slot.id });
        }
        match slot.appointment_id {
            Some(owner) if Some(owner) != appointment_id => {
                return Err(AppError::SlotTaken { slot_id: slot.id });
            }
            None if slot.status == SlotStatus::Busy => {
                return Err(AppError::SlotTaken { slot_id: slot.id });
            }
            _ => {}
        }
    }
    Ok(())
}

/// State a slot takes when released, or `None` when it must be left alone.
///
/// Blocked slots are untouched. A slot still overlapped by another active
/// appointment stays busy and is attributed to that appointment.
pub fn released_state(slot: &Slot, others: &[ActiveSpan]) -> Option<(SlotStatus, Option<i64>)> {
    if slot.status == SlotStatus::Blocked {
        return None;
    }
    let interval = Interval::of_slot(slot);
    match others.iter().find(|span| span.interval.overlaps(&interval)) {
        Some(span) => Some((SlotStatus::Busy, Some(span.appointment_id))),
        None => Some((SlotStatus::Available, None)),
    }
}

/// Merge slots with active appointment coverage for presentation.
pub fn overlay(slots: &[Slot], spans: &[ActiveSpan]) -> Vec<SlotOverlay> {
    slots
        .iter()
        .map(|slot| {
            let interval = Interval::of_slot(slot);
            let covered = spans.iter().any(|span| span.interval.overlaps(&interval));
            SlotOverlay {
                id: slot.id,
                start: slot.start_time,
                end: slot.end_time,
                status: if covered { SlotStatus::Busy } else { slot.status },
                has_appointment: covered || slot.appointment_id.is_some(),
            }
        })
        .collect()
}

pub fn is_bookable(slot: &Slot) -> bool {
    slot.status == SlotStatus::Available && slot.appointment_id.is_none()
}

pub fn to_available(slot: &Slot) -> AvailableSlot {
    AvailableSlot {
        id: slot.id,
        start_label: slot.start_time.format("%H:%M").to_string(),
        end_label: slot.end_time.format("%H:%M").to_string(),
    }
}

/// Parse a `YYYY-MM-DD` query parameter.
pub fn parse_date(raw: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| AppError::validation("Invalid date format, expected YYYY-MM-DD"))
}

#[cfg(test)]
pub(crate) fn hm(raw: &str) -> NaiveTime {
    NaiveTime::parse_from_str(raw, "%H:%M").unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_slot(id: i64, start: &str, end: &str, status: SlotStatus, appt: Option<i64>) -> Slot {
        Slot {
            id,
            salon_id: 1,
            date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            start_time: hm(start),
            end_time: hm(end),
            status,
            appointment_id: appt,
        }
    }

    fn span(id: i64, start: &str, minutes: i64) -> ActiveSpan {
        ActiveSpan::new(id, hm(start), Some(minutes), 30)
    }

    // ── required_slot_count ──

    #[test]
    fn test_required_exact_multiple() {
        assert_eq!(required_slot_count(60, 30), 2);
        assert_eq!(required_slot_count(60, 60), 1);
    }

    #[test]
    fn test_required_rounds_up() {
        assert_eq!(required_slot_count(45, 30), 2);
        assert_eq!(required_slot_count(61, 60), 2);
        assert_eq!(required_slot_count(5, 15), 1);
    }

    #[test]
    fn test_required_degenerate_inputs() {
        assert_eq!(required_slot_count(0, 30), 1);
        assert_eq!(required_slot_count(90, 0), 3);
        assert_eq!(required_slot_count(90, -15), 3);
    }

    // ── slot_minutes ──

    #[test]
    fn test_slot_minutes() {
        assert_eq!(slot_minutes(hm("09:00"), hm("09:15")), 15);
        assert_eq!(slot_minutes(hm("09:00"), hm("10:00")), 60);
    }

    #[test]
    fn test_slot_minutes_degenerate_defaults_to_30() {
        assert_eq!(slot_minutes(hm("09:00"), hm("09:00")), 30);
        assert_eq!(slot_minutes(hm("10:00"), hm("09:00")), 30);
    }

    // ── time helpers ──

    #[test]
    fn test_time_at_bounds() {
        assert_eq!(time_at(0), Some(hm("00:00")));
        assert_eq!(time_at(23 * 60 + 59), Some(hm("23:59")));
        assert_eq!(time_at(24 * 60), None);
        assert_eq!(time_at(-1), None);
    }

    #[test]
    fn test_weekday_index_monday_is_zero() {
        let monday = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        assert_eq!(weekday_index(monday), 0);
        assert_eq!(weekday_index(monday + chrono::Duration::days(6)), 6);
    }

    // ── overlaps ──

    #[test]
    fn test_overlap_half_open() {
        let a = Interval::new(hm("09:00"), hm("10:00"));
        let b = Interval::new(hm("10:00"), hm("10:30"));
        let c = Interval::new(hm("09:30"), hm("10:30"));
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
    }

    #[test]
    fn test_overlap_containment() {
        let outer = Interval::new(hm("09:00"), hm("12:00"));
        let inner = Interval::new(hm("10:00"), hm("10:15"));
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
    }

    #[test]
    fn test_span_without_service_lasts_one_slot() {
        let s = ActiveSpan::new(1, hm("11:00"), None, 15);
        assert_eq!(s.interval, Interval::new(hm("11:00"), hm("11:15")));
    }

    // ── slot_grid ──

    #[test]
    fn test_grid_full_day() {
        let grid = slot_grid(hm("09:00"), hm("17:00"), 30);
        assert_eq!(grid.len(), 16);
        assert_eq!(grid[0], (hm("09:00"), hm("09:30")));
        assert_eq!(grid[15], (hm("16:30"), hm("17:00")));
    }

    #[test]
    fn test_grid_drops_partial_tail() {
        let grid = slot_grid(hm("09:00"), hm("10:45"), 30);
        assert_eq!(grid.len(), 3);
        assert_eq!(grid.last().unwrap().1, hm("10:30"));
    }

    #[test]
    fn test_grid_empty_when_window_too_small() {
        assert!(slot_grid(hm("09:00"), hm("09:45"), 60).is_empty());
        assert!(slot_grid(hm("17:00"), hm("09:00"), 30).is_empty());
    }

    #[test]
    fn test_grid_stops_before_midnight() {
        let grid = slot_grid(hm("22:00"), hm("23:59"), 60);
        assert_eq!(grid, vec![(hm("22:00"), hm("23:00"))]);
    }

    // ── check_availability ──

    #[test]
    fn test_available_range_passes() {
        let slots = vec![
            make_slot(1, "09:00", "09:30", SlotStatus::Available, None),
            make_slot(2, "09:30", "10:00", SlotStatus::Available, None),
        ];
        assert!(check_availability(&slots, None).is_ok());
    }

    #[test]
    fn test_blocked_slot_rejected() {
        let slots = vec![
            make_slot(1, "09:00", "09:30", SlotStatus::Available, None),
            make_slot(2, "09:30", "10:00", SlotStatus::Blocked, None),
        ];
        assert!(matches!(
            check_availability(&slots, None),
            Err(AppError::SlotBlocked { slot_id: 2 })
        ));
    }

    #[test]
    fn test_slot_of_other_appointment_rejected() {
        let slots = vec![make_slot(1, "09:00", "09:30", SlotStatus::Busy, Some(7))];
        assert!(matches!(
            check_availability(&slots, Some(8)),
            Err(AppError::SlotTaken { slot_id: 1 })
        ));
        assert!(matches!(
            check_availability(&slots, None),
            Err(AppError::SlotTaken { slot_id: 1 })
        ));
    }

    #[test]
    fn test_own_slots_pass() {
        let slots = vec![
            make_slot(1, "09:00", "09:30", SlotStatus::Busy, Some(7)),
            make_slot(2, "09:30", "10:00", SlotStatus::Busy, Some(7)),
        ];
        assert!(check_availability(&slots, Some(7)).is_ok());
    }

    #[test]
    fn test_busy_without_owner_is_taken() {
        let slots = vec![make_slot(3, "09:00", "09:30", SlotStatus::Busy, None)];
        assert!(matches!(
            check_availability(&slots, Some(7)),
            Err(AppError::SlotTaken { slot_id: 3 })
        ));
    }

    // ── released_state ──

    #[test]
    fn test_release_frees_uncovered_slot() {
        let slot = make_slot(1, "09:00", "09:30", SlotStatus::Busy, Some(5));
        assert_eq!(
            released_state(&slot, &[span(6, "10:00", 30)]),
            Some((SlotStatus::Available, None))
        );
    }

    #[test]
    fn test_release_keeps_slot_covered_by_other() {
        let slot = make_slot(1, "09:30", "10:00", SlotStatus::Busy, Some(5));
        // 09:00 + 90 min covers 09:30-10:00
        assert_eq!(
            released_state(&slot, &[span(6, "09:00", 90)]),
            Some((SlotStatus::Busy, Some(6)))
        );
    }

    #[test]
    fn test_release_adjacent_is_not_overlap() {
        let slot = make_slot(1, "10:00", "10:30", SlotStatus::Busy, Some(5));
        assert_eq!(
            released_state(&slot, &[span(6, "09:00", 60)]),
            Some((SlotStatus::Available, None))
        );
    }

    #[test]
    fn test_release_skips_blocked() {
        let slot = make_slot(1, "09:00", "09:30", SlotStatus::Blocked, None);
        assert_eq!(released_state(&slot, &[]), None);
    }

    // ── overlay ──

    #[test]
    fn test_overlay_marks_covered_slots() {
        let slots = vec![
            make_slot(1, "09:00", "09:30", SlotStatus::Available, None),
            make_slot(2, "09:30", "10:00", SlotStatus::Available, None),
            make_slot(3, "10:00", "10:30", SlotStatus::Blocked, None),
        ];
        let view = overlay(&slots, &[span(9, "09:15", 30)]);
        assert_eq!(view[0].status, SlotStatus::Busy);
        assert!(view[0].has_appointment);
        assert_eq!(view[1].status, SlotStatus::Busy);
        assert_eq!(view[2].status, SlotStatus::Blocked);
        assert!(!view[2].has_appointment);
    }

    #[test]
    fn test_overlay_reports_attribution() {
        let slots = vec![make_slot(1, "09:00", "09:30", SlotStatus::Busy, Some(4))];
        let view = overlay(&slots, &[]);
        assert!(view[0].has_appointment);
    }

    #[test]
    fn test_available_labels() {
        let slot = make_slot(4, "09:00", "09:30", SlotStatus::Available, None);
        let view = to_available(&slot);
        assert_eq!(view.start_label, "09:00");
        assert_eq!(view.end_label, "09:30");
        assert!(is_bookable(&slot));
    }

    #[test]
    fn test_parse_date() {
        assert!(parse_date("2026-03-02").is_ok());
        assert!(matches!(parse_date("02.03.2026"), Err(AppError::Validation(_))));
    }
}
