use std::collections::VecDeque;

use tracing::info;

use crate::domain::{ChargeSessionRecord, EvDaySchedule, SessionSummary};

/// Append-only record of completed charging sessions. Records are
/// immutable once written; the buffer keeps the most recent `capacity`
/// and always exposes the latest for display.
#[derive(Debug)]
pub struct SessionHistoryTracker {
    records: VecDeque<ChargeSessionRecord>,
    capacity: usize,
}

impl SessionHistoryTracker {
    pub fn new(capacity: usize) -> Self {
        Self { records: VecDeque::with_capacity(capacity.min(64)), capacity: capacity.max(1) }
    }

    pub fn latest(&self) -> Option<&ChargeSessionRecord> {
        self.records.back()
    }

    /// Newest first.
    pub fn all(&self) -> Vec<ChargeSessionRecord> {
        self.records.iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write the record for a session observed to end. Energy and span
    /// come verbatim from the upstream summary; the cost integrates the
    /// EV-aware price in effect across the session's wall-clock span,
    /// with energy spread uniformly over it. Spans not covered by the
    /// supplied schedules contribute nothing.
    pub fn record(
        &mut self,
        summary: &SessionSummary,
        schedules: &[&EvDaySchedule],
    ) -> ChargeSessionRecord {
        let record = ChargeSessionRecord {
            completed_at: summary.ended_at,
            duration_seconds: (summary.ended_at - summary.started_at).num_seconds(),
            energy_added_kwh: summary.energy_added_kwh,
            cost_eur: cost_over(summary, schedules),
            state_of_charge_final: summary.state_of_charge_final,
            kind: summary.kind,
        };
        info!(
            energy_kwh = record.energy_added_kwh,
            cost_eur = record.cost_eur,
            duration_s = record.duration_seconds,
            "charging session recorded"
        );
        self.records.push_back(record.clone());
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
        record
    }
}

fn cost_over(summary: &SessionSummary, schedules: &[&EvDaySchedule]) -> f64 {
    let start = summary.started_at.fixed_offset();
    let end = summary.ended_at.fixed_offset();
    let total_seconds = (end - start).num_seconds();
    if total_seconds <= 0 {
        return 0.0;
    }

    let mut cost = 0.0f64;
    for schedule in schedules {
        for interval in &schedule.intervals {
            let overlap_start = interval.start.max(start);
            let overlap_end = interval.end.min(end);
            if overlap_end <= overlap_start {
                continue;
            }
            if let Some(price) = interval.value {
                let fraction =
                    (overlap_end - overlap_start).num_seconds() as f64 / total_seconds as f64;
                cost += price * summary.energy_added_kwh * fraction;
            }
        }
    }
    cost
}
