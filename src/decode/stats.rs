// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Value and message statistics.
//!
//! Every `|name|`-enabled value slot owns a [`ValueStats`] record keeping the
//! smallest and largest values seen together with the message numbers they
//! appeared in, plus a running sum for the mean. Message-level statistics
//! (frequency and buffer-usage leaderboards, found/missing lists) are
//! computed from the plan counters at shutdown.

use crate::format::{FormatTable, StatId};

/// Number of minimal and maximal values kept per statistics record.
pub const MIN_MAX_VALUES: usize = 10;

/// Number of entries in the frequency and buffer-usage leaderboards.
pub const TOP_MESSAGES: usize = 10;

/// Statistics for one value slot.
#[derive(Debug, Clone)]
pub struct ValueStats {
    pub name: String,
    pub sum: f64,
    pub count: u32,
    /// Smallest values seen, ascending, with their message numbers.
    min: Vec<(f64, u32)>,
    /// Largest values seen, descending, with their message numbers.
    max: Vec<(f64, u32)>,
}

impl ValueStats {
    fn new(name: String) -> Self {
        ValueStats {
            name,
            sum: 0.0,
            count: 0,
            min: Vec::with_capacity(MIN_MAX_VALUES),
            max: Vec::with_capacity(MIN_MAX_VALUES),
        }
    }

    /// Record one value occurrence.
    pub fn add(&mut self, value: f64, msg_no: u32) {
        insert_sorted(&mut self.min, value, msg_no, |new, old| new < old);
        insert_sorted(&mut self.max, value, msg_no, |new, old| new > old);
        self.count += 1;
        self.sum += value;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / f64::from(self.count)
        }
    }

    pub fn minima(&self) -> &[(f64, u32)] {
        &self.min
    }

    pub fn maxima(&self) -> &[(f64, u32)] {
        &self.max
    }
}

/// Sorted-shift insertion into a bounded peak table. `better(new, old)`
/// decides whether the new value outranks an existing entry; equal peaks are
/// kept in arrival order.
fn insert_sorted(table: &mut Vec<(f64, u32)>, value: f64, msg_no: u32, better: fn(f64, f64) -> bool)
{
    if table.len() >= MIN_MAX_VALUES {
        let worst = table[MIN_MAX_VALUES - 1].0;
        if !better(value, worst) {
            return;
        }
        table.pop();
    }

    let position = table
        .iter()
        .position(|&(existing, _)| better(value, existing))
        .unwrap_or(table.len());
    table.insert(position, (value, msg_no));
}

/// Registry of all statistics records, indexed by [`StatId`].
#[derive(Debug, Default)]
pub struct StatRegistry {
    stats: Vec<ValueStats>,
}

impl StatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, name: impl Into<String>) -> StatId {
        self.stats.push(ValueStats::new(name.into()));
        self.stats.len() - 1
    }

    pub fn get(&self, id: StatId) -> &ValueStats {
        &self.stats[id]
    }

    pub fn get_mut(&mut self, id: StatId) -> &mut ValueStats {
        &mut self.stats[id]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValueStats> {
        self.stats.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}

/// One leaderboard row: format ID and its metric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopEntry {
    pub fid: u32,
    pub value: u32,
}

/// Message types with the most decoded instances, best first.
pub fn top_by_frequency(formats: &FormatTable) -> Vec<TopEntry> {
    top_by(formats, |formats, id| formats.plan(id).counter_total)
}

/// Message types with the highest circular-buffer usage in bytes.
pub fn top_by_buffer_usage(formats: &FormatTable) -> Vec<TopEntry> {
    top_by(formats, |formats, id| {
        formats.plan(id).total_words.saturating_mul(4)
    })
}

fn top_by(formats: &FormatTable, metric: fn(&FormatTable, crate::format::PlanId) -> u32) -> Vec<TopEntry> {
    let mut entries: Vec<TopEntry> = formats
        .iter_unique()
        .filter_map(|(fid, id)| {
            let value = metric(formats, id);
            (value > 0).then_some(TopEntry { fid, value })
        })
        .collect();

    entries.sort_by(|a, b| b.value.cmp(&a.value));
    entries.truncate(TOP_MESSAGES);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{MsgKind, MsgPlan};

    #[test]
    fn test_min_max_tracking() {
        let mut stats = ValueStats::new("temp".into());
        for (i, v) in [5.0, 1.0, 3.0, 9.0].iter().enumerate() {
            stats.add(*v, i as u32 + 1);
        }

        assert_eq!(stats.minima()[0], (1.0, 2));
        assert_eq!(stats.maxima()[0], (9.0, 4));
        assert_eq!(stats.count, 4);
        assert!((stats.mean() - 4.5).abs() < 1e-12);
    }

    #[test]
    fn test_peak_tables_are_bounded() {
        let mut stats = ValueStats::new("load".into());
        for i in 0..100 {
            stats.add(f64::from(i), i as u32);
        }

        assert_eq!(stats.minima().len(), MIN_MAX_VALUES);
        assert_eq!(stats.maxima().len(), MIN_MAX_VALUES);
        assert_eq!(stats.minima()[0].0, 0.0);
        assert_eq!(stats.maxima()[0].0, 99.0);
        // The worst kept maximum is 90
        assert_eq!(stats.maxima()[MIN_MAX_VALUES - 1].0, 90.0);
    }

    #[test]
    fn test_equal_peaks_keep_arrival_order() {
        let mut stats = ValueStats::new("x".into());
        stats.add(7.0, 1);
        stats.add(7.0, 2);
        assert_eq!(stats.maxima(), &[(7.0, 1), (7.0, 2)]);
    }

    #[test]
    fn test_registry() {
        let mut reg = StatRegistry::new();
        let id = reg.create("a");
        reg.get_mut(id).add(2.0, 1);
        assert_eq!(reg.get(id).count, 1);
        assert_eq!(reg.iter().count(), 1);
    }

    fn plan_with_counts(name: &str, total: u32, words: u32) -> MsgPlan {
        let mut plan = MsgPlan::new(MsgKind::Fixed);
        plan.name = name.to_string();
        plan.counter_total = total;
        plan.total_words = words;
        plan
    }

    #[test]
    fn test_top_by_frequency() {
        let mut formats = FormatTable::new(9);
        formats.assign(1, plan_with_counts("RARE", 1, 2)).unwrap();
        formats.assign(1, plan_with_counts("BUSY", 50, 100)).unwrap();
        formats.assign(1, plan_with_counts("NEVER", 0, 0)).unwrap();

        let top = top_by_frequency(&formats);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].value, 50);
        assert_eq!(top[1].value, 1);

        let usage = top_by_buffer_usage(&formats);
        assert_eq!(usage[0].value, 400);
    }
}
