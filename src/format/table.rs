// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Format-ID table and allocator.
//!
//! The table maps every format ID in `[0, 2^N)` to at most one decoding
//! plan. Allocation reserves contiguous ranges whose size is a power of two
//! and whose start is aligned to that size, so the low ID bits can carry the
//! MSG index or extended-data bits on the wire.

use crate::core::error::ParseErrorCode;
use crate::core::is_power_of_two;

use super::{MsgKind, MsgPlan};

/// Index into the plan storage. Multiple format IDs of one allocation range
/// share the same plan.
pub type PlanId = usize;

/// Dense format-ID table plus the plan storage behind it.
#[derive(Debug)]
pub struct FormatTable {
    /// Slot per format ID; `None` = unassigned.
    slots: Vec<Option<PlanId>>,
    plans: Vec<MsgPlan>,
    /// First never-assigned ID (includes holes reserved by FMT_ALIGN).
    fmt_ids_defined: u32,
    /// Lower bound for future allocations, advanced past filled slots.
    align_cursor: u32,
    /// Top format ID; reserved for the streaming-mode system message.
    topmost: u32,
}

/// Format ID of the long-timestamp system message.
pub const FID_LONG_TIMESTAMP: u32 = 0;

/// Format ID of the timestamp-frequency system message.
pub const FID_TSTAMP_FREQUENCY: u32 = 2;

impl FormatTable {
    /// Create a table for `fmt_id_bits`-wide format IDs.
    pub fn new(fmt_id_bits: u8) -> Self {
        let max_ids = 1u32 << fmt_id_bits;
        FormatTable {
            slots: vec![None; max_ids as usize],
            plans: Vec::new(),
            fmt_ids_defined: 0,
            align_cursor: 0,
            topmost: max_ids - 2,
        }
    }

    /// Topmost format ID (the streaming-mode system message).
    pub fn topmost(&self) -> u32 {
        self.topmost
    }

    /// Number of IDs in the table.
    pub fn max_ids(&self) -> u32 {
        self.slots.len() as u32
    }

    /// First never-assigned format ID.
    pub fn ids_defined(&self) -> u32 {
        self.fmt_ids_defined
    }

    /// Reserve an aligned range of `count` IDs (a power of two) and point
    /// every slot of the range at `plan`. Returns the starting ID and the
    /// plan handle.
    pub fn assign(&mut self, count: u32, plan: MsgPlan) -> Option<(u32, PlanId)> {
        if count == 0 || !is_power_of_two(count as u64) {
            return None;
        }

        // Skip slots that are filled already before aligning.
        while self.align_cursor < self.topmost
            && self.slots[self.align_cursor as usize].is_some()
        {
            self.align_cursor += 1;
        }

        let mut fid = (self.align_cursor + count - 1) & !(count - 1);

        let start = loop {
            if fid >= self.topmost || fid + count >= self.topmost {
                return None;
            }

            let range = fid as usize..(fid + count) as usize;
            if self.slots[range].iter().all(Option::is_none) {
                break fid;
            }

            fid += count;
        };

        let plan_id = self.plans.len();
        self.plans.push(plan);

        for slot in &mut self.slots[start as usize..(start + count) as usize] {
            *slot = Some(plan_id);
        }

        let new_limit = start + count;
        if new_limit > self.fmt_ids_defined {
            self.fmt_ids_defined = new_limit;
        }

        Some((start, plan_id))
    }

    /// Install the plan decoding the topmost (streaming-mode) system ID.
    pub fn install_streaming_plan(&mut self) {
        let mut plan = MsgPlan::new(MsgKind::Fixed);
        plan.name = "sys".to_string();
        plan.msg_len = 4;
        let plan_id = self.plans.len();
        self.plans.push(plan);
        self.slots[self.topmost as usize] = Some(plan_id);
    }

    /// FMT_ALIGN(v): round the allocation cursor up to a multiple of `v`.
    pub fn align_to(&mut self, value: u32) -> Result<(), ParseErrorCode> {
        if value > self.topmost {
            return Err(ParseErrorCode::FmtAlignOverMax);
        }
        if !is_power_of_two(value as u64) {
            return Err(ParseErrorCode::FmtAlignPowerOf2);
        }

        self.fmt_ids_defined = (self.fmt_ids_defined + value - 1) & !(value - 1);
        self.align_cursor = self.fmt_ids_defined;
        Ok(())
    }

    /// FMT_START(v): set the allocation cursor exactly; fails when it would
    /// move behind already assigned IDs.
    pub fn start_at(&mut self, value: u32) -> Result<(), ParseErrorCode> {
        if value >= self.topmost {
            return Err(ParseErrorCode::FmtAlignOverMax);
        }
        if self.fmt_ids_defined > value {
            return Err(ParseErrorCode::FmtStartBacktrack);
        }

        self.fmt_ids_defined = value;
        self.align_cursor = value;
        Ok(())
    }

    pub fn plan_id(&self, fid: u32) -> Option<PlanId> {
        self.slots.get(fid as usize).copied().flatten()
    }

    pub fn plan(&self, id: PlanId) -> &MsgPlan {
        &self.plans[id]
    }

    pub fn plan_mut(&mut self, id: PlanId) -> &mut MsgPlan {
        &mut self.plans[id]
    }

    /// Plan registered for a format ID, if any.
    pub fn plan_for_fid(&self, fid: u32) -> Option<&MsgPlan> {
        self.plan_id(fid).map(|id| &self.plans[id])
    }

    pub fn plan_for_fid_mut(&mut self, fid: u32) -> Option<&mut MsgPlan> {
        match self.plan_id(fid) {
            Some(id) => Some(&mut self.plans[id]),
            None => None,
        }
    }

    /// First format ID of the plan with the given message name. Only the
    /// user-assigned range is searched.
    pub fn find_by_name(&self, name: &str) -> Option<u32> {
        self.iter_unique()
            .find(|&(_, id)| self.plans[id].name == name)
            .map(|(fid, _)| fid)
    }

    /// Iterate `(first_fid, plan_id)` pairs of distinct plans in ID order,
    /// bounded to the user-assigned range (the reserved topmost system ID
    /// is excluded).
    pub fn iter_unique(&self) -> impl Iterator<Item = (u32, PlanId)> + '_ {
        let mut last: Option<PlanId> = None;
        self.slots[..self.fmt_ids_defined as usize]
            .iter()
            .enumerate()
            .filter_map(move |(fid, slot)| {
                let id = (*slot)?;
                if last == Some(id) {
                    return None;
                }
                last = Some(id);
                Some((fid as u32, id))
            })
    }

    /// Reset per-snapshot counters of every plan.
    pub fn reset_counters(&mut self) {
        for plan in &mut self.plans {
            plan.reset_counter();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> MsgPlan {
        let mut plan = MsgPlan::new(MsgKind::Fixed);
        plan.name = name.to_string();
        plan
    }

    #[test]
    fn test_assign_sequential() {
        let mut table = FormatTable::new(9);
        let (a, _) = table.assign(1, named("A")).unwrap();
        let (b, _) = table.assign(1, named("B")).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(table.ids_defined(), 2);
    }

    #[test]
    fn test_assign_aligns_to_range_size() {
        let mut table = FormatTable::new(9);
        table.assign(1, named("A")).unwrap();
        let (b, id) = table.assign(4, named("B")).unwrap();
        assert_eq!(b, 4);
        // All four IDs of the range point to the same plan
        for fid in 4..8 {
            assert_eq!(table.plan_id(fid), Some(id));
        }
        assert_eq!(table.ids_defined(), 8);
    }

    #[test]
    fn test_assign_fills_aligned_holes() {
        let mut table = FormatTable::new(9);
        table.assign(1, named("A")).unwrap();
        table.assign(4, named("B")).unwrap(); // occupies 4..8, hole at 1..4
        let (c, _) = table.assign(2, named("C")).unwrap();
        assert_eq!(c, 2); // aligned hole reused
    }

    #[test]
    fn test_assign_fails_at_topmost() {
        let mut table = FormatTable::new(9);
        let topmost = table.topmost();
        table.start_at(topmost - 4).unwrap();
        // The range would reach the reserved top IDs
        assert!(table.assign(16, named("X")).is_none());
        // A later small allocation before the boundary still fails when the
        // end of range touches topmost
        assert!(table.assign(4, named("Y")).is_none());
    }

    #[test]
    fn test_align_to() {
        let mut table = FormatTable::new(9);
        table.assign(1, named("A")).unwrap();
        table.align_to(16).unwrap();
        let (b, _) = table.assign(1, named("B")).unwrap();
        assert_eq!(b, 16);
        assert_eq!(table.align_to(3), Err(ParseErrorCode::FmtAlignPowerOf2));
    }

    #[test]
    fn test_start_at_cannot_move_backward() {
        let mut table = FormatTable::new(9);
        table.start_at(32).unwrap();
        table.assign(1, named("A")).unwrap();
        assert_eq!(table.start_at(8), Err(ParseErrorCode::FmtStartBacktrack));
        assert_eq!(
            table.start_at(table.topmost()),
            Err(ParseErrorCode::FmtAlignOverMax)
        );
    }

    #[test]
    fn test_find_by_name() {
        let mut table = FormatTable::new(9);
        table.assign(2, named("FIRST")).unwrap();
        let (fid, _) = table.assign(4, named("SECOND")).unwrap();
        assert_eq!(table.find_by_name("SECOND"), Some(fid));
        assert_eq!(table.find_by_name("MISSING"), None);
    }

    #[test]
    fn test_iter_unique_skips_ranges() {
        let mut table = FormatTable::new(9);
        table.assign(4, named("A")).unwrap();
        table.assign(2, named("B")).unwrap();
        let names: Vec<&str> = table
            .iter_unique()
            .map(|(_, id)| table.plan(id).name.as_str())
            .collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn test_streaming_plan_at_topmost() {
        let mut table = FormatTable::new(9);
        table.install_streaming_plan();
        let plan = table.plan_for_fid(table.topmost()).unwrap();
        assert_eq!(plan.name, "sys");
        assert_eq!(plan.msg_len, 4);
    }
}
