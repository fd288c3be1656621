//! Address-range position model.
//!
//! An ordered, non-overlapping set of intervals, each binding a document
//! range to a target-address range. Positions are stored in a slab indexed by
//! stable handles; superseded positions are tombstoned (`valid = false`) in
//! place and physically reclaimed only by [`PositionTable::compact`], which
//! runs outside the hot insertion path.

use crate::address::{AddressRange, RelocatedAddress};
use crate::backend::{FunctionLocator, SourcePlace};
use smallvec::SmallVec;

/// Stable handle of a position inside a [`PositionTable`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PositionHandle(u32);

/// Variant payload of a position.
#[derive(Clone, Debug)]
pub enum PositionKind {
    /// One disassembled instruction line.
    Disassembly {
        mnemonic: Option<String>,
        operands: Option<String>,
        opcode: SmallVec<[u8; 8]>,
        function: Option<FunctionLocator>,
        place: Option<SourcePlace>,
    },
    /// Source line interleaved in mixed mode.
    Source { place: SourcePlace },
    /// Zero-address-length marker anchoring a function boundary.
    Label { symbol: String },
    /// Marker for an address range that repeatedly failed to disassemble.
    /// Identified by the stable hash of the failed range, not by content.
    Error { range_hash: u64 },
}

#[derive(Clone, Debug)]
pub struct AddressRangePosition {
    /// Start offset in the rendered document.
    pub doc_offset: usize,
    /// Span in the rendered document, zero for invisible markers.
    pub doc_len: usize,
    /// Start address in the target address space.
    pub addr: RelocatedAddress,
    /// Span in the target address space, zero only for labels.
    pub addr_len: u64,
    /// False once superseded by fresher data.
    pub valid: bool,
    pub kind: PositionKind,
}

impl AddressRangePosition {
    pub fn address_range(&self) -> AddressRange {
        AddressRange::new(self.addr, self.addr.offset(self.addr_len as i64))
    }

    pub fn contains_address(&self, addr: RelocatedAddress) -> bool {
        self.addr_len > 0 && self.address_range().contains(addr)
    }

    pub fn doc_end(&self) -> usize {
        self.doc_offset + self.doc_len
    }

    /// A single-byte span inserted when the true instruction length was
    /// unknown. Fresh full-length data supersedes it.
    pub fn is_placeholder(&self) -> bool {
        self.addr_len == 1 && matches!(self.kind, PositionKind::Disassembly { .. })
    }

    pub fn has_source(&self) -> bool {
        match &self.kind {
            PositionKind::Disassembly { place, .. } => place.is_some(),
            PositionKind::Source { .. } => true,
            _ => false,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.kind, PositionKind::Error { .. })
    }
}

/// Slab of positions plus a document-ordered index.
#[derive(Default)]
pub struct PositionTable {
    slots: Vec<Option<AddressRangePosition>>,
    free: Vec<u32>,
    /// Handles sorted by `doc_offset`, tombstones included until compaction.
    order: Vec<PositionHandle>,
}

impl PositionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, handle: PositionHandle) -> Option<&AddressRangePosition> {
        self.slots.get(handle.0 as usize).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, handle: PositionHandle) -> Option<&mut AddressRangePosition> {
        self.slots
            .get_mut(handle.0 as usize)
            .and_then(|s| s.as_mut())
    }

    /// Count of live (non-tombstoned) positions.
    pub fn valid_count(&self) -> usize {
        self.iter().filter(|(_, p)| p.valid).count()
    }

    /// Document offset at which data for `addr` belongs: directly before the
    /// first position whose address is greater, or at the end of the
    /// document. Positions already inserted for `addr` itself stay in front,
    /// so a source line, a label and the instruction land in that order.
    pub fn insertion_offset(&self, addr: RelocatedAddress) -> usize {
        for (_, pos) in self.iter() {
            if pos.addr > addr {
                return pos.doc_offset;
            }
        }
        self.document_end()
    }

    /// End offset of the rendered document.
    pub fn document_end(&self) -> usize {
        self.iter().map(|(_, p)| p.doc_end()).max().unwrap_or(0)
    }

    /// Insert a position, shifting the document offsets of everything at or
    /// behind its start by its document length.
    pub fn insert(&mut self, pos: AddressRangePosition) -> PositionHandle {
        let idx = self
            .order
            .partition_point(|&h| self.expect(h).doc_offset < pos.doc_offset);

        debug_assert!(
            !pos.valid || pos.doc_len == 0 || self.no_valid_overlap_before(idx, pos.doc_offset),
            "valid positions must not overlap in document range"
        );

        for &h in &self.order[idx..] {
            let shifted = self
                .slots
                .get_mut(h.0 as usize)
                .and_then(|s| s.as_mut())
                .expect("ordered handle always resolves");
            shifted.doc_offset += pos.doc_len;
        }

        let handle = match self.free.pop() {
            Some(slot) => {
                self.slots[slot as usize] = Some(pos);
                PositionHandle(slot)
            }
            None => {
                self.slots.push(Some(pos));
                PositionHandle((self.slots.len() - 1) as u32)
            }
        };
        self.order.insert(idx, handle);
        handle
    }

    /// Tombstone a position. Its document text stays in place until the next
    /// [`PositionTable::compact`].
    pub fn invalidate(&mut self, handle: PositionHandle) {
        if let Some(pos) = self.get_mut(handle) {
            pos.valid = false;
        }
    }

    /// First valid position whose address range covers `addr`.
    pub fn position_of_address(&self, addr: RelocatedAddress) -> Option<PositionHandle> {
        self.iter()
            .find(|(_, p)| p.valid && p.contains_address(addr))
            .map(|(h, _)| h)
    }

    /// Valid label position placed exactly at `addr`, if any.
    pub fn label_at(&self, addr: RelocatedAddress) -> Option<PositionHandle> {
        self.iter()
            .find(|(_, p)| p.valid && p.addr == addr && matches!(p.kind, PositionKind::Label { .. }))
            .map(|(h, _)| h)
    }

    /// Valid source position placed exactly at `addr`, if any.
    pub fn source_at(&self, addr: RelocatedAddress) -> Option<PositionHandle> {
        self.iter()
            .find(|(_, p)| {
                p.valid && p.addr == addr && matches!(p.kind, PositionKind::Source { .. })
            })
            .map(|(h, _)| h)
    }

    /// Positions in document order, tombstones included.
    pub fn iter(&self) -> impl Iterator<Item = (PositionHandle, &AddressRangePosition)> {
        self.order.iter().map(move |&h| (h, self.expect(h)))
    }

    /// Live positions in document order.
    pub fn iter_valid(&self) -> impl Iterator<Item = (PositionHandle, &AddressRangePosition)> {
        self.iter().filter(|(_, p)| p.valid)
    }

    /// Reclaim tombstoned slots. Returns the document ranges they occupied,
    /// in descending offset order so the caller can delete the corresponding
    /// text back to front; remaining positions are re-based accordingly.
    pub fn compact(&mut self) -> Vec<(usize, usize)> {
        let mut removed = vec![];
        let mut shift = 0usize;
        let mut live_order = Vec::with_capacity(self.order.len());

        for i in 0..self.order.len() {
            let handle = self.order[i];
            let slot = self.slots[handle.0 as usize]
                .as_mut()
                .expect("ordered handle always resolves");
            if slot.valid {
                slot.doc_offset -= shift;
                live_order.push(handle);
            } else {
                removed.push((slot.doc_offset, slot.doc_len));
                shift += slot.doc_len;
                self.slots[handle.0 as usize] = None;
                self.free.push(handle.0);
            }
        }

        self.order = live_order;
        removed.reverse();
        removed
    }

    fn expect(&self, handle: PositionHandle) -> &AddressRangePosition {
        self.slots[handle.0 as usize]
            .as_ref()
            .expect("ordered handle always resolves")
    }

    fn no_valid_overlap_before(&self, idx: usize, offset: usize) -> bool {
        self.order[..idx]
            .iter()
            .filter(|&&h| self.expect(h).valid)
            .all(|&h| self.expect(h).doc_end() <= offset)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn instr_position(doc_offset: usize, doc_len: usize, addr: u64, addr_len: u64) -> AddressRangePosition {
        AddressRangePosition {
            doc_offset,
            doc_len,
            addr: addr.into(),
            addr_len,
            valid: true,
            kind: PositionKind::Disassembly {
                mnemonic: Some("nop".to_string()),
                operands: None,
                opcode: SmallVec::new(),
                function: None,
                place: None,
            },
        }
    }

    #[test]
    fn test_insert_shifts_following_positions() {
        let mut table = PositionTable::new();
        let first = table.insert(instr_position(0, 10, 0x1000, 8));
        let last = table.insert(instr_position(10, 10, 0x1010, 8));
        // a line for 0x1008 lands between them
        let middle = table.insert(instr_position(10, 12, 0x1008, 8));

        assert_eq!(table.get(first).unwrap().doc_offset, 0);
        assert_eq!(table.get(middle).unwrap().doc_offset, 10);
        assert_eq!(table.get(last).unwrap().doc_offset, 22);
        assert_eq!(table.document_end(), 32);
    }

    #[test]
    fn test_insertion_offset_is_address_ordered() {
        let mut table = PositionTable::new();
        table.insert(instr_position(0, 10, 0x1000, 8));
        table.insert(instr_position(10, 10, 0x1010, 8));

        assert_eq!(table.insertion_offset(0x0500_u64.into()), 0);
        assert_eq!(table.insertion_offset(0x1008_u64.into()), 10);
        assert_eq!(table.insertion_offset(0x2000_u64.into()), 20);
    }

    #[test]
    fn test_position_of_address() {
        let mut table = PositionTable::new();
        let h = table.insert(instr_position(0, 10, 0x1000, 8));

        assert_eq!(table.position_of_address(0x1004_u64.into()), Some(h));
        assert_eq!(table.position_of_address(0x1008_u64.into()), None);

        table.invalidate(h);
        assert_eq!(table.position_of_address(0x1004_u64.into()), None);
    }

    #[test]
    fn test_compact_reclaims_tombstones() {
        let mut table = PositionTable::new();
        let first = table.insert(instr_position(0, 10, 0x1000, 1));
        let second = table.insert(instr_position(10, 10, 0x1001, 8));
        let third = table.insert(instr_position(20, 10, 0x1009, 8));
        table.invalidate(first);

        let removed = table.compact();
        assert_eq!(removed, vec![(0, 10)]);
        assert!(table.get(first).is_none());
        assert_eq!(table.get(second).unwrap().doc_offset, 0);
        assert_eq!(table.get(third).unwrap().doc_offset, 10);
        assert_eq!(table.valid_count(), 2);

        // reclaimed slot is reused
        let reused = table.insert(instr_position(20, 5, 0x1011, 2));
        assert_eq!(reused, first);
    }

    #[test]
    fn test_label_and_source_lookup() {
        let mut table = PositionTable::new();
        table.insert(AddressRangePosition {
            doc_offset: 0,
            doc_len: 6,
            addr: 0x1000_u64.into(),
            addr_len: 0,
            valid: true,
            kind: PositionKind::Label {
                symbol: "main".to_string(),
            },
        });
        table.insert(instr_position(6, 10, 0x1000, 8));

        assert!(table.label_at(0x1000_u64.into()).is_some());
        assert!(table.label_at(0x1008_u64.into()).is_none());
        // zero-address-length label never covers an address
        let covering = table.position_of_address(0x1000_u64.into()).unwrap();
        assert!(matches!(
            table.get(covering).unwrap().kind,
            PositionKind::Disassembly { .. }
        ));
    }
}
