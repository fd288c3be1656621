//! Plain-text reference implementation of the document callback boundary.
//!
//! A real IDE hosts the engine behind its own editor widget; [`TextDocument`]
//! is the implementation used by the demo binary and the tests. It keeps a
//! `String` buffer in lockstep with a [`PositionTable`].

use crate::address::{AddressRange, RelocatedAddress};
use crate::backend::{InstructionData, SourcePlace};
use crate::view::position::{AddressRangePosition, PositionHandle, PositionKind, PositionTable};
use crate::view::{DocumentCallback, DocumentCompaction, ViewFlags};
use crate::Error;

#[derive(Default)]
pub struct TextDocument {
    text: String,
    table: PositionTable,
    scroll_locks: u32,
    pc: Option<RelocatedAddress>,
    last_goto: Option<(u32, Option<RelocatedAddress>)>,
    enabled: bool,
    errors: Vec<String>,
}

impl TextDocument {
    pub fn new() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn table(&self) -> &PositionTable {
        &self.table
    }

    pub fn pc(&self) -> Option<RelocatedAddress> {
        self.pc
    }

    pub fn last_goto(&self) -> Option<(u32, Option<RelocatedAddress>)> {
        self.last_goto
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Scroll locks left unbalanced indicate a broken merge path.
    pub fn scroller_locked(&self) -> bool {
        self.scroll_locks > 0
    }

    fn insert_position(
        &mut self,
        addr: RelocatedAddress,
        addr_len: u64,
        kind: PositionKind,
        rendered: String,
    ) -> anyhow::Result<PositionHandle> {
        let doc_offset = self.table.insertion_offset(addr);
        if doc_offset > self.text.len() {
            return Err(Error::DocumentBounds {
                offset: doc_offset,
                len: self.text.len(),
            }
            .into());
        }
        self.text.insert_str(doc_offset, &rendered);
        Ok(self.table.insert(AddressRangePosition {
            doc_offset,
            doc_len: rendered.len(),
            addr,
            addr_len,
            valid: true,
            kind,
        }))
    }
}

impl DocumentCallback for TextDocument {
    fn insert_disassembly_line(
        &mut self,
        addr: RelocatedAddress,
        addr_len: u64,
        instruction: &InstructionData,
        place: Option<&SourcePlace>,
        flags: ViewFlags,
    ) -> anyhow::Result<PositionHandle> {
        // source wins over decoded text unless raw disassembly is requested
        let body = if !flags.show_disassembly && place.is_some() {
            match instruction.function.as_ref() {
                Some(locator) => format!("<{locator}>"),
                None => "<unknown function>".to_string(),
            }
        } else {
            instruction.render()
        };
        let rendered = format!("{addr}  {body}\n");
        self.insert_position(
            addr,
            addr_len,
            PositionKind::Disassembly {
                mnemonic: instruction.mnemonic.clone(),
                operands: instruction.operands.clone(),
                opcode: instruction.opcode.clone(),
                function: instruction.function.clone(),
                place: place.cloned(),
            },
            rendered,
        )
    }

    fn insert_label(
        &mut self,
        addr: RelocatedAddress,
        symbol: &str,
        visible: bool,
    ) -> anyhow::Result<PositionHandle> {
        if let Some(existing) = self.table.label_at(addr) {
            return Ok(existing);
        }
        let rendered = if visible {
            format!("{symbol}:\n")
        } else {
            String::new()
        };
        self.insert_position(
            addr,
            0,
            PositionKind::Label {
                symbol: symbol.to_string(),
            },
            rendered,
        )
    }

    fn insert_source(
        &mut self,
        addr: RelocatedAddress,
        place: &SourcePlace,
        text: Option<&str>,
    ) -> anyhow::Result<PositionHandle> {
        if let Some(existing) = self.table.source_at(addr) {
            return Ok(existing);
        }
        let rendered = match text {
            Some(text) => format!("{place}  {text}\n"),
            None => format!("{place}\n"),
        };
        self.insert_position(addr, 0, PositionKind::Source { place: place.clone() }, rendered)
    }

    fn add_invalid_address_range(
        &mut self,
        range: AddressRange,
        range_hash: u64,
    ) -> anyhow::Result<PositionHandle> {
        let rendered = format!("{}  <disassembly unavailable>\n", range.start);
        self.insert_position(
            range.start,
            range.len().max(1),
            PositionKind::Error { range_hash },
            rendered,
        )
    }

    fn position(&self, handle: PositionHandle) -> Option<&AddressRangePosition> {
        self.table.get(handle)
    }

    fn position_of_address(&self, addr: RelocatedAddress) -> Option<PositionHandle> {
        self.table.position_of_address(addr)
    }

    fn invalidate(&mut self, handle: PositionHandle) {
        self.table.invalidate(handle);
    }

    fn lock_scroller(&mut self) {
        self.scroll_locks += 1;
    }

    fn unlock_scroller(&mut self) {
        debug_assert!(self.scroll_locks > 0, "unbalanced scroller unlock");
        self.scroll_locks = self.scroll_locks.saturating_sub(1);
    }

    fn update_pc(&mut self, pc: Option<RelocatedAddress>) {
        self.pc = pc;
    }

    fn goto_frame(&mut self, level: u32, addr: Option<RelocatedAddress>) {
        self.last_goto = Some((level, addr));
    }

    fn on_target_suspended(&mut self) {
        self.enabled = true;
    }

    fn on_target_resumed(&mut self) {}

    fn on_target_ended(&mut self) {
        self.enabled = false;
    }

    fn report_error(&mut self, message: &str) {
        log::error!(target: "asmview", "{message}");
        self.errors.push(message.to_string());
    }
}

impl DocumentCompaction for TextDocument {
    fn compact(&mut self) {
        for (offset, len) in self.table.compact() {
            self.text.replace_range(offset..offset + len, "");
        }
    }
}
