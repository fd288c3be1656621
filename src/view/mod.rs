//! Incremental disassembly view.
//!
//! [`DisassemblyView`] mediates between a retrieval backend and a hosting
//! document: it asks the backend for instructions around addresses the user
//! wants to see, merges the answers into the document's position model and
//! keeps that model consistent while the target runs, stops and changes
//! frames. All of its methods must be called from the session executor
//! thread (see [`crate::proto`]).

pub mod document;
pub mod position;

mod controller;
mod merge;

pub use controller::PendingState;
pub use merge::RetrievalRequest;

use crate::address::{AddressRange, RelocatedAddress};
use crate::backend::{DisassemblyBackend, InstructionData, SourcePlace};
use crate::proto::SessionHandle;
use crate::session::ExecutionContext;
use crate::view::merge::RetrievalState;
use crate::view::position::{AddressRangePosition, PositionHandle};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Per-request display flags. Not persisted anywhere, the hosting UI passes
/// its current values with every navigation call.
#[derive(Clone, Copy, Debug)]
pub struct ViewFlags {
    /// Interleave source lines with their instructions.
    pub mixed: bool,
    /// Insert function labels at function entry addresses.
    pub show_symbols: bool,
    /// Render decoded instruction text. When off and a source location is
    /// known, the function+offset locator is rendered instead.
    pub show_disassembly: bool,
}

impl Default for ViewFlags {
    fn default() -> Self {
        Self {
            mixed: false,
            show_symbols: true,
            show_disassembly: true,
        }
    }
}

/// Engine tunables.
#[derive(Clone, Copy, Debug)]
pub struct ViewConfig {
    /// How many document lines one retrieval tries to fill.
    pub fetch_lines: usize,
    /// Heuristic bytes-per-instruction used to size the fetch window.
    pub avg_instruction_size: u64,
    /// Fetch windows are widened to at least this many bytes.
    pub min_fetch_span: u64,
    /// Capacity of the failed-range memo.
    pub failed_range_cache: usize,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            fetch_lines: 64,
            avg_instruction_size: 4,
            min_fetch_span: 64,
            failed_range_cache: 64,
        }
    }
}

/// The boundary through which the engine reads and mutates the hosting
/// document and UI. Everything here is assumed to run on the UI's own
/// execution context; the engine calls it only from the session executor.
///
/// Implementations must never create a second label for an address that
/// already carries one ([`DocumentCallback::insert_label`] returns the
/// existing handle instead). Implementations are `'static`: backend
/// completions capture the session handle, which is typed over the document.
pub trait DocumentCallback: 'static {
    fn insert_disassembly_line(
        &mut self,
        addr: RelocatedAddress,
        addr_len: u64,
        instruction: &InstructionData,
        place: Option<&SourcePlace>,
        flags: ViewFlags,
    ) -> anyhow::Result<PositionHandle>;

    fn insert_label(
        &mut self,
        addr: RelocatedAddress,
        symbol: &str,
        visible: bool,
    ) -> anyhow::Result<PositionHandle>;

    fn insert_source(
        &mut self,
        addr: RelocatedAddress,
        place: &SourcePlace,
        text: Option<&str>,
    ) -> anyhow::Result<PositionHandle>;

    /// Render an error marker covering a range that could not be fetched.
    fn add_invalid_address_range(
        &mut self,
        range: AddressRange,
        range_hash: u64,
    ) -> anyhow::Result<PositionHandle>;

    fn position(&self, handle: PositionHandle) -> Option<&AddressRangePosition>;

    fn position_of_address(&self, addr: RelocatedAddress) -> Option<PositionHandle>;

    fn invalidate(&mut self, handle: PositionHandle);

    /// Scroll locking brackets every batch of document mutations. Calls are
    /// balanced; implementations may treat them as a counter.
    fn lock_scroller(&mut self);
    fn unlock_scroller(&mut self);

    /// Program counter moved (`None` while the target runs).
    fn update_pc(&mut self, pc: Option<RelocatedAddress>);

    /// Frame navigation landed.
    fn goto_frame(&mut self, level: u32, addr: Option<RelocatedAddress>);

    fn on_target_suspended(&mut self);
    fn on_target_resumed(&mut self);
    /// The owning execution target is gone; further interaction must be
    /// disabled.
    fn on_target_ended(&mut self);

    /// Terminal retrieval failure, suitable for a dialog or log entry.
    fn report_error(&mut self, message: &str);
}

/// One disassembly view over one debug session.
pub struct DisassemblyView<D: DocumentCallback> {
    document: D,
    config: ViewConfig,
    flags: ViewFlags,
    context: ExecutionContext,
    backend: Arc<dyn DisassemblyBackend>,
    handle: SessionHandle<D>,
    pending: PendingState,
    retrieval: RetrievalState,
    /// Ranges that already failed every fallback, keyed by stable hash.
    /// Repeating such a fetch renders the marker without asking the backend.
    failed_ranges: LruCache<u64, String>,
}

impl<D: DocumentCallback> DisassemblyView<D> {
    pub fn new(
        document: D,
        backend: Arc<dyn DisassemblyBackend>,
        context: ExecutionContext,
        config: ViewConfig,
        handle: SessionHandle<D>,
    ) -> Self {
        let cache_cap = NonZeroUsize::new(config.failed_range_cache.max(1)).expect("infallible");
        Self {
            document,
            config,
            flags: ViewFlags::default(),
            context,
            backend,
            handle,
            pending: PendingState::default(),
            retrieval: RetrievalState::Idle,
            failed_ranges: LruCache::new(cache_cap),
        }
    }

    pub fn document(&self) -> &D {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut D {
        &mut self.document
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn flags(&self) -> ViewFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: ViewFlags) {
        self.flags = flags;
    }

    pub fn update_pending(&self) -> bool {
        self.pending.update_pending
    }

    /// Reclaim tombstoned positions. Callers run this at quiescent points
    /// (no retrieval pending), never during a merge.
    pub fn compact(&mut self)
    where
        D: DocumentCompaction,
    {
        debug_assert!(!self.pending.update_pending);
        self.document.compact();
    }
}

/// Optional compaction entry point for documents that own a position table.
pub trait DocumentCompaction {
    fn compact(&mut self);
}
