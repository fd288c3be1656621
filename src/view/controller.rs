//! View synchronization controller: one retrieval in flight per view,
//! goto-address/goto-frame navigation, target lifecycle.

use crate::address::{AddressRange, RelocatedAddress};
use crate::backend::{BackendError, Completion, SourcePlace};
use crate::error::Error;
use crate::session::TargetStatus;
use crate::view::merge::{RetrievalRequest, RetrievalState};
use crate::view::{DisassemblyView, DocumentCallback};

/// Concurrency gate of one view: exactly one retrieval may be in flight.
#[derive(Debug, Default)]
pub struct PendingState {
    pub update_pending: bool,
    /// Address to reveal once the pending retrieval completes.
    pub goto_pending: Option<RelocatedAddress>,
}

impl<D: DocumentCallback> DisassemblyView<D> {
    fn ensure_ready(&self) -> Result<(), Error> {
        if !self.context.is_suspended() {
            return Err(Error::TargetNotSuspended(self.context.status));
        }
        if self.pending.update_pending {
            return Err(Error::UpdatePending);
        }
        Ok(())
    }

    /// Address span one retrieval may cover: enough bytes for the requested
    /// line count, widened to the floor minimum.
    pub(super) fn fetch_window(&self, anchor: RelocatedAddress) -> AddressRange {
        let span = (self.config.fetch_lines as u64).saturating_mul(self.config.avg_instruction_size);
        AddressRange::new(anchor, anchor.offset(span as i64)).widen_to(self.config.min_fetch_span)
    }

    /// Fetch instructions around `anchor` so the document can render them.
    /// This is the scroll-into-unknown-territory entry point; `line_hint`
    /// tells the engine how many lines the viewport wants.
    pub fn retrieve(&mut self, anchor: RelocatedAddress, line_hint: usize) -> Result<(), Error> {
        self.ensure_ready()?;
        if self.is_displayed(anchor) {
            return Ok(());
        }

        self.pending.update_pending = true;
        let window = self.fetch_window(anchor);
        self.start_retrieval(RetrievalRequest {
            anchor: Some(anchor),
            end: window.end,
            place: None,
            line_hint: line_hint.max(1),
            flags: self.flags,
            epoch: self.context.epoch,
            attempt: 0,
        });
        Ok(())
    }

    /// Reveal `addr`, fetching surrounding instructions first when the model
    /// does not cover it yet.
    pub fn goto_address(&mut self, addr: RelocatedAddress) -> Result<(), Error> {
        self.ensure_ready()?;
        if self.is_displayed(addr) {
            self.document.goto_frame(self.context.frame_level, Some(addr));
            return Ok(());
        }
        self.request_reveal(addr, false);
        Ok(())
    }

    /// Start an anchored retrieval and remember to reveal the anchor once it
    /// completes. Frame-driven reveals prefer a source-driven fetch when the
    /// context knows its source location; the fallback ladder degrades to an
    /// address fetch if the source route fails.
    fn request_reveal(&mut self, anchor: RelocatedAddress, use_place: bool) {
        self.pending.update_pending = true;
        self.pending.goto_pending = Some(anchor);
        let window = self.fetch_window(anchor);
        self.start_retrieval(RetrievalRequest {
            anchor: Some(anchor),
            end: window.end,
            place: if use_place {
                self.context.place.clone()
            } else {
                None
            },
            line_hint: self.config.fetch_lines,
            flags: self.flags,
            epoch: self.context.epoch,
            attempt: 0,
        });
    }

    /// Select frame `level` and reveal its location; the frame address is
    /// resolved through the backend first.
    pub fn goto_frame(&mut self, level: u32) -> Result<(), Error> {
        self.ensure_ready()?;
        self.select_frame(level);
        self.pending.update_pending = true;

        let epoch = self.context.epoch;
        let handle = self.handle.clone();
        self.backend.resolve_frame_address(
            level,
            Completion::new(move |result| {
                handle.submit(move |view| view.on_frame_resolved(epoch, level, result));
            }),
        );
        Ok(())
    }

    /// Select frame `level` when its address is already known.
    pub fn goto_frame_at(&mut self, level: u32, addr: RelocatedAddress) -> Result<(), Error> {
        self.ensure_ready()?;
        self.select_frame(level);
        if self.is_displayed(addr) {
            self.document.goto_frame(level, Some(addr));
            return Ok(());
        }
        self.request_reveal(addr, true);
        Ok(())
    }

    pub(super) fn on_frame_resolved(
        &mut self,
        epoch: u64,
        level: u32,
        result: Result<RelocatedAddress, BackendError>,
    ) {
        if epoch != self.context.epoch || !self.context.is_suspended() {
            log::debug!(
                target: "asmview",
                "discard stale frame resolution (epoch {epoch}, current {})",
                self.context.epoch
            );
            self.discard_retrieval();
            return;
        }

        match result {
            Ok(addr) => {
                if self.is_displayed(addr) {
                    self.pending.update_pending = false;
                    self.document.goto_frame(level, Some(addr));
                    return;
                }
                self.request_reveal(addr, true);
            }
            Err(err) => {
                log::warn!(target: "asmview", "frame {level} resolution failed: {err:#}");
                self.document.report_error(&err.to_string());
                self.pending.update_pending = false;
            }
        }
    }

    /// Target stopped: refresh the context snapshot and make sure the stop
    /// location is represented in the document.
    pub fn target_suspended(&mut self, pc: Option<RelocatedAddress>, place: Option<SourcePlace>) {
        self.context.epoch += 1;
        self.context.status = TargetStatus::Suspended;
        self.context.frame_level = 0;
        self.context.pc = pc;
        self.context.place = place;

        self.document.on_target_suspended();
        self.document.update_pc(pc);

        if let Some(pc) = pc {
            match self.ensure_ready() {
                Ok(()) if self.is_displayed(pc) => self.document.goto_frame(0, Some(pc)),
                Ok(()) => self.request_reveal(pc, true),
                // a previous update is still draining; the UI re-requests
                // once it settles
                Err(e) => log::debug!(target: "asmview", "skip stop-location reveal: {e:#}"),
            }
        }
    }

    pub fn target_resumed(&mut self) {
        self.context.epoch += 1;
        self.context.status = TargetStatus::Running;
        self.document.on_target_resumed();
        self.document.update_pc(None);
    }

    /// The owning execution target is gone. In-flight request state is
    /// discarded here; a late completion is dropped as stale when it arrives.
    pub fn target_ended(&mut self) {
        self.context.epoch += 1;
        self.context.status = TargetStatus::Ended;
        self.retrieval = RetrievalState::Idle;
        self.pending = PendingState::default();
        self.document.update_pc(None);
        self.document.on_target_ended();
    }

    fn select_frame(&mut self, level: u32) {
        if self.context.frame_level != level {
            self.context.frame_level = level;
            // responses computed for the previous frame are stale now
            self.context.epoch += 1;
        }
    }

    /// Whether `addr` is already represented by a live position that the
    /// current display flags would not refresh anyway.
    fn is_displayed(&self, addr: RelocatedAddress) -> bool {
        let Some(handle) = self.document.position_of_address(addr) else {
            return false;
        };
        let Some(pos) = self.document.position(handle) else {
            return false;
        };
        let wants_source = self.flags.mixed && !pos.has_source();
        !pos.is_error() && !pos.is_placeholder() && !wants_source
    }
}
