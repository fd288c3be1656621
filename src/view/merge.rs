//! Disassembly merge engine.
//!
//! Consumes backend fetch results and incrementally inserts them into the
//! position model: overlap detection, stale-data invalidation, symbol label
//! insertion, source/assembly interleaving and the multi-stage retry fallback
//! on partial or failed retrieval.

use crate::address::{AddressRange, RelocatedAddress};
use crate::backend::{
    BackendError, Completion, DisassemblyBlock, FetchParams, InstructionData, SourceLineData,
    SourcePlace,
};
use crate::error::Error;
use crate::view::{DisassemblyView, DocumentCallback, ViewFlags};
use crate::weak_error;
use itertools::Itertools;

/// One in-flight retrieval. Created by the controller, owned by the merge
/// engine until completion, discarded afterwards.
#[derive(Clone, Debug)]
pub struct RetrievalRequest {
    /// Address the caller wants represented in the document. `None` for
    /// purely source-driven requests.
    pub anchor: Option<RelocatedAddress>,
    /// Hard cut-off: data at or past this address is out of scope.
    pub end: RelocatedAddress,
    /// Source location to fetch by instead of an address.
    pub place: Option<SourcePlace>,
    pub line_hint: usize,
    pub flags: ViewFlags,
    pub(super) epoch: u64,
    pub(super) attempt: u32,
}

/// Retrieval protocol state: `Idle → Requesting → Merging → (Idle |
/// Requesting)` on retry.
#[derive(Debug, Default)]
pub(super) enum RetrievalState {
    #[default]
    Idle,
    Requesting(RetrievalRequest),
    Merging,
}

impl<D: DocumentCallback> DisassemblyView<D> {
    /// Issue the backend fetch for `req`. The caller holds the pending gate.
    pub(super) fn start_retrieval(&mut self, req: RetrievalRequest) {
        debug_assert!(self.pending.update_pending);
        debug_assert!(req.attempt < 3, "fallback ladder exceeded");

        // a range that already failed every fallback renders its marker
        // without another round trip; retries skip the memo since they just
        // talked to the backend
        if req.attempt == 0 {
            if let Some(anchor) = req.anchor {
                let hash = AddressRange::new(anchor, req.end).stable_hash();
                if let Some(message) = self.failed_ranges.get(&hash) {
                    log::debug!(
                        target: "asmview",
                        "fetch for {anchor} skipped, range failed before: {message}"
                    );
                    let message = message.clone();
                    self.render_error_marker(anchor, req.end, &message);
                    self.finish_retrieval();
                    return;
                }
            }
        }

        let params = FetchParams {
            start: if req.place.is_some() { None } else { req.anchor },
            end: req.end,
            place: req.place.clone(),
            line_hint: req.line_hint,
            mixed: req.flags.mixed,
        };
        let epoch = req.epoch;
        log::debug!(
            target: "asmview",
            "fetch disassembly: attempt {} params {params:?}",
            req.attempt
        );
        self.retrieval = RetrievalState::Requesting(req);

        let handle = self.handle.clone();
        self.backend.fetch_disassembly(
            params,
            Completion::new(move |result| {
                handle.submit(move |view| view.on_fetch_complete(epoch, result));
            }),
        );
    }

    /// Entry point for fetch completions, already marshaled onto the session
    /// executor. Every path through here leaves `update_pending == false`
    /// unless a retry attempt was started.
    pub(super) fn on_fetch_complete(
        &mut self,
        epoch: u64,
        result: Result<DisassemblyBlock, BackendError>,
    ) {
        // claim the request this completion belongs to
        let req = match std::mem::take(&mut self.retrieval) {
            RetrievalState::Requesting(req) if req.epoch == epoch => req,
            other => {
                // completion for a request this view no longer tracks (the
                // target ended or the request was superseded)
                log::debug!(target: "asmview", "drop untracked fetch completion (epoch {epoch})");
                self.retrieval = other;
                return;
            }
        };

        if epoch != self.context.epoch || !self.context.is_suspended() {
            log::debug!(
                target: "asmview",
                "discard stale disassembly response (epoch {epoch}, current {})",
                self.context.epoch
            );
            self.discard_retrieval();
            return;
        }

        match result {
            Err(BackendError::Canceled) => {
                log::debug!(target: "asmview", "disassembly fetch canceled");
                self.discard_retrieval();
            }
            Err(err) => self.retry_or_fail(req, err.to_string()),
            Ok(block) if block.is_empty() => {
                self.retry_or_fail(req, "backend returned no instructions".to_string())
            }
            Ok(block) => {
                self.retrieval = RetrievalState::Merging;
                match self.merge_locked(&req, &block) {
                    Some(true) => self.finish_retrieval(),
                    Some(false) => self.retry_or_fail(
                        req,
                        "fetched block does not cover the requested address".to_string(),
                    ),
                    // document hook failed, already logged
                    None => self.finish_retrieval(),
                }
            }
        }
    }

    /// Merge a block under the document scroll lock. The unlock is the next
    /// statement after the merge so it runs on success and failure alike.
    fn merge_locked(&mut self, req: &RetrievalRequest, block: &DisassemblyBlock) -> Option<bool> {
        self.document.lock_scroller();
        let merged = self.insert_block(req, block);
        self.document.unlock_scroller();
        weak_error!(merged, "disassembly merge:")
    }

    /// Fallback ladder: file/line → address, mixed → plain, then give up
    /// with an error marker at the anchor. Each rung is a fresh retrieval.
    fn retry_or_fail(&mut self, mut req: RetrievalRequest, reason: String) {
        req.attempt += 1;

        if req.place.take().is_some() {
            if req.anchor.is_none() {
                req.anchor = self.context.pc;
            }
            if let Some(anchor) = req.anchor {
                req.end = self.fetch_window(anchor).end;
                log::debug!(
                    target: "asmview",
                    "retry by address {anchor} after source-driven fetch failed: {reason}"
                );
                return self.start_retrieval(req);
            }
            // no last-known address for this context, nothing left to try
        } else if req.flags.mixed {
            req.flags.mixed = false;
            log::debug!(
                target: "asmview",
                "retry without mixed source after mixed fetch failed: {reason}"
            );
            return self.start_retrieval(req);
        }

        self.terminal_failure(req, reason);
    }

    /// The ladder is exhausted: remember the range, render a marker, tell
    /// the user.
    fn terminal_failure(&mut self, req: RetrievalRequest, reason: String) {
        log::warn!(target: "asmview", "disassembly retrieval failed: {reason}");

        if let Some(anchor) = req.anchor.or(self.context.pc) {
            let end = req.end.max(anchor.offset(1));
            self.failed_ranges
                .put(AddressRange::new(anchor, end).stable_hash(), reason.clone());
            self.render_error_marker(anchor, end, &reason);
        }

        self.document.report_error(&reason);
        self.finish_retrieval();
    }

    fn render_error_marker(&mut self, anchor: RelocatedAddress, end: RelocatedAddress, message: &str) {
        let range = AddressRange::new(anchor, end);

        // exactly one marker per failed range
        if let Some(existing) = self.document.position_of_address(anchor) {
            if self
                .document
                .position(existing)
                .map(|p| p.is_error())
                .unwrap_or(false)
            {
                return;
            }
        }

        log::debug!(target: "asmview", "render error marker at {range}: {message}");
        weak_error!(
            self.document
                .add_invalid_address_range(range, range.stable_hash())
                .map_err(Error::Hook),
            "error marker:"
        );
    }

    /// Single exit point of the retrieval protocol: drops the request, clears
    /// the pending gate and delivers a deferred goto notification.
    pub(super) fn finish_retrieval(&mut self) {
        self.retrieval = RetrievalState::Idle;
        self.pending.update_pending = false;
        if let Some(addr) = self.pending.goto_pending.take() {
            self.document.goto_frame(self.context.frame_level, Some(addr));
        }
    }

    /// Like [`Self::finish_retrieval`] but for outcomes that must not become
    /// user visible: a deferred goto is dropped, not delivered.
    pub(super) fn discard_retrieval(&mut self) {
        self.retrieval = RetrievalState::Idle;
        self.pending.update_pending = false;
        self.pending.goto_pending = None;
    }

    /// Insert a fetched block into the position model, source line by source
    /// line, instruction by instruction, in backend order.
    ///
    /// Returns whether the request anchor ended up represented by a valid
    /// position; for anchorless requests, whether anything was inserted.
    fn insert_block(
        &mut self,
        req: &RetrievalRequest,
        block: &DisassemblyBlock,
    ) -> Result<bool, Error> {
        let anchor = req.anchor;
        let mut inserted_any = false;
        let mut anchor_covered = false;

        let flat: Vec<(&SourceLineData, &InstructionData)> = block
            .lines
            .iter()
            .flat_map(|line| line.instructions.iter().map(move |ins| (line, ins)))
            .collect_vec();

        let mut last_source: Option<&SourcePlace> = None;
        for (idx, &(line, ins)) in flat.iter().enumerate() {
            let addr = ins.address;
            if addr >= req.end {
                break;
            }

            if let Some(handle) = self.document.position_of_address(addr) {
                let supersede = {
                    let pos = self
                        .document
                        .position(handle)
                        .ok_or(Error::PositionNotFound(addr))?;
                    let fresh_source = req.flags.mixed && line.place.is_some();
                    pos.is_error() || pos.is_placeholder() || (fresh_source && !pos.has_source())
                };
                if !supersede {
                    // already covered; a new start strictly inside a live
                    // position counts too, the old position is never split.
                    // the block may have started before the requested
                    // address, so the anchor is judged by its own position
                    let anchor_live = anchor
                        .and_then(|a| self.document.position_of_address(a))
                        .and_then(|h| self.document.position(h))
                        .map(|p| !p.is_error() && !p.is_placeholder())
                        .unwrap_or(false);
                    return Ok(anchor_covered
                        || anchor_live
                        || (anchor.is_none() && inserted_any));
                }
                self.document.invalidate(handle);
            }

            if req.flags.mixed {
                if let Some(place) = line.place.as_ref() {
                    if last_source != Some(place) {
                        self.document
                            .insert_source(addr, place, line.text.as_deref())
                            .map_err(Error::Hook)?;
                        inserted_any = true;
                        last_source = Some(place);
                    }
                }
            }

            if req.flags.show_symbols {
                if let Some(function) = ins.function.as_ref() {
                    if function.is_entry() {
                        let visible = req.flags.show_disassembly || line.place.is_none();
                        self.document
                            .insert_label(addr, &function.name, visible)
                            .map_err(Error::Hook)?;
                    }
                }
            }

            // instruction length from the successor address; for the block's
            // last instruction fall back to the opcode byte count, or stop
            // when the backend did not report bytes (the true length is
            // unknowable from partial data)
            let addr_len = match flat.get(idx + 1).map(|&(_, next)| next.address) {
                Some(next) if next > addr => next.as_u64() - addr.as_u64(),
                Some(next) => {
                    log::warn!(
                        target: "asmview",
                        "non-monotonic instruction stream at {addr} (next {next}), merge stopped"
                    );
                    break;
                }
                None if !ins.opcode.is_empty() => ins.opcode.len() as u64,
                None => break,
            };

            self.document
                .insert_disassembly_line(addr, addr_len, ins, line.place.as_ref(), req.flags)
                .map_err(Error::Hook)?;
            inserted_any = true;

            if anchor
                .map(|a| AddressRange::new(addr, addr.offset(addr_len as i64)).contains(a))
                .unwrap_or(false)
            {
                anchor_covered = true;
            }
        }

        Ok(match anchor {
            Some(_) => anchor_covered,
            None => inserted_any,
        })
    }
}
