//! Retrieval backend abstraction.
//!
//! A backend answers two asynchronous queries against a live execution
//! target: resolve a stack frame to an instruction address and fetch
//! already-decoded instructions (optionally grouped by source line) for an
//! address or file range. Completions may arrive on an arbitrary thread; the
//! caller is responsible for marshaling the outcome back onto the session
//! executor (see [`crate::proto`]).

use crate::address::RelocatedAddress;
use smallvec::SmallVec;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Location in a source file.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SourcePlace {
    pub file: PathBuf,
    pub line: u32,
}

impl SourcePlace {
    pub fn new(file: impl Into<PathBuf>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl Display for SourcePlace {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)
    }
}

/// Function name plus byte offset of an instruction within that function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionLocator {
    pub name: String,
    pub offset: u64,
}

impl FunctionLocator {
    pub fn new(name: impl Into<String>, offset: u64) -> Self {
        Self {
            name: name.into(),
            offset,
        }
    }

    /// True for the first instruction of a function.
    pub fn is_entry(&self) -> bool {
        self.offset == 0
    }
}

impl Display for FunctionLocator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}+{:#x}", self.name, self.offset)
    }
}

/// Single decoded instruction as supplied by a backend.
#[derive(Clone, Debug)]
pub struct InstructionData {
    /// Address in the target address space.
    pub address: RelocatedAddress,
    /// Raw opcode bytes, may be empty when the backend does not report them.
    pub opcode: SmallVec<[u8; 8]>,
    /// Instruction mnemonic.
    pub mnemonic: Option<String>,
    /// Operands string representation.
    pub operands: Option<String>,
    /// Enclosing function, if the backend knows it.
    pub function: Option<FunctionLocator>,
}

impl InstructionData {
    /// Rendered `mnemonic operands` text, `???` for missing parts.
    pub fn render(&self) -> String {
        format!(
            "{} {}",
            self.mnemonic.as_deref().unwrap_or("???"),
            self.operands.as_deref().unwrap_or("???"),
        )
    }
}

/// One source line worth of instructions. Backends that cannot relate code to
/// sources return a single line with no place.
#[derive(Clone, Debug, Default)]
pub struct SourceLineData {
    pub place: Option<SourcePlace>,
    /// Verbatim source text for mixed-mode display.
    pub text: Option<String>,
    pub instructions: Vec<InstructionData>,
}

/// Result payload of a disassembly fetch. May cover less than the requested
/// range, and may legitimately contain zero instructions ("no data here").
#[derive(Clone, Debug, Default)]
pub struct DisassemblyBlock {
    pub lines: Vec<SourceLineData>,
}

impl DisassemblyBlock {
    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.instructions.is_empty())
    }

    pub fn instruction_count(&self) -> usize {
        self.lines.iter().map(|l| l.instructions.len()).sum()
    }
}

/// Parameters of one disassembly fetch.
///
/// `start == None` means "derive the range from `place`"; exactly one of the
/// two anchors must be present.
#[derive(Clone, Debug)]
pub struct FetchParams {
    pub start: Option<RelocatedAddress>,
    pub end: RelocatedAddress,
    pub place: Option<SourcePlace>,
    /// How many document lines the caller wants to fill, a sizing hint only.
    pub line_hint: usize,
    /// Interleave source lines with instructions.
    pub mixed: bool,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("backend request canceled")]
    Canceled,
    #[error("transport: {0}")]
    Transport(String),
    #[error("frame {0} cannot be resolved to an address")]
    FrameResolve(u32),
}

/// One-shot completion handed to a backend call.
///
/// Completes exactly once: either explicitly through [`Completion::complete`]
/// or with [`BackendError::Canceled`] when dropped unresolved. The drop path
/// is what guarantees the engine eventually observes an outcome even for a
/// backend that forgets a code path.
pub struct Completion<T> {
    deliver: Option<Box<dyn FnOnce(Result<T, BackendError>) + Send>>,
}

impl<T> Completion<T> {
    pub fn new(deliver: impl FnOnce(Result<T, BackendError>) + Send + 'static) -> Self {
        Self {
            deliver: Some(Box::new(deliver)),
        }
    }

    pub fn complete(mut self, result: Result<T, BackendError>) {
        if let Some(deliver) = self.deliver.take() {
            deliver(result);
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some(deliver) = self.deliver.take() {
            deliver(Err(BackendError::Canceled));
        }
    }
}

/// Capability interface a debug backend implements to feed the view.
///
/// Both operations are fire-and-forget: the call returns immediately and the
/// completion is invoked later, possibly on a different thread.
pub trait DisassemblyBackend: Send + Sync {
    /// Resolve a stack frame (by its level in the current thread backtrace)
    /// to the instruction address the frame is stopped at.
    fn resolve_frame_address(&self, frame_level: u32, done: Completion<RelocatedAddress>);

    /// Fetch decoded instructions for an address or file range.
    fn fetch_disassembly(&self, params: FetchParams, done: Completion<DisassemblyBlock>);
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_completion_completes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let done = Completion::new(move |_: Result<RelocatedAddress, _>| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        done.complete(Ok(0x1000_u64.into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_completion_cancels_on_drop() {
        let canceled = Arc::new(AtomicUsize::new(0));
        let canceled_clone = canceled.clone();
        let done = Completion::new(move |result: Result<RelocatedAddress, _>| {
            assert!(matches!(result, Err(BackendError::Canceled)));
            canceled_clone.fetch_add(1, Ordering::SeqCst);
        });
        drop(done);
        assert_eq!(canceled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_block() {
        let mut block = DisassemblyBlock::default();
        assert!(block.is_empty());
        block.lines.push(SourceLineData {
            place: Some(SourcePlace::new("a.c", 10)),
            text: Some("int x = 0;".to_string()),
            instructions: vec![],
        });
        assert!(block.is_empty());
        assert_eq!(block.instruction_count(), 0);
    }
}
