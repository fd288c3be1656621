//! Debug-session context and backend resolution.

use crate::address::RelocatedAddress;
use crate::backend::{DisassemblyBackend, SourcePlace};
use crate::error::Error;
use indexmap::IndexMap;
use std::sync::Arc;
use strum_macros::{Display, EnumString};

/// Execution status of the debugged target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TargetStatus {
    Suspended,
    Running,
    Ended,
}

/// Kind of execution context a debug session runs against. Used as the key
/// for backend resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum ContextKind {
    /// Local process under native debug control.
    Native,
    /// Target behind a remote debug stub.
    RemoteStub,
    /// Post-mortem core dump.
    CoreDump,
}

/// Read-only snapshot of the execution context the view renders for.
///
/// Owned by the external debug session; the engine never mutates the fields
/// it receives, it only replaces the whole snapshot on lifecycle events. The
/// `epoch` is a staleness token: any completion created under an older epoch
/// is discarded at merge time.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub kind: ContextKind,
    pub frame_level: u32,
    pub status: TargetStatus,
    /// Source location of the selected frame, if known.
    pub place: Option<SourcePlace>,
    /// Program counter of the selected frame, if known.
    pub pc: Option<RelocatedAddress>,
    pub epoch: u64,
}

impl ExecutionContext {
    pub fn new(kind: ContextKind) -> Self {
        Self {
            kind,
            frame_level: 0,
            status: TargetStatus::Running,
            place: None,
            pc: None,
            epoch: 0,
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.status == TargetStatus::Suspended
    }
}

type BackendFactory = Box<dyn Fn() -> Arc<dyn DisassemblyBackend> + Send>;

/// Registry mapping context kinds to backend factories.
///
/// Resolution happens once per session, not per call; registration order is
/// kept so overriding a kind is an explicit `register` with the same key.
#[derive(Default)]
pub struct BackendRegistry {
    factories: IndexMap<ContextKind, BackendFactory>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: ContextKind,
        factory: impl Fn() -> Arc<dyn DisassemblyBackend> + Send + 'static,
    ) {
        self.factories.insert(kind, Box::new(factory));
    }

    /// Instantiate a backend for the given context kind.
    pub fn resolve(&self, kind: ContextKind) -> Result<Arc<dyn DisassemblyBackend>, Error> {
        let factory = self
            .factories
            .get(&kind)
            .ok_or(Error::BackendNotFound(kind))?;
        Ok(factory())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::{Completion, DisassemblyBlock, FetchParams};

    struct NullBackend;

    impl DisassemblyBackend for NullBackend {
        fn resolve_frame_address(&self, _frame_level: u32, done: Completion<RelocatedAddress>) {
            done.complete(Ok(RelocatedAddress::default()));
        }

        fn fetch_disassembly(&self, _params: FetchParams, done: Completion<DisassemblyBlock>) {
            done.complete(Ok(DisassemblyBlock::default()));
        }
    }

    #[test]
    fn test_context_kind_from_str() {
        use std::str::FromStr;

        assert_eq!(
            ContextKind::from_str("RemoteStub").unwrap(),
            ContextKind::RemoteStub
        );
        assert!(ContextKind::from_str("bogus").is_err());
    }

    #[test]
    fn test_registry_resolve() {
        let mut registry = BackendRegistry::new();
        registry.register(ContextKind::Native, || Arc::new(NullBackend));

        assert!(registry.resolve(ContextKind::Native).is_ok());
        assert!(matches!(
            registry.resolve(ContextKind::CoreDump),
            Err(Error::BackendNotFound(ContextKind::CoreDump))
        ));
    }
}
