use crate::address::RelocatedAddress;
use crate::backend::BackendError;
use crate::session::{ContextKind, TargetStatus};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- retrieval gate --------------------------------------------
    #[error("disassembly update already pending")]
    UpdatePending,
    #[error("target is not suspended (current status: {0})")]
    TargetNotSuspended(TargetStatus),

    // --------------------------------- backend errors --------------------------------------------
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("no disassembly backend registered for context kind `{0}`")]
    BackendNotFound(ContextKind),

    // --------------------------------- position model errors -------------------------------------
    #[error("no position covers address {0}")]
    PositionNotFound(RelocatedAddress),
    #[error("document range [{offset}, {offset}+{len}) is out of bounds")]
    DocumentBounds { offset: usize, len: usize },

    // --------------------------------- third party errors ----------------------------------------
    #[error("hook: {0}")]
    Hook(anyhow::Error),
}

impl Error {
    /// Return a hint to an interface - continue debugging after error or stop whole process.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::UpdatePending => false,
            Error::TargetNotSuspended(_) => false,
            Error::Backend(_) => false,
            Error::BackendNotFound(_) => false,
            Error::PositionNotFound(_) => false,
            Error::Hook(_) => false,

            // currently fatal errors
            Error::DocumentBounds { .. } => true,
        }
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "asmview", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "asmview", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
