//! `asmview` is the incremental disassembly-view engine of an interactive
//! debugger: it fetches decoded instructions (optionally interleaved with
//! source lines) for address ranges on demand, merges the results into a
//! sparse, line-addressable document and keeps that document consistent while
//! the user scrolls, steps or changes debug context.
//!
//! The engine mediates between two boundaries it does not own: a
//! [`backend::DisassemblyBackend`] answering address and instruction queries
//! against the live target, and a [`view::DocumentCallback`] through which the
//! hosting UI document is read and mutated. All engine work is serialized on
//! a per-session executor ([`proto`]); backend completions arriving on other
//! threads are marshaled there before they may touch the position model.

pub mod address;
pub mod backend;
pub mod error;
pub mod proto;
pub mod session;
pub mod view;

pub use error::Error;
