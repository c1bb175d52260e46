//! # Velk Stable Interface
//!
//! This crate defines the leaf types shared by the Velk runtime and by code
//! that talks to it from the outside: applications declaring object classes
//! and plugins built as separate shared libraries. Everything here is plain
//! data with no behaviour that depends on the runtime: 128-bit [`Uid`]
//! identifiers, the flat [`ReturnValue`] result model, object flag bits,
//! microsecond [`Duration`]s, packed plugin versions, and the logging
//! level/sink contract.
//!
//! Plugins should depend on this crate rather than on the runtime wherever
//! possible; a plugin compiled against these types keeps working as the
//! runtime evolves around them.

pub use self::{log::*, types::*, uid::*};

mod log;
mod types;
mod uid;
