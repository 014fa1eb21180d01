#![doc = include_str!("../README.md")]

mod bitmap;
mod error;
mod filename;
mod index;
mod log;
mod range;
pub mod resolve;
mod table;
pub mod wire;

pub use crate::bitmap::AddressBitmap;
pub use crate::error::Error;
pub use crate::error::Result;
pub use crate::filename::FileName;
pub use crate::range::AddressRange;
pub use crate::table::EntityUid;
pub use crate::table::Function;
pub use crate::table::Inconsistency;
pub use crate::table::Statement;
pub use crate::table::SymbolTable;

/// A type to represent addresses.
///
/// Addresses are offsets relative to the beginning of their owning
/// linked object, except where explicitly documented as
/// process-absolute.
pub type Addr = u64;
