//! Resolution of raw runtime addresses into symbol information.
//!
//! An [`AddressSpaces`] collection records which linked objects each
//! thread of a profiled job had mapped, where, and when. A [`Resolver`]
//! bound to that collection drives a [`SymbolSource`], the seam where
//! debug-info readers plug in, to populate the symbol tables of those
//! objects, either in one batch per object or lazily, only for the
//! address ranges a thread actually touched.

mod resolver;
mod spaces;

pub use resolver::MemorySource;
pub use resolver::Resolver;
pub use resolver::SymbolSource;
pub use spaces::AddressSpaces;
pub use spaces::LinkedObject;
pub use spaces::Mapping;
pub use spaces::ThreadId;
pub use spaces::TimeInterval;
