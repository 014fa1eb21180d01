use std::collections::HashMap;
use std::fmt::Debug;
use std::path::Path;
use std::path::PathBuf;

use crate::filename::FileName;
use crate::log;
use crate::range::AddressRange;
use crate::table::Inconsistency;
use crate::table::SymbolTable;
use crate::Error;
use crate::Result;

use super::spaces::AddressSpaces;
use super::spaces::LinkedObject;
use super::spaces::ThreadId;
use super::spaces::TimeInterval;


/// A producer of raw symbol facts for linked object files.
///
/// This is the seam where debug-info readers plug in: whatever parses
/// symbols out of an object implements this trait and stages its
/// `(address range, name)` and `(address range, source position)` facts
/// into the table it is handed. Addresses staged must be relative to
/// the beginning of the linked object.
pub trait SymbolSource
where
    Self: Debug,
{
    /// The name of this source, for diagnostics.
    fn name(&self) -> &str;

    /// Is this source usable on the current platform and toolchain?
    fn available(&self) -> bool {
        true
    }

    /// Stage every raw fact known for `file` into `table`.
    fn load(&self, file: &FileName, table: &mut SymbolTable) -> Result<()>;

    /// Stage the raw facts touching the object-relative `range` of
    /// `file` into `table`.
    ///
    /// Sources that cannot scope their extraction may fall back to a
    /// full load, as this default does; append-only consolidation
    /// keeps the result correct either way.
    fn load_range(
        &self,
        file: &FileName,
        range: AddressRange,
        table: &mut SymbolTable,
    ) -> Result<()> {
        let _range = range;
        self.load(file, table)
    }
}


/// A symbol source over facts recorded in memory, keyed by object file
/// path.
///
/// Useful when extraction already happened elsewhere: a wire replay, a
/// capture from another process, or a test fixture.
#[derive(Debug, Default)]
pub struct MemorySource {
    /// Function facts per object file path.
    functions: HashMap<PathBuf, Vec<(AddressRange, String)>>,
    /// Statement facts per object file path.
    statements: HashMap<PathBuf, Vec<(AddressRange, FileName, u32, u32)>>,
}

impl MemorySource {
    /// Construct a source with no facts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a function fact for the object at the given path.
    pub fn add_function(
        &mut self,
        object: impl Into<PathBuf>,
        range: AddressRange,
        name: impl Into<String>,
    ) {
        self.functions
            .entry(object.into())
            .or_default()
            .push((range, name.into()));
    }

    /// Record a statement fact for the object at the given path.
    pub fn add_statement(
        &mut self,
        object: impl Into<PathBuf>,
        range: AddressRange,
        file: FileName,
        line: u32,
        column: u32,
    ) {
        self.statements
            .entry(object.into())
            .or_default()
            .push((range, file, line, column));
    }
}

impl SymbolSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    fn load(&self, file: &FileName, table: &mut SymbolTable) -> Result<()> {
        let path: &Path = file.path();
        for (range, name) in self.functions.get(path).into_iter().flatten() {
            table.add_function(*range, name.clone());
        }
        for (range, source, line, column) in self.statements.get(path).into_iter().flatten() {
            table.add_statement(*range, source.clone(), *line, *column);
        }
        Ok(())
    }

    fn load_range(
        &self,
        file: &FileName,
        range: AddressRange,
        table: &mut SymbolTable,
    ) -> Result<()> {
        let path: &Path = file.path();
        for (fact_range, name) in self.functions.get(path).into_iter().flatten() {
            if fact_range.intersects(&range) {
                table.add_function(*fact_range, name.clone());
            }
        }
        for (fact_range, source, line, column) in self.statements.get(path).into_iter().flatten() {
            if fact_range.intersects(&range) {
                table.add_statement(*fact_range, source.clone(), *line, *column);
            }
        }
        Ok(())
    }
}


/// Attaches symbol information to the linked objects of one
/// [`AddressSpaces`] collection.
///
/// A resolver is bound to its collection for its whole lifetime; it
/// borrows rather than owns it, so the collection outliving every
/// resolver bound to it is enforced by the compiler. Both entry points
/// only ever add symbol information; an entity identifier handed out
/// by an earlier resolution stays valid afterwards.
#[derive(Debug)]
pub struct Resolver<'spaces> {
    /// The address spaces resolution runs against.
    spaces: &'spaces AddressSpaces,
    /// The symbol source selected at instantiation.
    source: Box<dyn SymbolSource>,
}

impl<'spaces> Resolver<'spaces> {
    /// Instantiate a resolver for the given address spaces, selecting
    /// the first usable source from the given closed set. Selection
    /// happens once, here, not per call.
    ///
    /// Fails with [`Error::NoResolverAvailable`] when no registered
    /// source is usable; tool-level code decides whether to proceed
    /// without symbol information.
    pub fn instantiate(
        spaces: &'spaces AddressSpaces,
        sources: impl IntoIterator<Item = Box<dyn SymbolSource>>,
    ) -> Result<Self> {
        let source = sources
            .into_iter()
            .find(|source| source.available())
            .ok_or(Error::NoResolverAvailable)?;
        log::debug!("instantiated resolver with symbol source {}", source.name());
        Ok(Self { spaces, source })
    }

    /// Resolve every address region known for the given linked object
    /// in one batch, typically right after the object was loaded.
    ///
    /// Returns the data inconsistencies consolidation encountered.
    pub fn resolve_object(&self, object: &LinkedObject) -> Result<Vec<Inconsistency>> {
        log::debug!("resolving {}", object.file());

        let mut table = object.symbol_table_mut();
        let () = self.source.load(object.file(), &mut table)?;
        Ok(table.process_and_store())
    }

    /// Resolve the addresses observed in the process-absolute `range`
    /// for the given thread during the given time interval.
    ///
    /// Only the linked objects the thread had mapped there and then are
    /// touched, and only for the regions actually covered. This is the lazy
    /// path for tools that would rather not resolve whole objects up
    /// front.
    pub fn resolve(
        &self,
        thread: &ThreadId,
        range: AddressRange,
        interval: TimeInterval,
    ) -> Result<Vec<Inconsistency>> {
        let mut inconsistencies = Vec::new();

        for mapping in self.spaces.mappings(thread) {
            if !mapping.interval().intersects(&interval) {
                continue;
            }
            let Some(overlap) = mapping.range().intersection(&range) else {
                continue;
            };

            // Rebase from process-absolute to object-relative.
            let base = mapping.range().begin();
            let relative = AddressRange::new(overlap.begin() - base, overlap.end() - base);
            let object = mapping.object();
            log::debug!("resolving {relative} of {} for {thread}", object.file());

            let mut table = object.symbol_table_mut();
            let () = self
                .source
                .load_range(object.file(), relative, &mut table)?;
            inconsistencies.extend(table.process_and_store());
        }
        Ok(inconsistencies)
    }
}
