use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::mem;

use crate::bitmap::AddressBitmap;
use crate::filename::FileName;
use crate::index::AddressRangeIndex;
use crate::log;
use crate::range::AddressRange;
use crate::wire::FunctionEntry;
use crate::wire::StatementEntry;
use crate::wire::SymbolTableMessage;
use crate::Addr;


/// A unique identifier for a function or statement within one
/// [`SymbolTable`].
///
/// Identifiers are assigned monotonically as entities are created and
/// never reused within a table's lifetime; an identifier handed out
/// once stays valid for as long as the table exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityUid(u32);

impl EntityUid {
    /// The largest representable identifier, used to bound searches.
    pub(crate) const MAX: EntityUid = EntityUid(u32::MAX);

    #[cfg(test)]
    pub(crate) fn from_raw(uid: u32) -> Self {
        Self(uid)
    }
}


/// A raw function fact staged for consolidation.
#[derive(Clone, Debug)]
struct RawFunction {
    range: AddressRange,
    name: String,
}

/// A raw statement fact staged for consolidation.
#[derive(Clone, Debug)]
struct RawStatement {
    range: AddressRange,
    file: FileName,
    line: u32,
    column: u32,
}

/// A consolidated function: its mangled name and the disjoint address
/// ranges it occupies.
#[derive(Clone, Debug)]
struct FunctionRecord {
    name: String,
    ranges: BTreeSet<AddressRange>,
}

/// A consolidated statement: its source position and the disjoint
/// address ranges it occupies.
#[derive(Clone, Debug)]
struct StatementRecord {
    file: FileName,
    line: u32,
    column: u32,
    ranges: BTreeSet<AddressRange>,
}

/// The identity of a statement: source file, line, and column, ordered
/// lexicographically in that sequence so statement maps have a
/// canonical iteration order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct StatementKey {
    file: FileName,
    line: u32,
    column: u32,
}


/// A diagnostic reported when two distinct function names claim the
/// same address.
///
/// Bogus debug information produces such overlaps in practice; they are
/// surfaced rather than silently merged, and never abort consolidation
/// of the rest of the table. The first claim wins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inconsistency {
    /// The first address found with conflicting claims.
    pub addr: Addr,
    /// The name that claimed the address first and was kept.
    pub kept: String,
    /// The later claim that was rejected.
    pub rejected: String,
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "address {:#x} claimed by both \"{}\" and \"{}\"; keeping the first",
            self.addr, self.kept, self.rejected
        )
    }
}


/// A function in a symbol table: a lightweight handle valid for as long
/// as the table is borrowed.
#[derive(Clone, Copy, Debug)]
pub struct Function<'table> {
    uid: EntityUid,
    record: &'table FunctionRecord,
}

impl<'table> Function<'table> {
    /// The unique identifier of this function within its table.
    pub fn uid(&self) -> EntityUid {
        self.uid
    }

    /// The mangled name of this function.
    pub fn mangled_name(&self) -> &'table str {
        &self.record.name
    }

    /// The disjoint address ranges this function occupies. Multiple
    /// ranges arise from discontiguously compiled code, e.g. inlined
    /// clones.
    pub fn ranges(&self) -> &'table BTreeSet<AddressRange> {
        &self.record.ranges
    }
}

/// A statement in a symbol table: a lightweight handle valid for as
/// long as the table is borrowed.
#[derive(Clone, Copy, Debug)]
pub struct Statement<'table> {
    uid: EntityUid,
    record: &'table StatementRecord,
}

impl<'table> Statement<'table> {
    /// The unique identifier of this statement within its table.
    pub fn uid(&self) -> EntityUid {
        self.uid
    }

    /// The name of this statement's source file.
    pub fn file(&self) -> &'table FileName {
        &self.record.file
    }

    /// The line number of this statement.
    pub fn line(&self) -> u32 {
        self.record.line
    }

    /// The column number of this statement.
    pub fn column(&self) -> u32 {
        self.record.column
    }

    /// The disjoint address ranges this statement occupies.
    pub fn ranges(&self) -> &'table BTreeSet<AddressRange> {
        &self.record.ranges
    }
}


/// The symbol table of a single executable or shared library.
///
/// Raw `(address range, name)` and `(address range, source position)`
/// facts are staged with [`add_function`][Self::add_function] and
/// [`add_statement`][Self::add_statement] while a debug-info reader
/// walks the object, then consolidated in one
/// [`process_and_store`][Self::process_and_store] pass into entities
/// that both kinds of range query run against. All addresses are
/// relative to the beginning of the linked object, never absolute
/// addresses of some process.
///
/// Consolidation is append-only: later rounds may add entities or widen
/// the range set of existing ones, but an [`EntityUid`] handed out once
/// is never changed or removed, so resolved data held by callers stays
/// valid across incremental resolution.
#[derive(Clone, Debug)]
pub struct SymbolTable {
    /// Name of this symbol table's linked object file.
    file: FileName,
    /// The next unique identifier to hand out.
    next_uid: u32,
    /// The consolidated functions of the table.
    functions: BTreeMap<EntityUid, FunctionRecord>,
    /// The consolidated statements of the table.
    statements: BTreeMap<EntityUid, StatementRecord>,
    /// Index used to find functions by address.
    functions_index: AddressRangeIndex,
    /// Index used to find statements by address.
    statements_index: AddressRangeIndex,
    /// Function name to identifier, for merging across rounds.
    function_uids: BTreeMap<String, EntityUid>,
    /// Statement key to identifier, for merging across rounds.
    statement_uids: BTreeMap<StatementKey, EntityUid>,
    /// Function facts staged since the last consolidation.
    raw_functions: Vec<RawFunction>,
    /// Statement facts staged since the last consolidation.
    raw_statements: Vec<RawStatement>,
}

impl SymbolTable {
    /// Construct an empty symbol table for the named linked object
    /// file.
    pub fn new(file: FileName) -> Self {
        Self {
            file,
            next_uid: 0,
            functions: BTreeMap::new(),
            statements: BTreeMap::new(),
            functions_index: AddressRangeIndex::default(),
            statements_index: AddressRangeIndex::default(),
            function_uids: BTreeMap::new(),
            statement_uids: BTreeMap::new(),
            raw_functions: Vec::new(),
            raw_statements: Vec::new(),
        }
    }

    /// The name of this symbol table's linked object file.
    pub fn file(&self) -> &FileName {
        &self.file
    }

    /// Stage a raw function fact: `range` belongs to the function with
    /// the given mangled name. No ordering or deduplication is expected
    /// of callers.
    pub fn add_function(&mut self, range: AddressRange, name: impl Into<String>) {
        self.raw_functions.push(RawFunction {
            range,
            name: name.into(),
        });
    }

    /// Stage a raw statement fact: `range` belongs to the statement at
    /// the given source position.
    pub fn add_statement(&mut self, range: AddressRange, file: FileName, line: u32, column: u32) {
        self.raw_statements.push(RawStatement {
            range,
            file,
            line,
            column,
        });
    }

    /// Consolidate all staged raw facts into the table's entity set and
    /// indexes, returning the data inconsistencies encountered.
    ///
    /// The staged facts' distinct addresses are first partitioned into
    /// maximal contiguous groups, bounding all further work to locally
    /// relevant neighborhoods. Within each group, conflicting function
    /// name claims resolve to the first writer; scattered statement
    /// facts sharing a `(file, line, column)` position fold into one
    /// entity holding the contiguous runs of its addresses.
    ///
    /// Inconsistencies are diagnostics, not failures: consolidation of
    /// the remainder of the table always completes.
    pub fn process_and_store(&mut self) -> Vec<Inconsistency> {
        let raw_functions = mem::take(&mut self.raw_functions);
        let raw_statements = mem::take(&mut self.raw_statements);

        // The full set of distinct addresses referenced by any staged
        // fact.
        let mut touched = BTreeSet::new();
        for fact in &raw_functions {
            touched.extend(fact.range.begin()..=fact.range.end());
        }
        for fact in &raw_statements {
            touched.extend(fact.range.begin()..=fact.range.end());
        }

        let partitions = partition_address_set(&touched);
        let mut inconsistencies = Vec::new();

        for partition in &partitions {
            // SANITY: Partitions are never empty.
            let begin = *partition.first().unwrap();
            let end = *partition.last().unwrap();
            let prange = AddressRange::new(begin, end);

            // One function name per address. Claims consolidated in
            // earlier rounds keep their addresses; the index knows
            // which entities those are.
            let mut names = Vec::new();
            let mut claims = BTreeMap::new();
            for uid in self.functions_index.overlapping(prange) {
                if let Some(record) = self.functions.get(&uid) {
                    let idx = intern(&mut names, &record.name);
                    for range in &record.ranges {
                        if let Some(overlap) = range.intersection(&prange) {
                            for addr in overlap.begin()..=overlap.end() {
                                claims.insert(addr, idx);
                            }
                        }
                    }
                }
            }

            let mut fresh: BTreeMap<usize, BTreeSet<Addr>> = BTreeMap::new();
            for fact in &raw_functions {
                let Some(overlap) = fact.range.intersection(&prange) else {
                    continue;
                };
                let idx = intern(&mut names, &fact.name);
                let mut conflict = None;
                for addr in overlap.begin()..=overlap.end() {
                    match claims.get(&addr) {
                        Some(&existing) if existing == idx => (),
                        Some(&existing) => {
                            if conflict.is_none() {
                                conflict = Some((addr, existing));
                            }
                        }
                        None => {
                            claims.insert(addr, idx);
                            fresh.entry(idx).or_default().insert(addr);
                        }
                    }
                }
                if let Some((addr, existing)) = conflict {
                    let kept = names[existing].clone();
                    log::warn!(
                        "functions \"{kept}\" and \"{}\" both claim address {addr:#x} \
                         in {}; keeping the first",
                        fact.name,
                        self.file
                    );
                    inconsistencies.push(Inconsistency {
                        addr,
                        kept,
                        rejected: fact.name.clone(),
                    });
                }
            }

            // Turn each name's newly claimed addresses into contiguous
            // runs and fold them into the entity set.
            for (idx, addrs) in &fresh {
                let mut bitmap = AddressBitmap::new(prange);
                for &addr in addrs {
                    let () = bitmap.set(addr, true);
                }
                let ranges = bitmap.contiguous_ranges(true);
                self.store_function_ranges(&names[*idx], ranges);
            }
        }

        // Statements: group all staged facts sharing a source position
        // and union their addresses into disjoint contiguous runs.
        let mut grouped: BTreeMap<StatementKey, BTreeSet<Addr>> = BTreeMap::new();
        for fact in &raw_statements {
            let key = StatementKey {
                file: fact.file.clone(),
                line: fact.line,
                column: fact.column,
            };
            grouped
                .entry(key)
                .or_default()
                .extend(fact.range.begin()..=fact.range.end());
        }
        for (key, addrs) in grouped {
            let mut ranges = BTreeSet::new();
            for part in partition_address_set(&addrs) {
                let bitmap = AddressBitmap::from_addresses(&part);
                ranges.extend(bitmap.contiguous_ranges(true));
            }
            self.store_statement_ranges(key, ranges);
        }

        inconsistencies
    }

    /// All functions of the table, in identifier order.
    pub fn functions(&self) -> impl Iterator<Item = Function<'_>> + '_ {
        self.functions
            .iter()
            .map(|(&uid, record)| Function { uid, record })
    }

    /// All statements of the table, in identifier order.
    pub fn statements(&self) -> impl Iterator<Item = Statement<'_>> + '_ {
        self.statements
            .iter()
            .map(|(&uid, record)| Statement { uid, record })
    }

    /// The function with the given identifier, if any.
    pub fn function(&self, uid: EntityUid) -> Option<Function<'_>> {
        self.functions.get(&uid).map(|record| Function { uid, record })
    }

    /// The statement with the given identifier, if any.
    pub fn statement(&self, uid: EntityUid) -> Option<Statement<'_>> {
        self.statements
            .get(&uid)
            .map(|record| Statement { uid, record })
    }

    /// All functions with at least one address range overlapping the
    /// given range, in order of their first overlapping range.
    pub fn functions_overlapping(&self, range: AddressRange) -> Vec<Function<'_>> {
        self.functions_index
            .overlapping(range)
            .into_iter()
            .filter_map(|uid| self.function(uid))
            .collect()
    }

    /// All statements with at least one address range overlapping the
    /// given range, in order of their first overlapping range.
    pub fn statements_overlapping(&self, range: AddressRange) -> Vec<Statement<'_>> {
        self.statements_index
            .overlapping(range)
            .into_iter()
            .filter_map(|uid| self.statement(uid))
            .collect()
    }

    /// All statements overlapping any address range of the given
    /// function.
    pub fn function_statements(&self, uid: EntityUid) -> Vec<Statement<'_>> {
        let mut seen = BTreeSet::new();
        let mut statements = Vec::new();
        if let Some(function) = self.function(uid) {
            for &range in function.ranges() {
                for statement in self.statements_overlapping(range) {
                    if seen.insert(statement.uid()) {
                        statements.push(statement);
                    }
                }
            }
        }
        statements
    }

    /// All functions overlapping any address range of the given
    /// statement.
    pub fn statement_functions(&self, uid: EntityUid) -> Vec<Function<'_>> {
        let mut seen = BTreeSet::new();
        let mut functions = Vec::new();
        if let Some(statement) = self.statement(uid) {
            for &range in statement.ranges() {
                for function in self.functions_overlapping(range) {
                    if seen.insert(function.uid()) {
                        functions.push(function);
                    }
                }
            }
        }
        functions
    }

    /// Convert this symbol table into its wire representation.
    ///
    /// An entity with multiple disjoint ranges becomes multiple entries
    /// sharing its name or source position.
    pub fn to_message(&self) -> SymbolTableMessage {
        let functions = self
            .functions
            .values()
            .flat_map(|record| {
                record.ranges.iter().map(move |&range| FunctionEntry {
                    range,
                    name: record.name.clone(),
                })
            })
            .collect();
        let statements = self
            .statements
            .values()
            .flat_map(|record| {
                record.ranges.iter().map(move |&range| StatementEntry {
                    range,
                    file: record.file.to_message(),
                    line: record.line,
                    column: record.column,
                })
            })
            .collect();
        SymbolTableMessage {
            file: self.file.to_message(),
            functions,
            statements,
        }
    }

    /// Construct a symbol table from its wire representation, grouping
    /// entries back into entities by name or source position, in entry
    /// order.
    pub fn from_message(message: &SymbolTableMessage) -> Self {
        let mut table = Self::new(FileName::from_message(&message.file));
        for entry in &message.functions {
            table.store_function_ranges(&entry.name, BTreeSet::from([entry.range]));
        }
        for entry in &message.statements {
            let key = StatementKey {
                file: FileName::from_message(&entry.file),
                line: entry.line,
                column: entry.column,
            };
            table.store_statement_ranges(key, BTreeSet::from([entry.range]));
        }
        table
    }

    fn next_entity_uid(&mut self) -> EntityUid {
        let uid = EntityUid(self.next_uid);
        self.next_uid = self
            .next_uid
            .checked_add(1)
            .expect("ran out of entity identifiers");
        uid
    }

    /// Fold the given ranges into the function of the given name,
    /// creating it if needed, and keep the index in step.
    fn store_function_ranges(&mut self, name: &str, new_ranges: BTreeSet<AddressRange>) {
        let uid = match self.function_uids.get(name) {
            Some(&uid) => uid,
            None => {
                let uid = self.next_entity_uid();
                self.function_uids.insert(name.to_string(), uid);
                self.functions.insert(
                    uid,
                    FunctionRecord {
                        name: name.to_string(),
                        ranges: BTreeSet::new(),
                    },
                );
                uid
            }
        };

        if let Some(record) = self.functions.get_mut(&uid) {
            let mut changed = false;
            for range in new_ranges {
                changed |= merge_range(&mut record.ranges, range);
            }
            if changed {
                // Re-derive the index rows from the merged range set.
                self.functions_index.remove(uid);
                for &range in &record.ranges {
                    self.functions_index.insert(uid, range);
                }
            }
        }
    }

    /// Fold the given ranges into the statement with the given key,
    /// creating it if needed, and keep the index in step.
    fn store_statement_ranges(&mut self, key: StatementKey, new_ranges: BTreeSet<AddressRange>) {
        let uid = match self.statement_uids.get(&key) {
            Some(&uid) => uid,
            None => {
                let uid = self.next_entity_uid();
                self.statement_uids.insert(key.clone(), uid);
                self.statements.insert(
                    uid,
                    StatementRecord {
                        file: key.file,
                        line: key.line,
                        column: key.column,
                        ranges: BTreeSet::new(),
                    },
                );
                uid
            }
        };

        if let Some(record) = self.statements.get_mut(&uid) {
            let mut changed = false;
            for range in new_ranges {
                changed |= merge_range(&mut record.ranges, range);
            }
            if changed {
                self.statements_index.remove(uid);
                for &range in &record.ranges {
                    self.statements_index.insert(uid, range);
                }
            }
        }
    }
}


/// Partition an address set into maximal groups of consecutive
/// addresses, i.e. runs with no gap between adjacent members.
fn partition_address_set(addresses: &BTreeSet<Addr>) -> Vec<BTreeSet<Addr>> {
    let mut partitions = Vec::new();
    let mut current = BTreeSet::new();
    let mut prev = None;

    for &addr in addresses {
        if let Some(prev) = prev {
            if addr != prev + 1 {
                partitions.push(mem::take(&mut current));
            }
        }
        current.insert(addr);
        prev = Some(addr);
    }
    if !current.is_empty() {
        partitions.push(current);
    }
    partitions
}

/// Fold `new` into `ranges`, coalescing it with any overlapping or
/// adjacent entries. Returns whether the set changed.
///
/// The entries of `ranges` are pairwise disjoint and non-adjacent, and
/// remain so; a single pass suffices because no two existing entries
/// can be bridged except through `new` itself.
fn merge_range(ranges: &mut BTreeSet<AddressRange>, new: AddressRange) -> bool {
    if ranges.iter().any(|range| range.contains_range(&new)) {
        return false
    }

    let mut begin = new.begin();
    let mut end = new.end();
    let absorbed = ranges
        .iter()
        .copied()
        .filter(|range| {
            range.begin() <= end.saturating_add(1) && range.end().saturating_add(1) >= begin
        })
        .collect::<Vec<_>>();
    for range in &absorbed {
        begin = begin.min(range.begin());
        end = end.max(range.end());
        ranges.remove(range);
    }
    ranges.insert(AddressRange::new(begin, end));
    true
}

/// The position of `name` in `names`, appending it if new.
fn intern(names: &mut Vec<String>, name: &str) -> usize {
    match names.iter().position(|known| known == name) {
        Some(idx) => idx,
        None => {
            names.push(name.to_string());
            names.len() - 1
        }
    }
}
