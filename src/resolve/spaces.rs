use std::cell::Ref;
use std::cell::RefCell;
use std::cell::RefMut;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::filename::FileName;
use crate::range::AddressRange;
use crate::table::SymbolTable;
use crate::Addr;


/// The identity of one thread of a profiled job.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId {
    /// The name of the host the thread ran on.
    host: String,
    /// The identifier of the thread's process.
    pid: u32,
    /// The identifier of the thread within its process.
    tid: u32,
}

impl ThreadId {
    /// Construct a thread identity from its parts.
    pub fn new(host: impl Into<String>, pid: u32, tid: u32) -> Self {
        Self {
            host: host.into(),
            pid,
            tid,
        }
    }

    /// The name of the host the thread ran on.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The identifier of the thread's process.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The identifier of the thread within its process.
    pub fn tid(&self) -> u32 {
        self.tid
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.pid, self.tid)
    }
}


/// A closed interval `[begin, end]` of time, in nanoseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeInterval {
    begin: u64,
    end: u64,
}

impl TimeInterval {
    /// Construct a time interval from its closed bounds.
    ///
    /// # Panics
    /// Panics when `end < begin`.
    pub fn new(begin: u64, end: u64) -> Self {
        assert!(begin <= end, "invalid time interval [{begin}, {end}]");
        Self { begin, end }
    }

    /// The closed beginning of this interval.
    pub fn begin(&self) -> u64 {
        self.begin
    }

    /// The closed end of this interval.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Does this interval contain the given time?
    pub fn contains(&self, time: u64) -> bool {
        self.begin <= time && time <= self.end
    }

    /// Does this interval have at least one instant in common with
    /// another?
    pub fn intersects(&self, other: &TimeInterval) -> bool {
        self.begin <= other.end && other.begin <= self.end
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.begin, self.end)
    }
}


/// An executable or shared library mapped into the address space of one
/// or more threads.
///
/// A linked object is identified by its file plus the time interval
/// during which this instance was valid: when a shared library is
/// unloaded and a different build mapped at the same path later, the
/// two are distinct objects with distinct symbol tables.
#[derive(Debug)]
pub struct LinkedObject {
    /// The name of the object's file.
    file: FileName,
    /// The interval during which this instance was valid.
    interval: TimeInterval,
    /// The object's symbol table. Interior-mutable so resolution can
    /// append behind the shared handles the registry gives out.
    table: RefCell<SymbolTable>,
}

impl LinkedObject {
    fn new(file: FileName, interval: TimeInterval) -> Self {
        let table = RefCell::new(SymbolTable::new(file.clone()));
        Self {
            file,
            interval,
            table,
        }
    }

    /// The name of the object's file.
    pub fn file(&self) -> &FileName {
        &self.file
    }

    /// The interval during which this instance was valid.
    pub fn interval(&self) -> TimeInterval {
        self.interval
    }

    /// Borrow the object's symbol table for read-only queries.
    ///
    /// # Panics
    /// Panics when resolution of this object is in progress.
    pub fn symbol_table(&self) -> Ref<'_, SymbolTable> {
        self.table.borrow()
    }

    /// Borrow the object's symbol table for resolution.
    pub(crate) fn symbol_table_mut(&self) -> RefMut<'_, SymbolTable> {
        self.table.borrow_mut()
    }
}


/// One mapping of a linked object into a thread's address space.
#[derive(Clone, Debug)]
pub struct Mapping {
    /// The mapped object.
    object: Rc<LinkedObject>,
    /// The process-absolute address range the object occupied.
    range: AddressRange,
    /// The interval during which the mapping was in place.
    interval: TimeInterval,
}

impl Mapping {
    /// The mapped object.
    pub fn object(&self) -> &Rc<LinkedObject> {
        &self.object
    }

    /// The process-absolute address range the object occupied.
    pub fn range(&self) -> AddressRange {
        self.range
    }

    /// The interval during which the mapping was in place.
    pub fn interval(&self) -> TimeInterval {
        self.interval
    }
}


/// The address spaces of a profiled job: every linked object seen, and
/// which thread had which object mapped where, and when.
#[derive(Debug, Default)]
pub struct AddressSpaces {
    /// Every linked object seen, in load order.
    objects: Vec<Rc<LinkedObject>>,
    /// The mappings of each thread, in the order they were recorded.
    mappings: HashMap<ThreadId, Vec<Mapping>>,
}

impl AddressSpaces {
    /// Construct an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a linked object valid during the given interval and
    /// return a shared handle to it.
    pub fn load_object(&mut self, file: FileName, interval: TimeInterval) -> Rc<LinkedObject> {
        let object = Rc::new(LinkedObject::new(file, interval));
        self.objects.push(Rc::clone(&object));
        object
    }

    /// Record that `thread` had `object` mapped at the process-absolute
    /// `range` during `interval`.
    pub fn map(
        &mut self,
        thread: ThreadId,
        object: &Rc<LinkedObject>,
        range: AddressRange,
        interval: TimeInterval,
    ) {
        self.mappings.entry(thread).or_default().push(Mapping {
            object: Rc::clone(object),
            range,
            interval,
        });
    }

    /// Every linked object seen, in load order.
    pub fn objects(&self) -> impl Iterator<Item = &Rc<LinkedObject>> + '_ {
        self.objects.iter()
    }

    /// The mappings recorded for the given thread.
    pub fn mappings(&self, thread: &ThreadId) -> &[Mapping] {
        self.mappings.get(thread).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The mapping covering the process-absolute address `addr` in the
    /// given thread at the given time, along with the object-relative
    /// address it rebases to.
    ///
    /// This is the snapshot queries go through: the same address can
    /// resolve to different objects at different times when libraries
    /// come and go.
    pub fn lookup(&self, thread: &ThreadId, addr: Addr, time: u64) -> Option<(&Mapping, Addr)> {
        self.mappings(thread)
            .iter()
            .find(|mapping| mapping.range.contains(addr) && mapping.interval.contains(time))
            .map(|mapping| (mapping, addr - mapping.range.begin()))
    }
}


#[cfg(test)]
mod tests {
    use super::*;


    #[test]
    fn interval_intersection() {
        let interval = TimeInterval::new(10, 20);
        assert!(interval.contains(10));
        assert!(interval.contains(20));
        assert!(!interval.contains(21));
        assert!(interval.intersects(&TimeInterval::new(20, 30)));
        assert!(!interval.intersects(&TimeInterval::new(21, 30)));
    }

    #[test]
    #[should_panic = "invalid time interval"]
    fn interval_inverted_bounds() {
        let _interval = TimeInterval::new(2, 1);
    }

    /// Check that lookups honor both the address range and the time
    /// interval of mappings.
    #[test]
    fn lookup_by_address_and_time() {
        let mut spaces = AddressSpaces::new();
        let thread = ThreadId::new("node0", 4242, 1);

        // The same path mapped at the same place, but a different build
        // at a later time.
        let old = spaces.load_object(
            FileName::from_parts("/usr/lib/libplugin.so", 111),
            TimeInterval::new(0, 49),
        );
        let new = spaces.load_object(
            FileName::from_parts("/usr/lib/libplugin.so", 222),
            TimeInterval::new(50, 100),
        );
        spaces.map(
            thread.clone(),
            &old,
            AddressRange::new(0x7f00_0000, 0x7f00_ffff),
            TimeInterval::new(0, 49),
        );
        spaces.map(
            thread.clone(),
            &new,
            AddressRange::new(0x7f00_0000, 0x7f00_ffff),
            TimeInterval::new(50, 100),
        );

        let (mapping, relative) = spaces.lookup(&thread, 0x7f00_0010, 25).unwrap();
        assert_eq!(mapping.object().file().checksum(), 111);
        assert_eq!(relative, 0x10);

        let (mapping, _relative) = spaces.lookup(&thread, 0x7f00_0010, 75).unwrap();
        assert_eq!(mapping.object().file().checksum(), 222);

        assert!(spaces.lookup(&thread, 0x7f00_0010, 101).is_none());
        assert!(spaces.lookup(&thread, 0x7eff_ffff, 25).is_none());
        let other = ThreadId::new("node0", 4242, 2);
        assert!(spaces.lookup(&other, 0x7f00_0010, 25).is_none());
    }
}
