use std::collections::BTreeSet;

use crate::range::AddressRange;
use crate::table::EntityUid;
use crate::Addr;


/// An index over `(entity, address range)` associations, answering both
/// "all ranges of this entity" and "all entities overlapping this range"
/// queries.
///
/// Rows are kept in two cooperating orderings, by entity and by range
/// begin, so either query shape stays close to logarithmic in the row
/// count. Inserting the same row twice is idempotent. Distinct entities
/// may freely own overlapping ranges.
#[derive(Clone, Debug, Default)]
pub(crate) struct AddressRangeIndex {
    /// Rows ordered by entity, used to enumerate an entity's ranges.
    by_uid: BTreeSet<(EntityUid, AddressRange)>,
    /// Rows ordered by range begin, used to bound overlap queries.
    by_begin: BTreeSet<(Addr, Addr, EntityUid)>,
}

impl AddressRangeIndex {
    /// Associate the given range with the given entity.
    pub(crate) fn insert(&mut self, uid: EntityUid, range: AddressRange) {
        self.by_uid.insert((uid, range));
        self.by_begin.insert((range.begin(), range.end(), uid));
    }

    /// Drop every row of the given entity, e.g. before re-deriving its
    /// range set.
    pub(crate) fn remove(&mut self, uid: EntityUid) {
        let ranges = self.ranges(uid);
        for range in ranges {
            self.by_uid.remove(&(uid, range));
            self.by_begin.remove(&(range.begin(), range.end(), uid));
        }
    }

    /// All ranges associated with the given entity, in order. Empty when
    /// the entity has none.
    pub(crate) fn ranges(&self, uid: EntityUid) -> BTreeSet<AddressRange> {
        let low = (uid, AddressRange::new(0, 0));
        let high = (uid, AddressRange::new(Addr::MAX, Addr::MAX));
        self.by_uid
            .range(low..=high)
            .map(|&(_uid, range)| range)
            .collect()
    }

    /// All entities owning at least one range that overlaps `query`,
    /// deduplicated, in order of their first overlapping range.
    ///
    /// Only rows whose begin is at most `query.end()` can overlap, so
    /// the begin-ordered walk stops there; the remaining candidates are
    /// filtered by their end.
    pub(crate) fn overlapping(&self, query: AddressRange) -> Vec<EntityUid> {
        let mut seen = BTreeSet::new();
        let mut uids = Vec::new();

        let high = (query.end(), Addr::MAX, EntityUid::MAX);
        for &(_begin, end, uid) in self.by_begin.range(..=high) {
            if end >= query.begin() && seen.insert(uid) {
                uids.push(uid);
            }
        }
        uids
    }
}
