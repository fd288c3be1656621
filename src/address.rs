use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

/// Represent address in a running program.
/// Relocated address is an address in the target virtual address space.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct RelocatedAddress(u64);

impl RelocatedAddress {
    pub fn offset(self, offset: i64) -> RelocatedAddress {
        if offset >= 0 {
            self.0 + offset as u64
        } else {
            self.0 - offset.unsigned_abs()
        }
        .into()
    }

    pub fn as_u64(self) -> u64 {
        u64::from(self)
    }

    pub fn as_usize(self) -> usize {
        usize::from(self)
    }
}

impl From<usize> for RelocatedAddress {
    fn from(addr: usize) -> Self {
        RelocatedAddress(addr as u64)
    }
}

impl From<u64> for RelocatedAddress {
    fn from(addr: u64) -> Self {
        RelocatedAddress(addr)
    }
}

impl From<RelocatedAddress> for usize {
    fn from(addr: RelocatedAddress) -> Self {
        addr.0 as usize
    }
}

impl From<RelocatedAddress> for u64 {
    fn from(addr: RelocatedAddress) -> Self {
        addr.0
    }
}

impl Display for RelocatedAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format!("{:#016X}", self.0))
    }
}

/// Half-open address interval `[start, end)`.
#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug)]
pub struct AddressRange {
    pub start: RelocatedAddress,
    pub end: RelocatedAddress,
}

impl AddressRange {
    pub fn new(start: impl Into<RelocatedAddress>, end: impl Into<RelocatedAddress>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn len(&self) -> u64 {
        self.end.as_u64().saturating_sub(self.start.as_u64())
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, addr: RelocatedAddress) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Extend the range forward until it spans at least `floor` bytes.
    /// Backends answer wider ranges from cache more often than narrow ones.
    pub fn widen_to(self, floor: u64) -> AddressRange {
        if self.len() >= floor {
            return self;
        }
        AddressRange {
            start: self.start,
            end: self.start.offset(floor as i64),
        }
    }

    /// Stable identity of this range, used to remember failed fetches.
    pub fn stable_hash(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.start.hash(&mut hasher);
        self.end.hash(&mut hasher);
        hasher.finish()
    }
}

impl Display for AddressRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_address_offset() {
        let addr = RelocatedAddress::from(0x1000_usize);
        assert_eq!(addr.offset(0x20), RelocatedAddress::from(0x1020_usize));
        assert_eq!(addr.offset(-0x10), RelocatedAddress::from(0xFF0_usize));
    }

    #[test]
    fn test_range_contains() {
        let range = AddressRange::new(0x1000_u64, 0x1020_u64);
        assert!(range.contains(0x1000_u64.into()));
        assert!(range.contains(0x101F_u64.into()));
        assert!(!range.contains(0x1020_u64.into()));
        assert!(!range.contains(0xFFF_u64.into()));
    }

    #[test]
    fn test_range_widen() {
        let range = AddressRange::new(0x1000_u64, 0x1008_u64);
        let widened = range.widen_to(0x40);
        assert_eq!(widened, AddressRange::new(0x1000_u64, 0x1040_u64));
        assert_eq!(widened.widen_to(0x10), widened);
    }

    #[test]
    fn test_range_hash_is_stable() {
        let r1 = AddressRange::new(0x2000_u64, 0x2040_u64);
        let r2 = AddressRange::new(0x2000_u64, 0x2040_u64);
        assert_eq!(r1.stable_hash(), r2.stable_hash());
        assert_ne!(
            r1.stable_hash(),
            AddressRange::new(0x2000_u64, 0x2041_u64).stable_hash()
        );
    }
}
