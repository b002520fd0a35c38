use crate::{MemoryAddress, PageSize};
use core::fmt;
use core::marker::PhantomData;

/// Byte offset inside a page of size `S`: the low 12 bits of an address for
/// [`Size4K`](crate::Size4K), the low 22 bits for [`Size4M`](crate::Size4M).
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MemoryAddressOffset<S: PageSize> {
    value: u32,
    _phantom: PhantomData<S>,
}

impl<S: PageSize> MemoryAddressOffset<S> {
    /// Wrap `value`, which must lie within one page; extra high bits are
    /// dropped in release builds.
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        debug_assert!(value < S::SIZE, "offset past the end of the page");
        Self::masked(value)
    }

    /// The in-page bits of `addr`.
    #[inline]
    #[must_use]
    pub const fn from_addr(addr: MemoryAddress) -> Self {
        Self::masked(addr.as_u32())
    }

    const fn masked(value: u32) -> Self {
        Self {
            value: value & (S::SIZE - 1),
            _phantom: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.value
    }
}

impl<S: PageSize> fmt::Debug for MemoryAddressOffset<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{:#x} in {}", self.value, S::as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Size4K, Size4M};

    #[test]
    fn offset_keeps_the_in_page_bits() {
        let addr = MemoryAddress::new(0xC123_4567);
        assert_eq!(MemoryAddressOffset::<Size4K>::from_addr(addr).as_u32(), 0x567);
        assert_eq!(MemoryAddressOffset::<Size4M>::from_addr(addr).as_u32(), 0x23_4567);
    }
}
