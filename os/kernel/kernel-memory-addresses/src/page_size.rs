use core::fmt;
use core::hash::Hash;

mod sealed {
    pub trait Sealed {}
}

/// Page sizes of i386 two-level paging. Sealed: there are exactly two.
pub trait PageSize:
    sealed::Sealed + Clone + Copy + Eq + PartialEq + Ord + PartialOrd + Hash + fmt::Display + fmt::Debug
{
    /// Page size in bytes (power of two).
    const SIZE: u32;
    /// log2(SIZE): the number of in-page offset bits.
    const SHIFT: u32;

    fn as_str() -> &'static str;
}

macro_rules! page_size {
    ($(#[$doc:meta])* $name:ident, $shift:expr, $label:literal) => {
        $(#[$doc])*
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name;

        impl sealed::Sealed for $name {}

        impl PageSize for $name {
            const SIZE: u32 = 1 << $shift;
            const SHIFT: u32 = $shift;

            fn as_str() -> &'static str {
                $label
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str($label)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str($label)
            }
        }
    };
}

page_size!(
    /// 4 KiB page, mapped by a page-table entry; the unit of physical
    /// memory accounting.
    Size4K, 12, "4K"
);

page_size!(
    /// 4 MiB page: the span of one page-directory entry, or a directory
    /// leaf with the page-size bit set.
    Size4M, 22, "4M"
);

const _: () = {
    assert!(Size4K::SIZE == 4096);
    assert!(Size4M::SIZE == 1024 * Size4K::SIZE);
};
