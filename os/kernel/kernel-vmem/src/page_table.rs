//! # Memory Page Table
//!
//! Two levels: a [`PageDirectory`](pd::PageDirectory) of 1024 entries, each
//! covering 4 MiB, pointing at [`PageTable`](pt::PageTable)s of 1024 entries,
//! each mapping one 4 KiB frame.
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! |  PD   |  PT   | Offset |
//! ```

pub mod pd;
pub mod pt;

use crate::page_table::pd::L2Index;
use crate::page_table::pt::L1Index;
use kernel_memory_addresses::VirtualAddress;

#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (L2Index, L1Index) {
    (L2Index::from(va), L1Index::from(va))
}
