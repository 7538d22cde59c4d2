//! B+ tree node layout constants.
//!
//! Every node ends with a 13-byte trailer, read from the end of the page:
//!
//! ```text
//! +------------------------+ 0
//! | Entry payload          |  <- grows forward
//! +------------------------+
//! |      Free Space        |
//! +------------------------+
//! | Slot Directory         |  <- grows backward
//! | [offset:2, len:2] * n  |
//! +------------------------+ PAGE_SIZE - 13
//! | count: i32             |
//! | next_page: i32         |
//! | free_space: i32        |
//! | type: u8               |
//! +------------------------+ PAGE_SIZE
//! ```

use kestrel_common::page::PAGE_SIZE;

/// Maximum key size in bytes, in the wire encoding.
pub const MAX_KEY_SIZE: usize = 1000;

/// Size of the node trailer.
pub(crate) const NODE_TRAILER_SIZE: usize = 13;

/// Bytes available for entries and directory slots.
pub(crate) const NODE_CAPACITY: usize = PAGE_SIZE - NODE_TRAILER_SIZE;

pub(crate) const TYPE_OFFSET: usize = PAGE_SIZE - 1;
pub(crate) const FREE_SPACE_OFFSET: usize = PAGE_SIZE - 5;
pub(crate) const NEXT_PAGE_OFFSET: usize = PAGE_SIZE - 9;
pub(crate) const COUNT_OFFSET: usize = PAGE_SIZE - 13;

/// Size of the child pointer carried by intermediate entries.
pub(crate) const CHILD_POINTER_SIZE: usize = 4;

/// Sentinel for "no page" in the trailer and the root pointer.
pub(crate) const NO_PAGE: i32 = -1;
