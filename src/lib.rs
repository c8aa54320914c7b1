// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of Parity.

// Parity is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Parity is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Parity.  If not, see <http://www.gnu.org/licenses/>.

// Compressed RAM-backed block device core.
//
// A virtual disk whose pages are stored in memory as per-page
// compressed objects. Pages consisting of a single repeated machine
// word are stored as that word alone. Payloads live in a variable-size
// object pool behind the `Pool` capability; every stored page is
// tracked by a per-slot locked table that carries the device's
// consistency invariants.

mod compress;
mod device;
mod display;
mod error;
mod io;
mod options;
mod pool;
mod samefill;
mod stats;
mod table;

pub use crate::compress::{has_algorithm, Algorithm};
pub use crate::device::{Disk, PoolFactory};
pub use crate::error::{Error, Result};
pub use crate::io::{Request, Segment, SegmentMut};
pub use crate::options::{parse_size, Options};
pub use crate::pool::{Handle, Pool, SlabPool};
pub use crate::stats::{DebugStat, IoStat, MmStat, Stats};

/// Storage and compression unit. Slots, scratch buffers and the
/// same-fill detector all work on pages of this size.
pub const PAGE_SIZE: usize = 4096;
