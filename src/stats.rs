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

// Device counters. All updated with relaxed atomics outside the device
// lock; `max_used_pages` maintains a maximum with a compare-exchange loop.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Stats {
	pub num_reads: AtomicU64,
	pub num_writes: AtomicU64,
	pub failed_reads: AtomicU64,
	pub failed_writes: AtomicU64,
	pub invalid_io: AtomicU64,
	pub notify_free: AtomicU64,
	pub same_pages: AtomicU64,
	pub pages_stored: AtomicU64,
	pub compr_data_size: AtomicU64,
	pub max_used_pages: AtomicU64,
	pub writestall: AtomicU64,
	pub pages_compacted: AtomicU64,
}

impl Stats {
	pub fn update_max_used(&self, pages: u64) {
		let mut cur = self.max_used_pages.load(Ordering::Relaxed);
		while pages > cur {
			match self.max_used_pages.compare_exchange(cur, pages, Ordering::Relaxed, Ordering::Relaxed) {
				Ok(_) => break,
				Err(c) => cur = c,
			}
		}
	}

	// A write racing this store may reinstate its own total right after;
	// the maximum then includes any write that overlapped the reset.
	pub fn reset_max_used(&self, pages: u64) {
		self.max_used_pages.store(pages, Ordering::Relaxed);
	}

	pub fn zero(&self) {
		self.num_reads.store(0, Ordering::Relaxed);
		self.num_writes.store(0, Ordering::Relaxed);
		self.failed_reads.store(0, Ordering::Relaxed);
		self.failed_writes.store(0, Ordering::Relaxed);
		self.invalid_io.store(0, Ordering::Relaxed);
		self.notify_free.store(0, Ordering::Relaxed);
		self.same_pages.store(0, Ordering::Relaxed);
		self.pages_stored.store(0, Ordering::Relaxed);
		self.compr_data_size.store(0, Ordering::Relaxed);
		self.max_used_pages.store(0, Ordering::Relaxed);
		self.writestall.store(0, Ordering::Relaxed);
		self.pages_compacted.store(0, Ordering::Relaxed);
	}
}

/// I/O failure counters, in the order they are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoStat {
	pub failed_reads: u64,
	pub failed_writes: u64,
	pub invalid_io: u64,
	pub notify_free: u64,
}

/// Memory accounting snapshot. Byte fields are derived from page counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmStat {
	pub orig_data_size: u64,
	pub compr_data_size: u64,
	pub mem_used: u64,
	pub mem_limit: u64,
	pub mem_used_max: u64,
	pub same_pages: u64,
	pub pages_compacted: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugStat {
	pub version: u32,
	pub writestall: u64,
}

impl std::fmt::Display for IoStat {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(
			f,
			"{:8} {:8} {:8} {:8}",
			self.failed_reads, self.failed_writes, self.invalid_io, self.notify_free,
		)
	}
}

impl std::fmt::Display for MmStat {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(
			f,
			"{:8} {:8} {:8} {:8} {:8} {:8} {:8}",
			self.orig_data_size,
			self.compr_data_size,
			self.mem_used,
			self.mem_limit,
			self.mem_used_max,
			self.same_pages,
			self.pages_compacted,
		)
	}
}

impl std::fmt::Display for DebugStat {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "version: {}\n{:8}", self.version, self.writestall)
	}
}
