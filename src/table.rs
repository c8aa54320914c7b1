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

// Slot table. One entry per page index of the virtual disk.
//
// Empty slot:
// Never written, or freed. Reads as a page of zeros.
//
// Same-filled slot:
// [WORD: 8]
// WORD - the machine word the page consists of. No pool object exists.
//
// Stored slot:
// [HANDLE: 8][SIZE: 4]
// HANDLE - pool object holding the payload.
// SIZE - payload length, 1..=PAGE_SIZE. SIZE == PAGE_SIZE means the raw
// page bytes are stored verbatim and reads bypass the decompressor.
//
// Exactly one of the three states holds for an unlocked slot. All state
// access goes through the per-slot lock; operations on distinct indexes
// run in parallel.

use parking_lot::{Mutex, MutexGuard};
use crate::pool::Handle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
	Empty,
	Same(u64),
	Stored { handle: Handle, size: u32 },
}

impl Slot {
	pub fn is_empty(&self) -> bool {
		matches!(self, Slot::Empty)
	}

	/// Replaces the entry, returning the previous state for the caller to
	/// release. Must be called with the slot lock held (enforced by the
	/// guard being the only mutable access path).
	pub fn take(&mut self) -> Slot {
		std::mem::replace(self, Slot::Empty)
	}
}

pub struct SlotTable {
	slots: Vec<Mutex<Slot>>,
}

impl SlotTable {
	pub fn new(num_pages: usize) -> SlotTable {
		let mut slots = Vec::with_capacity(num_pages);
		slots.resize_with(num_pages, || Mutex::new(Slot::Empty));
		log::debug!(target: "cramdisk", "Created slot table with {} entries", num_pages);
		SlotTable { slots }
	}

	pub fn len(&self) -> usize {
		self.slots.len()
	}

	pub fn lock(&self, index: usize) -> MutexGuard<Slot> {
		self.slots[index].lock()
	}
}

#[cfg(test)]
mod test {
	use super::{Slot, SlotTable};
	use std::sync::Arc;

	#[test]
	fn starts_empty() {
		let table = SlotTable::new(4);
		assert_eq!(table.len(), 4);
		for i in 0..4 {
			assert!(table.lock(i).is_empty());
		}
	}

	#[test]
	fn take_leaves_empty() {
		let table = SlotTable::new(1);
		let mut slot = table.lock(0);
		*slot = Slot::Same(7);
		assert_eq!(slot.take(), Slot::Same(7));
		assert!(slot.is_empty());
	}

	#[test]
	fn distinct_slots_lock_independently() {
		let table = SlotTable::new(2);
		let _a = table.lock(0);
		// Locking another index while holding the first must not block.
		let _b = table.lock(1);
	}

	#[test]
	fn same_slot_serializes() {
		let table = Arc::new(SlotTable::new(1));
		let threads: Vec<_> = (0..4)
			.map(|_| {
				let table = table.clone();
				std::thread::spawn(move || {
					for _ in 0..1000 {
						let mut slot = table.lock(0);
						let next = match *slot {
							Slot::Empty => Slot::Same(1),
							Slot::Same(w) => Slot::Same(w + 1),
							Slot::Stored { .. } => unreachable!(),
						};
						*slot = next;
					}
				})
			})
			.collect();
		for t in threads {
			t.join().unwrap();
		}
		assert_eq!(*table.lock(0), Slot::Same(4000));
	}
}
