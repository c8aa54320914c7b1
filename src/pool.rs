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

// Variable-size object pool capability. The I/O engine stores every
// compressed payload as one pool object and never shares an object
// across slots.

use std::num::NonZeroU64;
use parking_lot::Mutex;

const ALLOC_ALIGN: usize = 8;

/// Opaque reference to a live pool object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(NonZeroU64);

impl Handle {
	pub fn raw(self) -> u64 {
		self.0.get()
	}
}

/// The object pool consumed by the I/O engine.
///
/// `map_read`/`map_write` bracket scoped access to an object's bytes; the
/// callback must not re-enter the pool. `allocate` with `may_sleep ==
/// false` must never block; with `may_sleep == true` it may wait
/// arbitrarily long for memory. `free` is only defined for live handles.
pub trait Pool: Send + Sync {
	fn allocate(&self, size: usize, may_sleep: bool) -> Option<Handle>;
	fn map_read(&self, handle: Handle, f: &mut dyn FnMut(&[u8]));
	fn map_write(&self, handle: Handle, f: &mut dyn FnMut(&mut [u8]));
	fn free(&self, handle: Handle);
	/// Pages currently backing the store.
	fn total_pages(&self) -> usize;
	/// Reclaims fragmented pages. Returns the number of pages freed.
	fn compact(&self) -> usize;
	/// Live object count.
	fn outstanding(&self) -> usize;
	/// Payloads at or above this size gain nothing from pooling and are
	/// stored as raw pages by the caller.
	fn max_object_size(&self) -> usize;
}

/// Default in-memory pool: a slab of boxed buffers with a free-list.
/// Page accounting packs successive objects into pages through an
/// open-page byte reservoir; freed bytes stay fragmented until
/// `compact` recomputes the backing from live bytes.
pub struct SlabPool {
	page_size: usize,
	inner: Mutex<SlabInner>,
}

struct SlabInner {
	objects: Vec<Option<Box<[u8]>>>,
	free: Vec<usize>,
	live_objects: usize,
	live_bytes: usize,
	pages: usize,
	open_room: usize,
}

impl SlabPool {
	pub fn new(page_size: usize) -> SlabPool {
		SlabPool {
			page_size,
			inner: Mutex::new(SlabInner {
				objects: Vec::new(),
				free: Vec::new(),
				live_objects: 0,
				live_bytes: 0,
				pages: 0,
				open_room: 0,
			}),
		}
	}

	fn handle_for(index: usize) -> Handle {
		Handle(NonZeroU64::new(index as u64 + 1).unwrap())
	}

	fn index_of(handle: Handle) -> usize {
		handle.raw() as usize - 1
	}
}

fn aligned(size: usize) -> usize {
	(size + ALLOC_ALIGN - 1) & !(ALLOC_ALIGN - 1)
}

impl Pool for SlabPool {
	// Backed by the process allocator, so the opportunistic path never
	// fails here; `may_sleep` only matters for pools that can wait on
	// reclaim.
	fn allocate(&self, size: usize, _may_sleep: bool) -> Option<Handle> {
		debug_assert!(size > 0);
		let mut inner = self.inner.lock();
		let needed = aligned(size);
		if needed > inner.open_room {
			let grow = (needed - inner.open_room + self.page_size - 1) / self.page_size;
			inner.pages += grow;
			inner.open_room += grow * self.page_size;
		}
		inner.open_room -= needed;
		inner.live_bytes += needed;
		inner.live_objects += 1;
		let object = vec![0u8; size].into_boxed_slice();
		let index = match inner.free.pop() {
			Some(index) => {
				inner.objects[index] = Some(object);
				index
			}
			None => {
				inner.objects.push(Some(object));
				inner.objects.len() - 1
			}
		};
		Some(Self::handle_for(index))
	}

	fn map_read(&self, handle: Handle, f: &mut dyn FnMut(&[u8])) {
		let inner = self.inner.lock();
		let object = inner.objects[Self::index_of(handle)]
			.as_ref()
			.expect("mapped a freed handle");
		f(object);
	}

	fn map_write(&self, handle: Handle, f: &mut dyn FnMut(&mut [u8])) {
		let mut inner = self.inner.lock();
		let index = Self::index_of(handle);
		let object = inner.objects[index].as_mut().expect("mapped a freed handle");
		f(object);
	}

	fn free(&self, handle: Handle) {
		let mut inner = self.inner.lock();
		let index = Self::index_of(handle);
		let object = inner.objects[index].take().expect("double free");
		inner.live_bytes -= aligned(object.len());
		inner.live_objects -= 1;
		inner.free.push(index);
	}

	fn total_pages(&self) -> usize {
		self.inner.lock().pages
	}

	fn compact(&self) -> usize {
		let mut inner = self.inner.lock();
		let packed = (inner.live_bytes + self.page_size - 1) / self.page_size;
		let freed = inner.pages - packed;
		inner.pages = packed;
		inner.open_room = packed * self.page_size - inner.live_bytes;
		if freed > 0 {
			log::debug!(target: "cramdisk", "Pool compaction freed {} pages", freed);
		}
		freed
	}

	fn outstanding(&self) -> usize {
		self.inner.lock().live_objects
	}

	fn max_object_size(&self) -> usize {
		self.page_size - self.page_size / 4
	}
}

#[cfg(test)]
mod test {
	use super::{Pool, SlabPool};

	#[test]
	fn packs_small_objects_into_one_page() {
		let pool = SlabPool::new(4096);
		let a = pool.allocate(100, false).unwrap();
		let b = pool.allocate(200, false).unwrap();
		assert_ne!(a, b);
		assert_eq!(pool.total_pages(), 1);
		assert_eq!(pool.outstanding(), 2);
	}

	#[test]
	fn full_page_object_opens_new_pages() {
		let pool = SlabPool::new(4096);
		pool.allocate(100, false).unwrap();
		pool.allocate(4096, false).unwrap();
		assert_eq!(pool.total_pages(), 2);
	}

	#[test]
	fn map_round_trip() {
		let pool = SlabPool::new(4096);
		let handle = pool.allocate(32, false).unwrap();
		pool.map_write(handle, &mut |buf| {
			for (i, byte) in buf.iter_mut().enumerate() {
				*byte = i as u8;
			}
		});
		let mut copied = Vec::new();
		pool.map_read(handle, &mut |buf| copied.extend_from_slice(buf));
		assert_eq!(copied, (0..32).map(|i| i as u8).collect::<Vec<_>>());
	}

	#[test]
	fn free_and_compact_reclaim() {
		let pool = SlabPool::new(4096);
		let handles: Vec<_> = (0..4).map(|_| pool.allocate(2048, false).unwrap()).collect();
		assert_eq!(pool.total_pages(), 2);
		for handle in handles {
			pool.free(handle);
		}
		assert_eq!(pool.outstanding(), 0);
		// Fragmented pages linger until compaction.
		assert_eq!(pool.total_pages(), 2);
		assert_eq!(pool.compact(), 2);
		assert_eq!(pool.total_pages(), 0);
	}

	#[test]
	fn freed_index_is_reused() {
		let pool = SlabPool::new(4096);
		let a = pool.allocate(16, false).unwrap();
		pool.free(a);
		let b = pool.allocate(16, false).unwrap();
		assert_eq!(a, b);
	}

	#[test]
	fn max_object_size_below_page() {
		let pool = SlabPool::new(4096);
		assert!(pool.max_object_size() < 4096);
		assert!(pool.max_object_size() > 2048);
	}
}
