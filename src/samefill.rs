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

// Same-filled page detection. A page made of a single repeated machine
// word is stored as that word alone, with no pool object behind it.
// Words are native-endian: the value is a memory pattern, not a wire
// format.

use std::convert::TryInto;

pub const WORD_SIZE: usize = std::mem::size_of::<u64>();

/// Returns the repeated word iff every word in `page` equals it.
/// `page` length must be a non-zero multiple of the word size.
pub fn detect(page: &[u8]) -> Option<u64> {
	debug_assert!(!page.is_empty() && page.len() % WORD_SIZE == 0);
	let word = u64::from_ne_bytes(page[0..WORD_SIZE].try_into().unwrap());
	for chunk in page.chunks_exact(WORD_SIZE) {
		if u64::from_ne_bytes(chunk.try_into().unwrap()) != word {
			return None;
		}
	}
	Some(word)
}

/// Fills `dst` with copies of `word`. `dst` length must be a multiple of
/// the word size.
pub fn fill(dst: &mut [u8], word: u64) {
	debug_assert!(dst.len() % WORD_SIZE == 0);
	if word == 0 {
		for byte in dst.iter_mut() {
			*byte = 0;
		}
	} else {
		let bytes = word.to_ne_bytes();
		for chunk in dst.chunks_exact_mut(WORD_SIZE) {
			chunk.copy_from_slice(&bytes);
		}
	}
}

#[cfg(test)]
mod test {
	use super::{detect, fill, WORD_SIZE};

	#[test]
	fn detects_repeated_word() {
		let mut page = vec![0u8; 4096];
		assert_eq!(detect(&page), Some(0));

		fill(&mut page, 0x4242_4242_4242_4242);
		assert_eq!(detect(&page), Some(0x4242_4242_4242_4242));
		assert!(page.iter().all(|b| *b == 0x42));
	}

	#[test]
	fn rejects_one_byte_difference() {
		let mut page = vec![0x11u8; 4096];
		page[4095] = 0x12;
		assert_eq!(detect(&page), None);
	}

	#[test]
	fn rejects_mismatch_in_first_word() {
		let mut page = vec![0u8; 4096];
		page[0..WORD_SIZE].copy_from_slice(&1u64.to_ne_bytes());
		assert_eq!(detect(&page), None);
	}

	#[test]
	fn fill_round_trips() {
		let mut page = vec![0u8; 256];
		fill(&mut page, 0x0102_0304_0506_0708);
		assert_eq!(detect(&page), Some(0x0102_0304_0506_0708));
		fill(&mut page, 0);
		assert!(page.iter().all(|b| *b == 0));
	}
}
