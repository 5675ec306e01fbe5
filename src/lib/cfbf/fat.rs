/*
olextract library & toolset
Copyright (C) 2018 Steve Muller <steve.muller@outlook.com>

This program is free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with this program.  If not, see <http://www.gnu.org/licenses/>.
*/

use std::collections::HashSet;

use super::error::Error;
use super::structures::{le_u32, DIFSECT, ENDOFCHAIN, FATSECT, FREESECT, MAXREGSECT};

/// Decodes a raw sector into allocation table entries.
pub fn parse_table_sector(sector: &[u8]) -> Vec<u32> {
	(0..sector.len() / 4).map(|i| le_u32(sector, i * 4)).collect()
}

/// Follows `table[current]` links from `start` until the end-of-chain
/// sentinel and returns the sector ids in chain order.
///
/// The same routine serves the regular FAT and the mini-FAT; only the table
/// differs. A chain that revisits a sector, references a free or reserved
/// entry, runs past the end of the table, or exceeds `bound` steps is
/// reported as `CorruptChain`. `ENDOFCHAIN` as the starting id yields an
/// empty chain.
pub fn walk_chain(start: u32, table: &[u32], bound: u64) -> Result<Vec<u32>, Error> {
	if start == ENDOFCHAIN {
		return Ok(Vec::new());
	}
	if start > MAXREGSECT {
		return Err(Error::CorruptChain(format!("chain starts at reserved sector {:#010X}", start)));
	}

	let mut chain = Vec::new();
	let mut visited = HashSet::new();
	let mut current = start;
	loop {
		if !visited.insert(current) {
			return Err(Error::CorruptChain(format!("cycle through sector {}", current)));
		}
		// A chain can never be longer than the table that encodes it; hitting
		// the bound means a cycle slipped past the check above.
		if chain.len() as u64 >= bound {
			return Err(Error::CorruptChain(format!("chain from sector {} exceeds {} sectors", start, bound)));
		}
		chain.push(current);

		let next = match table.get(current as usize) {
			Some(&next) => next,
			None => return Err(Error::CorruptChain(format!("sector {} has no allocation table entry", current))),
		};
		match next {
			ENDOFCHAIN => return Ok(chain),
			FREESECT => return Err(Error::CorruptChain(format!("sector {} links to a free sector", current))),
			FATSECT | DIFSECT => return Err(Error::CorruptChain(format!("sector {} links to reserved sector {:#010X}", current, next))),
			next if next > MAXREGSECT => return Err(Error::CorruptChain(format!("sector {} links to reserved sector {:#010X}", current, next))),
			next => current = next,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn walks_a_linear_chain() {
		let table = vec![2, ENDOFCHAIN, 4, FREESECT, 1];
		assert_eq!(walk_chain(0, &table, 16).unwrap(), vec![0, 2, 4, 1]);
	}

	#[test]
	fn end_of_chain_start_is_empty() {
		assert!(walk_chain(ENDOFCHAIN, &[], 16).unwrap().is_empty());
	}

	#[test]
	fn detects_self_reference() {
		let table = vec![0];
		assert!(matches!(walk_chain(0, &table, 16), Err(Error::CorruptChain(_))));
	}

	#[test]
	fn detects_longer_cycle() {
		let table = vec![1, 2, 0];
		assert!(matches!(walk_chain(0, &table, 16), Err(Error::CorruptChain(_))));
	}

	#[test]
	fn detects_link_to_free_sector() {
		let table = vec![1, FREESECT];
		assert!(matches!(walk_chain(0, &table, 16), Err(Error::CorruptChain(_))));
	}

	#[test]
	fn detects_dangling_reference() {
		let table = vec![7];
		assert!(matches!(walk_chain(0, &table, 16), Err(Error::CorruptChain(_))));
	}

	#[test]
	fn bound_stops_runaway_chains() {
		let table: Vec<u32> = (1..=8).chain(Some(ENDOFCHAIN)).collect();
		assert_eq!(walk_chain(0, &table, 16).unwrap().len(), 9);
		assert!(matches!(walk_chain(0, &table, 4), Err(Error::CorruptChain(_))));
	}

	#[test]
	fn free_start_is_rejected() {
		assert!(matches!(walk_chain(FREESECT, &[], 16), Err(Error::CorruptChain(_))));
	}

	#[test]
	fn parses_table_sector_little_endian() {
		let mut sector = vec![0u8; 8];
		sector[0..4].copy_from_slice(&3u32.to_le_bytes());
		sector[4..8].copy_from_slice(&ENDOFCHAIN.to_le_bytes());
		assert_eq!(parse_table_sector(&sector), vec![3, ENDOFCHAIN]);
	}
}
