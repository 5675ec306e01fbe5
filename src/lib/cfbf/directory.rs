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

use std::char::{decode_utf16, REPLACEMENT_CHARACTER};
use std::collections::HashSet;

use super::error::Error;
use super::structures::{le_u16, le_u32, le_u64, DIRECTORY_ENTRY_SIZE, MAXREGSECT};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum EntryKind {
	/// The root storage. Owns the ministream.
	Root,
	/// A folder-like grouping node.
	Storage,
	/// A leaf data blob.
	Stream,
}

/// One node of the rebuilt directory hierarchy.
///
/// The on-disk sibling/child indices are resolved while the container is
/// opened; afterwards the tree owns its children outright and is never
/// mutated again.
pub struct Entry {
	pub name: String,
	pub kind: EntryKind,
	/// First sector of the stream content (first mini-sector for streams
	/// below the cutoff; for the root, first sector of the ministream).
	pub start_sector: u32,
	pub size: u64,
	pub children: Vec<Entry>,
}

/// The directory hierarchy of one container, rooted at its single Root entry.
pub struct DirectoryTree {
	root: Entry,
	entry_count: usize,
}

/// A directory record as decoded from its 128-byte slot, before the
/// sibling/child indices have been resolved.
struct RawEntry {
	name: String,
	kind: EntryKind,
	left_sibling_id: u32,
	right_sibling_id: u32,
	child_id: u32,
	starting_sector_location: u32,
	stream_size: u64,
}

impl DirectoryTree {
	/// Decodes the directory stream into the entry hierarchy.
	///
	/// `mask_high_size` strips the upper half of the 8-byte size field;
	/// 512-byte-sector writers routinely leave junk there.
	pub fn parse(directory: &[u8], mask_high_size: bool) -> Result<DirectoryTree, Error> {
		let mut slots = Vec::with_capacity(directory.len() / DIRECTORY_ENTRY_SIZE);
		for (index, record) in directory.chunks_exact(DIRECTORY_ENTRY_SIZE).enumerate() {
			slots.push(decode_record(record, index, mask_high_size)?);
		}

		let mut root_index = None;
		for (index, slot) in slots.iter().enumerate() {
			if let Some(raw) = slot {
				if raw.kind == EntryKind::Root {
					if root_index.is_some() {
						return Err(Error::MalformedDirectory(format!("second root entry at index {}", index)));
					}
					root_index = Some(index);
				}
			}
		}
		let root_index = match root_index {
			Some(index) => index,
			None => return Err(Error::MalformedDirectory("no root entry".to_owned())),
		};

		let entry_count = slots.iter().filter(|slot| slot.is_some()).count();
		let mut visited = HashSet::new();
		visited.insert(root_index);
		let root = build_entry(&slots, root_index, &mut visited)?;
		Ok(DirectoryTree { root, entry_count })
	}

	pub fn root(&self) -> &Entry {
		&self.root
	}

	pub fn entry_count(&self) -> usize {
		self.entry_count
	}

	/// Resolves a `/`-joined path (relative to the root, which is not named
	/// in it) to an entry. Matching is case-sensitive; when several siblings
	/// share a name, the first one in directory order wins. An empty path
	/// resolves to the root itself.
	pub fn resolve(&self, path: &str) -> Option<&Entry> {
		let mut current = &self.root;
		for segment in path.split('/').filter(|segment| !segment.is_empty()) {
			current = current.children.iter().find(|child| child.name == segment)?;
		}
		Some(current)
	}

	/// Enumerates the tree depth-first and returns the `/`-joined paths of
	/// all streams, and of all storages when `include_storages` is set.
	/// Storage paths carry a trailing `/`. The root itself is not listed.
	pub fn list_paths(&self, include_storages: bool) -> Vec<String> {
		let mut paths = Vec::new();
		list_recursive(&self.root, "", include_storages, &mut paths);
		paths
	}
}

fn list_recursive(entry: &Entry, prefix: &str, include_storages: bool, paths: &mut Vec<String>) {
	for child in &entry.children {
		let path = if prefix.is_empty() {
			child.name.clone()
		}
		else {
			format!("{}/{}", prefix, child.name)
		};
		match child.kind {
			EntryKind::Stream => paths.push(path),
			_ => {
				if include_storages {
					paths.push(format!("{}/", path));
				}
				list_recursive(child, &path, include_storages, paths);
			}
		}
	}
}

fn decode_record(record: &[u8], index: usize, mask_high_size: bool) -> Result<Option<RawEntry>, Error> {
	let kind = match record[66] {
		0 => return Ok(None), // unallocated
		1 => EntryKind::Storage,
		2 => EntryKind::Stream,
		5 => EntryKind::Root,
		other => return Err(Error::MalformedDirectory(format!("entry {} has unknown type {}", index, other))),
	};
	// byte 67 is the red/black color flag; only relevant for on-disk balance

	let name_length = le_u16(record, 64);
	if name_length < 2 || name_length > 64 || name_length % 2 != 0 {
		return Err(Error::MalformedDirectory(format!("entry {} has name length {}", index, name_length)));
	}
	// The length is expressed in bytes, but the name is UTF-16; it also
	// counts the trailing NUL.
	let name = decode_utf16((0..(name_length / 2 - 1) as usize).map(|i| le_u16(record, i * 2)))
		.map(|r| r.unwrap_or(REPLACEMENT_CHARACTER))
		.collect::<String>();

	let left_sibling_id = le_u32(record, 68);
	let right_sibling_id = le_u32(record, 72);
	let child_id = le_u32(record, 76);
	// skip CLSID (16 bytes) and state bits (4 bytes)
	let starting_sector_location = le_u32(record, 116);
	let mut stream_size = le_u64(record, 120);
	if mask_high_size {
		stream_size &= 0xFFFF_FFFF;
	}

	Ok(Some(RawEntry {
		name,
		kind,
		left_sibling_id,
		right_sibling_id,
		child_id,
		starting_sector_location,
		stream_size,
	}))
}

fn slot_index(slots: &[Option<RawEntry>], id: u32, visited: &mut HashSet<usize>) -> Result<usize, Error> {
	let index = id as usize;
	if index >= slots.len() {
		return Err(Error::MalformedDirectory(format!("entry index {} out of bounds ({} entries)", id, slots.len())));
	}
	if slots[index].is_none() {
		return Err(Error::MalformedDirectory(format!("entry index {} references an unallocated entry", id)));
	}
	if !visited.insert(index) {
		return Err(Error::MalformedDirectory(format!("entry {} referenced more than once", id)));
	}
	Ok(index)
}

/// In-order walk of one sibling binary tree, yielding the entry indices of a
/// single storage's children. Ids above MAXREGSECT mean "no node here".
fn collect_children(slots: &[Option<RawEntry>], first: u32, visited: &mut HashSet<usize>) -> Result<Vec<usize>, Error> {
	let mut children = Vec::new();
	let mut stack = Vec::new();
	let mut current = first;
	loop {
		while current <= MAXREGSECT {
			let index = slot_index(slots, current, visited)?;
			stack.push(index);
			current = slots[index].as_ref().unwrap().left_sibling_id;
		}
		match stack.pop() {
			Some(index) => {
				children.push(index);
				current = slots[index].as_ref().unwrap().right_sibling_id;
			}
			None => break,
		}
	}
	// Keep children in directory order so that name collisions resolve to
	// the first entry on disk.
	children.sort_unstable();
	Ok(children)
}

fn build_entry(slots: &[Option<RawEntry>], index: usize, visited: &mut HashSet<usize>) -> Result<Entry, Error> {
	let (name, kind, start_sector, size, child_id) = {
		let raw = slots[index].as_ref().unwrap();
		(raw.name.clone(), raw.kind, raw.starting_sector_location, raw.stream_size, raw.child_id)
	};
	let mut children = Vec::new();
	for child_index in collect_children(slots, child_id, visited)? {
		children.push(build_entry(slots, child_index, visited)?);
	}
	Ok(Entry { name, kind, start_sector, size, children })
}

#[cfg(test)]
mod tests {
	use super::*;
	use super::super::structures::NOSTREAM;

	fn record(name: &str, kind: u8, left: u32, right: u32, child: u32, start: u32, size: u64) -> Vec<u8> {
		let mut buffer = vec![0u8; DIRECTORY_ENTRY_SIZE];
		let units: Vec<u16> = name.encode_utf16().collect();
		assert!(units.len() <= 31);
		for (i, unit) in units.iter().enumerate() {
			buffer[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
		}
		buffer[64..66].copy_from_slice(&(((units.len() + 1) * 2) as u16).to_le_bytes());
		buffer[66] = kind;
		buffer[67] = 1; // black
		buffer[68..72].copy_from_slice(&left.to_le_bytes());
		buffer[72..76].copy_from_slice(&right.to_le_bytes());
		buffer[76..80].copy_from_slice(&child.to_le_bytes());
		buffer[116..120].copy_from_slice(&start.to_le_bytes());
		buffer[120..128].copy_from_slice(&size.to_le_bytes());
		buffer
	}

	fn directory(records: Vec<Vec<u8>>) -> Vec<u8> {
		records.concat()
	}

	#[test]
	fn builds_nested_tree_and_lists_depth_first() {
		// root -> { Sub/ -> { Inner }, Top }
		let bytes = directory(vec![
			record("Root Entry", 5, NOSTREAM, NOSTREAM, 1, 0, 0),
			record("Sub", 1, NOSTREAM, 2, 3, 0, 0),
			record("Top", 2, NOSTREAM, NOSTREAM, NOSTREAM, 4, 100),
			record("Inner", 2, NOSTREAM, NOSTREAM, NOSTREAM, 9, 7),
		]);
		let tree = DirectoryTree::parse(&bytes, true).unwrap();
		assert_eq!(tree.entry_count(), 4);
		assert_eq!(tree.root().name, "Root Entry");
		assert_eq!(tree.root().children.len(), 2);

		assert_eq!(tree.list_paths(true), vec!["Sub/", "Sub/Inner", "Top"]);
		assert_eq!(tree.list_paths(false), vec!["Sub/Inner", "Top"]);

		let inner = tree.resolve("Sub/Inner").unwrap();
		assert_eq!(inner.kind, EntryKind::Stream);
		assert_eq!(inner.start_sector, 9);
		assert_eq!(inner.size, 7);
		assert!(tree.resolve("Sub/Missing").is_none());
		assert_eq!(tree.resolve("").unwrap().kind, EntryKind::Root);
	}

	#[test]
	fn skips_unallocated_slots() {
		let bytes = directory(vec![
			record("Root Entry", 5, NOSTREAM, NOSTREAM, 2, 0, 0),
			vec![0u8; DIRECTORY_ENTRY_SIZE],
			record("Data", 2, NOSTREAM, NOSTREAM, NOSTREAM, 0, 10),
		]);
		let tree = DirectoryTree::parse(&bytes, true).unwrap();
		assert_eq!(tree.entry_count(), 2);
		assert_eq!(tree.list_paths(true), vec!["Data"]);
	}

	#[test]
	fn requires_exactly_one_root() {
		let none = directory(vec![record("Data", 2, NOSTREAM, NOSTREAM, NOSTREAM, 0, 10)]);
		assert!(matches!(DirectoryTree::parse(&none, true), Err(Error::MalformedDirectory(_))));

		let two = directory(vec![
			record("Root Entry", 5, NOSTREAM, NOSTREAM, NOSTREAM, 0, 0),
			record("Root Entry", 5, NOSTREAM, NOSTREAM, NOSTREAM, 0, 0),
		]);
		assert!(matches!(DirectoryTree::parse(&two, true), Err(Error::MalformedDirectory(_))));
	}

	#[test]
	fn rejects_child_index_out_of_bounds() {
		let bytes = directory(vec![record("Root Entry", 5, NOSTREAM, NOSTREAM, 99, 0, 0)]);
		assert!(matches!(DirectoryTree::parse(&bytes, true), Err(Error::MalformedDirectory(_))));
	}

	#[test]
	fn rejects_reference_to_unallocated_entry() {
		let bytes = directory(vec![
			record("Root Entry", 5, NOSTREAM, NOSTREAM, 1, 0, 0),
			vec![0u8; DIRECTORY_ENTRY_SIZE],
		]);
		assert!(matches!(DirectoryTree::parse(&bytes, true), Err(Error::MalformedDirectory(_))));
	}

	#[test]
	fn rejects_sibling_cycle() {
		let bytes = directory(vec![
			record("Root Entry", 5, NOSTREAM, NOSTREAM, 1, 0, 0),
			record("A", 2, NOSTREAM, 2, NOSTREAM, 0, 0),
			record("B", 2, NOSTREAM, 1, NOSTREAM, 0, 0),
		]);
		assert!(matches!(DirectoryTree::parse(&bytes, true), Err(Error::MalformedDirectory(_))));
	}

	#[test]
	fn duplicate_names_resolve_to_first_in_directory_order() {
		let bytes = directory(vec![
			record("Root Entry", 5, NOSTREAM, NOSTREAM, 2, 0, 0),
			record("Dup", 2, NOSTREAM, NOSTREAM, NOSTREAM, 11, 1),
			record("Dup", 2, NOSTREAM, 1, NOSTREAM, 22, 2),
		]);
		let tree = DirectoryTree::parse(&bytes, true).unwrap();
		let first = tree.resolve("Dup").unwrap();
		assert_eq!(first.start_sector, 11);
	}

	#[test]
	fn masks_high_size_dword_for_small_sectors() {
		let bytes = directory(vec![
			record("Root Entry", 5, NOSTREAM, NOSTREAM, 1, 0, 0),
			record("Data", 2, NOSTREAM, NOSTREAM, NOSTREAM, 0, 0xDEAD_BEEF_0000_0040),
		]);
		let masked = DirectoryTree::parse(&bytes, true).unwrap();
		assert_eq!(masked.resolve("Data").unwrap().size, 0x40);
		let unmasked = DirectoryTree::parse(&bytes, false).unwrap();
		assert_eq!(unmasked.resolve("Data").unwrap().size, 0xDEAD_BEEF_0000_0040);
	}

	#[test]
	fn rejects_bad_name_length() {
		let mut bad = record("Data", 2, NOSTREAM, NOSTREAM, NOSTREAM, 0, 0);
		bad[64..66].copy_from_slice(&66u16.to_le_bytes());
		let bytes = directory(vec![record("Root Entry", 5, NOSTREAM, NOSTREAM, NOSTREAM, 0, 0), bad]);
		assert!(matches!(DirectoryTree::parse(&bytes, true), Err(Error::MalformedDirectory(_))));
	}
}
