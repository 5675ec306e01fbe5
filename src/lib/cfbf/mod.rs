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

mod directory;
mod error;
mod fat;
mod structures;

pub use self::error::Error;

use std::cmp::min;
use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom};

use log::{debug, trace};

use self::directory::{DirectoryTree, EntryKind};
use self::structures::{Header, ENDOFCHAIN, HEADER_SIZE, MAXREGSECT, SIGNATURE};

/// A read-only view of one CFBF container.
///
/// Opening parses the header, both allocation tables and the directory tree
/// eagerly; after that the container state is immutable and only the
/// underlying file is touched again, to materialize stream content on
/// request. Stream content is re-read on every request and never cached.
pub struct Container<TFile: Read + Seek> {
	sectors: SectorReader<TFile>,
	header: Header,
	fat: Vec<u32>,
	mini_fat: Vec<u32>,
	directory: DirectoryTree,
}

/// Random access to the fixed-size sectors of the underlying byte source.
struct SectorReader<TFile: Read + Seek> {
	file: TFile,
	sector_size: u64,
	sector_count: u64,
}

impl<TFile> SectorReader<TFile> where TFile: Read + Seek {
	/// Reads sector `id`. The result is shorter than the sector size only
	/// when the file itself ends inside the sector.
	fn read_sector(&mut self, id: u32) -> Result<Vec<u8>, Error> {
		if id as u64 >= self.sector_count {
			return Err(Error::OutOfRange { sector: id, count: self.sector_count });
		}
		self.file.seek(SeekFrom::Start((id as u64 + 1) * self.sector_size))?;
		let mut buffer = vec![0u8; self.sector_size as usize];
		let filled = read_up_to(&mut self.file, &mut buffer)?;
		buffer.truncate(filled);
		Ok(buffer)
	}
}

impl<TFile> Container<TFile> where TFile: Read + Seek {
	/// Opens a container. The 8-byte signature is verified before anything
	/// else is read; construction either yields a fully parsed container or
	/// fails without partial state.
	pub fn new(mut file: TFile) -> Result<Container<TFile>, Error> {
		file.seek(SeekFrom::Start(0))?;
		let mut signature = [0u8; 8];
		if read_up_to(&mut file, &mut signature)? < signature.len() || signature != SIGNATURE {
			return Err(Error::NotACompoundFile);
		}

		let file_length = file.seek(SeekFrom::End(0))?;
		file.seek(SeekFrom::Start(0))?;
		let mut header_buffer = [0u8; HEADER_SIZE];
		if read_up_to(&mut file, &mut header_buffer)? < HEADER_SIZE {
			return Err(Error::MalformedHeader("file ends inside the header".to_owned()));
		}
		let header = Header::parse(&header_buffer)?;
		debug!("container version {}.{}, {} byte sectors, {} byte mini-sectors, cutoff {}",
			header.major_version, header.minor_version, header.sector_size, header.mini_sector_size, header.mini_stream_cutoff_size);

		// Sector 0 starts right after the 512-byte header region; a trailing
		// partial sector is still addressable so that truncation is detected
		// where the missing bytes are actually requested.
		let sector_count = ((file_length + header.sector_size - 1) / header.sector_size).saturating_sub(1);
		let mut sectors = SectorReader { file, sector_size: header.sector_size, sector_count };

		let fat = load_fat(&mut sectors, &header)?;
		let mini_fat = load_mini_fat(&mut sectors, &header, &fat)?;
		let directory_bytes = read_directory(&mut sectors, &header, &fat)?;
		let directory = DirectoryTree::parse(&directory_bytes, header.sector_shift == 9)?;
		debug!("opened container: {} sectors, {} FAT entries, {} mini-FAT entries, {} directory entries",
			sector_count, fat.len(), mini_fat.len(), directory.entry_count());

		Ok(Container { sectors, header, fat, mini_fat, directory })
	}

	/// Lists the `/`-joined paths of all streams in the container,
	/// depth-first. With `include_storages`, storage paths are listed too,
	/// marked by a trailing `/`. The root entry itself is never listed.
	pub fn list_streams(&self, include_storages: bool) -> Vec<String> {
		self.directory.list_paths(include_storages)
	}

	/// Materializes the full content of the stream at `path` (as returned by
	/// `list_streams`; segment matching is case-sensitive, and the first
	/// entry in directory order wins when siblings share a name). Paths that
	/// are absent or name a storage yield `NotFound`; a failed read leaves
	/// the container usable for further calls.
	pub fn get_stream_bytes(&mut self, path: &str) -> Result<Vec<u8>, Error> {
		let (kind, start, size) = match self.directory.resolve(path) {
			Some(entry) => (entry.kind, entry.start_sector, entry.size),
			None => return Err(Error::NotFound(path.to_owned())),
		};
		if kind != EntryKind::Stream {
			return Err(Error::NotFound(path.to_owned()));
		}

		// Small streams live in the ministream and are chained through the
		// mini-FAT; everything else sits directly in regular sectors.
		if size < self.header.mini_stream_cutoff_size as u64 {
			trace!("reading stream '{}' ({} bytes, via mini-FAT)", path, size);
			self.read_mini_stream(start, size)
		}
		else {
			trace!("reading stream '{}' ({} bytes, via FAT)", path, size);
			self.read_normal_stream(start, size)
		}
	}

	fn read_normal_stream(&mut self, start: u32, size: u64) -> Result<Vec<u8>, Error> {
		if size == 0 {
			return Ok(Vec::new());
		}
		let chain = fat::walk_chain(start, &self.fat, self.sectors.sector_count)?;
		let mut data = Vec::with_capacity(min(size, chain.len() as u64 * self.sectors.sector_size) as usize);
		let mut remaining = size;
		for id in chain {
			if remaining == 0 {
				break;
			}
			let sector = self.sectors.read_sector(id)?;
			let take = min(sector.len() as u64, remaining) as usize;
			data.extend_from_slice(&sector[..take]);
			remaining -= take as u64;
		}
		if remaining > 0 {
			return Err(Error::TruncatedStream { declared: size, available: size - remaining });
		}
		Ok(data)
	}

	fn read_mini_stream(&mut self, start: u32, size: u64) -> Result<Vec<u8>, Error> {
		if size == 0 {
			return Ok(Vec::new());
		}
		// The ministream is an ordinary stream owned by the root entry. It is
		// always resolved through the regular FAT, so mini resolution cannot
		// recurse into itself.
		let (ministream_start, ministream_size) = {
			let root = self.directory.root();
			(root.start_sector, root.size)
		};
		let ministream = self.read_normal_stream(ministream_start, ministream_size)?;

		let chain = fat::walk_chain(start, &self.mini_fat, self.mini_fat.len() as u64)?;
		let mini_sector_size = self.header.mini_sector_size;
		let mut data = Vec::with_capacity(min(size, chain.len() as u64 * mini_sector_size) as usize);
		let mut remaining = size;
		for id in chain {
			if remaining == 0 {
				break;
			}
			let offset = id as u64 * mini_sector_size;
			if offset >= ministream.len() as u64 {
				break; // shortfall is reported below
			}
			let end = min(offset + mini_sector_size, ministream.len() as u64);
			let take = min(end - offset, remaining) as usize;
			data.extend_from_slice(&ministream[offset as usize..offset as usize + take]);
			remaining -= take as u64;
		}
		if remaining > 0 {
			return Err(Error::TruncatedStream { declared: size, available: size - remaining });
		}
		Ok(data)
	}
}

/// Assembles the regular FAT by visiting its sectors in DIFAT order: first
/// the 109 locations embedded in the header, then the DIFAT sector chain.
fn load_fat<TFile>(sectors: &mut SectorReader<TFile>, header: &Header) -> Result<Vec<u32>, Error> where TFile: Read + Seek {
	let mut fat_sector_ids: Vec<u32> = header.difat.iter().cloned().filter(|&id| id <= MAXREGSECT).collect();

	let mut current = header.first_difat_sector_location;
	let mut visited = HashSet::new();
	while current <= MAXREGSECT {
		if !visited.insert(current) {
			return Err(Error::CorruptChain(format!("cycle through DIFAT sector {}", current)));
		}
		if visited.len() as u64 > sectors.sector_count {
			return Err(Error::CorruptChain("DIFAT chain exceeds the sector count".to_owned()));
		}
		let sector = sectors.read_sector(current)?;
		if sector.len() < sectors.sector_size as usize {
			return Err(Error::MalformedHeader(format!("DIFAT sector {} is truncated", current)));
		}
		let entries = fat::parse_table_sector(&sector);
		// The last entry of a DIFAT sector links to the next DIFAT sector.
		for &id in &entries[..entries.len() - 1] {
			if id <= MAXREGSECT {
				fat_sector_ids.push(id);
			}
		}
		current = entries[entries.len() - 1];
	}

	if fat_sector_ids.len() != header.number_of_fat_sectors as usize {
		debug!("header declares {} FAT sectors, DIFAT lists {}", header.number_of_fat_sectors, fat_sector_ids.len());
	}

	let mut table = Vec::new();
	for id in fat_sector_ids {
		let sector = sectors.read_sector(id)?;
		if sector.len() < sectors.sector_size as usize {
			return Err(Error::MalformedHeader(format!("FAT sector {} is truncated", id)));
		}
		table.extend(fat::parse_table_sector(&sector));
	}
	Ok(table)
}

/// Assembles the mini-FAT by walking its sector chain through the regular FAT.
fn load_mini_fat<TFile>(sectors: &mut SectorReader<TFile>, header: &Header, fat_table: &[u32]) -> Result<Vec<u32>, Error> where TFile: Read + Seek {
	if header.first_mini_fat_sector_location > MAXREGSECT {
		return Ok(Vec::new());
	}
	let chain = fat::walk_chain(header.first_mini_fat_sector_location, fat_table, sectors.sector_count)?;
	if chain.len() != header.number_of_mini_fat_sectors as usize {
		debug!("header declares {} mini-FAT sectors, chain holds {}", header.number_of_mini_fat_sectors, chain.len());
	}
	let mut table = Vec::new();
	for id in chain {
		let sector = sectors.read_sector(id)?;
		if sector.len() < sectors.sector_size as usize {
			return Err(Error::MalformedHeader(format!("mini-FAT sector {} is truncated", id)));
		}
		table.extend(fat::parse_table_sector(&sector));
	}
	Ok(table)
}

/// Reads the raw directory stream, walked through the regular FAT.
fn read_directory<TFile>(sectors: &mut SectorReader<TFile>, header: &Header, fat_table: &[u32]) -> Result<Vec<u8>, Error> where TFile: Read + Seek {
	if header.first_directory_sector_location == ENDOFCHAIN {
		return Err(Error::MalformedDirectory("container has no directory stream".to_owned()));
	}
	let chain = fat::walk_chain(header.first_directory_sector_location, fat_table, sectors.sector_count)?;
	if header.number_of_directory_sectors != 0 && chain.len() != header.number_of_directory_sectors as usize {
		debug!("header declares {} directory sectors, chain holds {}", header.number_of_directory_sectors, chain.len());
	}
	let mut bytes = Vec::with_capacity(chain.len() * sectors.sector_size as usize);
	for id in chain {
		let sector = sectors.read_sector(id)?;
		if sector.len() < sectors.sector_size as usize {
			return Err(Error::MalformedDirectory(format!("directory sector {} is truncated", id)));
		}
		bytes.extend_from_slice(&sector);
	}
	Ok(bytes)
}

fn read_up_to<TFile>(file: &mut TFile, buffer: &mut [u8]) -> Result<usize, std::io::Error> where TFile: Read {
	let mut filled = 0;
	while filled < buffer.len() {
		let count = file.read(&mut buffer[filled..])?;
		if count == 0 {
			break;
		}
		filled += count;
	}
	Ok(filled)
}
