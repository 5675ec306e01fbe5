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

// Also see: [MS-CFB]: Compound File Binary File Format specifications, https://msdn.microsoft.com/en-us/library/dd942138.aspx

use super::error::Error;

/// The 8-byte signature every CFBF file starts with.
pub const SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// The header occupies the first 512 bytes regardless of the sector size.
pub const HEADER_SIZE: usize = 512;

/// Number of DIFAT entries embedded in the header itself.
pub const DIFAT_IN_HEADER: usize = 109;

/// Size of one directory entry record.
pub const DIRECTORY_ENTRY_SIZE: usize = 128;

// Sentinel sector numbers. Everything above MAXREGSECT is reserved.
pub const MAXREGSECT: u32 = 0xFFFFFFFA;
pub const DIFSECT: u32 = 0xFFFFFFFC;
pub const FATSECT: u32 = 0xFFFFFFFD;
pub const ENDOFCHAIN: u32 = 0xFFFFFFFE;
pub const FREESECT: u32 = 0xFFFFFFFF;

/// Sentinel directory entry id for "no such sibling/child".
pub const NOSTREAM: u32 = 0xFFFFFFFF;

pub fn le_u16(buffer: &[u8], offset: usize) -> u16 {
	u16::from_le_bytes([buffer[offset], buffer[offset + 1]])
}

pub fn le_u32(buffer: &[u8], offset: usize) -> u32 {
	u32::from_le_bytes([buffer[offset], buffer[offset + 1], buffer[offset + 2], buffer[offset + 3]])
}

pub fn le_u64(buffer: &[u8], offset: usize) -> u64 {
	let mut bytes = [0u8; 8];
	bytes.copy_from_slice(&buffer[offset..offset + 8]);
	u64::from_le_bytes(bytes)
}

/// The header of a CFBF file, including the leading DIFAT entries.
pub struct Header {
	pub minor_version: u16,
	pub major_version: u16,
	pub byte_order: u16,
	pub sector_shift: u16,
	pub sector_size: u64, // virtual field; not actually contained in CFBF file
	pub mini_sector_shift: u16,
	pub mini_sector_size: u64, // virtual field; not actually contained in CFBF file
	pub number_of_directory_sectors: u32,
	pub number_of_fat_sectors: u32,
	pub first_directory_sector_location: u32,
	pub mini_stream_cutoff_size: u32,
	pub first_mini_fat_sector_location: u32,
	pub number_of_mini_fat_sectors: u32,
	pub first_difat_sector_location: u32,
	pub number_of_difat_sectors: u32,
	pub difat: [u32; DIFAT_IN_HEADER],
}

impl Header {
	/// Decodes and validates the 512-byte header.
	/// The caller has already verified the signature; `buffer` must hold at
	/// least `HEADER_SIZE` bytes.
	pub fn parse(buffer: &[u8]) -> Result<Header, Error> {
		// skip signature (8 bytes) and CLSID (16 bytes)
		let minor_version = le_u16(buffer, 24);
		let major_version = le_u16(buffer, 26);
		let byte_order = le_u16(buffer, 28);
		let sector_shift = le_u16(buffer, 30);
		let mini_sector_shift = le_u16(buffer, 32);
		// skip reserved (6 bytes)
		let number_of_directory_sectors = le_u32(buffer, 40);
		let number_of_fat_sectors = le_u32(buffer, 44);
		let first_directory_sector_location = le_u32(buffer, 48);
		// skip transaction signature number (4 bytes)
		let mini_stream_cutoff_size = le_u32(buffer, 56);
		let first_mini_fat_sector_location = le_u32(buffer, 60);
		let number_of_mini_fat_sectors = le_u32(buffer, 64);
		let first_difat_sector_location = le_u32(buffer, 68);
		let number_of_difat_sectors = le_u32(buffer, 72);

		let mut difat = [FREESECT; DIFAT_IN_HEADER];
		for i in 0..DIFAT_IN_HEADER {
			difat[i] = le_u32(buffer, 76 + i * 4);
		}

		if byte_order != 0xFFFE {
			return Err(Error::MalformedHeader(format!("unsupported byte order marker {:#06X}", byte_order)));
		}
		// Sector size must be a power of two between 128 and 8192 bytes.
		if sector_shift < 7 || sector_shift > 13 {
			return Err(Error::MalformedHeader(format!("sector shift {} outside supported range 7..=13", sector_shift)));
		}
		if mini_sector_shift < 2 || mini_sector_shift > sector_shift {
			return Err(Error::MalformedHeader(format!("mini-sector shift {} incompatible with sector shift {}", mini_sector_shift, sector_shift)));
		}
		let mini_sector_size = 1u64 << mini_sector_shift;
		if (mini_stream_cutoff_size as u64) < mini_sector_size {
			return Err(Error::MalformedHeader(format!("mini-stream cutoff {} smaller than a mini-sector", mini_stream_cutoff_size)));
		}

		Ok(Header {
			minor_version,
			major_version,
			byte_order,
			sector_shift,
			sector_size: 1 << sector_shift,
			mini_sector_shift,
			mini_sector_size,
			number_of_directory_sectors,
			number_of_fat_sectors,
			first_directory_sector_location,
			mini_stream_cutoff_size,
			first_mini_fat_sector_location,
			number_of_mini_fat_sectors,
			first_difat_sector_location,
			number_of_difat_sectors,
			difat,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn header_bytes() -> Vec<u8> {
		let mut buffer = vec![0u8; HEADER_SIZE];
		buffer[0..8].copy_from_slice(&SIGNATURE);
		buffer[24..26].copy_from_slice(&0x003Eu16.to_le_bytes()); // minor version
		buffer[26..28].copy_from_slice(&3u16.to_le_bytes()); // major version
		buffer[28..30].copy_from_slice(&0xFFFEu16.to_le_bytes()); // byte order
		buffer[30..32].copy_from_slice(&9u16.to_le_bytes()); // sector shift
		buffer[32..34].copy_from_slice(&6u16.to_le_bytes()); // mini-sector shift
		buffer[44..48].copy_from_slice(&1u32.to_le_bytes()); // FAT sector count
		buffer[48..52].copy_from_slice(&1u32.to_le_bytes()); // first directory sector
		buffer[56..60].copy_from_slice(&4096u32.to_le_bytes()); // mini-stream cutoff
		buffer[60..64].copy_from_slice(&ENDOFCHAIN.to_le_bytes()); // first mini-FAT sector
		buffer[68..72].copy_from_slice(&ENDOFCHAIN.to_le_bytes()); // first DIFAT sector
		for i in 0..DIFAT_IN_HEADER {
			let offset = 76 + i * 4;
			buffer[offset..offset + 4].copy_from_slice(&FREESECT.to_le_bytes());
		}
		buffer[76..80].copy_from_slice(&0u32.to_le_bytes()); // FAT at sector 0
		buffer
	}

	#[test]
	fn parses_regular_header() {
		let header = Header::parse(&header_bytes()).unwrap();
		assert_eq!(header.major_version, 3);
		assert_eq!(header.sector_size, 512);
		assert_eq!(header.mini_sector_size, 64);
		assert_eq!(header.mini_stream_cutoff_size, 4096);
		assert_eq!(header.first_directory_sector_location, 1);
		assert_eq!(header.difat[0], 0);
		assert_eq!(header.difat[1], FREESECT);
	}

	#[test]
	fn rejects_sector_shift_outside_range() {
		for shift in &[6u16, 14] {
			let mut buffer = header_bytes();
			buffer[30..32].copy_from_slice(&shift.to_le_bytes());
			assert!(matches!(Header::parse(&buffer), Err(Error::MalformedHeader(_))));
		}
	}

	#[test]
	fn rejects_mini_sector_shift_above_sector_shift() {
		let mut buffer = header_bytes();
		buffer[32..34].copy_from_slice(&10u16.to_le_bytes());
		assert!(matches!(Header::parse(&buffer), Err(Error::MalformedHeader(_))));
	}

	#[test]
	fn rejects_zero_cutoff() {
		let mut buffer = header_bytes();
		buffer[56..60].copy_from_slice(&0u32.to_le_bytes());
		assert!(matches!(Header::parse(&buffer), Err(Error::MalformedHeader(_))));
	}

	#[test]
	fn rejects_bad_byte_order() {
		let mut buffer = header_bytes();
		buffer[28..30].copy_from_slice(&0xFEFFu16.to_le_bytes());
		assert!(matches!(Header::parse(&buffer), Err(Error::MalformedHeader(_))));
	}
}
