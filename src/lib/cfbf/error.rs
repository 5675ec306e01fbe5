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

use std::io;
use thiserror::Error;

/// Errors raised while opening a compound file or reading streams from it.
///
/// Everything except `TruncatedStream` and `NotFound` is only ever raised
/// while the container is being opened; once `Container::new` has returned,
/// the header, FAT tables and directory tree are known to be sound.
#[derive(Error, Debug)]
pub enum Error {
	/// The file does not start with the 8-byte CFBF signature.
	#[error("not a compound file (bad signature)")]
	NotACompoundFile,

	/// The header is present but carries values no reader can work with.
	#[error("malformed header: {0}")]
	MalformedHeader(String),

	/// The directory stream decodes to an inconsistent entry array.
	#[error("malformed directory: {0}")]
	MalformedDirectory(String),

	/// A FAT or mini-FAT chain is cyclic or references a free sector.
	#[error("corrupt sector chain: {0}")]
	CorruptChain(String),

	/// A stream declares more bytes than its chain can deliver.
	#[error("truncated stream: {declared} bytes declared, only {available} recoverable")]
	TruncatedStream { declared: u64, available: u64 },

	/// A sector id points past the end of the underlying file.
	#[error("sector {sector} out of range (container has {count} sectors)")]
	OutOfRange { sector: u32, count: u64 },

	/// The requested path does not name a stream in this container.
	#[error("no stream at path '{0}'")]
	NotFound(String),

	#[error("I/O error: {0}")]
	Io(#[from] io::Error),
}
