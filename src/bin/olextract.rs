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

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{App, Arg};
use olextract::cfbf::Container;

fn main() {
	let matches = App::new("olextract")
		.version("1.0")
		.author("Steve Muller <steve.muller@outlook.com>")
		.about("This utility extracts all named data streams from OLE documents (Compound File Binary File Format, e.g. legacy Office files) into flat files on disk.")
		.arg(Arg::with_name("verbose")
			.short("v")
			.help("Increases the debug verbosity. This will print a lot of debug messages to standard error (STDERR). Can be used up to 3 times.")
			.multiple(true)
			.takes_value(false))
		.arg(Arg::with_name("input")
			.value_name("PATH")
			.help("An OLE document, or a directory whose files shall be processed.")
			.required(true)
			.index(1))
		.arg(Arg::with_name("pattern")
			.value_name("PATTERN")
			.help("A filename pattern ('*' and '?' wildcards, matched case-insensitively) selecting which files of the input directory are processed. Defaults to all files. Ignored when PATH is a single file.")
			.index(2))
		.arg(Arg::with_name("split-by-encoding")
			.long("split-by-encoding")
			.help("Writes the extracted streams into 'utf16', 'utf8' or 'binary' subdirectories, based on a cheap sniff of each stream's content.")
			.takes_value(false))
	.get_matches();

	init_logging(matches.occurrences_of("verbose"));

	let input = Path::new(matches.value_of("input").unwrap());
	let pattern = matches.value_of("pattern").unwrap_or("*");
	let split_by_encoding = matches.is_present("split-by-encoding");

	println!("Starting to process OLE documents.");
	let started = Instant::now();

	let failures = match run(input, pattern, split_by_encoding) {
		Ok(failures) => failures,
		Err(e) => {
			eprintln!("ERROR: {}", e);
			std::process::exit(1);
		}
	};

	let elapsed = started.elapsed().as_secs();
	println!("Finished processing OLE documents. Time elapsed: {}h {}m {}s.", elapsed / 3600, (elapsed % 3600) / 60, elapsed % 60);
	if failures > 0 {
		eprintln!("{} file(s) or stream(s) could not be processed.", failures);
		std::process::exit(1);
	}
}

fn init_logging(verbosity: u64) {
	let filter = match verbosity {
		0 => "warn",
		1 => "info",
		2 => "debug",
		_ => "trace",
	};
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();
}

/// Processes every selected input file, isolating failures so that one bad
/// document does not stop the rest of the batch. Returns the failure count.
fn run(input: &Path, pattern: &str, split_by_encoding: bool) -> Result<usize, io::Error> {
	let files = collect_input_files(input, pattern)?;
	let mut failures = 0;
	for file in &files {
		println!("------ Begin stream extraction on file [{}] ------", file.display());
		match extract_file(file, split_by_encoding) {
			Ok(stream_failures) => failures += stream_failures,
			Err(e) => {
				eprintln!("ERROR: skipping [{}]: {}", file.display(), e);
				failures += 1;
			}
		}
		println!("------ Finished stream extraction on file [{}] ------", file.display());
	}
	Ok(failures)
}

fn collect_input_files(input: &Path, pattern: &str) -> Result<Vec<PathBuf>, io::Error> {
	if input.is_dir() {
		println!("Processing directory. Will get files based on search pattern [{}].", pattern);
		let mut files = Vec::new();
		for entry in fs::read_dir(input)? {
			let entry = entry?;
			if !entry.file_type()?.is_file() {
				continue;
			}
			let name = entry.file_name();
			if wildcard_match(&name.to_string_lossy(), pattern) {
				files.push(entry.path());
			}
		}
		files.sort();
		Ok(files)
	}
	else if input.is_file() {
		Ok(vec![input.to_path_buf()])
	}
	else {
		Err(io::Error::new(io::ErrorKind::NotFound, format!("no such file or directory: {}", input.display())))
	}
}

/// Extracts all streams of one document into a sibling directory named after
/// the document. Returns the number of streams that could not be written.
fn extract_file(path: &Path, split_by_encoding: bool) -> Result<usize, Box<dyn std::error::Error>> {
	let mut container = Container::new(File::open(path)?)?;

	let output_dir = output_dir_for(path);
	fs::create_dir_all(&output_dir)?;

	let mut failures = 0;
	for stream_path in container.list_streams(true) {
		// Storages are folder-like nodes without content of their own.
		if stream_path.ends_with('/') {
			continue;
		}
		match container.get_stream_bytes(&stream_path) {
			Ok(bytes) => {
				let target_dir = if split_by_encoding {
					let subdir = output_dir.join(classify_encoding(&bytes));
					fs::create_dir_all(&subdir)?;
					subdir
				}
				else {
					output_dir.clone()
				};
				let leaf = stream_path.rsplit('/').next().unwrap_or(&stream_path);
				let output_path = target_dir.join(format!("{}.txt", sanitize_file_name(leaf)));
				println!("Writing stream [{}] to file [{}].", stream_path, output_path.display());
				fs::write(&output_path, &bytes)?;
			}
			Err(e) => {
				eprintln!("ERROR: skipping stream [{}] of [{}]: {}", stream_path, path.display(), e);
				failures += 1;
			}
		}
	}
	Ok(failures)
}

/// The output directory sits next to the input file and is named after its
/// stem, mirroring where the documents came from.
fn output_dir_for(input: &Path) -> PathBuf {
	let stem = input.file_stem().unwrap_or_else(|| input.as_os_str());
	input.parent().unwrap_or_else(|| Path::new("")).join(stem)
}

/// Replaces characters that cannot appear in file names; CFBF stream names
/// routinely start with control characters (e.g. \x05SummaryInformation).
fn sanitize_file_name(name: &str) -> String {
	name.chars()
		.map(|c| if c.is_control() || c == '/' || c == '\\' || c == ':' { '_' } else { c })
		.collect()
}

fn classify_encoding(bytes: &[u8]) -> &'static str {
	if bytes.len() >= 2 && (bytes[..2] == [0xFF, 0xFE] || bytes[..2] == [0xFE, 0xFF]) {
		"utf16"
	}
	else if std::str::from_utf8(bytes).is_ok() {
		"utf8"
	}
	else {
		"binary"
	}
}

/// Matches a file name against a pattern with '*' (any run of characters)
/// and '?' (any single character) wildcards, case-insensitively.
fn wildcard_match(name: &str, pattern: &str) -> bool {
	let name: Vec<char> = name.to_lowercase().chars().collect();
	let pattern: Vec<char> = pattern.to_lowercase().chars().collect();

	let mut n = 0;
	let mut p = 0;
	let mut star: Option<usize> = None;
	let mut mark = 0;
	while n < name.len() {
		if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
			n += 1;
			p += 1;
		}
		else if p < pattern.len() && pattern[p] == '*' {
			star = Some(p);
			mark = n;
			p += 1;
		}
		else if let Some(s) = star {
			p = s + 1;
			mark += 1;
			n = mark;
		}
		else {
			return false;
		}
	}
	while p < pattern.len() && pattern[p] == '*' {
		p += 1;
	}
	p == pattern.len()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn wildcard_matches_everything_with_star() {
		assert!(wildcard_match("report.doc", "*"));
		assert!(wildcard_match("", "*"));
	}

	#[test]
	fn wildcard_matches_extension_patterns() {
		assert!(wildcard_match("report.doc", "*.doc"));
		assert!(wildcard_match("REPORT.DOC", "*.doc"));
		assert!(!wildcard_match("report.docx", "*.doc"));
		assert!(!wildcard_match("report_doc", "*.doc"));
	}

	#[test]
	fn wildcard_single_character() {
		assert!(wildcard_match("a1.xls", "a?.xls"));
		assert!(!wildcard_match("a12.xls", "a?.xls"));
	}

	#[test]
	fn wildcard_multiple_stars() {
		assert!(wildcard_match("summary-2018-final.doc", "*2018*.doc"));
		assert!(!wildcard_match("summary-2017-final.doc", "*2018*.doc"));
	}

	#[test]
	fn wildcard_literal_match() {
		assert!(wildcard_match("Thumbs.db", "thumbs.db"));
		assert!(!wildcard_match("Thumbs.db", "thumbs"));
	}

	#[test]
	fn sanitizes_control_characters_and_separators() {
		assert_eq!(sanitize_file_name("\u{5}SummaryInformation"), "_SummaryInformation");
		assert_eq!(sanitize_file_name("a/b\\c:d"), "a_b_c_d");
		assert_eq!(sanitize_file_name("WordDocument"), "WordDocument");
	}

	#[test]
	fn classifies_stream_encodings() {
		assert_eq!(classify_encoding(&[0xFF, 0xFE, 0x41, 0x00]), "utf16");
		assert_eq!(classify_encoding(&[0xFE, 0xFF, 0x00, 0x41]), "utf16");
		assert_eq!(classify_encoding(b"plain text"), "utf8");
		assert_eq!(classify_encoding(&[0xD0, 0xCF, 0x11, 0xE0]), "binary");
	}

	#[test]
	fn output_dir_is_a_sibling_named_after_the_stem() {
		assert_eq!(output_dir_for(Path::new("/data/mail.doc")), PathBuf::from("/data/mail"));
		assert_eq!(output_dir_for(Path::new("archive.msg")), PathBuf::from("archive"));
	}
}
