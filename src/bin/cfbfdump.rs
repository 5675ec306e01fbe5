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

use std::fs::File;
use std::io::{stdin, stdout, Cursor, Read, Seek, Write};

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use olextract::cfbf::{Container, Error};

trait ReadSeek: Read + Seek { }
impl<T> ReadSeek for T where T: Read + Seek { }

fn main() {
	let matches = App::new("cfbfdump")
		.version("1.0")
		.author("Steve Muller <steve.muller@outlook.com>")
		.about("This utility reads a Compound File Binary File Format file (also known as OLE file, COM file, or Structured Storage file) and lists or dumps the contained streams.")
		.setting(AppSettings::SubcommandRequired)
		.arg(Arg::with_name("verbose")
			.short("v")
			.help("Increases the debug verbosity. This will print a lot of debug messages to standard error (STDERR). Can be used up to 3 times.")
			.multiple(true)
			.takes_value(false))
		.subcommand(SubCommand::with_name("list")
			.about("Lists all streams contained in the CFBF file. Each output line is the path of one stream; storage (folder) paths end with '/'.")
			.arg(Arg::with_name("input")
				.value_name("FILE")
				.help("A file in Compound File Binary File Format (CFBF). If omitted, the file will be read from STDIN instead.")
				.short("i")
				.long("input")
				.takes_value(true)
				.required(false))
		)
		.subcommand(SubCommand::with_name("dump")
			.about("Dumps a single stream from the CFBF file.")
			.arg(Arg::with_name("path")
				.value_name("PATH")
				.help("The '/'-joined path of the stream that shall be dumped, as printed by the 'list' subcommand.")
				.short("p")
				.long("path")
				.takes_value(true)
				.required(true))
			.arg(Arg::with_name("output")
				.value_name("FILE")
				.help("The file where the stream shall be written to. If this parameter is not specified (or has the value '-'), the stream will be written to STDOUT instead.")
				.short("o")
				.long("output")
				.takes_value(true)
				.required(false))
			.arg(Arg::with_name("input")
				.value_name("FILE")
				.help("A file in Compound File Binary File Format (CFBF). If omitted, the file will be read from STDIN instead.")
				.short("i")
				.long("input")
				.takes_value(true)
				.required(false))
		)
	.get_matches();

	init_logging(matches.occurrences_of("verbose"));

	if let Err(e) = dispatch(matches) {
		eprintln!("ERROR: {}", e);
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

fn dispatch(matches: ArgMatches) -> Result<(), Error> {
	match matches.subcommand() {
		("list", Some(submatches)) => dispatch_list(submatches),
		("dump", Some(submatches)) => dispatch_dump(submatches),
		_ => unreachable!("subcommand is required"),
	}
}

fn open_input(inputfile: &str) -> Result<Box<dyn ReadSeek>, Error> {
	match inputfile {
		// CFBF requires seeking, so STDIN is buffered into memory first.
		"" | "-" => {
			let mut data = Vec::new();
			stdin().read_to_end(&mut data)?;
			Ok(Box::new(Cursor::new(data)))
		}
		_ => Ok(Box::new(File::open(inputfile)?)),
	}
}

fn dispatch_list(matches: &ArgMatches) -> Result<(), Error> {
	let input = open_input(matches.value_of("input").unwrap_or(""))?;
	let container = Container::new(input)?;
	for path in container.list_streams(true) {
		println!("{}", path);
	}
	Ok(())
}

fn dispatch_dump(matches: &ArgMatches) -> Result<(), Error> {
	let path = matches.value_of("path").unwrap();
	let outputfile = matches.value_of("output").unwrap_or("");

	let input = open_input(matches.value_of("input").unwrap_or(""))?;
	let mut output: Box<dyn Write> = match outputfile {
		"" | "-" => Box::new(stdout()),
		_ => Box::new(File::create(outputfile)?),
	};

	let mut container = Container::new(input)?;
	let bytes = container.get_stream_bytes(path)?;
	output.write_all(&bytes)?;
	Ok(())
}
