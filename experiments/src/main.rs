use std::process::ExitCode;

use tracing::info;

use cormeta::rows::TypeDefRow;
use cormeta::{Database, TableId};

fn main() -> ExitCode {
	tracing_subscriber::fmt().with_target(false).init();

	let Some(path) = std::env::args().nth(1) else {
		eprintln!("usage: experiments <assembly>");
		return ExitCode::FAILURE;
	};

	let database = match Database::create_from_file(&path) {
		Ok(database) => database,
		Err(error) => {
			eprintln!("{path}: {error}");
			return ExitCode::FAILURE;
		},
	};

	info!("loaded {path} (metadata {})", database.version());

	println!("tables:");
	for table in TableId::ALL {
		let entry = database.tables().table(table);
		if entry.row_count() != 0 {
			println!(
				"  {table:?}: {} rows x {} bytes{}",
				entry.row_count(),
				entry.row_size(),
				if entry.is_sorted() { ", sorted" } else { "" },
			);
		}
	}

	println!("types:");
	for ty in database.rows::<TypeDefRow>() {
		let name = ty.name().unwrap_or("<invalid name>");
		let namespace = ty.namespace().unwrap_or("<invalid namespace>");
		let fields = ty.first_field().and_then(|first| Ok(ty.last_field()? - first));
		let methods = ty.first_method().and_then(|first| Ok(ty.last_method()? - first));
		match namespace.is_empty() {
			true => print!("  {name}"),
			false => print!("  {namespace}.{name}"),
		}
		println!(
			" ({} fields, {} methods)",
			fields.unwrap_or(0),
			methods.unwrap_or(0),
		);
	}

	ExitCode::SUCCESS
}
