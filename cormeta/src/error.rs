use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the metadata reader.
///
/// Format errors are raised by the lowest layer that detects them and
/// propagate unchanged; nothing is recovered internally.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
	/// The input bytes violate ECMA-335 or the PE/CLI headers.
	#[error("malformed metadata: {0}")]
	Malformed(&'static str),

	/// A signed index was outside the bounds of its container.
	#[error("index out of range: {0}")]
	OutOfRange(&'static str),

	/// A token was narrowed to a table set it does not inhabit.
	#[error("invalid token conversion: {0}")]
	InvalidConversion(&'static str),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}
