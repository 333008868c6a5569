use std::{fmt::Display, io};

macro_rules! impl_from_for_variant {
	($variant: path, $contained_type: ty) => {
		impl From<$contained_type> for Error {
			fn from(value: $contained_type) -> Self {
				$variant(value)
			}
		}
	};
}

/// Errors raised by validator construction/configuration.
///
/// Malformed *input* is never reported through this type - a corrupt or
/// misidentified file is a normal `is_valid = false` result from `validate`,
/// not an `Error`. This covers usage errors only: bad configuration passed
/// to a validator's constructor, or an I/O failure reading the byte source
/// itself (as opposed to the source simply running out of bytes, which is
/// reported through `Status::eof`).
#[derive(Debug)]
pub enum Error {
	InvalidArgument(String),
	Io(io::Error),
}

impl Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", match self {
			Error::InvalidArgument(msg) => msg.clone(),
			Error::Io(e) => e.to_string(),
		})
	}
}

impl std::error::Error for Error {}

impl_from_for_variant!(Error::Io, io::Error);
