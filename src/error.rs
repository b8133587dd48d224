use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OverlayError {
  /// The base could not be measured when the overlay was created.
  #[error("cannot determine size of base: {0}")]
  Construction(#[source] io::Error),

  #[error("seek: invalid whence {0}")]
  InvalidWhence(u32),

  #[error("seek: unknown whence {0:?}")]
  UnknownWhence(String),

  #[error("seek: resulting position {target} is out of range")]
  SeekOutOfRange { target: i128 },

  #[error("modification at offset {offset} with length {len} overflows the address space")]
  OffsetOverflow { offset: u64, len: usize },

  /// Error reported by the base itself.
  #[error(transparent)]
  Io(#[from] io::Error),
}

impl OverlayError {
  pub fn is_invalid_seek(&self) -> bool {
    matches!(
      self,
      OverlayError::InvalidWhence(_)
        | OverlayError::UnknownWhence(_)
        | OverlayError::SeekOutOfRange { .. }
    )
  }
}

impl From<OverlayError> for io::Error {
  fn from(e: OverlayError) -> Self {
    match e {
      OverlayError::Io(e) => e,
      e => io::Error::new(io::ErrorKind::InvalidInput, e),
    }
  }
}
