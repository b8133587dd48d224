//! A seekable, readable view of an immutable byte source with an append-only
//! log of byte-range patches applied on top.
//!
//! ```
//! use std::io::{Cursor, Read};
//!
//! let overlay = patchview::Overlay::new(Cursor::new(b"0123456789".to_vec())).unwrap();
//! overlay.modify(2, &b"XY"[..]).unwrap();
//! overlay.modify(3, &b"Q"[..]).unwrap();
//!
//! let mut out = String::new();
//! (&overlay).read_to_string(&mut out).unwrap();
//! assert_eq!(out, "01XQ456789");
//! ```

pub mod config;
pub mod error;
pub mod modlog;
pub mod overlay;

pub use error::OverlayError;
pub use modlog::{Modification, ModificationLog};
pub use overlay::{Overlay, Whence};
