use std::{
  io::{Read, Seek},
  path::{Path, PathBuf},
  str::FromStr,
};

use anyhow::Result;
use serde::Deserialize;
use thiserror::Error;

use crate::{modlog::Modification, overlay::Overlay};

/// A set of patches loaded from a YAML file.
///
/// ```yaml
/// patches:
///   - offset: 0
///     text: "hello"
///   - offset: 110
///     hex: "deadbeef"
///   - offset: 4096
///     file: ./chunk.bin
/// ```
#[derive(Deserialize, Default, Debug)]
pub struct PatchConfig {
  #[serde(default)]
  pub patches: Vec<PatchEntry>,

  /// Directory that relative `file` paths are resolved against.
  #[serde(skip)]
  pub base_dir: PathBuf,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct PatchEntry {
  /// Byte offset in the virtual stream.
  pub offset: u64,

  /// Literal UTF-8 content.
  pub text: Option<String>,

  /// Hex-encoded content.
  pub hex: Option<String>,

  /// Path to a file whose whole content is the patch.
  pub file: Option<PathBuf>,
}

#[derive(Error, Debug)]
pub enum PatchConfigError {
  #[error("cannot open patch file {0}: {1}")]
  CannotOpen(String, std::io::Error),

  #[error("cannot parse patch file {0}: {1}")]
  CannotParse(String, serde_yaml::Error),

  #[error("patch #{0} must have exactly one of `text`, `hex` or `file`")]
  AmbiguousSource(usize),

  #[error("patch #{0} has invalid hex content: {1}")]
  BadHex(usize, hex::FromHexError),

  #[error("cannot read content of patch #{0} from {1}: {2}")]
  CannotReadContent(usize, String, std::io::Error),
}

impl PatchConfig {
  pub fn load_from_file(path: &Path) -> Result<Self, PatchConfigError> {
    let path_repr = path.to_string_lossy().into_owned();
    let text = std::fs::read_to_string(path)
      .map_err(|e| PatchConfigError::CannotOpen(path_repr.clone(), e))?;
    let mut me = Self::parse(&text).map_err(|e| PatchConfigError::CannotParse(path_repr, e))?;
    me.base_dir = path
      .parent()
      .map(|x| x.to_path_buf())
      .unwrap_or_default();
    Ok(me)
  }

  pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(text)
  }

  /// Resolves every entry into its content, in file order.
  pub fn resolve(&self) -> Result<Vec<Modification>, PatchConfigError> {
    self
      .patches
      .iter()
      .enumerate()
      .map(|(i, entry)| {
        let data = match (&entry.text, &entry.hex, &entry.file) {
          (Some(text), None, None) => text.as_bytes().to_vec(),
          (None, Some(x), None) => hex::decode(x).map_err(|e| PatchConfigError::BadHex(i, e))?,
          (None, None, Some(file)) => {
            let mut path = self.base_dir.clone();
            path.push(file);
            std::fs::read(&path).map_err(|e| {
              PatchConfigError::CannotReadContent(i, path.to_string_lossy().into_owned(), e)
            })?
          }
          _ => return Err(PatchConfigError::AmbiguousSource(i)),
        };
        Ok(Modification {
          offset: entry.offset,
          data,
        })
      })
      .collect()
  }
}

/// A patch given on the command line as `OFFSET:HEX`.
#[derive(Debug, Clone)]
pub struct PatchArg(pub Modification);

#[derive(Error, Debug)]
pub enum PatchArgError {
  #[error("expected OFFSET:HEX")]
  MissingSeparator,

  #[error("bad offset: {0}")]
  BadOffset(std::num::ParseIntError),

  #[error("bad hex content: {0}")]
  BadHex(hex::FromHexError),
}

impl FromStr for PatchArg {
  type Err = PatchArgError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (offset, content) = s.split_once(':').ok_or(PatchArgError::MissingSeparator)?;
    let offset = offset.parse().map_err(PatchArgError::BadOffset)?;
    let data = hex::decode(content).map_err(PatchArgError::BadHex)?;
    Ok(Self(Modification { offset, data }))
  }
}

/// Appends `patches` to `overlay` in order.
pub fn apply_patches<R: Read + Seek>(
  overlay: &Overlay<R>,
  patches: impl IntoIterator<Item = Modification>,
) -> Result<usize> {
  let mut count = 0;
  for p in patches {
    overlay.modify(p.offset, p.data)?;
    count += 1;
  }
  Ok(count)
}
