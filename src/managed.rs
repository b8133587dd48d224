use std::{
  fs::{File, OpenOptions},
  path::{Path, PathBuf},
};

use anyhow::Result;
use fs2::FileExt;
use itertools::Itertools;
use patchview::{
  config::{apply_patches, PatchArg, PatchConfig},
  Overlay,
};
use structopt::StructOpt;

/// Where the base comes from and what goes on top of it.
#[derive(Debug, StructOpt)]
pub struct OverlayOpts {
  /// Path to the base file. It is opened read-only and never modified.
  #[structopt(long)]
  base: PathBuf,

  /// Path to a YAML file listing patches.
  #[structopt(long)]
  patches: Option<PathBuf>,

  /// Additional patch as `OFFSET:HEX`. Applied after `--patches`, in order.
  #[structopt(long = "patch", number_of_values = 1)]
  patch: Vec<PatchArg>,
}

impl OverlayOpts {
  pub fn open(&self) -> Result<Overlay<File>> {
    let overlay = Overlay::new(open_base(&self.base)?)?;

    if let Some(path) = &self.patches {
      let config = PatchConfig::load_from_file(path)?;
      let n = apply_patches(&overlay, config.resolve()?)?;
      log::info!("Applied {} patches from {}.", n, path.to_string_lossy());
    }
    apply_patches(&overlay, self.patch.iter().map(|x| x.0.clone()))?;

    log::debug!(
      "base {}: original size {}, virtual size {}, patches at [{}]",
      self.base.to_string_lossy(),
      overlay.original_size(),
      overlay.virtual_size(),
      overlay.with_log(|entries| entries.iter().map(|m| m.offset).join(", "))
    );
    Ok(overlay)
  }
}

/// Opens the base read-only, holding a shared lock so that well-behaved
/// writers stay away while we serve from it.
pub fn open_base(path: &Path) -> Result<File> {
  let f = OpenOptions::new().read(true).open(path)?;
  f.try_lock_shared()?;
  Ok(f)
}
