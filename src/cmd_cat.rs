use std::io::{Read, Seek, SeekFrom, Write};

use anyhow::Result;
use structopt::StructOpt;

use crate::managed::OverlayOpts;

/// Write a byte range of the virtual stream to stdout.
#[derive(Debug, StructOpt)]
pub struct CatCmd {
  #[structopt(flatten)]
  overlay: OverlayOpts,

  /// First byte to output.
  #[structopt(long, default_value = "0")]
  offset: u64,

  /// Number of bytes to output. Defaults to everything up to the end.
  #[structopt(long)]
  length: Option<u64>,
}

impl CatCmd {
  pub fn run(&self) -> Result<()> {
    let overlay = self.overlay.open()?;
    let mut reader = &overlay;
    reader.seek(SeekFrom::Start(self.offset))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let n = match self.length {
      Some(len) => std::io::copy(&mut reader.take(len), &mut out)?,
      None => std::io::copy(&mut reader, &mut out)?,
    };
    out.flush()?;
    log::debug!("wrote {} bytes starting at {}", n, self.offset);
    Ok(())
  }
}
