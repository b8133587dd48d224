use std::io::Seek;

use anyhow::Result;
use prettytable::{cell, row, Table};
use size_format::SizeFormatterBinary;
use structopt::StructOpt;

use crate::managed::OverlayOpts;

/// Show the sizes of the virtual stream and the modifications applied to it.
#[derive(Debug, StructOpt)]
pub struct InfoCmd {
  #[structopt(flatten)]
  overlay: OverlayOpts,

  /// Also compute the BLAKE3 hash of the whole virtual stream.
  #[structopt(long)]
  hash: bool,
}

impl InfoCmd {
  pub fn run(&self) -> Result<()> {
    let overlay = self.overlay.open()?;

    println!(
      "original size: {} ({}B)",
      overlay.original_size(),
      SizeFormatterBinary::new(overlay.original_size())
    );
    println!(
      "virtual size:  {} ({}B)",
      overlay.virtual_size(),
      SizeFormatterBinary::new(overlay.virtual_size())
    );

    if overlay.modification_count() != 0 {
      let mut table = Table::new();
      table.set_titles(row!["#", "OFFSET", "END", "LENGTH"]);
      overlay.with_log(|entries| {
        for (i, m) in entries.iter().enumerate() {
          table.add_row(row![
            i,
            m.offset,
            m.end(),
            format!("{}B", SizeFormatterBinary::new(m.data.len() as u64))
          ]);
        }
      });
      table.print_tty(false);
    }

    if self.hash {
      let mut hasher = blake3::Hasher::new();
      let mut reader = &overlay;
      reader.rewind()?;
      let n = std::io::copy(&mut reader, &mut hasher)?;
      log::debug!("hashed {} bytes", n);
      println!("blake3: {}", hasher.finalize().to_hex());
    }
    Ok(())
  }
}
