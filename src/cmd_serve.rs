use std::{
  convert::TryFrom,
  fs::File,
  io::{Read, Seek, SeekFrom, Write},
  net::TcpListener,
  os::unix::net::UnixListener,
  sync::Arc,
};

use anyhow::Result;
use nbd::{
  server::{handshake, transmission},
  Export,
};
use patchview::Overlay;
use structopt::StructOpt;

use crate::managed::OverlayOpts;

/// Export the virtual stream as an NBD device.
#[derive(Debug, StructOpt)]
pub struct ServeCmd {
  #[structopt(flatten)]
  overlay: OverlayOpts,

  /// Address to listen on. `unix:/path` for a Unix socket.
  #[structopt(short, long)]
  listen: String,

  /// Reject writes instead of recording them as modifications.
  #[structopt(long)]
  read_only: bool,
}

/// One connection's view: a private cursor into the shared overlay.
struct Session {
  overlay: Arc<Overlay<File>>,
  cursor: u64,
  read_only: bool,
}

impl Read for Session {
  fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
    log::trace!("requested read with pos {} len {}", self.cursor, buf.len());
    let n = self.overlay.read_at(self.cursor, buf)?;
    self.cursor += n as u64;
    Ok(n)
  }
}

impl Write for Session {
  fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
    if self.read_only {
      return Err(std::io::Error::new(
        std::io::ErrorKind::PermissionDenied,
        "read only block device",
      ));
    }
    log::trace!("requested write with pos {} len {}", self.cursor, buf.len());
    self.overlay.write_at(self.cursor, buf)?;
    self.cursor += buf.len() as u64;
    Ok(buf.len())
  }

  fn flush(&mut self) -> std::io::Result<()> {
    Ok(())
  }
}

impl Seek for Session {
  fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
    let target = match pos {
      SeekFrom::Start(x) => x as i128,
      SeekFrom::Current(d) => self.cursor as i128 + d as i128,
      SeekFrom::End(d) => self.overlay.virtual_size() as i128 + d as i128,
    };
    self.cursor = u64::try_from(target).map_err(|_| {
      std::io::Error::new(std::io::ErrorKind::InvalidInput, "seek out of range")
    })?;
    Ok(self.cursor)
  }
}

impl ServeCmd {
  pub fn run(&self) -> Result<()> {
    let overlay = Arc::new(self.overlay.open()?);

    let listener = do_listen(&self.listen)?;
    log::info!(
      "Serving {} bytes on {}{}.",
      overlay.virtual_size(),
      self.listen,
      if self.read_only { " (read only)" } else { "" }
    );
    for conn in listener.incoming() {
      let mut conn = conn?;
      let svc = Session {
        overlay: overlay.clone(),
        cursor: 0,
        read_only: self.read_only,
      };
      // Writes only ever grow the overlay, so a size taken now stays valid
      // for the whole connection.
      let e = Export {
        size: overlay.virtual_size(),
        readonly: self.read_only,
        ..Default::default()
      };
      std::thread::spawn(move || {
        let res = handshake(&mut conn, &e).and_then(|()| transmission(&mut conn, svc));
        if let Err(e) = res {
          log::error!("error while handling connection: {}", e);
        }
      });
    }
    Ok(())
  }
}

trait ReadAndWrite: Read + Write + Send {}

impl<T: Read + Write + Send> ReadAndWrite for T {}

enum GenericListener {
  Tcp(TcpListener),
  Unix(UnixListener),
}

impl GenericListener {
  fn incoming<'a>(
    &'a self,
  ) -> Box<dyn Iterator<Item = Result<Box<dyn ReadAndWrite>, std::io::Error>> + 'a> {
    match self {
      Self::Tcp(lis) => Box::new(
        lis
          .incoming()
          .map(|x| x.map(|x| Box::new(x) as Box<dyn ReadAndWrite>)),
      ),
      Self::Unix(lis) => Box::new(
        lis
          .incoming()
          .map(|x| x.map(|x| Box::new(x) as Box<dyn ReadAndWrite>)),
      ),
    }
  }
}

fn do_listen(addr: &str) -> Result<GenericListener, std::io::Error> {
  if let Some(path) = addr.strip_prefix("unix:") {
    let _ = std::fs::remove_file(&path);
    Ok(GenericListener::Unix(UnixListener::bind(path)?))
  } else {
    Ok(GenericListener::Tcp(TcpListener::bind(addr)?))
  }
}
