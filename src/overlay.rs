use std::{
  convert::TryFrom,
  io::{self, ErrorKind, Read, Seek, SeekFrom, Write},
  str::FromStr,
};

use parking_lot::Mutex;

use crate::{
  error::OverlayError,
  modlog::{Modification, ModificationLog},
};

/// Reference point for [`Overlay::seek_whence`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Whence {
  Start,
  Current,
  End,
}

impl TryFrom<u32> for Whence {
  type Error = OverlayError;

  fn try_from(x: u32) -> Result<Self, Self::Error> {
    match x {
      0 => Ok(Whence::Start),
      1 => Ok(Whence::Current),
      2 => Ok(Whence::End),
      _ => Err(OverlayError::InvalidWhence(x)),
    }
  }
}

impl FromStr for Whence {
  type Err = OverlayError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "start" | "set" => Ok(Whence::Start),
      "current" | "cur" => Ok(Whence::Current),
      "end" => Ok(Whence::End),
      _ => match s.parse::<u32>() {
        Ok(x) => Whence::try_from(x),
        Err(_) => Err(OverlayError::UnknownWhence(s.to_string())),
      },
    }
  }
}

/// A seekable, readable view of `base` with an append-only log of byte-range
/// modifications applied on top.
///
/// The base is never written to. Positions not covered by any modification
/// read from the base when they fall below its original size, and as zeroes
/// otherwise. Overlapping modifications resolve by recency.
///
/// All state sits behind a single lock, so one thread may append
/// modifications while another streams reads. Note that the cursor is shared
/// as well: concurrent readers should use [`Overlay::read_at`].
pub struct Overlay<R> {
  state: Mutex<State<R>>,
}

struct State<R> {
  base: R,
  original_size: u64,
  virtual_size: u64,
  position: u64,
  log: ModificationLog,
}

impl<R: Read + Seek> Overlay<R> {
  /// Wraps `base`, measuring its length once. The base is left positioned
  /// at its start.
  pub fn new(mut base: R) -> Result<Self, OverlayError> {
    let original_size = base
      .seek(SeekFrom::End(0))
      .map_err(OverlayError::Construction)?;
    base
      .seek(SeekFrom::Start(0))
      .map_err(OverlayError::Construction)?;
    log::debug!("overlay created over base of {} bytes", original_size);

    Ok(Self {
      state: Mutex::new(State {
        base,
        original_size,
        virtual_size: original_size,
        position: 0,
        log: ModificationLog::new(),
      }),
    })
  }

  /// Appends a modification. Offsets past the current end are allowed and
  /// leave a zero-filled hole in between.
  ///
  /// No I/O is performed. The only failure is an `offset + data.len()` that
  /// does not fit in a `u64`, in which case nothing is appended.
  pub fn modify(&self, offset: u64, data: impl Into<Vec<u8>>) -> Result<(), OverlayError> {
    self.state.lock().modify(offset, data.into())
  }

  /// Same as [`Overlay::modify`]. Reads as a storage write for adapters that
  /// think in terms of positioned I/O.
  pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<(), OverlayError> {
    self.modify(offset, data)
  }

  /// Moves the cursor. Seeking past the end is allowed; the next read then
  /// returns end-of-stream.
  pub fn seek_whence(&self, offset: i64, whence: Whence) -> Result<u64, OverlayError> {
    let pos = match whence {
      Whence::Start => SeekFrom::Start(
        u64::try_from(offset).map_err(|_| OverlayError::SeekOutOfRange {
          target: offset as i128,
        })?,
      ),
      Whence::Current => SeekFrom::Current(offset),
      Whence::End => SeekFrom::End(offset),
    };
    self.state.lock().seek(pos)
  }

  /// Positions the cursor at `offset` and reads, under one lock acquisition.
  pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    let mut state = self.state.lock();
    state.position = offset;
    state.read(buf)
  }

  pub fn original_size(&self) -> u64 {
    self.state.lock().original_size
  }

  pub fn virtual_size(&self) -> u64 {
    self.state.lock().virtual_size
  }

  pub fn position(&self) -> u64 {
    self.state.lock().position
  }

  pub fn modification_count(&self) -> usize {
    self.state.lock().log.len()
  }

  /// Runs `f` with the modification log while holding the lock.
  pub fn with_log<T>(&self, f: impl FnOnce(&ModificationLog) -> T) -> T {
    f(&self.state.lock().log)
  }

  /// Gives the base back to the caller, discarding all modifications.
  pub fn into_inner(self) -> R {
    self.state.into_inner().base
  }
}

impl<R: Read + Seek> State<R> {
  fn modify(&mut self, offset: u64, data: Vec<u8>) -> Result<(), OverlayError> {
    let end = offset
      .checked_add(data.len() as u64)
      .ok_or(OverlayError::OffsetOverflow {
        offset,
        len: data.len(),
      })?;
    log::debug!(
      "modification #{}: offset {} length {}",
      self.log.len(),
      offset,
      data.len()
    );
    self.log.push(Modification { offset, data });
    self.virtual_size = self.virtual_size.max(end);
    debug_assert!(self.log.extent().map_or(true, |x| x <= self.virtual_size));
    Ok(())
  }

  fn seek(&mut self, pos: SeekFrom) -> Result<u64, OverlayError> {
    let target = match pos {
      SeekFrom::Start(x) => x as i128,
      SeekFrom::Current(d) => self.position as i128 + d as i128,
      SeekFrom::End(d) => self.virtual_size as i128 + d as i128,
    };
    let target = u64::try_from(target).map_err(|_| OverlayError::SeekOutOfRange { target })?;
    self.position = target;
    Ok(target)
  }

  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    if self.position >= self.virtual_size {
      return Ok(0);
    }
    let want = (buf.len() as u64).min(self.virtual_size - self.position) as usize;

    let mut filled = 0usize;
    while filled < want {
      let pos = self.position;
      let remaining = want - filled;

      if let Some((m, run_end)) = self.log.covering_run(pos) {
        let start = (pos - m.offset) as usize;
        let n = (remaining as u64).min(run_end - pos) as usize;
        buf[filled..filled + n].copy_from_slice(&m.data[start..start + n]);
        log::trace!("read {} bytes at {} from modification at {}", n, pos, m.offset);
        filled += n;
        self.position += n as u64;
        continue;
      }

      let boundary = self.log.next_boundary(pos).unwrap_or(self.virtual_size);
      let run = (remaining as u64).min(boundary - pos) as usize;

      if pos >= self.original_size {
        buf[filled..filled + run].fill(0);
        log::trace!("read {} hole bytes at {}", run, pos);
        filled += run;
        self.position += run as u64;
        continue;
      }

      let run = run.min((self.original_size - pos) as usize);
      match self.read_base(pos, &mut buf[filled..filled + run]) {
        Ok(0) => {
          log::warn!(
            "base ended at {} but was measured at {} bytes",
            pos,
            self.original_size
          );
          break;
        }
        Ok(n) => {
          log::trace!("read {} base bytes at {}", n, pos);
          filled += n;
          self.position += n as u64;
        }
        // The bytes already copied are returned; the error will surface again
        // on the next call since the cursor stays at the failing position.
        Err(e) if filled > 0 => {
          log::debug!("base read failed at {} after {} bytes: {}", pos, filled, e);
          break;
        }
        Err(e) => return Err(e),
      }
    }

    Ok(filled)
  }

  fn read_base(&mut self, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
    self.base.seek(SeekFrom::Start(pos))?;
    loop {
      match self.base.read(buf) {
        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
        res => return res,
      }
    }
  }
}

impl<'a, R: Read + Seek> Read for &'a Overlay<R> {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    self.state.lock().read(buf)
  }
}

impl<'a, R: Read + Seek> Seek for &'a Overlay<R> {
  fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
    Ok(self.state.lock().seek(pos)?)
  }
}

impl<'a, R: Read + Seek> Write for &'a Overlay<R> {
  /// Appends `buf` as a modification at the cursor and advances past it.
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    if buf.is_empty() {
      return Ok(0);
    }
    let mut state = self.state.lock();
    let pos = state.position;
    state.modify(pos, buf.to_vec())?;
    state.position += buf.len() as u64;
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

impl<R: Read + Seek> Read for Overlay<R> {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    (&*self).read(buf)
  }
}

impl<R: Read + Seek> Seek for Overlay<R> {
  fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
    (&*self).seek(pos)
  }
}

impl<R: Read + Seek> Write for Overlay<R> {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    (&*self).write(buf)
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::io::Cursor;

  use super::*;

  fn digits() -> Overlay<Cursor<Vec<u8>>> {
    Overlay::new(Cursor::new(b"0123456789".to_vec())).unwrap()
  }

  fn read_all<R: Read + Seek>(o: &Overlay<R>) -> Vec<u8> {
    let mut out = vec![];
    (&*o).seek(SeekFrom::Start(0)).unwrap();
    (&*o).read_to_end(&mut out).unwrap();
    out
  }

  #[test]
  fn construction_measures_base() {
    let o = digits();
    assert_eq!(o.original_size(), 10);
    assert_eq!(o.virtual_size(), 10);
    assert_eq!(o.position(), 0);
    assert_eq!(o.modification_count(), 0);
    assert_eq!(read_all(&o), b"0123456789");
  }

  #[test]
  fn later_modification_wins_overlap() {
    let o = digits();
    o.modify(2, &b"XY"[..]).unwrap();
    o.modify(3, &b"Q"[..]).unwrap();
    assert_eq!(read_all(&o), b"01XQ456789");
  }

  #[test]
  fn hole_reads_as_zeroes() {
    let o = digits();
    o.modify(110, &b"tail"[..]).unwrap();
    assert_eq!(o.virtual_size(), 114);

    let mut buf = vec![0xffu8; 104];
    assert_eq!(o.read_at(10, &mut buf).unwrap(), 104);
    assert!(buf[..100].iter().all(|&b| b == 0));
    assert_eq!(&buf[100..], b"tail");
  }

  #[test]
  fn empty_modification_extends_size() {
    let o = digits();
    o.modify(20, Vec::new()).unwrap();
    assert_eq!(o.virtual_size(), 20);
    let all = read_all(&o);
    assert_eq!(&all[..10], b"0123456789");
    assert_eq!(&all[10..], &[0u8; 10]);
  }

  #[test]
  fn seek_end_returns_virtual_size() {
    let mut o = digits();
    o.modify(8, &b"abcdef"[..]).unwrap();
    assert_eq!(o.seek(SeekFrom::End(0)).unwrap(), 14);
    assert_eq!(o.seek_whence(-4, Whence::End).unwrap(), 10);
    assert_eq!(o.seek_whence(2, Whence::Current).unwrap(), 12);
  }

  #[test]
  fn negative_seek_is_rejected() {
    let mut o = digits();
    o.seek(SeekFrom::Start(5)).unwrap();
    assert!(matches!(
      o.seek_whence(-1, Whence::Start),
      Err(OverlayError::SeekOutOfRange { target: -1 })
    ));
    let e = o.seek(SeekFrom::Current(-6)).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::InvalidInput);
    assert_eq!(o.position(), 5);
  }

  #[test]
  fn invalid_whence() {
    assert!(matches!(
      Whence::try_from(3u32),
      Err(OverlayError::InvalidWhence(3))
    ));
    assert_eq!("end".parse::<Whence>().unwrap(), Whence::End);
    assert_eq!("1".parse::<Whence>().unwrap(), Whence::Current);
    let e = "sideways".parse::<Whence>().unwrap_err();
    assert!(e.is_invalid_seek());
    assert!(matches!(e, OverlayError::UnknownWhence(ref x) if x == "sideways"));
    assert!(matches!(
      "7".parse::<Whence>(),
      Err(OverlayError::InvalidWhence(7))
    ));
  }

  #[test]
  fn read_past_end_is_eof() {
    let mut o = digits();
    let mut buf = [0u8; 4];
    o.seek(SeekFrom::Start(10)).unwrap();
    assert_eq!(o.read(&mut buf).unwrap(), 0);
    o.seek(SeekFrom::Start(1000)).unwrap();
    assert_eq!(o.read(&mut buf).unwrap(), 0);
    assert_eq!(o.position(), 1000);
  }

  #[test]
  fn end_of_stream_is_not_terminal() {
    let mut o = digits();
    let mut buf = [0u8; 4];
    o.seek(SeekFrom::End(0)).unwrap();
    assert_eq!(o.read(&mut buf).unwrap(), 0);
    o.modify(10, &b"more"[..]).unwrap();
    assert_eq!(o.read(&mut buf).unwrap(), 4);
    assert_eq!(&buf, b"more");
  }

  #[test]
  fn read_is_capped_by_buffer_and_size() {
    let o = digits();
    let mut buf = [0u8; 3];
    assert_eq!(o.read_at(8, &mut buf).unwrap(), 2);
    assert_eq!(&buf[..2], b"89");
    assert_eq!(o.position(), 10);

    let mut small = [0u8; 2];
    assert_eq!(o.read_at(0, &mut small).unwrap(), 2);
    assert_eq!(&small, b"01");
  }

  #[test]
  fn chunked_reads_match_single_read() {
    let o = digits();
    o.modify(4, &b"abc"[..]).unwrap();
    o.modify(12, &b"z"[..]).unwrap();
    o.modify(5, &b"_"[..]).unwrap();

    let mut whole = vec![0u8; 13];
    assert_eq!(o.read_at(1, &mut whole[..12]).unwrap(), 12);

    let mut pieces = vec![];
    (&o).seek(SeekFrom::Start(1)).unwrap();
    let mut chunk = [0u8; 5];
    loop {
      let n = (&o).read(&mut chunk).unwrap();
      if n == 0 {
        break;
      }
      pieces.extend_from_slice(&chunk[..n]);
    }
    assert_eq!(pieces, &whole[..12]);
    assert_eq!(pieces, b"123a_c789\0\0z");
  }

  #[test]
  fn newer_patch_inside_older_one() {
    let o = digits();
    o.modify(1, &b"abcdefgh"[..]).unwrap();
    o.modify(4, &b"!"[..]).unwrap();
    o.modify(6, &b""[..]).unwrap();

    let mut whole = [0u8; 10];
    assert_eq!(o.read_at(0, &mut whole).unwrap(), 10);
    assert_eq!(&whole, b"0abc!efgh9");

    let mut bytewise = vec![];
    (&o).seek(SeekFrom::Start(0)).unwrap();
    let mut one = [0u8; 1];
    while (&o).read(&mut one).unwrap() == 1 {
      bytewise.push(one[0]);
    }
    assert_eq!(bytewise, &whole[..]);
  }

  #[test]
  fn write_appends_at_cursor() {
    let mut o = digits();
    o.seek(SeekFrom::Start(8)).unwrap();
    o.write_all(b"WXYZ").unwrap();
    assert_eq!(o.position(), 12);
    assert_eq!(o.virtual_size(), 12);
    assert_eq!(o.modification_count(), 1);
    assert_eq!(read_all(&o), b"01234567WXYZ");
    assert_eq!(o.write(b"").unwrap(), 0);
    assert_eq!(o.modification_count(), 1);
  }

  #[test]
  fn overflowing_modification_is_rejected() {
    let o = digits();
    assert!(matches!(
      o.modify(u64::MAX, &b"ab"[..]),
      Err(OverlayError::OffsetOverflow { .. })
    ));
    assert_eq!(o.modification_count(), 0);
    assert_eq!(o.virtual_size(), 10);
  }

  #[test]
  fn base_is_never_written() {
    let o = digits();
    o.modify(0, &b"zzzzzzzzzzzz"[..]).unwrap();
    let base = o.into_inner();
    assert_eq!(base.into_inner(), b"0123456789");
  }

  struct ShortReads(Cursor<Vec<u8>>);

  impl Read for ShortReads {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
      let n = buf.len().min(3);
      self.0.read(&mut buf[..n])
    }
  }

  impl Seek for ShortReads {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
      self.0.seek(pos)
    }
  }

  #[test]
  fn short_base_reads_are_resolved_again() {
    let o = Overlay::new(ShortReads(Cursor::new(b"abcdefghij".to_vec()))).unwrap();
    o.modify(5, &b"5"[..]).unwrap();
    let mut buf = [0u8; 10];
    assert_eq!(o.read_at(0, &mut buf).unwrap(), 10);
    assert_eq!(&buf, b"abcde5ghij");
  }

  /// Fails every read after the first `ok_reads`.
  struct Flaky {
    inner: Cursor<Vec<u8>>,
    ok_reads: usize,
  }

  impl Read for Flaky {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
      if self.ok_reads == 0 {
        return Err(io::Error::new(ErrorKind::Other, "disk on fire"));
      }
      self.ok_reads -= 1;
      self.inner.read(buf)
    }
  }

  impl Seek for Flaky {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
      self.inner.seek(pos)
    }
  }

  #[test]
  fn base_errors_propagate() {
    let o = Overlay::new(Flaky {
      inner: Cursor::new(b"0123456789".to_vec()),
      ok_reads: 1,
    })
    .unwrap();
    o.modify(4, &b"x"[..]).unwrap();

    let mut buf = [0u8; 10];
    // First run comes from the base, then the modification, then the base fails.
    assert_eq!(o.read_at(0, &mut buf).unwrap(), 5);
    assert_eq!(&buf[..5], b"0123x");
    assert_eq!(o.position(), 5);

    let e = (&o).read(&mut buf).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Other);
    assert_eq!(e.to_string(), "disk on fire");
  }

  struct Unseekable;

  impl Read for Unseekable {
    fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
      Ok(0)
    }
  }

  impl Seek for Unseekable {
    fn seek(&mut self, _: SeekFrom) -> io::Result<u64> {
      Err(io::Error::new(ErrorKind::Unsupported, "pipe"))
    }
  }

  #[test]
  fn construction_fails_when_base_cannot_seek() {
    assert!(matches!(
      Overlay::new(Unseekable),
      Err(OverlayError::Construction(_))
    ));
  }

  /// Can be measured, but refuses to go back to the start.
  struct NoRewind(Cursor<Vec<u8>>);

  impl Read for NoRewind {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
      self.0.read(buf)
    }
  }

  impl Seek for NoRewind {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
      match pos {
        SeekFrom::Start(_) => Err(io::Error::new(ErrorKind::Unsupported, "forward only")),
        pos => self.0.seek(pos),
      }
    }
  }

  #[test]
  fn construction_fails_when_base_cannot_rewind() {
    match Overlay::new(NoRewind(Cursor::new(b"abc".to_vec()))) {
      Err(OverlayError::Construction(e)) => assert_eq!(e.to_string(), "forward only"),
      _ => panic!("expected construction error"),
    }
  }
}
