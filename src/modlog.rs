/// A single byte-range override. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Modification {
  pub offset: u64,
  pub data: Vec<u8>,
}

impl Modification {
  /// One past the last byte covered. Callers must have checked for overflow.
  pub fn end(&self) -> u64 {
    self.offset + self.data.len() as u64
  }

  pub fn contains(&self, pos: u64) -> bool {
    pos >= self.offset && pos < self.end()
  }
}

/// Append-only sequence of modifications, kept in insertion order.
///
/// Entries are never merged, reordered or removed. Lookups resolve overlaps by
/// recency: the most recently appended entry covering a position wins.
#[derive(Default, Debug)]
pub struct ModificationLog {
  entries: Vec<Modification>,
}

impl ModificationLog {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, m: Modification) {
    self.entries.push(m);
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Modification> {
    self.entries.iter()
  }

  /// Newest entry containing `pos`, with the end of the run over which it
  /// stays the winner. The run is cut where a newer entry begins.
  pub fn covering_run(&self, pos: u64) -> Option<(&Modification, u64)> {
    let i = self.entries.iter().rposition(|m| m.contains(pos))?;
    let m = &self.entries[i];
    // Newer entries do not contain `pos`, so any that overlap the rest of `m`
    // start after it.
    let end = self.entries[i + 1..]
      .iter()
      .filter(|n| !n.data.is_empty() && n.offset > pos)
      .map(|n| n.offset)
      .fold(m.end(), u64::min);
    Some((m, end))
  }

  /// Smallest entry offset strictly greater than `pos`.
  ///
  /// Together with `covering_run` returning `None`, this bounds the maximal run
  /// starting at `pos` that no modification touches.
  pub fn next_boundary(&self, pos: u64) -> Option<u64> {
    self
      .entries
      .iter()
      .map(|m| m.offset)
      .filter(|&off| off > pos)
      .min()
  }

  /// Largest end offset over all entries.
  pub fn extent(&self) -> Option<u64> {
    self.entries.iter().map(|m| m.end()).max()
  }
}
