use crate::address::{Address, SegmentKind};

/// Append-only byte buffer for one address space. Its length is the next
/// address that will be assigned in that space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    bytes: Vec<u8>,
}
impl Segment {
    pub fn new(kind: SegmentKind) -> Self { Segment { kind, bytes: Vec::new() } }
    pub fn push(&mut self, b: u8) { self.bytes.push(b) }
    pub fn extend(&mut self, b: &[u8]) { self.bytes.extend_from_slice(b) }
    pub fn clear(&mut self) { self.bytes.clear() }
    pub fn len(&self) -> usize { self.bytes.len() }
    pub fn is_empty(&self) -> bool { self.bytes.is_empty() }
    pub fn bytes(&self) -> &[u8] { &self.bytes }
    /// Overwrite a byte that was emitted earlier (used when fixups are applied).
    pub fn patch(&mut self, offset: usize, b: u8) -> bool {
        match self.bytes.get_mut(offset) {
            Some(slot) => {
                *slot = b;
                true
            }
            None => false,
        }
    }
    /// The address of the next byte to be appended.
    pub fn tail(&self) -> Address { Address::in_segment(self.kind, self.bytes.len() as u16) }
}

/// One segment per address space, indexed by [`SegmentKind`].
pub fn new_segments() -> [Segment; 3] {
    [
        Segment::new(SegmentKind::Code),
        Segment::new(SegmentKind::Data),
        Segment::new(SegmentKind::ZeroPage),
    ]
}
