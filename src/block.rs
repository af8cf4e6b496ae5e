//! Open IF and DO blocks. Each entry holds the auto-label ids that stand for
//! jump targets whose addresses are not known when the block opens.
use crate::error::SourcePos;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
    If {
        /// target of the failed condition; `None` once ELSE has been seen
        else_id: Option<u16>,
        end_id: u16,
    },
    While {
        /// start of the loop body after the WHILE test
        begin_id: u16,
        /// loop top, where WEND jumps back to
        repeat_id: u16,
        end_id: u16,
        /// a WHILE has already been compiled for this DO
        tested: bool,
    },
}
impl Block {
    pub fn name(&self) -> &'static str {
        match self {
            Block::If { .. } => "IF",
            Block::While { .. } => "DO",
        }
    }
    /// Auto-labels still waiting for an address if the block is closed here.
    pub fn pending_ids(&self) -> Vec<u16> {
        match *self {
            Block::If { else_id, end_id } => else_id.into_iter().chain(Some(end_id)).collect(),
            Block::While { begin_id, end_id, tested, .. } => {
                if tested {
                    vec![end_id]
                } else {
                    vec![begin_id, end_id]
                }
            }
        }
    }
}

/// Open blocks, innermost last, each with the position of the statement that opened it.
#[derive(Debug, Default)]
pub struct BlockStack {
    stack: Vec<(Block, SourcePos)>,
}
impl BlockStack {
    pub fn new() -> Self { BlockStack::default() }
    pub fn push(&mut self, b: Block, pos: SourcePos) { self.stack.push((b, pos)) }
    pub fn pop(&mut self) -> Option<Block> { self.stack.pop().map(|(b, _)| b) }
    pub fn top(&self) -> Option<&Block> { self.stack.last().map(|(b, _)| b) }
    pub fn top_mut(&mut self) -> Option<&mut Block> { self.stack.last_mut().map(|(b, _)| b) }
    pub fn clear(&mut self) { self.stack.clear() }
    pub fn is_empty(&self) -> bool { self.stack.is_empty() }
    pub fn len(&self) -> usize { self.stack.len() }
    /// Remove every open block, innermost first.
    pub fn drain(&mut self) -> Vec<(Block, SourcePos)> {
        let mut all = std::mem::take(&mut self.stack);
        all.reverse();
        all
    }
    /// True if some open block (not necessarily the innermost) is an IF.
    pub fn has_if(&self) -> bool { self.stack.iter().any(|(b, _)| matches!(b, Block::If { .. })) }
    /// True if some open block is a DO.
    pub fn has_while(&self) -> bool { self.stack.iter().any(|(b, _)| matches!(b, Block::While { .. })) }
}
