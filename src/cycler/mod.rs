use crate::bytecode::{Chunk, OP_JUMP, PatchError, PatchList};

#[derive(Debug)]
struct CycleFrame {
    /// Where `continue` lands.
    start: usize,
    /// Scope depth outside the loop body.
    depth: usize,
    breaks: PatchList,
    continues: PatchList,
}

/// Bookkeeping for `break` and `continue` in nested loops.
#[derive(Debug, Default)]
pub struct Cycler {
    frames: Vec<CycleFrame>,
}

impl Cycler {
    pub fn new() -> Self {
        Cycler::default()
    }

    pub fn start_parse_cycle(&mut self, start: usize, depth: usize) {
        self.frames.push(CycleFrame { start, depth, breaks: PatchList::new(), continues: PatchList::new() });
    }

    pub fn is_cycle(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Scope depth of the innermost loop.
    pub fn depth(&self) -> Option<usize> {
        self.frames.last().map(|f| f.depth)
    }

    /// Emits the jump for `break`. Returns false outside a loop.
    pub fn parse_break(&mut self, chunk: &mut Chunk, line: u32) -> bool {
        let Some(frame) = self.frames.last_mut() else {
            return false;
        };
        frame.breaks.push(chunk.write_jump(OP_JUMP, line));
        true
    }

    /// Emits the jump for `continue`. Returns false outside a loop.
    pub fn parse_continue(&mut self, chunk: &mut Chunk, line: u32) -> bool {
        let Some(frame) = self.frames.last_mut() else {
            return false;
        };
        frame.continues.push(chunk.write_jump(OP_JUMP, line));
        true
    }

    /// `for` loops continue at the increment clause, which is only known
    /// once the body has been compiled.
    pub fn change_start_offset(&mut self, start: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.start = start;
        }
    }

    /// Patches breaks to the current end of code and continues to the loop
    /// start.
    pub fn end_parse_cycle(&mut self, chunk: &mut Chunk) -> Result<(), PatchError> {
        let Some(frame) = self.frames.pop() else {
            return Ok(());
        };
        let end = chunk.len();
        frame.breaks.patch_all(chunk, end)?;
        frame.continues.patch_all(chunk, frame.start)
    }
}
