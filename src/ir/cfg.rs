//! Control-flow graph over a linear instruction stream.
//!
//! The graph is a scoped resource, not a permanent representation: a method's
//! body lives in linear form, [`ControlFlowGraph::from_linear`] materializes
//! basic blocks for a transformation, and [`ControlFlowGraph::into_linear`]
//! writes the (possibly rewritten) blocks back, recomputing branch targets.
//! While the graph is built, branch instructions carry block ids in their
//! `target` field instead of linear indices.
//!
//! Reverse postorder and immediate dominators are computed at construction
//! (Cooper–Harvey–Kennedy over the RPO numbering) so forward passes can honor
//! dominance without their own graph bookkeeping.

use std::collections::{BTreeSet, HashMap};

use crate::{
    ir::Instruction,
    Error::Graph,
    Result,
};

/// Identity of a basic block within one method's graph.
///
/// Block ids are assigned in ascending leader order, so id order equals the
/// original layout order and conditional fall-through always reaches
/// `BlockId(id + 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

/// A maximal straight-line run of instructions.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// This block's id.
    pub id: BlockId,
    /// Instructions, terminator last (if the block has one).
    pub instructions: Vec<Instruction>,
    /// Successor blocks.
    pub succs: Vec<BlockId>,
    /// Predecessor blocks.
    pub preds: Vec<BlockId>,
}

/// Control-flow graph of one method body.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    blocks: Vec<BasicBlock>,
    entry: BlockId,
    rpo: Vec<BlockId>,
    idom: Vec<Option<BlockId>>,
}

impl ControlFlowGraph {
    /// Builds a graph from a linear instruction stream.
    ///
    /// Leaders are the entry, every branch target, and every instruction
    /// following a terminator. Branch `target` fields are rewritten from
    /// linear indices to block ids for the lifetime of the graph.
    ///
    /// # Errors
    ///
    /// Returns [`Graph`] if the stream is empty or a branch target does not
    /// begin an instruction.
    pub fn from_linear(code: &[Instruction]) -> Result<Self> {
        if code.is_empty() {
            return Err(Graph("cannot build a graph from an empty body".into()));
        }

        let mut leaders = BTreeSet::new();
        leaders.insert(0usize);
        for (i, instr) in code.iter().enumerate() {
            if let Some(target) = instr.target {
                if target >= code.len() {
                    return Err(Graph(format!(
                        "branch target {target} outside body of length {}",
                        code.len()
                    )));
                }
                leaders.insert(target);
            }
            if instr.opcode.is_terminator() && i + 1 < code.len() {
                leaders.insert(i + 1);
            }
        }

        let leader_list: Vec<usize> = leaders.iter().copied().collect();
        let mut offset_to_block = HashMap::new();
        for (id, &offset) in leader_list.iter().enumerate() {
            offset_to_block.insert(offset, BlockId(id));
        }

        let mut blocks = Vec::with_capacity(leader_list.len());
        for (id, &start) in leader_list.iter().enumerate() {
            let end = leader_list.get(id + 1).copied().unwrap_or(code.len());
            let mut instructions: Vec<Instruction> = code[start..end].to_vec();
            // Translate branch targets to block ids while the graph is built.
            if let Some(last) = instructions.last_mut() {
                if let Some(target) = last.target {
                    let block = offset_to_block.get(&target).copied().ok_or_else(|| {
                        Graph(format!("branch target {target} is not a leader"))
                    })?;
                    last.target = Some(block.0);
                }
            }
            blocks.push(BasicBlock {
                id: BlockId(id),
                instructions,
                succs: Vec::new(),
                preds: Vec::new(),
            });
        }

        let count = blocks.len();
        for id in 0..count {
            let succs = {
                let block = &blocks[id];
                match block.instructions.last() {
                    Some(last) if last.opcode.is_branch() => {
                        let target = BlockId(last.target.unwrap_or(0));
                        if last.opcode == crate::ir::Opcode::Goto {
                            vec![target]
                        } else {
                            let mut s = vec![target];
                            if id + 1 < count {
                                s.push(BlockId(id + 1));
                            }
                            s
                        }
                    }
                    Some(last) if last.opcode.is_terminator() => Vec::new(),
                    _ => {
                        if id + 1 < count {
                            vec![BlockId(id + 1)]
                        } else {
                            Vec::new()
                        }
                    }
                }
            };
            for succ in &succs {
                blocks[succ.0].preds.push(BlockId(id));
            }
            blocks[id].succs = succs;
        }

        let entry = BlockId(0);
        let rpo = Self::reverse_postorder(&blocks, entry);
        let idom = Self::immediate_dominators(&blocks, &rpo, entry);

        Ok(Self {
            blocks,
            entry,
            rpo,
            idom,
        })
    }

    /// Writes the blocks back into a linear instruction stream, translating
    /// branch targets from block ids to the new linear offsets.
    #[must_use]
    pub fn into_linear(self) -> Vec<Instruction> {
        let mut starts = Vec::with_capacity(self.blocks.len());
        let mut total = 0usize;
        for block in &self.blocks {
            starts.push(total);
            total += block.instructions.len();
        }

        let mut code = Vec::with_capacity(total);
        for block in self.blocks {
            let len = block.instructions.len();
            for (i, mut instr) in block.instructions.into_iter().enumerate() {
                if i + 1 == len && instr.opcode.is_branch() {
                    if let Some(target_block) = instr.target {
                        instr.target = Some(starts[target_block]);
                    }
                }
                code.push(instr);
            }
        }
        code
    }

    fn reverse_postorder(blocks: &[BasicBlock], entry: BlockId) -> Vec<BlockId> {
        let mut visited = vec![false; blocks.len()];
        let mut postorder = Vec::with_capacity(blocks.len());
        // Iterative DFS; the second stack entry marks "children done".
        let mut stack = vec![(entry, false)];
        while let Some((block, done)) = stack.pop() {
            if done {
                postorder.push(block);
                continue;
            }
            if visited[block.0] {
                continue;
            }
            visited[block.0] = true;
            stack.push((block, true));
            for &succ in blocks[block.0].succs.iter().rev() {
                if !visited[succ.0] {
                    stack.push((succ, false));
                }
            }
        }
        postorder.reverse();
        postorder
    }

    fn immediate_dominators(
        blocks: &[BasicBlock],
        rpo: &[BlockId],
        entry: BlockId,
    ) -> Vec<Option<BlockId>> {
        let mut rpo_num = vec![usize::MAX; blocks.len()];
        for (i, &b) in rpo.iter().enumerate() {
            rpo_num[b.0] = i;
        }

        let mut idom: Vec<Option<BlockId>> = vec![None; blocks.len()];
        idom[entry.0] = Some(entry);

        let intersect = |idom: &[Option<BlockId>], mut a: BlockId, mut b: BlockId| {
            while a != b {
                while rpo_num[a.0] > rpo_num[b.0] {
                    a = idom[a.0].unwrap_or(entry);
                }
                while rpo_num[b.0] > rpo_num[a.0] {
                    b = idom[b.0].unwrap_or(entry);
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;
            for &b in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &p in &blocks[b.0].preds {
                    if rpo_num[p.0] == usize::MAX || idom[p.0].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(cur) => intersect(&idom, p, cur),
                    });
                }
                if new_idom.is_some() && idom[b.0] != new_idom {
                    idom[b.0] = new_idom;
                    changed = true;
                }
            }
        }

        idom[entry.0] = None;
        idom
    }

    /// The entry block.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// All blocks, in id (layout) order. Includes unreachable blocks.
    #[must_use]
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    /// Mutable access to all blocks.
    pub fn blocks_mut(&mut self) -> &mut [BasicBlock] {
        &mut self.blocks
    }

    /// One block by id.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0]
    }

    /// Mutable access to one block.
    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.0]
    }

    /// Reachable blocks in reverse postorder.
    #[must_use]
    pub fn reverse_postorder_blocks(&self) -> &[BlockId] {
        &self.rpo
    }

    /// The immediate dominator of `block`, or `None` for the entry and for
    /// unreachable blocks.
    #[must_use]
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(block.0).copied().flatten()
    }
}
