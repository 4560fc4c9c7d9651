use std::fmt::{self, Display};
use std::ops::Index;

use itertools::Itertools;
use smallvec::SmallVec;

use crate::{Environment, Instruction, InstructionKind, Type};

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct InstrId(pub u32);

impl InstrId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct BlockId(pub u32);

impl BlockId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub(crate) id: BlockId,
    pub(crate) phis: Vec<InstrId>,
    pub(crate) instructions: Vec<InstrId>,
    pub(crate) predecessors: Vec<BlockId>,
    pub(crate) successors: Vec<BlockId>,
    pub(crate) loop_header: Option<BlockId>,
    pub(crate) is_in_try: bool,
    pub(crate) is_catch_block: bool,
}

impl BasicBlock {
    pub fn id(&self) -> BlockId {
        self.id
    }
    pub fn phis(&self) -> &[InstrId] {
        &self.phis
    }
    pub fn instructions(&self) -> &[InstrId] {
        &self.instructions
    }
    pub fn predecessors(&self) -> &[BlockId] {
        &self.predecessors
    }
    pub fn successors(&self) -> &[BlockId] {
        &self.successors
    }
    pub fn last_instruction(&self) -> Option<InstrId> {
        self.instructions.last().copied()
    }
    /// Header of the innermost loop containing this block.
    pub fn loop_header(&self) -> Option<BlockId> {
        self.loop_header
    }
    pub fn is_in_loop(&self) -> bool {
        self.loop_header.is_some()
    }
    pub fn is_loop_header(&self) -> bool {
        self.loop_header == Some(self.id)
    }
    pub fn is_in_try(&self) -> bool {
        self.is_in_try
    }
    pub fn is_catch_block(&self) -> bool {
        self.is_catch_block
    }
    pub fn is_try_catch(&self) -> bool {
        self.is_in_try || self.is_catch_block
    }
}

/// Control-flow graph of one method. Instructions and blocks live in arenas
/// owned by the graph and refer to each other by id.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    name: String,
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) blocks: Vec<BasicBlock>,
    pub(crate) reverse_post_order: Vec<BlockId>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock {
            id,
            ..Default::default()
        });
        id
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        self.blocks.first().map(|b| b.id)
    }

    pub fn set_try_catch(&mut self, block: BlockId, is_in_try: bool, is_catch_block: bool) {
        let b = &mut self.blocks[block.index()];
        b.is_in_try = is_in_try;
        b.is_catch_block = is_catch_block;
    }

    pub fn add_successor(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from.index()].successors.push(to);
        self.blocks[to.index()].predecessors.push(from);
    }

    pub fn add_instruction(
        &mut self,
        block: BlockId,
        kind: InstructionKind,
        ty: Type,
        inputs: &[InstrId],
    ) -> InstrId {
        let id = InstrId(self.instructions.len() as u32);
        let is_phi = kind.is_phi();
        self.instructions.push(Instruction {
            id,
            kind,
            ty,
            block,
            inputs: SmallVec::new(),
            uses: Vec::new(),
            environment: None,
            env_uses: Vec::new(),
        });
        if is_phi {
            self.blocks[block.index()].phis.push(id);
        } else {
            self.blocks[block.index()].instructions.push(id);
        }
        for &input in inputs {
            self.add_input(id, input);
        }
        id
    }

    pub fn add_phi(&mut self, block: BlockId, ty: Type) -> InstrId {
        self.add_instruction(block, InstructionKind::Phi, ty, &[])
    }

    pub fn add_input(&mut self, instr: InstrId, input: InstrId) {
        self.instructions[instr.index()].inputs.push(input);
        self.instructions[input.index()].uses.push(instr);
    }

    pub fn set_environment(&mut self, instr: InstrId, environment: Environment) {
        if let Some(old) = self.instructions[instr.index()].environment.take() {
            for value in old.iter() {
                let env_uses = &mut self.instructions[value.index()].env_uses;
                if let Some(pos) = env_uses.iter().position(|&u| u == instr) {
                    env_uses.remove(pos);
                }
            }
        }
        for value in environment.iter() {
            self.instructions[value.index()].env_uses.push(instr);
        }
        self.instructions[instr.index()].environment = Some(environment);
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn instruction(&self, id: InstrId) -> &Instruction {
        &self.instructions[id.index()]
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter()
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    pub fn parameter_count(&self) -> usize {
        self.instructions
            .iter()
            .filter_map(|instr| match instr.kind {
                InstructionKind::ParameterValue(index) => Some(index as usize + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    pub fn reverse_post_order(&self) -> &[BlockId] {
        &self.reverse_post_order
    }

    /// Computes the reverse post order and loop information. Must be called
    /// once the control flow is complete.
    pub fn finalize(&mut self) {
        self.compute_reverse_post_order();
        self.analyze_loops();
    }

    /// Replaces the order of the non-phi instructions of `block`.
    ///
    /// # Panics
    /// Panics if `new_order` is not a permutation of the current order.
    pub fn reorder_block(&mut self, block: BlockId, new_order: Vec<InstrId>) {
        let b = &mut self.blocks[block.index()];
        assert!(
            b.instructions.iter().sorted().eq(new_order.iter().sorted()),
            "new order of {block} is not a permutation of its instructions"
        );
        b.instructions = new_order;
    }

    pub fn value_name(&self, id: InstrId) -> String {
        format!("{}{}", self.instruction(id).ty.prefix(), id.0)
    }

    fn fmt_instruction(&self, f: &mut fmt::Formatter<'_>, id: InstrId) -> fmt::Result {
        let instr = self.instruction(id);
        write!(f, "    {}: {}", self.value_name(id), instr.kind)?;
        if !instr.inputs.is_empty() {
            write!(
                f,
                " [{}]",
                instr.inputs.iter().map(|&i| self.value_name(i)).join(", ")
            )?;
        }
        if let Some(env) = &instr.environment {
            write!(
                f,
                " env[{}]",
                env.values
                    .iter()
                    .map(|v| v.map_or_else(|| "_".to_string(), |v| self.value_name(v)))
                    .join(", ")
            )?;
        }
        writeln!(f)
    }
}

impl Index<InstrId> for Graph {
    type Output = Instruction;

    fn index(&self, id: InstrId) -> &Self::Output {
        self.instruction(id)
    }
}

impl Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "method {} {{", self.name)?;
        for block in &self.blocks {
            write!(f, "  {}", block.id)?;
            if block.is_in_try {
                write!(f, " try")?;
            }
            if block.is_catch_block {
                write!(f, " catch")?;
            }
            if !block.successors.is_empty() {
                write!(f, " -> {}", block.successors.iter().join(", "))?;
            }
            writeln!(f, " {{")?;
            for &id in block.phis.iter().chain(&block.instructions) {
                self.fmt_instruction(f, id)?;
            }
            writeln!(f, "  }}")?;
        }
        writeln!(f, "}}")
    }
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub methods: Vec<Graph>,
}

impl Module {
    pub fn method(&self, name: &str) -> Option<&Graph> {
        self.methods.iter().find(|m| m.name() == name)
    }
}

impl Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, method) in self.methods.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{method}")?;
        }
        Ok(())
    }
}
