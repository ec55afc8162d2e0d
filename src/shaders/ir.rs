//! A minimal kernel program representation.
//!
//! Programs are straight-line SSA over 64-bit integers with structured `if`. That is enough
//! for kernels that patch memory, and it can be both handed to a compiler and executed by the
//! reference interpreter in [`crate::run`].

/// A value computed by one instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(pub(crate) u32);

/// Width of a memory access. Loads zero extend, stores truncate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Width {
    W32,
    W64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    And,
    Or,
    /// Shift left, by the shift amount modulo 64.
    Shl,
    Shr,
    /// One if equal, else zero.
    Eq,
    Ne,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Const(u64),
    /// Read from the kernel parameters.
    LoadParam { offset: u32, width: Width },
    Load { address: Value, width: Width },
    Store { address: Value, value: Value, width: Width },
    Binary { op: BinOp, lhs: Value, rhs: Value },
    /// Leading zeros of the low 32 bits.
    Clz32(Value),
    If { cond: Value, then: Block, otherwise: Block },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    /// The value defined. Stores and `if` define a value that is never read.
    pub dst: Value,
    pub op: Op,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Block {
    pub instructions: Vec<Instruction>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Program {
    pub body: Block,
    /// Number of values, an upper bound of every `Value` in the program.
    pub values: u32,
}

/// Records a program.
///
/// Nested blocks are recorded through closures, which keeps every value defined inside a block
/// scoped to it.
#[derive(Debug)]
pub struct Builder {
    next: u32,
    blocks: Vec<Block>,
}

impl Builder {
    pub fn new() -> Self {
        Builder {
            next: 0,
            blocks: vec![Block::default()],
        }
    }

    pub fn constant(&mut self, value: u64) -> Value {
        self.push(Op::Const(value))
    }

    pub fn load_param(&mut self, offset: u32, width: Width) -> Value {
        self.push(Op::LoadParam { offset, width })
    }

    pub fn load(&mut self, address: Value, width: Width) -> Value {
        self.push(Op::Load { address, width })
    }

    pub fn store(&mut self, address: Value, value: Value, width: Width) {
        self.push(Op::Store {
            address,
            value,
            width,
        });
    }

    pub fn binary(&mut self, op: BinOp, lhs: Value, rhs: Value) -> Value {
        self.push(Op::Binary { op, lhs, rhs })
    }

    pub fn add(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinOp::Add, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinOp::Sub, lhs, rhs)
    }

    pub fn and(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinOp::And, lhs, rhs)
    }

    pub fn or(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinOp::Or, lhs, rhs)
    }

    pub fn shl(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinOp::Shl, lhs, rhs)
    }

    pub fn shr(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinOp::Shr, lhs, rhs)
    }

    pub fn clz32(&mut self, value: Value) -> Value {
        self.push(Op::Clz32(value))
    }

    /// `base + offset` for a constant offset.
    pub fn offset(&mut self, base: Value, offset: u64) -> Value {
        let offset = self.constant(offset);
        self.add(base, offset)
    }

    pub fn if_else(
        &mut self,
        cond: Value,
        then: impl FnOnce(&mut Self),
        otherwise: impl FnOnce(&mut Self),
    ) {
        let then = self.record(then);
        let otherwise = self.record(otherwise);
        self.push(Op::If {
            cond,
            then,
            otherwise,
        });
    }

    pub fn finish(mut self) -> Program {
        let body = self.blocks.pop().unwrap_or_default();
        Program {
            body,
            values: self.next,
        }
    }

    fn record(&mut self, build: impl FnOnce(&mut Self)) -> Block {
        self.blocks.push(Block::default());
        build(self);
        self.blocks.pop().unwrap_or_default()
    }

    fn push(&mut self, op: Op) -> Value {
        let dst = Value(self.next);
        self.next += 1;

        if let Some(block) = self.blocks.last_mut() {
            block.instructions.push(Instruction { dst, op });
        }

        dst
    }
}

impl Default for Builder {
    fn default() -> Self {
        Builder::new()
    }
}

impl Program {
    /// Visit every instruction, including those of nested blocks, in program order.
    pub fn visit(&self, visitor: &mut dyn FnMut(&Instruction)) {
        fn walk(block: &Block, visitor: &mut dyn FnMut(&Instruction)) {
            for inst in &block.instructions {
                visitor(inst);
                if let Op::If { then, otherwise, .. } = &inst.op {
                    walk(then, visitor);
                    walk(otherwise, visitor);
                }
            }
        }

        walk(&self.body, visitor)
    }

    /// The parameter bytes read by the program, as `(offset, size)` pairs in program order.
    pub fn param_reads(&self) -> Vec<(u32, u32)> {
        let mut reads = vec![];
        self.visit(&mut |inst| {
            if let Op::LoadParam { offset, width } = inst.op {
                reads.push((offset, width.bytes()));
            }
        });
        reads
    }
}

impl Width {
    pub fn bytes(self) -> u32 {
        match self {
            Width::W32 => 4,
            Width::W64 => 8,
        }
    }
}

impl BinOp {
    pub fn apply(self, lhs: u64, rhs: u64) -> u64 {
        match self {
            BinOp::Add => lhs.wrapping_add(rhs),
            BinOp::Sub => lhs.wrapping_sub(rhs),
            BinOp::And => lhs & rhs,
            BinOp::Or => lhs | rhs,
            BinOp::Shl => lhs << (rhs & 63),
            BinOp::Shr => lhs >> (rhs & 63),
            BinOp::Eq => u64::from(lhs == rhs),
            BinOp::Ne => u64::from(lhs != rhs),
        }
    }
}
