//! Decoded GCN instruction records.
//!
//! These are the structured records the binary disassembler produces; the
//! compiler consumes them read-only. Operand fields and inline constants
//! follow the GCN SSRC encoding.

/// Scalar component type of a register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Uint32,
    Sint32,
    Float32,
    Float16,
    Uint64,
    Sint64,
    Float64,
    Bool,
}

impl ScalarType {
    /// 64-bit logical types occupy two consecutive 32-bit register slots.
    pub fn is_double(self) -> bool {
        matches!(self, Self::Uint64 | Self::Sint64 | Self::Float64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float16 | Self::Float32 | Self::Float64)
    }

    /// The 32-bit half type of a 64-bit integer type.
    pub fn half_type(self) -> Option<ScalarType> {
        match self {
            Self::Uint64 => Some(Self::Uint32),
            Self::Sint64 => Some(Self::Sint32),
            _ => None,
        }
    }
}

/// Component write/read mask over a 4-component register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegMask(pub u8);

impl RegMask {
    pub fn new(bits: u8) -> Self {
        RegMask(bits & 0xf)
    }

    /// Mask selecting exactly one component.
    pub fn select(component: u32) -> Self {
        RegMask(1 << component)
    }

    /// Mask selecting the first `n` components.
    pub fn first_n(n: u32) -> Self {
        RegMask(((1u32 << n) - 1) as u8)
    }

    pub fn test(self, component: u32) -> bool {
        component < 4 && (self.0 >> component) & 1 != 0
    }

    pub fn pop_count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn first_set(self) -> u32 {
        self.0.trailing_zeros()
    }
}

/// Component reordering applied on top of a mask.
#[derive(Debug, Clone, Copy)]
pub struct RegSwizzle([u8; 4]);

impl RegSwizzle {
    pub fn new(x: u8, y: u8, z: u8, w: u8) -> Self {
        RegSwizzle([x, y, z, w])
    }

    pub fn identity() -> Self {
        RegSwizzle([0, 1, 2, 3])
    }

    pub fn component(self, i: u32) -> u32 {
        self.0[i as usize] as u32
    }
}

/// Where an operand's bits come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandField {
    ScalarGpr,
    VccLo,
    VccHi,
    M0,
    ExecLo,
    ExecHi,
    ConstZero,
    SignedConstIntPos,
    SignedConstIntNeg,
    ConstFloatPos05,
    ConstFloatNeg05,
    ConstFloatPos10,
    ConstFloatNeg10,
    ConstFloatPos20,
    ConstFloatNeg20,
    ConstFloatPos40,
    ConstFloatNeg40,
    VccZ,
    ExecZ,
    Scc,
    LdsDirect,
    LiteralConst,
    VectorGpr,
    Undefined,
}

/// Input modifiers applied when an operand is loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputModifiers {
    pub abs: bool,
    pub neg: bool,
}

/// Output modifiers applied before a result is stored.
/// Only meaningful for floating-point destinations.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OutputModifiers {
    pub multiplier: Option<f32>,
    pub clamp: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Operand {
    pub field: OperandField,
    pub ty: ScalarType,
    pub code: u32,
    pub input_modifier: InputModifiers,
    pub output_modifier: OutputModifiers,
    pub literal: u32,
}

impl Default for Operand {
    fn default() -> Self {
        Operand {
            field: OperandField::Undefined,
            ty: ScalarType::Float32,
            code: 0,
            input_modifier: InputModifiers::default(),
            output_modifier: OutputModifiers::default(),
            literal: 0,
        }
    }
}

impl Operand {
    pub fn sgpr(code: u32, ty: ScalarType) -> Self {
        Operand {
            field: OperandField::ScalarGpr,
            ty,
            code,
            ..Default::default()
        }
    }

    pub fn vgpr(code: u32, ty: ScalarType) -> Self {
        Operand {
            field: OperandField::VectorGpr,
            ty,
            code,
            ..Default::default()
        }
    }

    pub fn literal(value: u32, ty: ScalarType) -> Self {
        Operand {
            field: OperandField::LiteralConst,
            ty,
            literal: value,
            ..Default::default()
        }
    }

    pub fn vcc(ty: ScalarType) -> Self {
        Operand {
            field: OperandField::VccLo,
            ty,
            ..Default::default()
        }
    }

    pub fn exec(ty: ScalarType) -> Self {
        Operand {
            field: OperandField::ExecLo,
            ty,
            ..Default::default()
        }
    }
}

/// Handler family an instruction is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstCategory {
    ScalarAlu,
    ScalarMemory,
    VectorAlu,
    VectorMemory,
    FlowControl,
    DataShare,
    VectorInterpolation,
    Export,
    DebugProfile,
    Undefined,
}

/// The opcode subset exercised by the target titles. Anything outside this
/// set never reaches the compiler as it is rejected at decode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    // Scalar ALU
    SMovB32,
    SMovB64,
    SAndB32,
    SAndB64,
    SOrB64,
    SAndn2B64,
    SAddU32,
    SMulI32,
    SCmpEqU32,
    SCmpLgU32,
    SAndSaveexecB64,

    // Scalar memory
    SLoadDwordx4,
    SLoadDwordx8,
    SBufferLoadDword,
    SBufferLoadDwordx2,
    SBufferLoadDwordx4,

    // Vector ALU
    VMovB32,
    VAddF32,
    VSubF32,
    VMulF32,
    VMacF32,
    VMadF32,
    VMaxF32,
    VMinF32,
    VRcpF32,
    VSqrtF32,
    VCvtF32U32,
    VCvtU32F32,
    VCvtPkrtzF16F32,
    VCmpEqF32,
    VCmpNeqF32,
    VCndmaskB32,

    // Vector memory
    BufferLoadDword,
    BufferLoadDwordx2,
    BufferLoadDwordx4,
    BufferStoreDword,

    // Flow control
    SEndpgm,
    SWaitcnt,
    SBarrier,
    SBranch,
    SCbranchScc0,
    SCbranchScc1,
    SCbranchVccz,
    SCbranchVccnz,
    SCbranchExecz,
    SCbranchExecnz,

    // Data share
    DsReadB32,
    DsWriteB32,

    // Vector interpolation
    VInterpP1F32,
    VInterpP2F32,

    // Export
    Exp,

    // Debug / profile
    SNop,
    STtracedata,
}

/// Where an export instruction writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportTarget {
    Mrt(u32),
    MrtZ,
    Null,
    Pos(u32),
    Param(u32),
}

#[derive(Debug, Clone, Copy)]
pub struct ExpControl {
    pub target: ExportTarget,
    /// Component enable mask.
    pub en: RegMask,
    /// Sources are packed f16 pairs.
    pub compr: bool,
    pub done: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct SmrdControl {
    /// Dword offset when `imm`, otherwise unused (offset comes from an SGPR
    /// operand).
    pub offset: u32,
    pub imm: bool,
    /// Number of dwords transferred.
    pub count: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct MubufControl {
    /// Unsigned byte offset added to the address.
    pub offset: u32,
    /// Number of dwords transferred.
    pub count: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct DsControl {
    /// Unsigned byte offset added to the address.
    pub offset: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct VintrpControl {
    /// Attribute (input parameter) index.
    pub attr: u32,
    /// Component channel within the attribute.
    pub chan: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct SoppControl {
    /// Signed dword offset relative to the next instruction.
    pub simm: i16,
}

/// Per-encoding control payload.
#[derive(Debug, Clone, Copy)]
pub enum InstControl {
    None,
    Exp(ExpControl),
    Smrd(SmrdControl),
    Mubuf(MubufControl),
    Ds(DsControl),
    Vintrp(VintrpControl),
    Sopp(SoppControl),
}

/// One decoded instruction. Immutable once decoded.
#[derive(Debug, Clone, Copy)]
pub struct Instruction {
    pub opcode: Opcode,
    pub category: InstCategory,
    pub src: [Operand; 4],
    pub dst: [Operand; 2],
    pub src_count: u32,
    pub dst_count: u32,
    pub control: InstControl,
    /// Encoded length in bytes, drives the program counter cursor.
    pub length: u32,
}

impl Instruction {
    pub fn new(opcode: Opcode, category: InstCategory) -> Self {
        Instruction {
            opcode,
            category,
            src: [Operand::default(); 4],
            dst: [Operand::default(); 2],
            src_count: 0,
            dst_count: 0,
            control: InstControl::None,
            length: 4,
        }
    }

    pub fn with_src(mut self, operands: &[Operand]) -> Self {
        for (i, op) in operands.iter().enumerate() {
            self.src[i] = *op;
        }
        self.src_count = operands.len() as u32;
        self
    }

    pub fn with_dst(mut self, operands: &[Operand]) -> Self {
        for (i, op) in operands.iter().enumerate() {
            self.dst[i] = *op;
        }
        self.dst_count = operands.len() as u32;
        self
    }

    pub fn with_control(mut self, control: InstControl) -> Self {
        self.control = control;
        self
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = length;
        self
    }
}
