//! The virtual register file.
//!
//! GPRs live in two private float arrays ("s" and "v") whose lengths are
//! late-bound: every access grows the tracked length, and the array length
//! constant is written once at finalize time. EXEC and VCC are pairs of
//! private 32-bit variables addressed as lo/hi halves.

use super::{Compiler, RegisterPointer, RegisterValue, VectorType};
use crate::bail_structural;
use crate::error::Result;
use crate::ins::ScalarType;
use rspirv::dr::{self, Builder};
use rspirv::spirv::{Op, StorageClass, Word};

/// A 32-bit constant whose value is only known after all code has been
/// emitted. The id is allocated up front; `resolve` writes the actual
/// OpConstant ahead of its first use.
pub(crate) struct LateConst32 {
    pub id: Word,
    type_id: Word,
    resolved: bool,
}

impl LateConst32 {
    pub fn new(builder: &mut Builder, type_id: Word) -> Self {
        LateConst32 {
            id: builder.id(),
            type_id,
            resolved: false,
        }
    }

    pub fn resolve(&mut self, builder: &mut Builder, value: u32) -> Result<()> {
        if self.resolved {
            bail_structural!("late constant {} resolved twice", self.id);
        }
        self.resolved = true;

        let inst = dr::Instruction::new(
            Op::Constant,
            Some(self.type_id),
            Some(self.id),
            vec![dr::Operand::LiteralBit32(value)],
        );
        let globals = &mut builder.module_mut().types_global_values;
        let first_use = globals
            .iter()
            .position(|i| {
                i.operands
                    .iter()
                    .any(|op| matches!(op, dr::Operand::IdRef(r) if *r == self.id))
            })
            .unwrap_or(globals.len());
        globals.insert(first_use, inst);
        Ok(())
    }
}

/// One of the two GPR arrays. `length` only ever grows; the final value is
/// the highest register index touched plus one.
pub(crate) struct GprArray {
    pub var_id: Word,
    pub length: u32,
    pub length_id: LateConst32,
}

impl GprArray {
    pub fn new(builder: &mut Builder, name: &str) -> Self {
        let f32_type = builder.type_float(32);
        let uint_type = builder.type_int(32, 0);
        let length_id = LateConst32::new(builder, uint_type);
        let array_type = builder.type_array(f32_type, length_id.id);
        let ptr_type = builder.type_pointer(None, StorageClass::Private, array_type);
        let var_id = builder.variable(ptr_type, None, StorageClass::Private, None);
        builder.name(var_id, name);
        GprArray {
            var_id,
            // An array type of length zero is not valid, so even an unused
            // file keeps one element.
            length: 1,
            length_id,
        }
    }

    fn notice(&mut self, index: u32) {
        self.length = self.length.max(index + 1);
    }
}

/// A 64-bit hardware state register (EXEC, VCC) split into two 32-bit
/// private variables.
#[derive(Clone, Copy)]
pub(crate) struct StateRegister {
    lo: Word,
    hi: Word,
}

impl StateRegister {
    pub fn new(builder: &mut Builder, name: &str) -> Self {
        let uint_type = builder.type_int(32, 0);
        let ptr_type = builder.type_pointer(None, StorageClass::Private, uint_type);
        let lo = builder.variable(ptr_type, None, StorageClass::Private, None);
        builder.name(lo, format!("{name}_lo"));
        let hi = builder.variable(ptr_type, None, StorageClass::Private, None);
        builder.name(hi, format!("{name}_hi"));
        StateRegister { lo, hi }
    }

    pub fn init(&self, builder: &mut Builder, lo_value: Word, hi_value: Word) -> Result<()> {
        builder.store(self.lo, lo_value, None, vec![])?;
        builder.store(self.hi, hi_value, None, vec![])?;
        Ok(())
    }

    pub fn load_half(&self, builder: &mut Builder, hi: bool) -> Result<Word> {
        let uint_type = builder.type_int(32, 0);
        let ptr = if hi { self.hi } else { self.lo };
        Ok(builder.load(uint_type, None, ptr, None, vec![])?)
    }

    pub fn store_half(&self, builder: &mut Builder, hi: bool, value: Word) -> Result<()> {
        let ptr = if hi { self.hi } else { self.lo };
        builder.store(ptr, value, None, vec![])?;
        Ok(())
    }
}

/// A register index: a static base plus offset, and optionally a relative
/// component computed at runtime. Only the static part can grow the array,
/// since the dynamic value is unknowable at compile time.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RegIndex {
    pub base: u32,
    pub offset: u32,
    pub relative: Option<Word>,
}

impl RegIndex {
    pub fn fixed(base: u32) -> Self {
        RegIndex {
            base,
            offset: 0,
            relative: None,
        }
    }
}

impl Compiler {
    /// Pointer to one 32-bit register slot. Registers are stored as floats;
    /// callers bitcast around this.
    pub(crate) fn gpr_ptr(&mut self, is_vgpr: bool, index: u32) -> Result<RegisterPointer> {
        self.gpr_ptr_indexed(is_vgpr, RegIndex::fixed(index))
    }

    pub(crate) fn gpr_ptr_indexed(
        &mut self,
        is_vgpr: bool,
        index: RegIndex,
    ) -> Result<RegisterPointer> {
        let f32_type = self.builder.type_float(32);
        let uint_type = self.builder.type_int(32, 0);
        let ptr_type = self
            .builder
            .type_pointer(None, StorageClass::Private, f32_type);
        let static_part = self.const_u32(index.base + index.offset);
        let index_id = match index.relative {
            Some(relative) => {
                self.builder
                    .i_add(uint_type, None, static_part, relative)?
            }
            None => static_part,
        };

        let array = if is_vgpr {
            &mut self.vgprs
        } else {
            &mut self.sgprs
        };
        array.notice(index.base + index.offset);
        let base = array.var_id;

        let id = self.builder.access_chain(ptr_type, None, base, [index_id])?;
        Ok(RegisterPointer {
            ty: VectorType::scalar(ScalarType::Float32),
            id,
        })
    }

    pub(crate) fn emit_gpr_load(&mut self, is_vgpr: bool, index: u32) -> Result<RegisterValue> {
        let ptr = self.gpr_ptr(is_vgpr, index)?;
        let f32_type = self.builder.type_float(32);
        let id = self.builder.load(f32_type, None, ptr.id, None, vec![])?;
        Ok(RegisterValue::new(ScalarType::Float32, 1, id))
    }

    pub(crate) fn emit_gpr_store(
        &mut self,
        is_vgpr: bool,
        index: u32,
        value: RegisterValue,
    ) -> Result<()> {
        let as_float = self.emit_reg_bitcast(value, ScalarType::Float32)?;
        let ptr = self.gpr_ptr(is_vgpr, index)?;
        self.builder.store(ptr.id, as_float.id, None, vec![])?;
        Ok(())
    }

    pub(crate) fn emit_vgpr_store_at(&mut self, index: u32, value: RegisterValue) -> Result<()> {
        self.emit_gpr_store(true, index, value)
    }

    pub(crate) fn emit_sgpr_store_at(&mut self, index: u32, value: RegisterValue) -> Result<()> {
        self.emit_gpr_store(false, index, value)
    }

    // --- buffer access paths ------------------------------------------------

    /// Load one dword from a uniform buffer. The buffer is typed as an array
    /// of vec4, so a dword offset splits into element and component indices.
    pub(crate) fn emit_uniform_buffer_load(
        &mut self,
        buffer_var: Word,
        dword_offset: RegisterValue,
    ) -> Result<RegisterValue> {
        let uint_type = self.builder.type_int(32, 0);
        let f32_type = self.builder.type_float(32);
        let ptr_type = self
            .builder
            .type_pointer(None, StorageClass::Uniform, f32_type);

        let two = self.const_u32(2);
        let three = self.const_u32(3);
        let element = self
            .builder
            .shift_right_logical(uint_type, None, dword_offset.id, two)?;
        let component = self
            .builder
            .bitwise_and(uint_type, None, dword_offset.id, three)?;

        let member = self.const_u32(0);
        let ptr = self
            .builder
            .access_chain(ptr_type, None, buffer_var, [member, element, component])?;
        let id = self.builder.load(f32_type, None, ptr, None, vec![])?;
        Ok(RegisterValue::new(ScalarType::Float32, 1, id))
    }

    /// Load one dword from a storage buffer, typed as a runtime array of
    /// uints with a dword granularity.
    pub(crate) fn emit_storage_buffer_load(
        &mut self,
        buffer_var: Word,
        dword_offset: RegisterValue,
    ) -> Result<RegisterValue> {
        let uint_type = self.builder.type_int(32, 0);
        let ptr_type = self
            .builder
            .type_pointer(None, StorageClass::Uniform, uint_type);
        let member = self.const_u32(0);
        let ptr = self
            .builder
            .access_chain(ptr_type, None, buffer_var, [member, dword_offset.id])?;
        let id = self.builder.load(uint_type, None, ptr, None, vec![])?;
        Ok(RegisterValue::new(ScalarType::Uint32, 1, id))
    }

    pub(crate) fn emit_storage_buffer_store(
        &mut self,
        buffer_var: Word,
        dword_offset: RegisterValue,
        value: RegisterValue,
    ) -> Result<()> {
        let uint_type = self.builder.type_int(32, 0);
        let ptr_type = self
            .builder
            .type_pointer(None, StorageClass::Uniform, uint_type);
        let member = self.const_u32(0);
        let ptr = self
            .builder
            .access_chain(ptr_type, None, buffer_var, [member, dword_offset.id])?;
        let as_uint = self.emit_reg_bitcast(value, ScalarType::Uint32)?;
        self.builder.store(ptr, as_uint.id, None, vec![])?;
        Ok(())
    }

    /// Load one dword from the local data share at a dword index.
    pub(crate) fn emit_lds_load(&mut self, dword_index: RegisterValue) -> Result<RegisterValue> {
        let lds = match self.lds {
            Some(id) => id,
            None => bail_structural!("data-share access without a declared LDS region"),
        };
        let uint_type = self.builder.type_int(32, 0);
        let ptr_type = self
            .builder
            .type_pointer(None, StorageClass::Workgroup, uint_type);
        let ptr = self
            .builder
            .access_chain(ptr_type, None, lds, [dword_index.id])?;
        let id = self.builder.load(uint_type, None, ptr, None, vec![])?;
        Ok(RegisterValue::new(ScalarType::Uint32, 1, id))
    }

    pub(crate) fn emit_lds_store(
        &mut self,
        dword_index: RegisterValue,
        value: RegisterValue,
    ) -> Result<()> {
        let lds = match self.lds {
            Some(id) => id,
            None => bail_structural!("data-share access without a declared LDS region"),
        };
        let uint_type = self.builder.type_int(32, 0);
        let ptr_type = self
            .builder
            .type_pointer(None, StorageClass::Workgroup, uint_type);
        let ptr = self
            .builder
            .access_chain(ptr_type, None, lds, [dword_index.id])?;
        let as_uint = self.emit_reg_bitcast(value, ScalarType::Uint32)?;
        self.builder.store(ptr, as_uint.id, None, vec![])?;
        Ok(())
    }
}
