//! Value-level operations and operand access.
//!
//! Everything here works on [`RegisterValue`]s, which are pure SSA: no
//! operation mutates its inputs. The operand load/store pair at the bottom
//! maps GCN operand fields (GPRs, state registers, inline constants,
//! literals) onto the register file.

use super::{Compiler, RegisterValue, RegisterValuePair, VectorType};
use crate::error::Result;
use crate::ins::{
    InputModifiers, Operand, OperandField, OutputModifiers, RegMask, RegSwizzle, ScalarType,
};
use crate::{bail_structural, bail_unsupported};
use rspirv::dr;
use rspirv::spirv::{self, Word};

impl Compiler {
    /// Reinterpret a value as another 32-bit scalar type. Never converts.
    pub(crate) fn emit_reg_bitcast(
        &mut self,
        value: RegisterValue,
        ty: ScalarType,
    ) -> Result<RegisterValue> {
        if value.ty.ctype == ty {
            return Ok(value);
        }
        if value.ty.ctype == ScalarType::Bool || ty == ScalarType::Bool {
            bail_unsupported!("bitcast involving a boolean register value");
        }
        let result_type = self.vector_type_id(VectorType::new(ty, value.ty.ccount))?;
        let id = self.builder.bitcast(result_type, None, value.id)?;
        Ok(RegisterValue {
            ty: VectorType::new(ty, value.ty.ccount),
            id,
        })
    }

    /// Select the components named by `mask`, preserving their order.
    pub(crate) fn emit_register_extract(
        &mut self,
        value: RegisterValue,
        mask: RegMask,
    ) -> Result<RegisterValue> {
        if mask == RegMask::first_n(value.ty.ccount) {
            return Ok(value);
        }
        self.emit_register_swizzle(value, RegSwizzle::identity(), mask)
    }

    /// Write the components of `src` into the `mask` positions of `dst`.
    pub(crate) fn emit_register_insert(
        &mut self,
        dst: RegisterValue,
        src: RegisterValue,
        mask: RegMask,
    ) -> Result<RegisterValue> {
        if dst.ty.ccount == 1 {
            return Ok(src);
        }
        let result_type = self.vector_type_id(dst.ty)?;

        let id = if src.ty.ccount == 1 {
            self.builder
                .composite_insert(result_type, None, src.id, dst.id, [mask.first_set()])?
        } else {
            let mut next_src = 0u32;
            let mut indices = Vec::with_capacity(dst.ty.ccount as usize);
            for c in 0..dst.ty.ccount {
                if mask.test(c) {
                    indices.push(dst.ty.ccount + next_src);
                    next_src += 1;
                } else {
                    indices.push(c);
                }
            }
            self.builder
                .vector_shuffle(result_type, None, dst.id, src.id, indices)?
        };
        Ok(RegisterValue { ty: dst.ty, id })
    }

    /// Apply a swizzle and mask in one shuffle.
    pub(crate) fn emit_register_swizzle(
        &mut self,
        value: RegisterValue,
        swizzle: RegSwizzle,
        mask: RegMask,
    ) -> Result<RegisterValue> {
        let ccount = mask.pop_count();
        let result_vtype = VectorType::new(value.ty.ctype, ccount);
        let result_type = self.vector_type_id(result_vtype)?;

        let id = if ccount == 1 {
            self.builder.composite_extract(
                result_type,
                None,
                value.id,
                [swizzle.component(mask.first_set())],
            )?
        } else {
            let indices: Vec<u32> = (0..value.ty.ccount)
                .filter(|&c| mask.test(c))
                .map(|c| swizzle.component(c))
                .collect();
            self.builder
                .vector_shuffle(result_type, None, value.id, value.id, indices)?
        };
        Ok(RegisterValue {
            ty: result_vtype,
            id,
        })
    }

    /// Concatenate two values into one wider vector.
    pub(crate) fn emit_register_concat(
        &mut self,
        a: RegisterValue,
        b: RegisterValue,
    ) -> Result<RegisterValue> {
        let result_vtype = VectorType::new(a.ty.ctype, a.ty.ccount + b.ty.ccount);
        let result_type = self.vector_type_id(result_vtype)?;
        let id = self
            .builder
            .composite_construct(result_type, None, [a.id, b.id])?;
        Ok(RegisterValue {
            ty: result_vtype,
            id,
        })
    }

    /// Broadcast a scalar to `ccount` components.
    pub(crate) fn emit_register_extend(
        &mut self,
        value: RegisterValue,
        ccount: u32,
    ) -> Result<RegisterValue> {
        if ccount == 1 {
            return Ok(value);
        }
        let result_vtype = VectorType::new(value.ty.ctype, ccount);
        let result_type = self.vector_type_id(result_vtype)?;
        let parts = vec![value.id; ccount as usize];
        let id = self.builder.composite_construct(result_type, None, parts)?;
        Ok(RegisterValue {
            ty: result_vtype,
            id,
        })
    }

    pub(crate) fn emit_register_absolute(
        &mut self,
        value: RegisterValue,
    ) -> Result<RegisterValue> {
        let result_type = self.vector_type_id(value.ty)?;
        let op = match value.ty.ctype {
            t if t.is_float() => spirv::GLOp::FAbs,
            ScalarType::Sint32 | ScalarType::Sint64 => spirv::GLOp::SAbs,
            _ => return Ok(value),
        };
        let id = self.builder.ext_inst(
            result_type,
            None,
            self.glsl_std450,
            op as u32,
            [dr::Operand::IdRef(value.id)],
        )?;
        Ok(RegisterValue { ty: value.ty, id })
    }

    pub(crate) fn emit_register_negate(&mut self, value: RegisterValue) -> Result<RegisterValue> {
        let result_type = self.vector_type_id(value.ty)?;
        let id = if value.ty.ctype.is_float() {
            self.builder.f_negate(result_type, None, value.id)?
        } else {
            self.builder.s_negate(result_type, None, value.id)?
        };
        Ok(RegisterValue { ty: value.ty, id })
    }

    /// Compare a 32-bit scalar against zero, producing a bool.
    pub(crate) fn emit_register_zero_test(
        &mut self,
        value: RegisterValue,
    ) -> Result<RegisterValue> {
        let as_uint = self.emit_reg_bitcast(value, ScalarType::Uint32)?;
        let bool_type = self.scalar_type_id(ScalarType::Bool)?;
        let zero = self.const_u32(0);
        let id = self.builder.i_equal(bool_type, None, as_uint.id, zero)?;
        Ok(RegisterValue::new(ScalarType::Bool, 1, id))
    }

    /// Turn a bool into the canonical GCN 0/1 dword.
    pub(crate) fn emit_bool_to_uint(&mut self, value: RegisterValue) -> Result<RegisterValue> {
        let uint_type = self.scalar_type_id(ScalarType::Uint32)?;
        let one = self.const_u32(1);
        let zero = self.const_u32(0);
        let id = self.builder.select(uint_type, None, value.id, one, zero)?;
        Ok(RegisterValue::new(ScalarType::Uint32, 1, id))
    }

    pub(crate) fn emit_input_modifiers(
        &mut self,
        value: RegisterValue,
        modifiers: InputModifiers,
    ) -> Result<RegisterValue> {
        let mut value = value;
        if modifiers.abs {
            value = self.emit_register_absolute(value)?;
        }
        if modifiers.neg {
            value = self.emit_register_negate(value)?;
        }
        Ok(value)
    }

    /// Output multiplier and clamp. Only float results carry these.
    pub(crate) fn emit_output_modifiers(
        &mut self,
        value: RegisterValue,
        modifiers: OutputModifiers,
    ) -> Result<RegisterValue> {
        if !value.ty.ctype.is_float() {
            return Ok(value);
        }
        let mut value = value;
        let result_type = self.vector_type_id(value.ty)?;

        if let Some(multiplier) = modifiers.multiplier {
            let factor = self.const_f32_splat(multiplier, value.ty.ccount)?;
            let id = self.builder.f_mul(result_type, None, value.id, factor)?;
            value = RegisterValue { ty: value.ty, id };
        }

        if modifiers.clamp {
            let zero = self.const_f32_splat(0.0, value.ty.ccount)?;
            let one = self.const_f32_splat(1.0, value.ty.ccount)?;
            let id = self.builder.ext_inst(
                result_type,
                None,
                self.glsl_std450,
                spirv::GLOp::NClamp as u32,
                [
                    dr::Operand::IdRef(value.id),
                    dr::Operand::IdRef(zero),
                    dr::Operand::IdRef(one),
                ],
            )?;
            value = RegisterValue { ty: value.ty, id };
        }
        Ok(value)
    }

    pub(crate) fn const_f32_splat(&mut self, value: f32, ccount: u32) -> Result<Word> {
        let scalar = self.const_f32(value);
        if ccount == 1 {
            return Ok(scalar);
        }
        let vec_type = self.vector_type_id(VectorType::new(ScalarType::Float32, ccount))?;
        Ok(self
            .builder
            .constant_composite(vec_type, vec![scalar; ccount as usize]))
    }

    /// PackHalf2x16: two floats to one dword of f16 pairs.
    pub(crate) fn emit_pack_half_2x16(&mut self, value: RegisterValue) -> Result<RegisterValue> {
        let uint_type = self.scalar_type_id(ScalarType::Uint32)?;
        let id = self.builder.ext_inst(
            uint_type,
            None,
            self.glsl_std450,
            spirv::GLOp::PackHalf2x16 as u32,
            [dr::Operand::IdRef(value.id)],
        )?;
        Ok(RegisterValue::new(ScalarType::Uint32, 1, id))
    }

    /// UnpackHalf2x16: one dword of f16 pairs to two floats.
    pub(crate) fn emit_unpack_half_2x16(&mut self, value: RegisterValue) -> Result<RegisterValue> {
        let as_uint = self.emit_reg_bitcast(value, ScalarType::Uint32)?;
        let vec2_type = self.vector_type_id(VectorType::new(ScalarType::Float32, 2))?;
        let id = self.builder.ext_inst(
            vec2_type,
            None,
            self.glsl_std450,
            spirv::GLOp::UnpackHalf2x16 as u32,
            [dr::Operand::IdRef(as_uint.id)],
        )?;
        Ok(RegisterValue::new(ScalarType::Float32, 2, id))
    }

    /// A 32-bit literal reinterpreted as the requested type.
    pub(crate) fn emit_literal_const(&mut self, ty: ScalarType, bits: u32) -> Result<RegisterValue> {
        let id = match ty {
            ScalarType::Uint32 => self.const_u32(bits),
            ScalarType::Sint32 => self.const_i32(bits as i32),
            ScalarType::Float32 => self.const_f32(f32::from_bits(bits)),
            other => bail_unsupported!("literal constant of type {:?}", other),
        };
        Ok(RegisterValue::new(ty, 1, id))
    }

    /// GCN inline constants (SSRC 128..255 range, already decoded into the
    /// operand field).
    fn emit_inline_const(&mut self, operand: &Operand) -> Result<RegisterValue> {
        let ty = operand.ty;
        match operand.field {
            OperandField::ConstZero => self.emit_literal_const(ty, 0),
            OperandField::SignedConstIntPos => {
                let value = self.const_i32(operand.code as i32);
                let value = RegisterValue::new(ScalarType::Sint32, 1, value);
                self.emit_reg_bitcast(value, ty)
            }
            OperandField::SignedConstIntNeg => {
                let value = self.const_i32(-(operand.code as i32));
                let value = RegisterValue::new(ScalarType::Sint32, 1, value);
                self.emit_reg_bitcast(value, ty)
            }
            OperandField::ConstFloatPos05 => self.emit_inline_float(0.5, ty),
            OperandField::ConstFloatNeg05 => self.emit_inline_float(-0.5, ty),
            OperandField::ConstFloatPos10 => self.emit_inline_float(1.0, ty),
            OperandField::ConstFloatNeg10 => self.emit_inline_float(-1.0, ty),
            OperandField::ConstFloatPos20 => self.emit_inline_float(2.0, ty),
            OperandField::ConstFloatNeg20 => self.emit_inline_float(-2.0, ty),
            OperandField::ConstFloatPos40 => self.emit_inline_float(4.0, ty),
            OperandField::ConstFloatNeg40 => self.emit_inline_float(-4.0, ty),
            other => bail_unsupported!("inline constant field {:?}", other),
        }
    }

    fn emit_inline_float(&mut self, value: f32, ty: ScalarType) -> Result<RegisterValue> {
        let id = self.const_f32(value);
        let value = RegisterValue::new(ScalarType::Float32, 1, id);
        self.emit_reg_bitcast(value, ty)
    }

    // --- operand access ------------------------------------------------------

    /// Load an operand. 64-bit operands come back as a lo/hi pair of 32-bit
    /// halves; everything else is a single value of the operand's type.
    pub(crate) fn emit_register_load(&mut self, operand: &Operand) -> Result<RegisterValuePair> {
        if operand.ty.is_double() {
            return self.emit_register_load_pair(operand);
        }

        let value = match operand.field {
            OperandField::ScalarGpr => {
                let raw = self.emit_gpr_load(false, operand.code)?;
                self.emit_reg_bitcast(raw, operand.ty)?
            }
            OperandField::VectorGpr => {
                let raw = self.emit_gpr_load(true, operand.code)?;
                self.emit_reg_bitcast(raw, operand.ty)?
            }
            OperandField::VccLo | OperandField::VccHi => {
                let vcc = self.vcc;
                let hi = operand.field == OperandField::VccHi;
                let raw = vcc.load_half(&mut self.builder, hi)?;
                let raw = RegisterValue::new(ScalarType::Uint32, 1, raw);
                self.emit_reg_bitcast(raw, operand.ty)?
            }
            OperandField::ExecLo | OperandField::ExecHi => {
                let exec = self.exec;
                let hi = operand.field == OperandField::ExecHi;
                let raw = exec.load_half(&mut self.builder, hi)?;
                let raw = RegisterValue::new(ScalarType::Uint32, 1, raw);
                self.emit_reg_bitcast(raw, operand.ty)?
            }
            OperandField::M0 => {
                let uint_type = self.scalar_type_id(ScalarType::Uint32)?;
                let id = self.builder.load(uint_type, None, self.m0.id, None, vec![])?;
                let raw = RegisterValue::new(ScalarType::Uint32, 1, id);
                self.emit_reg_bitcast(raw, operand.ty)?
            }
            OperandField::Scc => {
                let bool_type = self.scalar_type_id(ScalarType::Bool)?;
                let id = self.builder.load(bool_type, None, self.scc.id, None, vec![])?;
                let flag = RegisterValue::new(ScalarType::Bool, 1, id);
                let as_uint = self.emit_bool_to_uint(flag)?;
                self.emit_reg_bitcast(as_uint, operand.ty)?
            }
            OperandField::VccZ | OperandField::ExecZ => {
                let reg = if operand.field == OperandField::VccZ {
                    self.vcc
                } else {
                    self.exec
                };
                let lo = reg.load_half(&mut self.builder, false)?;
                let hi = reg.load_half(&mut self.builder, true)?;
                let uint_type = self.scalar_type_id(ScalarType::Uint32)?;
                let both = self.builder.bitwise_or(uint_type, None, lo, hi)?;
                let both = RegisterValue::new(ScalarType::Uint32, 1, both);
                let flag = self.emit_register_zero_test(both)?;
                let as_uint = self.emit_bool_to_uint(flag)?;
                self.emit_reg_bitcast(as_uint, operand.ty)?
            }
            OperandField::LiteralConst => self.emit_literal_const(operand.ty, operand.literal)?,
            OperandField::ConstZero
            | OperandField::SignedConstIntPos
            | OperandField::SignedConstIntNeg
            | OperandField::ConstFloatPos05
            | OperandField::ConstFloatNeg05
            | OperandField::ConstFloatPos10
            | OperandField::ConstFloatNeg10
            | OperandField::ConstFloatPos20
            | OperandField::ConstFloatNeg20
            | OperandField::ConstFloatPos40
            | OperandField::ConstFloatNeg40 => self.emit_inline_const(operand)?,
            other => bail_unsupported!("operand field {:?} as a source", other),
        };

        let value = self.emit_input_modifiers(value, operand.input_modifier)?;
        Ok(RegisterValuePair::single(value))
    }

    fn emit_register_load_pair(&mut self, operand: &Operand) -> Result<RegisterValuePair> {
        // Only 64-bit integers split into register pairs.
        let half = match operand.ty.half_type() {
            Some(half) => half,
            None => bail_unsupported!("register pair of type {:?}", operand.ty),
        };
        let (low, high) = match operand.field {
            OperandField::ScalarGpr => {
                let lo = self.emit_gpr_load(false, operand.code)?;
                let hi = self.emit_gpr_load(false, operand.code + 1)?;
                (lo, hi)
            }
            OperandField::VectorGpr => {
                let lo = self.emit_gpr_load(true, operand.code)?;
                let hi = self.emit_gpr_load(true, operand.code + 1)?;
                (lo, hi)
            }
            OperandField::VccLo | OperandField::ExecLo => {
                let reg = if operand.field == OperandField::VccLo {
                    self.vcc
                } else {
                    self.exec
                };
                let lo = reg.load_half(&mut self.builder, false)?;
                let hi = reg.load_half(&mut self.builder, true)?;
                (
                    RegisterValue::new(ScalarType::Uint32, 1, lo),
                    RegisterValue::new(ScalarType::Uint32, 1, hi),
                )
            }
            OperandField::ConstZero => {
                let zero = self.emit_literal_const(ScalarType::Uint32, 0)?;
                (zero, zero)
            }
            other => bail_unsupported!("operand field {:?} as a 64-bit source", other),
        };
        let low = self.emit_reg_bitcast(low, half)?;
        let high = self.emit_reg_bitcast(high, half)?;
        Ok(RegisterValuePair {
            low,
            high: Some(high),
        })
    }

    /// Store to an operand destination. Pairs go to consecutive registers or
    /// to the lo/hi halves of a state register.
    pub(crate) fn emit_register_store(
        &mut self,
        operand: &Operand,
        value: RegisterValuePair,
    ) -> Result<()> {
        if let Some(high) = value.high {
            return self.emit_register_store_pair(operand, value.low, high);
        }
        let value = value.low;

        match operand.field {
            OperandField::ScalarGpr => self.emit_gpr_store(false, operand.code, value)?,
            OperandField::VectorGpr => self.emit_gpr_store(true, operand.code, value)?,
            OperandField::VccLo | OperandField::VccHi => {
                let as_uint = self.emit_reg_bitcast(value, ScalarType::Uint32)?;
                let vcc = self.vcc;
                let hi = operand.field == OperandField::VccHi;
                vcc.store_half(&mut self.builder, hi, as_uint.id)?;
            }
            OperandField::ExecLo | OperandField::ExecHi => {
                let as_uint = self.emit_reg_bitcast(value, ScalarType::Uint32)?;
                let exec = self.exec;
                let hi = operand.field == OperandField::ExecHi;
                exec.store_half(&mut self.builder, hi, as_uint.id)?;
            }
            OperandField::M0 => {
                let as_uint = self.emit_reg_bitcast(value, ScalarType::Uint32)?;
                self.builder.store(self.m0.id, as_uint.id, None, vec![])?;
            }
            OperandField::Scc => {
                let flag = self.emit_register_zero_test(value)?;
                let bool_type = self.scalar_type_id(ScalarType::Bool)?;
                let not_zero = self.builder.logical_not(bool_type, None, flag.id)?;
                self.builder.store(self.scc.id, not_zero, None, vec![])?;
            }
            other => bail_unsupported!("operand field {:?} as a destination", other),
        }
        Ok(())
    }

    pub(crate) fn emit_register_store_pair(
        &mut self,
        operand: &Operand,
        low: RegisterValue,
        high: RegisterValue,
    ) -> Result<()> {
        match operand.field {
            OperandField::ScalarGpr => {
                self.emit_gpr_store(false, operand.code, low)?;
                self.emit_gpr_store(false, operand.code + 1, high)?;
            }
            OperandField::VectorGpr => {
                self.emit_gpr_store(true, operand.code, low)?;
                self.emit_gpr_store(true, operand.code + 1, high)?;
            }
            OperandField::VccLo | OperandField::ExecLo => {
                let reg = if operand.field == OperandField::VccLo {
                    self.vcc
                } else {
                    self.exec
                };
                let lo_uint = self.emit_reg_bitcast(low, ScalarType::Uint32)?;
                let hi_uint = self.emit_reg_bitcast(high, ScalarType::Uint32)?;
                reg.store_half(&mut self.builder, false, lo_uint.id)?;
                reg.store_half(&mut self.builder, true, hi_uint.id)?;
            }
            other => bail_structural!("operand field {:?} as a 64-bit destination", other),
        }
        Ok(())
    }

    /// Update SCC from a scalar ALU result: set when the result is non-zero.
    pub(crate) fn emit_scc_update(&mut self, result: RegisterValue) -> Result<()> {
        let flag = self.emit_register_zero_test(result)?;
        let bool_type = self.scalar_type_id(ScalarType::Bool)?;
        let not_zero = self.builder.logical_not(bool_type, None, flag.id)?;
        self.builder.store(self.scc.id, not_zero, None, vec![])?;
        Ok(())
    }
}
