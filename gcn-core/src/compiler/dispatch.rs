//! Instruction dispatch.
//!
//! Routes each decoded instruction to a handler by category. Handlers share
//! one rule: an instruction the shader can reach but the compiler cannot
//! express is an `Unsupported` error, never silently dropped code.

use super::sysval::SystemValue;
use super::{Compiler, RegisterPointer, RegisterValue, RegisterValuePair, VectorType};
use crate::error::Result;
use crate::ins::{
    DsControl, ExpControl, ExportTarget, InstCategory, InstControl, Instruction, MubufControl,
    Opcode, Operand, RegMask, ScalarType, SmrdControl, VintrpControl,
};
use crate::{bail_structural, bail_unsupported};
use log::trace;
use rspirv::dr;
use rspirv::spirv::{self, Decoration, ExecutionMode, Scope, StorageClass, Word};

enum Bit64Op {
    And,
    Or,
    Andn2,
}

impl Compiler {
    pub(crate) fn compile_instruction(&mut self, ins: &Instruction) -> Result<()> {
        match ins.category {
            InstCategory::ScalarAlu => self.emit_scalar_alu(ins),
            InstCategory::ScalarMemory => self.emit_scalar_memory(ins),
            InstCategory::VectorAlu => self.emit_vector_alu(ins),
            InstCategory::VectorMemory => self.emit_vector_memory(ins),
            InstCategory::FlowControl => self.emit_flow_control(ins),
            InstCategory::DataShare => self.emit_data_share(ins),
            InstCategory::VectorInterpolation => self.emit_vector_interpolation(ins),
            InstCategory::Export => self.emit_export(ins),
            InstCategory::DebugProfile => self.emit_debug_profile(ins),
            InstCategory::Undefined => {
                bail_structural!("instruction {:?} with undefined category", ins.opcode)
            }
        }
    }

    // --- scalar ALU -----------------------------------------------------------

    fn emit_scalar_alu(&mut self, ins: &Instruction) -> Result<()> {
        match ins.opcode {
            Opcode::SMovB32 => {
                let value = self.emit_register_load(&ins.src[0])?;
                self.emit_register_store(&ins.dst[0], value)
            }
            Opcode::SMovB64 => {
                let value = self.emit_register_load(&self.as_b64(&ins.src[0]))?;
                self.emit_register_store(&self.as_b64(&ins.dst[0]), value)
            }
            Opcode::SAndB32 => {
                let a = self.emit_register_load(&ins.src[0])?.low;
                let b = self.emit_register_load(&ins.src[1])?.low;
                let a = self.emit_reg_bitcast(a, ScalarType::Uint32)?;
                let b = self.emit_reg_bitcast(b, ScalarType::Uint32)?;
                let uint_type = self.scalar_type_id(ScalarType::Uint32)?;
                let id = self.builder.bitwise_and(uint_type, None, a.id, b.id)?;
                let result = RegisterValue::new(ScalarType::Uint32, 1, id);
                self.emit_register_store(&ins.dst[0], RegisterValuePair::single(result))?;
                self.emit_scc_update(result)
            }
            Opcode::SAndB64 => self.emit_scalar_bit64(ins, Bit64Op::And),
            Opcode::SOrB64 => self.emit_scalar_bit64(ins, Bit64Op::Or),
            Opcode::SAndn2B64 => self.emit_scalar_bit64(ins, Bit64Op::Andn2),
            Opcode::SAddU32 => {
                let a = self.emit_register_load(&ins.src[0])?.low;
                let b = self.emit_register_load(&ins.src[1])?.low;
                let a = self.emit_reg_bitcast(a, ScalarType::Uint32)?;
                let b = self.emit_reg_bitcast(b, ScalarType::Uint32)?;
                let uint_type = self.scalar_type_id(ScalarType::Uint32)?;
                let pair_type = self.builder.type_struct([uint_type, uint_type]);
                let added = self.builder.i_add_carry(pair_type, None, a.id, b.id)?;
                let sum = self.builder.composite_extract(uint_type, None, added, [0])?;
                let carry = self.builder.composite_extract(uint_type, None, added, [1])?;
                let sum = RegisterValue::new(ScalarType::Uint32, 1, sum);
                self.emit_register_store(&ins.dst[0], RegisterValuePair::single(sum))?;
                // SCC is the carry-out here, not a zero test.
                let carry = RegisterValue::new(ScalarType::Uint32, 1, carry);
                self.emit_scc_update(carry)
            }
            Opcode::SMulI32 => {
                let a = self.emit_register_load(&ins.src[0])?.low;
                let b = self.emit_register_load(&ins.src[1])?.low;
                let a = self.emit_reg_bitcast(a, ScalarType::Sint32)?;
                let b = self.emit_reg_bitcast(b, ScalarType::Sint32)?;
                let sint_type = self.scalar_type_id(ScalarType::Sint32)?;
                let id = self.builder.i_mul(sint_type, None, a.id, b.id)?;
                let result = RegisterValue::new(ScalarType::Sint32, 1, id);
                self.emit_register_store(&ins.dst[0], RegisterValuePair::single(result))
            }
            Opcode::SCmpEqU32 | Opcode::SCmpLgU32 => {
                let a = self.emit_register_load(&ins.src[0])?.low;
                let b = self.emit_register_load(&ins.src[1])?.low;
                let a = self.emit_reg_bitcast(a, ScalarType::Uint32)?;
                let b = self.emit_reg_bitcast(b, ScalarType::Uint32)?;
                let bool_type = self.scalar_type_id(ScalarType::Bool)?;
                let flag = if ins.opcode == Opcode::SCmpEqU32 {
                    self.builder.i_equal(bool_type, None, a.id, b.id)?
                } else {
                    self.builder.i_not_equal(bool_type, None, a.id, b.id)?
                };
                self.emit_scc_store(flag)
            }
            Opcode::SAndSaveexecB64 => {
                let exec_op = Operand::exec(ScalarType::Uint64);
                let exec_value = self.emit_register_load(&exec_op)?;
                self.emit_register_store(&self.as_b64(&ins.dst[0]), exec_value)?;

                let src = self.emit_register_load(&self.as_b64(&ins.src[0]))?;
                let uint_type = self.scalar_type_id(ScalarType::Uint32)?;
                let src_hi = self.pair_high(&src)?;
                let exec_hi = self.pair_high(&exec_value)?;
                let lo = self
                    .builder
                    .bitwise_and(uint_type, None, src.low.id, exec_value.low.id)?;
                let hi = self
                    .builder
                    .bitwise_and(uint_type, None, src_hi.id, exec_hi.id)?;
                let lo = RegisterValue::new(ScalarType::Uint32, 1, lo);
                let hi = RegisterValue::new(ScalarType::Uint32, 1, hi);
                self.emit_register_store_pair(&exec_op, lo, hi)?;

                let both = self.builder.bitwise_or(uint_type, None, lo.id, hi.id)?;
                self.emit_scc_update(RegisterValue::new(ScalarType::Uint32, 1, both))
            }
            other => bail_unsupported!("scalar ALU opcode {:?}", other),
        }
    }

    fn emit_scalar_bit64(&mut self, ins: &Instruction, op: Bit64Op) -> Result<()> {
        let a = self.emit_register_load(&self.as_b64(&ins.src[0]))?;
        let b = self.emit_register_load(&self.as_b64(&ins.src[1]))?;
        let a_hi = self.pair_high(&a)?;
        let b_hi = self.pair_high(&b)?;
        let uint_type = self.scalar_type_id(ScalarType::Uint32)?;

        let mut halves = [(a.low.id, b.low.id, 0), (a_hi.id, b_hi.id, 0)];
        for (x, y, out) in halves.iter_mut() {
            *out = match op {
                Bit64Op::And => self.builder.bitwise_and(uint_type, None, *x, *y)?,
                Bit64Op::Or => self.builder.bitwise_or(uint_type, None, *x, *y)?,
                Bit64Op::Andn2 => {
                    let inverted = self.builder.not(uint_type, None, *y)?;
                    self.builder.bitwise_and(uint_type, None, *x, inverted)?
                }
            };
        }
        let lo = RegisterValue::new(ScalarType::Uint32, 1, halves[0].2);
        let hi = RegisterValue::new(ScalarType::Uint32, 1, halves[1].2);
        self.emit_register_store_pair(&self.as_b64(&ins.dst[0]), lo, hi)?;

        let both = self.builder.bitwise_or(uint_type, None, lo.id, hi.id)?;
        self.emit_scc_update(RegisterValue::new(ScalarType::Uint32, 1, both))
    }

    // --- scalar memory ----------------------------------------------------------

    fn emit_scalar_memory(&mut self, ins: &Instruction) -> Result<()> {
        let ctrl = self.smrd_control(ins)?;
        match ins.opcode {
            // Descriptor loads out of the extended user data table. The
            // descriptor itself never materializes; the declared resource is
            // attached to the destination registers instead.
            Opcode::SLoadDwordx4 | Opcode::SLoadDwordx8 => {
                let dst_register = ins.dst[0].code;
                if !self.map_eud_resource(ctrl.offset, dst_register) {
                    bail_unsupported!(
                        "scalar load at dword offset {} does not name a declared resource",
                        ctrl.offset
                    );
                }
                trace!(
                    "mapped extended user data offset {} to s[{}]",
                    ctrl.offset,
                    dst_register
                );
                Ok(())
            }
            Opcode::SBufferLoadDword
            | Opcode::SBufferLoadDwordx2
            | Opcode::SBufferLoadDwordx4 => {
                let buffer = match self.buffers.get(&ins.src[0].code) {
                    Some(buffer) => *buffer,
                    None => bail_structural!(
                        "scalar buffer load from undeclared buffer at s[{}]",
                        ins.src[0].code
                    ),
                };
                let base = if ctrl.imm {
                    self.emit_literal_const(ScalarType::Uint32, ctrl.offset)?
                } else {
                    let raw = self.emit_register_load(&ins.src[1])?.low;
                    self.emit_reg_bitcast(raw, ScalarType::Uint32)?
                };
                let uint_type = self.scalar_type_id(ScalarType::Uint32)?;
                for i in 0..ctrl.count {
                    let offset = if i == 0 {
                        base
                    } else {
                        let step = self.const_u32(i);
                        let id = self.builder.i_add(uint_type, None, base.id, step)?;
                        RegisterValue::new(ScalarType::Uint32, 1, id)
                    };
                    let value = if buffer.as_ssbo {
                        self.emit_storage_buffer_load(buffer.var_id, offset)?
                    } else {
                        self.emit_uniform_buffer_load(buffer.var_id, offset)?
                    };
                    self.emit_sgpr_store_at(ins.dst[0].code + i, value)?;
                }
                Ok(())
            }
            other => bail_unsupported!("scalar memory opcode {:?}", other),
        }
    }

    // --- vector ALU --------------------------------------------------------------

    fn emit_vector_alu(&mut self, ins: &Instruction) -> Result<()> {
        match ins.opcode {
            Opcode::VMovB32 => {
                let value = self.emit_register_load(&ins.src[0])?.low;
                self.emit_vop_store(&ins.dst[0], value)
            }
            Opcode::VAddF32
            | Opcode::VSubF32
            | Opcode::VMulF32 => {
                let a = self.load_f32(&ins.src[0])?;
                let b = self.load_f32(&ins.src[1])?;
                let f32_type = self.scalar_type_id(ScalarType::Float32)?;
                let id = match ins.opcode {
                    Opcode::VAddF32 => self.builder.f_add(f32_type, None, a.id, b.id)?,
                    Opcode::VSubF32 => self.builder.f_sub(f32_type, None, a.id, b.id)?,
                    _ => self.builder.f_mul(f32_type, None, a.id, b.id)?,
                };
                self.emit_vop_store(&ins.dst[0], RegisterValue::new(ScalarType::Float32, 1, id))
            }
            Opcode::VMaxF32 | Opcode::VMinF32 => {
                let a = self.load_f32(&ins.src[0])?;
                let b = self.load_f32(&ins.src[1])?;
                let glop = if ins.opcode == Opcode::VMaxF32 {
                    spirv::GLOp::FMax
                } else {
                    spirv::GLOp::FMin
                };
                let f32_type = self.scalar_type_id(ScalarType::Float32)?;
                let id = self.builder.ext_inst(
                    f32_type,
                    None,
                    self.glsl_std450,
                    glop as u32,
                    [dr::Operand::IdRef(a.id), dr::Operand::IdRef(b.id)],
                )?;
                self.emit_vop_store(&ins.dst[0], RegisterValue::new(ScalarType::Float32, 1, id))
            }
            Opcode::VMacF32 | Opcode::VMadF32 => {
                let a = self.load_f32(&ins.src[0])?;
                let b = self.load_f32(&ins.src[1])?;
                // MAC accumulates into the destination register.
                let c = if ins.opcode == Opcode::VMacF32 {
                    let mut acc = ins.dst[0];
                    acc.ty = ScalarType::Float32;
                    self.load_f32(&acc)?
                } else {
                    self.load_f32(&ins.src[2])?
                };
                let f32_type = self.scalar_type_id(ScalarType::Float32)?;
                let id = self.builder.ext_inst(
                    f32_type,
                    None,
                    self.glsl_std450,
                    spirv::GLOp::Fma as u32,
                    [
                        dr::Operand::IdRef(a.id),
                        dr::Operand::IdRef(b.id),
                        dr::Operand::IdRef(c.id),
                    ],
                )?;
                self.emit_vop_store(&ins.dst[0], RegisterValue::new(ScalarType::Float32, 1, id))
            }
            Opcode::VRcpF32 => {
                let a = self.load_f32(&ins.src[0])?;
                let one = self.const_f32(1.0);
                let f32_type = self.scalar_type_id(ScalarType::Float32)?;
                let id = self.builder.f_div(f32_type, None, one, a.id)?;
                self.emit_vop_store(&ins.dst[0], RegisterValue::new(ScalarType::Float32, 1, id))
            }
            Opcode::VSqrtF32 => {
                let a = self.load_f32(&ins.src[0])?;
                let f32_type = self.scalar_type_id(ScalarType::Float32)?;
                let id = self.builder.ext_inst(
                    f32_type,
                    None,
                    self.glsl_std450,
                    spirv::GLOp::Sqrt as u32,
                    [dr::Operand::IdRef(a.id)],
                )?;
                self.emit_vop_store(&ins.dst[0], RegisterValue::new(ScalarType::Float32, 1, id))
            }
            Opcode::VCvtF32U32 => {
                let a = self.emit_register_load(&ins.src[0])?.low;
                let a = self.emit_reg_bitcast(a, ScalarType::Uint32)?;
                let f32_type = self.scalar_type_id(ScalarType::Float32)?;
                let id = self.builder.convert_u_to_f(f32_type, None, a.id)?;
                self.emit_vop_store(&ins.dst[0], RegisterValue::new(ScalarType::Float32, 1, id))
            }
            Opcode::VCvtU32F32 => {
                let a = self.load_f32(&ins.src[0])?;
                let uint_type = self.scalar_type_id(ScalarType::Uint32)?;
                let id = self.builder.convert_f_to_u(uint_type, None, a.id)?;
                self.emit_vop_store(&ins.dst[0], RegisterValue::new(ScalarType::Uint32, 1, id))
            }
            Opcode::VCvtPkrtzF16F32 => {
                let a = self.load_f32(&ins.src[0])?;
                let b = self.load_f32(&ins.src[1])?;
                let pair = self.emit_register_concat(a, b)?;
                let packed = self.emit_pack_half_2x16(pair)?;
                self.emit_vop_store(&ins.dst[0], packed)
            }
            Opcode::VCmpEqF32 | Opcode::VCmpNeqF32 => self.emit_vector_compare(ins),
            Opcode::VCndmaskB32 => self.emit_cndmask(ins),
            other => bail_unsupported!("vector ALU opcode {:?}", other),
        }
    }

    /// Lane-wise compare; the result mask lands in VCC (or a scalar register
    /// pair) via a subgroup ballot.
    fn emit_vector_compare(&mut self, ins: &Instruction) -> Result<()> {
        let a = self.load_f32(&ins.src[0])?;
        let b = self.load_f32(&ins.src[1])?;
        let bool_type = self.scalar_type_id(ScalarType::Bool)?;
        let cond = match ins.opcode {
            Opcode::VCmpEqF32 => self.builder.f_ord_equal(bool_type, None, a.id, b.id)?,
            _ => self.builder.f_unord_not_equal(bool_type, None, a.id, b.id)?,
        };

        let uvec4 = self.vector_type_id(VectorType::new(ScalarType::Uint32, 4))?;
        let scope = self.const_u32(Scope::Subgroup as u32);
        let ballot = self
            .builder
            .group_non_uniform_ballot(uvec4, None, scope, cond)?;
        let ballot = RegisterValue::new(ScalarType::Uint32, 4, ballot);
        let lo = self.emit_register_extract(ballot, RegMask::select(0))?;
        let hi = self.emit_register_extract(ballot, RegMask::select(1))?;

        let dst = if ins.dst_count > 0 {
            ins.dst[0]
        } else {
            Operand::vcc(ScalarType::Uint64)
        };
        self.emit_register_store_pair(&self.as_b64(&dst), lo, hi)
    }

    /// Per-lane select. The lane's bit is fished out of the 64-bit condition
    /// mask with the subgroup equality mask.
    fn emit_cndmask(&mut self, ins: &Instruction) -> Result<()> {
        let a = self.load_f32(&ins.src[0])?;
        let b = self.load_f32(&ins.src[1])?;

        let cond_op = if ins.src_count > 2 {
            ins.src[2]
        } else {
            Operand::vcc(ScalarType::Uint64)
        };
        let mask = self.emit_register_load(&self.as_b64(&cond_op))?;
        let mask_hi = self.pair_high(&mask)?;

        let eq_mask = self.emit_subgroup_eq_mask()?;
        let eq_lo = self.emit_register_extract(eq_mask, RegMask::select(0))?;
        let eq_hi = self.emit_register_extract(eq_mask, RegMask::select(1))?;

        let uint_type = self.scalar_type_id(ScalarType::Uint32)?;
        let bool_type = self.scalar_type_id(ScalarType::Bool)?;
        let lo_bit = self
            .builder
            .bitwise_and(uint_type, None, mask.low.id, eq_lo.id)?;
        let hi_bit = self
            .builder
            .bitwise_and(uint_type, None, mask_hi.id, eq_hi.id)?;
        let any = self.builder.bitwise_or(uint_type, None, lo_bit, hi_bit)?;
        let zero = self.const_u32(0);
        let lane_set = self.builder.i_not_equal(bool_type, None, any, zero)?;

        let f32_type = self.scalar_type_id(ScalarType::Float32)?;
        let id = self.builder.select(f32_type, None, lane_set, b.id, a.id)?;
        self.emit_vop_store(&ins.dst[0], RegisterValue::new(ScalarType::Float32, 1, id))
    }

    /// Common VALU result path: output modifiers, then the register store.
    fn emit_vop_store(&mut self, dst: &Operand, value: RegisterValue) -> Result<()> {
        let value = self.emit_output_modifiers(value, dst.output_modifier)?;
        self.emit_register_store(dst, RegisterValuePair::single(value))
    }

    fn load_f32(&mut self, operand: &Operand) -> Result<RegisterValue> {
        let mut op = *operand;
        op.ty = ScalarType::Float32;
        Ok(self.emit_register_load(&op)?.low)
    }

    // --- vector memory --------------------------------------------------------------

    fn emit_vector_memory(&mut self, ins: &Instruction) -> Result<()> {
        let ctrl = self.mubuf_control(ins)?;
        let buffer = match self.buffers.get(&ins.src[1].code) {
            Some(buffer) => *buffer,
            None => bail_structural!(
                "buffer access through undeclared descriptor at s[{}]",
                ins.src[1].code
            ),
        };

        // Byte address from the VGPR plus the immediate offset, then down to
        // a dword index.
        let vaddr = self.emit_register_load(&ins.src[0])?.low;
        let vaddr = self.emit_reg_bitcast(vaddr, ScalarType::Uint32)?;
        let uint_type = self.scalar_type_id(ScalarType::Uint32)?;
        let byte_offset = self.const_u32(ctrl.offset);
        let byte_addr = self
            .builder
            .i_add(uint_type, None, vaddr.id, byte_offset)?;
        let two = self.const_u32(2);
        let base = self
            .builder
            .shift_right_logical(uint_type, None, byte_addr, two)?;
        let base = RegisterValue::new(ScalarType::Uint32, 1, base);

        match ins.opcode {
            Opcode::BufferLoadDword | Opcode::BufferLoadDwordx2 | Opcode::BufferLoadDwordx4 => {
                for i in 0..ctrl.count {
                    let offset = self.dword_step(base, i)?;
                    let value = if buffer.as_ssbo {
                        self.emit_storage_buffer_load(buffer.var_id, offset)?
                    } else {
                        self.emit_uniform_buffer_load(buffer.var_id, offset)?
                    };
                    self.emit_vgpr_store_at(ins.dst[0].code + i, value)?;
                }
                Ok(())
            }
            Opcode::BufferStoreDword => {
                if !buffer.as_ssbo {
                    bail_structural!("buffer store into a read-only constant buffer");
                }
                for i in 0..ctrl.count {
                    let offset = self.dword_step(base, i)?;
                    let value = self.emit_gpr_load(true, ins.src[2].code + i)?;
                    self.emit_storage_buffer_store(buffer.var_id, offset, value)?;
                }
                Ok(())
            }
            other => bail_unsupported!("vector memory opcode {:?}", other),
        }
    }

    fn dword_step(&mut self, base: RegisterValue, i: u32) -> Result<RegisterValue> {
        if i == 0 {
            return Ok(base);
        }
        let uint_type = self.scalar_type_id(ScalarType::Uint32)?;
        let step = self.const_u32(i);
        let id = self.builder.i_add(uint_type, None, base.id, step)?;
        Ok(RegisterValue::new(ScalarType::Uint32, 1, id))
    }

    // --- flow control ------------------------------------------------------------------

    /// Branches were already rewritten into structured tokens; only the
    /// wait/sync opcodes still produce code here.
    fn emit_flow_control(&mut self, ins: &Instruction) -> Result<()> {
        match ins.opcode {
            Opcode::SEndpgm | Opcode::SWaitcnt | Opcode::SNop => Ok(()),
            Opcode::SBarrier => {
                let exec_scope = self.const_u32(Scope::Workgroup as u32);
                let mem_scope = self.const_u32(Scope::Workgroup as u32);
                let semantics = self.const_u32(
                    (spirv::MemorySemantics::ACQUIRE_RELEASE
                        | spirv::MemorySemantics::WORKGROUP_MEMORY)
                        .bits(),
                );
                self.builder
                    .control_barrier(exec_scope, mem_scope, semantics)?;
                Ok(())
            }
            Opcode::SBranch
            | Opcode::SCbranchScc0
            | Opcode::SCbranchScc1
            | Opcode::SCbranchVccz
            | Opcode::SCbranchVccnz
            | Opcode::SCbranchExecz
            | Opcode::SCbranchExecnz => {
                if let InstControl::Sopp(sopp) = ins.control {
                    trace!(
                        "{:?} to {:#x} handled by structuring",
                        ins.opcode,
                        self.branch_target(sopp.simm)
                    );
                }
                Ok(())
            }
            other => bail_unsupported!("flow control opcode {:?}", other),
        }
    }

    // --- data share -----------------------------------------------------------------------

    fn emit_data_share(&mut self, ins: &Instruction) -> Result<()> {
        let ctrl = self.ds_control(ins)?;

        let addr = self.emit_register_load(&ins.src[0])?.low;
        let addr = self.emit_reg_bitcast(addr, ScalarType::Uint32)?;
        let uint_type = self.scalar_type_id(ScalarType::Uint32)?;
        let byte_offset = self.const_u32(ctrl.offset);
        let byte_addr = self.builder.i_add(uint_type, None, addr.id, byte_offset)?;
        let two = self.const_u32(2);
        let index = self
            .builder
            .shift_right_logical(uint_type, None, byte_addr, two)?;
        let index = RegisterValue::new(ScalarType::Uint32, 1, index);

        match ins.opcode {
            Opcode::DsReadB32 => {
                let value = self.emit_lds_load(index)?;
                self.emit_vgpr_store_at(ins.dst[0].code, value)
            }
            Opcode::DsWriteB32 => {
                let value = self.emit_gpr_load(true, ins.src[1].code)?;
                self.emit_lds_store(index, value)
            }
            other => bail_unsupported!("data share opcode {:?}", other),
        }
    }

    // --- interpolation ----------------------------------------------------------------------

    /// P1 computes the perspective partial the hardware needs; the host
    /// interpolates for us, so only P2 produces the attribute value.
    fn emit_vector_interpolation(&mut self, ins: &Instruction) -> Result<()> {
        let ctrl = self.vintrp_control(ins)?;
        match ins.opcode {
            Opcode::VInterpP1F32 => Ok(()),
            Opcode::VInterpP2F32 => {
                let input = match self.inputs.get(&ctrl.attr) {
                    Some(ptr) => *ptr,
                    None => bail_structural!("interpolation of undeclared attribute {}", ctrl.attr),
                };
                let result_type = self.vector_type_id(input.ty)?;
                let id = self.builder.load(result_type, None, input.id, None, vec![])?;
                let value = RegisterValue {
                    ty: input.ty,
                    id,
                };
                let component = self.emit_register_extract(value, RegMask::select(ctrl.chan))?;
                self.emit_vgpr_store_at(ins.dst[0].code, component)
            }
            other => bail_unsupported!("interpolation opcode {:?}", other),
        }
    }

    // --- export ------------------------------------------------------------------------------

    fn emit_export(&mut self, ins: &Instruction) -> Result<()> {
        let ctrl = self.exp_control(ins)?;
        if ctrl.target == ExportTarget::Null || ctrl.en.pop_count() == 0 {
            return Ok(());
        }

        let value = self.emit_export_value(ins, &ctrl)?;
        match ctrl.target {
            ExportTarget::Pos(0) => {
                self.emit_vs_system_value_store(SystemValue::Position, ctrl.en, value)
            }
            ExportTarget::Pos(n) => bail_unsupported!("position export index {n}"),
            ExportTarget::Param(i) => {
                let ptr = match self.params.get(&i) {
                    Some(ptr) => *ptr,
                    None => bail_structural!("export to undeclared parameter {i}"),
                };
                self.emit_output_store(ptr, value, ctrl.en)
            }
            ExportTarget::Mrt(i) => {
                let ptr = match self.mrts.get(&i) {
                    Some(ptr) => *ptr,
                    None => bail_structural!("export to undeclared render target {i}"),
                };
                self.emit_output_store(ptr, value, ctrl.en)
            }
            ExportTarget::MrtZ => {
                let depth = self.frag_depth_output()?;
                let first = self.emit_register_extract(value, RegMask::select(0))?;
                self.builder.store(depth, first.id, None, vec![])?;
                Ok(())
            }
            ExportTarget::Null => Ok(()),
        }
    }

    /// Assemble the exported components into one value, unpacking f16 pairs
    /// for compressed exports.
    fn emit_export_value(&mut self, ins: &Instruction, ctrl: &ExpControl) -> Result<RegisterValue> {
        let components: Vec<RegisterValue> = if ctrl.compr {
            let xy_src = self.load_f32(&ins.src[0])?;
            let zw_src = self.load_f32(&ins.src[1])?;
            let xy = self.emit_unpack_half_2x16(xy_src)?;
            let zw = self.emit_unpack_half_2x16(zw_src)?;
            let mut all = Vec::with_capacity(4);
            for (vec, c) in [(xy, 0), (xy, 1), (zw, 0), (zw, 1)] {
                all.push(self.emit_register_extract(vec, RegMask::select(c))?);
            }
            (0..4).filter(|&c| ctrl.en.test(c)).map(|c| all[c as usize]).collect()
        } else {
            let mut picked = Vec::new();
            for c in 0..4 {
                if ctrl.en.test(c) {
                    picked.push(self.load_f32(&ins.src[c as usize])?);
                }
            }
            picked
        };

        let mut value = components[0];
        for component in &components[1..] {
            value = self.emit_register_concat(value, *component)?;
        }
        Ok(value)
    }

    fn emit_output_store(
        &mut self,
        ptr: RegisterPointer,
        value: RegisterValue,
        mask: RegMask,
    ) -> Result<()> {
        if mask == RegMask::first_n(ptr.ty.ccount) {
            self.builder.store(ptr.id, value.id, None, vec![])?;
            return Ok(());
        }
        let result_type = self.vector_type_id(ptr.ty)?;
        let old = self.builder.load(result_type, None, ptr.id, None, vec![])?;
        let old = RegisterValue {
            ty: ptr.ty,
            id: old,
        };
        let merged = self.emit_register_insert(old, value, mask)?;
        self.builder.store(ptr.id, merged.id, None, vec![])?;
        Ok(())
    }

    fn frag_depth_output(&mut self) -> Result<Word> {
        if let Some(id) = self.ps.builtin_frag_depth {
            return Ok(id);
        }
        let f32_type = self.builder.type_float(32);
        let ptr_type = self
            .builder
            .type_pointer(None, StorageClass::Output, f32_type);
        let id = self.new_var(ptr_type, StorageClass::Output);
        self.builder.decorate(
            id,
            Decoration::BuiltIn,
            [dr::Operand::BuiltIn(spirv::BuiltIn::FragDepth)],
        );
        self.builder.name(id, "frag_depth");
        self.builder
            .execution_mode(self.entry_point_id, ExecutionMode::DepthReplacing, vec![]);
        self.entry_interfaces.push(id);
        self.ps.builtin_frag_depth = Some(id);
        Ok(id)
    }

    // --- debug / profile ------------------------------------------------------------------------

    fn emit_debug_profile(&mut self, ins: &Instruction) -> Result<()> {
        trace!("ignoring debug opcode {:?} at pc {:#x}", ins.opcode, self.pc);
        Ok(())
    }

    // --- shared helpers ---------------------------------------------------------------------------

    /// View an operand as a 64-bit pair regardless of its decoded type.
    fn as_b64(&self, operand: &Operand) -> Operand {
        let mut op = *operand;
        op.ty = ScalarType::Uint64;
        op
    }

    fn pair_high(&self, pair: &RegisterValuePair) -> Result<RegisterValue> {
        match pair.high {
            Some(high) => Ok(high),
            None => {
                bail_structural!("64-bit operation on a register pair without a high half")
            }
        }
    }

    fn emit_scc_store(&mut self, flag: Word) -> Result<()> {
        self.builder.store(self.scc.id, flag, None, vec![])?;
        Ok(())
    }

    fn smrd_control(&self, ins: &Instruction) -> Result<SmrdControl> {
        match ins.control {
            InstControl::Smrd(ctrl) => Ok(ctrl),
            _ => bail_structural!("{:?} without scalar memory control word", ins.opcode),
        }
    }

    fn mubuf_control(&self, ins: &Instruction) -> Result<MubufControl> {
        match ins.control {
            InstControl::Mubuf(ctrl) => Ok(ctrl),
            _ => bail_structural!("{:?} without buffer control word", ins.opcode),
        }
    }

    fn ds_control(&self, ins: &Instruction) -> Result<DsControl> {
        match ins.control {
            InstControl::Ds(ctrl) => Ok(ctrl),
            _ => bail_structural!("{:?} without data share control word", ins.opcode),
        }
    }

    fn vintrp_control(&self, ins: &Instruction) -> Result<VintrpControl> {
        match ins.control {
            InstControl::Vintrp(ctrl) => Ok(ctrl),
            _ => bail_structural!("{:?} without interpolation control word", ins.opcode),
        }
    }

    fn exp_control(&self, ins: &Instruction) -> Result<ExpControl> {
        match ins.control {
            InstControl::Exp(ctrl) => Ok(ctrl),
            _ => bail_structural!("{:?} without export control word", ins.opcode),
        }
    }
}
