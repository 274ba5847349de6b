//! The GCN → SPIR-V compiler.
//!
//! One `Compiler` instance translates exactly one shader: construct it with
//! the module metadata, feed it the token list produced by the control-flow
//! analysis pass via [`Compiler::compile`], then call [`Compiler::finalize`]
//! to obtain the serialized module and the resource-slot table.
//!
//! The instance is single-threaded and owns all of its state; identical
//! inputs produce byte-identical modules.

mod control_flow;
mod dispatch;
mod gpr;
mod resource;
mod sysval;
mod value;

#[cfg(test)]
mod tests;

use crate::bail_unsupported;
use crate::error::Result;
use crate::ins::{RegMask, ScalarType};
use crate::meta::{
    AnalysisInfo, ModuleInfo, ModuleOptions, ProgramType, ResourceSlot, ShaderMeta, ShaderResource,
};
use gpr::{GprArray, StateRegister};
use log::debug;
use resource::{BufferResource, SamplerResource, TextureResource};
use rspirv::binary::Assemble;
use rspirv::dr::{self, Builder};
use rspirv::spirv::{
    self, AddressingModel, Capability, ExecutionMode, FunctionControl, MemoryModel, Op,
    SourceLanguage, StorageClass, Word,
};
use std::collections::HashMap;

const PER_VERTEX_POSITION: u32 = 0;

/// Scalar type plus component count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorType {
    pub ctype: ScalarType,
    pub ccount: u32,
}

impl VectorType {
    pub fn new(ctype: ScalarType, ccount: u32) -> Self {
        VectorType { ctype, ccount }
    }

    pub fn scalar(ctype: ScalarType) -> Self {
        VectorType { ctype, ccount: 1 }
    }
}

/// Vector type plus an optional array length (0 = not an array).
#[derive(Debug, Clone, Copy)]
pub(crate) struct ArrayType {
    pub ctype: ScalarType,
    pub ccount: u32,
    pub alength: u32,
}

/// Everything needed to declare a variable.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RegisterInfo {
    pub ty: ArrayType,
    pub sclass: StorageClass,
}

/// A pure SSA value: type plus backing id. Never aliased; every operation
/// produces a new value.
#[derive(Debug, Clone, Copy)]
pub struct RegisterValue {
    pub ty: VectorType,
    pub id: Word,
}

impl RegisterValue {
    pub fn new(ctype: ScalarType, ccount: u32, id: Word) -> Self {
        RegisterValue {
            ty: VectorType::new(ctype, ccount),
            id,
        }
    }
}

/// A value pair for 64-bit logical registers stored as two 32-bit halves.
/// `high` is populated only for 64-bit types.
#[derive(Debug, Clone, Copy)]
pub struct RegisterValuePair {
    pub low: RegisterValue,
    pub high: Option<RegisterValue>,
}

impl RegisterValuePair {
    pub fn single(low: RegisterValue) -> Self {
        RegisterValuePair { low, high: None }
    }
}

/// A pointer usable for both load and store.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RegisterPointer {
    pub ty: VectorType,
    pub id: Word,
}

/// Serialized output plus the side-channel binding table consumed by the
/// renderer.
#[derive(Debug, Clone)]
pub struct CompiledShader {
    pub code: Vec<u32>,
    pub resources: Vec<ResourceSlot>,
}

#[derive(Default)]
struct VsState {
    function_id: Word,
    fetch_function_id: Option<Word>,
    builtin_vertex_id: Option<Word>,
    builtin_base_vertex: Option<Word>,
    builtin_instance_id: Option<Word>,
    builtin_base_instance: Option<Word>,
    per_vertex_out: Option<Word>,
}

#[derive(Default)]
struct PsState {
    function_id: Word,
    builtin_frag_coord: Option<Word>,
    builtin_is_front_face: Option<Word>,
    builtin_sample_id: Option<Word>,
    builtin_layer: Option<Word>,
    builtin_viewport_id: Option<Word>,
    builtin_frag_depth: Option<Word>,
}

#[derive(Default)]
struct CsState {
    function_id: Word,
    builtin_global_invocation_id: Option<Word>,
    builtin_workgroup_id: Option<Word>,
    builtin_local_invocation_id: Option<Word>,
    builtin_local_invocation_index: Option<Word>,
    builtin_subgroup_id: Option<Word>,
}

#[derive(Default)]
struct CommonState {
    subgroup_invocation_id: Option<Word>,
    subgroup_eq_mask: Option<Word>,
    builtin_primitive_id: Option<Word>,
}

/// Open structured region on the control-flow stack.
enum Region {
    If {
        else_label: Word,
        merge: Word,
        seen_else: bool,
    },
    Loop {
        header: Word,
        continue_label: Word,
        merge: Word,
    },
    Block {
        merge: Word,
    },
}

pub struct Compiler {
    builder: Builder,
    glsl_std450: Word,

    program_type: ProgramType,
    options: ModuleOptions,
    meta: ShaderMeta,
    analysis: AnalysisInfo,
    resources: Vec<ShaderResource>,

    entry_point_id: Word,
    entry_interfaces: Vec<Word>,
    inside_function: bool,

    // Register file
    sgprs: GprArray,
    vgprs: GprArray,
    exec: StateRegister,
    vcc: StateRegister,
    m0: RegisterPointer,
    scc: RegisterPointer,

    // Control flow
    regions: Vec<Region>,
    flow_vars: Vec<RegisterPointer>,
    pc: u32,

    // Declared resources (by start register) and active mappings (by the
    // register a descriptor currently lives in; differs for EUD resources).
    buffers_dcl: HashMap<u32, BufferResource>,
    textures_dcl: HashMap<u32, TextureResource>,
    samplers_dcl: HashMap<u32, SamplerResource>,
    buffers: HashMap<u32, BufferResource>,
    textures: HashMap<u32, TextureResource>,
    samplers: HashMap<u32, SamplerResource>,
    resource_slots: Vec<ResourceSlot>,

    // Stage I/O
    inputs: HashMap<u32, RegisterPointer>,
    params: HashMap<u32, RegisterPointer>,
    mrts: HashMap<u32, RegisterPointer>,
    lds: Option<Word>,

    vs: VsState,
    ps: PsState,
    cs: CsState,
    common: CommonState,
}

impl Compiler {
    pub fn new(
        name: &str,
        module_info: &ModuleInfo,
        program_type: ProgramType,
        resources: &[ShaderResource],
        meta: ShaderMeta,
        analysis: &AnalysisInfo,
    ) -> Result<Self> {
        let mut builder = Builder::new();
        builder.set_version(1, 3);

        // Common capabilities for all shaders.
        builder.capability(Capability::Shader);
        builder.capability(Capability::ImageQuery);
        builder.capability(Capability::GroupNonUniform);
        builder.capability(Capability::GroupNonUniformBallot);

        let glsl_std450 = builder.ext_inst_import("GLSL.std.450");
        builder.memory_model(AddressingModel::Logical, MemoryModel::GLSL450);

        // Shader name, so the module is recognizable in capture tools.
        let file = builder.string(name);
        builder.source(SourceLanguage::Unknown, 0, Some(file), None::<String>);

        // Entry point id is needed early: execution modes reference it
        // before the function body exists.
        let entry_point_id = builder.id();

        let sgprs = GprArray::new(&mut builder, "s");
        let vgprs = GprArray::new(&mut builder, "v");
        let exec = StateRegister::new(&mut builder, "exec");
        let vcc = StateRegister::new(&mut builder, "vcc");

        let uint_type = builder.type_int(32, 0);
        let bool_type = builder.type_bool();
        let m0_ptr = builder.type_pointer(None, StorageClass::Private, uint_type);
        let scc_ptr = builder.type_pointer(None, StorageClass::Private, bool_type);
        let m0_id = builder.variable(m0_ptr, None, StorageClass::Private, None);
        builder.name(m0_id, "m0");
        let scc_id = builder.variable(scc_ptr, None, StorageClass::Private, None);
        builder.name(scc_id, "scc");

        let mut compiler = Compiler {
            builder,
            glsl_std450,
            program_type,
            options: module_info.options,
            meta,
            analysis: analysis.clone(),
            resources: resources.to_vec(),
            entry_point_id,
            entry_interfaces: Vec::new(),
            inside_function: false,
            sgprs,
            vgprs,
            exec,
            vcc,
            m0: RegisterPointer {
                ty: VectorType::scalar(ScalarType::Uint32),
                id: m0_id,
            },
            scc: RegisterPointer {
                ty: VectorType::scalar(ScalarType::Bool),
                id: scc_id,
            },
            regions: Vec::new(),
            flow_vars: Vec::new(),
            pc: 0,
            buffers_dcl: HashMap::new(),
            textures_dcl: HashMap::new(),
            samplers_dcl: HashMap::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            samplers: HashMap::new(),
            resource_slots: Vec::new(),
            inputs: HashMap::new(),
            params: HashMap::new(),
            mrts: HashMap::new(),
            lds: None,
            vs: VsState::default(),
            ps: PsState::default(),
            cs: CsState::default(),
            common: CommonState::default(),
        };

        compiler.emit_init()?;
        Ok(compiler)
    }

    /// Declare the resource and I/O interfaces, then set up the stage's user
    /// code function. Each stage has its own peculiarities.
    fn emit_init(&mut self) -> Result<()> {
        self.emit_dcl_input_slots()?;
        self.emit_dcl_export()?;

        match self.program_type {
            ProgramType::VertexShader => self.emit_vs_init()?,
            ProgramType::PixelShader => self.emit_ps_init()?,
            ProgramType::ComputeShader => self.emit_cs_init()?,
            // Acknowledged but intentionally left without user code setup.
            ProgramType::HullShader
            | ProgramType::DomainShader
            | ProgramType::GeometryShader => {}
        }
        Ok(())
    }

    fn emit_vs_init(&mut self) -> Result<()> {
        self.builder.capability(Capability::DrawParameters);
        self.builder.extension("SPV_KHR_shader_draw_parameters");

        // The per-vertex output block the shader writes the position to.
        let per_vertex_struct = self.per_vertex_block_type();
        let per_vertex_ptr =
            self.builder
                .type_pointer(None, StorageClass::Output, per_vertex_struct);
        let per_vertex_out = self.new_var(per_vertex_ptr, StorageClass::Output);
        self.builder.name(per_vertex_out, "vs_vertex_out");
        self.entry_interfaces.push(per_vertex_out);
        self.vs.per_vertex_out = Some(per_vertex_out);

        self.vs.function_id = self.builder.id();
        self.builder.name(self.vs.function_id, "vs_main");
        self.emit_void_function_begin(self.vs.function_id)?;
        Ok(())
    }

    fn emit_ps_init(&mut self) -> Result<()> {
        self.builder.capability(Capability::DerivativeControl);
        self.builder
            .execution_mode(self.entry_point_id, ExecutionMode::OriginUpperLeft, vec![]);

        self.emit_dcl_ps_inputs()?;

        self.ps.function_id = self.builder.id();
        self.builder.name(self.ps.function_id, "ps_main");
        self.emit_void_function_begin(self.ps.function_id)?;
        Ok(())
    }

    fn emit_cs_init(&mut self) -> Result<()> {
        let (x, y, z) = (
            self.meta.cs.num_thread_x.max(1),
            self.meta.cs.num_thread_y.max(1),
            self.meta.cs.num_thread_z.max(1),
        );
        self.builder
            .execution_mode(self.entry_point_id, ExecutionMode::LocalSize, vec![x, y, z]);

        self.emit_dcl_thread_group_shared_memory(self.meta.cs.lds_size)?;
        self.emit_dcl_cross_group_shared_memory()?;

        self.cs.function_id = self.builder.id();
        self.builder.name(self.cs.function_id, "cs_main");
        self.emit_void_function_begin(self.cs.function_id)?;
        Ok(())
    }

    fn emit_dcl_thread_group_shared_memory(&mut self, size: u32) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        let info = RegisterInfo {
            ty: ArrayType {
                ctype: ScalarType::Uint32,
                ccount: 1,
                alength: size / 4,
            },
            sclass: StorageClass::Workgroup,
        };
        let lds = self.emit_new_variable(info)?;
        self.builder.name(lds, "lds");
        self.lds = Some(lds);
        Ok(())
    }

    fn emit_dcl_cross_group_shared_memory(&mut self) -> Result<()> {
        if !self.analysis.has_compute_lane || !self.options.separate_subgroup {
            return Ok(());
        }
        let info = RegisterInfo {
            ty: ArrayType {
                ctype: ScalarType::Uint32,
                ccount: 1,
                alength: self.options.max_compute_subgroup_count,
            },
            sclass: StorageClass::Workgroup,
        };
        let id = self.emit_new_variable(info)?;
        self.builder.name(id, "cross_group_memory");
        Ok(())
    }

    /// Finish the user-code function, assemble the "main" entry function and
    /// serialize the module.
    pub fn finalize(mut self) -> Result<CompiledShader> {
        match self.program_type {
            ProgramType::VertexShader => self.emit_vs_finalize()?,
            ProgramType::PixelShader => self.emit_ps_finalize()?,
            ProgramType::ComputeShader => self.emit_cs_finalize()?,
            ProgramType::HullShader
            | ProgramType::DomainShader
            | ProgramType::GeometryShader => {}
        }

        // All code is emitted; the register arrays cannot grow anymore.
        let vgpr_len = self.vgprs.length;
        let sgpr_len = self.sgprs.length;
        self.vgprs.length_id.resolve(&mut self.builder, vgpr_len)?;
        self.sgprs.length_id.resolve(&mut self.builder, sgpr_len)?;

        self.builder.entry_point(
            self.program_type.execution_model(),
            self.entry_point_id,
            "main",
            self.entry_interfaces.clone(),
        );
        self.builder.name(self.entry_point_id, "main");

        let module = self.builder.module();
        Ok(CompiledShader {
            code: module.assemble(),
            resources: self.resource_slots,
        })
    }

    fn emit_vs_finalize(&mut self) -> Result<()> {
        self.emit_main_function_begin()?;
        self.emit_input_setup()?;

        // Some vertex shaders do not have a fetch shader.
        if let Some(fetch) = self.vs.fetch_function_id {
            self.emit_void_call(fetch)?;
        }
        self.emit_void_call(self.vs.function_id)?;
        self.emit_function_end()?;
        Ok(())
    }

    fn emit_ps_finalize(&mut self) -> Result<()> {
        self.emit_main_function_begin()?;
        self.emit_input_setup()?;
        self.emit_void_call(self.ps.function_id)?;
        self.emit_function_end()?;
        Ok(())
    }

    fn emit_cs_finalize(&mut self) -> Result<()> {
        self.emit_main_function_begin()?;
        self.emit_input_setup()?;
        self.emit_void_call(self.cs.function_id)?;
        self.emit_function_end()?;
        Ok(())
    }

    /// Initialize the hardware state registers and seed the
    /// stage-designated GPRs with system values.
    fn emit_input_setup(&mut self) -> Result<()> {
        self.emit_init_state_registers()?;

        match self.program_type {
            ProgramType::VertexShader => self.emit_vs_input_setup(),
            ProgramType::PixelShader => self.emit_ps_input_setup(),
            ProgramType::ComputeShader => self.emit_cs_input_setup(),
            other => bail_unsupported!("input setup for shader stage {:?}", other),
        }
    }

    /// EXEC starts as the ballot of "every invocation active"; VCC as zero.
    fn emit_init_state_registers(&mut self) -> Result<()> {
        let uvec4 = self.vector_type_id(VectorType::new(ScalarType::Uint32, 4))?;
        let bool_type = self.scalar_type_id(ScalarType::Bool)?;

        let scope = self.const_u32(spirv::Scope::Subgroup as u32);
        let true_id = self.builder.constant_true(bool_type);
        let ballot = self
            .builder
            .group_non_uniform_ballot(uvec4, None, scope, true_id)?;
        let ballot_value = RegisterValue::new(ScalarType::Uint32, 4, ballot);

        let exec = self.exec;
        if self.options.separate_subgroup {
            // Cheat the shader into seeing lanes 32..63 as inactive.
            let low = self.emit_register_extract(ballot_value, RegMask::select(0))?;
            let zero = self.const_u32(0);
            exec.init(&mut self.builder, low.id, zero)?;
        } else {
            let low = self.emit_register_extract(ballot_value, RegMask::select(0))?;
            let high = self.emit_register_extract(ballot_value, RegMask::select(1))?;
            exec.init(&mut self.builder, low.id, high.id)?;
        }

        let zero = self.const_u32(0);
        let vcc = self.vcc;
        vcc.init(&mut self.builder, zero, zero)?;
        Ok(())
    }

    fn emit_vs_input_setup(&mut self) -> Result<()> {
        // v0 carries the index of the current vertex within the buffer.
        let value = self.emit_vs_system_value_load(sysval::SystemValue::VertexId, RegMask::select(0))?;
        self.emit_vgpr_store_at(0, value)?;
        Ok(())
    }

    fn emit_ps_input_setup(&mut self) -> Result<()> {
        use sysval::SystemValue;

        let mut v_index = 0u32;

        // Barycentric register pairs. We source every enabled pair from the
        // fragment coordinate; the distinction between sample and center
        // position is not observable for the supported titles.
        if self.meta.ps.persp_sample_en {
            for c in 0..2 {
                let value = self.emit_ps_system_value_load(SystemValue::Position, RegMask::select(c))?;
                self.emit_vgpr_store_at(v_index, value)?;
                v_index += 1;
            }
        }
        if self.meta.ps.persp_center_en {
            for c in 0..2 {
                let value = self.emit_ps_system_value_load(SystemValue::Position, RegMask::select(c))?;
                self.emit_vgpr_store_at(v_index, value)?;
                v_index += 1;
            }
        }

        if self.meta.ps.persp_centroid_en
            || self.meta.ps.persp_pull_model_en
            || self.meta.ps.linear_sample_en
            || self.meta.ps.linear_center_en
            || self.meta.ps.linear_centroid_en
        {
            bail_unsupported!("pixel shader interpolation mode not implemented");
        }

        if self.meta.ps.pos_x_en {
            let value = self.emit_ps_system_value_load(SystemValue::Position, RegMask::select(0))?;
            self.emit_vgpr_store_at(v_index, value)?;
            v_index += 1;
        }
        if self.meta.ps.pos_y_en {
            let value = self.emit_ps_system_value_load(SystemValue::Position, RegMask::select(1))?;
            self.emit_vgpr_store_at(v_index, value)?;
        }
        Ok(())
    }

    fn emit_cs_input_setup(&mut self) -> Result<()> {
        use sysval::SystemValue;

        // SGPRs after the user data carry the workgroup id components.
        let mut s_index = self.meta.cs.user_sgpr_count;
        let tgid_enables = [
            self.meta.cs.enable_tgid_x,
            self.meta.cs.enable_tgid_y,
            self.meta.cs.enable_tgid_z,
        ];
        for (c, enabled) in tgid_enables.into_iter().enumerate() {
            if enabled {
                let value =
                    self.emit_cs_system_value_load(SystemValue::WorkgroupId, RegMask::select(c as u32))?;
                self.emit_sgpr_store_at(s_index, value)?;
                s_index += 1;
            }
        }

        // v0..v2 carry the local invocation id.
        let value = self.emit_cs_system_value_load(SystemValue::LocalInvocationId, RegMask::select(0))?;
        self.emit_vgpr_store_at(0, value)?;

        let mut v_index = 1;
        if self.meta.cs.thread_id_in_group_count >= 1 {
            let value =
                self.emit_cs_system_value_load(SystemValue::LocalInvocationId, RegMask::select(1))?;
            self.emit_vgpr_store_at(v_index, value)?;
            v_index += 1;
        }
        if self.meta.cs.thread_id_in_group_count >= 2 {
            let value =
                self.emit_cs_system_value_load(SystemValue::LocalInvocationId, RegMask::select(2))?;
            self.emit_vgpr_store_at(v_index, value)?;
        }
        Ok(())
    }

    // --- function plumbing -------------------------------------------------

    fn emit_void_function_begin(&mut self, function_id: Word) -> Result<()> {
        self.emit_function_end()?;

        let void_type = self.builder.type_void();
        let fn_type = self.builder.type_function(void_type, vec![]);
        self.builder
            .begin_function(void_type, Some(function_id), FunctionControl::NONE, fn_type)?;
        self.builder.begin_block(None)?;
        self.inside_function = true;
        Ok(())
    }

    fn emit_function_end(&mut self) -> Result<()> {
        if self.inside_function {
            self.builder.ret()?;
            self.builder.end_function()?;
        }
        self.inside_function = false;
        Ok(())
    }

    fn emit_main_function_begin(&mut self) -> Result<()> {
        self.emit_void_function_begin(self.entry_point_id)
    }

    fn emit_void_call(&mut self, function_id: Word) -> Result<()> {
        let void_type = self.builder.type_void();
        self.builder
            .function_call(void_type, None, function_id, vec![])?;
        Ok(())
    }

    // --- type and constant helpers -----------------------------------------

    pub(crate) fn scalar_type_id(&mut self, ty: ScalarType) -> Result<Word> {
        if ty == ScalarType::Float64 {
            self.builder.capability(Capability::Float64);
        }
        if ty == ScalarType::Sint64 || ty == ScalarType::Uint64 {
            self.builder.capability(Capability::Int64);
        }
        Ok(match ty {
            ScalarType::Uint32 => self.builder.type_int(32, 0),
            ScalarType::Uint64 => self.builder.type_int(64, 0),
            ScalarType::Sint32 => self.builder.type_int(32, 1),
            ScalarType::Sint64 => self.builder.type_int(64, 1),
            ScalarType::Float32 => self.builder.type_float(32),
            ScalarType::Float64 => self.builder.type_float(64),
            ScalarType::Bool => self.builder.type_bool(),
            ScalarType::Float16 => bail_unsupported!("16-bit float register type"),
        })
    }

    pub(crate) fn vector_type_id(&mut self, ty: VectorType) -> Result<Word> {
        let scalar = self.scalar_type_id(ty.ctype)?;
        Ok(if ty.ccount > 1 {
            self.builder.type_vector(scalar, ty.ccount)
        } else {
            scalar
        })
    }

    pub(crate) fn array_type_id(&mut self, ty: ArrayType) -> Result<Word> {
        let vector = self.vector_type_id(VectorType::new(ty.ctype, ty.ccount))?;
        Ok(if ty.alength != 0 {
            let len = self.const_u32(ty.alength);
            self.builder.type_array(vector, len)
        } else {
            vector
        })
    }

    pub(crate) fn pointer_type_id(&mut self, info: RegisterInfo) -> Result<Word> {
        let pointee = self.array_type_id(info.ty)?;
        Ok(self.builder.type_pointer(None, info.sclass, pointee))
    }

    pub(crate) fn const_u32(&mut self, value: u32) -> Word {
        let ty = self.builder.type_int(32, 0);
        self.builder.constant_bit32(ty, value)
    }

    pub(crate) fn const_i32(&mut self, value: i32) -> Word {
        let ty = self.builder.type_int(32, 1);
        self.builder.constant_bit32(ty, value as u32)
    }

    pub(crate) fn const_f32(&mut self, value: f32) -> Word {
        let ty = self.builder.type_float(32);
        self.builder.constant_bit32(ty, value.to_bits())
    }

    pub(crate) fn const_bool(&mut self, value: bool) -> Word {
        let ty = self.builder.type_bool();
        if value {
            self.builder.constant_true(ty)
        } else {
            self.builder.constant_false(ty)
        }
    }

    /// Declare a module-scope variable. Unlike `Builder::variable` this is
    /// safe to call while a function body is open, which the lazily created
    /// builtins and resources rely on.
    pub(crate) fn new_var(&mut self, pointer_type: Word, sclass: StorageClass) -> Word {
        let id = self.builder.id();
        self.builder.module_mut().types_global_values.push(dr::Instruction::new(
            Op::Variable,
            Some(pointer_type),
            Some(id),
            vec![dr::Operand::StorageClass(sclass)],
        ));
        id
    }

    pub(crate) fn new_var_init(
        &mut self,
        pointer_type: Word,
        sclass: StorageClass,
        initializer: Word,
    ) -> Word {
        let id = self.builder.id();
        self.builder.module_mut().types_global_values.push(dr::Instruction::new(
            Op::Variable,
            Some(pointer_type),
            Some(id),
            vec![
                dr::Operand::StorageClass(sclass),
                dr::Operand::IdRef(initializer),
            ],
        ));
        id
    }

    /// Struct types that carry block decorations must not be deduplicated
    /// with unrelated structurally identical types, so they bypass the
    /// builder's type cache.
    pub(crate) fn unique_struct_type(&mut self, members: &[Word]) -> Word {
        let id = self.builder.id();
        self.builder.module_mut().types_global_values.push(dr::Instruction::new(
            Op::TypeStruct,
            None,
            Some(id),
            members.iter().map(|&m| dr::Operand::IdRef(m)).collect(),
        ));
        id
    }

    pub(crate) fn unique_array_type(&mut self, element: Word, length: Word) -> Word {
        let id = self.builder.id();
        self.builder.module_mut().types_global_values.push(dr::Instruction::new(
            Op::TypeArray,
            None,
            Some(id),
            vec![dr::Operand::IdRef(element), dr::Operand::IdRef(length)],
        ));
        id
    }

    pub(crate) fn unique_runtime_array_type(&mut self, element: Word) -> Word {
        let id = self.builder.id();
        self.builder.module_mut().types_global_values.push(dr::Instruction::new(
            Op::TypeRuntimeArray,
            None,
            Some(id),
            vec![dr::Operand::IdRef(element)],
        ));
        id
    }

    pub(crate) fn emit_new_variable(&mut self, info: RegisterInfo) -> Result<Word> {
        let ptr_type = self.pointer_type_id(info)?;
        Ok(self.new_var(ptr_type, info.sclass))
    }

    /// gl_PerVertex with only the position member; clip/cull distances are
    /// not exercised by the supported titles.
    fn per_vertex_block_type(&mut self) -> Word {
        let f32_type = self.builder.type_float(32);
        let vec4 = self.builder.type_vector(f32_type, 4);

        let struct_type = self.unique_struct_type(&[vec4]);
        self.builder.member_decorate(
            struct_type,
            PER_VERTEX_POSITION,
            spirv::Decoration::BuiltIn,
            vec![dr::Operand::BuiltIn(spirv::BuiltIn::Position)],
        );
        self.builder
            .decorate(struct_type, spirv::Decoration::Block, vec![]);
        self.builder.name(struct_type, "s_per_vertex");
        self.builder
            .member_name(struct_type, PER_VERTEX_POSITION, "position");
        debug!("declared per-vertex output block {}", struct_type);
        struct_type
    }

    /// Emitted module state, for tests and diagnostics.
    #[cfg(test)]
    pub(crate) fn module_ref(&self) -> &dr::Module {
        self.builder.module_ref()
    }
}

/// Compile one shader end to end.
pub fn recompile(
    name: &str,
    module_info: &ModuleInfo,
    program_type: ProgramType,
    resources: &[ShaderResource],
    meta: ShaderMeta,
    analysis: &AnalysisInfo,
    tokens: &[crate::token::Token],
) -> Result<CompiledShader> {
    let mut compiler = Compiler::new(name, module_info, program_type, resources, meta, analysis)?;
    compiler.compile(tokens)?;
    compiler.finalize()
}
