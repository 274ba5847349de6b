//! System value loads and stores.
//!
//! Builtin variables are created lazily on first use and cached, so a value
//! referenced from ten places still declares exactly one input. Capabilities
//! are enabled at the same point.

use super::{
    ArrayType, Compiler, RegisterInfo, RegisterValue, VectorType, PER_VERTEX_POSITION,
};
use crate::bail_unsupported;
use crate::error::Result;
use crate::ins::{RegMask, ScalarType};
use log::{debug, warn};
use rspirv::dr;
use rspirv::spirv::{BuiltIn, Capability, Decoration, StorageClass, Word};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SystemValue {
    VertexId,
    InstanceId,
    Position,
    IsFrontFace,
    SampleId,
    PrimitiveId,
    RenderTargetId,
    ViewportId,
    GlobalInvocationId,
    WorkgroupId,
    LocalInvocationId,
    LocalInvocationIndex,
    SubgroupId,
    SubgroupInvocationId,
    SubgroupEqMask,
}

impl Compiler {
    fn emit_new_builtin_variable(
        &mut self,
        info: RegisterInfo,
        builtin: BuiltIn,
        name: &str,
    ) -> Result<Word> {
        let ptr_type = self.pointer_type_id(info)?;
        let id = self.new_var(ptr_type, info.sclass);
        self.builder.decorate(
            id,
            Decoration::BuiltIn,
            [dr::Operand::BuiltIn(builtin)],
        );
        // Integer fragment inputs must be flat.
        if self.program_type == crate::meta::ProgramType::PixelShader
            && info.sclass == StorageClass::Input
            && !info.ty.ctype.is_float()
            && info.ty.ctype != ScalarType::Bool
        {
            self.builder.decorate(id, Decoration::Flat, []);
        }
        self.builder.name(id, name);
        self.entry_interfaces.push(id);
        debug!("declared builtin {name} as %{id}");
        Ok(id)
    }

    fn input_info(ctype: ScalarType, ccount: u32) -> RegisterInfo {
        RegisterInfo {
            ty: ArrayType {
                ctype,
                ccount,
                alength: 0,
            },
            sclass: StorageClass::Input,
        }
    }

    fn load_builtin(&mut self, var: Word, ctype: ScalarType, ccount: u32) -> Result<RegisterValue> {
        let result_type = self.vector_type_id(VectorType::new(ctype, ccount))?;
        let id = self.builder.load(result_type, None, var, None, vec![])?;
        Ok(RegisterValue::new(ctype, ccount, id))
    }

    // --- vertex stage --------------------------------------------------------

    pub(crate) fn emit_vs_system_value_load(
        &mut self,
        value: SystemValue,
        _mask: RegMask,
    ) -> Result<RegisterValue> {
        match value {
            // The hardware counts from the start of the draw's vertex data,
            // the host builtin from the start of the buffer.
            SystemValue::VertexId => {
                let index = self.vs_builtin(BuiltIn::VertexIndex, "vertex_index")?;
                let base = self.vs_builtin(BuiltIn::BaseVertex, "base_vertex")?;
                let index = self.load_builtin(index, ScalarType::Uint32, 1)?;
                let base = self.load_builtin(base, ScalarType::Uint32, 1)?;
                let uint_type = self.scalar_type_id(ScalarType::Uint32)?;
                let id = self.builder.i_sub(uint_type, None, index.id, base.id)?;
                Ok(RegisterValue::new(ScalarType::Uint32, 1, id))
            }
            SystemValue::InstanceId => {
                let index = self.vs_builtin(BuiltIn::InstanceIndex, "instance_index")?;
                let base = self.vs_builtin(BuiltIn::BaseInstance, "base_instance")?;
                let index = self.load_builtin(index, ScalarType::Uint32, 1)?;
                let base = self.load_builtin(base, ScalarType::Uint32, 1)?;
                let uint_type = self.scalar_type_id(ScalarType::Uint32)?;
                let id = self.builder.i_sub(uint_type, None, index.id, base.id)?;
                Ok(RegisterValue::new(ScalarType::Uint32, 1, id))
            }
            SystemValue::SubgroupInvocationId => self.emit_subgroup_invocation_id(),
            SystemValue::SubgroupEqMask => self.emit_subgroup_eq_mask(),
            other => bail_unsupported!("vertex stage system value {:?}", other),
        }
    }

    fn vs_builtin(&mut self, builtin: BuiltIn, name: &str) -> Result<Word> {
        let slot = match builtin {
            BuiltIn::VertexIndex => &mut self.vs.builtin_vertex_id,
            BuiltIn::BaseVertex => &mut self.vs.builtin_base_vertex,
            BuiltIn::InstanceIndex => &mut self.vs.builtin_instance_id,
            BuiltIn::BaseInstance => &mut self.vs.builtin_base_instance,
            _ => bail_unsupported!("vertex stage builtin {:?}", builtin),
        };
        if let Some(id) = *slot {
            return Ok(id);
        }
        let info = Self::input_info(ScalarType::Uint32, 1);
        let id = self.emit_new_builtin_variable(info, builtin, name)?;
        match builtin {
            BuiltIn::VertexIndex => self.vs.builtin_vertex_id = Some(id),
            BuiltIn::BaseVertex => self.vs.builtin_base_vertex = Some(id),
            BuiltIn::InstanceIndex => self.vs.builtin_instance_id = Some(id),
            BuiltIn::BaseInstance => self.vs.builtin_base_instance = Some(id),
            _ => {}
        }
        Ok(id)
    }

    /// Vertex stage system value exports. Position is the only one the
    /// supported titles write.
    pub(crate) fn emit_vs_system_value_store(
        &mut self,
        value: SystemValue,
        mask: RegMask,
        data: RegisterValue,
    ) -> Result<()> {
        match value {
            SystemValue::Position => {
                let per_vertex = match self.vs.per_vertex_out {
                    Some(id) => id,
                    None => bail_unsupported!("position export outside the vertex stage"),
                };
                let f32_type = self.builder.type_float(32);
                let vec4 = self.builder.type_vector(f32_type, 4);
                let ptr_type = self.builder.type_pointer(None, StorageClass::Output, vec4);
                let member = self.const_u32(PER_VERTEX_POSITION);
                let ptr = self
                    .builder
                    .access_chain(ptr_type, None, per_vertex, [member])?;

                if mask == RegMask::first_n(4) && data.ty.ccount == 4 {
                    self.builder.store(ptr, data.id, None, vec![])?;
                } else {
                    let old = self.builder.load(vec4, None, ptr, None, vec![])?;
                    let old = RegisterValue::new(ScalarType::Float32, 4, old);
                    let merged = self.emit_register_insert(old, data, mask)?;
                    self.builder.store(ptr, merged.id, None, vec![])?;
                }
                Ok(())
            }
            other => {
                warn!("ignoring vertex stage system value store {other:?}");
                Ok(())
            }
        }
    }

    // --- pixel stage ---------------------------------------------------------

    pub(crate) fn emit_ps_system_value_load(
        &mut self,
        value: SystemValue,
        mask: RegMask,
    ) -> Result<RegisterValue> {
        match value {
            SystemValue::Position => {
                let var = match self.ps.builtin_frag_coord {
                    Some(id) => id,
                    None => {
                        let info = Self::input_info(ScalarType::Float32, 4);
                        let id =
                            self.emit_new_builtin_variable(info, BuiltIn::FragCoord, "frag_coord")?;
                        self.ps.builtin_frag_coord = Some(id);
                        id
                    }
                };
                let mut coord = self.load_builtin(var, ScalarType::Float32, 4)?;

                // The hardware delivers 1/w in the fourth position channel.
                if mask.test(3) {
                    let f32_type = self.builder.type_float(32);
                    let w = self
                        .builder
                        .composite_extract(f32_type, None, coord.id, [3])?;
                    let one = self.const_f32(1.0);
                    let inv_w = self.builder.f_div(f32_type, None, one, w)?;
                    let vec4 = self.builder.type_vector(f32_type, 4);
                    let id = self
                        .builder
                        .composite_insert(vec4, None, inv_w, coord.id, [3])?;
                    coord = RegisterValue::new(ScalarType::Float32, 4, id);
                }
                self.emit_register_extract(coord, mask)
            }
            SystemValue::IsFrontFace => {
                let var = match self.ps.builtin_is_front_face {
                    Some(id) => id,
                    None => {
                        let info = Self::input_info(ScalarType::Bool, 1);
                        let id = self.emit_new_builtin_variable(
                            info,
                            BuiltIn::FrontFacing,
                            "is_front_face",
                        )?;
                        self.ps.builtin_is_front_face = Some(id);
                        id
                    }
                };
                let flag = self.load_builtin(var, ScalarType::Bool, 1)?;
                // All-ones when front facing, matching the hardware encoding.
                let uint_type = self.scalar_type_id(ScalarType::Uint32)?;
                let ones = self.const_u32(u32::MAX);
                let zero = self.const_u32(0);
                let id = self.builder.select(uint_type, None, flag.id, ones, zero)?;
                Ok(RegisterValue::new(ScalarType::Uint32, 1, id))
            }
            SystemValue::SampleId => {
                let var = match self.ps.builtin_sample_id {
                    Some(id) => id,
                    None => {
                        self.builder.capability(Capability::SampleRateShading);
                        let info = Self::input_info(ScalarType::Uint32, 1);
                        let id =
                            self.emit_new_builtin_variable(info, BuiltIn::SampleId, "sample_id")?;
                        self.ps.builtin_sample_id = Some(id);
                        id
                    }
                };
                self.load_builtin(var, ScalarType::Uint32, 1)
            }
            SystemValue::PrimitiveId => {
                let var = match self.common.builtin_primitive_id {
                    Some(id) => id,
                    None => {
                        self.builder.capability(Capability::Geometry);
                        let info = Self::input_info(ScalarType::Uint32, 1);
                        let id = self.emit_new_builtin_variable(
                            info,
                            BuiltIn::PrimitiveId,
                            "primitive_id",
                        )?;
                        self.common.builtin_primitive_id = Some(id);
                        id
                    }
                };
                self.load_builtin(var, ScalarType::Uint32, 1)
            }
            SystemValue::RenderTargetId => {
                let var = match self.ps.builtin_layer {
                    Some(id) => id,
                    None => {
                        self.builder.capability(Capability::Geometry);
                        let info = Self::input_info(ScalarType::Uint32, 1);
                        let id = self.emit_new_builtin_variable(info, BuiltIn::Layer, "layer")?;
                        self.ps.builtin_layer = Some(id);
                        id
                    }
                };
                self.load_builtin(var, ScalarType::Uint32, 1)
            }
            SystemValue::ViewportId => {
                let var = match self.ps.builtin_viewport_id {
                    Some(id) => id,
                    None => {
                        self.builder.capability(Capability::MultiViewport);
                        let info = Self::input_info(ScalarType::Uint32, 1);
                        let id = self.emit_new_builtin_variable(
                            info,
                            BuiltIn::ViewportIndex,
                            "viewport_id",
                        )?;
                        self.ps.builtin_viewport_id = Some(id);
                        id
                    }
                };
                self.load_builtin(var, ScalarType::Uint32, 1)
            }
            SystemValue::SubgroupInvocationId => self.emit_subgroup_invocation_id(),
            SystemValue::SubgroupEqMask => self.emit_subgroup_eq_mask(),
            other => bail_unsupported!("pixel stage system value {:?}", other),
        }
    }

    // --- compute stage -------------------------------------------------------

    pub(crate) fn emit_cs_system_value_load(
        &mut self,
        value: SystemValue,
        mask: RegMask,
    ) -> Result<RegisterValue> {
        match value {
            SystemValue::GlobalInvocationId => {
                let var = match self.cs.builtin_global_invocation_id {
                    Some(id) => id,
                    None => {
                        let info = Self::input_info(ScalarType::Uint32, 3);
                        let id = self.emit_new_builtin_variable(
                            info,
                            BuiltIn::GlobalInvocationId,
                            "global_invocation_id",
                        )?;
                        self.cs.builtin_global_invocation_id = Some(id);
                        id
                    }
                };
                let global = self.load_builtin(var, ScalarType::Uint32, 3)?;
                self.emit_register_extract(global, mask)
            }
            SystemValue::SubgroupId => {
                let var = match self.cs.builtin_subgroup_id {
                    Some(id) => id,
                    None => {
                        let info = Self::input_info(ScalarType::Uint32, 1);
                        let id =
                            self.emit_new_builtin_variable(info, BuiltIn::SubgroupId, "subgroup_id")?;
                        self.cs.builtin_subgroup_id = Some(id);
                        id
                    }
                };
                self.load_builtin(var, ScalarType::Uint32, 1)
            }
            SystemValue::WorkgroupId => {
                let var = match self.cs.builtin_workgroup_id {
                    Some(id) => id,
                    None => {
                        let info = Self::input_info(ScalarType::Uint32, 3);
                        let id = self.emit_new_builtin_variable(
                            info,
                            BuiltIn::WorkgroupId,
                            "workgroup_id",
                        )?;
                        self.cs.builtin_workgroup_id = Some(id);
                        id
                    }
                };
                let group = self.load_builtin(var, ScalarType::Uint32, 3)?;
                self.emit_register_extract(group, mask)
            }
            SystemValue::LocalInvocationId => {
                let var = match self.cs.builtin_local_invocation_id {
                    Some(id) => id,
                    None => {
                        let info = Self::input_info(ScalarType::Uint32, 3);
                        let id = self.emit_new_builtin_variable(
                            info,
                            BuiltIn::LocalInvocationId,
                            "local_invocation_id",
                        )?;
                        self.cs.builtin_local_invocation_id = Some(id);
                        id
                    }
                };
                let local = self.load_builtin(var, ScalarType::Uint32, 3)?;
                self.emit_register_extract(local, mask)
            }
            SystemValue::LocalInvocationIndex => {
                let var = match self.cs.builtin_local_invocation_index {
                    Some(id) => id,
                    None => {
                        let info = Self::input_info(ScalarType::Uint32, 1);
                        let id = self.emit_new_builtin_variable(
                            info,
                            BuiltIn::LocalInvocationIndex,
                            "local_invocation_index",
                        )?;
                        self.cs.builtin_local_invocation_index = Some(id);
                        id
                    }
                };
                self.load_builtin(var, ScalarType::Uint32, 1)
            }
            SystemValue::SubgroupInvocationId => self.emit_subgroup_invocation_id(),
            SystemValue::SubgroupEqMask => self.emit_subgroup_eq_mask(),
            other => bail_unsupported!("compute stage system value {:?}", other),
        }
    }

    // --- subgroup values (any stage) ------------------------------------------

    fn emit_subgroup_invocation_id(&mut self) -> Result<RegisterValue> {
        let var = match self.common.subgroup_invocation_id {
            Some(id) => id,
            None => {
                let info = Self::input_info(ScalarType::Uint32, 1);
                let id = self.emit_new_builtin_variable(
                    info,
                    BuiltIn::SubgroupLocalInvocationId,
                    "subgroup_invocation_id",
                )?;
                self.common.subgroup_invocation_id = Some(id);
                id
            }
        };
        self.load_builtin(var, ScalarType::Uint32, 1)
    }

    /// A uvec4 with exactly the current lane's bit set; the lane-mask side
    /// of EXEC/VCC tests.
    pub(crate) fn emit_subgroup_eq_mask(&mut self) -> Result<RegisterValue> {
        let var = match self.common.subgroup_eq_mask {
            Some(id) => id,
            None => {
                let info = Self::input_info(ScalarType::Uint32, 4);
                let id = self.emit_new_builtin_variable(
                    info,
                    BuiltIn::SubgroupEqMask,
                    "subgroup_eq_mask",
                )?;
                self.common.subgroup_eq_mask = Some(id);
                id
            }
        };
        self.load_builtin(var, ScalarType::Uint32, 4)
    }
}
