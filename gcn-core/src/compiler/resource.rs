//! Resource and stage-interface declarations.
//!
//! Buffers, images and samplers are declared up front from the flattened
//! resource table. Resources living in the extended user data (EUD) table
//! get their descriptor variable immediately but are attached to a scalar
//! register only when the shader loads them, since the register is not known
//! until then.

use super::{Compiler, RegisterPointer, RegisterValue, VectorType};
use crate::binding::{
    compute_constant_buffer_binding, compute_resource_binding, compute_sampler_binding,
};
use crate::error::Result;
use crate::ins::ScalarType;
use crate::meta::{
    InputUsageType, InterpolationMode, ProgramType, ResourceAccess, ResourceKind, ResourceSlot,
    ShaderResource, TextureChannelType, TextureMeta, TextureType, VertexInputSemantic,
};
use crate::{bail_structural, bail_unsupported};
use log::debug;
use rspirv::dr;
use rspirv::spirv::{Capability, Decoration, Dim, ImageFormat, StorageClass, Word};

/// Uniform buffers are typed as a fixed vec4 array covering the maximum
/// constant buffer range (64 KiB).
const CONST_BUFFER_VEC4_COUNT: u32 = 65536 / 16;

#[derive(Debug, Clone, Copy)]
pub(crate) struct BufferResource {
    pub var_id: Word,
    pub as_ssbo: bool,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TextureResource {
    pub var_id: Word,
    pub image_type_id: Word,
    pub sampled_type: ScalarType,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SamplerResource {
    pub var_id: Word,
    pub type_id: Word,
}

impl Compiler {
    /// Walk the resource table and declare every slot. Table pointers are
    /// resolved here too: the vertex buffer table becomes the emulated fetch
    /// function.
    pub(super) fn emit_dcl_input_slots(&mut self) -> Result<()> {
        let resources = self.resources.clone();
        let mut has_fetch_shader = false;
        let mut has_vertex_buffer_table = false;

        for res in &resources {
            match res.usage {
                InputUsageType::ImmConstBuffer => self.emit_dcl_const_buffer(res)?,
                InputUsageType::ImmResource | InputUsageType::ImmRwResource => {
                    match res.kind {
                        Some(ResourceKind::StorageBuffer) => self.emit_dcl_storage_buffer(res)?,
                        Some(ResourceKind::SampledImage) | Some(ResourceKind::StorageImage) => {
                            self.emit_dcl_texture(res)?
                        }
                        other => bail_structural!(
                            "resource at register {} has unusable kind {:?}",
                            res.start_register,
                            other
                        ),
                    }
                }
                InputUsageType::ImmSampler => self.emit_dcl_sampler(res)?,
                InputUsageType::SubPtrFetchShader => has_fetch_shader = true,
                InputUsageType::PtrVertexBufferTable => has_vertex_buffer_table = true,
                other => bail_unsupported!("input usage type {:?}", other),
            }
        }

        if has_vertex_buffer_table {
            if !has_fetch_shader {
                bail_structural!("vertex buffer table declared without a fetch shader");
            }
            self.emit_dcl_vertex_inputs()?;
        }
        Ok(())
    }

    fn emit_dcl_const_buffer(&mut self, res: &ShaderResource) -> Result<()> {
        let f32_type = self.builder.type_float(32);
        let vec4 = self.builder.type_vector(f32_type, 4);
        let length = self.const_u32(CONST_BUFFER_VEC4_COUNT);

        // Decorated types must stay unique per buffer.
        let array_type = self.unique_array_type(vec4, length);
        self.builder.decorate(
            array_type,
            Decoration::ArrayStride,
            [dr::Operand::LiteralBit32(16)],
        );
        let struct_type = self.unique_struct_type(&[array_type]);
        self.builder.member_decorate(
            struct_type,
            0,
            Decoration::Offset,
            [dr::Operand::LiteralBit32(0)],
        );
        self.builder
            .decorate(struct_type, Decoration::Block, []);

        let ptr_type = self
            .builder
            .type_pointer(None, StorageClass::Uniform, struct_type);
        let var_id = self.new_var(ptr_type, StorageClass::Uniform);

        let binding = compute_constant_buffer_binding(self.program_type, res.start_register);
        self.decorate_descriptor(var_id, binding);
        self.builder.name(var_id, format!("cb{}", res.start_register));

        self.resource_slots.push(ResourceSlot {
            slot: binding,
            kind: ResourceKind::UniformBuffer,
            access: ResourceAccess::Read,
        });

        let buffer = BufferResource {
            var_id,
            as_ssbo: false,
        };
        self.register_buffer(res, buffer);
        debug!(
            "declared constant buffer cb{} at binding {binding}",
            res.start_register
        );
        Ok(())
    }

    fn emit_dcl_storage_buffer(&mut self, res: &ShaderResource) -> Result<()> {
        let uint_type = self.builder.type_int(32, 0);

        let array_type = self.unique_runtime_array_type(uint_type);
        self.builder.decorate(
            array_type,
            Decoration::ArrayStride,
            [dr::Operand::LiteralBit32(4)],
        );
        let struct_type = self.unique_struct_type(&[array_type]);
        self.builder.member_decorate(
            struct_type,
            0,
            Decoration::Offset,
            [dr::Operand::LiteralBit32(0)],
        );
        self.builder
            .decorate(struct_type, Decoration::BufferBlock, []);

        let ptr_type = self
            .builder
            .type_pointer(None, StorageClass::Uniform, struct_type);
        let var_id = self.new_var(ptr_type, StorageClass::Uniform);

        let binding = compute_resource_binding(self.program_type, res.start_register);
        self.decorate_descriptor(var_id, binding);
        self.builder
            .name(var_id, format!("sb{}", res.start_register));

        let access = if res.usage == InputUsageType::ImmRwResource {
            ResourceAccess::ReadWrite
        } else {
            self.builder.decorate(var_id, Decoration::NonWritable, []);
            ResourceAccess::Read
        };
        self.resource_slots.push(ResourceSlot {
            slot: binding,
            kind: ResourceKind::StorageBuffer,
            access,
        });

        let buffer = BufferResource {
            var_id,
            as_ssbo: true,
        };
        self.register_buffer(res, buffer);
        debug!(
            "declared storage buffer sb{} at binding {binding}",
            res.start_register
        );
        Ok(())
    }

    fn emit_dcl_texture(&mut self, res: &ShaderResource) -> Result<()> {
        let meta = self.texture_meta(res.start_register);
        let is_storage = res.kind == Some(ResourceKind::StorageImage);

        let sampled_type = match meta.channel_type {
            TextureChannelType::UInt => ScalarType::Uint32,
            TextureChannelType::SInt => ScalarType::Sint32,
            _ => ScalarType::Float32,
        };
        let sampled_type_id = self.scalar_type_id(sampled_type)?;

        let (dim, arrayed, ms) = match meta.texture_type {
            TextureType::Dim1d => (Dim::Dim1D, 0, 0),
            TextureType::Array1d => (Dim::Dim1D, 1, 0),
            TextureType::Dim2d => (Dim::Dim2D, 0, 0),
            TextureType::Array2d => (Dim::Dim2D, 1, 0),
            TextureType::Msaa2d => (Dim::Dim2D, 0, 1),
            TextureType::MsaaArray2d => (Dim::Dim2D, 1, 1),
            TextureType::Dim3d => (Dim::Dim3D, 0, 0),
            TextureType::Cube => (Dim::DimCube, 0, 0),
        };
        if dim == Dim::Dim1D {
            self.builder.capability(Capability::Sampled1D);
            if is_storage {
                self.builder.capability(Capability::Image1D);
            }
        }
        if is_storage {
            self.builder
                .capability(Capability::StorageImageReadWithoutFormat);
            self.builder
                .capability(Capability::StorageImageWriteWithoutFormat);
        }

        let depth = u32::from(meta.is_depth);
        let sampled = if is_storage { 2 } else { 1 };
        let image_type_id = self.builder.type_image(
            sampled_type_id,
            dim,
            depth,
            arrayed,
            ms,
            sampled,
            ImageFormat::Unknown,
            None,
        );

        let ptr_type =
            self.builder
                .type_pointer(None, StorageClass::UniformConstant, image_type_id);
        let var_id = self.new_var(ptr_type, StorageClass::UniformConstant);

        let binding = compute_resource_binding(self.program_type, res.start_register);
        self.decorate_descriptor(var_id, binding);
        self.builder
            .name(var_id, format!("tex{}", res.start_register));

        let (kind, access) = if is_storage {
            (ResourceKind::StorageImage, ResourceAccess::ReadWrite)
        } else {
            (ResourceKind::SampledImage, ResourceAccess::Read)
        };
        self.resource_slots.push(ResourceSlot {
            slot: binding,
            kind,
            access,
        });

        let texture = TextureResource {
            var_id,
            image_type_id,
            sampled_type,
        };
        if res.in_eud {
            self.textures_dcl.insert(res.eud_offset, texture);
        } else {
            self.textures.insert(res.start_register, texture);
        }
        debug!("declared texture tex{} at binding {binding}", res.start_register);
        Ok(())
    }

    fn emit_dcl_sampler(&mut self, res: &ShaderResource) -> Result<()> {
        let type_id = self.builder.type_sampler();
        let ptr_type = self
            .builder
            .type_pointer(None, StorageClass::UniformConstant, type_id);
        let var_id = self.new_var(ptr_type, StorageClass::UniformConstant);

        let binding = compute_sampler_binding(self.program_type, res.start_register);
        self.decorate_descriptor(var_id, binding);
        self.builder
            .name(var_id, format!("smp{}", res.start_register));

        self.resource_slots.push(ResourceSlot {
            slot: binding,
            kind: ResourceKind::Sampler,
            access: ResourceAccess::None,
        });

        let sampler = SamplerResource { var_id, type_id };
        if res.in_eud {
            self.samplers_dcl.insert(res.eud_offset, sampler);
        } else {
            self.samplers.insert(res.start_register, sampler);
        }
        Ok(())
    }

    fn register_buffer(&mut self, res: &ShaderResource, buffer: BufferResource) {
        if res.in_eud {
            self.buffers_dcl.insert(res.eud_offset, buffer);
        } else {
            self.buffers.insert(res.start_register, buffer);
        }
    }

    fn decorate_descriptor(&mut self, var_id: Word, binding: u32) {
        self.builder.decorate(
            var_id,
            Decoration::DescriptorSet,
            [dr::Operand::LiteralBit32(0)],
        );
        self.builder.decorate(
            var_id,
            Decoration::Binding,
            [dr::Operand::LiteralBit32(binding)],
        );
    }

    /// Attach an EUD-resident descriptor to the scalar register pair it was
    /// just loaded into. Returns false when the offset does not name a
    /// declared resource.
    pub(crate) fn map_eud_resource(&mut self, eud_offset: u32, dst_register: u32) -> bool {
        if let Some(buffer) = self.buffers_dcl.get(&eud_offset).copied() {
            self.buffers.insert(dst_register, buffer);
            return true;
        }
        if let Some(texture) = self.textures_dcl.get(&eud_offset).copied() {
            self.textures.insert(dst_register, texture);
            return true;
        }
        if let Some(sampler) = self.samplers_dcl.get(&eud_offset).copied() {
            self.samplers.insert(dst_register, sampler);
            return true;
        }
        false
    }

    fn texture_meta(&self, register: u32) -> TextureMeta {
        let infos = match self.program_type {
            ProgramType::PixelShader => &self.meta.ps.texture_infos,
            ProgramType::ComputeShader => &self.meta.cs.texture_infos,
            _ => return Self::default_texture_meta(),
        };
        infos
            .get(register as usize)
            .copied()
            .flatten()
            .unwrap_or_else(Self::default_texture_meta)
    }

    fn default_texture_meta() -> TextureMeta {
        TextureMeta {
            channel_type: TextureChannelType::Float,
            texture_type: TextureType::Dim2d,
            is_depth: false,
        }
    }

    // --- vertex fetch emulation -----------------------------------------------

    /// Declare one input per recovered vertex semantic and synthesize the
    /// fetch function that moves the attributes into their destination
    /// VGPRs, replacing the hardware fetch subroutine.
    fn emit_dcl_vertex_inputs(&mut self) -> Result<()> {
        let semantics = self.meta.vs.input_semantic_table.clone();
        if semantics.is_empty() {
            bail_structural!("fetch shader present but no vertex input semantics");
        }

        for semantic in &semantics {
            self.emit_dcl_vertex_input(semantic)?;
        }

        let fetch_id = self.builder.id();
        self.builder.name(fetch_id, "vs_fetch");
        self.emit_void_function_begin(fetch_id)?;

        for semantic in &semantics {
            let input = self.inputs[&semantic.semantic];
            let result_type = self.vector_type_id(input.ty)?;
            let id = self.builder.load(result_type, None, input.id, None, vec![])?;
            let value = RegisterValue {
                ty: input.ty,
                id,
            };
            for c in 0..semantic.num_elements {
                let component = self.emit_register_extract(value, crate::ins::RegMask::select(c))?;
                self.emit_vgpr_store_at(semantic.dest_vgpr + c, component)?;
            }
        }
        self.emit_function_end()?;
        self.vs.fetch_function_id = Some(fetch_id);
        Ok(())
    }

    fn emit_dcl_vertex_input(&mut self, semantic: &VertexInputSemantic) -> Result<()> {
        let vtype = VectorType::new(ScalarType::Float32, semantic.num_elements.max(1));
        let type_id = self.vector_type_id(vtype)?;
        let ptr_type = self.builder.type_pointer(None, StorageClass::Input, type_id);
        let var_id = self.new_var(ptr_type, StorageClass::Input);

        self.builder.decorate(
            var_id,
            Decoration::Location,
            [dr::Operand::LiteralBit32(semantic.semantic)],
        );
        self.builder
            .name(var_id, format!("in_attr{}", semantic.semantic));
        self.entry_interfaces.push(var_id);

        self.inputs.insert(
            semantic.semantic,
            RegisterPointer {
                ty: vtype,
                id: var_id,
            },
        );
        Ok(())
    }

    // --- pixel stage inputs -----------------------------------------------------

    /// One vec4 input per mapped semantic, at the location the linked vertex
    /// stage wrote its parameter to.
    pub(super) fn emit_dcl_ps_inputs(&mut self) -> Result<()> {
        let mappings = self.meta.ps.semantic_mapping.clone();
        for (attr, mapping) in mappings.iter().enumerate() {
            let vtype = VectorType::new(ScalarType::Float32, 4);
            let type_id = self.vector_type_id(vtype)?;
            let ptr_type = self.builder.type_pointer(None, StorageClass::Input, type_id);
            let var_id = self.new_var(ptr_type, StorageClass::Input);

            self.builder.decorate(
                var_id,
                Decoration::Location,
                [dr::Operand::LiteralBit32(mapping.out_index)],
            );
            match mapping.interpolation {
                InterpolationMode::Constant => {
                    self.builder.decorate(var_id, Decoration::Flat, []);
                }
                InterpolationMode::LinearNoPerspective => {
                    self.builder.decorate(var_id, Decoration::NoPerspective, []);
                }
                InterpolationMode::LinearNoPerspectiveCentroid => {
                    self.builder.decorate(var_id, Decoration::NoPerspective, []);
                    self.builder.decorate(var_id, Decoration::Centroid, []);
                }
                InterpolationMode::LinearNoPerspectiveSample => {
                    self.builder.capability(Capability::SampleRateShading);
                    self.builder.decorate(var_id, Decoration::NoPerspective, []);
                    self.builder.decorate(var_id, Decoration::Sample, []);
                }
                InterpolationMode::LinearCentroid => {
                    self.builder.decorate(var_id, Decoration::Centroid, []);
                }
                InterpolationMode::LinearSample => {
                    self.builder.capability(Capability::SampleRateShading);
                    self.builder.decorate(var_id, Decoration::Sample, []);
                }
                InterpolationMode::Linear | InterpolationMode::Undefined => {}
            }
            self.builder.name(var_id, format!("ps_attr{attr}"));
            self.entry_interfaces.push(var_id);

            self.inputs.insert(
                attr as u32,
                RegisterPointer {
                    ty: vtype,
                    id: var_id,
                },
            );
        }
        Ok(())
    }

    // --- export targets -----------------------------------------------------------

    /// Declare the output variables the export instructions will write:
    /// parameters for the vertex stage, render targets for the pixel stage.
    /// Parameter width follows the analysis component mask.
    pub(super) fn emit_dcl_export(&mut self) -> Result<()> {
        match self.program_type {
            ProgramType::VertexShader => {
                for i in 0..self.analysis.export_info.param_count {
                    let width = self
                        .analysis
                        .export_info
                        .params
                        .get(i as usize)
                        .map_or(4, |mask| mask.pop_count().max(1));
                    let var = self.emit_dcl_output(i, width, "out_param")?;
                    self.params.insert(i, var);
                }
            }
            ProgramType::PixelShader => {
                for i in 0..self.analysis.export_info.mrt_count {
                    let var = self.emit_dcl_output(i, 4, "out_mrt")?;
                    self.mrts.insert(i, var);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn emit_dcl_output(
        &mut self,
        location: u32,
        ccount: u32,
        prefix: &str,
    ) -> Result<RegisterPointer> {
        let vtype = VectorType::new(ScalarType::Float32, ccount);
        let type_id = self.vector_type_id(vtype)?;
        let ptr_type = self
            .builder
            .type_pointer(None, StorageClass::Output, type_id);
        let var_id = self.new_var(ptr_type, StorageClass::Output);

        self.builder.decorate(
            var_id,
            Decoration::Location,
            [dr::Operand::LiteralBit32(location)],
        );
        self.builder.name(var_id, format!("{prefix}{location}"));
        self.entry_interfaces.push(var_id);

        Ok(RegisterPointer {
            ty: vtype,
            id: var_id,
        })
    }
}
