//! Shader-stage metadata and the flattened resource table.
//!
//! Everything in here is filled by upstream collaborators (the PM4 command
//! processor and the shader header parser) and consumed read-only by the
//! compiler.

use crate::ins::RegMask;
use rspirv::spirv::ExecutionModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramType {
    VertexShader,
    HullShader,
    DomainShader,
    GeometryShader,
    PixelShader,
    ComputeShader,
}

impl ProgramType {
    pub fn execution_model(self) -> ExecutionModel {
        match self {
            Self::VertexShader => ExecutionModel::Vertex,
            Self::HullShader => ExecutionModel::TessellationControl,
            Self::DomainShader => ExecutionModel::TessellationEvaluation,
            Self::GeometryShader => ExecutionModel::Geometry,
            Self::PixelShader => ExecutionModel::Fragment,
            Self::ComputeShader => ExecutionModel::GLCompute,
        }
    }

    /// Stable stage index used by the binding slot computation.
    pub fn stage_index(self) -> u32 {
        match self {
            Self::VertexShader => 0,
            Self::HullShader => 1,
            Self::DomainShader => 2,
            Self::GeometryShader => 3,
            Self::PixelShader => 4,
            Self::ComputeShader => 5,
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            Self::VertexShader => "vs",
            Self::HullShader => "hs",
            Self::DomainShader => "ds",
            Self::GeometryShader => "gs",
            Self::PixelShader => "ps",
            Self::ComputeShader => "cs",
        }
    }
}

/// Module-wide compile options.
#[derive(Debug, Clone, Copy)]
pub struct ModuleOptions {
    /// Emulate a 64-lane wave with a single host subgroup: the high EXEC
    /// half is forced to zero so the shader believes lanes 32..63 are
    /// inactive.
    pub separate_subgroup: bool,
    pub max_compute_subgroup_count: u32,
}

impl Default for ModuleOptions {
    fn default() -> Self {
        ModuleOptions {
            separate_subgroup: true,
            max_compute_subgroup_count: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ModuleInfo {
    pub options: ModuleOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureChannelType {
    SNorm,
    UNorm,
    Float,
    Srgb,
    SInt,
    UInt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureType {
    Dim1d,
    Dim2d,
    Dim3d,
    Cube,
    Array1d,
    Array2d,
    Msaa2d,
    MsaaArray2d,
}

#[derive(Debug, Clone, Copy)]
pub struct TextureMeta {
    pub channel_type: TextureChannelType,
    pub texture_type: TextureType,
    pub is_depth: bool,
}

/// One vertex attribute as recovered from the fetch shader.
#[derive(Debug, Clone, Copy)]
pub struct VertexInputSemantic {
    /// Semantic index; doubles as the input location.
    pub semantic: u32,
    /// First VGPR the fetched value lands in.
    pub dest_vgpr: u32,
    pub num_elements: u32,
}

#[derive(Debug, Clone, Default)]
pub struct VsMeta {
    pub user_sgpr_count: u32,
    pub input_semantic_table: Vec<VertexInputSemantic>,
}

/// How a pixel-shader input attribute is interpolated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpolationMode {
    #[default]
    Undefined,
    Constant,
    Linear,
    LinearCentroid,
    LinearNoPerspective,
    LinearNoPerspectiveCentroid,
    LinearNoPerspectiveSample,
    LinearSample,
}

#[derive(Debug, Clone, Copy)]
pub struct PsSemanticMapping {
    /// Output location of the corresponding vertex-stage parameter.
    pub out_index: u32,
    pub interpolation: InterpolationMode,
}

#[derive(Debug, Clone, Default)]
pub struct PsMeta {
    pub user_sgpr_count: u32,
    pub semantic_mapping: Vec<PsSemanticMapping>,
    pub persp_sample_en: bool,
    pub persp_center_en: bool,
    pub persp_centroid_en: bool,
    pub persp_pull_model_en: bool,
    pub linear_sample_en: bool,
    pub linear_center_en: bool,
    pub linear_centroid_en: bool,
    pub pos_x_en: bool,
    pub pos_y_en: bool,
    pub texture_infos: Vec<Option<TextureMeta>>,
}

#[derive(Debug, Clone, Default)]
pub struct CsMeta {
    pub user_sgpr_count: u32,
    pub num_thread_x: u32,
    pub num_thread_y: u32,
    pub num_thread_z: u32,
    pub enable_tgid_x: bool,
    pub enable_tgid_y: bool,
    pub enable_tgid_z: bool,
    pub thread_id_in_group_count: u32,
    /// Local data share size in bytes.
    pub lds_size: u32,
    pub texture_infos: Vec<Option<TextureMeta>>,
}

/// Per-stage metadata. Only the member matching the program type is
/// meaningful, the others stay at their defaults.
#[derive(Debug, Clone, Default)]
pub struct ShaderMeta {
    pub vs: VsMeta,
    pub ps: PsMeta,
    pub cs: CsMeta,
}

/// What a resource table entry is used for, following the GCN shader binary
/// input-usage slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputUsageType {
    ImmConstBuffer,
    ImmResource,
    ImmRwResource,
    ImmSampler,
    PtrVertexBufferTable,
    SubPtrFetchShader,
    ImmAluFloatConst,
    ImmAluBool32Const,
    ImmGdsCounterRange,
    ImmGdsMemoryRange,
    ImmGwsBase,
    ImmLdsEsGsSize,
    ImmVertexBuffer,
}

/// Host descriptor kind backing a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    UniformBuffer,
    StorageBuffer,
    SampledImage,
    StorageImage,
    Sampler,
}

/// One entry of the flattened resource table.
#[derive(Debug, Clone, Copy)]
pub struct ShaderResource {
    pub usage: InputUsageType,
    /// Absent for table pointers that do not bind a descriptor themselves.
    pub kind: Option<ResourceKind>,
    /// First user-SGPR the descriptor occupies.
    pub start_register: u32,
    /// Lives in the extended user-data table; bound lazily when a scalar
    /// memory load references it.
    pub in_eud: bool,
    /// Dword offset within the extended user-data table.
    pub eud_offset: u32,
}

/// Host access required for a declared resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceAccess {
    None,
    Read,
    ReadWrite,
}

/// Side-channel record the renderer uses to bind the actual buffer/image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSlot {
    pub slot: u32,
    pub kind: ResourceKind,
    pub access: ResourceAccess,
}

/// Export usage recovered by the upstream analysis pass.
#[derive(Debug, Clone, Default)]
pub struct ExportInfo {
    pub param_count: u32,
    pub mrt_count: u32,
    /// Component masks per parameter; the popcount fixes the output width.
    pub params: Vec<RegMask>,
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisInfo {
    pub export_info: ExportInfo,
    pub has_compute_lane: bool,
}
