//! Binding slot assignment.
//!
//! Slots are a pure function of (stage, resource kind, register index). The
//! renderer recomputes the same function when it binds actual buffers,
//! images and samplers at draw time, so the mapping must stay stable and
//! deterministic.

use crate::meta::ProgramType;

/// Constant buffers occupy the first slots of a stage's range.
pub const CONST_BUFFER_SLOT_COUNT: u32 = 16;
/// Then sampled/storage images and storage buffers.
pub const RESOURCE_SLOT_COUNT: u32 = 32;
/// Then samplers.
pub const SAMPLER_SLOT_COUNT: u32 = 16;

pub const PER_STAGE_SLOT_COUNT: u32 =
    CONST_BUFFER_SLOT_COUNT + RESOURCE_SLOT_COUNT + SAMPLER_SLOT_COUNT;

fn stage_base(stage: ProgramType) -> u32 {
    stage.stage_index() * PER_STAGE_SLOT_COUNT
}

pub fn compute_constant_buffer_binding(stage: ProgramType, register: u32) -> u32 {
    stage_base(stage) + register
}

pub fn compute_resource_binding(stage: ProgramType, register: u32) -> u32 {
    stage_base(stage) + CONST_BUFFER_SLOT_COUNT + register
}

pub fn compute_sampler_binding(stage: ProgramType, register: u32) -> u32 {
    stage_base(stage) + CONST_BUFFER_SLOT_COUNT + RESOURCE_SLOT_COUNT + register
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_is_deterministic() {
        let a = compute_resource_binding(ProgramType::PixelShader, 3);
        let b = compute_resource_binding(ProgramType::PixelShader, 3);
        assert_eq!(a, b);
    }

    #[test]
    fn kinds_never_collide_at_same_register() {
        let cb = compute_constant_buffer_binding(ProgramType::VertexShader, 3);
        let res = compute_resource_binding(ProgramType::VertexShader, 3);
        let smp = compute_sampler_binding(ProgramType::VertexShader, 3);
        assert_ne!(cb, res);
        assert_ne!(cb, smp);
        assert_ne!(res, smp);
    }

    #[test]
    fn stages_never_collide() {
        let vs = compute_sampler_binding(ProgramType::VertexShader, SAMPLER_SLOT_COUNT - 1);
        let hs = compute_constant_buffer_binding(ProgramType::HullShader, 0);
        assert!(vs < hs);
    }
}
