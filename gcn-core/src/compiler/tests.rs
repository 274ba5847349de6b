use super::sysval::SystemValue;
use super::*;
use crate::binding::compute_constant_buffer_binding;
use crate::error::CompilerError;
use crate::ins::{
    ExpControl, ExportTarget, InstCategory, InstControl, Instruction, Opcode, Operand,
    OperandField, RegMask, ScalarType, SmrdControl,
};
use crate::meta::{
    AnalysisInfo, InputUsageType, ModuleInfo, ProgramType, ResourceKind, ShaderMeta,
    ShaderResource,
};
use crate::token::{Token, TokenCode, TokenCondition, TokenSetValue, TokenVariable};
use rspirv::dr::{load_words, Module, Operand as SpvOperand};
use rspirv::spirv::{BuiltIn, Decoration, ExecutionModel, Op, StorageClass, Word};

const SPIRV_MAGIC: u32 = 0x0723_0203;

fn setup(program_type: ProgramType, resources: &[ShaderResource]) -> Compiler {
    let _ = env_logger::builder().is_test(true).try_init();
    Compiler::new(
        "test_shader",
        &ModuleInfo::default(),
        program_type,
        resources,
        ShaderMeta::default(),
        &AnalysisInfo::default(),
    )
    .expect("compiler setup")
}

fn code(pc: u32, instructions: Vec<Instruction>) -> Token {
    Token::Code(TokenCode { pc, instructions })
}

fn v_mov_imm(dst: u32) -> Instruction {
    let one = Operand {
        field: OperandField::ConstFloatPos10,
        ty: ScalarType::Float32,
        ..Default::default()
    };
    Instruction::new(Opcode::VMovB32, InstCategory::VectorAlu)
        .with_src(&[one])
        .with_dst(&[Operand::vgpr(dst, ScalarType::Float32)])
}

fn exp_pos() -> Instruction {
    Instruction::new(Opcode::Exp, InstCategory::Export)
        .with_src(&[
            Operand::vgpr(0, ScalarType::Float32),
            Operand::vgpr(1, ScalarType::Float32),
            Operand::vgpr(2, ScalarType::Float32),
            Operand::vgpr(3, ScalarType::Float32),
        ])
        .with_control(InstControl::Exp(ExpControl {
            target: ExportTarget::Pos(0),
            en: RegMask::new(0xf),
            compr: false,
            done: true,
        }))
}

fn s_endpgm() -> Instruction {
    Instruction::new(Opcode::SEndpgm, InstCategory::FlowControl)
}

fn const_buffer_at(register: u32) -> ShaderResource {
    ShaderResource {
        usage: InputUsageType::ImmConstBuffer,
        kind: Some(ResourceKind::UniformBuffer),
        start_register: register,
        in_eud: false,
        eud_offset: 0,
    }
}

fn load(shader: &CompiledShader) -> Module {
    load_words(&shader.code).expect("emitted module parses back")
}

fn count_builtin_decorations(module: &Module, builtin: BuiltIn) -> usize {
    module
        .annotations
        .iter()
        .filter(|inst| {
            inst.class.opcode == Op::Decorate
                && inst.operands.get(1) == Some(&SpvOperand::Decoration(Decoration::BuiltIn))
                && inst.operands.get(2) == Some(&SpvOperand::BuiltIn(builtin))
        })
        .count()
}

fn count_function_ops(module: &Module, op: Op) -> usize {
    module
        .functions
        .iter()
        .flat_map(|f| f.blocks.iter())
        .flat_map(|b| b.instructions.iter())
        .filter(|i| i.class.opcode == op)
        .count()
}

fn named_id(module: &Module, name: &str) -> Option<Word> {
    module.debug_names.iter().find_map(|inst| {
        if inst.class.opcode != Op::Name {
            return None;
        }
        match (&inst.operands[0], &inst.operands[1]) {
            (SpvOperand::IdRef(id), SpvOperand::LiteralString(s)) if s == name => Some(*id),
            _ => None,
        }
    })
}

fn count_output_variables(module: &Module) -> usize {
    module
        .types_global_values
        .iter()
        .filter(|inst| {
            inst.class.opcode == Op::Variable
                && inst.operands.first() == Some(&SpvOperand::StorageClass(StorageClass::Output))
        })
        .count()
}

#[test]
fn balanced_nesting_compiles() {
    let mut compiler = setup(ProgramType::VertexShader, &[]);
    let tokens = vec![
        Token::Variable(TokenVariable { init: 0 }),
        Token::SetValue(TokenSetValue {
            variable: 0,
            value: 1,
        }),
        Token::If(TokenCondition { variable: 0 }),
        Token::Loop,
        Token::Block,
        code(0, vec![v_mov_imm(1)]),
        Token::Branch,
        Token::End,
        Token::Branch,
        Token::End,
        Token::Else,
        code(32, vec![v_mov_imm(2)]),
        Token::End,
        code(64, vec![s_endpgm()]),
    ];
    compiler.compile(&tokens).expect("balanced tokens compile");
    assert_eq!(compiler.open_region_count(), 0);

    let shader = compiler.finalize().expect("finalize");
    assert_eq!(shader.code[0], SPIRV_MAGIC);
}

#[test]
fn end_without_region_is_structural() {
    let mut compiler = setup(ProgramType::VertexShader, &[]);
    let err = compiler.compile(&[Token::End]).unwrap_err();
    assert!(matches!(err, CompilerError::Structural(_)));
}

#[test]
fn unclosed_region_is_structural() {
    let mut compiler = setup(ProgramType::VertexShader, &[]);
    let err = compiler.compile(&[Token::Loop]).unwrap_err();
    assert!(matches!(err, CompilerError::Structural(_)));
}

#[test]
fn branch_outside_breakable_region_is_structural() {
    let mut compiler = setup(ProgramType::VertexShader, &[]);
    let err = compiler.compile(&[Token::Branch]).unwrap_err();
    assert!(matches!(err, CompilerError::Structural(_)));
}

#[test]
fn identical_input_yields_identical_module() {
    let tokens = vec![code(0, vec![v_mov_imm(1), exp_pos(), s_endpgm()])];
    let compile_once = || {
        recompile(
            "determinism",
            &ModuleInfo::default(),
            ProgramType::VertexShader,
            &[const_buffer_at(0)],
            ShaderMeta::default(),
            &AnalysisInfo::default(),
            &tokens,
        )
        .expect("compile")
    };
    let a = compile_once();
    let b = compile_once();
    assert_eq!(a.code, b.code);
    assert_eq!(a.resources, b.resources);
}

#[test]
fn register_file_length_tracks_highest_index() {
    let mut compiler = setup(ProgramType::VertexShader, &[]);
    compiler
        .compile(&[code(0, vec![v_mov_imm(7), s_endpgm()])])
        .expect("compile");
    assert_eq!(compiler.vgprs.length, 8);
}

#[test]
fn builtin_variables_are_created_once() {
    let mut compiler = setup(ProgramType::VertexShader, &[]);
    // Two explicit loads plus the one the input setup emits.
    compiler
        .emit_vs_system_value_load(SystemValue::VertexId, RegMask::select(0))
        .expect("first load");
    compiler
        .emit_vs_system_value_load(SystemValue::VertexId, RegMask::select(0))
        .expect("second load");
    compiler.compile(&[]).expect("compile");
    let module = load(&compiler.finalize().expect("finalize"));

    assert_eq!(count_builtin_decorations(&module, BuiltIn::VertexIndex), 1);
    assert_eq!(count_builtin_decorations(&module, BuiltIn::BaseVertex), 1);
}

#[test]
fn position_w_is_loaded_as_reciprocal() {
    let mut compiler = setup(ProgramType::PixelShader, &[]);
    compiler
        .emit_ps_system_value_load(SystemValue::Position, RegMask::select(3))
        .expect("first position load");
    compiler
        .emit_ps_system_value_load(SystemValue::Position, RegMask::select(0))
        .expect("second position load");
    compiler.compile(&[]).expect("compile");
    let module = load(&compiler.finalize().expect("finalize"));

    assert_eq!(count_builtin_decorations(&module, BuiltIn::FragCoord), 1);
    assert!(count_function_ops(&module, Op::FDiv) >= 1);
}

#[test]
fn vertex_index_is_rebased_on_base_vertex() {
    let mut compiler = setup(ProgramType::VertexShader, &[]);
    compiler.compile(&[]).expect("compile");
    let module = load(&compiler.finalize().expect("finalize"));

    assert_eq!(count_builtin_decorations(&module, BuiltIn::VertexIndex), 1);
    assert_eq!(count_builtin_decorations(&module, BuiltIn::BaseVertex), 1);
    assert!(count_function_ops(&module, Op::ISub) >= 1);
}

#[test]
fn constant_buffer_slot_is_recorded() {
    let shader = recompile(
        "cb_slot",
        &ModuleInfo::default(),
        ProgramType::VertexShader,
        &[const_buffer_at(2)],
        ShaderMeta::default(),
        &AnalysisInfo::default(),
        &[code(0, vec![s_endpgm()])],
    )
    .expect("compile");

    let expected = compute_constant_buffer_binding(ProgramType::VertexShader, 2);
    assert_eq!(shader.resources.len(), 1);
    assert_eq!(shader.resources[0].slot, expected);
}

#[test]
fn eud_descriptor_binds_to_loaded_register() {
    let eud_buffer = ShaderResource {
        usage: InputUsageType::ImmConstBuffer,
        kind: Some(ResourceKind::UniformBuffer),
        start_register: 0,
        in_eud: true,
        eud_offset: 4,
    };
    let descriptor_load = Instruction::new(Opcode::SLoadDwordx4, InstCategory::ScalarMemory)
        .with_dst(&[Operand::sgpr(8, ScalarType::Uint32)])
        .with_control(InstControl::Smrd(SmrdControl {
            offset: 4,
            imm: true,
            count: 4,
        }));
    let buffer_load = Instruction::new(Opcode::SBufferLoadDword, InstCategory::ScalarMemory)
        .with_src(&[Operand::sgpr(8, ScalarType::Uint32)])
        .with_dst(&[Operand::sgpr(12, ScalarType::Uint32)])
        .with_control(InstControl::Smrd(SmrdControl {
            offset: 0,
            imm: true,
            count: 1,
        }));

    let mut compiler = setup(ProgramType::VertexShader, &[eud_buffer]);
    compiler
        .compile(&[code(0, vec![descriptor_load, buffer_load, s_endpgm()])])
        .expect("descriptor mapped before use");

    // Without the descriptor load the buffer access has nothing to bind to.
    let mut compiler = setup(ProgramType::VertexShader, &[eud_buffer]);
    let err = compiler
        .compile(&[code(0, vec![buffer_load, s_endpgm()])])
        .unwrap_err();
    assert!(matches!(err, CompilerError::Structural(_)));
}

#[test]
fn compare_and_select_go_through_ballot() {
    let compare = Instruction::new(Opcode::VCmpEqF32, InstCategory::VectorAlu)
        .with_src(&[
            Operand::vgpr(0, ScalarType::Float32),
            Operand::vgpr(1, ScalarType::Float32),
        ])
        .with_dst(&[Operand::vcc(ScalarType::Uint64)]);
    let select = Instruction::new(Opcode::VCndmaskB32, InstCategory::VectorAlu)
        .with_src(&[
            Operand::vgpr(0, ScalarType::Float32),
            Operand::vgpr(1, ScalarType::Float32),
            Operand::vcc(ScalarType::Uint64),
        ])
        .with_dst(&[Operand::vgpr(2, ScalarType::Float32)]);

    let shader = recompile(
        "lane_ops",
        &ModuleInfo::default(),
        ProgramType::VertexShader,
        &[],
        ShaderMeta::default(),
        &AnalysisInfo::default(),
        &[code(0, vec![compare, select, s_endpgm()])],
    )
    .expect("compile");
    let module = load(&shader);

    // One ballot from the EXEC setup, one from the compare.
    assert!(count_function_ops(&module, Op::GroupNonUniformBallot) >= 2);
    assert!(count_function_ops(&module, Op::Select) >= 1);
}

fn conditional_branch_targets(module: &Module) -> (Word, Word) {
    module
        .functions
        .iter()
        .flat_map(|f| f.blocks.iter())
        .flat_map(|b| b.instructions.iter())
        .find_map(|i| {
            if i.class.opcode != Op::BranchConditional {
                return None;
            }
            match (&i.operands[1], &i.operands[2]) {
                (SpvOperand::IdRef(t), SpvOperand::IdRef(f)) => Some((*t, *f)),
                _ => None,
            }
        })
        .expect("module has a conditional branch")
}

fn block_store_count(module: &Module, label: Word) -> usize {
    module
        .functions
        .iter()
        .flat_map(|f| f.blocks.iter())
        .filter(|b| b.label_id() == Some(label))
        .flat_map(|b| b.instructions.iter())
        .filter(|i| i.class.opcode == Op::Store)
        .count()
}

fn has_decoration(module: &Module, target: Word, decoration: Decoration) -> bool {
    module.annotations.iter().any(|i| {
        i.class.opcode == Op::Decorate
            && i.operands.first() == Some(&SpvOperand::IdRef(target))
            && i.operands.get(1) == Some(&SpvOperand::Decoration(decoration))
    })
}

#[test]
fn float64_register_pair_is_unsupported() {
    let mut compiler = setup(ProgramType::VertexShader, &[]);
    let mov = Instruction::new(Opcode::SMovB32, InstCategory::ScalarAlu)
        .with_src(&[Operand::sgpr(0, ScalarType::Float64)])
        .with_dst(&[Operand::sgpr(2, ScalarType::Float64)]);
    let err = compiler.compile(&[code(0, vec![mov])]).unwrap_err();
    assert!(matches!(err, CompilerError::Unsupported(_)));
}

#[test]
fn if_not_swaps_branch_targets() {
    let build = |negated: bool| {
        let cond = TokenCondition { variable: 0 };
        let tokens = vec![
            Token::Variable(TokenVariable { init: 0 }),
            if negated {
                Token::IfNot(cond)
            } else {
                Token::If(cond)
            },
            code(0, vec![v_mov_imm(1)]),
            Token::End,
            code(8, vec![s_endpgm()]),
        ];
        recompile(
            "cond_vs",
            &ModuleInfo::default(),
            ProgramType::VertexShader,
            &[],
            ShaderMeta::default(),
            &AnalysisInfo::default(),
            &tokens,
        )
        .expect("compile")
    };

    // Plain `If` runs the body when the variable is non-zero; the body (and
    // its register store) sits behind the true target.
    let plain = load(&build(false));
    let (true_label, false_label) = conditional_branch_targets(&plain);
    assert!(block_store_count(&plain, true_label) > 0);
    assert_eq!(block_store_count(&plain, false_label), 0);

    // `IfNot` negates the test, so the same body hangs off the false target.
    let negated = load(&build(true));
    let (true_label, false_label) = conditional_branch_targets(&negated);
    assert_eq!(block_store_count(&negated, true_label), 0);
    assert!(block_store_count(&negated, false_label) > 0);
}

#[test]
fn param_output_width_follows_export_mask() {
    let mut analysis = AnalysisInfo::default();
    analysis.export_info.param_count = 1;
    analysis.export_info.params = vec![RegMask::new(0x3)];

    let shader = recompile(
        "narrow_param",
        &ModuleInfo::default(),
        ProgramType::VertexShader,
        &[],
        ShaderMeta::default(),
        &analysis,
        &[code(0, vec![s_endpgm()])],
    )
    .expect("compile");
    let module = load(&shader);

    let param = named_id(&module, "out_param0").expect("out_param0 is named");
    let var = module
        .types_global_values
        .iter()
        .find(|i| i.result_id == Some(param))
        .expect("output variable");
    let ptr_type = var.result_type.expect("variable has a pointer type");
    let pointee = module
        .types_global_values
        .iter()
        .find(|i| i.result_id == Some(ptr_type))
        .and_then(|i| match i.operands.get(1) {
            Some(SpvOperand::IdRef(id)) => Some(*id),
            _ => None,
        })
        .expect("pointer type");
    let vec_type = module
        .types_global_values
        .iter()
        .find(|i| i.result_id == Some(pointee))
        .expect("pointee type");
    assert_eq!(vec_type.class.opcode, Op::TypeVector);
    assert_eq!(
        vec_type.operands.get(1),
        Some(&SpvOperand::LiteralBit32(2))
    );
}

#[test]
fn read_only_storage_buffer_is_non_writable() {
    let compile = |usage| {
        let storage = ShaderResource {
            usage,
            kind: Some(ResourceKind::StorageBuffer),
            start_register: 4,
            in_eud: false,
            eud_offset: 0,
        };
        recompile(
            "sb_vs",
            &ModuleInfo::default(),
            ProgramType::VertexShader,
            &[storage],
            ShaderMeta::default(),
            &AnalysisInfo::default(),
            &[code(0, vec![s_endpgm()])],
        )
        .expect("compile")
    };

    let read_only = load(&compile(InputUsageType::ImmResource));
    let var = named_id(&read_only, "sb4").expect("sb4 is named");
    assert!(has_decoration(&read_only, var, Decoration::NonWritable));

    let read_write = load(&compile(InputUsageType::ImmRwResource));
    let var = named_id(&read_write, "sb4").expect("sb4 is named");
    assert!(!has_decoration(&read_write, var, Decoration::NonWritable));
}

#[test]
fn lds_direct_source_is_unsupported() {
    let mut compiler = setup(ProgramType::VertexShader, &[]);
    let lds_direct = Operand {
        field: OperandField::LdsDirect,
        ty: ScalarType::Float32,
        ..Default::default()
    };
    let mov = Instruction::new(Opcode::VMovB32, InstCategory::VectorAlu)
        .with_src(&[lds_direct])
        .with_dst(&[Operand::vgpr(0, ScalarType::Float32)]);
    let err = compiler.compile(&[code(0, vec![mov])]).unwrap_err();
    assert!(matches!(err, CompilerError::Unsupported(_)));
}

#[test]
fn exec_high_half_starts_zero_when_subgroups_split() {
    // Default options split the 64-lane wave, so the setup must write a
    // constant zero into exec_hi rather than the ballot's second word.
    let mut compiler = setup(ProgramType::VertexShader, &[]);
    compiler.compile(&[]).expect("compile");
    let module = load(&compiler.finalize().expect("finalize"));

    let exec_hi = named_id(&module, "exec_hi").expect("exec_hi is named");
    let stored: Vec<Word> = module
        .functions
        .iter()
        .flat_map(|f| f.blocks.iter())
        .flat_map(|b| b.instructions.iter())
        .filter(|i| {
            i.class.opcode == Op::Store
                && i.operands.first() == Some(&SpvOperand::IdRef(exec_hi))
        })
        .filter_map(|i| match i.operands.get(1) {
            Some(SpvOperand::IdRef(id)) => Some(*id),
            _ => None,
        })
        .collect();
    assert_eq!(stored.len(), 1);

    let is_zero_const = module.types_global_values.iter().any(|i| {
        i.class.opcode == Op::Constant
            && i.result_id == Some(stored[0])
            && i.operands.first() == Some(&SpvOperand::LiteralBit32(0))
    });
    assert!(is_zero_const);
}

#[test]
fn vertex_shader_end_to_end() {
    let tokens = vec![code(
        0,
        vec![
            v_mov_imm(1),
            v_mov_imm(2),
            v_mov_imm(3),
            exp_pos(),
            s_endpgm(),
        ],
    )];
    let shader = recompile(
        "triangle_vs",
        &ModuleInfo::default(),
        ProgramType::VertexShader,
        &[],
        ShaderMeta::default(),
        &AnalysisInfo::default(),
        &tokens,
    )
    .expect("compile");
    assert_eq!(shader.code[0], SPIRV_MAGIC);

    let module = load(&shader);

    // Exactly one entry point, named "main", with the vertex model.
    assert_eq!(module.entry_points.len(), 1);
    let entry = &module.entry_points[0];
    assert_eq!(
        entry.operands[0],
        SpvOperand::ExecutionModel(ExecutionModel::Vertex)
    );
    assert_eq!(
        entry.operands[2],
        SpvOperand::LiteralString("main".to_string())
    );

    // The user code function is called exactly once.
    let vs_main = named_id(&module, "vs_main").expect("vs_main is named");
    let calls = module
        .functions
        .iter()
        .flat_map(|f| f.blocks.iter())
        .flat_map(|b| b.instructions.iter())
        .filter(|i| {
            i.class.opcode == Op::FunctionCall
                && i.operands.first() == Some(&SpvOperand::IdRef(vs_main))
        })
        .count();
    assert_eq!(calls, 1);

    // No parameters were exported, so the per-vertex block is the only
    // output interface variable.
    assert_eq!(count_output_variables(&module), 1);
}
