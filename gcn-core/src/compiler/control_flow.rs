//! Structured control-flow lowering.
//!
//! The token list arrives stack-balanced: every `Loop`/`Block`/`If`/`IfNot`
//! has exactly one matching `End`. Lowering keeps a region stack mirroring
//! that nesting; any imbalance is reported as a structural error rather than
//! silently producing a malformed module.

use super::{Compiler, Region, RegisterPointer, VectorType};
use crate::bail_structural;
use crate::error::Result;
use crate::ins::ScalarType;
use crate::token::{Token, TokenCondition, TokenSetValue};
use log::trace;
use rspirv::spirv::{LoopControl, SelectionControl, StorageClass};

impl Compiler {
    /// Translate the whole token list into the currently open user-code
    /// function.
    pub fn compile(&mut self, tokens: &[Token]) -> Result<()> {
        if !self.inside_function {
            bail_structural!(
                "shader stage {:?} has no user code function",
                self.program_type
            );
        }

        // Flow-control temporaries are declared before any code so that
        // forward references from `If` tokens always resolve.
        for token in tokens {
            if let Token::Variable(var) = token {
                let uint_type = self.builder.type_int(32, 0);
                let ptr_type =
                    self.builder
                        .type_pointer(None, StorageClass::Private, uint_type);
                let init = self.const_u32(var.init);
                let id = self.new_var_init(ptr_type, StorageClass::Private, init);
                self.builder
                    .name(id, format!("flow{}", self.flow_vars.len()));
                self.flow_vars.push(RegisterPointer {
                    ty: VectorType::scalar(ScalarType::Uint32),
                    id,
                });
            }
        }

        for token in tokens {
            self.compile_token(token)?;
        }

        if !self.regions.is_empty() {
            bail_structural!("{} unclosed control flow regions", self.regions.len());
        }
        Ok(())
    }

    fn compile_token(&mut self, token: &Token) -> Result<()> {
        match token {
            Token::Code(code) => {
                self.pc = code.pc;
                for ins in &code.instructions {
                    self.compile_instruction(ins)?;
                    self.pc += ins.length;
                }
                Ok(())
            }
            Token::Loop => self.emit_loop_begin(),
            Token::Block => self.emit_block_begin(),
            Token::If(cond) => self.emit_if_begin(cond, false),
            Token::IfNot(cond) => self.emit_if_begin(cond, true),
            Token::Else => self.emit_else(),
            Token::Branch => self.emit_break(),
            Token::End => self.emit_region_end(),
            Token::SetValue(set) => self.emit_set_value(set),
            Token::Variable(_) => Ok(()),
            Token::Invalid => bail_structural!("invalid token in control flow list"),
        }
    }

    fn emit_loop_begin(&mut self) -> Result<()> {
        let header = self.builder.id();
        let continue_label = self.builder.id();
        let merge = self.builder.id();
        let body = self.builder.id();

        self.builder.branch(header)?;
        self.builder.begin_block(Some(header))?;
        self.builder
            .loop_merge(merge, continue_label, LoopControl::NONE, [])?;
        self.builder.branch(body)?;
        self.builder.begin_block(Some(body))?;

        self.regions.push(Region::Loop {
            header,
            continue_label,
            merge,
        });
        trace!("loop region at pc {:#x}", self.pc);
        Ok(())
    }

    /// A breakable straight-line region, lowered as a selection that is
    /// always taken so its merge block can serve as the break target.
    fn emit_block_begin(&mut self) -> Result<()> {
        let body = self.builder.id();
        let merge = self.builder.id();

        let cond = self.const_bool(true);
        self.builder.selection_merge(merge, SelectionControl::NONE)?;
        self.builder.branch_conditional(cond, body, merge, [])?;
        self.builder.begin_block(Some(body))?;

        self.regions.push(Region::Block { merge });
        trace!("block region at pc {:#x}", self.pc);
        Ok(())
    }

    fn emit_if_begin(&mut self, cond: &TokenCondition, invert: bool) -> Result<()> {
        let var = match self.flow_vars.get(cond.variable as usize) {
            Some(ptr) => *ptr,
            None => bail_structural!("condition references undeclared variable {}", cond.variable),
        };

        let uint_type = self.scalar_type_id(ScalarType::Uint32)?;
        let bool_type = self.scalar_type_id(ScalarType::Bool)?;
        let loaded = self.builder.load(uint_type, None, var.id, None, vec![])?;
        let zero = self.const_u32(0);
        let test = self.builder.i_not_equal(bool_type, None, loaded, zero)?;

        let then_label = self.builder.id();
        let else_label = self.builder.id();
        let merge = self.builder.id();

        let (true_target, false_target) = if invert {
            (else_label, then_label)
        } else {
            (then_label, else_label)
        };
        self.builder.selection_merge(merge, SelectionControl::NONE)?;
        self.builder
            .branch_conditional(test, true_target, false_target, [])?;
        self.builder.begin_block(Some(then_label))?;

        self.regions.push(Region::If {
            else_label,
            merge,
            seen_else: false,
        });
        Ok(())
    }

    fn emit_else(&mut self) -> Result<()> {
        match self.regions.pop() {
            Some(Region::If {
                else_label,
                merge,
                seen_else: false,
            }) => {
                self.builder.branch(merge)?;
                self.builder.begin_block(Some(else_label))?;
                self.regions.push(Region::If {
                    else_label,
                    merge,
                    seen_else: true,
                });
                Ok(())
            }
            Some(Region::If { .. }) => bail_structural!("second else in one conditional"),
            _ => bail_structural!("else outside a conditional region"),
        }
    }

    /// Break out of the innermost loop or block. The code after the break is
    /// unreachable but tokens may still follow, so a fresh block is opened.
    fn emit_break(&mut self) -> Result<()> {
        let target = self
            .regions
            .iter()
            .rev()
            .find_map(|region| match region {
                Region::Loop { merge, .. } | Region::Block { merge } => Some(*merge),
                Region::If { .. } => None,
            });
        let merge = match target {
            Some(merge) => merge,
            None => bail_structural!("branch outside any breakable region"),
        };
        self.builder.branch(merge)?;
        let dead = self.builder.id();
        self.builder.begin_block(Some(dead))?;
        Ok(())
    }

    fn emit_region_end(&mut self) -> Result<()> {
        match self.regions.pop() {
            Some(Region::If {
                else_label,
                merge,
                seen_else,
            }) => {
                self.builder.branch(merge)?;
                if !seen_else {
                    self.builder.begin_block(Some(else_label))?;
                    self.builder.branch(merge)?;
                }
                self.builder.begin_block(Some(merge))?;
                Ok(())
            }
            Some(Region::Loop {
                header,
                continue_label,
                merge,
            }) => {
                self.builder.branch(continue_label)?;
                self.builder.begin_block(Some(continue_label))?;
                self.builder.branch(header)?;
                self.builder.begin_block(Some(merge))?;
                Ok(())
            }
            Some(Region::Block { merge }) => {
                self.builder.branch(merge)?;
                self.builder.begin_block(Some(merge))?;
                Ok(())
            }
            None => bail_structural!("end token without an open region"),
        }
    }

    fn emit_set_value(&mut self, set: &TokenSetValue) -> Result<()> {
        let var = match self.flow_vars.get(set.variable as usize) {
            Some(ptr) => *ptr,
            None => bail_structural!("set-value references undeclared variable {}", set.variable),
        };
        let value = self.const_u32(set.value);
        self.builder.store(var.id, value, None, vec![])?;
        Ok(())
    }

    /// Absolute byte target of a relative flow-control instruction. The
    /// structuring pass has already turned branches into tokens, so the
    /// compiler only logs these.
    pub(crate) fn branch_target(&self, simm: i16) -> u32 {
        // The offset counts dwords from the end of the 4-byte instruction.
        (self.pc as i64 + 4 + (simm as i64) * 4) as u32
    }

    #[cfg(test)]
    pub(crate) fn open_region_count(&self) -> usize {
        self.regions.len()
    }
}
