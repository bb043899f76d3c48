//! Reachability tracing and translation of source bytecode.
//!
//! Translation runs in two passes over the raw instruction region. The
//! trace pass walks control flow from every entry point, marking which
//! byte offsets hold instructions and counting the words the internal
//! stream will need. The translation pass then emits the internal
//! stream, records branch fixups, and rewrites every entry index from a
//! byte offset to an internal stream index. Offsets the trace never
//! reached are not instructions and are skipped.

use crate::code::Code;
use crate::module::{JumpMap, Module, ModuleSet};
use crate::tables::{SourceBranch, SourceKind, SourceOp, SourceTables};

use core_types::{encode_string, KillType, LoadError, Word};

use log::debug;

/// Two-pass translator for one module's instruction region.
pub struct Tracer<'a> {
    tables: &'a SourceTables,
    data: &'a [u8],
    compressed: bool,

    found: Vec<bool>,
    index: Vec<Word>,
    code_count: usize,
    jump_count: usize,
    jump_map_count: usize,
}

impl<'a> Tracer<'a> {
    /// Creates a tracer over an instruction region. `compressed` selects
    /// the packed operand encoding.
    pub fn new(tables: &'a SourceTables, data: &'a [u8], compressed: bool) -> Self {
        Self {
            tables,
            data,
            compressed,
            found: vec![false; data.len()],
            index: vec![0; data.len()],
            code_count: 0,
            jump_count: 0,
            jump_map_count: 0,
        }
    }

    /// Words the internal stream will hold, valid after tracing.
    pub fn code_count(&self) -> usize {
        self.code_count
    }

    /// Case tables the module will hold, valid after tracing.
    pub fn jump_map_count(&self) -> usize {
        self.jump_map_count
    }

    fn le1(&self, pos: usize) -> Result<Word, LoadError> {
        self.data
            .get(pos)
            .map(|&b| Word::from(b))
            .ok_or(LoadError::UnexpectedEnd)
    }

    fn le2(&self, pos: usize) -> Result<Word, LoadError> {
        let bytes = self
            .data
            .get(pos..pos + 2)
            .ok_or(LoadError::UnexpectedEnd)?;
        Ok(Word::from(u16::from_le_bytes([bytes[0], bytes[1]])))
    }

    fn le4(&self, pos: usize) -> Result<Word, LoadError> {
        let bytes = self
            .data
            .get(pos..pos + 4)
            .ok_or(LoadError::UnexpectedEnd)?;
        Ok(Word::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads the opcode at `iter`: its value, table entry, and encoded
    /// size.
    fn read_op(&self, iter: usize) -> Result<(Word, Option<&'a SourceOp>, usize), LoadError> {
        if self.compressed {
            let mut op_code = self.le1(iter)?;
            let mut op_size = 1;
            if op_code >= 240 {
                op_code = 240 + ((op_code - 240) << 8) + self.le1(iter + 1)?;
                op_size = 2;
            }
            Ok((op_code, self.tables.find_op(op_code), op_size))
        } else {
            let op_code = self.le4(iter)?;
            Ok((op_code, self.tables.find_op(op_code), 4))
        }
    }

    /// Bytes of operand data following the opcode at `iter`.
    fn arg_bytes(&self, op: &SourceOp, iter: usize) -> Result<usize, LoadError> {
        match op.kind {
            SourceKind::PushLitArrB => Ok(self.le1(iter)? as usize + 1),
            SourceKind::JcndTab => {
                let aligned = (iter + 3) & !3usize;
                let count = self.le4(aligned)? as usize;
                Ok(aligned - iter + count * 8 + 4)
            }
            _ => {
                let mut bytes = 0;
                for c in op.args.bytes() {
                    bytes += match c {
                        b'B' => 1,
                        b'H' => 2,
                        b'W' => 4,
                        b'b' => {
                            if self.compressed {
                                1
                            } else {
                                4
                            }
                        }
                        b'h' => {
                            if self.compressed {
                                2
                            } else {
                                4
                            }
                        }
                        _ => 0,
                    };
                }
                Ok(bytes)
            }
        }
    }

    /// Argument count and native index operands of a native call op.
    fn read_call_func(&self, iter: usize) -> Result<(Word, Word), LoadError> {
        if self.compressed {
            Ok((self.le1(iter)?, self.le2(iter + 1)?))
        } else {
            Ok((self.le4(iter)?, self.le4(iter + 4)?))
        }
    }

    /// Marks an instruction's bytes. Returns false when the exact range
    /// was already found; a partial overlap means two trace paths
    /// disagree about instruction boundaries.
    fn set_found(&mut self, first: usize, last: usize) -> Result<bool, LoadError> {
        let range = &mut self.found[first..last];
        let found = range.iter().filter(|&&b| b).count();
        if found != 0 {
            if found != last - first {
                return Err(LoadError::CodeOverlap(first as Word));
            }
            return Ok(false);
        }
        range.fill(true);
        Ok(true)
    }

    /// Traces control flow from every entry point of `module`.
    pub fn trace(
        &mut self,
        module: &Module,
        set: &ModuleSet,
        handle: Word,
    ) -> Result<(), LoadError> {
        let kill_words = 1 + Code::Kill.argc() as usize;

        // Kill at index zero catches branches to nowhere.
        self.code_count += kill_words;

        let mut pending = Vec::new();
        for &func_handle in &module.functions {
            if let Some(func) = set.function(func_handle) {
                if func.module == handle {
                    pending.push(func.code_idx as usize);
                }
            }
        }
        pending.extend(module.jumps.iter().map(|&j| j as usize));
        pending.extend(module.scripts.iter().map(|s| s.code_idx as usize));

        while let Some(iter) = pending.pop() {
            self.trace_path(iter, &mut pending)?;
        }

        // Kill past the end catches execution off the stream.
        self.code_count += kill_words;

        debug!(
            "traced {:?}: {} words, {} branches, {} case tables",
            module.name, self.code_count, self.jump_count, self.jump_map_count
        );
        Ok(())
    }

    fn trace_path(&mut self, start: usize, pending: &mut Vec<usize>) -> Result<(), LoadError> {
        let size = self.data.len();
        let kill_words = 1 + Code::Kill.argc() as usize;
        let mut iter = start;

        loop {
            // Running off the end produces a Kill at dispatch but the
            // bytecode is otherwise well formed.
            if iter == size {
                return Ok(());
            }
            if iter > size {
                return Err(LoadError::UnexpectedEnd);
            }

            let (_, op, op_size) = self.read_op(iter)?;
            let Some(op) = op else {
                // Untranslatable op: mark it so the translator emits a
                // Kill in its place.
                self.set_found(iter, iter + op_size)?;
                self.code_count += kill_words;
                return Ok(());
            };

            let op_size_full = op_size + self.arg_bytes(op, iter + op_size)?;
            if size - iter < op_size_full {
                return Err(LoadError::UnexpectedEnd);
            }
            let mut next = iter + op_size_full;

            if !self.set_found(iter, next)? {
                return Ok(());
            }

            // Count the internal words this op becomes.
            match op.kind {
                SourceKind::CallNul | SourceKind::RetnNul => self.code_count += 3,
                SourceKind::CallSpecLit | SourceKind::PushLitNB => {
                    self.code_count += op.argc as usize + 2;
                }
                SourceKind::PushLitArrB => {
                    self.code_count += self.le1(iter + op_size)? as usize + 2;
                }
                SourceKind::CallFunc => {
                    let (argc, func) = self.read_call_func(iter + op_size)?;
                    let Some(alias) = self.tables.find_func(func) else {
                        self.code_count += kill_words;
                        return Ok(());
                    };
                    let trans = alias.trans_code(argc);
                    self.code_count += trans.argc() as usize + 1;
                    if trans == Code::Kill {
                        return Ok(());
                    }
                }
                _ => {
                    if op.trans == Code::CallFuncLit {
                        self.code_count += op.argc as usize + 1 + 2;
                    } else {
                        self.code_count += op.trans.argc() as usize + 1;
                    }
                    if op.trans == Code::Kill {
                        return Ok(());
                    }
                }
            }

            // Follow branches.
            match op.branch {
                SourceBranch::None => {}
                SourceBranch::CondSingle => {
                    self.jump_count += 1;
                    pending.push(self.le4(iter + op_size)? as usize);
                }
                SourceBranch::CondLit => {
                    self.jump_count += 1;
                    pending.push(self.le4(iter + op_size + 4)? as usize);
                }
                SourceBranch::Table => {
                    let mut jump_iter = (iter + op_size + 3) & !3usize;
                    let count = self.le4(jump_iter)? as usize;
                    jump_iter += 4;
                    self.jump_map_count += 1;
                    for _ in 0..count {
                        pending.push(self.le4(jump_iter + 4)? as usize);
                        jump_iter += 8;
                    }
                }
                SourceBranch::Jump => {
                    self.jump_count += 1;
                    next = self.le4(iter + op_size)? as usize;
                }
                SourceBranch::Terminal => return Ok(()),
            }

            iter = next;
        }
    }

    /// Emits the internal stream into `module` and rewrites every entry
    /// index. Must run after [`Tracer::trace`] on the same region.
    pub fn translate(
        &mut self,
        module: &mut Module,
        set: &mut ModuleSet,
        handle: Word,
    ) -> Result<(), LoadError> {
        let size = self.data.len();
        let mut codes: Vec<Word> = Vec::with_capacity(self.code_count);
        let mut fixups: Vec<usize> = Vec::with_capacity(self.jump_count);
        module.jump_maps = Vec::with_capacity(self.jump_map_count);

        // Kill at index zero catches branches to nowhere.
        codes.push(Code::Kill.to_word());
        codes.push(KillType::OutOfBounds.to_word());
        codes.push(0);

        let mut iter = 0;
        while iter != size {
            if !self.found[iter] {
                iter += 1;
                continue;
            }

            self.index[iter] = codes.len() as Word;

            let (op_code, op, op_size) = self.read_op(iter)?;
            let Some(op) = op else {
                codes.push(Code::Kill.to_word());
                codes.push(KillType::UnknownCode.to_word());
                codes.push(op_code);
                iter += op_size;
                continue;
            };

            let next = iter + op_size + self.arg_bytes(op, iter + op_size)?;
            let mut args_from = iter + op_size;
            let mut emit_args = false;

            match op.kind {
                SourceKind::CallNul => {
                    codes.push(op.trans.to_word());
                    codes.push(if self.compressed {
                        self.le1(args_from)?
                    } else {
                        self.le4(args_from)?
                    });
                    codes.push(Code::DropNul.to_word());
                }
                SourceKind::CallSpecStk => {
                    codes.push(op.trans.to_word());
                    codes.push(op.stack_argc);
                    emit_args = true;
                }
                SourceKind::CallSpecLit => {
                    codes.push(op.trans.to_word());
                    codes.push(op.argc - 1);
                    emit_args = true;
                }
                SourceKind::JcndTab => {
                    let mut jump_iter = (args_from + 3) & !3usize;
                    let count = self.le4(jump_iter)? as usize;
                    jump_iter += 4;

                    codes.push(op.trans.to_word());
                    codes.push(module.jump_maps.len() as Word);

                    let mut map = JumpMap::default();
                    for _ in 0..count {
                        map.add(self.le4(jump_iter)?, self.le4(jump_iter + 4)?);
                        jump_iter += 8;
                    }
                    module.jump_maps.push(map);
                }
                SourceKind::PushLitArrB => {
                    codes.push(op.trans.to_word());
                    let count = self.le1(args_from)? as usize;
                    codes.push(count as Word);
                    args_from += 1;
                    for n in 0..count {
                        codes.push(self.le1(args_from + n)?);
                    }
                }
                SourceKind::PushLitNB => {
                    codes.push(op.trans.to_word());
                    codes.push(op.argc);
                    emit_args = true;
                }
                SourceKind::RetnNul => {
                    codes.push(Code::PushLit.to_word());
                    codes.push(0);
                    codes.push(op.trans.to_word());
                }
                SourceKind::CallFunc => {
                    let (argc, func) = self.read_call_func(args_from)?;
                    match self.tables.find_func(func) {
                        None => {
                            codes.push(Code::Kill.to_word());
                            codes.push(KillType::UnknownFunc.to_word());
                            codes.push(func);
                        }
                        Some(alias) => {
                            let trans = alias.trans_code(argc);
                            codes.push(trans.to_word());
                            if trans == Code::Kill {
                                codes.push(KillType::UnknownFunc.to_word());
                                codes.push(func);
                            } else if trans == Code::CallFunc {
                                codes.push(argc);
                                codes.push(alias.trans_func);
                            }
                        }
                    }
                }
                SourceKind::Normal => {
                    codes.push(op.trans.to_word());
                    if op.trans == Code::Kill {
                        codes.push(KillType::UnknownCode.to_word());
                        codes.push(op_code);
                    } else {
                        if op.trans == Code::CallFunc {
                            codes.push(op.stack_argc);
                            codes.push(op.trans_func);
                        } else if op.trans == Code::CallFuncLit {
                            codes.push(op.argc);
                            codes.push(op.trans_func);
                        }
                        emit_args = true;
                    }
                }
            }

            if emit_args {
                for c in op.args.bytes() {
                    match c {
                        b'B' => {
                            codes.push(self.le1(args_from)?);
                            args_from += 1;
                        }
                        b'H' => {
                            codes.push(self.le2(args_from)?);
                            args_from += 2;
                        }
                        b'W' => {
                            codes.push(self.le4(args_from)?);
                            args_from += 4;
                        }
                        b'b' => {
                            if self.compressed {
                                codes.push(self.le1(args_from)?);
                                args_from += 1;
                            } else {
                                codes.push(self.le4(args_from)?);
                                args_from += 4;
                            }
                        }
                        b'h' => {
                            if self.compressed {
                                codes.push(self.le2(args_from)?);
                                args_from += 2;
                            } else {
                                codes.push(self.le4(args_from)?);
                                args_from += 4;
                            }
                        }
                        b'J' => fixups.push(codes.len() - 1),
                        b'S' => {
                            let last = codes.len() - 1;
                            if let Some(&idx) = module.strings.get(codes[last] as usize) {
                                codes[last] = encode_string(idx);
                            }
                        }
                        _ => {}
                    }
                }
            }

            iter = next;
        }

        // Kill past the end catches execution off the stream.
        codes.push(Code::Kill.to_word());
        codes.push(KillType::OutOfBounds.to_word());
        codes.push(1);

        if codes.len() != self.code_count {
            return Err(LoadError::TranslationDesync);
        }

        // Branch operands become stream indices, forward targets
        // included, now that every instruction has one.
        for pos in fixups {
            let target = codes[pos] as usize;
            codes[pos] = if target < size { self.index[target] } else { 0 };
        }

        let translate_idx =
            |index: &[Word], idx: Word| if (idx as usize) < size { index[idx as usize] } else { 0 };

        for &func_handle in &module.functions {
            if let Some(func) = set.function_mut(func_handle) {
                if func.module == handle {
                    func.code_idx = translate_idx(&self.index, func.code_idx);
                }
            }
        }
        for jump in &mut module.jumps {
            *jump = translate_idx(&self.index, *jump);
        }
        for map in &mut module.jump_maps {
            for target in map.cases_mut() {
                *target = translate_idx(&self.index, *target);
            }
        }
        for script in &mut module.scripts {
            script.code_idx = translate_idx(&self.index, script.code_idx);
        }

        module.codes = codes;
        Ok(())
    }
}
