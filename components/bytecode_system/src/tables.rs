//! Source instruction and native alias tables.
//!
//! The loader never executes source bytecode directly; it translates
//! through these tables into the internal instruction set. Each
//! [`SourceOp`] describes one source opcode: its operand layout, the
//! internal code it becomes, and any special tracing behavior. Hosts
//! extend both tables before loading modules to add their own opcodes
//! and native aliases.

use crate::code::{natives, Code};

use core_types::Word;

use std::collections::HashMap;

/// Emission family for a source opcode.
///
/// Most opcodes translate one-to-one and use [`SourceKind::Normal`]; the
/// rest rewrite into multi-instruction or operand-reshaped forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Plain translation: internal code plus converted operands.
    Normal,
    /// Call that discards its result: call plus a stack drop.
    CallNul,
    /// Automatic call taking arguments from the stack; the declared
    /// stack argument count becomes an operand.
    CallSpecStk,
    /// Automatic call with literal arguments in the stream.
    CallSpecLit,
    /// Computed branch through an aligned case table.
    JcndTab,
    /// Byte-count-prefixed literal array push.
    PushLitArrB,
    /// Fixed-width byte literal array push.
    PushLitNB,
    /// Return with no value: pushes zero first.
    RetnNul,
    /// Native call with argument count and native index operands.
    CallFunc,
}

/// Control-flow effect of a source opcode during tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceBranch {
    /// Falls through to the next instruction.
    None,
    /// Conditional branch whose target is the first operand.
    CondSingle,
    /// Conditional branch whose target follows a literal word.
    CondLit,
    /// Branch through the opcode's case table.
    Table,
    /// Unconditional branch to a literal target.
    Jump,
    /// Ends the trace path: dynamic jump, return, or terminate.
    Terminal,
}

/// One source opcode description.
///
/// The operand layout string uses one letter per operand: `B` byte, `H`
/// half word, `W` word, `b`/`h` byte/half under packed encoding and a
/// full word otherwise. `J` marks the preceding operand as a branch
/// target and `S` as a string literal index; neither consumes bytes.
/// Remaining letters annotate register classes for host tooling and are
/// ignored here.
#[derive(Debug, Clone)]
pub struct SourceOp {
    /// Operand layout.
    pub args: String,
    /// Operand count, derived from the layout.
    pub argc: Word,
    /// Stack cells the opcode consumes, for automatic and native calls.
    pub stack_argc: Word,
    /// Internal code emitted for this opcode.
    pub trans: Code,
    /// Native index for opcodes that become native calls.
    pub trans_func: Word,
    /// Emission family.
    pub kind: SourceKind,
    /// Control-flow effect.
    pub branch: SourceBranch,
}

impl SourceOp {
    /// Creates a plainly-translated opcode.
    pub fn new(args: &str, trans: Code, stack_argc: Word) -> Self {
        Self {
            args: args.to_string(),
            argc: count_args(args),
            stack_argc,
            trans,
            trans_func: 0,
            kind: SourceKind::Normal,
            branch: SourceBranch::None,
        }
    }

    /// Creates an opcode that becomes a native call. Layouts with
    /// operands emit the literal-argument call form.
    pub fn native(args: &str, stack_argc: Word, func: Word) -> Self {
        let argc = count_args(args);
        let trans = if argc != 0 { Code::CallFuncLit } else { Code::CallFunc };
        Self {
            args: args.to_string(),
            argc,
            stack_argc,
            trans,
            trans_func: func,
            kind: SourceKind::Normal,
            branch: SourceBranch::None,
        }
    }

    fn kind(mut self, kind: SourceKind) -> Self {
        self.kind = kind;
        self
    }

    fn branch(mut self, branch: SourceBranch) -> Self {
        self.branch = branch;
        self
    }
}

fn count_args(args: &str) -> Word {
    args.bytes()
        .filter(|b| matches!(b, b'B' | b'H' | b'W' | b'b' | b'h'))
        .count() as Word
}

/// One native alias: a source native index mapped onto the internal
/// native table, with optional per-argument-count code substitutions.
#[derive(Debug, Clone)]
pub struct SourceFunc {
    /// Internal native index calls are rewritten to.
    pub trans_func: Word,
    trans_codes: Vec<(Word, Code)>,
}

impl SourceFunc {
    /// Creates an alias for an internal native.
    pub fn new(trans_func: Word) -> Self {
        Self { trans_func, trans_codes: Vec::new() }
    }

    /// Substitutes a direct internal code when called with `argc`
    /// arguments.
    pub fn with_code(mut self, argc: Word, code: Code) -> Self {
        self.trans_codes.push((argc, code));
        self
    }

    /// The internal code a call with `argc` arguments becomes.
    pub fn trans_code(&self, argc: Word) -> Code {
        self.trans_codes
            .iter()
            .find(|(c, _)| *c == argc)
            .map_or(Code::CallFunc, |(_, code)| *code)
    }
}

/// The combined opcode and native alias tables, plus the legacy script
/// naming hook.
pub struct SourceTables {
    ops: HashMap<Word, SourceOp>,
    funcs: HashMap<Word, SourceFunc>,

    /// Splits a legacy script name word into (type, name). Hosts with a
    /// different packing replace this before loading.
    pub legacy_script_type: fn(Word) -> (Word, Word),
}

impl SourceTables {
    /// Builds the default tables.
    pub fn new() -> Self {
        Self {
            ops: default_ops(),
            funcs: default_funcs(),
            legacy_script_type: |name| (name / 1000, name % 1000),
        }
    }

    /// Registers or replaces a source opcode.
    pub fn add_op(&mut self, code: Word, op: SourceOp) {
        self.ops.insert(code, op);
    }

    /// Registers or replaces a native alias.
    pub fn add_func(&mut self, func: Word, data: SourceFunc) {
        self.funcs.insert(func, data);
    }

    /// The description for a source opcode, when one is known.
    pub fn find_op(&self, code: Word) -> Option<&SourceOp> {
        self.ops.get(&code)
    }

    /// The alias for a source native index, when one is known.
    pub fn find_func(&self, func: Word) -> Option<&SourceFunc> {
        self.funcs.get(&func)
    }
}

impl Default for SourceTables {
    fn default() -> Self {
        Self::new()
    }
}

#[rustfmt::skip]
fn default_ops() -> HashMap<Word, SourceOp> {
    use Code::*;
    use SourceBranch as Br;
    use SourceKind as K;

    let e = SourceOp::new;
    let n = SourceOp::native;

    HashMap::from([
        (  0, e("",       Nop,         0)),
        (  1, e("",       ScrTerm,     0).branch(Br::Terminal)),
        (  2, e("",       ScrHalt,     0)),
        (  3, e("W",      PushLit,     0)),
        (  4, e("b",      CallSpec,    1).kind(K::CallSpecStk)),
        (  5, e("b",      CallSpec,    2).kind(K::CallSpecStk)),
        (  6, e("b",      CallSpec,    3).kind(K::CallSpecStk)),
        (  7, e("b",      CallSpec,    4).kind(K::CallSpecStk)),
        (  8, e("b",      CallSpec,    5).kind(K::CallSpecStk)),
        (  9, e("bW",     CallSpecLit, 0).kind(K::CallSpecLit)),
        ( 10, e("bWW",    CallSpecLit, 0).kind(K::CallSpecLit)),
        ( 11, e("bWWW",   CallSpecLit, 0).kind(K::CallSpecLit)),
        ( 12, e("bWWWW",  CallSpecLit, 0).kind(K::CallSpecLit)),
        ( 13, e("bWWWWW", CallSpecLit, 0).kind(K::CallSpecLit)),
        ( 14, e("",       AddU,        2)),
        ( 15, e("",       SubU,        2)),
        ( 16, e("",       MulU,        2)),
        ( 17, e("",       DivI,        2)),
        ( 18, e("",       ModI,        2)),
        ( 19, e("",       CmpUEQ,      2)),
        ( 20, e("",       CmpUNE,      2)),
        ( 21, e("",       CmpILT,      2)),
        ( 22, e("",       CmpIGT,      2)),
        ( 23, e("",       CmpILE,      2)),
        ( 24, e("",       CmpIGE,      2)),
        ( 25, e("bL",     DropLocReg,  1)),
        ( 26, e("bO",     DropModReg,  1)),
        ( 27, e("bU",     DropHubReg,  1)),
        ( 28, e("bL",     PushLocReg,  1)),
        ( 29, e("bO",     PushModReg,  1)),
        ( 30, e("bU",     PushHubReg,  1)),
        ( 31, e("bL",     AddULocReg,  1)),
        ( 32, e("bO",     AddUModReg,  1)),
        ( 33, e("bU",     AddUHubReg,  1)),
        ( 34, e("bL",     SubULocReg,  1)),
        ( 35, e("bO",     SubUModReg,  1)),
        ( 36, e("bU",     SubUHubReg,  1)),
        ( 37, e("bL",     MulULocReg,  1)),
        ( 38, e("bO",     MulUModReg,  1)),
        ( 39, e("bU",     MulUHubReg,  1)),
        ( 40, e("bL",     DivILocReg,  1)),
        ( 41, e("bO",     DivIModReg,  1)),
        ( 42, e("bU",     DivIHubReg,  1)),
        ( 43, e("bL",     ModILocReg,  1)),
        ( 44, e("bO",     ModIModReg,  1)),
        ( 45, e("bU",     ModIHubReg,  1)),
        ( 46, e("bL",     IncULocReg,  1)),
        ( 47, e("bO",     IncUModReg,  1)),
        ( 48, e("bU",     IncUHubReg,  1)),
        ( 49, e("bL",     DecULocReg,  1)),
        ( 50, e("bO",     DecUModReg,  1)),
        ( 51, e("bU",     DecUHubReg,  1)),
        ( 52, e("WJ",     JumpLit,     0).branch(Br::Jump)),
        ( 53, e("WJ",     JcndTru,     1).branch(Br::CondSingle)),
        ( 54, e("",       DropNul,     1)),
        ( 55, e("",       ScrDelay,    1)),
        ( 56, e("W",      ScrDelayLit, 0)),
        ( 69, e("",       ScrRestart,  0)),
        ( 70, e("",       LAnd,        2)),
        ( 71, e("",       LOrI,        2)),
        ( 72, e("",       AndU,        2)),
        ( 73, e("",       OrIU,        2)),
        ( 74, e("",       OrXU,        2)),
        ( 75, e("",       NotU,        1)),
        ( 76, e("",       ShLU,        2)),
        ( 77, e("",       ShRI,        2)),
        ( 78, e("",       NegI,        1)),
        ( 79, e("WJ",     JcndNil,     1).branch(Br::CondSingle)),
        ( 81, e("",       ScrWaitI,    1)),
        ( 82, e("W",      ScrWaitILit, 0)),
        ( 84, e("WWJ",    JcndLit,     1).branch(Br::CondLit)),
        ( 85, n("",       0, natives::PRINT_PUSH)),
        ( 86, n("",       0, natives::PRINT_END)),
        ( 87, n("",       1, natives::PRINT_STRING)),
        ( 88, n("",       1, natives::PRINT_INT_D)),
        ( 89, n("",       1, natives::PRINT_CHAR)),
        (136, e("",       MulX,        2)),
        (137, e("",       DivX,        2)),
        (157, n("",       1, natives::PRINT_FIX_D)),
        (167, e("B",      PushLit,     0)),
        (168, e("BB",     CallSpecLit, 0).kind(K::CallSpecLit)),
        (169, e("BBB",    CallSpecLit, 0).kind(K::CallSpecLit)),
        (170, e("BBBB",   CallSpecLit, 0).kind(K::CallSpecLit)),
        (171, e("BBBBB",  CallSpecLit, 0).kind(K::CallSpecLit)),
        (172, e("BBBBBB", CallSpecLit, 0).kind(K::CallSpecLit)),
        (173, e("B",      ScrDelayLit, 0)),
        (175, e("",       PushLitArr,  0).kind(K::PushLitArrB)),
        (176, e("BB",     PushLitArr,  0).kind(K::PushLitNB)),
        (177, e("BBB",    PushLitArr,  0).kind(K::PushLitNB)),
        (178, e("BBBB",   PushLitArr,  0).kind(K::PushLitNB)),
        (179, e("BBBBB",  PushLitArr,  0).kind(K::PushLitNB)),
        (181, e("bG",     DropGblReg,  1)),
        (182, e("bG",     PushGblReg,  0)),
        (183, e("bG",     AddUGblReg,  1)),
        (184, e("bG",     SubUGblReg,  1)),
        (185, e("bG",     MulUGblReg,  1)),
        (186, e("bG",     DivIGblReg,  1)),
        (187, e("bG",     ModIGblReg,  1)),
        (188, e("bG",     IncUGblReg,  1)),
        (189, e("bG",     DecUGblReg,  1)),
        (203, e("b",      CallLit,     0)),
        (204, e("b",      CallLit,     0).kind(K::CallNul)),
        (205, e("",       Retn,        0).kind(K::RetnNul).branch(Br::Terminal)),
        (206, e("",       Retn,        0).branch(Br::Terminal)),
        (207, e("bo",     PushModArr,  1)),
        (208, e("bo",     DropModArr,  2)),
        (209, e("bo",     AddUModArr,  2)),
        (210, e("bo",     SubUModArr,  2)),
        (211, e("bo",     MulUModArr,  2)),
        (212, e("bo",     DivIModArr,  2)),
        (213, e("bo",     ModIModArr,  2)),
        (214, e("bo",     IncUModArr,  2)),
        (215, e("bo",     DecUModArr,  2)),
        (216, e("",       Copy,        1)),
        (217, e("",       Swap,        2)),
        (225, e("",       PstrStk,     1)),
        (226, e("bu",     PushHubArr,  1)),
        (227, e("bu",     DropHubArr,  2)),
        (228, e("bu",     AddUHubArr,  2)),
        (229, e("bu",     SubUHubArr,  2)),
        (230, e("bu",     MulUHubArr,  2)),
        (231, e("bu",     DivIHubArr,  2)),
        (232, e("bu",     ModIHubArr,  2)),
        (233, e("bu",     IncUHubArr,  2)),
        (234, e("bu",     DecUHubArr,  2)),
        (235, e("bg",     PushGblArr,  1)),
        (236, e("bg",     DropGblArr,  2)),
        (237, e("bg",     AddUGblArr,  2)),
        (238, e("bg",     SubUGblArr,  2)),
        (239, e("bg",     MulUGblArr,  2)),
        (240, e("bg",     DivIGblArr,  2)),
        (241, e("bg",     ModIGblArr,  2)),
        (242, e("bg",     IncUGblArr,  2)),
        (243, e("bg",     DecUGblArr,  2)),
        (253, n("",       1, natives::STR_LEN)),
        (256, e("",       JcndTab,     1).kind(K::JcndTab).branch(Br::Table)),
        (257, e("",       DropScrRet,  1)),
        (263, e("b",      CallSpecR1,  5).kind(K::CallSpecStk)),
        (273, n("",       2, natives::PRINT_MOD_ARR)),
        (274, n("",       2, natives::PRINT_HUB_ARR)),
        (275, n("",       2, natives::PRINT_GBL_ARR)),
        (291, e("bL",     AndULocReg,  1)),
        (292, e("bO",     AndUModReg,  1)),
        (293, e("bU",     AndUHubReg,  1)),
        (294, e("bG",     AndUGblReg,  1)),
        (295, e("bo",     AndUModArr,  2)),
        (296, e("bu",     AndUHubArr,  2)),
        (297, e("bg",     AndUGblArr,  2)),
        (298, e("bL",     OrXULocReg,  1)),
        (299, e("bO",     OrXUModReg,  1)),
        (300, e("bU",     OrXUHubReg,  1)),
        (301, e("bG",     OrXUGblReg,  1)),
        (302, e("bo",     OrXUModArr,  2)),
        (303, e("bu",     OrXUHubArr,  2)),
        (304, e("bg",     OrXUGblArr,  2)),
        (305, e("bL",     OrIULocReg,  1)),
        (306, e("bO",     OrIUModReg,  1)),
        (307, e("bU",     OrIUHubReg,  1)),
        (308, e("bG",     OrIUGblReg,  1)),
        (309, e("bo",     OrIUModArr,  2)),
        (310, e("bu",     OrIUHubArr,  2)),
        (311, e("bg",     OrIUGblArr,  2)),
        (312, e("bL",     ShLULocReg,  1)),
        (313, e("bO",     ShLUModReg,  1)),
        (314, e("bU",     ShLUHubReg,  1)),
        (315, e("bG",     ShLUGblReg,  1)),
        (316, e("bo",     ShLUModArr,  2)),
        (317, e("bu",     ShLUHubArr,  2)),
        (318, e("bg",     ShLUGblArr,  2)),
        (319, e("bL",     ShRILocReg,  1)),
        (320, e("bO",     ShRIModReg,  1)),
        (321, e("bU",     ShRIHubReg,  1)),
        (322, e("bG",     ShRIGblReg,  1)),
        (323, e("bo",     ShRIModArr,  2)),
        (324, e("bu",     ShRIHubArr,  2)),
        (325, e("bg",     ShRIGblArr,  2)),
        (330, e("",       InvU,        1)),
        (349, n("",       1, natives::PRINT_INT_B)),
        (350, n("",       1, natives::PRINT_INT_X)),
        (351, e("bh",     CallFunc,    0).kind(K::CallFunc)),
        (352, n("",       0, natives::PRINT_END_STR)),
        (353, n("",       4, natives::PRINT_MOD_ARR)),
        (354, n("",       4, natives::PRINT_HUB_ARR)),
        (355, n("",       4, natives::PRINT_GBL_ARR)),
        (356, n("",       6, natives::STR_CPY_MOD_ARR)),
        (357, n("",       6, natives::STR_CPY_HUB_ARR)),
        (358, n("",       6, natives::STR_CPY_GBL_ARR)),
        (359, e("b",      PfunLit,     0)),
        (360, e("",       CallStk,     1)),
        (361, e("",       ScrWaitS,    1)),
        (363, e("",       JumpStk,     1).branch(Br::Terminal)),
        (364, e("bl",     DropLocArr,  2)),
        (365, e("bl",     PushLocArr,  1)),
        (366, e("bl",     AddULocArr,  2)),
        (367, e("bl",     SubULocArr,  2)),
        (368, e("bl",     MulULocArr,  2)),
        (369, e("bl",     DivILocArr,  2)),
        (370, e("bl",     ModILocArr,  2)),
        (371, e("bl",     IncULocArr,  2)),
        (372, e("bl",     DecULocArr,  2)),
        (373, e("bl",     AndULocArr,  2)),
        (374, e("bl",     OrXULocArr,  2)),
        (375, e("bl",     OrIULocArr,  2)),
        (376, e("bl",     ShLULocArr,  2)),
        (377, e("bl",     ShRILocArr,  2)),
        (378, n("",       2, natives::PRINT_LOC_ARR)),
        (379, n("",       4, natives::PRINT_LOC_ARR)),
        (380, n("",       6, natives::STR_CPY_LOC_ARR)),
        (381, e("W",      CallSpec,    5).kind(K::CallSpecStk)),
        (500, e("b",      CallSpec,    6).kind(K::CallSpecStk)),
        (501, e("b",      CallSpec,    7).kind(K::CallSpecStk)),
        (502, e("b",      CallSpec,    8).kind(K::CallSpecStk)),
        (503, e("b",      CallSpec,    9).kind(K::CallSpecStk)),
        (504, e("b",      CallSpec,   10).kind(K::CallSpecStk)),
        (505, e("bWWWWWW",      CallSpecLit, 0).kind(K::CallSpecLit)),
        (506, e("bWWWWWWWW",    CallSpecLit, 0).kind(K::CallSpecLit)),
        (507, e("bWWWWWWWWW",   CallSpecLit, 0).kind(K::CallSpecLit)),
        (508, e("bWWWWWWWWWW",  CallSpecLit, 0).kind(K::CallSpecLit)),
        (509, e("bWWWWWWWWWWW", CallSpecLit, 0).kind(K::CallSpecLit)),
        (510, e("BBBBBBB",     CallSpecLit, 0).kind(K::CallSpecLit)),
        (511, e("BBBBBBBB",    CallSpecLit, 0).kind(K::CallSpecLit)),
        (512, e("BBBBBBBBB",   CallSpecLit, 0).kind(K::CallSpecLit)),
        (513, e("BBBBBBBBBB",  CallSpecLit, 0).kind(K::CallSpecLit)),
        (514, e("BBBBBBBBBBB", CallSpecLit, 0).kind(K::CallSpecLit)),
        (515, e("BBBBBB",     PushLitArr, 0).kind(K::PushLitNB)),
        (516, e("BBBBBBB",    PushLitArr, 0).kind(K::PushLitNB)),
        (517, e("BBBBBBBB",   PushLitArr, 0).kind(K::PushLitNB)),
        (518, e("BBBBBBBBB",  PushLitArr, 0).kind(K::PushLitNB)),
        (519, e("BBBBBBBBBB", PushLitArr, 0).kind(K::PushLitNB)),
        (520, e("b",      CallSpecR1, 10).kind(K::CallSpecStk)),
    ])
}

fn default_funcs() -> HashMap<Word, SourceFunc> {
    HashMap::from([
        (15, SourceFunc::new(natives::GET_CHAR).with_code(2, Code::PushStrArs)),
        (39, SourceFunc::new(natives::SCR_START_S)),
        (40, SourceFunc::new(natives::SCR_PAUSE_S)),
        (41, SourceFunc::new(natives::SCR_STOP_S)),
        (42, SourceFunc::new(natives::SCR_START_SL)),
        (43, SourceFunc::new(natives::SCR_START_SD)),
        (44, SourceFunc::new(natives::SCR_START_SR)),
        (45, SourceFunc::new(natives::SCR_START_SF)),
        (63, SourceFunc::new(natives::STR_CMP)),
        (64, SourceFunc::new(natives::STR_CASE_CMP)),
        (65, SourceFunc::new(natives::STR_LEFT)),
        (66, SourceFunc::new(natives::STR_RIGHT)),
        (67, SourceFunc::new(natives::STR_MID)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operand_counts_ignore_annotations() {
        assert_eq!(count_args("bL"), 1);
        assert_eq!(count_args("WWJ"), 2);
        assert_eq!(count_args("bWWWWW"), 6);
        assert_eq!(count_args(""), 0);
    }

    #[test]
    fn default_table_basics() {
        let tables = SourceTables::new();
        let push = tables.find_op(3).unwrap();
        assert_eq!(push.trans, Code::PushLit);
        assert_eq!(push.argc, 1);

        let spec = tables.find_op(8).unwrap();
        assert_eq!(spec.kind, SourceKind::CallSpecStk);
        assert_eq!(spec.stack_argc, 5);

        assert!(tables.find_op(68).is_none());
        assert!(tables.find_op(521).is_none());
    }

    #[test]
    fn native_ops_pick_literal_form_by_layout() {
        let stack = SourceOp::native("", 1, natives::PRINT_INT_D);
        assert_eq!(stack.trans, Code::CallFunc);
        let lit = SourceOp::native("W", 0, natives::PRINT_INT_D);
        assert_eq!(lit.trans, Code::CallFuncLit);
    }

    #[test]
    fn func_aliases_substitute_by_argument_count() {
        let tables = SourceTables::new();
        let get_char = tables.find_func(15).unwrap();
        assert_eq!(get_char.trans_code(2), Code::PushStrArs);
        assert_eq!(get_char.trans_code(1), Code::CallFunc);
        assert_eq!(get_char.trans_func, natives::GET_CHAR);
        assert!(tables.find_func(99).is_none());
    }

    #[test]
    fn default_script_naming_splits_on_thousands() {
        let tables = SourceTables::new();
        assert_eq!((tables.legacy_script_type)(2001), (2, 1));
        assert_eq!((tables.legacy_script_type)(80), (0, 80));
    }

    #[test]
    fn host_extension_overrides() {
        let mut tables = SourceTables::new();
        tables.add_op(600, SourceOp::native("", 2, natives::COUNT));
        assert_eq!(tables.find_op(600).unwrap().trans_func, natives::COUNT);
        tables.add_func(100, SourceFunc::new(natives::STR_LEN));
        assert_eq!(tables.find_func(100).unwrap().trans_func, natives::STR_LEN);
    }
}
