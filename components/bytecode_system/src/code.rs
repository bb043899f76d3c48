//! The normalized internal instruction set.
//!
//! Translated modules carry a flat stream of words. Each instruction is
//! one opcode word (a [`Code`] discriminant) followed by a fixed number of
//! operand words, except for the few variable-length codes whose operand
//! count is stored in the stream itself.

use core_types::Word;

macro_rules! code_list {
    ($($name:ident => $argc:expr,)*) => {
        /// Internal instruction kinds.
        ///
        /// The fused read-modify-write forms exist for every binary
        /// operator in every storage class, so translated code touches a
        /// shared register or array cell in one instruction.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        #[allow(missing_docs)]
        pub enum Code {
            $($name,)*
        }

        impl Code {
            const ALL: &'static [Code] = &[$(Code::$name,)*];

            /// Fixed operand-word count following the opcode word.
            ///
            /// For [`Code::PushLitArr`], [`Code::CallFuncLit`], and
            /// [`Code::CallSpecLit`] this is the minimum; the stream
            /// carries an explicit count.
            pub fn argc(self) -> Word {
                match self {
                    $(Code::$name => $argc,)*
                }
            }

            /// Decodes an opcode word. Unknown words decode to `None` and
            /// fault at dispatch.
            pub fn from_word(word: Word) -> Option<Code> {
                Self::ALL.get(word as usize).copied()
            }

            /// The opcode word for this instruction.
            pub fn to_word(self) -> Word {
                self as Word
            }
        }
    };
}

code_list! {
    Nop => 0,
    Kill => 2,

    AddU => 0,
    AddUGblArr => 1,
    AddUGblReg => 1,
    AddUHubArr => 1,
    AddUHubReg => 1,
    AddULocArr => 1,
    AddULocReg => 1,
    AddUModArr => 1,
    AddUModReg => 1,
    AndU => 0,
    AndUGblArr => 1,
    AndUGblReg => 1,
    AndUHubArr => 1,
    AndUHubReg => 1,
    AndULocArr => 1,
    AndULocReg => 1,
    AndUModArr => 1,
    AndUModReg => 1,
    DivI => 0,
    DivIGblArr => 1,
    DivIGblReg => 1,
    DivIHubArr => 1,
    DivIHubReg => 1,
    DivILocArr => 1,
    DivILocReg => 1,
    DivIModArr => 1,
    DivIModReg => 1,
    ModI => 0,
    ModIGblArr => 1,
    ModIGblReg => 1,
    ModIHubArr => 1,
    ModIHubReg => 1,
    ModILocArr => 1,
    ModILocReg => 1,
    ModIModArr => 1,
    ModIModReg => 1,
    MulU => 0,
    MulUGblArr => 1,
    MulUGblReg => 1,
    MulUHubArr => 1,
    MulUHubReg => 1,
    MulULocArr => 1,
    MulULocReg => 1,
    MulUModArr => 1,
    MulUModReg => 1,
    OrIU => 0,
    OrIUGblArr => 1,
    OrIUGblReg => 1,
    OrIUHubArr => 1,
    OrIUHubReg => 1,
    OrIULocArr => 1,
    OrIULocReg => 1,
    OrIUModArr => 1,
    OrIUModReg => 1,
    OrXU => 0,
    OrXUGblArr => 1,
    OrXUGblReg => 1,
    OrXUHubArr => 1,
    OrXUHubReg => 1,
    OrXULocArr => 1,
    OrXULocReg => 1,
    OrXUModArr => 1,
    OrXUModReg => 1,
    ShLU => 0,
    ShLUGblArr => 1,
    ShLUGblReg => 1,
    ShLUHubArr => 1,
    ShLUHubReg => 1,
    ShLULocArr => 1,
    ShLULocReg => 1,
    ShLUModArr => 1,
    ShLUModReg => 1,
    ShRI => 0,
    ShRIGblArr => 1,
    ShRIGblReg => 1,
    ShRIHubArr => 1,
    ShRIHubReg => 1,
    ShRILocArr => 1,
    ShRILocReg => 1,
    ShRIModArr => 1,
    ShRIModReg => 1,
    SubU => 0,
    SubUGblArr => 1,
    SubUGblReg => 1,
    SubUHubArr => 1,
    SubUHubReg => 1,
    SubULocArr => 1,
    SubULocReg => 1,
    SubUModArr => 1,
    SubUModReg => 1,

    CmpIGE => 0,
    CmpIGT => 0,
    CmpILE => 0,
    CmpILT => 0,
    CmpUEQ => 0,
    CmpUNE => 0,
    DivX => 0,
    LAnd => 0,
    LOrI => 0,
    MulX => 0,

    CallLit => 1,
    CallStk => 0,
    CallFunc => 2,
    CallFuncLit => 0,
    CallSpec => 2,
    CallSpecLit => 0,
    CallSpecR1 => 2,
    Retn => 0,

    DropGblArr => 1,
    DropGblReg => 1,
    DropHubArr => 1,
    DropHubReg => 1,
    DropLocArr => 1,
    DropLocReg => 1,
    DropModArr => 1,
    DropModReg => 1,
    DropNul => 0,
    DropScrRet => 0,

    JcndLit => 2,
    JcndNil => 1,
    JcndTab => 1,
    JcndTru => 1,
    JumpLit => 1,
    JumpStk => 0,

    PfunLit => 1,
    PstrStk => 0,
    PushGblArr => 1,
    PushGblReg => 1,
    PushHubArr => 1,
    PushHubReg => 1,
    PushLit => 1,
    PushLitArr => 0,
    PushLocArr => 1,
    PushLocReg => 1,
    PushModArr => 1,
    PushModReg => 1,
    PushStrArs => 0,

    ScrDelay => 0,
    ScrDelayLit => 1,
    ScrHalt => 0,
    ScrRestart => 0,
    ScrTerm => 0,
    ScrWaitI => 0,
    ScrWaitILit => 1,
    ScrWaitS => 0,
    ScrWaitSLit => 1,

    Copy => 0,
    Swap => 0,

    DecUGblArr => 1,
    DecUGblReg => 1,
    DecUHubArr => 1,
    DecUHubReg => 1,
    DecULocArr => 1,
    DecULocReg => 1,
    DecUModArr => 1,
    DecUModReg => 1,
    IncUGblArr => 1,
    IncUGblReg => 1,
    IncUHubArr => 1,
    IncUHubReg => 1,
    IncULocArr => 1,
    IncULocReg => 1,
    IncUModArr => 1,
    IncUModReg => 1,

    InvU => 0,
    NegI => 0,
    NotU => 0,
}

/// Indices into the native-function table.
///
/// Natives are not instructions: they are slots in one table invoked
/// through [`Code::CallFunc`], so adding a native never changes the
/// instruction set. The embedding host appends its own entries after
/// [`natives::COUNT`].
pub mod natives {
    use core_types::Word;

    #[allow(missing_docs)]
    pub const NOP: Word = 0;
    #[allow(missing_docs)]
    pub const KILL: Word = 1;

    #[allow(missing_docs)]
    pub const PRINT_CHAR: Word = 2;
    #[allow(missing_docs)]
    pub const PRINT_DROP: Word = 3;
    #[allow(missing_docs)]
    pub const PRINT_END: Word = 4;
    #[allow(missing_docs)]
    pub const PRINT_END_STR: Word = 5;
    #[allow(missing_docs)]
    pub const PRINT_FIX_D: Word = 6;
    #[allow(missing_docs)]
    pub const PRINT_GBL_ARR: Word = 7;
    #[allow(missing_docs)]
    pub const PRINT_HUB_ARR: Word = 8;
    #[allow(missing_docs)]
    pub const PRINT_INT_B: Word = 9;
    #[allow(missing_docs)]
    pub const PRINT_INT_D: Word = 10;
    #[allow(missing_docs)]
    pub const PRINT_INT_X: Word = 11;
    #[allow(missing_docs)]
    pub const PRINT_LOC_ARR: Word = 12;
    #[allow(missing_docs)]
    pub const PRINT_MOD_ARR: Word = 13;
    #[allow(missing_docs)]
    pub const PRINT_PUSH: Word = 14;
    #[allow(missing_docs)]
    pub const PRINT_STRING: Word = 15;

    #[allow(missing_docs)]
    pub const SCR_PAUSE_S: Word = 16;
    #[allow(missing_docs)]
    pub const SCR_START_S: Word = 17;
    #[allow(missing_docs)]
    pub const SCR_START_SD: Word = 18;
    #[allow(missing_docs)]
    pub const SCR_START_SF: Word = 19;
    #[allow(missing_docs)]
    pub const SCR_START_SL: Word = 20;
    #[allow(missing_docs)]
    pub const SCR_START_SR: Word = 21;
    #[allow(missing_docs)]
    pub const SCR_STOP_S: Word = 22;

    #[allow(missing_docs)]
    pub const GET_CHAR: Word = 23;
    #[allow(missing_docs)]
    pub const STR_CASE_CMP: Word = 24;
    #[allow(missing_docs)]
    pub const STR_CMP: Word = 25;
    #[allow(missing_docs)]
    pub const STR_CPY_GBL_ARR: Word = 26;
    #[allow(missing_docs)]
    pub const STR_CPY_HUB_ARR: Word = 27;
    #[allow(missing_docs)]
    pub const STR_CPY_LOC_ARR: Word = 28;
    #[allow(missing_docs)]
    pub const STR_CPY_MOD_ARR: Word = 29;
    #[allow(missing_docs)]
    pub const STR_LEFT: Word = 30;
    #[allow(missing_docs)]
    pub const STR_LEN: Word = 31;
    #[allow(missing_docs)]
    pub const STR_MID: Word = 32;
    #[allow(missing_docs)]
    pub const STR_RIGHT: Word = 33;

    /// Number of built-in natives; host extensions start here.
    pub const COUNT: Word = 34;
}
