//! The opcode table.
//!
//! Opcode identity on disk is the stable number recorded here, never a table
//! position. Each opcode carries up to two immediate operand kinds, which the
//! persistence layer needs to walk code vectors without executing them.
//! Dispatch itself lives in the interpreter crate.

/// The kind of an immediate operand following an opcode word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    /// No operand.
    None,
    /// A literal integer.
    Int,
    /// An index into the defining object's string pool.
    Str,
    /// An index into the defining object's identifier pool.
    Ident,
    /// A local-variable slot index.
    Var,
    /// A jump target: an absolute word offset in memory, a signed
    /// byte-relative delta in serialized images.
    Jump,
    /// An index into the method's error lists (`-1` means catch-any).
    ErrList,
}

macro_rules! opcodes {
    ($($variant:ident = $num:literal, $name:literal, $a1:ident, $a2:ident;)+) => {
        /// A bytecode operation.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Op {
            $($variant,)+
        }

        impl Op {
            /// Decodes a stable opcode number. Readers must treat `None` as
            /// a load failure.
            pub fn from_number(n: i64) -> Option<Op> {
                match n {
                    $($num => Some(Op::$variant),)+
                    _ => None,
                }
            }

            /// The stable opcode number used in serialized images.
            pub fn number(self) -> i64 {
                match self {
                    $(Op::$variant => $num,)+
                }
            }

            /// The source-level name.
            pub fn name(self) -> &'static str {
                match self {
                    $(Op::$variant => $name,)+
                }
            }

            /// Immediate operand kinds.
            pub fn args(self) -> (ArgType, ArgType) {
                match self {
                    $(Op::$variant => (ArgType::$a1, ArgType::$a2),)+
                }
            }

            /// Looks up a function-style operator by name (used by the
            /// compiler seam and the disassembler tests).
            pub fn by_name(name: &str) -> Option<Op> {
                match name {
                    $($name => Some(Op::$variant),)+
                    _ => None,
                }
            }

            /// Number of code words this instruction occupies.
            pub fn width(self) -> usize {
                let (a1, a2) = self.args();
                1 + usize::from(a1 != ArgType::None) + usize::from(a2 != ArgType::None)
            }

            /// True for operators invoked with function syntax; the
            /// remainder are generated by language syntax. Determines
            /// whether a raised error's location reads `'function` or
            /// `'opcode`.
            pub fn is_function(self) -> bool {
                self.name()
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_lowercase())
            }
        }
    };
}

opcodes! {
    // Opcodes generated by language syntax.
    Comment = 1, "COMMENT", Str, None;
    Pop = 2, "POP", None, None;
    SetLocal = 3, "SET_LOCAL", Var, None;
    SetObjVar = 4, "SET_OBJ_VAR", Ident, None;
    If = 5, "IF", Jump, None;
    IfElse = 6, "IF_ELSE", Jump, None;
    Else = 7, "ELSE", Jump, None;
    ForRange = 8, "FOR_RANGE", Jump, Var;
    ForList = 9, "FOR_LIST", Jump, Var;
    While = 10, "WHILE", Jump, Jump;
    Switch = 11, "SWITCH", Jump, None;
    CaseValue = 12, "CASE_VALUE", Jump, None;
    CaseRange = 13, "CASE_RANGE", Jump, None;
    LastCaseValue = 14, "LAST_CASE_VALUE", Jump, None;
    LastCaseRange = 15, "LAST_CASE_RANGE", Jump, None;
    EndCase = 16, "END_CASE", Jump, None;
    Default = 17, "DEFAULT", None, None;
    End = 18, "END", Jump, None;
    Break = 19, "BREAK", Jump, Var;
    Continue = 20, "CONTINUE", Jump, Var;
    Return = 21, "RETURN", None, None;
    ReturnExpr = 22, "RETURN_EXPR", None, None;
    Catch = 23, "CATCH", Jump, ErrList;
    CatchEnd = 24, "CATCH_END", Jump, None;
    HandlerEnd = 25, "HANDLER_END", None, None;

    Zero = 26, "ZERO", None, None;
    One = 27, "ONE", None, None;
    IntLit = 28, "INTEGER", Int, None;
    StrLit = 29, "STRING", Str, None;
    DbrefLit = 30, "DBREF", Int, None;
    SymbolLit = 31, "SYMBOL", Ident, None;
    ErrorLit = 32, "ERROR", Ident, None;
    NameLit = 33, "NAME", Ident, None;
    GetLocal = 34, "GET_LOCAL", Var, None;
    GetObjVar = 35, "GET_OBJ_VAR", Ident, None;
    StartArgs = 36, "START_ARGS", None, None;
    Pass = 37, "PASS", None, None;
    Message = 38, "MESSAGE", Ident, None;
    ExprMessage = 39, "EXPR_MESSAGE", None, None;
    ListBuild = 40, "LIST", None, None;
    DictBuild = 41, "DICT", None, None;
    BufferBuild = 42, "BUFFER", None, None;
    FrobBuild = 43, "FROB", None, None;
    Index = 44, "INDEX", None, None;
    And = 45, "AND", Jump, None;
    Or = 46, "OR", Jump, None;
    Conditional = 47, "CONDITIONAL", Jump, None;
    Splice = 48, "SPLICE", None, None;
    Critical = 49, "CRITICAL", Jump, None;
    CriticalEnd = 50, "CRITICAL_END", None, None;
    Propagate = 51, "PROPAGATE", Jump, None;
    PropagateEnd = 52, "PROPAGATE_END", None, None;

    // Arithmetic and relational operators.
    Not = 53, "!", None, None;
    Negate = 54, "NEG", None, None;
    Multiply = 55, "*", None, None;
    Divide = 56, "/", None, None;
    Modulo = 57, "%", None, None;
    Add = 58, "+", None, None;
    SpliceAdd = 59, "SPLICE_ADD", None, None;
    Subtract = 60, "-", None, None;
    EqOp = 61, "EQ", None, None;
    NeOp = 62, "NE", None, None;
    Greater = 63, ">", None, None;
    GreaterEq = 64, ">=", None, None;
    Less = 65, "<", None, None;
    LessEq = 66, "<=", None, None;
    In = 67, "IN", None, None;
    Bitand = 68, "and", None, None;
    Bitor = 69, "or", None, None;
    Bitshift = 70, "shift", None, None;

    // Generic data manipulation.
    Type = 71, "type", None, None;
    Class = 72, "class", None, None;
    Toint = 73, "toint", None, None;
    Tostr = 74, "tostr", None, None;
    Toliteral = 75, "toliteral", None, None;
    Todbref = 76, "todbref", None, None;
    Tosym = 77, "tosym", None, None;
    Toerr = 78, "toerr", None, None;
    Valid = 79, "valid", None, None;

    // Operations on strings.
    Strlen = 80, "strlen", None, None;
    Substr = 81, "substr", None, None;
    Explode = 82, "explode", None, None;
    Strsub = 83, "strsub", None, None;
    Pad = 84, "pad", None, None;
    MatchBegin = 85, "match_begin", None, None;
    MatchTemplate = 86, "match_template", None, None;
    MatchPattern = 87, "match_pattern", None, None;
    MatchRegexp = 88, "match_regexp", None, None;
    Uppercase = 89, "uppercase", None, None;
    Lowercase = 90, "lowercase", None, None;
    Strcmp = 91, "strcmp", None, None;

    // List manipulation.
    Listlen = 92, "listlen", None, None;
    Sublist = 93, "sublist", None, None;
    Insert = 94, "insert", None, None;
    Replace = 95, "replace", None, None;
    Delete = 96, "delete", None, None;
    Setadd = 97, "setadd", None, None;
    Setremove = 98, "setremove", None, None;
    Toset = 99, "toset", None, None;
    Union = 100, "union", None, None;
    Factor = 101, "factor", None, None;
    Qsort = 102, "qsort", None, None;

    // Dictionary manipulation.
    DictKeys = 103, "dict_keys", None, None;
    DictAdd = 104, "dict_add", None, None;
    DictDel = 105, "dict_del", None, None;
    DictContains = 106, "dict_contains", None, None;

    // Buffer manipulation.
    BufferLen = 107, "buffer_len", None, None;
    BufferRetrieve = 108, "buffer_retrieve", None, None;
    BufferAppend = 109, "buffer_append", None, None;
    BufferReplace = 110, "buffer_replace", None, None;
    BufferAdd = 111, "buffer_add", None, None;
    BufferTruncate = 112, "buffer_truncate", None, None;
    BufferToStrings = 113, "buffer_to_strings", None, None;
    BufferFromStrings = 114, "buffer_from_strings", None, None;

    // Miscellaneous operations.
    Version = 115, "version", None, None;
    Random = 116, "random", None, None;
    Time = 117, "time", None, None;
    Ctime = 118, "ctime", None, None;
    Min = 119, "min", None, None;
    Max = 120, "max", None, None;
    Abs = 121, "abs", None, None;
    GetName = 122, "get_name", None, None;
    TicksLeft = 123, "ticks_left", None, None;

    // Current method information.
    This = 124, "this", None, None;
    Definer = 125, "definer", None, None;
    Sender = 126, "sender", None, None;
    Caller = 127, "caller", None, None;
    TaskIdOp = 128, "task_id", None, None;
    Rep = 129, "rep", None, None;

    // Error handling.
    ErrorFunc = 130, "error", None, None;
    TracebackOp = 131, "traceback", None, None;
    Throw = 132, "throw", None, None;
    Rethrow = 133, "rethrow", None, None;

    // Input and output.
    Echo = 134, "echo", None, None;
    EchoFile = 135, "echo_file", None, None;
    Disconnect = 136, "disconnect", None, None;
    Filestat = 137, "filestat", None, None;
    ReadFile = 138, "read", None, None;
    WriteFile = 139, "write", None, None;
    Ls = 140, "ls", None, None;
    Connections = 141, "connections", None, None;

    // Operations on the current object.
    AddParameter = 142, "add_parameter", None, None;
    Parameters = 143, "parameters", None, None;
    DelParameter = 144, "del_parameter", None, None;
    SetVar = 145, "set_var", None, None;
    GetVar = 146, "get_var", None, None;
    CompileOp = 147, "compile", None, None;
    Methods = 148, "methods", None, None;
    FindMethod = 149, "find_method", None, None;
    FindNextMethod = 150, "find_next_method", None, None;
    ListMethod = 151, "list_method", None, None;
    DelMethod = 152, "del_method", None, None;
    Parents = 153, "parents", None, None;
    Children = 154, "children", None, None;
    Ancestors = 155, "ancestors", None, None;
    HasAncestor = 156, "has_ancestor", None, None;
    Size = 157, "size", None, None;
    Idents = 158, "idents", None, None;

    // Database packing.
    PackOp = 159, "pack", None, None;
    Unpack = 160, "unpack", None, None;
    Digestable = 161, "digestable", None, None;
    Depends = 162, "depends", None, None;

    // Administrative operations.
    Create = 163, "create", None, None;
    Chparents = 164, "chparents", None, None;
    Destroy = 165, "destroy", None, None;
    Log = 166, "log", None, None;
    ConnAssign = 167, "conn_assign", None, None;
    BinaryDump = 168, "binary_dump", None, None;
    BinaryBackup = 169, "binary_backup", None, None;
    TextDump = 170, "text_dump", None, None;
    RunScript = 171, "run_script", None, None;
    Shutdown = 172, "shutdown", None, None;
    BindPort = 173, "bind", None, None;
    UnbindPort = 174, "unbind", None, None;
    ConnectOp = 175, "connect", None, None;
    SetHeartbeatFreq = 176, "set_heartbeat_freq", None, None;
    DataOp = 177, "data", None, None;
    SetName = 178, "set_name", None, None;
    DelName = 179, "del_name", None, None;
    TickOp = 180, "tick", None, None;
    Hostname = 181, "hostname", None, None;
    Ip = 182, "ip", None, None;
    DbTop = 183, "db_top", None, None;
    ResumeOp = 184, "resume", None, None;
    SuspendOp = 185, "suspend", None, None;
    TasksOp = 186, "tasks", None, None;
    CancelOp = 187, "cancel", None, None;
    PauseOp = 188, "pause", None, None;
    CallersOp = 189, "callers", None, None;
    Disassemble = 190, "disassemble", None, None;
    Debug = 191, "debug", None, None;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_round_trip() {
        for n in 0..256 {
            if let Some(op) = Op::from_number(n) {
                assert_eq!(op.number(), n);
            }
        }
        assert_eq!(Op::from_number(0), None);
        assert_eq!(Op::from_number(10_000), None);
    }

    #[test]
    fn widths_follow_operand_kinds() {
        assert_eq!(Op::Pop.width(), 1);
        assert_eq!(Op::If.width(), 2);
        assert_eq!(Op::While.width(), 3);
        assert_eq!(Op::Catch.width(), 3);
    }

    #[test]
    fn function_names_resolve() {
        assert_eq!(Op::by_name("buffer_to_strings"), Some(Op::BufferToStrings));
        assert_eq!(Op::by_name("suspend"), Some(Op::SuspendOp));
        assert!(Op::by_name("no_such_function").is_none());
        assert!(Op::Tostr.is_function());
        assert!(!Op::Message.is_function());
    }
}
