//! The bytecode interpreter and cooperative task scheduler.
//!
//! One [`Vm`] owns the database, the I/O bridge, the data and argument
//! stacks, and the task lists. The daemon drives it: bridge events become
//! tasks, the heartbeat runs the paused list, and a `shutdown` request
//! flips [`Vm::running`].

pub mod compile;
pub mod error;
pub mod events;
pub mod frame;
pub mod interp;
pub mod ops;
pub mod raise;
pub mod tasks;

pub use compile::{Compiler, Decompiler, MethodBuilder};
pub use error::{VmError, VmResult};
pub use interp::{Ty, Vm};

use cmm_core::Op;

impl Vm {
    /// One dense dispatch over the opcode table; the interpreter loop
    /// calls this once per instruction.
    pub(crate) fn dispatch(&mut self, op: Op) -> VmResult<()> {
        match op {
            Op::Comment => self.op_comment(),
            Op::Pop => self.op_pop(),
            Op::SetLocal => self.op_set_local(),
            Op::SetObjVar => self.op_set_obj_var(),
            Op::If | Op::IfElse | Op::Conditional => self.op_if(),
            Op::Else | Op::End | Op::EndCase => self.op_jump(),
            Op::ForRange => self.op_for_range(),
            Op::ForList => self.op_for_list(),
            Op::While => self.op_while(),
            Op::Switch => self.op_switch(),
            Op::CaseValue => self.op_case_value(),
            Op::CaseRange => self.op_case_range(),
            Op::LastCaseValue => self.op_last_case_value(),
            Op::LastCaseRange => self.op_last_case_range(),
            Op::Default => self.op_default(),
            Op::Break => self.op_break(),
            Op::Continue => self.op_continue(),
            Op::Return => self.op_return(),
            Op::ReturnExpr => self.op_return_expr(),
            Op::Catch => self.op_catch(),
            Op::CatchEnd => self.op_catch_end(),
            Op::HandlerEnd => self.op_handler_end(),

            Op::Zero => self.op_zero(),
            Op::One => self.op_one(),
            Op::IntLit => self.op_int_lit(),
            Op::StrLit => self.op_str_lit(),
            Op::DbrefLit => self.op_dbref_lit(),
            Op::SymbolLit => self.op_symbol_lit(),
            Op::ErrorLit => self.op_error_lit(),
            Op::NameLit => self.op_name_lit(),
            Op::GetLocal => self.op_get_local(),
            Op::GetObjVar => self.op_get_obj_var(),
            Op::StartArgs => self.op_start_args(),
            Op::Pass => self.op_pass(),
            Op::Message => self.op_message(),
            Op::ExprMessage => self.op_expr_message(),
            Op::ListBuild => self.op_list_build(),
            Op::DictBuild => self.op_dict_build(),
            Op::BufferBuild => self.op_buffer_build(),
            Op::FrobBuild => self.op_frob_build(),
            Op::Index => self.op_index(),
            Op::And => self.op_and(),
            Op::Or => self.op_or(),
            Op::Splice => self.op_splice(),
            Op::SpliceAdd => self.op_splice_add(),
            Op::Critical => self.op_critical(),
            Op::CriticalEnd => self.op_critical_end(),
            Op::Propagate => self.op_propagate(),
            Op::PropagateEnd => self.op_propagate_end(),

            Op::Not => self.op_not(),
            Op::Negate => self.op_negate(),
            Op::Multiply => self.op_multiply(),
            Op::Divide => self.op_divide(),
            Op::Modulo => self.op_modulo(),
            Op::Add => self.op_add(),
            Op::Subtract => self.op_subtract(),
            Op::EqOp => self.op_equal(),
            Op::NeOp => self.op_not_equal(),
            Op::Greater => self.op_greater(),
            Op::GreaterEq => self.op_greater_or_equal(),
            Op::Less => self.op_less(),
            Op::LessEq => self.op_less_or_equal(),
            Op::In => self.op_in(),
            Op::Bitand => self.op_bitand(),
            Op::Bitor => self.op_bitor(),
            Op::Bitshift => self.op_bitshift(),

            Op::Type => self.op_type(),
            Op::Class => self.op_class(),
            Op::Toint => self.op_toint(),
            Op::Tostr => self.op_tostr(),
            Op::Toliteral => self.op_toliteral(),
            Op::Todbref => self.op_todbref(),
            Op::Tosym => self.op_tosym(),
            Op::Toerr => self.op_toerr(),
            Op::Valid => self.op_valid(),

            Op::Strlen => self.op_strlen(),
            Op::Substr => self.op_substr(),
            Op::Explode => self.op_explode(),
            Op::Strsub => self.op_strsub(),
            Op::Pad => self.op_pad(),
            Op::MatchBegin => self.op_match_begin(),
            Op::MatchTemplate => self.op_match_template(),
            Op::MatchPattern => self.op_match_pattern(),
            Op::MatchRegexp => self.op_match_regexp(),
            Op::Uppercase => self.op_uppercase(),
            Op::Lowercase => self.op_lowercase(),
            Op::Strcmp => self.op_strcmp(),

            Op::Listlen => self.op_listlen(),
            Op::Sublist => self.op_sublist(),
            Op::Insert => self.op_insert(),
            Op::Replace => self.op_replace(),
            Op::Delete => self.op_delete(),
            Op::Setadd => self.op_setadd(),
            Op::Setremove => self.op_setremove(),
            Op::Toset => self.op_toset(),
            Op::Union => self.op_union(),
            Op::Factor => self.op_factor(),
            Op::Qsort => self.op_qsort(),

            Op::DictKeys => self.op_dict_keys(),
            Op::DictAdd => self.op_dict_add(),
            Op::DictDel => self.op_dict_del(),
            Op::DictContains => self.op_dict_contains(),

            Op::BufferLen => self.op_buffer_len(),
            Op::BufferRetrieve => self.op_buffer_retrieve(),
            Op::BufferAppend => self.op_buffer_append(),
            Op::BufferReplace => self.op_buffer_replace(),
            Op::BufferAdd => self.op_buffer_add(),
            Op::BufferTruncate => self.op_buffer_truncate(),
            Op::BufferToStrings => self.op_buffer_to_strings(),
            Op::BufferFromStrings => self.op_buffer_from_strings(),

            Op::Version => self.op_version(),
            Op::Random => self.op_random(),
            Op::Time => self.op_time(),
            Op::Ctime => self.op_ctime(),
            Op::Min => self.op_min(),
            Op::Max => self.op_max(),
            Op::Abs => self.op_abs(),
            Op::GetName => self.op_get_name(),
            Op::TicksLeft => self.op_ticks_left(),

            Op::This => self.op_this(),
            Op::Definer => self.op_definer(),
            Op::Sender => self.op_sender(),
            Op::Caller => self.op_caller(),
            Op::TaskIdOp => self.op_task_id(),
            Op::Rep => self.op_rep(),

            Op::ErrorFunc => self.op_error_func(),
            Op::TracebackOp => self.op_traceback(),
            Op::Throw => self.op_throw(),
            Op::Rethrow => self.op_rethrow(),

            Op::Echo => self.op_echo(),
            Op::EchoFile => self.op_echo_file(),
            Op::Disconnect => self.op_disconnect(),
            Op::Filestat => self.op_filestat(),
            Op::ReadFile => self.op_read(),
            Op::WriteFile => self.op_write(),
            Op::Ls => self.op_ls(),
            Op::Connections => self.op_connections(),

            Op::AddParameter => self.op_add_parameter(),
            Op::Parameters => self.op_parameters(),
            Op::DelParameter => self.op_del_parameter(),
            Op::SetVar => self.op_set_var(),
            Op::GetVar => self.op_get_var(),
            Op::CompileOp => self.op_compile(),
            Op::Methods => self.op_methods(),
            Op::FindMethod => self.op_find_method(),
            Op::FindNextMethod => self.op_find_next_method(),
            Op::ListMethod => self.op_list_method(),
            Op::DelMethod => self.op_del_method(),
            Op::Parents => self.op_parents(),
            Op::Children => self.op_children(),
            Op::Ancestors => self.op_ancestors(),
            Op::HasAncestor => self.op_has_ancestor(),
            Op::Size => self.op_size(),
            Op::Idents => self.op_idents(),

            Op::PackOp => self.op_pack(),
            Op::Unpack => self.op_unpack(),
            Op::Digestable => self.op_digestable(),
            Op::Depends => self.op_depends(),

            Op::Create => self.op_create(),
            Op::Chparents => self.op_chparents(),
            Op::Destroy => self.op_destroy(),
            Op::Log => self.op_log(),
            Op::ConnAssign => self.op_conn_assign(),
            Op::BinaryDump => self.op_binary_dump(),
            Op::BinaryBackup => self.op_binary_backup(),
            Op::TextDump => self.op_text_dump(),
            Op::RunScript => self.op_run_script(),
            Op::Shutdown => self.op_shutdown(),
            Op::BindPort => self.op_bind(),
            Op::UnbindPort => self.op_unbind(),
            Op::ConnectOp => self.op_connect(),
            Op::SetHeartbeatFreq => self.op_set_heartbeat_freq(),
            Op::DataOp => self.op_data(),
            Op::SetName => self.op_set_name(),
            Op::DelName => self.op_del_name(),
            Op::TickOp => self.op_tick(),
            Op::Hostname => self.op_hostname(),
            Op::Ip => self.op_ip(),
            Op::DbTop => self.op_db_top(),
            Op::ResumeOp => self.op_resume(),
            Op::SuspendOp => self.op_suspend(),
            Op::TasksOp => self.op_tasks(),
            Op::CancelOp => self.op_cancel(),
            Op::PauseOp => self.op_pause(),
            Op::CallersOp => self.op_callers(),
            Op::Disassemble => self.op_disassemble(),
            Op::Debug => self.op_debug(),
        }
    }
}
