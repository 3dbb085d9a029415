//! Input and output functions: connection output, file echo, and the
//! privileged file operators.

use crate::error::VmResult;
use crate::interp::{Ty, Vm};
use cmm_core::{ident, Buffer, List, Value};
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

impl Vm {
    /// echo(buffer): append to every connection on the current object.
    pub(crate) fn op_echo(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Buffer], &[])? else {
            return Ok(());
        };
        let buf = self.stack[start].as_buffer().expect("checked").clone();
        let owner = self.cur_frame().object;
        self.bridge.tell(owner, &buf);
        self.pop_n(1);
        self.push(Value::Int(1));
        Ok(())
    }

    /// echo_file(name): stream a file under the text directory to the
    /// current object's connections.
    pub(crate) fn op_echo_file(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Str], &[])? else {
            return Ok(());
        };
        let name = self.stack[start].as_str().expect("checked").clone();
        if name.as_str().contains("../") {
            let shown = Value::Str(name).to_literal();
            return self.throw(
                ident::ids().perm,
                format!("Filename {shown} is not legal."),
            );
        }
        let path: PathBuf = self.dirs.text.join(name.as_str());
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(_) => {
                let shown = Value::Str(name).to_literal();
                return self.throw(ident::ids().file, format!("Cannot find file {shown}."));
            }
        };
        let owner = self.cur_frame().object;
        self.bridge.tell(owner, &Buffer::from_vec(bytes));
        self.pop_n(1);
        self.push(Value::Int(1));
        Ok(())
    }

    /// disconnect(): boot every connection on the current object.
    pub(crate) fn op_disconnect(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        let owner = self.cur_frame().object;
        let booted = self.bridge.boot(owner) as i64;
        self.push(Value::Int(booted));
        Ok(())
    }

    /// connections(): tokens of the live connections on the current
    /// object.
    pub(crate) fn op_connections(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        let owner = self.cur_frame().object;
        let conns: List = self
            .bridge
            .connections_of(owner)
            .into_iter()
            .map(|conn| Value::Int(conn.0 as i64))
            .collect();
        self.push(Value::List(conns));
        Ok(())
    }

    /// filestat(name): `[size, [mode, uid, gid], [atime, mtime, ctime]]`.
    pub(crate) fn op_filestat(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Str], &[])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        let name = self.stack[start].as_str().expect("checked").clone();
        let meta = match fs::metadata(name.as_str()) {
            Ok(meta) => meta,
            Err(err) => {
                let shown = Value::Str(name).to_literal();
                return self.throw_data(
                    ident::ids().file,
                    format!("Cannot find file {shown}."),
                    Some(Value::Str(err.to_string().into())),
                );
            }
        };

        #[cfg(unix)]
        let (mode, uid, gid) = {
            use std::os::unix::fs::MetadataExt;
            (meta.mode() as i64, meta.uid() as i64, meta.gid() as i64)
        };
        #[cfg(not(unix))]
        let (mode, uid, gid) = (0i64, 0i64, 0i64);

        let stamp = |time: std::io::Result<std::time::SystemTime>| -> i64 {
            time.ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_secs() as i64)
        };
        let result = List::from_vec(vec![
            Value::Int(meta.len() as i64),
            Value::List(List::from_vec(vec![
                Value::Int(mode),
                Value::Int(uid),
                Value::Int(gid),
            ])),
            Value::List(List::from_vec(vec![
                Value::Int(stamp(meta.accessed())),
                Value::Int(stamp(meta.modified())),
                Value::Int(stamp(meta.created())),
            ])),
        ]);
        self.pop_n(1);
        self.push(Value::List(result));
        Ok(())
    }

    /// read(name[, offset[, len]]): a file's bytes as a buffer. A negative
    /// offset seeks from the end.
    pub(crate) fn op_read(&mut self) -> VmResult<()> {
        let Some((start, num_args)) = self.func_args(&[Ty::Str], &[Ty::Int, Ty::Int])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        let name = self.stack[start].as_str().expect("checked").clone();
        let shown = Value::Str(name.clone()).to_literal();
        let mut file = match fs::File::open(name.as_str()) {
            Ok(file) => file,
            Err(_) => {
                return self.throw(
                    ident::ids().file,
                    format!("Cannot open file {shown} for reading."),
                );
            }
        };

        let offset = if num_args > 1 {
            self.stack[start + 1].as_int().expect("checked")
        } else {
            0
        };
        let seek = if offset >= 0 {
            file.seek(SeekFrom::Start(offset as u64))
        } else {
            file.seek(SeekFrom::End(offset))
        };
        if let Err(err) = seek {
            return self.throw_data(
                ident::ids().file,
                format!("Cannot seek {shown} to {offset}: {err}"),
                Some(Value::Str(err.to_string().into())),
            );
        }

        let mut bytes = Vec::new();
        let result = if num_args > 2 {
            let wanted = self.stack[start + 2].as_int().expect("checked").max(0) as usize;
            bytes.resize(wanted, 0);
            file.read_exact(&mut bytes).map(|_| ())
        } else {
            file.read_to_end(&mut bytes).map(|_| ())
        };
        if let Err(err) = result {
            return self.throw_data(
                ident::ids().file,
                format!("Trouble reading file {shown}: {err}"),
                Some(Value::Str(err.to_string().into())),
            );
        }

        self.pop_n(num_args);
        self.push(Value::Buffer(Buffer::from_vec(bytes)));
        Ok(())
    }

    /// write(name, buffer[, offset]): append, or overwrite at an offset.
    pub(crate) fn op_write(&mut self) -> VmResult<()> {
        let Some((start, num_args)) =
            self.func_args(&[Ty::Str, Ty::Buffer], &[Ty::Int])?
        else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        let name = self.stack[start].as_str().expect("checked").clone();
        let shown = Value::Str(name.clone()).to_literal();
        let data = self.stack[start + 1].as_buffer().expect("checked").clone();

        let mut open = fs::OpenOptions::new();
        open.create(true).write(true);
        if num_args < 3 {
            open.append(true);
        }
        let mut file = match open.open(name.as_str()) {
            Ok(file) => file,
            Err(_) => {
                return self.throw(
                    ident::ids().file,
                    format!("Cannot open file {shown} for writing."),
                );
            }
        };
        if num_args == 3 {
            let offset = self.stack[start + 2].as_int().expect("checked");
            let seek = if offset >= 0 {
                file.seek(SeekFrom::Start(offset as u64))
            } else {
                file.seek(SeekFrom::End(offset))
            };
            if let Err(err) = seek {
                return self.throw_data(
                    ident::ids().file,
                    format!("Cannot seek {shown} to {offset}: {err}"),
                    Some(Value::Str(err.to_string().into())),
                );
            }
        }
        if let Err(err) = file.write_all(data.as_bytes()) {
            return self.throw_data(
                ident::ids().file,
                format!("Trouble writing file {shown}: {err}"),
                Some(Value::Str(err.to_string().into())),
            );
        }
        self.pop_n(num_args);
        self.push(Value::Int(data.len() as i64));
        Ok(())
    }

    /// ls(path): directory entries as a list of strings.
    pub(crate) fn op_ls(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Str], &[])? else {
            return Ok(());
        };
        let name = self.stack[start].as_str().expect("checked").clone();
        let entries = match fs::read_dir(name.as_str()) {
            Ok(entries) => entries,
            Err(err) => {
                let shown = Value::Str(name).to_literal();
                return self.throw_data(
                    ident::ids().file,
                    format!("Can't ls {shown}"),
                    Some(Value::Str(err.to_string().into())),
                );
            }
        };
        let names: List = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| Value::Str(entry.file_name().to_string_lossy().into_owned().into()))
            .collect();
        self.pop_n(1);
        self.push(Value::List(names));
        Ok(())
    }
}
