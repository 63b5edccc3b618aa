//! 文件类系统调用
//!
//! fd 的合法性检查分两套纪律。READ/WRITE：形状非法（越界、写 0 号、
//! 读 1 号）终止进程，形状合法但槽空着只返回 -1。
//! FILESIZE/SEEK/TELL/CLOSE：槽里没有打开的文件就终止进程，
//! 不管形状如何

use alloc::sync::Arc;

use defines::{
    config::{FD_FIRST_FILE, FD_TABLE_SIZE},
    error::KResult,
};
use triomphe::Arc as FileArc;

use crate::{
    fs::File,
    memory::{user_check, VirtAddr},
    process::{self, Process},
    trap::TrapFrame,
    Kernel,
};

pub fn sys_create(
    k: &Kernel,
    proc: &Arc<Process>,
    tf: &mut TrapFrame,
    name: VirtAddr,
    size: usize,
) -> KResult<isize> {
    let name = user_check::read_cstr(k, proc, tf, name)?;
    let _fs = k.fs_lock();
    Ok(k.filesys().create(&name, size) as isize)
}

pub fn sys_remove(k: &Kernel, proc: &Arc<Process>, tf: &mut TrapFrame, name: VirtAddr) -> KResult<isize> {
    let name = user_check::read_cstr(k, proc, tf, name)?;
    let _fs = k.fs_lock();
    Ok(k.filesys().remove(&name) as isize)
}

pub fn sys_open(k: &Kernel, proc: &Arc<Process>, tf: &mut TrapFrame, name: VirtAddr) -> KResult<isize> {
    let name = user_check::read_cstr(k, proc, tf, name)?;
    let file = {
        let _fs = k.fs_lock();
        k.filesys().open(&name)
    };
    let Some(file) = file else {
        return Ok(-1);
    };
    match proc.inner.lock().fd_table.alloc(file) {
        Some(fd) => Ok(fd as isize),
        None => Ok(-1),
    }
}

pub fn sys_filesize(k: &Kernel, proc: &Arc<Process>, fd: usize) -> KResult<isize> {
    let file = file_for(k, proc, fd)?;
    let _fs = k.fs_lock();
    Ok(file.length() as isize)
}

pub fn sys_read(
    k: &Kernel,
    proc: &Arc<Process>,
    tf: &mut TrapFrame,
    fd: usize,
    buf: VirtAddr,
    n: usize,
) -> KResult<isize> {
    if fd == 1 || fd >= FD_TABLE_SIZE {
        return Err(process::terminate(k, proc, -1));
    }
    // 先触碰目标缓冲区，惰性页在拿文件系统锁之前就位
    user_check::touch_range(k, proc, tf, buf, n, true)?;

    let mut kbuf = alloc::vec![0u8; n];
    if fd == 0 {
        let _fs = k.fs_lock();
        for b in kbuf.iter_mut() {
            *b = k.console().getc();
        }
        drop(_fs);
        user_check::copy_to_user(k, proc, tf, buf, &kbuf)?;
        return Ok(n as isize);
    }

    let Some(file) = proc.inner.lock().fd_table.get(fd) else {
        return Ok(-1);
    };
    let nread = {
        let _fs = k.fs_lock();
        file.read(&mut kbuf)
    };
    user_check::copy_to_user(k, proc, tf, buf, &kbuf[..nread])?;
    Ok(nread as isize)
}

pub fn sys_write(
    k: &Kernel,
    proc: &Arc<Process>,
    tf: &mut TrapFrame,
    fd: usize,
    buf: VirtAddr,
    n: usize,
) -> KResult<isize> {
    if fd < 1 || fd >= FD_TABLE_SIZE {
        return Err(process::terminate(k, proc, -1));
    }
    let mut kbuf = alloc::vec![0u8; n];
    user_check::copy_from_user(k, proc, tf, buf, &mut kbuf)?;

    if fd == 1 {
        let _fs = k.fs_lock();
        k.console().put_buf(&kbuf);
        return Ok(n as isize);
    }

    let Some(file) = proc.inner.lock().fd_table.get(fd) else {
        return Ok(-1);
    };
    let _fs = k.fs_lock();
    Ok(file.write(&kbuf) as isize)
}

pub fn sys_seek(k: &Kernel, proc: &Arc<Process>, fd: usize, pos: usize) -> KResult<()> {
    let file = file_for(k, proc, fd)?;
    let _fs = k.fs_lock();
    file.seek(pos);
    Ok(())
}

pub fn sys_tell(k: &Kernel, proc: &Arc<Process>, fd: usize) -> KResult<isize> {
    let file = file_for(k, proc, fd)?;
    let _fs = k.fs_lock();
    Ok(file.tell() as isize)
}

pub fn sys_close(k: &Kernel, proc: &Arc<Process>, fd: usize) -> KResult<()> {
    if !(FD_FIRST_FILE..FD_TABLE_SIZE).contains(&fd) {
        return Err(process::terminate(k, proc, -1));
    }
    let closed = proc.inner.lock().fd_table.close(fd);
    match closed {
        Some(file) => {
            // 句柄在文件系统锁内落下
            let _fs = k.fs_lock();
            drop(file);
            Ok(())
        }
        None => Err(process::terminate(k, proc, -1)),
    }
}

/// FILESIZE/SEEK/TELL 这一族对非法 fd 的统一处置：终止进程
fn file_for(k: &Kernel, proc: &Arc<Process>, fd: usize) -> KResult<FileArc<File>> {
    match proc.inner.lock().fd_table.get(fd) {
        Some(file) => Ok(file),
        None => Err(process::terminate(k, proc, -1)),
    }
}
