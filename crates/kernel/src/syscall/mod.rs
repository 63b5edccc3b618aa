//! 系统调用的译码与分发
//!
//! 调用号在用户栈顶，参数跟在 esp + 4 开始的三个槽里。
//! 指针参数一律先验证再使用，校验失败的进程直接终止。
//! 文件系统入口统一在这一层串到全局文件系统锁上

mod fs;
mod memory;
mod process;

use alloc::sync::Arc;

use defines::{
    error::{errno, KResult},
    syscall::*,
};

use crate::{
    memory::{user_check, VirtAddr},
    process::Process,
    trap::TrapFrame,
    Kernel,
};

/// INT 0x30 的入口。返回值写回 eax，无返回值的调用保持寄存器不变
pub fn handle_syscall(k: &Kernel, proc: &Arc<Process>, tf: &mut TrapFrame) {
    // 内核态缺页会用到的栈指针副本
    proc.inner.lock().saved_esp = VirtAddr(tf.esp);

    let Ok(id) = stack_slot(k, proc, tf, 0) else {
        // 栈指针本身就不合法，进程已经终止
        tf.eax = -1;
        return;
    };
    let id = id as usize;

    match syscall_impl(k, proc, tf, id) {
        Ok(Some(ret)) => {
            debug!("syscall {} -> {ret}", name(id));
            tf.eax = ret;
        }
        Ok(None) => debug!("syscall {} done", name(id)),
        Err(err) if err == errno::KILLED => tf.eax = -1,
        Err(err) => {
            warn!("syscall {} -> {}", name(id), errno::error_info(err.as_isize()));
            tf.eax = -1;
        }
    }
}

fn syscall_impl(k: &Kernel, proc: &Arc<Process>, tf: &mut TrapFrame, id: usize) -> KResult<Option<isize>> {
    match id {
        HALT => {
            k.halt();
            Ok(None)
        }
        EXIT => {
            let status = stack_slot(k, proc, tf, 1)? as i32;
            crate::process::exit_process(k, proc, status);
            Ok(Some(status as isize))
        }
        EXEC => {
            let cmdline = arg_ptr(k, proc, tf, 1)?;
            process::sys_exec(k, proc, tf, cmdline).map(Some)
        }
        WAIT => {
            let pid = stack_slot(k, proc, tf, 1)? as usize;
            process::sys_wait(k, proc, pid).map(Some)
        }
        CREATE => {
            let name = arg_ptr(k, proc, tf, 1)?;
            let size = stack_slot(k, proc, tf, 2)? as usize;
            fs::sys_create(k, proc, tf, name, size).map(Some)
        }
        REMOVE => {
            let name = arg_ptr(k, proc, tf, 1)?;
            fs::sys_remove(k, proc, tf, name).map(Some)
        }
        OPEN => {
            let name = arg_ptr(k, proc, tf, 1)?;
            fs::sys_open(k, proc, tf, name).map(Some)
        }
        FILESIZE => {
            let fd = stack_slot(k, proc, tf, 1)? as usize;
            fs::sys_filesize(k, proc, fd).map(Some)
        }
        READ => {
            let fd = stack_slot(k, proc, tf, 1)? as usize;
            let buf = arg_ptr(k, proc, tf, 2)?;
            let n = stack_slot(k, proc, tf, 3)? as usize;
            fs::sys_read(k, proc, tf, fd, buf, n).map(Some)
        }
        WRITE => {
            let fd = stack_slot(k, proc, tf, 1)? as usize;
            let buf = arg_ptr(k, proc, tf, 2)?;
            let n = stack_slot(k, proc, tf, 3)? as usize;
            fs::sys_write(k, proc, tf, fd, buf, n).map(Some)
        }
        SEEK => {
            let fd = stack_slot(k, proc, tf, 1)? as usize;
            let pos = stack_slot(k, proc, tf, 2)? as usize;
            fs::sys_seek(k, proc, fd, pos)?;
            Ok(None)
        }
        TELL => {
            let fd = stack_slot(k, proc, tf, 1)? as usize;
            fs::sys_tell(k, proc, fd).map(Some)
        }
        CLOSE => {
            let fd = stack_slot(k, proc, tf, 1)? as usize;
            fs::sys_close(k, proc, fd)?;
            Ok(None)
        }
        MMAP => {
            let fd = stack_slot(k, proc, tf, 1)? as usize;
            let addr = arg_ptr(k, proc, tf, 2)?;
            memory::sys_mmap(k, proc, fd, addr).map(Some)
        }
        MUNMAP => {
            let id = stack_slot(k, proc, tf, 1)? as usize;
            memory::sys_munmap(k, proc, id)?;
            Ok(None)
        }
        _ => {
            // 未知调用号：不动寄存器，照常返回
            debug!("unknown syscall id {id}");
            Ok(None)
        }
    }
}

/// 用户栈上第 idx 个 32 位槽
fn stack_slot(k: &Kernel, proc: &Arc<Process>, tf: &mut TrapFrame, idx: usize) -> KResult<u32> {
    let va = VirtAddr(tf.esp.wrapping_add(4 * idx));
    user_check::read_u32(k, proc, va)
}

/// 指针实参：值本身从栈上读出，指向的内容由具体调用再校验
fn arg_ptr(k: &Kernel, proc: &Arc<Process>, tf: &mut TrapFrame, idx: usize) -> KResult<VirtAddr> {
    Ok(VirtAddr(stack_slot(k, proc, tf, idx)? as usize))
}
