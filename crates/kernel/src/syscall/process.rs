//! 进程类系统调用

use alloc::sync::Arc;

use defines::error::KResult;

use crate::{
    memory::{user_check, VirtAddr},
    process::Process,
    trap::TrapFrame,
    Kernel,
};

/// 生成子进程并同步等它装载完。返回子进程 pid，装载失败返回 -1
pub fn sys_exec(k: &Kernel, proc: &Arc<Process>, tf: &mut TrapFrame, cmdline: VirtAddr) -> KResult<isize> {
    user_check::check_valid(k, proc, cmdline)?;
    let cmdline = user_check::read_cstr(k, proc, tf, cmdline)?;
    let Some(name) = cmdline.split_whitespace().next() else {
        return Ok(-1);
    };

    let child = k.procs().spawn(name);
    let loaded = {
        let _fs = k.fs_lock();
        k.loader().load(k, &child, &cmdline)
    };
    if !loaded {
        info!("load of '{cmdline}' failed");
        k.procs().remove(child.pid());
        return Ok(-1);
    }

    child.inner.lock().parent = Arc::downgrade(proc);
    proc.inner.lock().children.push(Arc::clone(&child));
    Ok(child.pid() as isize)
}

/// 等待直接子进程退出并取走退出状态，每个子进程只能等一次。
/// 真正的阻塞交由外部调度器，子进程还活着时这里返回 -1
pub fn sys_wait(k: &Kernel, proc: &Arc<Process>, pid: usize) -> KResult<isize> {
    let child = {
        let inner = proc.inner.lock();
        let Some(child) = inner.children.iter().find(|c| c.pid() == pid) else {
            return Ok(-1);
        };
        Arc::clone(child)
    };

    let Some(status) = child.inner.lock().exit_status else {
        return Ok(-1);
    };

    // 取走退出状态，之后同一 pid 不可再等
    proc.inner.lock().children.retain(|c| c.pid() != pid);
    k.procs().remove(pid);
    Ok(status as isize)
}
