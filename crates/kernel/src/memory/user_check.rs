//! 系统调用层访问用户内存前的检查与拷贝
//!
//! 指针本身要求非空、低于 PHYS_BASE 且已有映射；
//! 将被解引用的缓冲区则逐页触碰，缺页经由缺页处理惰性补齐

use alloc::{sync::Arc, vec::Vec};

use compact_str::CompactString;
use defines::{
    config::{MAX_CSTR_LEN, PAGE_SIZE, PHYS_BASE},
    error::{errno, KResult},
};

use crate::{
    process::{self, Process},
    trap::{self, FaultOutcome, PageFault, TrapFrame},
    Kernel,
};

use super::{address::VirtAddr, mmu::TouchFault};

/// 指针参数的检查：非法即终止进程
pub fn check_valid(k: &Kernel, proc: &Arc<Process>, va: VirtAddr) -> KResult<()> {
    if va.is_null() || !va.is_user() || proc.pagedir.lock().get_page(va.vpn_floor()).is_none() {
        return Err(process::terminate(k, proc, -1));
    }
    Ok(())
}

/// 读取用户栈上的一个 32 位值，可能跨页
pub fn read_u32(k: &Kernel, proc: &Arc<Process>, va: VirtAddr) -> KResult<u32> {
    check_valid(k, proc, va)?;
    check_valid(k, proc, va + 3)?;
    let mut raw = [0u8; 4];
    copy_resident(k, proc, va, &mut raw);
    Ok(u32::from_le_bytes(raw))
}

/// 触碰一个字节所在的页。缺页时走缺页处理，处理失败则进程已被终止
fn touch_byte(
    k: &Kernel,
    proc: &Arc<Process>,
    tf: &mut TrapFrame,
    va: VirtAddr,
    write: bool,
) -> KResult<()> {
    if va.is_null() || !va.is_user() {
        return Err(process::terminate(k, proc, -1));
    }
    loop {
        let fault = match proc.pagedir.lock().touch(va.vpn_floor(), write) {
            Ok(_) => return Ok(()),
            Err(TouchFault::NotPresent) => PageFault {
                addr: va,
                not_present: true,
                write,
                user: false,
            },
            Err(TouchFault::Forbidden) => PageFault {
                addr: va,
                not_present: false,
                write,
                user: false,
            },
        };
        if trap::page_fault(k, proc, tf, fault) == FaultOutcome::Killed {
            return Err(errno::KILLED);
        }
    }
}

/// 逐页触碰 `[va, va + len)`
pub fn touch_range(
    k: &Kernel,
    proc: &Arc<Process>,
    tf: &mut TrapFrame,
    va: VirtAddr,
    len: usize,
    write: bool,
) -> KResult<()> {
    if len == 0 {
        return Ok(());
    }
    let end = match va.0.checked_add(len) {
        Some(end) if end <= PHYS_BASE => end,
        _ => return Err(process::terminate(k, proc, -1)),
    };
    let mut addr = va;
    loop {
        touch_byte(k, proc, tf, addr, write)?;
        let next = (addr.vpn_floor() + 1).page_start();
        if next.0 >= end {
            return Ok(());
        }
        addr = next;
    }
}

/// 从用户缓冲区拷入内核
pub fn copy_from_user(
    k: &Kernel,
    proc: &Arc<Process>,
    tf: &mut TrapFrame,
    va: VirtAddr,
    dst: &mut [u8],
) -> KResult<()> {
    touch_range(k, proc, tf, va, dst.len(), false)?;
    copy_resident(k, proc, va, dst);
    Ok(())
}

/// 从内核拷出到用户缓冲区，目标页的脏位随之置上
pub fn copy_to_user(
    k: &Kernel,
    proc: &Arc<Process>,
    tf: &mut TrapFrame,
    va: VirtAddr,
    src: &[u8],
) -> KResult<()> {
    touch_range(k, proc, tf, va, src.len(), true)?;
    let mut copied = 0;
    while copied < src.len() {
        let cur = va + copied;
        let page_off = cur.page_offset();
        let n = usize::min(src.len() - copied, PAGE_SIZE - page_off);
        let kpage = proc
            .pagedir
            .lock()
            .get_page(cur.vpn_floor())
            .expect("touched page vanished");
        let data = k.frames().data(kpage);
        data.lock().0[page_off..page_off + n].copy_from_slice(&src[copied..copied + n]);
        copied += n;
    }
    Ok(())
}

/// 读入以 NUL 结尾的用户字符串。非 utf8 会返回 EINVAL
pub fn read_cstr(
    k: &Kernel,
    proc: &Arc<Process>,
    tf: &mut TrapFrame,
    va: VirtAddr,
) -> KResult<CompactString> {
    let mut out = Vec::new();
    let mut addr = va;
    loop {
        touch_byte(k, proc, tf, addr, false)?;
        let page_off = addr.page_offset();
        let kpage = proc
            .pagedir
            .lock()
            .get_page(addr.vpn_floor())
            .expect("touched page vanished");
        let data = k.frames().data(kpage);
        let buf = data.lock();
        let chunk = &buf.0[page_off..];
        if let Some(nul) = chunk.iter().position(|&b| b == 0) {
            out.extend_from_slice(&chunk[..nul]);
            break;
        }
        out.extend_from_slice(chunk);
        drop(buf);

        if out.len() > MAX_CSTR_LEN {
            break;
        }
        addr = (addr.vpn_floor() + 1).page_start();
        if !addr.is_user() {
            return Err(process::terminate(k, proc, -1));
        }
    }
    if out.len() > MAX_CSTR_LEN {
        warn!("user cstr too long, from {:#x}", va.0);
        return Err(errno::ENAMETOOLONG);
    }
    let s = core::str::from_utf8(&out).map_err(|_| errno::EINVAL)?;
    Ok(CompactString::from(s))
}

/// 已确认映射存在的纯拷贝
fn copy_resident(k: &Kernel, proc: &Arc<Process>, va: VirtAddr, dst: &mut [u8]) {
    let mut copied = 0;
    while copied < dst.len() {
        let cur = va + copied;
        let page_off = cur.page_offset();
        let n = usize::min(dst.len() - copied, PAGE_SIZE - page_off);
        let kpage = proc
            .pagedir
            .lock()
            .get_page(cur.vpn_floor())
            .expect("mapped page vanished");
        let data = k.frames().data(kpage);
        dst[copied..copied + n].copy_from_slice(&data.lock().0[page_off..page_off + n]);
        copied += n;
    }
}
