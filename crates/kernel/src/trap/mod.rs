//! 缺页的分类与补页
//!
//! 陷入的序言在重开中断之前就把故障地址从硬件寄存器取走，
//! 这里拿到的 `PageFault` 已经是稳定的快照

use alloc::sync::Arc;

use defines::config::{PHYS_BASE, STACK_LIMIT, STACK_SLACK};
use scopeguard::ScopeGuard;

use crate::{
    memory::{frame_alloc, AllocFlags, PageInfo, PagePurpose, VirtAddr},
    process::{self, Process},
    Kernel,
};

/// 陷入时保存的用户寄存器。只保留这套子系统关心的部分
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    pub eip: usize,
    pub esp: usize,
    pub eax: isize,
}

impl TrapFrame {
    pub fn new(esp: usize) -> Self {
        Self { eip: 0, esp, eax: 0 }
    }
}

/// 缺页错误码加故障地址，语义与硬件错误码一致
#[derive(Debug, Clone, Copy)]
pub struct PageFault {
    pub addr: VirtAddr,
    /// true 是页不存在，false 是写只读页
    pub not_present: bool,
    pub write: bool,
    pub user: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// 页已补好，重新执行故障指令即可
    Continue,
    /// 进程已被终止
    Killed,
}

/// 缺页处理的入口
pub fn page_fault(k: &Kernel, proc: &Arc<Process>, tf: &mut TrapFrame, fault: PageFault) -> FaultOutcome {
    k.count_fault();
    trace!(
        "page fault at {:#x}, not_present={} write={} user={}",
        fault.addr.0,
        fault.not_present,
        fault.write,
        fault.user
    );

    // 用户态的 esp 取陷入栈帧，内核态取进入内核时留下的副本
    let esp = if fault.user {
        VirtAddr(tf.esp)
    } else {
        proc.inner.lock().saved_esp
    };

    if fault.addr.is_null() || !fault.addr.is_user() {
        if !fault.user {
            panic!(
                "kernel bug: fault at {:#x} in kernel context, frame: {:x?}",
                fault.addr.0, tf
            );
        }
        process::exit_process(k, proc, -1);
        return FaultOutcome::Killed;
    }

    let vp = fault.addr.vpn_floor();
    let snapshot = proc.spt.lock().get(vp).cloned();

    let Some(info) = snapshot else {
        return grow_stack(k, proc, fault, esp);
    };

    // 写只读页不属于可补的缺页
    if fault.write && !info.writable {
        process::exit_process(k, proc, -1);
        return FaultOutcome::Killed;
    }

    if let Some(slot) = info.swap_slot {
        swap_in(k, proc, fault, &info, slot)
    } else if info.frame.is_some() {
        // 已经驻留，多半是并发补页后的余波
        FaultOutcome::Continue
    } else {
        match info.purpose {
            PagePurpose::File | PagePurpose::Mmap => load_from_file(k, proc, fault, &info),
            PagePurpose::Stack => fresh_stack_page(k, proc, fault),
        }
    }
}

/// SPT 没有记录的地址只剩栈增长一种合法解释
fn grow_stack(k: &Kernel, proc: &Arc<Process>, fault: PageFault, esp: VirtAddr) -> FaultOutcome {
    if fault.addr.0 <= PHYS_BASE - STACK_LIMIT {
        process::exit_process(k, proc, -1);
        return FaultOutcome::Killed;
    }
    // PUSHA 最多先写到 esp - 32，再往下就不是栈访问了
    if fault.addr.0 < esp.0.saturating_sub(STACK_SLACK) {
        process::exit_process(k, proc, -1);
        return FaultOutcome::Killed;
    }

    let vp = fault.addr.vpn_floor();
    let kpage = frame_alloc(k, AllocFlags::ZERO, true);
    k.frames().assign(kpage, proc.pid(), vp);
    let installed = proc.pagedir.lock().install(vp, kpage, true);
    debug_assert!(installed, "stack page already mapped");

    let mut info = PageInfo::new_stack();
    info.frame = Some(kpage);
    proc.spt.lock().insert(vp, info);
    k.frames().set_evictable(kpage, true);

    proc.inner.lock().saved_esp = fault.addr;
    debug!("stack grown to {:#x} for pid {}", vp.page_start().0, proc.pid());
    FaultOutcome::Continue
}

/// 文件后备页（可执行段或 mmap）的惰性装载
fn load_from_file(k: &Kernel, proc: &Arc<Process>, fault: PageFault, info: &PageInfo) -> FaultOutcome {
    let vp = fault.addr.vpn_floor();
    let file = info.file.clone().expect("file-backed page without file");

    let kpage = frame_alloc(k, AllocFlags::empty(), true);
    // 半路失败时把帧还回去
    let frame_guard = scopeguard::guard(kpage, |kpage| k.frames().free(kpage));

    {
        let _fs = k.fs_lock();
        file.seek(info.ofs);
        let data = k.frames().data(kpage);
        let mut buf = data.lock();
        let n = file.read(&mut buf.0[..info.read_bytes]);
        if n != info.read_bytes {
            drop(buf);
            warn!(
                "short read loading page {:#x}: {} of {} bytes",
                vp.page_start().0,
                n,
                info.read_bytes
            );
            drop(_fs);
            drop(frame_guard);
            process::exit_process(k, proc, -1);
            return FaultOutcome::Killed;
        }
        buf.0[info.read_bytes..].fill(0);
    }
    let kpage = ScopeGuard::into_inner(frame_guard);

    k.frames().assign(kpage, proc.pid(), vp);
    let installed = proc.pagedir.lock().install(vp, kpage, info.writable);
    debug_assert!(installed, "faulting page already mapped");
    proc.spt.lock().get_mut(vp).expect("entry vanished").frame = Some(kpage);
    k.frames().set_evictable(kpage, true);
    FaultOutcome::Continue
}

/// 从交换槽取回，之后槽立即释放
fn swap_in(
    k: &Kernel,
    proc: &Arc<Process>,
    fault: PageFault,
    info: &PageInfo,
    slot: usize,
) -> FaultOutcome {
    let vp = fault.addr.vpn_floor();
    let kpage = frame_alloc(k, AllocFlags::empty(), true);
    {
        let data = k.frames().data(kpage);
        k.swap().read_slot(slot, &mut data.lock());
    }
    k.swap().slot_free(slot);

    {
        let mut spt = proc.spt.lock();
        let entry = spt.get_mut(vp).expect("entry vanished");
        entry.swap_slot = None;
        entry.frame = Some(kpage);
    }
    k.frames().assign(kpage, proc.pid(), vp);
    let installed = proc.pagedir.lock().install(vp, kpage, info.writable);
    debug_assert!(installed, "faulting page already mapped");
    k.frames().set_evictable(kpage, true);

    if info.purpose == PagePurpose::Stack {
        proc.inner.lock().saved_esp = fault.addr;
    } else {
        // 从交换区回来的内容和后备文件不再一致，按脏页对待，
        // 下次驱逐才不会误以为能从文件重载
        let _ = proc.pagedir.lock().touch(vp, true);
    }
    FaultOutcome::Continue
}

/// SPT 有栈条目却既不驻留也不在交换区的罕见情况，补一页零页
fn fresh_stack_page(k: &Kernel, proc: &Arc<Process>, fault: PageFault) -> FaultOutcome {
    let vp = fault.addr.vpn_floor();
    let kpage = frame_alloc(k, AllocFlags::ZERO, true);
    k.frames().assign(kpage, proc.pid(), vp);
    let installed = proc.pagedir.lock().install(vp, kpage, true);
    debug_assert!(installed, "faulting page already mapped");
    proc.spt.lock().get_mut(vp).expect("entry vanished").frame = Some(kpage);
    k.frames().set_evictable(kpage, true);
    proc.inner.lock().saved_esp = fault.addr;
    FaultOutcome::Continue
}

/// 用户进程触发了缺页之外的异常
pub fn user_exception(k: &Kernel, proc: &Arc<Process>, vec_no: u8, name: &str) {
    let line = alloc::format!("{}: dying due to interrupt {:#04x} ({})\n", proc.name, vec_no, name);
    k.console().put_buf(line.as_bytes());
    process::exit_process(k, proc, -1);
}

#[cfg(test)]
mod tests {
    use defines::config::PAGE_SIZE;

    use crate::{
        memory::{PageInfo, PagePurpose, VirtPageNum},
        test_support::{boot_kernel, user_load, user_store},
    };

    use super::*;

    #[test]
    fn pusha_heuristic_grows_stack() {
        let (k, _console) = boot_kernel(8);
        let proc = k.procs().spawn("p");
        let mut tf = TrapFrame::new(0xBFFF_F000);

        // esp - 32 处的访问要触发栈增长
        assert!(user_store(&k, &proc, &mut tf, 0xBFFF_EFE0, 7).is_ok());
        assert_eq!(k.fault_count(), 1);

        let spt = proc.spt.lock();
        let entry = spt.get(VirtPageNum(0xBFFF_E000 >> 12)).unwrap();
        assert_eq!(entry.purpose, PagePurpose::Stack);
        assert!(entry.resident());
        drop(spt);

        // 已经驻留，再次访问不再缺页
        assert_eq!(user_load(&k, &proc, &mut tf, 0xBFFF_EFE0), Ok(7));
        assert_eq!(k.fault_count(), 1);
        assert_eq!(proc.inner.lock().saved_esp.0, 0xBFFF_EFE0);
        k.audit();
    }

    #[test]
    fn access_below_heuristic_window_kills() {
        let (k, console) = boot_kernel(8);
        let proc = k.procs().spawn("p");
        let mut tf = TrapFrame::new(0xBFFF_F000);

        // esp - 33 已经在启发式窗口之外
        assert!(user_store(&k, &proc, &mut tf, 0xBFFF_EFDF, 1).is_err());
        assert!(proc.is_zombie());
        assert_eq!(console.output(), "p: exit(-1)\n");
    }

    #[test]
    fn stack_beyond_limit_kills() {
        let (k, _console) = boot_kernel(8);
        let proc = k.procs().spawn("p");
        let va = PHYS_BASE - STACK_LIMIT - 1;
        let mut tf = TrapFrame::new(va + 8);

        assert!(user_load(&k, &proc, &mut tf, va).is_err());
        assert!(proc.is_zombie());
    }

    #[test]
    fn kernel_and_null_addresses_kill() {
        let (k, _console) = boot_kernel(8);
        let proc = k.procs().spawn("p");
        let mut tf = TrapFrame::new(0xBFFF_F000);
        assert!(user_load(&k, &proc, &mut tf, PHYS_BASE + 123).is_err());
        assert!(proc.is_zombie());

        let proc2 = k.procs().spawn("q");
        assert!(user_load(&k, &proc2, &mut tf, 0).is_err());
        assert!(proc2.is_zombie());
    }

    #[test]
    fn write_to_readonly_page_kills() {
        let (k, _console) = boot_kernel(8);
        k.filesys().create("prog", PAGE_SIZE);
        let file = k.filesys().open("prog").unwrap();
        file.write_at(b"text", 0);

        let proc = k.procs().spawn("p");
        let vp = VirtPageNum(0x1000_0000 >> 12);
        proc.spt
            .lock()
            .insert(vp, PageInfo::new_file(file, 0, PAGE_SIZE, false));

        let mut tf = TrapFrame::new(0xBFFF_F000);
        // 读触发惰性装载
        assert_eq!(user_load(&k, &proc, &mut tf, 0x1000_0000), Ok(b't'));
        k.audit();
        // 写只读页被拒
        assert!(user_store(&k, &proc, &mut tf, 0x1000_0000, 9).is_err());
        assert!(proc.is_zombie());
    }

    #[test]
    fn short_read_during_fault_in_kills() {
        let (k, _console) = boot_kernel(8);
        k.filesys().create("tiny", 16);
        let file = k.filesys().open("tiny").unwrap();

        let proc = k.procs().spawn("p");
        let vp = VirtPageNum(0x1000_0000 >> 12);
        // 声称要读满一页，文件却只有 16 字节
        proc.spt
            .lock()
            .insert(vp, PageInfo::new_file(file, 0, PAGE_SIZE, true));

        let mut tf = TrapFrame::new(0xBFFF_F000);
        assert!(user_load(&k, &proc, &mut tf, 0x1000_0000).is_err());
        assert!(proc.is_zombie());
        // 半路释放的帧回到了池里
        let free_frames = k
            .frames()
            .snapshot()
            .iter()
            .filter(|slot| !slot.in_use)
            .count();
        assert_eq!(free_frames, k.frames().capacity());
    }

    #[test]
    fn swap_roundtrip_preserves_contents() {
        // 4 帧的池装不下 6 个栈页，必然经过换出换入
        let (k, _console) = boot_kernel(4);
        let proc = k.procs().spawn("p");
        let mut tf = TrapFrame::new(0xBFFF_F000);

        let pages = 6usize;
        for i in 0..pages {
            let va = 0xBFFF_F000 - (i + 1) * PAGE_SIZE;
            tf.esp = va;
            user_store(&k, &proc, &mut tf, va, i as u8 + 1).unwrap();
            user_store(&k, &proc, &mut tf, va + 100, i as u8 + 101).unwrap();
        }
        assert!(k.swap().allocated_count() > 0, "eviction must have spilled");
        k.audit();

        for i in 0..pages {
            let va = 0xBFFF_F000 - (i + 1) * PAGE_SIZE;
            assert_eq!(user_load(&k, &proc, &mut tf, va), Ok(i as u8 + 1));
            assert_eq!(user_load(&k, &proc, &mut tf, va + 100), Ok(i as u8 + 101));
        }
        k.audit();

        // 退出后帧和交换槽都要归还
        process::exit_process(&k, &proc, 0);
        assert_eq!(k.swap().allocated_count(), 0);
        let in_use = k.frames().snapshot().iter().filter(|s| s.in_use).count();
        assert_eq!(in_use, 0);
    }

    #[test]
    fn dirtied_file_page_survives_repeated_eviction() {
        // 两帧的池子，栈页和文件页反复互相挤兑
        let (k, _console) = boot_kernel(2);
        k.filesys().create("seg", PAGE_SIZE);
        let file = k.filesys().open("seg").unwrap();
        file.write_at(&[b'A'; 64], 0);

        let proc = k.procs().spawn("p");
        let vp = VirtPageNum(0x1000_0000 >> 12);
        proc.spt
            .lock()
            .insert(vp, PageInfo::new_file(file, 0, PAGE_SIZE, true));

        let mut tf = TrapFrame::new(0xBFFF_F000);
        user_store(&k, &proc, &mut tf, 0x1000_0000, b'Z').unwrap();

        // 每一轮都把池子搅一遍，文件页必然被换出又换回
        for round in 0..4usize {
            let va = 0xBFFF_F000 - (round + 1) * PAGE_SIZE;
            tf.esp = va;
            user_store(&k, &proc, &mut tf, va, round as u8).unwrap();
            assert_eq!(user_load(&k, &proc, &mut tf, 0x1000_0000), Ok(b'Z'));
            k.audit();
        }
        // 文件本身保持原样，修改只活在交换区和内存里
        let file = k.filesys().open("seg").unwrap();
        let mut byte = [0u8; 1];
        file.read_at(&mut byte, 0);
        assert_eq!(byte[0], b'A');
    }

    #[test]
    #[should_panic(expected = "kernel bug")]
    fn kernel_fault_on_kernel_address_panics() {
        let (k, _console) = boot_kernel(4);
        let proc = k.procs().spawn("p");
        let mut tf = TrapFrame::new(0xBFFF_F000);
        let fault = PageFault {
            addr: VirtAddr(PHYS_BASE + 0x1000),
            not_present: true,
            write: false,
            user: false,
        };
        page_fault(&k, &proc, &mut tf, fault);
    }

    #[test]
    fn user_exception_prints_dying_line() {
        let (k, console) = boot_kernel(4);
        let proc = k.procs().spawn("p");
        user_exception(&k, &proc, 0x06, "#UD Invalid Opcode Exception");
        assert!(console
            .output()
            .contains("p: dying due to interrupt 0x06 (#UD Invalid Opcode Exception)"));
        assert!(proc.is_zombie());
    }
}
