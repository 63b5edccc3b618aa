//! 测试用的机器替身：可脚本化的控制台、内存磁盘上的交换区、
//! 以及模拟 CPU 用户态访存的小工具

use std::{collections::VecDeque, sync::Arc as StdArc};

use defines::config::{PAGE_OFFSET_MASK, PAGE_SIZE, SECTORS_PER_PAGE};
use klocks::SpinMutex;
use triomphe::Arc as FileArc;

use crate::{
    drivers::{block::MemDisk, console::Console},
    memory::{Kpage, PageInfo, TouchFault, VirtAddr},
    process::{Process, ProgramLoader},
    syscall,
    trap::{self, FaultOutcome, PageFault, TrapFrame},
    BootArgs, Kernel,
};

#[derive(Default)]
struct ConsoleState {
    out: Vec<u8>,
    input: VecDeque<u8>,
}

/// 记录输出、按脚本供给键盘输入的控制台
#[derive(Clone, Default)]
pub struct TestConsole {
    state: StdArc<SpinMutex<ConsoleState>>,
}

impl TestConsole {
    pub fn output(&self) -> String {
        String::from_utf8(self.state.lock().out.clone()).unwrap()
    }

    pub fn push_input(&self, s: &str) {
        self.state.lock().input.extend(s.bytes());
    }
}

impl Console for TestConsole {
    fn getc(&self) -> u8 {
        self.state.lock().input.pop_front().unwrap_or(0)
    }

    fn put_buf(&self, buf: &[u8]) {
        self.state.lock().out.extend_from_slice(buf);
    }
}

/// 与程序名同名的文件存在即装载成功：文件内容成为只读代码段
pub struct TestLoader;

impl ProgramLoader for TestLoader {
    fn load(&self, k: &Kernel, proc: &std::sync::Arc<Process>, cmdline: &str) -> bool {
        let name = cmdline.split_whitespace().next().unwrap_or("");
        let Some(file) = k.filesys().open(name) else {
            return false;
        };
        let len = file.length();
        let base = VirtAddr(0x0804_8000);
        let pages = len.div_ceil(PAGE_SIZE).max(1);

        let mut spt = proc.spt.lock();
        let mut remaining = len;
        let mut ofs = 0;
        for i in 0..pages {
            let read_bytes = usize::min(PAGE_SIZE, remaining);
            spt.insert(
                base.vpn_floor() + i,
                PageInfo::new_file(FileArc::clone(&file), ofs, read_bytes, false),
            );
            remaining -= read_bytes;
            ofs += read_bytes;
        }
        drop(spt);

        proc.inner.lock().data_end = VirtAddr(base.0 + pages * PAGE_SIZE);
        true
    }
}

/// 起一个接好测试替身的内核
pub fn boot_kernel(user_pages: usize) -> (Kernel, TestConsole) {
    simple_logger::init();
    let console = TestConsole::default();
    let k = Kernel::boot(BootArgs {
        user_pages,
        swap_disk: Box::new(MemDisk::new(64 * SECTORS_PER_PAGE)),
        console: Box::new(console.clone()),
        loader: Box::new(TestLoader),
    });
    (k, console)
}

/// 模拟 CPU 的一次用户态访存：经过页目录翻译，翻译不了就走缺页。
/// 进程被终止时返回 Err
pub fn user_access(
    k: &Kernel,
    proc: &std::sync::Arc<Process>,
    tf: &mut TrapFrame,
    va: usize,
    write: bool,
) -> Result<Kpage, ()> {
    loop {
        let fault = match proc.pagedir.lock().touch(VirtAddr(va).vpn_floor(), write) {
            Ok(kpage) => return Ok(kpage),
            Err(TouchFault::NotPresent) => PageFault {
                addr: VirtAddr(va),
                not_present: true,
                write,
                user: true,
            },
            Err(TouchFault::Forbidden) => PageFault {
                addr: VirtAddr(va),
                not_present: false,
                write,
                user: true,
            },
        };
        if trap::page_fault(k, proc, tf, fault) == FaultOutcome::Killed {
            return Err(());
        }
    }
}

pub fn user_store(
    k: &Kernel,
    proc: &std::sync::Arc<Process>,
    tf: &mut TrapFrame,
    va: usize,
    byte: u8,
) -> Result<(), ()> {
    let kpage = user_access(k, proc, tf, va, true)?;
    k.frames().data(kpage).lock().0[va & PAGE_OFFSET_MASK] = byte;
    Ok(())
}

pub fn user_load(
    k: &Kernel,
    proc: &std::sync::Arc<Process>,
    tf: &mut TrapFrame,
    va: usize,
) -> Result<u8, ()> {
    let kpage = user_access(k, proc, tf, va, false)?;
    let byte = k.frames().data(kpage).lock().0[va & PAGE_OFFSET_MASK];
    Ok(byte)
}

/// 给进程一页已驻留的用户栈，esp 指向页首
pub fn setup_stack(k: &Kernel, proc: &std::sync::Arc<Process>) -> TrapFrame {
    let esp = 0xBFFF_E000;
    let mut tf = TrapFrame::new(esp);
    user_store(k, proc, &mut tf, esp, 0).unwrap();
    tf
}

/// 把 NUL 结尾的字符串放进用户栈页的空闲处，返回其地址
pub fn write_user_cstr(
    k: &Kernel,
    proc: &std::sync::Arc<Process>,
    tf: &mut TrapFrame,
    s: &str,
) -> u32 {
    let base = tf.esp + 0x40;
    for (i, b) in s.bytes().enumerate() {
        user_store(k, proc, tf, base + i, b).unwrap();
    }
    user_store(k, proc, tf, base + s.len(), 0).unwrap();
    base as u32
}

/// 在用户栈上摆好调用号和参数，走一遍系统调用分发，返回 eax
pub fn do_syscall(
    k: &Kernel,
    proc: &std::sync::Arc<Process>,
    tf: &mut TrapFrame,
    id: u32,
    args: &[u32],
) -> isize {
    let esp = tf.esp;
    for (i, word) in core::iter::once(id).chain(args.iter().copied()).enumerate() {
        for (j, b) in word.to_le_bytes().into_iter().enumerate() {
            user_store(k, proc, tf, esp + 4 * i + j, b).unwrap();
        }
    }
    syscall::handle_syscall(k, proc, tf);
    tf.eax
}
