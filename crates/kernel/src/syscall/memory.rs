//! mmap 与 munmap

use alloc::sync::Arc;

use defines::{
    config::{FD_TABLE_SIZE, PAGE_SIZE, PHYS_BASE},
    error::KResult,
};
use smallvec::SmallVec;
use triomphe::Arc as FileArc;

use crate::{
    memory::{
        mmap::{self, MmapRegion},
        PageInfo, VirtAddr,
    },
    process::{self, Process},
    Kernel,
};

/// 把 fd 指向的文件整个映射到 addr 起的连续页上。页内容
/// 推迟到首次访问才装载。返回区域 id，拒绝映射返回 -1
pub fn sys_mmap(k: &Kernel, proc: &Arc<Process>, fd: usize, addr: VirtAddr) -> KResult<isize> {
    if fd < 2 || fd >= FD_TABLE_SIZE {
        return Ok(-1);
    }
    if addr.is_null() || addr.page_offset() != 0 {
        return Ok(-1);
    }
    // 最高的一页留给栈，数据段之下的地址也不让碰
    if addr.0 >= PHYS_BASE - PAGE_SIZE {
        return Ok(-1);
    }

    let mut inner = proc.inner.lock();
    if addr <= inner.data_end {
        return Ok(-1);
    }
    let Some(file) = inner.fd_table.get(fd) else {
        return Ok(-1);
    };

    let (len, file) = {
        let _fs = k.fs_lock();
        (file.length(), file.reopen())
    };
    if len == 0 {
        return Ok(-1);
    }

    let start = addr.vpn_floor();
    let pages = len.div_ceil(PAGE_SIZE);
    // 区域整体不得探进保留页或内核空间
    if start.page_start().0 + pages * PAGE_SIZE > PHYS_BASE - PAGE_SIZE {
        return Ok(-1);
    }

    let mut spt = proc.spt.lock();
    // 与任何既有页重叠就整体拒绝
    if (0..pages).any(|i| spt.contains(start + i)) {
        return Ok(-1);
    }

    let id = inner.mmaps.alloc_id();
    let mut region = MmapRegion {
        id,
        start,
        size: len,
        file: FileArc::clone(&file),
        fd,
        pages: SmallVec::new(),
    };
    let mut remaining = len;
    let mut ofs = 0;
    for i in 0..pages {
        let read_bytes = usize::min(PAGE_SIZE, remaining);
        let vpn = start + i;
        spt.insert(vpn, PageInfo::new_mmap(FileArc::clone(&file), ofs, read_bytes, id));
        region.pages.push(vpn);
        remaining -= read_bytes;
        ofs += read_bytes;
    }
    drop(spt);

    debug!("pid {} mapped fd {fd} at {:#x}, {pages} pages", proc.pid(), addr.0);
    inner.mmaps.insert(region);
    Ok(id as isize)
}

/// 两阶段拆除：先把脏页回写到文件，再解除映射并释放资源。
/// id 无效说明用户在胡来，终止之
pub fn sys_munmap(k: &Kernel, proc: &Arc<Process>, id: usize) -> KResult<()> {
    let region = proc.inner.lock().mmaps.take(id);
    let Some(region) = region else {
        return Err(process::terminate(k, proc, -1));
    };
    mmap::region_writeback(k, proc, &region);
    mmap::region_free(k, proc, region);
    Ok(())
}
