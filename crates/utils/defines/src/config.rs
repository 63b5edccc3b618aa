const KB: usize = 1024;
const MB: usize = 1024 * KB;

/// 一个页大小的 bit 数
pub const PAGE_SIZE_BITS: usize = 12;
/// 页大小
pub const PAGE_SIZE: usize = 1 << PAGE_SIZE_BITS;
pub const PAGE_OFFSET_MASK: usize = PAGE_SIZE - 1;

/// 用户地址空间的末端。该地址及更高的地址都属于内核
pub const PHYS_BASE: usize = 0xC000_0000;

/// 用户栈最多可以增长到 8 MiB
pub const STACK_LIMIT: usize = 8 * MB;
/// 栈增长启发式允许的 esp 之下的松弛量（PUSHA 一次最多写到 esp - 32）
pub const STACK_SLACK: usize = 32;

/// 每个进程的文件描述符表的槽数，0 和 1 保留给控制台
pub const FD_TABLE_SIZE: usize = 130;
/// 第一个可分配给普通文件的 fd
pub const FD_FIRST_FILE: usize = 2;

/// 块设备的扇区大小
pub const SECTOR_SIZE: usize = 512;
/// 一个交换槽占据的扇区数
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

/// 用户帧池的默认大小（页数）
pub const USER_POOL_PAGES: usize = 64;
/// 交换分区的默认大小（页数）
pub const SWAP_POOL_PAGES: usize = 256;

/// 用户字符串参数（路径、命令行）的长度上限
pub const MAX_CSTR_LEN: usize = 256;
