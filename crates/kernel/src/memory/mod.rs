mod address;
mod frame_table;
pub mod mmap;
mod mmu;
mod spt;
mod swap;
pub mod user_check;

pub use self::address::{VirtAddr, VirtPageNum};
pub use self::frame_table::{frame_alloc, AllocFlags, FrameData, FrameSlot, FrameTable, Kpage, PageBuf};
pub use self::mmap::{MmapId, MmapRegion, MmapTable};
pub use self::mmu::{SoftPageDir, TouchFault};
pub use self::spt::{PageInfo, PagePurpose, SuppPageTable};
pub use self::swap::SwapDevice;
