mod fd_table;
mod file;
mod memfs;

pub use self::fd_table::FdTable;
pub use self::file::File;
pub use self::memfs::MemFs;
