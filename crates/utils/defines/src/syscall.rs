macro_rules! declare_syscall_id {
    ($($name:tt, $id:literal,)*) => {
        $(pub const $name: usize = $id;)*
        pub fn name(id: usize) -> &'static str {
            match id {
                $($id => stringify!($name),)*
                _ => "UNKNOWN",
            }
        }
    };
}

#[rustfmt::skip]
declare_syscall_id!(
    HALT,       0,
    EXIT,       1,
    EXEC,       2,
    WAIT,       3,
    CREATE,     4,
    REMOVE,     5,
    OPEN,       6,
    FILESIZE,   7,
    READ,       8,
    WRITE,      9,
    SEEK,       10,
    TELL,       11,
    CLOSE,      12,
    MMAP,       13,
    MUNMAP,     14,
);
