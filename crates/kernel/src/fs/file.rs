//! 打开的文件：共享 inode，各自独立的读写位置

use klocks::SpinMutex;
use triomphe::Arc;

use super::memfs::Inode;

pub struct File {
    inode: Arc<Inode>,
    pos: SpinMutex<usize>,
}

impl File {
    pub(super) fn new(inode: Arc<Inode>) -> Self {
        Self {
            inode,
            pos: SpinMutex::new(0),
        }
    }

    /// 重新打开：同一份内容，独立的 seek 位置
    pub fn reopen(&self) -> Arc<File> {
        Arc::new(File::new(Arc::clone(&self.inode)))
    }

    pub fn length(&self) -> usize {
        self.inode.data.lock().len()
    }

    pub fn seek(&self, pos: usize) {
        *self.pos.lock() = pos;
    }

    pub fn tell(&self) -> usize {
        *self.pos.lock()
    }

    /// 从当前位置读，推进位置。返回实际读到的字节数
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let pos = *self.pos.lock();
        let n = self.read_at(buf, pos);
        *self.pos.lock() = pos + n;
        n
    }

    /// 从当前位置写，推进位置。写入不会扩展文件
    pub fn write(&self, buf: &[u8]) -> usize {
        let pos = *self.pos.lock();
        let n = self.write_at(buf, pos);
        *self.pos.lock() = pos + n;
        n
    }

    pub fn read_at(&self, buf: &mut [u8], ofs: usize) -> usize {
        let data = self.inode.data.lock();
        if ofs >= data.len() {
            return 0;
        }
        let n = usize::min(buf.len(), data.len() - ofs);
        buf[..n].copy_from_slice(&data[ofs..ofs + n]);
        n
    }

    pub fn write_at(&self, buf: &[u8], ofs: usize) -> usize {
        let mut data = self.inode.data.lock();
        if ofs >= data.len() {
            return 0;
        }
        let n = usize::min(buf.len(), data.len() - ofs);
        data[ofs..ofs + n].copy_from_slice(&buf[..n]);
        n
    }
}

#[cfg(test)]
mod tests {
    use crate::fs::MemFs;

    #[test]
    fn sequential_read_write() {
        let fs = MemFs::new();
        fs.create("f", 8);
        let f = fs.open("f").unwrap();

        assert_eq!(f.write(b"abcd"), 4);
        assert_eq!(f.tell(), 4);
        f.seek(0);
        let mut buf = [0u8; 8];
        assert_eq!(f.read(&mut buf), 8);
        assert_eq!(&buf[..4], b"abcd");
        assert_eq!(&buf[4..], [0; 4]);
        // 到达末尾
        assert_eq!(f.read(&mut buf), 0);
    }

    #[test]
    fn writes_do_not_grow_the_file() {
        let fs = MemFs::new();
        fs.create("f", 4);
        let f = fs.open("f").unwrap();
        assert_eq!(f.write(b"abcdef"), 4);
        assert_eq!(f.length(), 4);
        assert_eq!(f.write_at(b"xy", 10), 0);
    }

    #[test]
    fn reopen_has_independent_position() {
        let fs = MemFs::new();
        fs.create("f", 8);
        let f = fs.open("f").unwrap();
        f.seek(6);

        let g = f.reopen();
        assert_eq!(g.tell(), 0);
        g.write(b"zz");
        // 同一份内容
        let mut buf = [0u8; 2];
        f.read_at(&mut buf, 0);
        assert_eq!(&buf, b"zz");
        assert_eq!(f.tell(), 6);
    }
}
