/// 控制台设备。`getc` 阻塞读入一个字符，`put_buf` 把整块缓冲刷出
pub trait Console: Send + Sync {
    fn getc(&self) -> u8;
    fn put_buf(&self, buf: &[u8]);
}

/// 没有接入控制台时的缺省实现
pub struct NullConsole;

impl Console for NullConsole {
    fn getc(&self) -> u8 {
        0
    }

    fn put_buf(&self, _buf: &[u8]) {}
}
