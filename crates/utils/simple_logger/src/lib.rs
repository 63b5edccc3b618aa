use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Lazy;

/// a simple logger
struct SimpleLogger {
    clog: LevelFilter,
}

impl Log for SimpleLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }
    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if self.clog >= record.level() {
            let color = match record.level() {
                Level::Error => 31, // Red
                Level::Warn => 93,  // BrightYellow
                Level::Info => 34,  // Blue
                Level::Debug => 32, // Green
                Level::Trace => 90, // BrightBlack
            };
            eprintln!(
                "\u{1B}[{}m[{:>5}] {}\u{1B}[0m",
                color,
                record.level(),
                record.args(),
            );
        }
    }
    fn flush(&self) {}
}

/// initiate logger
///
/// 重复初始化是无害的（仅第一次生效），方便每个测试都调用一下
pub fn init() {
    static LOGGER: Lazy<SimpleLogger> = Lazy::new(|| {
        let clog = match option_env!("KERNEL_CLOG") {
            Some("ERROR") => LevelFilter::Error,
            Some("WARN") => LevelFilter::Warn,
            Some("INFO") => LevelFilter::Info,
            Some("DEBUG") => LevelFilter::Debug,
            Some("TRACE") => LevelFilter::Trace,
            _ => LevelFilter::Off,
        };
        SimpleLogger { clog }
    });

    if log::set_logger(&*LOGGER).is_ok() {
        log::set_max_level(LOGGER.clog);
    }
}
