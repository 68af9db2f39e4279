pub mod audit_log;
pub mod format;
pub mod log;

pub use format::format_file_size;
pub use log::init_logging;
