#![allow(dead_code)]

use std::sync::Arc;

use strata::buffer::BufferPool;
use strata::storage::disk::HardDiskEmulator;

pub fn setup_logger() {
    use std::io::Write;

    fn tn() -> String {
        std::thread::current()
            .name()
            .unwrap_or("unknown")
            .to_owned()
    }

    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{:05} {:20} {:12} {}",
                record.level(),
                tn(),
                record
                    .module_path()
                    .and_then(|path| path.split("::").last())
                    .unwrap_or("-"),
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info);

    if let Ok(env) = std::env::var("RUST_LOG") {
        builder.parse_filters(&env);
    }

    let _r = builder.try_init();
}

/// A pool over a fresh in-memory disk.
pub fn emulated_pool(capacity: usize) -> (BufferPool, Arc<HardDiskEmulator>) {
    let disk = Arc::new(HardDiskEmulator::new());
    let pool = BufferPool::new(capacity, 2, disk.clone());
    (pool, disk)
}
