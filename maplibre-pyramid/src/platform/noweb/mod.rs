//! Module which is used target platform is not web related.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::runtime::Runtime;

#[cfg(feature = "http")]
pub mod http_client;
pub mod scheduler;

/// Builds the multi-threaded runtime driving file requests and worker pools.
pub fn build_runtime() -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .thread_name_fn(|| {
            static ATOMIC_ID: AtomicUsize = AtomicUsize::new(0);
            let id = ATOMIC_ID.fetch_add(1, Ordering::SeqCst);
            format!("maplibre-pyramid-pool-{id}")
        })
        .on_thread_start(|| log::info!("Worker thread started"))
        .build()
}
