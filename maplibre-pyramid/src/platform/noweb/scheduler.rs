use tokio::runtime::Handle;
use tokio_util::task::LocalPoolHandle;

use crate::io::scheduler::{ScheduleError, Scheduler, Task};

/// Multi-threading with Tokio. Tasks run on a bounded pool of pinned worker threads.
pub struct TokioScheduler {
    runtime: Handle,
    pool: LocalPoolHandle,
}

impl TokioScheduler {
    pub const DEFAULT_POOL_SIZE: usize = 4;

    pub fn new(runtime: Handle) -> Self {
        Self::with_pool_size(runtime, Self::DEFAULT_POOL_SIZE)
    }

    pub fn with_pool_size(runtime: Handle, pool_size: usize) -> Self {
        Self {
            runtime,
            pool: LocalPoolHandle::new(pool_size.max(1)),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, task: Task) -> Result<(), ScheduleError> {
        let _guard = self.runtime.enter();
        // The join handle is dropped: results travel through a mailbox.
        self.pool.spawn_pinned(move || async move { task() });
        Ok(())
    }
}
