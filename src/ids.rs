use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Source of job and result-artifact identifiers.
pub trait IdGenerator: Send + Sync {
    fn job_id(&self) -> Uuid;
    fn artifact_id(&self) -> Uuid;
}

/// Random v4 identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn job_id(&self) -> Uuid {
        Uuid::new_v4()
    }

    fn artifact_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Monotonic identifiers for reproducible runs. Jobs and artifacts share one
/// counter so no two identifiers collide.
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self) -> Uuid {
        let value = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        Uuid::from_u128(u128::from(value))
    }
}

impl IdGenerator for SequentialIds {
    fn job_id(&self) -> Uuid {
        self.allocate()
    }

    fn artifact_id(&self) -> Uuid {
        self.allocate()
    }
}
