/// Logical queue receiving manifest and stats events
pub const STATS_QUEUE: &str = "stats";

/// Logical queue receiving metric events
pub const GLOBE_QUEUE: &str = "globe";

/// Page size used when a listing query does not specify one
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Upper bound on a single listing page
pub const MAX_PAGE_SIZE: usize = 500;

/// Longest accepted entity id
pub const MAX_ID_LENGTH: usize = 128;

/// Publish attempts before an entity is marked FAILED
pub const DEFAULT_PUBLISH_MAX_ATTEMPTS: u32 = 5;

/// First backoff interval between publish attempts, in milliseconds
pub const DEFAULT_PUBLISH_BACKOFF_MS: u64 = 200;

/// Backoff ceiling between publish attempts, in milliseconds
pub const DEFAULT_PUBLISH_MAX_BACKOFF_MS: u64 = 5_000;

/// Deadline for a single publish attempt, in milliseconds
pub const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 10_000;

/// Store write attempts before StoreUnavailable is surfaced
pub const DEFAULT_STORE_MAX_ATTEMPTS: u32 = 3;

/// Entities republished in parallel by one sync pass
pub const DEFAULT_SYNC_CONCURRENCY: usize = 8;
