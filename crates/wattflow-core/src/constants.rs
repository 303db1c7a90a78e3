//! TigerStyle constants for wattflow
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Actor Limits
// =============================================================================

/// Maximum length of an actor name in bytes
pub const ACTOR_NAME_LENGTH_BYTES_MAX: usize = 256;

/// Default time an actor may take to answer its start handshake (2 sec)
pub const ACTOR_INIT_TIMEOUT_MS_DEFAULT: u64 = 2 * 1000;

/// Upper bound on the start handshake timeout (1 min)
pub const ACTOR_INIT_TIMEOUT_MS_MAX: u64 = 60 * 1000;

/// Maximum number of queued data messages processed by a soft kill
pub const ACTOR_DRAIN_MESSAGES_COUNT_MAX: usize = 100_000;

/// Default time budget for the soft kill drain phase (5 sec)
pub const ACTOR_DRAIN_TIMEOUT_MS_DEFAULT: u64 = 5 * 1000;

/// Upper bound on the drain phase time budget (10 min)
pub const ACTOR_DRAIN_TIMEOUT_MS_MAX: u64 = 10 * 60 * 1000;

// =============================================================================
// Dispatcher Limits
// =============================================================================

/// Sequence ids attached to dispatched reports wrap at this value
pub const SEQUENCE_ID_MAX: u32 = 10_000;

/// Maximum number of live formulas per dispatcher
pub const DISPATCHER_FORMULAS_COUNT_MAX: usize = 100_000;

/// Label of the prefix tree root used by dispatchers
pub const FORMULA_TREE_ROOT_LABEL: &str = "*";

// =============================================================================
// Puller / Pusher Defaults
// =============================================================================

/// Default pause between two database polls in stream mode (1 sec)
pub const PULLER_POLL_INTERVAL_MS_DEFAULT: u64 = 1000;

/// Granularity at which a sleeping puller checks for a stop request
pub const PULLER_STOP_CHECK_INTERVAL_MS: u64 = 10;

/// Default maximum time between two pusher flushes (100 ms)
pub const PUSHER_FLUSH_INTERVAL_MS_DEFAULT: u64 = 100;

/// Default number of buffered reports that forces a pusher flush
pub const PUSHER_BUFFER_SIZE_MAX_DEFAULT: usize = 50;

/// Hard limit on the pusher buffer size setting
pub const PUSHER_BUFFER_SIZE_MAX_LIMIT: usize = 1_000_000;

// Compile-time assertions for constant validity
const _: () = {
    assert!(ACTOR_INIT_TIMEOUT_MS_DEFAULT <= ACTOR_INIT_TIMEOUT_MS_MAX);
    assert!(ACTOR_DRAIN_TIMEOUT_MS_DEFAULT <= ACTOR_DRAIN_TIMEOUT_MS_MAX);
    assert!(SEQUENCE_ID_MAX > 1);
    assert!(PUSHER_BUFFER_SIZE_MAX_DEFAULT <= PUSHER_BUFFER_SIZE_MAX_LIMIT);
};
