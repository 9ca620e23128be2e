//! Per-stage configuration.

/// Concurrency limit used when nothing else is configured.
pub const DEFAULT_MAX_PARALLEL: usize = 40;

/// Largest concurrency limit a stage can enforce; higher limits are clamped.
pub const MAX_PARALLEL: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// Input queue capacity used when nothing else is configured.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Capacity of a stage's input queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueCapacity {
    /// Submitting suspends while the queue holds this many items.
    /// A capacity of zero hands each item over directly to the stage.
    Bounded(usize),
    /// Submitting never suspends. Memory grows with the backlog.
    Unbounded,
}

impl QueueCapacity {
    pub(crate) fn channel<T>(self) -> (flume::Sender<T>, flume::Receiver<T>) {
        match self {
            Self::Bounded(capacity) => flume::bounded(capacity),
            Self::Unbounded => flume::unbounded(),
        }
    }
}

impl Default for QueueCapacity {
    fn default() -> Self {
        Self::Bounded(DEFAULT_QUEUE_CAPACITY)
    }
}

/// What a stage does with an item whose operation failed.
///
/// Every failed attempt is reported regardless of the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Forward the item downstream exactly as it entered the failing stage.
    #[default]
    Forward,
    /// Remove the item from the chain.
    Drop,
    /// Invoke the operation up to `attempts` more times, then drop the item.
    Retry {
        /// Additional attempts after the first failure
        attempts: usize,
    },
}

impl FailurePolicy {
    pub(crate) const fn retries(self) -> usize {
        match self {
            Self::Retry { attempts } => attempts,
            Self::Forward | Self::Drop => 0,
        }
    }

    pub(crate) const fn forwards_failures(self) -> bool {
        matches!(self, Self::Forward)
    }
}

/// Configuration of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageOptions {
    /// Maximum number of concurrent invocations of the stage operation
    pub max_parallel: usize,
    /// Capacity of the stage's input queue
    pub queue: QueueCapacity,
    /// Handling of failed items
    pub on_error: FailurePolicy,
}

impl StageOptions {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            queue: QueueCapacity::Bounded(DEFAULT_QUEUE_CAPACITY),
            on_error: FailurePolicy::Forward,
        }
    }

    /// Sets the concurrency limit. Zero is treated as one, and anything above
    /// [`MAX_PARALLEL`] as [`MAX_PARALLEL`].
    #[must_use]
    pub const fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = if max_parallel == 0 {
            1
        } else if max_parallel > MAX_PARALLEL {
            MAX_PARALLEL
        } else {
            max_parallel
        };
        self
    }

    #[must_use]
    pub const fn with_queue(mut self, queue: QueueCapacity) -> Self {
        self.queue = queue;
        self
    }

    #[must_use]
    pub const fn with_failure_policy(mut self, on_error: FailurePolicy) -> Self {
        self.on_error = on_error;
        self
    }
}

impl Default for StageOptions {
    fn default() -> Self {
        Self::new()
    }
}
