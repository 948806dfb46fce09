/*!
 * Error types shared across the bus.
 *
 * There is one public error enum, `BusError`. Internal machinery
 * (queue, barrier, pool) signals through the same enum so that the
 * admin can route failures without translation layers:
 *
 * - `InvalidArgument` surfaces to the caller of the offending API.
 * - `Interrupted` is raised by blocking waits and consumed inside the
 *   dispatch layer; it never reaches a producer.
 * - `TimedOut` is raised by a timed rendezvous and converted into
 *   blacklisting; it never reaches a producer either.
 * - `IllegalState` surfaces verbatim (stopped bus, await without
 *   shutdown, nested-send depth exceeded).
 * - `BrokenBarrier` is internal to the rendezvous.
 * - `PoolBlocked` is what the abort submission policy raises.
 */

use thiserror::Error;

/// Result alias used throughout the crate.
pub type BusResult<T> = Result<T, BusError>;

/// Error type returned by handler callbacks. Boxed so handlers can
/// propagate whatever error type they already use.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/**
 * All failure modes of the bus.
 */
#[derive(Debug, Error)]
pub enum BusError {
    /// Malformed topic, mask, or predicate; rejected before any work is queued.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A blocking wait observed an interrupt. The wait was released
    /// before this was raised; no state change happened.
    #[error("interrupted while waiting")]
    Interrupted,

    /// A timed rendezvous expired before the peer arrived.
    #[error("timed out after {0} ms")]
    TimedOut(u64),

    /// Operation not valid in the current lifecycle state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A rendezvous party left abnormally before both parties met.
    #[error("rendezvous broken before both parties arrived")]
    BrokenBarrier,

    /// Submission rejected by the abort blocked-execution policy.
    #[error("pool is blocked")]
    PoolBlocked,
}

impl BusError {
    /**
     * Constructs the error every operation on a stopped bus reports.
     * Kept in one place so the message stays consistent.
     */
    pub(crate) fn stopped() -> Self {
        BusError::IllegalState("the event admin is stopped".into())
    }
}
