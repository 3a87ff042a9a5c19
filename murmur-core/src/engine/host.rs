//! What the filter needs from the pipeline it is embedded in.
//!
//! The host owns the clock and the state machine. The filter reports back
//! through this trait when an asynchronous transition finishes or fails.

use std::time::Duration;

use crate::error::FilterError;

pub trait PipelineHost: Send + Sync + 'static {
    /// Current running time of the pipeline clock, `None` without a clock.
    fn running_time(&self) -> Option<Duration>;

    /// An asynchronous state change has begun.
    fn async_start(&self);

    /// The asynchronous state change finished; the host should continue the
    /// transition successfully.
    fn async_done(&self);

    /// The pending asynchronous state change failed.
    fn abort_state(&self);

    /// Fatal error for the application.
    fn post_error(&self, error: &FilterError);
}
