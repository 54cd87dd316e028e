//! Dashboard controllers: the OAuth callback and the per-job tracker.

pub mod callback;
pub mod tracker;

pub use callback::{
    CallbackOutcome, CallbackParams, CallbackState, Redirect, Route, handle_callback,
};
pub use tracker::{DisplayStatus, FeedHealth, JobTracker};
