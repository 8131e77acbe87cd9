//! Target calls for a payment cycle.

use crate::operation::Call;
use crate::subscription::Subscription;

/// Produces the ordered calls a subscription's payment executes.
pub trait CallFactory: Send + Sync {
    /// Calls for one cycle of `subscription`. An empty list aborts the job.
    fn payment_calls(&self, subscription: &Subscription) -> Vec<Call>;
}
