/// The address-claim lifecycle of one internal Control Function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    /// `start()` has not been called yet.
    None,
    /// About to emit the Request-for-Address-Claimed broadcast.
    WaitForClaim,
    /// The Request-for-Address-Claimed has been emitted.
    SendRequest,
    /// Waiting for the guard window to elapse without contention.
    WaitForContest,
    /// About to (re-)emit our Address Claimed frame for a candidate address.
    SendClaim,
    /// Terminal success: `address()` is valid and published.
    Claimed,
    /// Terminal failure: no address could be claimed.
    Failed,
}
