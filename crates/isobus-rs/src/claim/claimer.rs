use alloc::vec::Vec;

use crate::claim::state::ClaimState;
use crate::common::{ADDRESS_CLAIM_TIMEOUT_MS, ADDRESS_CLAIM_RTXD_MAX_MS};
use crate::event::Event;
use crate::frame::{Frame, Identifier};
use crate::log::{isobus_debug, isobus_error, isobus_info, isobus_warn, LogContext};
use crate::name::Name;
use crate::pgn::{PGN_ADDRESS_CLAIMED, PGN_REQUEST};
use crate::state_machine::StateMachine;
use crate::types::{Address, Priority, BROADCAST_ADDRESS, MAX_ADDRESS, NULL_ADDRESS};

fn ctx() -> LogContext {
    LogContext { component: "claim", port: 0 }
}

/// Per-ECU address-claim state machine (ISO 11783-5 §4.4.2).
///
/// Owns exactly one candidate address at a time: `preferred_address` never
/// changes, `current_address` advances through candidates when contention is
/// lost and the NAME is self-configurable.
pub struct AddressClaimer {
    name: Name,
    preferred_address: Address,
    current_address: Address,
    state: StateMachine<ClaimState>,
    attempted_claim: bool,
    /// Guard window length: `ADDRESS_CLAIM_TIMEOUT_MS + rtxd_ms`.
    guard_window_ms: u32,
    guard_timer_ms: u32,

    pub on_address_claimed: Event<Address>,
    pub on_address_lost: Event<()>,
}

impl AddressClaimer {
    /// `rtxd_ms` is the host-supplied random transmit delay (0..153 ms,
    /// computed as `0.6 * random_byte(0..255)`); the core has no source of
    /// randomness of its own in `no_std`.
    pub fn new(name: Name, preferred_address: Address, rtxd_ms: u32) -> Self {
        AddressClaimer {
            name,
            preferred_address,
            current_address: NULL_ADDRESS,
            state: StateMachine::new(ClaimState::None),
            attempted_claim: false,
            guard_window_ms: ADDRESS_CLAIM_TIMEOUT_MS + rtxd_ms.min(ADDRESS_CLAIM_RTXD_MAX_MS),
            guard_timer_ms: 0,
            on_address_claimed: Event::new(),
            on_address_lost: Event::new(),
        }
    }

    pub fn name(&self) -> Name {
        self.name
    }

    pub fn preferred_address(&self) -> Address {
        self.preferred_address
    }

    pub fn address(&self) -> Address {
        self.current_address
    }

    pub fn claim_state(&self) -> ClaimState {
        self.state.state()
    }

    pub fn has_attempted_claim(&self) -> bool {
        self.attempted_claim
    }

    /// Begins the claim process: emits a Request-for-Address-Claimed
    /// broadcast followed by our own Address Claimed frame, and enters the
    /// guard window.
    pub fn start(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        isobus_debug!(ctx(), "starting address claim, preferred={}", self.preferred_address);

        self.state.transition(ClaimState::SendRequest);
        self.attempted_claim = true;

        let mut req_data = [0xFFu8; 8];
        req_data[0] = (PGN_ADDRESS_CLAIMED & 0xFF) as u8;
        req_data[1] = ((PGN_ADDRESS_CLAIMED >> 8) & 0xFF) as u8;
        req_data[2] = ((PGN_ADDRESS_CLAIMED >> 16) & 0xFF) as u8;
        frames.push(Frame {
            id: Identifier::encode(Priority::DEFAULT, PGN_REQUEST, NULL_ADDRESS, BROADCAST_ADDRESS),
            data: req_data,
            length: 8,
            timestamp_us: 0,
        });

        self.current_address = self.preferred_address;
        self.state.transition(ClaimState::SendClaim);
        self.guard_timer_ms = 0;
        frames.push(self.make_claim_frame(self.current_address));
        self.state.transition(ClaimState::WaitForContest);

        frames
    }

    /// Advances the guard timer; transitions to `Claimed` once it elapses
    /// without contention.
    pub fn update(&mut self, elapsed_ms: u32) -> Vec<Frame> {
        let frames = Vec::new();

        if self.state.is(ClaimState::WaitForContest) {
            self.guard_timer_ms += elapsed_ms;
            if self.guard_timer_ms >= self.guard_window_ms {
                self.state.transition(ClaimState::Claimed);
                isobus_info!(ctx(), "address claimed: {}", self.current_address);
                self.on_address_claimed.emit(self.current_address);
            }
        }

        frames
    }

    /// Handles a foreign Address Claimed frame for `claimed_address`, with
    /// `other_name` as the contender's NAME. Returns frames to emit (a
    /// re-assertion if we won, a new claim or Cannot-Claim if we lost).
    pub fn handle_claim(&mut self, claimed_address: Address, other_name: Name) -> Vec<Frame> {
        let mut frames = Vec::new();

        if claimed_address != self.current_address && claimed_address != self.preferred_address {
            return frames; // not contending for an address we care about
        }

        if self.name < other_name {
            isobus_debug!(ctx(), "won address contest for {}", claimed_address);
            self.guard_timer_ms = 0;
            frames.push(self.make_claim_frame(self.current_address));
            return frames;
        }

        isobus_warn!(ctx(), "lost address contest for {}", claimed_address);
        self.on_address_lost.emit(());

        if self.name.self_configurable() {
            match self.find_next_address(claimed_address) {
                Some(next) => {
                    self.current_address = next;
                    self.guard_timer_ms = 0;
                    self.state.transition(ClaimState::SendClaim);
                    frames.push(self.make_claim_frame(next));
                    self.state.transition(ClaimState::WaitForContest);
                }
                None => {
                    isobus_error!(ctx(), "no available address, claim failed");
                    self.fail(&mut frames);
                }
            }
        } else {
            isobus_error!(ctx(), "not self-configurable, claim failed");
            self.fail(&mut frames);
        }

        frames
    }

    /// Handles an inbound Request-for-Address-Claimed. Per §4.4.2, a CF that
    /// has never attempted a claim must stay silent.
    pub fn handle_request_for_claim(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        if !self.attempted_claim {
            return frames;
        }
        match self.state.state() {
            ClaimState::Claimed | ClaimState::WaitForContest => {
                frames.push(self.make_claim_frame(self.current_address));
            }
            ClaimState::Failed => {
                frames.push(self.make_claim_frame(NULL_ADDRESS));
            }
            _ => {}
        }
        frames
    }

    fn fail(&mut self, frames: &mut Vec<Frame>) {
        self.state.transition(ClaimState::Failed);
        self.current_address = NULL_ADDRESS;
        frames.push(self.make_claim_frame(NULL_ADDRESS));
    }

    /// Linear search starting at `current + 1`, skipping `preferred_address`,
    /// wrapping at `MAX_ADDRESS`. Returns `None` if every candidate has been
    /// exhausted (only possible in degenerate configurations).
    fn find_next_address(&self, current: Address) -> Option<Address> {
        let mut candidate = current;
        for _ in 0..=MAX_ADDRESS as u16 {
            candidate = if candidate >= MAX_ADDRESS { 0 } else { candidate + 1 };
            if candidate == self.preferred_address {
                continue;
            }
            if candidate != current {
                return Some(candidate);
            }
        }
        None
    }

    fn make_claim_frame(&self, address: Address) -> Frame {
        Frame {
            id: Identifier::encode(Priority::DEFAULT, PGN_ADDRESS_CLAIMED, address, BROADCAST_ADDRESS),
            data: self.name.to_bytes(),
            length: 8,
            timestamp_us: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_preferred_address_after_guard_window() {
        let mut claimer = AddressClaimer::new(Name::from_raw(1), 0x28, 0);
        let frames = claimer.start();
        assert_eq!(frames.len(), 2);
        assert_eq!(claimer.claim_state(), ClaimState::WaitForContest);

        claimer.update(249);
        assert_eq!(claimer.claim_state(), ClaimState::WaitForContest);
        claimer.update(1);
        assert_eq!(claimer.claim_state(), ClaimState::Claimed);
        assert_eq!(claimer.address(), 0x28);
    }

    #[test]
    fn loses_contention_and_picks_next_address() {
        let mut claimer = AddressClaimer::new(Name::from_raw(100), 0x28, 0);
        claimer.start();
        let frames = claimer.handle_claim(0x28, Name::from_raw(0));
        assert_eq!(frames.len(), 1);
        assert_eq!(claimer.claim_state(), ClaimState::WaitForContest);
        assert_eq!(claimer.address(), 0x29);

        claimer.update(250);
        assert_eq!(claimer.claim_state(), ClaimState::Claimed);
        assert_eq!(claimer.address(), 0x29);
    }

    #[test]
    fn wins_contention_and_reasserts() {
        let mut claimer = AddressClaimer::new(Name::from_raw(1), 0x28, 0);
        claimer.start();
        let frames = claimer.handle_claim(0x28, Name::from_raw(100));
        assert_eq!(frames.len(), 1);
        assert_eq!(claimer.claim_state(), ClaimState::WaitForContest);
        assert_eq!(claimer.address(), 0x28);
    }

    #[test]
    fn non_self_configurable_fails_on_loss() {
        let mut claimer = AddressClaimer::new(Name::new(0, 0, 0, 0, 0, 0, 0, 0, false), 0x28, 0);
        claimer.start();
        claimer.handle_claim(0x28, Name::from_raw(0));
        assert_eq!(claimer.claim_state(), ClaimState::Failed);
        assert_eq!(claimer.address(), NULL_ADDRESS);
    }

    #[test]
    fn silent_before_first_attempt() {
        let mut claimer = AddressClaimer::new(Name::from_raw(1), 0x28, 0);
        assert!(claimer.handle_request_for_claim().is_empty());
    }

    #[test]
    fn responds_to_request_once_claimed() {
        let mut claimer = AddressClaimer::new(Name::from_raw(1), 0x28, 0);
        claimer.start();
        claimer.update(250);
        let frames = claimer.handle_request_for_claim();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].source(), 0x28);
    }
}
