//! Duel State Machine (component H): proximity triggering, the native
//! yes/no prompt flow, and the manual keypad fallback when the engine's
//! script never writes a result.
//!
//! One enum, one `tick` entry point, and a `Vec` of emitted actions the
//! caller (the Scheduler) dispatches without this module reaching into
//! transport or warp directly.

/// Minimum frame gap between two duel requests this client can send.
pub const REQUEST_COOLDOWN_FRAMES: u64 = 120;
/// Frames to wait for the peer's accept/decline before giving up.
pub const RESPONSE_TIMEOUT_FRAMES: u64 = 900;
/// Frames to wait for the local player to answer an incoming challenge or
/// a result dismissal before the state machine times out on its own.
pub const REQUEST_TIMEOUT_FRAMES: u64 = 600;
/// Minimum frames `pre_challenge_wait` holds before advancing, even if A
/// is released immediately.
const PRE_CHALLENGE_MIN_FRAMES: u64 = 3;
/// `pre_challenge_wait` advances automatically after this many frames if A
/// was never released.
const PRE_CHALLENGE_MAX_FRAMES: u64 = 10;

/// The event a single `tick` call may be carrying, sourced from local
/// input, the textbox poller, or an inbound transport message.
#[derive(Clone, Debug, PartialEq)]
pub enum DuelEvent {
    /// A-pressed within 2 tiles of a remote ghost, with `target_id`/name.
    ProximityPress { target_id: String, target_name: String },
    AReleased,
    Yes,
    No,
    /// The server accepted/declined our outstanding request.
    ResponseAccepted,
    ResponseDeclined,
    /// An incoming request from another player.
    IncomingRequest { requester_id: String, requester_name: String },
    /// The textbox was dismissed (message-kind, not yes/no).
    MessageDismissed,
}

/// One side effect the transition table calls for. The Scheduler maps
/// these onto transport sends, textbox triggers, and warp starts.
#[derive(Clone, Debug, PartialEq)]
pub enum DuelAction {
    SendDuelRequest { target_id: String },
    SendAccept { requester_id: String },
    SendDecline { requester_id: String },
    ShowYesNo { text: String },
    ShowMessage { text: String },
    /// The duel was accepted; the Scheduler should start the warp/battle
    /// handoff sequence.
    StartWarp,
    /// The duel ended without a battle (declined, timed out, cancelled).
    Cancel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DuelState {
    Idle,
    PreChallengeWait,
    ConfirmingChallenge,
    WaitingResponse,
    ShowingResult,
    ShowingIncoming,
}

/// The manual yes/no fallback entered when `VAR_RESULT` never leaves its
/// sentinel — keeps the state machine finite even if the native script
/// fails to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ManualSelection {
    pub selected_yes: bool,
}

/// Everything the duel flow needs remembered across frames.
#[derive(Clone, Debug, Default)]
pub struct DuelContext {
    pub target_id: Option<String>,
    pub target_name: Option<String>,
    pub requester_id: Option<String>,
    pub requester_name: Option<String>,
}

pub struct DuelStateMachine {
    state: DuelState,
    ctx: DuelContext,
    state_frame: u64,
    flow_start_frame: u64,
    last_request_frame: Option<u64>,
    manual: Option<ManualSelection>,
}

impl Default for DuelStateMachine {
    fn default() -> Self {
        DuelStateMachine {
            state: DuelState::Idle,
            ctx: DuelContext::default(),
            state_frame: 0,
            flow_start_frame: 0,
            last_request_frame: None,
            manual: None,
        }
    }
}

impl DuelStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DuelState {
        self.state
    }

    pub fn context(&self) -> &DuelContext {
        &self.ctx
    }

    fn enter(&mut self, state: DuelState, frame: u64) {
        log::debug!("duel: {:?} -> {:?}", self.state, state);
        self.state = state;
        self.state_frame = frame;
    }

    fn reset_to_idle(&mut self, frame: u64) -> Vec<DuelAction> {
        self.ctx = DuelContext::default();
        self.manual = None;
        self.enter(DuelState::Idle, frame);
        vec![]
    }

    fn elapsed(&self, frame: u64) -> u64 {
        frame.saturating_sub(self.state_frame)
    }

    /// Advances the state machine by one frame, optionally carrying an
    /// event, and returns the side effects the transition table calls for.
    pub fn tick(&mut self, event: Option<DuelEvent>, frame: u64) -> Vec<DuelAction> {
        match self.state {
            DuelState::Idle => self.tick_idle(event, frame),
            DuelState::PreChallengeWait => self.tick_pre_challenge_wait(event, frame),
            DuelState::ConfirmingChallenge => self.tick_confirming_challenge(event, frame),
            DuelState::WaitingResponse => self.tick_waiting_response(event, frame),
            DuelState::ShowingResult => self.tick_showing_result(event, frame),
            DuelState::ShowingIncoming => self.tick_showing_incoming(event, frame),
        }
    }

    fn tick_idle(&mut self, event: Option<DuelEvent>, frame: u64) -> Vec<DuelAction> {
        match event {
            Some(DuelEvent::ProximityPress { target_id, target_name }) => {
                let cooldown_ok = self
                    .last_request_frame
                    .map(|last| frame.saturating_sub(last) >= REQUEST_COOLDOWN_FRAMES)
                    .unwrap_or(true);
                if !cooldown_ok {
                    return vec![];
                }
                self.ctx.target_id = Some(target_id);
                self.ctx.target_name = Some(target_name);
                self.flow_start_frame = frame;
                self.enter(DuelState::PreChallengeWait, frame);
                vec![]
            }
            Some(DuelEvent::IncomingRequest { requester_id, requester_name }) => {
                let text = format!("{} wants to battle!", requester_name);
                self.ctx.requester_id = Some(requester_id);
                self.ctx.requester_name = Some(requester_name);
                self.flow_start_frame = frame;
                self.enter(DuelState::ShowingIncoming, frame);
                vec![DuelAction::ShowYesNo { text }]
            }
            _ => vec![],
        }
    }

    fn tick_pre_challenge_wait(&mut self, event: Option<DuelEvent>, frame: u64) -> Vec<DuelAction> {
        let elapsed = self.elapsed(frame);
        let a_released = matches!(event, Some(DuelEvent::AReleased));
        if (a_released && elapsed >= PRE_CHALLENGE_MIN_FRAMES) || elapsed >= PRE_CHALLENGE_MAX_FRAMES {
            let name = self.ctx.target_name.clone().unwrap_or_default();
            self.enter(DuelState::ConfirmingChallenge, frame);
            return vec![DuelAction::ShowYesNo {
                text: format!("Challenge {}?", name),
            }];
        }
        vec![]
    }

    fn tick_confirming_challenge(&mut self, event: Option<DuelEvent>, frame: u64) -> Vec<DuelAction> {
        match event {
            Some(DuelEvent::Yes) => {
                let target_id = self.ctx.target_id.clone().unwrap_or_default();
                self.last_request_frame = Some(frame);
                self.enter(DuelState::WaitingResponse, frame);
                vec![
                    DuelAction::SendDuelRequest { target_id },
                    DuelAction::ShowMessage {
                        text: "Waiting...".to_string(),
                    },
                ]
            }
            Some(DuelEvent::No) => self.reset_to_idle(frame),
            _ => vec![],
        }
    }

    fn tick_waiting_response(&mut self, event: Option<DuelEvent>, frame: u64) -> Vec<DuelAction> {
        match event {
            Some(DuelEvent::ResponseAccepted) => {
                let actions = vec![DuelAction::StartWarp];
                self.reset_to_idle(frame);
                actions
            }
            Some(DuelEvent::ResponseDeclined) => {
                let name = self.ctx.target_name.clone().unwrap_or_default();
                self.enter(DuelState::ShowingResult, frame);
                vec![DuelAction::ShowMessage {
                    text: format!("{} declined.", name),
                }]
            }
            _ => {
                if self.elapsed(frame) >= RESPONSE_TIMEOUT_FRAMES {
                    let mut actions = self.reset_to_idle(frame);
                    actions.push(DuelAction::Cancel);
                    return actions;
                }
                vec![]
            }
        }
    }

    fn tick_showing_result(&mut self, event: Option<DuelEvent>, frame: u64) -> Vec<DuelAction> {
        let dismissed = matches!(event, Some(DuelEvent::MessageDismissed));
        if dismissed || self.elapsed(frame) >= 600 {
            return self.reset_to_idle(frame);
        }
        vec![]
    }

    fn tick_showing_incoming(&mut self, event: Option<DuelEvent>, frame: u64) -> Vec<DuelAction> {
        let resolved = self.resolve_yes_no(event);
        match resolved {
            Some(true) => {
                let requester_id = self.ctx.requester_id.clone().unwrap_or_default();
                let actions = vec![DuelAction::SendAccept { requester_id }];
                self.reset_to_idle(frame);
                actions
            }
            Some(false) => {
                let requester_id = self.ctx.requester_id.clone().unwrap_or_default();
                let actions = vec![DuelAction::SendDecline { requester_id }];
                self.reset_to_idle(frame);
                actions
            }
            None => {
                if self.elapsed(frame) >= REQUEST_TIMEOUT_FRAMES {
                    let requester_id = self.ctx.requester_id.clone().unwrap_or_default();
                    let mut actions = vec![DuelAction::SendDecline { requester_id }];
                    self.reset_to_idle(frame);
                    actions.push(DuelAction::Cancel);
                    return actions;
                }
                vec![]
            }
        }
    }

    /// Resolves a yes/no decision either from a native-script event or
    /// from the manual directional-key fallback.
    fn resolve_yes_no(&mut self, event: Option<DuelEvent>) -> Option<bool> {
        match event {
            Some(DuelEvent::Yes) => Some(true),
            Some(DuelEvent::No) => Some(false),
            _ => None,
        }
    }

    /// Enters the manual fallback: called by the Scheduler once the
    /// textbox's settle window has elapsed and `var_result` is still the
    /// sentinel. Idempotent.
    pub fn enter_manual_fallback(&mut self) {
        self.manual.get_or_insert(ManualSelection::default());
    }

    pub fn is_manual_fallback_active(&self) -> bool {
        self.manual.is_some()
    }

    /// Toggles the manual selection in response to a directional key.
    pub fn manual_toggle(&mut self) {
        if let Some(manual) = &mut self.manual {
            manual.selected_yes = !manual.selected_yes;
        }
    }

    /// Commits (A) or cancels (B) the manual selection, returning the
    /// equivalent `DuelEvent` the caller should feed back into `tick`.
    pub fn manual_commit(&mut self) -> Option<DuelEvent> {
        let manual = self.manual.take()?;
        Some(if manual.selected_yes { DuelEvent::Yes } else { DuelEvent::No })
    }

    pub fn manual_cancel(&mut self) -> Option<DuelEvent> {
        self.manual.take();
        Some(DuelEvent::No)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proximity_press_enters_pre_challenge_wait() {
        let mut duel = DuelStateMachine::new();
        duel.tick(
            Some(DuelEvent::ProximityPress {
                target_id: "alex".into(),
                target_name: "Alex".into(),
            }),
            0,
        );
        assert_eq!(duel.state(), DuelState::PreChallengeWait);
    }

    #[test]
    fn cooldown_blocks_second_request_within_120_frames() {
        let mut duel = DuelStateMachine::new();
        duel.tick(
            Some(DuelEvent::ProximityPress {
                target_id: "alex".into(),
                target_name: "Alex".into(),
            }),
            0,
        );
        duel.tick(Some(DuelEvent::AReleased), 5);
        duel.tick(Some(DuelEvent::Yes), 5);
        duel.tick(Some(DuelEvent::ResponseDeclined), 6);
        duel.tick(Some(DuelEvent::MessageDismissed), 7);
        assert_eq!(duel.state(), DuelState::Idle);

        duel.tick(
            Some(DuelEvent::ProximityPress {
                target_id: "alex".into(),
                target_name: "Alex".into(),
            }),
            50,
        );
        assert_eq!(duel.state(), DuelState::Idle);
    }

    #[test]
    fn full_accept_flow_reaches_start_warp() {
        let mut duel = DuelStateMachine::new();
        duel.tick(
            Some(DuelEvent::ProximityPress {
                target_id: "alex".into(),
                target_name: "Alex".into(),
            }),
            0,
        );
        duel.tick(Some(DuelEvent::AReleased), 5);
        assert_eq!(duel.state(), DuelState::ConfirmingChallenge);

        let actions = duel.tick(Some(DuelEvent::Yes), 5);
        assert!(actions.contains(&DuelAction::SendDuelRequest {
            target_id: "alex".into()
        }));
        assert_eq!(duel.state(), DuelState::WaitingResponse);

        let actions = duel.tick(Some(DuelEvent::ResponseAccepted), 10);
        assert!(actions.contains(&DuelAction::StartWarp));
        assert_eq!(duel.state(), DuelState::Idle);
    }

    #[test]
    fn pre_challenge_wait_advances_without_a_release_after_max_frames() {
        let mut duel = DuelStateMachine::new();
        duel.tick(
            Some(DuelEvent::ProximityPress {
                target_id: "alex".into(),
                target_name: "Alex".into(),
            }),
            0,
        );
        let actions = duel.tick(None, 10);
        assert_eq!(duel.state(), DuelState::ConfirmingChallenge);
        assert!(matches!(actions[0], DuelAction::ShowYesNo { .. }));
    }

    #[test]
    fn waiting_response_times_out_after_900_frames() {
        let mut duel = DuelStateMachine::new();
        duel.tick(
            Some(DuelEvent::ProximityPress {
                target_id: "alex".into(),
                target_name: "Alex".into(),
            }),
            0,
        );
        duel.tick(Some(DuelEvent::AReleased), 5);
        duel.tick(Some(DuelEvent::Yes), 5);
        let actions = duel.tick(None, 5 + RESPONSE_TIMEOUT_FRAMES);
        assert!(actions.contains(&DuelAction::Cancel));
        assert_eq!(duel.state(), DuelState::Idle);
    }

    #[test]
    fn incoming_request_shows_yes_no_and_accept_sends_accept() {
        let mut duel = DuelStateMachine::new();
        let actions = duel.tick(
            Some(DuelEvent::IncomingRequest {
                requester_id: "bob".into(),
                requester_name: "Bob".into(),
            }),
            0,
        );
        assert!(matches!(actions[0], DuelAction::ShowYesNo { .. }));
        assert_eq!(duel.state(), DuelState::ShowingIncoming);

        let actions = duel.tick(Some(DuelEvent::Yes), 1);
        assert!(actions.contains(&DuelAction::SendAccept {
            requester_id: "bob".into()
        }));
        assert_eq!(duel.state(), DuelState::Idle);
    }

    #[test]
    fn incoming_request_times_out_as_decline() {
        let mut duel = DuelStateMachine::new();
        duel.tick(
            Some(DuelEvent::IncomingRequest {
                requester_id: "bob".into(),
                requester_name: "Bob".into(),
            }),
            0,
        );
        let actions = duel.tick(None, REQUEST_TIMEOUT_FRAMES);
        assert!(actions.contains(&DuelAction::SendDecline {
            requester_id: "bob".into()
        }));
        assert!(actions.contains(&DuelAction::Cancel));
    }

    #[test]
    fn manual_fallback_toggle_and_commit() {
        let mut duel = DuelStateMachine::new();
        duel.tick(
            Some(DuelEvent::ProximityPress {
                target_id: "alex".into(),
                target_name: "Alex".into(),
            }),
            0,
        );
        duel.tick(Some(DuelEvent::AReleased), 5);
        duel.enter_manual_fallback();
        assert!(duel.is_manual_fallback_active());
        duel.manual_toggle();
        let event = duel.manual_commit();
        assert_eq!(event, Some(DuelEvent::Yes));
        assert!(!duel.is_manual_fallback_active());
    }
}
