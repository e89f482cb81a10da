//! Control channel: JSON frames driving remote pointer/keyboard input.
//!
//! Every inbound frame passes, in order: size check, rate check, JSON parse, tag
//! dispatch. The first two raise at most one notice per violation streak; parse
//! failures are only logged. Tags this build does not know are ignored so newer peers
//! can add message kinds without breaking older ones.

use crate::config::ControlLimits;
use crate::events::Notice;
use crate::peer::input_budget::InputBudget;
use crate::peer::rate_limit::{NoticeLatch, RateLimiter};
use crate::peer::types::Payload;
use crate::utils::{strip_control_chars, text_units, truncate_units};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

/// The only `action` value with an effect today.
pub const ACTION_CLEAR_INPUT: &str = "clear-input";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PointerKind {
    Move,
    Click,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PointerButton {
    Left,
    Right,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeyboardMode {
    Text,
    Backspace,
    Enter,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    Permission {
        allowed: bool,
    },
    /// Coordinates are percentages of the shared surface, 0..=100.
    Pointer {
        kind: PointerKind,
        x: f64,
        y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        button: Option<PointerButton>,
    },
    PointerVisibility {
        visible: bool,
    },
    Keyboard {
        mode: KeyboardMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    Action {
        action: String,
    },
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses a frame that already passed the size and rate gates.
    pub fn parse(text: &str) -> Option<Self> {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!("discarding malformed control frame: {e}");
                return None;
            }
        };
        match serde_json::from_value::<ControlMessage>(value) {
            Ok(msg) => msg.normalized(),
            Err(e) => {
                debug!("discarding invalid control message: {e}");
                None
            }
        }
    }

    /// Clamps pointer coordinates into range; rejects non-finite ones.
    fn normalized(self) -> Option<Self> {
        match self {
            ControlMessage::Pointer { kind, x, y, button } => {
                if !x.is_finite() || !y.is_finite() {
                    return None;
                }
                Some(ControlMessage::Pointer {
                    kind,
                    x: x.clamp(0.0, 100.0),
                    y: y.clamp(0.0, 100.0),
                    button,
                })
            }
            other => Some(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlInbound {
    Message(ControlMessage),
    Dropped(Option<Notice>),
}

/// Outcome of offering remote-typed text to the input budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextAdmission {
    Insert(String),
    /// Nothing printable left after sanitising.
    Empty,
    /// Budget was already spent before this message.
    Exhausted,
}

#[derive(Debug)]
pub struct ControlChannel {
    limits: ControlLimits,
    limiter: RateLimiter,
    oversize_latch: NoticeLatch,
    rate_latch: NoticeLatch,
    budget: InputBudget,
    open: bool,
    /// The peer lets us control their screen.
    permission_granted: bool,
    /// We let the peer control ours.
    permission_allowed_to_peer: bool,
}

impl ControlChannel {
    pub fn new(limits: ControlLimits) -> Self {
        Self {
            limiter: RateLimiter::new(limits.rate_max, limits.rate_window()),
            budget: InputBudget::new(limits.input_budget),
            oversize_latch: NoticeLatch::default(),
            rate_latch: NoticeLatch::default(),
            open: false,
            permission_granted: false,
            permission_allowed_to_peer: false,
            limits,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn permission_granted(&self) -> bool {
        self.permission_granted
    }

    pub fn permission_allowed_to_peer(&self) -> bool {
        self.permission_allowed_to_peer
    }

    pub fn budget(&self) -> &InputBudget {
        &self.budget
    }

    pub fn on_open(&mut self) {
        self.limiter.reset();
        self.oversize_latch.rearm();
        self.rate_latch.rearm();
        self.open = true;
    }

    /// Drops every piece of per-connection state, including both permission directions.
    pub fn on_close(&mut self) {
        self.limiter.reset();
        self.oversize_latch.rearm();
        self.rate_latch.rearm();
        self.budget.reset();
        self.open = false;
        self.permission_granted = false;
        self.permission_allowed_to_peer = false;
    }

    /// Records the peer's grant. Returns true when the value changed.
    pub fn set_permission_granted(&mut self, allowed: bool) -> bool {
        std::mem::replace(&mut self.permission_granted, allowed) != allowed
    }

    /// Records our grant to the peer; a fresh grant refills the input budget.
    pub fn set_permission_allowed_to_peer(&mut self, allowed: bool) -> bool {
        let changed = std::mem::replace(&mut self.permission_allowed_to_peer, allowed) != allowed;
        if changed && allowed {
            self.budget.reset();
        }
        changed
    }

    /// Budget ran out: withdraw the peer's control and refill for whatever grant comes next.
    pub fn revoke_for_exhausted_budget(&mut self) {
        self.permission_allowed_to_peer = false;
        self.budget.reset();
    }

    pub fn receive(&mut self, payload: Payload, now: Instant) -> ControlInbound {
        let text = match payload {
            Payload::Text(text) => text,
            Payload::Binary(data) => {
                if data.len() > self.limits.max_payload {
                    return self.drop_oversized(data.len());
                }
                match String::from_utf8(data) {
                    Ok(text) => text,
                    Err(_) => {
                        warn!("discarding non-UTF-8 control frame");
                        return ControlInbound::Dropped(None);
                    }
                }
            }
        };

        let len = text_units(&text);
        if len > self.limits.max_payload {
            return self.drop_oversized(len);
        }

        if !self.limiter.try_acquire(now) {
            debug!("control frame dropped by rate limiter");
            let notice = self.rate_latch.fire().then_some(Notice::ControlRateLimited);
            return ControlInbound::Dropped(notice);
        }

        match ControlMessage::parse(&text) {
            Some(msg) => {
                self.oversize_latch.rearm();
                self.rate_latch.rearm();
                ControlInbound::Message(msg)
            }
            None => ControlInbound::Dropped(None),
        }
    }

    fn drop_oversized(&mut self, len: usize) -> ControlInbound {
        warn!("control frame too large ({len} > {})", self.limits.max_payload);
        let notice = self
            .oversize_latch
            .fire()
            .then_some(Notice::ControlPayloadTooLarge);
        ControlInbound::Dropped(notice)
    }

    /// Sanitises remote-typed text and charges it against the input budget.
    pub fn admit_text(&mut self, value: &str) -> TextAdmission {
        let cleaned = strip_control_chars(value);
        let capped = truncate_units(&cleaned, self.limits.keyboard_text_max);
        if capped.is_empty() {
            return TextAdmission::Empty;
        }
        if self.budget.is_exhausted() {
            return TextAdmission::Exhausted;
        }
        let granted = self.budget.consume(text_units(capped));
        TextAdmission::Insert(truncate_units(capped, granted).to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn open_channel(limits: ControlLimits) -> ControlChannel {
        let mut ch = ControlChannel::new(limits);
        ch.on_open();
        ch
    }

    fn text(s: &str) -> Payload {
        Payload::Text(s.to_owned())
    }

    #[test]
    fn parses_every_known_kind() {
        assert_eq!(
            ControlMessage::parse(r#"{"type":"permission","allowed":true}"#),
            Some(ControlMessage::Permission { allowed: true })
        );
        assert_eq!(
            ControlMessage::parse(r#"{"type":"pointer","kind":"click","x":50.5,"y":10.25,"button":"left"}"#),
            Some(ControlMessage::Pointer {
                kind: PointerKind::Click,
                x: 50.5,
                y: 10.25,
                button: Some(PointerButton::Left)
            })
        );
        assert_eq!(
            ControlMessage::parse(r#"{"type":"pointer-visibility","visible":false}"#),
            Some(ControlMessage::PointerVisibility { visible: false })
        );
        assert_eq!(
            ControlMessage::parse(r#"{"type":"keyboard","mode":"backspace"}"#),
            Some(ControlMessage::Keyboard {
                mode: KeyboardMode::Backspace,
                value: None
            })
        );
        assert_eq!(
            ControlMessage::parse(r#"{"type":"action","action":"clear-input","extra":1}"#),
            Some(ControlMessage::Action {
                action: ACTION_CLEAR_INPUT.into()
            })
        );
    }

    #[test]
    fn unknown_tags_are_kept_as_unknown() {
        assert_eq!(
            ControlMessage::parse(r#"{"type":"teleport","where":"mars"}"#),
            Some(ControlMessage::Unknown)
        );
    }

    #[test]
    fn invalid_shapes_are_discarded() {
        assert_eq!(ControlMessage::parse("{oops"), None);
        assert_eq!(ControlMessage::parse(r#"{"allowed":true}"#), None);
        assert_eq!(ControlMessage::parse(r#"{"type":"permission"}"#), None);
        assert_eq!(ControlMessage::parse(r#"{"type":"permission","allowed":"yes"}"#), None);
        assert_eq!(ControlMessage::parse(r#"{"type":"keyboard","mode":"shift"}"#), None);
        assert_eq!(ControlMessage::parse(r#"{"type":"pointer","kind":"move","x":1}"#), None);
        assert_eq!(ControlMessage::parse("[1,2,3]"), None);
    }

    #[test]
    fn pointer_coordinates_are_clamped() {
        assert_eq!(
            ControlMessage::parse(r#"{"type":"pointer","kind":"move","x":-5,"y":140}"#),
            Some(ControlMessage::Pointer {
                kind: PointerKind::Move,
                x: 0.0,
                y: 100.0,
                button: None
            })
        );
    }

    #[test]
    fn outbound_json_shape() {
        let json = ControlMessage::PointerVisibility { visible: false }.to_json().unwrap();
        assert_eq!(json, r#"{"type":"pointer-visibility","visible":false}"#);
        let json = ControlMessage::Keyboard {
            mode: KeyboardMode::Enter,
            value: None,
        }
        .to_json()
        .unwrap();
        assert_eq!(json, r#"{"type":"keyboard","mode":"enter"}"#);
    }

    #[test]
    fn oversize_warning_is_one_shot_until_a_valid_message() {
        let mut ch = open_channel(ControlLimits::default());
        let now = Instant::now();
        let big = format!(r#"{{"type":"action","action":"{}"}}"#, "a".repeat(3000));
        assert_eq!(
            ch.receive(text(&big), now),
            ControlInbound::Dropped(Some(Notice::ControlPayloadTooLarge))
        );
        assert_eq!(ch.receive(text(&big), now), ControlInbound::Dropped(None));
        assert!(matches!(
            ch.receive(text(r#"{"type":"permission","allowed":false}"#), now),
            ControlInbound::Message(_)
        ));
        assert_eq!(
            ch.receive(text(&big), now),
            ControlInbound::Dropped(Some(Notice::ControlPayloadTooLarge))
        );
    }

    #[test]
    fn oversized_binary_is_dropped_too() {
        let mut ch = open_channel(ControlLimits::default());
        assert_eq!(
            ch.receive(Payload::Binary(vec![b'a'; 4096]), Instant::now()),
            ControlInbound::Dropped(Some(Notice::ControlPayloadTooLarge))
        );
    }

    #[test]
    fn rate_warning_is_one_shot() {
        let mut ch = open_channel(ControlLimits::default());
        let now = Instant::now();
        let msg = r#"{"type":"pointer-visibility","visible":true}"#;
        for _ in 0..60 {
            assert!(matches!(ch.receive(text(msg), now), ControlInbound::Message(_)));
        }
        assert_eq!(
            ch.receive(text(msg), now),
            ControlInbound::Dropped(Some(Notice::ControlRateLimited))
        );
        assert_eq!(ch.receive(text(msg), now), ControlInbound::Dropped(None));
        let later = now + Duration::from_millis(5000);
        assert!(matches!(ch.receive(text(msg), later), ControlInbound::Message(_)));
    }

    #[test]
    fn malformed_frames_count_against_rate_but_stay_silent() {
        let mut ch = open_channel(ControlLimits::default());
        assert_eq!(ch.receive(text("not json"), Instant::now()), ControlInbound::Dropped(None));
    }

    #[test]
    fn admitted_text_is_sanitised_capped_and_budgeted() {
        let limits = ControlLimits {
            input_budget: 40,
            ..ControlLimits::default()
        };
        let mut ch = open_channel(limits);
        assert!(ch.set_permission_allowed_to_peer(true));

        assert_eq!(ch.admit_text("a\u{7}b\nc"), TextAdmission::Insert("abc".into()));
        assert_eq!(ch.budget().remaining(), 37);

        let long = "z".repeat(50);
        assert_eq!(ch.admit_text(&long), TextAdmission::Insert("z".repeat(32)));
        assert_eq!(ch.budget().remaining(), 5);

        assert_eq!(ch.admit_text("123456789"), TextAdmission::Insert("12345".into()));
        assert!(ch.budget().is_exhausted());
        assert_eq!(ch.admit_text("more"), TextAdmission::Exhausted);
        assert_eq!(ch.admit_text("\n\t"), TextAdmission::Empty);
    }

    #[test]
    fn permission_directions_are_independent() {
        let mut ch = open_channel(ControlLimits::default());
        assert!(ch.set_permission_granted(true));
        assert!(!ch.permission_allowed_to_peer());
        assert!(!ch.set_permission_granted(true));
        assert!(ch.set_permission_allowed_to_peer(true));
        assert!(ch.permission_granted());
        ch.on_close();
        assert!(!ch.permission_granted());
        assert!(!ch.permission_allowed_to_peer());
    }

    #[test]
    fn exhausted_budget_revocation_refills_for_next_grant() {
        let limits = ControlLimits {
            input_budget: 3,
            ..ControlLimits::default()
        };
        let mut ch = open_channel(limits);
        ch.set_permission_allowed_to_peer(true);
        ch.admit_text("abc");
        assert!(ch.budget().is_exhausted());
        ch.revoke_for_exhausted_budget();
        assert!(!ch.permission_allowed_to_peer());
        assert_eq!(ch.budget().remaining(), 3);
    }
}
