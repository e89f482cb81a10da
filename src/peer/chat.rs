//! Chat channel: raw UTF-8 text frames, no envelope.

use crate::config::ChatLimits;
use crate::events::Notice;
use crate::peer::rate_limit::{NoticeLatch, RateLimiter};
use crate::peer::types::Payload;
use crate::utils::text_units;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInbound {
    Accepted(String),
    /// Dropped; the notice is `None` when this streak was already reported.
    Rejected(Option<Notice>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatOutbound {
    Send(String),
    /// Nothing to do: channel closed or only whitespace.
    Ignored,
    Rejected(Notice),
}

#[derive(Debug)]
pub struct ChatChannel {
    limits: ChatLimits,
    limiter: RateLimiter,
    rate_latch: NoticeLatch,
    open: bool,
}

impl ChatChannel {
    pub fn new(limits: ChatLimits) -> Self {
        let limiter = RateLimiter::new(limits.rate_max, limits.rate_window());
        Self {
            limits,
            limiter,
            rate_latch: NoticeLatch::default(),
            open: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn max_len(&self) -> usize {
        self.limits.max_len
    }

    pub fn on_open(&mut self) {
        self.limiter.reset();
        self.rate_latch.rearm();
        self.open = true;
    }

    pub fn on_close(&mut self) {
        self.limiter.reset();
        self.rate_latch.rearm();
        self.open = false;
    }

    pub fn receive(&mut self, payload: Payload, now: Instant) -> ChatInbound {
        let text = match payload {
            Payload::Text(text) => text,
            Payload::Binary(data) => {
                warn!("blocked binary chat frame ({} bytes)", data.len());
                return ChatInbound::Rejected(Some(Notice::NonTextBlocked));
            }
        };

        let len = text_units(&text);
        if len > self.limits.max_len {
            warn!("blocked oversized chat frame ({len} > {})", self.limits.max_len);
            return ChatInbound::Rejected(Some(Notice::MessageTooLong {
                max: self.limits.max_len,
            }));
        }

        if !self.limiter.try_acquire(now) {
            debug!("chat frame dropped by rate limiter");
            let notice = self.rate_latch.fire().then_some(Notice::RateLimited);
            return ChatInbound::Rejected(notice);
        }

        self.rate_latch.rearm();
        ChatInbound::Accepted(text)
    }

    pub fn prepare_send(&self, text: &str) -> ChatOutbound {
        if !self.open {
            return ChatOutbound::Ignored;
        }
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return ChatOutbound::Ignored;
        }
        let len = text_units(trimmed);
        if len > self.limits.max_len {
            return ChatOutbound::Rejected(Notice::MessageInputTooLong {
                max: self.limits.max_len,
                current: len,
            });
        }
        ChatOutbound::Send(trimmed.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn open_channel() -> ChatChannel {
        let mut ch = ChatChannel::new(ChatLimits::default());
        ch.on_open();
        ch
    }

    #[test]
    fn accepts_plain_text() {
        let mut ch = open_channel();
        assert_eq!(
            ch.receive(Payload::Text("hi".into()), Instant::now()),
            ChatInbound::Accepted("hi".into())
        );
    }

    #[test]
    fn binary_frames_are_blocked() {
        let mut ch = open_channel();
        assert_eq!(
            ch.receive(Payload::Binary(vec![1, 2, 3]), Instant::now()),
            ChatInbound::Rejected(Some(Notice::NonTextBlocked))
        );
    }

    #[test]
    fn oversized_frames_name_the_limit() {
        let mut ch = open_channel();
        let long = "x".repeat(2001);
        assert_eq!(
            ch.receive(Payload::Text(long), Instant::now()),
            ChatInbound::Rejected(Some(Notice::MessageTooLong { max: 2000 }))
        );
        let exact = "é".repeat(2000);
        assert!(matches!(
            ch.receive(Payload::Text(exact), Instant::now()),
            ChatInbound::Accepted(_)
        ));
    }

    #[test]
    fn flood_yields_window_max_and_one_notice() {
        let mut ch = open_channel();
        let now = Instant::now();
        let mut accepted = 0;
        let mut notices = 0;
        for i in 0..100 {
            match ch.receive(Payload::Text(format!("m{i}")), now + Duration::from_millis(i)) {
                ChatInbound::Accepted(_) => accepted += 1,
                ChatInbound::Rejected(Some(Notice::RateLimited)) => notices += 1,
                ChatInbound::Rejected(None) => {}
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(accepted, 30);
        assert_eq!(notices, 1);

        // once the window clears traffic flows again and a new streak is reported again
        let later = now + Duration::from_secs(6);
        assert!(matches!(
            ch.receive(Payload::Text("back".into()), later),
            ChatInbound::Accepted(_)
        ));
    }

    #[test]
    fn reopening_resets_the_window() {
        let mut ch = open_channel();
        let now = Instant::now();
        for _ in 0..30 {
            ch.receive(Payload::Text("m".into()), now);
        }
        assert_eq!(
            ch.receive(Payload::Text("m".into()), now),
            ChatInbound::Rejected(Some(Notice::RateLimited))
        );
        ch.on_close();
        ch.on_open();
        assert!(matches!(
            ch.receive(Payload::Text("m".into()), now),
            ChatInbound::Accepted(_)
        ));
    }

    #[test]
    fn outbound_rules() {
        let closed = ChatChannel::new(ChatLimits::default());
        assert_eq!(closed.prepare_send("hello"), ChatOutbound::Ignored);

        let ch = open_channel();
        assert_eq!(ch.prepare_send("   \n"), ChatOutbound::Ignored);
        assert_eq!(ch.prepare_send("  hello "), ChatOutbound::Send("hello".into()));
        assert_eq!(
            ch.prepare_send(&"y".repeat(2001)),
            ChatOutbound::Rejected(Notice::MessageInputTooLong {
                max: 2000,
                current: 2001
            })
        );
    }
}
