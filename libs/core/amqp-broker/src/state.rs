//! Link lifecycle shared by connections and channels.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a supervised link.
///
/// `Closing` is entered *before* the close frame is sent, so a supervisor that
/// wakes up on the resulting close notification can tell an application close
/// apart from a broker-initiated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Open,
    Closing,
    Closed,
}

impl LinkState {
    fn as_u8(self) -> u8 {
        match self {
            LinkState::Open => 0,
            LinkState::Closing => 1,
            LinkState::Closed => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LinkState::Open,
            1 => LinkState::Closing,
            _ => LinkState::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Open => "open",
            LinkState::Closing => "closing",
            LinkState::Closed => "closed",
        }
    }
}

#[derive(Debug)]
pub struct AtomicLinkState(AtomicU8);

impl AtomicLinkState {
    pub fn new() -> Self {
        Self(AtomicU8::new(LinkState::Open.as_u8()))
    }

    pub fn load(&self) -> LinkState {
        LinkState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.load() == LinkState::Open
    }

    /// Move `Open -> Closing`. Returns false if someone else already started closing.
    pub fn begin_close(&self) -> bool {
        self.0
            .compare_exchange(
                LinkState::Open.as_u8(),
                LinkState::Closing.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn mark_closed(&self) {
        self.0.store(LinkState::Closed.as_u8(), Ordering::Release);
    }
}

impl Default for AtomicLinkState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn starts_open() {
        let state = AtomicLinkState::new();
        assert!(state.is_open());
        assert_eq!(state.load().as_str(), "open");
    }

    #[test]
    fn close_is_one_shot() {
        let state = AtomicLinkState::new();
        assert!(state.begin_close());
        assert_eq!(state.load(), LinkState::Closing);
        assert!(!state.begin_close());

        state.mark_closed();
        assert_eq!(state.load(), LinkState::Closed);
        assert!(!state.begin_close());
    }

    #[test]
    fn only_one_racer_wins_begin_close() {
        let state = Arc::new(AtomicLinkState::new());
        let winners: usize = (0..8)
            .map(|_| {
                let s = state.clone();
                std::thread::spawn(move || s.begin_close())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(winners, 1);
    }
}
