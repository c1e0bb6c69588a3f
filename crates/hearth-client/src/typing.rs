//! Typing presence.
//!
//! Two halves: the local user's outbound typing signal (rate limited, with
//! an idle auto-stop) and the set of remote typists (each expiring unless
//! renewed). Both are deadline based; nothing here schedules timers. Callers
//! drive [`TypingTracker::tick`] and expired entries are also filtered on
//! read, so a stale typist never shows even between ticks.

use std::{
    fmt::Debug,
    ops::{Add, Sub},
    time::Duration,
};

/// Minimum spacing between repeated Start signals while typing continuously.
pub const DEFAULT_START_INTERVAL: Duration = Duration::from_secs(3);

/// Local inactivity after which a Stop is sent automatically.
pub const DEFAULT_TYPING_IDLE: Duration = Duration::from_secs(4);

/// Lifetime of a remote typing indicator without renewal.
pub const DEFAULT_REMOTE_TTL: Duration = Duration::from_secs(5);

/// Names listed in [`TypingTracker::label`] before summarizing.
const LABEL_MAX_NAMES: usize = 3;

/// Typing configuration
#[derive(Debug, Clone, Copy)]
pub struct TypingConfig {
    /// Rate limit for outbound Start signals
    pub start_interval: Duration,
    /// Local idle auto-stop
    pub idle_timeout: Duration,
    /// Remote indicator lifetime (should exceed `start_interval`)
    pub remote_ttl: Duration,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            start_interval: DEFAULT_START_INTERVAL,
            idle_timeout: DEFAULT_TYPING_IDLE,
            remote_ttl: DEFAULT_REMOTE_TTL,
        }
    }
}

/// Outbound typing signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    /// Local user started (or is still) typing.
    Start,
    /// Local user stopped typing.
    Stop,
}

impl TypingSignal {
    /// Wire flag.
    pub fn is_active(self) -> bool {
        self == Self::Start
    }
}

/// A remote participant currently typing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingUser<I> {
    /// Typist.
    pub user_id: String,
    /// Typist display name.
    pub user_name: String,
    /// Last Start received.
    pub last_seen: I,
    /// When the indicator lapses without renewal.
    pub expires_at: I,
}

#[derive(Debug, Clone, Copy)]
struct LocalTyping<I> {
    last_signal: I,
    last_input: I,
}

/// Typing presence for one room.
#[derive(Debug, Clone)]
pub struct TypingTracker<I> {
    config: TypingConfig,
    own_user_id: String,
    local: Option<LocalTyping<I>>,
    remote: Vec<TypingUser<I>>,
}

impl<I> TypingTracker<I>
where
    I: Copy + Ord + Debug + Sub<Output = Duration> + Add<Duration, Output = I>,
{
    /// Create a tracker. Remote signals from `own_user_id` are ignored.
    pub fn new(config: TypingConfig, own_user_id: impl Into<String>) -> Self {
        Self { config, own_user_id: own_user_id.into(), local: None, remote: Vec::new() }
    }

    /// Whether the local user is currently signalled as typing.
    pub fn is_typing(&self) -> bool {
        self.local.is_some()
    }

    /// Local keystroke. Returns a Start signal if one is due.
    pub fn start_typing(&mut self, now: I) -> Option<TypingSignal> {
        match &mut self.local {
            None => {
                self.local = Some(LocalTyping { last_signal: now, last_input: now });
                Some(TypingSignal::Start)
            },
            Some(local) => {
                local.last_input = now;
                if now - local.last_signal >= self.config.start_interval {
                    local.last_signal = now;
                    Some(TypingSignal::Start)
                } else {
                    None
                }
            },
        }
    }

    /// Local typing ended. Returns Stop only if a Start is outstanding.
    pub fn stop_typing(&mut self) -> Option<TypingSignal> {
        self.local.take().map(|_| TypingSignal::Stop)
    }

    /// Remote Start. Returns `true` if the visible set changed.
    pub fn on_remote_typing(&mut self, user_id: &str, user_name: &str, now: I) -> bool {
        if user_id == self.own_user_id {
            return false;
        }
        let expires_at = now + self.config.remote_ttl;

        if let Some(user) = self.remote.iter_mut().find(|u| u.user_id == user_id) {
            let was_visible = user.expires_at > now;
            let renamed = user.user_name != user_name;
            user.user_name = user_name.to_string();
            user.last_seen = now;
            user.expires_at = expires_at;
            return renamed || !was_visible;
        }

        self.remote.push(TypingUser {
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            last_seen: now,
            expires_at,
        });
        true
    }

    /// Remote Stop. Returns `true` if the user was listed.
    pub fn on_remote_stop(&mut self, user_id: &str) -> bool {
        let before = self.remote.len();
        self.remote.retain(|u| u.user_id != user_id);
        self.remote.len() != before
    }

    /// Forget every remote typist (link lost).
    pub fn clear_remote(&mut self) -> bool {
        let had = !self.remote.is_empty();
        self.remote.clear();
        had
    }

    /// Idle auto-stop for the local user. Returns Stop if it fired.
    pub fn tick(&mut self, now: I) -> Option<TypingSignal> {
        let idle = self.local.is_some_and(|l| now - l.last_input >= self.config.idle_timeout);
        if idle {
            tracing::debug!("typing idle, auto-stop");
            return self.stop_typing();
        }
        None
    }

    /// Drop expired remote typists. Returns `true` if any were removed.
    pub fn purge_expired(&mut self, now: I) -> bool {
        let before = self.remote.len();
        self.remote.retain(|u| u.expires_at > now);
        self.remote.len() != before
    }

    /// Remote typists still active at `now`, in arrival order.
    pub fn typing_users(&self, now: I) -> Vec<&TypingUser<I>> {
        self.remote.iter().filter(|u| u.expires_at > now).collect()
    }

    /// Human-readable summary, e.g. `"Ada is typing…"`.
    pub fn label(&self, now: I) -> Option<String> {
        let names: Vec<&str> =
            self.typing_users(now).into_iter().map(|u| u.user_name.as_str()).collect();
        match names.as_slice() {
            [] => None,
            [one] => Some(format!("{one} is typing…")),
            few if few.len() <= LABEL_MAX_NAMES => Some(format!("{} are typing…", few.join(", "))),
            many => Some(format!(
                "{} and {} others are typing…",
                many[..LABEL_MAX_NAMES - 1].join(", "),
                many.len() - (LABEL_MAX_NAMES - 1)
            )),
        }
    }
}
