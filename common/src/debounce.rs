use std::collections::HashMap;

use crate::{config::ControlConfig, types::ButtonAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Admitted,
    /// Same action pressed again inside its window.
    Repeat { since_ms: u64 },
    /// Blocked by the toggle guard.
    Guarded { since_ms: u64 },
}

impl Verdict {
    pub fn is_admitted(self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Per-binding press gate.
///
/// Windows are fixed from the last admitted press: a suppressed press never
/// extends them. A repeated action inside `same_action_window_ms` is dropped.
/// A toggle additionally blocks every action for `toggle_guard_ms`, and is
/// itself blocked for that long after any admitted press.
#[derive(Debug, Clone)]
pub struct DebounceGate {
    same_action_window_ms: u64,
    toggle_guard_ms: u64,
    last_admitted: HashMap<ButtonAction, u64>,
    last_any: Option<(ButtonAction, u64)>,
}

impl DebounceGate {
    pub fn new(config: &ControlConfig) -> Self {
        Self {
            same_action_window_ms: config.same_action_window_ms,
            toggle_guard_ms: config.toggle_guard_ms,
            last_admitted: HashMap::new(),
            last_any: None,
        }
    }

    pub fn admit(&mut self, action: ButtonAction, now_ms: u64) -> bool {
        self.check(action, now_ms).is_admitted()
    }

    pub fn check(&mut self, action: ButtonAction, now_ms: u64) -> Verdict {
        if let Some(&last) = self.last_admitted.get(&action) {
            let since_ms = now_ms.saturating_sub(last);
            if since_ms < self.same_action_window_ms {
                return Verdict::Repeat { since_ms };
            }
        }

        if let Some((previous, last)) = self.last_any {
            let since_ms = now_ms.saturating_sub(last);
            let toggle_involved =
                action == ButtonAction::Toggle || previous == ButtonAction::Toggle;
            if toggle_involved && previous != action && since_ms < self.toggle_guard_ms {
                return Verdict::Guarded { since_ms };
            }
        }

        self.last_admitted.insert(action, now_ms);
        self.last_any = Some((action, now_ms));
        Verdict::Admitted
    }

    pub fn last_admitted(&self) -> Option<(ButtonAction, u64)> {
        self.last_any
    }
}
