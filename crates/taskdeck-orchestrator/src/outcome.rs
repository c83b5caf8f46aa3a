//! Classification of a completed agent run's final free-text reply.

/// Marker an agent must emit to finish a task.
pub const COMPLETE_MARKER: &str = "[task-complete]";
/// Marker for "made progress, more to do".
pub const CONTINUE_MARKER: &str = "[task-continue]";
/// Marker for "cannot proceed without outside help".
pub const BLOCKED_MARKER: &str = "[task-blocked]";

/// What the agent's reply says should happen to the task next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Task is finished; move it to `Done`.
    Complete,
    /// Keep working; requeue with a short cooldown.
    Continue,
    /// Stuck on something external; requeue with a long cooldown.
    Blocked,
}

/// Classify an agent reply by case-insensitive substring search.
///
/// Precedence: complete, then blocked, then continue. A reply with no
/// recognized marker classifies as [`RunOutcome::Continue`], so an unmarked
/// reply is treated as "keep working" rather than dropped or prematurely
/// marked done.
pub fn classify_outcome(text: &str) -> RunOutcome {
    let lower = text.to_lowercase();
    if lower.contains(COMPLETE_MARKER) {
        return RunOutcome::Complete;
    }
    if lower.contains(BLOCKED_MARKER) {
        return RunOutcome::Blocked;
    }
    if lower.contains(CONTINUE_MARKER) {
        return RunOutcome::Continue;
    }
    RunOutcome::Continue
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_marker() {
        assert_eq!(
            classify_outcome("All done.\n[task-complete]"),
            RunOutcome::Complete
        );
    }

    #[test]
    fn test_complete_is_case_insensitive() {
        assert_eq!(classify_outcome("[TASK-COMPLETE]"), RunOutcome::Complete);
    }

    #[test]
    fn test_complete_wins_over_later_markers() {
        let text = "report [task-complete] but also [task-blocked] mentioned";
        assert_eq!(classify_outcome(text), RunOutcome::Complete);
    }

    #[test]
    fn test_blocked_beats_continue() {
        let text = "[task-blocked] waiting on credentials [task-continue]";
        assert_eq!(classify_outcome(text), RunOutcome::Blocked);
    }

    #[test]
    fn test_continue_marker() {
        assert_eq!(
            classify_outcome("halfway there [task-continue]"),
            RunOutcome::Continue
        );
    }

    #[test]
    fn test_unrecognized_reply_defaults_to_continue() {
        assert_eq!(classify_outcome("I did some things."), RunOutcome::Continue);
        assert_eq!(classify_outcome(""), RunOutcome::Continue);
    }
}
