//! Persistence layer (§4.6): snapshot codec plus append-only log, and the
//! background-save/rewrite bookkeeping the cron drives.

pub mod aol;
pub mod snapshot;

use std::path::PathBuf;

/// Mirrors spec's "the writer forks" background save: since this engine is
/// single-process (no fork — see SPEC_FULL.md §1.1), the write itself
/// happens synchronously inside `start`'s caller, but `running` only flips
/// back to `false` once `reap` is called from the cron, not the moment the
/// write returns. That keeps the parent-visible state machine (§4.6,
/// §4.4.6/.7) honest: a second `BGSAVE` issued before the next cron tick
/// still observes `running == true` and is rejected, the same as it would
/// be while waiting on a real child's `waitpid`.
pub struct BackgroundSave {
    pub running: bool,
    pub started_at: i64,
    pub target_path: PathBuf,
    pending_result: Option<Result<(), String>>,
}

impl BackgroundSave {
    pub fn idle(target_path: PathBuf) -> Self {
        Self {
            running: false,
            started_at: 0,
            target_path,
            pending_result: None,
        }
    }

    pub fn start(&mut self, now: i64) {
        self.running = true;
        self.started_at = now;
        self.pending_result = None;
    }

    /// Records the outcome of the save; `running` does not drop yet.
    pub fn complete(&mut self, result: Result<(), String>) {
        self.pending_result = Some(result);
    }

    /// Cron step 6, "reap background save / AOL-rewrite children via
    /// non-blocking wait": returns the recorded outcome (if any) and only
    /// now clears `running`.
    pub fn reap(&mut self) -> Option<Result<(), String>> {
        if self.pending_result.is_some() {
            self.running = false;
        }
        self.pending_result.take()
    }
}

/// Evaluates the configured `save <seconds> <changes>` rules against the
/// dirty counter and time since last save (§4.4.7).
pub fn should_trigger_save(rules: &[(u64, u64)], seconds_since_save: u64, dirty: u64) -> bool {
    rules.iter().any(|&(s, c)| seconds_since_save >= s && dirty >= c)
}

/// Replays an AOL byte stream through the protocol parser, handing each
/// framed request to `apply`. A zero-length log is "nothing to do" (§4.6
/// "Replay"). `apply` is expected to come from the command dispatcher,
/// invoked through a reply-discarding fake client per §4.6/§5.
pub fn replay<F: FnMut(Vec<Vec<u8>>)>(bytes: &[u8], mut apply: F) {
    if bytes.is_empty() {
        return;
    }
    let mut parser = crate::protocol::RequestParser::new();
    parser.feed(bytes);
    loop {
        match parser.try_parse(|_| false) {
            crate::protocol::ParseOutcome::Complete { argv } => {
                if argv.is_empty() {
                    continue;
                }
                apply(argv);
            }
            crate::protocol::ParseOutcome::NeedMoreData => break,
            crate::protocol::ParseOutcome::ProtocolError(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_rule_triggers_once_either_threshold_clears() {
        let rules = vec![(900, 1), (300, 10), (60, 10_000)];
        assert!(should_trigger_save(&rules, 900, 1));
        assert!(should_trigger_save(&rules, 60, 10_000));
        assert!(!should_trigger_save(&rules, 10, 5));
    }

    #[test]
    fn replay_feeds_every_framed_command_to_apply() {
        let encoded = crate::protocol::encode_multibulk_command(&[b"SET".to_vec(), b"a".to_vec(), b"1".to_vec()]);
        let mut seen = Vec::new();
        replay(&encoded, |argv| seen.push(argv));
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0][0], b"SET");
    }

    #[test]
    fn empty_log_replays_nothing() {
        let mut seen = 0;
        replay(&[], |_| seen += 1);
        assert_eq!(seen, 0);
    }

    #[test]
    fn running_flag_survives_until_reaped() {
        let mut save = BackgroundSave::idle(PathBuf::from("dump.rdb"));
        save.start(100);
        assert!(save.running);
        save.complete(Ok(()));
        assert!(save.running, "still running until the cron reaps it");
        let outcome = save.reap();
        assert!(outcome.unwrap().is_ok());
        assert!(!save.running);
        assert!(save.reap().is_none());
    }
}
