//! Port selection and the DOS state transitions of the availability probe

use std::collections::BTreeSet;

use rand::seq::IteratorRandom;
use rand::Rng;

use crate::state::DosState;

/// Failing ports remembered at most
pub const FAILING_SET_CAP: usize = 100;
/// A success only shrinks the failing set while it holds more than this
pub const HYSTERESIS_FLOOR: usize = 80;
pub const SCORE_STEP: u32 = 4;
pub const MAX_SCORE: u32 = 100;

/// Result of asking a peer to connect back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Reachable,
    Unreachable,
}

/// What the probe should wait for before its next run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Probe again soon
    Retry,
    /// Node looks healthy
    Healthy,
    /// Node declared itself unreachable
    Dos,
}

pub fn dos_message(failing: &BTreeSet<u16>) -> String {
    let ports: Vec<u16> = failing.iter().copied().collect();
    format!(
        "Ports tested not reachable from outside, DMZ or UPNP required! All ports that have failed: {:?}",
        ports
    )
}

/// Probe port state: the failing set and the next port to test
#[derive(Debug, Clone)]
pub struct PortSweep {
    min: u16,
    max: u16,
    failing: BTreeSet<u16>,
    next: Option<u16>,
}

impl PortSweep {
    pub fn new(min: u16, max: u16) -> Self {
        Self {
            min,
            max,
            failing: BTreeSet::new(),
            next: None,
        }
    }

    pub fn failing(&self) -> &BTreeSet<u16> {
        &self.failing
    }

    pub fn pending(&self) -> Option<u16> {
        self.next
    }

    /// Next port to test: the pending one, or a uniform draw from the range.
    /// The pending port stays in place until an outcome or a skip is applied.
    pub fn choose_port(&self) -> u16 {
        match self.next {
            Some(port) => port,
            None => rand::rng().random_range(self.min..=self.max),
        }
    }

    /// `port` could not be probed; move a pending sweep past it
    pub fn skip(&mut self, port: u16) {
        if self.next != Some(port) {
            return;
        }
        self.next = if self.failing.len() >= FAILING_SET_CAP {
            self.failing
                .iter()
                .copied()
                .filter(|p| *p != port)
                .choose(&mut rand::rng())
                .or(Some(port))
        } else {
            Some(self.step(port))
        };
    }

    /// Port after `port`, wrapping at the range bounds
    fn step(&self, port: u16) -> u16 {
        if port >= self.max || port < self.min {
            self.min
        } else {
            port + 1
        }
    }

    fn random_failing(&self) -> Option<u16> {
        self.failing.iter().copied().choose(&mut rand::rng())
    }

    /// Apply one probe outcome for `port` to the sweep and the DOS state
    pub fn apply(&mut self, port: u16, outcome: ProbeOutcome, dos: &mut DosState) -> Verdict {
        match outcome {
            ProbeOutcome::Unreachable if self.failing.len() < FAILING_SET_CAP => {
                self.failing.insert(port);
                self.next = Some(self.step(port));
                Verdict::Retry
            }
            ProbeOutcome::Unreachable if dos.score < MAX_SCORE => {
                dos.score = (dos.score + SCORE_STEP).min(MAX_SCORE);
                self.next = self.random_failing();
                Verdict::Retry
            }
            ProbeOutcome::Unreachable => {
                dos.message = Some(dos_message(&self.failing));
                self.next = self.random_failing();
                Verdict::Dos
            }
            ProbeOutcome::Reachable if self.failing.len() > HYSTERESIS_FLOOR => {
                self.failing.remove(&port);
                self.next = self.random_failing();
                Verdict::Retry
            }
            ProbeOutcome::Reachable => {
                self.failing.clear();
                self.next = None;
                dos.score = 0;
                dos.message = None;
                Verdict::Healthy
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_sweep() -> PortSweep {
        let mut sweep = PortSweep::new(31000, 39999);
        let mut dos = DosState::default();
        for port in 31000..31000 + FAILING_SET_CAP as u16 {
            assert_eq!(sweep.apply(port, ProbeOutcome::Unreachable, &mut dos), Verdict::Retry);
        }
        assert_eq!(dos.score, 0);
        sweep
    }

    #[test]
    fn test_failure_continues_sweep() {
        let mut sweep = PortSweep::new(31000, 39999);
        let mut dos = DosState::default();
        sweep.apply(31500, ProbeOutcome::Unreachable, &mut dos);
        assert_eq!(sweep.choose_port(), 31501);
        assert!(sweep.failing().contains(&31500));
        // choosing alone does not consume the pending port
        assert_eq!(sweep.pending(), Some(31501));
    }

    #[test]
    fn test_skip_steps_past_pending_port() {
        let mut sweep = PortSweep::new(31000, 31010);
        let mut dos = DosState::default();
        sweep.apply(31004, ProbeOutcome::Unreachable, &mut dos);

        sweep.skip(31005);
        assert_eq!(sweep.pending(), Some(31006));
        sweep.skip(31010);
        assert_eq!(sweep.pending(), Some(31006));
        assert_eq!(sweep.failing().len(), 1);
    }

    #[test]
    fn test_skip_without_sweep_keeps_random_draw() {
        let mut sweep = PortSweep::new(31000, 31010);
        sweep.skip(31003);
        assert!(sweep.pending().is_none());
    }

    #[test]
    fn test_skip_in_full_set_picks_another_failing_port() {
        let mut sweep = full_sweep();
        let mut dos = DosState::default();
        sweep.apply(31000, ProbeOutcome::Unreachable, &mut dos);
        let pending = sweep.pending().unwrap();

        sweep.skip(pending);
        let next = sweep.pending().unwrap();
        assert_ne!(next, pending);
        assert!(sweep.failing().contains(&next));
    }

    #[test]
    fn test_sweep_wraps_at_range_end() {
        let mut sweep = PortSweep::new(31000, 39999);
        let mut dos = DosState::default();
        sweep.apply(39999, ProbeOutcome::Unreachable, &mut dos);
        assert_eq!(sweep.pending(), Some(31000));
    }

    #[test]
    fn test_full_set_raises_score_then_declares_dos() {
        let mut sweep = full_sweep();
        let mut dos = DosState::default();

        for round in 1..=25 {
            assert_eq!(sweep.apply(31000, ProbeOutcome::Unreachable, &mut dos), Verdict::Retry);
            assert_eq!(dos.score, round * SCORE_STEP);
            assert!(sweep.failing().contains(&sweep.pending().unwrap()));
        }
        assert!(dos.message.is_none());

        assert_eq!(sweep.apply(31000, ProbeOutcome::Unreachable, &mut dos), Verdict::Dos);
        let message = dos.message.clone().unwrap();
        assert!(message.starts_with("Ports tested not reachable from outside"));
        assert!(message.contains("31099"));
        assert_eq!(sweep.failing().len(), FAILING_SET_CAP);
    }

    #[test]
    fn test_success_hysteresis() {
        let mut sweep = full_sweep();
        let mut dos = DosState {
            score: 40,
            ..Default::default()
        };

        // successes above the floor only shrink the set
        for port in 31000..31020 {
            assert_eq!(sweep.apply(port, ProbeOutcome::Reachable, &mut dos), Verdict::Retry);
        }
        assert_eq!(sweep.failing().len(), HYSTERESIS_FLOOR);
        assert_eq!(dos.score, 40);

        // at the floor a success clears everything
        assert_eq!(sweep.apply(31050, ProbeOutcome::Reachable, &mut dos), Verdict::Healthy);
        assert!(sweep.failing().is_empty());
        assert_eq!(dos.score, 0);
        assert!(sweep.pending().is_none());
    }

    #[test]
    fn test_success_clears_dos_message() {
        let mut sweep = PortSweep::new(31000, 39999);
        let mut dos = DosState {
            score: 100,
            message: Some("down".to_string()),
            ..Default::default()
        };
        assert_eq!(sweep.apply(31000, ProbeOutcome::Reachable, &mut dos), Verdict::Healthy);
        assert!(dos.message.is_none());
    }

    #[test]
    fn test_random_draw_in_range() {
        let sweep = PortSweep::new(31000, 31010);
        for _ in 0..50 {
            let port = sweep.choose_port();
            assert!((31000..=31010).contains(&port));
        }
    }
}
