//! Process-wide memory of observed finalizer votes.
//!
//! Every vote that reaches the node (from blocks, the mempool or
//! commits) is recorded here; conflicting votes from the same finalizer
//! are surfaced as slashing events, to which the wallet subsystem
//! subscribes with a slash-transaction generator.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, trace};

use unite_primitives::buf::{Buf20, Buf32};
use unite_primitives::params::Epoch;
use unite_state::vote::{Vote, VoteRecord};

/// Receives detected slashable vote pairs.
pub trait SlashingListener: Send + Sync {
    fn slashing_condition_detected(&self, existing: &VoteRecord, offending: &VoteRecord);
}

#[derive(Default)]
struct RecorderInner {
    /// Per finalizer: target epoch → the first vote seen for it.
    votes: HashMap<Buf20, BTreeMap<Epoch, VoteRecord>>,
}

#[derive(Default)]
pub struct VoteRecorder {
    inner: Mutex<RecorderInner>,
    listeners: Mutex<Vec<Arc<dyn SlashingListener>>>,
}

impl VoteRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn SlashingListener>) {
        self.listeners.lock().push(listener);
    }

    /// Records a vote and checks it against every previously recorded
    /// vote by the same finalizer.
    ///
    /// An identical re-record is tolerated silently. A conflicting vote
    /// for an already-voted target never replaces the original record.
    /// Detected offences are reported to the listeners after the
    /// recorder lock has been released.
    pub fn record_vote(&self, vote: Vote, tx_hash: Buf32) {
        let record = VoteRecord { vote, tx_hash };
        let mut detected: Vec<(VoteRecord, VoteRecord)> = Vec::new();
        {
            let mut inner = self.inner.lock();
            let validator_votes = inner.votes.entry(vote.validator_address).or_default();

            for existing in validator_votes.values() {
                if existing.vote.is_slashable_with(&vote) {
                    detected.push((existing.clone(), record.clone()));
                }
            }

            validator_votes
                .entry(vote.target_epoch)
                .or_insert_with(|| record.clone());
        }

        trace!(validator = %vote.validator_address, target = vote.target_epoch, "recorded vote");
        if detected.is_empty() {
            return;
        }
        let listeners = self.listeners.lock().clone();
        for (existing, offending) in &detected {
            info!(
                validator = %vote.validator_address,
                "slashable vote pair detected"
            );
            for listener in &listeners {
                listener.slashing_condition_detected(existing, offending);
            }
        }
    }

    pub fn get_vote(&self, validator: &Buf20, target_epoch: Epoch) -> Option<VoteRecord> {
        self.inner
            .lock()
            .votes
            .get(validator)
            .and_then(|votes| votes.get(&target_epoch))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct CountingListener {
        detections: AtomicUsize,
    }

    impl SlashingListener for CountingListener {
        fn slashing_condition_detected(&self, existing: &VoteRecord, offending: &VoteRecord) {
            assert_eq!(
                existing.vote.validator_address,
                offending.vote.validator_address
            );
            self.detections.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn setup() -> (VoteRecorder, Arc<CountingListener>) {
        let recorder = VoteRecorder::new();
        let listener = Arc::new(CountingListener::default());
        recorder.subscribe(listener.clone());
        (recorder, listener)
    }

    fn vote(addr: u8, source: Epoch, target: Epoch, hash: u8) -> Vote {
        Vote {
            validator_address: Buf20::new([addr; 20]),
            target_hash: Buf32::new([hash; 32]),
            source_epoch: source,
            target_epoch: target,
        }
    }

    fn tx(n: u8) -> Buf32 {
        Buf32::new([n; 32])
    }

    #[test]
    fn test_record_independent_votes() {
        let (recorder, listener) = setup();
        let ag = unite_test_utils::ArbitraryGenerator::new();
        let v1 = vote(1, 1, 2, 1);
        let v2 = vote(1, 2, 3, 2);

        recorder.record_vote(v1, ag.generate());
        assert_eq!(listener.detections.load(Ordering::SeqCst), 0);
        assert_eq!(
            recorder.get_vote(&v1.validator_address, 2).unwrap().vote,
            v1
        );

        recorder.record_vote(v2, ag.generate());
        assert_eq!(listener.detections.load(Ordering::SeqCst), 0);
        assert_eq!(
            recorder.get_vote(&v2.validator_address, 3).unwrap().vote,
            v2
        );

        // Recording the same vote again is tolerated.
        recorder.record_vote(v2, ag.generate());
        assert_eq!(listener.detections.load(Ordering::SeqCst), 0);

        // Almost-surrounding votes (same source) are fine.
        recorder.record_vote(vote(1, 3, 10, 4), ag.generate());
        recorder.record_vote(vote(1, 3, 9, 5), ag.generate());
        assert_eq!(listener.detections.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_double_vote_detected_once() {
        let (recorder, listener) = setup();
        let v1 = vote(1, 5, 10, 1);
        let v2 = vote(1, 7, 10, 2);

        recorder.record_vote(v1, tx(1));
        assert_eq!(listener.detections.load(Ordering::SeqCst), 0);
        recorder.record_vote(v2, tx(2));
        assert_eq!(listener.detections.load(Ordering::SeqCst), 1);
        // The original record survives.
        assert_eq!(
            recorder.get_vote(&v1.validator_address, 10).unwrap().vote,
            v1
        );
    }

    #[test]
    fn test_surround_detected_inner_second() {
        let (recorder, listener) = setup();
        recorder.record_vote(vote(1, 1, 10, 1), tx(1));
        recorder.record_vote(vote(1, 2, 9, 2), tx(2));
        assert_eq!(listener.detections.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_surround_detected_outer_second() {
        let (recorder, listener) = setup();
        recorder.record_vote(vote(1, 2, 9, 2), tx(1));
        recorder.record_vote(vote(1, 1, 10, 1), tx(2));
        assert_eq!(listener.detections.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_different_validators_never_conflict() {
        let (recorder, listener) = setup();
        recorder.record_vote(vote(1, 5, 10, 1), tx(1));
        recorder.record_vote(vote(2, 7, 10, 2), tx(2));
        assert_eq!(listener.detections.load(Ordering::SeqCst), 0);
    }
}
