//! The impaired link: a frame queue with seeded loss, duplication, and
//! adjacent-swap reordering.

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

/// One protocol frame in flight: header word plus optional payload.
pub type Frame = (u32, Option<Bytes>);

/// Impairment probabilities, all 0.0..=1.0, applied per frame.
#[derive(Debug, Clone, Copy)]
pub struct ImpairmentConfig {
    pub loss: f64,
    pub duplicate: f64,
    /// Probability that a surviving frame swaps places with the frame
    /// queued just before it.
    pub reorder: f64,
    pub seed: u64,
}

impl ImpairmentConfig {
    /// A clean link.
    pub fn lossless(seed: u64) -> Self {
        ImpairmentConfig {
            loss: 0.0,
            duplicate: 0.0,
            reorder: 0.0,
            seed,
        }
    }

    /// Uniform loss only.
    pub fn lossy(loss: f64, seed: u64) -> Self {
        ImpairmentConfig {
            loss,
            duplicate: 0.0,
            reorder: 0.0,
            seed,
        }
    }
}

/// A unidirectional frame pipe with impairment applied on push.
pub struct ImpairedLink {
    config: ImpairmentConfig,
    rng: StdRng,
    queue: VecDeque<Frame>,
    /// Frames swallowed by the loss dice.
    pub dropped: u64,
    /// Extra copies injected by the duplication dice.
    pub duplicated: u64,
    /// Adjacent swaps performed.
    pub reordered: u64,
}

impl ImpairedLink {
    pub fn new(config: ImpairmentConfig) -> Self {
        ImpairedLink {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            queue: VecDeque::new(),
            dropped: 0,
            duplicated: 0,
            reordered: 0,
        }
    }

    /// Offer one frame to the link.
    pub fn push(&mut self, frame: Frame) {
        if self.config.loss > 0.0 && self.rng.gen_bool(self.config.loss) {
            self.dropped += 1;
            return;
        }
        if self.config.duplicate > 0.0 && self.rng.gen_bool(self.config.duplicate) {
            self.queue.push_back(frame.clone());
            self.duplicated += 1;
        }
        self.queue.push_back(frame);
        if self.config.reorder > 0.0
            && self.queue.len() >= 2
            && self.rng.gen_bool(self.config.reorder)
        {
            let last = self.queue.len() - 1;
            self.queue.swap(last, last - 1);
            self.reordered += 1;
        }
    }

    /// Take every frame currently on the link, arrival order.
    pub fn drain(&mut self) -> Vec<Frame> {
        self.queue.drain(..).collect()
    }

    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }
}
