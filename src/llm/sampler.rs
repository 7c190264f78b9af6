//! Next-token selection.
//!
//! Candidate-list primitives follow the classic llama.cpp samplers and are
//! chained by [`TokenSampler`] into the reply policy: repetition penalty,
//! then greedy or top-k, top-p, temperature and a weighted draw.

use super::{GenerationEngine, Token};
use crate::config::SamplingConfig;
use crate::error::{Result, TalkError};
use rand::SeedableRng;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use std::collections::HashSet;

/// One vocabulary entry under consideration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenData {
    pub id: Token,
    pub logit: f32,
    pub p: f32,
}

/// Candidate list, optionally sorted by descending logit.
#[derive(Debug, Clone, Default)]
pub struct Candidates {
    data: Vec<TokenData>,
    sorted: bool,
}

impl Candidates {
    /// One candidate per vocabulary entry.
    pub fn from_logits(logits: &[f32]) -> Self {
        let data = logits
            .iter()
            .enumerate()
            .map(|(i, &logit)| TokenData {
                id: Token(i as i32),
                logit,
                p: 0.0,
            })
            .collect();
        Self {
            data,
            sorted: false,
        }
    }

    pub fn as_slice(&self) -> &[TokenData] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, id: Token) -> Option<&TokenData> {
        self.data.iter().find(|d| d.id == id)
    }

    pub fn set_logit(&mut self, id: Token, logit: f32) {
        if let Some(d) = self.data.iter_mut().find(|d| d.id == id) {
            d.logit = logit;
            self.sorted = false;
        }
    }

    fn sort_desc(&mut self) {
        if !self.sorted {
            self.data.sort_by(|a, b| b.logit.total_cmp(&a.logit));
            self.sorted = true;
        }
    }

    /// Penalize every candidate that occurs in `recent`.
    ///
    /// Positive logits are divided by `penalty`, the rest multiplied, so the
    /// candidate always becomes less likely.
    pub fn apply_repetition_penalty(&mut self, recent: &[Token], penalty: f32) {
        if recent.is_empty() || penalty == 1.0 {
            return;
        }
        let seen: HashSet<Token> = recent.iter().copied().collect();
        for d in &mut self.data {
            if seen.contains(&d.id) {
                if d.logit <= 0.0 {
                    d.logit *= penalty;
                } else {
                    d.logit /= penalty;
                }
            }
        }
        self.sorted = false;
    }

    /// Highest-logit candidate.
    pub fn greedy(&self) -> Option<Token> {
        self.data
            .iter()
            .max_by(|a, b| a.logit.total_cmp(&b.logit))
            .map(|d| d.id)
    }

    /// Keep the `k` best candidates, but never fewer than `min_keep`.
    pub fn top_k(&mut self, k: usize, min_keep: usize) {
        let k = if k == 0 { self.data.len() } else { k };
        let k = k.max(min_keep).min(self.data.len());
        self.sort_desc();
        self.data.truncate(k);
    }

    /// Sort and fill in normalized probabilities.
    pub fn softmax(&mut self) {
        self.sort_desc();
        let Some(max) = self.data.first().map(|d| d.logit) else {
            return;
        };
        let mut sum = 0.0;
        for d in &mut self.data {
            d.p = (d.logit - max).exp();
            sum += d.p;
        }
        for d in &mut self.data {
            d.p /= sum;
        }
    }

    /// Keep the smallest prefix whose cumulative probability reaches `p`.
    pub fn top_p(&mut self, p: f32, min_keep: usize) {
        if p >= 1.0 {
            return;
        }
        self.softmax();
        let mut cum = 0.0;
        let mut last = self.data.len();
        for (i, d) in self.data.iter().enumerate() {
            cum += d.p;
            if cum >= p && i + 1 >= min_keep {
                last = i + 1;
                break;
            }
        }
        self.data.truncate(last);
    }

    pub fn temperature(&mut self, temp: f32) {
        for d in &mut self.data {
            d.logit /= temp;
        }
    }

    /// Draw a candidate in proportion to its probability.
    pub fn draw(&mut self, rng: &mut StdRng) -> Result<Token> {
        self.softmax();
        let dist = WeightedIndex::new(self.data.iter().map(|d| d.p))
            .map_err(|e| TalkError::Engine(format!("cannot sample from candidates: {e}")))?;
        Ok(self.data[dist.sample(rng)].id)
    }
}

/// Whether `token` ends the assistant's turn.
pub fn is_turn_end<E: GenerationEngine + ?Sized>(engine: &E, token: Token) -> bool {
    engine.is_end_of_generation(token) || token == engine.newline_token()
}

/// Seeded sampler applying the reply policy.
#[derive(Debug, Clone)]
pub struct TokenSampler {
    config: SamplingConfig,
    rng: StdRng,
}

impl TokenSampler {
    pub fn new(config: SamplingConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    /// Candidates after every filter except the final draw.
    ///
    /// Every token in `recent` is penalized; callers pass the trailing
    /// `repeat_last_n` tokens of the history.
    pub fn distribution<E: GenerationEngine + ?Sized>(
        &self,
        engine: &E,
        recent: &[Token],
    ) -> Result<Candidates> {
        let logits = engine.logits();
        if logits.is_empty() {
            return Err(TalkError::Engine("no logits available".into()));
        }
        let mut candidates = Candidates::from_logits(logits);
        candidates.set_logit(engine.eos_token(), 0.0);

        let nl = engine.newline_token();
        let nl_logit = candidates.get(nl).map(|d| d.logit);
        candidates.apply_repetition_penalty(recent, self.config.repeat_penalty);
        if let Some(logit) = nl_logit {
            candidates.set_logit(nl, logit);
        }

        if self.config.temperature > 0.0 {
            candidates.top_k(self.config.top_k, 1);
            candidates.top_p(self.config.top_p, 1);
            candidates.temperature(self.config.temperature);
            candidates.softmax();
        }
        Ok(candidates)
    }

    /// Pick the next token.
    ///
    /// # Errors
    ///
    /// Fails when the engine exposes no logits.
    pub fn sample<E: GenerationEngine + ?Sized>(&mut self, engine: &E, recent: &[Token]) -> Result<Token> {
        let mut candidates = self.distribution(engine, recent)?;
        if self.config.temperature <= 0.0 {
            return candidates
                .greedy()
                .ok_or_else(|| TalkError::Engine("empty candidate list".into()));
        }
        candidates.draw(&mut self.rng)
    }
}
