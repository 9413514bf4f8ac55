use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct VotingConfig {
    /// A class fires once its hit count is strictly above this.
    #[serde(default = "default_threshold")]
    pub threshold: u32,
}

fn default_threshold() -> u32 { 20 }

impl Default for VotingConfig {
    fn default() -> Self {
        Self { threshold: default_threshold() }
    }
}

/// Debounces per-frame vote candidates into one "recognized" decision.
///
/// Counts persist across frames until a class fires or `reset` is called;
/// keys are never removed, only zeroed, and keep first-insertion order.
#[derive(Debug, Clone)]
pub struct VotingEngine {
    threshold: u32,
    counts: Vec<(String, u32)>,
}

impl VotingEngine {
    pub fn new(threshold: u32) -> Self {
        Self { threshold, counts: Vec::new() }
    }

    pub fn threshold(&self) -> u32 { self.threshold }

    pub fn observe(&mut self, class_name: Option<&str>) {
        let Some(name) = class_name else { return; };
        let key = name.to_lowercase();
        match self.counts.iter_mut().find(|(k, _)| *k == key) {
            Some((_, n)) => *n += 1,
            None => self.counts.push((key, 1)),
        }
    }

    /// Fire the leading class if it is over the threshold, resetting all counts.
    pub fn evaluate(&mut self) -> Option<String> {
        let mut best: Option<(usize, u32)> = None;
        for (i, (_, n)) in self.counts.iter().enumerate() {
            if best.map_or(true, |(_, b)| *n > b) {
                best = Some((i, *n));
            }
        }

        let (idx, n) = best?;
        if n <= self.threshold {
            return None;
        }
        let fired = self.counts[idx].0.clone();
        self.reset();
        Some(fired)
    }

    pub fn reset(&mut self) {
        for (_, n) in &mut self.counts {
            *n = 0;
        }
    }

    pub fn count(&self, class_name: &str) -> u32 {
        let key = class_name.to_lowercase();
        self.counts.iter().find(|(k, _)| *k == key).map_or(0, |(_, n)| *n)
    }

    pub fn counts(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        self.counts.iter().map(|(k, n)| (k.as_str(), *n))
    }
}
