//! Evolutionary search.
//!
//! Individuals pair a filter-selection bitmask with a parameter vector.
//! Survival is elitist, parents come from tournament selection, crossover is
//! single-point on the mask and an arithmetic blend on parameters, mutation
//! flips bits and perturbs parameters with Gaussian noise. A repair step
//! keeps every individual inside the allowed filter count range.

use std::collections::BTreeMap;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use tracing::{debug, info};

use crate::config::SearchConfig;
use crate::domain::errors::SearchError;
use crate::domain::filters::FilterCandidate;

use super::{
    Objective, OptimizationResult, ParamRange, SearchSpace, SearchStrategy, TrialLog, run_trial,
};

/// Gaussian mutation standard deviation as a share of the parameter span.
const MUTATION_SPAN_FRACTION: f64 = 0.1;

pub struct GeneticOptimizer {
    config: SearchConfig,
    target: String,
}

#[derive(Debug, Clone)]
struct Individual {
    mask: Vec<bool>,
    /// Values aligned with the space's parameter names in sorted order.
    params: Vec<f64>,
}

impl Individual {
    fn selected(&self, candidates: &[FilterCandidate]) -> Vec<FilterCandidate> {
        self.mask
            .iter()
            .zip(candidates)
            .filter(|(on, _)| **on)
            .map(|(_, c)| c.clone())
            .collect()
    }

    fn assignment(&self, names: &[String]) -> BTreeMap<String, f64> {
        names
            .iter()
            .cloned()
            .zip(self.params.iter().copied())
            .collect()
    }
}

impl GeneticOptimizer {
    pub fn new(config: SearchConfig, target: &str) -> Self {
        Self {
            config,
            target: target.to_string(),
        }
    }

    fn evaluate(
        &self,
        individual: &Individual,
        candidates: &[FilterCandidate],
        names: &[String],
        log: &mut TrialLog,
        objective: &mut Objective<'_>,
    ) -> f64 {
        let selected = individual.selected(candidates);
        run_trial(
            log,
            &selected,
            individual.assignment(names),
            &self.target,
            objective,
        )
    }
}

impl SearchStrategy for GeneticOptimizer {
    fn name(&self) -> &'static str {
        "genetic"
    }

    fn optimize(
        &mut self,
        candidates: &[FilterCandidate],
        space: &SearchSpace,
        baseline: Option<f64>,
        objective: &mut Objective<'_>,
    ) -> Result<OptimizationResult, SearchError> {
        space.validate(candidates.len())?;
        let started = Instant::now();
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        let pool = candidates.len();
        let min = space.min_filters;
        let max = space.effective_max(pool);
        let names: Vec<String> = space.parameters.keys().cloned().collect();
        let ranges: Vec<ParamRange> = space.parameters.values().copied().collect();

        info!(
            population = self.config.population,
            generations = self.config.generations,
            pool,
            "starting genetic search"
        );

        let mut log = TrialLog::new();
        let mut population: Vec<(Individual, f64)> = Vec::with_capacity(self.config.population);
        for _ in 0..self.config.population {
            let individual = random_individual(&mut rng, pool, min, max, &ranges);
            let score = self.evaluate(&individual, candidates, &names, &mut log, objective);
            population.push((individual, score));
        }
        sort_by_fitness(&mut population);

        let mut stale_generations = 0usize;
        for generation in 0..self.config.generations {
            let best_before = log.best_score();

            let mut next: Vec<(Individual, f64)> =
                population.iter().take(self.config.elite).cloned().collect();
            while next.len() < self.config.population {
                let a = tournament_pick(&population, self.config.tournament, &mut rng);
                let b = tournament_pick(&population, self.config.tournament, &mut rng);
                let mut child = if rng.gen_bool(self.config.crossover_rate) {
                    crossover(&population[a].0, &population[b].0, &mut rng)
                } else {
                    population[a].0.clone()
                };
                mutate(&mut child, self.config.mutation_rate, &ranges, &mut rng);
                repair(&mut child, min, max, &mut rng);
                let score = self.evaluate(&child, candidates, &names, &mut log, objective);
                next.push((child, score));
            }
            sort_by_fitness(&mut next);
            population = next;

            if log.best_score() > best_before {
                stale_generations = 0;
            } else {
                stale_generations += 1;
                if self.config.stagnation_limit > 0
                    && stale_generations >= self.config.stagnation_limit
                {
                    debug!(
                        generation,
                        stale = stale_generations,
                        "genetic early stop, no recent improvement"
                    );
                    break;
                }
            }
        }

        Ok(log.finish(self.name(), baseline, started))
    }
}

fn random_individual(
    rng: &mut StdRng,
    pool: usize,
    min: usize,
    max: usize,
    ranges: &[ParamRange],
) -> Individual {
    let count = rng.gen_range(min..=max);
    let mut mask = vec![false; pool];
    let mut indices: Vec<usize> = (0..pool).collect();
    indices.shuffle(rng);
    for &i in indices.iter().take(count) {
        mask[i] = true;
    }
    let params = ranges.iter().map(|r| sample_in(rng, r)).collect();
    Individual { mask, params }
}

fn sample_in(rng: &mut StdRng, range: &ParamRange) -> f64 {
    if range.span() <= f64::EPSILON {
        range.min
    } else {
        rng.gen_range(range.min..=range.max)
    }
}

/// Index of the fittest of `size` randomly drawn members.
fn tournament_pick(population: &[(Individual, f64)], size: usize, rng: &mut StdRng) -> usize {
    let mut best = rng.gen_range(0..population.len());
    for _ in 1..size {
        let contender = rng.gen_range(0..population.len());
        if population[contender].1 > population[best].1 {
            best = contender;
        }
    }
    best
}

/// Single-point crossover on the mask, arithmetic blend on parameters.
fn crossover(a: &Individual, b: &Individual, rng: &mut StdRng) -> Individual {
    let len = a.mask.len();
    let mask: Vec<bool> = if len >= 2 {
        let point = rng.gen_range(1..len);
        a.mask[..point]
            .iter()
            .chain(&b.mask[point..])
            .copied()
            .collect()
    } else {
        a.mask.clone()
    };
    let alpha: f64 = rng.gen_range(0.0..=1.0);
    let params = a
        .params
        .iter()
        .zip(&b.params)
        .map(|(x, y)| alpha * x + (1.0 - alpha) * y)
        .collect();
    Individual { mask, params }
}

fn mutate(individual: &mut Individual, rate: f64, ranges: &[ParamRange], rng: &mut StdRng) {
    for bit in individual.mask.iter_mut() {
        if rng.gen_bool(rate) {
            *bit = !*bit;
        }
    }
    for (value, range) in individual.params.iter_mut().zip(ranges) {
        if rng.gen_bool(rate) {
            let sd = MUTATION_SPAN_FRACTION * range.span();
            if let Ok(noise) = Normal::new(0.0, sd) {
                *value = range.clamp(*value + noise.sample(rng));
            }
        }
    }
}

/// Forces the selection count back into `min..=max` after mutation.
fn repair(individual: &mut Individual, min: usize, max: usize, rng: &mut StdRng) {
    let mut on: Vec<usize> = Vec::new();
    let mut off: Vec<usize> = Vec::new();
    for (i, bit) in individual.mask.iter().enumerate() {
        if *bit {
            on.push(i);
        } else {
            off.push(i);
        }
    }
    while on.len() > max {
        let pick = rng.gen_range(0..on.len());
        let idx = on.swap_remove(pick);
        individual.mask[idx] = false;
        off.push(idx);
    }
    while on.len() < min && !off.is_empty() {
        let pick = rng.gen_range(0..off.len());
        let idx = off.swap_remove(pick);
        individual.mask[idx] = true;
        on.push(idx);
    }
}

fn sort_by_fitness(population: &mut [(Individual, f64)]) {
    population.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
}
