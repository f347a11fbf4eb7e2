//! Cell agents and the pool that owns them.
//!
//! Hazard outcomes are marked in parallel into a separate fate buffer and
//! applied serially at the end of the step, so parallel evaluation never
//! observes in-progress writes and results are independent of partitioning.

use crate::rng::{stream_rng, JITTER_STREAM_BIT};
use cellsim_common::CellLineParams;
use rand::prelude::*;
use rand_distr::Normal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Forward-only viability ladder: Alive -> Dying -> Dead, never reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViabilityState {
    Alive,
    Dying,
    Dead,
}

/// A single cell agent. `id` is unique for the run and never reused.
#[allow(non_snake_case)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellAgent {
    pub id: u64,
    pub parent_id: Option<u64>,
    pub params: CellLineParams,
    /// Progress through the division cycle, within [0, phase_duration].
    pub cycle_progress_hr: f64,
    pub state: ViabilityState,
    /// Integral of drug concentration over this agent's alive time (uM * hr).
    pub cumulative_drug_exposure_uM_hr: f64,
}

/// Outcome sampled for one agent in one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CellFate {
    #[default]
    Unchanged,
    Dies,
    Divides,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PopulationCounts {
    pub total: u64,
    pub viable: u64,
    pub dying: u64,
    pub dead: u64,
}

/// Deaths and divisions applied in one step, for the conservation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepDelta {
    pub deaths: u64,
    pub divisions: u64,
}

/// Owns every agent of a run plus the per-step fate buffer.
///
/// No other component holds a mutable reference into the pool; the engine
/// drives `mark_fates` / `apply_fates` once per step.
pub struct AgentPool {
    agents: Vec<CellAgent>,
    fates: Vec<CellFate>,
    next_id: u64,
}

impl AgentPool {
    /// Seeds the initial population with identical baseline parameters.
    pub fn seed(count: u32, params: CellLineParams) -> Self {
        let agents: Vec<CellAgent> = (0..count as u64)
            .map(|id| CellAgent {
                id,
                parent_id: None,
                params,
                cycle_progress_hr: 0.0,
                state: ViabilityState::Alive,
                cumulative_drug_exposure_uM_hr: 0.0,
            })
            .collect();
        let fates = vec![CellFate::Unchanged; agents.len()];
        Self {
            agents,
            fates,
            next_id: count as u64,
        }
    }

    pub fn agents(&self) -> &[CellAgent] {
        &self.agents
    }

    pub fn counts(&self) -> PopulationCounts {
        let mut counts = PopulationCounts {
            total: self.agents.len() as u64,
            ..PopulationCounts::default()
        };
        for agent in &self.agents {
            match agent.state {
                ViabilityState::Alive => counts.viable += 1,
                ViabilityState::Dying => counts.dying += 1,
                ViabilityState::Dead => counts.dead += 1,
            }
        }
        counts
    }

    pub fn alive_count(&self) -> u64 {
        self.agents
            .iter()
            .filter(|agent| agent.state == ViabilityState::Alive)
            .count() as u64
    }

    /// Marks a fate for every agent in parallel. Only `Alive` agents are
    /// evaluated; everything else stays `Unchanged`. The rayon join is the
    /// barrier between sampling and application.
    pub(crate) fn mark_fates<F>(&mut self, decide: F)
    where
        F: Fn(&CellAgent) -> CellFate + Sync,
    {
        self.fates.resize(self.agents.len(), CellFate::Unchanged);
        self.fates
            .par_iter_mut()
            .zip(self.agents.par_iter())
            .for_each(|(fate, agent)| {
                *fate = if agent.state == ViabilityState::Alive {
                    decide(agent)
                } else {
                    CellFate::Unchanged
                };
            });
    }

    /// Applies the marked fates serially, in id order.
    ///
    /// Agents already `Dying` advance to `Dead` first; death takes priority
    /// over division by construction (a `Dies` fate excludes `Divides`).
    /// Children are appended after all existing agents are processed and
    /// are not hazard-evaluated until the next step.
    pub(crate) fn apply_fates(
        &mut self,
        seed: u64,
        step: u64,
        dt_hours: f64,
        mean_concentration: f64,
        jitter_frac: f64,
    ) -> StepDelta {
        let existing = self.agents.len();
        let mut delta = StepDelta::default();
        let mut dividing: Vec<(u64, CellLineParams)> = Vec::new();

        for idx in 0..existing {
            let fate = self.fates[idx];
            let agent = &mut self.agents[idx];
            match agent.state {
                ViabilityState::Dead => {}
                ViabilityState::Dying => agent.state = ViabilityState::Dead,
                ViabilityState::Alive => {
                    agent.cumulative_drug_exposure_uM_hr += mean_concentration * dt_hours;
                    match fate {
                        CellFate::Dies => {
                            agent.state = ViabilityState::Dying;
                            delta.deaths += 1;
                        }
                        CellFate::Divides => {
                            delta.divisions += 1;
                            agent.cycle_progress_hr = 0.0;
                            dividing.push((agent.id, agent.params));
                        }
                        CellFate::Unchanged => {
                            agent.cycle_progress_hr = (agent.cycle_progress_hr + dt_hours)
                                .min(agent.params.phase_duration_hr);
                        }
                    }
                }
            }
        }

        for (parent_id, base) in dividing {
            let mut rng = stream_rng(seed, step, parent_id | JITTER_STREAM_BIT);
            let params = inherit_params(base, jitter_frac, &mut rng);
            let id = self.next_id;
            self.next_id += 1;
            self.agents.push(CellAgent {
                id,
                parent_id: Some(parent_id),
                params,
                cycle_progress_hr: 0.0,
                state: ViabilityState::Alive,
                cumulative_drug_exposure_uM_hr: 0.0,
            });
        }

        delta
    }
}

/// Inherited parameters with small seeded relative jitter, clamped away
/// from zero and negatives.
fn inherit_params(base: CellLineParams, jitter_frac: f64, rng: &mut StdRng) -> CellLineParams {
    if jitter_frac <= 0.0 {
        return base;
    }
    let dist = match Normal::new(0.0, jitter_frac) {
        Ok(dist) => dist,
        Err(_) => return base,
    };
    let scaled = |value: f64, z: f64| (value * (1.0 + z)).max(value * 0.1);
    CellLineParams {
        division_rate_per_hr: scaled(base.division_rate_per_hr, rng.sample(dist)),
        death_rate_per_hr: scaled(base.death_rate_per_hr, rng.sample(dist)),
        phase_duration_hr: scaled(base.phase_duration_hr, rng.sample(dist)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellsim_common::CellLine;

    fn pool(count: u32) -> AgentPool {
        AgentPool::seed(count, CellLine::Hela.baseline())
    }

    #[test]
    fn seeded_pool_is_fully_viable() {
        let pool = pool(50);
        let counts = pool.counts();
        assert_eq!(counts.total, 50);
        assert_eq!(counts.viable, 50);
        assert_eq!(counts.dying, 0);
        assert_eq!(counts.dead, 0);
        assert_eq!(pool.agents()[49].id, 49);
    }

    #[test]
    fn death_advances_through_dying_to_dead() {
        let mut pool = pool(1);
        pool.mark_fates(|_| CellFate::Dies);
        let delta = pool.apply_fates(42, 1, 24.0, 0.0, 0.0);
        assert_eq!(delta.deaths, 1);
        assert_eq!(pool.agents()[0].state, ViabilityState::Dying);

        pool.mark_fates(|_| CellFate::Divides);
        let delta = pool.apply_fates(42, 2, 24.0, 0.0, 0.0);
        // a dying agent is never evaluated, so no division happens
        assert_eq!(delta.divisions, 0);
        assert_eq!(pool.agents()[0].state, ViabilityState::Dead);
    }

    #[test]
    fn division_appends_children_with_fresh_ids() {
        let mut pool = pool(3);
        pool.mark_fates(|_| CellFate::Divides);
        let delta = pool.apply_fates(42, 1, 24.0, 0.0, 0.05);
        assert_eq!(delta.divisions, 3);
        let counts = pool.counts();
        assert_eq!(counts.total, 6);
        assert_eq!(counts.viable, 6);
        let child = &pool.agents()[3];
        assert_eq!(child.id, 3);
        assert_eq!(child.parent_id, Some(0));
        assert_eq!(child.cycle_progress_hr, 0.0);
        assert!(child.params.division_rate_per_hr > 0.0);
    }

    #[test]
    fn cycle_progress_is_capped_at_phase_duration() {
        let mut pool = pool(1);
        for step in 1..10 {
            pool.mark_fates(|_| CellFate::Unchanged);
            pool.apply_fates(42, step, 24.0, 0.0, 0.0);
        }
        let agent = &pool.agents()[0];
        assert_eq!(agent.cycle_progress_hr, agent.params.phase_duration_hr);
    }

    #[test]
    fn exposure_accumulates_only_while_alive() {
        let mut pool = pool(1);
        pool.mark_fates(|_| CellFate::Unchanged);
        pool.apply_fates(42, 1, 24.0, 2.0, 0.0);
        assert_eq!(pool.agents()[0].cumulative_drug_exposure_uM_hr, 48.0);

        pool.mark_fates(|_| CellFate::Dies);
        pool.apply_fates(42, 2, 24.0, 2.0, 0.0);
        let exposure = pool.agents()[0].cumulative_drug_exposure_uM_hr;
        pool.mark_fates(|_| CellFate::Unchanged);
        pool.apply_fates(42, 3, 24.0, 2.0, 0.0);
        assert_eq!(pool.agents()[0].cumulative_drug_exposure_uM_hr, exposure);
    }

    #[test]
    fn inherited_jitter_is_deterministic() {
        let mut pool_a = pool(2);
        let mut pool_b = pool(2);
        for p in [&mut pool_a, &mut pool_b] {
            p.mark_fates(|_| CellFate::Divides);
            p.apply_fates(42, 1, 24.0, 0.0, 0.05);
        }
        assert_eq!(pool_a.agents(), pool_b.agents());
    }
}
