use std::{cell::RefCell, path::Path, rc::Rc};

use anyhow::{Context, Result};
use cosim::{
    Bus, ConstructionError, ModelDescriptor, ModelError, ModelFactory, RunConfig, Scheduler,
    SteppedModel, Termination,
};
use serde::Deserialize;

/// Lifecycle events recorded by scripted models, in the order they happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Built(usize),
    /// `step` is the model's own 1-based step count.
    Step { id: usize, step: u64 },
    Finalize(usize),
    Release(usize),
}

/// Shared event log for one scenario.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    events: Rc<RefCell<Vec<Event>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: Event) {
        self.events.borrow_mut().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn finalize_order(&self) -> Vec<usize> {
        self.filter(|e| match e {
            Event::Finalize(id) => Some(*id),
            _ => None,
        })
    }

    pub fn release_order(&self) -> Vec<usize> {
        self.filter(|e| match e {
            Event::Release(id) => Some(*id),
            _ => None,
        })
    }

    pub fn built(&self) -> Vec<usize> {
        self.filter(|e| match e {
            Event::Built(id) => Some(*id),
            _ => None,
        })
    }

    /// Ids in the order they were stepped, across all rounds.
    pub fn step_order(&self) -> Vec<usize> {
        self.filter(|e| match e {
            Event::Step { id, .. } => Some(*id),
            _ => None,
        })
    }

    pub fn steps_of(&self, id: usize) -> u64 {
        self.step_order().iter().filter(|&&i| i == id).count() as u64
    }

    pub fn finalize_count(&self, id: usize) -> usize {
        self.finalize_order().iter().filter(|&&i| i == id).count()
    }

    fn filter(&self, f: impl Fn(&Event) -> Option<usize>) -> Vec<usize> {
        self.events.borrow().iter().filter_map(f).collect()
    }
}

/// Scripted model: records everything it is asked to do.
///
/// Script parameters (all optional):
/// - `done_from`: report done from this step on
/// - `done_at`: report done only right after this step (a one-tick pulse)
/// - `fail_step`: fail on this step
/// - `fail_finalize`: fail when finalized
pub struct ScriptedModel {
    id: usize,
    name: String,
    journal: Journal,
    steps: u64,
    done_from: Option<u64>,
    done_at: Option<u64>,
    fail_step: Option<u64>,
    fail_finalize: bool,
}

impl SteppedModel for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self) -> Result<(), ModelError> {
        let step = self.steps + 1;
        if Some(step) == self.fail_step {
            return Err(ModelError::fault(format!("script {} fault at step {step}", self.id)));
        }
        self.steps = step;
        self.journal.record(Event::Step { id: self.id, step });
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.done_from.is_some_and(|from| self.steps >= from)
            || self.done_at.is_some_and(|at| self.steps == at)
    }

    fn finalize(&mut self) -> Result<(), ModelError> {
        self.journal.record(Event::Finalize(self.id));
        if self.fail_finalize {
            return Err(ModelError::fault(format!("script {} flush failed", self.id)));
        }
        Ok(())
    }
}

impl Drop for ScriptedModel {
    fn drop(&mut self) {
        self.journal.record(Event::Release(self.id));
    }
}

/// Builds `script` models; `fail_construct: true` makes construction fail.
#[derive(Debug, Clone, Default)]
pub struct ScriptFactory {
    pub journal: Journal,
}

impl ScriptFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModelFactory for ScriptFactory {
    fn build(&self, descriptor: &ModelDescriptor) -> Result<Box<dyn SteppedModel>, ModelError> {
        if descriptor.kind != "script" {
            return Err(ModelError::UnknownKind(descriptor.kind.clone()));
        }
        let params = &descriptor.params;
        let id = params.require_u64("id")? as usize;
        if params.bool_or("fail_construct", false)? {
            return Err(ModelError::fault(format!("script {id} refused to build")));
        }
        self.journal.record(Event::Built(id));
        Ok(Box::new(ScriptedModel {
            id,
            name: descriptor.display_name().to_owned(),
            journal: self.journal.clone(),
            steps: 0,
            done_from: params.u64("done_from")?,
            done_at: params.u64("done_at")?,
            fail_step: params.u64("fail_step")?,
            fail_finalize: params.bool_or("fail_finalize", false)?,
        }))
    }
}

/// Descriptor for scripted model `id` with no script.
pub fn script(id: usize) -> ModelDescriptor {
    ModelDescriptor::new("script")
        .named(format!("script{id}"))
        .with_param("id", id as u64)
}

/// `count` unscripted models with ids `0..count`.
pub fn scripts(count: usize) -> Vec<ModelDescriptor> {
    (0..count).map(script).collect()
}

/// A run config plus what the run must produce, loaded from `cases/*.yaml`.
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct ConfigCase {
    pub run: RunConfig,
    pub expect: Expectation,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct Expectation {
    pub outcome: ExpectedOutcome,
    #[serde(default)]
    pub rounds: Option<u64>,
    #[serde(default)]
    pub finished_by: Option<Vec<usize>>,
    /// Index of the model whose construction must fail.
    #[serde(default)]
    pub failed_model: Option<usize>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedOutcome {
    Finished,
    RoundLimit,
    ConstructionError,
}

impl ConfigCase {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("Malformed case {}", path.display()))
    }

    /// A plain run config that must end through a model's stop condition.
    pub fn load_demo(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let run = RunConfig::from_yaml(&text)
            .with_context(|| format!("Malformed run config {}", path.display()))?;
        Ok(Self {
            run,
            expect: Expectation {
                outcome: ExpectedOutcome::Finished,
                rounds: None,
                finished_by: None,
                failed_model: None,
            },
        })
    }

    /// Run the case against the built-in models and check every expectation.
    pub fn check(&self) -> Result<()> {
        let bus = Bus::new();
        let expect = &self.expect;

        let mut scheduler = match Scheduler::from_config(&self.run, &bus) {
            Ok(scheduler) => scheduler,
            Err(ConstructionError::Failed { index, .. })
                if expect.outcome == ExpectedOutcome::ConstructionError =>
            {
                if let Some(failed) = expect.failed_model {
                    anyhow::ensure!(
                        index == failed,
                        "construction failed at model #{index}, expected #{failed}"
                    );
                }
                return Ok(());
            }
            Err(e) => return Err(e).context("Failed to construct co-simulation"),
        };
        anyhow::ensure!(
            expect.outcome != ExpectedOutcome::ConstructionError,
            "construction unexpectedly succeeded"
        );

        let result = scheduler.run().context("Simulation failed")?;
        match (&result.termination, expect.outcome) {
            (Termination::Finished { by }, ExpectedOutcome::Finished) => {
                if let Some(expected) = &expect.finished_by {
                    anyhow::ensure!(by == expected, "finished by {by:?}, expected {expected:?}");
                }
            }
            (Termination::RoundLimit, ExpectedOutcome::RoundLimit) => {}
            (got, wanted) => anyhow::bail!("run ended with {got:?}, expected {wanted:?}"),
        }
        if let Some(rounds) = expect.rounds {
            anyhow::ensure!(
                result.rounds == rounds,
                "ran {} rounds, expected {rounds}",
                result.rounds
            );
        }
        Ok(())
    }
}
