//! Round-based stepping of a fixed, ordered set of models.
//!
//! Every round steps each handle exactly once in descriptor order, then asks
//! all of them whether they are done. The first round after which any handle
//! reports done is the last one. Teardown finalizes handles in descriptor
//! order and releases them in reverse.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, info, warn};

use crate::descriptor::ModelDescriptor;
use crate::error::{ConstructionError, FinalizeError, FinalizeFailure, RunError, StepError};
use crate::handle::ModelHandle;
use crate::model::ModelFactory;

/// Cooperative stop request, checked before every round.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// At least one model raised its stop condition. Holds the ids of every
    /// model that reported done after the final round.
    Finished { by: Vec<usize> },
    RoundLimit,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// Completed rounds.
    pub rounds: u64,
    pub termination: Termination,
}

/// Runs once per round, after every handle stepped and before the done poll.
struct RoundHook(Box<dyn FnMut()>);

impl fmt::Debug for RoundHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RoundHook")
    }
}

#[derive(Debug)]
pub struct Scheduler {
    handles: Vec<ModelHandle>,
    running: bool,
    round: u64,
    shut_down: bool,
    max_rounds: Option<u64>,
    cancel: CancelToken,
    round_end: Option<RoundHook>,
}

impl Scheduler {
    /// Build one handle per descriptor, in order. All or nothing: on failure
    /// every handle built so far is finalized and released, newest first.
    pub fn construct(
        descriptors: &[ModelDescriptor],
        factory: &dyn ModelFactory,
    ) -> Result<Self, ConstructionError> {
        if descriptors.is_empty() {
            return Err(ConstructionError::NoModels);
        }

        let mut handles: Vec<ModelHandle> = Vec::with_capacity(descriptors.len());
        for (index, descriptor) in descriptors.iter().enumerate() {
            match factory.build(descriptor) {
                Ok(instance) => {
                    let name = match &descriptor.name {
                        Some(name) => name.clone(),
                        None => instance.name().to_owned(),
                    };
                    debug!(id = index, model = %name, kind = %descriptor.kind, "model constructed");
                    handles.push(ModelHandle::new(index, name, instance));
                }
                Err(source) => {
                    error!(
                        index,
                        kind = %descriptor.kind,
                        error = %source,
                        "model construction failed, rolling back {} model(s)",
                        handles.len()
                    );
                    let rollback = roll_back(handles);
                    return Err(ConstructionError::Failed {
                        index,
                        kind: descriptor.kind.clone(),
                        source,
                        rollback,
                    });
                }
            }
        }

        info!(models = handles.len(), "co-simulation constructed");
        Ok(Self {
            handles,
            running: false,
            round: 0,
            shut_down: false,
            max_rounds: None,
            cancel: CancelToken::new(),
            round_end: None,
        })
    }

    /// Stop after this many rounds even if no model has signaled done.
    /// Without it, a run only ends through a model's own stop condition.
    pub fn with_max_rounds(mut self, max_rounds: Option<u64>) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Call `hook` at the end of every round, e.g. to publish a shared
    /// medium's staged writes.
    pub fn on_round_end(mut self, hook: impl FnMut() + 'static) -> Self {
        self.round_end = Some(RoundHook(Box::new(hook)));
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn handles(&self) -> &[ModelHandle] {
        &self.handles
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Completed rounds of the current (or last) run.
    pub fn rounds(&self) -> u64 {
        self.round
    }

    /// Drive rounds until termination, then tear everything down.
    pub fn run(&mut self) -> Result<RunResult, RunError> {
        if self.shut_down {
            return Err(RunError::ShutDown);
        }

        self.running = true;
        self.round = 0;
        info!(models = self.handles.len(), max_rounds = ?self.max_rounds, "starting co-simulation");

        let outcome = self.drive();
        let teardown = self.shutdown();

        match outcome {
            Ok(termination) => {
                teardown?;
                info!(rounds = self.round, ?termination, "co-simulation finished");
                Ok(RunResult {
                    rounds: self.round,
                    termination,
                })
            }
            Err(source) => {
                error!(error = %source, "co-simulation aborted");
                Err(RunError::Step {
                    source,
                    teardown: teardown.err(),
                })
            }
        }
    }

    fn drive(&mut self) -> Result<Termination, StepError> {
        loop {
            if self.cancel.is_cancelled() {
                warn!(rounds = self.round, "co-simulation cancelled");
                return Ok(Termination::Cancelled);
            }
            if self.max_rounds.is_some_and(|max| self.round >= max) {
                warn!(rounds = self.round, "round limit reached without a model signaling done");
                return Ok(Termination::RoundLimit);
            }

            let round = self.round + 1;
            for handle in &mut self.handles {
                handle
                    .step()
                    .map_err(|source| StepError { round, source })?;
            }
            self.round += 1;
            if let Some(RoundHook(hook)) = &mut self.round_end {
                hook();
            }

            // Poll every handle, not just the first done one, so each latch
            // sees this round's signal.
            let by: Vec<usize> = self
                .handles
                .iter_mut()
                .filter_map(|handle| handle.is_done().then(|| handle.id()))
                .collect();
            if !by.is_empty() {
                return Ok(Termination::Finished { by });
            }
        }
    }

    /// Finalize every handle in order, then release them newest first.
    /// Finalize failures are collected; none of them stops the rest.
    pub fn shutdown(&mut self) -> Result<(), FinalizeError> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        let mut failures = Vec::new();
        for handle in &mut self.handles {
            if let Err(source) = handle.finalize() {
                warn!(id = handle.id(), model = %handle.name(), error = %source, "finalize failed");
                failures.push(FinalizeFailure {
                    id: handle.id(),
                    name: handle.name().to_owned(),
                    source,
                });
            }
        }
        while let Some(handle) = self.handles.pop() {
            drop(handle);
        }
        self.running = false;

        if failures.is_empty() {
            Ok(())
        } else {
            Err(FinalizeError { failures })
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "teardown on drop failed");
        }
    }
}

/// Undo a partial construction: finalize and release, newest first.
fn roll_back(mut handles: Vec<ModelHandle>) -> Vec<FinalizeFailure> {
    let mut failures = Vec::new();
    while let Some(mut handle) = handles.pop() {
        if let Err(source) = handle.finalize() {
            warn!(
                id = handle.id(),
                model = %handle.name(),
                error = %source,
                "finalize during rollback failed"
            );
            failures.push(FinalizeFailure {
                id: handle.id(),
                name: handle.name().to_owned(),
                source,
            });
        }
    }
    failures
}
