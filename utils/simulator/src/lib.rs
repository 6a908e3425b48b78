mod bus;
mod config;
mod descriptor;
mod error;
mod handle;
mod model;
mod models;
mod scheduler;
mod uart;

// Re-export public API
pub use bus::{Bus, Claim};
pub use config::RunConfig;
pub use descriptor::{ModelDescriptor, ParamValue, Params, parse_hex};
pub use error::{
    ConfigError, ConstructionError, FinalizeError, FinalizeFailure, HandleError, ModelError,
    RunError, StepError,
};
pub use handle::{HandleState, ModelHandle};
pub use model::{ModelFactory, SteppedModel};
pub use models::{
    BUILTIN_MODELS, BuiltinModels, FinishAfter, LED_ADDR, LedMonitor, LedWriter, UART_TX_ADDR,
    UartConsole, UartTx,
};
pub use scheduler::{CancelToken, RunResult, Scheduler, Termination};
pub use uart::{DEFAULT_BIT_PERIOD, UartDecoder, UartEncoder};

impl Scheduler {
    /// Construct the models a [`RunConfig`] lists, attached to `bus`, with
    /// the config's round limit applied. The bus commits at every round end.
    pub fn from_config(config: &RunConfig, bus: &Bus) -> Result<Self, ConstructionError> {
        let factory = BuiltinModels::new(bus.clone());
        let bus = bus.clone();
        Ok(Self::construct(&config.models, &factory)?
            .with_max_rounds(config.max_rounds)
            .on_round_end(move || bus.commit()))
    }
}
