//! blink - A hand-wired automaton
//!
//! Two states: `Idle` waits for the `start` input, `Blinking` toggles the
//! `led` output on entry and re-enters itself every `period` milliseconds.
//! A `stop` input returns to `Idle`.
//!
//! ```text
//! statewire-cli watch &
//! blink
//! statewire-cli input start
//! statewire-cli input stop
//! statewire-cli terminate
//! ```

use statewire_core::{
    CallbackEvaluator, Effect, Interpreter, MachineDefinition, MachineDefinitionRaw, StateDef,
    TransitionDef, VariableDef,
};
use statewire_runtime::{launch, Config};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn definition() -> MachineDefinitionRaw {
    MachineDefinitionRaw {
        name: "blink".to_string(),
        initial: Some("Idle".to_string()),
        states: vec![
            StateDef::new("Idle").with_action("led_off"),
            StateDef::new("Blinking").with_action("toggle_led"),
        ],
        transitions: vec![
            TransitionDef::new("Idle", "Blinking").on_event("start"),
            TransitionDef::new("Blinking", "Idle").on_event("stop"),
            TransitionDef::new("Blinking", "Blinking").after_var("period"),
        ],
        variables: vec![
            VariableDef::new("period", "int", "500"),
            VariableDef::new("toggles", "int", "0"),
        ],
        inputs: vec!["start".to_string(), "stop".to_string()],
        outputs: vec!["led".to_string()],
    }
}

fn evaluator() -> CallbackEvaluator {
    CallbackEvaluator::new()
        .with_action("led_off", |_| Ok(vec![Effect::write_output("led", "0")]))
        .with_action("toggle_led", |b| {
            let next = if b.output("led") == Some("1") { "0" } else { "1" };
            let toggles = b.variable_i64("toggles").unwrap_or(0) + 1;
            Ok(vec![
                Effect::write_output("led", next),
                Effect::set_variable("toggles", toggles.to_string()),
            ])
        })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // The machine is compiled in; only the network section applies.
    let config = Config::load()?;
    config.network.validate()?;

    let definition = Arc::new(MachineDefinition::from_raw(definition())?);
    let settings = config.engine_settings(&definition.name);
    let interpreter = Interpreter::new(definition, evaluator());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(launch(settings, interpreter))?;
    Ok(())
}
