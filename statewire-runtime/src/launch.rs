//! Binds an [`Interpreter`] to an [`Engine`].

use crate::engine::{Engine, EngineSettings, EventHandlers, Link};
use crate::error::RuntimeError;
use statewire_core::{CoreError, Interpreter};

/// Handlers that forward engine events to an interpreter.
///
/// Interpreter failures are reported as `ERROR` messages and the automaton
/// keeps running. An action requesting termination stops the engine.
pub fn interpreter_handlers() -> EventHandlers<Interpreter> {
    EventHandlers::new()
        .on_input(|interpreter: &mut Interpreter, link: &mut Link, name: &str, value: &str| {
            let result = interpreter.process_input_event(link, name, value);
            surface(interpreter, link, result);
        })
        .on_timeout(|interpreter: &mut Interpreter, link: &mut Link, id, _target: &str| {
            let result = interpreter.fire_timer(link, id);
            surface(interpreter, link, result);
        })
        .on_terminate(|interpreter: &mut Interpreter, link: &mut Link| {
            interpreter.terminate(link);
        })
        .on_error(|interpreter: &mut Interpreter, text: &str| {
            tracing::warn!(
                state = interpreter.current_state().unwrap_or_default(),
                error = %text,
                "Automaton error"
            );
        })
        .on_status_request(|interpreter: &mut Interpreter, link: &mut Link| {
            let result = interpreter.report_status(link);
            surface(interpreter, link, result);
        })
}

fn surface<T>(interpreter: &Interpreter, link: &mut Link, result: Result<T, CoreError>) {
    if let Err(e) = result {
        link.send_error(&e.report());
    }
    if interpreter.is_terminate_requested() {
        link.request_stop();
    }
}

/// Starts the interpreter against the engine's link.
///
/// Graph errors raised while settling the initial state are reported and
/// the automaton stays where it stopped; configuration errors are returned.
pub fn start_interpreter(
    engine: &mut Engine<Interpreter>,
    interpreter: &mut Interpreter,
) -> Result<(), RuntimeError> {
    let link = engine.link_mut();
    match interpreter.start(link) {
        Ok(()) => {}
        Err(e) if e.is_recoverable() => link.send_error(&e.report()),
        Err(e) => {
            tracing::error!(error = %e, "Failed to start automaton");
            link.send_error(&e.report());
            return Err(e.into());
        }
    }
    if interpreter.is_terminate_requested() {
        link.request_stop();
    }
    Ok(())
}

/// Initializes an engine, starts the interpreter and runs until shutdown.
pub async fn launch(settings: EngineSettings, mut interpreter: Interpreter) -> Result<(), RuntimeError> {
    let definition = interpreter.definition().clone();
    tracing::info!(
        machine = %definition.name,
        checksum = %definition.checksum,
        states = definition.states().len(),
        transitions = definition.transitions().len(),
        "Launching automaton"
    );

    let mut engine = Engine::initialize(settings).await?;
    engine.set_event_handlers(interpreter_handlers());
    if let Err(e) = start_interpreter(&mut engine, &mut interpreter) {
        engine.stop().await;
        return Err(e);
    }
    engine.run(&mut interpreter).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use statewire_core::{
        CallbackEvaluator, Effect, MachineDefinition, MachineDefinitionRaw, StateDef,
        TransitionDef,
    };
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::UdpSocket;
    use tokio::time::Instant;

    fn blink() -> Interpreter {
        let raw = MachineDefinitionRaw {
            name: "blink".to_string(),
            initial: Some("Idle".to_string()),
            states: vec![
                StateDef::new("Idle"),
                StateDef::new("Blinking").with_action("toggle_led"),
            ],
            transitions: vec![
                TransitionDef::new("Idle", "Blinking").on_event("start"),
                TransitionDef::new("Blinking", "Blinking").after_ms(500),
            ],
            variables: vec![],
            inputs: vec!["start".to_string()],
            outputs: vec!["led".to_string()],
        };
        let definition = Arc::new(MachineDefinition::from_raw(raw).unwrap());
        let evaluator = CallbackEvaluator::new().with_action("toggle_led", |b| {
            let next = if b.output("led") == Some("1") { "0" } else { "1" };
            Ok(vec![Effect::write_output("led", next)])
        });
        Interpreter::new(definition, evaluator)
    }

    async fn setup(
        mut interpreter: Interpreter,
    ) -> (Engine<Interpreter>, Interpreter, UdpSocket, SocketAddr) {
        let observer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = observer.local_addr().unwrap().port();
        let settings = EngineSettings::new(interpreter.definition().name.clone())
            .with_listen_port(0)
            .with_peer("127.0.0.1", port);

        let mut engine = Engine::initialize(settings).await.unwrap();
        engine.set_event_handlers(interpreter_handlers());
        start_interpreter(&mut engine, &mut interpreter).unwrap();
        let addr = engine.local_addr().unwrap();
        (engine, interpreter, observer, addr)
    }

    async fn next_line(observer: &UdpSocket) -> String {
        let mut buf = [0u8; 2048];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), observer.recv_from(&mut buf))
            .await
            .expect("no status message within 5s")
            .unwrap();
        String::from_utf8(buf[..len].to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_blink_scenario() {
        let (mut engine, mut interpreter, observer, addr) = setup(blink()).await;

        let driver = async {
            assert_eq!(next_line(&observer).await, "READY blink");
            assert_eq!(next_line(&observer).await, "STATE Idle");

            let sent = Instant::now();
            observer.send_to(b"INPUT|start|1", addr).await.unwrap();
            assert_eq!(next_line(&observer).await, "OUTPUT led=\"1\"");
            assert_eq!(next_line(&observer).await, "STATE Blinking");

            assert_eq!(next_line(&observer).await, "OUTPUT led=\"0\"");
            assert_eq!(next_line(&observer).await, "STATE Blinking");
            assert!(sent.elapsed() >= Duration::from_millis(500));

            observer.send_to(b"CMD|TERMINATE|", addr).await.unwrap();
            assert_eq!(next_line(&observer).await, "TERMINATING");
        };

        let (result, _) = tokio::join!(engine.run(&mut interpreter), driver);
        result.unwrap();

        assert!(!interpreter.is_running());
        assert_eq!(interpreter.current_state(), Some("Blinking"));
        assert_eq!(engine.link().pending_timers(), 0);
    }

    #[tokio::test]
    async fn test_status_resync_is_repeatable() {
        let (mut engine, mut interpreter, observer, addr) = setup(blink()).await;

        let driver = async {
            assert_eq!(next_line(&observer).await, "READY blink");
            assert_eq!(next_line(&observer).await, "STATE Idle");

            for _ in 0..2 {
                observer.send_to(b"CMD|GET_STATUS|", addr).await.unwrap();
                assert_eq!(next_line(&observer).await, "STATE Idle");
                assert_eq!(next_line(&observer).await, "OUTPUT led=\"\"");
            }

            observer.send_to(b"CMD|TERMINATE|", addr).await.unwrap();
            assert_eq!(next_line(&observer).await, "TERMINATING");
        };

        let (result, _) = tokio::join!(engine.run(&mut interpreter), driver);
        result.unwrap();
    }

    #[tokio::test]
    async fn test_garbage_leaves_automaton_untouched() {
        let (mut engine, mut interpreter, observer, addr) = setup(blink()).await;

        let driver = async {
            assert_eq!(next_line(&observer).await, "READY blink");
            assert_eq!(next_line(&observer).await, "STATE Idle");

            observer.send_to(b"GARBAGE", addr).await.unwrap();
            assert!(next_line(&observer).await.starts_with("ERROR "));
            observer.send_to(b"INPUT|onlyname", addr).await.unwrap();
            assert!(next_line(&observer).await.starts_with("ERROR "));

            observer.send_to(b"CMD|TERMINATE|", addr).await.unwrap();
            assert_eq!(next_line(&observer).await, "TERMINATING");
        };

        let (result, _) = tokio::join!(engine.run(&mut interpreter), driver);
        result.unwrap();

        assert_eq!(interpreter.current_state(), Some("Idle"));
        assert!(interpreter.output("led").is_none());
    }

    #[tokio::test]
    async fn test_cycle_at_start_is_reported() {
        let raw = MachineDefinitionRaw {
            name: "loop".to_string(),
            initial: Some("A".to_string()),
            states: vec![StateDef::new("A"), StateDef::new("B")],
            transitions: vec![TransitionDef::new("A", "B"), TransitionDef::new("B", "A")],
            variables: vec![],
            inputs: vec![],
            outputs: vec![],
        };
        let definition = Arc::new(MachineDefinition::from_raw(raw).unwrap());
        let interpreter = Interpreter::new(definition, CallbackEvaluator::new());
        let (mut engine, mut interpreter, observer, addr) = setup(interpreter).await;

        let driver = async {
            assert_eq!(next_line(&observer).await, "READY loop");
            assert_eq!(next_line(&observer).await, "STATE A");
            assert_eq!(next_line(&observer).await, "STATE B");
            assert!(next_line(&observer)
                .await
                .starts_with("ERROR CYCLE_DETECTED: "));

            observer.send_to(b"CMD|TERMINATE|", addr).await.unwrap();
            assert_eq!(next_line(&observer).await, "TERMINATING");
        };

        let (result, _) = tokio::join!(engine.run(&mut interpreter), driver);
        result.unwrap();
        assert_eq!(interpreter.current_state(), Some("B"));
    }

    #[tokio::test]
    async fn test_terminate_effect_stops_engine() {
        let raw = MachineDefinitionRaw {
            name: "oneshot".to_string(),
            initial: Some("Idle".to_string()),
            states: vec![StateDef::new("Idle"), StateDef::new("Done").with_action("finish")],
            transitions: vec![TransitionDef::new("Idle", "Done").on_event("go")],
            variables: vec![],
            inputs: vec!["go".to_string()],
            outputs: vec![],
        };
        let definition = Arc::new(MachineDefinition::from_raw(raw).unwrap());
        let evaluator = CallbackEvaluator::new()
            .with_action("finish", |_| Ok(vec![Effect::log("done"), Effect::Terminate]));
        let (mut engine, mut interpreter, observer, addr) =
            setup(Interpreter::new(definition, evaluator)).await;

        let driver = async {
            assert_eq!(next_line(&observer).await, "READY oneshot");
            assert_eq!(next_line(&observer).await, "STATE Idle");

            observer.send_to(b"INPUT|go|", addr).await.unwrap();
            assert_eq!(next_line(&observer).await, "LOG done");
            assert_eq!(next_line(&observer).await, "STATE Done");
            assert_eq!(next_line(&observer).await, "TERMINATING");
        };

        let (result, _) = tokio::join!(engine.run(&mut interpreter), driver);
        result.unwrap();
        assert!(interpreter.is_terminate_requested());
    }

    #[tokio::test]
    async fn test_start_without_initial_state_fails() {
        let raw = MachineDefinitionRaw {
            name: "headless".to_string(),
            initial: None,
            states: vec![StateDef::new("A")],
            transitions: vec![],
            variables: vec![],
            inputs: vec![],
            outputs: vec![],
        };
        let definition = Arc::new(MachineDefinition::from_raw(raw).unwrap());
        let observer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = observer.local_addr().unwrap().port();
        let settings = EngineSettings::new("headless")
            .with_listen_port(0)
            .with_peer("127.0.0.1", port);

        let result = launch(settings, Interpreter::new(definition, CallbackEvaluator::new())).await;
        assert!(matches!(
            result,
            Err(RuntimeError::Core(CoreError::NotConfigured { .. }))
        ));

        assert_eq!(next_line(&observer).await, "READY headless");
        assert!(next_line(&observer)
            .await
            .starts_with("ERROR NOT_CONFIGURED: "));
        assert_eq!(next_line(&observer).await, "TERMINATING");
    }
}
