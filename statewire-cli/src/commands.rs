//! Command execution.

use crate::Commands;
use colored::Colorize;
use statewire_protocol::{
    Command, Decoder, Encoder, InboundMessage, OutboundMessage, MAX_DATAGRAM_SIZE,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Executes a command and returns the formatted output.
pub async fn execute(
    engine: SocketAddr,
    listen: SocketAddr,
    cmd: Commands,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Input { name, value } => {
            let message = InboundMessage::input(name, value);
            send(engine, &message).await?;
            Ok(format!("{} {}", "Sent".green(), message.to_string().cyan()))
        }

        Commands::Terminate => {
            let message = InboundMessage::command(Command::Terminate);
            send(engine, &message).await?;
            Ok(format!("{} {}", "Sent".green(), message.to_string().cyan()))
        }

        Commands::Status { wait_ms } => {
            let socket = bind(listen).await?;
            let request = Encoder::encode_inbound(&InboundMessage::command(Command::GetStatus));
            socket.send_to(&request, engine).await?;

            let messages = collect(&socket, Duration::from_millis(wait_ms)).await?;
            if messages.is_empty() {
                return Ok(format!("No status received from {}", engine)
                    .yellow()
                    .to_string());
            }
            Ok(messages
                .iter()
                .map(format_status)
                .collect::<Vec<_>>()
                .join("\n"))
        }

        Commands::Watch => {
            watch(listen).await?;
            Ok(String::new())
        }
    }
}

/// Sends one message from an ephemeral socket.
async fn send(engine: SocketAddr, message: &InboundMessage) -> Result<(), Box<dyn std::error::Error>> {
    let local: SocketAddr = if engine.is_ipv4() {
        "0.0.0.0:0".parse()?
    } else {
        "[::]:0".parse()?
    };
    let socket = UdpSocket::bind(local).await?;
    socket
        .send_to(&Encoder::encode_inbound(message), engine)
        .await?;
    tracing::debug!(engine = %engine, message = %message, "Sent");
    Ok(())
}

async fn bind(listen: SocketAddr) -> Result<UdpSocket, Box<dyn std::error::Error>> {
    UdpSocket::bind(listen)
        .await
        .map_err(|e| format!("failed to listen on {}: {}", listen, e).into())
}

/// Collects status messages until `quiet` passes without one.
async fn collect(
    socket: &UdpSocket,
    quiet: Duration,
) -> Result<Vec<OutboundMessage>, Box<dyn std::error::Error>> {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut messages = Vec::new();

    loop {
        let (len, from) = match tokio::time::timeout(quiet, socket.recv_from(&mut buf)).await {
            Ok(received) => received?,
            Err(_) => break,
        };
        match Decoder::decode_outbound(&buf[..len]) {
            Ok(message) => messages.push(message),
            Err(e) => tracing::warn!(from = %from, error = %e, "Ignoring datagram"),
        }
    }

    Ok(messages)
}

/// Prints status messages until `TERMINATING` or Ctrl+C.
async fn watch(listen: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let socket = bind(listen).await?;
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    eprintln!("{} on {}", "Watching".green(), listen.to_string().cyan());
    eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, from) = received?;
                match Decoder::decode_outbound(&buf[..len]) {
                    Ok(message) => {
                        println!("{}", format_status(&message));
                        if message == OutboundMessage::Terminating {
                            break;
                        }
                    }
                    Err(e) => {
                        eprintln!("{}: {} from {}", "Warning".yellow(), e, from);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "Stopping watch...".dimmed());
                break;
            }
        }
    }

    Ok(())
}

/// Formats a status message for the terminal.
fn format_status(message: &OutboundMessage) -> String {
    match message {
        OutboundMessage::Ready { name } => format!("{} {}", "READY".green().bold(), name),
        OutboundMessage::State { state } => format!("{} {}", "STATE".cyan(), state.bold()),
        OutboundMessage::Output { name, value } => {
            format!("{} {}=\"{}\"", "OUTPUT".magenta(), name, value.yellow())
        }
        OutboundMessage::Var { name, value } => {
            format!("{} {}=\"{}\"", "VAR".blue(), name, value.yellow())
        }
        OutboundMessage::Log { text } => format!("{} {}", "LOG".dimmed(), text),
        OutboundMessage::Error { text } => format!("{} {}", "ERROR".red().bold(), text),
        OutboundMessage::Terminating => "TERMINATING".yellow().bold().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_status_plain() {
        colored::control::set_override(false);

        assert_eq!(
            format_status(&OutboundMessage::state("Blinking")),
            "STATE Blinking"
        );
        assert_eq!(
            format_status(&OutboundMessage::output("led", "1")),
            "OUTPUT led=\"1\""
        );
        assert_eq!(format_status(&OutboundMessage::Terminating), "TERMINATING");
    }

    #[tokio::test]
    async fn test_collect_skips_unparseable_datagrams() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let engine = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        for line in ["STATE Idle", "garbage", "VAR count=\"3\""] {
            engine.send_to(line.as_bytes(), addr).await.unwrap();
        }

        let messages = collect(&listener, Duration::from_millis(200)).await.unwrap();
        assert_eq!(
            messages,
            vec![
                OutboundMessage::state("Idle"),
                OutboundMessage::var("count", "3"),
            ]
        );
    }

    #[tokio::test]
    async fn test_input_command_sends_triple() {
        let engine = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let engine_addr = engine.local_addr().unwrap();
        let unused: SocketAddr = "127.0.0.1:0".parse().unwrap();

        execute(
            engine_addr,
            unused,
            Commands::Input {
                name: "start".to_string(),
                value: "1".to_string(),
            },
        )
        .await
        .unwrap();

        let mut buf = [0u8; 256];
        let (len, _) = engine.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"INPUT|start|1");
    }

    #[tokio::test]
    async fn test_status_without_engine_reports_nothing() {
        let engine = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let engine_addr = engine.local_addr().unwrap();
        let listen: SocketAddr = "127.0.0.1:0".parse().unwrap();

        let output = execute(engine_addr, listen, Commands::Status { wait_ms: 50 })
            .await
            .unwrap();
        assert!(output.contains("No status received"));

        let mut buf = [0u8; 256];
        let (len, _) = engine.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"CMD|GET_STATUS|");
    }
}
