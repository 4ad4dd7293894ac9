//! Line-oriented console acting as the API actor
//!
//! Each line is the target node followed by the UDS request, in hex:
//!
//! ```text
//! > 10 22 F1 90        read the VIN from the MCU
//! > 12 2E 01 20 01     write an identifier on the Engine
//! > status             which peripherals are up
//! > unlock             seed/key exchange with the MCU
//! ```

use std::time::Duration;

use ecunet_uds::address::{address, NodeAddress};
use ecunet_uds::security::compute_key;
use ecunet_uds::uds::{control, security_level, service_id};
use ecunet_uds::{Frame, NegativeResponseCode, NodeId};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::client::{ApiClient, ClientError};

const HELP: &str = "\
commands:
  <node> <bytes..>   send a request, e.g. `10 22 F1 90` or `12 3E00`
  status             peripheral liveness as seen by the MCU
  unlock             request a seed from the MCU and answer it
  help               this text
  quit               leave the console";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Request { receiver: NodeAddress, data: Vec<u8> },
    Status,
    Unlock,
    Help,
    Quit,
    Empty,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid hex {0:?}")]
    BadHex(String),

    #[error("a request needs a node address and at least one byte")]
    MissingPayload,
}

/// Parse one console line
pub fn parse_command(line: &str) -> Result<Command, ParseError> {
    let line = line.trim();
    match line.to_ascii_lowercase().as_str() {
        "" => return Ok(Command::Empty),
        "status" => return Ok(Command::Status),
        "unlock" => return Ok(Command::Unlock),
        "help" | "?" => return Ok(Command::Help),
        "quit" | "exit" => return Ok(Command::Quit),
        _ => {}
    }

    let mut bytes = Vec::new();
    for token in line.split_whitespace() {
        let token = token.trim_start_matches("0x").trim_start_matches("0X");
        let decoded = hex::decode(token).map_err(|_| ParseError::BadHex(token.to_string()))?;
        bytes.extend(decoded);
    }

    match bytes.split_first() {
        Some((&receiver, data)) if !data.is_empty() => Ok(Command::Request {
            receiver,
            data: data.to_vec(),
        }),
        _ => Err(ParseError::MissingPayload),
    }
}

/// Human-readable rendering of a reply
pub fn describe_reply(frame: &Frame) -> String {
    let bytes = hex_bytes(&frame.data);
    if frame.is_negative_response() {
        if let Some(&nrc) = frame.data.get(2) {
            return format!(
                "0x{:02X} <- {}   {}",
                frame.sender,
                bytes,
                NegativeResponseCode::from(nrc)
            );
        }
    }
    format!("0x{:02X} <- {}", frame.sender, bytes)
}

/// Render a liveness status reply `[D9, 10, s1..s4]`
pub fn describe_status(frame: &Frame) -> String {
    let states = frame.data.get(2..).unwrap_or_default();
    NodeId::PERIPHERALS
        .iter()
        .zip(states)
        .map(|(node, &up)| format!("{}={}", node.name(), if up == 1 { "up" } else { "down" }))
        .collect::<Vec<_>>()
        .join(" ")
}

fn hex_bytes(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct Console {
    client: ApiClient,
    timeout: Duration,
}

impl Console {
    pub fn new(client: ApiClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Serve lines from `input` until EOF or `quit`
    pub async fn run<R, W>(&mut self, input: R, mut output: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        output.write_all(b"ecunet console, `help` for commands\n> ").await?;
        output.flush().await?;

        while let Some(line) = lines.next_line().await? {
            let text = match parse_command(&line) {
                Ok(Command::Quit) => break,
                Ok(Command::Empty) => String::new(),
                Ok(Command::Help) => HELP.to_string(),
                Ok(command) => self.execute(command).await,
                Err(e) => format!("error: {}", e),
            };
            if !text.is_empty() {
                output.write_all(text.as_bytes()).await?;
                output.write_all(b"\n").await?;
            }
            output.write_all(b"> ").await?;
            output.flush().await?;
        }
        Ok(())
    }

    async fn execute(&mut self, command: Command) -> String {
        self.client.drain();
        let result = match command {
            Command::Request { receiver, data } => self
                .client
                .request(receiver, &data, self.timeout)
                .await
                .map(|reply| describe_reply(&reply)),
            Command::Status => self
                .client
                .request(address::MCU, &[control::LIVENESS_PROBE], self.timeout)
                .await
                .map(|reply| describe_status(&reply)),
            Command::Unlock => self.unlock().await,
            Command::Help | Command::Quit | Command::Empty => return String::new(),
        };
        result.unwrap_or_else(|e| match e {
            ClientError::Timeout { .. } => "no reply".to_string(),
            e => format!("error: {}", e),
        })
    }

    async fn unlock(&mut self) -> Result<String, ClientError> {
        let seed = self
            .client
            .request(
                address::MCU,
                &[service_id::SECURITY_ACCESS, security_level::REQUEST_SEED],
                self.timeout,
            )
            .await?;
        if seed.is_negative_response() || seed.data.len() <= 2 {
            return Ok(describe_reply(&seed));
        }

        let mut key = vec![service_id::SECURITY_ACCESS, security_level::SEND_KEY];
        key.extend(compute_key(&seed.data[2..]));
        let reply = self.client.request(address::MCU, &key, self.timeout).await?;
        Ok(describe_reply(&reply))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_request_lines() {
        assert_eq!(
            parse_command("10 22 F1 90"),
            Ok(Command::Request {
                receiver: 0x10,
                data: vec![0x22, 0xF1, 0x90]
            })
        );
        assert_eq!(
            parse_command("  0x12 3e00 "),
            Ok(Command::Request {
                receiver: 0x12,
                data: vec![0x3E, 0x00]
            })
        );
    }

    #[test]
    fn test_parse_keywords_and_errors() {
        assert_eq!(parse_command(""), Ok(Command::Empty));
        assert_eq!(parse_command("STATUS"), Ok(Command::Status));
        assert_eq!(parse_command("unlock"), Ok(Command::Unlock));
        assert_eq!(parse_command("exit"), Ok(Command::Quit));
        assert_eq!(parse_command("10"), Err(ParseError::MissingPayload));
        assert_eq!(parse_command("10 2"), Err(ParseError::BadHex("2".to_string())));
        assert_eq!(parse_command("10 zz"), Err(ParseError::BadHex("zz".to_string())));
    }

    #[test]
    fn test_describe_replies() {
        let positive = Frame::new(0x12, address::API, vec![0x62, 0xF1, 0xA2, 0x10]);
        assert_eq!(describe_reply(&positive), "0x12 <- 62 F1 A2 10");

        let negative = Frame::new(0x10, address::API, vec![0x7F, 0x22, 0x33]);
        assert_eq!(
            describe_reply(&negative),
            "0x10 <- 7F 22 33   security access denied (0x33)"
        );

        let status = Frame::new(0x10, address::API, vec![0xD9, 0x10, 1, 0, 1, 1]);
        assert_eq!(
            describe_status(&status),
            "battery=up engine=down doors=up hvac=up"
        );
    }
}
