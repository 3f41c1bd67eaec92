//! Text command surface
//!
//! One command per line:
//!
//! ```text
//! resolve_all
//! list
//! resolve_by_property -type Audio
//! connect 0
//! connect_by_property -name MyStream
//! disconnect
//! status
//! ```

use serde::Serialize;
use std::str::FromStr;

use crate::connection::ConnectionManager;
use crate::error::CommandError;
use crate::protocol::PropertyKey;

/// A parsed control command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ResolveAll,
    List,
    ResolveByProperty { key: PropertyKey, value: String },
    Connect(usize),
    ConnectByProperty { key: PropertyKey, value: String },
    Disconnect,
    Status,
}

fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim();
    text.split_once(char::is_whitespace)
        .map_or((text, ""), |(head, rest)| (head, rest.trim()))
}

fn parse_property(args: &str) -> Result<(PropertyKey, String), CommandError> {
    let (key, value) = split_word(args);
    if key.is_empty() {
        return Err(CommandError::MissingArgument("property"));
    }
    let key = PropertyKey::from_str(key).map_err(CommandError::InvalidProperty)?;
    if value.is_empty() {
        return Err(CommandError::MissingArgument("value"));
    }
    Ok((key, value.to_string()))
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (verb, args) = split_word(line);
        match verb {
            "" => Err(CommandError::Empty),
            "resolve_all" => Ok(Self::ResolveAll),
            "list" => Ok(Self::List),
            "disconnect" => Ok(Self::Disconnect),
            "status" => Ok(Self::Status),
            "connect" => {
                if args.is_empty() {
                    return Err(CommandError::MissingArgument("index"));
                }
                args.parse()
                    .map(Self::Connect)
                    .map_err(|_| CommandError::InvalidIndex(args.to_string()))
            }
            "resolve_by_property" => {
                let (key, value) = parse_property(args)?;
                Ok(Self::ResolveByProperty { key, value })
            }
            "connect_by_property" => {
                let (key, value) = parse_property(args)?;
                Ok(Self::ConnectByProperty { key, value })
            }
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

/// Result of one command, ready to print
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandOutcome {
    pub fn ok(data: impl Serialize) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

impl Command {
    /// Run the command against the manager on the calling thread
    pub fn apply(&self, manager: &mut ConnectionManager) -> CommandOutcome {
        match self {
            Self::ResolveAll => match manager.resolve_all() {
                Ok(count) => CommandOutcome::ok(count),
                Err(e) => CommandOutcome::error(e.to_string()),
            },
            Self::List => CommandOutcome::ok(manager.directory().snapshot().as_slice()),
            Self::ResolveByProperty { key, value } => {
                match manager.resolve_by_property(*key, value) {
                    Ok(count) => CommandOutcome::ok(count),
                    Err(e) => CommandOutcome::error(e.to_string()),
                }
            }
            Self::Connect(index) => match manager.connect(*index) {
                Ok(descriptor) => CommandOutcome::ok(descriptor),
                Err(e) => CommandOutcome::error(e.to_string()),
            },
            Self::ConnectByProperty { key, value } => {
                match manager.connect_by_property(*key, value) {
                    Ok(descriptor) => CommandOutcome::ok(descriptor),
                    Err(e) => CommandOutcome::error(e.to_string()),
                }
            }
            Self::Disconnect => CommandOutcome::ok(manager.disconnect()),
            Self::Status => CommandOutcome::ok(manager.status()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InletConfig;
    use crate::network::loopback::LoopbackService;
    use crate::protocol::ChannelFormat;
    use std::sync::Arc;

    #[test]
    fn test_parse_commands() {
        assert_eq!("resolve_all".parse(), Ok(Command::ResolveAll));
        assert_eq!("  list ".parse(), Ok(Command::List));
        assert_eq!("connect 3".parse(), Ok(Command::Connect(3)));
        assert_eq!(
            "resolve_by_property -type Audio".parse(),
            Ok(Command::ResolveByProperty {
                key: PropertyKey::Type,
                value: "Audio".into()
            })
        );
        assert_eq!(
            "connect_by_property -name My Stream".parse(),
            Ok(Command::ConnectByProperty {
                key: PropertyKey::Name,
                value: "My Stream".into()
            })
        );
        assert_eq!("disconnect".parse(), Ok(Command::Disconnect));
        assert_eq!("status".parse(), Ok(Command::Status));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Command>(), Err(CommandError::Empty));
        assert_eq!(
            "connect".parse::<Command>(),
            Err(CommandError::MissingArgument("index"))
        );
        assert_eq!(
            "connect -1".parse::<Command>(),
            Err(CommandError::InvalidIndex("-1".into()))
        );
        assert!(matches!(
            "resolve_by_property -channel 2".parse::<Command>(),
            Err(CommandError::InvalidProperty(_))
        ));
        assert_eq!(
            "resolve_by_property -type".parse::<Command>(),
            Err(CommandError::MissingArgument("value"))
        );
        assert_eq!(
            "bang".parse::<Command>(),
            Err(CommandError::Unknown("bang".into()))
        );
    }

    #[test]
    fn test_apply_session() {
        let service = LoopbackService::new();
        let config = InletConfig {
            outputs: 2,
            resolve_timeout_secs: 0.05,
            join_grace_ms: 20,
            ..Default::default()
        };
        let mut manager = ConnectionManager::new(config, Arc::new(service.clone())).unwrap();
        let _outlet = service.create_outlet("Sine", "Audio", "gen", 2, 44100.0, ChannelFormat::Float32);

        let outcome = Command::Connect(0).apply(&mut manager);
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("resolve"));

        let outcome = Command::ResolveAll.apply(&mut manager);
        assert_eq!(outcome.data, Some(serde_json::json!(1)));

        let outcome = Command::List.apply(&mut manager);
        assert_eq!(outcome.data.unwrap()[0]["name"], "Sine");

        assert!(Command::Connect(0).apply(&mut manager).success);
        let status = Command::Status.apply(&mut manager).data.unwrap();
        assert_eq!(status["state"], "connected");
        assert_eq!(status["stream"]["type"], "Audio");

        assert_eq!(
            Command::Disconnect.apply(&mut manager).data,
            Some(serde_json::json!(true))
        );
        assert_eq!(
            Command::Disconnect.apply(&mut manager).data,
            Some(serde_json::json!(false))
        );
    }
}
