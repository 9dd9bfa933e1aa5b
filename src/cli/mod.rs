use crate::config::{ClientConfig, ConfigError};
use crate::domain::{Device, Region};
use crate::error::KarcherError;
use crate::infra::KarcherHome;
use serde::Serialize;
use serde_json::json;
use std::io::{self, Write};
use thiserror::Error;

const DEFAULT_MAP_KIND: u32 = 1;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum OutputFormat {
    #[default]
    Json,
    JsonPretty,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GlobalOptions {
    pub region: Option<Region>,
    pub country: Option<String>,
    pub output: OutputFormat,
    pub debug: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Credentials {
    Password { username: String, password: String },
    Token { auth_token: String, mqtt_token: String },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CliCommand {
    Urls,
    Login {
        username: String,
        password: String,
    },
    Devices {
        credentials: Credentials,
    },
    Profile {
        credentials: Credentials,
    },
    Properties {
        serial: String,
        credentials: Credentials,
    },
    Map {
        serial: String,
        kind: u32,
        credentials: Credentials,
    },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CliInvocation {
    PrintHelp,
    PrintVersion,
    Command {
        options: GlobalOptions,
        command: CliCommand,
    },
}

#[derive(Debug, Error)]
pub enum CliParseError {
    #[error("missing subcommand")]
    MissingSubcommand,

    #[error("unknown subcommand: {0}")]
    UnknownSubcommand(String),

    #[error("unknown flag: {0}")]
    UnknownFlag(String),

    #[error("missing value for flag: {0}")]
    MissingFlagValue(String),

    #[error("invalid value for {flag}: {value}")]
    InvalidFlagValue { flag: String, value: String },

    #[error("missing required flag: {0}")]
    MissingFlag(&'static str),

    #[error("{0}: provide either --token or --username and --password")]
    MissingCredentials(String),

    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),
}

#[derive(Default)]
struct CommandFlags {
    username: Option<String>,
    password: Option<String>,
    token: Option<String>,
    mqtt_token: Option<String>,
    serial: Option<String>,
    kind: Option<u32>,
}

impl CommandFlags {
    fn credentials(&mut self, subcommand: &str) -> Result<Credentials, CliParseError> {
        if let Some(auth_token) = self.token.take() {
            return Ok(Credentials::Token {
                auth_token,
                mqtt_token: self.mqtt_token.take().unwrap_or_default(),
            });
        }
        match (self.username.take(), self.password.take()) {
            (Some(username), Some(password)) => Ok(Credentials::Password { username, password }),
            _ => Err(CliParseError::MissingCredentials(subcommand.to_string())),
        }
    }

    fn serial(&mut self) -> Result<String, CliParseError> {
        self.serial.take().ok_or(CliParseError::MissingFlag("--sn"))
    }
}

pub fn parse_invocation(args: &[String]) -> Result<CliInvocation, CliParseError> {
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        return Ok(CliInvocation::PrintHelp);
    }
    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        return Ok(CliInvocation::PrintVersion);
    }

    let mut options = GlobalOptions::default();
    let mut iter = args.iter().skip(1).peekable();
    while let Some(arg) = iter.peek() {
        match arg.as_str() {
            "--region" | "-r" => {
                let _ = iter.next();
                let value = iter
                    .next()
                    .ok_or_else(|| CliParseError::MissingFlagValue("--region".to_string()))?;
                options.region = Some(parse_region_flag(value)?);
            }
            "--country" | "-c" => {
                let _ = iter.next();
                let value = iter
                    .next()
                    .ok_or_else(|| CliParseError::MissingFlagValue("--country".to_string()))?;
                options.country = Some(value.trim().to_ascii_uppercase());
            }
            "--output" | "-o" => {
                let _ = iter.next();
                let value = iter
                    .next()
                    .ok_or_else(|| CliParseError::MissingFlagValue("--output".to_string()))?;
                options.output = parse_output_flag(value)?;
            }
            "--debug" | "-d" => {
                let _ = iter.next();
                options.debug = true;
            }
            _ => break,
        }
    }

    let Some(subcommand) = iter.next() else {
        return Err(CliParseError::MissingSubcommand);
    };
    let subcommand = subcommand.as_str();
    if !matches!(
        subcommand,
        "urls" | "get-urls" | "login" | "devices" | "profile" | "properties" | "map"
    ) {
        return Err(CliParseError::UnknownSubcommand(subcommand.to_string()));
    }

    let mut flags = CommandFlags::default();
    while let Some(arg) = iter.next() {
        let mut value_for = |flag: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| CliParseError::MissingFlagValue(flag.to_string()))
        };
        match arg.as_str() {
            "--username" | "-u" => flags.username = Some(value_for("--username")?),
            "--password" | "-p" => flags.password = Some(value_for("--password")?),
            "--token" | "-t" => flags.token = Some(value_for("--token")?),
            "--mqtt-token" | "-m" => flags.mqtt_token = Some(value_for("--mqtt-token")?),
            "--sn" | "-s" => flags.serial = Some(value_for("--sn")?),
            "--kind" | "-k" => {
                let value = value_for("--kind")?;
                flags.kind = Some(value.parse::<u32>().map_err(|_| {
                    CliParseError::InvalidFlagValue {
                        flag: "--kind".to_string(),
                        value: value.clone(),
                    }
                })?);
            }
            _ if arg.starts_with('-') => {
                return Err(CliParseError::UnknownFlag(arg.to_string()));
            }
            _ => return Err(CliParseError::UnexpectedArgument(arg.to_string())),
        }
    }

    let command = match subcommand {
        "urls" | "get-urls" => CliCommand::Urls,
        "login" => match (flags.username, flags.password) {
            (Some(username), Some(password)) => CliCommand::Login { username, password },
            (None, _) => return Err(CliParseError::MissingFlag("--username")),
            (_, None) => return Err(CliParseError::MissingFlag("--password")),
        },
        "devices" => CliCommand::Devices {
            credentials: flags.credentials(subcommand)?,
        },
        "profile" => CliCommand::Profile {
            credentials: flags.credentials(subcommand)?,
        },
        "properties" => CliCommand::Properties {
            serial: flags.serial()?,
            credentials: flags.credentials(subcommand)?,
        },
        _ => CliCommand::Map {
            serial: flags.serial()?,
            kind: flags.kind.unwrap_or(DEFAULT_MAP_KIND),
            credentials: flags.credentials(subcommand)?,
        },
    };

    Ok(CliInvocation::Command { options, command })
}

fn parse_region_flag(value: &str) -> Result<Region, CliParseError> {
    value
        .parse::<Region>()
        .map_err(|_| CliParseError::InvalidFlagValue {
            flag: "--region".to_string(),
            value: value.to_string(),
        })
}

fn parse_output_flag(value: &str) -> Result<OutputFormat, CliParseError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "json" => Ok(OutputFormat::Json),
        "json_pretty" | "json-pretty" => Ok(OutputFormat::JsonPretty),
        _ => Err(CliParseError::InvalidFlagValue {
            flag: "--output".to_string(),
            value: value.to_string(),
        }),
    }
}

#[derive(Debug, Error)]
pub enum CliRunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Karcher(#[from] KarcherError),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    WriteOutput(#[from] io::Error),
}

impl CliRunError {
    pub fn code(&self) -> i64 {
        match self {
            Self::Karcher(error) => error.code(),
            _ => -3,
        }
    }

    /// `{"code": .., "message": ..}`, as printed on failure.
    pub fn to_json(&self) -> serde_json::Value {
        json!({ "code": self.code(), "message": self.to_string() })
    }
}

/// Logs out on drop when the session was opened from a password login for this command only.
struct SessionScope<'a> {
    client: &'a KarcherHome,
    owned: bool,
}

impl SessionScope<'_> {
    fn open<'a>(
        client: &'a KarcherHome,
        credentials: &Credentials,
    ) -> Result<SessionScope<'a>, KarcherError> {
        match credentials {
            Credentials::Password { username, password } => {
                client.login(username, password, None)?;
                Ok(SessionScope {
                    client,
                    owned: true,
                })
            }
            Credentials::Token {
                auth_token,
                mqtt_token,
            } => {
                client.login_token(auth_token, mqtt_token, None)?;
                Ok(SessionScope {
                    client,
                    owned: false,
                })
            }
        }
    }
}

impl Drop for SessionScope<'_> {
    fn drop(&mut self) {
        if !self.owned {
            self.client.close();
            return;
        }
        if let Err(error) = self.client.logout() {
            tracing::warn!(%error, "logout failed");
        }
    }
}

pub fn build_config(options: &GlobalOptions) -> Result<ClientConfig, ConfigError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(region) = options.region {
        config.region = region;
    }
    if let Some(country) = options.country.as_ref() {
        config.country = country.clone();
    }
    Ok(config)
}

pub fn run(options: &GlobalOptions, command: CliCommand) -> Result<(), CliRunError> {
    let config = build_config(options)?;
    let client = KarcherHome::connect(config)?;
    let mut out = io::stdout().lock();

    match command {
        CliCommand::Urls => write_json(&mut out, options.output, &client.get_urls()?),
        CliCommand::Login { username, password } => {
            let session = client.login(&username, &password, None)?;
            write_json(&mut out, options.output, &session)
        }
        CliCommand::Devices { credentials } => {
            let _scope = SessionScope::open(&client, &credentials)?;
            write_json(&mut out, options.output, &client.get_devices()?)
        }
        CliCommand::Profile { credentials } => {
            let _scope = SessionScope::open(&client, &credentials)?;
            write_json(&mut out, options.output, &client.get_user_info()?)
        }
        CliCommand::Properties {
            serial,
            credentials,
        } => {
            let _scope = SessionScope::open(&client, &credentials)?;
            let device = find_device(&client, &serial)?;
            let snapshot = client.get_device_properties(&device)?;
            write_json(&mut out, options.output, &snapshot)
        }
        CliCommand::Map {
            serial,
            kind,
            credentials,
        } => {
            let _scope = SessionScope::open(&client, &credentials)?;
            let device = find_device(&client, &serial)?;
            let map = client.get_map_data(&device, kind)?;
            write_json(&mut out, options.output, &map.data)
        }
    }
}

fn find_device(client: &KarcherHome, serial: &str) -> Result<Device, CliRunError> {
    client
        .get_devices()?
        .into_iter()
        .find(|device| device.sn.eq_ignore_ascii_case(serial))
        .ok_or_else(|| CliRunError::DeviceNotFound(serial.to_string()))
}

pub fn render_json(format: OutputFormat, value: &impl Serialize) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Json => serde_json::to_string(value),
        OutputFormat::JsonPretty => serde_json::to_string_pretty(value),
    }
}

fn write_json(
    out: &mut impl Write,
    format: OutputFormat,
    value: &impl Serialize,
) -> Result<(), CliRunError> {
    let rendered = render_json(format, value)?;
    writeln!(out, "{rendered}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    fn command(values: &[&str]) -> (GlobalOptions, CliCommand) {
        match parse_invocation(&args(values)).expect("parse") {
            CliInvocation::Command { options, command } => (options, command),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_help_flag_wins() {
        let parsed =
            parse_invocation(&args(&["karcher-home", "devices", "--help"])).expect("parse");
        assert_eq!(parsed, CliInvocation::PrintHelp);
    }

    #[test]
    fn parse_requires_subcommand() {
        assert!(matches!(
            parse_invocation(&args(&["karcher-home", "-r", "us"])),
            Err(CliParseError::MissingSubcommand)
        ));
    }

    #[test]
    fn parse_global_flags_before_subcommand() {
        let (options, command) = command(&[
            "karcher-home",
            "--region",
            "us",
            "-c",
            "de",
            "-o",
            "json_pretty",
            "-d",
            "urls",
        ]);
        assert_eq!(
            options,
            GlobalOptions {
                region: Some(Region::Us),
                country: Some("DE".to_string()),
                output: OutputFormat::JsonPretty,
                debug: true,
            }
        );
        assert_eq!(command, CliCommand::Urls);
    }

    #[test]
    fn parse_devices_with_token() {
        let (_, command) = command(&["karcher-home", "devices", "-t", "tok"]);
        assert_eq!(
            command,
            CliCommand::Devices {
                credentials: Credentials::Token {
                    auth_token: "tok".to_string(),
                    mqtt_token: String::new(),
                }
            }
        );
    }

    #[test]
    fn parse_properties_with_password_login() {
        let (_, command) = command(&[
            "karcher-home",
            "properties",
            "--sn",
            "SN1",
            "-u",
            "me@example.com",
            "-p",
            "pw",
        ]);
        assert_eq!(
            command,
            CliCommand::Properties {
                serial: "SN1".to_string(),
                credentials: Credentials::Password {
                    username: "me@example.com".to_string(),
                    password: "pw".to_string(),
                },
            }
        );
    }

    #[test]
    fn parse_map_defaults_to_first_kind() {
        let (_, command) = command(&["karcher-home", "map", "--sn", "SN1", "-t", "a", "-m", "b"]);
        assert_eq!(
            command,
            CliCommand::Map {
                serial: "SN1".to_string(),
                kind: DEFAULT_MAP_KIND,
                credentials: Credentials::Token {
                    auth_token: "a".to_string(),
                    mqtt_token: "b".to_string(),
                },
            }
        );
    }

    #[test]
    fn parse_rejects_missing_credentials() {
        assert!(matches!(
            parse_invocation(&args(&["karcher-home", "devices", "-u", "me"])),
            Err(CliParseError::MissingCredentials(name)) if name == "devices"
        ));
    }

    #[test]
    fn parse_rejects_bad_values() {
        assert!(matches!(
            parse_invocation(&args(&["karcher-home", "-r", "mars", "urls"])),
            Err(CliParseError::InvalidFlagValue { .. })
        ));
        assert!(matches!(
            parse_invocation(&args(&["karcher-home", "map", "--sn", "S", "-k", "x"])),
            Err(CliParseError::InvalidFlagValue { .. })
        ));
        assert!(matches!(
            parse_invocation(&args(&["karcher-home", "login", "-u"])),
            Err(CliParseError::MissingFlagValue(_))
        ));
        assert!(matches!(
            parse_invocation(&args(&["karcher-home", "wipe"])),
            Err(CliParseError::UnknownSubcommand(_))
        ));
    }

    #[test]
    fn error_output_carries_api_code() {
        let error = CliRunError::from(KarcherError::InvalidAuth);
        assert_eq!(
            error.to_json(),
            json!({ "code": 620, "message": "The username or password is incorrect" })
        );
        assert_eq!(CliRunError::DeviceNotFound("x".to_string()).code(), -3);
    }

    #[test]
    fn renders_compact_and_pretty_json() {
        let value = json!({ "a": 1 });
        assert_eq!(render_json(OutputFormat::Json, &value).expect("json"), "{\"a\":1}");
        assert_eq!(
            render_json(OutputFormat::JsonPretty, &value).expect("json"),
            "{\n  \"a\": 1\n}"
        );
    }
}
