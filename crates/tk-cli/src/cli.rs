use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, Result, anyhow};
use clap::{ArgAction, Args, Parser, Subcommand};
use secrecy::SecretString;
use ssh_core::Verbosity;
use tk_types::{
    CredentialOptions, Protocol, ProxyConfig, TunnelConfig, WaitConfig, parse_duration, parse_listen_endpoint,
    parse_remote_endpoint,
    tunnel::{DEFAULT_DIAL_TIMEOUT, DEFAULT_REMOTE_COMMAND, DEFAULT_SSH_PORT, DEFAULT_WAIT_DELAY},
};

#[derive(Debug, Parser)]
#[command(name = "tunnelkit", version, about = "On-demand SSH tunnels and socket helpers")]
pub struct Cli {
    /// Silence all logging and the remote command output
    #[arg(short = 'q', long, global = true, action = ArgAction::SetTrue)]
    pub quiet: bool,
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short = 'v', long, global = true, action = ArgAction::SetTrue)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a local listener that forwards every connection through one shared SSH session
    Tunnel(TunnelArgs),
    /// Forward every connection to a fixed address, without SSH
    Proxy(ProxyArgs),
    /// Wait until a socket accepts connections
    Waitconn(WaitconnArgs),
}

#[derive(Debug, Args)]
pub struct TunnelArgs {
    /// Local bind address, `[host]:port`
    #[arg(value_name = "LISTEN")]
    listen: String,
    /// SSH server, `host[:port]` (port defaults to 22)
    #[arg(value_name = "SSH")]
    ssh: String,
    /// Destination as seen from the SSH server, `host:port`
    #[arg(value_name = "TARGET")]
    target: String,
    /// Protocol of the listener and forwarded channels
    #[arg(short = 'p', long, value_enum, default_value_t = Protocol::Tcp)]
    protocol: Protocol,
    /// Timeout for establishing the SSH connection, 0 to wait indefinitely [default: 30s]
    #[arg(short = 't', long, value_name = "DURATION", value_parser = parse_duration)]
    timeout: Option<Duration>,
    /// Command kept running on the SSH server while the session is up
    #[arg(short = 'c', long = "cmd", value_name = "COMMAND", default_value = DEFAULT_REMOTE_COMMAND)]
    command: String,
    /// Remote username (defaults to the current user)
    #[arg(short = 'u', long = "user", value_name = "USER", help_heading = "Auth Options")]
    username: Option<String>,
    /// Password to try before any key
    #[arg(short = 'w', long, value_name = "PASSWORD", help_heading = "Auth Options")]
    password: Option<String>,
    /// Private key file (defaults to ~/.ssh/id_rsa and ~/.ssh/id_ed25519)
    #[arg(short = 'k', long = "keyfile", value_name = "KEY", help_heading = "Auth Options")]
    key_file: Option<PathBuf>,
    /// Drop a failing connection and keep listening instead of exiting
    #[arg(short = 'f', long, action = ArgAction::SetTrue)]
    force: bool,
}

#[derive(Debug, Args)]
pub struct ProxyArgs {
    /// Local bind address, `[host]:port`
    #[arg(value_name = "LISTEN")]
    listen: String,
    /// Address every connection is forwarded to, `host:port`
    #[arg(value_name = "TARGET")]
    target: String,
    #[arg(short = 'p', long, value_enum, default_value_t = Protocol::Tcp)]
    protocol: Protocol,
    /// Timeout for connecting to the target, 0 to wait indefinitely [default: 30s]
    #[arg(short = 't', long, value_name = "DURATION", value_parser = parse_duration)]
    timeout: Option<Duration>,
}

#[derive(Debug, Args)]
pub struct WaitconnArgs {
    /// Address to poll, `host:port`
    #[arg(value_name = "ADDR")]
    address: String,
    #[arg(short = 'p', long, value_enum, default_value_t = Protocol::Tcp)]
    protocol: Protocol,
    /// Number of tries, 0 for no limit
    #[arg(short = 'n', long, value_name = "COUNT", default_value_t = 0)]
    tries: u32,
    /// Delay between tries [default: 1s]
    #[arg(short = 'w', long = "wait", value_name = "DURATION", value_parser = parse_duration)]
    wait: Option<Duration>,
    /// Timeout for each connection attempt, 0 to wait indefinitely [default: 30s]
    #[arg(short = 't', long, value_name = "DURATION", value_parser = parse_duration)]
    timeout: Option<Duration>,
}

/// A fully validated subcommand, ready to run.
#[derive(Debug)]
pub enum Action {
    Tunnel(TunnelConfig),
    Proxy(ProxyConfig),
    Waitconn(WaitConfig),
}

impl Cli {
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }

    pub fn into_action(self) -> Result<Action> {
        let quiet = self.quiet;
        Ok(match self.command {
            Command::Tunnel(args) => Action::Tunnel(args.into_config(quiet)?),
            Command::Proxy(args) => Action::Proxy(ProxyConfig::try_from(args)?),
            Command::Waitconn(args) => Action::Waitconn(WaitConfig::try_from(args)?),
        })
    }
}

impl TunnelArgs {
    pub fn into_config(self, quiet: bool) -> Result<TunnelConfig> {
        let TunnelArgs {
            listen,
            ssh,
            target,
            protocol,
            timeout,
            command,
            username,
            password,
            key_file,
            force,
        } = self;

        let listen = parse_listen_endpoint(&listen).with_context(|| format!("invalid listen address {listen:?}"))?;
        let ssh = parse_remote_endpoint(&ssh, Some(DEFAULT_SSH_PORT)).with_context(|| format!("invalid SSH address {ssh:?}"))?;
        let target = parse_remote_endpoint(&target, None).with_context(|| format!("invalid target address {target:?}"))?;

        let username = username
            .filter(|name| !name.is_empty())
            .or_else(fallback_username)
            .ok_or_else(|| anyhow!("unable to determine username; use --user"))?;
        let password = password
            .filter(|value| !value.is_empty())
            .map(|value| SecretString::new(value.into_boxed_str()));

        Ok(TunnelConfig {
            listen,
            ssh,
            target,
            protocol,
            dial_timeout: timeout.unwrap_or(DEFAULT_DIAL_TIMEOUT),
            remote_command: command,
            credentials: CredentialOptions {
                username,
                password,
                key_file,
            },
            force,
            quiet,
        })
    }
}

impl TryFrom<ProxyArgs> for ProxyConfig {
    type Error = anyhow::Error;

    fn try_from(args: ProxyArgs) -> Result<Self> {
        let ProxyArgs {
            listen,
            target,
            protocol,
            timeout,
        } = args;
        Ok(ProxyConfig {
            listen: parse_listen_endpoint(&listen).with_context(|| format!("invalid listen address {listen:?}"))?,
            target: parse_remote_endpoint(&target, None).with_context(|| format!("invalid target address {target:?}"))?,
            protocol,
            dial_timeout: timeout.unwrap_or(DEFAULT_DIAL_TIMEOUT),
        })
    }
}

impl TryFrom<WaitconnArgs> for WaitConfig {
    type Error = anyhow::Error;

    fn try_from(args: WaitconnArgs) -> Result<Self> {
        let WaitconnArgs {
            address,
            protocol,
            tries,
            wait,
            timeout,
        } = args;
        Ok(WaitConfig {
            address: parse_remote_endpoint(&address, None).with_context(|| format!("invalid address {address:?}"))?,
            protocol,
            tries,
            wait_delay: wait.unwrap_or(DEFAULT_WAIT_DELAY),
            connect_timeout: timeout.unwrap_or(DEFAULT_DIAL_TIMEOUT),
        })
    }
}

fn fallback_username() -> Option<String> {
    for key in ["USER", "LOGNAME", "USERNAME"] {
        if let Ok(value) = env::var(key)
            && !value.is_empty()
        {
            return Some(value);
        }
    }
    let current = whoami::username();
    if current.is_empty() { None } else { Some(current) }
}
