use clap::{Parser, Subcommand, ValueEnum};

use crate::models::credential::CredentialKind;

/// Housee — authenticated gateway in front of Home Assistant
#[derive(Parser)]
#[command(name = "housee", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to bind (defaults to HOUSEE_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Inspect or rotate stored tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Run one upstream token renewal check and exit
    Renew {
        /// Issue a new token even if the stored one is not expiring
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Print the stored token record
    Show {
        #[arg(long, value_enum, default_value = "gateway")]
        kind: KindArg,
    },
    /// Replace the gateway token with a fresh random one
    Rotate,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum KindArg {
    Gateway,
    Upstream,
}

impl From<KindArg> for CredentialKind {
    fn from(k: KindArg) -> Self {
        match k {
            KindArg::Gateway => CredentialKind::GatewayAuth,
            KindArg::Upstream => CredentialKind::UpstreamAccess,
        }
    }
}
