use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "framecast")]
#[command(about = "📷 Live still-frame streaming over WebSocket", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a display host: accept peers and show the latest received frame
    Host {
        /// Address to bind to
        #[arg(short, long, default_value = "127.0.0.1:8081")]
        addr: String,

        /// Force a terminal graphics protocol (sixel, kitty, iterm2, halfblocks)
        #[arg(short, long)]
        graphics: Option<String>,
    },

    /// Connect to a host and stream captured frames to it
    Cast {
        /// Host WebSocket URL
        #[arg(short, long, default_value = "ws://localhost:8081")]
        url: String,
    },

    /// Display frames from a single casting peer
    Watch {
        /// WebSocket URL of a casting endpoint to dial
        #[arg(short, long, conflicts_with = "listen")]
        url: Option<String>,

        /// Bind and wait for a casting peer to connect
        #[arg(short, long, default_value = "127.0.0.1:8082")]
        listen: String,

        /// Force a terminal graphics protocol (sixel, kitty, iterm2, halfblocks)
        #[arg(short, long)]
        graphics: Option<String>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
