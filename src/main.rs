mod capture;
mod cli;
mod connection;
mod endpoint;
mod host;
mod protocol;
mod viewer;

use anyhow::{Context, Result};
use cli::{Cli, Commands};

use capture::CaptureSource;
use connection::{ConnectionEvent, PeerConnection};
use endpoint::{EndpointController, NullSource, Role};
use viewer::{NullSink, TerminalViewer};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Host { addr, graphics } => run_host(&addr, graphics.as_deref()).await?,
        Commands::Cast { url } => run_cast(&url).await?,
        Commands::Watch {
            url,
            listen,
            graphics,
        } => run_watch(url.as_deref(), &listen, graphics.as_deref()).await?,
    }

    Ok(())
}

async fn run_host(addr: &str, graphics: Option<&str>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    println!("📡 framecast host");
    println!("   listening on: {}", addr);
    println!("   q to quit");

    let viewer = TerminalViewer::new(graphics)?;
    let quit_rx = TerminalViewer::spawn_input_listener();
    host::run_host(listener, viewer, quit_rx).await
}

async fn run_cast(url: &str) -> Result<()> {
    println!("🔌 Connecting to {}", url);
    let (mut conn, mut events) = PeerConnection::connect(url).await?;
    conn.start();
    println!("✅ Connected");

    let mut controller = EndpointController::new(conn, CaptureSource::new(), NullSink);
    controller
        .set_role(Role::Producer)
        .context("Failed to start frame capture")?;
    println!("📷 Casting... Ctrl-C to stop");

    while let Some(event) = events.recv().await {
        if let Some(event) = controller.handle_event(event) {
            match event {
                ConnectionEvent::Error(e) => {
                    controller.close();
                    return Err(e.into());
                }
                ConnectionEvent::Closed => {
                    println!("🔌 Peer closed the connection");
                    break;
                }
                _ => {}
            }
        }
    }

    controller.close();
    Ok(())
}

async fn run_watch(url: Option<&str>, listen: &str, graphics: Option<&str>) -> Result<()> {
    let (mut conn, mut events) = match url {
        Some(url) => {
            println!("🔌 Connecting to {}", url);
            PeerConnection::connect(url).await?
        }
        None => {
            let listener = tokio::net::TcpListener::bind(listen)
                .await
                .with_context(|| format!("Failed to bind {}", listen))?;
            println!("📺 Waiting for a caster on {}", listen);

            let (stream, addr) = listener.accept().await?;
            let ws = tokio_tungstenite::accept_async(stream)
                .await
                .context("WebSocket handshake failed")?;
            println!("✅ Caster connected: {}", addr);
            PeerConnection::accept(ws)
        }
    };
    conn.start();

    let viewer = TerminalViewer::new(graphics)?;
    let mut quit_rx = TerminalViewer::spawn_input_listener();

    let mut controller = EndpointController::new(conn, NullSource, viewer);
    controller.set_role(Role::Viewer)?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    if let Some(event) = controller.handle_event(event) {
                        match event {
                            ConnectionEvent::Error(e) => {
                                controller.close();
                                return Err(e.into());
                            }
                            ConnectionEvent::Closed => break,
                            _ => {}
                        }
                    }
                }
                None => break,
            },
            _ = quit_rx.recv() => break,
        }
    }

    controller.close();
    Ok(())
}
