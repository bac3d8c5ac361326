//! Terminal frame display using ratatui-image.
//!
//! Renders the most recently received JPEG with the best graphics protocol
//! the terminal supports (Sixel, Kitty, iTerm2, halfblocks fallback). Only
//! ever holds one frame: a newer frame overwrites the previous one.

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use image::codecs::jpeg::JpegDecoder;
use image::{DynamicImage, ImageDecoder, RgbImage};
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::widgets::Paragraph;
use ratatui::{backend::CrosstermBackend, Terminal};
use ratatui_image::picker::{Picker, ProtocolType};
use ratatui_image::protocol::StatefulProtocol;
use ratatui_image::StatefulImage;
use std::io::{self, Cursor};
use std::time::Duration;
use tokio::sync::mpsc;

/// Where decoded image payloads end up. Synchronous, overwrite semantics:
/// each `show` replaces whatever was displayed before.
pub trait DisplaySink {
    fn show(&mut self, payload: &[u8]);

    /// Observability hook for the multi-peer host; most sinks ignore it.
    fn set_peer_count(&mut self, _count: usize) {}
}

/// Discards everything. Used on the casting side, which displays nothing.
pub struct NullSink;

impl DisplaySink for NullSink {
    fn show(&mut self, _payload: &[u8]) {}
}

/// Create a Picker by querying terminal capabilities.
///
/// If `force_protocol` is Some, skip detection and use that protocol.
/// Must be called BEFORE entering raw mode / alternate screen.
pub fn create_picker(force_protocol: Option<&str>) -> Picker {
    if let Some(proto_name) = force_protocol {
        let proto_type = match proto_name.to_lowercase().as_str() {
            "sixel" => ProtocolType::Sixel,
            "kitty" => ProtocolType::Kitty,
            "iterm2" | "iterm" => ProtocolType::Iterm2,
            "halfblocks" | "half" | "text" => ProtocolType::Halfblocks,
            _ => {
                eprintln!(
                    "⚠️  Unknown graphics protocol '{}', using auto-detect",
                    proto_name
                );
                return auto_detect_picker();
            }
        };
        let mut picker = Picker::halfblocks();
        picker.set_protocol_type(proto_type);
        eprintln!("🖥️  Graphics: forced {:?}", proto_type);
        return picker;
    }

    auto_detect_picker()
}

fn auto_detect_picker() -> Picker {
    match Picker::from_query_stdio() {
        Ok(picker) => {
            eprintln!("🖥️  Graphics: detected {:?}", picker.protocol_type());
            picker
        }
        Err(_) => {
            let picker = env_heuristic_picker();
            eprintln!("🖥️  Graphics: {:?} (env heuristic)", picker.protocol_type());
            picker
        }
    }
}

/// Guess the protocol from environment variables when the stdio query fails.
fn env_heuristic_picker() -> Picker {
    let term_program = std::env::var("TERM_PROGRAM").unwrap_or_default();
    let term = std::env::var("TERM").unwrap_or_default();

    let proto = if term_program.contains("WezTerm") {
        ProtocolType::Sixel
    } else if term_program.contains("iTerm") {
        ProtocolType::Iterm2
    } else if term.contains("xterm-kitty") || term_program.to_lowercase().contains("kitty") {
        ProtocolType::Kitty
    } else if term_program.to_lowercase().contains("ghostty") {
        ProtocolType::Kitty
    } else if !std::env::var("WT_SESSION").unwrap_or_default().is_empty() {
        // Windows Terminal
        ProtocolType::Sixel
    } else {
        ProtocolType::Halfblocks
    };

    let mut picker = Picker::halfblocks();
    if proto != ProtocolType::Halfblocks {
        picker.set_protocol_type(proto);
    }
    picker
}

/// Decode a JPEG payload into a DynamicImage for ratatui-image.
fn decode_jpeg(payload: &[u8]) -> Result<DynamicImage> {
    let decoder = JpegDecoder::new(Cursor::new(payload))
        .map_err(|e| anyhow::anyhow!("JPEG decode failed: {}", e))?;

    let (w, h) = decoder.dimensions();
    let mut rgb = vec![0u8; decoder.total_bytes() as usize];
    decoder
        .read_image(&mut rgb)
        .map_err(|e| anyhow::anyhow!("JPEG read failed: {}", e))?;

    let rgb_image: RgbImage =
        image::ImageBuffer::from_raw(w, h, rgb).ok_or_else(|| anyhow::anyhow!("Bad dims"))?;

    Ok(DynamicImage::ImageRgb8(rgb_image))
}

/// Full-screen latest-frame display. Enters the alternate screen on
/// creation and restores the terminal on drop.
pub struct TerminalViewer {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
    picker: Picker,
    protocol: Option<StatefulProtocol>,
    peer_count: Option<usize>,
    frames_shown: u64,
}

impl TerminalViewer {
    pub fn new(force_protocol: Option<&str>) -> Result<Self> {
        let picker = create_picker(force_protocol);

        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;

        let mut viewer = Self {
            terminal,
            picker,
            protocol: None,
            peer_count: None,
            frames_shown: 0,
        };
        viewer.draw()?;
        Ok(viewer)
    }

    /// Spawn a blocking key reader. Sends one message per quit request
    /// (`q`, Esc, or Ctrl-C).
    pub fn spawn_input_listener() -> mpsc::UnboundedReceiver<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || loop {
            if !event::poll(Duration::from_millis(100)).unwrap_or(false) {
                continue;
            }
            if let Ok(Event::Key(key)) = event::read() {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                let quit = matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
                    || (key.code == KeyCode::Char('c')
                        && key.modifiers.contains(KeyModifiers::CONTROL));
                if quit && tx.send(()).is_err() {
                    return;
                }
            }
        });
        rx
    }

    fn draw(&mut self) -> Result<()> {
        let status = match self.peer_count {
            Some(n) => format!(
                " connections: {} | frames: {} | q to quit ",
                n, self.frames_shown
            ),
            None => format!(" frames: {} | q to quit ", self.frames_shown),
        };
        let protocol = &mut self.protocol;

        self.terminal.draw(|f| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(1), Constraint::Length(1)])
                .split(f.area());

            if let Some(protocol) = protocol.as_mut() {
                f.render_stateful_widget(StatefulImage::default(), chunks[0], protocol);
            } else {
                f.render_widget(Paragraph::new("waiting for frames..."), chunks[0]);
            }
            f.render_widget(Paragraph::new(status), chunks[1]);
        })?;
        Ok(())
    }
}

impl DisplaySink for TerminalViewer {
    fn show(&mut self, payload: &[u8]) {
        match decode_jpeg(payload) {
            Ok(image) => {
                self.protocol = Some(self.picker.new_resize_protocol(image));
                self.frames_shown += 1;
                if let Err(e) = self.draw() {
                    eprintln!("⚠️  Draw failed: {}", e);
                }
            }
            // Broken payload: keep showing the previous frame
            Err(e) => eprintln!("⚠️  {}", e),
        }
    }

    fn set_peer_count(&mut self, count: usize) {
        self.peer_count = Some(count);
        let _ = self.draw();
    }
}

impl Drop for TerminalViewer {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}
