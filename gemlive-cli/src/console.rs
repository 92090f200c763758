use crate::config::Settings;
use anyhow::Result;
use gemlive::{
    LiveSession, RecentTurns, SessionEvent, Supervisor, SupervisorEvent, WsTransport,
    serve_tool_calls,
};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Exchanges kept for the reconnect context turn.
const RECENT_TURNS: usize = 8;

enum Input {
    Line(String),
    Quit,
}

/// Read lines on a plain thread; rustyline blocks.
fn spawn_reader() -> Result<mpsc::UnboundedReceiver<Input>> {
    let mut rl = DefaultEditor::new()?;
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new().name("gemlive-readline".into()).spawn(move || {
        loop {
            match rl.readline("> ") {
                Ok(line) => {
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(&line);
                    if tx.send(Input::Line(line)).is_err() {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted | ReadlineError::Eof) => {
                    let _ = tx.send(Input::Quit);
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Readline failed");
                    let _ = tx.send(Input::Quit);
                    break;
                }
            }
        }
    })?;
    Ok(rx)
}

pub async fn run_console(settings: Settings, audio: bool) -> Result<()> {
    let registry = Arc::new(crate::tools::registry());
    let config = settings.session_config(registry.declarations())?;

    let session = LiveSession::new(Arc::new(WsTransport::default()));
    let recent = Arc::new(RecentTurns::new(RECENT_TURNS));
    let (supervisor, mut supervision) =
        Supervisor::new(session.clone(), config, recent.clone(), settings.reconnect.clone());

    let mut events = session.subscribe();
    tokio::spawn(serve_tool_calls(session.clone(), registry, session.subscribe()));
    let _audio = if audio { Some(audio::start(&session)?) } else { None };

    println!("gemlive: {}", settings.model);
    println!("Type a message and press Enter.");
    println!("/reconnect after a fatal error, /quit or Ctrl+D to exit.\n");

    if let Err(e) = supervisor.connect().await {
        anyhow::bail!(e.user_message());
    }
    info!(session_id = %session.session_id(), "Connected");

    let mut input = spawn_reader()?;
    let mut answering = false;

    loop {
        tokio::select! {
            line = input.recv() => match line {
                Some(Input::Line(line)) if line == "/quit" => break,
                Some(Input::Line(line)) if line == "/reconnect" => {
                    if let Err(e) = supervisor.connect().await {
                        eprintln!("{}", e.user_message());
                    }
                }
                Some(Input::Line(line)) => {
                    match session.send_text(&line) {
                        Ok(()) => recent.record_user(line),
                        Err(e) => eprintln!("Not sent: {e}"),
                    }
                }
                Some(Input::Quit) | None => break,
            },
            event = events.recv() => match event {
                Some(SessionEvent::Text(text)) => {
                    if !answering {
                        print!("\nModel -> ");
                        answering = true;
                    }
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                }
                Some(SessionEvent::TurnComplete(summary)) => {
                    if answering {
                        println!("\n");
                        answering = false;
                    }
                    debug!(
                        audio_chunks = summary.audio_chunks,
                        audio_bytes = summary.audio_bytes,
                        "Turn complete"
                    );
                    recent.record_model(summary.text);
                }
                Some(SessionEvent::Interrupted) => {
                    if answering {
                        println!(" [interrupted]\n");
                        answering = false;
                    }
                }
                Some(SessionEvent::GoAway(time_left)) => {
                    info!(
                        time_left = time_left.as_deref().unwrap_or("unknown"),
                        "Server will close the connection soon"
                    );
                }
                Some(_) => {}
                None => break,
            },
            Some(event) = supervision.recv() => match event {
                SupervisorEvent::Reconnecting { code, reason, .. } => {
                    eprintln!("\n[connection lost ({code} {reason}), reconnecting...]");
                }
                SupervisorEvent::Reconnected => eprintln!("[reconnected]"),
                SupervisorEvent::SessionError(e) | SupervisorEvent::Fatal(e) => {
                    eprintln!("\n{}", e.user_message());
                    eprintln!("Type /reconnect to try again.");
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    supervisor.disconnect();
    println!("Goodbye.");
    Ok(())
}

#[cfg(feature = "desktop-audio")]
mod audio {
    use anyhow::Result;
    use gemlive::LiveSession;
    use gemlive_audio::{InputDevice, OutputDevice, drive_playback, forward_capture};

    /// Open devices stay alive while this is held.
    pub struct Devices {
        _input: InputDevice,
        _output: OutputDevice,
    }

    pub fn start(session: &LiveSession) -> Result<Devices> {
        let (input, control, chunks) = InputDevice::open_default()?;
        let (output, queue) = OutputDevice::open_default()?;
        tokio::spawn(forward_capture(session.clone(), chunks));
        tokio::spawn(drive_playback(session.subscribe(), queue));
        control.start();
        Ok(Devices { _input: input, _output: output })
    }
}

#[cfg(not(feature = "desktop-audio"))]
mod audio {
    use anyhow::Result;
    use gemlive::LiveSession;

    pub struct Devices;

    pub fn start(_session: &LiveSession) -> Result<Devices> {
        anyhow::bail!("audio support not compiled in; rebuild with --features desktop-audio")
    }
}
