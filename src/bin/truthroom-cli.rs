//! Line-oriented client for a truthroom server.
//!
//! Reads commands from stdin and prints the room whenever it changes.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use truthroom::client::{
    FileIdentityCache, RoomSession, SessionConfig, SessionStatus, SessionView, WsTransport,
};
use truthroom::config::{self, ClientConfig};
use truthroom::error::RoomResult;

const HELP: &str = "\
Commands:
  create        create a room and become its host
  join CODE     join a room by its 4-character code
  ask TEXT      submit a question
  start         start the game (host, needs 2 players and 3 questions)
  draw          draw the next question
  leave         leave the room
  status        show the room
  quit          leave and exit";

fn render(view: &SessionView) -> String {
    let Some(room_id) = &view.room_id else {
        return "Not in a room".to_string();
    };
    let status = match view.status {
        SessionStatus::NoRoom => "no room",
        SessionStatus::Waiting => "waiting",
        SessionStatus::Playing => "playing",
        SessionStatus::Ended => "ended",
    };
    let mut out = format!(
        "Room {} [{}]{} players: {}, questions left: {}, drawn: {}",
        room_id,
        status,
        if view.is_host { " (host)" } else { "" },
        view.player_count,
        view.question_count,
        view.used_question_count,
    );
    if let Some(question) = &view.current_question {
        out.push_str(&format!("\n  >> {}", question));
    }
    if view.status == SessionStatus::Ended {
        out.push_str("\n  No questions left, game over.");
    }
    out
}

/// Returns false when the loop should stop
async fn run_command(session: &RoomSession, line: &str) -> RoomResult<bool> {
    let (command, rest) = line
        .split_once(char::is_whitespace)
        .map(|(c, r)| (c, r.trim()))
        .unwrap_or((line, ""));

    match command {
        "create" => {
            let room_id = session.create_room().await?;
            println!("Created room {}. Share the code with other players.", room_id);
        }
        "join" => {
            let room_id = session.join_room(rest).await?;
            println!("Joined room {}", room_id);
        }
        "ask" => session.submit_question(rest).await?,
        "start" => session.start_game().await?,
        "draw" => session.draw_question().await?,
        "leave" => session.leave_room().await?,
        "status" => println!("{}", render(&session.view())),
        "quit" | "exit" => return Ok(false),
        "help" | "" => println!("{}", HELP),
        other => println!("Unknown command {:?}, try help", other),
    }
    Ok(true)
}

#[tokio::main]
async fn main() {
    config::load_dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "truthroom=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let client_config = match ClientConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Cannot start: {}", e);
            std::process::exit(1);
        }
    };

    let transport = match WsTransport::connect(&client_config.server_url).await {
        Ok(t) => Arc::new(t),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let session = RoomSession::new(
        transport.clone(),
        transport,
        Arc::new(FileIdentityCache::new(client_config.identity_file.clone())),
        SessionConfig::from(&client_config),
    );

    match session.recover().await {
        Ok(true) => println!("Reconnected. {}", render(&session.view())),
        Ok(false) => {}
        Err(e) => eprintln!("Could not restore previous room: {}", e),
    }

    let mut views = session.watch();
    let printer = tokio::spawn(async move {
        while views.changed().await.is_ok() {
            let view = views.borrow_and_update().clone();
            println!("{}", render(&view));
        }
    });

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => match run_command(&session, line.trim()).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("Error: {}", e),
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Cannot read stdin: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.shutdown().await;
    printer.abort();
}
