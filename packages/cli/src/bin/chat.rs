//! Interactive terminal client for the chat service.
//!
//! Connects to the chat websocket and prints events as they arrive. Lines
//! typed at the prompt are sent as chat messages; `/w <nick> <message>` sends
//! a whisper. Sending is disabled unless `--enable-sending` is passed.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin strim-chat -- --auth-token <token> --enable-sending
//! ```

use clap::Parser;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;

use strim_chat::{AuthContext, ChatClient, ChatConfig, ClientError, Handlers};
use strim_chat_cli::formatter::MessageFormatter;
use strim_chat_cli::logger::setup_logger;
use strim_chat_cli::ui::redisplay_prompt;

#[derive(Parser, Debug)]
#[command(name = "chat")]
#[command(about = "Terminal client for the chat service", long_about = None)]
struct Args {
    /// Auth token (64 character alphanumeric string from the profile page)
    #[arg(short = 't', long)]
    auth_token: Option<String>,

    /// Session id cookie, needed for whisper inbox features
    #[arg(short = 's', long)]
    session_id: Option<String>,

    /// Websocket URL of the chat service
    #[arg(short = 'u', long, default_value = strim_chat::config::DEFAULT_WS_URL)]
    url: String,

    /// Base URL of the HTTP API
    #[arg(long, default_value = strim_chat::config::DEFAULT_API_URL)]
    api_url: String,

    /// Allow sending chat messages (off by default as a safety measure)
    #[arg(long)]
    enable_sending: bool,

    /// Replay recent chat history on connect
    #[arg(long)]
    history: bool,

    /// Replay unread whispers on connect (requires --session-id)
    #[arg(long)]
    unread_whispers: bool,

    /// Reconnect attempts after a dropped connection
    #[arg(long, default_value_t = 5)]
    reconnect_attempts: u32,
}

#[tokio::main]
async fn main() {
    setup_logger(env!("CARGO_BIN_NAME"), "warn");

    let args = Args::parse();

    if let Err(e) = run(args).await {
        tracing::error!("client error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), ClientError> {
    let config = ChatConfig {
        auth: AuthContext {
            auth_token: args.auth_token,
            session_id: args.session_id,
        },
        enable_chat_sending: args.enable_sending,
        handle_history: args.history,
        handle_unread_whispers: args.unread_whispers,
        mark_whispers_as_read: args.unread_whispers,
        reconnect_attempts: args.reconnect_attempts,
        ws_url: args.url,
        api_url: args.api_url,
        ..ChatConfig::default()
    };

    let handlers = Handlers::new()
        .on_any_message(|_, event| {
            print!("{}", MessageFormatter::format_event(event));
            redisplay_prompt();
            Ok(())
        })
        .on_mention(|_, event| {
            print!("{}", MessageFormatter::format_mention(event));
            redisplay_prompt();
            Ok(())
        })
        .on_socket_error(|_, event| {
            print!("{}", MessageFormatter::format_event(event));
            Ok(())
        })
        .on_socket_closed(|_, event| {
            print!("{}", MessageFormatter::format_event(event));
            Ok(())
        })
        .on_handler_error(|_, event| {
            tracing::warn!("handler error event: {:?}", event);
            Ok(())
        });

    let client = ChatClient::new(config, handlers)?;
    client.connect().await?;

    println!("\nConnected. Type a message and press Enter to send, /w <nick> <message> to whisper, Ctrl+C to exit.\n");

    // Rustyline is synchronous; it runs on its own thread and feeds lines
    // through a channel. Dropping the channel ends the session.
    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                eprintln!("Failed to initialize readline: {}", e);
                return;
            }
        };

        loop {
            match rl.readline("> ") {
                Ok(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        rl.add_history_entry(line).ok();
                        if input_tx.send(line.to_string()).is_err() {
                            break;
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    tracing::info!("Interrupted");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    tracing::info!("EOF");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {}", err);
                    break;
                }
            }
        }
    });

    let handle = client.handle();
    let mut input_task = tokio::spawn(async move {
        while let Some(line) = input_rx.recv().await {
            let result = if let Some(rest) = line.strip_prefix("/w ") {
                match rest.split_once(' ') {
                    Some((target, text)) => handle.send_whisper(target, text),
                    None => {
                        eprintln!("usage: /w <nick> <message>");
                        continue;
                    }
                }
            } else {
                handle.send_chat_message(&line)
            };

            if let Err(e) = result {
                eprintln!("{}", e);
            }
            redisplay_prompt();
        }
    });

    tokio::select! {
        _ = client.run() => {
            input_task.abort();
        }
        _ = &mut input_task => {
            // Input side ended (Ctrl+C / Ctrl+D): wind the session down.
            let _ = client.disconnect();
            client.run().await;
        }
    }

    Ok(())
}
