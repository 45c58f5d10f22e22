use std::io;
use std::sync::Arc;

use pilot_cli::app::{App, InterruptAction};
use routine_pilot::{ClientConfig, Session, TracingSink};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let config = ClientConfig::from_env().map_err(io::Error::other)?;
    let session = Session::connect(config, Arc::new(TracingSink)).map_err(io::Error::other)?;
    let mut app = App::new(session);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(b"routine-pilot ready. Type /help for commands.\n")
        .await?;

    while !app.should_exit {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                for output in app.handle_line(&line).await {
                    stdout.write_all(output.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                }
                stdout.flush().await?;
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                match app.on_interrupt() {
                    InterruptAction::Warn(message) => {
                        stdout.write_all(message.as_bytes()).await?;
                        stdout.write_all(b"\n").await?;
                        stdout.flush().await?;
                    }
                    InterruptAction::Exit => break,
                }
            }
        }
    }

    app.session().teardown();
    Ok(())
}
