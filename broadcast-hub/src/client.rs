use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::cli::ConnectArgs;

type ServerLines = Lines<BufReader<OwnedReadHalf>>;
type StdinLines = Lines<BufReader<io::Stdin>>;

/// Relays stdin lines to the hub and hub lines to stdout until either side
/// closes or ctrl-c is pressed.
pub async fn run(args: ConnectArgs) -> Result<()> {
    let (mut server, mut writer) = establish_connection(&args).await?;
    let mut stdin = BufReader::new(io::stdin()).lines();

    run_client_loop(&mut server, &mut writer, &mut stdin).await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(args: &ConnectArgs) -> Result<(ServerLines, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader).lines(), writer))
}

async fn run_client_loop(
    server: &mut ServerLines,
    writer: &mut OwnedWriteHalf,
    stdin: &mut StdinLines,
) -> Result<()> {
    loop {
        select! {
            server_line = server.next_line() => {
                if !handle_server_line(server_line).await? {
                    break;
                }
            }
            input = stdin.next_line() => {
                if !handle_stdin_line(input, writer).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_line(line: io::Result<Option<String>>) -> Result<bool> {
    match line? {
        Some(line) => {
            write_stdout(&line).await?;
            Ok(true)
        }
        None => {
            write_stderr("*** hub closed the connection").await?;
            Ok(false)
        }
    }
}

async fn handle_stdin_line(
    input: io::Result<Option<String>>,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    let Some(line) = input? else {
        return Ok(false);
    };

    if line.is_empty() {
        return Ok(true);
    }

    writer
        .write_all(format!("{line}\n").as_bytes())
        .await
        .context("failed to send line to hub")?;
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
