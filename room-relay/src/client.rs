use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    frame::{Frame, FrameError, MAX_FRAME_LEN, PacketKind, read_frame, write_frame},
};

pub async fn run(args: ClientArgs) -> Result<()> {
    let (reader, mut writer) = establish_connection(&args).await?;
    send_handshake(&mut writer, &args.room).await?;
    write_stdout(&format!("*** joined room {}", args.room)).await?;

    let mut incoming = tokio::spawn(receive_packets(reader));
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    run_client_loop(&mut writer, &mut stdin, &mut input, &mut incoming).await?;
    incoming.abort();
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(args: &ClientArgs) -> Result<(OwnedReadHalf, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    stream.set_nodelay(true)?;

    info!("connected to {}", args.server);
    Ok(stream.into_split())
}

async fn send_handshake(writer: &mut OwnedWriteHalf, room: &str) -> Result<()> {
    let frame = Frame::handshake(room.as_bytes())?;
    write_frame(writer, &frame)
        .await
        .context("failed to send handshake")?;
    Ok(())
}

async fn run_client_loop(
    writer: &mut OwnedWriteHalf,
    stdin: &mut BufReader<tokio::io::Stdin>,
    input: &mut String,
    incoming: &mut JoinHandle<Result<()>>,
) -> Result<()> {
    loop {
        input.clear();
        select! {
            bytes_read = stdin.read_line(input) => {
                if !handle_stdin_input(bytes_read, input, writer).await? {
                    break;
                }
            }
            finished = &mut *incoming => {
                match finished {
                    Ok(Ok(())) => write_stdout("*** relay closed the connection").await?,
                    Ok(Err(err)) => write_stderr(&format!("!!! {err:#}")).await?,
                    Err(err) => warn!(error = ?err, "receive task failed"),
                }
                break;
            }
        }
    }
    Ok(())
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    let bytes_read = bytes_read?;
    if bytes_read == 0 {
        write_stdout("*** leaving room").await?;
        return Ok(false);
    }

    let text = input.trim_end();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving room").await?;
        return Ok(false);
    }

    let frame = Frame::new(PacketKind::Chat, text.as_bytes())?;
    write_frame(writer, &frame)
        .await
        .context("failed to send chat packet")?;
    Ok(true)
}

/// Prints relayed packets until the relay hangs up.
async fn receive_packets(mut reader: OwnedReadHalf) -> Result<()> {
    loop {
        match read_frame(&mut reader, MAX_FRAME_LEN).await {
            Ok(frame) => render_packet(&frame).await?,
            Err(FrameError::Closed) => return Ok(()),
            Err(err) => return Err(err).context("failed to read from relay"),
        }
    }
}

async fn render_packet(frame: &Frame) -> io::Result<()> {
    match frame.kind() {
        PacketKind::Chat => {
            let text = String::from_utf8_lossy(frame.payload());
            write_stdout(&format!("<chat> {text}")).await
        }
        PacketKind::Clear => write_stdout("<clear>").await,
        kind => write_stdout(&format!("<{kind}> {} bytes", frame.payload().len())).await,
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
