//! Per-connection handling: read client frames off the socket, dispatch them
//! to the game controller, and drain the connection's outbox back out.

use std::sync::Arc;

use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::game::GameController;
use crate::protocol::{parse_line, ArgumentError, ClientCommand};

/// Owns one accepted socket for its whole lifetime: attaches to the
/// controller, splits the stream into a reader half (driven by this task)
/// and a writer half (driven by a spawned task fed from the outbox), and
/// detaches on EOF or any I/O error.
pub async fn handle_connection(stream: TcpStream, controller: Arc<GameController>, peer: String) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let (conn_id, mut outbox_rx) = controller.attach().await;
    debug!("{peer}: attached as connection {conn_id}");

    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbox_rx.recv().await {
            if write_half.write_all(message.as_bytes()).await.is_err() {
                break;
            }
            if write_half.write_all(b"\n").await.is_err() {
                break;
            }
        }
    });

    let mut line = String::new();
    loop {
        line.clear();
        let bytes_read = match reader.read_line(&mut line).await {
            Ok(n) => n,
            Err(err) => {
                warn!("{peer}: read error: {err}");
                break;
            }
        };
        if bytes_read == 0 {
            debug!("{peer}: connection closed");
            break;
        }

        let trimmed = line.trim_end_matches(['\r', '\n']).to_string();
        if trimmed.is_empty() {
            continue;
        }

        dispatch(&controller, conn_id, &trimmed).await;
    }

    controller.detach(conn_id).await;
    writer_task.abort();
}

/// Parses and routes a single client frame, replying with a
/// `<COMMAND>_FAILURE;<reason>` line on any typed error (REGISTER's failure
/// tag is `REGISTRATION_FAILURE`, not `REGISTER_FAILURE`). Unknown commands
/// and malformed argument lists are silently ignored rather than torn down.
async fn dispatch(controller: &Arc<GameController>, conn_id: u64, line: &str) {
    match parse_line(line) {
        ClientCommand::Register { nickname } => {
            if let Err(err) = controller.handle_register(conn_id, &nickname).await {
                controller.unicast(conn_id, &format!("REGISTRATION_FAILURE;{err}")).await;
            }
        }
        ClientCommand::Ready => match controller.handle_ready(conn_id).await {
            Ok(true) => {
                let controller = Arc::clone(controller);
                tokio::spawn(async move { controller.run_round_loop().await });
            }
            Ok(false) => {}
            Err(err) => controller.unicast(conn_id, &format!("READY_FAILURE;{err}")).await,
        },
        ClientCommand::Unready => {
            if let Err(err) = controller.handle_unready(conn_id).await {
                controller.unicast(conn_id, &format!("UNREADY_FAILURE;{err}")).await;
            }
        }
        ClientCommand::Answer { value } => {
            if let Err(err) = controller.handle_answer(conn_id, value).await {
                controller.unicast(conn_id, &format!("ANSWER_FAILURE;{err}")).await;
            }
        }
        ClientCommand::Malformed { command } => {
            let tag = if command == "REGISTER" { "REGISTRATION" } else { &command };
            let err = ArgumentError::InvalidArguments;
            controller.unicast(conn_id, &format!("{tag}_FAILURE;{err}")).await;
        }
        ClientCommand::Unknown => {}
    }
}
