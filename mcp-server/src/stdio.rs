//! stdio upstream transport: newline-framed JSON-RPC on stdin/stdout. Stdout
//! is reserved for protocol framing — nothing else may write to it; all
//! diagnostics go through `tracing` to stderr. Split into reader/processor/
//! writer tasks, with stdin EOF and SIGINT/SIGTERM as shutdown triggers.

use std::sync::Arc;

use hypertool_core::ProxyRuntime;
use mcp_types::JSONRPCMessage;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::io::{self};
use tokio::sync::mpsc;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::message_processor::MessageProcessor;
use crate::notifications::run_list_changed_notifier;
use crate::shutdown::shutdown_signal;

const CHANNEL_CAPACITY: usize = 128;

/// Runs the stdio upstream server to completion: until stdin hits EOF, a
/// shutdown signal arrives, or a transport error breaks the pipeline.
pub async fn serve(runtime: Arc<ProxyRuntime>) -> anyhow::Result<()> {
    let (incoming_tx, mut incoming_rx) = mpsc::channel::<JSONRPCMessage>(CHANNEL_CAPACITY);
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<JSONRPCMessage>(CHANNEL_CAPACITY);

    let stdin_reader = tokio::spawn({
        let incoming_tx = incoming_tx.clone();
        async move {
            let stdin = io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            while let Some(line) = lines.next_line().await.unwrap_or_default() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<JSONRPCMessage>(&line) {
                    Ok(msg) => {
                        if incoming_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => error!("failed to deserialize JSON-RPC message: {e}"),
                }
            }
            debug!("stdin reader finished (EOF)");
        }
    });

    let processor_handle = tokio::spawn({
        let outgoing_tx = outgoing_tx.clone();
        let mut processor = MessageProcessor::new(runtime.clone());
        async move {
            while let Some(msg) = incoming_rx.recv().await {
                if let Some(response) = processor.handle(msg).await {
                    if outgoing_tx.send(response).await.is_err() {
                        break;
                    }
                }
            }
            info!("request processor exited (channel closed)");
        }
    });

    let notifier_handle = tokio::spawn(run_list_changed_notifier(runtime.clone(), outgoing_tx.clone()));

    let stdout_writer = tokio::spawn(async move {
        let mut stdout = io::stdout();
        while let Some(msg) = outgoing_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if stdout.write_all(json.as_bytes()).await.is_err()
                        || stdout.write_all(b"\n").await.is_err()
                        || stdout.flush().await.is_err()
                    {
                        error!("failed to write to stdout; stopping writer");
                        break;
                    }
                }
                Err(e) => error!("failed to serialize outgoing message: {e}"),
            }
        }
        info!("stdout writer exited (channel closed)");
    });

    tokio::select! {
        _ = stdin_reader => {}
        _ = shutdown_signal() => {
            info!("shutdown signal received, draining in-flight stdio work");
        }
    }

    processor_handle.abort();
    notifier_handle.abort();
    stdout_writer.abort();
    runtime.shutdown().await;
    Ok(())
}
