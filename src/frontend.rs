//! JSON-lines front end: one request per input line, one JSON document per output line.
//!
//! A line starting with `{` is a [`TranslationRequest`]; any other non-empty line is
//! translated from `auto` into the default target. `:status`, `:flush` and
//! `:languages` are commands. Translations run as separate tasks, so replies come
//! back in completion order; a request `id` is echoed to correlate them.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info, warn};

use crate::service::TranslationService;
use crate::translate::{TranslationRequest, TranslationResponse, AUTO_LANG};
use crate::ServiceError;

/// Serve stdin/stdout until EOF or Ctrl-C.
pub async fn serve_lines(
    service: &Arc<TranslationService>,
    default_target: &str,
) -> Result<(), ServiceError> {
    serve(
        service,
        default_target,
        tokio::io::stdin(),
        tokio::io::stdout(),
        interrupted(),
    )
    .await
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
}

/// Read requests until `input` closes, then drain outstanding replies.
/// `shutdown` stops immediately without waiting for in-flight requests.
pub async fn serve<R, W, S>(
    service: &Arc<TranslationService>,
    default_target: &str,
    input: R,
    mut output: W,
    shutdown: S,
) -> Result<(), ServiceError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    S: Future<Output = ()>,
{
    let mut lines = BufReader::new(input).lines();
    let (tx, mut replies) = mpsc::unbounded_channel::<String>();
    // Dropped at EOF so the reply channel closes once the last task finishes.
    let mut tx = Some(tx);
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupt received");
                break;
            }
            line = lines.next_line(), if tx.is_some() => match line? {
                Some(line) => {
                    if let Some(tx) = &tx {
                        dispatch_line(service, line.trim(), default_target, tx);
                    }
                }
                None => {
                    debug!("input closed, draining replies");
                    tx = None;
                }
            },
            reply = replies.recv() => match reply {
                Some(reply) => {
                    output.write_all(reply.as_bytes()).await?;
                    output.write_all(b"\n").await?;
                    output.flush().await?;
                }
                None => break,
            },
        }
    }
    Ok(())
}

fn send_json<T: Serialize>(tx: &UnboundedSender<String>, value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => {
            if tx.send(line).is_err() {
                debug!("reply dropped, output closed");
            }
        }
        Err(e) => warn!(error = %e, "reply encoding failed"),
    }
}

/// Commands answer inline; translations and flushes run on their own tasks.
fn dispatch_line(
    service: &Arc<TranslationService>,
    line: &str,
    default_target: &str,
    tx: &UnboundedSender<String>,
) {
    let request = match line {
        "" => return,
        ":status" => return send_json(tx, &service.status()),
        ":languages" => {
            let table: BTreeMap<&str, &str> = service.languages().iter().collect();
            return send_json(tx, &table);
        }
        ":flush" => {
            let service = Arc::clone(service);
            let tx = tx.clone();
            tokio::spawn(async move {
                let report = service.flush().await;
                send_json(&tx, &report);
            });
            return;
        }
        _ if line.starts_with('{') => match serde_json::from_str::<TranslationRequest>(line) {
            Ok(request) => request,
            Err(e) => {
                let response = TranslationResponse {
                    error: Some(format!("invalid request: {e}")),
                    ..TranslationResponse::default()
                };
                return send_json(tx, &response);
            }
        },
        _ => TranslationRequest::new(line, AUTO_LANG, default_target),
    };

    let service = Arc::clone(service);
    let tx = tx.clone();
    tokio::spawn(async move {
        let response = service.translate(request).await;
        send_json(&tx, &response);
    });
}
