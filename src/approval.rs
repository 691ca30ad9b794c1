//! Human-in-the-loop approval before a request is forwarded.

use async_trait::async_trait;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines, Stdin, Stdout,
};
use tokio::sync::Mutex;

use crate::error::{GatewayError, Result};

#[async_trait]
pub trait ApprovalGate: Send + Sync {
    /// Suspend until the request described by `summary` is approved.
    ///
    /// # Errors
    /// Returns `GatewayError::ApprovalRejected` when the request is refused.
    async fn await_approval(&self, summary: &str) -> Result<()>;
}

/// Approves everything. Used when manual approval is off.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalGate for AutoApprove {
    async fn await_approval(&self, _summary: &str) -> Result<()> {
        Ok(())
    }
}

/// Asks an operator on a line-oriented console. `y`/`yes` approves; anything
/// else, including end of input, rejects. One prompt at a time.
pub struct PromptApproval<R, W> {
    console: Mutex<(Lines<R>, W)>,
}

impl PromptApproval<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> PromptApproval<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            console: Mutex::new((reader.lines(), writer)),
        }
    }
}

#[async_trait]
impl<R, W> ApprovalGate for PromptApproval<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn await_approval(&self, summary: &str) -> Result<()> {
        let mut console = self.console.lock().await;
        let (lines, writer) = &mut *console;

        writer
            .write_all(format!("Accept incoming request? {summary} [y/N] ").as_bytes())
            .await?;
        writer.flush().await?;

        let answer = lines.next_line().await?.unwrap_or_default();
        match answer.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => {
                tracing::info!(%summary, "Request approved");
                Ok(())
            }
            _ => {
                tracing::warn!(%summary, "Request rejected by operator");
                Err(GatewayError::ApprovalRejected)
            }
        }
    }
}
