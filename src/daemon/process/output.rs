//! Forwarding of daemon stdout/stderr to line handlers.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::constants::SERVICE_LOG_TARGET;
use crate::daemon::spec::OutputHandler;

/// Spawn a task that feeds every line of `reader` to `handler` until EOF.
pub(super) fn forward_lines<R>(
    reader: R,
    handler: OutputHandler,
    stream: &'static str,
    pid: u32,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => handler(&line),
                Ok(None) => break,
                Err(e) => {
                    debug!(pid, stream, error = %e, "Stopped reading daemon output");
                    break;
                },
            }
        }
    })
}

/// Output handler that re-emits each line as a tracing event, so daemon
/// output lands in whatever log capture the test run uses.
#[must_use]
pub fn tracing_output(stream: &'static str) -> OutputHandler {
    Arc::new(move |line: &str| {
        info!(target: SERVICE_LOG_TARGET, stream, "{line}");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn test_forward_lines_splits_on_newlines() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: OutputHandler = Arc::new(move |line: &str| sink.lock().push(line.to_string()));

        let input: &[u8] = b"first\nsecond\nlast-without-newline";
        forward_lines(input, handler, "stdout", 1).await.unwrap();

        assert_eq!(
            *seen.lock(),
            vec!["first", "second", "last-without-newline"]
        );
    }

    #[test]
    fn test_tracing_output_accepts_lines_without_subscriber() {
        let handler = tracing_output("stderr");
        handler("no subscriber installed");
    }
}
