use futures::{Stream, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_stream::wrappers::LinesStream;

/// Which pipe a line arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSource {
    Stdout,
    Stderr,
}

/// One line of agent output, ANSI escapes removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub source: LineSource,
    pub message: String,
}

pub fn clean_line(raw: &str) -> String {
    let stripped = strip_ansi_escapes::strip(raw.as_bytes());
    String::from_utf8_lossy(&stripped).trim_end().to_string()
}

/// Turn a child pipe into a stream of cleaned lines. Read errors end the
/// stream; whatever was produced before the error is still delivered.
pub fn line_stream<R>(reader: R, source: LineSource) -> impl Stream<Item = LogLine>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    LinesStream::new(BufReader::new(reader).lines()).filter_map(move |line| async move {
        match line {
            Ok(raw) => Some(LogLine {
                source,
                message: clean_line(&raw),
            }),
            Err(e) => {
                tracing::debug!(error = %e, "agent output stream closed");
                None
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_ansi_and_trailing_whitespace() {
        assert_eq!(clean_line("\x1b[32mok\x1b[0m  "), "ok");
        assert_eq!(clean_line("plain"), "plain");
    }
}
