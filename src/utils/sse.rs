use futures_util::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;

struct SseState<S> {
    inner: S,
    buf: Vec<u8>,
    pending: VecDeque<String>,
    done: bool,
}

/// Decodes a chunked server-sent-events body into the payloads of its `data:`
/// lines, in order. Lines may be split across chunks at any byte.
pub fn sse_data<S, E>(bytes: S) -> impl Stream<Item = Result<String, E>>
where
    S: Stream<Item = Result<Vec<u8>, E>> + Unpin,
{
    let state = SseState {
        inner: bytes,
        buf: Vec::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(data) = st.pending.pop_front() {
                return Some((Ok(data), st));
            }
            if st.done {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(chunk)) => {
                    st.buf.extend_from_slice(&chunk);
                    drain_lines(&mut st.buf, &mut st.pending);
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
                None => {
                    st.done = true;
                    let rest = std::mem::take(&mut st.buf);
                    push_data_line(&rest, &mut st.pending);
                }
            }
        }
    })
}

fn drain_lines(buf: &mut Vec<u8>, out: &mut VecDeque<String>) {
    while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = buf.drain(..=pos).collect();
        push_data_line(&line[..line.len() - 1], out);
    }
}

fn push_data_line(line: &[u8], out: &mut VecDeque<String>) {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches('\r');
    if let Some(data) = line.strip_prefix("data:") {
        let data = data.strip_prefix(' ').unwrap_or(data);
        if !data.is_empty() {
            out.push_back(data.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn decode(chunks: Vec<&str>) -> Vec<String> {
        let input = stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, String>(c.as_bytes().to_vec()))
                .collect::<Vec<_>>(),
        );
        sse_data(input)
            .map(|r| r.unwrap())
            .collect::<Vec<_>>()
            .await
    }

    #[tokio::test]
    async fn test_events_split_across_chunks() {
        let out = decode(vec!["data: {\"a\"", ":1}\r\n\r\nda", "ta: {\"b\":2}\n\n"]).await;
        assert_eq!(out, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[tokio::test]
    async fn test_ignores_non_data_lines_and_flushes_tail() {
        let out = decode(vec![": keep-alive\nevent: message\n", "data: last"]).await;
        assert_eq!(out, vec!["last"]);
    }

    #[tokio::test]
    async fn test_error_ends_stream() {
        let input = stream::iter(vec![
            Ok(b"data: one\n".to_vec()),
            Err("broken pipe".to_string()),
            Ok(b"data: two\n".to_vec()),
        ]);
        let out: Vec<Result<String, String>> = sse_data(input).collect().await;
        assert_eq!(out, vec![Ok("one".to_string()), Err("broken pipe".to_string())]);
    }
}
