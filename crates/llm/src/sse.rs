//! Shared SSE plumbing for the provider adapters.
//!
//! Both adapters follow the same pattern: receive a `reqwest::Response`,
//! buffer chunks, split on `\n\n`, extract `data:` payloads, and feed each
//! payload to a provider-specific parser returning zero or more events.

use crate::util::from_reqwest;
use gb_domain::error::Result;
use gb_domain::stream::{BoxStream, StreamEvent};

/// Extract complete `data:` payloads from an SSE buffer.
///
/// SSE events are delimited by `\n\n`; an event block may carry `event:`,
/// `data:`, `id:` or `retry:` lines, of which only `data:` matters here.
/// The buffer is drained in place; a trailing partial event stays behind
/// for the next call.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut data_lines = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2); // the \n\n delimiter

        for line in block.lines() {
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_string());
                }
            }
        }
    }

    data_lines
}

/// Build a token stream from an SSE `reqwest::Response` and a
/// provider-specific parser closure.
///
/// `FnMut` because the Anthropic parser carries state across payloads.
/// The stream flushes the remaining buffer when the body closes and emits
/// a fallback `Done` if the parser never produced one.
pub(crate) fn sse_response_stream<F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut done_emitted = false;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));

                    for data in drain_data_lines(&mut buffer) {
                        for event in parse_data(&data) {
                            if matches!(&event, Ok(StreamEvent::Done { .. })) {
                                done_emitted = true;
                            }
                            yield event;
                        }
                    }
                }
                Ok(None) => {
                    // Body closed -- flush any trailing partial event.
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for data in drain_data_lines(&mut buffer) {
                            for event in parse_data(&data) {
                                if matches!(&event, Ok(StreamEvent::Done { .. })) {
                                    done_emitted = true;
                                }
                                yield event;
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }

        if !done_emitted {
            yield Ok(StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            });
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_complete_event() {
        let mut buf = String::from("event: message\ndata: {\"text\":\"hi\"}\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["{\"text\":\"hi\"}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn multiple_events_in_one_chunk() {
        let mut buf = String::from("data: first\n\ndata: second\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["first", "second"]);
    }

    #[test]
    fn partial_event_stays_buffered() {
        let mut buf = String::from("data: complete\n\ndata: parti");
        assert_eq!(drain_data_lines(&mut buf), vec!["complete"]);
        assert_eq!(buf, "data: parti");

        buf.push_str("al\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["partial"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn non_data_lines_ignored() {
        let mut buf = String::from("event: ping\nid: 7\nretry: 3000\ndata: payload\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["payload"]);
    }

    #[test]
    fn empty_data_line_skipped() {
        let mut buf = String::from("data: \n\n");
        assert!(drain_data_lines(&mut buf).is_empty());
    }

    #[test]
    fn done_sentinel_passes_through() {
        let mut buf = String::from("data: [DONE]\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["[DONE]"]);
    }
}
