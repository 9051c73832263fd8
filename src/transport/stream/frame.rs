// ABOUTME: Incremental Server-Sent-Events frame parser for the SSE client transport
// ABOUTME: Handles event/data/id fields, multi-line data, comment lines and CRLF endings
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

/// Event name assumed when a frame carries no `event:` field
pub const DEFAULT_EVENT: &str = "message";

/// One dispatched SSE event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name (`message` when omitted)
    pub event: String,
    /// Data lines joined with `\n`
    pub data: String,
    /// Last event id, if the frame carried one
    pub id: Option<String>,
}

/// Reads SSE events from a buffered byte stream
pub struct SseReader<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> SseReader<R> {
    /// Wrap a buffered reader
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }

    /// Read until the next blank-line-terminated event
    ///
    /// Returns `Ok(None)` at end of stream. A trailing frame without its
    /// terminating blank line is discarded.
    pub async fn next_event(&mut self) -> io::Result<Option<SseEvent>> {
        let mut event: Option<String> = None;
        let mut id: Option<String> = None;
        let mut data: Vec<String> = Vec::new();

        while let Some(mut line) = self.lines.next_line().await? {
            if line.ends_with('\r') {
                line.pop();
            }

            if line.is_empty() {
                if event.is_none() && id.is_none() && data.is_empty() {
                    continue;
                }
                return Ok(Some(SseEvent {
                    event: event.unwrap_or_else(|| DEFAULT_EVENT.to_owned()),
                    data: data.join("\n"),
                    id,
                }));
            }

            if line.starts_with(':') {
                continue;
            }

            let (field, value) = line
                .split_once(':')
                .map_or((line.as_str(), ""), |(f, v)| (f, v.strip_prefix(' ').unwrap_or(v)));
            match field {
                "event" => event = Some(value.to_owned()),
                "data" => data.push(value.to_owned()),
                "id" => id = Some(value.to_owned()),
                _ => {}
            }
        }
        Ok(None)
    }
}
