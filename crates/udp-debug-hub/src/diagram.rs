// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Mermaid sequence diagrams of traced datagrams.

use crate::transport::{TraceDirection, TraceEvent};
use chrono::{DateTime, Utc};
use std::fmt::Write as _;

/// Render `traces` (already in temporal order) as a Mermaid `sequenceDiagram`.
pub fn sequence_diagram(traces: &[TraceEvent]) -> String {
    let mut out = String::from("sequenceDiagram\n    participant Client\n    participant Server\n");
    for event in traces {
        let arrow = match event.direction {
            TraceDirection::In => "Client->>Server",
            TraceDirection::Out => "Server->>Client",
        };
        let time: DateTime<Utc> = event.timestamp.into();
        let label = format!(
            "{} bytes {} at {}",
            event.length,
            event.remote_addr,
            time.format("%H:%M:%S%.3f")
        );
        // Writing into a String cannot fail.
        let _ = writeln!(out, "    {}: {}", arrow, escape_label(&label));
    }
    out
}

fn escape_label(label: &str) -> String {
    let mut escaped = String::with_capacity(label.len());
    for c in label.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\r' | '\n' | '\t' => escaped.push(' '),
            c => escaped.push(c),
        }
    }
    escaped
}
