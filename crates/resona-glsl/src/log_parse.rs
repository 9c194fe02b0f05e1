//! GL shader info-log parsing.
//!
//! Drivers disagree on log formats; the common ones are
//!
//! - Mesa:    `0:12(7): error: syntax error, unexpected ...`
//! - NVIDIA:  `0(12) : error C0000: syntax error`
//! - Classic: `ERROR: 0:12: 'foo' : undeclared identifier`
//!
//! Lines that match none of these still become messages (line 0) so nothing
//! the driver said is lost.

use resona_core::{CompileMessage, SourceStage};

pub fn parse_info_log(stage: SourceStage, log: &str) -> Vec<CompileMessage> {
    let mut messages = Vec::new();
    for line in log.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (line_no, message) = parse_line(line).unwrap_or((0, line.to_string()));
        messages.push(CompileMessage {
            stage,
            line: line_no,
            message,
        });
    }
    messages
}

fn parse_line(line: &str) -> Option<(u32, String)> {
    // Classic: "ERROR: 0:12: message"
    for prefix in ["ERROR:", "WARNING:"] {
        if let Some(rest) = line.strip_prefix(prefix) {
            let rest = rest.trim_start();
            if let Some((source_and_line, msg)) = split_source_line(rest) {
                return Some((source_and_line, msg));
            }
        }
    }
    // Mesa "0:12(7): error: msg" / NVIDIA "0(12) : error C0000: msg"
    let bytes = line.as_bytes();
    if bytes.first()?.is_ascii_digit() {
        let sep = line.find([':', '('])?;
        let after = &line[sep + 1..];
        let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return None;
        }
        let line_no: u32 = digits.parse().ok()?;
        // message starts after the next ": "
        let tail = &after[digits.len()..];
        let msg_start = tail.find(':').map(|i| i + 1).unwrap_or(0);
        let msg = tail[msg_start..].trim().to_string();
        if msg.is_empty() {
            return None;
        }
        return Some((line_no, msg));
    }
    None
}

// "0:12: message" -> (12, "message")
fn split_source_line(rest: &str) -> Option<(u32, String)> {
    let mut parts = rest.splitn(3, ':');
    let _source = parts.next()?.trim();
    let line_no: u32 = parts.next()?.trim().parse().ok()?;
    let msg = parts.next()?.trim().to_string();
    Some((line_no, msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_classic_format() {
        let log = "ERROR: 0:12: 'foo' : undeclared identifier\nERROR: 0:14: syntax error";
        let msgs = parse_info_log(SourceStage::Fragment, log);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].line, 12);
        assert_eq!(msgs[0].stage, SourceStage::Fragment);
        assert!(msgs[0].message.contains("undeclared"));
        assert_eq!(msgs[1].line, 14);
    }

    #[test]
    fn parses_mesa_format() {
        let log = "0:7(15): error: syntax error, unexpected ';'";
        let msgs = parse_info_log(SourceStage::Vertex, log);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].line, 7);
        assert!(msgs[0].message.contains("syntax error"));
    }

    #[test]
    fn parses_nvidia_format() {
        let log = "0(42) : error C0000: syntax error, unexpected '}'";
        let msgs = parse_info_log(SourceStage::Fragment, log);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].line, 42);
    }

    #[test]
    fn unknown_lines_become_line_zero_messages() {
        let log = "internal compiler weirdness";
        let msgs = parse_info_log(SourceStage::Linker, log);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].line, 0);
        assert_eq!(msgs[0].message, "internal compiler weirdness");
    }

    #[test]
    fn empty_log_yields_no_messages() {
        assert!(parse_info_log(SourceStage::Fragment, "\n  \n").is_empty());
    }
}
