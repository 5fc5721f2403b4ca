// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Framing of the line based JSON protocol.
//!
//! Every frame is a single JSON object terminated by `\r\n`. There is no length prefix, so the
//! receiving side has to buffer partial frames until the terminator arrives.
use serde::Serialize;
use serde_json::Value;

use crate::exception::{BlinxException, BlinxResult};
use crate::robot::service_types::{RobotCommand, Response};

pub static TERMINATOR: &[u8] = b"\r\n";
/// Default upper bound for buffered bytes without a terminator.
pub static DEFAULT_MAX_BUFFER: usize = 64 * 1024;

#[derive(Serialize)]
struct OutgoingFrame<'a> {
    command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// Serializes `command` to one compact JSON line including the terminator.
///
/// The JSON contains no whitespace outside of string values.
pub fn encode(command: &RobotCommand) -> BlinxResult<Vec<u8>> {
    let serialized = match command {
        RobotCommand::Raw(value) => serde_json::to_vec(value),
        other => serde_json::to_vec(&OutgoingFrame {
            command: other.name(),
            data: other.data(),
        }),
    };
    let mut bytes = serialized.map_err(|e| BlinxException::DecodeException {
        message: format!("cannot serialize {}: {}", command.name(), e),
    })?;
    bytes.extend_from_slice(TERMINATOR);
    Ok(bytes)
}

/// Appends `new_data` to `buffer` and splits the result at every terminator.
///
/// Returns the complete segments that look like JSON objects and the trailing bytes after the
/// last terminator. Empty or whitespace-only segments are skipped. Segments that do not start
/// with `{` or are not valid UTF-8 are partial or corrupt frames and are dropped with a warning.
pub fn decode_stream(buffer: &[u8], new_data: &[u8]) -> (Vec<String>, Vec<u8>) {
    let mut data = Vec::with_capacity(buffer.len() + new_data.len());
    data.extend_from_slice(buffer);
    data.extend_from_slice(new_data);

    let mut frames = Vec::new();
    let mut start = 0;
    let mut index = 0;
    while index + 1 < data.len() {
        if data[index] == TERMINATOR[0] && data[index + 1] == TERMINATOR[1] {
            if let Some(frame) = accept_segment(&data[start..index]) {
                frames.push(frame);
            }
            index += TERMINATOR.len();
            start = index;
        } else {
            index += 1;
        }
    }
    let remainder = data.split_off(start);
    (frames, remainder)
}

fn accept_segment(segment: &[u8]) -> Option<String> {
    let text = match std::str::from_utf8(segment) {
        Ok(text) => text.trim(),
        Err(_) => {
            log::warn!("dropping frame with invalid UTF-8 ({} bytes)", segment.len());
            return None;
        }
    };
    if text.is_empty() {
        return None;
    }
    if !text.starts_with('{') {
        log::warn!("dropping partial frame {:?}", text);
        return None;
    }
    Some(text.to_string())
}

/// Parses one frame into a [`Response`].
/// # Errors
/// * [`DecodeException`](`crate::exception::BlinxException::DecodeException`) - if the frame is
/// not a JSON object with a `return` field.
pub fn parse_frame(frame: &str) -> BlinxResult<Response> {
    serde_json::from_str(frame).map_err(|e| BlinxException::DecodeException {
        message: format!("{} in {:?}", e, frame),
    })
}

/// Stateful wrapper around [`decode_stream`] which keeps the remainder between reads.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_buffer: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        FrameDecoder::new(DEFAULT_MAX_BUFFER)
    }
}

impl FrameDecoder {
    /// # Arguments
    /// * `max_buffer` - bytes kept without seeing a terminator before the buffer is dropped.
    pub fn new(max_buffer: usize) -> Self {
        FrameDecoder {
            buffer: Vec::new(),
            max_buffer,
        }
    }

    /// Feeds received bytes and returns all frames completed by them.
    pub fn decode(&mut self, new_data: &[u8]) -> Vec<String> {
        let (frames, remainder) = decode_stream(&self.buffer, new_data);
        if remainder.len() > self.max_buffer {
            log::warn!(
                "dropping {} buffered bytes without frame terminator",
                remainder.len()
            );
            self.buffer.clear();
        } else {
            self.buffer = remainder;
        }
        frames
    }

    /// bytes of an incomplete frame waiting for more data
    pub fn remainder(&self) -> &[u8] {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::robot::codec::{decode_stream, encode, parse_frame, FrameDecoder};
    use crate::robot::service_types::{RobotCommand, RobotMode};
    use crate::BlinxException;

    const STREAM: &[u8] = b"{\"return\":\"get_joint_angle_all\",\"data\":[0,0,0,0,0,0]}\r\n\
        {\"return\":\"move_in_place\",\"data\":true}\r\n\
        {\"return\":\"set_robot_mode\",\"data\":\"SEQ\"}\r\n";

    #[test]
    fn encodes_without_spaces() {
        let bytes = encode(&RobotCommand::SetJointAngleAllTime {
            speed: 30.,
            angles: [0., 10.5, -20., 0., 0., 90.],
        })
        .unwrap();
        assert_eq!(
            bytes,
            b"{\"command\":\"set_joint_angle_all_time\",\"data\":[30.0,0.0,10.5,-20.0,0.0,0.0,90.0]}\r\n"
        );
        assert!(!bytes.contains(&b' '));
    }

    #[test]
    fn omits_data_when_there_is_none() {
        assert_eq!(
            encode(&RobotCommand::GetJointAngleAll).unwrap(),
            b"{\"command\":\"get_joint_angle_all\"}\r\n"
        );
        assert_eq!(
            encode(&RobotCommand::SetRobotMode(RobotMode::Sequential)).unwrap(),
            b"{\"command\":\"set_robot_mode\",\"data\":[\"SEQ\"]}\r\n"
        );
    }

    #[test]
    fn raw_commands_are_compacted() {
        let raw = serde_json::from_str("{ \"command\" : \"set_joint_initialize\", \"data\": [0] }")
            .unwrap();
        assert_eq!(
            encode(&RobotCommand::Raw(raw)).unwrap(),
            b"{\"command\":\"set_joint_initialize\",\"data\":[0]}\r\n"
        );
    }

    #[test]
    fn byte_by_byte_equals_all_at_once() {
        let (all_at_once, remainder) = decode_stream(&[], STREAM);
        assert_eq!(all_at_once.len(), 3);
        assert!(remainder.is_empty());

        let mut buffer = Vec::new();
        let mut incremental = Vec::new();
        for byte in STREAM {
            let (frames, rest) = decode_stream(&buffer, &[*byte]);
            incremental.extend(frames);
            buffer = rest;
        }
        assert_eq!(incremental, all_at_once);
        assert!(buffer.is_empty());
    }

    #[test]
    fn partial_frame_is_carried_over() {
        let mut decoder = FrameDecoder::default();
        assert!(decoder.decode(&STREAM[..20]).is_empty());
        assert_eq!(decoder.remainder(), &STREAM[..20]);
        // completes the first frame and starts the second
        let frames = decoder.decode(&STREAM[20..70]);
        assert_eq!(frames.len(), 1);
        assert_eq!(decoder.remainder(), &STREAM[55..70]);
        let frames = decoder.decode(&STREAM[70..]);
        assert_eq!(frames.len(), 2);
        assert!(decoder.remainder().is_empty());
    }

    #[test]
    fn split_terminator() {
        let mut decoder = FrameDecoder::default();
        assert!(decoder.decode(b"{\"return\":\"x\"}\r").is_empty());
        assert_eq!(decoder.decode(b"\n"), vec!["{\"return\":\"x\"}".to_string()]);
    }

    #[test]
    fn drops_corrupt_and_blank_segments() {
        let (frames, remainder) =
            decode_stream(b"", b"\r\n  \r\nle\":[1,2]}\r\n{\"return\":\"ok\"}\r\n{\"ret");
        assert_eq!(frames, vec!["{\"return\":\"ok\"}".to_string()]);
        assert_eq!(remainder, b"{\"ret");
    }

    #[test]
    fn oversized_remainder_is_dropped() {
        let mut decoder = FrameDecoder::new(8);
        assert!(decoder.decode(b"{\"return\":\"get_").is_empty());
        assert!(decoder.remainder().is_empty());
        assert_eq!(decoder.decode(b"{\"a\":1}\r\n").len(), 1);
    }

    #[test]
    fn parses_responses() {
        let response = parse_frame("{\"return\":\"get_joint_angle_all\",\"data\":[1,2,3,4,5,6]}")
            .unwrap();
        assert_eq!(response.kind, "get_joint_angle_all");
        assert_eq!(response.data, json!([1, 2, 3, 4, 5, 6]));

        let response = parse_frame("{\"return\":\"set_joint_initialize\"}").unwrap();
        assert!(response.data.is_null());

        match parse_frame("{\"return\":") {
            Err(BlinxException::DecodeException { .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse_frame("{\"data\":1}").is_err());
    }
}
