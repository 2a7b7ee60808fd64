//! STOMP 1.1 wire framing.
//!
//! A frame is a command line, header lines, a blank line and a
//! NUL-terminated body; a bare newline between frames is a heartbeat.
//! Bodies may instead be delimited by a `content-length` header, which the
//! decoder honours so compressed payloads containing NUL bytes survive.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::error::StompError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Subscribe,
    Unsubscribe,
    Send,
    Message,
    Ack,
    Nack,
    Receipt,
    Error,
    Disconnect,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Send => "SEND",
            Self::Message => "MESSAGE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
            Self::Disconnect => "DISCONNECT",
        }
    }

    fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "CONNECT" => Some(Self::Connect),
            "CONNECTED" => Some(Self::Connected),
            "SUBSCRIBE" => Some(Self::Subscribe),
            "UNSUBSCRIBE" => Some(Self::Unsubscribe),
            "SEND" => Some(Self::Send),
            "MESSAGE" => Some(Self::Message),
            "ACK" => Some(Self::Ack),
            "NACK" => Some(Self::Nack),
            "RECEIPT" => Some(Self::Receipt),
            "ERROR" => Some(Self::Error),
            "DISCONNECT" => Some(Self::Disconnect),
            _ => None,
        }
    }

    /// CONNECT and CONNECTED keep STOMP 1.0 header semantics: no escaping.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// First value of a header, as sent by the peer.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn connect(
        host: &str,
        login: &str,
        passcode: &str,
        client_id: &str,
        heartbeat_millis: u64,
    ) -> Self {
        let heartbeat = format!("{},{}", heartbeat_millis, heartbeat_millis);
        Self::new(Command::Connect)
            .with_header("accept-version", "1.1")
            .with_header("host", host)
            .with_header("login", login)
            .with_header("passcode", passcode)
            .with_header("client-id", client_id)
            .with_header("heart-beat", &heartbeat)
    }

    /// Durable subscription with per-message acknowledgement.
    pub fn subscribe(destination: &str, id: &str, subscription_name: &str) -> Self {
        Self::new(Command::Subscribe)
            .with_header("destination", destination)
            .with_header("id", id)
            .with_header("ack", "client-individual")
            .with_header("activemq.subscriptionName", subscription_name)
    }

    /// Acknowledges one delivered message; the broker's message-id and
    /// subscription headers are echoed back.
    pub fn ack(message_id: &str, subscription: &str) -> Self {
        Self::new(Command::Ack)
            .with_header("message-id", message_id)
            .with_header("subscription", subscription)
    }

    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }
}

/// What travels on the wire: frames, or bare-newline heartbeats.
#[derive(Debug, Clone, PartialEq)]
pub enum WireEvent {
    Frame(Frame),
    Heartbeat,
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for character in raw.chars() {
        match character {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, StompError> {
    let mut out = String::with_capacity(raw.len());
    let mut characters = raw.chars();
    while let Some(character) = characters.next() {
        if character != '\\' {
            out.push(character);
            continue;
        }
        match characters.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            other => {
                return Err(StompError::Protocol(format!(
                    "bad header escape \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

#[derive(Debug, Default)]
pub struct StompCodec;

impl Encoder<WireEvent> for StompCodec {
    type Error = StompError;

    fn encode(&mut self, event: WireEvent, dst: &mut BytesMut) -> Result<(), StompError> {
        let frame = match event {
            WireEvent::Heartbeat => {
                dst.put_u8(b'\n');
                return Ok(());
            }
            WireEvent::Frame(frame) => frame,
        };

        dst.put_slice(frame.command.as_str().as_bytes());
        dst.put_u8(b'\n');
        let escape = frame.command.escapes_headers();
        for (name, value) in &frame.headers {
            if escape {
                dst.put_slice(escape_header(name).as_bytes());
                dst.put_u8(b':');
                dst.put_slice(escape_header(value).as_bytes());
            } else {
                dst.put_slice(name.as_bytes());
                dst.put_u8(b':');
                dst.put_slice(value.as_bytes());
            }
            dst.put_u8(b'\n');
        }
        if !frame.body.is_empty() {
            dst.put_slice(format!("content-length:{}\n", frame.body.len()).as_bytes());
        }
        dst.put_u8(b'\n');
        dst.put_slice(&frame.body);
        dst.put_u8(b'\0');
        Ok(())
    }
}

impl Decoder for StompCodec {
    type Item = WireEvent;
    type Error = StompError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<WireEvent>, StompError> {
        if src.is_empty() {
            return Ok(None);
        }

        // Heartbeats are bare newlines between frames.
        match src[0] {
            b'\n' => {
                src.advance(1);
                return Ok(Some(WireEvent::Heartbeat));
            }
            b'\r' if src.len() >= 2 && src[1] == b'\n' => {
                src.advance(2);
                return Ok(Some(WireEvent::Heartbeat));
            }
            b'\r' => return Ok(None),
            _ => {}
        }

        // Wait for the complete header block first.
        let Some((header_end, body_start)) = find_blank_line(src) else {
            return Ok(None);
        };

        let head = &src[..header_end];
        let mut lines = head.split(|byte| *byte == b'\n').map(trim_carriage);

        let command_line = lines.next().unwrap_or(b"");
        let command_text = String::from_utf8_lossy(command_line).into_owned();
        let Some(command) = Command::from_str(&command_text) else {
            return Err(StompError::Protocol(format!(
                "unknown command {:?}",
                command_text
            )));
        };

        let mut headers = Vec::new();
        let mut content_length: Option<usize> = None;
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let text = String::from_utf8_lossy(line);
            let Some((name, value)) = text.split_once(':') else {
                return Err(StompError::Protocol(format!("bad header {:?}", text)));
            };
            let (name, value) = if command.escapes_headers() {
                (unescape_header(name)?, unescape_header(value)?)
            } else {
                (name.to_owned(), value.to_owned())
            };
            if name == "content-length" && content_length.is_none() {
                content_length = value.trim().parse().ok();
            }
            headers.push((name, value));
        }

        let (body, consumed) = match content_length {
            Some(length) => {
                // Body plus the trailing NUL.
                if src.len() < body_start + length + 1 {
                    return Ok(None);
                }
                (
                    src[body_start..body_start + length].to_vec(),
                    body_start + length + 1,
                )
            }
            None => {
                let Some(nul) = src[body_start..]
                    .iter()
                    .position(|byte| *byte == b'\0')
                else {
                    return Ok(None);
                };
                (
                    src[body_start..body_start + nul].to_vec(),
                    body_start + nul + 1,
                )
            }
        };

        src.advance(consumed);
        Ok(Some(WireEvent::Frame(Frame {
            command,
            headers,
            body,
        })))
    }
}

fn trim_carriage(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Finds the blank line ending the header block ("\n\n", tolerating \r\n)
/// and returns (end of headers, start of body).
fn find_blank_line(src: &[u8]) -> Option<(usize, usize)> {
    let mut index = 0;
    while index + 1 < src.len() {
        if src[index] == b'\n' {
            if src[index + 1] == b'\n' {
                return Some((index, index + 2));
            }
            if index + 2 < src.len() && src[index + 1] == b'\r' && src[index + 2] == b'\n' {
                return Some((index, index + 3));
            }
        }
        index += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut StompCodec, bytes: &[u8]) -> Vec<WireEvent> {
        let mut buf = BytesMut::from(bytes);
        let mut events = Vec::new();
        while let Some(event) = codec.decode(&mut buf).unwrap() {
            events.push(event);
        }
        events
    }

    #[test]
    fn round_trips_a_message_frame() {
        let frame = Frame::new(Command::Message)
            .with_header("message-id", "ID:broker-1234")
            .with_header("subscription", "1");
        let mut codec = StompCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(WireEvent::Frame(frame.clone()), &mut buf)
            .unwrap();
        let events = decode_all(&mut codec, &buf);
        assert_eq!(events, [WireEvent::Frame(frame)]);
    }

    #[test]
    fn honours_content_length_with_embedded_nuls() {
        let body = vec![0x1f, 0x8b, 0x00, 0x01, 0x00];
        let frame = Frame::new(Command::Message)
            .with_header("SequenceNumber", "42")
            .with_header("message-id", "ID:1");
        let frame = Frame { body, ..frame };
        let mut codec = StompCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(WireEvent::Frame(frame.clone()), &mut buf)
            .unwrap();
        let events = decode_all(&mut codec, &buf);
        let WireEvent::Frame(decoded) = &events[0] else {
            panic!("expected a frame");
        };
        assert_eq!(decoded.body, frame.body);
        assert_eq!(decoded.header("SequenceNumber"), Some("42"));
    }

    #[test]
    fn partial_frames_wait_for_more_bytes() {
        let mut codec = StompCodec;
        let mut buf = BytesMut::from(&b"MESSAGE\nmessage-id:1\n\npartial body"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.put_u8(b'\0');
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn heartbeats_are_bare_newlines() {
        let mut codec = StompCodec;
        let events = decode_all(&mut codec, b"\n\r\nMESSAGE\n\nhi\0");
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], WireEvent::Heartbeat);
        assert_eq!(events[1], WireEvent::Heartbeat);
        assert!(matches!(&events[2], WireEvent::Frame(_)));
    }

    #[test]
    fn escapes_header_values_outside_connect() {
        let frame = Frame::new(Command::Send).with_header("weird", "a:b\nc\\d");
        let mut codec = StompCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(WireEvent::Frame(frame.clone()), &mut buf)
            .unwrap();
        let text = String::from_utf8(buf.to_vec()).unwrap();
        assert!(text.contains("weird:a\\cb\\nc\\\\d"));
        let events = decode_all(&mut codec, &buf);
        assert_eq!(events, [WireEvent::Frame(frame)]);
    }

    #[test]
    fn connect_headers_pass_through_unescaped() {
        let frame = Frame::connect("broker", "user", "pass:word", "client", 35000);
        let mut codec = StompCodec;
        let mut buf = BytesMut::new();
        codec.encode(WireEvent::Frame(frame), &mut buf).unwrap();
        let text = String::from_utf8(buf.to_vec()).unwrap();
        assert!(text.contains("passcode:pass:word"));
        assert!(text.contains("heart-beat:35000,35000"));
        assert!(text.contains("accept-version:1.1"));
    }

    #[test]
    fn unknown_commands_are_protocol_errors() {
        let mut codec = StompCodec;
        let mut buf = BytesMut::from(&b"NONSENSE\n\n\0"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(StompError::Protocol(_))
        ));
    }
}
