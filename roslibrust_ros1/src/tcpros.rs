//! The TCPROS wire protocol: connection headers and length-prefixed framing.
//!
//! A header block is `u32 total_len` followed by repeated
//! `u32 entry_len ; entry_len bytes of "key=value"`, and every
//! message/request/response is `u32 body_len ; body_len bytes`. No CRLFs,
//! no escaping.

use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Ros1Error, Result};

/// The connection header exchanged by both sides before any payload flows.
/// Unknown keys received from a peer are silently ignored (forward
/// compatibility).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionHeader {
    pub caller_id: String,
    pub topic: Option<String>,
    pub service: Option<String>,
    pub topic_type: String,
    pub md5sum: Option<String>,
    pub msg_definition: String,
    pub request_type: Option<String>,
    pub response_type: Option<String>,
    pub error: Option<String>,
    pub latching: bool,
    pub tcp_nodelay: bool,
    pub persistent: bool,
    pub probe: bool,
}

impl ConnectionHeader {
    /// Serializes this header into the `u32 total_len || entries` wire
    /// format. `is_request` selects whether `request_type`/`response_type`
    /// are emitted (only meaningful for service handshakes).
    pub fn to_bytes(&self, is_request: bool) -> Result<Vec<u8>> {
        let mut entries: Vec<(String, String)> = vec![("callerid".into(), self.caller_id.clone())];
        if let Some(topic) = &self.topic {
            entries.push(("topic".into(), topic.clone()));
        }
        if let Some(service) = &self.service {
            entries.push(("service".into(), service.clone()));
        }
        if !self.topic_type.is_empty() {
            entries.push(("type".into(), self.topic_type.clone()));
        }
        if let Some(md5sum) = &self.md5sum {
            entries.push(("md5sum".into(), md5sum.clone()));
        }
        if !self.msg_definition.is_empty() {
            entries.push(("message_definition".into(), self.msg_definition.clone()));
        }
        if is_request {
            if let Some(rt) = &self.request_type {
                entries.push(("request_type".into(), rt.clone()));
            }
            if let Some(rt) = &self.response_type {
                entries.push(("response_type".into(), rt.clone()));
            }
        }
        if let Some(err) = &self.error {
            entries.push(("error".into(), err.clone()));
        }
        if self.latching {
            entries.push(("latching".into(), "1".into()));
        }
        if self.tcp_nodelay {
            entries.push(("tcp_nodelay".into(), "1".into()));
        }
        if self.persistent {
            entries.push(("persistent".into(), "1".into()));
        }
        if self.probe {
            entries.push(("probe".into(), "1".into()));
        }
        Ok(encode_header_entries(&entries))
    }

    fn from_map(map: HashMap<String, String>) -> Self {
        let bool_flag = |map: &HashMap<String, String>, key: &str| {
            map.get(key).map(|v| v == "1").unwrap_or(false)
        };
        ConnectionHeader {
            caller_id: map.get("callerid").cloned().unwrap_or_default(),
            topic: map.get("topic").cloned(),
            service: map.get("service").cloned(),
            topic_type: map.get("type").cloned().unwrap_or_default(),
            md5sum: map.get("md5sum").cloned(),
            msg_definition: map.get("message_definition").cloned().unwrap_or_default(),
            request_type: map.get("request_type").cloned(),
            response_type: map.get("response_type").cloned(),
            error: map.get("error").cloned(),
            latching: bool_flag(&map, "latching"),
            tcp_nodelay: bool_flag(&map, "tcp_nodelay"),
            persistent: bool_flag(&map, "persistent"),
            probe: bool_flag(&map, "probe"),
        }
    }
}

/// Encodes a header's key=value entries into the wire format: a 4-byte LE
/// total length followed by each entry, itself 4-byte-LE-length-prefixed.
fn encode_header_entries(entries: &[(String, String)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (key, value) in entries {
        let entry = format!("{key}={value}");
        body.extend_from_slice(&(entry.len() as u32).to_le_bytes());
        body.extend_from_slice(entry.as_bytes());
    }
    let mut out = Vec::with_capacity(body.len() + 4);
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// Reads a raw header map off the wire: a 4-byte LE total length followed by
/// that many bytes of concatenated length-prefixed `key=value` entries.
/// Every entry must contain at least one `=`; if a key repeats, the later
/// value wins. Unknown keys are preserved in the map (callers decide what to
/// ignore).
pub async fn read_header_map<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<HashMap<String, String>> {
    let total_len = read_u32(reader).await? as usize;
    let mut remaining = total_len;
    let mut map = HashMap::new();
    while remaining > 0 {
        let entry_len = read_u32(reader).await? as usize;
        if entry_len > remaining.saturating_sub(4) {
            return Err(Ros1Error::MalformedHeader(
                "header entry length exceeds remaining header bytes".into(),
            ));
        }
        let mut buf = vec![0u8; entry_len];
        reader.read_exact(&mut buf).await?;
        let entry = String::from_utf8(buf)
            .map_err(|e| Ros1Error::MalformedHeader(format!("non-utf8 header entry: {e}")))?;
        let (key, value) = entry.split_once('=').ok_or_else(|| {
            Ros1Error::MalformedHeader(format!("header entry {entry:?} has no '='"))
        })?;
        map.insert(key.to_owned(), value.to_owned());
        remaining = remaining
            .checked_sub(4 + entry_len)
            .ok_or_else(|| Ros1Error::MalformedHeader("header length underflow".into()))?;
    }
    Ok(map)
}

/// Reads and parses a [`ConnectionHeader`] off the wire.
pub async fn receive_header<R: AsyncRead + Unpin>(reader: &mut R) -> Result<ConnectionHeader> {
    let map = read_header_map(reader).await?;
    Ok(ConnectionHeader::from_map(map))
}

/// Writes a [`ConnectionHeader`] to the wire.
pub async fn send_header<W: AsyncWrite + Unpin>(
    writer: &mut W,
    header: &ConnectionHeader,
    is_request: bool,
) -> Result<()> {
    let bytes = header.to_bytes(is_request)?;
    writer.write_all(&bytes).await?;
    Ok(())
}

async fn read_u32<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).await?;
    Ok(u32::from_le_bytes(buf))
}

/// Reads one `u32 len || body` frame. Used for topic messages and for
/// service request/response bodies.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let len = read_u32(reader).await? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Writes one `u32 len || body` frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> Result<()> {
    writer.write_all(&(body.len() as u32).to_le_bytes()).await?;
    writer.write_all(body).await?;
    Ok(())
}

/// Writes the `ok=1 || len || body` turn of a service response.
pub async fn write_service_success<W: AsyncWrite + Unpin>(
    writer: &mut W,
    body: &[u8],
) -> Result<()> {
    writer.write_all(&[1u8]).await?;
    write_frame(writer, body).await
}

/// Writes the `ok=0 || len || errstr` turn of a service response.
pub async fn write_service_failure<W: AsyncWrite + Unpin>(
    writer: &mut W,
    errstr: &str,
) -> Result<()> {
    writer.write_all(&[0u8]).await?;
    write_frame(writer, errstr.as_bytes()).await
}

/// Reads one service-call response turn: the `ok` byte, then either the
/// success body or the error string.
pub async fn read_service_response<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<std::result::Result<Vec<u8>, String>> {
    let mut ok = [0u8; 1];
    reader.read_exact(&mut ok).await?;
    if ok[0] == 1 {
        Ok(Ok(read_frame(reader).await?))
    } else {
        let errstr_bytes = read_frame(reader).await?;
        let errstr = String::from_utf8_lossy(&errstr_bytes).into_owned();
        Ok(Err(errstr))
    }
}

/// Validates an incoming header against what we expect to be speaking
/// (topic/service name, type, md5sum). `"*"` is accepted as a wildcard
/// md5sum for generic/any-type subscribers.
pub fn check_type_and_md5sum(
    expected_type: &str,
    expected_md5sum: &str,
    received: &ConnectionHeader,
) -> Result<()> {
    if let Some(received_md5) = &received.md5sum {
        if received_md5 != "*" && received_md5 != expected_md5sum {
            return Err(Ros1Error::HeaderMismatch(format!(
                "md5sum mismatch: expected {expected_md5sum}, got {received_md5}"
            )));
        }
    }
    if !received.topic_type.is_empty()
        && received.topic_type != "*"
        && received.topic_type != expected_type
    {
        return Err(Ros1Error::HeaderMismatch(format!(
            "type mismatch: expected {expected_type}, got {}",
            received.topic_type
        )));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn header_round_trips() {
        let header = ConnectionHeader {
            caller_id: "/sub1".into(),
            topic: Some("/chatter".into()),
            topic_type: "std_msgs/String".into(),
            md5sum: Some("992ce8a1687cec8c8bd883ec73ca41d1".into()),
            latching: true,
            tcp_nodelay: true,
            ..Default::default()
        };
        let bytes = header.to_bytes(false).unwrap();
        let mut cursor = Cursor::new(bytes);
        let parsed = receive_header(&mut cursor).await.unwrap();
        assert_eq!(parsed.caller_id, "/sub1");
        assert_eq!(parsed.topic.as_deref(), Some("/chatter"));
        assert_eq!(parsed.topic_type, "std_msgs/String");
        assert!(parsed.latching);
        assert!(parsed.tcp_nodelay);
    }

    #[tokio::test]
    async fn probe_handshake_header() {
        // A probe connection only checks type compatibility and closes.
        let raw = [
            ("callerid", "/sub1"),
            ("topic", "/chatter"),
            ("type", "std_msgs/String"),
            ("md5sum", "992ce8a1687cec8c8bd883ec73ca41d1"),
            ("probe", "1"),
        ];
        let entries: Vec<(String, String)> = raw
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let bytes = encode_header_entries(&entries);
        let mut cursor = Cursor::new(bytes);
        let parsed = receive_header(&mut cursor).await.unwrap();
        assert!(parsed.probe);
        assert_eq!(parsed.topic.as_deref(), Some("/chatter"));
    }

    #[tokio::test]
    async fn frame_round_trips() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"Hello").await.unwrap();
        let mut cursor = Cursor::new(buf);
        let body = read_frame(&mut cursor).await.unwrap();
        assert_eq!(body, b"Hello");
    }

    #[test]
    fn md5sum_wildcard_is_accepted() {
        let received = ConnectionHeader {
            md5sum: Some("*".into()),
            topic_type: "std_msgs/String".into(),
            ..Default::default()
        };
        assert!(check_type_and_md5sum(
            "std_msgs/String",
            "992ce8a1687cec8c8bd883ec73ca41d1",
            &received
        )
        .is_ok());
    }

    #[test]
    fn md5sum_mismatch_is_rejected() {
        let received = ConnectionHeader {
            md5sum: Some("deadbeefdeadbeefdeadbeefdeadbeef".into()),
            topic_type: "std_msgs/String".into(),
            ..Default::default()
        };
        assert!(check_type_and_md5sum(
            "std_msgs/String",
            "992ce8a1687cec8c8bd883ec73ca41d1",
            &received
        )
        .is_err());
    }

    #[tokio::test]
    async fn duplicate_key_last_value_wins() {
        let entries = vec![
            ("callerid".to_string(), "/first".to_string()),
            ("callerid".to_string(), "/second".to_string()),
        ];
        let bytes = encode_header_entries(&entries);
        let mut cursor = Cursor::new(bytes);
        let parsed = receive_header(&mut cursor).await.unwrap();
        assert_eq!(parsed.caller_id, "/second");
    }
}
