use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{ErrorKind, Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const HOST_NAME: &str = "stackdash-native";
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// One message as the helper understands it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRequest {
    Ping,
    Repair { command_id: String, input_value: Option<String> },
    Launch { command: String, args: Vec<String> },
    Unknown,
}

impl HostRequest {
    pub fn from_value(value: &Value) -> Self {
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(ToString::to_string);
        match value.get("type").and_then(Value::as_str) {
            Some("ping") => return Self::Ping,
            Some("repair") => {
                return Self::Repair {
                    command_id: text("commandId").unwrap_or_default(),
                    input_value: text("inputValue"),
                }
            }
            _ => {}
        }
        match text("command") {
            Some(command) if !command.is_empty() => Self::Launch {
                command,
                args: value
                    .get("args")
                    .and_then(Value::as_array)
                    .map(|args| args.iter().filter_map(Value::as_str).map(ToString::to_string).collect())
                    .unwrap_or_default(),
            },
            _ => Self::Unknown,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Ping => serde_json::json!({ "type": "ping" }),
            Self::Repair { command_id, input_value } => serde_json::json!({
                "type": "repair",
                "commandId": command_id,
                "inputValue": input_value,
            }),
            Self::Launch { command, args } => serde_json::json!({ "command": command, "args": args }),
            Self::Unknown => serde_json::json!({}),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needs_elevation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launched: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HostResponse {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

fn frame_length(len: usize) -> AppResult<u32> {
    if len > MAX_MESSAGE_BYTES {
        return Err(AppError::Policy(format!(
            "native message of {len} bytes exceeds the {MAX_MESSAGE_BYTES} byte limit"
        )));
    }
    Ok(len as u32)
}

/// 4-byte little-endian length followed by UTF-8 JSON.
pub fn encode_frame<T: Serialize>(message: &T) -> AppResult<Vec<u8>> {
    let body = serde_json::to_vec(message)?;
    let len = frame_length(body.len())?;
    let mut frame = Vec::with_capacity(body.len() + 4);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

fn decode_body(body: &[u8]) -> AppResult<Value> {
    serde_json::from_slice(body).map_err(|error| AppError::Validation(format!("malformed native message: {error}")))
}

/// Reads one frame. Returns `None` on a clean end of input before a header.
pub fn read_frame<R: Read>(reader: &mut R) -> AppResult<Option<Value>> {
    let mut header = [0_u8; 4];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(error) if error.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(error) => return Err(error.into()),
    }
    let len = u32::from_le_bytes(header) as usize;
    frame_length(len)?;
    let mut body = vec![0_u8; len];
    reader.read_exact(&mut body)?;
    decode_body(&body).map(Some)
}

pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, message: &T) -> AppResult<()> {
    writer.write_all(&encode_frame(message)?)?;
    writer.flush()?;
    Ok(())
}

pub async fn read_frame_async<R: AsyncRead + Unpin>(reader: &mut R) -> AppResult<Option<Value>> {
    let mut header = [0_u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(error) if error.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(error) => return Err(error.into()),
    }
    let len = u32::from_le_bytes(header) as usize;
    frame_length(len)?;
    let mut body = vec![0_u8; len];
    reader.read_exact(&mut body).await?;
    decode_body(&body).map(Some)
}

pub async fn write_frame_async<W: AsyncWrite + Unpin, T: Serialize>(writer: &mut W, message: &T) -> AppResult<()> {
    writer.write_all(&encode_frame(message)?).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[test]
    fn frames_carry_little_endian_length() {
        let frame = encode_frame(&json!({ "type": "ping" })).expect("encode");
        assert_eq!(&frame[..4], &15_u32.to_le_bytes());
        let decoded = read_frame(&mut Cursor::new(frame)).expect("read").expect("frame");
        assert_eq!(HostRequest::from_value(&decoded), HostRequest::Ping);
    }

    #[test]
    fn oversized_frames_are_rejected_before_reading() {
        let mut bytes = ((MAX_MESSAGE_BYTES + 1) as u32).to_le_bytes().to_vec();
        bytes.extend_from_slice(b"{}");
        assert!(matches!(read_frame(&mut Cursor::new(bytes)), Err(AppError::Policy(_))));
    }

    #[test]
    fn empty_input_is_end_of_stream() {
        assert!(read_frame(&mut Cursor::new(Vec::new())).expect("read").is_none());
    }

    #[test]
    fn requests_are_classified() {
        assert_eq!(
            HostRequest::from_value(&json!({ "type": "repair", "commandId": "pnp-enable", "inputValue": "X" })),
            HostRequest::Repair {
                command_id: "pnp-enable".to_string(),
                input_value: Some("X".to_string())
            }
        );
        assert_eq!(
            HostRequest::from_value(&json!({ "command": "calc", "args": ["-a", 3] })),
            HostRequest::Launch {
                command: "calc".to_string(),
                args: vec!["-a".to_string()]
            }
        );
        assert_eq!(HostRequest::from_value(&json!({ "hello": true })), HostRequest::Unknown);
    }

    #[tokio::test]
    async fn async_frames_round_trip_through_a_pipe() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_frame_async(&mut client, &HostResponse::failure("no_command"))
            .await
            .expect("write");
        let value = read_frame_async(&mut server).await.expect("read").expect("frame");
        assert_eq!(value, json!({ "ok": false, "error": "no_command" }));
    }
}
