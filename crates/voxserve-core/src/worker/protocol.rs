//! Messages exchanged with the inference worker.
//!
//! Each frame is a 4-byte big-endian length followed by a UTF-8 JSON object.

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::error::{Error, Result};

/// Replies larger than this are treated as a corrupted stream.
const MAX_FRAME_LEN: usize = 512 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum WorkerCommand {
    Check,
    Load {
        key: String,
        model_path: String,
        /// "model" or "tokenizer"
        kind: String,
        device: String,
        dtype: String,
    },
    Unload {
        key: String,
    },
    Generate(GenerateCommand),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateCommand {
    pub key: String,
    /// "custom_voice", "voice_design" or "voice_clone"
    pub mode: String,
    pub text: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruct: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_audio_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_vector_only_mode: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkerReply {
    pub status: Option<String>,
    pub error: Option<String>,
    pub sample_rate: Option<u32>,
    /// WAV payload
    pub audio_base64: Option<String>,
    pub device: Option<String>,
    pub loaded: Option<Vec<String>>,
}

impl WorkerReply {
    /// Turn `status: "error"` (or a bare `error` field) into an `Err`.
    pub fn into_result(self) -> Result<Self> {
        if let Some(err) = self.error.as_deref() {
            return Err(Error::Worker(err.to_string()));
        }
        match self.status.as_deref() {
            Some("ok") | None => Ok(self),
            Some(other) => Err(Error::Worker(format!(
                "worker replied with status '{other}'"
            ))),
        }
    }
}

pub fn write_frame<W: Write>(writer: &mut W, command: &WorkerCommand) -> Result<()> {
    let payload = serde_json::to_vec(command)
        .map_err(|e| Error::Worker(format!("Failed to serialize request: {}", e)))?;
    let length = u32::try_from(payload.len())
        .map_err(|_| Error::Worker("request frame too large".to_string()))?;

    writer.write_all(&length.to_be_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

pub fn read_frame<R: Read>(reader: &mut R) -> Result<WorkerReply> {
    let mut length_buf = [0u8; 4];
    reader.read_exact(&mut length_buf)?;
    let length = u32::from_be_bytes(length_buf) as usize;
    if length > MAX_FRAME_LEN {
        return Err(Error::Worker(format!("reply frame of {length} bytes")));
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body)?;

    serde_json::from_slice(&body).map_err(|e| {
        Error::Worker(format!(
            "Failed to parse reply: {} - {}",
            e,
            String::from_utf8_lossy(&body[..body.len().min(256)])
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reply_frame(json: &str) -> Vec<u8> {
        let mut bytes = (json.len() as u32).to_be_bytes().to_vec();
        bytes.extend_from_slice(json.as_bytes());
        bytes
    }

    #[test]
    fn test_command_frame_layout() {
        let mut out = Vec::new();
        write_frame(
            &mut out,
            &WorkerCommand::Unload {
                key: "voice_design".to_string(),
            },
        )
        .unwrap();

        let len = u32::from_be_bytes([out[0], out[1], out[2], out[3]]) as usize;
        assert_eq!(len, out.len() - 4);
        let json: serde_json::Value = serde_json::from_slice(&out[4..]).unwrap();
        assert_eq!(json["command"], "unload");
        assert_eq!(json["key"], "voice_design");
    }

    #[test]
    fn test_generate_omits_absent_fields() {
        let command = WorkerCommand::Generate(GenerateCommand {
            key: "custom_voice".into(),
            mode: "custom_voice".into(),
            text: "Hello".into(),
            language: "English".into(),
            speaker: Some("Vivian".into()),
            instruct: None,
            speed: Some(1.2),
            ref_audio_base64: None,
            ref_text: None,
            x_vector_only_mode: None,
        });
        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json["command"], "generate");
        assert_eq!(json["speaker"], "Vivian");
        assert!(json.get("instruct").is_none());
        assert!(json.get("ref_audio_base64").is_none());
    }

    #[test]
    fn test_reads_consecutive_replies() {
        let mut stream = reply_frame(r#"{"status":"ok","device":"cpu"}"#);
        stream.extend(reply_frame(r#"{"status":"error","error":"CUDA out of memory"}"#));
        let mut cursor = Cursor::new(stream);

        let first = read_frame(&mut cursor).unwrap().into_result().unwrap();
        assert_eq!(first.device.as_deref(), Some("cpu"));

        let second = read_frame(&mut cursor).unwrap().into_result();
        match second {
            Err(Error::Worker(msg)) => assert!(msg.contains("out of memory")),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn test_truncated_stream_is_an_io_error() {
        let mut cursor = Cursor::new(vec![0u8, 0, 0, 10, b'{']);
        assert!(matches!(read_frame(&mut cursor), Err(Error::Io(_))));
    }
}
