use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// The outer JSON frame shared by every request, before `method` is known.
/// `params` is deliberately kept opaque until the typed reparse in
/// `dispatcher.rs` (`spec.md` §4.2 "Envelope parsing").
#[derive(Debug, Deserialize)]
pub struct BaseEnvelope {
    #[serde(rename = "cmdId")]
    pub cmd_id: String,
    pub version: String,
    pub method: String,
    pub timestamp: String,
    #[serde(default)]
    pub params: Option<Box<RawValue>>,
}

/// `{"cmdId":...,"version":...,"method":...,"timestamp":"YYYY-MM-DD HH:MM:SS","code":...,"message":...,"data":...}`
#[derive(Debug, Serialize)]
pub struct ReplyEnvelope {
    #[serde(rename = "cmdId")]
    pub cmd_id: String,
    pub version: String,
    pub method: String,
    pub timestamp: String,
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ReplyEnvelope {
    pub fn new(
        base: &BaseEnvelope,
        code: i64,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            cmd_id: base.cmd_id.clone(),
            version: base.version.clone(),
            method: base.method.clone(),
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            code,
            message: message.into(),
            data,
        }
    }
}

/// A numeric value that may arrive as a JSON integer or a JSON float
/// (`spec.md` §9 Open Question on `fileSize`), normalized to `i64`.
#[derive(Debug, Clone, Copy)]
pub struct FlexibleInt(pub i64);

impl<'de> Deserialize<'de> for FlexibleInt {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        let n = match &value {
            serde_json::Value::Number(n) => n,
            other => {
                return Err(serde::de::Error::custom(format!(
                    "expected a number, got {other}"
                )))
            }
        };
        if let Some(i) = n.as_i64() {
            if i < 0 {
                return Err(serde::de::Error::custom(format!("fileSize must not be negative: {i}")));
            }
            return Ok(FlexibleInt(i));
        }
        if let Some(f) = n.as_f64() {
            if f.is_finite() && f >= 0.0 {
                return Ok(FlexibleInt(f as i64));
            }
        }
        Err(serde::de::Error::custom(format!(
            "fileSize must be a non-negative finite number: {n}"
        )))
    }
}

#[derive(Debug, Deserialize)]
pub struct AlgorithmAddParams {
    #[serde(rename = "algorithmId")]
    pub algorithm_id: String,
    #[serde(rename = "algorithmName", default)]
    pub algorithm_name: String,
    #[serde(rename = "algorithmVersion", default)]
    pub algorithm_version: String,
    #[serde(rename = "algorithmVersionId")]
    pub algorithm_version_id: String,
    #[serde(rename = "algorithmDataUrl")]
    pub algorithm_data_url: String,
    #[serde(rename = "fileSize", default = "default_file_size")]
    pub file_size: FlexibleInt,
    #[serde(rename = "lastModifyTime", default)]
    pub last_modify_time: String,
    pub md5: String,
}

fn default_file_size() -> FlexibleInt {
    FlexibleInt(0)
}

#[derive(Debug, Deserialize)]
pub struct AlgorithmDeleteParams {
    #[serde(rename = "algorithmId")]
    pub algorithm_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AlgorithmConfigParams {
    #[serde(rename = "algorithmId")]
    pub algorithm_id: String,
    #[serde(rename = "runStatus")]
    pub run_status: i64,
}

#[derive(Debug, Serialize)]
pub struct AlgorithmShowEntry {
    #[serde(rename = "algorithmName")]
    pub algorithm_name: String,
    #[serde(rename = "algorithmId")]
    pub algorithm_id: String,
    #[serde(rename = "algorithmVersion")]
    pub algorithm_version: String,
    #[serde(rename = "runStatus")]
    pub run_status: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_envelope_parses_with_opaque_params() {
        let raw = r#"{
            "cmdId": "c-1",
            "version": "1.0",
            "method": "algorithm.add",
            "timestamp": "2026-07-31 10:00:00",
            "params": {"algorithmId": "A"}
        }"#;
        let base: BaseEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(base.cmd_id, "c-1");
        assert_eq!(base.method, "algorithm.add");
        assert!(base.params.is_some());
    }

    #[test]
    fn base_envelope_tolerates_missing_params() {
        let raw = r#"{"cmdId":"c-2","version":"1.0","method":"algorithm.show","timestamp":"t"}"#;
        let base: BaseEnvelope = serde_json::from_str(raw).unwrap();
        assert!(base.params.is_none());
    }

    #[test]
    fn flexible_int_accepts_integer_and_float() {
        let as_int: FlexibleInt = serde_json::from_str("1048576").unwrap();
        assert_eq!(as_int.0, 1_048_576);

        let as_float: FlexibleInt = serde_json::from_str("1048576.0").unwrap();
        assert_eq!(as_float.0, 1_048_576);
    }

    #[test]
    fn flexible_int_rejects_non_numeric() {
        let result: Result<FlexibleInt, _> = serde_json::from_str("\"not a number\"");
        assert!(result.is_err());
    }

    #[test]
    fn flexible_int_rejects_negative_values() {
        assert!(serde_json::from_str::<FlexibleInt>("-1").is_err());
        assert!(serde_json::from_str::<FlexibleInt>("-1.5").is_err());
    }

    #[test]
    fn algorithm_add_params_defaults_optional_fields() {
        let raw = r#"{
            "algorithmId": "A",
            "algorithmVersionId": "V1",
            "algorithmDataUrl": "http://example/a.zip",
            "md5": "d41d8cd98f00b204e9800998ecf8427e"
        }"#;
        let params: AlgorithmAddParams = serde_json::from_str(raw).unwrap();
        assert_eq!(params.algorithm_name, "");
        assert_eq!(params.file_size.0, 0);
    }

    #[test]
    fn reply_envelope_omits_null_data() {
        let base = BaseEnvelope {
            cmd_id: "c-1".to_string(),
            version: "1.0".to_string(),
            method: "algorithm.add".to_string(),
            timestamp: "t".to_string(),
            params: None,
        };
        let reply = ReplyEnvelope::new(&base, 0, "success", None);
        let encoded = serde_json::to_string(&reply).unwrap();
        assert!(!encoded.contains("\"data\""));
    }
}
