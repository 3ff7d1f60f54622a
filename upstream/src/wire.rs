//! Interpretation of upstream response bodies.
//!
//! The upstream API is loosely typed: numbers arrive as JSON numbers or as
//! numeric strings, and optional fields may be missing, blank or `null`.
//! Everything here parses defensively and only fails when the envelope
//! itself (result code, payload array) says the call did not succeed.

use serde_json::Value;

use crate::error::{FetchError, Result};

pub(crate) const OP_LOGIN: &str = "login";
pub(crate) const OP_STATUS: &str = "getDeviceStatus";
pub(crate) const OP_METADATA: &str = "getDeviceByVehicle";

/// One parsed device status record.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub device_id: String,
    pub online: bool,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: f64,
    /// Vehicle label reported alongside the fix (`vid`), if any
    pub label: Option<String>,
}

impl StatusSnapshot {
    /// Whether the snapshot carries a usable position.
    ///
    /// The upstream reports a zero coordinate when the device has no fix.
    pub fn has_fix(&self) -> bool {
        self.latitude != 0.0 && self.longitude != 0.0
    }
}

/// Device metadata as returned by the vehicle lookup call.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceMetadata {
    /// Best label found in the record (`vid`, then `vehi_idno`)
    pub label: Option<String>,
    /// The first device record, untouched
    pub record: Value,
}

/// Read a float that may be encoded as a number or a numeric string.
pub fn lenient_f64(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// The `ol` flag is online only when it equals one.
pub fn lenient_online(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(other) => lenient_f64(Some(other)) == 1.0,
        None => false,
    }
}

/// A non-blank string field, trimmed.
pub fn lenient_label(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn check_result(operation: &'static str, body: &Value) -> Result<()> {
    match body.get("result").and_then(Value::as_i64) {
        Some(0) => Ok(()),
        code => Err(FetchError::rejected(operation, code)),
    }
}

fn first_record<'a>(operation: &'static str, body: &'a Value, key: &str) -> Result<&'a Value> {
    body.get(key)
        .and_then(Value::as_array)
        .and_then(|records| records.first())
        .ok_or_else(|| FetchError::UpstreamRejected {
            operation,
            code: Some(0),
            message: format!("response carried no {key} records"),
        })
}

/// Extract the session token from a login response.
pub fn parse_login(body: &Value) -> Result<String> {
    match body.get("jsession").and_then(Value::as_str).map(str::trim) {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => {
            if let Some(code) = body.get("result").and_then(Value::as_i64) {
                if code != 0 {
                    return Err(FetchError::rejected(OP_LOGIN, Some(code)));
                }
            }
            Err(FetchError::MalformedResponse(
                "login response carried no session token".to_string(),
            ))
        }
    }
}

/// Parse a device status response.
pub fn parse_status(device_id: &str, body: &Value) -> Result<StatusSnapshot> {
    check_result(OP_STATUS, body)?;
    let record = first_record(OP_STATUS, body, "status")?;

    Ok(StatusSnapshot {
        device_id: device_id.to_string(),
        online: lenient_online(record.get("ol")),
        latitude: lenient_f64(record.get("mlat")),
        longitude: lenient_f64(record.get("mlng")),
        speed_kmh: lenient_f64(record.get("sp")) / 10.0,
        label: lenient_label(record.get("vid")),
    })
}

/// Parse a vehicle lookup response.
pub fn parse_metadata(body: &Value) -> Result<DeviceMetadata> {
    check_result(OP_METADATA, body)?;
    let record = first_record(OP_METADATA, body, "devices")?;

    let label = lenient_label(record.get("vid")).or_else(|| lenient_label(record.get("vehi_idno")));
    Ok(DeviceMetadata {
        label,
        record: record.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(json!(12.5), 12.5)]
    #[case(json!("77.5"), 77.5)]
    #[case(json!(" 12.9 "), 12.9)]
    #[case(json!("north"), 0.0)]
    #[case(json!(null), 0.0)]
    #[case(json!([1]), 0.0)]
    fn test_lenient_f64(#[case] value: Value, #[case] expected: f64) {
        assert_eq!(lenient_f64(Some(&value)), expected);
    }

    #[rstest]
    #[case(json!(1), true)]
    #[case(json!("1"), true)]
    #[case(json!(0), false)]
    #[case(json!(2), false)]
    #[case(json!(true), true)]
    #[case(json!("yes"), false)]
    fn test_lenient_online(#[case] value: Value, #[case] expected: bool) {
        assert_eq!(lenient_online(Some(&value)), expected);
    }

    #[test]
    fn test_lenient_label() {
        assert_eq!(lenient_label(Some(&json!(" BusA "))), Some("BusA".to_string()));
        assert_eq!(lenient_label(Some(&json!(""))), None);
        assert_eq!(lenient_label(Some(&json!("   "))), None);
        assert_eq!(lenient_label(Some(&json!(null))), None);
        assert_eq!(lenient_label(Some(&json!(26))), Some("26".to_string()));
        assert_eq!(lenient_label(None), None);
    }

    #[test]
    fn test_parse_status_with_string_fields() {
        let body = json!({
            "result": 0,
            "status": [{"mlng": "77.5", "mlat": "12.9", "sp": "300", "ol": 1, "vid": "BusA"}]
        });

        let snapshot = parse_status("D1", &body).unwrap();
        assert_eq!(snapshot.device_id, "D1");
        assert!(snapshot.online);
        assert_eq!(snapshot.latitude, 12.9);
        assert_eq!(snapshot.longitude, 77.5);
        assert_eq!(snapshot.speed_kmh, 30.0);
        assert_eq!(snapshot.label.as_deref(), Some("BusA"));
        assert!(snapshot.has_fix());
    }

    #[test]
    fn test_parse_status_missing_fields_default_to_zero() {
        let body = json!({"result": 0, "status": [{"vid": ""}]});

        let snapshot = parse_status("D1", &body).unwrap();
        assert!(!snapshot.online);
        assert_eq!(snapshot.speed_kmh, 0.0);
        assert_eq!(snapshot.label, None);
        assert!(!snapshot.has_fix());
    }

    #[rstest]
    #[case(0.0, 0.0, false)]
    #[case(12.9, 0.0, false)]
    #[case(0.0, 77.5, false)]
    #[case(12.9, 77.5, true)]
    fn test_has_fix(#[case] latitude: f64, #[case] longitude: f64, #[case] expected: bool) {
        let snapshot = StatusSnapshot {
            device_id: "D1".to_string(),
            online: true,
            latitude,
            longitude,
            speed_kmh: 0.0,
            label: None,
        };
        assert_eq!(snapshot.has_fix(), expected);
    }

    #[rstest]
    #[case(json!({"result": 3, "status": []}), Some(3))]
    #[case(json!({"status": [{"mlat": 1}]}), None)]
    #[case(json!({"result": 0, "status": []}), Some(0))]
    #[case(json!({"result": 0}), Some(0))]
    fn test_parse_status_rejections(#[case] body: Value, #[case] expected_code: Option<i64>) {
        match parse_status("D1", &body) {
            Err(FetchError::UpstreamRejected { operation, code, .. }) => {
                assert_eq!(operation, OP_STATUS);
                assert_eq!(code, expected_code);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_metadata_label_fallback() {
        let body = json!({"result": 0, "devices": [{"vid": "", "vehi_idno": "BusNo.12", "did": 9}]});
        let metadata = parse_metadata(&body).unwrap();
        assert_eq!(metadata.label.as_deref(), Some("BusNo.12"));
        assert_eq!(metadata.record["did"], 9);

        let body = json!({"result": 0, "devices": [{"vid": "Bus26", "vehi_idno": "X"}]});
        assert_eq!(parse_metadata(&body).unwrap().label.as_deref(), Some("Bus26"));

        let body = json!({"result": 0, "devices": [{}]});
        assert_eq!(parse_metadata(&body).unwrap().label, None);
    }

    #[test]
    fn test_parse_metadata_session_expired() {
        let body = json!({"result": 7});
        assert!(parse_metadata(&body).unwrap_err().is_session_expired());
    }

    #[test]
    fn test_parse_login() {
        assert_eq!(parse_login(&json!({"jsession": "abc"})).unwrap(), "abc");
        assert!(matches!(
            parse_login(&json!({"jsession": ""})),
            Err(FetchError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_login(&json!({"result": 6})),
            Err(FetchError::UpstreamRejected { code: Some(6), .. })
        ));
    }
}
