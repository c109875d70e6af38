//! Response envelope decoding.
//!
//! The API wraps payloads inconsistently: some endpoints return
//! `{statusCode, success, message, data}`, some nest a second envelope in
//! `data`, some return the bare payload, and list endpoints return
//! `{result, meta}` pages that are sometimes wrapped in a one-element array.
//! Every response goes through [`decode_envelope`] (and [`decode_page`] for
//! lists) so no call site ever inspects raw JSON.

use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::pagination::{Page, PaginationMeta};
use crate::record::{Record, kind_of};

/// Payload carried by an [`Envelope`].
#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeData {
    /// `data` was absent or `null`.
    Empty,
    /// `data` was a single value.
    One(Value),
    /// `data` was an array.
    Many(Vec<Value>),
}

impl EnvelopeData {
    fn from_value(value: Value) -> Self {
        match value {
            Value::Null => Self::Empty,
            Value::Array(items) => Self::Many(items),
            other => Self::One(other),
        }
    }
}

/// Normalized response envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Application status code; the HTTP status when the body had none.
    pub status_code: u16,
    /// Whether the server reports the operation as successful.
    pub success: bool,
    /// Human-readable message; empty when the body had none.
    pub message: String,
    /// The payload.
    pub data: EnvelopeData,
}

impl Envelope {
    /// Turn an unsuccessful envelope into [`StoreError::Rejected`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Rejected`] when `success` is `false`.
    pub fn ensure_success(self) -> Result<Self, StoreError> {
        if self.success {
            Ok(self)
        } else {
            Err(StoreError::Rejected {
                status_code: self.status_code,
                message: if self.message.is_empty() {
                    "operation reported failure".to_owned()
                } else {
                    self.message
                },
            })
        }
    }

    /// Extract a single record from `data`.
    ///
    /// A one-element array is accepted as a single record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Envelope`] if `data` is empty, holds several
    /// values, or is not a record.
    pub fn into_record(self) -> Result<Record, StoreError> {
        match self.data {
            EnvelopeData::One(value) => Record::from_value(value),
            EnvelopeData::Many(mut items) if items.len() == 1 => {
                Record::from_value(items.remove(0))
            }
            EnvelopeData::Many(items) => Err(StoreError::Envelope(format!(
                "expected one record, got {}",
                items.len()
            ))),
            EnvelopeData::Empty => Err(StoreError::Envelope("response carried no record".into())),
        }
    }

    /// Like [`into_record`](Envelope::into_record), but `Ok(None)` when
    /// `data` is empty and `fallback_id` when the record lacks an id.
    pub(crate) fn into_partial_record(self, fallback_id: &str) -> Result<Option<Record>, StoreError> {
        match self.data {
            EnvelopeData::Empty => Ok(None),
            EnvelopeData::One(Value::Bool(_)) => Ok(None),
            EnvelopeData::One(value) => Record::from_value_with_id(value, fallback_id).map(Some),
            EnvelopeData::Many(mut items) if items.len() == 1 => {
                Record::from_value_with_id(items.remove(0), fallback_id).map(Some)
            }
            EnvelopeData::Many(items) => Err(StoreError::Envelope(format!(
                "expected one record, got {}",
                items.len()
            ))),
        }
    }
}

// A record may carry its own `message`, `success`, or `statusCode` field,
// so an object with an `id` needs `data` as well to count as an envelope.
fn is_envelope(obj: &Map<String, Value>) -> bool {
    let flagged = obj.contains_key("statusCode") || obj.contains_key("success");
    if obj.contains_key("data") {
        flagged || !obj.contains_key("id")
    } else {
        flagged && !obj.contains_key("id")
    }
}

fn is_2xx(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Decode any response body into an [`Envelope`].
///
/// Resolution order:
///
/// 1. An object with `data` and either `statusCode`/`success` or no `id` is
///    an envelope, as is one with `statusCode`/`success` and no `id`.
///    If its `data` is itself an envelope, that inner envelope's `data` is
///    used (one level only) and an explicit inner `success: false` wins.
/// 2. Anything else is a bare payload with success taken from the HTTP
///    status.
///
/// `success` is read from the body when present; otherwise it is derived
/// from `statusCode`, and failing that from `http_status`.
///
/// # Arguments
///
/// * `http_status` - Status line of the HTTP response.
/// * `body` - Parsed JSON body (`Value::Null` for an empty body).
pub fn decode_envelope(http_status: u16, body: Value) -> Envelope {
    let Value::Object(mut obj) = body else {
        return Envelope {
            status_code: http_status,
            success: is_2xx(http_status),
            message: String::new(),
            data: EnvelopeData::from_value(body),
        };
    };

    if !is_envelope(&obj) {
        return Envelope {
            status_code: http_status,
            success: is_2xx(http_status),
            message: String::new(),
            data: EnvelopeData::One(Value::Object(obj)),
        };
    }

    let status_code = obj
        .get("statusCode")
        .and_then(Value::as_u64)
        .and_then(|n| u16::try_from(n).ok())
        .unwrap_or(http_status);
    let mut success = obj
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or_else(|| is_2xx(status_code));
    let mut message = obj
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let mut data = obj.remove("data").unwrap_or(Value::Null);

    let nested = match &mut data {
        Value::Object(inner) if is_envelope(inner) => {
            if inner.get("success").and_then(Value::as_bool) == Some(false) {
                success = false;
            }
            if message.is_empty()
                && let Some(m) = inner.get("message").and_then(Value::as_str)
            {
                message = m.to_owned();
            }
            Some(inner.remove("data").unwrap_or(Value::Null))
        }
        _ => None,
    };
    if let Some(inner_data) = nested {
        data = inner_data;
    }

    Envelope {
        status_code,
        success,
        message,
        data: EnvelopeData::from_value(data),
    }
}

/// Decode a list response into a [`Page`].
///
/// Accepts `{result, meta}` directly, inside an envelope's `data`, or
/// wrapped in a one-element array at either level.
///
/// # Errors
///
/// Returns [`StoreError::Rejected`] if the envelope reports failure, and
/// [`StoreError::Envelope`] if no page shape is found, a record lacks an
/// id, or the meta violates its invariant.
pub fn decode_page(http_status: u16, body: Value) -> Result<Page, StoreError> {
    let envelope = decode_envelope(http_status, body).ensure_success()?;
    let page_value = match envelope.data {
        EnvelopeData::One(value) => value,
        EnvelopeData::Many(mut items) if items.len() == 1 && is_page(&items[0]) => items.remove(0),
        EnvelopeData::Many(items) => {
            return Err(StoreError::Envelope(format!(
                "expected a page object, got an array of {}",
                items.len()
            )));
        }
        EnvelopeData::Empty => {
            return Err(StoreError::Envelope("list response carried no page".into()));
        }
    };

    let Value::Object(mut page) = page_value else {
        return Err(StoreError::Envelope(format!(
            "expected a page object, got {}",
            kind_of(&page_value)
        )));
    };

    let result = match page.remove("result") {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => {
            return Err(StoreError::Envelope("page has no result array".into()));
        }
        Some(other) => {
            return Err(StoreError::Envelope(format!(
                "page result must be an array, got {}",
                kind_of(&other)
            )));
        }
    };
    let meta_value = page
        .remove("meta")
        .ok_or_else(|| StoreError::Envelope("page has no meta".into()))?;
    let meta: PaginationMeta = serde_json::from_value(meta_value)?;
    meta.validate()?;

    let items = result
        .into_iter()
        .map(Record::from_value)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page { items, meta })
}

fn is_page(value: &Value) -> bool {
    value.as_object().is_some_and(|o| o.contains_key("result"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page_body() -> Value {
        json!({
            "result": [{"id": "c1"}, {"id": "c2"}],
            "meta": {"current": 1, "pageSize": 10, "total": 2, "pages": 1}
        })
    }

    #[test]
    fn full_envelope_is_decoded() {
        let env = decode_envelope(
            200,
            json!({"statusCode": 201, "success": true, "message": "ok", "data": {"id": "e1"}}),
        );
        assert_eq!(env.status_code, 201);
        assert!(env.success);
        assert_eq!(env.message, "ok");
        assert_eq!(env.into_record().unwrap().id(), "e1");
    }

    #[test]
    fn success_false_in_200_is_rejected() {
        let env = decode_envelope(
            200,
            json!({"statusCode": 200, "success": false, "message": "locked", "data": null}),
        );
        assert!(!env.success);
        let err = env.ensure_success().unwrap_err();
        assert!(matches!(
            err,
            StoreError::Rejected { status_code: 200, ref message } if message == "locked"
        ));
    }

    #[test]
    fn success_derived_from_status_code_when_missing() {
        let ok = decode_envelope(200, json!({"statusCode": 200, "data": null}));
        assert!(ok.success);
        let bad = decode_envelope(200, json!({"statusCode": 400, "message": "bad"}));
        assert!(!bad.success);
    }

    #[test]
    fn nested_envelope_is_unwrapped_once() {
        let env = decode_envelope(
            200,
            json!({"statusCode": 200, "data": {"success": true, "data": {"id": "n1"}}}),
        );
        assert_eq!(env.into_record().unwrap().id(), "n1");
    }

    #[test]
    fn nested_failure_wins() {
        let env = decode_envelope(
            200,
            json!({"statusCode": 200, "data": {"success": false, "message": "in use"}}),
        );
        assert!(!env.success);
        assert_eq!(env.message, "in use");
    }

    #[test]
    fn bare_payload_uses_http_status() {
        let env = decode_envelope(200, json!({"id": "x"}));
        assert!(env.success);
        assert_eq!(env.status_code, 200);
        let env = decode_envelope(500, Value::Null);
        assert!(!env.success);
        assert_eq!(env.data, EnvelopeData::Empty);
    }

    #[test]
    fn page_in_envelope_data() {
        let page = decode_page(200, json!({"success": true, "data": page_body()})).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.meta.total, 2);
    }

    #[test]
    fn page_wrapped_in_one_element_array() {
        let page = decode_page(200, json!({"statusCode": 200, "data": [page_body()]})).unwrap();
        assert_eq!(page.items[1].id(), "c2");
    }

    #[test]
    fn bare_page_and_bare_array_page() {
        assert!(decode_page(200, page_body()).is_ok());
        assert!(decode_page(200, json!([page_body()])).is_ok());
    }

    #[test]
    fn page_without_meta_is_rejected() {
        let err = decode_page(200, json!({"result": []})).unwrap_err();
        assert!(matches!(err, StoreError::Envelope(_)));
    }

    #[test]
    fn page_with_invalid_meta_is_rejected() {
        let body = json!({"result": [], "meta": {"current": 0, "pageSize": 10, "total": 0, "pages": 0}});
        assert!(decode_page(200, body).is_err());
    }

    #[test]
    fn page_with_failed_envelope_is_rejected() {
        let err = decode_page(200, json!({"success": false, "message": "nope"})).unwrap_err();
        assert!(matches!(err, StoreError::Rejected { .. }));
    }

    #[test]
    fn record_with_message_field_is_not_an_envelope() {
        let env = decode_envelope(200, json!({"id": "n1", "message": "Shift moved"}));
        assert!(env.success);
        let record = env.into_record().unwrap();
        assert_eq!(record.get("message"), Some(&json!("Shift moved")));
    }

    #[test]
    fn record_with_own_success_field_is_not_an_envelope() {
        let body = json!({"id": "t1", "title": "Onboarding", "success": true, "statusCode": 3});
        let env = decode_envelope(201, body.clone());
        assert!(env.success);
        assert_eq!(env.status_code, 201);
        let record = env.into_record().unwrap();
        assert_eq!(record.id(), "t1");
        assert_eq!(record.get("statusCode"), Some(&json!(3)));

        let wrapped = decode_envelope(200, json!({"success": true, "data": body}));
        assert_eq!(wrapped.into_record().unwrap().id(), "t1");
    }

    #[test]
    fn partial_record_empty_and_bool_data() {
        let env = decode_envelope(200, json!({"success": true, "data": true}));
        assert_eq!(env.into_partial_record("c1").unwrap(), None);
        let env = decode_envelope(200, json!({"success": true}));
        assert_eq!(env.into_partial_record("c1").unwrap(), None);
    }
}
