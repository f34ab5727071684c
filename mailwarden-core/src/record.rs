//! Accounting record model
//!
//! The MTA emits one accounting record per message event. Field names vary
//! between accounting pipe dialects, so the decoder accepts a documented
//! alias set per field and tags unrecognized entries as skipped rather than
//! failing the batch.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Kind of accounting event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Message accepted by the receiver.
    Delivery,
    /// Permanent failure.
    Bounce,
    /// Transient failure, message dropped from queue.
    Transient,
    /// Transient failure, message still queued for retry.
    TransientQueued,
    /// Feedback-loop complaint.
    Feedback,
}

impl RecordKind {
    fn from_tag(tag: &str) -> Option<RecordKind> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "d" | "delivery" => Some(RecordKind::Delivery),
            "b" | "bounce" => Some(RecordKind::Bounce),
            "t" | "transient" => Some(RecordKind::Transient),
            "tq" | "transient_queued" | "transientqueued" => Some(RecordKind::TransientQueued),
            "f" | "fbl" | "feedback" => Some(RecordKind::Feedback),
            _ => None,
        }
    }
}

/// One per-message accounting event. Immutable once decoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingRecord {
    pub kind: RecordKind,
    pub recipient: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub source_ip: String,
    #[serde(default)]
    pub vmta: String,
    #[serde(default)]
    pub pool: String,
    /// Recipient domain; derived from the recipient when the record omits it.
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub bounce_category: String,
    #[serde(default)]
    pub dsn_code: String,
    #[serde(default)]
    pub dsn_diag: String,
    #[serde(default)]
    pub feedback_type: String,
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub size: u64,
    pub timestamp: DateTime<Utc>,
}

impl AccountingRecord {
    /// Recipient domain, lowercased.
    pub fn recipient_domain(&self) -> &str {
        &self.domain
    }
}

/// Field alias sets accepted by the tolerant decoder.
const KIND_ALIASES: &[&str] = &["type", "kind", "rec_type"];
const RECIPIENT_ALIASES: &[&str] = &["recipient", "rcpt", "to", "orig"];
const SENDER_ALIASES: &[&str] = &["sender", "from", "env_from"];
const SOURCE_IP_ALIASES: &[&str] = &["source_ip", "srcIp", "src_ip", "dlvSourceIp"];
const VMTA_ALIASES: &[&str] = &["vmta", "dlvVmta", "virtual_mta"];
const POOL_ALIASES: &[&str] = &["pool", "vmta_pool"];
const DOMAIN_ALIASES: &[&str] = &["domain", "rcpt_domain", "dest_domain"];
const BOUNCE_CAT_ALIASES: &[&str] = &["bounce_cat", "bounceCat", "bounce_category"];
const DSN_CODE_ALIASES: &[&str] = &["dsn_status", "dsnStatus", "dsn", "dsn_code"];
const DSN_DIAG_ALIASES: &[&str] = &["dsn_diag", "dsnDiag", "diag"];
const FEEDBACK_ALIASES: &[&str] = &["feedback_type", "feedbackType"];
const JOB_ID_ALIASES: &[&str] = &["job_id", "jobId", "job"];
const SIZE_ALIASES: &[&str] = &["size", "bytes", "msg_size"];
const TIME_ALIASES: &[&str] = &["time_logged", "timeLogged", "timestamp", "time"];

fn str_field(value: &Value, aliases: &[&str]) -> Option<String> {
    aliases.iter().find_map(|key| {
        value.get(key).and_then(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    })
}

fn u64_field(value: &Value, aliases: &[&str]) -> Option<u64> {
    aliases.iter().find_map(|key| {
        value.get(key).and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    })
}

fn timestamp_field(value: &Value, now: DateTime<Utc>) -> DateTime<Utc> {
    for key in TIME_ALIASES {
        let Some(v) = value.get(*key) else { continue };
        match v {
            Value::Number(n) => {
                if let Some(secs) = n.as_i64() {
                    if let Some(ts) = Utc.timestamp_opt(secs, 0).single() {
                        return ts;
                    }
                } else if let Some(secs) = n.as_f64() {
                    if let Some(ts) = Utc.timestamp_opt(secs as i64, 0).single() {
                        return ts;
                    }
                }
            }
            Value::String(s) => {
                if let Ok(secs) = s.trim().parse::<i64>() {
                    if let Some(ts) = Utc.timestamp_opt(secs, 0).single() {
                        return ts;
                    }
                }
                if let Ok(ts) = DateTime::parse_from_rfc3339(s.trim()) {
                    return ts.with_timezone(&Utc);
                }
            }
            _ => {}
        }
    }
    now
}

/// Decode one record object. Returns `None` for entries with no recognizable
/// kind tag or recipient.
pub fn decode_record(value: &Value, now: DateTime<Utc>) -> Option<AccountingRecord> {
    let kind = RecordKind::from_tag(&str_field(value, KIND_ALIASES)?)?;
    let recipient = str_field(value, RECIPIENT_ALIASES)?.trim().to_ascii_lowercase();
    if recipient.is_empty() {
        return None;
    }

    let domain = str_field(value, DOMAIN_ALIASES)
        .map(|d| d.trim().to_ascii_lowercase())
        .filter(|d| !d.is_empty())
        .or_else(|| recipient.split_once('@').map(|(_, d)| d.to_string()))
        .unwrap_or_default();

    Some(AccountingRecord {
        kind,
        recipient,
        sender: str_field(value, SENDER_ALIASES).unwrap_or_default(),
        source_ip: str_field(value, SOURCE_IP_ALIASES).unwrap_or_default(),
        vmta: str_field(value, VMTA_ALIASES).unwrap_or_default(),
        pool: str_field(value, POOL_ALIASES).unwrap_or_default(),
        domain,
        bounce_category: str_field(value, BOUNCE_CAT_ALIASES).unwrap_or_default(),
        dsn_code: str_field(value, DSN_CODE_ALIASES).unwrap_or_default(),
        dsn_diag: str_field(value, DSN_DIAG_ALIASES).unwrap_or_default(),
        feedback_type: str_field(value, FEEDBACK_ALIASES).unwrap_or_default(),
        job_id: str_field(value, JOB_ID_ALIASES).unwrap_or_default(),
        size: u64_field(value, SIZE_ALIASES).unwrap_or(0),
        timestamp: timestamp_field(value, now),
    })
}

/// Decode a submission payload: a JSON array of record objects, with a
/// single-object fallback. Returns `(received, decoded)`; undecodable
/// entries are skipped and counted against `received`.
pub fn decode_batch(payload: &[u8], now: DateTime<Utc>) -> (usize, Vec<AccountingRecord>) {
    let parsed: Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(err) => {
            debug!(error = %err, "unparseable record payload");
            return (0, Vec::new());
        }
    };

    let entries: Vec<&Value> = match &parsed {
        Value::Array(items) => items.iter().collect(),
        object @ Value::Object(_) => vec![object],
        _ => return (0, Vec::new()),
    };

    let received = entries.len();
    let records = entries
        .into_iter()
        .filter_map(|entry| decode_record(entry, now))
        .collect();
    (received, records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_short_dialect() {
        let now = Utc::now();
        let value = json!({
            "type": "b",
            "rcpt": "USER@Example.com",
            "bounce_cat": "bad-mailbox",
            "dsnStatus": "5.1.1",
            "srcIp": "1.2.3.4",
            "dlvVmta": "v1",
            "timeLogged": 1_700_000_000
        });

        let record = decode_record(&value, now).unwrap();
        assert_eq!(record.kind, RecordKind::Bounce);
        assert_eq!(record.recipient, "user@example.com");
        assert_eq!(record.domain, "example.com");
        assert_eq!(record.bounce_category, "bad-mailbox");
        assert_eq!(record.dsn_code, "5.1.1");
        assert_eq!(record.source_ip, "1.2.3.4");
        assert_eq!(record.vmta, "v1");
        assert_eq!(record.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn batch_counts_skipped_entries() {
        let now = Utc::now();
        let payload = serde_json::to_vec(&json!([
            {"type": "d", "recipient": "a@gmail.com"},
            {"type": "??", "recipient": "b@gmail.com"},
            {"recipient": "c@gmail.com"},
            {"type": "f", "recipient": "d@yahoo.com", "feedback_type": "abuse"}
        ]))
        .unwrap();

        let (received, records) = decode_batch(&payload, now);
        assert_eq!(received, 4);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].kind, RecordKind::Feedback);
    }

    #[test]
    fn single_object_fallback() {
        let now = Utc::now();
        let payload = br#"{"type": "tq", "to": "x@comcast.net", "dsn": "4.7.1"}"#;
        let (received, records) = decode_batch(payload, now);
        assert_eq!(received, 1);
        assert_eq!(records[0].kind, RecordKind::TransientQueued);
        assert_eq!(records[0].domain, "comcast.net");
    }

    #[test]
    fn empty_batch_is_zero_zero() {
        let (received, records) = decode_batch(b"[]", Utc::now());
        assert_eq!(received, 0);
        assert!(records.is_empty());
    }

    #[test]
    fn missing_timestamp_defaults_to_now() {
        let now = Utc::now();
        let value = json!({"type": "d", "recipient": "a@gmail.com"});
        let record = decode_record(&value, now).unwrap();
        assert_eq!(record.timestamp, now);
    }
}
