//! Delivery log records.
//!
//! One record is appended per recipient per send attempt. Records are never
//! mutated after creation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::MailResult;

/// Outcome of one send attempt for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryLogRecord {
    /// Queue the message belongs to, if it was queued.
    pub queue_id: Option<String>,
    /// Transport message id; absent when the transport failed.
    pub message_id: Option<String>,
    /// Campaign identifier.
    pub campaign_id: String,
    /// When the attempt finished.
    pub sent_at: DateTime<Utc>,
    /// Sender address.
    pub from: String,
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Transport error code, for failed attempts.
    pub error_code: Option<String>,
}

/// Append-only destination for delivery log records.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Appends a record.
    async fn append(&self, record: &DeliveryLogRecord) -> MailResult<()>;
}

/// Sink that discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogSink;

#[async_trait]
impl LogSink for NullLogSink {
    async fn append(&self, _record: &DeliveryLogRecord) -> MailResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_wire_names() {
        let record = DeliveryLogRecord {
            queue_id: None,
            message_id: Some("abc".to_string()),
            campaign_id: "c1".to_string(),
            sent_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            from: "b@example.com".to_string(),
            to: "a@example.com".to_string(),
            subject: "Hi".to_string(),
            error_code: None,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["messageId"], "abc");
        assert_eq!(json["campaignId"], "c1");
        assert_eq!(json["sentAt"], "2024-05-01T12:00:00Z");
        assert!(json["errorCode"].is_null());
    }
}
