//! Redis Streams queue handles.
//!
//! One [`RedisQueue`] owns one logical queue backed by a stream and a
//! consumer group. Entries carry the payload in a `body` field and the
//! routing headers as a JSON object in a `headers` field.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use drover::{Acker, CommandQueue, Delivery, Outcome, Publishing, QueueError, QueueResult};
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::error::{BrokerError, BrokerResult};

/// Stream entry field holding the opaque payload.
const BODY_FIELD: &str = "body";

/// Stream entry field holding the routing headers as a JSON object.
const HEADERS_FIELD: &str = "headers";

/// Header bumped on every requeue of a delivery.
const RETRY_HEADER: &str = "retry-count";

/// Owned handle to one logical queue backed by a Redis stream.
pub struct RedisQueue {
    client: Client,
    conn: MultiplexedConnection,
    stream: String,
    group: String,
    consumer: String,
    block_timeout_ms: u64,
}

impl RedisQueue {
    /// Connects a queue handle for `stream`.
    pub async fn connect(config: &BrokerConfig, stream: impl Into<String>) -> BrokerResult<Self> {
        let client = Client::open(config.redis_url.as_str())?;
        let conn = client.get_multiplexed_async_connection().await?;

        Ok(Self {
            client,
            conn,
            stream: stream.into(),
            group: config.group.clone(),
            consumer: config.consumer.clone(),
            block_timeout_ms: config.block_timeout_ms,
        })
    }
}

#[async_trait]
impl CommandQueue for RedisQueue {
    async fn create_queue(&self) -> QueueResult<()> {
        // XGROUP CREATE <stream> <group> $ MKSTREAM
        // $ delivers only entries added after the group existed.
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut self.conn.clone())
            .await;

        match result {
            Ok(()) => {
                info!(
                    stream = %self.stream,
                    group = %self.group,
                    "created stream and consumer group"
                );
                Ok(())
            }
            // BUSYGROUP means the group already exists, which is fine.
            Err(err) if is_busy_group(&err.to_string()) => {
                debug!(
                    stream = %self.stream,
                    group = %self.group,
                    "consumer group already exists"
                );
                Ok(())
            }
            Err(err) => Err(QueueError::Declare(err.to_string())),
        }
    }

    async fn consume(&self) -> QueueResult<mpsc::Receiver<Delivery>> {
        // Fail here, not in the pump, when the broker is unreachable: a
        // worker without an inbound source should not pretend to run.
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Consume(e.to_string()))?;

        // Capacity 1 so dispatcher admission pressure propagates to the
        // broker instead of piling entries up locally.
        let (tx, rx) = mpsc::channel(1);

        let pump = Pump {
            client: self.client.clone(),
            conn: self.conn.clone(),
            stream: self.stream.clone(),
            group: self.group.clone(),
            consumer: self.consumer.clone(),
            block_timeout_ms: self.block_timeout_ms,
            acker: Arc::new(StreamAcker {
                conn: self.conn.clone(),
                stream: self.stream.clone(),
                group: self.group.clone(),
            }),
        };
        tokio::spawn(pump.run(tx));

        Ok(rx)
    }

    async fn send(&self, publishing: Publishing) -> QueueResult<()> {
        let fields =
            encode_fields(&publishing).map_err(|e| QueueError::Publish(e.to_string()))?;

        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd(&self.stream, "*", &fields)
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;

        debug!(
            stream = %self.stream,
            id = %id,
            bytes = publishing.body.len(),
            "published message"
        );
        Ok(())
    }

    async fn requeue(&self, original: &Delivery, replacement: Publishing) -> QueueResult<()> {
        let mut replacement = replacement;
        bump_retry_count(&mut replacement.headers);
        let fields =
            encode_fields(&replacement).map_err(|e| QueueError::Requeue(e.to_string()))?;

        let mut xadd = redis::cmd("XADD");
        xadd.arg(&self.stream).arg("*");
        for (field, value) in &fields {
            xadd.arg(*field).arg(value);
        }

        // One transaction: release the original and re-add the
        // replacement. The caller never needs a separate ack.
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("XACK")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(original.message_id())
            .ignore();
        pipe.add_command(xadd).ignore();

        let mut conn = self.conn.clone();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Requeue(e.to_string()))?;

        info!(
            stream = %self.stream,
            id = %original.message_id(),
            "requeued command"
        );
        Ok(())
    }

    fn create_message(&self, outcome: &Outcome) -> QueueResult<Publishing> {
        encode_outcome(outcome).map_err(|e| QueueError::Encode(e.to_string()))
    }
}

/// Serializes an outcome for the error stream: a JSON body of kind, error
/// text, and metadata.
fn encode_outcome(outcome: &Outcome) -> BrokerResult<Publishing> {
    let body = serde_json::to_vec(outcome).map_err(|e| BrokerError::Protocol(e.to_string()))?;
    Ok(Publishing::new(body)
        .with_header("content-type", "application/json")
        .with_header("outcome-kind", outcome.kind().label()))
}

/// Stream entry fields for a publishing. The headers field is omitted
/// when there are none.
fn encode_fields(publishing: &Publishing) -> BrokerResult<Vec<(&'static str, Vec<u8>)>> {
    let mut fields = vec![(BODY_FIELD, publishing.body.clone())];
    if !publishing.headers.is_empty() {
        let headers = serde_json::to_vec(&publishing.headers)
            .map_err(|e| BrokerError::Protocol(e.to_string()))?;
        fields.push((HEADERS_FIELD, headers));
    }
    Ok(fields)
}

/// Bumps the requeue counter carried in the message headers. A missing or
/// unparsable value counts as zero.
fn bump_retry_count(headers: &mut HashMap<String, String>) {
    let retries = headers
        .get(RETRY_HEADER)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    headers.insert(RETRY_HEADER.to_string(), (retries + 1).to_string());
}

fn is_busy_group(message: &str) -> bool {
    message.contains("BUSYGROUP")
}

/// Reads stream entries and feeds them to the consumer channel.
struct Pump {
    client: Client,
    conn: MultiplexedConnection,
    stream: String,
    group: String,
    consumer: String,
    block_timeout_ms: u64,
    acker: Arc<StreamAcker>,
}

impl Pump {
    /// Runs until the receiver side is dropped. Transient broker errors
    /// re-establish the connection and continue.
    async fn run(mut self, tx: mpsc::Sender<Delivery>) {
        loop {
            if tx.is_closed() {
                debug!(stream = %self.stream, "consumer dropped, stopping stream pump");
                return;
            }

            let reply = match self.read_batch().await {
                Ok(reply) => reply,
                Err(err) => {
                    warn!(
                        stream = %self.stream,
                        error = %err,
                        "stream read failed, reconnecting"
                    );
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    if let Err(err) = self.reconnect().await {
                        warn!(stream = %self.stream, error = %err, "reconnect failed");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    continue;
                }
            };

            for delivery in self.deliveries(reply) {
                if tx.send(delivery).await.is_err() {
                    debug!(stream = %self.stream, "consumer dropped, stopping stream pump");
                    return;
                }
            }
        }
    }

    /// Blocking XREADGROUP for the next undelivered entry. `None` when the
    /// block timeout expired with nothing to read.
    async fn read_batch(&mut self) -> BrokerResult<Option<StreamReadReply>> {
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(1)
            .block(self.block_timeout_ms as usize);

        let reply: Option<StreamReadReply> = self
            .conn
            .xread_options(&[&self.stream], &[">"], &options)
            .await?;
        Ok(reply)
    }

    async fn reconnect(&mut self) -> BrokerResult<()> {
        self.conn = self.client.get_multiplexed_async_connection().await?;
        Ok(())
    }

    fn deliveries(&self, reply: Option<StreamReadReply>) -> Vec<Delivery> {
        let Some(reply) = reply else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                match self.decode_entry(&entry) {
                    Ok(delivery) => out.push(delivery),
                    Err(err) => {
                        // Stays in the pending list for inspection.
                        warn!(
                            stream = %self.stream,
                            id = %entry.id,
                            error = %err,
                            "skipping malformed stream entry"
                        );
                    }
                }
            }
        }
        out
    }

    fn decode_entry(&self, entry: &StreamId) -> BrokerResult<Delivery> {
        let body = match entry.map.get(BODY_FIELD) {
            Some(redis::Value::BulkString(bytes)) => bytes.clone(),
            Some(redis::Value::SimpleString(s)) => s.clone().into_bytes(),
            Some(other) => {
                return Err(BrokerError::Protocol(format!(
                    "unexpected {BODY_FIELD} value: {other:?}"
                )))
            }
            None => {
                return Err(BrokerError::Protocol(format!(
                    "entry {} has no {BODY_FIELD} field",
                    entry.id
                )))
            }
        };

        let headers: HashMap<String, String> = match entry.map.get(HEADERS_FIELD) {
            Some(redis::Value::BulkString(bytes)) => serde_json::from_slice(bytes)
                .map_err(|e| BrokerError::Protocol(format!("malformed headers: {e}")))?,
            Some(redis::Value::SimpleString(s)) => serde_json::from_str(s)
                .map_err(|e| BrokerError::Protocol(format!("malformed headers: {e}")))?,
            Some(other) => {
                return Err(BrokerError::Protocol(format!(
                    "unexpected {HEADERS_FIELD} value: {other:?}"
                )))
            }
            None => HashMap::new(),
        };

        Ok(Delivery::new(
            entry.id.clone(),
            body,
            headers,
            Arc::clone(&self.acker) as Arc<dyn Acker>,
        ))
    }
}

/// Acknowledges entries against the consumer group with XACK.
struct StreamAcker {
    conn: MultiplexedConnection,
    stream: String,
    group: String,
}

#[async_trait]
impl Acker for StreamAcker {
    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let acked: i64 = conn
            .xack(&self.stream, &self.group, &[message_id])
            .await
            .map_err(|e| QueueError::Ack(e.to_string()))?;

        if acked == 1 {
            debug!(stream = %self.stream, id = %message_id, "acknowledged delivery");
        } else {
            warn!(
                stream = %self.stream,
                id = %message_id,
                acked,
                "XACK did not match a pending entry"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bump_retry_count_starts_at_one() {
        let mut headers = HashMap::new();
        bump_retry_count(&mut headers);
        assert_eq!(headers.get(RETRY_HEADER).map(String::as_str), Some("1"));
    }

    #[test]
    fn bump_retry_count_increments() {
        let mut headers = HashMap::from([(RETRY_HEADER.to_string(), "3".to_string())]);
        bump_retry_count(&mut headers);
        assert_eq!(headers.get(RETRY_HEADER).map(String::as_str), Some("4"));
    }

    #[test]
    fn bump_retry_count_resets_garbage() {
        let mut headers = HashMap::from([(RETRY_HEADER.to_string(), "many".to_string())]);
        bump_retry_count(&mut headers);
        assert_eq!(headers.get(RETRY_HEADER).map(String::as_str), Some("1"));
    }

    #[test]
    fn busy_group_detection() {
        assert!(is_busy_group(
            "BUSYGROUP Consumer Group name already exists"
        ));
        assert!(!is_busy_group("NOGROUP No such consumer group"));
    }

    #[test]
    fn encode_fields_omits_empty_headers() {
        let fields = encode_fields(&Publishing::new(b"payload".to_vec())).unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].0, BODY_FIELD);
        assert_eq!(fields[0].1, b"payload");
    }

    #[test]
    fn encode_fields_serializes_headers_as_json() {
        let publishing = Publishing::new(b"payload".to_vec()).with_header("origin", "test");
        let fields = encode_fields(&publishing).unwrap();

        assert_eq!(fields.len(), 2);
        let headers: HashMap<String, String> = serde_json::from_slice(&fields[1].1).unwrap();
        assert_eq!(headers.get("origin").map(String::as_str), Some("test"));
    }

    #[test]
    fn encode_outcome_round_trips() {
        let outcome = Outcome::fatal("boom").with_meta([("node", json!(3))]);
        let publishing = encode_outcome(&outcome).unwrap();

        assert_eq!(
            publishing.headers.get("outcome-kind").map(String::as_str),
            Some("fatal")
        );
        assert_eq!(
            publishing.headers.get("content-type").map(String::as_str),
            Some("application/json")
        );

        let decoded: Outcome = serde_json::from_slice(&publishing.body).unwrap();
        assert_eq!(decoded, outcome);
    }

    #[test]
    fn encode_outcome_labels_each_kind() {
        for (outcome, label) in [
            (Outcome::success(), "success"),
            (Outcome::all_done(), "all_done"),
            (Outcome::error("x"), "error"),
            (Outcome::requeue(), "requeue"),
        ] {
            let publishing = encode_outcome(&outcome).unwrap();
            assert_eq!(
                publishing.headers.get("outcome-kind").map(String::as_str),
                Some(label)
            );
        }
    }
}
