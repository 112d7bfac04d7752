//! Record types carried by fetch responses.
//!
//! A decoded fetch frame is a flat sequence of records, each either a
//! [`Message`] (a consumed log entry) or a [`FetchError`] (a per-partition
//! fault reported by the broker). [`read_fetch`] folds a caller-supplied
//! function over the records of one frame.
//!
//! # Frame Format
//!
//! Each record is tag-prefixed:
//!
//! - **Message** (`tag 0`): topic (u16 length + bytes), partition (u32),
//!   offset (u64), key (i32 length, -1 for null), value (u32 length).
//! - **FetchError** (`tag 1`): topic (u16 length + bytes), partition
//!   (u32), error code (i16).
//!
//! Integers are little-endian. A frame with trailing garbage or an unknown
//! tag fails as a whole; the fetcher abandons that frame's decode.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::types::{Offset, PartitionId, TopicPartition};

/// Record tag for a message.
const TAG_MESSAGE: u8 = 0;
/// Record tag for a per-partition fetch error.
const TAG_ERROR: u8 = 1;

/// A consumed log entry, emitted unchanged on the output channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Topic the record belongs to.
    pub topic: String,
    /// Partition within the topic.
    pub partition: PartitionId,
    /// Offset of this record in the partition log.
    pub offset: Offset,
    /// Optional record key.
    pub key: Option<Bytes>,
    /// Record payload.
    pub value: Bytes,
}

impl Message {
    /// Creates a message with a null key.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        partition: PartitionId,
        offset: Offset,
        value: impl Into<Bytes>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            value: value.into(),
        }
    }

    /// Sets the record key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Returns the (topic, partition) pair this message belongs to.
    #[must_use]
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }

    /// Encodes the message into a frame buffer, tag included.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)] // Sizes bounded by limits.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(TAG_MESSAGE);
        put_topic(buf, &self.topic);
        buf.put_u32_le(self.partition.get());
        buf.put_u64_le(self.offset.get());
        match &self.key {
            Some(k) => {
                buf.put_i32_le(k.len() as i32);
                buf.put_slice(k);
            }
            None => buf.put_i32_le(-1),
        }
        buf.put_u32_le(self.value.len() as u32);
        buf.put_slice(&self.value);
    }

    /// Decodes the body of a message record (tag already consumed).
    #[allow(clippy::cast_sign_loss)] // key_len checked non-negative before cast.
    fn decode_body(buf: &mut impl Buf) -> Result<Self, FrameError> {
        let topic = get_topic(buf)?;
        if buf.remaining() < 4 + 8 + 4 {
            return Err(FrameError::Truncated);
        }
        let partition = PartitionId::new(buf.get_u32_le());
        let offset = Offset::new(buf.get_u64_le());

        let key_len = buf.get_i32_le();
        let key = if key_len < 0 {
            None
        } else {
            if buf.remaining() < key_len as usize {
                return Err(FrameError::Truncated);
            }
            Some(buf.copy_to_bytes(key_len as usize))
        };

        if buf.remaining() < 4 {
            return Err(FrameError::Truncated);
        }
        let value_len = buf.get_u32_le() as usize;
        if buf.remaining() < value_len {
            return Err(FrameError::Truncated);
        }
        let value = buf.copy_to_bytes(value_len);

        Ok(Self {
            topic,
            partition,
            offset,
            key,
            value,
        })
    }
}

/// A per-partition fault reported inside a fetch response.
///
/// Code 0 means healthy; the codec never emits a zero-code error record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    /// Topic the fault belongs to.
    pub topic: String,
    /// Partition within the topic.
    pub partition: PartitionId,
    /// Broker-reported error code.
    pub error_code: i16,
}

impl FetchError {
    /// Creates a fetch error record.
    #[must_use]
    pub fn new(topic: impl Into<String>, partition: PartitionId, error_code: i16) -> Self {
        Self {
            topic: topic.into(),
            partition,
            error_code,
        }
    }

    /// Returns the (topic, partition) pair this fault belongs to.
    #[must_use]
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }

    /// Encodes the error record into a frame buffer, tag included.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(TAG_ERROR);
        put_topic(buf, &self.topic);
        buf.put_u32_le(self.partition.get());
        buf.put_i16_le(self.error_code);
    }

    /// Decodes the body of an error record (tag already consumed).
    fn decode_body(buf: &mut impl Buf) -> Result<Self, FrameError> {
        let topic = get_topic(buf)?;
        if buf.remaining() < 4 + 2 {
            return Err(FrameError::Truncated);
        }
        let partition = PartitionId::new(buf.get_u32_le());
        let error_code = buf.get_i16_le();
        Ok(Self {
            topic,
            partition,
            error_code,
        })
    }
}

/// One decoded record of a fetch frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchRecord {
    /// A consumed log entry.
    Message(Message),
    /// A per-partition fault.
    Error(FetchError),
}

impl FetchRecord {
    /// Encodes the record into a frame buffer.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Message(m) => m.encode(buf),
            Self::Error(e) => e.encode(buf),
        }
    }
}

/// Folds `folder` over every record in a fetch frame.
///
/// Records are decoded in wire order; `folder` receives the running state
/// and each record, returning the next state. Decoding is all-or-nothing
/// per frame: a truncated record or unknown tag fails the whole frame and
/// the partial fold state is discarded.
///
/// # Errors
///
/// Returns [`FrameError`] when the frame is truncated, carries an unknown
/// record tag, or holds a topic name that is not UTF-8.
pub fn read_fetch<S, F>(frame: &Bytes, seed: S, mut folder: F) -> Result<S, FrameError>
where
    F: FnMut(S, FetchRecord) -> S,
{
    let mut buf = frame.clone();
    let mut state = seed;

    while buf.has_remaining() {
        let tag = buf.get_u8();
        let record = match tag {
            TAG_MESSAGE => FetchRecord::Message(Message::decode_body(&mut buf)?),
            TAG_ERROR => FetchRecord::Error(FetchError::decode_body(&mut buf)?),
            other => return Err(FrameError::UnknownRecordTag { tag: other }),
        };
        state = folder(state, record);
    }

    Ok(state)
}

/// Encodes a sequence of records into one frame.
#[must_use]
pub fn write_fetch(records: &[FetchRecord]) -> Bytes {
    let mut buf = BytesMut::new();
    for record in records {
        record.encode(&mut buf);
    }
    buf.freeze()
}

#[allow(clippy::cast_possible_truncation)] // Topic length bounded by limits.
fn put_topic(buf: &mut BytesMut, topic: &str) {
    buf.put_u16_le(topic.len() as u16);
    buf.put_slice(topic.as_bytes());
}

fn get_topic(buf: &mut impl Buf) -> Result<String, FrameError> {
    if buf.remaining() < 2 {
        return Err(FrameError::Truncated);
    }
    let len = buf.get_u16_le() as usize;
    if buf.remaining() < len {
        return Err(FrameError::Truncated);
    }
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| FrameError::TopicNotUtf8)
}

/// Frame decoding errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The frame ended inside a record.
    Truncated,
    /// A record carried a tag the decoder does not know.
    UnknownRecordTag {
        /// The offending tag byte.
        tag: u8,
    },
    /// A topic name was not valid UTF-8.
    TopicNotUtf8,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "fetch frame truncated"),
            Self::UnknownRecordTag { tag } => write!(f, "unknown record tag: {tag}"),
            Self::TopicNotUtf8 => write!(f, "topic name is not valid UTF-8"),
        }
    }
}

impl std::error::Error for FrameError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_roundtrip() {
        let original = Message::new("events", PartitionId::new(2), Offset::new(7), "payload")
            .with_key("user-9");

        let frame = write_fetch(&[FetchRecord::Message(original.clone())]);
        let records = read_fetch(&frame, Vec::new(), |mut acc, r| {
            acc.push(r);
            acc
        })
        .unwrap();

        assert_eq!(records, vec![FetchRecord::Message(original)]);
    }

    #[test]
    fn test_null_key_roundtrip() {
        let original = Message::new("events", PartitionId::new(0), Offset::new(0), "v");

        let frame = write_fetch(&[FetchRecord::Message(original.clone())]);
        let records = read_fetch(&frame, Vec::new(), |mut acc, r| {
            acc.push(r);
            acc
        })
        .unwrap();

        match &records[0] {
            FetchRecord::Message(m) => assert!(m.key.is_none()),
            FetchRecord::Error(_) => panic!("expected message"),
        }
    }

    #[test]
    fn test_mixed_frame_preserves_order() {
        let records = vec![
            FetchRecord::Message(Message::new("x", PartitionId::new(1), Offset::new(5), "a")),
            FetchRecord::Error(FetchError::new("x", PartitionId::new(0), 3)),
            FetchRecord::Message(Message::new("x", PartitionId::new(1), Offset::new(6), "b")),
        ];

        let frame = write_fetch(&records);
        let decoded = read_fetch(&frame, Vec::new(), |mut acc, r| {
            acc.push(r);
            acc
        })
        .unwrap();

        assert_eq!(decoded, records);
    }

    #[test]
    fn test_unknown_tag_fails_frame() {
        let mut buf = BytesMut::new();
        Message::new("x", PartitionId::new(0), Offset::new(1), "v").encode(&mut buf);
        buf.put_u8(0xff);

        let result = read_fetch(&buf.freeze(), 0u32, |count, _| count + 1);
        assert_eq!(result, Err(FrameError::UnknownRecordTag { tag: 0xff }));
    }

    #[test]
    fn test_truncated_frame_fails() {
        let frame = write_fetch(&[FetchRecord::Message(Message::new(
            "x",
            PartitionId::new(0),
            Offset::new(1),
            "value",
        ))]);
        let truncated = frame.slice(..frame.len() - 3);

        let result = read_fetch(&truncated, (), |(), _| ());
        assert_eq!(result, Err(FrameError::Truncated));
    }

    #[test]
    fn test_fold_counts_by_kind() {
        let frame = write_fetch(&[
            FetchRecord::Message(Message::new("x", PartitionId::new(0), Offset::new(1), "a")),
            FetchRecord::Error(FetchError::new("x", PartitionId::new(1), 6)),
        ]);

        let (messages, errors) = read_fetch(&frame, (0u32, 0u32), |(m, e), r| match r {
            FetchRecord::Message(_) => (m + 1, e),
            FetchRecord::Error(_) => (m, e + 1),
        })
        .unwrap();

        assert_eq!((messages, errors), (1, 1));
    }
}
