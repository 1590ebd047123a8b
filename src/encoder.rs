//! Streaming encoder for Protocol Buffer time-series messages.
//!
//! Each record starts with a more-data control bit, followed by one XOR-
//! compressed value per floating-point field in ascending tag order, a
//! proto-changes control bit, and — when generic fields changed — an optional
//! defaults bitset plus a varint-framed Protocol Buffer delta containing only
//! the fields that differ from the previous record.

use std::borrow::Cow;

use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor, Value};
use tracing::{debug, trace};

use crate::bitstream::BitWriter;
use crate::error::CodecError;
use crate::schema::{custom_fields, CustomFieldState};
use crate::wire::{write_bitset, write_varint};
use crate::xor;
use crate::Result;

/// Maximum capacity of the compressed-field slot vector that will be
/// retained between resets.
const MAX_CUSTOM_FIELDS_CAPACITY_RETAIN: usize = 24;

/// Longest LEB128 encoding of a `u64`.
const VARINT_SCRATCH_CAPACITY: usize = 10;

/// Configuration for an [`Encoder`].
#[derive(Debug, Clone)]
pub struct EncoderOptions {
    /// Bytes to pre-allocate for the stream buffer created by
    /// [`Encoder::new`]. Buffers supplied through [`Encoder::reset`] keep
    /// their own capacity.
    pub initial_buffer_capacity: usize,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            initial_buffer_capacity: 1024,
        }
    }
}

/// A streaming message encoder.
///
/// An encoder is bound to an output buffer and a schema with
/// [`Encoder::reset`], fed with [`Encoder::encode`], and terminated with
/// [`Encoder::close`], which hands back the buffer and makes the encoder
/// unusable. Encoders are single-owner: no internal locking, no internal
/// I/O beyond the supplied buffer.
///
/// Errors are not recoverable; after any failed [`Encoder::encode`] the
/// stream content is undefined and the buffer should be discarded.
///
/// # Example
/// ```no_run
/// use prost_reflect::{DynamicMessage, MessageDescriptor, Value};
/// use prototsz::{Encoder, EncoderOptions};
///
/// # fn example(schema: MessageDescriptor) -> prototsz::Result<()> {
/// let mut encoder = Encoder::new(EncoderOptions::default());
/// encoder.reset(Vec::new(), schema.clone());
///
/// let mut message = DynamicMessage::new(schema);
/// message.set_field_by_number(1, Value::F64(37.7749));
/// encoder.encode(message)?;
///
/// let compressed = encoder.close()?;
/// # let _ = compressed;
/// # Ok(())
/// # }
/// ```
// TODO(schema evolution): swapping the schema mid-stream would require
// reordering the compressed-field slots on demand; until then the schema is
// fixed between resets.
#[derive(Debug)]
pub struct Encoder {
    stream: BitWriter,
    schema: Option<MessageDescriptor>,
    last_encoded: Option<DynamicMessage>,
    custom_fields: Vec<CustomFieldState>,

    // Scratch buffers reused between records to avoid allocation.
    changed_fields: Vec<u32>,
    fields_changed_to_default: Vec<u32>,
    off_schema_fields: Vec<u32>,
    varint_scratch: Vec<u8>,

    has_written_first_custom: bool,
    closed: bool,
}

impl Encoder {
    /// Creates a new, unbound encoder. Call [`Encoder::reset`] before
    /// encoding.
    pub fn new(options: EncoderOptions) -> Self {
        Self {
            stream: BitWriter::with_capacity(options.initial_buffer_capacity),
            schema: None,
            last_encoded: None,
            custom_fields: Vec::new(),
            changed_fields: Vec::new(),
            fields_changed_to_default: Vec::new(),
            off_schema_fields: Vec::new(),
            varint_scratch: Vec::with_capacity(VARINT_SCRATCH_CAPACITY),
            has_written_first_custom: false,
            closed: false,
        }
    }

    /// Rebinds the encoder to `buffer` and `schema`, erasing all rolling
    /// state. The next [`Encoder::encode`] behaves as a first record.
    pub fn reset(&mut self, buffer: Vec<u8>, schema: MessageDescriptor) {
        self.stream.reset(buffer);
        self.custom_fields = if self.custom_fields.capacity() <= MAX_CUSTOM_FIELDS_CAPACITY_RETAIN {
            custom_fields(std::mem::take(&mut self.custom_fields), &schema)
        } else {
            custom_fields(Vec::new(), &schema)
        };
        debug!(
            schema = schema.full_name(),
            custom_fields = self.custom_fields.len(),
            "encoder bound to schema"
        );
        self.schema = Some(schema);
        self.last_encoded = None;
        self.has_written_first_custom = false;
        self.closed = false;
    }

    /// Appends one record for `message` to the stream.
    ///
    /// The message is consumed: compressed fields, off-schema fields, and
    /// fields equal to the previous record are cleared from it before the
    /// residual delta is marshaled, and the first message is retained as the
    /// rolling diff base.
    ///
    /// # Errors
    /// [`CodecError::Closed`] after [`Encoder::close`],
    /// [`CodecError::SchemaRequired`] before the first [`Encoder::reset`],
    /// [`CodecError::UnknownFields`] when the message carries wire-format
    /// fields outside its descriptor, and
    /// [`CodecError::UnknownFieldType`] when a compressed-field slot is
    /// absent from the message or holds a non-floating-point value.
    pub fn encode(&mut self, mut message: DynamicMessage) -> Result<()> {
        if self.closed {
            return Err(CodecError::Closed);
        }
        if self.schema.is_none() {
            return Err(CodecError::SchemaRequired);
        }
        if message.unknown_fields().next().is_some() {
            return Err(CodecError::UnknownFields);
        }

        // Control bit indicating the stream has more data.
        self.stream.write_bit(true);

        self.encode_custom_values(&mut message)?;
        self.encode_proto_values(message)?;
        Ok(())
    }

    /// Returns the bytes written so far, including the partial tail byte.
    pub fn bytes(&self) -> Result<&[u8]> {
        if self.closed {
            return Err(CodecError::Closed);
        }
        Ok(self.stream.raw_bytes())
    }

    /// Takes ownership of the stream buffer and marks the encoder closed.
    pub fn close(&mut self) -> Result<Vec<u8>> {
        if self.closed {
            return Err(CodecError::Closed);
        }
        self.closed = true;
        trace!(bits = self.stream.len_bits(), "encoder closed");
        Ok(self.stream.discard())
    }

    fn encode_custom_values(&mut self, message: &mut DynamicMessage) -> Result<()> {
        for i in 0..self.custom_fields.len() {
            let number = self.custom_fields[i].number;
            let value = match message.get_field_by_number(number) {
                Some(value) => value,
                None => return Err(CodecError::UnknownFieldType(number)),
            };
            let value = match value.as_ref() {
                Value::F64(value) => *value,
                Value::F32(value) => f64::from(*value),
                _ => return Err(CodecError::UnknownFieldType(number)),
            };

            if !self.has_written_first_custom {
                self.encode_first_custom_value(i, value);
            } else {
                self.encode_next_custom_value(i, value);
            }

            // Cleared so the value does not reappear in the marshaled payload.
            message.clear_field_by_number(number);
        }
        self.has_written_first_custom = true;
        Ok(())
    }

    fn encode_first_custom_value(&mut self, i: usize, value: f64) {
        let float_bits = value.to_bits();
        self.stream.write_bits(float_bits, 64);
        self.custom_fields[i].prev_float_bits = float_bits;
        // Bootstraps the XOR to the value itself so the first contained
        // decode sees a sensible window.
        self.custom_fields[i].prev_xor = float_bits;
    }

    fn encode_next_custom_value(&mut self, i: usize, value: f64) {
        let cur_float_bits = value.to_bits();
        let cur_xor = self.custom_fields[i].prev_float_bits ^ cur_float_bits;
        xor::write_xor(&mut self.stream, self.custom_fields[i].prev_xor, cur_xor);
        self.custom_fields[i].prev_float_bits = cur_float_bits;
        self.custom_fields[i].prev_xor = cur_xor;
    }

    fn encode_proto_values(&mut self, mut message: DynamicMessage) -> Result<()> {
        self.changed_fields.clear();
        self.fields_changed_to_default.clear();

        let schema = self.schema.clone().ok_or(CodecError::SchemaRequired)?;

        // Strip populated fields that are not part of the bound schema so
        // the payload does not spend bytes on them.
        self.off_schema_fields.clear();
        for (field, _) in message.fields() {
            if schema.get_field(field.number()).is_none() {
                self.off_schema_fields.push(field.number());
            }
        }
        for &number in &self.off_schema_fields {
            message.clear_field_by_number(number);
        }

        if let Some(last_encoded) = self.last_encoded.as_mut() {
            for field in schema.fields() {
                let number = field.number();
                let cur = match message.get_field_by_number(number) {
                    Some(value) => value,
                    None => Cow::Owned(Value::default_value(&field.kind())),
                };
                let prev = last_encoded
                    .get_field_by_number(number)
                    .ok_or(CodecError::FieldAccess(number))?;

                if cur == prev {
                    // Unchanged fields are omitted from the delta.
                    message.clear_field_by_number(number);
                } else {
                    if *cur == Value::default_value(&field.kind()) {
                        // Back to default: merge alone cannot express this,
                        // so the tag is re-asserted through the bitset.
                        self.fields_changed_to_default.push(number);
                    }
                    self.changed_fields.push(number);
                    let cur = cur.into_owned();
                    last_encoded
                        .try_set_field_by_number(number, cur)
                        .map_err(|_| CodecError::FieldAccess(number))?;
                }
            }
        }

        if self.last_encoded.is_some() && self.changed_fields.is_empty() {
            // Nothing changed since the previous record, and that record
            // already established the diff base.
            self.stream.write_bit(false);
            return Ok(());
        }

        let marshaled = message.encode_to_vec();

        // Control bit indicating that proto values have changed.
        self.stream.write_bit(true);
        if self.fields_changed_to_default.is_empty() {
            self.stream.write_bit(false);
        } else {
            self.stream.write_bit(true);
            write_bitset(
                &mut self.stream,
                &mut self.varint_scratch,
                &self.fields_changed_to_default,
            );
        }
        write_varint(
            &mut self.stream,
            &mut self.varint_scratch,
            marshaled.len() as u64,
        );
        self.stream.write_bytes(&marshaled);

        if self.last_encoded.is_none() {
            // Subsequent records diff against this message through per-field
            // assignment.
            self.last_encoded = Some(message);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use prost_reflect::DescriptorPool;
    use prost_types::field_descriptor_proto::{Label, Type};
    use prost_types::{
        DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    };

    use super::*;
    use crate::bitstream::BitWriter;

    fn location_schema() -> MessageDescriptor {
        let fields = [
            ("latitude", 1, Type::Double),
            ("longitude", 2, Type::Double),
            ("name", 3, Type::String),
        ];
        let file = FileDescriptorProto {
            name: Some("location.proto".to_owned()),
            package: Some("encoder.test".to_owned()),
            syntax: Some("proto3".to_owned()),
            message_type: vec![DescriptorProto {
                name: Some("VehicleLocation".to_owned()),
                field: fields
                    .iter()
                    .map(|(name, number, r#type)| FieldDescriptorProto {
                        name: Some((*name).to_owned()),
                        number: Some(*number),
                        r#type: Some(*r#type as i32),
                        label: Some(Label::Optional as i32),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let pool = DescriptorPool::from_file_descriptor_set(FileDescriptorSet { file: vec![file] })
            .unwrap();
        pool.get_message_by_name("encoder.test.VehicleLocation")
            .unwrap()
    }

    fn location(schema: &MessageDescriptor, lat: f64, lon: f64, name: &str) -> DynamicMessage {
        let mut message = DynamicMessage::new(schema.clone());
        message.set_field_by_number(1, Value::F64(lat));
        message.set_field_by_number(2, Value::F64(lon));
        message.set_field_by_number(3, Value::String(name.to_owned()));
        message
    }

    #[test]
    fn test_encode_requires_schema() {
        let schema = location_schema();
        let mut encoder = Encoder::new(EncoderOptions::default());
        let err = encoder.encode(location(&schema, 0.0, 0.0, "")).unwrap_err();
        assert!(matches!(err, CodecError::SchemaRequired));
    }

    #[test]
    fn test_closed_encoder_rejects_everything() {
        let schema = location_schema();
        let mut encoder = Encoder::new(EncoderOptions::default());
        encoder.reset(Vec::new(), schema.clone());
        encoder.encode(location(&schema, 1.0, 2.0, "a")).unwrap();
        encoder.close().unwrap();

        assert!(matches!(
            encoder.encode(location(&schema, 1.0, 2.0, "a")),
            Err(CodecError::Closed)
        ));
        assert!(matches!(encoder.bytes(), Err(CodecError::Closed)));
        assert!(matches!(encoder.close(), Err(CodecError::Closed)));
    }

    #[test]
    fn test_unchanged_record_is_bit_exact() {
        let schema = location_schema();
        let mut encoder = Encoder::new(EncoderOptions::default());
        encoder.reset(Vec::new(), schema.clone());
        let message = location(&schema, 1.5, 2.5, "a");
        encoder.encode(message.clone()).unwrap();
        encoder.encode(message).unwrap();

        // First record: full floats and a marshaled payload holding the name.
        let mut expected = BitWriter::new();
        let mut scratch = Vec::new();
        expected.write_bit(true);
        expected.write_bits(1.5f64.to_bits(), 64);
        expected.write_bits(2.5f64.to_bits(), 64);
        expected.write_bit(true); // proto values present
        expected.write_bit(false); // no defaults bitset
        let mut payload = DynamicMessage::new(schema);
        payload.set_field_by_number(3, Value::String("a".to_owned()));
        let payload = payload.encode_to_vec();
        write_varint(&mut expected, &mut scratch, payload.len() as u64);
        expected.write_bytes(&payload);
        // Second record: more-data, two zero XORs, no proto changes.
        expected.write_bit(true);
        expected.write_bit(false);
        expected.write_bit(false);
        expected.write_bit(false);

        assert_eq!(encoder.bytes().unwrap(), expected.raw_bytes());
    }

    #[test]
    fn test_default_reassertion_writes_bitset() {
        let schema = location_schema();
        let mut encoder = Encoder::new(EncoderOptions::default());
        encoder.reset(Vec::new(), schema.clone());
        encoder.encode(location(&schema, 1.0, 2.0, "a")).unwrap();
        encoder.encode(location(&schema, 1.0, 2.0, "")).unwrap();

        let mut expected = BitWriter::new();
        let mut scratch = Vec::new();
        // First record: full floats and a marshaled payload holding the name.
        expected.write_bit(true);
        expected.write_bits(1.0f64.to_bits(), 64);
        expected.write_bits(2.0f64.to_bits(), 64);
        expected.write_bit(true);
        expected.write_bit(false);
        let mut payload = DynamicMessage::new(schema);
        payload.set_field_by_number(3, Value::String("a".to_owned()));
        let payload = payload.encode_to_vec();
        write_varint(&mut expected, &mut scratch, payload.len() as u64);
        expected.write_bytes(&payload);
        // Second record: unchanged floats, then the name reverts to its
        // default. The empty string marshals to nothing, so the change
        // travels entirely in the defaults bitset (tag 3 -> bit index 2).
        expected.write_bit(true);
        expected.write_bit(false);
        expected.write_bit(false);
        expected.write_bit(true);
        expected.write_bit(true);
        write_bitset(&mut expected, &mut scratch, &[3]);
        write_varint(&mut expected, &mut scratch, 0);

        assert_eq!(encoder.bytes().unwrap(), expected.raw_bytes());
    }

    #[test]
    fn test_reset_clears_rolling_state() {
        let schema = location_schema();
        let mut encoder = Encoder::new(EncoderOptions::default());
        encoder.reset(Vec::new(), schema.clone());
        encoder.encode(location(&schema, 1.0, 2.0, "a")).unwrap();
        let first_record_len = encoder.bytes().unwrap().len();
        encoder.encode(location(&schema, 1.0, 2.0, "a")).unwrap();

        // Rebinding erases the rolling state, so the same message costs a
        // full first record again instead of a 4-bit unchanged record.
        encoder.reset(Vec::new(), schema.clone());
        encoder.encode(location(&schema, 1.0, 2.0, "a")).unwrap();
        assert_eq!(encoder.bytes().unwrap().len(), first_record_len);
        assert!(first_record_len * 8 > 128);
    }
}
