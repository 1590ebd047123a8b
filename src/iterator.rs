//! Streaming iterator over an encoded record sequence.
//!
//! The iterator is the inverse of the encoder: it decodes one record per
//! [`StreamIterator::next`] call, maintaining a rolling message that
//! accumulates the per-record deltas, and exposes that message through
//! [`StreamIterator::current`].

use std::io::Read;

use prost::Message;
use prost_reflect::{DynamicMessage, Kind, MessageDescriptor, Value};
use tracing::debug;

use crate::bitstream::BitReader;
use crate::error::CodecError;
use crate::schema::{custom_fields, CustomFieldState};
use crate::wire::{read_bitset, read_varint};
use crate::xor;
use crate::Result;

/// Longest LEB128 encoding of a `u64`.
const VARINT_SCRATCH_CAPACITY: usize = 10;

/// A streaming message iterator.
///
/// Decodes records written by [`crate::Encoder`] from any byte source. The
/// rolling reconstructed message is owned by the iterator and mutated in
/// place; it is only observable between [`StreamIterator::next`] calls.
///
/// The first error encountered is latched into [`StreamIterator::err`] and
/// every subsequent [`StreamIterator::next`] returns `false`. Clean
/// end-of-stream (a zero more-data bit or source exhaustion between records)
/// is not an error.
///
/// # Example
/// ```no_run
/// use prost_reflect::MessageDescriptor;
/// use prototsz::StreamIterator;
///
/// # fn example(compressed: Vec<u8>, schema: MessageDescriptor) {
/// let mut iter = StreamIterator::new(compressed.as_slice(), schema);
/// while iter.next() {
///     let message = iter.current().expect("a record was just decoded");
///     println!("{message:?}");
/// }
/// assert!(iter.err().is_none());
/// # }
/// ```
#[derive(Debug)]
pub struct StreamIterator<R> {
    stream: BitReader<R>,
    schema: MessageDescriptor,
    last_iterated: Option<DynamicMessage>,
    custom_fields: Vec<CustomFieldState>,

    // Scratch buffers reused between records to avoid allocation.
    bitset_values: Vec<u32>,
    varint_scratch: Vec<u8>,
    payload_scratch: Vec<u8>,

    consumed_first_message: bool,
    done: bool,
    err: Option<CodecError>,
}

impl<R: Read> StreamIterator<R> {
    /// Creates an iterator reading records from `reader`, reconstructing
    /// messages described by `schema`.
    pub fn new(reader: R, schema: MessageDescriptor) -> Self {
        let custom_fields = custom_fields(Vec::new(), &schema);
        Self {
            stream: BitReader::new(reader),
            schema,
            last_iterated: None,
            custom_fields,
            bitset_values: Vec::new(),
            varint_scratch: Vec::with_capacity(VARINT_SCRATCH_CAPACITY),
            payload_scratch: Vec::new(),
            consumed_first_message: false,
            done: false,
            err: None,
        }
    }

    /// Advances to the next record. Returns `false` on end-of-stream or
    /// error; check [`StreamIterator::err`] to distinguish.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> bool {
        if self.done || self.err.is_some() {
            return false;
        }

        let more_data = match self.stream.read_bit() {
            Ok(bit) => bit,
            Err(CodecError::Eof) => {
                self.done = true;
                return false;
            }
            Err(err) => {
                self.err = Some(err);
                return false;
            }
        };
        if !more_data {
            self.done = true;
            return false;
        }

        if let Err(err) = self.read_record() {
            debug!(error = %err, "iterator latched error");
            self.err = Some(err);
            return false;
        }
        self.consumed_first_message = true;
        true
    }

    /// The rolling reconstructed message after the latest successful
    /// [`StreamIterator::next`]. `None` before the first record.
    pub fn current(&self) -> Option<&DynamicMessage> {
        self.last_iterated.as_ref()
    }

    /// The sticky error, if any.
    pub fn err(&self) -> Option<&CodecError> {
        self.err.as_ref()
    }

    fn read_record(&mut self) -> Result<()> {
        self.read_custom_values()?;
        self.read_proto_values()
    }

    fn read_custom_values(&mut self) -> Result<()> {
        for i in 0..self.custom_fields.len() {
            if !self.consumed_first_message {
                // First record: the full IEEE-754 bit pattern, which also
                // bootstraps the XOR state.
                let float_bits = self.stream.read_bits(64)?;
                self.custom_fields[i].prev_float_bits = float_bits;
                self.custom_fields[i].prev_xor = float_bits;
            } else {
                let xor = xor::read_xor(&mut self.stream, self.custom_fields[i].prev_xor)?;
                self.custom_fields[i].prev_float_bits ^= xor;
                self.custom_fields[i].prev_xor = xor;
            }
            self.update_last_iterated(i)?;
        }
        Ok(())
    }

    fn read_proto_values(&mut self) -> Result<()> {
        let proto_changes = self.stream.read_bit()?;
        if !proto_changes {
            // No changes since the previous record; the rolling message
            // already reflects the current one.
            return Ok(());
        }

        let fields_set_to_default = self.stream.read_bit()?;
        if fields_set_to_default {
            read_bitset(
                &mut self.stream,
                &mut self.varint_scratch,
                &mut self.bitset_values,
            )?;
        }

        let payload_len = read_varint(&mut self.stream, &mut self.varint_scratch)?;
        self.payload_scratch.clear();
        for _ in 0..payload_len {
            let byte = self.stream.read_byte()?;
            self.payload_scratch.push(byte);
        }

        self.ensure_last_iterated();
        if let Some(last_iterated) = self.last_iterated.as_mut() {
            last_iterated.merge(self.payload_scratch.as_slice())?;
            if fields_set_to_default {
                // These fields were deliberately omitted from the delta;
                // merge left their stale values in place.
                for &number in &self.bitset_values {
                    last_iterated.clear_field_by_number(number);
                }
            }
        }
        Ok(())
    }

    /// Writes the reconstructed value of compressed-field slot `i` into the
    /// rolling message so `current` always reflects the latest record.
    fn update_last_iterated(&mut self, i: usize) -> Result<()> {
        let number = self.custom_fields[i].number;
        let value = f64::from_bits(self.custom_fields[i].prev_float_bits);
        let value = match self.custom_fields[i].kind {
            Kind::Float => Value::F32(value as f32),
            _ => Value::F64(value),
        };

        self.ensure_last_iterated();
        if let Some(last_iterated) = self.last_iterated.as_mut() {
            last_iterated
                .try_set_field_by_number(number, value)
                .map_err(|_| CodecError::FieldAccess(number))?;
        }
        Ok(())
    }

    fn ensure_last_iterated(&mut self) {
        if self.last_iterated.is_none() {
            self.last_iterated = Some(DynamicMessage::new(self.schema.clone()));
        }
    }
}
