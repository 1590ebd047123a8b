//! # prototsz
//!
//! Streaming compression for time-series messages whose records are
//! Protocol-Buffer-shaped structures with a small, fixed set of
//! floating-point fields.
//!
//! ## Overview
//!
//! Each message is split in two:
//!
//! - **Compressed fields** — every non-repeated `double`/`float` field goes
//!   through Gorilla-style XOR encoding (the M3TSZ variant): the IEEE-754
//!   bit pattern is XORed with the previous value on the same field and the
//!   result is written under a 1-/2-bit opcode prefix. Unchanged values cost
//!   a single bit; drifting values cost only their changed window.
//! - **Generic fields** — everything else is shipped as Protocol Buffer wire
//!   format: in full on the first record, then as a per-field change diff
//!   against the previous record. Fields that revert to their schema default
//!   cannot be expressed by a merge, so their tags travel in a dedicated
//!   defaults bitset instead.
//!
//! Schemas are ordinary protobuf descriptors
//! ([`prost_reflect::MessageDescriptor`]) and messages are dynamic
//! ([`prost_reflect::DynamicMessage`]), so the codec works with any message
//! type known at runtime.
//!
//! ## Record layout
//!
//! ```text
//! more_data:1 = 1
//! for each compressed field, in ascending tag order:
//!     first record: raw_float_bits:64
//!     later records: xor_opcode (0 | 10 | 11) + window payload
//! proto_changes:1
//! if proto_changes == 1:
//!     defaults_present:1
//!     if defaults_present == 1:
//!         bitset_max:uvarint, then bitset_max bits
//!     payload_len:uvarint
//!     payload:payload_len bytes of protobuf wire format
//! ```
//!
//! A `more_data` bit of `0`, or exhaustion of the byte source between
//! records, ends the stream. The empty byte stream is a valid empty
//! sequence.
//!
//! ## Quick start
//!
//! ```rust
//! use prost_reflect::{DescriptorPool, DynamicMessage, Value};
//! use prost_types::field_descriptor_proto::{Label, Type};
//! use prost_types::{
//!     DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
//! };
//! use prototsz::{Encoder, EncoderOptions, StreamIterator};
//!
//! // Describe the message type: two compressed doubles and a string.
//! let fields = [
//!     ("latitude", 1, Type::Double),
//!     ("longitude", 2, Type::Double),
//!     ("name", 3, Type::String),
//! ];
//! let file = FileDescriptorProto {
//!     name: Some("vehicle.proto".to_owned()),
//!     package: Some("telemetry".to_owned()),
//!     syntax: Some("proto3".to_owned()),
//!     message_type: vec![DescriptorProto {
//!         name: Some("VehicleLocation".to_owned()),
//!         field: fields
//!             .iter()
//!             .map(|(name, number, kind)| FieldDescriptorProto {
//!                 name: Some((*name).to_owned()),
//!                 number: Some(*number),
//!                 r#type: Some(*kind as i32),
//!                 label: Some(Label::Optional as i32),
//!                 ..Default::default()
//!             })
//!             .collect(),
//!         ..Default::default()
//!     }],
//!     ..Default::default()
//! };
//! let pool = DescriptorPool::from_file_descriptor_set(FileDescriptorSet { file: vec![file] })?;
//! let schema = pool.get_message_by_name("telemetry.VehicleLocation").unwrap();
//!
//! // Compress a stream of readings.
//! let mut encoder = Encoder::new(EncoderOptions::default());
//! encoder.reset(Vec::new(), schema.clone());
//! for (lat, lon) in [(37.7749, -122.4194), (37.7751, -122.4196), (37.7754, -122.4199)] {
//!     let mut message = DynamicMessage::new(schema.clone());
//!     message.set_field_by_number(1, Value::F64(lat));
//!     message.set_field_by_number(2, Value::F64(lon));
//!     message.set_field_by_number(3, Value::String("bus-41".to_owned()));
//!     encoder.encode(message)?;
//! }
//! let compressed = encoder.close()?;
//!
//! // Decompress.
//! let mut iter = StreamIterator::new(compressed.as_slice(), schema);
//! let mut count = 0;
//! while iter.next() {
//!     let message = iter.current().unwrap();
//!     assert_eq!(
//!         message.get_field_by_number(3).unwrap().as_ref(),
//!         &Value::String("bus-41".to_owned()),
//!     );
//!     count += 1;
//! }
//! assert!(iter.err().is_none());
//! assert_eq!(count, 3);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Ownership model
//!
//! Encoders and iterators are single-owner and synchronous. The encoder
//! consumes each message (it becomes, or updates, the rolling diff base);
//! the iterator owns the rolling reconstructed message and mutates it in
//! place between `next` calls. Neither performs any I/O beyond the supplied
//! buffer or reader.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod bitstream;
mod encoder;
mod error;
mod iterator;
mod schema;
mod wire;
mod xor;

pub use encoder::{Encoder, EncoderOptions};
pub use error::CodecError;
pub use iterator::StreamIterator;

// Schemas and messages are plain prost-reflect types; re-exported so
// callers do not need to name the dependency for the common path.
pub use prost_reflect::{DynamicMessage, MessageDescriptor};

/// Convenience type alias for Results with [`CodecError`].
pub type Result<T> = std::result::Result<T, CodecError>;
