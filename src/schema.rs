//! Classification of schema fields into compressed and generic paths.

use prost_reflect::{FieldDescriptor, Kind, MessageDescriptor};

/// Per-stream state for one compressed floating-point field.
#[derive(Debug, Clone)]
pub(crate) struct CustomFieldState {
    /// Field tag in the schema.
    pub number: u32,
    /// Scalar kind, retained so decode can truncate back to `float` fields.
    pub kind: Kind,
    /// IEEE-754 bit pattern of the last value on this stream.
    pub prev_float_bits: u64,
    /// XOR of the two previous successive bit patterns.
    pub prev_xor: u64,
}

/// Whether `field` is carried by the float XOR path instead of the
/// marshaled payload.
pub(crate) fn is_custom_field(field: &FieldDescriptor) -> bool {
    !field.is_list() && !field.is_map() && matches!(field.kind(), Kind::Double | Kind::Float)
}

/// Builds the compressed-field slots for `schema` in ascending tag order,
/// reusing the allocation of `reuse`.
pub(crate) fn custom_fields(
    mut reuse: Vec<CustomFieldState>,
    schema: &MessageDescriptor,
) -> Vec<CustomFieldState> {
    reuse.clear();
    for field in schema.fields() {
        if is_custom_field(&field) {
            reuse.push(CustomFieldState {
                number: field.number(),
                kind: field.kind(),
                prev_float_bits: 0,
                prev_xor: 0,
            });
        }
    }
    reuse.sort_by_key(|state| state.number);
    reuse
}
