//! Error types for schema compilation and table construction
//!
//! All errors surface before the first packet is processed; the packet path
//! itself never returns an error (a lookup miss simply creates a bucket).

use thiserror::Error;

use crate::ie::IeInfo;
use crate::schema::FieldModifier;

/// An information element with no known location in a raw packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no raw packet source known for {0}")]
pub struct UnsupportedFieldError(pub IeInfo);

/// Rejections raised while compiling a record schema or sizing the table.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error(transparent)]
    UnsupportedField(#[from] UnsupportedFieldError),

    #[error("unsupported length {length} for {ie}")]
    BadFieldLength { ie: IeInfo, length: u16 },

    #[error("modifier {modifier:?} cannot be applied to {ie}")]
    BadModifier { ie: IeInfo, modifier: FieldModifier },

    #[error("masked {ie} must be 5 bytes (address + prefix), got {length}")]
    BadMaskLength { ie: IeInfo, length: u16 },

    #[error("{ie} requires a {required} field in the same template")]
    MissingCompanion { ie: IeInfo, required: &'static str },

    #[error("{0} appears more than once in the template")]
    DuplicateField(IeInfo),

    #[error("template has no key fields")]
    NoKeyFields,

    #[error("biflow aggregation requires {0}")]
    NotReversible(&'static str),

    #[error("reverse element {0} in the template, but biflow is disabled")]
    ReverseWithoutBiflow(IeInfo),

    #[error("hash table with 2^{0} slots is out of range, reduce hash_bits")]
    BadTableSize(u8),

    #[error("min_buffer_time {min} exceeds max_buffer_time {max}")]
    BadBufferTimes { min: u32, max: u32 },
}

pub type Result<T> = std::result::Result<T, SchemaError>;
