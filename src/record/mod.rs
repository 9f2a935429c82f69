mod field;
mod record;

pub use field::{FieldType, Value};
pub use record::{Record, RecordBuilder};
