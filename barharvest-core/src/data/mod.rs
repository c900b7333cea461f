//! Raw and canonical tables and the transform between them.

pub mod canonical;
pub mod normalize;
pub mod raw;
pub mod schema;

pub use canonical::{CanonicalRecord, CanonicalTable};
pub use normalize::{FailureKind, NormalizationFailure, NormalizeStats, Normalizer, SuspendedRowPolicy};
pub use raw::{RawTable, RawTableError, RawValue};
pub use schema::{
    CanonicalColumn, ColumnMapping, Coercion, ResolvedColumns, SchemaError, SchemaMapper,
    SchemaProfile,
};
