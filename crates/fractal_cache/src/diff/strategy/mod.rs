//! Pluggable planning strategies and their default implementations.

mod dedup;
mod field_fetch;
mod horizontal;
mod pagination;
mod relation;
mod vertical;

pub use dedup::{DeduplicationConfig, DefaultDeduplication, RequestDeduplicationStrategy};
pub use field_fetch::{DefaultFieldFetch, FieldFetchConfig, FieldFetchStrategy, LowFrequencyStrategy};
pub use horizontal::{
    DefaultHorizontalCheck, HorizontalCheckConfig, HorizontalCheckStrategy, HorizontalResult,
};
pub use pagination::{
    DefaultPaginationRequest, IntervalMergeStrategy, PaginationRequestConfig,
    PaginationRequestStrategy,
};
pub use relation::{
    DefaultRelationRequest, RelationBatching, RelationRequestConfig, RelationRequestStrategy,
};
pub use vertical::{
    DefaultVerticalCheck, FieldMissingMap, MissingFields, RequiredFieldsPolicy,
    VerticalCheckConfig, VerticalCheckStrategy,
};
