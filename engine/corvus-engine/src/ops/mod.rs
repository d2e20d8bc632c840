//! Concrete physical operators.

mod distinct;
mod filter;
mod join;
mod join_common;
mod minus;
mod multi_column_join;
mod neutral;
mod optional_join;
mod scan;
mod sort;
mod text_limit;
mod union_op;
mod values;

pub use distinct::Distinct;
pub use filter::Filter;
pub use join::Join;
pub use minus::Minus;
pub use multi_column_join::MultiColumnJoin;
pub use neutral::NeutralElement;
pub use optional_join::OptionalJoin;
pub use scan::Scan;
pub use sort::Sort;
pub use text_limit::TextLimit;
pub use union_op::Union;
pub use values::Values;
