//! The data-copy engine: partition planning, the copy supervisor, and
//! the copy workers that pump `COPY` streams between source and target.

pub mod partition;
pub mod supervisor;
pub mod worker;
