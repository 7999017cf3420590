//! Transaction machinery: command counter, statement timestamps and
//! snapshot-based abort.

pub mod xact;
