//! Per-type support functions: input/output, comparison, operators and the
//! builtin SQL-callable functions.

pub mod arrayfuncs;
pub mod cmp;
pub mod datetime;
pub mod float;
pub mod int_arithmetic;
pub mod io;
pub mod json;
pub mod jsonpath;
pub mod math_functions;
pub mod misc;
pub mod string_functions;
