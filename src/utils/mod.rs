pub mod adt;
pub mod elog;
pub mod fmgr;
pub mod guc;
pub mod interrupt;
pub mod miscinit;
