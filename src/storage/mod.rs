//! Physical storage: in-memory heaps addressed by relfilenode.

pub mod heap;
