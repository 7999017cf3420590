pub mod datum;
pub mod makefuncs;
pub mod node_funcs;
pub mod params;
pub mod parsenodes;
pub mod plannodes;
pub mod primnodes;
pub mod tupdesc;
