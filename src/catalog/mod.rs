//! System catalogs.
//!
//! The catalog is an immutable snapshot behind a global `RwLock<Arc<_>>`:
//! readers clone the `Arc` once per statement and look things up without
//! holding the lock, DDL copies-on-write through [`with_catalog_write`], and a
//! transaction abort restores the snapshot taken at `BEGIN`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

pub mod bootstrap;
pub mod namespace;
pub mod oid;
pub mod pg_operator;
pub mod pg_proc;
pub mod pg_type;
pub mod table;

use oid::{INVALID_OID, Oid, OidGenerator};
use pg_operator::{
    AccessMethod, BT_EQUAL_STRATEGY, BT_GREATER_STRATEGY, BT_LESS_STRATEGY, OprKind, OpfamilyMember,
    PgAmop, PgCast, PgOpclass, PgOperator, PgOpfamily,
};
use pg_proc::PgProc;
use pg_type::{ANYARRAYOID, PgType, RECORDOID, TypAlign, TypType, TypeCategory};
use table::{Persistence, RelKind, Relation};

pub use namespace::FuncCandidate;

use crate::nodes::tupdesc::TupleDesc;
use crate::utils::elog::{PgError, PgResult, SqlState};

pub const PG_CATALOG_NAMESPACE: Oid = 11;
pub const PG_PUBLIC_NAMESPACE: Oid = 2200;
pub const PG_TEMP_NAMESPACE: Oid = 12_000;

/// Read-only lookup surface used by the analyzer, planner and evaluator.
pub trait CatalogOracle {
    fn type_by_id(&self, typid: Oid) -> Option<&PgType>;
    fn proc_by_id(&self, oid: Oid) -> Option<&PgProc>;
    fn operator_by_id(&self, oid: Oid) -> Option<&PgOperator>;
    /// Exact operator match on name and operand types.
    fn operator_by_name_types(&self, name: &str, left: Oid, right: Oid) -> Option<&PgOperator>;
    /// All operators of a name and shape visible on the search path.
    fn operator_candidates(&self, name: &str, kind: OprKind) -> Vec<&PgOperator>;
    fn function_candidates(
        &self,
        names: &[String],
        nargs: usize,
        argnames: &[String],
        expand_variadic: bool,
        expand_defaults: bool,
    ) -> PgResult<Vec<FuncCandidate>>;
    fn opclass_equality_operator(&self, opfamily: Oid, lefttype: Oid, righttype: Oid) -> Option<Oid>;
    /// btree interpretations of an operator.
    fn opfamily_members(&self, opno: Oid) -> Vec<OpfamilyMember>;
    fn relation_descriptor(&self, relid: Oid) -> Option<&Relation>;
    fn namespace_by_name(&self, name: &str) -> Option<Oid>;
    fn current_database_name(&self) -> &str;
}

/// Sort/group support for one type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeSortOps {
    pub eq: Oid,
    pub lt: Oid,
    pub gt: Oid,
    pub hashable: bool,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    oid_gen: OidGenerator,
    database_name: String,
    namespaces: HashMap<Oid, String>,
    types: HashMap<Oid, PgType>,
    type_names: HashMap<(Oid, String), Oid>,
    procs: HashMap<Oid, PgProc>,
    proc_names: HashMap<String, Vec<Oid>>,
    operators: HashMap<Oid, PgOperator>,
    oper_names: HashMap<String, Vec<Oid>>,
    casts: HashMap<(Oid, Oid), PgCast>,
    opfamilies: HashMap<Oid, PgOpfamily>,
    amops: Vec<PgAmop>,
    opclasses: Vec<PgOpclass>,
    collations: HashMap<String, Oid>,
    relations: HashMap<Oid, Relation>,
    rel_names: HashMap<(Oid, String), Oid>,
    /// Distinct for every catalog state ever installed.
    version: u64,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new_bootstrap()
    }
}

impl Catalog {
    pub(crate) fn empty() -> Self {
        let mut namespaces = HashMap::new();
        namespaces.insert(PG_CATALOG_NAMESPACE, "pg_catalog".to_string());
        namespaces.insert(PG_PUBLIC_NAMESPACE, "public".to_string());
        namespaces.insert(PG_TEMP_NAMESPACE, "pg_temp".to_string());
        Self {
            oid_gen: OidGenerator::default(),
            database_name: "postgres".to_string(),
            namespaces,
            types: HashMap::new(),
            type_names: HashMap::new(),
            procs: HashMap::new(),
            proc_names: HashMap::new(),
            operators: HashMap::new(),
            oper_names: HashMap::new(),
            casts: HashMap::new(),
            opfamilies: HashMap::new(),
            amops: Vec::new(),
            opclasses: Vec::new(),
            collations: HashMap::new(),
            relations: HashMap::new(),
            rel_names: HashMap::new(),
            version: next_catalog_version(),
        }
    }

    pub fn new_bootstrap() -> Self {
        let mut catalog = Self::empty();
        bootstrap::populate(&mut catalog);
        catalog
    }

    /// Changes whenever the catalog is written, so anything analyzed
    /// against one version is stale under another.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn next_oid(&mut self) -> Oid {
        self.oid_gen.next_oid()
    }

    pub fn namespace_name(&self, oid: Oid) -> Option<&str> {
        self.namespaces.get(&oid).map(String::as_str)
    }

    // -- types --------------------------------------------------------------

    pub fn add_type(&mut self, ty: PgType) {
        self.type_names
            .insert((ty.namespace, ty.name.clone()), ty.oid);
        self.types.insert(ty.oid, ty);
    }

    pub fn remove_type(&mut self, typid: Oid) {
        if let Some(ty) = self.types.remove(&typid) {
            self.type_names.remove(&(ty.namespace, ty.name));
        }
    }

    pub fn type_by_name(&self, namespace: Oid, name: &str) -> Option<&PgType> {
        self.type_names
            .get(&(namespace, name.to_string()))
            .and_then(|oid| self.types.get(oid))
    }

    pub fn type_name(&self, typid: Oid) -> String {
        match self.types.get(&typid) {
            Some(ty) => ty.name.clone(),
            None if typid == INVALID_OID => "-".to_string(),
            None => typid.to_string(),
        }
    }

    /// Human-readable type name as `format_type` renders it.
    pub fn format_type(&self, typid: Oid) -> String {
        let Some(ty) = self.types.get(&typid) else {
            return self.type_name(typid);
        };
        if ty.is_array() {
            return format!("{}[]", self.format_type(ty.elem));
        }
        match ty.name.as_str() {
            "int2" => "smallint".to_string(),
            "int4" => "integer".to_string(),
            "int8" => "bigint".to_string(),
            "float4" => "real".to_string(),
            "float8" => "double precision".to_string(),
            "bool" => "boolean".to_string(),
            "varchar" => "character varying".to_string(),
            "bpchar" => "character".to_string(),
            "timestamp" => "timestamp without time zone".to_string(),
            "timestamptz" => "timestamp with time zone".to_string(),
            other => other.to_string(),
        }
    }

    pub fn array_type_of(&self, elemtype: Oid) -> Option<Oid> {
        self.types
            .get(&elemtype)
            .map(|ty| ty.array)
            .filter(|&oid| oid != INVALID_OID)
    }

    /// Element type when `typid` is an array type (looking through domains).
    pub fn element_type_of(&self, typid: Oid) -> Option<Oid> {
        let base = self.base_type(typid);
        self.types
            .get(&base)
            .filter(|ty| ty.is_array())
            .map(|ty| ty.elem)
    }

    pub fn is_array_type(&self, typid: Oid) -> bool {
        self.element_type_of(typid).is_some() || typid == ANYARRAYOID
    }

    /// Strip domains down to the underlying base type.
    pub fn base_type(&self, typid: Oid) -> Oid {
        self.base_type_and_typmod(typid, -1).0
    }

    pub fn base_type_and_typmod(&self, mut typid: Oid, mut typmod: i32) -> (Oid, i32) {
        while let Some(ty) = self.types.get(&typid) {
            if ty.typtype != TypType::Domain {
                break;
            }
            typid = ty.basetype;
            typmod = ty.typmod;
        }
        (typid, typmod)
    }

    pub fn type_category(&self, typid: Oid) -> TypeCategory {
        self.types
            .get(&typid)
            .map_or(TypeCategory::Invalid, |ty| ty.category)
    }

    pub fn is_preferred_type(&self, typid: Oid) -> bool {
        self.types.get(&typid).is_some_and(|ty| ty.preferred)
    }

    pub fn type_collation(&self, typid: Oid) -> Oid {
        self.types
            .get(&typid)
            .map_or(INVALID_OID, |ty| ty.collation)
    }

    pub fn is_composite_type(&self, typid: Oid) -> bool {
        let base = self.base_type(typid);
        base == RECORDOID
            || self
                .types
                .get(&base)
                .is_some_and(|ty| ty.typtype == TypType::Composite)
    }

    /// Row descriptor of a named composite type.
    pub fn composite_desc(&self, typid: Oid) -> Option<&TupleDesc> {
        let base = self.base_type(typid);
        let relid = self.types.get(&base)?.relid;
        self.relations.get(&relid).map(|rel| &rel.desc)
    }

    // -- functions and operators --------------------------------------------

    pub fn add_proc(&mut self, proc: PgProc) {
        self.proc_names
            .entry(proc.name.clone())
            .or_default()
            .push(proc.oid);
        self.procs.insert(proc.oid, proc);
    }

    pub fn remove_proc(&mut self, oid: Oid) {
        if let Some(proc) = self.procs.remove(&oid) {
            if let Some(list) = self.proc_names.get_mut(&proc.name) {
                list.retain(|&candidate| candidate != oid);
            }
        }
    }

    pub(crate) fn procs_named(&self, name: &str) -> impl Iterator<Item = &PgProc> {
        self.proc_names
            .get(name)
            .into_iter()
            .flatten()
            .filter_map(|oid| self.procs.get(oid))
    }

    /// Look up a builtin function by name and exact argument types.
    pub fn proc_by_signature(&self, name: &str, argtypes: &[Oid]) -> Option<&PgProc> {
        self.procs_named(name)
            .find(|proc| proc.argtypes == argtypes)
    }

    pub fn add_operator(&mut self, op: PgOperator) {
        self.oper_names
            .entry(op.name.clone())
            .or_default()
            .push(op.oid);
        self.operators.insert(op.oid, op);
    }

    pub(crate) fn operators_named(&self, name: &str) -> impl Iterator<Item = &PgOperator> {
        self.oper_names
            .get(name)
            .into_iter()
            .flatten()
            .filter_map(|oid| self.operators.get(oid))
    }

    pub fn add_cast(&mut self, cast: PgCast) {
        self.casts.insert((cast.source, cast.target), cast);
    }

    pub fn cast_between(&self, source: Oid, target: Oid) -> Option<&PgCast> {
        self.casts.get(&(source, target))
    }

    pub fn add_opfamily(&mut self, family: PgOpfamily) {
        self.opfamilies.insert(family.oid, family);
    }

    pub fn add_amop(&mut self, amop: PgAmop) {
        self.amops.push(amop);
    }

    pub fn add_opclass(&mut self, opclass: PgOpclass) {
        self.opclasses.push(opclass);
    }

    pub fn opfamily(&self, oid: Oid) -> Option<&PgOpfamily> {
        self.opfamilies.get(&oid)
    }

    /// Default btree operator family for a type. Arrays and records share
    /// the polymorphic families.
    pub fn default_btree_opfamily(&self, typid: Oid) -> Option<Oid> {
        let base = self.base_type(typid);
        let lookup = |input: Oid| {
            self.opclasses
                .iter()
                .find(|opc| opc.method == AccessMethod::Btree && opc.input_type == input)
                .map(|opc| opc.family)
        };
        lookup(base).or_else(|| {
            if self.element_type_of(base).is_some() {
                lookup(ANYARRAYOID)
            } else if self.is_composite_type(base) {
                lookup(RECORDOID)
            } else {
                None
            }
        })
    }

    pub fn opfamily_member(&self, family: Oid, lefttype: Oid, righttype: Oid, strategy: i16) -> Option<Oid> {
        self.amops
            .iter()
            .find(|amop| {
                amop.family == family
                    && amop.lefttype == lefttype
                    && amop.righttype == righttype
                    && amop.strategy == strategy
            })
            .map(|amop| amop.operator)
    }

    /// Equality and ordering operators used for sorting, grouping and
    /// DISTINCT over values of `typid`.
    pub fn sort_group_operators(&self, typid: Oid) -> Option<TypeSortOps> {
        let base = self.base_type(typid);
        let family = self.default_btree_opfamily(base)?;
        let opcintype = self
            .opclasses
            .iter()
            .find(|opc| opc.family == family && opc.method == AccessMethod::Btree)
            .map(|opc| opc.input_type)?;
        let member_type = if self.opfamily_member(family, base, base, BT_EQUAL_STRATEGY).is_some() {
            base
        } else {
            opcintype
        };
        let eq = self.opfamily_member(family, member_type, member_type, BT_EQUAL_STRATEGY)?;
        let lt = self.opfamily_member(family, member_type, member_type, BT_LESS_STRATEGY)?;
        let gt = self.opfamily_member(family, member_type, member_type, BT_GREATER_STRATEGY)?;
        Some(TypeSortOps {
            eq,
            lt,
            gt,
            hashable: !matches!(self.type_category(base), TypeCategory::Pseudo),
        })
    }

    // -- collations ---------------------------------------------------------

    pub fn add_collation(&mut self, name: &str, oid: Oid) {
        self.collations.insert(name.to_string(), oid);
    }

    pub fn collation_by_name(&self, name: &str) -> Option<Oid> {
        self.collations.get(name).copied()
    }

    pub fn collation_name(&self, oid: Oid) -> String {
        self.collations
            .iter()
            .find(|(_, coll)| **coll == oid)
            .map_or_else(|| oid.to_string(), |(name, _)| name.clone())
    }

    // -- relations ----------------------------------------------------------

    pub fn relation(&self, relid: Oid) -> Option<&Relation> {
        self.relations.get(&relid)
    }

    pub fn relation_mut(&mut self, relid: Oid) -> Option<&mut Relation> {
        self.relations.get_mut(&relid)
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    pub fn relation_in_namespace(&self, namespace: Oid, name: &str) -> Option<&Relation> {
        self.rel_names
            .get(&(namespace, name.to_string()))
            .and_then(|oid| self.relations.get(oid))
    }

    pub fn add_relation(&mut self, rel: Relation) -> PgResult<()> {
        let key = (rel.namespace, rel.name.clone());
        if self.rel_names.contains_key(&key) {
            return Err(PgError::new(
                SqlState::DuplicateTable,
                format!("relation \"{}\" already exists", rel.name),
            ));
        }
        self.rel_names.insert(key, rel.oid);
        self.relations.insert(rel.oid, rel);
        Ok(())
    }

    /// Register a new relation together with its row type. Returns the
    /// relation's OID.
    pub fn create_relation(
        &mut self,
        name: &str,
        namespace: Oid,
        kind: RelKind,
        persistence: Persistence,
        desc: TupleDesc,
    ) -> PgResult<Oid> {
        if self.rel_names.contains_key(&(namespace, name.to_string()))
            || self.type_names.contains_key(&(namespace, name.to_string()))
        {
            return Err(PgError::new(
                SqlState::DuplicateTable,
                format!("relation \"{name}\" already exists"),
            ));
        }
        let relid = self.next_oid();
        let rowtype = self.next_oid();
        let (input, output) = self
            .types
            .get(&RECORDOID)
            .map_or((INVALID_OID, INVALID_OID), |record| (record.input, record.output));
        self.add_type(PgType {
            oid: rowtype,
            name: name.to_string(),
            namespace,
            len: -1,
            byval: false,
            align: TypAlign::Double,
            typtype: TypType::Composite,
            category: TypeCategory::Composite,
            preferred: false,
            elem: INVALID_OID,
            array: INVALID_OID,
            relid,
            input,
            output,
            collation: INVALID_OID,
            basetype: INVALID_OID,
            typmod: -1,
            notnull: false,
            constraints: Vec::new(),
            delim: ',',
        });
        self.add_relation(Relation {
            oid: relid,
            name: name.to_string(),
            namespace,
            kind,
            persistence,
            desc: desc.with_type(rowtype),
            rowtype,
            relfilenode: relid,
            populated: kind != RelKind::MatView,
            defaults: HashMap::new(),
            checks: Vec::new(),
            indexes: Vec::new(),
            view_query: None,
            reltuples: None,
        })?;
        Ok(relid)
    }

    pub fn remove_relation(&mut self, relid: Oid) -> Option<Relation> {
        let rel = self.relations.remove(&relid)?;
        self.rel_names.remove(&(rel.namespace, rel.name.clone()));
        self.remove_type(rel.rowtype);
        Some(rel)
    }
}

impl CatalogOracle for Catalog {
    fn type_by_id(&self, typid: Oid) -> Option<&PgType> {
        self.types.get(&typid)
    }

    fn proc_by_id(&self, oid: Oid) -> Option<&PgProc> {
        self.procs.get(&oid)
    }

    fn operator_by_id(&self, oid: Oid) -> Option<&PgOperator> {
        self.operators.get(&oid)
    }

    fn operator_by_name_types(&self, name: &str, left: Oid, right: Oid) -> Option<&PgOperator> {
        self.operators_named(name)
            .find(|op| op.left == left && op.right == right)
    }

    fn operator_candidates(&self, name: &str, kind: OprKind) -> Vec<&PgOperator> {
        self.operators_named(name)
            .filter(|op| op.kind == kind)
            .collect()
    }

    fn function_candidates(
        &self,
        names: &[String],
        nargs: usize,
        argnames: &[String],
        expand_variadic: bool,
        expand_defaults: bool,
    ) -> PgResult<Vec<FuncCandidate>> {
        namespace::func_candidates(self, names, nargs, argnames, expand_variadic, expand_defaults)
    }

    fn opclass_equality_operator(&self, opfamily: Oid, lefttype: Oid, righttype: Oid) -> Option<Oid> {
        self.opfamily_member(opfamily, lefttype, righttype, BT_EQUAL_STRATEGY)
    }

    fn opfamily_members(&self, opno: Oid) -> Vec<OpfamilyMember> {
        self.amops
            .iter()
            .filter(|amop| amop.operator == opno)
            .filter(|amop| {
                self.opfamilies
                    .get(&amop.family)
                    .is_some_and(|family| family.method == AccessMethod::Btree)
            })
            .map(|amop| OpfamilyMember {
                family: amop.family,
                strategy: amop.strategy,
                lefttype: amop.lefttype,
                righttype: amop.righttype,
            })
            .collect()
    }

    fn relation_descriptor(&self, relid: Oid) -> Option<&Relation> {
        self.relations.get(&relid)
    }

    fn namespace_by_name(&self, name: &str) -> Option<Oid> {
        self.namespaces
            .iter()
            .find(|(_, ns)| ns.as_str() == name)
            .map(|(&oid, _)| oid)
    }

    fn current_database_name(&self) -> &str {
        &self.database_name
    }
}

static GLOBAL_CATALOG: OnceLock<RwLock<Arc<Catalog>>> = OnceLock::new();
static CATALOG_VERSION: AtomicU64 = AtomicU64::new(1);

fn next_catalog_version() -> u64 {
    CATALOG_VERSION.fetch_add(1, Ordering::Relaxed)
}

fn global_catalog() -> &'static RwLock<Arc<Catalog>> {
    GLOBAL_CATALOG.get_or_init(|| RwLock::new(Arc::new(Catalog::default())))
}

/// The current catalog, shared and immutable.
pub fn catalog_snapshot() -> Arc<Catalog> {
    let catalog = global_catalog()
        .read()
        .unwrap_or_else(PoisonError::into_inner);
    Arc::clone(&catalog)
}

pub fn with_catalog_read<T>(f: impl FnOnce(&Catalog) -> T) -> T {
    f(&catalog_snapshot())
}

/// Mutate the catalog. Existing snapshots keep seeing the old version.
pub fn with_catalog_write<T>(f: impl FnOnce(&mut Catalog) -> T) -> T {
    let mut catalog = global_catalog()
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    let catalog = Arc::make_mut(&mut catalog);
    let out = f(catalog);
    catalog.version = next_catalog_version();
    out
}

/// Reinstall a previously taken snapshot (transaction abort).
pub fn restore_catalog(snapshot: Arc<Catalog>) {
    let mut catalog = global_catalog()
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    *catalog = snapshot;
}

pub fn reset_global_catalog_for_tests() {
    restore_catalog(Arc::new(Catalog::default()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::pg_type::{INT4OID, INT4ARRAYOID, TEXTOID};

    #[test]
    fn bootstrap_knows_array_types() {
        let catalog = Catalog::default();
        assert_eq!(catalog.array_type_of(INT4OID), Some(INT4ARRAYOID));
        assert_eq!(catalog.element_type_of(INT4ARRAYOID), Some(INT4OID));
        assert_eq!(catalog.format_type(INT4ARRAYOID), "integer[]");
    }

    #[test]
    fn sort_operators_resolve_through_families() {
        let catalog = Catalog::default();
        let ops = catalog.sort_group_operators(TEXTOID).expect("text is sortable");
        let eq = catalog.operator_by_id(ops.eq).expect("eq operator");
        assert_eq!(eq.name, "=");
        let lt = catalog.operator_by_id(ops.lt).expect("lt operator");
        assert_eq!(lt.name, "<");
        assert!(catalog.sort_group_operators(INT4ARRAYOID).is_some());
    }

    #[test]
    fn equality_interpretation_is_btree_strategy_three() {
        let catalog = Catalog::default();
        let eq = catalog
            .operator_by_name_types("=", INT4OID, INT4OID)
            .expect("int4 equality")
            .oid;
        let members = catalog.opfamily_members(eq);
        assert!(members.iter().any(|m| m.strategy == BT_EQUAL_STRATEGY));
    }

    #[test]
    fn snapshots_are_isolated_from_writes() {
        let mut catalog = Catalog::default();
        let before = Arc::new(catalog.clone());
        catalog.add_collation("custom", 99_999);
        assert!(before.collation_by_name("custom").is_none());
        assert_eq!(catalog.collation_by_name("custom"), Some(99_999));
    }
}
