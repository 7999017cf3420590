//! Bootstrap contents of the system catalogs.
//!
//! Builtin types carry their well-known OIDs; functions, operators and
//! operator families are numbered from [`FIRST_BOOTSTRAP_OBJECT_ID`]. The
//! `prosrc` of every internal function names an entry of the builtin table in
//! [`crate::utils::fmgr`], and aggregate/window implementations are looked up
//! by the executor under the same names.

use serde_json::{Map, Value as JsonValue};

use super::oid::{FIRST_BOOTSTRAP_OBJECT_ID, INVALID_OID, Oid, OidGenerator};
use super::pg_operator::{
    AccessMethod, BT_EQUAL_STRATEGY, BT_GREATER_EQUAL_STRATEGY, BT_GREATER_STRATEGY,
    BT_LESS_EQUAL_STRATEGY, BT_LESS_STRATEGY, CastMethod, CoercionContext, OprKind, PgAmop,
    PgCast, PgOpclass, PgOperator, PgOpfamily,
};
use super::pg_proc::{AggKind, PgAggregate, PgProc, ProKind, ProLang, Volatility};
use super::pg_type::*;
use super::{Catalog, PG_CATALOG_NAMESPACE};
use crate::nodes::datum::Datum;
use crate::nodes::makefuncs::make_const;

pub fn populate(catalog: &mut Catalog) {
    catalog.add_collation("default", DEFAULT_COLLATION_OID);
    catalog.add_collation("C", C_COLLATION_OID);
    catalog.add_collation("POSIX", POSIX_COLLATION_OID);

    let mut boot = Bootstrap {
        catalog,
        oids: OidGenerator::new(FIRST_BOOTSTRAP_OBJECT_ID),
        operators: Vec::new(),
    };
    boot.types();
    boot.comparison_operators();
    boot.arithmetic_operators();
    boot.misc_operators();
    boot.casts();
    boot.functions();
    boot.aggregates();
    boot.window_functions();
    boot.finish_operators();
}

struct Bootstrap<'a> {
    catalog: &'a mut Catalog,
    oids: OidGenerator,
    /// Operators are held back until commutators and negators are linked.
    operators: Vec<PgOperator>,
}

struct TypeSpec {
    oid: Oid,
    name: &'static str,
    len: i16,
    byval: bool,
    align: TypAlign,
    category: TypeCategory,
    preferred: bool,
    array: Oid,
    collation: Oid,
}

const fn scalar(
    oid: Oid,
    name: &'static str,
    len: i16,
    byval: bool,
    align: TypAlign,
    category: TypeCategory,
    preferred: bool,
    array: Oid,
    collation: Oid,
) -> TypeSpec {
    TypeSpec {
        oid,
        name,
        len,
        byval,
        align,
        category,
        preferred,
        array,
        collation,
    }
}

use TypAlign::{Char, Double, Int, Short};
use TypeCategory as Cat;

const SCALAR_TYPES: &[TypeSpec] = &[
    scalar(BOOLOID, "bool", 1, true, Char, Cat::Boolean, true, BOOLARRAYOID, INVALID_OID),
    scalar(BYTEAOID, "bytea", -1, false, Int, Cat::User, false, BYTEAARRAYOID, INVALID_OID),
    scalar(NAMEOID, "name", 64, false, Char, Cat::String, false, NAMEARRAYOID, C_COLLATION_OID),
    scalar(INT8OID, "int8", 8, true, Double, Cat::Numeric, false, INT8ARRAYOID, INVALID_OID),
    scalar(INT2OID, "int2", 2, true, Short, Cat::Numeric, false, INT2ARRAYOID, INVALID_OID),
    scalar(INT4OID, "int4", 4, true, Int, Cat::Numeric, false, INT4ARRAYOID, INVALID_OID),
    scalar(TEXTOID, "text", -1, false, Int, Cat::String, true, TEXTARRAYOID, DEFAULT_COLLATION_OID),
    scalar(OIDOID, "oid", 4, true, Int, Cat::Numeric, false, OIDARRAYOID, INVALID_OID),
    scalar(TIDOID, "tid", 6, false, Short, Cat::User, false, TIDARRAYOID, INVALID_OID),
    scalar(JSONOID, "json", -1, false, Int, Cat::User, false, JSONARRAYOID, INVALID_OID),
    scalar(FLOAT4OID, "float4", 4, true, Int, Cat::Numeric, false, FLOAT4ARRAYOID, INVALID_OID),
    scalar(FLOAT8OID, "float8", 8, true, Double, Cat::Numeric, true, FLOAT8ARRAYOID, INVALID_OID),
    scalar(BPCHAROID, "bpchar", -1, false, Int, Cat::String, false, BPCHARARRAYOID, DEFAULT_COLLATION_OID),
    scalar(VARCHAROID, "varchar", -1, false, Int, Cat::String, false, VARCHARARRAYOID, DEFAULT_COLLATION_OID),
    scalar(DATEOID, "date", 4, true, Int, Cat::DateTime, false, DATEARRAYOID, INVALID_OID),
    scalar(TIMESTAMPOID, "timestamp", 8, true, Double, Cat::DateTime, false, TIMESTAMPARRAYOID, INVALID_OID),
    scalar(TIMESTAMPTZOID, "timestamptz", 8, true, Double, Cat::DateTime, true, TIMESTAMPTZARRAYOID, INVALID_OID),
    scalar(NUMERICOID, "numeric", -1, false, Int, Cat::Numeric, false, NUMERICARRAYOID, INVALID_OID),
    scalar(JSONBOID, "jsonb", -1, false, Int, Cat::User, false, JSONBARRAYOID, INVALID_OID),
    scalar(JSONPATHOID, "jsonpath", -1, false, Int, Cat::User, false, JSONPATHARRAYOID, INVALID_OID),
];

const PSEUDO_TYPES: &[(Oid, &str, TypeCategory)] = &[
    (UNKNOWNOID, "unknown", Cat::Unknown),
    (CSTRINGOID, "cstring", Cat::Pseudo),
    (ANYOID, "any", Cat::Pseudo),
    (ANYARRAYOID, "anyarray", Cat::Pseudo),
    (VOIDOID, "void", Cat::Pseudo),
    (INTERNALOID, "internal", Cat::Pseudo),
    (ANYELEMENTOID, "anyelement", Cat::Pseudo),
    (ANYNONARRAYOID, "anynonarray", Cat::Pseudo),
    (ANYCOMPATIBLEOID, "anycompatible", Cat::Pseudo),
    (ANYCOMPATIBLEARRAYOID, "anycompatiblearray", Cat::Pseudo),
    (ANYCOMPATIBLENONARRAYOID, "anycompatiblenonarray", Cat::Pseudo),
];

const INTEGER_TYPES: [Oid; 3] = [INT2OID, INT4OID, INT8OID];
const FLOAT_TYPES: [Oid; 2] = [FLOAT4OID, FLOAT8OID];
const NUMBER_TYPES: [Oid; 6] = [INT2OID, INT4OID, INT8OID, FLOAT4OID, FLOAT8OID, NUMERICOID];

/// Comparison operators: (name, builtin, btree strategy).
const COMPARISONS: [(&str, &str, Option<i16>); 6] = [
    ("<", "datum_lt", Some(BT_LESS_STRATEGY)),
    ("<=", "datum_le", Some(BT_LESS_EQUAL_STRATEGY)),
    ("=", "datum_eq", Some(BT_EQUAL_STRATEGY)),
    (">=", "datum_ge", Some(BT_GREATER_EQUAL_STRATEGY)),
    (">", "datum_gt", Some(BT_GREATER_STRATEGY)),
    ("<>", "datum_ne", None),
];

fn comparison_suffix(name: &str) -> &'static str {
    match name {
        "<" => "lt",
        "<=" => "le",
        "=" => "eq",
        ">=" => "ge",
        ">" => "gt",
        _ => "ne",
    }
}

impl Bootstrap<'_> {
    fn next_oid(&mut self) -> Oid {
        self.oids.next_oid()
    }

    fn type_name(&self, typid: Oid) -> String {
        self.catalog.type_name(typid)
    }

    // -- pg_type ------------------------------------------------------------

    fn types(&mut self) {
        let typein = self.io_proc("type_in", true);
        let typeout = self.io_proc("type_out", false);

        for spec in SCALAR_TYPES {
            self.catalog.add_type(PgType {
                oid: spec.oid,
                name: spec.name.to_string(),
                namespace: PG_CATALOG_NAMESPACE,
                len: spec.len,
                byval: spec.byval,
                align: spec.align,
                typtype: TypType::Base,
                category: spec.category,
                preferred: spec.preferred,
                elem: INVALID_OID,
                array: spec.array,
                relid: INVALID_OID,
                input: typein,
                output: typeout,
                collation: spec.collation,
                basetype: INVALID_OID,
                typmod: -1,
                notnull: false,
                constraints: Vec::new(),
                delim: ',',
            });
            self.array_type(spec.array, spec.oid, spec.name, spec.collation, typein, typeout);
        }

        for &(oid, name, category) in PSEUDO_TYPES {
            self.catalog.add_type(PgType {
                oid,
                name: name.to_string(),
                namespace: PG_CATALOG_NAMESPACE,
                len: if oid == CSTRINGOID { -2 } else { -1 },
                byval: false,
                align: Int,
                typtype: TypType::Pseudo,
                category,
                preferred: false,
                elem: INVALID_OID,
                array: INVALID_OID,
                relid: INVALID_OID,
                input: typein,
                output: typeout,
                collation: INVALID_OID,
                basetype: INVALID_OID,
                typmod: -1,
                notnull: false,
                constraints: Vec::new(),
                delim: ',',
            });
        }

        self.catalog.add_type(PgType {
            oid: RECORDOID,
            name: "record".to_string(),
            namespace: PG_CATALOG_NAMESPACE,
            len: -1,
            byval: false,
            align: Double,
            typtype: TypType::Pseudo,
            category: Cat::Pseudo,
            preferred: false,
            elem: INVALID_OID,
            array: RECORDARRAYOID,
            relid: INVALID_OID,
            input: typein,
            output: typeout,
            collation: INVALID_OID,
            basetype: INVALID_OID,
            typmod: -1,
            notnull: false,
            constraints: Vec::new(),
            delim: ',',
        });
        self.array_type(RECORDARRAYOID, RECORDOID, "record", INVALID_OID, typein, typeout);
    }

    fn array_type(&mut self, oid: Oid, elem: Oid, elemname: &str, collation: Oid, input: Oid, output: Oid) {
        self.catalog.add_type(PgType {
            oid,
            name: format!("_{elemname}"),
            namespace: PG_CATALOG_NAMESPACE,
            len: -1,
            byval: false,
            align: Double,
            typtype: TypType::Base,
            category: Cat::Array,
            preferred: false,
            elem,
            array: INVALID_OID,
            relid: INVALID_OID,
            input,
            output,
            collation,
            basetype: INVALID_OID,
            typmod: -1,
            notnull: false,
            constraints: Vec::new(),
            delim: ',',
        });
    }

    /// Generic input (`cstring, oid, int4`) or output (`any`) function.
    fn io_proc(&mut self, prosrc: &str, input: bool) -> Oid {
        let (name, args, ret) = if input {
            ("type_in", vec![CSTRINGOID, OIDOID, INT4OID], ANYOID)
        } else {
            ("type_out", vec![ANYOID], CSTRINGOID)
        };
        self.func(name, &args, ret, prosrc)
    }

    // -- pg_proc ------------------------------------------------------------

    fn proc(&mut self, name: &str, args: &[Oid], ret: Oid, prosrc: &str) -> PgProc {
        PgProc {
            oid: self.next_oid(),
            name: name.to_string(),
            namespace: PG_CATALOG_NAMESPACE,
            kind: ProKind::Function,
            lang: ProLang::Internal,
            argtypes: args.to_vec(),
            argnames: Vec::new(),
            variadic: INVALID_OID,
            rettype: ret,
            retset: false,
            strict: true,
            volatility: Volatility::Immutable,
            defaults: Vec::new(),
            prosrc: prosrc.to_string(),
            sqlbody: None,
            aggregate: None,
        }
    }

    /// An identical row already registered (an operator's implementation
    /// that is also callable by name) is reused rather than duplicated.
    fn add_proc(&mut self, proc: PgProc) -> Oid {
        let existing = self.catalog.procs_named(&proc.name).find(|old| {
            old.namespace == proc.namespace
                && old.argtypes == proc.argtypes
                && old.rettype == proc.rettype
                && old.prosrc == proc.prosrc
        });
        if let Some(old) = existing {
            return old.oid;
        }
        let oid = proc.oid;
        self.catalog.add_proc(proc);
        oid
    }

    fn func(&mut self, name: &str, args: &[Oid], ret: Oid, prosrc: &str) -> Oid {
        let proc = self.proc(name, args, ret, prosrc);
        self.add_proc(proc)
    }

    fn func_with(
        &mut self,
        name: &str,
        args: &[Oid],
        ret: Oid,
        prosrc: &str,
        adjust: impl FnOnce(&mut PgProc),
    ) -> Oid {
        let mut proc = self.proc(name, args, ret, prosrc);
        adjust(&mut proc);
        self.add_proc(proc)
    }

    fn srf(&mut self, name: &str, args: &[Oid], ret: Oid, prosrc: &str) -> Oid {
        self.func_with(name, args, ret, prosrc, |p| p.retset = true)
    }

    /// `VARIADIC "any"` function; arguments are passed unpacked.
    fn variadic_any(&mut self, name: &str, fixed: &[Oid], ret: Oid, prosrc: &str, strict: bool) -> Oid {
        let mut args = fixed.to_vec();
        args.push(ANYOID);
        self.func_with(name, &args, ret, prosrc, |p| {
            p.variadic = ANYOID;
            p.strict = strict;
        })
    }

    // -- pg_operator --------------------------------------------------------

    fn oper(&mut self, name: &str, left: Oid, right: Oid, result: Oid, procname: &str, prosrc: &str) -> Oid {
        let code = self.func(procname, &[left, right], result, prosrc);
        let oid = self.next_oid();
        self.operators.push(PgOperator {
            oid,
            name: name.to_string(),
            namespace: PG_CATALOG_NAMESPACE,
            kind: OprKind::Binary,
            left,
            right,
            result,
            code,
            commutator: INVALID_OID,
            negator: INVALID_OID,
        });
        oid
    }

    fn prefix_oper(&mut self, name: &str, right: Oid, result: Oid, procname: &str, prosrc: &str) -> Oid {
        let code = self.func(procname, &[right], result, prosrc);
        let oid = self.next_oid();
        self.operators.push(PgOperator {
            oid,
            name: name.to_string(),
            namespace: PG_CATALOG_NAMESPACE,
            kind: OprKind::Prefix,
            left: INVALID_OID,
            right,
            result,
            code,
            commutator: INVALID_OID,
            negator: INVALID_OID,
        });
        oid
    }

    fn opfamily(&mut self, name: &str, opclass_types: &[Oid]) -> Oid {
        let oid = self.next_oid();
        self.catalog.add_opfamily(PgOpfamily {
            oid,
            name: name.to_string(),
            method: AccessMethod::Btree,
        });
        for &input_type in opclass_types {
            self.catalog.add_opclass(PgOpclass {
                family: oid,
                input_type,
                method: AccessMethod::Btree,
            });
        }
        oid
    }

    /// The six comparison operators for one (left, right) pair, registered as
    /// members of `family`.
    fn comparison_set(&mut self, family: Oid, left: Oid, right: Oid, prefix: &str, image: bool) {
        for (name, builtin, strategy) in COMPARISONS {
            let (opname, prosrc) = if image {
                (format!("*{name}"), builtin.replace("datum_", "record_image_"))
            } else {
                (name.to_string(), builtin.to_string())
            };
            let procname = format!("{prefix}{}", comparison_suffix(name));
            let opno = self.oper(&opname, left, right, BOOLOID, &procname, &prosrc);
            if let Some(strategy) = strategy {
                self.catalog.add_amop(PgAmop {
                    family,
                    lefttype: left,
                    righttype: right,
                    strategy,
                    operator: opno,
                });
            }
        }
        let cmpname = format!("bt{prefix}cmp");
        let prosrc = if image { "record_image_cmp" } else { "datum_cmp" };
        self.func(&cmpname, &[left, right], INT4OID, prosrc);
    }

    fn comparison_operators(&mut self) {
        let integer_ops = self.opfamily("integer_ops", &INTEGER_TYPES);
        for left in INTEGER_TYPES {
            for right in INTEGER_TYPES {
                let prefix = if left == right {
                    self.type_name(left)
                } else {
                    format!("{}{}", self.type_name(left), &self.type_name(right)[3..])
                };
                self.comparison_set(integer_ops, left, right, &prefix, false);
            }
        }
        let float_ops = self.opfamily("float_ops", &FLOAT_TYPES);
        for left in FLOAT_TYPES {
            for right in FLOAT_TYPES {
                let prefix = if left == right {
                    self.type_name(left)
                } else {
                    format!("float{}{}", &self.type_name(left)[5..], &self.type_name(right)[5..])
                };
                self.comparison_set(float_ops, left, right, &prefix, false);
            }
        }

        let same_type_families: [(&str, &[Oid]); 12] = [
            ("numeric_ops", &[NUMERICOID]),
            ("text_ops", &[TEXTOID, VARCHAROID, NAMEOID]),
            ("bpchar_ops", &[BPCHAROID]),
            ("bool_ops", &[BOOLOID]),
            ("bytea_ops", &[BYTEAOID]),
            ("oid_ops", &[OIDOID]),
            ("tid_ops", &[TIDOID]),
            ("date_ops", &[DATEOID]),
            ("timestamp_ops", &[TIMESTAMPOID]),
            ("timestamptz_ops", &[TIMESTAMPTZOID]),
            ("jsonb_ops", &[JSONBOID]),
            ("array_ops", &[ANYARRAYOID]),
        ];
        let mut text_family = INVALID_OID;
        for (family_name, types) in same_type_families {
            let family = self.opfamily(family_name, types);
            let typid = types[0];
            let prefix = match typid {
                ANYARRAYOID => "array".to_string(),
                other => self.type_name(other),
            };
            self.comparison_set(family, typid, typid, &prefix, false);
            if typid == TEXTOID {
                text_family = family;
            }
        }
        self.comparison_set(text_family, NAMEOID, NAMEOID, "name", false);

        let record_ops = self.opfamily("record_ops", &[RECORDOID]);
        self.comparison_set(record_ops, RECORDOID, RECORDOID, "record", false);
        let record_image_ops = self.opfamily("record_image_ops", &[]);
        self.comparison_set(record_image_ops, RECORDOID, RECORDOID, "record_image_", true);
    }

    fn arithmetic_operators(&mut self) {
        let int_ops = [
            ("+", "pl", "int_pl"),
            ("-", "mi", "int_mi"),
            ("*", "mul", "int_mul"),
            ("/", "div", "int_div"),
            ("%", "mod", "int_mod"),
        ];
        for typid in INTEGER_TYPES {
            let tname = self.type_name(typid);
            for (op, suffix, prosrc) in int_ops {
                self.oper(op, typid, typid, typid, &format!("{tname}{suffix}"), prosrc);
            }
            self.prefix_oper("-", typid, typid, &format!("{tname}um"), "int_um");
        }
        let float_ops = [
            ("+", "pl", "float_pl"),
            ("-", "mi", "float_mi"),
            ("*", "mul", "float_mul"),
            ("/", "div", "float_div"),
        ];
        for typid in FLOAT_TYPES {
            let tname = self.type_name(typid);
            for (op, suffix, prosrc) in float_ops {
                self.oper(op, typid, typid, typid, &format!("{tname}{suffix}"), prosrc);
            }
            self.prefix_oper("-", typid, typid, &format!("{tname}um"), "float_um");
        }
        let numeric_ops = [
            ("+", "numeric_add", "numeric_add"),
            ("-", "numeric_sub", "numeric_sub"),
            ("*", "numeric_mul", "numeric_mul"),
            ("/", "numeric_div", "numeric_div"),
            ("%", "numeric_mod", "numeric_mod"),
            ("^", "numeric_power", "numeric_power"),
        ];
        for (op, procname, prosrc) in numeric_ops {
            self.oper(op, NUMERICOID, NUMERICOID, NUMERICOID, procname, prosrc);
        }
        self.prefix_oper("-", NUMERICOID, NUMERICOID, "numeric_uminus", "numeric_um");
        self.oper("^", FLOAT8OID, FLOAT8OID, FLOAT8OID, "dpow", "float_power");

        self.oper("+", DATEOID, INT4OID, DATEOID, "date_pli", "date_pli");
        self.oper("+", INT4OID, DATEOID, DATEOID, "integer_pl_date", "integer_pl_date");
        self.oper("-", DATEOID, INT4OID, DATEOID, "date_mii", "date_mii");
        self.oper("-", DATEOID, DATEOID, INT4OID, "date_mi", "date_mi");
    }

    fn misc_operators(&mut self) {
        self.oper("||", TEXTOID, TEXTOID, TEXTOID, "textcat", "textcat");
        self.oper("||", TEXTOID, ANYNONARRAYOID, TEXTOID, "textanycat", "textanycat");
        self.oper("||", ANYNONARRAYOID, TEXTOID, TEXTOID, "anytextcat", "anytextcat");
        self.oper("||", BYTEAOID, BYTEAOID, BYTEAOID, "byteacat", "byteacat");
        for (op, prosrc) in [
            ("~~", "text_like"),
            ("!~~", "text_not_like"),
            ("~~*", "text_ilike"),
            ("!~~*", "text_not_ilike"),
            ("~", "text_regex_match"),
            ("!~", "text_regex_not_match"),
            ("~*", "text_regex_imatch"),
            ("!~*", "text_regex_not_imatch"),
        ] {
            self.oper(op, TEXTOID, TEXTOID, BOOLOID, &format!("text{prosrc}"), prosrc);
            self.oper(op, BPCHAROID, TEXTOID, BOOLOID, &format!("bpchar{prosrc}"), prosrc);
            self.oper(op, NAMEOID, TEXTOID, BOOLOID, &format!("name{prosrc}"), prosrc);
        }

        let array_cat = self.func_with(
            "array_cat",
            &[ANYCOMPATIBLEARRAYOID, ANYCOMPATIBLEARRAYOID],
            ANYCOMPATIBLEARRAYOID,
            "array_cat",
            |p| p.strict = false,
        );
        let array_append = self.func_with(
            "array_append",
            &[ANYCOMPATIBLEARRAYOID, ANYCOMPATIBLEOID],
            ANYCOMPATIBLEARRAYOID,
            "array_append",
            |p| p.strict = false,
        );
        let array_prepend = self.func_with(
            "array_prepend",
            &[ANYCOMPATIBLEOID, ANYCOMPATIBLEARRAYOID],
            ANYCOMPATIBLEARRAYOID,
            "array_prepend",
            |p| p.strict = false,
        );
        for (left, right, code) in [
            (ANYCOMPATIBLEARRAYOID, ANYCOMPATIBLEARRAYOID, array_cat),
            (ANYCOMPATIBLEARRAYOID, ANYCOMPATIBLEOID, array_append),
            (ANYCOMPATIBLEOID, ANYCOMPATIBLEARRAYOID, array_prepend),
        ] {
            let oid = self.next_oid();
            self.operators.push(PgOperator {
                oid,
                name: "||".to_string(),
                namespace: PG_CATALOG_NAMESPACE,
                kind: OprKind::Binary,
                left,
                right,
                result: ANYCOMPATIBLEARRAYOID,
                code,
                commutator: INVALID_OID,
                negator: INVALID_OID,
            });
        }
        self.oper("@>", ANYARRAYOID, ANYARRAYOID, BOOLOID, "arraycontains", "array_contains");
        self.oper("<@", ANYARRAYOID, ANYARRAYOID, BOOLOID, "arraycontained", "array_contained");
        self.oper("&&", ANYARRAYOID, ANYARRAYOID, BOOLOID, "arrayoverlap", "array_overlap");

        for (typid, prefix) in [(JSONOID, "json"), (JSONBOID, "jsonb")] {
            self.oper("->", typid, TEXTOID, typid, &format!("{prefix}_object_field"), "json_object_field");
            self.oper("->>", typid, TEXTOID, TEXTOID, &format!("{prefix}_object_field_text"), "json_object_field_text");
            self.oper("->", typid, INT4OID, typid, &format!("{prefix}_array_element"), "json_array_element");
            self.oper("->>", typid, INT4OID, TEXTOID, &format!("{prefix}_array_element_text"), "json_array_element_text");
        }
        self.oper("@>", JSONBOID, JSONBOID, BOOLOID, "jsonb_contains", "jsonb_contains");
        self.oper("<@", JSONBOID, JSONBOID, BOOLOID, "jsonb_contained", "jsonb_contained");
        self.oper("?", JSONBOID, TEXTOID, BOOLOID, "jsonb_exists", "jsonb_exists");
        self.oper("@?", JSONBOID, JSONPATHOID, BOOLOID, "jsonb_path_exists_opr", "jsonb_path_exists");
        self.oper("@@", JSONBOID, JSONPATHOID, BOOLOID, "jsonb_path_match_opr", "jsonb_path_match");
    }

    /// Link commutators and negators by name and operand types, then install.
    fn finish_operators(&mut self) {
        let find = |ops: &[PgOperator], name: &str, left: Oid, right: Oid| {
            ops.iter()
                .find(|op| op.name == name && op.left == left && op.right == right)
                .map_or(INVALID_OID, |op| op.oid)
        };
        let links: Vec<(Oid, Oid)> = self
            .operators
            .iter()
            .map(|op| {
                let (commutator, negator) = match op.name.as_str() {
                    "=" => ("=", "<>"),
                    "<>" => ("<>", "="),
                    "<" => (">", ">="),
                    ">" => ("<", "<="),
                    "<=" => (">=", ">"),
                    ">=" => ("<=", "<"),
                    "*=" => ("*=", "*<>"),
                    "*<>" => ("*<>", "*="),
                    "+" | "*" if op.left == op.right => (op.name.as_str(), ""),
                    "~~" => ("", "!~~"),
                    "!~~" => ("", "~~"),
                    "~~*" => ("", "!~~*"),
                    "!~~*" => ("", "~~*"),
                    "~" => ("", "!~"),
                    "!~" => ("", "~"),
                    "~*" => ("", "!~*"),
                    "!~*" => ("", "~*"),
                    _ => ("", ""),
                };
                (
                    find(&self.operators, commutator, op.right, op.left),
                    find(&self.operators, negator, op.left, op.right),
                )
            })
            .collect();
        for (mut op, (commutator, negator)) in std::mem::take(&mut self.operators).into_iter().zip(links) {
            op.commutator = commutator;
            op.negator = negator;
            self.catalog.add_operator(op);
        }
    }

    // -- pg_cast ------------------------------------------------------------

    fn cast(&mut self, source: Oid, target: Oid, context: CoercionContext, method: CastMethod) {
        self.catalog.add_cast(PgCast {
            source,
            target,
            context,
            method,
        });
    }

    fn function_cast(&mut self, source: Oid, target: Oid, context: CoercionContext) {
        let name = self.type_name(target);
        let func = self.func(&name, &[source], target, "scalar_cast");
        self.cast(source, target, context, CastMethod::Function(func));
    }

    fn casts(&mut self) {
        use CoercionContext::{Assignment, Explicit, Implicit};

        for (source, target, context) in [
            (INT2OID, INT4OID, Implicit),
            (INT2OID, INT8OID, Implicit),
            (INT4OID, INT8OID, Implicit),
            (INT4OID, INT2OID, Assignment),
            (INT8OID, INT2OID, Assignment),
            (INT8OID, INT4OID, Assignment),
            (FLOAT4OID, FLOAT8OID, Implicit),
            (FLOAT8OID, FLOAT4OID, Assignment),
            (NUMERICOID, FLOAT4OID, Implicit),
            (NUMERICOID, FLOAT8OID, Implicit),
            (FLOAT4OID, NUMERICOID, Assignment),
            (FLOAT8OID, NUMERICOID, Assignment),
            (INT4OID, BOOLOID, Explicit),
            (BOOLOID, INT4OID, Explicit),
            (INT4OID, OIDOID, Implicit),
            (INT8OID, OIDOID, Implicit),
            (OIDOID, INT4OID, Assignment),
            (OIDOID, INT8OID, Implicit),
            (DATEOID, TIMESTAMPOID, Implicit),
            (DATEOID, TIMESTAMPTZOID, Implicit),
            (TIMESTAMPOID, TIMESTAMPTZOID, Implicit),
            (TIMESTAMPTZOID, TIMESTAMPOID, Assignment),
            (TIMESTAMPOID, DATEOID, Assignment),
            (TIMESTAMPTZOID, DATEOID, Assignment),
            (TEXTOID, BPCHAROID, Assignment),
            (VARCHAROID, BPCHAROID, Implicit),
            (BPCHAROID, TEXTOID, Implicit),
            (BPCHAROID, VARCHAROID, Implicit),
            (NAMEOID, BPCHAROID, Assignment),
            (BPCHAROID, NAMEOID, Implicit),
            (NAMEOID, VARCHAROID, Assignment),
            (VARCHAROID, NAMEOID, Implicit),
        ] {
            self.function_cast(source, target, context);
        }
        for int_type in INTEGER_TYPES {
            for target in [FLOAT4OID, FLOAT8OID, NUMERICOID] {
                self.function_cast(int_type, target, Implicit);
            }
        }
        for source in [FLOAT4OID, FLOAT8OID, NUMERICOID] {
            for target in INTEGER_TYPES {
                self.function_cast(source, target, Assignment);
            }
        }
        for target in [BOOLOID, NUMERICOID, INT2OID, INT4OID, INT8OID, FLOAT4OID, FLOAT8OID] {
            let name = self.type_name(target);
            let func = self.func(&name, &[JSONBOID], target, "jsonb_cast_scalar");
            self.cast(JSONBOID, target, Explicit, CastMethod::Function(func));
        }

        self.cast(TEXTOID, VARCHAROID, Implicit, CastMethod::Binary);
        self.cast(VARCHAROID, TEXTOID, Implicit, CastMethod::Binary);
        self.function_cast(TEXTOID, NAMEOID, Implicit);
        self.function_cast(NAMEOID, TEXTOID, Implicit);
        self.cast(JSONOID, JSONBOID, Assignment, CastMethod::InOut);
        self.cast(JSONBOID, JSONOID, Assignment, CastMethod::InOut);

        // Length coercions applied when a typmod is imposed.
        for (typid, prosrc) in [(VARCHAROID, "varchar_typmod"), (BPCHAROID, "bpchar_typmod")] {
            let name = self.type_name(typid);
            let func = self.func(&name, &[typid, INT4OID, BOOLOID], typid, prosrc);
            self.cast(typid, typid, Implicit, CastMethod::Function(func));
        }
        let func = self.func("numeric", &[NUMERICOID, INT4OID], NUMERICOID, "numeric_typmod");
        self.cast(NUMERICOID, NUMERICOID, Implicit, CastMethod::Function(func));
    }

    // -- ordinary functions -------------------------------------------------

    fn functions(&mut self) {
        self.math_functions();
        self.string_functions();
        self.array_functions();
        self.json_functions();
        self.misc_functions();
    }

    fn math_functions(&mut self) {
        for typid in INTEGER_TYPES {
            self.func("abs", &[typid], typid, "int_abs");
            self.func("mod", &[typid, typid], typid, "int_mod");
        }
        for typid in FLOAT_TYPES {
            self.func("abs", &[typid], typid, "float_abs");
        }
        self.func("abs", &[NUMERICOID], NUMERICOID, "numeric_abs");
        self.func("mod", &[NUMERICOID, NUMERICOID], NUMERICOID, "numeric_mod");
        for name in ["round", "trunc", "floor", "ceil", "ceiling"] {
            let base = if name == "ceiling" { "ceil" } else { name };
            self.func(name, &[FLOAT8OID], FLOAT8OID, &format!("float_{base}"));
            self.func(name, &[NUMERICOID], NUMERICOID, &format!("numeric_{base}"));
        }
        self.func("round", &[NUMERICOID, INT4OID], NUMERICOID, "numeric_round");
        self.func("trunc", &[NUMERICOID, INT4OID], NUMERICOID, "numeric_trunc");
        for name in ["power", "pow"] {
            self.func(name, &[FLOAT8OID, FLOAT8OID], FLOAT8OID, "float_power");
            self.func(name, &[NUMERICOID, NUMERICOID], NUMERICOID, "numeric_power");
        }
        self.func("sqrt", &[FLOAT8OID], FLOAT8OID, "float_sqrt");
        self.func("sqrt", &[NUMERICOID], NUMERICOID, "numeric_sqrt");
        self.func_with("random", &[], FLOAT8OID, "random", |p| {
            p.volatility = Volatility::Volatile;
        });
    }

    fn string_functions(&mut self) {
        for name in ["length", "char_length", "character_length"] {
            self.func(name, &[TEXTOID], INT4OID, "text_length");
        }
        self.func("length", &[BPCHAROID], INT4OID, "bpchar_length");
        self.func("length", &[BYTEAOID], INT4OID, "bytea_length");
        self.func("octet_length", &[TEXTOID], INT4OID, "text_octet_length");
        self.func("octet_length", &[BYTEAOID], INT4OID, "bytea_length");
        for name in ["lower", "upper", "initcap", "reverse", "md5"] {
            self.func(name, &[TEXTOID], TEXTOID, &format!("text_{name}"));
        }
        self.func("md5", &[BYTEAOID], TEXTOID, "bytea_md5");
        self.func("sha256", &[BYTEAOID], BYTEAOID, "bytea_sha256");
        self.func("encode", &[BYTEAOID, TEXTOID], TEXTOID, "binary_encode");
        self.func("decode", &[TEXTOID, TEXTOID], BYTEAOID, "binary_decode");
        for name in ["substr", "substring"] {
            self.func(name, &[TEXTOID, INT4OID], TEXTOID, "text_substr");
            self.func(name, &[TEXTOID, INT4OID, INT4OID], TEXTOID, "text_substr");
        }
        for name in ["btrim", "ltrim", "rtrim"] {
            self.func(name, &[TEXTOID], TEXTOID, &format!("text_{name}"));
            self.func(name, &[TEXTOID, TEXTOID], TEXTOID, &format!("text_{name}"));
        }
        self.func("replace", &[TEXTOID, TEXTOID, TEXTOID], TEXTOID, "text_replace");
        self.func("strpos", &[TEXTOID, TEXTOID], INT4OID, "text_strpos");
        self.func("left", &[TEXTOID, INT4OID], TEXTOID, "text_left");
        self.func("right", &[TEXTOID, INT4OID], TEXTOID, "text_right");
        self.func("repeat", &[TEXTOID, INT4OID], TEXTOID, "text_repeat");
        self.func("split_part", &[TEXTOID, TEXTOID, INT4OID], TEXTOID, "text_split_part");
        self.func("starts_with", &[TEXTOID, TEXTOID], BOOLOID, "text_starts_with");
        for name in ["lpad", "rpad"] {
            self.func(name, &[TEXTOID, INT4OID], TEXTOID, &format!("text_{name}"));
            self.func(name, &[TEXTOID, INT4OID, TEXTOID], TEXTOID, &format!("text_{name}"));
        }
        self.variadic_any("concat", &[], TEXTOID, "text_concat", false);
        self.variadic_any("concat_ws", &[TEXTOID], TEXTOID, "text_concat_ws", false);
        self.func("like", &[TEXTOID, TEXTOID], BOOLOID, "text_like");
        for args in [&[TEXTOID, TEXTOID][..], &[TEXTOID, TEXTOID, TEXTOID]] {
            self.func("regexp_like", args, BOOLOID, "text_regexp_like");
            self.func("regexp_match", args, TEXTARRAYOID, "text_regexp_match");
        }
        self.func("regexp_replace", &[TEXTOID, TEXTOID, TEXTOID], TEXTOID, "text_regexp_replace");
        self.func("regexp_replace", &[TEXTOID, TEXTOID, TEXTOID, TEXTOID], TEXTOID, "text_regexp_replace");
        self.func("string_to_array", &[TEXTOID, TEXTOID], TEXTARRAYOID, "string_to_array");
    }

    fn array_functions(&mut self) {
        self.func("array_length", &[ANYARRAYOID, INT4OID], INT4OID, "array_length");
        self.func("array_lower", &[ANYARRAYOID, INT4OID], INT4OID, "array_lower");
        self.func("array_upper", &[ANYARRAYOID, INT4OID], INT4OID, "array_upper");
        self.func("array_ndims", &[ANYARRAYOID], INT4OID, "array_ndims");
        self.func("cardinality", &[ANYARRAYOID], INT4OID, "array_cardinality");
        self.func("array_to_string", &[ANYARRAYOID, TEXTOID], TEXTOID, "array_to_string");
        self.func_with(
            "array_to_string",
            &[ANYARRAYOID, TEXTOID, TEXTOID],
            TEXTOID,
            "array_to_string",
            |p| p.strict = false,
        );
        self.srf("unnest", &[ANYARRAYOID], ANYELEMENTOID, "array_unnest");
        for typid in [INT4OID, INT8OID] {
            self.srf("generate_series", &[typid, typid], typid, "generate_series");
            self.srf("generate_series", &[typid, typid, typid], typid, "generate_series");
        }
        self.srf(
            "generate_series",
            &[NUMERICOID, NUMERICOID],
            NUMERICOID,
            "generate_series",
        );
        self.srf(
            "generate_series",
            &[NUMERICOID, NUMERICOID, NUMERICOID],
            NUMERICOID,
            "generate_series",
        );
    }

    fn json_functions(&mut self) {
        self.func_with("to_json", &[ANYELEMENTOID], JSONOID, "to_json", |p| {
            p.volatility = Volatility::Stable;
        });
        self.func_with("to_jsonb", &[ANYELEMENTOID], JSONBOID, "to_jsonb", |p| {
            p.volatility = Volatility::Stable;
        });
        self.variadic_any("json_build_object", &[], JSONOID, "json_build_object", false);
        self.variadic_any("jsonb_build_object", &[], JSONBOID, "jsonb_build_object", false);
        self.variadic_any("json_build_array", &[], JSONOID, "json_build_array", false);
        self.variadic_any("jsonb_build_array", &[], JSONBOID, "jsonb_build_array", false);
        for (typid, prefix) in [(JSONOID, "json"), (JSONBOID, "jsonb")] {
            self.func(&format!("{prefix}_typeof"), &[typid], TEXTOID, "json_typeof");
            self.func(&format!("{prefix}_array_length"), &[typid], INT4OID, "json_array_length");
            self.srf(&format!("{prefix}_array_elements"), &[typid], typid, "json_array_elements");
            self.srf(
                &format!("{prefix}_array_elements_text"),
                &[typid],
                TEXTOID,
                "json_array_elements_text",
            );
            self.srf(&format!("{prefix}_object_keys"), &[typid], TEXTOID, "json_object_keys");
            self.func(&format!("{prefix}_strip_nulls"), &[typid], typid, "json_strip_nulls");
        }
        self.func("jsonb_pretty", &[JSONBOID], TEXTOID, "jsonb_pretty");

        let path_args = [JSONBOID, JSONPATHOID, JSONBOID, BOOLOID];
        let path_names = ["target", "path", "vars", "silent"];
        let path_defaults = vec![
            make_const(JSONBOID, Datum::Jsonb(JsonValue::Object(Map::new()))),
            make_const(BOOLOID, Datum::Bool(false)),
        ];
        for (name, ret, retset) in [
            ("jsonb_path_exists", BOOLOID, false),
            ("jsonb_path_match", BOOLOID, false),
            ("jsonb_path_query", JSONBOID, true),
            ("jsonb_path_query_array", JSONBOID, false),
            ("jsonb_path_query_first", JSONBOID, false),
        ] {
            let defaults = path_defaults.clone();
            self.func_with(name, &path_args, ret, name, |p| {
                p.argnames = path_names.iter().map(|n| (*n).to_string()).collect();
                p.defaults = defaults;
                p.retset = retset;
            });
        }
    }

    fn misc_functions(&mut self) {
        self.func_with("pg_typeof", &[ANYOID], TEXTOID, "pg_typeof", |p| {
            p.strict = false;
            p.volatility = Volatility::Stable;
        });
        self.variadic_any("num_nulls", &[], INT4OID, "num_nulls", false);
        self.variadic_any("num_nonnulls", &[], INT4OID, "num_nonnulls", false);
        self.func_with("now", &[], TIMESTAMPTZOID, "now", |p| {
            p.volatility = Volatility::Stable;
        });
        self.func_with("current_setting", &[TEXTOID], TEXTOID, "current_setting", |p| {
            p.volatility = Volatility::Stable;
        });
        self.func_with("current_database", &[], NAMEOID, "current_database", |p| {
            p.volatility = Volatility::Stable;
        });
        self.func("version", &[], TEXTOID, "version");
    }

    // -- aggregates and window functions ------------------------------------

    fn aggregate(&mut self, name: &str, args: &[Oid], ret: Oid, implementation: &str, transtype: Oid) -> Oid {
        self.ordered_aggregate(name, args, ret, implementation, transtype, AggKind::Normal, 0)
    }

    fn ordered_aggregate(
        &mut self,
        name: &str,
        args: &[Oid],
        ret: Oid,
        implementation: &str,
        transtype: Oid,
        kind: AggKind,
        num_direct_args: usize,
    ) -> Oid {
        self.func_with(name, args, ret, "aggregate_dummy", |p| {
            p.kind = ProKind::Aggregate;
            p.strict = false;
            p.aggregate = Some(PgAggregate {
                kind,
                num_direct_args,
                implementation: implementation.to_string(),
                transtype,
            });
        })
    }

    fn aggregates(&mut self) {
        self.aggregate("count", &[], INT8OID, "count_star", INT8OID);
        self.aggregate("count", &[ANYOID], INT8OID, "count_any", INT8OID);

        self.aggregate("sum", &[INT2OID], INT8OID, "sum_int", INT8OID);
        self.aggregate("sum", &[INT4OID], INT8OID, "sum_int", INT8OID);
        self.aggregate("sum", &[INT8OID], NUMERICOID, "sum_numeric", INTERNALOID);
        self.aggregate("sum", &[FLOAT4OID], FLOAT4OID, "sum_float", FLOAT8OID);
        self.aggregate("sum", &[FLOAT8OID], FLOAT8OID, "sum_float", FLOAT8OID);
        self.aggregate("sum", &[NUMERICOID], NUMERICOID, "sum_numeric", INTERNALOID);
        for typid in INTEGER_TYPES {
            self.aggregate("avg", &[typid], NUMERICOID, "avg_numeric", INTERNALOID);
        }
        for typid in FLOAT_TYPES {
            self.aggregate("avg", &[typid], FLOAT8OID, "avg_float", INTERNALOID);
        }
        self.aggregate("avg", &[NUMERICOID], NUMERICOID, "avg_numeric", INTERNALOID);

        for typid in NUMBER_TYPES.into_iter().chain([
            TEXTOID,
            BPCHAROID,
            DATEOID,
            TIMESTAMPOID,
            TIMESTAMPTZOID,
            OIDOID,
            TIDOID,
            ANYARRAYOID,
        ]) {
            self.aggregate("min", &[typid], typid, "min", typid);
            self.aggregate("max", &[typid], typid, "max", typid);
        }
        self.aggregate("bool_and", &[BOOLOID], BOOLOID, "bool_and", BOOLOID);
        self.aggregate("every", &[BOOLOID], BOOLOID, "bool_and", BOOLOID);
        self.aggregate("bool_or", &[BOOLOID], BOOLOID, "bool_or", BOOLOID);
        self.aggregate("array_agg", &[ANYNONARRAYOID], ANYARRAYOID, "array_agg", INTERNALOID);
        self.aggregate("array_agg", &[ANYARRAYOID], ANYARRAYOID, "array_agg_array", INTERNALOID);
        self.aggregate("string_agg", &[TEXTOID, TEXTOID], TEXTOID, "string_agg", INTERNALOID);
        self.aggregate("json_agg", &[ANYELEMENTOID], JSONOID, "json_agg", INTERNALOID);
        self.aggregate("jsonb_agg", &[ANYELEMENTOID], JSONBOID, "jsonb_agg", INTERNALOID);
        self.aggregate("jsonb_object_agg", &[ANYOID, ANYOID], JSONBOID, "jsonb_object_agg", INTERNALOID);

        self.ordered_aggregate(
            "percentile_disc",
            &[FLOAT8OID, ANYELEMENTOID],
            ANYELEMENTOID,
            "percentile_disc",
            INTERNALOID,
            AggKind::OrderedSet,
            1,
        );
        self.ordered_aggregate(
            "percentile_cont",
            &[FLOAT8OID, FLOAT8OID],
            FLOAT8OID,
            "percentile_cont",
            INTERNALOID,
            AggKind::OrderedSet,
            1,
        );
        self.ordered_aggregate(
            "mode",
            &[ANYELEMENTOID],
            ANYELEMENTOID,
            "mode",
            INTERNALOID,
            AggKind::OrderedSet,
            0,
        );
        for (name, ret) in [
            ("rank", INT8OID),
            ("dense_rank", INT8OID),
            ("percent_rank", FLOAT8OID),
            ("cume_dist", FLOAT8OID),
        ] {
            self.func_with(name, &[ANYOID], ret, "aggregate_dummy", |p| {
                p.kind = ProKind::Aggregate;
                p.strict = false;
                p.variadic = ANYOID;
                p.aggregate = Some(PgAggregate {
                    kind: AggKind::Hypothetical,
                    num_direct_args: 1,
                    implementation: format!("hypothetical_{name}"),
                    transtype: INTERNALOID,
                });
            });
        }
    }

    fn window(&mut self, name: &str, args: &[Oid], ret: Oid) -> Oid {
        self.func_with(name, args, ret, name, |p| {
            p.kind = ProKind::Window;
            p.strict = false;
        })
    }

    fn window_functions(&mut self) {
        self.window("row_number", &[], INT8OID);
        self.window("rank", &[], INT8OID);
        self.window("dense_rank", &[], INT8OID);
        self.window("percent_rank", &[], FLOAT8OID);
        self.window("cume_dist", &[], FLOAT8OID);
        self.window("ntile", &[INT4OID], INT4OID);
        for name in ["lag", "lead"] {
            self.window(name, &[ANYELEMENTOID], ANYELEMENTOID);
            self.window(name, &[ANYELEMENTOID, INT4OID], ANYELEMENTOID);
            self.window(
                name,
                &[ANYCOMPATIBLEOID, INT4OID, ANYCOMPATIBLEOID],
                ANYCOMPATIBLEOID,
            );
        }
        self.window("first_value", &[ANYELEMENTOID], ANYELEMENTOID);
        self.window("last_value", &[ANYELEMENTOID], ANYELEMENTOID);
        self.window("nth_value", &[ANYELEMENTOID, INT4OID], ANYELEMENTOID);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogOracle;

    #[test]
    fn comparison_operators_are_linked() {
        let catalog = Catalog::default();
        let lt = catalog
            .operator_by_name_types("<", INT4OID, INT8OID)
            .expect("cross-type int comparison");
        let gt = catalog.operator_by_id(lt.commutator).expect("commutator");
        assert_eq!((gt.name.as_str(), gt.left, gt.right), (">", INT8OID, INT4OID));
        let ge = catalog.operator_by_id(lt.negator).expect("negator");
        assert_eq!(ge.name, ">=");
    }

    #[test]
    fn every_internal_function_has_a_builtin() {
        let catalog = Catalog::default();
        for proc in catalog.procs.values() {
            if proc.kind == ProKind::Function {
                assert!(
                    crate::utils::fmgr::lookup_builtin(&proc.prosrc).is_some(),
                    "no builtin for {} ({})",
                    proc.name,
                    proc.prosrc
                );
            }
        }
    }

    #[test]
    fn function_signatures_are_unique() {
        let catalog = Catalog::default();
        let mut seen = std::collections::HashSet::new();
        for proc in catalog.procs.values() {
            assert!(
                seen.insert((proc.namespace, proc.name.clone(), proc.argtypes.clone())),
                "{}({:?}) is registered twice",
                proc.name,
                proc.argtypes
            );
        }
        // the `||` implementation stays callable by name
        assert!(catalog.proc_by_signature("textcat", &[TEXTOID, TEXTOID]).is_some());
    }

    #[test]
    fn casts_cover_numeric_promotion() {
        let catalog = Catalog::default();
        let cast = catalog.cast_between(INT4OID, NUMERICOID).expect("int4 -> numeric");
        assert_eq!(cast.context, CoercionContext::Implicit);
        let cast = catalog.cast_between(TEXTOID, VARCHAROID).expect("text -> varchar");
        assert_eq!(cast.method, CastMethod::Binary);
    }
}
