use serde::Deserialize;

use crate::core::{FeatureRecord, FeatureSchema, FlowFlag, Protocol};

/// A predicate as described in the rule file, before validation.
///
/// Composition nodes are externally tagged (`all:`, `any:`, `not:`); a bare
/// mapping with `field`/`op`/`value` is a leaf comparison.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateSpec {
    All(Vec<PredicateSpec>),
    Any(Vec<PredicateSpec>),
    Not(Box<PredicateSpec>),
    #[serde(untagged)]
    Compare {
        field: String,
        op: String,
        value: serde_yaml::Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl NumOp {
    fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            NumOp::Gt => lhs > rhs,
            NumOp::Ge => lhs >= rhs,
            NumOp::Lt => lhs < rhs,
            NumOp::Le => lhs <= rhs,
            NumOp::Eq => lhs == rhs,
            NumOp::Ne => lhs != rhs,
        }
    }
}

/// A validated predicate with feature names resolved to vector indices.
///
/// Evaluation is pure; records are length-checked against the schema before
/// any predicate runs, so indexing here cannot go out of bounds.
#[derive(Debug, Clone)]
pub enum Predicate {
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Not(Box<Predicate>),
    NumCmp { index: usize, op: NumOp, value: f64 },
    NumIn { index: usize, values: Vec<f64> },
    ProtocolEq { protocol: Protocol, negate: bool },
    ProtocolIn { protocols: Vec<Protocol> },
    HasFlag { flag: FlowFlag },
}

impl Predicate {
    /// Compile a spec against the schema. Errors are plain strings; the rule
    /// loader wraps them with the offending rule id.
    pub fn compile(spec: &PredicateSpec, schema: &FeatureSchema) -> Result<Self, String> {
        match spec {
            PredicateSpec::All(children) => {
                if children.is_empty() {
                    return Err("'all' requires at least one child predicate".into());
                }
                let compiled = children
                    .iter()
                    .map(|c| Predicate::compile(c, schema))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Predicate::All(compiled))
            }
            PredicateSpec::Any(children) => {
                if children.is_empty() {
                    return Err("'any' requires at least one child predicate".into());
                }
                let compiled = children
                    .iter()
                    .map(|c| Predicate::compile(c, schema))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Predicate::Any(compiled))
            }
            PredicateSpec::Not(child) => {
                Ok(Predicate::Not(Box::new(Predicate::compile(child, schema)?)))
            }
            PredicateSpec::Compare { field, op, value } => {
                compile_compare(field, op, value, schema)
            }
        }
    }

    pub fn eval(&self, record: &FeatureRecord) -> bool {
        match self {
            Predicate::All(children) => children.iter().all(|c| c.eval(record)),
            Predicate::Any(children) => children.iter().any(|c| c.eval(record)),
            Predicate::Not(child) => !child.eval(record),
            Predicate::NumCmp { index, op, value } => op.apply(record.values[*index], *value),
            Predicate::NumIn { index, values } => {
                let v = record.values[*index];
                values.iter().any(|x| *x == v)
            }
            Predicate::ProtocolEq { protocol, negate } => {
                (record.protocol == *protocol) != *negate
            }
            Predicate::ProtocolIn { protocols } => protocols.contains(&record.protocol),
            Predicate::HasFlag { flag } => record.has_flag(*flag),
        }
    }
}

fn compile_compare(
    field: &str,
    op: &str,
    value: &serde_yaml::Value,
    schema: &FeatureSchema,
) -> Result<Predicate, String> {
    match field {
        "protocol" => compile_protocol(op, value),
        "flags" => compile_flags(op, value),
        _ => compile_numeric(field, op, value, schema),
    }
}

fn compile_numeric(
    field: &str,
    op: &str,
    value: &serde_yaml::Value,
    schema: &FeatureSchema,
) -> Result<Predicate, String> {
    let index = schema
        .index_of(field)
        .ok_or_else(|| format!("unknown feature field {field:?}"))?;

    if op == "in" {
        let values = as_number_list(value)
            .ok_or_else(|| format!("'in' on field {field:?} requires a list of numbers"))?;
        return Ok(Predicate::NumIn { index, values });
    }

    let num_op = match op {
        "gt" => NumOp::Gt,
        "ge" => NumOp::Ge,
        "lt" => NumOp::Lt,
        "le" => NumOp::Le,
        "eq" => NumOp::Eq,
        "ne" => NumOp::Ne,
        _ => return Err(format!("unknown operator {op:?} on field {field:?}")),
    };
    let value = as_number(value)
        .ok_or_else(|| format!("operator {op:?} on field {field:?} requires a number"))?;
    if !value.is_finite() {
        return Err(format!("comparison value on field {field:?} must be finite"));
    }
    Ok(Predicate::NumCmp { index, op: num_op, value })
}

fn compile_protocol(op: &str, value: &serde_yaml::Value) -> Result<Predicate, String> {
    match op {
        "eq" | "ne" => {
            let s = value
                .as_str()
                .ok_or_else(|| format!("operator {op:?} on 'protocol' requires a string"))?;
            let protocol: Protocol = s.parse()?;
            Ok(Predicate::ProtocolEq { protocol, negate: op == "ne" })
        }
        "in" => {
            let seq = value
                .as_sequence()
                .ok_or("'in' on 'protocol' requires a list of strings")?;
            let protocols = seq
                .iter()
                .map(|v| {
                    v.as_str()
                        .ok_or_else(|| "'in' on 'protocol' requires a list of strings".to_string())
                        .and_then(|s| s.parse::<Protocol>())
                })
                .collect::<Result<Vec<_>, _>>()?;
            if protocols.is_empty() {
                return Err("'in' on 'protocol' requires a non-empty list".into());
            }
            Ok(Predicate::ProtocolIn { protocols })
        }
        _ => Err(format!("unknown operator {op:?} on 'protocol'")),
    }
}

fn compile_flags(op: &str, value: &serde_yaml::Value) -> Result<Predicate, String> {
    if op != "contains" {
        return Err(format!("unknown operator {op:?} on 'flags' (only 'contains')"));
    }
    let s = value
        .as_str()
        .ok_or("'contains' on 'flags' requires a flag name")?;
    let flag: FlowFlag = s.parse()?;
    Ok(Predicate::HasFlag { flag })
}

fn as_number(value: &serde_yaml::Value) -> Option<f64> {
    value.as_f64().or_else(|| value.as_i64().map(|i| i as f64))
}

fn as_number_list(value: &serde_yaml::Value) -> Option<Vec<f64>> {
    let seq = value.as_sequence()?;
    let values: Option<Vec<f64>> = seq.iter().map(as_number).collect();
    values.filter(|v| !v.is_empty())
}
