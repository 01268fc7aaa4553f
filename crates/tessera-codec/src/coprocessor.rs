//! Predicate descriptors pushed down to the storage layer.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tessera_types::{KeyValue, Value};

use crate::error::Result;
use crate::ordered::KeyValueCodec;

/// A row filter over column positions.
///
/// Comparisons involving NULL or values of incomparable types evaluate
/// to false. Positions past the end of the row read as NULL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Eq(usize, Value),
    Ne(usize, Value),
    Lt(usize, Value),
    Le(usize, Value),
    Gt(usize, Value),
    Ge(usize, Value),
    IsNull(usize),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn evaluate(&self, row: &[Value]) -> bool {
        match self {
            Predicate::Eq(c, v) => compare(row, *c, v).is_some_and(Ordering::is_eq),
            Predicate::Ne(c, v) => compare(row, *c, v).is_some_and(Ordering::is_ne),
            Predicate::Lt(c, v) => compare(row, *c, v).is_some_and(Ordering::is_lt),
            Predicate::Le(c, v) => compare(row, *c, v).is_some_and(Ordering::is_le),
            Predicate::Gt(c, v) => compare(row, *c, v).is_some_and(Ordering::is_gt),
            Predicate::Ge(c, v) => compare(row, *c, v).is_some_and(Ordering::is_ge),
            Predicate::IsNull(c) => row.get(*c).is_none_or(Value::is_null),
            Predicate::And(ps) => ps.iter().all(|p| p.evaluate(row)),
            Predicate::Or(ps) => ps.iter().any(|p| p.evaluate(row)),
            Predicate::Not(p) => !p.evaluate(row),
        }
    }

    #[must_use]
    pub fn and(self, other: Predicate) -> Predicate {
        match self {
            Predicate::And(mut ps) => {
                ps.push(other);
                Predicate::And(ps)
            }
            this => Predicate::And(vec![this, other]),
        }
    }

    #[must_use]
    pub fn negate(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }
}

fn compare(row: &[Value], column: usize, literal: &Value) -> Option<Ordering> {
    let value = row.get(column)?;
    if value.is_null() || literal.is_null() {
        return None;
    }
    value.compare(literal)
}

/// Scan-side work descriptor: decode each row with `codec`, keep the rows
/// matching `filter`, stop after `limit` matches.
#[derive(Debug, Clone)]
pub struct Coprocessor {
    pub codec: Arc<dyn KeyValueCodec>,
    pub filter: Predicate,
    pub limit: Option<usize>,
}

impl Coprocessor {
    pub fn new(codec: Arc<dyn KeyValueCodec>, filter: Predicate) -> Self {
        Self {
            codec,
            filter,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Decodes `kv` and evaluates the filter against it.
    pub fn matches(&self, kv: &KeyValue) -> Result<bool> {
        let row = self.codec.decode(kv)?;
        Ok(self.filter.evaluate(&row))
    }
}
