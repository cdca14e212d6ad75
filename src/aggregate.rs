use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::{
    DbIterator, Field, FieldType, Result, StorageError, Tuple, TupleDesc, TupleIterator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    Min,
    Max,
    Sum,
    Avg,
    Count,
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregateOp::Min => "MIN",
            AggregateOp::Max => "MAX",
            AggregateOp::Sum => "SUM",
            AggregateOp::Avg => "AVG",
            AggregateOp::Count => "COUNT",
        };
        f.write_str(name)
    }
}

/// Running state for one group. Every op is answerable from it, so merging never
/// depends on which op was asked for.
#[derive(Debug, Clone, Copy)]
struct Accumulator {
    count: i64,
    sum: i64,
    min: i32,
    max: i32,
}

impl Accumulator {
    fn new(value: i32) -> Self {
        Self {
            count: 1,
            sum: i64::from(value),
            min: value,
            max: value,
        }
    }

    fn merge(&mut self, value: i32) {
        self.count += 1;
        self.sum += i64::from(value);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Results saturate at the INT range
    fn finish(&self, op: AggregateOp) -> i32 {
        let wide = match op {
            AggregateOp::Min => return self.min,
            AggregateOp::Max => return self.max,
            AggregateOp::Sum => self.sum,
            AggregateOp::Avg => self.sum / self.count,
            AggregateOp::Count => self.count,
        };
        wide.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
    }
}

/// Group-by bookkeeping shared by both aggregators. Groups are kept ordered by
/// their value; `None` is the single group of an ungrouped aggregate.
#[derive(Debug)]
struct Groups {
    group_by: Option<(usize, FieldType)>,
    agg_field: usize,
    accumulators: BTreeMap<Option<Field>, Accumulator>,
}

impl Groups {
    fn new(group_by: Option<(usize, FieldType)>, agg_field: usize) -> Self {
        Self {
            group_by,
            agg_field,
            accumulators: BTreeMap::new(),
        }
    }

    fn key(&self, tuple: &Tuple) -> Result<Option<Field>> {
        let Some((index, field_type)) = self.group_by else {
            return Ok(None);
        };
        if tuple.desc().field_type(index) != Some(field_type) {
            return Err(StorageError::SchemaMismatch(format!(
                "group-by field {index} of ({}) is not {field_type}",
                tuple.desc()
            )));
        }
        Ok(tuple.field(index).cloned())
    }

    /// The aggregate field of `tuple`, provided its type passes `accepts`
    fn aggregated<'t>(
        &self,
        tuple: &'t Tuple,
        expected: &str,
        accepts: impl Fn(FieldType) -> bool,
    ) -> Result<&'t Field> {
        match tuple.desc().field_type(self.agg_field) {
            Some(field_type) if accepts(field_type) => {}
            _ => {
                return Err(StorageError::SchemaMismatch(format!(
                    "aggregate field {} of ({}) is not {expected}",
                    self.agg_field,
                    tuple.desc()
                )))
            }
        }
        tuple.field(self.agg_field).ok_or_else(|| {
            StorageError::SchemaMismatch(format!("tuple has no field {}", self.agg_field))
        })
    }

    fn merge(&mut self, key: Option<Field>, value: i32) {
        self.accumulators
            .entry(key)
            .and_modify(|acc| acc.merge(value))
            .or_insert_with(|| Accumulator::new(value));
    }

    fn desc(&self) -> Arc<TupleDesc> {
        let types = match self.group_by {
            Some((_, group_type)) => vec![group_type, FieldType::Int],
            None => vec![FieldType::Int],
        };
        Arc::new(TupleDesc::from_types(&types))
    }

    fn results(&self, op: AggregateOp) -> Result<TupleIterator> {
        let desc = self.desc();
        let tuples = self
            .accumulators
            .iter()
            .map(|(key, acc)| {
                let value = Field::Int(acc.finish(op));
                let fields = match key {
                    Some(group) => vec![group.clone(), value],
                    None => vec![value],
                };
                Tuple::new(Arc::clone(&desc), fields)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(TupleIterator::new(desc, tuples))
    }
}

/// MIN/MAX/SUM/AVG/COUNT over an INT field, optionally grouped by another field
#[derive(Debug)]
pub struct IntegerAggregator {
    groups: Groups,
    op: AggregateOp,
}

impl IntegerAggregator {
    pub fn new(group_by: Option<(usize, FieldType)>, agg_field: usize, op: AggregateOp) -> Self {
        Self {
            groups: Groups::new(group_by, agg_field),
            op,
        }
    }

    pub fn merge_tuple(&mut self, tuple: &Tuple) -> Result<()> {
        let key = self.groups.key(tuple)?;
        let value = self
            .groups
            .aggregated(tuple, "INT", |field_type| field_type == FieldType::Int)?
            .as_int()
            .ok_or_else(|| StorageError::SchemaMismatch("aggregate field is not an INT".into()))?;
        self.groups.merge(key, value);
        Ok(())
    }

    /// Fold every remaining tuple of an opened iterator
    pub fn merge_all<I: DbIterator>(&mut self, input: &mut I) -> Result<()> {
        while input.has_next()? {
            self.merge_tuple(&input.next()?)?;
        }
        Ok(())
    }

    /// `(group, value)` tuples ordered by group, or a single `(value)` when
    /// ungrouped. Nothing merged means no tuples.
    pub fn results(&self) -> Result<TupleIterator> {
        self.groups.results(self.op)
    }
}

/// COUNT over a string field; no other op is defined for strings
#[derive(Debug)]
pub struct StringAggregator {
    groups: Groups,
}

impl StringAggregator {
    pub fn new(group_by: Option<(usize, FieldType)>, agg_field: usize, op: AggregateOp) -> Result<Self> {
        if op != AggregateOp::Count {
            return Err(StorageError::UnsupportedAggregate(format!(
                "{op} over a string field"
            )));
        }
        Ok(Self {
            groups: Groups::new(group_by, agg_field),
        })
    }

    pub fn merge_tuple(&mut self, tuple: &Tuple) -> Result<()> {
        let key = self.groups.key(tuple)?;
        //  any string width counts
        match self.groups.aggregated(tuple, "a string", |field_type| {
            matches!(field_type, FieldType::Str(_))
        })? {
            Field::Str(_) => {}
            Field::Int(_) => {
                return Err(StorageError::SchemaMismatch(
                    "aggregate field is not a string".into(),
                ))
            }
        }
        //  only the count is ever read back
        self.groups.merge(key, 0);
        Ok(())
    }

    pub fn merge_all<I: DbIterator>(&mut self, input: &mut I) -> Result<()> {
        while input.has_next()? {
            self.merge_tuple(&input.next()?)?;
        }
        Ok(())
    }

    pub fn results(&self) -> Result<TupleIterator> {
        self.groups.results(AggregateOp::Count)
    }
}
