// Copyright 2025 The Brainy Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Inverted index over entity metadata with an operator grammar.
//!
//! Postings are kept per field in a sorted map so range operators scan a
//! contiguous key range. Updates are symmetric: the removal set is derived
//! from the postings recorded at insertion time, so repeated updates can
//! never accumulate stale postings for an entity.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::ops::Bound;

use serde_json::Value;
use uuid::Uuid;

use crate::backend::BackendError;
use crate::backend::BackendResult;
use crate::entity::Metadata;
use crate::entity::Noun;

/// Scalar value a field posting is keyed by. Ordered so numeric and string
/// range queries scan sorted postings.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl FieldValue {
    /// Converts a scalar JSON value. Objects are not indexable; array
    /// elements are indexed individually by the caller.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n.as_f64().map(Self::Number),
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Number(_) => 2,
            Self::String(_) => 3,
        }
    }
}

// JSON numbers are never NaN, so total_cmp gives a genuine total order.
impl Eq for FieldValue {}

impl Ord for FieldValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for FieldValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub struct FieldIndex {
    postings: HashMap<String, BTreeMap<FieldValue, BTreeSet<Uuid>>>,
    /// Exact postings inserted per entity; the removal set on update.
    by_entity: HashMap<Uuid, Vec<(String, FieldValue)>>,
    entities: HashSet<Uuid>,
}

/// Flattens a noun into its indexable `(field, value)` pairs: every scalar
/// metadata field (arrays element-wise), plus top-level `type`, `confidence`,
/// and `weight`.
fn indexable_fields(noun: &Noun) -> Vec<(String, FieldValue)> {
    let mut fields = vec![(
        "type".to_string(),
        FieldValue::String(noun.noun_type.as_str().to_string()),
    )];
    if let Some(confidence) = noun.confidence {
        fields.push(("confidence".to_string(), FieldValue::Number(confidence)));
    }
    if let Some(weight) = noun.weight {
        fields.push(("weight".to_string(), FieldValue::Number(weight)));
    }
    fields.extend(metadata_fields(&noun.metadata));
    fields
}

fn metadata_fields(metadata: &Metadata) -> Vec<(String, FieldValue)> {
    let mut fields = vec![];
    for (key, value) in metadata {
        match value {
            Value::Array(elements) => {
                for element in elements {
                    if let Some(value) = FieldValue::from_json(element) {
                        fields.push((key.clone(), value));
                    }
                }
            }
            value => {
                if let Some(value) = FieldValue::from_json(value) {
                    fields.push((key.clone(), value));
                }
            }
        }
    }
    fields
}

impl FieldIndex {
    pub fn insert(&mut self, noun: &Noun) {
        self.remove(&noun.id);
        let fields = indexable_fields(noun);
        for (field, value) in &fields {
            self.postings
                .entry(field.clone())
                .or_default()
                .entry(value.clone())
                .or_default()
                .insert(noun.id);
        }
        self.by_entity.insert(noun.id, fields);
        self.entities.insert(noun.id);
    }

    pub fn remove(&mut self, id: &Uuid) {
        let Some(fields) = self.by_entity.remove(id) else {
            return;
        };
        for (field, value) in fields {
            let Some(by_value) = self.postings.get_mut(&field) else {
                continue;
            };
            if let Some(ids) = by_value.get_mut(&value) {
                ids.remove(id);
                if ids.is_empty() {
                    by_value.remove(&value);
                }
            }
            if by_value.is_empty() {
                self.postings.remove(&field);
            }
        }
        self.entities.remove(id);
    }

    pub fn clear(&mut self) {
        self.postings.clear();
        self.by_entity.clear();
        self.entities.clear();
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.entities.contains(id)
    }

    /// Number of postings an entity currently holds in `field`. At most one
    /// per distinct value; used to assert update symmetry.
    pub fn posting_count(&self, id: &Uuid, field: &str) -> usize {
        self.postings
            .get(field)
            .map(|by_value| by_value.values().filter(|ids| ids.contains(id)).count())
            .unwrap_or(0)
    }

    /// Evaluates a `where` clause to the matching entity set.
    ///
    /// Grammar: `{field: scalar}` (equality), `{field: {"$op": operand}}`,
    /// `{"$and": [...]}`, `{"$or": [...]}`. Multiple keys in one object are
    /// an implicit AND.
    pub fn eval(&self, clause: &Value) -> BackendResult<BTreeSet<Uuid>> {
        let Value::Object(clause) = clause else {
            return Err(BackendError::InvalidArgument(
                "where clause must be an object".to_string(),
            ));
        };
        let mut result: Option<BTreeSet<Uuid>> = None;
        for (key, operand) in clause {
            let matched = match key.as_str() {
                "$and" => self.eval_junction(operand, true)?,
                "$or" => self.eval_junction(operand, false)?,
                field => self.eval_field(field, operand)?,
            };
            result = Some(match result {
                None => matched,
                Some(acc) => acc.intersection(&matched).copied().collect(),
            });
        }
        Ok(result.unwrap_or_else(|| self.entities.iter().copied().collect()))
    }

    fn eval_junction(&self, operand: &Value, conjunctive: bool) -> BackendResult<BTreeSet<Uuid>> {
        let Value::Array(clauses) = operand else {
            return Err(BackendError::InvalidArgument(
                "$and / $or expect an array of clauses".to_string(),
            ));
        };
        let mut result: Option<BTreeSet<Uuid>> = None;
        for clause in clauses {
            let matched = self.eval(clause)?;
            result = Some(match result {
                None => matched,
                Some(acc) if conjunctive => acc.intersection(&matched).copied().collect(),
                Some(acc) => acc.union(&matched).copied().collect(),
            });
        }
        Ok(result.unwrap_or_default())
    }

    fn eval_field(&self, field: &str, operand: &Value) -> BackendResult<BTreeSet<Uuid>> {
        match operand {
            Value::Object(ops) => {
                let mut result: Option<BTreeSet<Uuid>> = None;
                for (op, operand) in ops {
                    let matched = self.eval_op(field, op, operand)?;
                    result = Some(match result {
                        None => matched,
                        Some(acc) => acc.intersection(&matched).copied().collect(),
                    });
                }
                Ok(result.unwrap_or_default())
            }
            scalar => self.eval_op(field, "$eq", scalar),
        }
    }

    fn scalar_operand(op: &str, operand: &Value) -> BackendResult<FieldValue> {
        FieldValue::from_json(operand).ok_or_else(|| {
            BackendError::InvalidArgument(format!("{op} expects a scalar operand"))
        })
    }

    fn eval_op(&self, field: &str, op: &str, operand: &Value) -> BackendResult<BTreeSet<Uuid>> {
        let by_value = self.postings.get(field);
        let eq = |value: &FieldValue| -> BTreeSet<Uuid> {
            by_value
                .and_then(|by_value| by_value.get(value))
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default()
        };
        let range = |lower: Bound<FieldValue>, upper: Bound<FieldValue>| -> BTreeSet<Uuid> {
            by_value
                .map(|by_value| {
                    by_value
                        .range((lower, upper))
                        .flat_map(|(_, ids)| ids.iter().copied())
                        .collect()
                })
                .unwrap_or_default()
        };
        match op {
            "$eq" => Ok(eq(&Self::scalar_operand(op, operand)?)),
            "$ne" => {
                let matched = eq(&Self::scalar_operand(op, operand)?);
                Ok(self
                    .entities
                    .iter()
                    .filter(|id| !matched.contains(id))
                    .copied()
                    .collect())
            }
            "$gt" => {
                let value = Self::scalar_operand(op, operand)?;
                Ok(range(Bound::Excluded(value.clone()), upper_bound_of(&value)))
            }
            "$gte" => {
                let value = Self::scalar_operand(op, operand)?;
                Ok(range(Bound::Included(value.clone()), upper_bound_of(&value)))
            }
            "$lt" => {
                let value = Self::scalar_operand(op, operand)?;
                Ok(range(lower_bound_of(&value), Bound::Excluded(value)))
            }
            "$lte" => {
                let value = Self::scalar_operand(op, operand)?;
                Ok(range(lower_bound_of(&value), Bound::Included(value)))
            }
            "$in" => {
                let Value::Array(options) = operand else {
                    return Err(BackendError::InvalidArgument(
                        "$in expects an array operand".to_string(),
                    ));
                };
                let mut result = BTreeSet::new();
                for option in options {
                    result.extend(eq(&Self::scalar_operand("$in", option)?));
                }
                Ok(result)
            }
            "$contains" => {
                let value = Self::scalar_operand(op, operand)?;
                // Array elements are indexed individually, so element
                // containment is plain equality. String fields additionally
                // match on substring.
                let mut result = eq(&value);
                if let (FieldValue::String(needle), Some(by_value)) = (&value, by_value) {
                    for (candidate, ids) in by_value {
                        if let FieldValue::String(s) = candidate
                            && s.contains(needle)
                        {
                            result.extend(ids.iter().copied());
                        }
                    }
                }
                Ok(result)
            }
            other => Err(BackendError::InvalidArgument(format!(
                "unknown operator {other} in where clause"
            ))),
        }
    }
}

/// Range queries stay within the operand's own type: a numeric bound must not
/// sweep in strings just because strings sort after numbers.
fn lower_bound_of(value: &FieldValue) -> Bound<FieldValue> {
    match value {
        FieldValue::Null => Bound::Included(FieldValue::Null),
        FieldValue::Bool(_) => Bound::Included(FieldValue::Bool(false)),
        FieldValue::Number(_) => Bound::Included(FieldValue::Number(f64::NEG_INFINITY)),
        FieldValue::String(_) => Bound::Included(FieldValue::String(String::new())),
    }
}

fn upper_bound_of(value: &FieldValue) -> Bound<FieldValue> {
    match value {
        FieldValue::Null => Bound::Included(FieldValue::Null),
        FieldValue::Bool(_) => Bound::Included(FieldValue::Bool(true)),
        FieldValue::Number(_) => Bound::Included(FieldValue::Number(f64::INFINITY)),
        // No finite upper bound for strings; stop before the next variant.
        FieldValue::String(_) => Bound::Unbounded,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::entity::MillisSinceEpoch;
    use crate::entity::NounType;

    fn noun(id: Uuid, noun_type: NounType, metadata: Value, confidence: Option<f64>) -> Noun {
        let Value::Object(metadata) = metadata else {
            panic!("metadata must be an object");
        };
        Noun {
            id,
            noun_type,
            vector: vec![],
            metadata,
            data: None,
            confidence,
            weight: None,
            created_at: MillisSinceEpoch(0),
            updated_at: MillisSinceEpoch(0),
            created_by: None,
        }
    }

    fn sample_index() -> (FieldIndex, Uuid, Uuid, Uuid) {
        let mut index = FieldIndex::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        index.insert(&noun(
            a,
            NounType::Document,
            json!({"category": "important", "status": "active", "pages": 10}),
            Some(0.9),
        ));
        index.insert(&noun(
            b,
            NounType::Document,
            json!({"category": "routine", "status": "active", "pages": 3}),
            Some(0.5),
        ));
        index.insert(&noun(
            c,
            NounType::Person,
            json!({"name": "Ada", "tags": ["pioneer", "math"]}),
            None,
        ));
        (index, a, b, c)
    }

    #[test]
    fn test_eq_and_implicit_and() {
        let (index, a, _b, _c) = sample_index();
        let matched = index
            .eval(&json!({"category": "important", "status": "active"}))
            .unwrap();
        assert_eq!(matched, BTreeSet::from([a]));
    }

    #[test]
    fn test_range_on_numeric_field() {
        let (index, a, _b, _c) = sample_index();
        let matched = index.eval(&json!({"confidence": {"$gte": 0.8}})).unwrap();
        assert_eq!(matched, BTreeSet::from([a]));
        let matched = index.eval(&json!({"pages": {"$gt": 1, "$lt": 5}})).unwrap();
        assert_eq!(matched.len(), 1);
    }

    #[test]
    fn test_ne_excludes_only_matches() {
        let (index, _a, b, c) = sample_index();
        let matched = index.eval(&json!({"category": {"$ne": "important"}})).unwrap();
        assert_eq!(matched, BTreeSet::from([b, c]));
    }

    #[test]
    fn test_in_and_or() {
        let (index, a, b, c) = sample_index();
        let matched = index
            .eval(&json!({"category": {"$in": ["important", "routine"]}}))
            .unwrap();
        assert_eq!(matched, BTreeSet::from([a, b]));
        let matched = index
            .eval(&json!({"$or": [{"category": "important"}, {"name": "Ada"}]}))
            .unwrap();
        assert_eq!(matched, BTreeSet::from([a, c]));
    }

    #[test]
    fn test_contains_on_array_and_substring() {
        let (index, a, _b, c) = sample_index();
        let matched = index.eval(&json!({"tags": {"$contains": "math"}})).unwrap();
        assert_eq!(matched, BTreeSet::from([c]));
        let matched = index
            .eval(&json!({"category": {"$contains": "import"}}))
            .unwrap();
        assert_eq!(matched, BTreeSet::from([a]));
    }

    #[test]
    fn test_type_field_is_indexed() {
        let (index, _a, _b, c) = sample_index();
        let matched = index.eval(&json!({"type": "person"})).unwrap();
        assert_eq!(matched, BTreeSet::from([c]));
    }

    #[test]
    fn test_unknown_operator_is_invalid() {
        let (index, ..) = sample_index();
        assert_matches!(
            index.eval(&json!({"x": {"$regex": "a.*"}})),
            Err(BackendError::InvalidArgument(_))
        );
    }

    #[test]
    fn test_update_symmetry_no_posting_accumulation() {
        let mut index = FieldIndex::default();
        let id = Uuid::new_v4();
        for i in 0..20 {
            index.insert(&noun(
                id,
                NounType::Document,
                json!({"category": "important", "revision": i}),
                None,
            ));
        }
        assert_eq!(index.posting_count(&id, "category"), 1);
        assert_eq!(index.posting_count(&id, "revision"), 1);
        let matched = index.eval(&json!({"category": "important"})).unwrap();
        assert_eq!(matched, BTreeSet::from([id]));
    }

    #[test]
    fn test_remove_clears_every_field() {
        let (mut index, a, ..) = sample_index();
        index.remove(&a);
        assert!(!index.contains(&a));
        assert_eq!(index.posting_count(&a, "category"), 0);
        assert_eq!(index.posting_count(&a, "type"), 0);
        let matched = index.eval(&json!({"category": "important"})).unwrap();
        assert!(matched.is_empty());
    }
}
