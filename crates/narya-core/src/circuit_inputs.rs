//! named witness values handed to the circuit witness generator

use std::collections::BTreeMap;

use serde::ser::{Serialize, SerializeSeq, Serializer};

use narya_crypto::field::{fr_to_dec_string, Fr};

/// A scalar, or a nested array of them. Serialised as decimal strings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CircuitValue {
    Scalar(Fr),
    Vector(Vec<Fr>),
    Matrix(Vec<Vec<Fr>>),
    /// one matrix per batch slot, e.g. merkle paths
    Tensor(Vec<Vec<Vec<Fr>>>),
}

struct DecVec<'a>(&'a [Fr]);

impl Serialize for DecVec<'_> {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(self.0.iter().map(fr_to_dec_string))
    }
}

impl Serialize for CircuitValue {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            CircuitValue::Scalar(v) => s.serialize_str(&fr_to_dec_string(v)),
            CircuitValue::Vector(v) => DecVec(v).serialize(s),
            CircuitValue::Matrix(m) => s.collect_seq(m.iter().map(|row| DecVec(row))),
            CircuitValue::Tensor(t) => {
                let mut seq = s.serialize_seq(Some(t.len()))?;
                for m in t {
                    let rows: Vec<DecVec<'_>> = m.iter().map(|row| DecVec(row)).collect();
                    seq.serialize_element(&rows)?;
                }
                seq.end()
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
#[serde(transparent)]
pub struct CircuitInputs(BTreeMap<String, CircuitValue>);

impl CircuitInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: CircuitValue) {
        self.0.insert(name.to_string(), value);
    }

    pub fn scalar(&mut self, name: &str, value: Fr) {
        self.insert(name, CircuitValue::Scalar(value));
    }

    pub fn vector(&mut self, name: &str, value: Vec<Fr>) {
        self.insert(name, CircuitValue::Vector(value));
    }

    pub fn matrix(&mut self, name: &str, value: Vec<Vec<Fr>>) {
        self.insert(name, CircuitValue::Matrix(value));
    }

    pub fn tensor(&mut self, name: &str, value: Vec<Vec<Vec<Fr>>>) {
        self.insert(name, CircuitValue::Tensor(value));
    }

    pub fn get(&self, name: &str) -> Option<&CircuitValue> {
        self.0.get(name)
    }

    pub fn get_scalar(&self, name: &str) -> Option<Fr> {
        match self.0.get(name) {
            Some(CircuitValue::Scalar(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_vector(&self, name: &str) -> Option<&[Fr]> {
        match self.0.get(name) {
            Some(CircuitValue::Vector(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_matrix(&self, name: &str) -> Option<&[Vec<Fr>]> {
        match self.0.get(name) {
            Some(CircuitValue::Matrix(m)) => Some(m),
            _ => None,
        }
    }

    pub fn get_tensor(&self, name: &str) -> Option<&[Vec<Vec<Fr>>]> {
        match self.0.get(name) {
            Some(CircuitValue::Tensor(t)) => Some(t),
            _ => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}
