//! Per-object parameter tables.

use super::any::AnyValue;
use super::object::ObjectRef;
use crate::util::{DataType, Error, Result, ValueType};

/// Where a parameter value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provenance {
    /// Set through the public typed API
    Typed,
    /// Set by internal code, not readable through the typed accessor
    Direct,
}

#[derive(Clone, Debug)]
struct ParamEntry {
    name: String,
    value: AnyValue,
    provenance: Provenance,
}

/// Name -> value mapping. Only the latest write per name is visible.
#[derive(Clone, Debug, Default)]
pub struct ParameterTable {
    entries: Vec<ParamEntry>,
}

impl ParameterTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, name: &str) -> Option<&ParamEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    fn insert(&mut self, name: &str, value: AnyValue, provenance: Provenance) -> bool {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                let changed = entry.provenance != provenance || entry.value != value;
                entry.value = value;
                entry.provenance = provenance;
                changed
            }
            None => {
                self.entries.push(ParamEntry {
                    name: name.to_owned(),
                    value,
                    provenance,
                });
                true
            }
        }
    }

    /// Insert or replace a typed entry. Returns true if the stored value changed.
    pub fn set(&mut self, name: &str, value: AnyValue) -> bool {
        self.insert(name, value, Provenance::Typed)
    }

    /// Insert or replace an entry without type validation.
    pub fn set_direct(&mut self, name: &str, value: AnyValue) -> bool {
        self.insert(name, value, Provenance::Direct)
    }

    /// Remove an entry; absent names are a no-op. Returns true if removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.name != name);
        self.entries.len() != before
    }

    pub fn remove_all(&mut self) -> bool {
        let had = !self.entries.is_empty();
        self.entries.clear();
        had
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn provenance(&self, name: &str) -> Option<Provenance> {
        self.find(name).map(|e| e.provenance)
    }

    /// Copy of an entry regardless of provenance (empty if absent).
    pub fn get_direct(&self, name: &str) -> AnyValue {
        self.find(name).map(|e| e.value.clone()).unwrap_or_default()
    }

    /// Typed accessor: the entry must exist, be typed and carry `ty`.
    pub fn get_typed(&self, name: &str, ty: DataType) -> Result<&AnyValue> {
        let entry = self
            .find(name)
            .ok_or_else(|| Error::ParameterNotFound(name.to_owned()))?;
        if entry.provenance == Provenance::Direct {
            return Err(Error::NotLocallyReadable(name.to_owned()));
        }
        if entry.value.ty() != ty {
            return Err(Error::mismatch(ty, entry.value.ty()));
        }
        Ok(&entry.value)
    }

    /// Typed value, `None` if absent, mismatched or direct.
    pub fn get<T: ValueType>(&self, name: &str) -> Option<T> {
        self.get_typed(name, T::TYPE).ok().and_then(|v| v.get::<T>())
    }

    /// Typed value or `default` if absent, mismatched or direct.
    pub fn get_or<T: ValueType>(&self, name: &str, default: T) -> T {
        self.get(name).unwrap_or(default)
    }

    /// Object value under `name` whose kind is accepted by `kind`.
    pub fn get_object(&self, name: &str, kind: DataType) -> Option<ObjectRef> {
        let object = self.find(name)?.value.as_object()?;
        kind.accepts_object(object.kind()).then(|| object.clone())
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.find(name)?.value.as_str()
    }

    pub fn get_string_or(&self, name: &str, default: &str) -> String {
        self.get_string(name).unwrap_or(default).to_owned()
    }

    pub fn get_data_type(&self, name: &str) -> Option<DataType> {
        self.get_typed(name, DataType::DataType)
            .ok()
            .and_then(AnyValue::data_type_value)
    }

    /// Unsigned integer accepting either 32- or 64-bit storage.
    pub fn get_index(&self, name: &str) -> Option<u64> {
        self.get::<u64>(name)
            .or_else(|| self.get::<u32>(name).map(u64::from))
            .or_else(|| self.get::<i32>(name).and_then(|v| u64::try_from(v).ok()))
    }
}
