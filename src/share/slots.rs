//! Declared-attribute state for dynamically shaped monitors.

use super::{is_shareable, Value};
use crate::error::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// A fixed table of named attributes.
///
/// The attribute names are declared once; reading or writing any other name
/// fails with `StateAccess`, as does reading a declared attribute that was
/// never assigned. Stored values must be shareable. Wrap it in a
/// [`Monitor`](crate::Monitor) to get lock-guarded, attribute-style state:
///
/// ```ignore
/// let account = Monitor::new(Slots::declare("Account", &["owner", "balance"]));
/// account.enter(|s| s.set("balance", Value::from(10)))?;
/// ```
pub struct Slots {
    type_name: &'static str,
    slots: Vec<(Arc<str>, Option<Value>)>,
}

impl Slots {
    /// Declares the attribute table for `type_name`.
    #[must_use]
    pub fn declare(type_name: &'static str, names: &[&str]) -> Self {
        Self {
            type_name,
            slots: names.iter().map(|name| (Arc::from(*name), None)).collect(),
        }
    }

    /// Returns the declaring type's name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn slot(&self, name: &str) -> Result<&Option<Value>> {
        self.slots
            .iter()
            .find(|(slot, _)| &**slot == name)
            .map(|(_, value)| value)
            .ok_or_else(|| Error::state_access(self.type_name, name))
    }

    fn slot_mut(&mut self, name: &str) -> Result<&mut Option<Value>> {
        let type_name = self.type_name;
        self.slots
            .iter_mut()
            .find(|(slot, _)| &**slot == name)
            .map(|(_, value)| value)
            .ok_or_else(|| Error::state_access(type_name, name))
    }

    /// Returns a clone of attribute `name`.
    pub fn get(&self, name: &str) -> Result<Value> {
        self.slot(name)?
            .clone()
            .ok_or_else(|| Error::state_access(self.type_name, name))
    }

    /// Assigns attribute `name`.
    pub fn set(&mut self, name: &str, value: Value) -> Result<()> {
        let slot = self.slot_mut(name)?;
        if !is_shareable(&value) {
            return Err(Error::not_shareable(value.type_name()));
        }
        *slot = Some(value);
        Ok(())
    }

    /// Unassigns attribute `name`, returning its previous value.
    pub fn clear(&mut self, name: &str) -> Result<Value> {
        let type_name = self.type_name;
        self.slot_mut(name)?
            .take()
            .ok_or_else(|| Error::state_access(type_name, name))
    }

    /// Returns true if `name` is declared and assigned.
    #[must_use]
    pub fn is_set(&self, name: &str) -> bool {
        matches!(self.slot(name), Ok(Some(_)))
    }

    /// Iterates over the declared names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|(name, _)| &**name)
    }
}

impl fmt::Debug for Slots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(self.type_name);
        for (name, value) in &self.slots {
            s.field(name, value);
        }
        s.finish()
    }
}
