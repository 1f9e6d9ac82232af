use crate::core::{OrmError, Result};
use serde::{Deserialize, Serialize};

/// One member of an integer-backed enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnumMember {
    pub name: String,
    pub value: i64,
}

impl EnumMember {
    pub fn new(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Declared enumeration type behind an enum field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumType {
    name: String,
    members: Vec<EnumMember>,
    default: Option<i64>,
}

impl EnumType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
            default: None,
        }
    }

    pub fn member(mut self, name: impl Into<String>, value: i64) -> Self {
        self.members.push(EnumMember::new(name, value));
        self
    }

    /// Integer used when a record never assigned the field.
    pub fn default_value(mut self, value: i64) -> Self {
        self.default = Some(value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[EnumMember] {
        &self.members
    }

    pub fn from_value(&self, value: i64) -> Option<&EnumMember> {
        self.members.iter().find(|m| m.value == value)
    }

    pub fn from_name(&self, name: &str) -> Option<&EnumMember> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Declared default member, falling back to the first declared member.
    pub fn default_member(&self) -> Option<&EnumMember> {
        match self.default {
            Some(value) => self.from_value(value),
            None => self.members.first(),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.members.is_empty() {
            return Err(OrmError::SchemaDefinition(format!(
                "Enum '{}' declares no members",
                self.name
            )));
        }
        for (idx, member) in self.members.iter().enumerate() {
            if self.members[..idx].iter().any(|m| m.value == member.value) {
                return Err(OrmError::SchemaDefinition(format!(
                    "Enum '{}' declares value {} twice",
                    self.name, member.value
                )));
            }
        }
        if let Some(default) = self.default {
            if self.from_value(default).is_none() {
                return Err(OrmError::SchemaDefinition(format!(
                    "Enum '{}' default {} is not a member",
                    self.name, default
                )));
            }
        }
        Ok(())
    }
}
