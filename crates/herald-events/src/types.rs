//! Type descriptors and the variance rules used to bind targets to events.
//!
//! Signatures are checked once, at subscribe time, against an explicit
//! [`TypeRegistry`]. Reference types form a single-inheritance tree rooted at
//! `object`; value types never convert to anything but themselves.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{EventError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    /// Copied on assignment; invariant in signatures.
    Value,
    /// Shared by reference; may be upcast to any ancestor.
    Reference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub name: String,
    pub kind: TypeKind,
    /// Direct supertype. `None` for value types and for the `object` root.
    pub parent: Option<String>,
}

/// Parameter and result types of an event or a callback target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    params: Vec<String>,
    result: String,
}

impl Signature {
    pub fn new<I, S>(params: I, result: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            params: params.into_iter().map(Into::into).collect(),
            result: result.into(),
        }
    }

    /// A signature whose result is `void`.
    pub fn action<I, S>(params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(params, TypeRegistry::VOID)
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn result(&self) -> &str {
        &self.result
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) -> {}", self.params.join(", "), self.result)
    }
}

/// Why a target signature cannot be bound to an event signature.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VarianceViolation {
    #[error("expected {expected} parameters, target takes {found}")]
    Arity { expected: usize, found: usize },

    /// The target demands a narrower parameter type than the event supplies.
    #[error("parameter {index}: `{declared}` does not convert to `{target}`")]
    Parameter {
        index: usize,
        declared: String,
        target: String,
    },

    /// The target returns something the event's callers cannot treat as the declared result.
    #[error("result: `{target}` does not convert to `{declared}`")]
    Result { declared: String, target: String },

    #[error("unknown type `{0}`")]
    UnknownType(String),

    /// The event already exists with a different signature.
    #[error("event already declared with a different signature")]
    Redeclared,
}

/// Registry of known types. Built once and shared read-only by a broadcaster.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: HashMap<String, TypeDescriptor>,
}

impl TypeRegistry {
    pub const OBJECT: &'static str = "object";
    pub const STRING: &'static str = "string";
    pub const INT: &'static str = "int";
    pub const DECIMAL: &'static str = "decimal";
    pub const BOOL: &'static str = "bool";
    pub const VOID: &'static str = "void";

    /// A registry preloaded with the builtin types.
    pub fn new() -> Self {
        let mut types = HashMap::new();
        let mut insert = |name: &str, kind: TypeKind, parent: Option<&str>| {
            types.insert(
                name.to_string(),
                TypeDescriptor {
                    name: name.to_string(),
                    kind,
                    parent: parent.map(str::to_string),
                },
            );
        };
        insert(Self::OBJECT, TypeKind::Reference, None);
        insert(Self::STRING, TypeKind::Reference, Some(Self::OBJECT));
        insert(Self::INT, TypeKind::Value, None);
        insert(Self::DECIMAL, TypeKind::Value, None);
        insert(Self::BOOL, TypeKind::Value, None);
        insert(Self::VOID, TypeKind::Value, None);
        Self { types }
    }

    pub fn get(&self, name: &str) -> Option<&TypeDescriptor> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Register a value type. Registering the same value type twice is a no-op.
    pub fn register_value(&mut self, name: impl Into<String>) -> Result<()> {
        self.insert(TypeDescriptor {
            name: name.into(),
            kind: TypeKind::Value,
            parent: None,
        })
    }

    /// Register a reference type deriving from `parent`, which must already be a
    /// known reference type.
    pub fn register_reference(&mut self, name: impl Into<String>, parent: &str) -> Result<()> {
        let name = name.into();
        match self.types.get(parent) {
            None => return Err(EventError::UnknownType(parent.to_string())),
            Some(p) if p.kind != TypeKind::Reference => {
                return Err(EventError::InvalidType {
                    name,
                    reason: format!("parent `{parent}` is a value type"),
                });
            }
            Some(_) => {}
        }
        self.insert(TypeDescriptor {
            name,
            kind: TypeKind::Reference,
            parent: Some(parent.to_string()),
        })
    }

    fn insert(&mut self, desc: TypeDescriptor) -> Result<()> {
        if let Some(existing) = self.types.get(&desc.name) {
            if *existing == desc {
                return Ok(());
            }
            return Err(EventError::InvalidType {
                name: desc.name,
                reason: "already registered with a different definition".to_string(),
            });
        }
        self.types.insert(desc.name.clone(), desc);
        Ok(())
    }

    /// Whether a value of type `from` implicitly converts to `to`.
    ///
    /// Identity always converts. Otherwise both must be reference types and `to`
    /// must be an ancestor of `from`.
    pub fn is_assignable(&self, from: &str, to: &str) -> std::result::Result<bool, VarianceViolation> {
        let from_desc = self.lookup(from)?;
        let to_desc = self.lookup(to)?;
        if from == to {
            return Ok(true);
        }
        if from_desc.kind != TypeKind::Reference || to_desc.kind != TypeKind::Reference {
            return Ok(false);
        }

        let mut current = from_desc.parent.as_deref();
        while let Some(name) = current {
            if name == to {
                return Ok(true);
            }
            current = self.lookup(name)?.parent.as_deref();
        }
        Ok(false)
    }

    /// Check that `target` may be bound where `declared` is expected.
    ///
    /// Parameters are contravariant (the event's argument must convert to what
    /// the target accepts) and the result is covariant (the target's result must
    /// convert to the declared result).
    pub fn check_binding(
        &self,
        declared: &Signature,
        target: &Signature,
    ) -> std::result::Result<(), VarianceViolation> {
        if declared.params.len() != target.params.len() {
            return Err(VarianceViolation::Arity {
                expected: declared.params.len(),
                found: target.params.len(),
            });
        }

        for (index, (d, t)) in declared.params.iter().zip(&target.params).enumerate() {
            if !self.is_assignable(d, t)? {
                return Err(VarianceViolation::Parameter {
                    index,
                    declared: d.clone(),
                    target: t.clone(),
                });
            }
        }

        if !self.is_assignable(&target.result, &declared.result)? {
            return Err(VarianceViolation::Result {
                declared: declared.result.clone(),
                target: target.result.clone(),
            });
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> std::result::Result<&TypeDescriptor, VarianceViolation> {
        self.types
            .get(name)
            .ok_or_else(|| VarianceViolation::UnknownType(name.to_string()))
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
