//! Property values and intrinsic functions
//!
//! An [`Expr`] is either a literal JSON value or an intrinsic that the
//! provisioning engine resolves at deploy time. Intrinsics that point at other
//! declarations (`Ref`, `Fn::GetAtt`) are what the dependency graph is built
//! from.

use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Pseudo parameters provided by the provisioning engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pseudo {
    AccountId,
    Partition,
    Region,
}

impl Pseudo {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AccountId => "AWS::AccountId",
            Self::Partition => "AWS::Partition",
            Self::Region => "AWS::Region",
        }
    }
}

/// A property value
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Plain JSON value
    Literal(Value),
    /// `Ref` to another declaration's logical id
    Ref(String),
    /// `Fn::GetAtt` on another declaration
    GetAtt { logical_id: String, attribute: String },
    /// `Ref` to a pseudo parameter
    Pseudo(Pseudo),
    /// `Fn::Join`
    Join { delimiter: String, parts: Vec<Expr> },
    /// `Fn::Select`
    Select { index: usize, list: Box<Expr> },
    /// `Fn::GetAZs` for the current region
    GetAzs,
    /// `Fn::FindInMap`
    FindInMap {
        mapping: String,
        key: Box<Expr>,
        attribute: String,
    },
    /// `Fn::Base64`
    Base64(Box<Expr>),
    /// List whose elements may contain intrinsics
    List(Vec<Expr>),
    /// Object whose values may contain intrinsics
    Object(BTreeMap<String, Expr>),
}

impl Expr {
    pub fn reference(logical_id: impl Into<String>) -> Self {
        Self::Ref(logical_id.into())
    }

    pub fn get_att(logical_id: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::GetAtt {
            logical_id: logical_id.into(),
            attribute: attribute.into(),
        }
    }

    pub fn join(delimiter: impl Into<String>, parts: Vec<Expr>) -> Self {
        Self::Join {
            delimiter: delimiter.into(),
            parts,
        }
    }

    /// Availability zone `index` of the deployment region
    pub fn availability_zone(index: usize) -> Self {
        Self::Select {
            index,
            list: Box::new(Self::GetAzs),
        }
    }

    pub fn find_in_map(
        mapping: impl Into<String>,
        key: Expr,
        attribute: impl Into<String>,
    ) -> Self {
        Self::FindInMap {
            mapping: mapping.into(),
            key: Box::new(key),
            attribute: attribute.into(),
        }
    }

    pub fn base64(inner: impl Into<Expr>) -> Self {
        Self::Base64(Box::new(inner.into()))
    }

    /// Build an object from key/value pairs
    pub fn object<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Expr>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Object(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build a list from anything convertible into expressions
    pub fn list<V, I>(items: I) -> Self
    where
        V: Into<Expr>,
        I: IntoIterator<Item = V>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Literal string, if this is one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Literal(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Logical ids this expression points at, in order of appearance
    pub fn references(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.walk(&mut |expr| match expr {
            Self::Ref(id) | Self::GetAtt { logical_id: id, .. } => out.push(id.as_str()),
            _ => {}
        });
        out
    }

    /// Mapping names used by `Fn::FindInMap`
    pub fn mappings(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.walk(&mut |expr| {
            if let Self::FindInMap { mapping, .. } = expr {
                out.push(mapping.as_str());
            }
        });
        out
    }

    fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
        visit(self);
        match self {
            Self::Join { parts, .. } | Self::List(parts) => {
                for part in parts {
                    part.walk(visit);
                }
            }
            Self::Select { list, .. } => list.walk(visit),
            Self::FindInMap { key, .. } => key.walk(visit),
            Self::Base64(inner) => inner.walk(visit),
            Self::Object(map) => {
                for value in map.values() {
                    value.walk(visit);
                }
            }
            Self::Literal(_)
            | Self::Ref(_)
            | Self::GetAtt { .. }
            | Self::Pseudo(_)
            | Self::GetAzs => {}
        }
    }

    /// Render as CloudFormation JSON
    pub fn to_value(&self) -> Value {
        match self {
            Self::Literal(v) => v.clone(),
            Self::Ref(id) => json!({ "Ref": id }),
            Self::GetAtt {
                logical_id,
                attribute,
            } => json!({ "Fn::GetAtt": [logical_id, attribute] }),
            Self::Pseudo(p) => json!({ "Ref": p.as_str() }),
            Self::Join { delimiter, parts } => {
                let parts: Vec<Value> = parts.iter().map(Self::to_value).collect();
                json!({ "Fn::Join": [delimiter, parts] })
            }
            Self::Select { index, list } => json!({ "Fn::Select": [index, list.to_value()] }),
            Self::GetAzs => json!({ "Fn::GetAZs": "" }),
            Self::FindInMap {
                mapping,
                key,
                attribute,
            } => json!({ "Fn::FindInMap": [mapping, key.to_value(), attribute] }),
            Self::Base64(inner) => json!({ "Fn::Base64": inner.to_value() }),
            Self::List(items) => Value::Array(items.iter().map(Self::to_value).collect()),
            Self::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect::<Map<String, Value>>(),
            ),
        }
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Self::Literal(Value::String(value.to_string()))
    }
}

impl From<String> for Expr {
    fn from(value: String) -> Self {
        Self::Literal(Value::String(value))
    }
}

impl From<&String> for Expr {
    fn from(value: &String) -> Self {
        Self::Literal(Value::String(value.clone()))
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        Self::Literal(Value::Bool(value))
    }
}

impl From<u16> for Expr {
    fn from(value: u16) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<u32> for Expr {
    fn from(value: u32) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<usize> for Expr {
    fn from(value: usize) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<Pseudo> for Expr {
    fn from(value: Pseudo) -> Self {
        Self::Pseudo(value)
    }
}

impl From<Vec<Expr>> for Expr {
    fn from(value: Vec<Expr>) -> Self {
        Self::List(value)
    }
}

impl From<BTreeMap<String, Expr>> for Expr {
    fn from(value: BTreeMap<String, Expr>) -> Self {
        Self::Object(value)
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}
