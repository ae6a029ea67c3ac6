//! Contract interface descriptors
//!
//! A descriptor enumerates a contract's callable surface: methods with
//! ordered parameter names and a mutability flag, plus readable attributes
//! typed by the runtime type of their deployed value. Authors may supply a
//! descriptor with the deploy instruction; when absent one is derived from
//! the parsed source. Either way the descriptor is checked against the
//! source before it is persisted.
//!
//! Call-dispatch selectors follow the Ethereum ABI convention (Keccak-256
//! of `name(string,...)` truncated to 4 bytes) with every parameter typed
//! as the opaque `string`, which keeps selectors wallet-compatible without
//! a static type system in the contract language.

use crate::crypto::keccak256;
use crate::error::{ChainError, Result};
use crate::vm::interpreter::ContractSource;
use crate::vm::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamAbi {
    pub name: String,
    pub ty: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodAbi {
    pub name: String,
    pub params: Vec<ParamAbi>,
    pub mutating: bool,
    pub selector: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeAbi {
    pub name: String,
    pub ty: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDescriptor {
    pub methods: Vec<MethodAbi>,
    pub attributes: Vec<AttributeAbi>,
}

/// 4-byte call selector for a method with `param_count` opaque-string
/// parameters, `0x`-prefixed.
pub fn selector(name: &str, param_count: usize) -> String {
    let types = vec!["string"; param_count].join(",");
    let signature = format!("{}({})", name, types);
    let digest = keccak256(signature.as_bytes());
    format!("0x{}", hex::encode(&digest[..4]))
}

// Accepts both the current form ({"name": ..., "ty": ...} params plus a
// `mutating` bool) and the legacy form (bare string params plus an
// `@view`/`@mutate` annotation string) used by already-deployed contracts.
impl<'de> Deserialize<'de> for MethodAbi {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawParam {
            Named { name: String, ty: String },
            Bare(String),
        }

        #[derive(Deserialize)]
        struct RawMethod {
            name: String,
            #[serde(default)]
            params: Vec<RawParam>,
            #[serde(default)]
            mutating: Option<bool>,
            #[serde(default)]
            annotation: Option<String>,
            #[serde(default)]
            selector: Option<String>,
        }

        let raw = RawMethod::deserialize(deserializer)?;
        let params: Vec<ParamAbi> = raw
            .params
            .into_iter()
            .map(|p| match p {
                RawParam::Named { name, ty } => ParamAbi { name, ty },
                RawParam::Bare(name) => ParamAbi {
                    name,
                    ty: "string".to_string(),
                },
            })
            .collect();
        let mutating = match (raw.mutating, raw.annotation.as_deref()) {
            (Some(flag), _) => flag,
            (None, Some("@view")) => false,
            // legacy contracts default to state-mutating unless annotated
            (None, _) => true,
        };
        let selector = raw
            .selector
            .unwrap_or_else(|| selector(&raw.name, params.len()));
        Ok(MethodAbi {
            name: raw.name,
            params,
            mutating,
            selector,
        })
    }
}

impl InterfaceDescriptor {
    /// Derive a descriptor from parsed source and post-constructor storage.
    pub fn derive(source: &ContractSource, storage: &BTreeMap<String, Value>) -> Self {
        let methods = source
            .methods
            .iter()
            .map(|m| MethodAbi {
                name: m.name.clone(),
                params: m
                    .params
                    .iter()
                    .map(|p| ParamAbi {
                        name: p.clone(),
                        ty: "string".to_string(),
                    })
                    .collect(),
                mutating: !m.view,
                selector: selector(&m.name, m.params.len()),
            })
            .collect();
        let attributes = storage
            .iter()
            .map(|(name, value)| AttributeAbi {
                name: name.clone(),
                ty: value.type_name().to_string(),
            })
            .collect();
        InterfaceDescriptor {
            methods,
            attributes,
        }
    }

    /// Check an author-supplied descriptor against the parsed source and
    /// deployed storage, normalizing selectors. Every declared method must
    /// exist with matching arity and mutability; every declared attribute
    /// must name a storage field.
    pub fn validated(
        mut self,
        source: &ContractSource,
        storage: &BTreeMap<String, Value>,
    ) -> Result<Self> {
        for method in &mut self.methods {
            let def = source.method(&method.name).ok_or_else(|| {
                ChainError::InvalidTransaction(format!(
                    "interface declares method {:?} not present in source",
                    method.name
                ))
            })?;
            if def.params.len() != method.params.len() {
                return Err(ChainError::InvalidTransaction(format!(
                    "interface method {:?} declares {} params, source has {}",
                    method.name,
                    method.params.len(),
                    def.params.len()
                )));
            }
            if method.mutating == def.view {
                return Err(ChainError::InvalidTransaction(format!(
                    "interface method {:?} mutability disagrees with source",
                    method.name
                )));
            }
            method.selector = selector(&method.name, method.params.len());
        }
        for attr in &self.attributes {
            if !storage.contains_key(&attr.name) {
                return Err(ChainError::InvalidTransaction(format!(
                    "interface declares attribute {:?} not present in storage",
                    attr.name
                )));
            }
        }
        Ok(self)
    }

    pub fn method(&self, name: &str) -> Option<&MethodAbi> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeAbi> {
        self.attributes.iter().find(|a| a.name == name)
    }
}
